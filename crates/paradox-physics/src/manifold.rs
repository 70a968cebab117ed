//! Contact manifold generation and clipping for box-box collisions.
//!
//! Grounded on `original_source/source/physics/collision_procedures.h`'s
//! `build_contact_manifold`/`pseudo_clip_polyhedra` and the manifold-origin
//! weighted-centroid step inlined at the tail of `box_box_intersect` in
//! `collision_procedures.cpp`.

use nalgebra::{Matrix4, Vector3, Vector4};

use crate::collider::UNIT_RADIUS;

/// Depth (in projection units along the collision normal) within which a
/// box vertex is considered part of the contact manifold.
pub const MANIFOLD_DEPTH: f32 = 0.04;

/// Weight assigned to a manifold vertex exactly `MANIFOLD_DEPTH` behind the
/// deepest vertex; the deepest vertex itself always weighs `1.0`.
pub const MANIFOLD_MIN_WEIGHT: f32 = 0.80;

/// Epsilon used by the clip loop's inside/outside test, biased to prefer
/// "inside" so coplanar vertices don't flicker in and out of the manifold.
const CLIP_EPSILON: f32 = 5e-5;

fn transform_point(m: &Matrix4<f32>, v: Vector3<f32>) -> Vector3<f32> {
    let out = m * Vector4::new(v.x, v.y, v.z, 1.0);
    Vector3::new(out.x, out.y, out.z)
}

/// Build a box's contact-manifold polygon: the vertices within
/// [`MANIFOLD_DEPTH`] of the extremum along `axis`, in winding order around
/// the box's perimeter on that face.
pub fn build_contact_manifold(model: &Matrix4<f32>, axis: Vector3<f32>) -> Vec<Vector3<f32>> {
    // Perimeter winding order: toggle x, then y, then x, then z, then x,
    // then y, then x, then z -- traces all 8 corners via 4 face diagonals.
    const TOGGLE_ORDER: [usize; 8] = [0, 1, 0, 2, 0, 1, 0, 2];

    let mut dims = Vector3::new(-1.0f32, -1.0, -1.0);
    let mut all_vertices: Vec<(f32, Vector3<f32>)> = Vec::with_capacity(8);
    let mut max_coeff = f32::NEG_INFINITY;

    for &idx in &TOGGLE_ORDER {
        let local = dims * UNIT_RADIUS;
        let vertex = transform_point(model, local);
        let coeff = vertex.dot(&axis);
        max_coeff = max_coeff.max(coeff);
        if coeff >= max_coeff - MANIFOLD_DEPTH {
            all_vertices.push((coeff, vertex));
        }
        dims[idx] = -dims[idx];
    }

    all_vertices
        .into_iter()
        .rev()
        .filter(|(coeff, _)| *coeff >= max_coeff - MANIFOLD_DEPTH)
        .map(|(_, v)| v)
        .collect()
}

/// Clip `clippee`'s polygon against `clipper`'s, treating each clipper edge
/// (combined with `axis`) as a half-space boundary. Assumes both polygons
/// are convex and wound consistently.
pub fn pseudo_clip_polyhedra(
    clipper: &[Vector3<f32>],
    mut clippee: Vec<Vector3<f32>>,
    axis: Vector3<f32>,
) -> Vec<Vector3<f32>> {
    if clipper.len() < 2 || clippee.len() < 2 {
        return clippee;
    }

    let centre: Vector3<f32> =
        clipper.iter().copied().sum::<Vector3<f32>>() / clipper.len() as f32;

    for i in 0..clipper.len() {
        let next = clipper[(i + 1) % clipper.len()];
        let tangent = axis.cross(&(next - clipper[i]));
        if tangent.norm_squared() == 0.0 {
            continue;
        }
        let plane_normal = tangent.normalize();
        let plane_d = -plane_normal.dot(&clipper[i]);

        let mut inside_coeff = if clipper.len() > 2 {
            plane_normal.dot(&centre) + plane_d
        } else {
            0.0
        };
        if inside_coeff == 0.0 {
            inside_coeff = f32::INFINITY;
        }

        let mut clipped: Vec<Vector3<f32>> = Vec::new();
        let mut prev_coeff = f32::NEG_INFINITY;
        let n = clippee.len();
        let passes = if n == 2 { 2 } else { n + 1 };

        for j in 0..passes {
            let idx = j % n;
            let prev_idx = if idx == 0 { n - 1 } else { idx - 1 };
            let coeff = plane_normal.dot(&clippee[idx]) + plane_d;

            let prev_inside = (prev_coeff >= -CLIP_EPSILON && inside_coeff >= -CLIP_EPSILON)
                || (prev_coeff <= CLIP_EPSILON && inside_coeff <= CLIP_EPSILON);
            let curr_inside = (coeff >= -CLIP_EPSILON && inside_coeff >= -CLIP_EPSILON)
                || (coeff <= CLIP_EPSILON && inside_coeff <= CLIP_EPSILON);

            prev_coeff = coeff;

            if (curr_inside ^ prev_inside) && j != 0 {
                let (inside_vertex, outside_vertex) = if curr_inside {
                    (clippee[idx], clippee[prev_idx])
                } else {
                    (clippee[prev_idx], clippee[idx])
                };
                let edge_dir = (inside_vertex - outside_vertex).normalize();
                let denom = plane_normal.dot(&edge_dir);
                if denom.abs() > f32::EPSILON {
                    let t = (plane_normal.dot(&clipper[i]) + plane_d
                        - plane_normal.dot(&outside_vertex))
                        / denom;
                    clipped.push(outside_vertex + edge_dir * t);
                }
            }

            if curr_inside && j < n {
                clipped.push(clippee[idx]);
            }
        }

        clippee = clipped;
    }

    clippee
}

/// Resolve the final `point` of a box-box contact given the separating
/// normal and depth: build both boxes' manifolds, clip B's manifold against
/// A's, and return the weighted centroid (or the trivial single-vertex
/// cases the source short-circuits on).
pub fn build_manifold_contact_point(
    model_a: &Matrix4<f32>,
    model_b: &Matrix4<f32>,
    normal: Vector3<f32>,
    depth: f32,
) -> Option<Vector3<f32>> {
    let manifold_a = build_contact_manifold(model_a, -normal);
    let manifold_b = build_contact_manifold(model_b, normal);

    if manifold_a.is_empty() || manifold_b.is_empty() {
        return None;
    }
    if manifold_b.len() == 1 {
        return Some(manifold_b[0]);
    }
    if manifold_a.len() == 1 {
        return Some(manifold_a[0] + normal * depth);
    }

    let clipped = pseudo_clip_polyhedra(&manifold_a, manifold_b, normal);
    if clipped.is_empty() {
        return None;
    }
    if clipped.len() == 1 {
        return Some(clipped[0]);
    }

    Some(weighted_centroid(&clipped, normal))
}

/// The manifold origin is the (averaged) deepest vertex along `normal`;
/// every remaining vertex contributes a weight linearly scaled between
/// [`MANIFOLD_MIN_WEIGHT`] at depth [`MANIFOLD_DEPTH`] and `1.0` at the
/// deepest point.
fn weighted_centroid(vertices: &[Vector3<f32>], normal: Vector3<f32>) -> Vector3<f32> {
    let mut max_coeff = f32::NEG_INFINITY;
    let mut origin = Vector3::zeros();
    let mut contributors = 0.0f32;

    for &v in vertices {
        let coeff = v.dot(&normal);
        if coeff > max_coeff {
            origin = v;
            contributors = 1.0;
            max_coeff = coeff;
        } else if coeff == max_coeff {
            origin += v;
            contributors += 1.0;
        }
    }
    origin /= contributors.max(1.0);

    let range = 1.0 - MANIFOLD_MIN_WEIGHT;
    let mut point = Vector3::zeros();
    for &v in vertices {
        let coeff = v.dot(&normal);
        let relative = v - origin;
        let weight = (coeff - max_coeff + MANIFOLD_DEPTH) / MANIFOLD_DEPTH;
        point += relative * (weight * range + MANIFOLD_MIN_WEIGHT);
    }
    point /= vertices.len() as f32;
    point + origin
}
