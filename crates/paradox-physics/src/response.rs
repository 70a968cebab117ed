//! Collision response: impulse-based rigid-rigid resolution and one-sided
//! spring responses.
//!
//! Grounded on `original_source/source/physics/collision_procedures.cpp`'s
//! `rigid_rigid_response`/`spring_rigid_response`. Static penetration
//! resolution, the lever/relative-velocity setup, and the friction-cone
//! clamp are carried over formula-for-formula; only the per-body struct
//! shape changes ([`PhysicsBody`] + [`Transform`] passed by `&mut` instead
//! of a packet reference).

use nalgebra::{Matrix3, Vector3};

use crate::body::PhysicsBody;
use crate::collider::Collider;
use crate::narrowphase::Contact;
use crate::transform::Transform;

/// One side of a collision pair as response procedures see it.
pub struct ResponseBody<'a> {
    pub transform: &'a mut Transform,
    pub body: &'a mut PhysicsBody,
    pub collider: &'a Collider,
}

fn inverse_moment(model: &nalgebra::Matrix4<f32>, inertia_tensor: Matrix3<f32>, mass: f32, inv_mass: f32) -> Matrix3<f32> {
    if inv_mass == 0.0 {
        return Matrix3::zeros();
    }
    let linear = model.fixed_view::<3, 3>(0, 0).into_owned();
    let inv_model = match linear.try_inverse() {
        Some(m) => m,
        None => return Matrix3::zeros(),
    };
    let moment = inv_model.transpose() * (inertia_tensor * mass) * inv_model;
    moment.try_inverse().unwrap_or_else(Matrix3::zeros)
}

/// Relative velocity of A as observed from B at a shared contact point,
/// given each body's lever arm from its center of mass.
fn relative_velocity(a: &ResponseBody, b: &ResponseBody, lever_a: Vector3<f32>, lever_b: Vector3<f32>) -> Vector3<f32> {
    (a.body.velocity + a.body.angular_velocity.cross(&lever_a))
        - (b.body.velocity + b.body.angular_velocity.cross(&lever_b))
}

fn collision_tangent(relative_velocity: Vector3<f32>, normal: Vector3<f32>) -> Vector3<f32> {
    let tangent_cross = relative_velocity.cross(&normal);
    if tangent_cross.norm_squared() == 0.0 {
        return Vector3::zeros();
    }
    let tangent = normal.cross(&tangent_cross);
    if tangent.norm_squared() == 0.0 {
        Vector3::zeros()
    } else {
        tangent.normalize()
    }
}

/// Friction-cone clamp: use the raw tangent impulse if it's within the
/// static limit, otherwise scale by the dynamic/static friction ratio.
fn clamp_to_friction_cone(tangent_impulse: f32, normal_reference: f32, static_factor: f32, dynamic_factor: f32) -> f32 {
    let cone = static_factor * normal_reference;
    if tangent_impulse.abs() < cone.abs() {
        tangent_impulse
    } else {
        tangent_impulse * dynamic_factor
    }
}

/// Rigid-rigid impulse resolution: static penetration split by mass ratio,
/// then a single normal impulse and a friction-clamped tangent impulse
/// applied to both bodies' linear and (if `influence_orientation`) angular
/// velocities, finished with a `collision_angular_drag` stabilizer.
///
/// Early-exits (no resolution) when the bodies are already separating at
/// the contact point, or both have infinite mass.
pub fn rigid_rigid_response(a: &mut ResponseBody, b: &mut ResponseBody, contact: &Contact) {
    if a.body.mass == crate::body::INFINITE_MASS && b.body.mass == crate::body::INFINITE_MASS {
        return;
    }

    let inv_mass_a = a.body.inverse_mass();
    let inv_mass_b = b.body.inverse_mass();

    let restitution = a.collider.material.restitution * b.collider.material.restitution;
    let static_friction = a.collider.material.static_friction * b.collider.material.static_friction;
    let dynamic_friction = a.collider.material.dynamic_friction * b.collider.material.dynamic_friction;

    let mass_ratio = inv_mass_a / (inv_mass_a + inv_mass_b);
    let mut point = contact.point;
    a.transform.origin += contact.normal * contact.depth * mass_ratio;
    b.transform.origin -= contact.normal * contact.depth * (1.0 - mass_ratio);
    point -= contact.normal * contact.depth * (1.0 - mass_ratio);

    let model_a = a.collider.compose_transform(a.transform);
    let model_b = b.collider.compose_transform(b.transform);
    let center_a = (model_a * nalgebra::Vector4::new(0.0, 0.0, 0.0, 1.0)).xyz();
    let center_b = (model_b * nalgebra::Vector4::new(0.0, 0.0, 0.0, 1.0)).xyz();

    let lever_a = point - center_a;
    let lever_b = point - center_b;

    let rel_velocity = relative_velocity(a, b, lever_a, lever_b);
    if rel_velocity.dot(&contact.normal) > 0.0 {
        return;
    }

    let inertia_a = a.collider.inertia_tensor(a.transform.scale);
    let inertia_b = b.collider.inertia_tensor(b.transform.scale);
    let inv_moment_a = inverse_moment(&model_a, inertia_a, a.body.mass, inv_mass_a);
    let inv_moment_b = inverse_moment(&model_b, inertia_b, b.body.mass, inv_mass_b);

    let normal = contact.normal;
    let angular_term = |inv_moment: &Matrix3<f32>, lever: Vector3<f32>, axis: Vector3<f32>| {
        (inv_moment * lever.cross(&axis)).cross(&lever)
    };

    let normal_impulse = (-(1.0 + restitution) * rel_velocity.dot(&normal))
        / (inv_mass_a
            + inv_mass_b
            + (angular_term(&inv_moment_a, lever_a, normal) + angular_term(&inv_moment_b, lever_b, normal)).dot(&normal));

    let tangent = collision_tangent(rel_velocity, normal);
    let tangent_impulse_raw = if tangent == Vector3::zeros() {
        0.0
    } else {
        -rel_velocity.dot(&tangent)
            / (inv_mass_a
                + inv_mass_b
                + (angular_term(&inv_moment_a, lever_a, tangent) + angular_term(&inv_moment_b, lever_b, tangent)).dot(&tangent))
    };
    let tangent_impulse = clamp_to_friction_cone(tangent_impulse_raw, normal_impulse, static_friction, dynamic_friction);

    a.body.velocity += inv_mass_a * (normal_impulse * normal);
    b.body.velocity -= inv_mass_b * (normal_impulse * normal);
    a.body.velocity += inv_mass_a * (tangent_impulse * tangent);
    b.body.velocity -= inv_mass_b * (tangent_impulse * tangent);

    if a.collider.influence_orientation {
        a.body.angular_velocity += inv_moment_a * lever_a.cross(&(normal_impulse * normal));
        a.body.angular_velocity += inv_moment_a * lever_a.cross(&(tangent_impulse * tangent));
        a.body.angular_velocity *= 1.0 - a.body.collision_angular_drag;
    }
    if b.collider.influence_orientation {
        b.body.angular_velocity -= inv_moment_b * lever_b.cross(&(normal_impulse * normal));
        b.body.angular_velocity -= inv_moment_b * lever_b.cross(&(tangent_impulse * tangent));
        b.body.angular_velocity *= 1.0 - b.body.collision_angular_drag;
    }
}

/// One-sided spring response: applies a spring force (not an impulse) plus a
/// friction impulse, with the spring force magnitude standing in for the
/// normal impulse in the friction cone. `a` is the spring side; its
/// `material.rest_length`/`stiffness`/`damping` drive the force.
pub fn spring_rigid_response(a: &mut ResponseBody, b: &mut ResponseBody, contact: &Contact) {
    if a.body.mass == crate::body::INFINITE_MASS && b.body.mass == crate::body::INFINITE_MASS {
        return;
    }

    let inv_mass_a = a.body.inverse_mass();
    let inv_mass_b = b.body.inverse_mass();
    let static_friction = a.collider.material.static_friction * b.collider.material.static_friction;
    let dynamic_friction = a.collider.material.dynamic_friction * b.collider.material.dynamic_friction;

    let model_a = a.collider.compose_transform(a.transform);
    let model_b = b.collider.compose_transform(b.transform);
    let center_a = (model_a * nalgebra::Vector4::new(0.0, 0.0, 0.0, 1.0)).xyz();
    let center_b = (model_b * nalgebra::Vector4::new(0.0, 0.0, 0.0, 1.0)).xyz();

    // No static resolution: the contact point sits midway along the penetration.
    let point = contact.point - (contact.normal * contact.depth) / 2.0;
    let lever_a = point - center_a;
    let lever_b = point - center_b;

    let rel_velocity = relative_velocity(a, b, lever_a, lever_b);

    let inertia_a = a.collider.inertia_tensor(a.transform.scale);
    let inertia_b = b.collider.inertia_tensor(b.transform.scale);
    let inv_moment_a = inverse_moment(&model_a, inertia_a, a.body.mass, inv_mass_a);
    let inv_moment_b = inverse_moment(&model_b, inertia_b, b.body.mass, inv_mass_b);

    let normal = contact.normal;
    let delta_depth = rel_velocity.dot(&normal) * normal;

    let rest_vector = model_a.fixed_view::<3, 3>(0, 0).into_owned() * Vector3::new(0.0, 0.0, a.collider.material.rest_length);
    let scaled_rest_length = rest_vector.norm();
    let spring_magnitude = (contact.depth - scaled_rest_length) * a.collider.material.stiffness;
    let spring_force = spring_magnitude * normal;
    let damped_force = spring_force - a.collider.material.damping * delta_depth;

    let tangent = collision_tangent(rel_velocity, normal);
    let angular_term = |inv_moment: &Matrix3<f32>, lever: Vector3<f32>, axis: Vector3<f32>| {
        (inv_moment * lever.cross(&axis)).cross(&lever)
    };
    let tangent_impulse_raw = if tangent == Vector3::zeros() {
        0.0
    } else {
        -rel_velocity.dot(&tangent)
            / (inv_mass_a
                + inv_mass_b
                + (angular_term(&inv_moment_a, lever_a, tangent) + angular_term(&inv_moment_b, lever_b, tangent)).dot(&tangent))
    };
    let tangent_impulse = clamp_to_friction_cone(tangent_impulse_raw, spring_magnitude, static_friction, dynamic_friction);

    a.body.acceleration += inv_mass_a * damped_force;
    b.body.acceleration -= inv_mass_b * damped_force;
    a.body.velocity += inv_mass_a * (tangent_impulse * tangent);
    b.body.velocity -= inv_mass_b * (tangent_impulse * tangent);

    if a.collider.influence_orientation {
        a.body.angular_acceleration += inv_moment_a * lever_a.cross(&damped_force);
        a.body.angular_velocity += inv_moment_a * lever_a.cross(&(tangent_impulse * tangent));
        a.body.angular_velocity *= 1.0 - (a.body.collision_angular_drag * 2.0);
    }
    if b.collider.influence_orientation {
        b.body.angular_acceleration -= inv_moment_b * lever_b.cross(&damped_force);
        b.body.angular_velocity -= inv_moment_b * lever_b.cross(&(tangent_impulse * tangent));
        b.body.angular_velocity *= 1.0 - (b.body.collision_angular_drag * 2.0);
    }
}

/// `spring_rigid_response` with the operands and contact normal/point
/// swapped, since the response is inherently asymmetric (only one side
/// is the spring).
pub fn rigid_spring_response(a: &mut ResponseBody, b: &mut ResponseBody, contact: &Contact) {
    let inverted = Contact {
        point: contact.point,
        normal: -contact.normal,
        depth: contact.depth,
    };
    spring_rigid_response(b, a, &inverted);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collider::{ColliderKind, ResponseKind};

    fn rigid_pair() -> (Transform, PhysicsBody, Collider, Transform, PhysicsBody, Collider) {
        let ta = Transform::default();
        let mut ba = PhysicsBody::default();
        ba.velocity = Vector3::new(0.0, -1.0, 0.0);
        let ca = Collider::new(ColliderKind::Box, ResponseKind::Rigid);

        let tb = Transform::at(Vector3::new(0.0, -0.9, 0.0));
        let bb = PhysicsBody {
            mass: crate::body::INFINITE_MASS,
            ..Default::default()
        };
        let cb = Collider::new(ColliderKind::Box, ResponseKind::Rigid);

        (ta, ba, ca, tb, bb, cb)
    }

    #[test]
    fn falling_body_bounces_off_static_floor() {
        let (mut ta, mut ba, ca, mut tb, mut bb, cb) = rigid_pair();
        let contact = Contact {
            point: Vector3::new(0.0, -0.45, 0.0),
            normal: Vector3::new(0.0, 1.0, 0.0),
            depth: 0.1,
        };
        let mut a = ResponseBody {
            transform: &mut ta,
            body: &mut ba,
            collider: &ca,
        };
        let mut b = ResponseBody {
            transform: &mut tb,
            body: &mut bb,
            collider: &cb,
        };
        rigid_rigid_response(&mut a, &mut b, &contact);

        assert!(ba.velocity.y > 0.0, "falling body should rebound upward");
        assert_eq!(bb.velocity, Vector3::zeros(), "infinite mass floor stays put");
    }

    #[test]
    fn separating_bodies_are_left_untouched() {
        let (mut ta, mut ba, ca, mut tb, mut bb, cb) = rigid_pair();
        ba.velocity = Vector3::new(0.0, 1.0, 0.0); // already moving away
        let contact = Contact {
            point: Vector3::new(0.0, -0.45, 0.0),
            normal: Vector3::new(0.0, 1.0, 0.0),
            depth: 0.1,
        };
        let mut a = ResponseBody {
            transform: &mut ta,
            body: &mut ba,
            collider: &ca,
        };
        let mut b = ResponseBody {
            transform: &mut tb,
            body: &mut bb,
            collider: &cb,
        };
        let before = ba.velocity;
        rigid_rigid_response(&mut a, &mut b, &contact);
        assert_eq!(ba.velocity, before);
    }
}
