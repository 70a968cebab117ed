//! Collider shapes, response kinds, and per-collider material properties.
//!
//! Grounded on `original_source/source/physics/collider.h`'s `Collider`
//! class: `ColliderType`/`CollisionType` become `ColliderKind`/`ResponseKind`
//! tagged enums (no virtual dispatch), and the unit-shape/inertia-tensor
//! getters are carried over as free functions taking the kind explicitly.

use nalgebra::{Matrix3, Matrix4, Vector3};
use serde::{Deserialize, Serialize};

use crate::transform::Transform;

/// Half the side length of the canonical unit cube / diameter of the unit
/// sphere. Every collider shape is defined at this unit scale and stretched
/// by its [`Collider::local_transform`]'s scale.
pub const UNIT_RADIUS: f32 = 0.5;

/// Maximum number of colliders carried per entity.
pub const COLLIDERS_PER_ENTITY: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColliderKind {
    None,
    Box,
    Sphere,
    Ray,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponseKind {
    Noop,
    Rigid,
    Spring,
    Force,
}

/// Collision material properties, carried per collider rather than per
/// entity since two colliders on one entity may need different surfaces.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Material {
    pub static_friction: f32,
    pub dynamic_friction: f32,
    pub restitution: f32,
    pub stiffness: f32,
    pub damping: f32,
    pub rest_length: f32,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            static_friction: 0.45,
            dynamic_friction: 0.45,
            restitution: 0.70,
            stiffness: 100.0,
            damping: 10.0,
            rest_length: 0.1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Collider {
    pub kind: ColliderKind,
    pub response: ResponseKind,
    pub active: bool,
    pub use_behavior_response: bool,
    pub local_transform: Transform,
    pub inherit_orientation: bool,
    pub influence_orientation: bool,
    pub material: Material,
    /// Closest ray parametric hit this frame; reset to 1.0 at submission.
    pub min_parametric: f32,
}

impl Default for Collider {
    fn default() -> Self {
        Self {
            kind: ColliderKind::Box,
            response: ResponseKind::Rigid,
            active: true,
            use_behavior_response: false,
            local_transform: Transform::default(),
            inherit_orientation: true,
            influence_orientation: true,
            material: Material::default(),
            min_parametric: 1.0,
        }
    }
}

impl Collider {
    pub fn new(kind: ColliderKind, response: ResponseKind) -> Self {
        Self {
            kind,
            response,
            ..Default::default()
        }
    }

    /// Reset the per-frame ray parametric clamp. Called once per entity
    /// collider at submission, before any narrow-phase test runs.
    pub fn reset_frame(&mut self) {
        self.min_parametric = 1.0;
    }

    /// Compose the owning entity's [`Transform`] with this collider's local
    /// offset, honoring `inherit_orientation`.
    pub fn compose_transform(&self, parent: &Transform) -> Matrix4<f32> {
        let mut parent = *parent;
        if !self.inherit_orientation {
            parent.orientation = nalgebra::UnitQuaternion::identity();
        }
        parent.model_matrix() * self.local_transform.model_matrix()
    }

    /// Unscaled (mass-less) inertia tensor for this collider's shape, scaled
    /// by the combined parent and local scale.
    pub fn inertia_tensor(&self, parent_scale: Vector3<f32>) -> Matrix3<f32> {
        let scale = parent_scale.component_mul(&self.local_transform.scale);
        inertia_tensor_for(self.kind, scale)
    }
}

/// The unscaled inertia tensor (no mass factor) for a unit shape of `kind`
/// stretched by `scale`. Mirrors `Collider::get_inertia_tensor`.
pub fn inertia_tensor_for(kind: ColliderKind, scale: Vector3<f32>) -> Matrix3<f32> {
    match kind {
        ColliderKind::Box => {
            let (w, h, d) = (scale.x, scale.y, scale.z);
            Matrix3::from_diagonal(&Vector3::new(
                (h * h + d * d) / 4.0,
                (w * w + d * d) / 4.0,
                (w * w + h * h) / 4.0,
            ))
        }
        ColliderKind::Ray => Matrix3::from_diagonal(&Vector3::new(
            (scale.z * scale.z) / 3.0,
            (scale.z * scale.z) / 3.0,
            0.0001,
        )),
        ColliderKind::Sphere | ColliderKind::None => {
            let radius = scale.x.min(scale.y).min(scale.z);
            Matrix3::from_diagonal_element(radius * radius * (2.0 / 5.0))
        }
    }
}

/// Fixed-capacity per-entity collider set. A thin wrapper over an array
/// rather than a `Vec` -- matches the data model's stated fixed capacity of
/// [`COLLIDERS_PER_ENTITY`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ColliderSet {
    colliders: Vec<Collider>,
}

impl ColliderSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a collider, silently dropping it if the set is already full --
    /// matches the source's fixed-size array semantics without adding a
    /// `Result` callers have no way to act on.
    pub fn push(&mut self, collider: Collider) -> bool {
        if self.colliders.len() >= COLLIDERS_PER_ENTITY {
            return false;
        }
        self.colliders.push(collider);
        true
    }

    pub fn iter(&self) -> impl Iterator<Item = &Collider> {
        self.colliders.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Collider> {
        self.colliders.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.colliders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.colliders.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collider_set_rejects_past_capacity() {
        let mut set = ColliderSet::new();
        assert!(set.push(Collider::default()));
        assert!(set.push(Collider::default()));
        assert!(!set.push(Collider::default()));
        assert_eq!(set.len(), COLLIDERS_PER_ENTITY);
    }

    #[test]
    fn box_inertia_tensor_is_diagonal() {
        let tensor = inertia_tensor_for(ColliderKind::Box, Vector3::new(2.0, 1.0, 1.0));
        assert!((tensor[(0, 1)]).abs() < 1e-6);
        assert!((tensor[(1, 0)]).abs() < 1e-6);
        assert!(tensor[(0, 0)] > 0.0);
    }

    #[test]
    fn sphere_inertia_uses_min_scale_component() {
        let tensor = inertia_tensor_for(ColliderKind::Sphere, Vector3::new(1.0, 2.0, 3.0));
        let expected = 2.0 / 5.0;
        assert!((tensor[(0, 0)] - expected).abs() < 1e-6);
    }
}
