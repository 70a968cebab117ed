//! Spatial transform component: origin, orientation, scale.
//!
//! Grounded on `original_source/source/physics/transform_component.h`'s
//! `TransformComponent`, translated from a cached `glm::mat4` getter to a
//! `nalgebra` matrix recomputed on demand -- nothing here caches a world
//! matrix, matching the data model's stated requirement.

use nalgebra::{Matrix4, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    pub origin: Vector3<f32>,
    pub orientation: UnitQuaternion<f32>,
    pub scale: Vector3<f32>,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            origin: Vector3::zeros(),
            orientation: UnitQuaternion::identity(),
            scale: Vector3::new(1.0, 1.0, 1.0),
        }
    }
}

impl Transform {
    pub fn at(origin: Vector3<f32>) -> Self {
        Self {
            origin,
            ..Default::default()
        }
    }

    /// Model-to-world matrix: translate * rotate * scale, recomputed fresh
    /// every call.
    pub fn model_matrix(&self) -> Matrix4<f32> {
        let translation = Matrix4::new_translation(&self.origin);
        let rotation = self.orientation.to_homogeneous();
        let scale = Matrix4::new_nonuniform_scaling(&self.scale);
        translation * rotation * scale
    }

    /// Advance orientation by an angular velocity applied over `dt`, as
    /// `normalize(quat(omega * dt) * orientation)`.
    pub fn integrate_orientation(&mut self, angular_velocity: Vector3<f32>, dt: f32) {
        let delta = angular_velocity * dt;
        let angle = delta.norm();
        let step = if angle > 0.0 {
            UnitQuaternion::from_scaled_axis(delta)
        } else {
            UnitQuaternion::identity()
        };
        let product = step * self.orientation;
        self.orientation = UnitQuaternion::new_normalize(product.into_inner());
    }
}
