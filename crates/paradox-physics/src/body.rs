//! Rigid body motion state and semi-implicit integration.
//!
//! Grounded on `original_source/source/physics/physics_component.h`'s
//! `PhysicsComponent`. `INFINITE_MASS` stays `0.0`; `inverse_mass` folds the
//! zero-is-infinite check into one accessor instead of repeating the branch
//! at every call site, which the source does inline six times.

use nalgebra::{UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

use crate::transform::Transform;

pub const INFINITE_MASS: f32 = 0.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PhysicsBody {
    pub velocity: Vector3<f32>,
    pub acceleration: Vector3<f32>,
    pub angular_velocity: Vector3<f32>,
    pub angular_acceleration: Vector3<f32>,

    pub linear_drag: f32,
    pub angular_drag: f32,
    pub collision_linear_drag: f32,
    pub collision_angular_drag: f32,

    pub mass: f32,

    pub lock_origin: bool,
    pub locked_origin: Vector3<f32>,
    pub lock_orientation: bool,
    pub locked_orientation: UnitQuaternion<f32>,

    pub asleep: bool,
}

impl Default for PhysicsBody {
    fn default() -> Self {
        Self {
            velocity: Vector3::zeros(),
            acceleration: Vector3::zeros(),
            angular_velocity: Vector3::zeros(),
            angular_acceleration: Vector3::zeros(),
            linear_drag: 0.0,
            angular_drag: 0.0,
            collision_linear_drag: 0.0,
            collision_angular_drag: 0.03,
            mass: 1.0,
            lock_origin: false,
            locked_origin: Vector3::zeros(),
            lock_orientation: false,
            locked_orientation: UnitQuaternion::identity(),
            asleep: false,
        }
    }
}

impl PhysicsBody {
    /// `0` for infinite mass, `1/mass` otherwise.
    pub fn inverse_mass(&self) -> f32 {
        if self.mass == INFINITE_MASS {
            0.0
        } else {
            1.0 / self.mass
        }
    }

    /// Semi-implicit Euler step: integrate velocities from accumulated
    /// accelerations, apply drag, apply locks, integrate the transform, then
    /// clear accelerations for the next frame.
    pub fn integrate(&mut self, transform: &mut Transform, dt: f32) {
        if self.asleep {
            self.acceleration = Vector3::zeros();
            self.angular_acceleration = Vector3::zeros();
            return;
        }

        self.velocity += self.acceleration * dt;
        self.velocity *= 1.0 - self.linear_drag;
        self.angular_velocity += self.angular_acceleration * dt;
        self.angular_velocity *= 1.0 - self.angular_drag;

        if self.lock_origin {
            transform.origin = self.locked_origin;
        } else {
            transform.origin += self.velocity * dt;
        }

        if self.lock_orientation {
            transform.orientation = self.locked_orientation;
        } else {
            transform.integrate_orientation(self.angular_velocity, dt);
        }

        self.acceleration = Vector3::zeros();
        self.angular_acceleration = Vector3::zeros();
    }
}
