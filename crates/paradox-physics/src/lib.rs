//! Fixed-step rigid body physics: transforms, colliders, narrow-phase
//! collision detection, and impulse/spring response.
//!
//! There is no broad-phase or spatial partitioning here -- [`relay::step`]
//! tests every active collider pair once per tick, mirroring the source
//! engine's scale (a handful of colliders per cosmos, not thousands).
//!
//! # Quick Start
//!
//! ```
//! use paradox_physics::prelude::*;
//!
//! let transform = Transform::at(nalgebra::Vector3::new(0.0, 1.0, 0.0));
//! let mut body = PhysicsBody::default();
//! body.acceleration = nalgebra::Vector3::new(0.0, -9.8, 0.0);
//!
//! let mut moved = transform;
//! body.integrate(&mut moved, 1.0 / 60.0);
//! assert!(moved.origin.y < transform.origin.y);
//! ```

pub mod body;
pub mod collider;
pub mod manifold;
pub mod narrowphase;
pub mod relay;
pub mod response;
pub mod transform;

pub mod prelude {
    pub use crate::body::{PhysicsBody, INFINITE_MASS};
    pub use crate::collider::{
        Collider, ColliderKind, ColliderSet, Material, ResponseKind, COLLIDERS_PER_ENTITY,
    };
    pub use crate::manifold::{MANIFOLD_DEPTH, MANIFOLD_MIN_WEIGHT};
    pub use crate::narrowphase::{ColliderInstance, Contact};
    pub use crate::relay::{step, COLLISION};
    pub use crate::response::{
        rigid_rigid_response, rigid_spring_response, spring_rigid_response, ResponseBody,
    };
    pub use crate::transform::Transform;
}
