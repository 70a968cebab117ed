//! ECS wiring: drives colliders and bodies through one physics tick.
//!
//! Grounded on the per-frame loop implied by
//! `original_source/source/physics/physics_component.h` and
//! `collision_procedures.h` taken together -- reset, integrate, broad test
//! every active collider pair, dispatch narrow-phase by shape, dispatch
//! response by collision kind, write results back. There is no spatial
//! broad-phase here; the pairwise O(n^2) scan is what the source does too.

use paradox_ecs::prelude::*;

use crate::body::PhysicsBody;
use crate::collider::{Collider, ColliderKind, ColliderSet, ResponseKind};
use crate::narrowphase::{
    box_box_intersect, box_ray_intersect, box_sphere_intersect, ray_box_intersect,
    sphere_box_intersect, sphere_sphere_intersect, ColliderInstance, Contact,
};
use crate::response::{rigid_rigid_response, rigid_spring_response, spring_rigid_response, ResponseBody};
use crate::transform::Transform;

/// Published once per resolved contact whose collider has
/// `use_behavior_response` set, so a behavior host can react to it without
/// the built-in response (or in addition to it).
pub const COLLISION: MessageId = MessageId(0x2001);

struct ColliderRef {
    entity: Entity,
    collider: Collider,
    transform: Transform,
}

fn dispatch_narrowphase(a: &ColliderRef, b: &ColliderRef) -> Option<Contact> {
    let inst_a = ColliderInstance::new(&a.collider, &a.transform);
    let inst_b = ColliderInstance::new(&b.collider, &b.transform);
    match (a.collider.kind, b.collider.kind) {
        (ColliderKind::Box, ColliderKind::Box) => box_box_intersect(inst_a, inst_b),
        (ColliderKind::Box, ColliderKind::Sphere) => box_sphere_intersect(inst_a, inst_b),
        (ColliderKind::Sphere, ColliderKind::Box) => sphere_box_intersect(inst_a, inst_b),
        (ColliderKind::Sphere, ColliderKind::Sphere) => sphere_sphere_intersect(inst_a, inst_b),
        (ColliderKind::Ray, ColliderKind::Box) => box_ray_intersect(inst_a, inst_b),
        (ColliderKind::Box, ColliderKind::Ray) => ray_box_intersect(inst_a, inst_b),
        _ => None,
    }
}

/// Ray parametric position of `point` along the ray's world-space segment,
/// used to update the per-frame closest-hit clamp after the fact -- the
/// narrow-phase tests read `min_parametric` but never write it.
fn ray_parametric(ray: &ColliderRef, point: nalgebra::Vector3<f32>) -> f32 {
    let model = ray.collider.compose_transform(&ray.transform);
    let origin = (model * nalgebra::Vector4::new(0.0, 0.0, 0.0, 1.0)).xyz();
    let end = (model * nalgebra::Vector4::new(0.0, 0.0, 1.0, 1.0)).xyz();
    let segment = end - origin;
    let len_sq = segment.norm_squared();
    if len_sq == 0.0 {
        0.0
    } else {
        (point - origin).dot(&segment) / len_sq
    }
}

fn apply_response(a: &mut ResponseBody, b: &mut ResponseBody, contact: &Contact) {
    match (a.collider.response, b.collider.response) {
        (ResponseKind::Rigid, ResponseKind::Rigid) => rigid_rigid_response(a, b, contact),
        (ResponseKind::Spring, ResponseKind::Rigid) => spring_rigid_response(a, b, contact),
        (ResponseKind::Rigid, ResponseKind::Spring) => rigid_spring_response(a, b, contact),
        // Two springs, or anything touching Noop/Force, has no built-in
        // resolution -- Force is left entirely to a behavior host, and a
        // spring-spring pair isn't a case the source resolves either.
        _ => {}
    }
}

fn publish_collision(broker: &mut EventBroker, a: Entity, b: Entity, contact: &Contact) {
    let mut body = MessageBuffer::new();
    body.push_f32(contact.depth);
    body.push_f32(contact.normal.z);
    body.push_f32(contact.normal.y);
    body.push_f32(contact.normal.x);
    body.push_f32(contact.point.z);
    body.push_f32(contact.point.y);
    body.push_f32(contact.point.x);
    body.push_u16(b.to_wire());
    body.push_u16(a.to_wire());
    broker.publish(Message { id: COLLISION, body });
}

/// Run one fixed-timestep physics tick over every entity carrying a
/// [`Transform`] + [`PhysicsBody`] (integrated) and [`Transform`] +
/// [`ColliderSet`] (tested for collisions).
///
/// 1. Reset each collider's per-frame ray clamp.
/// 2. Integrate every body's motion.
/// 3. Snapshot every active collider with its composed transform.
/// 4. Pairwise narrow-phase test across the snapshot (entities never test
///    their own colliders against each other).
/// 5. Dispatch a response per contact and write the resolved transform /
///    body back to the world.
/// 6. Publish a [`COLLISION`] event for any contact touching a
///    `use_behavior_response` collider.
pub fn step(world: &mut World, broker: &mut EventBroker, dt: f32) {
    for (_entity, (colliders,)) in world.query_mut::<(&mut ColliderSet,)>() {
        for collider in colliders.iter_mut() {
            collider.reset_frame();
        }
    }

    for (_entity, (transform, body)) in world.query_mut::<(&mut Transform, &mut PhysicsBody)>() {
        body.integrate(transform, dt);
    }

    let mut colliders: Vec<ColliderRef> = Vec::new();
    for (entity, (transform, set)) in world.query::<(&Transform, &ColliderSet)>() {
        for collider in set.iter() {
            if !collider.active || collider.kind == ColliderKind::None {
                continue;
            }
            colliders.push(ColliderRef {
                entity,
                collider: *collider,
                transform: *transform,
            });
        }
    }

    let mut contacts: Vec<(usize, usize, Contact)> = Vec::new();
    for i in 0..colliders.len() {
        for j in (i + 1)..colliders.len() {
            if colliders[i].entity == colliders[j].entity {
                continue;
            }
            let Some(contact) = dispatch_narrowphase(&colliders[i], &colliders[j]) else {
                continue;
            };

            if colliders[i].collider.kind == ColliderKind::Ray {
                let t = ray_parametric(&colliders[i], contact.point);
                if t < colliders[i].collider.min_parametric {
                    colliders[i].collider.min_parametric = t;
                }
            }
            if colliders[j].collider.kind == ColliderKind::Ray {
                let t = ray_parametric(&colliders[j], contact.point);
                if t < colliders[j].collider.min_parametric {
                    colliders[j].collider.min_parametric = t;
                }
            }

            contacts.push((i, j, contact));
        }
    }

    for (i, j, contact) in contacts {
        let entity_a = colliders[i].entity;
        let entity_b = colliders[j].entity;
        let collider_a = colliders[i].collider;
        let collider_b = colliders[j].collider;

        if collider_a.use_behavior_response || collider_b.use_behavior_response {
            publish_collision(broker, entity_a, entity_b, &contact);
        }

        let (Some(mut transform_a), Some(mut body_a)) = (
            world.get_component::<Transform>(entity_a).copied(),
            world.get_component::<PhysicsBody>(entity_a).copied(),
        ) else {
            continue;
        };
        let (Some(mut transform_b), Some(mut body_b)) = (
            world.get_component::<Transform>(entity_b).copied(),
            world.get_component::<PhysicsBody>(entity_b).copied(),
        ) else {
            continue;
        };

        {
            let mut a = ResponseBody {
                transform: &mut transform_a,
                body: &mut body_a,
                collider: &collider_a,
            };
            let mut b = ResponseBody {
                transform: &mut transform_b,
                body: &mut body_b,
                collider: &collider_b,
            };
            apply_response(&mut a, &mut b, &contact);
        }

        if let Some(slot) = world.get_component_mut::<Transform>(entity_a) {
            *slot = transform_a;
        }
        if let Some(slot) = world.get_component_mut::<PhysicsBody>(entity_a) {
            *slot = body_a;
        }
        if let Some(slot) = world.get_component_mut::<Transform>(entity_b) {
            *slot = transform_b;
        }
        if let Some(slot) = world.get_component_mut::<PhysicsBody>(entity_b) {
            *slot = body_b;
        }
    }
}
