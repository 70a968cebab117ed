//! Parallel context: fork, replay, extract, and recycle a resolution cycle.
//!
//! Grounded on
//! `original_source/source/spacetime/parallel_cosmos_context.cpp`: when a
//! divergence is detected somewhere in a linkage, a throwaway cosmos is
//! forked from the nearest past-ward timeslice holding every temporal
//! entity that neighbor's future link still has interest in, replayed
//! forward against that link to a target coherency, then extracted back
//! onto the real timeslice one causal chain link closer to the present.
//! Two mutexes guard disjoint state, mirroring the source's
//! `m_runtimeMux`/`m_cosmosMux` split: [`RuntimeState`] covers
//! start/stop/target-coherency bookkeeping any thread may poll, `run` covers
//! the replay cosmos itself and is only held across `load`/`run`/`extract`.
//!
//! The source's own network-routed INIT/FINISHED event chaining across a
//! whole client/server topology is out of scope here (wire transport is
//! not implemented by this crate); [`ParallelCosmosContext::recycle`]
//! reports the orchestration-agnostic part of that decision -- whether
//! another resolution pass is owed -- and leaves routing it to the caller.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use rand::Rng;

use paradox_ecs::broker::{Message, MessageBuffer};
use paradox_ecs::cosmos::{Cosmos, TimestreamTrigger};
use paradox_ecs::entity::{decrement_causal_chain_link, Entity, NULL_TIMESLICE};
use paradox_ecs::registry::SynchroId;
use paradox_ecs::timestream::{self, coherency_at_or_before, Timestream, TimestreamEntry, TimestreamLink};
use paradox_ecs::world::World;
use paradox_physics::body::PhysicsBody;
use paradox_physics::transform::Transform;

use crate::timeslice::DynamoFn;

/// Minimum outgoing speed of a synthesized mandela artifact, per the
/// source's `newVel *= 10.0f`.
const MANDELA_MIN_SPEED: f32 = 10.0;

struct RuntimeState {
    current_timeslice: Option<u8>,
    coherency_target: u16,
    stop_requested: bool,
    recycle_needed: bool,
}

impl Default for RuntimeState {
    fn default() -> Self {
        Self {
            current_timeslice: None,
            coherency_target: 0,
            stop_requested: false,
            recycle_needed: false,
        }
    }
}

/// A single in-flight replay: the forked cosmos plus the bookkeeping
/// accumulated while it runs, needed by [`ParallelCosmosContext::extract`].
struct Run {
    cosmos: Cosmos,
    future_link: TimestreamLink,
    /// Depth-one interception history: `recipient -> agent` and the
    /// reverse, last write wins. The source keeps a full per-entity stack;
    /// only the most recent interception is needed to aim a mandela
    /// artifact, so the stack collapses to a map here.
    interception_history: HashMap<Entity, Entity>,
    /// Entities whose worldline discontinuity should be preserved as
    /// history rather than overwritten on extraction.
    reading_steiner: HashSet<Entity>,
    /// Entities condemned during the run, applied to the destination
    /// cosmos at extraction time rather than as they occur.
    condemned_during_run: HashSet<Entity>,
}

/// Outcome of a completed [`ParallelCosmosContext::run`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// The replay cosmos's coherency reached the configured target.
    ReachedTarget,
    /// `request_stop` was observed before the target was reached.
    StoppedEarly,
    /// Nothing was loaded.
    NotRunning,
}

/// Outcome of [`ParallelCosmosContext::extract`].
#[derive(Debug)]
pub struct ExtractOutcome {
    /// Local entities overwritten with the replay's resolved state.
    pub updated: Vec<Entity>,
    /// Worldline-shift entries to push onto the destination's past-ward
    /// timestream, one per entity whose divergent history was preserved
    /// instead of applied.
    pub worldline_shifts: Vec<TimestreamEntry>,
    /// Mandela artifacts synthesized in `dst` as a side effect of those
    /// shifts.
    pub mandela_entities: Vec<Entity>,
}

/// Whether another resolution cycle is owed once the current one completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecycleOutcome {
    /// A divergence newer than this run's start was observed; resolve again.
    ResolveAgain,
    /// No outstanding divergence; the linkage is settled.
    Finished,
}

pub struct ParallelCosmosContext {
    runtime: Mutex<RuntimeState>,
    run: Mutex<Option<Run>>,
}

impl Default for ParallelCosmosContext {
    fn default() -> Self {
        Self::new()
    }
}

impl ParallelCosmosContext {
    pub fn new() -> Self {
        Self {
            runtime: Mutex::new(RuntimeState::default()),
            run: Mutex::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.runtime.lock().unwrap().current_timeslice.is_some()
    }

    pub fn current_timeslice(&self) -> Option<u8> {
        self.runtime.lock().unwrap().current_timeslice
    }

    pub fn set_coherency_target(&self, target: u16) {
        self.runtime.lock().unwrap().coherency_target = target;
    }

    /// Cooperative stop: observed at the top of the next tick inside `run`.
    pub fn request_stop(&self) {
        self.runtime.lock().unwrap().stop_requested = true;
    }

    /// Record that `source_timeslice` reported a divergence. No lock is
    /// needed beyond the runtime mutex's own short critical section --
    /// this never touches the replay cosmos, matching the source's claim
    /// that requesting a resolution cycle is effectively free.
    ///
    /// Returns `true` if this divergence means the current run (if any) is
    /// now stale and should recycle once it finishes.
    pub fn request_resolution(&self, source_timeslice: u8) -> bool {
        let mut rt = self.runtime.lock().unwrap();
        match rt.current_timeslice {
            None => false,
            Some(current) if current <= source_timeslice => {
                rt.recycle_needed = true;
                true
            }
            Some(_) => false,
        }
    }

    /// Fork a replay cosmos from `source`. Builds a fresh [`Cosmos`] at
    /// `source.host_id`, registers the same component types via
    /// `register_components` (component registration isn't carried by
    /// [`paradox_ecs::cosmos::CosmosConfig`], only names), then restores a
    /// filtered snapshot: every entity `future_timestream` still has
    /// interest in, i.e. every *time traveller* -- entities with no
    /// remaining interest are left behind, matching the source's "we only
    /// need entities the future link cares about" filter.
    ///
    /// Entities forked in `source` are carried over into `replay` in
    /// `Forked` state, while `source`'s own copy is rewritten straight to
    /// `Merged` -- both via direct [`Cosmos::set_timestream_state`] writes,
    /// matching `parallel_cosmos_context.cpp`'s two `set_timestream_state`
    /// calls at the same point (parallel copy -> forked, source -> merged),
    /// not a transition-table hop on either side.
    ///
    /// Returns `false` (no-op) if a run is already in flight.
    pub fn load(
        &self,
        source: &mut Cosmos,
        register_components: impl FnOnce(&mut World),
        future_timestream: Timestream,
    ) -> bool {
        {
            let mut rt = self.runtime.lock().unwrap();
            if rt.current_timeslice.is_some() {
                return false;
            }
            rt.current_timeslice = Some(source.host_id);
            rt.stop_requested = false;
            rt.recycle_needed = false;
        }

        let mut run_guard = self.run.lock().unwrap();
        if run_guard.is_some() {
            self.runtime.lock().unwrap().current_timeslice = None;
            return false;
        }

        let mut replay = Cosmos::new(source.host_id, source.entities.is_server());
        register_components(&mut replay.world);
        replay.coherency = source.coherency;

        let full = source.world.capture_snapshot();
        let travellers: std::collections::HashSet<Entity> = full
            .entities
            .iter()
            .map(|e| e.entity_id)
            .filter(|&e| future_timestream.entries_for(e).next().is_some())
            .collect();

        let filtered = paradox_ecs::snapshot::WorldSnapshot {
            allocator: paradox_ecs::snapshot::AllocatorSnapshot {
                alive: full
                    .allocator
                    .alive
                    .iter()
                    .copied()
                    .filter(|e| travellers.contains(e))
                    .collect(),
            },
            component_names: full.component_names.clone(),
            entities: full
                .entities
                .into_iter()
                .filter(|e| travellers.contains(&e.entity_id))
                .collect(),
        };

        if replay.world.restore_from_snapshot(&filtered).is_err() {
            self.runtime.lock().unwrap().current_timeslice = None;
            return false;
        }

        for entity in filtered_alive(&filtered) {
            replay.entities.register(entity);
            if let Some((state, _)) = source.timestream_state(entity) {
                if state == paradox_ecs::cosmos::TimestreamState::Forked {
                    replay.set_timestream_state(entity, paradox_ecs::cosmos::TimestreamState::Forked);
                    source.set_timestream_state(entity, paradox_ecs::cosmos::TimestreamState::Merged);
                }
            }
        }

        *run_guard = Some(Run {
            cosmos: replay,
            future_link: TimestreamLink {
                downstream: future_timestream,
                upstream: Timestream::new(),
            },
            interception_history: HashMap::new(),
            reading_steiner: HashSet::new(),
            condemned_during_run: HashSet::new(),
        });

        true
    }

    fn apply_inbound(run: &mut Run) {
        let threshold = run.cosmos.coherency;
        let entries = run.future_link.downstream.drain_through(threshold);
        for entry in entries {
            match entry.message.id {
                id if id == timestream::ENTITY_CREATED => {
                    run.cosmos.register_propagated(entry.entity);
                }
                id if id == timestream::ENTITY_REMOVED => {
                    run.cosmos.condemn(entry.entity, entry.entity);
                    run.condemned_during_run.insert(entry.entity);
                }
                id if id == timestream::WORLDLINE_SHIFT => {
                    run.reading_steiner.insert(entry.entity);
                }
                id if id == timestream::TIMESTREAM_INTERCEPTION => {
                    let mut body = entry.message.body.clone();
                    if let Some(recipient_wire) = body.pop_u16() {
                        let recipient = Entity::from_wire(recipient_wire);
                        run.interception_history.insert(entry.entity, recipient);
                        run.interception_history.insert(recipient, entry.entity);
                    }
                }
                _ => {}
            }
        }
    }

    /// Run fixed-step ticks against the loaded replay cosmos until its
    /// coherency reaches the configured target or a stop is requested.
    /// `dynamos` mirrors [`crate::timeslice::TimesliceContext`]'s
    /// registration-order dispatch.
    pub fn run(&self, dynamos: &[(SynchroId, DynamoFn)], fixed_dt: f32) -> RunOutcome {
        loop {
            let target = self.runtime.lock().unwrap().coherency_target;

            let mut run_guard = self.run.lock().unwrap();
            let Some(run) = run_guard.as_mut() else {
                return RunOutcome::NotRunning;
            };

            if coherency_at_or_before(target, run.cosmos.coherency) {
                return RunOutcome::ReachedTarget;
            }
            drop(run_guard);

            if std::mem::take(&mut self.runtime.lock().unwrap().stop_requested) {
                return RunOutcome::StoppedEarly;
            }

            let mut run_guard = self.run.lock().unwrap();
            let run = run_guard.as_mut().expect("checked Some above");

            run.cosmos.flush_condemned();
            Self::apply_inbound(run);
            for (synchro, func) in dynamos {
                let members: Vec<Entity> = run.cosmos.synchros.entities_for(*synchro).collect();
                func(&mut run.cosmos, &members);
            }
            paradox_physics::relay::step(&mut run.cosmos.world, &mut run.cosmos.broker, fixed_dt);
            run.cosmos.advance_coherency();
        }
    }

    /// Write the replay's resolved state back onto `dst`, one causal chain
    /// link closer to the present than the replay's own entities.
    ///
    /// Per the already-resolved extraction question, every local (non-steiner,
    /// non-locally-created) entity is overwritten unconditionally -- "easier
    /// to extract ALL local entities than to compute non-divergences
    /// somehow", the source's own reasoning. Entities recorded by a
    /// `WORLDLINE_SHIFT` entry during the run keep `dst`'s existing state
    /// instead: their replay-side divergence is pushed onto
    /// `worldline_shifts` as history, and a mandela artifact is synthesized
    /// in `dst` with a randomized outgoing velocity biased away from
    /// whatever intercepted it.
    ///
    /// Returns `None` if nothing is loaded.
    pub fn extract(&self, dst: &mut Cosmos, rng: &mut impl Rng) -> Option<ExtractOutcome> {
        let mut run_guard = self.run.lock().unwrap();
        let run = run_guard.take()?;

        let snapshot = run.cosmos.world.capture_snapshot();
        let by_entity: HashMap<Entity, &paradox_ecs::snapshot::EntitySnapshot> =
            snapshot.entities.iter().map(|e| (e.entity_id, e)).collect();

        let mut updated = Vec::new();
        let mut worldline_shifts = Vec::new();
        let mut mandela_entities = Vec::new();
        let mut reading_steiner = run.reading_steiner;

        for parallel_entity in run.cosmos.entities.iter_alive().collect::<Vec<_>>() {
            let local_entity = match decrement_causal_chain_link(parallel_entity) {
                Ok(e) => e,
                Err(_) => {
                    tracing::warn!(?parallel_entity, "skipping extraction of atemporal-origin entity at chain link 0");
                    continue;
                }
            };

            if local_entity.timeslice_of_origin() == NULL_TIMESLICE {
                tracing::warn!(?local_entity, "ignoring entity created during parallel run; extracting new entities is unsupported");
                continue;
            }

            if reading_steiner.remove(&parallel_entity) {
                let Some(dst_snap) = dst.world.capture_snapshot().entities.into_iter().find(|e| e.entity_id == local_entity) else {
                    continue;
                };
                let Ok(body_json) = serde_json::to_string(&dst_snap.components) else {
                    continue;
                };
                let mut body = MessageBuffer::new();
                body.push_str(&body_json);
                let shift = TimestreamEntry::new(
                    dst.coherency,
                    local_entity,
                    Message::new(timestream::WORLDLINE_SHIFT, body),
                );
                worldline_shifts.push(shift);

                if let Some(mandela) = Self::synthesize_mandela(dst, &run.interception_history, parallel_entity, local_entity, rng) {
                    mandela_entities.push(mandela);
                }
                continue;
            }

            if let Some(snap) = by_entity.get(&parallel_entity) {
                for (name, value) in &snap.components {
                    if let Err(err) = dst.world.set_component_by_name(local_entity, name, value) {
                        tracing::warn!(?local_entity, component = %name, %err, "failed to apply extracted component");
                    }
                }
                // Merging -> Merged. Unconditionally attempted: entities
                // that were never forked simply have no matching transition
                // and the error is discarded. Timeslice 0 has no further
                // past-ward neighbor to defer the demotion to, so this is
                // also where its forked entities finally settle.
                let _ = dst.transition_timestream_state(local_entity, TimestreamTrigger::ParallelExtractionWritten);
                updated.push(local_entity);
            }
        }

        for dead in run.condemned_during_run {
            if let Ok(local_dead) = decrement_causal_chain_link(dead) {
                if local_dead.timeslice_of_origin() != NULL_TIMESLICE {
                    dst.condemn(local_dead, local_dead);
                }
            }
        }

        self.runtime.lock().unwrap().current_timeslice = None;

        Some(ExtractOutcome {
            updated,
            worldline_shifts,
            mandela_entities,
        })
    }

    /// Uniform random direction on the unit sphere, biased to point away
    /// from `source_origin`, scaled to at least [`MANDELA_MIN_SPEED`] and
    /// offset by the negated source velocity -- matches the source's
    /// `glm::sphericalRand` + dot-product flip + `*= 10.0f` + `-= source
    /// velocity` sequence.
    fn synthesize_mandela(
        dst: &mut Cosmos,
        interception_history: &HashMap<Entity, Entity>,
        parallel_entity: Entity,
        local_entity: Entity,
        rng: &mut impl Rng,
    ) -> Option<Entity> {
        let source_entity = interception_history
            .get(&parallel_entity)
            .copied()
            .unwrap_or(parallel_entity);

        let target_origin = dst
            .world
            .get_component::<Transform>(local_entity)
            .map(|t| t.origin)
            .unwrap_or_else(|| nalgebra::Vector3::zeros());
        let source_origin = dst
            .world
            .get_component::<Transform>(source_entity)
            .map(|t| t.origin)
            .unwrap_or(target_origin);
        let source_velocity = dst
            .world
            .get_component::<PhysicsBody>(source_entity)
            .map(|b| b.velocity)
            .unwrap_or_else(|| nalgebra::Vector3::zeros());

        let diff = target_origin - source_origin;
        let away = if diff.norm_squared() == 0.0 {
            random_unit_vector(rng)
        } else {
            diff.normalize()
        };

        let mut new_vel = random_unit_vector(rng);
        if away.dot(&new_vel) < 0.0 {
            new_vel += away;
        }
        new_vel *= MANDELA_MIN_SPEED;
        new_vel -= source_velocity;

        let mandela = dst.create_entity(true, paradox_ecs::entity::NULL_ENTITY);
        if mandela == paradox_ecs::entity::NULL_ENTITY {
            return None;
        }
        let _ = dst.insert_component(mandela, Transform::at(target_origin));
        let _ = dst.insert_component(
            mandela,
            PhysicsBody {
                velocity: new_vel,
                ..Default::default()
            },
        );
        Some(mandela)
    }

    /// Whether another resolution cycle is owed: a newer divergence arrived
    /// while this one was running. Clears the flag either way.
    pub fn recycle(&self) -> RecycleOutcome {
        let mut rt = self.runtime.lock().unwrap();
        if std::mem::take(&mut rt.recycle_needed) {
            RecycleOutcome::ResolveAgain
        } else {
            RecycleOutcome::Finished
        }
    }
}

fn filtered_alive(snapshot: &paradox_ecs::snapshot::WorldSnapshot) -> Vec<Entity> {
    snapshot.allocator.alive.clone()
}

/// Uniform-on-sphere direction, the `glm::sphericalRand(1.0f)` equivalent:
/// sample `z` uniformly in `[-1, 1]` and an azimuth uniformly in `[0, 2pi)`.
fn random_unit_vector(rng: &mut impl Rng) -> nalgebra::Vector3<f32> {
    let z: f32 = rng.gen_range(-1.0..1.0);
    let theta: f32 = rng.gen_range(0.0..std::f32::consts::TAU);
    let r = (1.0 - z * z).max(0.0).sqrt();
    nalgebra::Vector3::new(r * theta.cos(), r * theta.sin(), z)
}

#[cfg(test)]
mod tests {
    use super::*;
    use paradox_ecs::cosmos::Cosmos;
    use paradox_ecs::entity::NULL_ENTITY;
    use rand_pcg::Pcg32;

    fn register_physics_components(world: &mut World) {
        world.register_component::<Transform>("transform");
        world.register_component::<PhysicsBody>("physics_body");
    }

    #[test]
    fn load_filters_entities_with_no_future_interest() {
        let mut source = Cosmos::new(0, true);
        register_physics_components(&mut source.world);

        let traveller = source.create_entity(false, NULL_ENTITY);
        let _ = source.insert_component(traveller, Transform::default());
        let bystander = source.create_entity(false, NULL_ENTITY);
        let _ = source.insert_component(bystander, Transform::default());

        let mut future = Timestream::new();
        future.push(TimestreamEntry::new(
            0,
            traveller,
            Message::empty(timestream::ENTITY_UPDATE),
        ));

        let ctx = ParallelCosmosContext::new();
        assert!(ctx.load(&mut source, register_physics_components, future));
        assert!(ctx.is_running());

        let run_guard = ctx.run.lock().unwrap();
        let run = run_guard.as_ref().unwrap();
        assert!(run.cosmos.world.is_alive(traveller));
        assert!(!run.cosmos.world.is_alive(bystander));
    }

    #[test]
    fn load_refuses_when_already_running() {
        let mut source = Cosmos::new(0, true);
        register_physics_components(&mut source.world);
        let ctx = ParallelCosmosContext::new();

        assert!(ctx.load(&mut source, register_physics_components, Timestream::new()));
        assert!(!ctx.load(&mut source, register_physics_components, Timestream::new()));
    }

    #[test]
    fn run_reaches_target_coherency() {
        let mut source = Cosmos::new(1, true);
        register_physics_components(&mut source.world);
        let ctx = ParallelCosmosContext::new();
        ctx.load(&mut source, register_physics_components, Timestream::new());
        ctx.set_coherency_target(3);

        let outcome = ctx.run(&[], 1.0 / 60.0);
        assert_eq!(outcome, RunOutcome::ReachedTarget);
    }

    #[test]
    fn extract_overwrites_destination_unconditionally() {
        let mut source = Cosmos::new(1, true);
        register_physics_components(&mut source.world);
        let traveller = source.create_entity(false, NULL_ENTITY);
        let _ = source.insert_component(traveller, Transform::at(nalgebra::Vector3::new(1.0, 0.0, 0.0)));

        let mut future = Timestream::new();
        future.push(TimestreamEntry::new(0, traveller, Message::empty(timestream::ENTITY_UPDATE)));

        let ctx = ParallelCosmosContext::new();
        ctx.load(&mut source, register_physics_components, future);
        ctx.set_coherency_target(1);
        ctx.run(&[], 1.0 / 60.0);

        let mut dst = Cosmos::new(0, true);
        register_physics_components(&mut dst.world);
        let local = decrement_causal_chain_link(traveller).unwrap();
        dst.entities.register(local);
        dst.world.spawn_bundle_with_id(local, paradox_ecs::world::ComponentBundle::new());
        let _ = dst.insert_component(local, Transform::default());

        let mut rng = Pcg32::new(1, 1);
        let outcome = ctx.extract(&mut dst, &mut rng).unwrap();
        assert_eq!(outcome.updated, vec![local]);
        assert!(!ctx.is_running());
    }

    #[test]
    fn recycle_reports_finished_without_request() {
        let ctx = ParallelCosmosContext::new();
        assert_eq!(ctx.recycle(), RecycleOutcome::Finished);
    }

    #[test]
    fn request_resolution_flags_recycle_when_current_at_or_behind_source() {
        let mut source = Cosmos::new(2, true);
        register_physics_components(&mut source.world);
        let ctx = ParallelCosmosContext::new();
        ctx.load(&mut source, register_physics_components, Timestream::new());

        assert!(ctx.request_resolution(5));
        assert_eq!(ctx.recycle(), RecycleOutcome::ResolveAgain);
    }
}
