//! Timeslice context: drives one cosmos's fixed-step cadence.
//!
//! Grounded on [`crate::tick::TickLoop`]'s system-registration pattern, but
//! operating over a [`Cosmos`] instead of a bare [`World`](paradox_ecs::world::World)
//! and driving named *dynamos* (the source's term for a synchro's runtime
//! callback) instead of a flat `SystemFn` list. Per tick:
//!
//! 1. Condemned entities from the previous tick are flushed.
//! 2. Entries queued on the downstream (future -> past) side of the link to
//!    our future neighbor, at or before our current coherency, are applied.
//! 3. Dynamos run in registration order against their synchro's membership.
//! 4. [`paradox_physics::relay::step`] runs over the cosmos's world.
//! 5. Local entity state is appended to the upstream (past -> future) side so
//!    a future neighbor with interest in it can pick it up.
//! 6. The coherency counter advances.

use paradox_ecs::cosmos::Cosmos;
use paradox_ecs::entity::Entity;
use paradox_ecs::registry::SynchroId;
use paradox_ecs::timestream::{self, TimestreamEntry, TimestreamLink};

/// A dynamo: the runtime body of a registered synchro. Receives the cosmos
/// and the set of entities currently matching its signature.
pub type DynamoFn = fn(&mut Cosmos, &[Entity]);

struct RegisteredDynamo {
    name: String,
    synchro: SynchroId,
    func: DynamoFn,
}

/// Drives a single cosmos through fixed-step ticks, wiring its timestream
/// link to a future neighbor (downstream consumed, upstream produced) and
/// running physics plus registered dynamos every tick.
pub struct TimesliceContext {
    pub cosmos: Cosmos,
    dynamos: Vec<RegisteredDynamo>,
    /// Link to the neighboring (future-ward) timeslice. `None` for the
    /// outermost (least-future) timeslice, which has no future to consume
    /// from.
    future_link: Option<TimestreamLink>,
    fixed_dt: f32,
}

impl TimesliceContext {
    pub fn new(cosmos: Cosmos, fixed_dt: f32) -> Self {
        Self {
            cosmos,
            dynamos: Vec::new(),
            future_link: None,
            fixed_dt,
        }
    }

    /// Attach the timestream link shared with the future-ward neighbor.
    pub fn link_future(&mut self, link: TimestreamLink) {
        self.future_link = Some(link);
    }

    /// Detach and return the future-ward link, e.g. so a parallel context
    /// can take ownership of it for a resolution pass.
    pub fn take_future_link(&mut self) -> Option<TimestreamLink> {
        self.future_link.take()
    }

    pub fn restore_future_link(&mut self, link: TimestreamLink) {
        self.future_link = Some(link);
    }

    /// Register a dynamo under `name`, to run against entities matching
    /// `synchro` every tick, in registration order.
    ///
    /// # Panics
    ///
    /// Panics if `name` is already registered.
    pub fn add_dynamo(&mut self, name: &str, synchro: SynchroId, func: DynamoFn) {
        assert!(
            !self.dynamos.iter().any(|d| d.name == name),
            "duplicate dynamo name: {name:?}"
        );
        self.dynamos.push(RegisteredDynamo {
            name: name.to_owned(),
            synchro,
            func,
        });
    }

    /// Apply every downstream entry from the future link at or before the
    /// cosmos's current coherency: entity creation/update/removal and
    /// timestream-wide control messages. Returns the applied entries for a
    /// caller that wants to inspect them (tests, diagnostics).
    fn apply_inbound(&mut self) -> Vec<TimestreamEntry> {
        let Some(link) = self.future_link.as_mut() else {
            return Vec::new();
        };
        let threshold = self.cosmos.coherency;
        let entries = link.downstream.drain_through(threshold);

        for entry in &entries {
            match entry.message.id {
                id if id == timestream::ENTITY_CREATED => {
                    self.cosmos.register_propagated(entry.entity);
                }
                id if id == timestream::ENTITY_REMOVED => {
                    self.cosmos.condemn(entry.entity, entry.entity);
                }
                id if id == timestream::ENTITY_UPDATE => {
                    // Component payloads are applied by the behavior host /
                    // component-specific deserializers, not here -- this
                    // layer only owns entity lifecycle and coherency.
                }
                _ => {
                    // Linkage-wide control messages (PARALLEL_INIT,
                    // PARALLEL_FINISHED, WORLDLINE_SHIFT, ...) are handled
                    // by the parallel context, not the per-tick cadence.
                }
            }
        }

        entries
    }

    /// Append a coherency-stamped entry to the upstream (past-ward) side of
    /// the future link, so our future neighbor can observe it.
    fn emit_upstream(&mut self, entity: Entity, entry: TimestreamEntry) {
        let _ = entity;
        if let Some(link) = self.future_link.as_mut() {
            link.upstream.push(entry);
        }
    }

    fn run_dynamos(&mut self) {
        for i in 0..self.dynamos.len() {
            let synchro = self.dynamos[i].synchro;
            let func = self.dynamos[i].func;
            let members: Vec<Entity> = self.cosmos.synchros.entities_for(synchro).collect();
            func(&mut self.cosmos, &members);
        }
    }

    /// Run one fixed-step tick: flush condemned entities, apply inbound
    /// future-ward state, run dynamos, run physics, publish local state
    /// upstream, advance coherency.
    pub fn tick(&mut self) {
        self.cosmos.flush_condemned();
        self.apply_inbound();
        self.run_dynamos();
        paradox_physics::relay::step(&mut self.cosmos.world, &mut self.cosmos.broker, self.fixed_dt);

        for entity in self.cosmos.entities.iter_alive().collect::<Vec<_>>() {
            let mut body = paradox_ecs::broker::MessageBuffer::new();
            body.push_u16(entity.to_wire());
            let entry = TimestreamEntry::new(
                self.cosmos.coherency,
                entity,
                paradox_ecs::broker::Message::new(timestream::ENTITY_UPDATE, body),
            );
            self.emit_upstream(entity, entry);
        }

        self.cosmos.advance_coherency();
    }

    /// Run `count` fixed-step ticks in sequence.
    pub fn run_ticks(&mut self, count: u32) {
        for _ in 0..count {
            self.tick();
        }
    }

    pub fn dynamo_names(&self) -> Vec<&str> {
        self.dynamos.iter().map(|d| d.name.as_str()).collect()
    }
}
