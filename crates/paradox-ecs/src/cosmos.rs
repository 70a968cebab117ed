//! Cosmos: a single timeslice's complete simulation state.
//!
//! A [`Cosmos`] wraps a [`World`] (the archetype-based component store,
//! unchanged in its storage role) with the timeslice-aware bookkeeping that
//! sits above it: entity lifecycle through an [`EntityRegistry`], named
//! system dispatch through a [`SynchroRegistry`], a local [`EventBroker`],
//! and the per-entity [`TimestreamState`] machine that governs propagation
//! to neighboring cosmoses.
//!
//! `World`'s own [`crate::entity::EntityIdPool`] remains the thing that
//! answers "is `entity` queryable right now" for archetype storage; the
//! `EntityRegistry` answers a different question -- "what id should a new
//! entity get, and when can its genesis index be reused" -- which depends on
//! `host_id`/server-ness information `World` has no notion of. The two are
//! kept in lockstep by [`Cosmos::create_entity`] and [`Cosmos::destroy`].

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::broker::{EventBroker, Message, MessageBuffer};
use crate::entity::{Entity, NULL_ENTITY};
use crate::registry::{EntityRegistry, SynchroRegistry};
use crate::snapshot::WorldSnapshot;
use crate::timestream;
use crate::world::{ComponentBundle, World};
use crate::EcsError;

// ---------------------------------------------------------------------------
// TimestreamState
// ---------------------------------------------------------------------------

/// Per-entity timestream state, local to a cosmos and never transmitted
/// past-ward on its own (it governs *how* an entity's state is transmitted,
/// not part of the transmitted state itself).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimestreamState {
    Merged,
    Forking,
    Forked,
    Merging,
    Superposition,
    Ghost,
}

/// The event that drives a [`TimestreamState`] transition. Named after the
/// trigger column of the transition table, not the state it produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimestreamTrigger {
    DivergenceDetected,
    ForkTimeoutElapsed,
    ParallelBeganResolving,
    ParallelExtractionWritten,
    InterceptedByFutureLink,
    ResolvedWithoutParadox,
    ResolvedWithParadox,
}

/// A transition was attempted that is not in the §4.4 table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("no transition from {from:?} on trigger {trigger:?}")]
pub struct InvalidTransition {
    pub from: TimestreamState,
    pub trigger: TimestreamTrigger,
}

impl TimestreamState {
    /// Apply `trigger`, returning the resulting state or an error if the
    /// pair isn't a listed transition. `Ghost` is terminal: every trigger
    /// from it is an error.
    pub fn apply(self, trigger: TimestreamTrigger) -> Result<TimestreamState, InvalidTransition> {
        use TimestreamState::*;
        use TimestreamTrigger::*;
        match (self, trigger) {
            (Merged, DivergenceDetected) => Ok(Forking),
            (Forking, ForkTimeoutElapsed) => Ok(Forked),
            (Forked, ParallelBeganResolving) => Ok(Merging),
            (Merging, ParallelExtractionWritten) => Ok(Merged),
            (Merged, InterceptedByFutureLink) => Ok(Superposition),
            (Superposition, ResolvedWithoutParadox) => Ok(Merged),
            (Superposition, ResolvedWithParadox) => Ok(Ghost),
            (from, trigger) => Err(InvalidTransition { from, trigger }),
        }
    }

    /// `true` for `Forking`/`Forked`: state still propagates past-ward but
    /// future-side updates are ignored.
    pub fn is_divergent(self) -> bool {
        matches!(self, TimestreamState::Forking | TimestreamState::Forked)
    }

    /// `true` for `Ghost`: terminal, replayed from timestream data only.
    pub fn is_ghost(self) -> bool {
        matches!(self, TimestreamState::Ghost)
    }
}

// ---------------------------------------------------------------------------
// CosmosConfig
// ---------------------------------------------------------------------------

/// The server/client handshake unit: an ordered list of component type names
/// and an ordered list of synchro type names.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CosmosConfig {
    pub components: Vec<String>,
    pub synchros: Vec<String>,
}

impl CosmosConfig {
    pub fn new(components: Vec<String>, synchros: Vec<String>) -> Self {
        Self {
            components,
            synchros,
        }
    }

    /// `true` if `self` and `other` describe compatible cosmoses: component
    /// lists match pairwise by index (order matters -- it's the dense
    /// registration order used by the component registry), synchro lists
    /// match as sets (order doesn't matter for system dispatch).
    pub fn matches(&self, other: &CosmosConfig) -> bool {
        if self.components.len() != other.components.len() {
            return false;
        }
        if self
            .components
            .iter()
            .zip(other.components.iter())
            .any(|(a, b)| a != b)
        {
            return false;
        }
        let ours: HashSet<&String> = self.synchros.iter().collect();
        let theirs: HashSet<&String> = other.synchros.iter().collect();
        ours == theirs
    }

    /// `|`-delimited wire encoding: `component,component,...;synchro,synchro,...`.
    pub fn encode(&self) -> String {
        format!("{};{}", self.components.join("|"), self.synchros.join("|"))
    }

    /// Parse the wire encoding produced by [`encode`](Self::encode).
    pub fn decode(wire: &str) -> Option<CosmosConfig> {
        let (components_part, synchros_part) = wire.split_once(';')?;
        let components = if components_part.is_empty() {
            Vec::new()
        } else {
            components_part.split('|').map(str::to_owned).collect()
        };
        let synchros = if synchros_part.is_empty() {
            Vec::new()
        } else {
            synchros_part.split('|').map(str::to_owned).collect()
        };
        Some(CosmosConfig {
            components,
            synchros,
        })
    }
}

// ---------------------------------------------------------------------------
// Cosmos
// ---------------------------------------------------------------------------

/// A single timeslice's complete simulation state.
pub struct Cosmos {
    pub world: World,
    pub entities: EntityRegistry,
    pub synchros: SynchroRegistry,
    pub broker: EventBroker,
    pub host_id: u8,
    pub coherency: u16,
    pub focal_entity: Entity,
    timestream_states: HashMap<Entity, (TimestreamState, u16)>,
    condemned: HashSet<(Entity, Entity)>,
    linked: Option<Box<Cosmos>>,
}

impl Cosmos {
    /// Create a new cosmos for timeslice `host_id`.
    pub fn new(host_id: u8, is_server: bool) -> Self {
        Self {
            world: World::new(),
            entities: EntityRegistry::new(host_id, is_server),
            synchros: SynchroRegistry::new(),
            broker: EventBroker::new(),
            host_id,
            coherency: 0,
            focal_entity: NULL_ENTITY,
            timestream_states: HashMap::new(),
            condemned: HashSet::new(),
            linked: None,
        }
    }

    /// Defer entity-id allocation to a linked (server) cosmos, as used by
    /// clients.
    pub fn link_to(&mut self, linked: Cosmos) {
        self.linked = Some(Box::new(linked));
    }

    /// Whether this cosmos defers allocation to a linked cosmos.
    pub fn is_linked(&self) -> bool {
        self.linked.is_some()
    }

    fn source_is_forked_or_forking(&self, source: Entity) -> bool {
        self.timestream_states
            .get(&source)
            .map(|(state, _)| state.is_divergent())
            .unwrap_or(false)
    }

    /// Create and register a new entity, publishing `ENTITY_CREATED`.
    ///
    /// Returns [`NULL_ENTITY`] if the dedup rule in [`EntityRegistry::create`]
    /// rejects the request (a no-op, not a failure).
    pub fn create_entity(&mut self, atemporal: bool, source: Entity) -> Entity {
        let forked = self.source_is_forked_or_forking(source);
        let entity = self.entities.create(atemporal, source, forked);
        if entity == NULL_ENTITY {
            return NULL_ENTITY;
        }
        self.entities.register(entity);
        self.world.spawn_bundle_with_id(entity, ComponentBundle::new());
        self.timestream_states
            .insert(entity, (TimestreamState::Merged, self.coherency));

        let mut body = MessageBuffer::new();
        body.push_u16(entity.to_wire());
        self.broker.publish(Message::new(timestream::ENTITY_CREATED, body));
        entity
    }

    /// Register an entity id that already exists (composed elsewhere, e.g.
    /// by incrementing a causal chain link on propagation from a future
    /// neighbor). No-op if already registered.
    pub fn register_propagated(&mut self, entity: Entity) -> bool {
        if !self.entities.register(entity) {
            return false;
        }
        self.world.spawn_bundle_with_id(entity, ComponentBundle::new());
        self.timestream_states
            .insert(entity, (TimestreamState::Merged, self.coherency));
        true
    }

    /// Insert a component and recompute the entity's synchro membership.
    pub fn insert_component<T>(&mut self, entity: Entity, component: T) -> Result<(), EcsError>
    where
        T: Clone + Send + Sync + 'static + serde::Serialize + for<'de> serde::Deserialize<'de>,
    {
        self.world.insert_component(entity, component)?;
        if let Some(id) = self.world.registry().lookup::<T>() {
            if let Some(sig) = self.entities.set_component_bit(entity, id) {
                self.synchros.update_membership(entity, sig);
            }
        }
        Ok(())
    }

    /// Remove a component and recompute the entity's synchro membership.
    pub fn remove_component<T>(&mut self, entity: Entity) -> Result<(), EcsError>
    where
        T: Clone + Send + Sync + 'static + serde::Serialize + for<'de> serde::Deserialize<'de>,
    {
        self.world.remove_component::<T>(entity)?;
        if let Some(id) = self.world.registry().lookup::<T>() {
            if let Some(sig) = self.entities.clear_component_bit(entity, id) {
                self.synchros.update_membership(entity, sig);
            }
        }
        Ok(())
    }

    /// Mark `entity` for deletion, attributed to `source`. Duplicate
    /// condemnations from different sources for the same entity still
    /// collapse to a single destroy and a single `ENTITY_REMOVED` event at
    /// [`flush_condemned`](Self::flush_condemned) time.
    pub fn condemn(&mut self, entity: Entity, source: Entity) -> bool {
        self.condemned.insert((entity, source))
    }

    /// Destroy every condemned entity (deduplicated), publish one
    /// `ENTITY_REMOVED` per unique entity, and clear the condemned set.
    /// Called once per tick, before the next tick's work begins.
    pub fn flush_condemned(&mut self) -> Vec<Entity> {
        let unique: HashSet<Entity> = self.condemned.iter().map(|(e, _)| *e).collect();
        for &entity in &unique {
            let _ = self.world.despawn(entity);
            self.entities.destroy(entity);
            self.synchros.remove_entity(entity);
            self.timestream_states.remove(&entity);

            let mut body = MessageBuffer::new();
            body.push_u16(entity.to_wire());
            self.broker
                .publish(Message::new(timestream::ENTITY_REMOVED, body));
        }
        self.condemned.clear();
        unique.into_iter().collect()
    }

    /// Current timestream state of `entity`, if tracked.
    pub fn timestream_state(&self, entity: Entity) -> Option<(TimestreamState, u16)> {
        self.timestream_states.get(&entity).copied()
    }

    /// Write `entity`'s timestream state directly, bypassing the §4.4
    /// transition table. Stamped with the current coherency, like
    /// [`transition_timestream_state`](Self::transition_timestream_state).
    ///
    /// Used by fork/extract, which set a parallel copy straight to `Forked`
    /// and the source straight to `Merged` -- neither edge is in the
    /// transition table, since the table describes single-cosmos state
    /// changes, not the fork/extract hop between two cosmoses.
    pub fn set_timestream_state(&mut self, entity: Entity, state: TimestreamState) {
        self.timestream_states.insert(entity, (state, self.coherency));
    }

    /// Apply a timestream state transition, stamping it with the current
    /// coherency. Returns the new state, or an error if `trigger` is not
    /// valid from the entity's current state.
    pub fn transition_timestream_state(
        &mut self,
        entity: Entity,
        trigger: TimestreamTrigger,
    ) -> Result<TimestreamState, InvalidTransition> {
        let current = self
            .timestream_states
            .get(&entity)
            .map(|(s, _)| *s)
            .unwrap_or(TimestreamState::Merged);
        let next = current.apply(trigger)?;
        self.timestream_states
            .insert(entity, (next, self.coherency));
        Ok(next)
    }

    /// Advance the coherency counter by one fixed-step tick.
    pub fn advance_coherency(&mut self) {
        self.coherency = self.coherency.wrapping_add(1);
    }
}

// ---------------------------------------------------------------------------
// CosmosSnapshot
// ---------------------------------------------------------------------------

/// A complete, serializable snapshot of a cosmos's state, with a BLAKE3
/// content hash for integrity verification -- mirrors
/// `paradox_runtime::snapshot::EngineSnapshot`'s hashing approach, extended
/// with the cosmos-specific fields a plain `WorldSnapshot` doesn't cover.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CosmosSnapshot {
    pub world: WorldSnapshot,
    pub host_id: u8,
    pub coherency: u16,
    pub focal_entity: Entity,
    /// Sorted by entity for deterministic hashing.
    pub timestream_states: Vec<(Entity, TimestreamState, u16)>,
    pub hash: String,
}

fn compute_cosmos_hash(
    world: &WorldSnapshot,
    host_id: u8,
    coherency: u16,
    focal_entity: Entity,
    timestream_states: &[(Entity, TimestreamState, u16)],
) -> String {
    #[derive(Serialize)]
    struct HashableState<'a> {
        world: &'a WorldSnapshot,
        host_id: u8,
        coherency: u16,
        focal_entity: Entity,
        timestream_states: &'a [(Entity, TimestreamState, u16)],
    }

    let hashable = HashableState {
        world,
        host_id,
        coherency,
        focal_entity,
        timestream_states,
    };
    let json_bytes = serde_json::to_vec(&hashable)
        .expect("CosmosSnapshot state should always be JSON-serializable");
    blake3::hash(&json_bytes).to_hex().to_string()
}

impl Cosmos {
    /// Capture a complete, hashed snapshot of this cosmos.
    pub fn capture_snapshot(&self) -> CosmosSnapshot {
        let world = self.world.capture_snapshot();
        let mut timestream_states: Vec<(Entity, TimestreamState, u16)> = self
            .timestream_states
            .iter()
            .map(|(&e, &(s, c))| (e, s, c))
            .collect();
        timestream_states.sort_by_key(|(e, _, _)| *e);

        let hash = compute_cosmos_hash(
            &world,
            self.host_id,
            self.coherency,
            self.focal_entity,
            &timestream_states,
        );

        CosmosSnapshot {
            world,
            host_id: self.host_id,
            coherency: self.coherency,
            focal_entity: self.focal_entity,
            timestream_states,
            hash,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
