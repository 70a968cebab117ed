//! Entity registry and synchro (system) registry.
//!
//! Grounded on `original_source/source/ecs/entity_registry.h`: a cosmos owns
//! exactly one [`EntityRegistry`] tracking which entities are alive and their
//! [`Signature`]s, and one [`SynchroRegistry`] tracking which systems match
//! which entities. Both are plain data manipulated by free functions /
//! methods rather than the source's owner-pointer graph -- see the redesign
//! notes on replacing shared-pointer cosmos access with borrowed context
//! arguments.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::component::ComponentTypeId;
use crate::entity::{Entity, NULL_CAUSAL_CHAIN_LINK, NULL_ENTITY};
use crate::signature::Signature;

// ---------------------------------------------------------------------------
// EntityRegistry
// ---------------------------------------------------------------------------

/// Tracks live entities, their signatures, and genesis-index allocation for a
/// single cosmos.
///
/// Unlike [`crate::entity::EntityIdPool`] (which only answers "is this id
/// alive" for a standalone [`World`](crate::world::World)), `EntityRegistry`
/// understands the full entity lifecycle described in the data model:
/// timeslice-scoped genesis allocation, causal-chain-link derivation at
/// creation, and host-entity-count bookkeeping that returns a genesis index
/// to the pool only once every slice has released it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityRegistry {
    /// This registry's timeslice id, used as `timeslice_of_origin` for
    /// entities it creates and as the seed value for server-side
    /// causal-chain-link derivation.
    host_id: u8,
    /// Whether this cosmos is a timeslice host (server) or a client deferring
    /// id allocation elsewhere.
    is_server: bool,
    alive: HashSet<Entity>,
    signatures: HashMap<Entity, Signature>,
    free_genesis: Vec<u8>,
    next_genesis: u16,
    /// Per-origin-identity live count, keyed by the entity's canonical
    /// temporal identity (link stripped). Only meaningful when
    /// `origin.timeslice_of_origin() == host_id`: that's the one slice
    /// responsible for deciding when a genesis index can be reused.
    hosted_counts: HashMap<Entity, u32>,
}

impl EntityRegistry {
    /// Create a registry for the given timeslice host id.
    pub fn new(host_id: u8, is_server: bool) -> Self {
        Self {
            host_id,
            is_server,
            alive: HashSet::new(),
            signatures: HashMap::new(),
            free_genesis: Vec::new(),
            next_genesis: 0,
            hosted_counts: HashMap::new(),
        }
    }

    /// This registry's timeslice id.
    pub fn host_id(&self) -> u8 {
        self.host_id
    }

    /// Whether this registry is a timeslice host (server).
    pub fn is_server(&self) -> bool {
        self.is_server
    }

    fn allocate_genesis(&mut self) -> u8 {
        if let Some(g) = self.free_genesis.pop() {
            return g;
        }
        let g = self.next_genesis;
        assert!(g < 255, "genesis index pool exhausted for timeslice {}", self.host_id);
        self.next_genesis += 1;
        g as u8
    }

    /// Mint a brand-new entity on this registry's timeslice.
    ///
    /// `source` is `NULL_ENTITY` for an entirely new creation, or the
    /// entity whose lineage this creation is attributed to (e.g. a shooter
    /// spawning a projectile). `source_is_forked_or_forking` must be
    /// supplied by the caller (the [`crate::cosmos::Cosmos`], which owns
    /// [`crate::cosmos::TimestreamState`]): the registry itself has no
    /// notion of timestream state.
    ///
    /// Returns [`NULL_ENTITY`] if the creation request does not satisfy the
    /// dedup rule (duplicate create events from peers must collapse to a
    /// no-op): allowed only if `source == NULL_ENTITY`, or
    /// `source.causal_chain_link() == 0` and this registry is a server, or
    /// `source_is_forked_or_forking`.
    pub fn create(
        &mut self,
        atemporal: bool,
        source: Entity,
        source_is_forked_or_forking: bool,
    ) -> Entity {
        let allowed = source == NULL_ENTITY
            || (source.causal_chain_link() == 0 && self.is_server)
            || source_is_forked_or_forking;
        if !allowed {
            return NULL_ENTITY;
        }

        let link = if atemporal {
            NULL_CAUSAL_CHAIN_LINK
        } else if self.is_server {
            if source == NULL_ENTITY {
                self.host_id
            } else {
                source.causal_chain_link()
            }
        } else {
            0
        };

        let genesis = self.allocate_genesis();
        Entity::compose(self.host_id, genesis, link)
    }

    /// Register an entity as alive with an empty signature.
    ///
    /// Used both for entities freshly minted by [`create`](Self::create) and
    /// for entities propagating in from a future neighbor (already composed,
    /// e.g. via [`crate::entity::increment_causal_chain_link`]). Returns
    /// `false` (no-op) if the entity is already registered.
    pub fn register(&mut self, entity: Entity) -> bool {
        if entity == NULL_ENTITY {
            return false;
        }
        if !self.alive.insert(entity) {
            return false;
        }
        self.signatures.insert(entity, Signature::EMPTY);
        if entity.timeslice_of_origin() == self.host_id {
            *self
                .hosted_counts
                .entry(entity.strip_causal_chain_link())
                .or_insert(0) += 1;
        }
        true
    }

    /// `true` if `entity` is currently alive.
    pub fn is_alive(&self, entity: Entity) -> bool {
        self.alive.contains(&entity)
    }

    /// Current signature of `entity`, or `None` if not alive.
    pub fn signature(&self, entity: Entity) -> Option<Signature> {
        self.signatures.get(&entity).copied()
    }

    /// Set the bit for `component` on `entity`'s signature.
    ///
    /// Returns the new signature, or `None` if `entity` is not alive.
    pub fn set_component_bit(&mut self, entity: Entity, component: ComponentTypeId) -> Option<Signature> {
        let sig = self.signatures.get_mut(&entity)?;
        sig.set(component);
        Some(*sig)
    }

    /// Clear the bit for `component` on `entity`'s signature.
    pub fn clear_component_bit(&mut self, entity: Entity, component: ComponentTypeId) -> Option<Signature> {
        let sig = self.signatures.get_mut(&entity)?;
        sig.clear(component);
        Some(*sig)
    }

    /// Destroy `entity`: remove it from the alive set and drop its
    /// signature. If this registry is the origin timeslice for `entity` and
    /// the hosted count for its temporal identity reaches zero, the genesis
    /// index is returned to the free list for reuse.
    pub fn destroy(&mut self, entity: Entity) -> bool {
        if !self.alive.remove(&entity) {
            return false;
        }
        self.signatures.remove(&entity);

        if entity.timeslice_of_origin() == self.host_id {
            let key = entity.strip_causal_chain_link();
            let remaining = match self.hosted_counts.get_mut(&key) {
                Some(count) => {
                    if *count > 0 {
                        *count -= 1;
                    }
                    *count
                }
                None => 0,
            };
            if remaining == 0 {
                self.hosted_counts.remove(&key);
                self.free_genesis.push(entity.genesis_index());
            }
        }
        true
    }

    /// Number of currently alive entities.
    pub fn alive_count(&self) -> usize {
        self.alive.len()
    }

    /// Iterate all currently alive entities (unordered).
    pub fn iter_alive(&self) -> impl Iterator<Item = Entity> + '_ {
        self.alive.iter().copied()
    }
}

// ---------------------------------------------------------------------------
// SynchroRegistry
// ---------------------------------------------------------------------------

/// Opaque identifier for a registered synchro (system).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SynchroId(pub u32);

/// Tracks which entities match which synchro signatures.
///
/// Per the data model: "adding or removing a component on an entity
/// recomputes, for each synchro, whether the entity is a member
/// (`entity_sig ⊇ synchro_sig` and the synchro's signature is non-empty)."
#[derive(Debug, Clone, Default)]
pub struct SynchroRegistry {
    names: Vec<String>,
    signatures: Vec<Signature>,
    by_name: HashMap<String, SynchroId>,
    members: Vec<HashSet<Entity>>,
}

impl SynchroRegistry {
    /// Create an empty synchro registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a synchro under `name` with the given required signature.
    ///
    /// Returns the existing [`SynchroId`] if `name` is already registered
    /// (the signature is not updated in that case).
    pub fn register(&mut self, name: &str, signature: Signature) -> SynchroId {
        if let Some(&id) = self.by_name.get(name) {
            return id;
        }
        let id = SynchroId(self.names.len() as u32);
        self.names.push(name.to_owned());
        self.signatures.push(signature);
        self.members.push(HashSet::new());
        self.by_name.insert(name.to_owned(), id);
        id
    }

    /// Look up a synchro's id by name.
    pub fn lookup(&self, name: &str) -> Option<SynchroId> {
        self.by_name.get(name).copied()
    }

    /// Recompute every synchro's membership for `entity` given its current
    /// `signature`. Called after any component add/remove.
    pub fn update_membership(&mut self, entity: Entity, signature: Signature) {
        for (idx, synchro_sig) in self.signatures.iter().enumerate() {
            let is_member = !synchro_sig.is_empty() && signature.contains(*synchro_sig);
            if is_member {
                self.members[idx].insert(entity);
            } else {
                self.members[idx].remove(&entity);
            }
        }
    }

    /// Remove `entity` from every synchro's membership set (on destroy).
    pub fn remove_entity(&mut self, entity: Entity) {
        for set in &mut self.members {
            set.remove(&entity);
        }
    }

    /// Entities currently matching the given synchro.
    pub fn entities_for(&self, id: SynchroId) -> impl Iterator<Item = Entity> + '_ {
        self.members[id.0 as usize].iter().copied()
    }

    /// Number of registered synchros.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Whether any synchros have been registered.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
