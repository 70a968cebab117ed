//! Entity identifiers.
//!
//! An [`Entity`] is a 16-bit handle packing three subfields: a *timeslice of
//! origin* (high 4 bits), a *genesis index* (middle 8 bits), and a *causal
//! chain link* (low 4 bits) -- the number of past-ward propagation hops this
//! copy of the entity has undergone. The wire layout is little-endian
//! `TTTTGGGG GGGGCCCC`.
//!
//! Unlike a generational allocator, liveness is not encoded in the id itself:
//! a cosmos's [`EntityRegistry`](crate::registry::EntityRegistry) is the
//! single source of truth for which entities are currently alive, so an
//! `Entity` value can be freely copied, hashed, and compared without a
//! generation counter.

use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Bit layout constants
// ---------------------------------------------------------------------------

const TIMESLICE_SHIFT: u32 = 12;
const GENESIS_SHIFT: u32 = 4;
const LINK_SHIFT: u32 = 0;

const TIMESLICE_MASK: u16 = 0xF000;
const GENESIS_MASK: u16 = 0x0FF0;
const LINK_MASK: u16 = 0x000F;

/// Sentinel `timeslice_of_origin` meaning "client-local, not temporally tracked".
pub const NULL_TIMESLICE: u8 = 14;
/// Sentinel `genesis_index` meaning "no genesis slot assigned".
pub const NULL_GENESIS: u8 = 255;
/// Sentinel `causal_chain_link` meaning "atemporal, never ages".
pub const NULL_CAUSAL_CHAIN_LINK: u8 = 15;
/// Highest causal chain link value an entity may age into before
/// [`increment_causal_chain_link`] becomes a contract violation.
pub const MAX_CAUSAL_CHAIN_LINK: u8 = 14;

/// Upper bound (exclusive) on timeslice ids; timeslices are fixed in number.
pub const MAX_TIMESLICES: u8 = 14;

// ---------------------------------------------------------------------------
// Entity
// ---------------------------------------------------------------------------

/// A packed 16-bit entity identifier.
///
/// See the module documentation for the bit layout. `Entity` is `Copy` and
/// has no notion of staleness on its own -- use
/// [`EntityRegistry::is_alive`](crate::registry::EntityRegistry::is_alive)
/// to check liveness.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Entity(u16);

/// `0xFFFF` -- the all-ones pattern, reserved so that no valid triple can
/// compose to it.
pub const NULL_ENTITY: Entity = Entity(0xFFFF);

impl Entity {
    /// Compose an `Entity` from its three subfields.
    ///
    /// # Panics
    ///
    /// Panics (contract violation) if `timeslice > 15`, `causal_chain_link > 15`,
    /// or the composed value equals [`NULL_ENTITY`] -- the latter cannot
    /// actually happen for any in-range triple other than the all-ones one,
    /// but the check documents the invariant from the data model.
    pub fn compose(timeslice: u8, genesis: u8, causal_chain_link: u8) -> Entity {
        assert!(timeslice <= 15, "timeslice_of_origin out of range: {timeslice}");
        assert!(
            causal_chain_link <= 15,
            "causal_chain_link out of range: {causal_chain_link}"
        );
        let raw = ((timeslice as u16) << TIMESLICE_SHIFT)
            | ((genesis as u16) << GENESIS_SHIFT)
            | ((causal_chain_link as u16) << LINK_SHIFT);
        let e = Entity(raw);
        assert!(e != NULL_ENTITY, "composed entity collided with NULL_ENTITY");
        e
    }

    /// Reconstruct an `Entity` from its little-endian wire representation.
    pub fn from_wire(raw: u16) -> Entity {
        Entity(raw)
    }

    /// The little-endian wire representation of this entity.
    pub fn to_wire(self) -> u16 {
        self.0
    }

    /// The timeslice of origin (0..=13 valid, 14 = null timeslice, 15 reserved).
    pub fn timeslice_of_origin(self) -> u8 {
        ((self.0 & TIMESLICE_MASK) >> TIMESLICE_SHIFT) as u8
    }

    /// The genesis index (0..=254 valid, 255 = null).
    pub fn genesis_index(self) -> u8 {
        ((self.0 & GENESIS_MASK) >> GENESIS_SHIFT) as u8
    }

    /// The causal chain link (0..=14 valid hop counts, 15 = atemporal).
    pub fn causal_chain_link(self) -> u8 {
        ((self.0 & LINK_MASK) >> LINK_SHIFT) as u8
    }

    /// `true` if this entity's causal chain link marks it atemporal (never ages).
    pub fn is_atemporal(self) -> bool {
        self.causal_chain_link() == NULL_CAUSAL_CHAIN_LINK
    }

    /// The canonical *temporal identity* shared by every copy of this entity
    /// across timeslices: the same triple with `causal_chain_link` zeroed.
    pub fn strip_causal_chain_link(self) -> Entity {
        Entity(self.0 & !LINK_MASK)
    }

    /// `true` if `self` and `other` share the same temporal identity.
    pub fn same_temporal_entity(self, other: Entity) -> bool {
        self.strip_causal_chain_link() == other.strip_causal_chain_link()
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == NULL_ENTITY {
            return write!(f, "Entity(NULL)");
        }
        write!(
            f,
            "Entity(t{}/g{}/c{})",
            self.timeslice_of_origin(),
            self.genesis_index(),
            self.causal_chain_link()
        )
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Error produced by [`increment_causal_chain_link`] / [`decrement_causal_chain_link`].
///
/// A contract violation per the error handling design: callers must not
/// attempt to age an entity past its maximum hop count, nor unwind one past
/// its origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ChainLinkError {
    /// `increment_causal_chain_link` was called on an entity already at
    /// [`MAX_CAUSAL_CHAIN_LINK`].
    #[error("causal chain link already at maximum ({MAX_CAUSAL_CHAIN_LINK}), cannot increment")]
    AtMaximum,
    /// `decrement_causal_chain_link` was called on an entity whose link is
    /// already 0 (the origin copy cannot un-propagate further).
    #[error("causal chain link already 0, cannot decrement")]
    AtOrigin,
}

/// Increment `entity`'s causal chain link by one past-ward hop.
///
/// Idempotent (a no-op returning the same entity) on atemporal entities.
/// Fails with [`ChainLinkError::AtMaximum`] if the link is already
/// [`MAX_CAUSAL_CHAIN_LINK`] (incrementing further would collide with the
/// atemporal sentinel).
pub fn increment_causal_chain_link(entity: Entity) -> Result<Entity, ChainLinkError> {
    let link = entity.causal_chain_link();
    if link == NULL_CAUSAL_CHAIN_LINK {
        return Ok(entity);
    }
    if link == MAX_CAUSAL_CHAIN_LINK {
        return Err(ChainLinkError::AtMaximum);
    }
    Ok(Entity::compose(
        entity.timeslice_of_origin(),
        entity.genesis_index(),
        link + 1,
    ))
}

/// Decrement `entity`'s causal chain link, undoing one past-ward hop.
///
/// Used by the parallel cosmos context's `extract` step to map a resolved
/// entity back onto its destination in the previous slice. This is a
/// contract violation (not a recoverable error) when the link is already 0.
pub fn decrement_causal_chain_link(entity: Entity) -> Result<Entity, ChainLinkError> {
    let link = entity.causal_chain_link();
    if link == NULL_CAUSAL_CHAIN_LINK {
        return Ok(entity);
    }
    if link == 0 {
        return Err(ChainLinkError::AtOrigin);
    }
    Ok(Entity::compose(
        entity.timeslice_of_origin(),
        entity.genesis_index(),
        link - 1,
    ))
}

// ---------------------------------------------------------------------------
// EntityIdPool
// ---------------------------------------------------------------------------

/// Tracks which [`Entity`] values are currently alive inside a single
/// [`World`](crate::world::World).
///
/// This is deliberately not a generational allocator: an `Entity`'s
/// uniqueness comes from its packed timeslice/genesis/link triple, assigned
/// by a cosmos's [`EntityRegistry`](crate::registry::EntityRegistry). The
/// pool only needs to answer "is this id currently in use" and hand out
/// throwaway ids for callers (tests, standalone `World` use) that don't go
/// through a registry at all.
#[derive(Debug, Default)]
pub struct EntityIdPool {
    alive: std::collections::HashSet<Entity>,
    next_local_genesis: u32,
}

impl EntityIdPool {
    /// Create an empty pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a throwaway entity id for standalone `World` use (no cosmos,
    /// no real timeslice semantics). Always client-local and atemporal.
    pub fn allocate(&mut self) -> Entity {
        loop {
            let genesis = (self.next_local_genesis % 256) as u8;
            let disambiguator = (self.next_local_genesis / 256) as u8 % 15;
            self.next_local_genesis += 1;
            let candidate = Entity::compose(NULL_TIMESLICE, genesis, disambiguator);
            if self.alive.insert(candidate) {
                return candidate;
            }
        }
    }

    /// Register an explicitly-assigned entity id (the path real cosmos
    /// lifecycle management uses). Returns `false` if already registered.
    pub fn register(&mut self, entity: Entity) -> bool {
        self.alive.insert(entity)
    }

    /// Remove `entity` from the alive set. Returns `true` if it was alive.
    pub fn deallocate(&mut self, entity: Entity) -> bool {
        self.alive.remove(&entity)
    }

    /// `true` if `entity` is currently tracked as alive.
    pub fn is_alive(&self, entity: Entity) -> bool {
        self.alive.contains(&entity)
    }

    /// Number of currently alive entities.
    pub fn alive_count(&self) -> usize {
        self.alive.len()
    }

    /// Snapshot the alive set as a sorted vector (deterministic order).
    pub fn snapshot_state(&self) -> Vec<Entity> {
        let mut v: Vec<Entity> = self.alive.iter().copied().collect();
        v.sort();
        v
    }

    /// Restore the pool from a previously captured snapshot.
    pub fn restore_from_snapshot(entities: Vec<Entity>) -> Self {
        Self {
            alive: entities.into_iter().collect(),
            next_local_genesis: 0,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compose_roundtrips_fields() {
        let e = Entity::compose(2, 7, 0);
        assert_eq!(e.timeslice_of_origin(), 2);
        assert_eq!(e.genesis_index(), 7);
        assert_eq!(e.causal_chain_link(), 0);
    }

    #[test]
    fn compose_never_collides_with_null() {
        for t in 0..=15u8 {
            for c in 0..=15u8 {
                if t == 15 && c == 15 {
                    continue;
                }
                let e = Entity::compose(t, 0, c);
                assert_ne!(e, NULL_ENTITY);
            }
        }
    }

    #[test]
    #[should_panic(expected = "collided with NULL_ENTITY")]
    fn compose_all_ones_panics() {
        Entity::compose(15, 255, 15);
    }

    #[test]
    fn strip_link_yields_canonical_identity() {
        let a = Entity::compose(3, 10, 0);
        let b = Entity::compose(3, 10, 5);
        assert!(a.same_temporal_entity(b));
        assert_eq!(a.strip_causal_chain_link(), b.strip_causal_chain_link());
    }

    #[test]
    fn increment_preserves_temporal_identity() {
        let e = Entity::compose(2, 1, 0);
        let incremented = increment_causal_chain_link(e).unwrap();
        assert_eq!(incremented.causal_chain_link(), 1);
        assert!(e.same_temporal_entity(incremented));
    }

    #[test]
    fn increment_is_idempotent_on_atemporal() {
        let e = Entity::compose(5, 1, NULL_CAUSAL_CHAIN_LINK);
        let incremented = increment_causal_chain_link(e).unwrap();
        assert_eq!(incremented, e);
    }

    #[test]
    fn increment_fails_at_max_link() {
        let e = Entity::compose(2, 1, MAX_CAUSAL_CHAIN_LINK);
        assert_eq!(
            increment_causal_chain_link(e).unwrap_err(),
            ChainLinkError::AtMaximum
        );
    }

    #[test]
    fn decrement_fails_at_zero() {
        let e = Entity::compose(2, 1, 0);
        assert_eq!(
            decrement_causal_chain_link(e).unwrap_err(),
            ChainLinkError::AtOrigin
        );
    }

    #[test]
    fn decrement_is_idempotent_on_atemporal() {
        let e = Entity::compose(5, 1, NULL_CAUSAL_CHAIN_LINK);
        assert_eq!(decrement_causal_chain_link(e).unwrap(), e);
    }

    #[test]
    fn wire_roundtrip() {
        let e = Entity::compose(9, 200, 3);
        assert_eq!(Entity::from_wire(e.to_wire()), e);
    }

    #[test]
    fn null_entity_is_all_ones() {
        assert_eq!(NULL_ENTITY.to_wire(), 0xFFFF);
        assert_eq!(NULL_ENTITY.timeslice_of_origin(), 15);
        assert_eq!(NULL_ENTITY.genesis_index(), 255);
        assert_eq!(NULL_ENTITY.causal_chain_link(), 15);
    }
}
