//! Entity component signatures.
//!
//! A [`Signature`] is a fixed-width bitset recording which component types an
//! entity currently carries. Synchro membership is decided purely by
//! signature containment (see [`Signature::contains`]), matching the
//! donor's archetype-key approach but exposed as its own comparable value so
//! the synchro registry can test membership without touching the archetype
//! table directly.

use serde::{Deserialize, Serialize};

use crate::component::ComponentTypeId;

/// Upper bound on distinct component types registerable in one cosmos.
pub const MAX_COMPONENT_TYPES: usize = 32;

/// A fixed-width bitset over up to [`MAX_COMPONENT_TYPES`] component types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Signature(u32);

impl Signature {
    /// The empty signature (no components set).
    pub const EMPTY: Signature = Signature(0);

    /// Set the bit for `id`.
    ///
    /// # Panics
    ///
    /// Panics if `id.0 >= MAX_COMPONENT_TYPES` -- exceeding the fixed
    /// component-type budget is a contract violation.
    pub fn set(&mut self, id: ComponentTypeId) {
        let idx = id.0 as usize;
        assert!(
            idx < MAX_COMPONENT_TYPES,
            "component type index {idx} exceeds MAX_COMPONENT_TYPES ({MAX_COMPONENT_TYPES})"
        );
        self.0 |= 1 << idx;
    }

    /// Clear the bit for `id`.
    pub fn clear(&mut self, id: ComponentTypeId) {
        let idx = id.0 as usize;
        if idx < MAX_COMPONENT_TYPES {
            self.0 &= !(1 << idx);
        }
    }

    /// `true` if the bit for `id` is set.
    pub fn has(&self, id: ComponentTypeId) -> bool {
        let idx = id.0 as usize;
        idx < MAX_COMPONENT_TYPES && (self.0 & (1 << idx)) != 0
    }

    /// `true` if no bits are set.
    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// `self ⊇ other`: every bit set in `other` is also set in `self`.
    pub fn contains(&self, other: Signature) -> bool {
        (self.0 & other.0) == other.0
    }

    /// Number of set bits.
    pub fn count(&self) -> u32 {
        self.0.count_ones()
    }

    /// Raw bitmask, for storage/debugging.
    pub fn bits(&self) -> u32 {
        self.0
    }

    /// Build a signature directly from a raw bitmask.
    pub fn from_bits(bits: u32) -> Signature {
        Signature(bits)
    }
}
