//! Per-entity timestream: the append-only event queue flowing between two
//! neighboring cosmoses.
//!
//! Grounded on [`crate::broker`]'s stack-ordered [`Message`] frame, with a
//! coherency timestamp and an (optional) entity id attached so a draining
//! cosmos can route entries without deserializing every body up front.

use std::collections::VecDeque;

use crate::broker::{Message, MessageBuffer, MessageId};
use crate::entity::{Entity, NULL_ENTITY};

// ---------------------------------------------------------------------------
// Entry kind constants
// ---------------------------------------------------------------------------

/// A brand-new entity was registered on the sender's side.
pub const ENTITY_CREATED: MessageId = MessageId(1);
/// Full or partial component state for an already-known entity.
pub const ENTITY_UPDATE: MessageId = MessageId(2);
/// An entity was destroyed on the sender's side.
pub const ENTITY_REMOVED: MessageId = MessageId(3);
/// A divergence was detected between recorded and actual state.
pub const TIMESTREAM_INTERCEPTION: MessageId = MessageId(4);
/// A worldline discontinuity is being preserved as history.
pub const WORLDLINE_SHIFT: MessageId = MessageId(5);
/// A parallel cosmos began resolving this linkage.
pub const PARALLEL_INIT: MessageId = MessageId(6);
/// A parallel cosmos finished resolving this linkage.
pub const PARALLEL_FINISHED: MessageId = MessageId(7);
/// A parallel cosmos observed a divergence newer than its start coherency.
pub const PARALLEL_DIVERGENCE: MessageId = MessageId(8);
/// Request to jump the focal entity / viewpoint to another timeslice.
pub const JUMP_REQUEST: MessageId = MessageId(9);

// ---------------------------------------------------------------------------
// Wrapping coherency order
// ---------------------------------------------------------------------------

/// `true` if `a` precedes `b` under 16-bit wrap-aware modular ordering.
///
/// Treats the gap as a signed 16-bit distance, so ordering remains correct
/// across a wraparound of the counter (the same trick as TCP sequence
/// number comparison).
pub fn coherency_precedes(a: u16, b: u16) -> bool {
    (b.wrapping_sub(a) as i16) > 0
}

/// `true` if `a` precedes or equals `b` under wrap-aware modular ordering.
pub fn coherency_at_or_before(a: u16, b: u16) -> bool {
    a == b || coherency_precedes(a, b)
}

// ---------------------------------------------------------------------------
// TimestreamEntry
// ---------------------------------------------------------------------------

/// One entry in a [`Timestream`]: a coherency-stamped, optionally
/// entity-scoped message.
#[derive(Debug, Clone)]
pub struct TimestreamEntry {
    pub coherency: u16,
    /// The entity this entry concerns, or [`NULL_ENTITY`] for linkage-wide
    /// entries (`PARALLEL_INIT`, `PARALLEL_FINISHED`, ...).
    pub entity: Entity,
    pub message: Message,
}

impl TimestreamEntry {
    pub fn new(coherency: u16, entity: Entity, message: Message) -> Self {
        Self {
            coherency,
            entity,
            message,
        }
    }

    /// Build an entry for a linkage-wide event with no associated entity.
    pub fn global(coherency: u16, id: MessageId, body: MessageBuffer) -> Self {
        Self {
            coherency,
            entity: NULL_ENTITY,
            message: Message::new(id, body),
        }
    }

    /// Attach an entity id, replacing [`NULL_ENTITY`].
    pub fn with_entity(mut self, entity: Entity) -> Self {
        self.entity = entity;
        self
    }
}

// ---------------------------------------------------------------------------
// Timestream
// ---------------------------------------------------------------------------

/// An append-only, ordered queue of [`TimestreamEntry`] values flowing in one
/// direction of a linkage between two cosmoses.
///
/// Entries are expected to be pushed in nondecreasing coherency order (the
/// producing cosmos's own tick advances monotonically, modulo wraparound);
/// [`drain_through`] consumes a coherency-ordered prefix.
#[derive(Debug, Clone, Default)]
pub struct Timestream {
    entries: VecDeque<TimestreamEntry>,
}

impl Timestream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry. Never reorders; callers are responsible for pushing
    /// in coherency order.
    pub fn push(&mut self, entry: TimestreamEntry) {
        self.entries.push_back(entry);
    }

    /// `true` if no entries are queued.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of queued entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Coherency of the oldest queued entry, if any.
    pub fn front_coherency(&self) -> Option<u16> {
        self.entries.front().map(|e| e.coherency)
    }

    /// Drain every entry whose coherency is at or before `threshold` (wrap
    /// aware), in queue (nondecreasing coherency) order.
    pub fn drain_through(&mut self, threshold: u16) -> Vec<TimestreamEntry> {
        let mut drained = Vec::new();
        while let Some(front) = self.entries.front() {
            if coherency_at_or_before(front.coherency, threshold) {
                drained.push(self.entries.pop_front().unwrap());
            } else {
                break;
            }
        }
        drained
    }

    /// Drain every queued entry regardless of coherency.
    pub fn drain_all(&mut self) -> Vec<TimestreamEntry> {
        self.entries.drain(..).collect()
    }

    /// Iterate queued entries without consuming them.
    pub fn iter(&self) -> impl Iterator<Item = &TimestreamEntry> {
        self.entries.iter()
    }

    /// Entries concerning a specific entity's temporal identity, oldest first.
    pub fn entries_for(&self, entity: Entity) -> impl Iterator<Item = &TimestreamEntry> {
        self.entries
            .iter()
            .filter(move |e| e.entity.same_temporal_entity(entity))
    }

    /// Replace this timestream's contents wholesale. Used by the parallel
    /// context to splice a replayed future side into a linkage.
    pub fn splice(&mut self, replacement: Timestream) {
        self.entries = replacement.entries;
    }
}

// ---------------------------------------------------------------------------
// TimestreamLink
// ---------------------------------------------------------------------------

/// The symmetric pair of queues connecting two neighboring cosmoses: one
/// flowing future -> past (`downstream`, the common case), one flowing
/// past -> future (`upstream`, for the rare `ComponentCategory::Upstream`
/// component types and jump requests).
#[derive(Debug, Clone, Default)]
pub struct TimestreamLink {
    pub downstream: Timestream,
    pub upstream: Timestream,
}

impl TimestreamLink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Splice a freshly replayed future side into this link, as performed by
    /// the parallel context when extracting a resolved run.
    pub fn splice_downstream(&mut self, replacement: Timestream) {
        self.downstream.splice(replacement);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::Entity;

    #[test]
    fn coherency_precedes_handles_wraparound() {
        assert!(coherency_precedes(5, 10));
        assert!(!coherency_precedes(10, 5));
        assert!(coherency_precedes(65530, 3)); // wraps past u16::MAX
        assert!(!coherency_precedes(3, 65530));
    }

    #[test]
    fn coherency_at_or_before_includes_equal() {
        assert!(coherency_at_or_before(10, 10));
        assert!(coherency_at_or_before(10, 11));
        assert!(!coherency_at_or_before(11, 10));
    }

    #[test]
    fn drain_through_respects_threshold() {
        let mut ts = Timestream::new();
        let e = Entity::compose(0, 0, 0);
        for c in [10u16, 20, 30, 40] {
            ts.push(TimestreamEntry::global(c, ENTITY_UPDATE, MessageBuffer::new()).with_entity(e));
        }
        let drained = ts.drain_through(25);
        assert_eq!(drained.len(), 2);
        assert_eq!(ts.len(), 2);
        assert_eq!(ts.front_coherency(), Some(30));
    }

    #[test]
    fn drain_through_empty_timestream_yields_nothing() {
        let mut ts = Timestream::new();
        assert!(ts.drain_through(100).is_empty());
    }

    #[test]
    fn entries_for_filters_by_temporal_identity() {
        let mut ts = Timestream::new();
        let a = Entity::compose(2, 3, 0);
        let a_propagated = Entity::compose(2, 3, 1);
        let b = Entity::compose(2, 4, 0);

        ts.push(TimestreamEntry::new(1, a, Message::empty(ENTITY_UPDATE)));
        ts.push(TimestreamEntry::new(2, b, Message::empty(ENTITY_UPDATE)));
        ts.push(TimestreamEntry::new(3, a_propagated, Message::empty(ENTITY_UPDATE)));

        let for_a: Vec<_> = ts.entries_for(a).collect();
        assert_eq!(for_a.len(), 2);
    }

    #[test]
    fn splice_replaces_contents() {
        let mut ts = Timestream::new();
        ts.push(TimestreamEntry::global(1, ENTITY_UPDATE, MessageBuffer::new()));

        let mut replacement = Timestream::new();
        replacement.push(TimestreamEntry::global(99, WORLDLINE_SHIFT, MessageBuffer::new()));
        ts.splice(replacement);

        assert_eq!(ts.len(), 1);
        assert_eq!(ts.front_coherency(), Some(99));
    }

    #[test]
    fn link_splice_downstream_only_touches_downstream() {
        let mut link = TimestreamLink::new();
        link.upstream.push(TimestreamEntry::global(1, JUMP_REQUEST, MessageBuffer::new()));

        let mut replacement = Timestream::new();
        replacement.push(TimestreamEntry::global(5, PARALLEL_FINISHED, MessageBuffer::new()));
        link.splice_downstream(replacement);

        assert_eq!(link.downstream.len(), 1);
        assert_eq!(link.upstream.len(), 1);
    }
}
