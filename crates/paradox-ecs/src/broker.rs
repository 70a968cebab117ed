//! Typed, binary, stack-ordered message buffers and a publish/subscribe broker.
//!
//! Grounded on the deferred, FIFO-applied design of [`crate::command::CommandBuffer`]:
//! callers never mutate shared state directly, they push a record and a later
//! drain step consumes it in order. [`EventBroker`] generalizes that pattern
//! to typed messages keyed by [`MessageId`] instead of component mutations.
//!
//! [`MessageBuffer`] itself carries no `serde` impl -- it *is* the wire
//! format, not a value serialized through one. Writers push primitives onto
//! the end of the buffer; readers pop from the end. This means a reader sees
//! fields in the reverse of the order a writer pushed them, by design: the
//! buffer is a stack, not a queue. Variable-length data (byte blobs, strings)
//! is length-tagged by pushing the payload followed by a `u32` length word,
//! so a reader pops the length first and then that many bytes.

use std::collections::{HashMap, VecDeque};

/// Opaque identifier for a message's header `id` field.
///
/// Specific enumerations (e.g. the timestream entry kinds) are defined as
/// `MessageId` constants in the modules that own them -- see
/// [`crate::timestream`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId(pub u16);

/// A stack-ordered binary buffer: the wire format for message bodies.
///
/// Deliberately not `Serialize`/`Deserialize` -- constructing one already *is*
/// serialization.
#[derive(Debug, Clone, Default)]
pub struct MessageBuffer {
    bytes: Vec<u8>,
}

impl MessageBuffer {
    /// An empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap raw bytes already in stack order (e.g. a received wire frame body).
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    /// Consume the buffer, returning its raw bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// Number of bytes currently buffered.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// `true` if the buffer holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn push_u8(&mut self, v: u8) {
        self.bytes.push(v);
    }

    pub fn push_u16(&mut self, v: u16) {
        self.bytes.extend_from_slice(&v.to_le_bytes());
    }

    pub fn push_u32(&mut self, v: u32) {
        self.bytes.extend_from_slice(&v.to_le_bytes());
    }

    pub fn push_i32(&mut self, v: i32) {
        self.bytes.extend_from_slice(&v.to_le_bytes());
    }

    pub fn push_f32(&mut self, v: f32) {
        self.bytes.extend_from_slice(&v.to_le_bytes());
    }

    pub fn push_bool(&mut self, v: bool) {
        self.push_u8(if v { 1 } else { 0 });
    }

    /// Push a length-tagged byte blob: payload bytes, then a `u32` length word.
    pub fn push_bytes(&mut self, data: &[u8]) {
        self.bytes.extend_from_slice(data);
        self.push_u32(data.len() as u32);
    }

    /// Push a length-tagged UTF-8 string.
    pub fn push_str(&mut self, s: &str) {
        self.push_bytes(s.as_bytes());
    }

    pub fn pop_u8(&mut self) -> Option<u8> {
        self.bytes.pop()
    }

    pub fn pop_u16(&mut self) -> Option<u16> {
        if self.bytes.len() < 2 {
            return None;
        }
        let split_at = self.bytes.len() - 2;
        let tail: [u8; 2] = self.bytes.split_off(split_at).try_into().ok()?;
        Some(u16::from_le_bytes(tail))
    }

    pub fn pop_u32(&mut self) -> Option<u32> {
        if self.bytes.len() < 4 {
            return None;
        }
        let split_at = self.bytes.len() - 4;
        let tail: [u8; 4] = self.bytes.split_off(split_at).try_into().ok()?;
        Some(u32::from_le_bytes(tail))
    }

    pub fn pop_i32(&mut self) -> Option<i32> {
        self.pop_u32().map(|v| v as i32)
    }

    pub fn pop_f32(&mut self) -> Option<f32> {
        self.pop_u32().map(f32::from_bits)
    }

    pub fn pop_bool(&mut self) -> Option<bool> {
        self.pop_u8().map(|v| v != 0)
    }

    /// Pop a length-tagged byte blob: the length word first, then that many
    /// bytes.
    pub fn pop_bytes(&mut self) -> Option<Vec<u8>> {
        let len = self.pop_u32()? as usize;
        if self.bytes.len() < len {
            return None;
        }
        let split_at = self.bytes.len() - len;
        Some(self.bytes.split_off(split_at))
    }

    /// Pop a length-tagged UTF-8 string.
    pub fn pop_str(&mut self) -> Option<String> {
        let bytes = self.pop_bytes()?;
        String::from_utf8(bytes).ok()
    }
}

/// A single framed message: a header id plus body.
///
/// Corresponds to the wire frame `{id: T, size: u32}` followed by `size`
/// bytes of body -- `size` is implicit here as `body.len()`.
#[derive(Debug, Clone)]
pub struct Message {
    pub id: MessageId,
    pub body: MessageBuffer,
}

impl Message {
    pub fn new(id: MessageId, body: MessageBuffer) -> Self {
        Self { id, body }
    }

    /// Construct a message with an empty body.
    pub fn empty(id: MessageId) -> Self {
        Self {
            id,
            body: MessageBuffer::new(),
        }
    }
}

/// Publish/subscribe channel keyed by [`MessageId`].
///
/// Single-threaded in this crate (there is no real wire transport here), but
/// mirrors the source's multi-producer/single-consumer queue semantics: any
/// number of callers may [`publish`](Self::publish) in a tick, and the owner
/// drains each channel in FIFO order at a point of its choosing.
#[derive(Debug, Default)]
pub struct EventBroker {
    channels: HashMap<MessageId, VecDeque<Message>>,
}

impl EventBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue `message` on its own id's channel.
    pub fn publish(&mut self, message: Message) {
        self.channels
            .entry(message.id)
            .or_default()
            .push_back(message);
    }

    /// Drain every queued message for `id`, in publish order.
    pub fn drain(&mut self, id: MessageId) -> Vec<Message> {
        self.channels
            .get_mut(&id)
            .map(|q| q.drain(..).collect())
            .unwrap_or_default()
    }

    /// Drain every queued message across all channels, in no particular
    /// cross-channel order (used by subscribers that listen to everything,
    /// e.g. a logging sink).
    pub fn drain_all(&mut self) -> Vec<Message> {
        self.channels
            .values_mut()
            .flat_map(|q| q.drain(..))
            .collect()
    }

    /// `true` if any messages are queued for `id`.
    pub fn has_pending(&self, id: MessageId) -> bool {
        self.channels.get(&id).map_or(false, |q| !q.is_empty())
    }

    /// Number of messages currently queued for `id`.
    pub fn pending_count(&self, id: MessageId) -> usize {
        self.channels.get(&id).map_or(0, |q| q.len())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_pop_is_stack_ordered() {
        let mut buf = MessageBuffer::new();
        buf.push_u32(1);
        buf.push_u32(2);
        buf.push_u32(3);
        // Last pushed, first popped.
        assert_eq!(buf.pop_u32(), Some(3));
        assert_eq!(buf.pop_u32(), Some(2));
        assert_eq!(buf.pop_u32(), Some(1));
        assert_eq!(buf.pop_u32(), None);
    }

    #[test]
    fn string_length_tag_pops_length_first() {
        let mut buf = MessageBuffer::new();
        buf.push_str("hello");
        // Consumers that don't know it's a string still see the length word
        // on top.
        let len = buf.pop_u32().unwrap();
        assert_eq!(len, 5);
    }

    #[test]
    fn string_roundtrip() {
        let mut buf = MessageBuffer::new();
        buf.push_str("nomai");
        assert_eq!(buf.pop_str(), Some("nomai".to_owned()));
    }

    #[test]
    fn mixed_type_roundtrip_reverses_order() {
        let mut buf = MessageBuffer::new();
        buf.push_u16(7);
        buf.push_f32(1.5);
        buf.push_bool(true);

        assert_eq!(buf.pop_bool(), Some(true));
        assert_eq!(buf.pop_f32(), Some(1.5));
        assert_eq!(buf.pop_u16(), Some(7));
    }

    #[test]
    fn pop_on_empty_buffer_is_none() {
        let mut buf = MessageBuffer::new();
        assert_eq!(buf.pop_u8(), None);
        assert_eq!(buf.pop_bytes(), None);
    }

    #[test]
    fn broker_publish_and_drain_is_fifo() {
        let mut broker = EventBroker::new();
        let id = MessageId(42);
        broker.publish(Message::empty(id));
        broker.publish(Message::new(id, {
            let mut b = MessageBuffer::new();
            b.push_u8(1);
            b
        }));

        assert_eq!(broker.pending_count(id), 2);
        let drained = broker.drain(id);
        assert_eq!(drained.len(), 2);
        assert!(drained[0].body.is_empty());
        assert!(!drained[1].body.is_empty());
        assert!(!broker.has_pending(id));
    }

    #[test]
    fn broker_channels_are_independent() {
        let mut broker = EventBroker::new();
        let a = MessageId(1);
        let b = MessageId(2);
        broker.publish(Message::empty(a));
        assert!(broker.has_pending(a));
        assert!(!broker.has_pending(b));
        assert_eq!(broker.drain(b).len(), 0);
        assert_eq!(broker.drain(a).len(), 1);
    }
}
