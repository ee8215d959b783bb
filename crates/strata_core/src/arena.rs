//! Caller-owned request arena and the growing tape.
//!
//! Every batched call writes its outputs into an [`Arena`] the caller
//! holds, and returns views into it. Nothing in the engine allocates
//! per-value result objects. The arena survives across calls - by default
//! each call resets it (keeping capacity), and the `dont_discard_memory`
//! option accumulates instead.

use crate::types::LEN_MISSING;

/// An append structure for lists of variable-length blobs: one joined byte
/// buffer plus parallel offset/length arrays.
///
/// This is the canonical output shape of the engine - batched reads,
/// document reads, and gists all produce one.
#[derive(Debug, Default)]
pub struct GrowingTape {
    bytes: Vec<u8>,
    offsets: Vec<u64>,
    lengths: Vec<u64>,
}

impl GrowingTape {
    /// Appends one blob; `None` records a missing entry (`LEN_MISSING`).
    pub fn push(&mut self, blob: Option<&[u8]>) {
        match blob {
            Some(bytes) => {
                self.offsets.push(self.bytes.len() as u64);
                self.lengths.push(bytes.len() as u64);
                self.bytes.extend_from_slice(bytes);
            }
            None => {
                self.offsets.push(self.bytes.len() as u64);
                self.lengths.push(LEN_MISSING);
            }
        }
    }

    /// Starts an in-place blob: returns the byte buffer to serialize into
    /// and the offset to pass to [`GrowingTape::seal`].
    pub fn begin(&mut self) -> (usize, &mut Vec<u8>) {
        (self.bytes.len(), &mut self.bytes)
    }

    /// Seals an in-place blob started at `start` as one tape entry.
    pub fn seal(&mut self, start: usize) {
        self.offsets.push(start as u64);
        self.lengths.push((self.bytes.len() - start) as u64);
    }

    /// Records a missing entry without touching the byte buffer.
    pub fn seal_missing(&mut self) {
        self.offsets.push(self.bytes.len() as u64);
        self.lengths.push(LEN_MISSING);
    }

    /// Number of entries on the tape.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lengths.len()
    }

    /// Whether the tape has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lengths.is_empty()
    }

    /// The joined byte buffer.
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Entry offsets into the joined buffer.
    #[must_use]
    pub fn offsets(&self) -> &[u64] {
        &self.offsets
    }

    /// Entry lengths; `LEN_MISSING` marks absent entries.
    #[must_use]
    pub fn lengths(&self) -> &[u64] {
        &self.lengths
    }

    /// The blob at `index`, or `None` when it is a missing entry.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&[u8]> {
        let length = *self.lengths.get(index)?;
        if length == LEN_MISSING {
            return None;
        }
        let offset = self.offsets[index] as usize;
        Some(&self.bytes[offset..offset + length as usize])
    }

    /// Clears entries, keeping capacity.
    pub fn clear(&mut self) {
        self.bytes.clear();
        self.offsets.clear();
        self.lengths.clear();
    }
}

/// A caller-owned per-request scratch region.
///
/// Holds every output pool the batched calls write into. The arena is not
/// shared: each concurrent request owns its own, and views returned by a
/// call stay valid until the arena is discarded or dropped.
#[derive(Debug, Default)]
pub struct Arena {
    /// Blob outputs of reads and document reads.
    pub(crate) tape: GrowingTape,
    /// Presence bitmaps.
    pub(crate) presence: Vec<u8>,
    /// Length outputs of measures.
    pub(crate) lengths: Vec<u64>,
    /// Key outputs of scans.
    pub(crate) keys: Vec<i64>,
    /// The single contiguous block of gathered columns.
    pub(crate) block: Vec<u8>,
    /// Joined string cells produced by gathers.
    pub(crate) string_tape: Vec<u8>,
}

impl Arena {
    /// Creates an empty arena.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Resets all pools, keeping their capacity for reuse.
    pub fn discard(&mut self) {
        self.tape.clear();
        self.presence.clear();
        self.lengths.clear();
        self.keys.clear();
        self.block.clear();
        self.string_tape.clear();
    }

    /// The blob tape of the most recent (or accumulated) calls.
    #[must_use]
    pub fn tape(&self) -> &GrowingTape {
        &self.tape
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tape_push_and_get() {
        let mut tape = GrowingTape::default();
        tape.push(Some(b"abc"));
        tape.push(None);
        tape.push(Some(b""));
        tape.push(Some(b"xy"));

        assert_eq!(tape.len(), 4);
        assert_eq!(tape.get(0), Some(&b"abc"[..]));
        assert_eq!(tape.get(1), None);
        assert_eq!(tape.get(2), Some(&b""[..]));
        assert_eq!(tape.get(3), Some(&b"xy"[..]));
        assert_eq!(tape.get(4), None);

        assert_eq!(tape.offsets(), &[0, 3, 3, 3]);
        assert_eq!(tape.lengths(), &[3, LEN_MISSING, 0, 2]);
        assert_eq!(tape.bytes(), b"abcxy");
    }

    #[test]
    fn tape_in_place_blobs() {
        let mut tape = GrowingTape::default();
        let (start, buffer) = tape.begin();
        buffer.extend_from_slice(b"serialized");
        tape.seal(start);
        tape.seal_missing();

        assert_eq!(tape.get(0), Some(&b"serialized"[..]));
        assert_eq!(tape.get(1), None);
    }

    #[test]
    fn tape_clear_keeps_capacity() {
        let mut tape = GrowingTape::default();
        tape.push(Some(&[0u8; 128]));
        let capacity = tape.bytes.capacity();
        tape.clear();
        assert!(tape.is_empty());
        assert_eq!(tape.bytes.capacity(), capacity);
    }

    #[test]
    fn arena_discard_clears_all_pools() {
        let mut arena = Arena::new();
        arena.tape.push(Some(b"x"));
        arena.presence.push(0xff);
        arena.lengths.push(3);
        arena.keys.push(7);
        arena.block.extend_from_slice(&[1, 2]);
        arena.string_tape.push(b'a');

        arena.discard();
        assert!(arena.tape.is_empty());
        assert!(arena.presence.is_empty());
        assert!(arena.lengths.is_empty());
        assert!(arena.keys.is_empty());
        assert!(arena.block.is_empty());
        assert!(arena.string_tape.is_empty());
    }
}
