//! Batched blob operations: the engine's five bulk entry points.
//!
//! All inputs arrive as strided SoA arrays and all outputs land in the
//! caller's arena. A batch of N tasks always produces exactly N result
//! slots in input order. Reads outside a transaction capture one committed
//! sequence, so the whole batch observes a single snapshot.

use crate::arena::Arena;
use crate::error::{StrataError, StrataResult};
use crate::soa::{bit_get, bit_set, bitmap_bytes, Places, Strided};
use crate::txn::{Transaction, TransactionManager};
use crate::types::{CollectionId, Key, Options, LEN_MISSING};
use strata_storage::BatchOp;

/// Arena-resident output of a batched read.
#[derive(Debug, Clone, Copy)]
pub struct BlobsView<'a> {
    presence: &'a [u8],
    offsets: &'a [u64],
    lengths: &'a [u64],
    values: &'a [u8],
    count: usize,
}

impl<'a> BlobsView<'a> {
    /// Assembles a view over the arena regions a call just filled.
    pub(crate) fn from_arena(
        arena: &'a Arena,
        presence_start: usize,
        slot_start: usize,
        count: usize,
    ) -> Self {
        Self {
            presence: &arena.presence[presence_start..],
            offsets: &arena.tape.offsets()[slot_start..],
            lengths: &arena.tape.lengths()[slot_start..],
            values: arena.tape.bytes(),
            count,
        }
    }

    /// Number of result slots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.count
    }

    /// Whether the batch was empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Whether slot `i` holds a present key.
    #[must_use]
    pub fn present(&self, i: usize) -> bool {
        bit_get(self.presence, i)
    }

    /// Length of slot `i`; `LEN_MISSING` when absent.
    #[must_use]
    pub fn length(&self, i: usize) -> u64 {
        self.lengths[i]
    }

    /// Value bytes of slot `i`, `None` when absent.
    #[must_use]
    pub fn get(&self, i: usize) -> Option<&'a [u8]> {
        if self.lengths[i] == LEN_MISSING {
            return None;
        }
        let offset = self.offsets[i] as usize;
        Some(&self.values[offset..offset + self.lengths[i] as usize])
    }

    /// The presence bitmap (little-endian bit order).
    #[must_use]
    pub fn presence(&self) -> &'a [u8] {
        self.presence
    }

    /// Offsets into the joined buffer, one per slot.
    #[must_use]
    pub fn offsets(&self) -> &'a [u64] {
        self.offsets
    }

    /// Lengths, one per slot.
    #[must_use]
    pub fn lengths(&self) -> &'a [u64] {
        self.lengths
    }

    /// The joined value buffer.
    #[must_use]
    pub fn values(&self) -> &'a [u8] {
        self.values
    }
}

/// Arena-resident output of a batched measure.
#[derive(Debug, Clone, Copy)]
pub struct MeasureView<'a> {
    presence: &'a [u8],
    lengths: &'a [u64],
    count: usize,
}

impl<'a> MeasureView<'a> {
    /// Number of result slots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.count
    }

    /// Whether the batch was empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Whether slot `i` holds a present key.
    #[must_use]
    pub fn present(&self, i: usize) -> bool {
        bit_get(self.presence, i)
    }

    /// Length of slot `i`; `LEN_MISSING` when absent.
    #[must_use]
    pub fn length(&self, i: usize) -> u64 {
        self.lengths[i]
    }

    /// Lengths, one per slot.
    #[must_use]
    pub fn lengths(&self) -> &'a [u64] {
        self.lengths
    }

    /// The presence bitmap (little-endian bit order).
    #[must_use]
    pub fn presence(&self) -> &'a [u8] {
        self.presence
    }
}

/// Batched SoA write payload: a presence bitmap, strided offset/length
/// arrays, and one joined byte buffer.
///
/// A task is an erase when its presence bit is clear or its length is
/// `LEN_MISSING`; a present task with length 0 writes an empty value
/// (clear). Everything else writes `bytes[offset .. offset + length]`.
#[derive(Debug, Clone, Copy)]
pub struct WritePayload<'a> {
    /// Optional presence bitmap; absent means every task is present.
    pub presence: Option<&'a [u8]>,
    /// Value offsets into `bytes`.
    pub offsets: Strided<'a, u64>,
    /// Value lengths.
    pub lengths: Strided<'a, u64>,
    /// The joined value buffer.
    pub bytes: &'a [u8],
}

impl<'a> WritePayload<'a> {
    /// The value for task `i`, or `None` for an erase.
    fn task_value(&self, i: usize) -> StrataResult<Option<&'a [u8]>> {
        if let Some(bits) = self.presence {
            if !bit_get(bits, i) {
                return Ok(None);
            }
        }
        let length = *self.lengths.get(i);
        if length == LEN_MISSING {
            return Ok(None);
        }
        let offset = *self.offsets.get(i) as usize;
        let end = offset
            .checked_add(length as usize)
            .filter(|&end| end <= self.bytes.len())
            .ok_or_else(|| {
                StrataError::invalid_argument(format!(
                    "write task {i} addresses bytes {offset}..+{length} beyond the buffer"
                ))
            })?;
        Ok(Some(&self.bytes[offset..end]))
    }
}

fn check_places(places: &Places<'_>) -> StrataResult<()> {
    if !places.collections.covers(places.count) || !places.keys.covers(places.count) {
        return Err(StrataError::invalid_argument(
            "strided inputs shorter than the task count",
        ));
    }
    Ok(())
}

/// Batched point read.
///
/// Fills a presence bitmap, parallel offset/length arrays, and one joined
/// value buffer in the arena. Absent keys report `LEN_MISSING`.
pub fn read<'a>(
    manager: &TransactionManager,
    mut txn: Option<&mut Transaction>,
    places: Places<'_>,
    options: &Options,
    arena: &'a mut Arena,
) -> StrataResult<BlobsView<'a>> {
    check_places(&places)?;
    if !options.dont_discard_memory {
        arena.discard();
    }

    let presence_start = arena.presence.len();
    let slot_start = arena.tape.len();
    arena
        .presence
        .resize(presence_start + bitmap_bytes(places.count), 0);

    let snapshot = manager.committed_seq().as_u64();
    for i in 0..places.count {
        let (collection, key) = places.get(i);
        let value = match txn.as_deref_mut() {
            Some(txn) => manager.get(txn, collection, key, options.track_reads)?,
            None => manager
                .backend()
                .get_at(collection.as_u32(), key, Some(snapshot))?,
        };
        match value {
            Some(bytes) => {
                arena.tape.push(Some(&bytes));
                bit_set(&mut arena.presence[presence_start..], i, true);
            }
            None => arena.tape.push(None),
        }
    }

    Ok(BlobsView::from_arena(
        arena,
        presence_start,
        slot_start,
        places.count,
    ))
}

/// Batched lengths-only read. No value bytes are copied.
pub fn measure<'a>(
    manager: &TransactionManager,
    txn: Option<&Transaction>,
    places: Places<'_>,
    options: &Options,
    arena: &'a mut Arena,
) -> StrataResult<MeasureView<'a>> {
    check_places(&places)?;
    if !options.dont_discard_memory {
        arena.discard();
    }

    let presence_start = arena.presence.len();
    let lengths_start = arena.lengths.len();
    arena
        .presence
        .resize(presence_start + bitmap_bytes(places.count), 0);

    let snapshot = match txn {
        Some(txn) => txn.snapshot_seq().as_u64(),
        None => manager.committed_seq().as_u64(),
    };
    for i in 0..places.count {
        let (collection, key) = places.get(i);
        let length = match txn.and_then(|t| t.staged(collection, key)) {
            Some(Some(staged)) => Some(staged.len() as u64),
            Some(None) => None,
            None => manager
                .backend()
                .len_at(collection.as_u32(), key, Some(snapshot))?,
        };
        match length {
            Some(length) => {
                arena.lengths.push(length);
                bit_set(&mut arena.presence[presence_start..], i, true);
            }
            None => arena.lengths.push(LEN_MISSING),
        }
    }

    Ok(MeasureView {
        presence: &arena.presence[presence_start..],
        lengths: &arena.lengths[lengths_start..],
        count: places.count,
    })
}

/// Batched write.
///
/// Inside a transaction the batch is staged; outside it commits atomically
/// as its own serialization point. Duplicate places in one batch resolve
/// last-wins.
pub fn write(
    manager: &TransactionManager,
    txn: Option<&mut Transaction>,
    places: Places<'_>,
    payload: WritePayload<'_>,
    options: &Options,
) -> StrataResult<()> {
    check_places(&places)?;
    if !payload.offsets.covers(places.count) || !payload.lengths.covers(places.count) {
        return Err(StrataError::invalid_argument(
            "strided payload shorter than the task count",
        ));
    }

    match txn {
        Some(txn) => {
            for i in 0..places.count {
                let (collection, key) = places.get(i);
                match payload.task_value(i)? {
                    Some(bytes) => txn.stage_put(collection, key, bytes.to_vec())?,
                    None => txn.stage_erase(collection, key)?,
                }
                if options.watch_writes {
                    txn.record_read(collection, key);
                }
            }
            Ok(())
        }
        None => {
            let mut batch = Vec::with_capacity(places.count);
            for i in 0..places.count {
                let (collection, key) = places.get(i);
                batch.push(match payload.task_value(i)? {
                    Some(bytes) => BatchOp::put(collection.as_u32(), key, bytes.to_vec()),
                    None => BatchOp::erase(collection.as_u32(), key),
                });
            }
            manager.autocommit(&batch)?;
            Ok(())
        }
    }
}

/// Range scan: up to `limit` present keys of `collection` starting at
/// `start`, ascending. Inside a transaction the result reflects staged
/// writes and the transaction snapshot.
pub fn scan<'a>(
    manager: &TransactionManager,
    txn: Option<&Transaction>,
    collection: CollectionId,
    start: Key,
    limit: usize,
    options: &Options,
    arena: &'a mut Arena,
) -> StrataResult<&'a [Key]> {
    if !options.dont_discard_memory {
        arena.discard();
    }
    let keys_start = arena.keys.len();

    match txn {
        None => {
            let snapshot = manager.committed_seq().as_u64();
            let keys = manager
                .backend()
                .scan_keys(collection.as_u32(), start, limit, Some(snapshot))?;
            arena.keys.extend_from_slice(&keys);
        }
        Some(txn) => {
            let snapshot = txn.snapshot_seq().as_u64();
            // Over-fetch so staged erases cannot starve the limit.
            let staged: Vec<(Key, bool)> = txn
                .staged_in_collection(collection)
                .filter(|(key, _)| *key >= start)
                .map(|(key, write)| (key, write.is_some()))
                .collect();
            let fetch = limit.saturating_add(staged.len());
            let committed =
                manager
                    .backend()
                    .scan_keys(collection.as_u32(), start, fetch, Some(snapshot))?;

            // Merge two ascending sequences, staged writes taking priority.
            let mut merged = Vec::with_capacity(committed.len() + staged.len());
            let mut staged_iter = staged.iter().peekable();
            for key in committed {
                while let Some(&&(staged_key, present)) = staged_iter.peek() {
                    if staged_key >= key {
                        break;
                    }
                    staged_iter.next();
                    if present {
                        merged.push(staged_key);
                    }
                }
                match staged_iter.peek() {
                    Some(&&(staged_key, present)) if staged_key == key => {
                        staged_iter.next();
                        if present {
                            merged.push(key);
                        }
                    }
                    _ => merged.push(key),
                }
            }
            for &(staged_key, present) in staged_iter {
                if present {
                    merged.push(staged_key);
                }
            }
            merged.truncate(limit);
            arena.keys.extend_from_slice(&merged);
        }
    }

    Ok(&arena.keys[keys_start..])
}

/// Removes every key of a collection, atomically.
pub fn clear_collection(
    manager: &TransactionManager,
    collection: CollectionId,
) -> StrataResult<()> {
    manager.autocommit(&[BatchOp::DropCollection {
        collection: collection.as_u32(),
    }])?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use strata_storage::MemoryBackend;

    const COL: CollectionId = CollectionId::DEFAULT;

    fn manager() -> TransactionManager {
        TransactionManager::new(Arc::new(MemoryBackend::new())).unwrap()
    }

    fn write_values(
        manager: &TransactionManager,
        txn: Option<&mut Transaction>,
        keys: &[Key],
        values: &[&[u8]],
    ) {
        let mut bytes = Vec::new();
        let mut offsets = Vec::new();
        let mut lengths = Vec::new();
        for value in values {
            offsets.push(bytes.len() as u64);
            lengths.push(value.len() as u64);
            bytes.extend_from_slice(value);
        }
        write(
            manager,
            txn,
            Places::in_collection(&COL, keys),
            WritePayload {
                presence: None,
                offsets: Strided::dense(&offsets),
                lengths: Strided::dense(&lengths),
                bytes: &bytes,
            },
            &Options::default(),
        )
        .unwrap();
    }

    #[test]
    fn write_then_read_round_trips() {
        let tm = manager();
        let mut arena = Arena::new();
        write_values(&tm, None, &[34, 35, 36], &[b"a", b"bb", b"ccc"]);

        let view = read(
            &tm,
            None,
            Places::in_collection(&COL, &[34, 35, 36, 99]),
            &Options::default(),
            &mut arena,
        )
        .unwrap();

        assert_eq!(view.len(), 4);
        assert_eq!(view.get(0), Some(&b"a"[..]));
        assert_eq!(view.get(1), Some(&b"bb"[..]));
        assert_eq!(view.get(2), Some(&b"ccc"[..]));
        assert_eq!(view.get(3), None);
        assert!(view.present(0) && view.present(2));
        assert!(!view.present(3));
        assert_eq!(view.length(3), LEN_MISSING);
        assert_eq!(view.values(), b"abbccc");
    }

    #[test]
    fn broadcast_value_writes_every_key() {
        let tm = manager();
        let mut arena = Arena::new();

        // One shared payload for three keys: stride-0 convention.
        let offsets = 0u64;
        let lengths = 2u64;
        write(
            &tm,
            None,
            Places::in_collection(&COL, &[1, 2, 3]),
            WritePayload {
                presence: None,
                offsets: Strided::broadcast(&offsets),
                lengths: Strided::broadcast(&lengths),
                bytes: b"vv",
            },
            &Options::default(),
        )
        .unwrap();

        let view = read(
            &tm,
            None,
            Places::in_collection(&COL, &[1, 2, 3]),
            &Options::default(),
            &mut arena,
        )
        .unwrap();
        for i in 0..3 {
            assert_eq!(view.get(i), Some(&b"vv"[..]));
        }
    }

    #[test]
    fn clear_and_erase_are_two_levels() {
        let tm = manager();
        let mut arena = Arena::new();
        write_values(&tm, None, &[1], &[b"data"]);

        // Clear: present with length 0.
        write_values(&tm, None, &[1], &[b""]);
        let view = measure(
            &tm,
            None,
            Places::in_collection(&COL, &[1]),
            &Options::default(),
            &mut arena,
        )
        .unwrap();
        assert!(view.present(0));
        assert_eq!(view.length(0), 0);

        // Erase: absent with LEN_MISSING.
        let lengths = LEN_MISSING;
        let offsets = 0u64;
        write(
            &tm,
            None,
            Places::in_collection(&COL, &[1]),
            WritePayload {
                presence: None,
                offsets: Strided::broadcast(&offsets),
                lengths: Strided::broadcast(&lengths),
                bytes: &[],
            },
            &Options::default(),
        )
        .unwrap();
        let view = measure(
            &tm,
            None,
            Places::in_collection(&COL, &[1]),
            &Options::default(),
            &mut arena,
        )
        .unwrap();
        assert!(!view.present(0));
        assert_eq!(view.length(0), LEN_MISSING);
    }

    #[test]
    fn duplicate_keys_last_wins() {
        let tm = manager();
        let mut arena = Arena::new();
        write_values(&tm, None, &[7, 7], &[b"first", b"second"]);

        let view = read(
            &tm,
            None,
            Places::in_collection(&COL, &[7]),
            &Options::default(),
            &mut arena,
        )
        .unwrap();
        assert_eq!(view.get(0), Some(&b"second"[..]));
    }

    #[test]
    fn duplicate_reads_fill_every_slot() {
        let tm = manager();
        let mut arena = Arena::new();
        write_values(&tm, None, &[7], &[b"x"]);

        let view = read(
            &tm,
            None,
            Places::in_collection(&COL, &[7, 7, 7]),
            &Options::default(),
            &mut arena,
        )
        .unwrap();
        assert_eq!(view.len(), 3);
        for i in 0..3 {
            assert_eq!(view.get(i), Some(&b"x"[..]));
        }
    }

    #[test]
    fn transactional_read_your_writes_and_scan_merge() {
        let tm = manager();
        let mut arena = Arena::new();
        write_values(&tm, None, &[10, 20, 30], &[b"a", b"b", b"c"]);

        let mut txn = tm.begin();
        write_values(&tm, Some(&mut txn), &[15], &[b"staged"]);
        let lengths = LEN_MISSING;
        let offsets = 0u64;
        write(
            &tm,
            Some(&mut txn),
            Places::in_collection(&COL, &[20]),
            WritePayload {
                presence: None,
                offsets: Strided::broadcast(&offsets),
                lengths: Strided::broadcast(&lengths),
                bytes: &[],
            },
            &Options::default(),
        )
        .unwrap();

        let keys = scan(
            &tm,
            Some(&txn),
            COL,
            i64::MIN,
            usize::MAX,
            &Options::default(),
            &mut arena,
        )
        .unwrap();
        assert_eq!(keys, &[10, 15, 30]);

        // Outside the transaction nothing changed yet.
        let mut other = Arena::new();
        let keys = scan(&tm, None, COL, i64::MIN, usize::MAX, &Options::default(), &mut other)
            .unwrap();
        assert_eq!(keys, &[10, 20, 30]);

        tm.commit(&mut txn).unwrap();
        let keys = scan(&tm, None, COL, i64::MIN, usize::MAX, &Options::default(), &mut other)
            .unwrap();
        assert_eq!(keys, &[10, 15, 30]);
    }

    #[test]
    fn scan_empty_collection_is_empty() {
        let tm = manager();
        let mut arena = Arena::new();
        let keys = scan(&tm, None, COL, i64::MIN, usize::MAX, &Options::default(), &mut arena)
            .unwrap();
        assert!(keys.is_empty());
    }

    #[test]
    fn scan_respects_start_and_limit() {
        let tm = manager();
        let mut arena = Arena::new();
        write_values(&tm, None, &[1, 2, 3, 4], &[b"", b"", b"", b""]);

        let keys = scan(&tm, None, COL, 2, 2, &Options::default(), &mut arena).unwrap();
        assert_eq!(keys, &[2, 3]);
    }

    #[test]
    fn dont_discard_memory_accumulates() {
        let tm = manager();
        let mut arena = Arena::new();
        write_values(&tm, None, &[1], &[b"x"]);

        let options = Options {
            dont_discard_memory: true,
            ..Options::default()
        };
        let _ = read(&tm, None, Places::in_collection(&COL, &[1]), &options, &mut arena).unwrap();
        let view = read(&tm, None, Places::in_collection(&COL, &[1]), &options, &mut arena)
            .unwrap();
        assert_eq!(view.len(), 1);
        assert_eq!(view.get(0), Some(&b"x"[..]));
        // Both results are resident.
        assert_eq!(arena.tape().len(), 2);
    }

    #[test]
    fn out_of_bounds_payload_is_rejected() {
        let tm = manager();
        let offsets = 0u64;
        let lengths = 100u64;
        let result = write(
            &tm,
            None,
            Places::in_collection(&COL, &[1]),
            WritePayload {
                presence: None,
                offsets: Strided::broadcast(&offsets),
                lengths: Strided::broadcast(&lengths),
                bytes: b"short",
            },
            &Options::default(),
        );
        assert!(matches!(result, Err(StrataError::InvalidArgument { .. })));
    }

    #[test]
    fn clear_collection_removes_all_keys() {
        let tm = manager();
        let mut arena = Arena::new();
        write_values(&tm, None, &[1, 2], &[b"a", b"b"]);
        clear_collection(&tm, COL).unwrap();
        let keys = scan(&tm, None, COL, i64::MIN, usize::MAX, &Options::default(), &mut arena)
            .unwrap();
        assert!(keys.is_empty());
    }
}
