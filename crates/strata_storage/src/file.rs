//! File-backed versioned backend.

use crate::backend::{BatchOp, KvBackend};
use crate::error::{StorageError, StorageResult};
use crate::memory::MemoryBackend;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::Path;

const OP_ERASE: u8 = 0;
const OP_PUT: u8 = 1;
const OP_DROP_COLLECTION: u8 = 2;

/// A file-backed versioned backend.
///
/// Keeps the full version image in memory and appends every committed batch
/// to a log file. On open, the log is replayed to rebuild the image; a torn
/// record at the tail (from a crash mid-append) is discarded and the file is
/// truncated back to the last complete record.
///
/// The log record format is:
///
/// ```text
/// [payload_len: u32 LE] [seq: u64 LE] [op_count: u32 LE] [ops...]
/// op := tag:u8  collection:u32  (key:i64)  (value_len:u32 value_bytes)
/// ```
pub struct FileBackend {
    memory: MemoryBackend,
    log: Mutex<File>,
}

impl FileBackend {
    /// Opens (or creates) a commit log at `path` and replays it.
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure or if the log body (before the tail)
    /// is corrupted.
    pub fn open(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let mut file = OpenOptions::new()
            .read(true)
            .create(true)
            .append(true)
            .open(path)?;

        let mut contents = Vec::new();
        file.read_to_end(&mut contents)?;

        let memory = MemoryBackend::new();
        let replayed = Self::replay(&memory, &contents)?;
        if replayed < contents.len() as u64 {
            // Torn tail record: drop it and continue from the last good one.
            file.set_len(replayed)?;
        }

        Ok(Self {
            memory,
            log: Mutex::new(file),
        })
    }

    /// Replays complete records from `contents`, returning the byte offset
    /// of the first incomplete record (== `contents.len()` if none).
    fn replay(memory: &MemoryBackend, contents: &[u8]) -> StorageResult<u64> {
        let mut pos = 0usize;
        loop {
            let Some(header) = contents.get(pos..pos + 4) else {
                return Ok(pos as u64);
            };
            let payload_len = u32::from_le_bytes([header[0], header[1], header[2], header[3]])
                as usize;
            let Some(payload) = contents.get(pos + 4..pos + 4 + payload_len) else {
                return Ok(pos as u64);
            };
            let (seq, batch) = Self::decode_record(payload)?;
            memory
                .apply(&batch, seq)
                .map_err(|e| StorageError::corrupted(format!("log replay: {e}")))?;
            pos += 4 + payload_len;
        }
    }

    fn decode_record(payload: &[u8]) -> StorageResult<(u64, Vec<BatchOp>)> {
        let mut cursor = Cursor { buf: payload, pos: 0 };
        let seq = cursor.read_u64()?;
        let count = cursor.read_u32()? as usize;
        let mut batch = Vec::with_capacity(count);
        for _ in 0..count {
            let tag = cursor.read_u8()?;
            let collection = cursor.read_u32()?;
            match tag {
                OP_ERASE => {
                    let key = cursor.read_i64()?;
                    batch.push(BatchOp::Erase { collection, key });
                }
                OP_PUT => {
                    let key = cursor.read_i64()?;
                    let len = cursor.read_u32()? as usize;
                    let value = cursor.read_bytes(len)?.to_vec();
                    batch.push(BatchOp::Put {
                        collection,
                        key,
                        value,
                    });
                }
                OP_DROP_COLLECTION => {
                    batch.push(BatchOp::DropCollection { collection });
                }
                other => {
                    return Err(StorageError::corrupted(format!(
                        "unknown log op tag {other}"
                    )));
                }
            }
        }
        Ok((seq, batch))
    }

    fn encode_record(batch: &[BatchOp], seq: u64) -> Vec<u8> {
        let mut payload = Vec::with_capacity(16 + batch.len() * 24);
        payload.extend_from_slice(&seq.to_le_bytes());
        payload.extend_from_slice(&(batch.len() as u32).to_le_bytes());
        for op in batch {
            match op {
                BatchOp::Erase { collection, key } => {
                    payload.push(OP_ERASE);
                    payload.extend_from_slice(&collection.to_le_bytes());
                    payload.extend_from_slice(&key.to_le_bytes());
                }
                BatchOp::Put {
                    collection,
                    key,
                    value,
                } => {
                    payload.push(OP_PUT);
                    payload.extend_from_slice(&collection.to_le_bytes());
                    payload.extend_from_slice(&key.to_le_bytes());
                    payload.extend_from_slice(&(value.len() as u32).to_le_bytes());
                    payload.extend_from_slice(value);
                }
                BatchOp::DropCollection { collection } => {
                    payload.push(OP_DROP_COLLECTION);
                    payload.extend_from_slice(&collection.to_le_bytes());
                }
            }
        }
        let mut record = Vec::with_capacity(4 + payload.len());
        record.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        record.extend_from_slice(&payload);
        record
    }
}

impl KvBackend for FileBackend {
    fn get_at(&self, collection: u32, key: i64, snapshot: Option<u64>)
        -> StorageResult<Option<Vec<u8>>> {
        self.memory.get_at(collection, key, snapshot)
    }

    fn len_at(&self, collection: u32, key: i64, snapshot: Option<u64>)
        -> StorageResult<Option<u64>> {
        self.memory.len_at(collection, key, snapshot)
    }

    fn latest_seq(&self, collection: u32, key: i64) -> StorageResult<u64> {
        self.memory.latest_seq(collection, key)
    }

    fn apply(&self, batch: &[BatchOp], seq: u64) -> StorageResult<()> {
        // The log is written before the memory image becomes visible, so a
        // crash between the two replays the batch on next open.
        let record = Self::encode_record(batch, seq);
        {
            let mut log = self.log.lock();
            log.write_all(&record)?;
            log.flush()?;
        }
        self.memory.apply(batch, seq)
    }

    fn scan_keys(
        &self,
        collection: u32,
        start: i64,
        limit: usize,
        snapshot: Option<u64>,
    ) -> StorageResult<Vec<i64>> {
        self.memory.scan_keys(collection, start, limit, snapshot)
    }

    fn max_seq(&self) -> StorageResult<u64> {
        self.memory.max_seq()
    }
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn read_bytes(&mut self, len: usize) -> StorageResult<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.buf.len())
            .ok_or_else(|| StorageError::corrupted("record truncated"))?;
        let bytes = &self.buf[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn read_u8(&mut self) -> StorageResult<u8> {
        Ok(self.read_bytes(1)?[0])
    }

    fn read_u32(&mut self) -> StorageResult<u32> {
        let b = self.read_bytes(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn read_u64(&mut self) -> StorageResult<u64> {
        let b = self.read_bytes(8)?;
        Ok(u64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
    }

    fn read_i64(&mut self) -> StorageResult<i64> {
        let b = self.read_bytes(8)?;
        Ok(i64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn open_creates_empty_log() {
        let dir = tempdir().unwrap();
        let backend = FileBackend::open(&dir.path().join("strata.log")).unwrap();
        assert_eq!(backend.max_seq().unwrap(), 0);
    }

    #[test]
    fn apply_and_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("strata.log");

        {
            let backend = FileBackend::open(&path).unwrap();
            backend.apply(&[BatchOp::put(0, 34, vec![0x22])], 1).unwrap();
            backend.apply(&[BatchOp::put(0, 35, vec![0x23])], 2).unwrap();
            backend.apply(&[BatchOp::erase(0, 34)], 3).unwrap();
        }

        let backend = FileBackend::open(&path).unwrap();
        assert_eq!(backend.max_seq().unwrap(), 3);
        assert_eq!(backend.get_at(0, 34, None).unwrap(), None);
        assert_eq!(backend.get_at(0, 35, None).unwrap(), Some(vec![0x23]));
        assert_eq!(backend.get_at(0, 34, Some(2)).unwrap(), Some(vec![0x22]));
    }

    #[test]
    fn drop_collection_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("strata.log");

        {
            let backend = FileBackend::open(&path).unwrap();
            backend
                .apply(
                    &[BatchOp::put(2, 1, vec![1]), BatchOp::put(2, 2, vec![2])],
                    1,
                )
                .unwrap();
            backend
                .apply(&[BatchOp::DropCollection { collection: 2 }], 2)
                .unwrap();
        }

        let backend = FileBackend::open(&path).unwrap();
        assert_eq!(backend.scan_keys(2, i64::MIN, usize::MAX, None).unwrap(), Vec::<i64>::new());
    }

    #[test]
    fn torn_tail_is_discarded() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("strata.log");

        {
            let backend = FileBackend::open(&path).unwrap();
            backend.apply(&[BatchOp::put(0, 1, vec![1])], 1).unwrap();
        }

        // Simulate a crash mid-append: a header promising more bytes than
        // the file holds.
        {
            let mut file = OpenOptions::new().append(true).open(&path).unwrap();
            file.write_all(&[0xFF, 0x00, 0x00, 0x00, 0xAB]).unwrap();
        }

        let backend = FileBackend::open(&path).unwrap();
        assert_eq!(backend.max_seq().unwrap(), 1);
        assert_eq!(backend.get_at(0, 1, None).unwrap(), Some(vec![1]));

        // The file was truncated back, so further appends replay cleanly.
        backend.apply(&[BatchOp::put(0, 2, vec![2])], 2).unwrap();
        drop(backend);
        let backend = FileBackend::open(&path).unwrap();
        assert_eq!(backend.get_at(0, 2, None).unwrap(), Some(vec![2]));
    }

    #[test]
    fn empty_value_round_trips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("strata.log");
        {
            let backend = FileBackend::open(&path).unwrap();
            backend.apply(&[BatchOp::put(0, 9, Vec::new())], 1).unwrap();
        }
        let backend = FileBackend::open(&path).unwrap();
        assert_eq!(backend.len_at(0, 9, None).unwrap(), Some(0));
    }
}
