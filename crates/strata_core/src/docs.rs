//! Document modality: field-aware reads, writes, patches, and gists.
//!
//! Documents are stored as CBOR blobs in the key-value engine. When a call
//! asks for whole documents in the internal format, it degenerates to the
//! raw engine operation; everything else parses into the codec's `Value`
//! tree, samples or updates fields, and re-serializes.

use crate::arena::Arena;
use crate::blobs::{self, BlobsView};
use crate::error::{StrataError, StrataResult};
use crate::soa::{bit_set, bitmap_bytes, Places, Strided};
use crate::txn::{Transaction, TransactionManager};
use crate::types::{CollectionId, Key, Options};
use strata_codec::{parse_any, pointer, serialize_any, DocFormat, Value};
use strata_storage::BatchOp;

/// Per-task field selector: `None` addresses the whole document.
pub type FieldRef<'a> = Option<&'a str>;

/// Arena-resident output of a gist: packed NUL-terminated field paths.
#[derive(Debug, Clone, Copy)]
pub struct PathsView<'a> {
    offsets: &'a [u64],
    bytes: &'a [u8],
}

impl<'a> PathsView<'a> {
    /// Number of distinct paths.
    #[must_use]
    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    /// Whether no paths were found.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    /// The path at `index`, without its NUL terminator.
    #[must_use]
    pub fn get(&self, index: usize) -> &'a str {
        let start = self.offsets[index] as usize;
        let end = self.bytes[start..]
            .iter()
            .position(|&b| b == 0)
            .map_or(self.bytes.len(), |nul| start + nul);
        std::str::from_utf8(&self.bytes[start..end]).unwrap_or("")
    }

    /// The packed path tape (paths separated by NUL bytes).
    #[must_use]
    pub fn bytes(&self) -> &'a [u8] {
        self.bytes
    }

    /// Path start offsets into the tape.
    #[must_use]
    pub fn offsets(&self) -> &'a [u64] {
        self.offsets
    }
}

/// Reads one place through the transaction or at the committed snapshot.
fn read_doc_bytes(
    manager: &TransactionManager,
    txn: &mut Option<&mut Transaction>,
    collection: CollectionId,
    key: Key,
    track: bool,
    snapshot: u64,
) -> StrataResult<Option<Vec<u8>>> {
    match txn.as_deref_mut() {
        Some(txn) => manager.get(txn, collection, key, track),
        None => Ok(manager
            .backend()
            .get_at(collection.as_u32(), key, Some(snapshot))?),
    }
}

/// Parses stored bytes into a document tree. Absent and empty blobs are
/// null documents.
fn parse_stored(bytes: Option<&[u8]>) -> StrataResult<Value> {
    match bytes {
        None => Ok(Value::Null),
        Some([]) => Ok(Value::Null),
        Some(bytes) => Ok(parse_any(bytes, DocFormat::INTERNAL)?),
    }
}

static NULL_DOC: Value = Value::Null;

/// Selects a field of a parsed document; unresolved fields are null.
fn select_field<'a>(doc: &'a Value, field: FieldRef<'_>) -> StrataResult<&'a Value> {
    match field {
        None => Ok(doc),
        Some(field) => Ok(pointer::find_field(doc, field)?.unwrap_or(&NULL_DOC)),
    }
}

/// Batched document read.
///
/// Each task addresses a `(collection, key, optional field)` place and
/// receives one output slot in the requested format. JSON outputs are
/// NUL-terminated on the tape. Duplicate places are fetched and parsed
/// once; already-ascending inputs skip the deduplication sort.
pub fn docs_read<'a>(
    manager: &TransactionManager,
    mut txn: Option<&mut Transaction>,
    places: Places<'_>,
    fields: Option<Strided<'_, FieldRef<'_>>>,
    format: DocFormat,
    options: &Options,
    arena: &'a mut Arena,
) -> StrataResult<BlobsView<'a>> {
    if format.is_patch() {
        return Err(StrataError::missing_feature(
            "patch formats cannot be read targets",
        ));
    }

    // Whole documents in the internal format: a raw engine read.
    if fields.is_none() && format == DocFormat::INTERNAL {
        return blobs::read(manager, txn, places, options, arena);
    }
    if let Some(fields) = &fields {
        if !fields.covers(places.count) {
            return Err(StrataError::invalid_argument(
                "strided fields shorter than the task count",
            ));
        }
    }

    // Different fields of one document must fetch it once. The common
    // scan-shaped case arrives strictly ascending and needs no sort.
    let task_places: Vec<(CollectionId, Key)> = (0..places.count).map(|i| places.get(i)).collect();
    let (unique, slot_of_task): (Vec<(CollectionId, Key)>, Vec<usize>) =
        if places.is_strictly_ascending() {
            (task_places.clone(), (0..places.count).collect())
        } else {
            let mut unique = task_places.clone();
            unique.sort_unstable();
            unique.dedup();
            let slots = task_places
                .iter()
                .map(|place| unique.binary_search(place).unwrap_or(0))
                .collect();
            (unique, slots)
        };

    let snapshot = manager.committed_seq().as_u64();
    let mut parsed = Vec::with_capacity(unique.len());
    let mut present = Vec::with_capacity(unique.len());
    for &(collection, key) in &unique {
        let bytes = read_doc_bytes(
            manager,
            &mut txn,
            collection,
            key,
            options.track_reads,
            snapshot,
        )?;
        present.push(bytes.is_some());
        parsed.push(parse_stored(bytes.as_deref())?);
    }

    if !options.dont_discard_memory {
        arena.discard();
    }
    let presence_start = arena.presence.len();
    let slot_start = arena.tape.len();
    arena
        .presence
        .resize(presence_start + bitmap_bytes(places.count), 0);

    for task in 0..places.count {
        let slot = slot_of_task[task];
        let doc = &parsed[slot];
        let field = fields.as_ref().map_or(None, |fields| *fields.get(task));
        let selected = select_field(doc, field)?;

        let (start, buffer) = arena.tape.begin();
        serialize_any(selected, format, buffer)?;
        if format == DocFormat::Json {
            // NUL-terminate so callers can take zero-copy string views.
            buffer.push(0);
        }
        arena.tape.seal(start);
        if present[slot] {
            bit_set(&mut arena.presence[presence_start..], task, true);
        }
    }

    Ok(crate::blobs::BlobsView::from_arena(
        arena,
        presence_start,
        slot_start,
        places.count,
    ))
}

/// Batched document write.
///
/// Without fields and with a non-patch format, each task replaces its
/// whole document. Otherwise every task is a read-modify-write: JSON-Patch
/// applies RFC 6902 to the addressed subtree, Merge-Patch applies RFC
/// 7396, and any other format replaces the subtree wholesale, creating
/// missing intermediate objects. A task whose content is `None` erases the
/// document. All staged writes flush as one batch.
pub fn docs_write(
    manager: &TransactionManager,
    mut txn: Option<&mut Transaction>,
    places: Places<'_>,
    fields: Option<Strided<'_, FieldRef<'_>>>,
    contents: Strided<'_, Option<&[u8]>>,
    format: DocFormat,
    options: &Options,
) -> StrataResult<()> {
    if !contents.covers(places.count) {
        return Err(StrataError::invalid_argument(
            "strided contents shorter than the task count",
        ));
    }
    if let Some(fields) = &fields {
        if !fields.covers(places.count) {
            return Err(StrataError::invalid_argument(
                "strided fields shorter than the task count",
            ));
        }
    }

    let snapshot = manager.committed_seq().as_u64();
    let mut staged: Vec<(CollectionId, Key, Option<Vec<u8>>)> = Vec::with_capacity(places.count);

    for task in 0..places.count {
        let (collection, key) = places.get(task);
        let field = fields.as_ref().map_or(None, |fields| *fields.get(task));
        let content = *contents.get(task);

        let Some(content) = content else {
            staged.push((collection, key, None));
            continue;
        };

        let update = if field.is_none() && !format.is_patch() {
            // Replace mode: normalize the input into the internal format.
            if format == DocFormat::INTERNAL {
                content.to_vec()
            } else {
                let parsed = parse_any(content, format)?;
                let mut stored = Vec::new();
                serialize_any(&parsed, DocFormat::INTERNAL, &mut stored)?;
                stored
            }
        } else {
            let existing = read_doc_bytes(
                manager,
                &mut txn,
                collection,
                key,
                options.track_reads,
                snapshot,
            )?;
            let mut doc = parse_stored(existing.as_deref())?;
            apply_field_update(&mut doc, field, content, format)?;
            let mut stored = Vec::new();
            serialize_any(&doc, DocFormat::INTERNAL, &mut stored)?;
            stored
        };
        staged.push((collection, key, Some(update)));
    }

    match txn {
        Some(txn) => {
            for (collection, key, update) in staged {
                match update {
                    Some(bytes) => txn.stage_put(collection, key, bytes)?,
                    None => txn.stage_erase(collection, key)?,
                }
                if options.watch_writes {
                    txn.record_read(collection, key);
                }
            }
        }
        None => {
            let batch: Vec<BatchOp> = staged
                .into_iter()
                .map(|(collection, key, update)| match update {
                    Some(bytes) => BatchOp::put(collection.as_u32(), key, bytes),
                    None => BatchOp::erase(collection.as_u32(), key),
                })
                .collect();
            manager.autocommit(&batch)?;
        }
    }
    Ok(())
}

/// Applies one field update to a parsed document.
fn apply_field_update(
    doc: &mut Value,
    field: FieldRef<'_>,
    content: &[u8],
    format: DocFormat,
) -> StrataResult<()> {
    match format {
        DocFormat::JsonPatch => {
            let patch = parse_any(content, format)?;
            let target = resolve_patch_target(doc, field)?;
            strata_codec::patch::apply_patch(target, &patch)?;
            Ok(())
        }
        DocFormat::JsonMergePatch => {
            let patch = parse_any(content, format)?;
            let target = resolve_patch_target(doc, field)?;
            strata_codec::patch::apply_merge_patch(target, &patch);
            Ok(())
        }
        _ => {
            let value = parse_any(content, format)?;
            match field {
                None => {
                    *doc = value;
                    Ok(())
                }
                Some(field) => {
                    let tokens = field_tokens(field)?;
                    pointer::set_creating(doc, &tokens, value)
                        .map_err(StrataError::from)
                }
            }
        }
    }
}

/// Patches address existing subtrees; a patch aimed at an absent field is
/// an argument error rather than an implicit insert.
fn resolve_patch_target<'a>(
    doc: &'a mut Value,
    field: FieldRef<'_>,
) -> StrataResult<&'a mut Value> {
    match field {
        None => Ok(doc),
        Some(field) => {
            let tokens = field_tokens(field)?;
            pointer::resolve_mut(doc, &tokens).ok_or_else(|| {
                StrataError::invalid_argument(format!(
                    "patch target {field:?} does not exist"
                ))
            })
        }
    }
}

fn field_tokens(field: &str) -> StrataResult<Vec<String>> {
    if field.starts_with('/') {
        Ok(pointer::parse_pointer(field)?)
    } else {
        Ok(vec![field.to_string()])
    }
}

/// Union of leaf field paths across a set of documents, as a packed tape
/// of NUL-terminated pointer strings, sorted.
pub fn docs_gist<'a>(
    manager: &TransactionManager,
    mut txn: Option<&mut Transaction>,
    places: Places<'_>,
    options: &Options,
    arena: &'a mut Arena,
) -> StrataResult<PathsView<'a>> {
    let snapshot = manager.committed_seq().as_u64();
    let mut paths = std::collections::BTreeSet::new();

    for task in 0..places.count {
        let (collection, key) = places.get(task);
        let bytes = read_doc_bytes(
            manager,
            &mut txn,
            collection,
            key,
            options.track_reads,
            snapshot,
        )?;
        if bytes.is_none() {
            continue;
        }
        let doc = parse_stored(bytes.as_deref())?;
        for (path, _) in pointer::flatten(&doc) {
            paths.insert(path);
        }
    }

    if !options.dont_discard_memory {
        arena.discard();
    }
    let slot_start = arena.tape.len();
    for path in &paths {
        let (start, buffer) = arena.tape.begin();
        buffer.extend_from_slice(path.as_bytes());
        buffer.push(0);
        arena.tape.seal(start);
    }

    Ok(PathsView {
        offsets: &arena.tape.offsets()[slot_start..],
        bytes: arena.tape.bytes(),
    })
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

    fn seed_json(manager: &TransactionManager, key: Key, json: &[u8]) {
        let keys = [key];
        let contents = [Some(json)];
        docs_write(
            manager,
            None,
            Places::in_collection(&COL, &keys),
            None,
            Strided::dense(&contents),
            DocFormat::Json,
            &Options::default(),
        )
        .unwrap();
    }

    fn read_one_json(
        manager: &TransactionManager,
        key: Key,
        field: FieldRef<'_>,
        arena: &mut Arena,
    ) -> String {
        let keys = [key];
        let fields = [field];
        let view = docs_read(
            manager,
            None,
            Places::in_collection(&COL, &keys),
            Some(Strided::dense(&fields)),
            DocFormat::Json,
            &Options::default(),
            arena,
        )
        .unwrap();
        let bytes = view.get(0).unwrap();
        // JSON outputs are NUL-terminated on the tape.
        assert_eq!(bytes.last(), Some(&0u8));
        String::from_utf8(bytes[..bytes.len() - 1].to_vec()).unwrap()
    }

    #[test]
    fn json_round_trip_through_internal_format() {
        let tm = manager();
        let mut arena = Arena::new();
        seed_json(&tm, 1, br#"{"name": "Davit", "age": 24}"#);

        let text = read_one_json(&tm, 1, None, &mut arena);
        assert_eq!(text, r#"{"age":24,"name":"Davit"}"#);
    }

    #[test]
    fn field_selection_plain_and_pointer() {
        let tm = manager();
        let mut arena = Arena::new();
        seed_json(&tm, 1, br#"{"person": {"name": "Davit", "age": 24}, "tag": "x"}"#);

        assert_eq!(read_one_json(&tm, 1, Some("tag"), &mut arena), r#""x""#);
        assert_eq!(
            read_one_json(&tm, 1, Some("/person/age"), &mut arena),
            "24"
        );
        // Unresolved fields serialize as null.
        assert_eq!(read_one_json(&tm, 1, Some("/missing/way"), &mut arena), "null");
        assert_eq!(read_one_json(&tm, 1, Some("missing"), &mut arena), "null");
    }

    #[test]
    fn absent_document_reads_as_null_and_unset_presence() {
        let tm = manager();
        let mut arena = Arena::new();
        let keys = [404i64];
        let view = docs_read(
            &tm,
            None,
            Places::in_collection(&COL, &keys),
            None,
            DocFormat::Json,
            &Options::default(),
            &mut arena,
        )
        .unwrap();
        assert!(!view.present(0));
        assert_eq!(view.get(0), Some(&b"null\0"[..]));
    }

    #[test]
    fn duplicate_places_each_get_a_slot() {
        let tm = manager();
        let mut arena = Arena::new();
        seed_json(&tm, 1, br#"{"a": 1, "b": 2}"#);

        let keys = [1i64, 1, 1];
        let fields = [Some("a"), Some("b"), Some("missing")];
        let view = docs_read(
            &tm,
            None,
            Places::in_collection(&COL, &keys),
            Some(Strided::dense(&fields)),
            DocFormat::Json,
            &Options::default(),
            &mut arena,
        )
        .unwrap();
        assert_eq!(view.len(), 3);
        assert_eq!(view.get(0), Some(&b"1\0"[..]));
        assert_eq!(view.get(1), Some(&b"2\0"[..]));
        assert_eq!(view.get(2), Some(&b"null\0"[..]));
    }

    #[test]
    fn internal_format_fast_path_returns_raw_blobs() {
        let tm = manager();
        let mut arena = Arena::new();
        seed_json(&tm, 1, br#"{"a": 1}"#);

        let keys = [1i64];
        let view = docs_read(
            &tm,
            None,
            Places::in_collection(&COL, &keys),
            None,
            DocFormat::Cbor,
            &Options::default(),
            &mut arena,
        )
        .unwrap();
        let stored = view.get(0).unwrap();
        assert_eq!(
            parse_any(stored, DocFormat::Cbor).unwrap(),
            Value::object(vec![("a".to_string(), Value::Int(1))])
        );
    }

    #[test]
    fn field_update_replaces_subtree() {
        let tm = manager();
        let mut arena = Arena::new();
        seed_json(&tm, 1, br#"{"person": {"age": 24}}"#);

        let keys = [1i64];
        let fields = [Some("/person/age")];
        let contents = [Some(&b"25"[..])];
        docs_write(
            &tm,
            None,
            Places::in_collection(&COL, &keys),
            Some(Strided::dense(&fields)),
            Strided::dense(&contents),
            DocFormat::Json,
            &Options::default(),
        )
        .unwrap();

        assert_eq!(
            read_one_json(&tm, 1, None, &mut arena),
            r#"{"person":{"age":25}}"#
        );
    }

    #[test]
    fn field_update_creates_missing_subtree() {
        let tm = manager();
        let mut arena = Arena::new();
        seed_json(&tm, 1, br#"{"a": 1}"#);

        let keys = [1i64];
        let fields = [Some("/b/c")];
        let contents = [Some(&b"true"[..])];
        docs_write(
            &tm,
            None,
            Places::in_collection(&COL, &keys),
            Some(Strided::dense(&fields)),
            Strided::dense(&contents),
            DocFormat::Json,
            &Options::default(),
        )
        .unwrap();

        assert_eq!(
            read_one_json(&tm, 1, None, &mut arena),
            r#"{"a":1,"b":{"c":true}}"#
        );
    }

    #[test]
    fn field_update_on_absent_document_starts_from_null() {
        let tm = manager();
        let mut arena = Arena::new();

        let keys = [5i64];
        let fields = [Some("greeting")];
        let contents = [Some(&br#""hi""#[..])];
        docs_write(
            &tm,
            None,
            Places::in_collection(&COL, &keys),
            Some(Strided::dense(&fields)),
            Strided::dense(&contents),
            DocFormat::Json,
            &Options::default(),
        )
        .unwrap();

        assert_eq!(read_one_json(&tm, 5, None, &mut arena), r#"{"greeting":"hi"}"#);
    }

    #[test]
    fn json_patch_applies_operation_list() {
        let tm = manager();
        let mut arena = Arena::new();
        seed_json(&tm, 1, br#"{"a": 1, "drop": true}"#);

        let keys = [1i64];
        let contents = [Some(
            &br#"[{"op": "replace", "path": "/a", "value": 2}, {"op": "remove", "path": "/drop"}]"#[..],
        )];
        docs_write(
            &tm,
            None,
            Places::in_collection(&COL, &keys),
            None,
            Strided::dense(&contents),
            DocFormat::JsonPatch,
            &Options::default(),
        )
        .unwrap();

        assert_eq!(read_one_json(&tm, 1, None, &mut arena), r#"{"a":2}"#);
    }

    #[test]
    fn json_patch_on_absent_field_is_an_argument_error() {
        let tm = manager();
        seed_json(&tm, 1, br#"{"a": 1}"#);

        let keys = [1i64];
        let fields = [Some("/missing")];
        let contents = [Some(&br#"[{"op": "add", "path": "/x", "value": 1}]"#[..])];
        let result = docs_write(
            &tm,
            None,
            Places::in_collection(&COL, &keys),
            Some(Strided::dense(&fields)),
            Strided::dense(&contents),
            DocFormat::JsonPatch,
            &Options::default(),
        );
        assert!(matches!(result, Err(StrataError::InvalidArgument { .. })));
    }

    #[test]
    fn merge_patch_merges_members() {
        let tm = manager();
        let mut arena = Arena::new();
        seed_json(&tm, 1, br#"{"a": 1, "b": 2}"#);

        let keys = [1i64];
        let contents = [Some(&br#"{"b": null, "c": 3}"#[..])];
        docs_write(
            &tm,
            None,
            Places::in_collection(&COL, &keys),
            None,
            Strided::dense(&contents),
            DocFormat::JsonMergePatch,
            &Options::default(),
        )
        .unwrap();

        assert_eq!(read_one_json(&tm, 1, None, &mut arena), r#"{"a":1,"c":3}"#);
    }

    #[test]
    fn deleted_task_erases_the_document() {
        let tm = manager();
        let mut arena = Arena::new();
        seed_json(&tm, 1, br#"{"a": 1}"#);

        let keys = [1i64];
        let contents: [Option<&[u8]>; 1] = [None];
        docs_write(
            &tm,
            None,
            Places::in_collection(&COL, &keys),
            None,
            Strided::dense(&contents),
            DocFormat::Json,
            &Options::default(),
        )
        .unwrap();

        let view = docs_read(
            &tm,
            None,
            Places::in_collection(&COL, &keys),
            None,
            DocFormat::Cbor,
            &Options::default(),
            &mut arena,
        )
        .unwrap();
        assert!(!view.present(0));
    }

    #[test]
    fn field_writes_inherit_transaction_atomicity() {
        let tm = manager();
        let mut arena = Arena::new();
        seed_json(&tm, 1, br#"{"n": 1}"#);

        let mut txn = tm.begin();
        let keys = [1i64];
        let fields = [Some("n")];
        let contents = [Some(&b"2"[..])];
        docs_write(
            &tm,
            Some(&mut txn),
            Places::in_collection(&COL, &keys),
            Some(Strided::dense(&fields)),
            Strided::dense(&contents),
            DocFormat::Json,
            &Options::default(),
        )
        .unwrap();

        // Invisible until commit.
        assert_eq!(read_one_json(&tm, 1, Some("n"), &mut arena), "1");
        tm.commit(&mut txn).unwrap();
        assert_eq!(read_one_json(&tm, 1, Some("n"), &mut arena), "2");
    }

    #[test]
    fn gist_unions_leaf_paths() {
        let tm = manager();
        let mut arena = Arena::new();
        seed_json(&tm, 1, br#"{"a": 1, "b": {"c": 2}}"#);
        seed_json(&tm, 2, br#"{"a": 9, "d": [true, false]}"#);

        let keys = [1i64, 2, 404];
        let view = docs_gist(
            &tm,
            None,
            Places::in_collection(&COL, &keys),
            &Options::default(),
            &mut arena,
        )
        .unwrap();

        let paths: Vec<&str> = (0..view.len()).map(|i| view.get(i)).collect();
        assert_eq!(paths, vec!["/a", "/b/c", "/d/0", "/d/1"]);
    }

    #[test]
    fn msgpack_read_of_selected_field() {
        let tm = manager();
        let mut arena = Arena::new();
        seed_json(&tm, 1, br#"{"a": 7}"#);

        let keys = [1i64];
        let fields = [Some("a")];
        let view = docs_read(
            &tm,
            None,
            Places::in_collection(&COL, &keys),
            Some(Strided::dense(&fields)),
            DocFormat::Msgpack,
            &Options::default(),
            &mut arena,
        )
        .unwrap();
        assert_eq!(view.get(0), Some(&[0x07u8][..]));
    }
}
