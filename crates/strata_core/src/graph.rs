//! Graph modality: adjacency lists layered on the key-value engine.
//!
//! Every vertex owns one record in the graph's collection: a sorted list of
//! `(neighbor, edge id, role)` triples. An edge is mirrored at both
//! endpoints, and all multi-record updates run inside one transaction, so
//! the two mirrors can never drift apart. Operations invoked without a
//! transaction open their own and retry the whole batch on conflict.

use crate::error::{StrataError, StrataResult};
use crate::txn::{Transaction, TransactionManager};
use crate::types::{CollectionId, Key, EDGE_ID_ANON};
use tracing::debug;

/// How an adjacency entry relates to its owning vertex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Role {
    /// The edge leaves this vertex.
    Outgoing = 0,
    /// The edge arrives at this vertex.
    Incoming = 1,
    /// The edge has no direction.
    Undirected = 2,
}

impl Role {
    fn from_u8(byte: u8) -> Option<Role> {
        match byte {
            0 => Some(Role::Outgoing),
            1 => Some(Role::Incoming),
            2 => Some(Role::Undirected),
            _ => None,
        }
    }
}

/// An edge between two vertices.
///
/// `id` is [`EDGE_ID_ANON`] for anonymous edges. Undirected edges treat
/// `source`/`target` as interchangeable endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Edge {
    /// Source endpoint (either endpoint for undirected edges).
    pub source: Key,
    /// Target endpoint.
    pub target: Key,
    /// Edge id, or [`EDGE_ID_ANON`].
    pub id: i64,
    /// Whether the edge is undirected.
    pub undirected: bool,
}

impl Edge {
    /// A directed edge.
    #[must_use]
    pub fn directed(source: Key, target: Key, id: i64) -> Self {
        Self {
            source,
            target,
            id,
            undirected: false,
        }
    }

    /// An undirected edge.
    #[must_use]
    pub fn undirected(source: Key, target: Key, id: i64) -> Self {
        Self {
            source,
            target,
            id,
            undirected: true,
        }
    }

    /// An anonymous directed edge.
    #[must_use]
    pub fn link(source: Key, target: Key) -> Self {
        Self::directed(source, target, EDGE_ID_ANON)
    }
}

/// One entry of a vertex's adjacency list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct AdjEntry {
    neighbor: Key,
    edge: i64,
    role: Role,
}

const ENTRY_BYTES: usize = 8 + 8 + 1;

/// Decodes an adjacency record.
fn decode_adjacency(bytes: &[u8]) -> StrataResult<Vec<AdjEntry>> {
    if bytes.is_empty() {
        return Ok(Vec::new());
    }
    if bytes.len() < 4 {
        return Err(StrataError::invalid_operation("truncated adjacency record"));
    }
    let count = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
    if bytes.len() != 4 + count * ENTRY_BYTES {
        return Err(StrataError::invalid_operation(
            "adjacency record size mismatch",
        ));
    }
    let mut entries = Vec::with_capacity(count);
    for chunk in bytes[4..].chunks_exact(ENTRY_BYTES) {
        let neighbor = i64::from_le_bytes(chunk[0..8].try_into().unwrap_or([0; 8]));
        let edge = i64::from_le_bytes(chunk[8..16].try_into().unwrap_or([0; 8]));
        let role = Role::from_u8(chunk[16])
            .ok_or_else(|| StrataError::invalid_operation("bad adjacency role byte"))?;
        entries.push(AdjEntry {
            neighbor,
            edge,
            role,
        });
    }
    Ok(entries)
}

/// Encodes a sorted adjacency list.
fn encode_adjacency(entries: &[AdjEntry]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(4 + entries.len() * ENTRY_BYTES);
    bytes.extend_from_slice(&(entries.len() as u32).to_le_bytes());
    for entry in entries {
        bytes.extend_from_slice(&entry.neighbor.to_le_bytes());
        bytes.extend_from_slice(&entry.edge.to_le_bytes());
        bytes.push(entry.role as u8);
    }
    bytes
}

/// The two mirror entries of an edge. A directed self-loop yields both an
/// outgoing and an incoming entry on the same vertex; an undirected
/// self-loop collapses to one entry.
fn mirrors(edge: &Edge) -> Vec<(Key, AdjEntry)> {
    if edge.undirected {
        if edge.source == edge.target {
            return vec![(
                edge.source,
                AdjEntry {
                    neighbor: edge.target,
                    edge: edge.id,
                    role: Role::Undirected,
                },
            )];
        }
        return vec![
            (
                edge.source,
                AdjEntry {
                    neighbor: edge.target,
                    edge: edge.id,
                    role: Role::Undirected,
                },
            ),
            (
                edge.target,
                AdjEntry {
                    neighbor: edge.source,
                    edge: edge.id,
                    role: Role::Undirected,
                },
            ),
        ];
    }
    vec![
        (
            edge.source,
            AdjEntry {
                neighbor: edge.target,
                edge: edge.id,
                role: Role::Outgoing,
            },
        ),
        (
            edge.target,
            AdjEntry {
                neighbor: edge.source,
                edge: edge.id,
                role: Role::Incoming,
            },
        ),
    ]
}

/// Runs a closure in the caller's transaction, or in a fresh one with a
/// bounded conflict-retry loop.
fn with_txn<F>(
    manager: &TransactionManager,
    txn: Option<&mut Transaction>,
    mut body: F,
) -> StrataResult<()>
where
    F: FnMut(&TransactionManager, &mut Transaction) -> StrataResult<()>,
{
    const MAX_ATTEMPTS: u32 = 64;
    match txn {
        Some(txn) => body(manager, txn),
        None => {
            for attempt in 1..=MAX_ATTEMPTS {
                let mut txn = manager.begin();
                body(manager, &mut txn)?;
                match manager.commit(&mut txn) {
                    Ok(_) => return Ok(()),
                    Err(StrataError::TransactionConflict) => {
                        debug!(attempt, "graph batch conflicted, retrying");
                    }
                    Err(other) => return Err(other),
                }
            }
            Err(StrataError::TransactionConflict)
        }
    }
}

fn read_entries(
    manager: &TransactionManager,
    txn: &mut Transaction,
    collection: CollectionId,
    vertex: Key,
) -> StrataResult<Option<Vec<AdjEntry>>> {
    match manager.get(txn, collection, vertex, true)? {
        Some(bytes) => Ok(Some(decode_adjacency(&bytes)?)),
        None => Ok(None),
    }
}

/// Inserts edges, creating missing endpoint records. Idempotent per
/// mirror: an entry already present is left alone.
pub fn upsert_edges(
    manager: &TransactionManager,
    txn: Option<&mut Transaction>,
    collection: CollectionId,
    edges: &[Edge],
) -> StrataResult<()> {
    with_txn(manager, txn, |manager, txn| {
        let mut per_vertex: std::collections::BTreeMap<Key, Vec<AdjEntry>> =
            std::collections::BTreeMap::new();
        for edge in edges {
            for (vertex, entry) in mirrors(edge) {
                per_vertex.entry(vertex).or_default().push(entry);
            }
        }
        for (vertex, additions) in per_vertex {
            let mut entries = read_entries(manager, txn, collection, vertex)?.unwrap_or_default();
            for entry in additions {
                if let Err(slot) = entries.binary_search(&entry) {
                    entries.insert(slot, entry);
                }
            }
            txn.stage_put(collection, vertex, encode_adjacency(&entries))?;
        }
        Ok(())
    })
}

/// Removes specific edge mirrors from both endpoints. Endpoint records
/// stay present (possibly empty); missing vertices are ignored.
pub fn remove_edges(
    manager: &TransactionManager,
    txn: Option<&mut Transaction>,
    collection: CollectionId,
    edges: &[Edge],
) -> StrataResult<()> {
    with_txn(manager, txn, |manager, txn| {
        let mut per_vertex: std::collections::BTreeMap<Key, Vec<AdjEntry>> =
            std::collections::BTreeMap::new();
        for edge in edges {
            for (vertex, entry) in mirrors(edge) {
                per_vertex.entry(vertex).or_default().push(entry);
            }
        }
        for (vertex, removals) in per_vertex {
            let Some(mut entries) = read_entries(manager, txn, collection, vertex)? else {
                continue;
            };
            for entry in removals {
                if let Ok(slot) = entries.binary_search(&entry) {
                    entries.remove(slot);
                }
            }
            txn.stage_put(collection, vertex, encode_adjacency(&entries))?;
        }
        Ok(())
    })
}

/// Removes vertices and every edge incident to them, from both endpoints.
pub fn remove_vertices(
    manager: &TransactionManager,
    txn: Option<&mut Transaction>,
    collection: CollectionId,
    vertices: &[Key],
) -> StrataResult<()> {
    with_txn(manager, txn, |manager, txn| {
        let doomed: std::collections::BTreeSet<Key> = vertices.iter().copied().collect();
        let mut surviving_neighbors: std::collections::BTreeSet<Key> =
            std::collections::BTreeSet::new();

        for &vertex in &doomed {
            if let Some(entries) = read_entries(manager, txn, collection, vertex)? {
                for entry in entries {
                    if !doomed.contains(&entry.neighbor) {
                        surviving_neighbors.insert(entry.neighbor);
                    }
                }
            }
        }

        for &neighbor in &surviving_neighbors {
            let Some(mut entries) = read_entries(manager, txn, collection, neighbor)? else {
                continue;
            };
            entries.retain(|entry| !doomed.contains(&entry.neighbor));
            txn.stage_put(collection, neighbor, encode_adjacency(&entries))?;
        }
        for &vertex in &doomed {
            txn.stage_erase(collection, vertex)?;
        }
        Ok(())
    })
}

/// Whether a vertex record exists.
pub fn contains_vertex(
    manager: &TransactionManager,
    txn: Option<&mut Transaction>,
    collection: CollectionId,
    vertex: Key,
) -> StrataResult<bool> {
    match txn {
        Some(txn) => Ok(manager.get(txn, collection, vertex, true)?.is_some()),
        None => {
            let snapshot = manager.committed_seq().as_u64();
            Ok(manager
                .backend()
                .len_at(collection.as_u32(), vertex, Some(snapshot))?
                .is_some())
        }
    }
}

fn load_entries(
    manager: &TransactionManager,
    txn: Option<&mut Transaction>,
    collection: CollectionId,
    vertex: Key,
) -> StrataResult<Vec<AdjEntry>> {
    let bytes = match txn {
        Some(txn) => manager.get(txn, collection, vertex, true)?,
        None => {
            let snapshot = manager.committed_seq().as_u64();
            manager
                .backend()
                .get_at(collection.as_u32(), vertex, Some(snapshot))?
        }
    };
    match bytes {
        Some(bytes) => decode_adjacency(&bytes),
        None => Ok(Vec::new()),
    }
}

/// The size of a vertex's adjacency list, optionally filtered by role.
pub fn degree(
    manager: &TransactionManager,
    txn: Option<&mut Transaction>,
    collection: CollectionId,
    vertex: Key,
    role: Option<Role>,
) -> StrataResult<usize> {
    let entries = load_entries(manager, txn, collection, vertex)?;
    Ok(match role {
        None => entries.len(),
        Some(role) => entries.iter().filter(|entry| entry.role == role).count(),
    })
}

fn entry_to_edge(vertex: Key, entry: &AdjEntry) -> Edge {
    match entry.role {
        Role::Outgoing => Edge::directed(vertex, entry.neighbor, entry.edge),
        Role::Incoming => Edge::directed(entry.neighbor, vertex, entry.edge),
        Role::Undirected => Edge::undirected(vertex, entry.neighbor, entry.edge),
    }
}

/// Edges incident to a vertex, optionally filtered by role.
pub fn edges_of(
    manager: &TransactionManager,
    txn: Option<&mut Transaction>,
    collection: CollectionId,
    vertex: Key,
    role: Option<Role>,
) -> StrataResult<Vec<Edge>> {
    let entries = load_entries(manager, txn, collection, vertex)?;
    Ok(entries
        .iter()
        .filter(|entry| role.map_or(true, |role| entry.role == role))
        .map(|entry| entry_to_edge(vertex, entry))
        .collect())
}

/// Edges connecting two specific vertices, read from `u`'s record.
pub fn edges_between(
    manager: &TransactionManager,
    txn: Option<&mut Transaction>,
    collection: CollectionId,
    u: Key,
    v: Key,
) -> StrataResult<Vec<Edge>> {
    let entries = load_entries(manager, txn, collection, u)?;
    Ok(entries
        .iter()
        .filter(|entry| entry.neighbor == v)
        .map(|entry| entry_to_edge(u, entry))
        .collect())
}

/// Every edge in the graph, each exactly once.
///
/// Directed edges are emitted from their source; undirected edges from
/// their numerically smaller endpoint (which also covers self-loops).
pub fn edges_all(
    manager: &TransactionManager,
    mut txn: Option<&mut Transaction>,
    collection: CollectionId,
) -> StrataResult<Vec<Edge>> {
    let snapshot = manager.committed_seq().as_u64();
    let vertices = match txn.as_deref_mut() {
        Some(txn) => {
            // Merge staged writes into the key listing.
            let mut keys = manager.backend().scan_keys(
                collection.as_u32(),
                Key::MIN,
                usize::MAX,
                Some(txn.snapshot_seq().as_u64()),
            )?;
            for (key, write) in txn.staged_in_collection(collection) {
                match write {
                    Some(_) => {
                        if let Err(slot) = keys.binary_search(&key) {
                            keys.insert(slot, key);
                        }
                    }
                    None => {
                        if let Ok(slot) = keys.binary_search(&key) {
                            keys.remove(slot);
                        }
                    }
                }
            }
            keys
        }
        None => {
            manager
                .backend()
                .scan_keys(collection.as_u32(), Key::MIN, usize::MAX, Some(snapshot))?
        }
    };

    let mut edges = Vec::new();
    for vertex in vertices {
        let entries = load_entries(manager, txn.as_deref_mut(), collection, vertex)?;
        for entry in &entries {
            let emit = match entry.role {
                Role::Outgoing => true,
                Role::Incoming => false,
                Role::Undirected => vertex <= entry.neighbor,
            };
            if emit {
                edges.push(entry_to_edge(vertex, entry));
            }
        }
    }
    Ok(edges)
}
