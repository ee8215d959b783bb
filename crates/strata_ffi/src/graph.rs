//! Graph modality entry points.

use crate::database::db_ref;
use crate::error::{clear_last_error, set_last_error, status_of, StrataStatus};
use crate::transaction::txn_mut;
use crate::types::{strided_get, StrataDb, StrataOptions, StrataRole, StrataTxn};
use strata_core::{CollectionId, Edge, EDGE_ID_ANON};

/// Batched edge request, shared by upsert and removal.
#[repr(C)]
pub struct StrataGraphEdges {
    /// Database handle.
    pub db: *mut StrataDb,
    /// Optional transaction handle; without one the batch opens its own
    /// transaction and retries on conflict.
    pub transaction: *mut StrataTxn,
    /// Per-call options.
    pub options: StrataOptions,
    /// Graph collection.
    pub collection: u32,

    /// Number of edges.
    pub edges_count: usize,
    /// Strided source vertices.
    pub sources: *const i64,
    /// Stride over `sources`, in bytes.
    pub sources_stride: usize,
    /// Strided target vertices.
    pub targets: *const i64,
    /// Stride over `targets`, in bytes.
    pub targets_stride: usize,
    /// Strided edge ids; null broadcasts the anonymous-edge sentinel.
    pub edge_ids: *const i64,
    /// Stride over `edge_ids`, in bytes.
    pub edge_ids_stride: usize,
    /// Strided undirected flags; null means every edge is directed.
    pub undirected: *const u8,
    /// Stride over `undirected`, in bytes.
    pub undirected_stride: usize,
}

unsafe fn collect_edges(request: &StrataGraphEdges) -> Result<Vec<Edge>, StrataStatus> {
    if (request.sources.is_null() || request.targets.is_null()) && request.edges_count > 0 {
        set_last_error("null endpoint pointer");
        return Err(StrataStatus::ArgsWrong);
    }
    let mut edges = Vec::with_capacity(request.edges_count);
    for i in 0..request.edges_count {
        let source = strided_get(request.sources, request.sources_stride, i);
        let target = strided_get(request.targets, request.targets_stride, i);
        let id = if request.edge_ids.is_null() {
            EDGE_ID_ANON
        } else {
            strided_get(request.edge_ids, request.edge_ids_stride, i)
        };
        let undirected = if request.undirected.is_null() {
            false
        } else {
            strided_get(request.undirected, request.undirected_stride, i) != 0
        };
        edges.push(Edge {
            source,
            target,
            id,
            undirected,
        });
    }
    Ok(edges)
}

/// Inserts edges, creating missing endpoint records.
///
/// # Safety
///
/// `request` and every pointer inside it must satisfy the field docs.
#[no_mangle]
pub unsafe extern "C" fn strata_graph_upsert(request: *mut StrataGraphEdges) -> StrataStatus {
    clear_last_error();
    let Some(request) = request.as_mut() else {
        set_last_error("null request");
        return StrataStatus::ArgsWrong;
    };
    let Some(db) = db_ref(request.db) else {
        set_last_error("null database handle");
        return StrataStatus::UninitializedState;
    };
    let edges = match collect_edges(request) {
        Ok(edges) => edges,
        Err(status) => return status,
    };
    let txn = txn_mut(request.transaction);
    match db.graph_upsert(txn, CollectionId::new(request.collection), &edges) {
        Ok(()) => StrataStatus::Ok,
        Err(error) => status_of(&error),
    }
}

/// Removes specific edge mirrors from both endpoints.
///
/// # Safety
///
/// `request` and every pointer inside it must satisfy the field docs.
#[no_mangle]
pub unsafe extern "C" fn strata_graph_remove_edges(
    request: *mut StrataGraphEdges,
) -> StrataStatus {
    clear_last_error();
    let Some(request) = request.as_mut() else {
        set_last_error("null request");
        return StrataStatus::ArgsWrong;
    };
    let Some(db) = db_ref(request.db) else {
        set_last_error("null database handle");
        return StrataStatus::UninitializedState;
    };
    let edges = match collect_edges(request) {
        Ok(edges) => edges,
        Err(status) => return status,
    };
    let txn = txn_mut(request.transaction);
    match db.graph_remove_edges(txn, CollectionId::new(request.collection), &edges) {
        Ok(()) => StrataStatus::Ok,
        Err(error) => status_of(&error),
    }
}

/// Batched vertex-removal request.
#[repr(C)]
pub struct StrataGraphRemoveVertices {
    /// Database handle.
    pub db: *mut StrataDb,
    /// Optional transaction handle.
    pub transaction: *mut StrataTxn,
    /// Per-call options.
    pub options: StrataOptions,
    /// Graph collection.
    pub collection: u32,

    /// Number of vertices.
    pub vertices_count: usize,
    /// Strided vertex ids.
    pub vertices: *const i64,
    /// Stride over `vertices`, in bytes.
    pub vertices_stride: usize,
}

/// Removes vertices and every incident edge, atomically per batch.
///
/// # Safety
///
/// `request` and every pointer inside it must satisfy the field docs.
#[no_mangle]
pub unsafe extern "C" fn strata_graph_remove_vertices(
    request: *mut StrataGraphRemoveVertices,
) -> StrataStatus {
    clear_last_error();
    let Some(request) = request.as_mut() else {
        set_last_error("null request");
        return StrataStatus::ArgsWrong;
    };
    let Some(db) = db_ref(request.db) else {
        set_last_error("null database handle");
        return StrataStatus::UninitializedState;
    };
    if request.vertices.is_null() && request.vertices_count > 0 {
        set_last_error("null vertices pointer");
        return StrataStatus::ArgsWrong;
    }
    let vertices: Vec<i64> = (0..request.vertices_count)
        .map(|i| strided_get(request.vertices, request.vertices_stride, i))
        .collect();
    let txn = txn_mut(request.transaction);
    match db.graph_remove_vertices(txn, CollectionId::new(request.collection), &vertices) {
        Ok(()) => StrataStatus::Ok,
        Err(error) => status_of(&error),
    }
}

/// Whether a vertex record exists; writes 0/1 to `out_contains`.
///
/// # Safety
///
/// `db` must be a valid database handle; `out_contains` a valid pointer.
#[no_mangle]
pub unsafe extern "C" fn strata_graph_contains(
    db: *mut StrataDb,
    transaction: *mut StrataTxn,
    collection: u32,
    vertex: i64,
    out_contains: *mut u8,
) -> StrataStatus {
    clear_last_error();
    let Some(db) = db_ref(db) else {
        set_last_error("null database handle");
        return StrataStatus::UninitializedState;
    };
    if out_contains.is_null() {
        set_last_error("null output pointer");
        return StrataStatus::ArgsWrong;
    }
    let txn = txn_mut(transaction);
    match db.graph_contains(txn, CollectionId::new(collection), vertex) {
        Ok(contains) => {
            *out_contains = u8::from(contains);
            StrataStatus::Ok
        }
        Err(error) => status_of(&error),
    }
}

/// Adjacency-list size, optionally filtered by role.
///
/// # Safety
///
/// `db` must be a valid database handle; `out_degree` a valid pointer.
#[no_mangle]
pub unsafe extern "C" fn strata_graph_degree(
    db: *mut StrataDb,
    transaction: *mut StrataTxn,
    collection: u32,
    vertex: i64,
    role: StrataRole,
    out_degree: *mut usize,
) -> StrataStatus {
    clear_last_error();
    let Some(db) = db_ref(db) else {
        set_last_error("null database handle");
        return StrataStatus::UninitializedState;
    };
    if out_degree.is_null() {
        set_last_error("null output pointer");
        return StrataStatus::ArgsWrong;
    }
    let txn = txn_mut(transaction);
    match db.graph_degree(txn, CollectionId::new(collection), vertex, role.filter()) {
        Ok(degree) => {
            *out_degree = degree;
            StrataStatus::Ok
        }
        Err(error) => status_of(&error),
    }
}
