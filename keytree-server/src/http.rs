//! The HTTP surface: the peer protocol plus the public lookup endpoints.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use keytree_crypto::{hash_string, Hash};
use keytree_trie::{hash_of, lookup, next_leaf, Node, NodeRef};
use keytree_wire::{
    DkimStatement, Entry, LookupReply, SignedEntry, SignedRoot, SignedTrieLookup, TrieNode,
    UpdateBatch,
};

use crate::dkim::DkimProver;
use crate::server::{Server, UpdateError};

/// Most entries returned by one `browse` call.
const MAX_BROWSE_ENTRIES: usize = 10;

/// Deepest inline batching served by `trienode`.
const MAX_TRIENODE_DEPTH: u8 = 4;

#[derive(Clone)]
struct AppState {
    server: Arc<Server>,
    prover: Arc<dyn DkimProver>,
}

enum ApiError {
    BadRequest(String),
    NotFound,
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message).into_response(),
            ApiError::NotFound => (StatusCode::NOT_FOUND, "not found").into_response(),
            ApiError::Internal(message) => {
                (StatusCode::INTERNAL_SERVER_ERROR, message).into_response()
            }
        }
    }
}

impl From<UpdateError> for ApiError {
    fn from(err: UpdateError) -> Self {
        match err {
            UpdateError::Rejected(err) => ApiError::BadRequest(err.to_string()),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

/// Build the router for a server instance.
pub fn router(server: Arc<Server>, prover: Arc<dyn DkimProver>) -> Router {
    Router::new()
        .route("/keytree/lookup", get(lookup_handler))
        .route("/keytree/root", get(root_handler))
        .route("/keytree/trienode", get(trienode_handler))
        .route("/keytree/updatebatch", get(updatebatch_handler))
        .route("/keytree/history", get(history_handler))
        .route("/keytree/browse", get(browse_handler))
        .route("/keytree/submit", post(submit_handler))
        .route("/dkim/prepare", post(dkim_prepare_handler))
        .route("/dkim/poll", get(dkim_poll_handler))
        .route("/status", get(status_handler))
        .with_state(AppState { server, prover })
}

#[derive(Deserialize)]
struct NameOrHashParams {
    name: Option<String>,
    hash: Option<String>,
    since: Option<u64>,
}

impl NameOrHashParams {
    /// The name hash from either parameter; `name` wins when both appear.
    fn name_hash(&self) -> Result<Hash, ApiError> {
        if let Some(name) = &self.name {
            return Ok(hash_string(name));
        }
        if let Some(hash) = &self.hash {
            return hash
                .parse()
                .map_err(|_| ApiError::BadRequest("bad hash".to_owned()));
        }
        Err(ApiError::BadRequest("missing name or hash".to_owned()))
    }
}

async fn read_entry(state: &AppState, name_hash: Hash) -> Result<Option<SignedEntry>, ApiError> {
    let store = state.server.store().clone();
    tokio::task::spawn_blocking(move || store.read(name_hash))
        .await
        .map_err(|err| ApiError::Internal(err.to_string()))?
        .map_err(|err| ApiError::Internal(err.to_string()))
}

/// Look a name up in every known trie; return the entry plus proofs from
/// all tries whose leaf agrees with the locally stored entry.
async fn lookup_handler(
    State(state): State<AppState>,
    Query(params): Query<NameOrHashParams>,
) -> Result<Json<LookupReply>, ApiError> {
    let name_hash = params.name_hash()?;

    let entry = read_entry(&state, name_hash).await?.map(|u| u.entry);
    let entry_hash = entry.as_ref().map(|e| e.hash()).unwrap_or(Hash::EMPTY);

    let tries: Vec<(String, NodeRef, SignedRoot)> = {
        let server_state = state.server.state.lock().unwrap();
        server_state
            .all_tries
            .iter()
            .filter_map(|(public_key, trie)| {
                trie.signed_root
                    .clone()
                    .map(|signed| (public_key.clone(), trie.root.clone(), signed))
            })
            .collect()
    };

    let mut signed_trie_lookups = BTreeMap::new();
    for (public_key, root, signed_root) in tries {
        let (trie_lookup, leaf) = lookup(root.as_ref(), &name_hash);
        let leaf_hash = leaf.map(|l| l.entry_hash).unwrap_or(Hash::EMPTY);
        if leaf_hash == entry_hash {
            signed_trie_lookups.insert(
                public_key,
                SignedTrieLookup {
                    signed_root,
                    trie_lookup,
                },
            );
        }
    }

    Ok(Json(LookupReply {
        signed_trie_lookups,
        entry,
    }))
}

async fn root_handler(State(state): State<AppState>) -> Result<Json<SignedRoot>, ApiError> {
    state
        .server
        .signed_root()
        .map(Json)
        .ok_or_else(|| ApiError::Internal("no signed root yet".to_owned()))
}

#[derive(Deserialize)]
struct TrieNodeParams {
    hash: String,
    depth: Option<u8>,
}

fn wire_trie_node(node: &Arc<Node>, depth: u8) -> TrieNode {
    if let Some(leaf) = node.leaf() {
        return TrieNode {
            leaf: Some(*leaf),
            ..Default::default()
        };
    }

    let children = node.children();
    if depth == 0 {
        return TrieNode {
            child_hashes: Some([
                hash_of(children[0].as_ref()),
                hash_of(children[1].as_ref()),
            ]),
            ..Default::default()
        };
    }

    let inline = |child: &NodeRef| {
        child
            .as_ref()
            .map(|c| Box::new(wire_trie_node(c, depth - 1)))
    };
    TrieNode {
        children: Some([inline(&children[0]), inline(&children[1])]),
        ..Default::default()
    }
}

async fn trienode_handler(
    State(state): State<AppState>,
    Query(params): Query<TrieNodeParams>,
) -> Result<Json<TrieNode>, ApiError> {
    let hash: Hash = params
        .hash
        .parse()
        .map_err(|_| ApiError::BadRequest("bad hash".to_owned()))?;
    let depth = params.depth.unwrap_or(0);
    if depth > MAX_TRIENODE_DEPTH {
        return Err(ApiError::BadRequest("depth out of range".to_owned()));
    }

    let node = state.server.dedup().find_only(hash).ok_or(ApiError::NotFound)?;
    Ok(Json(wire_trie_node(&node, depth)))
}

#[derive(Deserialize)]
struct UpdateBatchParams {
    hash: String,
}

async fn updatebatch_handler(
    State(state): State<AppState>,
    Query(params): Query<UpdateBatchParams>,
) -> Result<Json<UpdateBatch>, ApiError> {
    let hash: Hash = params
        .hash
        .parse()
        .map_err(|_| ApiError::BadRequest("bad hash".to_owned()))?;

    state
        .server
        .update_cache()
        .get(hash)
        .await
        .map(Json)
        .ok_or(ApiError::NotFound)
}

async fn history_handler(
    State(state): State<AppState>,
    Query(params): Query<NameOrHashParams>,
) -> Result<Json<SignedEntry>, ApiError> {
    let name_hash = params.name_hash()?;
    let since = params.since.unwrap_or(0);

    let store = state.server.store().clone();
    let update = tokio::task::spawn_blocking(move || store.read_since(name_hash, since))
        .await
        .map_err(|err| ApiError::Internal(err.to_string()))?
        .map_err(|err| ApiError::Internal(err.to_string()))?;

    update.map(Json).ok_or(ApiError::NotFound)
}

#[derive(Deserialize)]
struct BrowseParams {
    hash: Option<String>,
}

/// Walk the local trie from a starting hash, returning up to ten entries in
/// name-hash order.
async fn browse_handler(
    State(state): State<AppState>,
    Query(params): Query<BrowseParams>,
) -> Result<Json<Vec<Entry>>, ApiError> {
    let mut cursor = match &params.hash {
        Some(hash) => hash
            .parse()
            .map_err(|_| ApiError::BadRequest("bad hash".to_owned()))?,
        None => Hash::EMPTY,
    };

    let root = state.server.local_root();
    let mut entries = Vec::new();
    while entries.len() < MAX_BROWSE_ENTRIES {
        let Some(leaf) = next_leaf(root.as_ref(), &cursor) else {
            break;
        };
        cursor = leaf.name_hash;
        if let Some(update) = read_entry(&state, leaf.name_hash).await? {
            entries.push(update.entry);
        }
    }

    Ok(Json(entries))
}

async fn submit_handler(
    State(state): State<AppState>,
    Json(update): Json<SignedEntry>,
) -> Result<Json<()>, ApiError> {
    state.server.submit(update).await?;
    Ok(Json(()))
}

async fn dkim_prepare_handler(
    State(state): State<AppState>,
    Json(statement): Json<DkimStatement>,
) -> Result<Json<String>, ApiError> {
    state
        .prover
        .prepare(statement)
        .await
        .map(Json)
        .ok_or(ApiError::NotFound)
}

#[derive(Deserialize)]
struct DkimPollParams {
    email: String,
}

async fn dkim_poll_handler(
    State(state): State<AppState>,
    Query(params): Query<DkimPollParams>,
) -> Result<Json<keytree_wire::DkimStatus>, ApiError> {
    state
        .prover
        .poll(&params.email)
        .await
        .map(Json)
        .ok_or(ApiError::NotFound)
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct Status {
    public_key: String,
    upstream: Vec<crate::config::ServerInfo>,
    total_nodes: usize,
}

async fn status_handler(State(state): State<AppState>) -> Json<Status> {
    Json(Status {
        public_key: state.server.public_key().to_owned(),
        upstream: state.server.upstream().to_vec(),
        total_nodes: state.server.dedup().num_nodes(),
    })
}
