//! HTTP client for the keytree peer protocol.

use std::time::Duration;

use thiserror::Error;

use keytree_crypto::Hash;

use crate::types::{LookupReply, SignedEntry, SignedRoot, TrieNode, UpdateBatch};

/// Error talking to a peer.
#[derive(Debug, Error)]
pub enum WireError {
    /// The peer does not have the requested item (404). For `update_batch`
    /// this means our root has fallen out of the peer's backlog ring.
    #[error("not found")]
    NotFound,

    /// The peer rejected the request as malformed (400).
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("unexpected status {0}")]
    Status(u16),

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

/// Client for one upstream keytree server.
///
/// `update_batch` long-polls, so the underlying client has no overall
/// request timeout; only connecting is bounded.
pub struct KeytreeClient {
    http: reqwest::Client,
    base: String,
}

impl KeytreeClient {
    pub fn new(address: &str) -> Result<KeytreeClient, WireError> {
        let base = if address.contains("://") {
            address.trim_end_matches('/').to_owned()
        } else {
            format!("http://{}", address.trim_end_matches('/'))
        };
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(KeytreeClient { http, base })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, WireError> {
        let response = self
            .http
            .get(format!("{}{}", self.base, path))
            .query(query)
            .send()
            .await?;
        match response.status().as_u16() {
            200 => Ok(response.json().await?),
            404 => Err(WireError::NotFound),
            400 => Err(WireError::BadRequest(response.text().await.unwrap_or_default())),
            status => Err(WireError::Status(status)),
        }
    }

    /// The peer's current signed root.
    pub async fn root(&self) -> Result<SignedRoot, WireError> {
        self.get_json("/keytree/root", &[]).await
    }

    /// Fetch a trie node by hash, with up to `depth` levels of children
    /// batched inline.
    pub async fn trie_node(&self, hash: Hash, depth: u8) -> Result<TrieNode, WireError> {
        self.get_json(
            "/keytree/trienode",
            &[("hash", hash.to_string()), ("depth", depth.to_string())],
        )
        .await
    }

    /// Fetch the batch transitioning away from `root_hash`. Blocks until the
    /// peer commits a transition if `root_hash` is its current root.
    pub async fn update_batch(&self, root_hash: Hash) -> Result<UpdateBatch, WireError> {
        self.get_json("/keytree/updatebatch", &[("hash", root_hash.to_string())])
            .await
    }

    /// The oldest signed entry for `name_hash` with timestamp >= `since`,
    /// or `None` when the history is exhausted.
    pub async fn history(
        &self,
        name_hash: Hash,
        since: u64,
    ) -> Result<Option<SignedEntry>, WireError> {
        match self
            .get_json(
                "/keytree/history",
                &[("hash", name_hash.to_string()), ("since", since.to_string())],
            )
            .await
        {
            Ok(entry) => Ok(Some(entry)),
            Err(WireError::NotFound) => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Look up a name hash, returning the entry and agreeing proofs.
    pub async fn lookup(&self, name_hash: Hash) -> Result<LookupReply, WireError> {
        self.get_json("/keytree/lookup", &[("hash", name_hash.to_string())])
            .await
    }

    /// Submit a signed entry to the peer's update pipeline.
    pub async fn submit(&self, update: &SignedEntry) -> Result<(), WireError> {
        let response = self
            .http
            .post(format!("{}/keytree/submit", self.base))
            .json(update)
            .send()
            .await?;
        match response.status().as_u16() {
            200 => Ok(()),
            400 => Err(WireError::BadRequest(response.text().await.unwrap_or_default())),
            404 => Err(WireError::NotFound),
            status => Err(WireError::Status(status)),
        }
    }
}
