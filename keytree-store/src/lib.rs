//! Keytree Store
//!
//! Durable storage of signed entries, keyed by name hash and ordered by
//! timestamp. The `EntryStore` trait is the contract the core consumes; the
//! redb implementation is the default backend.

mod redb_store;

use std::sync::Arc;

use thiserror::Error;

use keytree_crypto::Hash;
use keytree_trie::NodeRef;
use keytree_wire::SignedEntry;

pub use redb_store::RedbStore;

/// Storage error.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The on-disk schema does not match this binary. Fatal at startup.
    #[error("invalid database schema version: found {found}, expected {expected}")]
    SchemaMismatch { found: u64, expected: u64 },

    #[error("storage error: {0}")]
    Backend(String),

    #[error("corrupt entry: {0}")]
    Corrupt(#[from] serde_json::Error),
}

impl From<redb::Error> for StoreError {
    fn from(err: redb::Error) -> Self {
        StoreError::Backend(err.to_string())
    }
}

impl From<redb::DatabaseError> for StoreError {
    fn from(err: redb::DatabaseError) -> Self {
        StoreError::Backend(err.to_string())
    }
}

impl From<redb::TransactionError> for StoreError {
    fn from(err: redb::TransactionError) -> Self {
        StoreError::Backend(err.to_string())
    }
}

impl From<redb::TableError> for StoreError {
    fn from(err: redb::TableError) -> Self {
        StoreError::Backend(err.to_string())
    }
}

impl From<redb::StorageError> for StoreError {
    fn from(err: redb::StorageError) -> Self {
        StoreError::Backend(err.to_string())
    }
}

impl From<redb::CommitError> for StoreError {
    fn from(err: redb::CommitError) -> Self {
        StoreError::Backend(err.to_string())
    }
}

/// The durable entry store the update pipeline and trackers consume.
///
/// Logical keying is `(name_hash, timestamp) → SignedEntry`; entries are
/// append-only and never deleted.
pub trait EntryStore: Send + Sync {
    /// The latest entry (maximum timestamp) for a name.
    fn read(&self, name_hash: Hash) -> Result<Option<SignedEntry>, StoreError>;

    /// The earliest entry with `timestamp >= since` for a name.
    fn read_since(&self, name_hash: Hash, since: u64) -> Result<Option<SignedEntry>, StoreError>;

    /// Atomically append a batch of entries.
    fn perform_updates(&self, updates: &[SignedEntry]) -> Result<(), StoreError>;

    /// Rebuild the full directory trie from the latest entry per name.
    /// Callers should `parallel_hash` the result before use.
    fn load(&self) -> Result<NodeRef, StoreError>;
}

/// Convenience alias used across the server.
pub type SharedStore = Arc<dyn EntryStore>;
