//! Keytree Wire
//!
//! The JSON wire vocabulary shared by servers, mirrors, and clients:
//! - **Entry / SignedEntry**: the directory records and their signatures
//! - **TrieLeaf / TrieNode**: trie material as it travels between peers
//! - **Root / SignedRoot / UpdateBatch**: signed snapshots and transitions
//! - **TrieLookup**: the sparse Merkle lookup proof
//! - **KeytreeClient**: HTTP client for the peer protocol, with backoff
//!
//! JSON field names are PascalCase; hashes are canonical base32 strings;
//! empty maps are omitted and unknown fields tolerated.

mod backoff;
mod client;
mod hashes;
mod types;

pub use backoff::Backoff;
pub use client::{KeytreeClient, WireError};
pub use hashes::Hashes;
pub use types::{
    DkimStatement, DkimStatus, Entry, LookupReply, Root, SignedEntry, SignedRoot,
    SignedTrieLookup, TrieLeaf, TrieLookup, TrieNode, UpdateBatch,
};
