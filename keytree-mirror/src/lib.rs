//! Keytree Mirror
//!
//! Anti-entropy downloading of a remote trie. Given a root hash published by
//! a peer, the coordinator fetches the missing nodes with many parallel
//! requests, reusing everything already interned in the shared dedup and
//! falling back to the previous known trie for subtrees that fail.

mod fetch;

pub use fetch::{Coordinator, FetchError, FETCH_PARALLELISM};
