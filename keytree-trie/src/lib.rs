//! Keytree Trie
//!
//! A persistent radix-2 Merkle trie keyed by 256-bit hashes:
//! - **Node**: immutable, structurally shared, with a cached Merkle hash
//! - **set/get/split/lookup/next_leaf**: the trie operations
//! - **complete_lookup**: recompute a root hash from a lookup proof
//! - **parallel_hash**: warm the hash cache with bounded fanout
//! - **Dedup**: content-addressed, refcounted arena shared across tries
//!
//! Empty subtrees hash to the empty value and an internal node with a single
//! leaf child collapses to that leaf, so the same leaf set always produces
//! the same root hash regardless of insertion order.

mod dedup;
mod node;
mod parallel;
mod proof;

pub use dedup::Dedup;
pub use node::{
    get, hash_of, leaf_count, lookup, merge, next_leaf, node_count, set, split, Node, NodeRef,
};
pub use parallel::parallel_hash;
pub use proof::complete_lookup;
