//! The fetch coordinator.
//!
//! Invariants, shared with the rest of the system:
//! - nodes returned from `fetch` carry one dedup reference for the caller
//! - two concurrent fetches of the same hash never both hit the network:
//!   the per-hash lock serializes them and the second finds the node the
//!   first interned
//! - partial progress is interned even on error or cancellation, so a retry
//!   resumes instead of restarting

use std::sync::Arc;

use futures::future::BoxFuture;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use keytree_concurrency::{lock_both, HashLocker, PrioritySemaphore};
use keytree_crypto::{Hash, HASH_BITS};
use keytree_trie::{split, Dedup, Node, NodeRef};
use keytree_wire::{KeytreeClient, TrieNode, WireError};

/// Concurrent node fetches per coordinator, shared across all fetchers.
pub const FETCH_PARALLELISM: usize = 8;

/// Levels of children requested inline per `trienode` call.
const BATCH_DEPTH: u8 = 4;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("fetch cancelled")]
    Cancelled,

    #[error("trie too deep")]
    TooDeep,

    /// The peer returned a node that does not hash to what it claimed.
    #[error("bad hash from peer")]
    BadHash,

    #[error(transparent)]
    Wire(#[from] WireError),
}

/// Coordinates anti-entropy downloads across all peers of a server.
///
/// Requests are capped by a depth-prioritized semaphore, so permits flow to
/// nodes near the leaves; a per-hash lock table deduplicates concurrent
/// fetches of the same node across fetchers.
pub struct Coordinator {
    dedup: Arc<Dedup>,
    semaphore: PrioritySemaphore,
    locks: HashLocker,
}

impl Coordinator {
    pub fn new(dedup: Arc<Dedup>, parallelism: usize) -> Coordinator {
        Coordinator {
            dedup,
            semaphore: PrioritySemaphore::new(parallelism),
            locks: HashLocker::new(),
        }
    }

    pub fn dedup(&self) -> &Arc<Dedup> {
        &self.dedup
    }

    /// Download the trie rooted at `hash` from `conn`.
    ///
    /// `old` is the previous known trie from this peer; subtrees that cannot
    /// be fetched fall back to the matching `old` subtree. On error the
    /// partially fetched node is returned along with the first failure, so
    /// the caller can keep the data and retry later. The returned node
    /// carries one dedup reference either way.
    pub async fn fetch(
        &self,
        ctx: &CancellationToken,
        conn: &KeytreeClient,
        hash: Hash,
        old: NodeRef,
    ) -> (NodeRef, Result<(), FetchError>) {
        self.fetch_node(ctx, conn, hash, 0, old, None).await
    }

    fn fetch_node<'a>(
        &'a self,
        ctx: &'a CancellationToken,
        conn: &'a KeytreeClient,
        hash: Hash,
        depth: usize,
        old: NodeRef,
        prefetched: Option<TrieNode>,
    ) -> BoxFuture<'a, (NodeRef, Result<(), FetchError>)> {
        Box::pin(async move {
            if hash.is_empty() {
                return (self.dedup.add(old.as_ref()), Ok(()));
            }
            if depth > HASH_BITS {
                return (self.dedup.add(old.as_ref()), Err(FetchError::TooDeep));
            }

            // Fast path: someone already interned this subtree.
            if let Some(node) = self.dedup.find_and_add(hash) {
                return (Some(node), Ok(()));
            }

            let (permit, _hash_guard) = lock_both(
                &self.semaphore.lock_for(depth),
                &self.locks.lock_for(hash),
            )
            .await;

            // A concurrent fetch of the same hash finished while we waited.
            if let Some(node) = self.dedup.find_and_add(hash) {
                return (Some(node), Ok(()));
            }

            if ctx.is_cancelled() {
                return (self.dedup.add(old.as_ref()), Err(FetchError::Cancelled));
            }

            // Use the inline child from a batched parent reply when its hash
            // still matches; otherwise go to the network.
            let wire_node = match prefetched {
                Some(node) if node.computed_hash() == hash => node,
                _ => match conn.trie_node(hash, BATCH_DEPTH).await {
                    Ok(node) => node,
                    Err(err) => {
                        return (self.dedup.add(old.as_ref()), Err(err.into()));
                    }
                },
            };

            if !wire_node.check() || wire_node.computed_hash() != hash {
                return (self.dedup.add(old.as_ref()), Err(FetchError::BadHash));
            }

            if let Some(leaf) = wire_node.leaf {
                let node = self
                    .dedup
                    .add_with_children_already_added(Node::new_leaf(leaf));
                return (Some(node), Ok(()));
            }

            let (child_hashes, inline_children) = match (wire_node.child_hashes, wire_node.children)
            {
                (Some(hashes), _) => (hashes, [None, None]),
                (None, Some(children)) => {
                    let hash_of_child = |c: &Option<Box<TrieNode>>| {
                        c.as_ref().map(|n| n.computed_hash()).unwrap_or(Hash::EMPTY)
                    };
                    let hashes = [hash_of_child(&children[0]), hash_of_child(&children[1])];
                    let [left, right] = children;
                    (hashes, [left.map(|b| *b), right.map(|b| *b)])
                }
                (None, None) => {
                    return (self.dedup.add(old.as_ref()), Err(FetchError::BadHash));
                }
            };

            // Release the permit before recursing so child work is not
            // serialized behind our slot.
            drop(permit);

            let [old_left, old_right] = split(old.as_ref(), depth);
            let [inline_left, inline_right] = inline_children;
            let (left, right) = futures::join!(
                self.fetch_node(ctx, conn, child_hashes[0], depth + 1, old_left, inline_left),
                self.fetch_node(ctx, conn, child_hashes[1], depth + 1, old_right, inline_right),
            );

            let (left_node, left_result) = left;
            let (right_node, right_result) = right;
            let result = left_result.and(right_result);

            // When the pair collapses to a lone leaf child, that child's
            // dedup reference passes through to the caller unchanged;
            // interning it again would double-count it.
            let is_lone_leaf = |a: &NodeRef, b: &NodeRef| {
                b.is_none() && a.as_ref().map_or(false, |n| n.leaf().is_some())
            };
            if left_node.is_none() && right_node.is_none() {
                return (None, result);
            }
            if is_lone_leaf(&left_node, &right_node) {
                return (left_node, result);
            }
            if is_lone_leaf(&right_node, &left_node) {
                return (right_node, result);
            }

            let node = self
                .dedup
                .add_with_children_already_added(Node::new_internal([left_node, right_node]));
            (Some(node), result)
        })
    }
}
