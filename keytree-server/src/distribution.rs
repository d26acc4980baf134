//! Distribution caches: recent update batches and recent pinned tries.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;

use keytree_crypto::Hash;
use keytree_trie::{hash_of, Dedup, NodeRef};
use keytree_wire::UpdateBatch;

struct UpdateCacheInner {
    current: Hash,
    batches: HashMap<Hash, UpdateBatch>,
    ring: Vec<Hash>,
    index: usize,
}

/// A bounded ring of recent update batches, keyed by the root they
/// transition *from*, so a peer on root `h` can jump forward with a single
/// request.
///
/// A request for the current root long-polls: it suspends until the next
/// commit and then returns the batch published for it.
pub struct UpdateCache {
    inner: Mutex<UpdateCacheInner>,
    notify: Notify,
}

impl UpdateCache {
    pub fn new(current: Hash, capacity: usize) -> UpdateCache {
        UpdateCache {
            inner: Mutex::new(UpdateCacheInner {
                current,
                batches: HashMap::new(),
                ring: vec![Hash::EMPTY; capacity],
                index: 0,
            }),
            notify: Notify::new(),
        }
    }

    /// Publish the batch that transitions the current root to `new_hash`,
    /// evicting the oldest entry, and wake all long-pollers.
    pub fn add(&self, new_hash: Hash, batch: UpdateBatch) {
        {
            let mut guard = self.inner.lock().unwrap();
            let inner = &mut *guard;

            let evicted = inner.ring[inner.index];
            inner.batches.remove(&evicted);

            let prev = inner.current;
            inner.batches.insert(prev, batch);
            inner.ring[inner.index] = prev;

            if new_hash != prev {
                inner.index = (inner.index + 1) % inner.ring.len();
                inner.current = new_hash;
            }
        }
        self.notify.notify_waiters();
    }

    /// The batch transitioning away from `hash`, if still in the ring.
    /// Suspends until the next commit when `hash` is the current root.
    pub async fn get(&self, hash: Hash) -> Option<UpdateBatch> {
        let notified = self.notify.notified();
        tokio::pin!(notified);
        // Register interest before inspecting the state, so a commit landing
        // between the check and the await still wakes us.
        notified.as_mut().enable();
        {
            let inner = self.inner.lock().unwrap();
            if inner.current != hash {
                return inner.batches.get(&hash).cloned();
            }
        }
        notified.await;

        let inner = self.inner.lock().unwrap();
        inner.batches.get(&hash).cloned()
    }

    pub fn current(&self) -> Hash {
        self.inner.lock().unwrap().current
    }
}

/// Pins the last N local roots in dedup so peers running anti-entropy can
/// observe a recently advertised trie stably.
///
/// Tries sit in a circular last-in queue; setting a new current trie interns
/// it before releasing the evicted one, so shared structure never leaves
/// dedup in between.
pub struct TrieCache {
    dedup: Arc<Dedup>,
    recent: Vec<NodeRef>,
    index: usize,
}

impl TrieCache {
    pub fn new(dedup: Arc<Dedup>, capacity: usize) -> TrieCache {
        TrieCache {
            dedup,
            recent: vec![None; capacity],
            index: 0,
        }
    }

    /// Pin `root` as the current trie, returning its interned form. Setting
    /// a trie equal to the current one is a no-op.
    pub fn set_current(&mut self, root: NodeRef) -> NodeRef {
        if hash_of(self.recent[self.index].as_ref()) == hash_of(root.as_ref()) {
            return self.recent[self.index].clone();
        }

        let root = self.dedup.add(root.as_ref());

        self.index = (self.index + 1) % self.recent.len();
        self.dedup.remove(self.recent[self.index].as_ref());
        self.recent[self.index] = root.clone();

        root
    }
}
