//! Per-hash mutual exclusion with refcounted lock lifetime.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::OwnedMutexGuard;

use keytree_crypto::Hash;

struct LockEntry {
    refs: usize,
    mutex: Arc<tokio::sync::Mutex<()>>,
}

struct Inner {
    locks: Mutex<HashMap<Hash, LockEntry>>,
}

/// A table of per-hash locks. An entry exists only while some task holds or
/// waits for that hash, so the table stays as small as the working set.
///
/// `try_lock` is stricter than a conventional try-lock: it succeeds only
/// when the hash has no entry at all, which is what the two-lock acquisition
/// in `lock_both` needs.
#[derive(Clone)]
pub struct HashLocker {
    inner: Arc<Inner>,
}

/// Holds a hash's lock until dropped.
pub struct HashGuard {
    inner: Arc<Inner>,
    hash: Hash,
    _guard: OwnedMutexGuard<()>,
}

impl Drop for HashGuard {
    fn drop(&mut self) {
        let mut locks = self.inner.locks.lock().unwrap();
        if let Some(entry) = locks.get_mut(&self.hash) {
            entry.refs -= 1;
            if entry.refs == 0 {
                locks.remove(&self.hash);
            }
        }
    }
}

impl HashLocker {
    pub fn new() -> HashLocker {
        HashLocker {
            inner: Arc::new(Inner {
                locks: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Lock `hash`, waiting for the current holder if necessary.
    pub async fn lock(&self, hash: Hash) -> HashGuard {
        let mutex = {
            let mut locks = self.inner.locks.lock().unwrap();
            let entry = locks.entry(hash).or_insert_with(|| LockEntry {
                refs: 0,
                mutex: Arc::new(tokio::sync::Mutex::new(())),
            });
            entry.refs += 1;
            entry.mutex.clone()
        };

        let guard = mutex.lock_owned().await;
        HashGuard {
            inner: self.inner.clone(),
            hash,
            _guard: guard,
        }
    }

    /// Lock `hash` only if nobody holds or waits for it.
    pub fn try_lock(&self, hash: Hash) -> Option<HashGuard> {
        let mut locks = self.inner.locks.lock().unwrap();
        if locks.contains_key(&hash) {
            return None;
        }

        let mutex = Arc::new(tokio::sync::Mutex::new(()));
        let guard = mutex
            .clone()
            .try_lock_owned()
            .expect("freshly created mutex is unlocked");
        locks.insert(hash, LockEntry { refs: 1, mutex });

        Some(HashGuard {
            inner: self.inner.clone(),
            hash,
            _guard: guard,
        })
    }
}

impl Default for HashLocker {
    fn default() -> Self {
        HashLocker::new()
    }
}
