//! Deadlock-free acquisition of two heterogeneous locks.

use async_trait::async_trait;

use keytree_crypto::Hash;

use crate::hash_locker::{HashGuard, HashLocker};
use crate::priority_semaphore::{Permit, PrioritySemaphore};

/// A lock that can be taken unconditionally or attempted without waiting.
#[async_trait]
pub trait TryLockable: Send + Sync {
    type Guard: Send;

    async fn lock(&self) -> Self::Guard;
    fn try_lock(&self) -> Option<Self::Guard>;
}

/// Acquire both locks without imposing a global lock order.
///
/// Lock one side, then try the other; on failure release everything and
/// retry from the other side. Neither lock is ever held while blocking on
/// the other, so two callers acquiring in opposite orders cannot deadlock.
pub async fn lock_both<A, B>(a: &A, b: &B) -> (A::Guard, B::Guard)
where
    A: TryLockable,
    B: TryLockable,
{
    loop {
        let guard_a = a.lock().await;
        if let Some(guard_b) = b.try_lock() {
            return (guard_a, guard_b);
        }
        drop(guard_a);

        let guard_b = b.lock().await;
        if let Some(guard_a) = a.try_lock() {
            return (guard_a, guard_b);
        }
        drop(guard_b);
    }
}

/// A `PrioritySemaphore` bound to one priority.
pub struct PriorityLock {
    sem: PrioritySemaphore,
    priority: usize,
}

impl PrioritySemaphore {
    pub fn lock_for(&self, priority: usize) -> PriorityLock {
        PriorityLock {
            sem: self.clone(),
            priority,
        }
    }
}

#[async_trait]
impl TryLockable for PriorityLock {
    type Guard = Permit;

    async fn lock(&self) -> Permit {
        self.sem.acquire(self.priority).await
    }

    fn try_lock(&self) -> Option<Permit> {
        self.sem.try_acquire()
    }
}

/// A `HashLocker` bound to one hash.
pub struct KeyLock {
    locker: HashLocker,
    hash: Hash,
}

impl HashLocker {
    pub fn lock_for(&self, hash: Hash) -> KeyLock {
        KeyLock {
            locker: self.clone(),
            hash,
        }
    }
}

#[async_trait]
impl TryLockable for KeyLock {
    type Guard = HashGuard;

    async fn lock(&self) -> HashGuard {
        self.locker.lock(self.hash).await
    }

    fn try_lock(&self) -> Option<HashGuard> {
        self.locker.try_lock(self.hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keytree_crypto::hash_string;
    use std::time::Duration;

    #[tokio::test]
    async fn acquires_both_under_contention() {
        let sem = PrioritySemaphore::new(1);
        let locker = HashLocker::new();
        let hash = hash_string("both");

        let mut tasks = Vec::new();
        for i in 0..16 {
            let sem = sem.clone();
            let locker = locker.clone();
            tasks.push(tokio::spawn(async move {
                // Half the tasks contend on the same hash, half on others, so
                // both lock orders are exercised.
                let h = if i % 2 == 0 { hash } else { hash_string("other") };
                let (permit, guard) = lock_both(&sem.lock_for(i), &locker.lock_for(h)).await;
                tokio::time::sleep(Duration::from_millis(1)).await;
                drop(guard);
                drop(permit);
            }));
        }

        for task in tasks {
            tokio::time::timeout(Duration::from_secs(10), task)
                .await
                .expect("lock_both deadlocked")
                .unwrap();
        }
    }
}
