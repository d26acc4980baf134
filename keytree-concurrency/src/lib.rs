//! Keytree Concurrency
//!
//! Locking building blocks used by the trackers and the anti-entropy
//! fetchers:
//! - **HashLocker**: per-hash mutexes with refcounted lifetime
//! - **PrioritySemaphore**: a counting semaphore whose waiters wake in
//!   priority order
//! - **lock_both**: deadlock-free acquisition of two locks via try-lock
//!   backoff

mod hash_locker;
mod priority_semaphore;
mod try_lock;

pub use hash_locker::{HashGuard, HashLocker};
pub use priority_semaphore::{Permit, PrioritySemaphore};
pub use try_lock::{lock_both, KeyLock, PriorityLock, TryLockable};
