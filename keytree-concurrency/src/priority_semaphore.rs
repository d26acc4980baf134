//! Counting semaphore with priority-ordered waiters.

use std::collections::BinaryHeap;
use std::sync::{Arc, Mutex};

use tokio::sync::oneshot;

struct Waiter {
    priority: usize,
    seq: u64,
    tx: oneshot::Sender<()>,
}

impl PartialEq for Waiter {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for Waiter {}

impl PartialOrd for Waiter {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Waiter {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Highest priority first; equal priorities wake in arrival order.
        self.priority
            .cmp(&other.priority)
            .then(other.seq.cmp(&self.seq))
    }
}

struct State {
    capacity: usize,
    waiting: BinaryHeap<Waiter>,
    next_seq: u64,
}

/// A semaphore that wakes its highest-priority waiter first.
///
/// The fetch coordinator uses trie depth as the priority, so permits flow to
/// nodes near the leaves and progress appears as finished subtrees rather
/// than a stalled wide frontier.
#[derive(Clone)]
pub struct PrioritySemaphore {
    state: Arc<Mutex<State>>,
}

/// One unit of semaphore capacity; released on drop.
pub struct Permit {
    state: Arc<Mutex<State>>,
}

impl Drop for Permit {
    fn drop(&mut self) {
        let mut state = self.state.lock().unwrap();
        // Hand the permit to a waiter if any is still listening.
        while let Some(waiter) = state.waiting.pop() {
            if waiter.tx.send(()).is_ok() {
                return;
            }
        }
        state.capacity += 1;
    }
}

impl PrioritySemaphore {
    pub fn new(capacity: usize) -> PrioritySemaphore {
        PrioritySemaphore {
            state: Arc::new(Mutex::new(State {
                capacity,
                waiting: BinaryHeap::new(),
                next_seq: 0,
            })),
        }
    }

    /// Acquire a permit, queueing behind higher-priority waiters when the
    /// semaphore is exhausted.
    pub async fn acquire(&self, priority: usize) -> Permit {
        loop {
            let rx = {
                let mut state = self.state.lock().unwrap();
                if state.capacity > 0 {
                    state.capacity -= 1;
                    return Permit {
                        state: self.state.clone(),
                    };
                }
                let (tx, rx) = oneshot::channel();
                let seq = state.next_seq;
                state.next_seq += 1;
                state.waiting.push(Waiter { priority, seq, tx });
                rx
            };

            if rx.await.is_ok() {
                // A released permit was transferred to us directly.
                return Permit {
                    state: self.state.clone(),
                };
            }
        }
    }

    /// Take a permit only if one is free right now.
    pub fn try_acquire(&self) -> Option<Permit> {
        let mut state = self.state.lock().unwrap();
        if state.capacity > 0 {
            state.capacity -= 1;
            Some(Permit {
                state: self.state.clone(),
            })
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn capacity_limits_concurrency() {
        let sem = PrioritySemaphore::new(2);
        let a = sem.acquire(0).await;
        let _b = sem.acquire(0).await;
        assert!(sem.try_acquire().is_none());

        drop(a);
        assert!(sem.try_acquire().is_some());
    }

    #[tokio::test]
    async fn waiters_wake_in_priority_order() {
        let sem = PrioritySemaphore::new(1);
        let held = sem.acquire(0).await;

        let order = Arc::new(Mutex::new(Vec::new()));
        let mut tasks = Vec::new();
        for priority in [1usize, 3, 2] {
            let sem = sem.clone();
            let order = order.clone();
            tasks.push(tokio::spawn(async move {
                let permit = sem.acquire(priority).await;
                order.lock().unwrap().push(priority);
                drop(permit);
            }));
        }

        // Let all three enqueue before releasing.
        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(held);

        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(*order.lock().unwrap(), vec![3, 2, 1]);
    }

    #[tokio::test]
    async fn dropped_waiter_does_not_lose_the_permit() {
        let sem = PrioritySemaphore::new(1);
        let held = sem.acquire(0).await;

        let sem2 = sem.clone();
        let abandoned = tokio::spawn(async move {
            let _ = sem2.acquire(5).await;
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        abandoned.abort();
        let _ = abandoned.await;

        drop(held);
        // The abandoned waiter must not have swallowed the capacity.
        assert!(sem.try_acquire().is_some());
    }
}
