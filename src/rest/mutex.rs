//! A FIFO async lock serializing one bucket's requests.
//!
//! Ownership is handed directly from the releasing guard to the next waiter,
//! so a request that arrives while the queue is draining can never overtake
//! one that was already waiting.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::oneshot;

#[derive(Debug, Default)]
struct MutexState {
    locked: bool,
    waiters: VecDeque<oneshot::Sender<()>>,
}

#[derive(Debug, Default)]
pub struct SequentialMutex {
    state: Mutex<MutexState>,
}

impl SequentialMutex {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_state(&self) -> MutexGuard<'_, MutexState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Wait for the lock. With `jump_queue` the waiter goes to the front of
    /// the queue instead of the back.
    ///
    /// The returned guard releases the lock when dropped.
    pub async fn acquire(&self, jump_queue: bool) -> SequentialGuard<'_> {
        let rx = {
            let mut state = self.lock_state();
            if !state.locked {
                state.locked = true;
                return SequentialGuard { mutex: self };
            }
            let (tx, rx) = oneshot::channel();
            if jump_queue {
                state.waiters.push_front(tx);
            } else {
                state.waiters.push_back(tx);
            }
            rx
        };

        let mut pending = PendingAcquire {
            mutex: self,
            rx: Some(rx),
        };
        if let Some(rx) = pending.rx.as_mut() {
            // The sender is only ever consumed by `release`, which hands us
            // the lock; a closed channel cannot happen while we wait.
            let _ = rx.await;
        }
        pending.rx = None;
        SequentialGuard { mutex: self }
    }

    /// Whether a request currently holds the lock.
    pub fn is_locked(&self) -> bool {
        self.lock_state().locked
    }

    /// Number of requests waiting behind the holder.
    pub fn queued(&self) -> usize {
        self.lock_state().waiters.len()
    }

    fn release(&self) {
        let mut state = self.lock_state();
        while let Some(next) = state.waiters.pop_front() {
            // A failed send means that waiter was dropped; try the next one.
            if next.send(()).is_ok() {
                return;
            }
        }
        state.locked = false;
    }
}

/// Holds the bucket slot. Dropping it wakes the next waiter.
#[derive(Debug)]
pub struct SequentialGuard<'a> {
    mutex: &'a SequentialMutex,
}

impl Drop for SequentialGuard<'_> {
    fn drop(&mut self) {
        self.mutex.release();
    }
}

/// Waiter bookkeeping: if the acquiring future is dropped after the lock was
/// handed over but before it was observed, pass the lock on.
struct PendingAcquire<'a> {
    mutex: &'a SequentialMutex,
    rx: Option<oneshot::Receiver<()>>,
}

impl Drop for PendingAcquire<'_> {
    fn drop(&mut self) {
        if let Some(mut rx) = self.rx.take() {
            rx.close();
            if rx.try_recv().is_ok() {
                self.mutex.release();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    async fn settle() {
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn uncontended_acquire_is_immediate() {
        let mutex = SequentialMutex::new();
        {
            let _guard = mutex.acquire(false).await;
            assert!(mutex.is_locked());
        }
        assert!(!mutex.is_locked());
    }

    #[tokio::test]
    async fn waiters_are_served_in_order() {
        let mutex = Arc::new(SequentialMutex::new());
        let order = Arc::new(Mutex::new(Vec::new()));
        let guard = mutex.acquire(false).await;

        let mut tasks = Vec::new();
        for i in 0..4 {
            let mutex = mutex.clone();
            let order = order.clone();
            tasks.push(tokio::spawn(async move {
                let _guard = mutex.acquire(false).await;
                order.lock().unwrap().push(i);
            }));
            settle().await;
        }
        assert_eq!(mutex.queued(), 4);

        drop(guard);
        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3]);
        assert!(!mutex.is_locked());
    }

    #[tokio::test]
    async fn jump_queue_goes_first() {
        let mutex = Arc::new(SequentialMutex::new());
        let order = Arc::new(Mutex::new(Vec::new()));
        let guard = mutex.acquire(false).await;

        let mut tasks = Vec::new();
        for (label, jump) in [("a", false), ("b", false), ("retry", true)] {
            let mutex = mutex.clone();
            let order = order.clone();
            tasks.push(tokio::spawn(async move {
                let _guard = mutex.acquire(jump).await;
                order.lock().unwrap().push(label);
            }));
            settle().await;
        }

        drop(guard);
        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(*order.lock().unwrap(), vec!["retry", "a", "b"]);
    }

    #[tokio::test]
    async fn dropped_waiter_passes_the_lock_on() {
        let mutex = Arc::new(SequentialMutex::new());
        let guard = mutex.acquire(false).await;

        let abandoned = {
            let mutex = mutex.clone();
            tokio::spawn(async move {
                let _guard = mutex.acquire(false).await;
                std::future::pending::<()>().await;
            })
        };
        settle().await;
        abandoned.abort();
        let _ = abandoned.await;

        drop(guard);
        let _again = mutex.acquire(false).await;
        assert!(mutex.is_locked());
    }
}
