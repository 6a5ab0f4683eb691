// Copyright 2015-2025 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// https://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// https://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Exclusive mode and background work
//!
//! Reconfiguration and the zone-altering control commands run in exclusive mode: no
//! other task that touches views may run at the same time. Background work (zone
//! loads, deferred deletions, catalog zone changes) is tracked so callers can wait for
//! it to drain.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::task_tracker::TaskTrackerToken;
use tokio_util::task::TaskTracker;
use tracing::debug;

/// Coordinates exclusive sections and background tasks
#[derive(Clone, Debug)]
pub struct TaskManager {
    gate: Arc<RwLock<()>>,
    tracker: TaskTracker,
    shutdown: CancellationToken,
}

impl Default for TaskManager {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskManager {
    /// A manager with no running tasks
    pub fn new() -> Self {
        Self {
            gate: Arc::new(RwLock::new(())),
            tracker: TaskTracker::new(),
            shutdown: CancellationToken::new(),
        }
    }

    /// Waits until every shared holder has finished, then holds the gate alone.
    ///
    /// The returned guard ends exclusive mode when dropped.
    pub async fn begin_exclusive(&self) -> ExclusiveGuard {
        let guard = Arc::clone(&self.gate).write_owned().await;
        debug!("exclusive mode begun");
        ExclusiveGuard { _guard: guard }
    }

    /// Enters a shared section, blocking only while an exclusive section is active
    pub async fn shared(&self) -> SharedGuard {
        SharedGuard {
            _guard: Arc::clone(&self.gate).read_owned().await,
        }
    }

    /// True while some task holds exclusive mode
    pub fn is_exclusive(&self) -> bool {
        self.gate.try_read().is_err()
    }

    /// Runs `future` as tracked background work
    pub fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.tracker.spawn(future)
    }

    /// A token counting as one unit of background work until dropped
    pub fn token(&self) -> TaskTrackerToken {
        self.tracker.token()
    }

    /// Waits for all background work spawned so far, including outstanding tokens
    pub async fn wait_idle(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }

    /// Signals long-running workers to stop
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Completes once [`Self::shutdown`] was called
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }
}

/// Proof of exclusive mode
#[must_use = "exclusive mode ends when the guard is dropped"]
pub struct ExclusiveGuard {
    _guard: OwnedRwLockWriteGuard<()>,
}

impl Drop for ExclusiveGuard {
    fn drop(&mut self) {
        debug!("exclusive mode ended");
    }
}

/// Proof of a shared section
#[must_use = "the shared section ends when the guard is dropped"]
pub struct SharedGuard {
    _guard: OwnedRwLockReadGuard<()>,
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn test_exclusive_blocks_shared() {
        let tasks = TaskManager::new();
        let exclusive = tasks.begin_exclusive().await;
        assert!(tasks.is_exclusive());

        let entered = Arc::new(AtomicBool::new(false));
        let handle = {
            let tasks = tasks.clone();
            let entered = entered.clone();
            tokio::spawn(async move {
                let _shared = tasks.shared().await;
                entered.store(true, Ordering::SeqCst);
            })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!entered.load(Ordering::SeqCst));

        drop(exclusive);
        handle.await.unwrap();
        assert!(entered.load(Ordering::SeqCst));
        assert!(!tasks.is_exclusive());
    }

    #[tokio::test]
    async fn test_exclusive_waits_for_shared() {
        let tasks = TaskManager::new();
        let shared = tasks.shared().await;

        let waiter = {
            let tasks = tasks.clone();
            tokio::spawn(async move {
                let _guard = tasks.begin_exclusive().await;
            })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());
        drop(shared);
        waiter.await.unwrap();
    }

    #[tokio::test]
    async fn test_wait_idle_counts_tokens() {
        let tasks = TaskManager::new();
        let token = tasks.token();
        let done = Arc::new(AtomicBool::new(false));

        {
            let done = done.clone();
            tasks.spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                drop(token);
                done.store(true, Ordering::SeqCst);
            });
        }

        tasks.wait_idle().await;
        assert!(done.load(Ordering::SeqCst));

        // the tracker accepts work again
        tasks.spawn(async {}).await.unwrap();
    }
}
