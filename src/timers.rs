//! Cancellable scheduled tasks keyed by identifier
//!
//! Every timer a session owns (the agent-join timeout, per-track attach
//! retries) lives here so teardown can cancel all of them in one call.

use std::collections::HashMap;
use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use std::sync::Mutex;
use tokio::task::AbortHandle;
use tracing::debug;

/// Keys for the timers a call session schedules
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TimerKey {
    /// One-shot timeout waiting for the remote agent to join
    AgentJoin,
    /// Attach retry loop for a track, keyed by track sid
    TrackRetry(String),
}

/// Spawns tasks keyed by `K`, holding at most one task per key
pub struct TaskScheduler<K> {
    tasks: Mutex<HashMap<K, AbortHandle>>,
}

impl<K> TaskScheduler<K>
where
    K: Eq + Hash + Clone + Debug + Send + 'static,
{
    pub fn new() -> Self {
        Self {
            tasks: Mutex::new(HashMap::new()),
        }
    }

    /// Spawn `task` under `key`, aborting any task already held for it
    ///
    /// Must be called from within a Tokio runtime.
    pub fn schedule<F>(&self, key: K, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(task).abort_handle();
        let mut tasks = self.lock();
        if let Some(previous) = tasks.insert(key.clone(), handle) {
            debug!("Replacing scheduled task {:?}", key);
            previous.abort();
        }
    }

    /// Cancel the task for `key`, returning whether one was still pending
    pub fn cancel(&self, key: &K) -> bool {
        let removed = self.lock().remove(key);
        match removed {
            Some(handle) => {
                let pending = !handle.is_finished();
                handle.abort();
                if pending {
                    debug!("Cancelled scheduled task {:?}", key);
                }
                pending
            }
            None => false,
        }
    }

    /// Cancel every task, returning how many were still pending
    pub fn cancel_all(&self) -> usize {
        let drained: Vec<(K, AbortHandle)> = self.lock().drain().collect();
        let mut pending = 0;
        for (key, handle) in drained {
            if !handle.is_finished() {
                debug!("Cancelled scheduled task {:?}", key);
                pending += 1;
            }
            handle.abort();
        }
        pending
    }

    /// Whether a task for `key` is scheduled and has not finished
    pub fn is_pending(&self, key: &K) -> bool {
        self.lock()
            .get(key)
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    /// Number of tasks that have not finished yet
    pub fn pending(&self) -> usize {
        let mut tasks = self.lock();
        tasks.retain(|_, handle| !handle.is_finished());
        tasks.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<K, AbortHandle>> {
        // A poisoned map still holds valid abort handles
        self.tasks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<K> Default for TaskScheduler<K>
where
    K: Eq + Hash + Clone + Debug + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
