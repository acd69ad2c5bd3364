use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// Elapsed-call counter with one-second resolution
pub struct CallTimer {
    elapsed: Arc<AtomicU64>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl CallTimer {
    pub fn new() -> Self {
        Self {
            elapsed: Arc::new(AtomicU64::new(0)),
            task: Mutex::new(None),
        }
    }

    /// Start counting; does nothing if already running
    pub fn start(&self) {
        let mut task = self.task.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if task.is_some() {
            return;
        }

        let elapsed = Arc::clone(&self.elapsed);
        *task = Some(tokio::spawn(async move {
            let period = Duration::from_secs(1);
            let mut ticks = interval_at(Instant::now() + period, period);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticks.tick().await;
                elapsed.fetch_add(1, Ordering::SeqCst);
            }
        }));
    }

    /// Stop and reset, returning the seconds counted
    pub fn stop(&self) -> u64 {
        let task = self
            .task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(task) = task {
            task.abort();
        }
        self.elapsed.swap(0, Ordering::SeqCst)
    }

    pub fn elapsed_seconds(&self) -> u64 {
        self.elapsed.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .is_some()
    }
}

impl Default for CallTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for CallTimer {
    fn drop(&mut self) {
        if let Ok(mut task) = self.task.lock() {
            if let Some(task) = task.take() {
                task.abort();
            }
        }
    }
}
