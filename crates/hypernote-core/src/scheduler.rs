//! Per-key debounced task scheduling on the tokio timer.
//!
//! Each key has at most one pending timer. Scheduling again restarts the quiet
//! window and replaces the task, so only the last task scheduled for a key
//! runs. Once a timer fires it removes its own entry before running, which
//! means a task that is already writing is never aborted by a later schedule.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;

pub const DEFAULT_QUIET_WINDOW: Duration = Duration::from_millis(500);

struct PendingSave {
    generation: u64,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct Timers {
    next_generation: u64,
    pending: HashMap<String, PendingSave>,
}

/// Cloning shares the timer table.
#[derive(Clone)]
pub struct SaveScheduler {
    quiet_window: Duration,
    timers: Arc<Mutex<Timers>>,
}

impl Default for SaveScheduler {
    fn default() -> Self {
        Self::new(DEFAULT_QUIET_WINDOW)
    }
}

impl SaveScheduler {
    pub fn new(quiet_window: Duration) -> Self {
        Self {
            quiet_window,
            timers: Arc::new(Mutex::new(Timers::default())),
        }
    }

    pub fn quiet_window(&self) -> Duration {
        self.quiet_window
    }

    /// Run `task` once `key` has been quiet for the window, replacing any task
    /// still waiting for the same key.
    ///
    /// Must be called from within a tokio runtime.
    pub fn schedule<F>(&self, key: impl Into<String>, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let key = key.into();
        let mut timers = lock(&self.timers);

        if let Some(previous) = timers.pending.remove(&key) {
            previous.handle.abort();
        }

        timers.next_generation += 1;
        let generation = timers.next_generation;

        let shared = Arc::clone(&self.timers);
        let quiet_window = self.quiet_window;
        let timer_key = key.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(quiet_window).await;
            {
                let mut timers = lock(&shared);
                match timers.pending.get(&timer_key) {
                    Some(entry) if entry.generation == generation => {
                        timers.pending.remove(&timer_key);
                    }
                    // Superseded between wake-up and lock
                    _ => return,
                }
            }
            task.await;
        });

        // Still holding the lock: the timer cannot look itself up before this insert
        timers.pending.insert(key, PendingSave { generation, handle });
    }

    /// Drop the pending task for `key`, if any. A task that already started
    /// is left to finish.
    pub fn cancel(&self, key: &str) {
        if let Some(previous) = lock(&self.timers).pending.remove(key) {
            previous.handle.abort();
        }
    }

    pub fn is_pending(&self, key: &str) -> bool {
        lock(&self.timers).pending.contains_key(key)
    }

    pub fn pending_count(&self) -> usize {
        lock(&self.timers).pending.len()
    }
}

fn lock(timers: &Mutex<Timers>) -> MutexGuard<'_, Timers> {
    timers.lock().unwrap_or_else(|e| e.into_inner())
}
