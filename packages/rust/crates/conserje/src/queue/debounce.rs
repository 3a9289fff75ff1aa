use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::observability::PipelineEvent;

struct PendingTimer {
    generation: u64,
    handle: Option<JoinHandle<()>>,
}

/// Per-conversation debounce timers for dispatch after the quiet period.
///
/// Each `schedule` call replaces any pending timer for the same subscriber,
/// so a burst of fragments produces exactly one firing: the one armed by the
/// last fragment. Correctness rests on the generation counter, not on timer
/// cancellation; a stale timer that still fires finds a newer generation in
/// the table and does nothing.
pub struct DebounceScheduler {
    quiet_period: Duration,
    pending: Mutex<HashMap<String, PendingTimer>>,
    next_generation: AtomicU64,
}

impl DebounceScheduler {
    /// Create a scheduler that fires `quiet_period` after the last schedule.
    #[must_use]
    pub fn new(quiet_period: Duration) -> Self {
        Self {
            quiet_period,
            pending: Mutex::new(HashMap::new()),
            next_generation: AtomicU64::new(0),
        }
    }

    /// Arm (or re-arm) the timer for one subscriber.
    ///
    /// `fire` runs once the quiet period elapses without another `schedule`
    /// for the same subscriber. A later call supersedes this one.
    pub async fn schedule<F, Fut>(self: &Arc<Self>, subscriber_id: &str, fire: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);

        // Install the generation before spawning so a timer that wakes
        // immediately still finds itself registered.
        let previous = {
            let mut pending = self.pending.lock().await;
            pending.insert(
                subscriber_id.to_string(),
                PendingTimer {
                    generation,
                    handle: None,
                },
            )
        };
        if let Some(previous) = previous {
            if let Some(handle) = previous.handle {
                handle.abort();
            }
            tracing::debug!(
                event = PipelineEvent::DebounceReplaced.as_str(),
                subscriber_id,
                generation,
                "debounce timer replaced"
            );
        } else {
            tracing::debug!(
                event = PipelineEvent::DebounceScheduled.as_str(),
                subscriber_id,
                generation,
                "debounce timer scheduled"
            );
        }

        let scheduler = Arc::clone(self);
        let id = subscriber_id.to_string();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(scheduler.quiet_period).await;
            let still_current = {
                let mut pending = scheduler.pending.lock().await;
                match pending.get(&id) {
                    Some(timer) if timer.generation == generation => {
                        pending.remove(&id);
                        true
                    }
                    _ => false,
                }
            };
            if still_current {
                tracing::debug!(
                    event = PipelineEvent::DebounceFired.as_str(),
                    subscriber_id = %id,
                    generation,
                    "quiet period elapsed"
                );
                fire().await;
            }
        });

        let mut pending = self.pending.lock().await;
        match pending.get_mut(subscriber_id) {
            Some(timer) if timer.generation == generation => {
                timer.handle = Some(handle);
            }
            // Superseded by a newer schedule; the stale task would no-op at
            // its generation check anyway.
            Some(_) => handle.abort(),
            // Timer already fired and deregistered itself. Never abort here:
            // the task may be mid-fire.
            None => {}
        }
    }

    /// Number of armed timers, for shutdown diagnostics.
    pub async fn pending_timers(&self) -> usize {
        self.pending.lock().await.len()
    }
}
