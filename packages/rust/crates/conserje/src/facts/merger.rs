use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::observability::PipelineEvent;

use super::FactStore;

/// Default number of persistence attempts per turn.
pub const DEFAULT_MERGE_ATTEMPTS: u32 = 3;

/// Base delay between persistence attempts, in milliseconds. The wait grows
/// linearly with the attempt number.
pub const DEFAULT_MERGE_BACKOFF_MS: u64 = 500;

/// Retrying writer for end-of-turn fact updates.
///
/// Each attempt merges the sparse updates and then verifies them by
/// re-reading the stored map: every updated key must come back with the
/// written value. Updates that cannot be verified within the attempt budget
/// are dropped with an error log; the turn's reply has already been sent by
/// then, so fact loss must never fail the turn.
pub struct FactMerger {
    store: Arc<dyn FactStore>,
    attempts: u32,
    backoff: Duration,
}

impl FactMerger {
    /// Create a merger over `store` with the given retry budget.
    #[must_use]
    pub fn new(store: Arc<dyn FactStore>, attempts: u32, backoff: Duration) -> Self {
        Self {
            store,
            attempts: attempts.max(1),
            backoff,
        }
    }

    /// Persist `updates` for one subscriber, retrying until verified.
    pub async fn persist(&self, subscriber_id: &str, updates: &HashMap<String, String>) {
        if updates.is_empty() {
            tracing::debug!(
                event = PipelineEvent::FactsMergeSkipped.as_str(),
                subscriber_id,
                "turn produced no fact updates"
            );
            return;
        }

        for attempt in 1..=self.attempts {
            match self.merge_and_verify(subscriber_id, updates).await {
                Ok(()) => {
                    tracing::info!(
                        event = PipelineEvent::FactsMergePersisted.as_str(),
                        subscriber_id,
                        fact_count = updates.len(),
                        attempt,
                        "fact updates persisted and verified"
                    );
                    return;
                }
                Err(error) => {
                    tracing::warn!(
                        event = PipelineEvent::FactsMergeRetried.as_str(),
                        subscriber_id,
                        attempt,
                        max_attempts = self.attempts,
                        error = %error,
                        "fact persistence attempt failed"
                    );
                    if attempt < self.attempts {
                        tokio::time::sleep(self.backoff * attempt).await;
                    }
                }
            }
        }

        tracing::error!(
            event = PipelineEvent::FactsMergeLost.as_str(),
            subscriber_id,
            fact_count = updates.len(),
            attempts = self.attempts,
            "fact updates dropped after exhausting persistence attempts"
        );
    }

    async fn merge_and_verify(
        &self,
        subscriber_id: &str,
        updates: &HashMap<String, String>,
    ) -> anyhow::Result<()> {
        self.store.merge(subscriber_id, updates).await?;
        let stored = self.store.load(subscriber_id).await?;
        for (key, value) in updates {
            match stored.get(key) {
                Some(found) if found == value => {}
                Some(_) => anyhow::bail!("fact key `{key}` holds a different value after merge"),
                None => anyhow::bail!("fact key `{key}` missing after merge"),
            }
        }
        Ok(())
    }
}
