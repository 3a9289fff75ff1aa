//! Turn processor: drains one due burst and produces exactly one reply.
//!
//! Every dispatch attempt runs the same gauntlet: claim the single-flight
//! lock, atomically drain the due queue entry, record the user turn, consult
//! the decision engine, deliver the reply, persist fact updates, release the
//! lock. Inner steps are best-effort — a failed history load or profile
//! upsert degrades the turn, it never aborts it — and the user always gets
//! either the engine's reply or the fallback apology.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::engine::{DecisionEngine, TurnRequest};
use crate::facts::{FactMerger, FactStore};
use crate::lock::SingleFlight;
use crate::observability::PipelineEvent;
use crate::outbound::OutboundChannel;
use crate::queue::{CoalescingQueue, QueueEntry};
use crate::transcript::{MessageRole, SubscriberProfile, SubscriberRecord, TranscriptStore};

/// Default fallback reply when the decision engine fails.
pub const DEFAULT_FALLBACK_REPLY: &str =
    "Disculpa, tuve un problema técnico. ¿Podrías repetir tu mensaje?";

fn unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| {
            u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
        })
}

/// Why a dispatch attempt processed nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Another holder owns the turn lock; the burst is theirs.
    LockContended,
    /// Lock acquisition failed against the store.
    LockUnavailable,
    /// No due entry: already drained, not yet due, or never existed.
    QueueEmpty,
    /// Drain failed against the store.
    QueueUnavailable,
}

impl SkipReason {
    /// Stable name for log fields.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::LockContended => "lock_contended",
            Self::LockUnavailable => "lock_unavailable",
            Self::QueueEmpty => "queue_empty",
            Self::QueueUnavailable => "queue_unavailable",
        }
    }
}

/// Result of one dispatch attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnOutcome {
    /// Engine reply computed and handed to the outbound channel.
    Completed,
    /// Engine failed; the fallback reply was dispatched instead.
    FellBack,
    /// Nothing processed.
    Skipped(SkipReason),
}

/// Collaborators wired into a [`TurnPipeline`].
pub struct TurnPipelineParts {
    pub queue: Arc<dyn CoalescingQueue>,
    pub lock: SingleFlight,
    pub transcript: Arc<dyn TranscriptStore>,
    pub facts: Arc<dyn FactStore>,
    pub merger: FactMerger,
    pub engine: Arc<dyn DecisionEngine>,
    pub outbound: Arc<dyn OutboundChannel>,
    /// Reply sent when the engine fails; never empty.
    pub fallback_reply: String,
}

/// Orchestrates turn processing for drained bursts.
pub struct TurnPipeline {
    queue: Arc<dyn CoalescingQueue>,
    lock: SingleFlight,
    transcript: Arc<dyn TranscriptStore>,
    facts: Arc<dyn FactStore>,
    merger: FactMerger,
    engine: Arc<dyn DecisionEngine>,
    outbound: Arc<dyn OutboundChannel>,
    fallback_reply: String,
}

impl TurnPipeline {
    /// Assemble the pipeline from its collaborators.
    #[must_use]
    pub fn new(parts: TurnPipelineParts) -> Self {
        let fallback_reply = if parts.fallback_reply.trim().is_empty() {
            DEFAULT_FALLBACK_REPLY.to_string()
        } else {
            parts.fallback_reply
        };
        Self {
            queue: parts.queue,
            lock: parts.lock,
            transcript: parts.transcript,
            facts: parts.facts,
            merger: parts.merger,
            engine: parts.engine,
            outbound: parts.outbound,
            fallback_reply,
        }
    }

    /// Process the subscriber's burst if one is due.
    ///
    /// Safe to call spuriously and concurrently: the lock turns concurrent
    /// attempts into skips, and the deadline-checked drain turns stale
    /// wakeups into no-ops. The lock is released on every exit path; a
    /// panicking task still releases through the claim's drop backstop.
    pub async fn process_due(&self, subscriber_id: &str) -> TurnOutcome {
        let claim = match self.lock.try_acquire(subscriber_id).await {
            Ok(Some(claim)) => claim,
            Ok(None) => {
                tracing::info!(
                    event = PipelineEvent::TurnSkipped.as_str(),
                    subscriber_id,
                    reason = SkipReason::LockContended.as_str(),
                    "dispatch attempt skipped"
                );
                return TurnOutcome::Skipped(SkipReason::LockContended);
            }
            Err(error) => {
                tracing::warn!(
                    event = PipelineEvent::TurnSkipped.as_str(),
                    subscriber_id,
                    reason = SkipReason::LockUnavailable.as_str(),
                    error = %error,
                    "dispatch attempt skipped"
                );
                return TurnOutcome::Skipped(SkipReason::LockUnavailable);
            }
        };

        let entry = match self.queue.take_due(subscriber_id, unix_ms()).await {
            Ok(Some(entry)) => entry,
            Ok(None) => {
                tracing::debug!(
                    event = PipelineEvent::QueueDrainEmpty.as_str(),
                    subscriber_id,
                    "no due queue entry"
                );
                claim.release().await;
                return TurnOutcome::Skipped(SkipReason::QueueEmpty);
            }
            Err(error) => {
                tracing::warn!(
                    event = PipelineEvent::TurnSkipped.as_str(),
                    subscriber_id,
                    reason = SkipReason::QueueUnavailable.as_str(),
                    error = %error,
                    "dispatch attempt skipped"
                );
                claim.release().await;
                return TurnOutcome::Skipped(SkipReason::QueueUnavailable);
            }
        };
        tracing::info!(
            event = PipelineEvent::QueueDrained.as_str(),
            subscriber_id,
            fragment_count = entry.fragments.len(),
            burst_span_ms = entry.last_received_ms.saturating_sub(entry.first_received_ms),
            "queue entry drained"
        );

        let outcome = self.run_turn(&entry).await;
        claim.release().await;
        outcome
    }

    async fn run_turn(&self, entry: &QueueEntry) -> TurnOutcome {
        let subscriber_id = entry.subscriber_id.as_str();
        let message_text = entry.combined_text();
        tracing::info!(
            event = PipelineEvent::TurnStarted.as_str(),
            subscriber_id,
            fragment_count = entry.fragments.len(),
            "turn started"
        );

        let record = self.upsert_subscriber(entry).await;
        self.append_message(subscriber_id, MessageRole::User, &message_text)
            .await;
        let history = self.load_history(subscriber_id).await;
        let durable_facts = self.load_facts(subscriber_id).await;

        let platform = record
            .as_ref()
            .and_then(|record| record.platform.clone())
            .or_else(|| entry.platform.clone());
        let known_facts = merged_known_facts(&durable_facts, record.as_ref(), entry);

        let request = TurnRequest {
            subscriber_id: subscriber_id.to_string(),
            message_text: message_text.clone(),
            known_facts,
            history,
        };
        match self.engine.decide(&request).await {
            Ok(decision) => {
                self.append_message(subscriber_id, MessageRole::Assistant, &decision.reply)
                    .await;
                let delivered = self
                    .outbound
                    .deliver_reply(
                        subscriber_id,
                        platform.as_deref(),
                        &decision.reply,
                        decision.payment_confirmed,
                    )
                    .await
                    .is_ok();
                self.merger
                    .persist(subscriber_id, &decision.fact_updates)
                    .await;
                tracing::info!(
                    event = PipelineEvent::TurnCompleted.as_str(),
                    subscriber_id,
                    delivered,
                    payment_confirmed = decision.payment_confirmed,
                    fact_count = decision.fact_updates.len(),
                    "turn completed"
                );
                TurnOutcome::Completed
            }
            Err(error) => {
                tracing::warn!(
                    event = PipelineEvent::TurnFallback.as_str(),
                    subscriber_id,
                    error = %error,
                    "decision engine failed, sending fallback reply"
                );
                if self
                    .outbound
                    .deliver_reply(subscriber_id, platform.as_deref(), &self.fallback_reply, false)
                    .await
                    .is_err()
                {
                    tracing::warn!(subscriber_id, "fallback reply delivery failed");
                }
                TurnOutcome::FellBack
            }
        }
    }

    async fn upsert_subscriber(&self, entry: &QueueEntry) -> Option<SubscriberRecord> {
        let profile = SubscriberProfile {
            subscriber_id: entry.subscriber_id.clone(),
            first_name: entry.first_name.clone(),
            last_name: entry.last_name.clone(),
            platform: entry.platform.clone(),
        };
        match self.transcript.upsert_subscriber(&profile, unix_ms()).await {
            Ok(record) => {
                tracing::debug!(
                    event = PipelineEvent::TranscriptSubscriberUpserted.as_str(),
                    subscriber_id = %entry.subscriber_id,
                    "subscriber record upserted"
                );
                Some(record)
            }
            Err(error) => {
                tracing::warn!(
                    subscriber_id = %entry.subscriber_id,
                    error = %error,
                    "subscriber upsert failed, continuing with burst metadata"
                );
                None
            }
        }
    }

    async fn append_message(&self, subscriber_id: &str, role: MessageRole, text: &str) {
        match self
            .transcript
            .append_message(subscriber_id, role, text, unix_ms())
            .await
        {
            Ok(()) => {
                tracing::debug!(
                    event = PipelineEvent::TranscriptMessageAppended.as_str(),
                    subscriber_id,
                    role = role.as_str(),
                    "transcript message appended"
                );
            }
            Err(error) => {
                tracing::warn!(
                    subscriber_id,
                    role = role.as_str(),
                    error = %error,
                    "failed to append transcript message"
                );
            }
        }
    }

    async fn load_history(&self, subscriber_id: &str) -> Vec<crate::transcript::TranscriptMessage> {
        match self.transcript.history(subscriber_id).await {
            Ok(history) => {
                tracing::debug!(
                    event = PipelineEvent::TranscriptHistoryLoaded.as_str(),
                    subscriber_id,
                    message_count = history.len(),
                    "conversation history loaded"
                );
                history
            }
            Err(error) => {
                tracing::warn!(
                    subscriber_id,
                    error = %error,
                    "failed to load conversation history, continuing without it"
                );
                Vec::new()
            }
        }
    }

    async fn load_facts(&self, subscriber_id: &str) -> HashMap<String, String> {
        match self.facts.load(subscriber_id).await {
            Ok(facts) => {
                tracing::debug!(
                    event = PipelineEvent::FactsLoaded.as_str(),
                    subscriber_id,
                    fact_count = facts.len(),
                    "durable facts loaded"
                );
                facts
            }
            Err(error) => {
                tracing::warn!(
                    subscriber_id,
                    error = %error,
                    "failed to load durable facts, continuing without them"
                );
                HashMap::new()
            }
        }
    }
}

/// Transient burst metadata seeds the map; durable facts overwrite it on any
/// overlapping key. Durable memory accumulates across the conversation's
/// lifetime and outranks what one webhook event happened to carry.
fn merged_known_facts(
    durable: &HashMap<String, String>,
    record: Option<&SubscriberRecord>,
    entry: &QueueEntry,
) -> HashMap<String, String> {
    let mut merged = HashMap::new();
    let first_name = record
        .and_then(|record| record.first_name.clone())
        .or_else(|| entry.first_name.clone());
    let last_name = record
        .and_then(|record| record.last_name.clone())
        .or_else(|| entry.last_name.clone());
    let platform = record
        .and_then(|record| record.platform.clone())
        .or_else(|| entry.platform.clone());
    for (key, value) in [
        ("first_name", first_name),
        ("last_name", last_name),
        ("platform", platform),
    ] {
        if let Some(value) = value
            && !value.trim().is_empty()
        {
            merged.insert(key.to_string(), value);
        }
    }
    for (key, value) in durable {
        merged.insert(key.clone(), value.clone());
    }
    merged
}
