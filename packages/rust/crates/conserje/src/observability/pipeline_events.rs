//! Stable event ids attached to tracing records as the `event` field.
//!
//! Ids are dotted and namespaced by pipeline stage (`webhook.`, `queue.`,
//! `debounce.`, `lock.`, `turn.`, `engine.`, `facts.`, `outbound.`,
//! `transcript.`, `store.`) so log pipelines can filter on prefix. Ids are
//! append-only: renaming one breaks downstream dashboards.

/// Identifier for a structured pipeline log event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineEvent {
    /// Webhook payload accepted for buffering.
    WebhookReceived,
    /// Webhook payload missing a subscriber id or message text.
    WebhookPayloadRejected,
    /// Coalescing queue backend selected at startup.
    QueueBackendInitialized,
    /// Fragment appended to a conversation's queue entry.
    QueueFragmentAppended,
    /// Queue entry drained for turn processing.
    QueueDrained,
    /// Drain attempt found no due entry (already drained or still quiet).
    QueueDrainEmpty,
    /// Debounce timer scheduled for a conversation.
    DebounceScheduled,
    /// Pending debounce timer cancelled and replaced by a newer fragment.
    DebounceReplaced,
    /// Debounce timer fired; dispatch attempt starting.
    DebounceFired,
    /// Single-flight lock backend selected at startup.
    LockBackendInitialized,
    /// Single-flight lock acquired for a conversation.
    LockAcquired,
    /// Single-flight lock held elsewhere; attempt abandoned.
    LockContended,
    /// Single-flight lock released.
    LockReleased,
    /// Turn processing started for a drained burst.
    TurnStarted,
    /// Turn processed and reply handed to the outbound channel.
    TurnCompleted,
    /// Decision engine failed; fallback reply dispatched instead.
    TurnFallback,
    /// Drain attempt ended without a turn (no entry, or lock contention).
    TurnSkipped,
    /// Decision engine request issued.
    EngineRequestStarted,
    /// Decision engine returned a usable decision.
    EngineReplyReceived,
    /// Decision engine call failed (transport, status, or malformed body).
    EngineCallFailed,
    /// Fact memory backend selected at startup.
    FactsBackendInitialized,
    /// Durable fact map loaded for a conversation.
    FactsLoaded,
    /// Sparse fact updates persisted and verified.
    FactsMergePersisted,
    /// Fact persistence attempt failed verification; retrying.
    FactsMergeRetried,
    /// Fact updates dropped after exhausting every persistence attempt.
    FactsMergeLost,
    /// Turn produced no persistable fact updates.
    FactsMergeSkipped,
    /// Reply text stored in the platform custom field.
    OutboundFieldSet,
    /// Platform flow triggered to deliver the reply.
    OutboundFlowTriggered,
    /// Outbound delivery failed; reply may not reach the user.
    OutboundDeliveryFailed,
    /// Transcript backend selected at startup.
    TranscriptBackendInitialized,
    /// Subscriber profile record created or refreshed.
    TranscriptSubscriberUpserted,
    /// Message appended to the durable conversation history.
    TranscriptMessageAppended,
    /// Full conversation history loaded.
    TranscriptHistoryLoaded,
    /// Store connection established.
    StoreConnected,
    /// Store command succeeded after a reconnect retry.
    StoreCommandRetrySucceeded,
    /// Store command failed; reconnecting or giving up.
    StoreCommandRetryFailed,
}

impl PipelineEvent {
    /// Stable dotted id for this event.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::WebhookReceived => "webhook.received",
            Self::WebhookPayloadRejected => "webhook.payload_rejected",
            Self::QueueBackendInitialized => "queue.backend_initialized",
            Self::QueueFragmentAppended => "queue.fragment_appended",
            Self::QueueDrained => "queue.drained",
            Self::QueueDrainEmpty => "queue.drain_empty",
            Self::DebounceScheduled => "debounce.scheduled",
            Self::DebounceReplaced => "debounce.replaced",
            Self::DebounceFired => "debounce.fired",
            Self::LockBackendInitialized => "lock.backend_initialized",
            Self::LockAcquired => "lock.acquired",
            Self::LockContended => "lock.contended",
            Self::LockReleased => "lock.released",
            Self::TurnStarted => "turn.started",
            Self::TurnCompleted => "turn.completed",
            Self::TurnFallback => "turn.fallback",
            Self::TurnSkipped => "turn.skipped",
            Self::EngineRequestStarted => "engine.request_started",
            Self::EngineReplyReceived => "engine.reply_received",
            Self::EngineCallFailed => "engine.call_failed",
            Self::FactsBackendInitialized => "facts.backend_initialized",
            Self::FactsLoaded => "facts.loaded",
            Self::FactsMergePersisted => "facts.merge_persisted",
            Self::FactsMergeRetried => "facts.merge_retried",
            Self::FactsMergeLost => "facts.merge_lost",
            Self::FactsMergeSkipped => "facts.merge_skipped",
            Self::OutboundFieldSet => "outbound.field_set",
            Self::OutboundFlowTriggered => "outbound.flow_triggered",
            Self::OutboundDeliveryFailed => "outbound.delivery_failed",
            Self::TranscriptBackendInitialized => "transcript.backend_initialized",
            Self::TranscriptSubscriberUpserted => "transcript.subscriber_upserted",
            Self::TranscriptMessageAppended => "transcript.message_appended",
            Self::TranscriptHistoryLoaded => "transcript.history_loaded",
            Self::StoreConnected => "store.connected",
            Self::StoreCommandRetrySucceeded => "store.command_retry_succeeded",
            Self::StoreCommandRetryFailed => "store.command_retry_failed",
        }
    }

    /// Every registered event, for log tooling and id-uniqueness tests.
    pub const ALL: &'static [PipelineEvent] = &[
        Self::WebhookReceived,
        Self::WebhookPayloadRejected,
        Self::QueueBackendInitialized,
        Self::QueueFragmentAppended,
        Self::QueueDrained,
        Self::QueueDrainEmpty,
        Self::DebounceScheduled,
        Self::DebounceReplaced,
        Self::DebounceFired,
        Self::LockBackendInitialized,
        Self::LockAcquired,
        Self::LockContended,
        Self::LockReleased,
        Self::TurnStarted,
        Self::TurnCompleted,
        Self::TurnFallback,
        Self::TurnSkipped,
        Self::EngineRequestStarted,
        Self::EngineReplyReceived,
        Self::EngineCallFailed,
        Self::FactsBackendInitialized,
        Self::FactsLoaded,
        Self::FactsMergePersisted,
        Self::FactsMergeRetried,
        Self::FactsMergeLost,
        Self::FactsMergeSkipped,
        Self::OutboundFieldSet,
        Self::OutboundFlowTriggered,
        Self::OutboundDeliveryFailed,
        Self::TranscriptBackendInitialized,
        Self::TranscriptSubscriberUpserted,
        Self::TranscriptMessageAppended,
        Self::TranscriptHistoryLoaded,
        Self::StoreConnected,
        Self::StoreCommandRetrySucceeded,
        Self::StoreCommandRetryFailed,
    ];
}
