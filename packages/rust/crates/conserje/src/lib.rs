//! Conserje: webhook-driven conversational backend.
//!
//! Message fragments arriving in bursts are coalesced per conversation,
//! debounced through a quiet period, and dispatched as exactly one turn
//! under a distributed single-flight lock. Each turn consults a decision
//! engine with the full durable history and fact memory, delivers the reply
//! through a platform flow API, and persists newly extracted facts with
//! verified retries.

#![allow(missing_docs)]

mod config;
mod engine;
mod facts;
mod gateway;
mod lock;
mod observability;
mod outbound;
mod queue;
mod store;
mod transcript;
mod turn;

pub use config::{
    load_runtime_settings, load_runtime_settings_from_paths, runtime_settings_paths,
    set_config_home_override, EngineSettings, FactsSettings, LockSettings, OutboundSettings,
    QueueSettings, RuntimeSettings, ServerSettings, StoreSettings, TranscriptSettings,
    TurnSettings,
};
pub use engine::{
    Decision, DecisionEngine, EngineConfig, HttpDecisionEngine, TurnRequest,
    DEFAULT_ENGINE_BASE_URL, DEFAULT_ENGINE_MAX_TOKENS, DEFAULT_ENGINE_MODEL,
    DEFAULT_ENGINE_TEMPERATURE, DEFAULT_ENGINE_TIMEOUT_SECS, DEFAULT_SYSTEM_PROMPT,
};
pub use facts::{
    FactMerger, FactStore, FactsBackend, FactsConfig, DEFAULT_FACTS_KEY_PREFIX,
    DEFAULT_MERGE_ATTEMPTS, DEFAULT_MERGE_BACKOFF_MS,
};
pub use gateway::{
    build_gateway, GatewayApp, GatewayHealthResponse, ServiceInfoResponse, DEFAULT_WEBHOOK_PATH,
};
pub use lock::{
    LockBackend, LockConfig, SingleFlight, TurnClaim, DEFAULT_LOCK_KEY_PREFIX,
    DEFAULT_LOCK_TTL_SECS,
};
pub use observability::PipelineEvent;
pub use outbound::{
    FlowApiDispatcher, FlowRoutes, OutboundChannel, OutboundConfig, DEFAULT_OUTBOUND_BASE_URL,
    DEFAULT_OUTBOUND_TIMEOUT_SECS, DEFAULT_RESPONSE_FIELD,
};
pub use queue::{
    CoalescingQueue, DebounceScheduler, InboundMessage, QueueBackend, QueueConfig, QueueEntry,
    DEFAULT_ENTRY_TTL_SECS, DEFAULT_QUEUE_KEY_PREFIX, DEFAULT_QUIET_PERIOD_MS,
};
pub use transcript::{
    MessageRole, SubscriberProfile, SubscriberRecord, TranscriptBackend, TranscriptConfig,
    TranscriptMessage, TranscriptStore, DEFAULT_TRANSCRIPT_KEY_PREFIX,
};
pub use turn::{
    SkipReason, TurnOutcome, TurnPipeline, TurnPipelineParts, DEFAULT_FALLBACK_REPLY,
};
