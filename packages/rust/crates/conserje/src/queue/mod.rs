//! Coalescing buffer for webhook message bursts.
//!
//! Rapid-fire fragments from one subscriber accumulate in a single queue
//! entry instead of triggering one turn each. An entry becomes drainable only
//! after the quiet period has elapsed since its newest fragment, and draining
//! removes it atomically so concurrent dispatch attempts see it exactly once.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::observability::PipelineEvent;

mod debounce;
mod entry;
mod redis_backend;

pub use debounce::DebounceScheduler;
pub use entry::{InboundMessage, QueueEntry};

use redis_backend::RedisQueue;

/// Default Redis key prefix for queue entries.
pub const DEFAULT_QUEUE_KEY_PREFIX: &str = "conserje:queue:";

/// Default quiet period between fragments, in milliseconds.
pub const DEFAULT_QUIET_PERIOD_MS: u64 = 1_000;

/// Default queue entry TTL in seconds. Abandoned bursts expire after this.
pub const DEFAULT_ENTRY_TTL_SECS: u64 = 300;

/// Backend options for the coalescing queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueBackend {
    /// In-process hash map with TTL (single node only).
    Memory,
    /// Redis entry per conversation, mutated atomically via server-side Lua.
    Redis {
        /// Store URL using Redis protocol (for example `redis://127.0.0.1:6379/0`).
        url: String,
        /// Key namespace prefix.
        key_prefix: String,
    },
}

/// Runtime config for the coalescing queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    /// Backend mode.
    pub backend: QueueBackend,
    /// Quiet period between fragments in milliseconds; the drain deadline.
    pub quiet_period_ms: u64,
    /// Entry TTL in seconds; refreshed on every append.
    pub entry_ttl_secs: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            backend: QueueBackend::Memory,
            quiet_period_ms: DEFAULT_QUIET_PERIOD_MS,
            entry_ttl_secs: DEFAULT_ENTRY_TTL_SECS,
        }
    }
}

impl QueueConfig {
    /// Return a sanitized config with safe defaults.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        self.quiet_period_ms = self.quiet_period_ms.max(1);
        self.entry_ttl_secs = self.entry_ttl_secs.max(1);
        if let QueueBackend::Redis { key_prefix, .. } = &mut self.backend
            && key_prefix.trim().is_empty()
        {
            *key_prefix = DEFAULT_QUEUE_KEY_PREFIX.to_string();
        }
        self
    }

    /// Build a coalescing queue from this config.
    pub fn build_queue(&self) -> Result<Arc<dyn CoalescingQueue>> {
        let normalized = self.clone().normalized();
        let entry_ttl_ms = normalized.entry_ttl_secs.saturating_mul(1_000);
        match normalized.backend {
            QueueBackend::Memory => {
                tracing::info!(
                    event = PipelineEvent::QueueBackendInitialized.as_str(),
                    backend = "memory",
                    quiet_period_ms = normalized.quiet_period_ms,
                    entry_ttl_secs = normalized.entry_ttl_secs,
                    "coalescing queue backend initialized"
                );
                Ok(Arc::new(MemoryQueue::new(
                    normalized.quiet_period_ms,
                    entry_ttl_ms,
                )))
            }
            QueueBackend::Redis { url, key_prefix } => {
                tracing::info!(
                    event = PipelineEvent::QueueBackendInitialized.as_str(),
                    backend = "redis",
                    quiet_period_ms = normalized.quiet_period_ms,
                    entry_ttl_secs = normalized.entry_ttl_secs,
                    key_prefix = %key_prefix,
                    "coalescing queue backend initialized"
                );
                Ok(Arc::new(RedisQueue::new(
                    &url,
                    &key_prefix,
                    normalized.quiet_period_ms,
                    entry_ttl_ms,
                )))
            }
        }
    }

    /// Human-readable backend name for logs.
    #[must_use]
    pub fn backend_name(&self) -> &'static str {
        match self.backend {
            QueueBackend::Memory => "memory",
            QueueBackend::Redis { .. } => "redis",
        }
    }
}

/// Burst buffer shared by the webhook ingress and the turn pipeline.
#[async_trait]
pub trait CoalescingQueue: Send + Sync {
    /// Append one fragment, creating the entry if absent. Refreshes the entry
    /// TTL and returns the fragment count after the append.
    async fn append(&self, message: &InboundMessage, now_ms: u64) -> Result<usize>;

    /// Remove and return the entry when its quiet period has elapsed.
    ///
    /// Returns `None` when there is no entry or the entry is not yet due.
    /// Removal is atomic with the deadline check, so of two racing callers at
    /// most one receives the entry.
    async fn take_due(&self, subscriber_id: &str, now_ms: u64) -> Result<Option<QueueEntry>>;
}

struct StoredEntry {
    entry: QueueEntry,
    expires_at_ms: u64,
}

/// In-memory coalescing queue (single process only).
struct MemoryQueue {
    quiet_period_ms: u64,
    entry_ttl_ms: u64,
    entries: Mutex<HashMap<String, StoredEntry>>,
}

impl MemoryQueue {
    fn new(quiet_period_ms: u64, entry_ttl_ms: u64) -> Self {
        Self {
            quiet_period_ms,
            entry_ttl_ms,
            entries: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl CoalescingQueue for MemoryQueue {
    async fn append(&self, message: &InboundMessage, now_ms: u64) -> Result<usize> {
        let mut entries = self.entries.lock().await;
        entries.retain(|_, stored| stored.expires_at_ms > now_ms);
        let stored = entries
            .entry(message.subscriber_id.clone())
            .or_insert_with(|| StoredEntry {
                entry: QueueEntry {
                    subscriber_id: message.subscriber_id.clone(),
                    fragments: Vec::new(),
                    first_name: None,
                    last_name: None,
                    platform: None,
                    first_received_ms: now_ms,
                    last_received_ms: now_ms,
                },
                expires_at_ms: 0,
            });
        stored.entry.fragments.push(message.text.clone());
        stored.entry.last_received_ms = now_ms;
        if let Some(first_name) = &message.first_name {
            stored.entry.first_name = Some(first_name.clone());
        }
        if let Some(last_name) = &message.last_name {
            stored.entry.last_name = Some(last_name.clone());
        }
        if let Some(platform) = &message.platform {
            stored.entry.platform = Some(platform.clone());
        }
        stored.expires_at_ms = now_ms.saturating_add(self.entry_ttl_ms);
        Ok(stored.entry.fragments.len())
    }

    async fn take_due(&self, subscriber_id: &str, now_ms: u64) -> Result<Option<QueueEntry>> {
        let mut entries = self.entries.lock().await;
        entries.retain(|_, stored| stored.expires_at_ms > now_ms);
        let due = match entries.get(subscriber_id) {
            Some(stored) => stored.entry.due(self.quiet_period_ms, now_ms),
            None => return Ok(None),
        };
        if !due {
            return Ok(None);
        }
        Ok(entries.remove(subscriber_id).map(|stored| stored.entry))
    }
}
