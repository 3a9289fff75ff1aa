//! Durable conversation transcript and subscriber profiles.
//!
//! The transcript is the full message history for a conversation, user and
//! assistant turns interleaved in order, with no windowing or expiry. The
//! decision engine receives it whole. Subscriber profiles hold the last
//! known metadata (names, platform) so later turns can fill gaps a webhook
//! burst leaves open.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::observability::PipelineEvent;
use crate::store::RedisHandle;

/// Default Redis key prefix for transcript data.
pub const DEFAULT_TRANSCRIPT_KEY_PREFIX: &str = "conserje:transcript:";

/// Backend options for transcript storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranscriptBackend {
    /// In-process maps (single node, lost on restart).
    Memory,
    /// Redis hash per subscriber plus a list of message records.
    Redis {
        /// Store URL using Redis protocol.
        url: String,
        /// Key namespace prefix.
        key_prefix: String,
    },
}

/// Runtime config for transcript storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptConfig {
    /// Backend mode.
    pub backend: TranscriptBackend,
}

impl Default for TranscriptConfig {
    fn default() -> Self {
        Self {
            backend: TranscriptBackend::Memory,
        }
    }
}

impl TranscriptConfig {
    /// Return a sanitized config with safe defaults.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        if let TranscriptBackend::Redis { key_prefix, .. } = &mut self.backend
            && key_prefix.trim().is_empty()
        {
            *key_prefix = DEFAULT_TRANSCRIPT_KEY_PREFIX.to_string();
        }
        self
    }

    /// Build a transcript store from this config.
    pub fn build_store(&self) -> Result<Arc<dyn TranscriptStore>> {
        let normalized = self.clone().normalized();
        match normalized.backend {
            TranscriptBackend::Memory => {
                tracing::info!(
                    event = PipelineEvent::TranscriptBackendInitialized.as_str(),
                    backend = "memory",
                    "transcript backend initialized"
                );
                Ok(Arc::new(MemoryTranscriptStore::new()))
            }
            TranscriptBackend::Redis { url, key_prefix } => {
                tracing::info!(
                    event = PipelineEvent::TranscriptBackendInitialized.as_str(),
                    backend = "redis",
                    key_prefix = %key_prefix,
                    "transcript backend initialized"
                );
                Ok(Arc::new(RedisTranscriptStore::new(&url, key_prefix)))
            }
        }
    }

    /// Human-readable backend name for logs.
    #[must_use]
    pub fn backend_name(&self) -> &'static str {
        match self.backend {
            TranscriptBackend::Memory => "memory",
            TranscriptBackend::Redis { .. } => "redis",
        }
    }
}

/// Author of a transcript message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

impl MessageRole {
    /// Wire name used in transcripts and engine chat payloads.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// One message in a conversation's durable history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptMessage {
    pub role: MessageRole,
    pub text: String,
    /// Unix ms at which the message was recorded.
    pub at_ms: u64,
}

/// Incoming profile metadata for an upsert; `None` fields leave stored
/// values untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriberProfile {
    pub subscriber_id: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub platform: Option<String>,
}

/// Stored subscriber state after an upsert has been applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriberRecord {
    pub subscriber_id: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub platform: Option<String>,
    pub first_seen_ms: u64,
    pub last_seen_ms: u64,
}

/// Durable storage for conversation history and subscriber profiles.
#[async_trait]
pub trait TranscriptStore: Send + Sync {
    /// Create or refresh the subscriber record and return the merged state.
    async fn upsert_subscriber(
        &self,
        profile: &SubscriberProfile,
        now_ms: u64,
    ) -> Result<SubscriberRecord>;

    /// Append one message to the end of the conversation history.
    async fn append_message(
        &self,
        subscriber_id: &str,
        role: MessageRole,
        text: &str,
        now_ms: u64,
    ) -> Result<()>;

    /// Load the full conversation history in chronological order.
    async fn history(&self, subscriber_id: &str) -> Result<Vec<TranscriptMessage>>;
}

struct MemoryState {
    subscribers: HashMap<String, SubscriberRecord>,
    histories: HashMap<String, Vec<TranscriptMessage>>,
}

/// In-memory transcript store (single process only).
struct MemoryTranscriptStore {
    state: Mutex<MemoryState>,
}

impl MemoryTranscriptStore {
    fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState {
                subscribers: HashMap::new(),
                histories: HashMap::new(),
            }),
        }
    }
}

#[async_trait]
impl TranscriptStore for MemoryTranscriptStore {
    async fn upsert_subscriber(
        &self,
        profile: &SubscriberProfile,
        now_ms: u64,
    ) -> Result<SubscriberRecord> {
        let mut state = self.state.lock().await;
        let record = state
            .subscribers
            .entry(profile.subscriber_id.clone())
            .or_insert_with(|| SubscriberRecord {
                subscriber_id: profile.subscriber_id.clone(),
                first_name: None,
                last_name: None,
                platform: None,
                first_seen_ms: now_ms,
                last_seen_ms: now_ms,
            });
        if let Some(first_name) = &profile.first_name {
            record.first_name = Some(first_name.clone());
        }
        if let Some(last_name) = &profile.last_name {
            record.last_name = Some(last_name.clone());
        }
        if let Some(platform) = &profile.platform {
            record.platform = Some(platform.clone());
        }
        record.last_seen_ms = now_ms;
        Ok(record.clone())
    }

    async fn append_message(
        &self,
        subscriber_id: &str,
        role: MessageRole,
        text: &str,
        now_ms: u64,
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        state
            .histories
            .entry(subscriber_id.to_string())
            .or_default()
            .push(TranscriptMessage {
                role,
                text: text.to_string(),
                at_ms: now_ms,
            });
        Ok(())
    }

    async fn history(&self, subscriber_id: &str) -> Result<Vec<TranscriptMessage>> {
        let state = self.state.lock().await;
        Ok(state
            .histories
            .get(subscriber_id)
            .cloned()
            .unwrap_or_default())
    }
}

/// Redis-backed transcript store (multi-node safe).
struct RedisTranscriptStore {
    handle: RedisHandle,
    key_prefix: String,
}

impl RedisTranscriptStore {
    fn new(url: &str, key_prefix: String) -> Self {
        Self {
            handle: RedisHandle::new(url),
            key_prefix,
        }
    }

    fn subscriber_key(&self, subscriber_id: &str) -> String {
        format!("{}subscriber:{subscriber_id}", self.key_prefix)
    }

    fn history_key(&self, subscriber_id: &str) -> String {
        format!("{}history:{subscriber_id}", self.key_prefix)
    }
}

#[async_trait]
impl TranscriptStore for RedisTranscriptStore {
    async fn upsert_subscriber(
        &self,
        profile: &SubscriberProfile,
        now_ms: u64,
    ) -> Result<SubscriberRecord> {
        let key = self.subscriber_key(&profile.subscriber_id);

        let mut first_seen = redis::cmd("HSETNX");
        first_seen.arg(&key).arg("first_seen_ms").arg(now_ms);
        let _created: i64 = self
            .handle
            .run(&first_seen)
            .await
            .context("failed to initialize subscriber record")?;

        let mut upsert = redis::cmd("HSET");
        upsert.arg(&key).arg("last_seen_ms").arg(now_ms);
        if let Some(first_name) = &profile.first_name {
            upsert.arg("first_name").arg(first_name);
        }
        if let Some(last_name) = &profile.last_name {
            upsert.arg("last_name").arg(last_name);
        }
        if let Some(platform) = &profile.platform {
            upsert.arg("platform").arg(platform);
        }
        let _updated: i64 = self
            .handle
            .run(&upsert)
            .await
            .context("failed to upsert subscriber record")?;

        let mut read_back = redis::cmd("HGETALL");
        read_back.arg(&key);
        let fields: HashMap<String, String> = self
            .handle
            .run(&read_back)
            .await
            .context("failed to load subscriber record")?;
        Ok(SubscriberRecord {
            subscriber_id: profile.subscriber_id.clone(),
            first_name: fields.get("first_name").cloned(),
            last_name: fields.get("last_name").cloned(),
            platform: fields.get("platform").cloned(),
            first_seen_ms: fields
                .get("first_seen_ms")
                .and_then(|raw| raw.parse().ok())
                .unwrap_or(now_ms),
            last_seen_ms: fields
                .get("last_seen_ms")
                .and_then(|raw| raw.parse().ok())
                .unwrap_or(now_ms),
        })
    }

    async fn append_message(
        &self,
        subscriber_id: &str,
        role: MessageRole,
        text: &str,
        now_ms: u64,
    ) -> Result<()> {
        let record = serde_json::to_string(&TranscriptMessage {
            role,
            text: text.to_string(),
            at_ms: now_ms,
        })
        .context("failed to encode transcript message")?;
        let mut cmd = redis::cmd("RPUSH");
        cmd.arg(self.history_key(subscriber_id)).arg(record);
        let _len: i64 = self
            .handle
            .run(&cmd)
            .await
            .context("failed to append transcript message")?;
        Ok(())
    }

    async fn history(&self, subscriber_id: &str) -> Result<Vec<TranscriptMessage>> {
        let mut cmd = redis::cmd("LRANGE");
        cmd.arg(self.history_key(subscriber_id)).arg(0).arg(-1);
        let raw: Vec<String> = self
            .handle
            .run(&cmd)
            .await
            .context("failed to load transcript history")?;
        let mut messages = Vec::with_capacity(raw.len());
        for (index, line) in raw.iter().enumerate() {
            match serde_json::from_str::<TranscriptMessage>(line) {
                Ok(message) => messages.push(message),
                Err(error) => {
                    tracing::warn!(
                        subscriber_id,
                        index,
                        error = %error,
                        "skipping unreadable transcript message"
                    );
                }
            }
        }
        Ok(messages)
    }
}
