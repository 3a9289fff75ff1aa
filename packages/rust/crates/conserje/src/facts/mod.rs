//! Durable per-subscriber fact memory.
//!
//! Facts are the flat string map the decision engine relies on across
//! conversations (name, room preferences, stay dates, and whatever else it
//! chooses to remember). Persistence is an explicit sparse overwrite: a merge
//! touches exactly the keys it names and never clears the rest.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::observability::PipelineEvent;
use crate::store::RedisHandle;

mod merger;

pub use merger::{FactMerger, DEFAULT_MERGE_ATTEMPTS, DEFAULT_MERGE_BACKOFF_MS};

/// Default Redis key prefix for fact maps.
pub const DEFAULT_FACTS_KEY_PREFIX: &str = "conserje:facts:";

/// Backend options for fact memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FactsBackend {
    /// In-process map (single node, lost on restart).
    Memory,
    /// Redis hash per subscriber; merges are one atomic `HSET`.
    Redis {
        /// Store URL using Redis protocol.
        url: String,
        /// Key namespace prefix.
        key_prefix: String,
    },
}

/// Runtime config for fact memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FactsConfig {
    /// Backend mode.
    pub backend: FactsBackend,
}

impl Default for FactsConfig {
    fn default() -> Self {
        Self {
            backend: FactsBackend::Memory,
        }
    }
}

impl FactsConfig {
    /// Return a sanitized config with safe defaults.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        if let FactsBackend::Redis { key_prefix, .. } = &mut self.backend
            && key_prefix.trim().is_empty()
        {
            *key_prefix = DEFAULT_FACTS_KEY_PREFIX.to_string();
        }
        self
    }

    /// Build a fact store from this config.
    pub fn build_store(&self) -> Result<Arc<dyn FactStore>> {
        let normalized = self.clone().normalized();
        match normalized.backend {
            FactsBackend::Memory => {
                tracing::info!(
                    event = PipelineEvent::FactsBackendInitialized.as_str(),
                    backend = "memory",
                    "fact memory backend initialized"
                );
                Ok(Arc::new(MemoryFactStore::new()))
            }
            FactsBackend::Redis { url, key_prefix } => {
                tracing::info!(
                    event = PipelineEvent::FactsBackendInitialized.as_str(),
                    backend = "redis",
                    key_prefix = %key_prefix,
                    "fact memory backend initialized"
                );
                Ok(Arc::new(RedisFactStore::new(&url, key_prefix)))
            }
        }
    }

    /// Human-readable backend name for logs.
    #[must_use]
    pub fn backend_name(&self) -> &'static str {
        match self.backend {
            FactsBackend::Memory => "memory",
            FactsBackend::Redis { .. } => "redis",
        }
    }
}

/// Durable storage for per-subscriber fact maps.
#[async_trait]
pub trait FactStore: Send + Sync {
    /// Load the full fact map; empty when the subscriber is unknown.
    async fn load(&self, subscriber_id: &str) -> Result<HashMap<String, String>>;

    /// Overwrite exactly the keys named in `updates`, leaving others intact.
    async fn merge(&self, subscriber_id: &str, updates: &HashMap<String, String>) -> Result<()>;
}

/// In-memory fact store (single process only).
struct MemoryFactStore {
    facts: Mutex<HashMap<String, HashMap<String, String>>>,
}

impl MemoryFactStore {
    fn new() -> Self {
        Self {
            facts: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl FactStore for MemoryFactStore {
    async fn load(&self, subscriber_id: &str) -> Result<HashMap<String, String>> {
        let facts = self.facts.lock().await;
        Ok(facts.get(subscriber_id).cloned().unwrap_or_default())
    }

    async fn merge(&self, subscriber_id: &str, updates: &HashMap<String, String>) -> Result<()> {
        if updates.is_empty() {
            return Ok(());
        }
        let mut facts = self.facts.lock().await;
        let entry = facts.entry(subscriber_id.to_string()).or_default();
        for (key, value) in updates {
            entry.insert(key.clone(), value.clone());
        }
        Ok(())
    }
}

/// Redis-backed fact store (multi-node safe).
struct RedisFactStore {
    handle: RedisHandle,
    key_prefix: String,
}

impl RedisFactStore {
    fn new(url: &str, key_prefix: String) -> Self {
        Self {
            handle: RedisHandle::new(url),
            key_prefix,
        }
    }

    fn fact_key(&self, subscriber_id: &str) -> String {
        format!("{}{subscriber_id}", self.key_prefix)
    }
}

#[async_trait]
impl FactStore for RedisFactStore {
    async fn load(&self, subscriber_id: &str) -> Result<HashMap<String, String>> {
        let mut cmd = redis::cmd("HGETALL");
        cmd.arg(self.fact_key(subscriber_id));
        self.handle
            .run(&cmd)
            .await
            .context("failed to load fact map")
    }

    async fn merge(&self, subscriber_id: &str, updates: &HashMap<String, String>) -> Result<()> {
        if updates.is_empty() {
            return Ok(());
        }
        let mut cmd = redis::cmd("HSET");
        cmd.arg(self.fact_key(subscriber_id));
        for (key, value) in updates {
            cmd.arg(key).arg(value);
        }
        let _written: i64 = self
            .handle
            .run(&cmd)
            .await
            .context("failed to merge fact updates")?;
        Ok(())
    }
}
