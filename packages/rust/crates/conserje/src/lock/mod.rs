//! Single-flight turn lock, one holder per conversation.
//!
//! The lock is an optimization, not the safety net: it stops two dispatch
//! attempts from burning two engine calls on the same burst. Burst
//! exactly-once rests on the queue's atomic deadline-checked drain, which is
//! why release is a plain delete and there is no ownership check or renewal.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::observability::PipelineEvent;
use crate::store::RedisHandle;

/// Default Redis key prefix for turn locks.
pub const DEFAULT_LOCK_KEY_PREFIX: &str = "conserje:lock:";

/// Default lock TTL in seconds; a crashed holder frees the conversation
/// after this long.
pub const DEFAULT_LOCK_TTL_SECS: u64 = 30;

static NEXT_CLAIM_OWNER_ID: AtomicU64 = AtomicU64::new(1);

fn next_claim_owner_token(subscriber_id: &str) -> String {
    let now_ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    let seq = NEXT_CLAIM_OWNER_ID.fetch_add(1, Ordering::Relaxed);
    format!("{subscriber_id}:{}:{now_ms}:{seq}", std::process::id())
}

/// Backend options for the single-flight lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockBackend {
    /// In-process hash map with TTL (single node only).
    Memory,
    /// Redis key claimed with atomic `SET NX PX`.
    Redis {
        /// Store URL using Redis protocol.
        url: String,
        /// Key namespace prefix.
        key_prefix: String,
    },
}

/// Runtime config for the single-flight lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockConfig {
    /// Backend mode.
    pub backend: LockBackend,
    /// Lock TTL in seconds.
    pub ttl_secs: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            backend: LockBackend::Memory,
            ttl_secs: DEFAULT_LOCK_TTL_SECS,
        }
    }
}

impl LockConfig {
    /// Return a sanitized config with safe defaults.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        self.ttl_secs = self.ttl_secs.max(1);
        if let LockBackend::Redis { key_prefix, .. } = &mut self.backend
            && key_prefix.trim().is_empty()
        {
            *key_prefix = DEFAULT_LOCK_KEY_PREFIX.to_string();
        }
        self
    }

    /// Build a single-flight lock from this config.
    pub fn build_lock(&self) -> Result<SingleFlight> {
        let normalized = self.clone().normalized();
        let ttl_ms = normalized.ttl_secs.saturating_mul(1_000);
        let (store, key_prefix): (Arc<dyn ClaimStore>, String) = match normalized.backend {
            LockBackend::Memory => {
                tracing::info!(
                    event = PipelineEvent::LockBackendInitialized.as_str(),
                    backend = "memory",
                    ttl_secs = normalized.ttl_secs,
                    "single-flight lock backend initialized"
                );
                (Arc::new(MemoryClaimStore::new()), String::new())
            }
            LockBackend::Redis { url, key_prefix } => {
                tracing::info!(
                    event = PipelineEvent::LockBackendInitialized.as_str(),
                    backend = "redis",
                    ttl_secs = normalized.ttl_secs,
                    key_prefix = %key_prefix,
                    "single-flight lock backend initialized"
                );
                (Arc::new(RedisClaimStore::new(&url)), key_prefix)
            }
        };
        Ok(SingleFlight {
            store,
            key_prefix,
            ttl_ms,
        })
    }

    /// Human-readable backend name for logs.
    #[must_use]
    pub fn backend_name(&self) -> &'static str {
        match self.backend {
            LockBackend::Memory => "memory",
            LockBackend::Redis { .. } => "redis",
        }
    }
}

/// Per-conversation mutual exclusion for turn processing.
///
/// Clones share the same claim store, so every holder of a clone contends
/// for the same locks.
#[derive(Clone)]
pub struct SingleFlight {
    store: Arc<dyn ClaimStore>,
    key_prefix: String,
    ttl_ms: u64,
}

impl SingleFlight {
    /// Claim the conversation, or return `None` when another holder has it.
    ///
    /// Contention is not an error; the caller is expected to abandon the
    /// attempt and let the current holder finish.
    pub async fn try_acquire(&self, subscriber_id: &str) -> Result<Option<TurnClaim>> {
        let key = format!("{}{subscriber_id}", self.key_prefix);
        let owner_token = next_claim_owner_token(subscriber_id);
        if !self.store.insert(&key, &owner_token, self.ttl_ms).await? {
            tracing::debug!(
                event = PipelineEvent::LockContended.as_str(),
                subscriber_id,
                "turn lock held elsewhere"
            );
            return Ok(None);
        }
        tracing::debug!(
            event = PipelineEvent::LockAcquired.as_str(),
            subscriber_id,
            ttl_ms = self.ttl_ms,
            "turn lock acquired"
        );
        Ok(Some(TurnClaim {
            store: Arc::clone(&self.store),
            key,
            owner_token,
            released: false,
        }))
    }
}

/// Held turn lock. Releases on [`TurnClaim::release`] or, as a backstop, when
/// dropped inside a Tokio runtime.
pub struct TurnClaim {
    store: Arc<dyn ClaimStore>,
    key: String,
    owner_token: String,
    released: bool,
}

impl TurnClaim {
    /// Owner token recorded in the store while this claim is held.
    #[must_use]
    pub fn owner_token(&self) -> &str {
        &self.owner_token
    }

    /// Release the lock now instead of waiting for drop.
    pub async fn release(mut self) {
        self.released = true;
        let key = std::mem::take(&mut self.key);
        match self.store.remove(&key).await {
            Ok(()) => {
                tracing::debug!(
                    event = PipelineEvent::LockReleased.as_str(),
                    key = %key,
                    "turn lock released"
                );
            }
            Err(error) => {
                tracing::warn!(
                    event = PipelineEvent::LockReleased.as_str(),
                    key = %key,
                    error = %error,
                    "turn lock release failed; TTL will reclaim it"
                );
            }
        }
    }
}

impl Drop for TurnClaim {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let store = Arc::clone(&self.store);
        let key = std::mem::take(&mut self.key);
        handle.spawn(async move {
            match store.remove(&key).await {
                Ok(()) => {
                    tracing::debug!(
                        event = PipelineEvent::LockReleased.as_str(),
                        key = %key,
                        "turn lock released on drop"
                    );
                }
                Err(error) => {
                    tracing::warn!(
                        event = PipelineEvent::LockReleased.as_str(),
                        key = %key,
                        error = %error,
                        "turn lock release failed on drop; TTL will reclaim it"
                    );
                }
            }
        });
    }
}

#[async_trait]
trait ClaimStore: Send + Sync {
    /// Claim `key` for `owner`; `false` when a live claim already exists.
    async fn insert(&self, key: &str, owner: &str, ttl_ms: u64) -> Result<bool>;

    /// Drop the claim on `key` regardless of owner.
    async fn remove(&self, key: &str) -> Result<()>;
}

struct MemoryClaim {
    expires_at: Instant,
}

/// In-memory claim store (single process only).
struct MemoryClaimStore {
    claims: Mutex<HashMap<String, MemoryClaim>>,
}

impl MemoryClaimStore {
    fn new() -> Self {
        Self {
            claims: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl ClaimStore for MemoryClaimStore {
    async fn insert(&self, key: &str, _owner: &str, ttl_ms: u64) -> Result<bool> {
        let now = Instant::now();
        let mut claims = self.claims.lock().await;
        claims.retain(|_, claim| claim.expires_at > now);
        if claims.contains_key(key) {
            return Ok(false);
        }
        claims.insert(
            key.to_string(),
            MemoryClaim {
                expires_at: now + Duration::from_millis(ttl_ms),
            },
        );
        Ok(true)
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.claims.lock().await.remove(key);
        Ok(())
    }
}

/// Redis-backed claim store (multi-node safe).
struct RedisClaimStore {
    handle: RedisHandle,
}

impl RedisClaimStore {
    fn new(url: &str) -> Self {
        Self {
            handle: RedisHandle::new(url),
        }
    }
}

#[async_trait]
impl ClaimStore for RedisClaimStore {
    async fn insert(&self, key: &str, owner: &str, ttl_ms: u64) -> Result<bool> {
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(owner).arg("NX").arg("PX").arg(ttl_ms);
        let claimed: Option<String> = self
            .handle
            .run(&cmd)
            .await
            .context("failed to claim turn lock")?;
        Ok(claimed.is_some())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let mut cmd = redis::cmd("DEL");
        cmd.arg(key);
        let _removed: i64 = self
            .handle
            .run(&cmd)
            .await
            .context("failed to release turn lock")?;
        Ok(())
    }
}
