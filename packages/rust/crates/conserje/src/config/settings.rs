//! Runtime settings loader for conserje.
//!
//! Loads and merges:
//! - System defaults: `<PRJ_ROOT>/config/settings.yaml`
//! - User overrides:  `<CONFIG_HOME>/conserje/settings.yaml`
//!
//! Merge precedence is user over system. Secrets (store URL, engine API key,
//! outbound token) may also arrive via environment variables, which the
//! serve-time builders check first.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use serde::Deserialize;

const DEFAULT_SYSTEM_SETTINGS_RELATIVE_PATH: &str = "config/settings.yaml";
const DEFAULT_USER_SETTINGS_RELATIVE_PATH: &str = "conserje/settings.yaml";
const DEFAULT_CONFIG_HOME_RELATIVE_PATH: &str = ".config";
static CONFIG_HOME_OVERRIDE: OnceLock<PathBuf> = OnceLock::new();

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RuntimeSettings {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub store: StoreSettings,
    #[serde(default)]
    pub queue: QueueSettings,
    #[serde(default)]
    pub lock: LockSettings,
    #[serde(default)]
    pub transcript: TranscriptSettings,
    #[serde(default)]
    pub facts: FactsSettings,
    #[serde(default)]
    pub engine: EngineSettings,
    #[serde(default)]
    pub outbound: OutboundSettings,
    #[serde(default)]
    pub turn: TurnSettings,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServerSettings {
    /// Listen address, e.g. `0.0.0.0:3000`.
    pub bind: Option<String>,
    pub webhook_path: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StoreSettings {
    /// Coordination store mode: `memory` or `redis`. Defaults to `redis`
    /// when a URL is available, `memory` otherwise.
    pub backend: Option<String>,
    /// Store URL using Redis protocol; `REDIS_URL` takes precedence.
    pub url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct QueueSettings {
    pub quiet_period_ms: Option<u64>,
    pub entry_ttl_secs: Option<u64>,
    pub key_prefix: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LockSettings {
    pub ttl_secs: Option<u64>,
    pub key_prefix: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TranscriptSettings {
    pub key_prefix: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FactsSettings {
    pub key_prefix: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EngineSettings {
    pub base_url: Option<String>,
    /// Bearer token; `OPENROUTER_API_KEY` takes precedence.
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub timeout_secs: Option<u64>,
    pub system_prompt: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OutboundSettings {
    pub base_url: Option<String>,
    /// Bearer token; `MANYCHAT_API_TOKEN` / `MANYCHAT_API_KEY` take
    /// precedence.
    pub api_token: Option<String>,
    pub response_field: Option<String>,
    pub default_flow: Option<String>,
    /// Flow namespace per lowercase platform tag.
    pub platform_flows: Option<HashMap<String, String>>,
    pub payment_confirmed_flow: Option<String>,
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TurnSettings {
    pub fallback_reply: Option<String>,
    pub fact_merge_attempts: Option<u32>,
    pub fact_merge_backoff_ms: Option<u64>,
}

impl RuntimeSettings {
    fn merge(self, overlay: Self) -> Self {
        Self {
            server: self.server.merge(overlay.server),
            store: self.store.merge(overlay.store),
            queue: self.queue.merge(overlay.queue),
            lock: self.lock.merge(overlay.lock),
            transcript: self.transcript.merge(overlay.transcript),
            facts: self.facts.merge(overlay.facts),
            engine: self.engine.merge(overlay.engine),
            outbound: self.outbound.merge(overlay.outbound),
            turn: self.turn.merge(overlay.turn),
        }
    }
}

impl ServerSettings {
    fn merge(self, overlay: Self) -> Self {
        Self {
            bind: overlay.bind.or(self.bind),
            webhook_path: overlay.webhook_path.or(self.webhook_path),
        }
    }
}

impl StoreSettings {
    fn merge(self, overlay: Self) -> Self {
        Self {
            backend: overlay.backend.or(self.backend),
            url: overlay.url.or(self.url),
        }
    }
}

impl QueueSettings {
    fn merge(self, overlay: Self) -> Self {
        Self {
            quiet_period_ms: overlay.quiet_period_ms.or(self.quiet_period_ms),
            entry_ttl_secs: overlay.entry_ttl_secs.or(self.entry_ttl_secs),
            key_prefix: overlay.key_prefix.or(self.key_prefix),
        }
    }
}

impl LockSettings {
    fn merge(self, overlay: Self) -> Self {
        Self {
            ttl_secs: overlay.ttl_secs.or(self.ttl_secs),
            key_prefix: overlay.key_prefix.or(self.key_prefix),
        }
    }
}

impl TranscriptSettings {
    fn merge(self, overlay: Self) -> Self {
        Self {
            key_prefix: overlay.key_prefix.or(self.key_prefix),
        }
    }
}

impl FactsSettings {
    fn merge(self, overlay: Self) -> Self {
        Self {
            key_prefix: overlay.key_prefix.or(self.key_prefix),
        }
    }
}

impl EngineSettings {
    fn merge(self, overlay: Self) -> Self {
        Self {
            base_url: overlay.base_url.or(self.base_url),
            api_key: overlay.api_key.or(self.api_key),
            model: overlay.model.or(self.model),
            temperature: overlay.temperature.or(self.temperature),
            max_tokens: overlay.max_tokens.or(self.max_tokens),
            timeout_secs: overlay.timeout_secs.or(self.timeout_secs),
            system_prompt: overlay.system_prompt.or(self.system_prompt),
        }
    }
}

impl OutboundSettings {
    fn merge(self, overlay: Self) -> Self {
        Self {
            base_url: overlay.base_url.or(self.base_url),
            api_token: overlay.api_token.or(self.api_token),
            response_field: overlay.response_field.or(self.response_field),
            default_flow: overlay.default_flow.or(self.default_flow),
            platform_flows: merge_platform_flows(self.platform_flows, overlay.platform_flows),
            payment_confirmed_flow: overlay.payment_confirmed_flow.or(self.payment_confirmed_flow),
            timeout_secs: overlay.timeout_secs.or(self.timeout_secs),
        }
    }
}

impl TurnSettings {
    fn merge(self, overlay: Self) -> Self {
        Self {
            fallback_reply: overlay.fallback_reply.or(self.fallback_reply),
            fact_merge_attempts: overlay.fact_merge_attempts.or(self.fact_merge_attempts),
            fact_merge_backoff_ms: overlay.fact_merge_backoff_ms.or(self.fact_merge_backoff_ms),
        }
    }
}

fn merge_platform_flows(
    base: Option<HashMap<String, String>>,
    overlay: Option<HashMap<String, String>>,
) -> Option<HashMap<String, String>> {
    match (base, overlay) {
        (None, None) => None,
        (Some(flows), None) => Some(flows),
        (None, Some(flows)) => Some(flows),
        (Some(mut flows), Some(overlay_flows)) => {
            flows.extend(overlay_flows);
            Some(flows)
        }
    }
}

/// Load merged runtime settings (user overrides system).
pub fn load_runtime_settings() -> RuntimeSettings {
    let (system_path, user_path) = runtime_settings_paths();
    load_runtime_settings_from_paths(&system_path, &user_path)
}

#[doc(hidden)]
pub fn runtime_settings_paths() -> (PathBuf, PathBuf) {
    let root = project_root();
    let system_path = root.join(DEFAULT_SYSTEM_SETTINGS_RELATIVE_PATH);
    let user_path = resolve_config_home(&root).join(DEFAULT_USER_SETTINGS_RELATIVE_PATH);
    (system_path, user_path)
}

#[doc(hidden)]
pub fn load_runtime_settings_from_paths(system: &Path, user: &Path) -> RuntimeSettings {
    load_one(system).merge(load_one(user))
}

fn load_one(path: &Path) -> RuntimeSettings {
    if !path.exists() {
        return RuntimeSettings::default();
    }
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(error) => {
            tracing::warn!(
                path = %path.display(),
                error = %error,
                "failed to read settings file; ignoring"
            );
            return RuntimeSettings::default();
        }
    };
    match serde_yaml::from_str::<RuntimeSettings>(&raw) {
        Ok(value) => value,
        Err(error) => {
            tracing::warn!(
                path = %path.display(),
                error = %error,
                "failed to parse settings yaml; ignoring file"
            );
            RuntimeSettings::default()
        }
    }
}

fn project_root() -> PathBuf {
    std::env::var("PRJ_ROOT")
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
}

/// Set config-home override (used by CLI `--conf`).
///
/// The path can be absolute, or relative to `PRJ_ROOT`/cwd.
pub fn set_config_home_override(path: impl Into<PathBuf>) {
    let path = path.into();
    if path.as_os_str().is_empty() {
        return;
    }
    if CONFIG_HOME_OVERRIDE.set(path.clone()).is_err()
        && let Some(current) = CONFIG_HOME_OVERRIDE.get()
        && current != &path
    {
        tracing::warn!(
            current = %current.display(),
            ignored = %path.display(),
            "config home override already set; ignoring subsequent value"
        );
    }
}

fn resolve_config_home(project_root: &Path) -> PathBuf {
    if let Some(path) = CONFIG_HOME_OVERRIDE.get() {
        return absolutize(project_root, path.clone());
    }

    let configured = std::env::var("PRJ_CONFIG_HOME")
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| DEFAULT_CONFIG_HOME_RELATIVE_PATH.to_string());
    absolutize(project_root, PathBuf::from(configured))
}

fn absolutize(project_root: &Path, path: PathBuf) -> PathBuf {
    if path.is_absolute() {
        path
    } else {
        project_root.join(path)
    }
}
