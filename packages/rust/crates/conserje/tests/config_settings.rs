#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use anyhow::Context as _;
use conserje::load_runtime_settings_from_paths;
use tempfile::TempDir;

fn write_file(path: &Path, content: &str) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, content)?;
    Ok(())
}

fn settings_paths(tmp: &TempDir) -> (PathBuf, PathBuf) {
    (
        tmp.path().join("config/settings.yaml"),
        tmp.path().join(".config/conserje/settings.yaml"),
    )
}

#[test]
fn missing_files_yield_empty_settings() -> anyhow::Result<()> {
    let tmp = TempDir::new()?;
    let (system, user) = settings_paths(&tmp);

    let settings = load_runtime_settings_from_paths(&system, &user);

    assert!(settings.server.bind.is_none());
    assert!(settings.server.webhook_path.is_none());
    assert!(settings.store.backend.is_none());
    assert!(settings.store.url.is_none());
    assert!(settings.queue.quiet_period_ms.is_none());
    assert!(settings.queue.entry_ttl_secs.is_none());
    assert!(settings.lock.ttl_secs.is_none());
    assert!(settings.transcript.key_prefix.is_none());
    assert!(settings.facts.key_prefix.is_none());
    assert!(settings.engine.api_key.is_none());
    assert!(settings.engine.model.is_none());
    assert!(settings.outbound.default_flow.is_none());
    assert!(settings.outbound.platform_flows.is_none());
    assert!(settings.turn.fallback_reply.is_none());
    Ok(())
}

#[test]
fn system_file_populates_every_section() -> anyhow::Result<()> {
    let tmp = TempDir::new()?;
    let (system, user) = settings_paths(&tmp);
    write_file(
        &system,
        r#"
server:
  bind: "127.0.0.1:8080"
  webhook_path: "/hooks/manychat"
store:
  backend: redis
  url: "redis://localhost:6379/2"
queue:
  quiet_period_ms: 800
  entry_ttl_secs: 120
  key_prefix: "stage:queue:"
lock:
  ttl_secs: 45
  key_prefix: "stage:lock:"
transcript:
  key_prefix: "stage:subscriber:"
facts:
  key_prefix: "stage:facts:"
engine:
  base_url: "https://openrouter.ai/api/v1"
  model: "openai/gpt-4.1-mini"
  temperature: 0.2
  max_tokens: 600
  timeout_secs: 30
  system_prompt: "Eres el conserje del hotel."
outbound:
  response_field: texto
  default_flow: "content20240101000000_default"
  platform_flows:
    instagram: "content20240101000000_ig"
  payment_confirmed_flow: "content20240101000000_pago"
  timeout_secs: 10
turn:
  fallback_reply: "Un momento, por favor."
  fact_merge_attempts: 5
  fact_merge_backoff_ms: 40
"#,
    )?;

    let settings = load_runtime_settings_from_paths(&system, &user);

    assert_eq!(settings.server.bind.as_deref(), Some("127.0.0.1:8080"));
    assert_eq!(
        settings.server.webhook_path.as_deref(),
        Some("/hooks/manychat")
    );
    assert_eq!(settings.store.backend.as_deref(), Some("redis"));
    assert_eq!(
        settings.store.url.as_deref(),
        Some("redis://localhost:6379/2")
    );
    assert_eq!(settings.queue.quiet_period_ms, Some(800));
    assert_eq!(settings.queue.entry_ttl_secs, Some(120));
    assert_eq!(settings.queue.key_prefix.as_deref(), Some("stage:queue:"));
    assert_eq!(settings.lock.ttl_secs, Some(45));
    assert_eq!(settings.lock.key_prefix.as_deref(), Some("stage:lock:"));
    assert_eq!(
        settings.transcript.key_prefix.as_deref(),
        Some("stage:subscriber:")
    );
    assert_eq!(settings.facts.key_prefix.as_deref(), Some("stage:facts:"));
    assert_eq!(
        settings.engine.base_url.as_deref(),
        Some("https://openrouter.ai/api/v1")
    );
    assert_eq!(settings.engine.model.as_deref(), Some("openai/gpt-4.1-mini"));
    let temperature = settings
        .engine
        .temperature
        .context("temperature should be set")?;
    assert!((temperature - 0.2).abs() < 1e-6);
    assert_eq!(settings.engine.max_tokens, Some(600));
    assert_eq!(settings.engine.timeout_secs, Some(30));
    assert_eq!(
        settings.engine.system_prompt.as_deref(),
        Some("Eres el conserje del hotel.")
    );
    assert_eq!(settings.outbound.response_field.as_deref(), Some("texto"));
    assert_eq!(
        settings.outbound.default_flow.as_deref(),
        Some("content20240101000000_default")
    );
    let flows = settings
        .outbound
        .platform_flows
        .context("platform_flows should be set")?;
    assert_eq!(
        flows.get("instagram").map(String::as_str),
        Some("content20240101000000_ig")
    );
    assert_eq!(
        settings.outbound.payment_confirmed_flow.as_deref(),
        Some("content20240101000000_pago")
    );
    assert_eq!(settings.outbound.timeout_secs, Some(10));
    assert_eq!(
        settings.turn.fallback_reply.as_deref(),
        Some("Un momento, por favor.")
    );
    assert_eq!(settings.turn.fact_merge_attempts, Some(5));
    assert_eq!(settings.turn.fact_merge_backoff_ms, Some(40));
    Ok(())
}

#[test]
fn user_values_override_system_per_field() -> anyhow::Result<()> {
    let tmp = TempDir::new()?;
    let (system, user) = settings_paths(&tmp);
    write_file(
        &system,
        r#"
server:
  bind: "0.0.0.0:3000"
queue:
  quiet_period_ms: 800
  entry_ttl_secs: 120
engine:
  model: "openai/gpt-4.1-mini"
turn:
  fallback_reply: "Respuesta del sistema."
"#,
    )?;
    write_file(
        &user,
        r#"
queue:
  quiet_period_ms: 1500
turn:
  fallback_reply: "Respuesta del usuario."
"#,
    )?;

    let settings = load_runtime_settings_from_paths(&system, &user);

    // User wins where both files set a field.
    assert_eq!(settings.queue.quiet_period_ms, Some(1500));
    assert_eq!(
        settings.turn.fallback_reply.as_deref(),
        Some("Respuesta del usuario.")
    );
    // System values survive where the user file is silent.
    assert_eq!(settings.server.bind.as_deref(), Some("0.0.0.0:3000"));
    assert_eq!(settings.queue.entry_ttl_secs, Some(120));
    assert_eq!(settings.engine.model.as_deref(), Some("openai/gpt-4.1-mini"));
    Ok(())
}

#[test]
fn platform_flows_merge_across_files() -> anyhow::Result<()> {
    let tmp = TempDir::new()?;
    let (system, user) = settings_paths(&tmp);
    write_file(
        &system,
        r#"
outbound:
  platform_flows:
    instagram: "flow-ig-system"
    telegram: "flow-tg-system"
"#,
    )?;
    write_file(
        &user,
        r#"
outbound:
  platform_flows:
    instagram: "flow-ig-user"
    whatsapp: "flow-wa-user"
"#,
    )?;

    let settings = load_runtime_settings_from_paths(&system, &user);

    let flows = settings
        .outbound
        .platform_flows
        .context("platform_flows should be set")?;
    assert_eq!(flows.len(), 3);
    assert_eq!(
        flows.get("instagram").map(String::as_str),
        Some("flow-ig-user")
    );
    assert_eq!(
        flows.get("telegram").map(String::as_str),
        Some("flow-tg-system")
    );
    assert_eq!(
        flows.get("whatsapp").map(String::as_str),
        Some("flow-wa-user")
    );
    Ok(())
}

#[test]
fn malformed_user_file_leaves_system_values_intact() -> anyhow::Result<()> {
    let tmp = TempDir::new()?;
    let (system, user) = settings_paths(&tmp);
    write_file(
        &system,
        r#"
store:
  url: "redis://localhost:6379"
queue:
  quiet_period_ms: 700
"#,
    )?;
    write_file(&user, "queue: [unclosed\n")?;

    let settings = load_runtime_settings_from_paths(&system, &user);

    assert_eq!(
        settings.store.url.as_deref(),
        Some("redis://localhost:6379")
    );
    assert_eq!(settings.queue.quiet_period_ms, Some(700));
    Ok(())
}

#[test]
fn type_error_discards_the_whole_file() -> anyhow::Result<()> {
    let tmp = TempDir::new()?;
    let (system, user) = settings_paths(&tmp);
    // quiet_period_ms is not numeric, so deserialization fails and every
    // value in the file is dropped, including the valid fallback_reply.
    write_file(
        &user,
        r#"
queue:
  quiet_period_ms: soon
turn:
  fallback_reply: "Hola."
"#,
    )?;

    let settings = load_runtime_settings_from_paths(&system, &user);

    assert!(settings.queue.quiet_period_ms.is_none());
    assert!(settings.turn.fallback_reply.is_none());
    Ok(())
}

#[test]
fn empty_files_yield_defaults() -> anyhow::Result<()> {
    let tmp = TempDir::new()?;
    let (system, user) = settings_paths(&tmp);
    write_file(&system, "")?;
    write_file(&user, "")?;

    let settings = load_runtime_settings_from_paths(&system, &user);

    assert!(settings.server.bind.is_none());
    assert!(settings.queue.quiet_period_ms.is_none());
    Ok(())
}

#[test]
fn unknown_keys_are_tolerated() -> anyhow::Result<()> {
    let tmp = TempDir::new()?;
    let (system, user) = settings_paths(&tmp);
    write_file(
        &system,
        r#"
retired_section:
  legacy: true
queue:
  quiet_period_ms: 900
"#,
    )?;

    let settings = load_runtime_settings_from_paths(&system, &user);

    assert_eq!(settings.queue.quiet_period_ms, Some(900));
    Ok(())
}
