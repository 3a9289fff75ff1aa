//! Server wiring: resolve settings and env into live components, run the
//! gateway until Ctrl+C or SIGTERM.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::net::TcpListener;

use conserje::{
    build_gateway, runtime_settings_paths, CoalescingQueue, DebounceScheduler, EngineConfig,
    EngineSettings, FactMerger, FactsBackend, FactsConfig, FlowApiDispatcher, FlowRoutes,
    HttpDecisionEngine, LockBackend, LockConfig, OutboundConfig, OutboundSettings, QueueBackend,
    QueueConfig, RuntimeSettings, TranscriptBackend, TranscriptConfig, TurnPipeline,
    TurnPipelineParts, DEFAULT_ENTRY_TTL_SECS, DEFAULT_LOCK_TTL_SECS, DEFAULT_MERGE_ATTEMPTS,
    DEFAULT_MERGE_BACKOFF_MS, DEFAULT_QUIET_PERIOD_MS,
};

const DEFAULT_BIND: &str = "0.0.0.0:3000";

pub(crate) struct ServeArgs {
    pub(crate) bind: Option<String>,
    pub(crate) webhook_path: Option<String>,
}

/// Run the webhook server until a shutdown signal arrives.
pub(crate) async fn run_serve(args: ServeArgs, settings: &RuntimeSettings) -> Result<()> {
    let wiring = build_wiring(settings)?;
    let bind = args
        .bind
        .or_else(|| non_blank(settings.server.bind.as_deref()))
        .unwrap_or_else(|| DEFAULT_BIND.to_string());
    let webhook_path = args
        .webhook_path
        .or_else(|| settings.server.webhook_path.clone())
        .unwrap_or_default();

    let gateway = build_gateway(wiring.queue, wiring.scheduler, wiring.pipeline, &webhook_path);
    let listener = TcpListener::bind(&bind)
        .await
        .with_context(|| format!("failed to bind {bind}"))?;
    tracing::info!(
        %bind,
        webhook_path = %gateway.path,
        "conserje gateway listening, Ctrl+C or SIGTERM to stop"
    );
    axum::serve(listener, gateway.app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("gateway server failed")?;
    tracing::info!("conserje gateway stopped");
    Ok(())
}

/// Report the effective wiring, validate credentials, and exit.
pub(crate) fn run_check_config(settings: &RuntimeSettings) -> Result<()> {
    let (system_path, user_path) = runtime_settings_paths();
    println!("settings files:");
    println!("  system: {}", system_path.display());
    println!("  user:   {}", user_path.display());

    match resolve_store(settings)? {
        Some(url) => println!("store: redis ({})", redact_url(&url)),
        None => println!("store: memory (single process only)"),
    }
    println!(
        "queue: quiet_period_ms={} entry_ttl_secs={}",
        settings
            .queue
            .quiet_period_ms
            .unwrap_or(DEFAULT_QUIET_PERIOD_MS),
        settings
            .queue
            .entry_ttl_secs
            .unwrap_or(DEFAULT_ENTRY_TTL_SECS),
    );
    println!(
        "lock: ttl_secs={}",
        settings.lock.ttl_secs.unwrap_or(DEFAULT_LOCK_TTL_SECS)
    );
    let engine = engine_config(&settings.engine);
    println!(
        "engine: {} model={} api_key={}",
        engine.base_url,
        engine.model,
        if engine.api_key.is_some() {
            "set"
        } else {
            "MISSING"
        },
    );
    let outbound = outbound_config(&settings.outbound);
    println!(
        "outbound: {} field={} api_token={} default_flow={}",
        outbound.base_url,
        outbound.response_field,
        if outbound.api_token.is_some() {
            "set"
        } else {
            "MISSING"
        },
        if outbound.routes.default_flow.trim().is_empty() {
            "MISSING"
        } else {
            &outbound.routes.default_flow
        },
    );

    build_wiring(settings)?;
    println!("configuration ok");
    Ok(())
}

struct Wiring {
    queue: Arc<dyn CoalescingQueue>,
    scheduler: Arc<DebounceScheduler>,
    pipeline: Arc<TurnPipeline>,
}

fn build_wiring(settings: &RuntimeSettings) -> Result<Wiring> {
    let store_url = resolve_store(settings)?;
    let store_url = store_url.as_deref();

    let queue_config = queue_config(settings, store_url).normalized();
    let queue = queue_config.build_queue()?;
    let lock = lock_config(settings, store_url).build_lock()?;
    let transcript = transcript_config(settings, store_url).build_store()?;
    let facts = facts_config(settings, store_url).build_store()?;

    let merger = FactMerger::new(
        facts.clone(),
        settings
            .turn
            .fact_merge_attempts
            .unwrap_or(DEFAULT_MERGE_ATTEMPTS),
        Duration::from_millis(
            settings
                .turn
                .fact_merge_backoff_ms
                .unwrap_or(DEFAULT_MERGE_BACKOFF_MS),
        ),
    );
    let engine = HttpDecisionEngine::new(engine_config(&settings.engine))?;
    let outbound = FlowApiDispatcher::new(outbound_config(&settings.outbound))?;

    let pipeline = Arc::new(TurnPipeline::new(TurnPipelineParts {
        queue: queue.clone(),
        lock,
        transcript,
        facts,
        merger,
        engine: Arc::new(engine),
        outbound: Arc::new(outbound),
        fallback_reply: settings.turn.fallback_reply.clone().unwrap_or_default(),
    }));
    let scheduler = Arc::new(DebounceScheduler::new(Duration::from_millis(
        queue_config.quiet_period_ms,
    )));

    Ok(Wiring {
        queue,
        scheduler,
        pipeline,
    })
}

/// Resolve the coordination store: `Some(url)` for redis, `None` for memory.
///
/// `REDIS_URL` outranks `store.url`. An explicit `store.backend` pins the
/// mode; otherwise redis is used whenever a URL is available.
fn resolve_store(settings: &RuntimeSettings) -> Result<Option<String>> {
    let url = env_value("REDIS_URL").or_else(|| non_blank(settings.store.url.as_deref()));
    match settings.store.backend.as_deref().map(str::trim) {
        Some("memory") => Ok(None),
        Some("redis") => url
            .map(Some)
            .context("store.backend is `redis` but no URL is configured (set REDIS_URL or store.url)"),
        Some(other) if !other.is_empty() => {
            bail!("unknown store.backend `{other}` (expected `memory` or `redis`)")
        }
        _ => Ok(url),
    }
}

fn queue_config(settings: &RuntimeSettings, store_url: Option<&str>) -> QueueConfig {
    QueueConfig {
        backend: match store_url {
            Some(url) => QueueBackend::Redis {
                url: url.to_string(),
                key_prefix: settings.queue.key_prefix.clone().unwrap_or_default(),
            },
            None => QueueBackend::Memory,
        },
        quiet_period_ms: settings
            .queue
            .quiet_period_ms
            .unwrap_or(DEFAULT_QUIET_PERIOD_MS),
        entry_ttl_secs: settings
            .queue
            .entry_ttl_secs
            .unwrap_or(DEFAULT_ENTRY_TTL_SECS),
    }
}

fn lock_config(settings: &RuntimeSettings, store_url: Option<&str>) -> LockConfig {
    LockConfig {
        backend: match store_url {
            Some(url) => LockBackend::Redis {
                url: url.to_string(),
                key_prefix: settings.lock.key_prefix.clone().unwrap_or_default(),
            },
            None => LockBackend::Memory,
        },
        ttl_secs: settings.lock.ttl_secs.unwrap_or(DEFAULT_LOCK_TTL_SECS),
    }
}

fn transcript_config(settings: &RuntimeSettings, store_url: Option<&str>) -> TranscriptConfig {
    TranscriptConfig {
        backend: match store_url {
            Some(url) => TranscriptBackend::Redis {
                url: url.to_string(),
                key_prefix: settings.transcript.key_prefix.clone().unwrap_or_default(),
            },
            None => TranscriptBackend::Memory,
        },
    }
}

fn facts_config(settings: &RuntimeSettings, store_url: Option<&str>) -> FactsConfig {
    FactsConfig {
        backend: match store_url {
            Some(url) => FactsBackend::Redis {
                url: url.to_string(),
                key_prefix: settings.facts.key_prefix.clone().unwrap_or_default(),
            },
            None => FactsBackend::Memory,
        },
    }
}

fn engine_config(settings: &EngineSettings) -> EngineConfig {
    let defaults = EngineConfig::default();
    EngineConfig {
        base_url: non_blank(settings.base_url.as_deref()).unwrap_or(defaults.base_url),
        api_key: env_value("OPENROUTER_API_KEY").or_else(|| non_blank(settings.api_key.as_deref())),
        model: non_blank(settings.model.as_deref()).unwrap_or(defaults.model),
        temperature: settings.temperature.unwrap_or(defaults.temperature),
        max_tokens: settings.max_tokens.unwrap_or(defaults.max_tokens),
        timeout_secs: settings.timeout_secs.unwrap_or(defaults.timeout_secs),
        system_prompt: non_blank(settings.system_prompt.as_deref())
            .unwrap_or(defaults.system_prompt),
    }
}

fn outbound_config(settings: &OutboundSettings) -> OutboundConfig {
    let defaults = OutboundConfig::default();
    OutboundConfig {
        base_url: non_blank(settings.base_url.as_deref()).unwrap_or(defaults.base_url),
        api_token: env_value("MANYCHAT_API_TOKEN")
            .or_else(|| env_value("MANYCHAT_API_KEY"))
            .or_else(|| non_blank(settings.api_token.as_deref())),
        response_field: non_blank(settings.response_field.as_deref())
            .unwrap_or(defaults.response_field),
        routes: FlowRoutes {
            default_flow: non_blank(settings.default_flow.as_deref()).unwrap_or_default(),
            by_platform: settings
                .platform_flows
                .clone()
                .unwrap_or_default()
                .into_iter()
                .map(|(platform, flow)| (platform.to_ascii_lowercase(), flow))
                .collect(),
            payment_confirmed_flow: non_blank(settings.payment_confirmed_flow.as_deref()),
        },
        timeout_secs: settings.timeout_secs.unwrap_or(defaults.timeout_secs),
    }
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn redact_url(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end + 3 => {
            format!("{}://***@{}", &url[..scheme_end], &url[at + 1..])
        }
        _ => url.to_string(),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %error, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    () = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(error) => {
                tracing::warn!(error = %error, "failed to listen for SIGTERM, handling Ctrl+C only");
                ctrl_c.await;
            }
        }
    }
    #[cfg(not(unix))]
    ctrl_c.await;
}
