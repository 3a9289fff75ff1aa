#![allow(missing_docs)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use axum::{routing::get, Json, Router};
use clap::Parser;
use conserje::{
    build_gateway, CoalescingQueue, DebounceScheduler, Decision, DecisionEngine, FactMerger,
    FactsConfig, LockConfig, OutboundChannel, QueueConfig, TranscriptConfig, TurnPipeline,
    TurnPipelineParts, TurnRequest, DEFAULT_MERGE_ATTEMPTS,
};
use tokio::net::TcpListener;
use tokio::sync::Mutex;

#[derive(Parser, Debug)]
#[command(about = "In-memory pipeline probe server for process-level integration tests")]
struct Args {
    /// HTTP bind address for probe server.
    #[arg(long, default_value = "127.0.0.1:18181")]
    bind: String,
    /// Webhook path.
    #[arg(long, default_value = "/api/webhook/manychat")]
    webhook_path: String,
    /// Quiet period between fragments in milliseconds.
    #[arg(long, default_value_t = 300)]
    quiet_period_ms: u64,
}

/// Deterministic engine stub: echoes the coalesced burst back.
struct EchoEngine;

#[async_trait]
impl DecisionEngine for EchoEngine {
    async fn decide(&self, request: &TurnRequest) -> Result<Decision> {
        Ok(Decision {
            reply: format!("recibido: {}", request.message_text),
            fact_updates: HashMap::new(),
            payment_confirmed: false,
        })
    }
}

struct RecordingOutbound {
    delivered: AtomicUsize,
    last_reply: Mutex<Option<String>>,
}

#[async_trait]
impl OutboundChannel for RecordingOutbound {
    async fn deliver_reply(
        &self,
        subscriber_id: &str,
        _platform: Option<&str>,
        reply: &str,
        _payment_confirmed: bool,
    ) -> Result<()> {
        self.delivered.fetch_add(1, Ordering::Relaxed);
        *self.last_reply.lock().await = Some(reply.to_string());
        println!("reply for {subscriber_id}: {reply}");
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let queue_config = QueueConfig {
        quiet_period_ms: args.quiet_period_ms,
        ..QueueConfig::default()
    };
    let queue: Arc<dyn CoalescingQueue> = queue_config.build_queue()?;
    let lock = LockConfig::default().build_lock()?;
    let transcript = TranscriptConfig::default().build_store()?;
    let facts = FactsConfig::default().build_store()?;
    let outbound = Arc::new(RecordingOutbound {
        delivered: AtomicUsize::new(0),
        last_reply: Mutex::new(None),
    });

    let pipeline = Arc::new(TurnPipeline::new(TurnPipelineParts {
        queue: queue.clone(),
        lock,
        transcript,
        facts: facts.clone(),
        merger: FactMerger::new(facts, DEFAULT_MERGE_ATTEMPTS, Duration::from_millis(50)),
        engine: Arc::new(EchoEngine),
        outbound: outbound.clone(),
        fallback_reply: String::new(),
    }));
    let scheduler = Arc::new(DebounceScheduler::new(Duration::from_millis(
        args.quiet_period_ms,
    )));
    let gateway = build_gateway(queue, scheduler, pipeline, &args.webhook_path);

    let outbound_metrics = Arc::clone(&outbound);
    let app: Router = gateway.app.route(
        "/metrics",
        get(move || {
            let outbound = Arc::clone(&outbound_metrics);
            async move {
                let last_reply = outbound.last_reply.lock().await.clone();
                Json(serde_json::json!({
                    "delivered": outbound.delivered.load(Ordering::Relaxed),
                    "last_reply": last_reply,
                }))
            }
        }),
    );

    let listener = TcpListener::bind(&args.bind).await?;
    println!(
        "pipeline_probe listening on {}{}",
        args.bind, gateway.path
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    Ok(())
}
