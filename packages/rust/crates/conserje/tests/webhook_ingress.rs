#![allow(missing_docs)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use async_trait::async_trait;
use conserje::{
    build_gateway, DebounceScheduler, Decision, DecisionEngine, FactMerger, FactsConfig,
    LockConfig, OutboundChannel, QueueConfig, TranscriptConfig, TurnPipeline, TurnPipelineParts,
    TurnRequest,
};
use tokio::sync::Mutex;
use tower::util::ServiceExt;

const QUIET_MS: u64 = 400;
const DELIVERY_WAIT: Duration = Duration::from_secs(5);

/// Engine stub echoing a fixed reply, recording what it was asked.
struct ScriptedEngine {
    requests: Mutex<Vec<TurnRequest>>,
}

#[async_trait]
impl DecisionEngine for ScriptedEngine {
    async fn decide(&self, request: &TurnRequest) -> Result<Decision> {
        self.requests.lock().await.push(request.clone());
        Ok(Decision {
            reply: "con gusto".to_string(),
            fact_updates: HashMap::new(),
            payment_confirmed: false,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Delivery {
    subscriber_id: String,
    reply: String,
}

#[derive(Default)]
struct RecordingOutbound {
    deliveries: Mutex<Vec<Delivery>>,
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
        self.deliveries.lock().await.push(Delivery {
            subscriber_id: subscriber_id.to_string(),
            reply: reply.to_string(),
        });
        Ok(())
    }
}

struct Harness {
    app: Router,
    path: String,
    scheduler: Arc<DebounceScheduler>,
    outbound: Arc<RecordingOutbound>,
    engine: Arc<ScriptedEngine>,
}

fn harness() -> Result<Harness> {
    let queue = QueueConfig {
        quiet_period_ms: QUIET_MS,
        ..QueueConfig::default()
    }
    .build_queue()?;
    let facts = FactsConfig::default().build_store()?;
    let engine = Arc::new(ScriptedEngine {
        requests: Mutex::new(Vec::new()),
    });
    let outbound = Arc::new(RecordingOutbound::default());
    let pipeline = Arc::new(TurnPipeline::new(TurnPipelineParts {
        queue: queue.clone(),
        lock: LockConfig::default().build_lock()?,
        transcript: TranscriptConfig::default().build_store()?,
        facts: facts.clone(),
        merger: FactMerger::new(facts, 3, Duration::from_millis(5)),
        engine: engine.clone(),
        outbound: outbound.clone(),
        fallback_reply: String::new(),
    }));
    let scheduler = Arc::new(DebounceScheduler::new(Duration::from_millis(QUIET_MS)));
    let gateway = build_gateway(queue, scheduler.clone(), pipeline, "");
    Ok(Harness {
        app: gateway.app,
        path: gateway.path,
        scheduler,
        outbound,
        engine,
    })
}

fn empty_envelope() -> serde_json::Value {
    serde_json::json!({ "version": "v2", "content": { "messages": [] } })
}

async fn post_body(app: Router, path: &str, body: &str) -> Result<(StatusCode, serde_json::Value)> {
    let request = Request::builder()
        .method("POST")
        .uri(path)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))?;
    let response = app.oneshot(request).await?;
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), 64 * 1024).await?;
    Ok((status, serde_json::from_slice(&bytes)?))
}

async fn wait_for_deliveries(
    outbound: &RecordingOutbound,
    expected: usize,
    max_wait: Duration,
) -> Result<Vec<Delivery>> {
    let wait_started = tokio::time::Instant::now();
    loop {
        let deliveries = outbound.deliveries.lock().await.clone();
        if deliveries.len() >= expected {
            return Ok(deliveries);
        }
        if wait_started.elapsed() >= max_wait {
            anyhow::bail!(
                "expected {expected} deliveries within {max_wait:?}, saw {}",
                deliveries.len()
            );
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

#[tokio::test]
async fn webhook_answers_with_the_empty_envelope() -> Result<()> {
    let harness = harness()?;
    assert_eq!(harness.path, "/api/webhook/manychat");

    let (status, body) = post_body(
        harness.app.clone(),
        &harness.path,
        r#"{"subscriber_id": "777", "text": "Hola"}"#,
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, empty_envelope());
    Ok(())
}

#[tokio::test]
async fn malformed_body_gets_the_envelope_and_schedules_nothing() -> Result<()> {
    let harness = harness()?;

    let (status, body) = post_body(harness.app.clone(), &harness.path, "not json at all").await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, empty_envelope());
    assert_eq!(harness.scheduler.pending_timers().await, 0);
    assert!(harness.outbound.deliveries.lock().await.is_empty());
    Ok(())
}

#[tokio::test]
async fn payload_without_subscriber_or_text_is_rejected_quietly() -> Result<()> {
    let harness = harness()?;

    for body in [
        r#"{"text": "sin remitente"}"#,
        r#"{"subscriber_id": "777"}"#,
        r#"{"subscriber_id": "   ", "text": "Hola"}"#,
        "[1, 2, 3]",
    ] {
        let (status, response) = post_body(harness.app.clone(), &harness.path, body).await?;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(response, empty_envelope());
    }
    assert_eq!(harness.scheduler.pending_timers().await, 0);
    Ok(())
}

#[tokio::test]
async fn burst_coalesces_into_one_combined_turn() -> Result<()> {
    let harness = harness()?;

    let (status, _) = post_body(
        harness.app.clone(),
        &harness.path,
        r#"{"subscriber_id": "777", "text": "Hola", "first_name": "Ana", "platform": "instagram"}"#,
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    tokio::time::sleep(Duration::from_millis(100)).await;
    let (status, _) = post_body(
        harness.app.clone(),
        &harness.path,
        r#"{"subscriber_id": "777", "text": "quiero una habitacion"}"#,
    )
    .await?;
    assert_eq!(status, StatusCode::OK);

    let deliveries = wait_for_deliveries(&harness.outbound, 1, DELIVERY_WAIT).await?;
    assert_eq!(deliveries.len(), 1);
    assert_eq!(deliveries[0].subscriber_id, "777");

    let requests = harness.engine.requests.lock().await.clone();
    assert_eq!(requests.len(), 1, "two fragments must produce one turn");
    assert_eq!(requests[0].message_text, "Hola\nquiero una habitacion");
    assert_eq!(
        requests[0].known_facts.get("first_name").map(String::as_str),
        Some("Ana")
    );

    // No stray second firing after the turn completed.
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(harness.outbound.deliveries.lock().await.len(), 1);
    Ok(())
}

#[tokio::test]
async fn alternate_payload_fields_are_accepted() -> Result<()> {
    let harness = harness()?;

    let (status, _) = post_body(
        harness.app.clone(),
        &harness.path,
        r#"{"id": 424242, "user_message": "Hola"}"#,
    )
    .await?;
    assert_eq!(status, StatusCode::OK);

    let deliveries = wait_for_deliveries(&harness.outbound, 1, DELIVERY_WAIT).await?;
    assert_eq!(deliveries[0].subscriber_id, "424242");
    Ok(())
}

#[tokio::test]
async fn health_reports_ok_and_armed_timers() -> Result<()> {
    let harness = harness()?;

    let request = Request::builder().uri("/health").body(Body::empty())?;
    let response = harness.app.clone().oneshot(request).await?;
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), 64 * 1024).await?;
    let body: serde_json::Value = serde_json::from_slice(&bytes)?;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["pending_timers"], 0);
    Ok(())
}

#[tokio::test]
async fn info_reports_the_service_identity() -> Result<()> {
    let harness = harness()?;

    let request = Request::builder().uri("/").body(Body::empty())?;
    let response = harness.app.clone().oneshot(request).await?;
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), 64 * 1024).await?;
    let body: serde_json::Value = serde_json::from_slice(&bytes)?;
    assert_eq!(body["name"], "conserje");
    Ok(())
}

#[test]
fn custom_webhook_paths_are_normalized() -> Result<()> {
    let queue = QueueConfig::default().build_queue()?;
    let facts = FactsConfig::default().build_store()?;
    let pipeline = Arc::new(TurnPipeline::new(TurnPipelineParts {
        queue: queue.clone(),
        lock: LockConfig::default().build_lock()?,
        transcript: TranscriptConfig::default().build_store()?,
        facts: facts.clone(),
        merger: FactMerger::new(facts, 3, Duration::from_millis(5)),
        engine: Arc::new(ScriptedEngine {
            requests: Mutex::new(Vec::new()),
        }),
        outbound: Arc::new(RecordingOutbound::default()),
        fallback_reply: String::new(),
    }));
    let scheduler = Arc::new(DebounceScheduler::new(Duration::from_millis(100)));
    let gateway = build_gateway(queue, scheduler, pipeline, "hooks/incoming");
    assert_eq!(gateway.path, "/hooks/incoming");
    Ok(())
}
