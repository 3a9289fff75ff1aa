use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::body::Bytes;
use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;

use crate::observability::PipelineEvent;
use crate::queue::{CoalescingQueue, DebounceScheduler, InboundMessage};
use crate::turn::TurnPipeline;

/// Default webhook route path.
pub const DEFAULT_WEBHOOK_PATH: &str = "/api/webhook/manychat";

fn unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| {
            u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
        })
}

#[derive(Clone)]
struct GatewayState {
    queue: Arc<dyn CoalescingQueue>,
    scheduler: Arc<DebounceScheduler>,
    pipeline: Arc<TurnPipeline>,
}

/// Built gateway components for handler testing and runtime wiring.
pub struct GatewayApp {
    /// Axum router serving the webhook, health, and info endpoints.
    pub app: Router,
    /// Normalized webhook route path.
    pub path: String,
}

/// Response body for `GET /health`.
#[derive(Debug, Serialize)]
pub struct GatewayHealthResponse {
    pub status: &'static str,
    /// Debounce timers currently armed in this process.
    pub pending_timers: usize,
}

/// Response body for `GET /`.
#[derive(Debug, Serialize)]
pub struct ServiceInfoResponse {
    pub name: &'static str,
    pub version: &'static str,
}

/// Build the ingress router.
pub fn build_gateway(
    queue: Arc<dyn CoalescingQueue>,
    scheduler: Arc<DebounceScheduler>,
    pipeline: Arc<TurnPipeline>,
    webhook_path: &str,
) -> GatewayApp {
    let path = normalize_path(webhook_path);
    let state = GatewayState {
        queue,
        scheduler,
        pipeline,
    };
    let app = Router::new()
        .route("/", get(handle_info))
        .route("/health", get(handle_health))
        .route(&path, post(handle_webhook))
        .with_state(state);
    GatewayApp { app, path }
}

fn normalize_path(path: &str) -> String {
    let trimmed = path.trim();
    if trimmed.is_empty() {
        return DEFAULT_WEBHOOK_PATH.to_string();
    }
    if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}

async fn handle_info() -> Json<ServiceInfoResponse> {
    Json(ServiceInfoResponse {
        name: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn handle_health(State(state): State<GatewayState>) -> Json<GatewayHealthResponse> {
    Json(GatewayHealthResponse {
        status: "ok",
        pending_timers: state.scheduler.pending_timers().await,
    })
}

/// The webhook ingress answers fast and always with the same empty-message
/// envelope; replies travel through the outbound flow API, never through
/// this response. Returning 200 for bad payloads too keeps the platform
/// from re-delivering them.
async fn handle_webhook(State(state): State<GatewayState>, body: Bytes) -> Json<serde_json::Value> {
    let payload: serde_json::Value = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(error) => {
            tracing::warn!(
                event = PipelineEvent::WebhookPayloadRejected.as_str(),
                error = %error,
                "webhook body is not valid JSON"
            );
            return Json(empty_webhook_response());
        }
    };
    let Some(message) = parse_webhook_payload(&payload) else {
        tracing::warn!(
            event = PipelineEvent::WebhookPayloadRejected.as_str(),
            "webhook payload missing subscriber id or message text"
        );
        return Json(empty_webhook_response());
    };

    tracing::info!(
        event = PipelineEvent::WebhookReceived.as_str(),
        subscriber_id = %message.subscriber_id,
        platform = message.platform.as_deref().unwrap_or("unknown"),
        text_chars = message.text.chars().count(),
        "webhook message received"
    );

    match state.queue.append(&message, unix_ms()).await {
        Ok(fragment_count) => {
            tracing::debug!(
                event = PipelineEvent::QueueFragmentAppended.as_str(),
                subscriber_id = %message.subscriber_id,
                fragment_count,
                "fragment appended to burst"
            );
        }
        Err(error) => {
            tracing::error!(
                subscriber_id = %message.subscriber_id,
                error = %error,
                "failed to buffer webhook message"
            );
            return Json(empty_webhook_response());
        }
    }

    let pipeline = Arc::clone(&state.pipeline);
    let subscriber_id = message.subscriber_id.clone();
    state
        .scheduler
        .schedule(&message.subscriber_id, move || async move {
            pipeline.process_due(&subscriber_id).await;
        })
        .await;

    Json(empty_webhook_response())
}

fn empty_webhook_response() -> serde_json::Value {
    serde_json::json!({
        "version": "v2",
        "content": { "messages": [] }
    })
}

fn string_field(payload: &serde_json::Value, key: &str) -> Option<String> {
    match payload.get(key)? {
        serde_json::Value::String(text) => {
            let trimmed = text.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        serde_json::Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

fn parse_webhook_payload(payload: &serde_json::Value) -> Option<InboundMessage> {
    let subscriber_id =
        string_field(payload, "subscriber_id").or_else(|| string_field(payload, "id"))?;
    let text = string_field(payload, "text")
        .or_else(|| string_field(payload, "user_message"))
        .or_else(|| string_field(payload, "last_input_text"))?;
    Some(InboundMessage {
        subscriber_id,
        text,
        first_name: string_field(payload, "first_name"),
        last_name: string_field(payload, "last_name"),
        platform: string_field(payload, "platform"),
    })
}
