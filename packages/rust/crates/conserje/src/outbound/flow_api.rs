use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::observability::PipelineEvent;

use super::{FlowRoutes, OutboundChannel, OutboundConfig};

#[derive(Debug, Serialize)]
struct SetFieldRequest<'a> {
    subscriber_id: &'a str,
    field_name: &'a str,
    field_value: &'a str,
}

#[derive(Debug, Serialize)]
struct SendFlowRequest<'a> {
    subscriber_id: &'a str,
    flow_ns: &'a str,
}

#[derive(Debug, Deserialize)]
struct FlowApiResponse {
    #[serde(default)]
    status: Option<String>,
}

/// Flow API client: store the reply in a custom field, then trigger the
/// flow that renders it.
pub struct FlowApiDispatcher {
    client: reqwest::Client,
    base_url: String,
    api_token: String,
    response_field: String,
    routes: FlowRoutes,
}

impl FlowApiDispatcher {
    /// Build the dispatcher. Fails when the API token or the default flow
    /// namespace is missing; a server that cannot deliver replies must not
    /// start.
    pub fn new(config: OutboundConfig) -> Result<Self> {
        let api_token = config
            .api_token
            .as_deref()
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .context("outbound API token is not configured")?
            .to_string();
        if config.routes.default_flow.trim().is_empty() {
            anyhow::bail!("outbound default flow namespace is not configured");
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .context("failed to build outbound HTTP client")?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_token,
            response_field: config.response_field,
            routes: config.routes,
        })
    }

    async fn post_json<T: Serialize>(&self, path: &str, body: &T) -> Result<()> {
        let url = format!("{}{path}", self.base_url);
        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_token))
            .json(body)
            .send()
            .await
            .with_context(|| format!("flow API request to {path} failed"))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .with_context(|| format!("failed to read flow API response from {path}"))?;
        if !status.is_success() {
            anyhow::bail!("flow API {path} returned {status}: {text}");
        }
        let parsed: FlowApiResponse = serde_json::from_str(&text)
            .with_context(|| format!("flow API response from {path} is not valid JSON: {text}"))?;
        if parsed.status.as_deref() != Some("success") {
            anyhow::bail!("flow API {path} reported failure: {text}");
        }
        Ok(())
    }

    async fn set_field_and_trigger(
        &self,
        subscriber_id: &str,
        flow_ns: &str,
        reply: &str,
    ) -> Result<()> {
        self.post_json(
            "/subscriber/setCustomFieldByName",
            &SetFieldRequest {
                subscriber_id,
                field_name: &self.response_field,
                field_value: reply,
            },
        )
        .await?;
        tracing::debug!(
            event = PipelineEvent::OutboundFieldSet.as_str(),
            subscriber_id,
            field_name = %self.response_field,
            reply_chars = reply.chars().count(),
            "reply stored in custom field"
        );

        self.post_json(
            "/sending/sendFlow",
            &SendFlowRequest {
                subscriber_id,
                flow_ns,
            },
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl OutboundChannel for FlowApiDispatcher {
    async fn deliver_reply(
        &self,
        subscriber_id: &str,
        platform: Option<&str>,
        reply: &str,
        payment_confirmed: bool,
    ) -> Result<()> {
        let flow_ns = self.routes.select(platform, payment_confirmed);
        match self
            .set_field_and_trigger(subscriber_id, flow_ns, reply)
            .await
        {
            Ok(()) => {
                tracing::info!(
                    event = PipelineEvent::OutboundFlowTriggered.as_str(),
                    subscriber_id,
                    flow_ns = %flow_ns,
                    platform = platform.unwrap_or("unknown"),
                    payment_confirmed,
                    "reply flow triggered"
                );
                Ok(())
            }
            Err(error) => {
                tracing::warn!(
                    event = PipelineEvent::OutboundDeliveryFailed.as_str(),
                    subscriber_id,
                    flow_ns = %flow_ns,
                    error = %error,
                    "reply delivery failed"
                );
                Err(error)
            }
        }
    }
}
