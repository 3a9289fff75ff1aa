use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::observability::PipelineEvent;
use crate::transcript::MessageRole;

use super::{Decision, DecisionEngine, EngineConfig, TurnRequest};

/// Request body for chat completions (OpenAI format).
#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
    response_format: ResponseFormat,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: &'static str,
}

/// Response: choices[0].message.content carries the decision JSON.
#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: AssistantMessage,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    #[serde(default)]
    content: Option<String>,
}

/// OpenAI-compatible chat completions client returning [`Decision`]s.
pub struct HttpDecisionEngine {
    client: reqwest::Client,
    completions_url: String,
    api_key: String,
    config: EngineConfig,
}

impl HttpDecisionEngine {
    /// Build the engine client. Fails when no API key is configured; a
    /// server without engine credentials must not start.
    pub fn new(config: EngineConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .context("decision engine API key is not configured")?
            .to_string();
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .context("failed to build decision engine HTTP client")?;
        let completions_url = format!("{}/chat/completions", config.base_url.trim_end_matches('/'));
        Ok(Self {
            client,
            completions_url,
            api_key,
            config,
        })
    }

    fn system_prompt(&self, request: &TurnRequest) -> String {
        let mut prompt = self.config.system_prompt.clone();
        if !request.known_facts.is_empty() {
            let facts = serde_json::to_string(&request.known_facts).unwrap_or_default();
            prompt.push_str("\n\nDatos conocidos del huésped: ");
            prompt.push_str(&facts);
        }
        prompt
    }

    /// History normally already ends with the current user turn; the burst
    /// text is appended only when it is missing, so a failed history load
    /// still produces a valid chat.
    fn chat_messages(&self, request: &TurnRequest) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(request.history.len() + 2);
        messages.push(ChatMessage {
            role: "system",
            content: self.system_prompt(request),
        });
        for entry in &request.history {
            messages.push(ChatMessage {
                role: entry.role.as_str(),
                content: entry.text.clone(),
            });
        }
        let current_turn_present = request
            .history
            .last()
            .is_some_and(|last| last.role == MessageRole::User && last.text == request.message_text);
        if !current_turn_present {
            messages.push(ChatMessage {
                role: "user",
                content: request.message_text.clone(),
            });
        }
        messages
    }
}

#[async_trait]
impl DecisionEngine for HttpDecisionEngine {
    async fn decide(&self, request: &TurnRequest) -> Result<Decision> {
        let messages = self.chat_messages(request);
        tracing::debug!(
            event = PipelineEvent::EngineRequestStarted.as_str(),
            subscriber_id = %request.subscriber_id,
            model = %self.config.model,
            message_count = messages.len(),
            fact_count = request.known_facts.len(),
            "decision engine request started"
        );
        let body = ChatCompletionRequest {
            model: self.config.model.clone(),
            messages,
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
            response_format: ResponseFormat {
                format_type: "json_object",
            },
        };

        let result = self.run_completion(&body).await;
        match &result {
            Ok(decision) => {
                tracing::debug!(
                    event = PipelineEvent::EngineReplyReceived.as_str(),
                    subscriber_id = %request.subscriber_id,
                    reply_chars = decision.reply.chars().count(),
                    fact_count = decision.fact_updates.len(),
                    payment_confirmed = decision.payment_confirmed,
                    "decision engine reply received"
                );
            }
            Err(error) => {
                tracing::warn!(
                    event = PipelineEvent::EngineCallFailed.as_str(),
                    subscriber_id = %request.subscriber_id,
                    error = %error,
                    "decision engine call failed"
                );
            }
        }
        result
    }
}

impl HttpDecisionEngine {
    async fn run_completion(&self, body: &ChatCompletionRequest) -> Result<Decision> {
        let response = self
            .client
            .post(&self.completions_url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(body)
            .send()
            .await
            .context("decision engine request failed")?;
        let status = response.status();
        let text = response
            .text()
            .await
            .context("failed to read decision engine response body")?;
        if !status.is_success() {
            anyhow::bail!("decision engine returned {status}: {text}");
        }
        let parsed: ChatCompletionResponse = serde_json::from_str(&text)
            .with_context(|| format!("decision engine response is not valid JSON: {text}"))?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .context("decision engine response has no content")?;
        Decision::parse(&content)
    }
}
