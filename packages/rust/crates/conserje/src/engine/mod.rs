//! Decision engine: turns a drained burst into a reply plus fact updates.
//!
//! The engine receives the whole conversation (full history, merged fact
//! map, combined burst text) and answers with a [`Decision`]. The production
//! implementation is [`HttpDecisionEngine`], an OpenAI-compatible chat
//! completions client; tests substitute their own `DecisionEngine`.

use std::collections::HashMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;

use crate::transcript::TranscriptMessage;

mod http;

pub use http::HttpDecisionEngine;

/// Default chat completions API base URL.
pub const DEFAULT_ENGINE_BASE_URL: &str = "https://openrouter.ai/api/v1";

/// Default model identifier.
pub const DEFAULT_ENGINE_MODEL: &str = "deepseek/deepseek-chat";

/// Default sampling temperature.
pub const DEFAULT_ENGINE_TEMPERATURE: f32 = 0.7;

/// Default completion token cap.
pub const DEFAULT_ENGINE_MAX_TOKENS: u32 = 2_000;

/// Default request timeout in seconds.
pub const DEFAULT_ENGINE_TIMEOUT_SECS: u64 = 30;

/// Default system prompt. Pins the JSON decision contract the parser expects.
pub const DEFAULT_SYSTEM_PROMPT: &str = "Eres el conserje virtual de un hotel boutique. \
Atiende a los huéspedes con calidez y respuestas breves, en el idioma en que te escriban. \
Responde SIEMPRE con un único objeto JSON de esta forma: \
{\"reply\": \"texto para el huésped\", \"fact_updates\": {}, \"payment_confirmed\": false}. \
En fact_updates incluye únicamente los datos nuevos o corregidos que haya que recordar de este turno \
(por ejemplo nombre, fechas, tipo de habitación); déjalo vacío si no hay nada nuevo. \
Marca payment_confirmed en true solo si el huésped confirma explícitamente que ya realizó el pago.";

/// Runtime config for the HTTP decision engine.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Chat completions API base URL (`/chat/completions` is appended).
    pub base_url: String,
    /// Bearer token; required at startup for the HTTP engine.
    pub api_key: Option<String>,
    /// Model identifier passed through to the API.
    pub model: String,
    /// Sampling temperature.
    pub temperature: f32,
    /// Completion token cap.
    pub max_tokens: u32,
    /// Whole-request timeout in seconds.
    pub timeout_secs: u64,
    /// System prompt establishing persona and the JSON decision contract.
    pub system_prompt: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_ENGINE_BASE_URL.to_string(),
            api_key: None,
            model: DEFAULT_ENGINE_MODEL.to_string(),
            temperature: DEFAULT_ENGINE_TEMPERATURE,
            max_tokens: DEFAULT_ENGINE_MAX_TOKENS,
            timeout_secs: DEFAULT_ENGINE_TIMEOUT_SECS,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
        }
    }
}

/// Everything the engine sees for one turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnRequest {
    pub subscriber_id: String,
    /// Burst fragments joined into one logical user message.
    pub message_text: String,
    /// Durable facts merged with transient metadata, durable values winning.
    pub known_facts: HashMap<String, String>,
    /// Full conversation history; normally already ends with the current
    /// user turn.
    pub history: Vec<TranscriptMessage>,
}

/// Engine output for one turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    /// Reply text for the subscriber; never empty.
    pub reply: String,
    /// Sparse fact updates; only keys mentioned this turn.
    pub fact_updates: HashMap<String, String>,
    /// Routing hint for the payment-confirmed outbound flow.
    pub payment_confirmed: bool,
}

#[derive(Debug, Deserialize)]
struct RawDecision {
    #[serde(default)]
    reply: Option<String>,
    #[serde(default, alias = "facts")]
    fact_updates: HashMap<String, serde_json::Value>,
    #[serde(default, alias = "paymentConfirmed")]
    payment_confirmed: bool,
}

impl Decision {
    /// Parse a decision from the model's JSON content.
    ///
    /// Fact values arriving as numbers or booleans are coerced to strings;
    /// null values are dropped (an absent key means "leave it alone", and
    /// null carries no storable value). A missing or blank reply is an
    /// error — the caller substitutes the fallback reply in that case.
    pub fn parse(content: &str) -> Result<Self> {
        let raw: RawDecision =
            serde_json::from_str(content.trim()).context("decision content is not valid JSON")?;
        let reply = raw
            .reply
            .map(|reply| reply.trim().to_string())
            .filter(|reply| !reply.is_empty())
            .context("decision reply is missing or empty")?;
        let mut fact_updates = HashMap::new();
        for (key, value) in raw.fact_updates {
            let coerced = match value {
                serde_json::Value::Null => continue,
                serde_json::Value::String(text) => text,
                other => other.to_string(),
            };
            if coerced.trim().is_empty() {
                continue;
            }
            fact_updates.insert(key, coerced);
        }
        Ok(Self {
            reply,
            fact_updates,
            payment_confirmed: raw.payment_confirmed,
        })
    }
}

/// Collaborator that decides each turn's reply.
#[async_trait]
pub trait DecisionEngine: Send + Sync {
    /// Produce a decision for one drained burst.
    async fn decide(&self, request: &TurnRequest) -> Result<Decision>;
}
