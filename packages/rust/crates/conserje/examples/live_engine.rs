//! Issue one real decision-engine call against a chat completions API.
//!
//! ```text
//! OPENROUTER_API_KEY=sk-... cargo run -p conserje --example live_engine -- \
//!     "Hola, ¿tienen una suite libre este sábado?"
//! ```
//!
//! The message defaults to a greeting when no argument is given; set
//! `CONSERJE_MODEL` to override the model.

use std::collections::HashMap;

use anyhow::Context as _;
use conserje::{DecisionEngine, EngineConfig, HttpDecisionEngine, TurnRequest};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let api_key = std::env::var("OPENROUTER_API_KEY")
        .ok()
        .map(|key| key.trim().to_string())
        .filter(|key| !key.is_empty())
        .context("set OPENROUTER_API_KEY to run this example")?;
    let message = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "Hola, ¿tienen una habitación doble para el fin de semana?".to_string());

    let mut config = EngineConfig {
        api_key: Some(api_key),
        ..EngineConfig::default()
    };
    if let Some(model) = std::env::var("CONSERJE_MODEL")
        .ok()
        .map(|model| model.trim().to_string())
        .filter(|model| !model.is_empty())
    {
        config.model = model;
    }
    println!("model: {}", config.model);
    println!("user: {message}");

    let engine = HttpDecisionEngine::new(config)?;
    let mut known_facts = HashMap::new();
    known_facts.insert("first_name".to_string(), "Ana".to_string());
    let decision = engine
        .decide(&TurnRequest {
            subscriber_id: "example-subscriber".to_string(),
            message_text: message,
            known_facts,
            history: Vec::new(),
        })
        .await?;

    println!("reply: {}", decision.reply);
    if !decision.fact_updates.is_empty() {
        println!("fact updates:");
        for (key, value) in &decision.fact_updates {
            println!("  {key} = {value}");
        }
    }
    if decision.payment_confirmed {
        println!("payment confirmed");
    }
    Ok(())
}
