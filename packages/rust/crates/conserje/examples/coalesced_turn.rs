//! Drive one coalesced turn fully in memory, no credentials required.
//!
//! A burst of three webhook fragments lands in the queue; once the quiet
//! period elapses the pipeline drains it into a single engine call and one
//! reply:
//!
//! ```text
//! cargo run -p conserje --example coalesced_turn
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use conserje::{
    Decision, DecisionEngine, FactMerger, FactsConfig, InboundMessage, LockConfig, OutboundChannel,
    QueueConfig, TranscriptConfig, TurnPipeline, TurnPipelineParts, TurnRequest,
    DEFAULT_FALLBACK_REPLY, DEFAULT_MERGE_ATTEMPTS, DEFAULT_MERGE_BACKOFF_MS,
};

const QUIET_MS: u64 = 300;

fn unix_ms() -> u64 {
    u64::try_from(
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis(),
    )
    .unwrap_or(u64::MAX)
}

/// Stands in for the chat completions API so the demo runs offline.
struct ScriptedEngine;

#[async_trait]
impl DecisionEngine for ScriptedEngine {
    async fn decide(&self, request: &TurnRequest) -> anyhow::Result<Decision> {
        println!("engine sees one combined message:");
        for line in request.message_text.lines() {
            println!("  | {line}");
        }
        let guest = request
            .known_facts
            .get("first_name")
            .map_or("viajero", String::as_str);
        let mut fact_updates = HashMap::new();
        fact_updates.insert("room_type".to_string(), "doble".to_string());
        Ok(Decision {
            reply: format!("¡Con gusto, {guest}! La habitación doble queda apartada."),
            fact_updates,
            payment_confirmed: false,
        })
    }
}

/// Prints deliveries instead of calling the flow API.
struct ConsoleOutbound;

#[async_trait]
impl OutboundChannel for ConsoleOutbound {
    async fn deliver_reply(
        &self,
        subscriber_id: &str,
        platform: Option<&str>,
        reply: &str,
        _payment_confirmed: bool,
    ) -> anyhow::Result<()> {
        println!(
            "deliver to {subscriber_id} via {}: {reply}",
            platform.unwrap_or("default flow")
        );
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let queue = QueueConfig {
        quiet_period_ms: QUIET_MS,
        ..QueueConfig::default()
    }
    .build_queue()?;
    let transcript = TranscriptConfig::default().build_store()?;
    let facts = FactsConfig::default().build_store()?;

    let pipeline = TurnPipeline::new(TurnPipelineParts {
        queue: Arc::clone(&queue),
        lock: LockConfig::default().build_lock()?,
        transcript: Arc::clone(&transcript),
        facts: Arc::clone(&facts),
        merger: FactMerger::new(
            Arc::clone(&facts),
            DEFAULT_MERGE_ATTEMPTS,
            Duration::from_millis(DEFAULT_MERGE_BACKOFF_MS),
        ),
        engine: Arc::new(ScriptedEngine),
        outbound: Arc::new(ConsoleOutbound),
        fallback_reply: DEFAULT_FALLBACK_REPLY.to_string(),
    });

    let subscriber = "demo-subscriber";
    let fragments = ["Hola", "quiero una habitación", "para este fin de semana"];
    for (index, text) in fragments.iter().enumerate() {
        let count = queue
            .append(
                &InboundMessage {
                    subscriber_id: subscriber.to_string(),
                    text: (*text).to_string(),
                    first_name: (index == 0).then(|| "Ana".to_string()),
                    last_name: None,
                    platform: Some("instagram".to_string()),
                },
                unix_ms(),
            )
            .await?;
        println!("buffered fragment {count}: {text}");
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    // Too early: the newest fragment is still inside the quiet period.
    let outcome = pipeline.process_due(subscriber).await;
    println!("dispatch before the quiet period: {outcome:?}");

    tokio::time::sleep(Duration::from_millis(QUIET_MS + 100)).await;
    let outcome = pipeline.process_due(subscriber).await;
    println!("dispatch after the quiet period: {outcome:?}");

    println!("transcript:");
    for message in transcript.history(subscriber).await? {
        println!("  {}: {}", message.role.as_str(), message.text);
    }
    println!("facts: {:?}", facts.load(subscriber).await?);
    Ok(())
}
