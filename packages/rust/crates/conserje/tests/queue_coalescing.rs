#![allow(missing_docs)]

use anyhow::{Context, Result};
use conserje::{InboundMessage, QueueBackend, QueueConfig, DEFAULT_QUEUE_KEY_PREFIX};

const QUIET_MS: u64 = 1_000;

fn message(subscriber_id: &str, text: &str) -> InboundMessage {
    InboundMessage {
        subscriber_id: subscriber_id.to_string(),
        text: text.to_string(),
        first_name: None,
        last_name: None,
        platform: None,
    }
}

fn quiet_queue() -> Result<std::sync::Arc<dyn conserje::CoalescingQueue>> {
    QueueConfig {
        quiet_period_ms: QUIET_MS,
        ..QueueConfig::default()
    }
    .build_queue()
}

#[tokio::test]
async fn fragments_coalesce_in_arrival_order() -> Result<()> {
    let queue = quiet_queue()?;

    assert_eq!(queue.append(&message("s1", "Hola"), 1_000).await?, 1);
    assert_eq!(
        queue
            .append(&message("s1", "quiero una habitacion"), 1_300)
            .await?,
        2
    );

    // Not yet due: one millisecond short of the quiet period.
    assert!(queue.take_due("s1", 1_300 + QUIET_MS - 1).await?.is_none());

    let entry = queue
        .take_due("s1", 1_300 + QUIET_MS)
        .await?
        .context("expected a due entry")?;
    assert_eq!(entry.fragments, vec!["Hola", "quiero una habitacion"]);
    assert_eq!(entry.combined_text(), "Hola\nquiero una habitacion");
    assert_eq!(entry.first_received_ms, 1_000);
    assert_eq!(entry.last_received_ms, 1_300);
    Ok(())
}

#[tokio::test]
async fn drain_removes_the_entry() -> Result<()> {
    let queue = quiet_queue()?;
    queue.append(&message("s1", "Hola"), 0).await?;

    assert!(queue.take_due("s1", QUIET_MS).await?.is_some());
    assert!(queue.take_due("s1", QUIET_MS).await?.is_none());
    Ok(())
}

#[tokio::test]
async fn drain_of_absent_entry_is_a_no_op() -> Result<()> {
    let queue = quiet_queue()?;
    assert!(queue.take_due("nobody", QUIET_MS).await?.is_none());
    Ok(())
}

#[tokio::test]
async fn new_fragment_extends_the_drain_deadline() -> Result<()> {
    let queue = quiet_queue()?;
    queue.append(&message("s1", "primera"), 0).await?;
    queue.append(&message("s1", "segunda"), QUIET_MS - 1).await?;

    // The first fragment's deadline has passed, but the newest has not.
    assert!(queue.take_due("s1", QUIET_MS + 500).await?.is_none());

    let entry = queue
        .take_due("s1", (QUIET_MS - 1) + QUIET_MS)
        .await?
        .context("expected a due entry")?;
    assert_eq!(entry.fragments.len(), 2);
    Ok(())
}

#[tokio::test]
async fn abandoned_entry_expires_after_ttl() -> Result<()> {
    let queue = QueueConfig {
        quiet_period_ms: 100,
        entry_ttl_secs: 1,
        ..QueueConfig::default()
    }
    .build_queue()?;

    queue.append(&message("s1", "Hola"), 0).await?;
    assert!(queue.take_due("s1", 1_500).await?.is_none());
    Ok(())
}

#[tokio::test]
async fn profile_metadata_latest_value_wins() -> Result<()> {
    let queue = quiet_queue()?;

    let mut first = message("s1", "Hola");
    first.first_name = Some("Ana".to_string());
    first.platform = Some("instagram".to_string());
    queue.append(&first, 0).await?;

    let mut second = message("s1", "soy yo otra vez");
    second.first_name = Some("Ana María".to_string());
    queue.append(&second, 100).await?;

    let entry = queue
        .take_due("s1", 100 + QUIET_MS)
        .await?
        .context("expected a due entry")?;
    assert_eq!(entry.first_name.as_deref(), Some("Ana María"));
    // Absent metadata on a later fragment leaves the stored value alone.
    assert_eq!(entry.platform.as_deref(), Some("instagram"));
    Ok(())
}

#[tokio::test]
async fn conversations_are_isolated() -> Result<()> {
    let queue = quiet_queue()?;
    queue.append(&message("s1", "uno"), 0).await?;
    queue.append(&message("s2", "dos"), 0).await?;

    let drained = queue
        .take_due("s1", QUIET_MS)
        .await?
        .context("expected a due entry")?;
    assert_eq!(drained.combined_text(), "uno");

    let remaining = queue
        .take_due("s2", QUIET_MS)
        .await?
        .context("expected the other conversation untouched")?;
    assert_eq!(remaining.combined_text(), "dos");
    Ok(())
}

#[test]
fn redis_config_normalizes_empty_prefix_and_zero_periods() {
    let config = QueueConfig {
        backend: QueueBackend::Redis {
            url: "redis://valkey.local:6379/0".to_string(),
            key_prefix: String::new(),
        },
        quiet_period_ms: 0,
        entry_ttl_secs: 0,
    }
    .normalized();
    assert_eq!(config.quiet_period_ms, 1);
    assert_eq!(config.entry_ttl_secs, 1);
    match config.backend {
        QueueBackend::Redis { key_prefix, .. } => {
            assert_eq!(key_prefix, DEFAULT_QUEUE_KEY_PREFIX);
        }
        QueueBackend::Memory => panic!("unexpected memory backend"),
    }
}
