#![allow(missing_docs)]

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use conserje::DebounceScheduler;
use tokio::sync::mpsc;

const QUIET: Duration = Duration::from_millis(250);
const WELL_PAST_QUIET: Duration = Duration::from_secs(2);

#[tokio::test]
async fn fires_once_after_the_quiet_period() -> Result<()> {
    let scheduler = Arc::new(DebounceScheduler::new(QUIET));
    let (tx, mut rx) = mpsc::channel(8);

    let armed_at = tokio::time::Instant::now();
    scheduler
        .schedule("s1", move || async move {
            let _ = tx.send("fired").await;
        })
        .await;
    assert_eq!(scheduler.pending_timers().await, 1);

    let fired = tokio::time::timeout(WELL_PAST_QUIET, rx.recv()).await?;
    assert_eq!(fired, Some("fired"));
    assert!(
        armed_at.elapsed() >= QUIET,
        "debounce fired before the quiet period elapsed"
    );
    assert_eq!(scheduler.pending_timers().await, 0);

    // One schedule, one firing.
    assert!(
        tokio::time::timeout(Duration::from_millis(150), rx.recv())
            .await
            .is_err()
    );
    Ok(())
}

#[tokio::test]
async fn rescheduling_resets_the_timer_and_fires_once() -> Result<()> {
    let scheduler = Arc::new(DebounceScheduler::new(QUIET));
    let (tx, mut rx) = mpsc::channel(8);

    for round in 0..2u64 {
        let tx = tx.clone();
        scheduler
            .schedule("s1", move || async move {
                let _ = tx.send(round).await;
            })
            .await;
        tokio::time::sleep(QUIET / 5).await;
    }
    let armed_at = tokio::time::Instant::now();
    scheduler
        .schedule("s1", move || async move {
            let _ = tx.send(2).await;
        })
        .await;

    let fired = tokio::time::timeout(WELL_PAST_QUIET, rx.recv()).await?;
    assert_eq!(fired, Some(2), "only the newest schedule may fire");
    assert!(
        armed_at.elapsed() >= QUIET,
        "debounce fired before the quiet period elapsed"
    );
    assert!(
        tokio::time::timeout(Duration::from_millis(150), rx.recv())
            .await
            .is_err()
    );
    Ok(())
}

#[tokio::test]
async fn subscribers_debounce_independently() -> Result<()> {
    let scheduler = Arc::new(DebounceScheduler::new(QUIET));
    let (tx, mut rx) = mpsc::channel(8);

    for subscriber_id in ["s1", "s2"] {
        let tx = tx.clone();
        scheduler
            .schedule(subscriber_id, move || async move {
                let _ = tx.send(subscriber_id).await;
            })
            .await;
    }
    assert_eq!(scheduler.pending_timers().await, 2);

    let mut fired = vec![
        tokio::time::timeout(WELL_PAST_QUIET, rx.recv())
            .await?
            .unwrap_or_default(),
        tokio::time::timeout(WELL_PAST_QUIET, rx.recv())
            .await?
            .unwrap_or_default(),
    ];
    fired.sort_unstable();
    assert_eq!(fired, vec!["s1", "s2"]);
    Ok(())
}

#[tokio::test]
async fn rapid_rescheduling_never_double_fires() -> Result<()> {
    let scheduler = Arc::new(DebounceScheduler::new(Duration::from_millis(50)));
    let (tx, mut rx) = mpsc::channel(64);

    for round in 0..20u64 {
        let tx = tx.clone();
        scheduler
            .schedule("s1", move || async move {
                let _ = tx.send(round).await;
            })
            .await;
    }
    drop(tx);

    let mut firings = 0;
    while let Ok(Some(_)) = tokio::time::timeout(Duration::from_millis(500), rx.recv()).await {
        firings += 1;
    }
    assert_eq!(firings, 1, "a reschedule burst must collapse to one firing");
    Ok(())
}
