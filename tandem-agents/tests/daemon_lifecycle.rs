//! Daemon loop behaviour against the in-memory stores.

use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tandem_agents::{AgentDaemon, DaemonCallbacks, MessageCache};
use tandem_core::{AgentRole, MessagePriority, TandemError, TandemResult, TaskPayload, TaskType};
use tandem_test_utils::assertions::*;
use tandem_test_utils::fixtures::*;

#[tokio::test]
async fn test_heartbeat_cadence() -> TandemResult<()> {
    let (_, repo) = shared_repository();
    let config = fast_config("Coder", AgentRole::Coder)
        .with_process_messages(false)
        .with_heartbeat_interval(Duration::from_millis(100));
    let daemon = AgentDaemon::new(config, repo.clone(), brain_store())?;

    daemon.start().await?;
    tokio::time::sleep(Duration::from_millis(350)).await;
    daemon.stop().await?;

    let beats = MessageCache::new("Monitor", repo)
        .receive_heartbeats("Monitor")
        .await?;
    assert!(
        (2..=4).contains(&beats.len()),
        "expected 2..=4 heartbeats, got {}",
        beats.len()
    );
    assert!(beats.iter().all(|b| b.from_agent == "Coder"));
    assert!(beats.iter().all(|b| b.payload.ai_role == "coder"));
    Ok(())
}

#[tokio::test]
async fn test_lifecycle_misuse() -> TandemResult<()> {
    let (_, repo) = shared_repository();
    let daemon = AgentDaemon::new(quiet_config("Coder", AgentRole::Coder), repo, brain_store())?;

    assert_not_running(&daemon.stop().await);
    assert_not_running(&daemon.send_message("Overseer", tandem_core::MessageKind::Task, json!({})).await);
    assert_not_running(&daemon.update_brain_state("k", json!(1)).await);

    assert_ok(&daemon.start().await);
    assert_already_running(&daemon.start().await);
    assert_ok(&daemon.stop().await);
    assert_not_running(&daemon.stop().await);
    Ok(())
}

#[tokio::test]
async fn test_invalid_config_is_rejected() {
    let (_, repo) = shared_repository();
    let config = quiet_config("Coder", AgentRole::Coder).with_poll_interval(Duration::ZERO);
    let result = AgentDaemon::new(config, repo, brain_store()).map(|_| ());
    assert_config_error(&result);
}

#[tokio::test]
async fn test_no_callbacks_after_stop() -> TandemResult<()> {
    let (_, repo) = shared_repository();
    MessageCache::new("Overseer", repo.clone())
        .send_task(
            "Coder",
            TaskPayload::new("t1", "left pending", TaskType::Coding),
            MessagePriority::Normal,
        )
        .await?;

    // The task stays pending, so every tick redelivers it.
    let calls = Arc::new(AtomicU64::new(0));
    let counter = calls.clone();
    let callbacks = DaemonCallbacks::new().on_task(move |_| {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<(), TandemError>(())
        }
    });

    let daemon = AgentDaemon::new(
        fast_config("Coder", AgentRole::Coder).with_auto_heartbeat(false),
        repo,
        brain_store(),
    )?;
    daemon.set_callbacks(callbacks).await;
    daemon.start().await?;
    assert!(eventually(|| calls.load(Ordering::SeqCst) >= 2, Duration::from_secs(2)).await);
    daemon.stop().await?;

    let after_stop = calls.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(calls.load(Ordering::SeqCst), after_stop);
    Ok(())
}

#[tokio::test]
async fn test_failing_callback_does_not_end_loop() -> TandemResult<()> {
    let (_, repo) = shared_repository();
    MessageCache::new("Overseer", repo.clone())
        .send_task(
            "Coder",
            TaskPayload::new("t1", "always fails", TaskType::Coding),
            MessagePriority::Normal,
        )
        .await?;

    let errors = Arc::new(AtomicU64::new(0));
    let sink = errors.clone();
    let callbacks = DaemonCallbacks::new()
        .on_task(|_| async {
            Err::<(), TandemError>(
                tandem_core::ValidationError::InvalidValue {
                    field: "task".to_string(),
                    reason: "cannot handle".to_string(),
                }
                .into(),
            )
        })
        .on_error(move |_| {
            sink.fetch_add(1, Ordering::SeqCst);
        });

    let daemon = AgentDaemon::new(
        fast_config("Coder", AgentRole::Coder).with_auto_heartbeat(false),
        repo,
        brain_store(),
    )?;
    daemon.set_callbacks(callbacks).await;
    daemon.start().await?;
    assert!(eventually(|| errors.load(Ordering::SeqCst) >= 3, Duration::from_secs(2)).await);
    assert!(daemon.is_running().await);
    daemon.stop().await?;

    let metrics = daemon.metrics();
    assert_eq!(metrics.callback_errors, errors.load(Ordering::SeqCst));
    assert_eq!(metrics.loop_errors, 0);
    Ok(())
}
