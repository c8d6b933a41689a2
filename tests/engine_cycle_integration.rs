//! End-to-end cycle execution tests against a real engine.

use std::sync::Arc;

use serde_json::json;
use tempfile::TempDir;

use eaos_autonomy::domain::models::approval::HdmLevel;
use eaos_autonomy::domain::models::config::EngineConfig;
use eaos_autonomy::domain::models::cycle::{CycleKind, CycleStatus, TaskStatus};
use eaos_autonomy::domain::models::state::RuntimeState;
use eaos_autonomy::services::engine::{AutonomyEngine, CycleOptions, LogQuery};

fn config(root: &TempDir) -> EngineConfig {
    EngineConfig::new(root.path())
}

#[tokio::test]
async fn test_monthly_cycle_blocked_by_approval_gate() {
    let root = TempDir::new().unwrap();
    let mut cfg = config(&root);
    cfg.hdm_level = HdmLevel::Routine; // Level 1; monthly tasks need 2.
    let engine = AutonomyEngine::builder(cfg).build();
    engine.initialize().await.unwrap();

    let bus = engine.bus();
    let report = engine
        .run_cycle(CycleKind::Monthly, CycleOptions::forced())
        .await
        .unwrap()
        .expect("forced cycle must run");

    // Every monthly task is skipped, none executed.
    assert_eq!(report.tasks.len(), 3);
    for task in &report.tasks {
        assert_eq!(task.status, TaskStatus::Skipped);
        assert_eq!(
            task.reason.as_deref(),
            Some("requires higher approval level")
        );
    }

    // One approval event per gated task; cycle completes cleanly.
    let approvals = bus.history(Some("autonomy:approval:required")).await;
    assert_eq!(approvals.len(), 3);
    assert_eq!(report.status, CycleStatus::Completed);
    assert!(report.errors.is_empty());

    // Completion is still recorded.
    let status = engine.get_status().await;
    assert_eq!(status.last_cycle_run.monthly, report.end_time);
}

#[tokio::test]
async fn test_wildcard_subscriber_sees_cycle_events_in_order() {
    let root = TempDir::new().unwrap();
    let engine = AutonomyEngine::builder(config(&root)).build();
    engine.initialize().await.unwrap();

    let seen = Arc::new(tokio::sync::Mutex::new(Vec::<String>::new()));
    {
        let seen = seen.clone();
        engine
            .bus()
            .on("autonomy:*", move |event| {
                let seen = seen.clone();
                Box::pin(async move {
                    seen.lock().await.push(event.name.clone());
                    Ok(())
                })
            })
            .await
            .unwrap();
    }

    engine
        .run_cycle(CycleKind::Daily, CycleOptions::forced())
        .await
        .unwrap()
        .expect("forced cycle must run");

    let events = seen.lock().await.clone();
    let pos = |name: &str| events.iter().position(|e| e == name);

    let start = pos("autonomy:cycle:start").expect("missing cycle:start");
    let end = pos("autonomy:cycle:end").expect("missing cycle:end");
    let task_start = pos("autonomy:task:start").expect("missing task:start");
    let task_end = pos("autonomy:task:end").expect("missing task:end");

    assert!(start < task_start);
    assert!(task_start < task_end);
    assert!(task_end < end);
}

#[tokio::test]
async fn test_cycle_returns_none_unless_running() {
    let root = TempDir::new().unwrap();
    let engine = AutonomyEngine::builder(config(&root)).build();
    engine.initialize().await.unwrap();

    // Stopped engine without force: no cycle.
    let report = engine
        .run_cycle(CycleKind::Daily, CycleOptions::default())
        .await
        .unwrap();
    assert!(report.is_none());

    // Paused engine also skips scheduled runs.
    engine.start().await.unwrap();
    engine.pause().await.unwrap();
    let report = engine
        .run_cycle(CycleKind::Daily, CycleOptions::default())
        .await
        .unwrap();
    assert!(report.is_none());

    // Resumed engine runs.
    engine.resume().await.unwrap();
    let report = engine
        .run_cycle(CycleKind::Daily, CycleOptions::default())
        .await
        .unwrap();
    assert!(report.is_some());

    engine.stop().await.unwrap();
}

#[tokio::test]
async fn test_start_stop_idempotent() {
    let root = TempDir::new().unwrap();
    let engine = AutonomyEngine::builder(config(&root)).build();
    engine.initialize().await.unwrap();

    engine.start().await.unwrap();
    engine.start().await.unwrap();
    assert_eq!(engine.runtime_state().await, RuntimeState::Running);
    // A second start must not stack another `*` subscription.
    assert_eq!(engine.bus().subscription_count().await, 1);

    engine.stop().await.unwrap();
    engine.stop().await.unwrap();
    assert_eq!(engine.runtime_state().await, RuntimeState::Stopped);
    assert_eq!(engine.bus().subscription_count().await, 0);
}

#[tokio::test]
async fn test_lifecycle_events_emitted() {
    let root = TempDir::new().unwrap();
    let engine = AutonomyEngine::builder(config(&root)).build();
    engine.initialize().await.unwrap();

    engine.start().await.unwrap();
    engine.pause().await.unwrap();
    engine.resume().await.unwrap();
    engine.stop().await.unwrap();

    let names: Vec<String> = engine
        .bus()
        .history(Some("autonomy:engine:*"))
        .await
        .into_iter()
        .map(|e| e.name)
        .collect();
    assert_eq!(
        names,
        vec![
            "autonomy:engine:start",
            "autonomy:engine:pause",
            "autonomy:engine:resume",
            "autonomy:engine:stop",
        ]
    );
}

#[tokio::test]
async fn test_get_logs_filters() {
    let root = TempDir::new().unwrap();
    let engine = AutonomyEngine::builder(config(&root)).build();
    engine.initialize().await.unwrap();

    engine
        .run_cycle(CycleKind::Daily, CycleOptions::forced())
        .await
        .unwrap();
    engine
        .run_cycle(CycleKind::Weekly, CycleOptions::forced())
        .await
        .unwrap();
    engine
        .run_cycle(CycleKind::Daily, CycleOptions::forced())
        .await
        .unwrap();

    let all = engine.get_logs(LogQuery::default()).await;
    assert_eq!(all.len(), 3);
    // Newest first.
    assert_eq!(all[0].kind, CycleKind::Daily);
    assert_eq!(all[1].kind, CycleKind::Weekly);

    let daily = engine
        .get_logs(LogQuery {
            kind: Some(CycleKind::Daily),
            ..LogQuery::default()
        })
        .await;
    assert_eq!(daily.len(), 2);

    let limited = engine
        .get_logs(LogQuery {
            limit: Some(1),
            ..LogQuery::default()
        })
        .await;
    assert_eq!(limited.len(), 1);
}

#[tokio::test]
async fn test_paused_engine_ignores_events() {
    let root = TempDir::new().unwrap();
    let engine = AutonomyEngine::builder(config(&root)).build();
    engine.initialize().await.unwrap();
    engine.start().await.unwrap();
    engine.pause().await.unwrap();

    // A matching metric sample must not fire the trigger while paused.
    engine
        .bus()
        .emit("metrics:sample", json!({ "errorRate": 0.99 }))
        .await;

    let trigger = engine
        .get_triggers()
        .await
        .into_iter()
        .find(|t| t.id == "error-rate-alert")
        .unwrap();
    assert_eq!(trigger.fire_count, 0);

    engine.stop().await.unwrap();
}
