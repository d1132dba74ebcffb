//! End-to-end workflow tests
//!
//! These drive the engine with in-process fakes for the provider and the
//! owner record store, using tokio's paused clock where the real polling loop
//! is involved.

mod fixtures;

use fixtures::{fast_config, FailingPersistence, GatedClient, GatedCreationClient, ScriptedClient};
use provisioner::client::ClientError;
use provisioner::persistence::{
    InMemoryPersistence, OwnerRecord, OwnerUpdate, PersistenceAdapter, ProvisioningStatus,
};
use provisioner::workflow::{JobState, ManualClock, OwnerId, StatusReport, WorkflowEngine};
use provisioner::WorkflowConfig;
use std::sync::Arc;
use std::time::Duration;

fn owner(id: &str) -> OwnerId {
    OwnerId::from(id)
}

#[tokio::test(start_paused = true)]
async fn test_training_then_ready_completes_owner() {
    let client = Arc::new(ScriptedClient::new());
    client.script_status(
        "src-42",
        vec![Ok(StatusReport::training()), Ok(StatusReport::ready())],
    );
    client.script_creation("owner-1", Ok("derived-9".into()));
    let store = Arc::new(InMemoryPersistence::new());
    let engine = WorkflowEngine::new(client.clone(), store.clone(), WorkflowConfig::default());

    let job = engine.start("owner-1", "src-42");
    assert_eq!(job.state, JobState::Polling);

    // First tick at five minutes: still training
    tokio::time::sleep(Duration::from_secs(301)).await;
    let polling = engine.get_status(&owner("owner-1")).unwrap();
    assert_eq!(polling.state, JobState::Polling);
    assert_eq!(polling.attempts, 1);

    // Second tick: ready, derived resource created, job removed
    tokio::time::sleep(Duration::from_secs(300)).await;
    assert!(engine.get_status(&owner("owner-1")).is_none());

    engine.flush().await.unwrap();
    let record = store.record(&owner("owner-1")).await.unwrap();
    assert_eq!(record.source_resource_id, Some("src-42".into()));
    assert_eq!(record.derived_resource_id, Some("derived-9".into()));
    assert_eq!(record.status, Some(ProvisioningStatus::Completed));
    assert_eq!(client.status_calls(), vec!["src-42", "src-42"]);
    assert_eq!(client.create_calls(), vec!["owner-1"]);

    // Nothing left to poll: the loop suspends on its next tick
    tokio::time::sleep(Duration::from_secs(300)).await;
    assert!(!engine.is_scheduler_running());

    // A new start brings it back
    engine.start("owner-2", "src-7");
    assert!(engine.is_scheduler_running());
}

#[tokio::test]
async fn test_start_twice_keeps_first_job() {
    let store = Arc::new(InMemoryPersistence::new());
    let engine = WorkflowEngine::new(Arc::new(ScriptedClient::new()), store.clone(), fast_config(10));

    let first = engine.start("owner-1", "src-42");
    let again = engine.start("owner-1", "src-other");

    assert_eq!(first.id, again.id);
    assert_eq!(again.source_resource_id.as_str(), "src-42");
    assert_eq!(engine.active_jobs().len(), 1);
}

#[tokio::test]
async fn test_attempts_increase_once_per_tick() {
    let client = Arc::new(ScriptedClient::new());
    client.script_status(
        "src-42",
        vec![
            Ok(StatusReport::training()),
            Err(ClientError::Network("connection reset".to_string())),
            Ok(StatusReport::unknown("warming_up")),
        ],
    );
    let engine = WorkflowEngine::new(client, Arc::new(InMemoryPersistence::new()), fast_config(10));
    engine.start("owner-1", "src-42");

    for expected in 1..=3 {
        engine.tick_now().await;
        let job = engine.get_status(&owner("owner-1")).unwrap();
        assert_eq!(job.attempts, expected);
        assert_eq!(job.state, JobState::Polling);
    }

    let job = engine.get_status(&owner("owner-1")).unwrap();
    assert!(job.error.unwrap().contains("warming_up"));
}

#[tokio::test]
async fn test_never_ready_source_eventually_fails() {
    let store = Arc::new(InMemoryPersistence::new());
    let engine = WorkflowEngine::new(Arc::new(ScriptedClient::new()), store.clone(), fast_config(3));
    engine.start("owner-1", "src-42");

    for _ in 0..4 {
        engine.tick_now().await;
    }

    let job = engine.get_status(&owner("owner-1")).unwrap();
    assert_eq!(job.state, JobState::Failed);
    assert_eq!(job.error.as_deref(), Some("max attempts exceeded"));
    assert!(job.derived_resource_id.is_none());

    // Terminal jobs are not polled again
    let report = engine.tick_now().await;
    assert!(report.idle);

    engine.flush().await.unwrap();
    let record = store.record(&owner("owner-1")).await.unwrap();
    assert_eq!(record.status, Some(ProvisioningStatus::Failed));
    assert_eq!(record.error.as_deref(), Some("max attempts exceeded"));
}

#[tokio::test]
async fn test_upstream_failure_is_persisted() {
    let client = Arc::new(ScriptedClient::new());
    client.script_status("src-42", vec![Ok(StatusReport::failed("bad audio"))]);
    let store = Arc::new(InMemoryPersistence::new());
    let engine = WorkflowEngine::new(client.clone(), store.clone(), fast_config(10));
    engine.start("owner-1", "src-42");

    let report = engine.tick_now().await;
    engine.flush().await.unwrap();

    assert_eq!(report.failed, 1);
    assert!(client.create_calls().is_empty());
    let record = store.record(&owner("owner-1")).await.unwrap();
    assert_eq!(record.error.as_deref(), Some("bad audio"));
    assert!(record.derived_resource_id.is_none());
}

#[tokio::test]
async fn test_creation_failure_is_terminal() {
    let client = Arc::new(ScriptedClient::new());
    client.script_status("src-42", vec![Ok(StatusReport::ready())]);
    client.script_creation(
        "owner-1",
        Err(ClientError::Api {
            status: 400,
            message: "sample rejected".to_string(),
        }),
    );
    let engine = WorkflowEngine::new(client.clone(), Arc::new(InMemoryPersistence::new()), fast_config(10));
    engine.start("owner-1", "src-42");

    engine.tick_now().await;
    engine.tick_now().await;

    let job = engine.get_status(&owner("owner-1")).unwrap();
    assert_eq!(job.state, JobState::Failed);
    assert!(job.error.unwrap().contains("sample rejected"));
    assert_eq!(client.create_calls().len(), 1);
    assert_eq!(client.status_calls().len(), 1);
}

#[tokio::test]
async fn test_cancel_during_status_query_discards_result() {
    let client = Arc::new(GatedClient::new());
    let store = Arc::new(InMemoryPersistence::new());
    let engine = Arc::new(WorkflowEngine::new(client.clone(), store.clone(), fast_config(10)));
    engine.start("owner-1", "src-42");

    let ticking = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.tick_now().await })
    };
    client.entered.notified().await;

    assert!(engine.cancel(&owner("owner-1")).is_some());
    // Restart while the old query is still in flight
    let restarted = engine.start("owner-1", "src-43");
    client.release.notify_one();

    let report = ticking.await.unwrap();
    assert_eq!(report.processed, 0);
    assert_eq!(client.create_calls(), 0);

    let current = engine.get_status(&owner("owner-1")).unwrap();
    assert_eq!(current.id, restarted.id);
    assert_eq!(current.state, JobState::Polling);
    assert_eq!(current.attempts, 0);

    engine.flush().await.unwrap();
    let record = store.record(&owner("owner-1")).await.unwrap();
    assert_eq!(record.source_resource_id, Some("src-43".into()));
    assert!(record.derived_resource_id.is_none());
}

#[tokio::test]
async fn test_cancel_during_derived_creation_discards_completion() {
    let client = Arc::new(GatedCreationClient::new());
    let store = Arc::new(InMemoryPersistence::new());
    let engine = Arc::new(WorkflowEngine::new(client.clone(), store.clone(), fast_config(10)));
    engine.start("owner-1", "src-42");

    let ticking = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.tick_now().await })
    };
    client.entered.notified().await;
    assert_eq!(
        engine.get_status(&owner("owner-1")).unwrap().state,
        JobState::CreatingDerived
    );

    assert!(engine.cancel(&owner("owner-1")).is_some());
    client.release.notify_one();

    let report = ticking.await.unwrap();
    assert_eq!(report.completed, 0);
    assert_eq!(client.create_calls(), 1);
    assert!(engine.get_status(&owner("owner-1")).is_none());
    assert!(engine.active_jobs().is_empty());

    engine.flush().await.unwrap();
    let record = store.record(&owner("owner-1")).await.unwrap();
    assert_eq!(record.status, Some(ProvisioningStatus::Cancelled));
    assert!(record.derived_resource_id.is_none());
    assert!(record.completed_at.is_none());
}

#[tokio::test]
async fn test_cancelled_workflow_is_not_rehydrated() {
    let store = Arc::new(InMemoryPersistence::new());
    let engine = WorkflowEngine::new(Arc::new(ScriptedClient::new()), store.clone(), fast_config(10));
    engine.start("owner-1", "src-42");
    engine.start("owner-2", "src-7");
    assert!(engine.cancel(&owner("owner-1")).is_some());
    engine.shutdown().await.unwrap();

    let client = Arc::new(ScriptedClient::new());
    let restarted = WorkflowEngine::new(client.clone(), store.clone(), fast_config(10));

    assert_eq!(restarted.rehydrate().await.unwrap(), 1);
    assert!(restarted.get_status(&owner("owner-1")).is_none());
    assert!(restarted.get_status(&owner("owner-2")).is_some());

    restarted.tick_now().await;
    assert_eq!(client.status_calls(), vec!["src-7"]);
    assert!(client.create_calls().is_empty());
}

#[tokio::test]
async fn test_new_run_clears_previous_outcome() {
    let client = Arc::new(ScriptedClient::new());
    client.script_status("src-1", vec![Ok(StatusReport::ready())]);
    let store = Arc::new(InMemoryPersistence::new());
    let engine = WorkflowEngine::new(client, store.clone(), fast_config(10));
    engine.start("owner-1", "src-1");
    engine.tick_now().await;
    assert!(engine.get_status(&owner("owner-1")).is_none());

    engine.start("owner-1", "src-2");
    engine.flush().await.unwrap();

    let record = store.record(&owner("owner-1")).await.unwrap();
    assert_eq!(record.status, Some(ProvisioningStatus::InProgress));
    assert_eq!(record.source_resource_id, Some("src-2".into()));
    assert!(record.derived_resource_id.is_none());
    assert!(record.completed_at.is_none());
}

#[tokio::test]
async fn test_persistence_failures_do_not_stall_workflow() {
    let client = Arc::new(ScriptedClient::new());
    client.script_status("src-42", vec![Ok(StatusReport::ready())]);
    let store = Arc::new(FailingPersistence::new());
    let engine = WorkflowEngine::new(client, store.clone(), fast_config(10));

    engine.start("owner-1", "src-42");
    let report = engine.tick_now().await;
    engine.flush().await.unwrap();

    assert_eq!(report.completed, 1);
    assert!(engine.get_status(&owner("owner-1")).is_none());
    // started + completed, both rejected
    assert_eq!(store.attempts(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_jobs_in_a_tick_are_spaced_out() {
    let config = WorkflowConfig {
        inter_job_delay_ms: 1000,
        ..fast_config(10)
    };
    let engine = WorkflowEngine::new(Arc::new(ScriptedClient::new()), Arc::new(InMemoryPersistence::new()), config);
    engine.start("owner-1", "src-1");
    engine.start("owner-2", "src-2");
    engine.start("owner-3", "src-3");

    let started = tokio::time::Instant::now();
    let report = engine.tick_now().await;

    assert_eq!(report.processed, 3);
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(2));
    assert!(elapsed < Duration::from_secs(3));
}

#[tokio::test]
async fn test_cleanup_removes_only_stale_terminal_jobs() {
    let clock = Arc::new(ManualClock::default());
    let client = Arc::new(ScriptedClient::new());
    client.script_status("src-failed", vec![Ok(StatusReport::failed("boom"))]);
    let engine = WorkflowEngine::with_clock(
        client,
        Arc::new(InMemoryPersistence::new()),
        fast_config(10),
        clock.clone(),
    );
    engine.start("failed", "src-failed");
    engine.start("polling", "src-polling");
    engine.tick_now().await;

    clock.advance(chrono::Duration::hours(2));
    engine.start("fresh", "src-fresh");

    let removed = engine.cleanup();

    assert_eq!(removed, vec![owner("failed")]);
    assert!(engine.get_status(&owner("polling")).is_some());
    assert!(engine.get_status(&owner("fresh")).is_some());
    assert!(engine.cleanup_older_than(Duration::from_secs(0)).is_empty());
}

#[tokio::test]
async fn test_rehydrated_jobs_resume_polling() {
    let store = Arc::new(InMemoryPersistence::new());
    let now = chrono::Utc::now();
    let mut unfinished = OwnerRecord::empty(owner("owner-1"), now);
    unfinished.apply(OwnerUpdate::started("src-42".into(), now));
    store.insert_record(unfinished).await;
    let mut finished = OwnerRecord::empty(owner("owner-2"), now);
    finished.apply(OwnerUpdate::started("src-7".into(), now));
    finished.apply(OwnerUpdate::completed("derived-7".into(), now));
    store.insert_record(finished).await;

    let client = Arc::new(ScriptedClient::new());
    client.script_status("src-42", vec![Ok(StatusReport::ready())]);
    let engine = WorkflowEngine::new(client.clone(), store.clone(), fast_config(10));

    assert_eq!(engine.rehydrate().await.unwrap(), 1);
    assert_eq!(
        engine.get_status(&owner("owner-1")).unwrap().state,
        JobState::Pending
    );
    assert!(engine.is_scheduler_running());

    engine.tick_now().await;
    engine.flush().await.unwrap();

    assert!(engine.get_status(&owner("owner-1")).is_none());
    let record = store.record(&owner("owner-1")).await.unwrap();
    assert_eq!(record.derived_resource_id, Some("derived-owner-1".into()));
    assert_eq!(client.status_calls(), vec!["src-42"]);
}

#[tokio::test]
async fn test_shutdown_leaves_pending_records_resumable() {
    let store = Arc::new(InMemoryPersistence::new());
    let engine = WorkflowEngine::new(Arc::new(ScriptedClient::new()), store.clone(), fast_config(10));
    engine.start("owner-1", "src-42");
    engine.tick_now().await;

    engine.shutdown().await.unwrap();

    let pending = store.pending_records().await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].owner_id, owner("owner-1"));
}
