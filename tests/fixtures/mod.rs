//! Shared fakes for workflow integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use provisioner::client::{ClientError, ProvisioningClient};
use provisioner::config::WorkflowConfig;
use provisioner::persistence::{OwnerRecord, OwnerUpdate, PersistenceAdapter, PersistenceError};
use provisioner::workflow::{DerivedResourceId, OwnerContext, OwnerId, SourceResourceId, StatusReport};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::sync::Notify;

pub fn fast_config(max_attempts: u32) -> WorkflowConfig {
    WorkflowConfig {
        poll_interval_secs: 300,
        max_attempts,
        inter_job_delay_ms: 0,
        retention_secs: 3600,
    }
}

/// Client that replays scripted status responses per source resource.
///
/// Once a source's script runs out it keeps reporting `training`. Derived
/// creation returns `derived-<owner>` unless an outcome was scripted.
#[derive(Default)]
pub struct ScriptedClient {
    statuses: Mutex<HashMap<String, VecDeque<Result<StatusReport, ClientError>>>>,
    creations: Mutex<HashMap<String, Result<DerivedResourceId, ClientError>>>,
    status_calls: Mutex<Vec<String>>,
    create_calls: Mutex<Vec<String>>,
}

impl ScriptedClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script_status(&self, source: &str, responses: Vec<Result<StatusReport, ClientError>>) {
        self.statuses
            .lock()
            .unwrap()
            .insert(source.to_string(), responses.into());
    }

    pub fn script_creation(&self, owner: &str, outcome: Result<DerivedResourceId, ClientError>) {
        self.creations
            .lock()
            .unwrap()
            .insert(owner.to_string(), outcome);
    }

    pub fn status_calls(&self) -> Vec<String> {
        self.status_calls.lock().unwrap().clone()
    }

    pub fn create_calls(&self) -> Vec<String> {
        self.create_calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProvisioningClient for ScriptedClient {
    async fn get_status(&self, source: &SourceResourceId) -> Result<StatusReport, ClientError> {
        self.status_calls.lock().unwrap().push(source.to_string());
        self.statuses
            .lock()
            .unwrap()
            .get_mut(source.as_str())
            .and_then(|script| script.pop_front())
            .unwrap_or_else(|| Ok(StatusReport::training()))
    }

    async fn create_derived(&self, context: &OwnerContext) -> Result<DerivedResourceId, ClientError> {
        let owner = context.owner_id.to_string();
        self.create_calls.lock().unwrap().push(owner.clone());
        self.creations
            .lock()
            .unwrap()
            .remove(&owner)
            .unwrap_or_else(|| Ok(format!("derived-{owner}").into()))
    }
}

/// Client whose status query blocks until the test releases it
#[derive(Default)]
pub struct GatedClient {
    pub entered: Notify,
    pub release: Notify,
    create_calls: AtomicUsize,
}

impl GatedClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProvisioningClient for GatedClient {
    async fn get_status(&self, _source: &SourceResourceId) -> Result<StatusReport, ClientError> {
        self.entered.notify_one();
        self.release.notified().await;
        Ok(StatusReport::ready())
    }

    async fn create_derived(&self, context: &OwnerContext) -> Result<DerivedResourceId, ClientError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        Ok(format!("derived-{}", context.owner_id).into())
    }
}

/// Client that reports every source ready and blocks derived creation until
/// the test releases it
#[derive(Default)]
pub struct GatedCreationClient {
    pub entered: Notify,
    pub release: Notify,
    create_calls: AtomicUsize,
}

impl GatedCreationClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProvisioningClient for GatedCreationClient {
    async fn get_status(&self, _source: &SourceResourceId) -> Result<StatusReport, ClientError> {
        Ok(StatusReport::ready())
    }

    async fn create_derived(&self, context: &OwnerContext) -> Result<DerivedResourceId, ClientError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        self.entered.notify_one();
        self.release.notified().await;
        Ok(format!("derived-{}", context.owner_id).into())
    }
}

/// Record store that rejects every write
#[derive(Default)]
pub struct FailingPersistence {
    attempts: AtomicUsize,
}

impl FailingPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PersistenceAdapter for FailingPersistence {
    async fn update(&self, _owner_id: &OwnerId, _update: OwnerUpdate) -> Result<(), PersistenceError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(PersistenceError::Unavailable {
            reason: "record store offline".to_string(),
        })
    }

    async fn pending_records(&self) -> Result<Vec<OwnerRecord>, PersistenceError> {
        Ok(Vec::new())
    }
}
