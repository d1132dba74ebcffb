use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::clock::{Clock, SystemClock};
use super::errors::WorkflowError;
use super::registry::JobRegistry;
use super::scheduler::{BackgroundScheduler, TickReport};
use super::types::{Job, OwnerId, SourceResourceId};
use super::writer::PersistenceWriter;
use crate::client::ProvisioningClient;
use crate::config::WorkflowConfig;
use crate::persistence::{OwnerUpdate, PersistenceAdapter};

/// Entry point for provisioning workflows.
///
/// `start`, `get_status`, `cancel` and `cleanup` only touch in-memory state and
/// queue persistence writes, so they return immediately. All provider calls
/// happen on the background scheduler.
pub struct WorkflowEngine {
    registry: Arc<JobRegistry>,
    scheduler: BackgroundScheduler,
    writer: Arc<PersistenceWriter>,
    persistence: Arc<dyn PersistenceAdapter>,
    clock: Arc<dyn Clock>,
    config: WorkflowConfig,
}

impl std::fmt::Debug for WorkflowEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowEngine")
            .field("jobs", &self.registry.len())
            .field("scheduler", &self.scheduler)
            .finish()
    }
}

impl WorkflowEngine {
    /// Must be called within a tokio runtime
    pub fn new(
        client: Arc<dyn ProvisioningClient>,
        persistence: Arc<dyn PersistenceAdapter>,
        config: WorkflowConfig,
    ) -> Self {
        Self::with_clock(client, persistence, config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        client: Arc<dyn ProvisioningClient>,
        persistence: Arc<dyn PersistenceAdapter>,
        config: WorkflowConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let registry = Arc::new(JobRegistry::new());
        let writer = Arc::new(PersistenceWriter::spawn(Arc::clone(&persistence)));
        let scheduler = BackgroundScheduler::new(
            Arc::clone(&registry),
            client,
            Arc::clone(&writer),
            Arc::clone(&clock),
            config.clone(),
        );

        Self {
            registry,
            scheduler,
            writer,
            persistence,
            clock,
            config,
        }
    }

    /// Begin provisioning for an owner. Returns the existing job unchanged if
    /// the owner already has one.
    pub fn start(
        &self,
        owner_id: impl Into<OwnerId>,
        source_resource_id: impl Into<SourceResourceId>,
    ) -> Job {
        let now = self.clock.now();
        let job = Job::new(owner_id.into(), source_resource_id.into(), now);

        match self.registry.insert_if_absent(job) {
            Ok(job) => {
                info!(
                    owner_id = %job.owner_id,
                    source_resource_id = %job.source_resource_id,
                    job_id = %job.id,
                    "Provisioning workflow started"
                );
                self.writer.submit(
                    job.owner_id.clone(),
                    OwnerUpdate::started(job.source_resource_id.clone(), now),
                );
                self.scheduler.ensure_running();
                job
            }
            Err(existing) => {
                debug!(
                    owner_id = %existing.owner_id,
                    state = %existing.state,
                    "Workflow already registered, start ignored"
                );
                existing
            }
        }
    }

    pub fn get_status(&self, owner_id: &OwnerId) -> Option<Job> {
        self.registry.get(owner_id)
    }

    /// Drop the owner's job. Earlier fields on the owner record stay in place;
    /// only the status is marked cancelled so a restart does not resume it.
    pub fn cancel(&self, owner_id: &OwnerId) -> Option<Job> {
        let removed = self.registry.remove(owner_id);
        if let Some(job) = &removed {
            info!(owner_id = %owner_id, state = %job.state, "Provisioning workflow cancelled");
            self.writer
                .submit(owner_id.clone(), OwnerUpdate::cancelled(self.clock.now()));
        }
        if self.registry.is_empty() {
            self.scheduler.stop();
        }
        removed
    }

    /// Remove terminal jobs idle for longer than the configured retention
    pub fn cleanup(&self) -> Vec<OwnerId> {
        self.cleanup_older_than(self.config.retention())
    }

    pub fn cleanup_older_than(&self, age: Duration) -> Vec<OwnerId> {
        let cutoff = cutoff(self.clock.now(), age);
        let removed: Vec<OwnerId> = self
            .registry
            .remove_terminal_older_than(cutoff)
            .into_iter()
            .map(|job| job.owner_id)
            .collect();

        if !removed.is_empty() {
            info!(count = removed.len(), "Cleaned up finished workflow jobs");
        }
        removed
    }

    /// Every registered job, terminal ones included
    pub fn active_jobs(&self) -> Vec<Job> {
        self.registry.snapshot()
    }

    pub async fn tick_now(&self) -> TickReport {
        self.scheduler.tick_now().await
    }

    pub fn is_scheduler_running(&self) -> bool {
        self.scheduler.is_running()
    }

    /// Restore unfinished workflows from owner records left by a previous process
    pub async fn rehydrate(&self) -> Result<usize, WorkflowError> {
        let records = self.persistence.pending_records().await?;
        let now = self.clock.now();
        let mut restored = 0;

        for record in records {
            let Some(source_resource_id) = record.source_resource_id else {
                continue;
            };
            let job = Job::rehydrated(record.owner_id, source_resource_id, now);
            match self.registry.insert_if_absent(job) {
                Ok(job) => {
                    debug!(
                        owner_id = %job.owner_id,
                        source_resource_id = %job.source_resource_id,
                        "Rehydrated workflow job"
                    );
                    restored += 1;
                }
                Err(existing) => {
                    debug!(owner_id = %existing.owner_id, "Owner already has a job, not rehydrating");
                }
            }
        }

        if restored > 0 {
            info!(restored, "Rehydrated unfinished workflows");
            self.scheduler.ensure_running();
        }
        Ok(restored)
    }

    /// Wait for all queued owner-record writes to be applied
    pub async fn flush(&self) -> Result<(), WorkflowError> {
        self.writer.flush().await
    }

    /// Clean up, stop the scheduler and drain pending writes
    pub async fn shutdown(&self) -> Result<(), WorkflowError> {
        info!("Shutting down workflow engine...");
        self.cleanup();
        self.scheduler.shutdown().await;

        let abandoned = self.registry.pending_count();
        if abandoned > 0 {
            warn!(abandoned, "Workflows still pending at shutdown; rehydrate on next start");
        }

        self.writer.close().await?;
        info!("Workflow engine shut down");
        Ok(())
    }
}

fn cutoff(now: DateTime<Utc>, age: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(age)
        .ok()
        .and_then(|age| now.checked_sub_signed(age))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}
