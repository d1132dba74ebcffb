//! In-memory table of active workflow jobs keyed by owner.
//!
//! The registry is the single source of truth for workflow state. Its lock is
//! never held across an `.await`, so every operation returns immediately.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

use super::types::{Job, OwnerId};

#[derive(Debug, Default)]
pub struct JobRegistry {
    jobs: Mutex<HashMap<OwnerId, Job>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn jobs(&self) -> MutexGuard<'_, HashMap<OwnerId, Job>> {
        // A panic while holding the lock cannot leave a half-written entry:
        // every mutation is a single map operation.
        self.jobs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Insert or replace the job for its owner
    pub fn upsert(&self, job: Job) -> Option<Job> {
        self.jobs().insert(job.owner_id.clone(), job)
    }

    /// Insert `job` unless its owner already has one; `Err` carries the existing job
    pub fn insert_if_absent(&self, job: Job) -> Result<Job, Job> {
        let mut jobs = self.jobs();
        if let Some(existing) = jobs.get(&job.owner_id) {
            return Err(existing.clone());
        }
        jobs.insert(job.owner_id.clone(), job.clone());
        Ok(job)
    }

    pub fn get(&self, owner_id: &OwnerId) -> Option<Job> {
        self.jobs().get(owner_id).cloned()
    }

    /// Check whether this exact run is still registered
    pub fn is_current(&self, owner_id: &OwnerId, job_id: Uuid) -> bool {
        self.jobs()
            .get(owner_id)
            .is_some_and(|job| job.id == job_id)
    }

    /// Write back a job only if the same run is still registered for its owner
    pub fn replace_if_current(&self, job: Job) -> bool {
        let mut jobs = self.jobs();
        match jobs.get_mut(&job.owner_id) {
            Some(current) if current.id == job.id => {
                *current = job;
                true
            }
            _ => false,
        }
    }

    /// Idempotent removal
    pub fn remove(&self, owner_id: &OwnerId) -> Option<Job> {
        self.jobs().remove(owner_id)
    }

    /// Remove the owner's job only if it is still the given run
    pub fn remove_if_current(&self, owner_id: &OwnerId, job_id: Uuid) -> Option<Job> {
        let mut jobs = self.jobs();
        if jobs.get(owner_id).is_some_and(|job| job.id == job_id) {
            jobs.remove(owner_id)
        } else {
            None
        }
    }

    /// Snapshot of every non-terminal job, oldest first
    pub fn all_pending(&self) -> PendingSnapshot {
        let mut pending: Vec<Job> = self
            .jobs()
            .values()
            .filter(|job| !job.is_terminal())
            .cloned()
            .collect();
        pending.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.owner_id.cmp(&b.owner_id))
        });
        PendingSnapshot {
            jobs: pending.into(),
        }
    }

    /// Remove terminal jobs whose last activity is strictly before `cutoff`
    pub fn remove_terminal_older_than(&self, cutoff: DateTime<Utc>) -> Vec<Job> {
        let mut jobs = self.jobs();
        let expired: Vec<OwnerId> = jobs
            .values()
            .filter(|job| job.is_terminal() && job.last_activity() < cutoff)
            .map(|job| job.owner_id.clone())
            .collect();

        expired
            .iter()
            .filter_map(|owner_id| jobs.remove(owner_id))
            .collect()
    }

    /// Copy of every registered job, terminal ones included
    pub fn snapshot(&self) -> Vec<Job> {
        let mut all: Vec<Job> = self.jobs().values().cloned().collect();
        all.sort_by(|a, b| a.owner_id.cmp(&b.owner_id));
        all
    }

    pub fn len(&self) -> usize {
        self.jobs().len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs().is_empty()
    }

    pub fn pending_count(&self) -> usize {
        self.jobs().values().filter(|job| !job.is_terminal()).count()
    }
}

/// Point-in-time view of pending jobs.
///
/// Cloning is cheap and each call to [`PendingSnapshot::iter`] starts over from
/// the first job, so the scheduler can walk it more than once.
#[derive(Debug, Clone)]
pub struct PendingSnapshot {
    jobs: Arc<[Job]>,
}

impl PendingSnapshot {
    pub fn iter(&self) -> std::slice::Iter<'_, Job> {
        self.jobs.iter()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

impl<'a> IntoIterator for &'a PendingSnapshot {
    type Item = &'a Job;
    type IntoIter = std::slice::Iter<'a, Job>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
