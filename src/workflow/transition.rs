//! Pure state transition logic.
//!
//! Maps a job plus the outcome of an external call to the next job value and
//! the side effects the scheduler must perform. Nothing in here touches I/O or
//! reads the clock; `now` is always passed in.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::types::{DerivedResourceId, Job, JobState, StatusReport, UpstreamStatus};

pub const MAX_ATTEMPTS_EXCEEDED: &str = "max attempts exceeded";
pub const CREATION_INTERRUPTED: &str = "derived resource creation interrupted";
const UPSTREAM_FAILED: &str = "upstream reported failure";

/// Work the scheduler performs after applying a transition, in order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SideEffect {
    CreateDerived,
    PersistFailure { error: String },
    PersistCompletion { derived_resource_id: DerivedResourceId },
    RemoveJob,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub job: Job,
    pub effects: Vec<SideEffect>,
}

impl Transition {
    fn quiet(job: Job) -> Self {
        Self {
            job,
            effects: Vec::new(),
        }
    }

    fn fail(mut job: Job, error: String) -> Self {
        job.state = JobState::Failed;
        job.derived_resource_id = None;
        job.error = Some(error.clone());
        Self {
            job,
            effects: vec![SideEffect::PersistFailure { error }],
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.job.is_terminal()
    }
}

/// How a tick should proceed for one job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickStart {
    /// Query upstream status, then apply [`on_status`]
    Query(Job),
    /// Source already ready; perform the returned effects
    Create(Transition),
    /// Attempt ceiling reached; job is failed without querying
    Exhausted(Transition),
    /// Found mid-creation from an earlier tick; never re-issued
    Interrupted(Transition),
    /// Terminal job, nothing to do
    Skip(Job),
}

/// Count the attempt and decide what this tick does with the job
pub fn begin_tick(job: &Job, now: DateTime<Utc>, max_attempts: u32) -> TickStart {
    if job.is_terminal() {
        return TickStart::Skip(job.clone());
    }

    let mut next = job.clone();
    next.attempts = next.attempts.saturating_add(1);
    next.last_checked_at = Some(now);

    if next.attempts > max_attempts {
        return TickStart::Exhausted(Transition::fail(next, MAX_ATTEMPTS_EXCEEDED.to_string()));
    }

    match next.state {
        JobState::Pending | JobState::Polling => TickStart::Query(next),
        JobState::Ready => TickStart::Create(Transition {
            job: next,
            effects: vec![SideEffect::CreateDerived],
        }),
        JobState::CreatingDerived => {
            TickStart::Interrupted(Transition::fail(next, CREATION_INTERRUPTED.to_string()))
        }
        JobState::Completed | JobState::Failed => TickStart::Skip(next),
    }
}

/// Apply the outcome of a status query; `Err` is a transient query failure
pub fn on_status(job: &Job, result: Result<StatusReport, String>) -> Transition {
    let mut next = job.clone();

    let report = match result {
        Ok(report) => report,
        Err(error) => {
            next.error = Some(error);
            return Transition::quiet(next);
        }
    };

    match report.state {
        UpstreamStatus::Ready => {
            next.state = JobState::Ready;
            next.error = None;
            Transition {
                job: next,
                effects: vec![SideEffect::CreateDerived],
            }
        }
        UpstreamStatus::Failed => {
            let error = report
                .error
                .filter(|e| !e.trim().is_empty())
                .unwrap_or_else(|| UPSTREAM_FAILED.to_string());
            Transition::fail(next, error)
        }
        UpstreamStatus::Training => {
            next.state = JobState::Polling;
            next.error = None;
            Transition::quiet(next)
        }
        UpstreamStatus::Unknown(raw) => {
            next.error = Some(format!("unrecognized upstream status: {raw}"));
            Transition::quiet(next)
        }
    }
}

/// Mark a ready job as having its derived resource requested
pub fn mark_creating(job: &Job) -> Job {
    let mut next = job.clone();
    next.state = JobState::CreatingDerived;
    next
}

/// Apply the outcome of derived resource creation; failures are terminal
pub fn on_derived(job: &Job, result: Result<DerivedResourceId, String>) -> Transition {
    match result {
        Ok(derived_resource_id) if !derived_resource_id.is_empty() => {
            let mut next = job.clone();
            next.state = JobState::Completed;
            next.derived_resource_id = Some(derived_resource_id.clone());
            next.error = None;
            Transition {
                job: next,
                effects: vec![
                    SideEffect::PersistCompletion {
                        derived_resource_id,
                    },
                    SideEffect::RemoveJob,
                ],
            }
        }
        Ok(_) => Transition::fail(
            job.clone(),
            "derived resource creation returned an empty id".to_string(),
        ),
        Err(error) => Transition::fail(job.clone(), error),
    }
}
