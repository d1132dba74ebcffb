//! Core types for the provisioning workflow

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl PartialEq<str> for $name {
            fn eq(&self, other: &str) -> bool {
                self.0 == other
            }
        }
    };
}

string_id!(
    /// Entity on whose behalf resources are provisioned
    OwnerId
);
string_id!(
    /// Upstream training job whose readiness is polled
    SourceResourceId
);
string_id!(
    /// Resource created once the source is ready
    DerivedResourceId
);

/// Workflow job states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobState {
    /// Restored from the owner record, not yet polled by this process
    Pending,
    /// Waiting for the source resource to become ready
    Polling,
    /// Source is ready, derived resource not yet requested
    Ready,
    /// Derived resource creation is in flight
    CreatingDerived,
    Completed,
    Failed,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobState::Pending => "pending",
            JobState::Polling => "polling",
            JobState::Ready => "ready",
            JobState::CreatingDerived => "creating_derived",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// A single provisioning run for one owner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    /// Identity of this run; a new `start` after `cancel` gets a new id
    pub id: Uuid,
    pub owner_id: OwnerId,
    pub source_resource_id: SourceResourceId,
    pub state: JobState,
    /// Set only together with `JobState::Completed`
    pub derived_resource_id: Option<DerivedResourceId>,
    pub created_at: DateTime<Utc>,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub attempts: u32,
    pub error: Option<String>,
}

impl Job {
    /// New job for a source resource that already exists upstream
    pub fn new(owner_id: OwnerId, source_resource_id: SourceResourceId, now: DateTime<Utc>) -> Self {
        Self::with_state(owner_id, source_resource_id, JobState::Polling, now)
    }

    /// Job restored from a persisted owner record
    pub fn rehydrated(
        owner_id: OwnerId,
        source_resource_id: SourceResourceId,
        now: DateTime<Utc>,
    ) -> Self {
        Self::with_state(owner_id, source_resource_id, JobState::Pending, now)
    }

    fn with_state(
        owner_id: OwnerId,
        source_resource_id: SourceResourceId,
        state: JobState,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner_id,
            source_resource_id,
            state,
            derived_resource_id: None,
            created_at: now,
            last_checked_at: None,
            attempts: 0,
            error: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Timestamp the retention window is measured from
    pub fn last_activity(&self) -> DateTime<Utc> {
        self.last_checked_at.unwrap_or(self.created_at)
    }

    /// Context handed to the provisioning client for derived creation
    pub fn owner_context(&self) -> OwnerContext {
        OwnerContext {
            owner_id: self.owner_id.clone(),
            source_resource_id: self.source_resource_id.clone(),
        }
    }
}

/// Upstream status of a source resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpstreamStatus {
    Ready,
    Training,
    Failed,
    /// Status string the workflow does not recognize; retried
    Unknown(String),
}

impl UpstreamStatus {
    /// Map a raw status string from the provider API
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "ready" | "completed" | "succeeded" | "success" => UpstreamStatus::Ready,
            "training" | "pending" | "queued" | "processing" | "running" | "starting"
            | "in_progress" => UpstreamStatus::Training,
            "failed" | "error" | "canceled" | "cancelled" => UpstreamStatus::Failed,
            _ => UpstreamStatus::Unknown(raw.to_string()),
        }
    }
}

/// Result of a status query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReport {
    pub state: UpstreamStatus,
    pub error: Option<String>,
}

impl StatusReport {
    pub fn ready() -> Self {
        Self {
            state: UpstreamStatus::Ready,
            error: None,
        }
    }

    pub fn training() -> Self {
        Self {
            state: UpstreamStatus::Training,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            state: UpstreamStatus::Failed,
            error: Some(error.into()),
        }
    }

    pub fn unknown(raw: impl Into<String>) -> Self {
        Self {
            state: UpstreamStatus::Unknown(raw.into()),
            error: None,
        }
    }
}

/// What the provisioning client needs to create the derived resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerContext {
    pub owner_id: OwnerId,
    pub source_resource_id: SourceResourceId,
}
