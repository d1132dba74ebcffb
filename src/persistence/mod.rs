//! Durable owner record store.
//!
//! The workflow writes a handful of fields onto the owner's record and, on
//! restart, reads back owners whose provisioning never reached a terminal
//! status. Writes are best-effort from the workflow's point of view.

pub mod memory;
#[cfg(feature = "database")]
pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::workflow::types::{DerivedResourceId, OwnerId, SourceResourceId};

pub use memory::InMemoryPersistence;
#[cfg(feature = "database")]
pub use sqlite::SqlitePersistence;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[cfg(feature = "database")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[cfg(feature = "database")]
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Owner record not found: {owner_id}")]
    NotFound { owner_id: String },

    #[error("Record store unavailable: {reason}")]
    Unavailable { reason: String },
}

/// Provisioning status as stored on the owner record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProvisioningStatus {
    InProgress,
    Completed,
    Failed,
    /// Workflow dropped by the caller; never resumed
    Cancelled,
}

impl ProvisioningStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ProvisioningStatus::InProgress => "in_progress",
            ProvisioningStatus::Completed => "completed",
            ProvisioningStatus::Failed => "failed",
            ProvisioningStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "in_progress" => Some(ProvisioningStatus::InProgress),
            "completed" => Some(ProvisioningStatus::Completed),
            "failed" => Some(ProvisioningStatus::Failed),
            "cancelled" => Some(ProvisioningStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, ProvisioningStatus::InProgress)
    }
}

/// Fields the workflow writes onto an owner record.
///
/// `None` leaves a field untouched. On the nested fields `Some(None)` clears
/// whatever a previous run stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerUpdate {
    pub source_resource_id: Option<SourceResourceId>,
    pub derived_resource_id: Option<Option<DerivedResourceId>>,
    pub status: Option<ProvisioningStatus>,
    pub error: Option<Option<String>>,
    pub completed_at: Option<Option<DateTime<Utc>>>,
    pub updated_at: DateTime<Utc>,
}

impl OwnerUpdate {
    /// Source resource recorded as soon as the workflow starts. Clears the
    /// outcome of any earlier run.
    pub fn started(source_resource_id: SourceResourceId, at: DateTime<Utc>) -> Self {
        Self {
            source_resource_id: Some(source_resource_id),
            derived_resource_id: Some(None),
            status: Some(ProvisioningStatus::InProgress),
            error: Some(None),
            completed_at: Some(None),
            updated_at: at,
        }
    }

    pub fn completed(derived_resource_id: DerivedResourceId, at: DateTime<Utc>) -> Self {
        Self {
            source_resource_id: None,
            derived_resource_id: Some(Some(derived_resource_id)),
            status: Some(ProvisioningStatus::Completed),
            error: Some(None),
            completed_at: Some(Some(at)),
            updated_at: at,
        }
    }

    pub fn failed(error: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            source_resource_id: None,
            derived_resource_id: None,
            status: Some(ProvisioningStatus::Failed),
            error: Some(Some(error.into())),
            completed_at: None,
            updated_at: at,
        }
    }

    /// Marks the run as abandoned so a restart does not pick it up again.
    /// The source resource stays on the record.
    pub fn cancelled(at: DateTime<Utc>) -> Self {
        Self {
            source_resource_id: None,
            derived_resource_id: None,
            status: Some(ProvisioningStatus::Cancelled),
            error: None,
            completed_at: None,
            updated_at: at,
        }
    }
}

/// Workflow-relevant view of an owner's durable record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerRecord {
    pub owner_id: OwnerId,
    pub source_resource_id: Option<SourceResourceId>,
    pub derived_resource_id: Option<DerivedResourceId>,
    pub status: Option<ProvisioningStatus>,
    pub error: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl OwnerRecord {
    pub fn empty(owner_id: OwnerId, at: DateTime<Utc>) -> Self {
        Self {
            owner_id,
            source_resource_id: None,
            derived_resource_id: None,
            status: None,
            error: None,
            completed_at: None,
            updated_at: at,
        }
    }

    pub fn apply(&mut self, update: OwnerUpdate) {
        if let Some(source) = update.source_resource_id {
            self.source_resource_id = Some(source);
        }
        if let Some(derived) = update.derived_resource_id {
            self.derived_resource_id = derived;
        }
        if let Some(status) = update.status {
            self.status = Some(status);
        }
        if let Some(error) = update.error {
            self.error = error;
        }
        if let Some(completed_at) = update.completed_at {
            self.completed_at = completed_at;
        }
        self.updated_at = update.updated_at;
    }

    /// A source resource was recorded but provisioning never finished
    pub fn needs_resume(&self) -> bool {
        self.source_resource_id.is_some() && !self.status.is_some_and(ProvisioningStatus::is_terminal)
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PersistenceAdapter: Send + Sync {
    /// Write workflow-derived fields onto the owner's record
    async fn update(&self, owner_id: &OwnerId, update: OwnerUpdate) -> Result<(), PersistenceError>;

    /// Owner records with a source resource and no terminal status
    async fn pending_records(&self) -> Result<Vec<OwnerRecord>, PersistenceError>;
}
