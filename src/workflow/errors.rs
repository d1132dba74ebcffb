use thiserror::Error;

use crate::client::ClientError;
use crate::persistence::PersistenceError;

/// Errors surfaced by the workflow engine itself.
///
/// Per-job failures never escape a scheduler tick; these only reach callers of
/// the engine's maintenance operations (rehydration, flushing, shutdown).
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("Provisioning client error: {0}")]
    Client(#[from] ClientError),

    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("Job processing for owner {owner_id} panicked")]
    JobPanicked { owner_id: String },

    #[error("Persistence writer is closed")]
    WriterClosed,
}
