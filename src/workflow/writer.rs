//! Ordered, non-blocking persistence writes.
//!
//! Every owner-record write goes through one channel drained by one task, so
//! writes for an owner land in the order they were submitted and callers never
//! wait on the record store.

use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::errors::WorkflowError;
use super::types::OwnerId;
use crate::persistence::{OwnerUpdate, PersistenceAdapter};

enum WriterCommand {
    Update { owner_id: OwnerId, update: OwnerUpdate },
    Flush(oneshot::Sender<()>),
    Shutdown(oneshot::Sender<()>),
}

pub struct PersistenceWriter {
    sender: mpsc::UnboundedSender<WriterCommand>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for PersistenceWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistenceWriter")
            .field("closed", &self.sender.is_closed())
            .finish()
    }
}

impl PersistenceWriter {
    /// Spawn the writer task; must be called within a tokio runtime
    pub fn spawn(persistence: Arc<dyn PersistenceAdapter>) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let handle = tokio::spawn(Self::run(persistence, receiver));

        Self {
            sender,
            handle: Mutex::new(Some(handle)),
        }
    }

    async fn run(
        persistence: Arc<dyn PersistenceAdapter>,
        mut receiver: mpsc::UnboundedReceiver<WriterCommand>,
    ) {
        while let Some(command) = receiver.recv().await {
            match command {
                WriterCommand::Update { owner_id, update } => {
                    match persistence.update(&owner_id, update).await {
                        Ok(()) => debug!(owner_id = %owner_id, "Persisted owner update"),
                        Err(e) => warn!(
                            owner_id = %owner_id,
                            error = %e,
                            "Failed to persist owner update; in-memory state continues"
                        ),
                    }
                }
                WriterCommand::Flush(done) => {
                    let _ = done.send(());
                }
                WriterCommand::Shutdown(done) => {
                    let _ = done.send(());
                    break;
                }
            }
        }
        info!("Persistence writer stopped");
    }

    /// Queue an update; returns false if the writer has shut down
    pub fn submit(&self, owner_id: OwnerId, update: OwnerUpdate) -> bool {
        let accepted = self
            .sender
            .send(WriterCommand::Update {
                owner_id: owner_id.clone(),
                update,
            })
            .is_ok();

        if !accepted {
            warn!(owner_id = %owner_id, "Persistence writer closed, dropping owner update");
        }
        accepted
    }

    /// Wait until every update submitted before this call has been applied
    pub async fn flush(&self) -> Result<(), WorkflowError> {
        let (done, wait) = oneshot::channel();
        self.sender
            .send(WriterCommand::Flush(done))
            .map_err(|_| WorkflowError::WriterClosed)?;
        wait.await.map_err(|_| WorkflowError::WriterClosed)
    }

    /// Apply everything queued so far, then stop the writer task
    pub async fn close(&self) -> Result<(), WorkflowError> {
        let (done, wait) = oneshot::channel();
        if self.sender.send(WriterCommand::Shutdown(done)).is_ok() {
            let _ = wait.await;
        }

        let handle = self
            .handle
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "Persistence writer task ended abnormally");
            }
        }
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}
