use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{info, warn};

use crate::workflow::WorkflowEngine;

const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Graceful shutdown coordinator for the provisioner
pub struct ShutdownCoordinator {
    engine: Arc<WorkflowEngine>,
    timeout: Duration,
}

impl ShutdownCoordinator {
    pub fn new(engine: Arc<WorkflowEngine>) -> Self {
        Self {
            engine,
            timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Wait for ctrl-c, then shut everything down
    pub async fn wait_for_shutdown(self) -> Result<()> {
        info!("Shutdown coordinator ready - will shutdown gracefully on SIGINT");

        tokio::signal::ctrl_c().await?;
        info!("Shutdown signal received");

        self.shutdown_all_services().await
    }

    /// Stop the workflow engine and drain its pending writes
    pub async fn shutdown_all_services(&self) -> Result<()> {
        info!("Initiating graceful shutdown of all services...");

        match timeout(self.timeout, self.engine.shutdown()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Workflow engine did not shut down cleanly: {}", e),
            Err(_) => {
                warn!(
                    timeout_secs = self.timeout.as_secs(),
                    "Timeout waiting for workflow engine to shut down"
                );
                return Err(anyhow::anyhow!("Timeout waiting for workflow engine to shut down"));
            }
        }

        crate::telemetry::shutdown_telemetry();
        info!("Graceful shutdown completed successfully");
        Ok(())
    }
}
