use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;

use crate::client::HttpProvisioningClient;
use crate::config::ProvisionerConfig;
use crate::persistence::{InMemoryPersistence, PersistenceAdapter};
use crate::workflow::WorkflowEngine;

/// Open the configured owner record store.
///
/// Without a `database` section, or when built without the `database`
/// feature, records live in memory only.
pub async fn open_persistence(config: &ProvisionerConfig) -> Result<Arc<dyn PersistenceAdapter>> {
    match &config.database {
        #[cfg(feature = "database")]
        Some(database) => {
            let store = crate::persistence::SqlitePersistence::connect(database)
                .await
                .with_context(|| format!("Failed to open database at {}", database.url))?;
            info!(url = %database.url, "Using SQLite owner record store");
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "database"))]
        Some(database) => {
            tracing::warn!(
                url = %database.url,
                "Database configured but the `database` feature is disabled; using in-memory records"
            );
            Ok(Arc::new(InMemoryPersistence::new()))
        }
        None => {
            info!("No database configured; using in-memory owner records");
            Ok(Arc::new(InMemoryPersistence::new()))
        }
    }
}

/// Wire the HTTP provider client and record store into a running engine and
/// resume any workflows left unfinished by a previous process
pub async fn build_engine(config: &ProvisionerConfig) -> Result<Arc<WorkflowEngine>> {
    config.workflow.validate()?;

    let client = HttpProvisioningClient::new(&config.provider)
        .context("Failed to build provisioning client")?;
    let persistence = open_persistence(config).await?;

    let engine = Arc::new(WorkflowEngine::new(
        Arc::new(client),
        persistence,
        config.workflow.clone(),
    ));

    let restored = engine
        .rehydrate()
        .await
        .context("Failed to rehydrate unfinished workflows")?;
    info!(restored, "Workflow engine ready");

    Ok(engine)
}
