// Provisioner Library - asynchronous resource-provisioning workflows
// This exposes the core components for testing and integration

pub mod bootstrap;
pub mod client;
pub mod config;
pub mod persistence;
pub mod shutdown;
pub mod telemetry;
pub mod workflow;

// Re-export key types for easy access
pub use bootstrap::{build_engine, open_persistence};
pub use client::{ClientError, HttpProvisioningClient, ProvisioningClient};
pub use config::{config, init_config, ProvisionerConfig, WorkflowConfig};
pub use persistence::{
    InMemoryPersistence, OwnerRecord, OwnerUpdate, PersistenceAdapter, PersistenceError,
    ProvisioningStatus,
};
#[cfg(feature = "database")]
pub use persistence::SqlitePersistence;
pub use shutdown::ShutdownCoordinator;
pub use telemetry::{
    create_job_span, create_tick_span, generate_correlation_id, init_telemetry, shutdown_telemetry,
};
pub use workflow::{
    Job, JobState, OwnerId, SourceResourceId, DerivedResourceId, StatusReport, TickReport,
    UpstreamStatus, WorkflowEngine, WorkflowError,
};
