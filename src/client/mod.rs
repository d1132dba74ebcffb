//! Boundary to the external provisioning API.
//!
//! The workflow only ever talks to the provider through [`ProvisioningClient`],
//! so tests and alternative providers can be injected.

pub mod http;

use async_trait::async_trait;
use thiserror::Error;

use crate::workflow::types::{DerivedResourceId, OwnerContext, SourceResourceId, StatusReport};

pub use http::HttpProvisioningClient;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Provider API error (HTTP {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Provider rate limit exceeded")]
    RateLimited,

    #[error("Could not decode provider response: {0}")]
    Decode(String),

    #[error("Client configuration error: {0}")]
    Configuration(String),
}

impl ClientError {
    /// Whether retrying the same call later could succeed
    pub fn is_transient(&self) -> bool {
        match self {
            ClientError::Network(_) | ClientError::RateLimited | ClientError::Decode(_) => true,
            ClientError::Api { status, .. } => *status >= 500 || *status == 408,
            ClientError::Configuration(_) => false,
        }
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProvisioningClient: Send + Sync {
    /// Query the upstream training job status
    async fn get_status(
        &self,
        source_resource_id: &SourceResourceId,
    ) -> Result<StatusReport, ClientError>;

    /// Create the derived resource once the source is ready
    async fn create_derived(
        &self,
        context: &OwnerContext,
    ) -> Result<DerivedResourceId, ClientError>;
}
