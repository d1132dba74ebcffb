use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Jitter, Quota, RateLimiter};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::{ClientError, ProvisioningClient};
use crate::config::ProviderConfig;
use crate::workflow::types::{
    DerivedResourceId, OwnerContext, SourceResourceId, StatusReport, UpstreamStatus,
};

/// Rate-limited HTTP client for the provider REST API
#[derive(Debug, Clone)]
pub struct HttpProvisioningClient {
    http: Client,
    rate_limiter: Arc<DefaultDirectRateLimiter>,
    base_url: String,
    api_key: Option<String>,
    status_path: String,
    create_path: String,
}

#[derive(Debug, Deserialize)]
struct StatusBody {
    #[serde(alias = "state")]
    status: String,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Serialize)]
struct CreateDerivedRequest<'a> {
    owner_id: &'a str,
    source_resource_id: &'a str,
}

#[derive(Debug, Deserialize)]
struct CreateDerivedBody {
    id: String,
}

impl HttpProvisioningClient {
    pub fn new(config: &ProviderConfig) -> Result<Self, ClientError> {
        if config.base_url.trim().is_empty() {
            return Err(ClientError::Configuration(
                "provider.base_url is empty".to_string(),
            ));
        }

        let per_second = NonZeroU32::new(config.rate_limit.requests_per_second).ok_or_else(|| {
            ClientError::Configuration("rate_limit.requests_per_second must be > 0".to_string())
        })?;
        let burst = NonZeroU32::new(config.rate_limit.burst_capacity).ok_or_else(|| {
            ClientError::Configuration("rate_limit.burst_capacity must be > 0".to_string())
        })?;
        let quota = Quota::per_second(per_second).allow_burst(burst);

        let http = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| ClientError::Configuration(e.to_string()))?;

        Ok(Self {
            http,
            rate_limiter: Arc::new(RateLimiter::direct(quota)),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            status_path: config.status_path.clone(),
            create_path: config.create_path.clone(),
        })
    }

    fn status_url(&self, source_resource_id: &SourceResourceId) -> String {
        format!(
            "{}{}",
            self.base_url,
            self.status_path.replace("{id}", source_resource_id.as_str())
        )
    }

    fn create_url(&self) -> String {
        format!("{}{}", self.base_url, self.create_path)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    /// Wait for a rate limit slot, then send
    async fn send(&self, request: RequestBuilder) -> Result<Response, ClientError> {
        self.rate_limiter
            .until_ready_with_jitter(Jitter::up_to(Duration::from_millis(100)))
            .await;

        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(|e| ClientError::Network(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        if status == StatusCode::TOO_MANY_REQUESTS {
            warn!("Provider API rate limit hit");
            return Err(ClientError::RateLimited);
        }

        let message = response.text().await.unwrap_or_default();
        Err(ClientError::Api {
            status: status.as_u16(),
            message: if message.is_empty() {
                status.canonical_reason().unwrap_or("unknown error").to_string()
            } else {
                message
            },
        })
    }
}

#[async_trait]
impl ProvisioningClient for HttpProvisioningClient {
    async fn get_status(
        &self,
        source_resource_id: &SourceResourceId,
    ) -> Result<StatusReport, ClientError> {
        let url = self.status_url(source_resource_id);
        debug!(url = %url, "Querying source resource status");

        let response = self.send(self.http.get(&url)).await?;
        let body: StatusBody = response
            .json()
            .await
            .map_err(|e| ClientError::Decode(e.to_string()))?;

        Ok(StatusReport {
            state: UpstreamStatus::parse(&body.status),
            error: body.error,
        })
    }

    async fn create_derived(
        &self,
        context: &OwnerContext,
    ) -> Result<DerivedResourceId, ClientError> {
        let url = self.create_url();
        debug!(
            url = %url,
            owner_id = %context.owner_id,
            source_resource_id = %context.source_resource_id,
            "Creating derived resource"
        );

        let request = self.http.post(&url).json(&CreateDerivedRequest {
            owner_id: context.owner_id.as_str(),
            source_resource_id: context.source_resource_id.as_str(),
        });
        let response = self.send(request).await?;
        let body: CreateDerivedBody = response
            .json()
            .await
            .map_err(|e| ClientError::Decode(e.to_string()))?;

        Ok(DerivedResourceId(body.id))
    }
}
