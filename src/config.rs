use anyhow::{bail, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Main configuration structure for the provisioner
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ProvisionerConfig {
    /// Polling and retention settings
    pub workflow: WorkflowConfig,
    /// Provider API settings
    pub provider: ProviderConfig,
    /// Logging settings
    pub observability: ObservabilityConfig,
    /// Database settings (optional)
    pub database: Option<DatabaseConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WorkflowConfig {
    /// Seconds between scheduler ticks
    pub poll_interval_secs: u64,
    /// Poll attempts before a job is failed as timed out
    pub max_attempts: u32,
    /// Pause between jobs within one tick
    pub inter_job_delay_ms: u64,
    /// How long terminal jobs stay visible before cleanup removes them
    pub retention_secs: u64,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 300, // 5 minutes
            max_attempts: 72,        // 6 hours at the default interval
            inter_job_delay_ms: 1000,
            retention_secs: 3600, // 1 hour
        }
    }
}

impl WorkflowConfig {
    /// Never zero; an unvalidated `0` polls once a second
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    pub fn inter_job_delay(&self) -> Duration {
        Duration::from_millis(self.inter_job_delay_ms)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_secs == 0 {
            bail!("workflow.poll_interval_secs must be greater than zero");
        }
        if self.max_attempts == 0 {
            bail!("workflow.max_attempts must be at least 1");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Base URL of the provider API
    pub base_url: String,
    /// API key sent as a bearer token (can be set via env var)
    pub api_key: Option<String>,
    /// Status endpoint, `{id}` is replaced with the source resource id
    pub status_path: String,
    /// Derived resource creation endpoint
    pub create_path: String,
    /// Per-request timeout
    pub request_timeout_secs: u64,
    /// Rate limiting settings
    pub rate_limit: RateLimitConfig,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            api_key: None, // Will be read from PROVISIONER_API_KEY
            status_path: "/trainings/{id}".to_string(),
            create_path: "/derived".to_string(),
            request_timeout_secs: 30,
            rate_limit: RateLimitConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Sustained requests per second
    pub requests_per_second: u32,
    /// Burst capacity
    pub burst_capacity: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: 1,
            burst_capacity: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level used when RUST_LOG is not set
    pub log_level: String,
    /// Emit JSON lines instead of human-readable logs
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Database URL (SQLite file path or connection string)
    pub url: String,
    /// Maximum connections in pool
    pub max_connections: u32,
    /// Enable automatic migrations
    pub auto_migrate: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://.provisioner/provisioner.db".to_string(),
            max_connections: 5,
            auto_migrate: true,
        }
    }
}

impl ProvisionerConfig {
    /// Load configuration from multiple sources with precedence:
    /// 1. Default values
    /// 2. Configuration files (provisioner.toml, .provisioner-rc)
    /// 3. Environment variables (prefixed with PROVISIONER_, nested with `__`)
    pub fn load() -> Result<Self> {
        let mut builder = Config::builder();

        if Path::new("provisioner.toml").exists() {
            builder = builder.add_source(File::with_name("provisioner"));
        }

        if Path::new(".provisioner-rc").exists() {
            builder = builder.add_source(File::with_name(".provisioner-rc").format(config::FileFormat::Toml));
        }

        builder = builder.add_source(
            Environment::with_prefix("PROVISIONER")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        let mut provisioner_config: ProvisionerConfig = config.try_deserialize()?;

        if provisioner_config.provider.api_key.is_none() {
            if let Ok(key) = std::env::var("PROVISIONER_API_KEY") {
                provisioner_config.provider.api_key = Some(key);
            }
        }

        provisioner_config.workflow.validate()?;
        Ok(provisioner_config)
    }

    /// Save configuration to file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let toml_content = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_content)?;
        Ok(())
    }

    /// Parse configuration from a TOML string, filling gaps with defaults
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: ProvisionerConfig = toml::from_str(content)?;
        config.workflow.validate()?;
        Ok(config)
    }

    /// Load .env file if it exists
    pub fn load_env_file() -> Result<()> {
        if Path::new(".env").exists() {
            dotenvy::dotenv()?;
            tracing::info!("Loaded environment variables from .env file");
        }
        Ok(())
    }
}

/// Global configuration instance for process bootstrap
static CONFIG: std::sync::LazyLock<Result<ProvisionerConfig, anyhow::Error>> =
    std::sync::LazyLock::new(|| {
        let _ = ProvisionerConfig::load_env_file();
        ProvisionerConfig::load()
    });

/// Get the global configuration
pub fn config() -> Result<&'static ProvisionerConfig> {
    CONFIG
        .as_ref()
        .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))
}

/// Initialize configuration (called at startup)
pub fn init_config() -> Result<()> {
    let _config = config()?;
    tracing::info!("Configuration loaded successfully");
    Ok(())
}
