//! Configuration system for Talos Marketplace.
//!
//! Configuration is loaded from multiple sources with the following precedence:
//! 1. Environment variables (highest priority)
//! 2. `config.toml` file
//! 3. Default values (lowest priority)
//!
//! # Environment Variables
//!
//! - `TALOS_EXPECTED_PRODUCT_CODE` - Marketplace product code the instance must carry
//! - `TALOS_SECRET_NAME` - Secrets Manager secret holding the license payload
//! - `TALOS_IMDS_ENDPOINT` - Instance metadata base URL
//! - `TALOS_IMDS_TOKEN_TTL_SECS` - Requested metadata token lifetime
//! - `TALOS_IMDS_TIMEOUT_MS` - Timeout for each metadata call
//! - `TALOS_SECRETS_REGION` - AWS region override for Secrets Manager
//! - `TALOS_SECRETS_ENDPOINT_URL` - Endpoint override (e.g. LocalStack)
//! - `TALOS_LOGGING_ENABLED` - Enable logging
//! - `TALOS_LOG_LEVEL` - Log level (trace, debug, info, warn, error)

use config::Config;
use serde::Deserialize;
use std::env;
use std::sync::OnceLock;
use std::time::Duration;

use crate::errors::{LicenseError, LicenseResult};

/// Link-local address of the EC2 instance metadata service.
pub const DEFAULT_IMDS_ENDPOINT: &str = "http://169.254.169.254";

/// Longest token lifetime IMDS will hand out (6 hours).
pub const MAX_TOKEN_TTL_SECS: u32 = 21_600;

/// Default per-call metadata timeout.
pub const DEFAULT_IMDS_TIMEOUT_MS: u64 = 2_000;

/// Global configuration singleton.
static CONFIG: OnceLock<MarketplaceConfig> = OnceLock::new();

/// Root configuration structure.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MarketplaceConfig {
    /// What the validator checks for
    pub validator: ValidatorConfig,
    /// Instance metadata client settings
    pub imds: ImdsConfig,
    /// Secrets Manager client settings
    pub secrets: SecretsConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

/// The product code to enforce and the optional license secret to fetch.
///
/// Immutable once built; the validator only reads it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ValidatorConfig {
    expected_product_code: String,
    secret_name: Option<String>,
}

impl ValidatorConfig {
    /// Build a validator config. The product code must be non-empty; an
    /// empty secret name is treated as no secret.
    pub fn new(
        expected_product_code: impl Into<String>,
        secret_name: Option<String>,
    ) -> LicenseResult<Self> {
        let config = Self {
            expected_product_code: expected_product_code.into(),
            secret_name,
        }
        .normalized();
        config.validate()?;
        Ok(config)
    }

    pub fn expected_product_code(&self) -> &str {
        &self.expected_product_code
    }

    pub fn secret_name(&self) -> Option<&str> {
        self.secret_name.as_deref()
    }

    fn normalized(mut self) -> Self {
        self.expected_product_code = self.expected_product_code.trim().to_string();
        self.secret_name = self
            .secret_name
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty());
        self
    }

    fn validate(&self) -> LicenseResult<()> {
        if self.expected_product_code.trim().is_empty() {
            return Err(LicenseError::ConfigError(
                "validator.expected_product_code cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Instance metadata client configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ImdsConfig {
    /// Base URL of the metadata service
    pub endpoint: String,
    /// Token lifetime requested from the service, in seconds
    pub token_ttl_secs: u32,
    /// Timeout applied to every metadata call, in milliseconds
    pub timeout_ms: u64,
}

impl Default for ImdsConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_IMDS_ENDPOINT.to_string(),
            token_ttl_secs: MAX_TOKEN_TTL_SECS,
            timeout_ms: DEFAULT_IMDS_TIMEOUT_MS,
        }
    }
}

impl ImdsConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Secrets Manager client configuration.
///
/// Both fields fall back to the standard AWS environment chain when unset.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SecretsConfig {
    /// AWS region override
    pub region: Option<String>,
    /// Endpoint URL override
    pub endpoint_url: Option<String>,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Enable logging
    pub enabled: bool,
    /// Log level: trace, debug, info, warn, error
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            level: "info".to_string(),
        }
    }
}

impl MarketplaceConfig {
    /// Load configuration from file and environment.
    ///
    /// Configuration is loaded in this order (later sources override earlier):
    /// 1. Default values
    /// 2. `config.toml` file (optional)
    /// 3. Environment variables
    pub fn load() -> LicenseResult<Self> {
        let builder = Config::builder()
            // Start with defaults
            .set_default("validator.expected_product_code", "")
            .map_err(|e| LicenseError::ConfigError(e.to_string()))?
            .set_default("imds.endpoint", DEFAULT_IMDS_ENDPOINT)
            .map_err(|e| LicenseError::ConfigError(e.to_string()))?
            .set_default("imds.token_ttl_secs", i64::from(MAX_TOKEN_TTL_SECS))
            .map_err(|e| LicenseError::ConfigError(e.to_string()))?
            .set_default("imds.timeout_ms", DEFAULT_IMDS_TIMEOUT_MS as i64)
            .map_err(|e| LicenseError::ConfigError(e.to_string()))?
            .set_default("logging.enabled", false)
            .map_err(|e| LicenseError::ConfigError(e.to_string()))?
            .set_default("logging.level", "info")
            .map_err(|e| LicenseError::ConfigError(e.to_string()))?
            // Load from config.toml (optional)
            .add_source(config::File::with_name("config").required(false))
            // Override with environment variables
            .set_override_option(
                "validator.expected_product_code",
                env::var("TALOS_EXPECTED_PRODUCT_CODE").ok(),
            )
            .map_err(|e| LicenseError::ConfigError(e.to_string()))?
            .set_override_option("validator.secret_name", env::var("TALOS_SECRET_NAME").ok())
            .map_err(|e| LicenseError::ConfigError(e.to_string()))?
            .set_override_option("imds.endpoint", env::var("TALOS_IMDS_ENDPOINT").ok())
            .map_err(|e| LicenseError::ConfigError(e.to_string()))?
            .set_override_option(
                "imds.token_ttl_secs",
                env::var("TALOS_IMDS_TOKEN_TTL_SECS")
                    .ok()
                    .and_then(|v| v.parse::<i64>().ok()),
            )
            .map_err(|e| LicenseError::ConfigError(e.to_string()))?
            .set_override_option(
                "imds.timeout_ms",
                env::var("TALOS_IMDS_TIMEOUT_MS")
                    .ok()
                    .and_then(|v| v.parse::<i64>().ok()),
            )
            .map_err(|e| LicenseError::ConfigError(e.to_string()))?
            .set_override_option("secrets.region", env::var("TALOS_SECRETS_REGION").ok())
            .map_err(|e| LicenseError::ConfigError(e.to_string()))?
            .set_override_option(
                "secrets.endpoint_url",
                env::var("TALOS_SECRETS_ENDPOINT_URL").ok(),
            )
            .map_err(|e| LicenseError::ConfigError(e.to_string()))?
            .set_override_option(
                "logging.enabled",
                env::var("TALOS_LOGGING_ENABLED")
                    .ok()
                    .and_then(|v| v.parse::<bool>().ok()),
            )
            .map_err(|e| LicenseError::ConfigError(e.to_string()))?
            .set_override_option("logging.level", env::var("TALOS_LOG_LEVEL").ok())
            .map_err(|e| LicenseError::ConfigError(e.to_string()))?;

        let settings = builder
            .build()
            .map_err(|e| LicenseError::ConfigError(format!("failed to build config: {e}")))?;

        let mut config: MarketplaceConfig = settings
            .try_deserialize()
            .map_err(|e| LicenseError::ConfigError(format!("failed to deserialize config: {e}")))?;

        config.validator = config.validator.normalized();
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> LicenseResult<()> {
        self.validator.validate()?;

        // Validate metadata client settings
        if !(self.imds.endpoint.starts_with("http://") || self.imds.endpoint.starts_with("https://"))
        {
            return Err(LicenseError::ConfigError(format!(
                "imds.endpoint must be an http(s) URL, got '{}'",
                self.imds.endpoint
            )));
        }
        if self.imds.token_ttl_secs == 0 || self.imds.token_ttl_secs > MAX_TOKEN_TTL_SECS {
            return Err(LicenseError::ConfigError(format!(
                "imds.token_ttl_secs must be between 1 and {MAX_TOKEN_TTL_SECS}, got {}",
                self.imds.token_ttl_secs
            )));
        }
        if self.imds.timeout_ms == 0 {
            return Err(LicenseError::ConfigError(
                "imds.timeout_ms must be greater than 0".to_string(),
            ));
        }

        // Validate log level
        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            other => {
                return Err(LicenseError::ConfigError(format!(
                    "logging.level must be one of: trace, debug, info, warn, error. Got '{other}'"
                )));
            }
        }

        Ok(())
    }
}

/// Get the global configuration.
///
/// This loads the configuration on first access and caches it.
/// Returns an error if configuration loading or validation fails.
pub fn get_config() -> LicenseResult<&'static MarketplaceConfig> {
    if let Some(config) = CONFIG.get() {
        return Ok(config);
    }

    let config = MarketplaceConfig::load()?;
    config.validate()?;

    // Another thread may have won the race; either value is fine.
    let _ = CONFIG.set(config);

    CONFIG
        .get()
        .ok_or_else(|| LicenseError::ConfigError("configuration was not initialized".to_string()))
}

/// Initialize configuration explicitly.
///
/// Call this early in your application to catch configuration errors.
pub fn init_config() -> LicenseResult<&'static MarketplaceConfig> {
    get_config()
}
