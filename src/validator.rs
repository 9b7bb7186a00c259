//! AWS Marketplace license validation.
//!
//! A validation run is a strict pipeline:
//! 1. obtain an IMDS session token,
//! 2. fetch the instance product codes and require the expected one,
//! 3. when a secret name is configured, fetch and decode the license secret.
//!
//! The first failing step aborts the run.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::{MarketplaceConfig, ValidatorConfig};
use crate::errors::{LicenseError, LicenseResult, SecretStoreError};
use crate::imds::{ImdsClient, MetadataToken};
use crate::secrets::{AwsSecretsManager, LicenseSecret, SecretStore};

/// Outcome of a successful [`LicenseValidator::validate`] run.
#[derive(Debug, Clone, Serialize)]
pub struct ValidationReport {
    /// The product code that was matched
    pub product_code: String,
    /// When the run completed
    pub validated_at: DateTime<Utc>,
    /// License payload; present only when a secret name is configured
    #[serde(skip_serializing_if = "Option::is_none")]
    pub license: Option<LicenseSecret>,
}

impl ValidationReport {
    pub fn has_license(&self) -> bool {
        self.license.is_some()
    }
}

/// Validates that this host is a marketplace instance and fetches its license.
#[derive(Debug)]
pub struct LicenseValidator {
    config: ValidatorConfig,
    imds: ImdsClient,
    secrets: Option<Arc<dyn SecretStore>>,
}

impl LicenseValidator {
    /// Create a validator with no secret store attached.
    pub fn new(config: ValidatorConfig, imds: ImdsClient) -> Self {
        Self {
            config,
            imds,
            secrets: None,
        }
    }

    /// Attach the store used by [`get_license_secret`](Self::get_license_secret).
    pub fn with_secret_store(mut self, store: Arc<dyn SecretStore>) -> Self {
        self.secrets = Some(store);
        self
    }

    /// Build a validator from full configuration.
    ///
    /// The AWS Secrets Manager client is only created when a secret name is
    /// configured.
    pub async fn from_config(config: &MarketplaceConfig) -> LicenseResult<Self> {
        let imds = ImdsClient::new(&config.imds)?;
        let validator = Self::new(config.validator.clone(), imds);

        if validator.config.secret_name().is_some() {
            let store = AwsSecretsManager::from_config(&config.secrets).await;
            Ok(validator.with_secret_store(Arc::new(store)))
        } else {
            Ok(validator)
        }
    }

    pub fn config(&self) -> &ValidatorConfig {
        &self.config
    }

    /// Obtain an IMDS session token.
    pub async fn get_token(&self) -> LicenseResult<MetadataToken> {
        self.imds.fetch_token().await
    }

    /// Check that the instance carries the expected product code.
    ///
    /// Returns:
    /// - `Ok(true)` if the code is present.
    /// - `Err(InvalidInstance)` if it is not.
    /// - `Err(MetadataUnavailable)` if the metadata service cannot be used.
    pub async fn verify_instance(&self) -> LicenseResult<bool> {
        let token = self.get_token().await?;
        let codes = self.imds.product_codes(&token).await?;
        let expected = self.config.expected_product_code();

        if codes.iter().any(|code| code == expected) {
            info!(product_code = expected, "marketplace instance verified");
            Ok(true)
        } else {
            warn!(
                expected,
                found = ?codes,
                "instance does not carry the expected product code"
            );
            Err(LicenseError::InvalidInstance {
                expected: expected.to_string(),
            })
        }
    }

    /// Fetch and decode the license secret.
    ///
    /// Returns `Ok(None)` without contacting the store when no secret name is
    /// configured.
    pub async fn get_license_secret(&self) -> LicenseResult<Option<LicenseSecret>> {
        let Some(secret_name) = self.config.secret_name() else {
            return Ok(None);
        };

        let fail = |source: SecretStoreError| LicenseError::SecretRetrieval {
            secret_name: secret_name.to_string(),
            source,
        };

        let store = self.secrets.as_ref().ok_or_else(|| fail(SecretStoreError::NoStore))?;
        let raw = store.get_secret_string(secret_name).await.map_err(fail)?;
        let secret = LicenseSecret::from_json(&raw).map_err(fail)?;

        debug!(secret_name, "license secret retrieved");
        Ok(Some(secret))
    }

    /// Run the full validation pipeline.
    pub async fn validate(&self) -> LicenseResult<ValidationReport> {
        info!(
            product_code = self.config.expected_product_code(),
            "validating AWS Marketplace license"
        );

        self.verify_instance().await?;
        let license = self.get_license_secret().await?;

        if let Some(secret_name) = self.config.secret_name() {
            info!(secret_name, "license validation complete");
        } else {
            info!("license validation complete (no license secret configured)");
        }

        Ok(ValidationReport {
            product_code: self.config.expected_product_code().to_string(),
            validated_at: Utc::now(),
            license,
        })
    }
}
