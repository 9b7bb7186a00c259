//! Error types for marketplace license validation.
//!
//! Every variant is terminal for the current validation run. Nothing in this
//! crate retries a failed call; the caller decides what to do with the error.

use std::error::Error as StdError;

use thiserror::Error;

/// Result alias used throughout the crate.
pub type LicenseResult<T> = Result<T, LicenseError>;

/// Errors produced while validating a marketplace instance.
#[derive(Debug, Error)]
pub enum LicenseError {
    /// The instance metadata service could not be reached, timed out, or
    /// answered with an error status. Usually means we are not on EC2.
    #[error("instance metadata unavailable: {0}")]
    MetadataUnavailable(String),

    /// The instance does not carry the expected product code.
    #[error("invalid instance - expected product code {expected}")]
    InvalidInstance { expected: String },

    /// The license secret could not be fetched or decoded.
    #[error("cannot retrieve license secret '{secret_name}': {source}")]
    SecretRetrieval {
        secret_name: String,
        #[source]
        source: SecretStoreError,
    },

    /// Configuration could not be loaded or failed validation.
    #[error("configuration error: {0}")]
    ConfigError(String),
}

impl LicenseError {
    /// Returns true if this error means the host is not a valid marketplace
    /// instance (as opposed to a secret or configuration problem).
    pub fn is_instance_rejected(&self) -> bool {
        matches!(
            self,
            LicenseError::MetadataUnavailable(_) | LicenseError::InvalidInstance { .. }
        )
    }
}

/// Failures of the secret store layer.
#[derive(Debug, Error)]
pub enum SecretStoreError {
    /// The provider rejected the call (access denied, not found, throttled...).
    ///
    /// `message` carries the provider's full error context; SDK errors often
    /// display as a bare "service error" on their own.
    #[error("secret store request failed: {message}")]
    Provider {
        message: String,
        #[source]
        source: Box<dyn StdError + Send + Sync + 'static>,
    },

    /// The secret exists but has no string payload (binary secret).
    #[error("secret has no string value")]
    MissingSecretString,

    /// The secret string is not valid JSON.
    #[error("secret value is not valid JSON: {0}")]
    InvalidJson(#[source] serde_json::Error),

    /// A secret name is configured but no store was attached to the validator.
    #[error("no secret store configured")]
    NoStore,
}

impl SecretStoreError {
    /// Wrap an arbitrary provider error, using its `Display` as the message.
    pub fn provider<E>(err: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self::provider_with_message(err.to_string(), err)
    }

    /// Wrap a provider error with an explicit message.
    pub fn provider_with_message<E>(message: impl Into<String>, err: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        SecretStoreError::Provider {
            message: message.into(),
            source: Box::new(err),
        }
    }

    /// The underlying provider error, if this failure came from the provider.
    pub fn provider_error(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
        match self {
            SecretStoreError::Provider { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}
