//! License secret retrieval.
//!
//! [`SecretStore`] is the seam between the validator and the remote secret
//! service. [`AwsSecretsManager`] is the production implementation; tests plug
//! in their own store.

use std::error::Error as StdError;
use std::fmt::Debug;

use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_secretsmanager::error::{DisplayErrorContext, SdkError};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::SecretsConfig;
use crate::errors::SecretStoreError;

/// Reads named secrets from a remote store.
#[async_trait]
pub trait SecretStore: Debug + Send + Sync {
    /// Returns the string payload of the named secret.
    async fn get_secret_string(&self, secret_id: &str) -> Result<String, SecretStoreError>;
}

/// License payload decoded from the secret's JSON string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LicenseSecret(Value);

impl LicenseSecret {
    /// Decode a JSON-encoded secret string.
    pub fn from_json(raw: &str) -> Result<Self, SecretStoreError> {
        serde_json::from_str(raw).map_err(SecretStoreError::InvalidJson)
    }

    /// Look up a top-level key when the payload is a JSON object.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn into_inner(self) -> Value {
        self.0
    }
}

/// AWS Secrets Manager backed store.
#[derive(Debug, Clone)]
pub struct AwsSecretsManager {
    client: aws_sdk_secretsmanager::Client,
}

impl AwsSecretsManager {
    /// Wrap an already configured SDK client.
    pub fn new(client: aws_sdk_secretsmanager::Client) -> Self {
        Self { client }
    }

    /// Load AWS configuration from the environment, applying any overrides.
    pub async fn from_config(config: &SecretsConfig) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = &config.region {
            loader = loader.region(Region::new(region.clone()));
        }
        if let Some(endpoint_url) = &config.endpoint_url {
            loader = loader.endpoint_url(endpoint_url);
        }

        let sdk_config = loader.load().await;
        Self::new(aws_sdk_secretsmanager::Client::new(&sdk_config))
    }
}

#[async_trait]
impl SecretStore for AwsSecretsManager {
    async fn get_secret_string(&self, secret_id: &str) -> Result<String, SecretStoreError> {
        let output = self
            .client
            .get_secret_value()
            .secret_id(secret_id)
            .send()
            .await
            .map_err(sdk_failure)?;

        output
            .secret_string()
            .map(str::to_string)
            .ok_or(SecretStoreError::MissingSecretString)
    }
}

/// Wrap an SDK error, keeping the service error code and message that
/// `SdkError`'s own `Display` ("service error") leaves out.
fn sdk_failure<E, R>(err: SdkError<E, R>) -> SecretStoreError
where
    E: StdError + Send + Sync + 'static,
    R: Debug + Send + Sync + 'static,
{
    let message = match &err {
        SdkError::ServiceError(service) => service.err().to_string(),
        _ => DisplayErrorContext(&err).to_string(),
    };
    SecretStoreError::provider_with_message(message, err)
}
