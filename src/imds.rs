//! Client for the EC2 instance metadata service (IMDSv2).
//!
//! Two calls are made against the service:
//! - `PUT /latest/api/token` to obtain a session token
//! - `GET /latest/meta-data/product-codes` using that token
//!
//! Both are bounded by the configured timeout and are never retried.

use std::fmt;

use reqwest::{Client, StatusCode};
use tracing::debug;

use crate::config::ImdsConfig;
use crate::errors::{LicenseError, LicenseResult};

/// Header carrying the requested token lifetime on the token request.
pub const TOKEN_TTL_HEADER: &str = "X-aws-ec2-metadata-token-ttl-seconds";

/// Header carrying the session token on metadata requests.
pub const TOKEN_HEADER: &str = "X-aws-ec2-metadata-token";

pub const TOKEN_PATH: &str = "/latest/api/token";
pub const PRODUCT_CODES_PATH: &str = "/latest/meta-data/product-codes";

/// Short-lived IMDS session token. Never persisted.
#[derive(Clone, PartialEq, Eq)]
pub struct MetadataToken(String);

impl MetadataToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// Keep tokens out of logs.
impl fmt::Debug for MetadataToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("MetadataToken(***)")
    }
}

/// HTTP client bound to one metadata endpoint.
///
/// The underlying connection pool lives as long as this value.
#[derive(Debug, Clone)]
pub struct ImdsClient {
    http: Client,
    endpoint: String,
    token_ttl_secs: u32,
}

impl ImdsClient {
    /// Build a client from configuration.
    pub fn new(config: &ImdsConfig) -> LicenseResult<Self> {
        let http = Client::builder()
            .timeout(config.timeout())
            .connect_timeout(config.timeout())
            .build()
            .map_err(|e| LicenseError::ConfigError(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            token_ttl_secs: config.token_ttl_secs,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Request a session token.
    ///
    /// Any transport failure, timeout or error status means the metadata
    /// service is not available to us, which is reported as
    /// [`LicenseError::MetadataUnavailable`].
    pub async fn fetch_token(&self) -> LicenseResult<MetadataToken> {
        let resp = self
            .http
            .put(format!("{}{}", self.endpoint, TOKEN_PATH))
            .header(TOKEN_TTL_HEADER, self.token_ttl_secs.to_string())
            .send()
            .await
            .map_err(|e| unavailable("cannot obtain IMDS token - not running on EC2?", e))?;

        if !resp.status().is_success() {
            return Err(LicenseError::MetadataUnavailable(format!(
                "token request failed with HTTP status {}",
                resp.status()
            )));
        }

        let token = resp
            .text()
            .await
            .map_err(|e| unavailable("failed to read IMDS token", e))?;

        debug!(ttl_secs = self.token_ttl_secs, "obtained IMDS token");
        Ok(MetadataToken(token.trim().to_string()))
    }

    /// Fetch the marketplace product codes attached to this instance.
    ///
    /// The service answers 404 when the instance has no product codes; that is
    /// returned as an empty list.
    pub async fn product_codes(&self, token: &MetadataToken) -> LicenseResult<Vec<String>> {
        let resp = self
            .http
            .get(format!("{}{}", self.endpoint, PRODUCT_CODES_PATH))
            .header(TOKEN_HEADER, token.as_str())
            .send()
            .await
            .map_err(|e| unavailable("product-codes request failed", e))?;

        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            debug!("instance has no product codes");
            return Ok(Vec::new());
        }
        if !status.is_success() {
            return Err(LicenseError::MetadataUnavailable(format!(
                "product-codes request failed with HTTP status {status}"
            )));
        }

        let body = resp
            .text()
            .await
            .map_err(|e| unavailable("failed to read product codes", e))?;

        let codes = parse_product_codes(&body);
        debug!(count = codes.len(), "fetched product codes");
        Ok(codes)
    }
}

/// Split a newline-delimited product-codes body into trimmed, non-empty codes.
pub fn parse_product_codes(body: &str) -> Vec<String> {
    body.lines()
        .map(str::trim)
        .filter(|code| !code.is_empty())
        .map(str::to_string)
        .collect()
}

fn unavailable(context: &str, err: reqwest::Error) -> LicenseError {
    let reason = if err.is_timeout() {
        "timed out"
    } else if err.is_connect() {
        "connection failed"
    } else {
        "request error"
    };
    LicenseError::MetadataUnavailable(format!("{context} ({reason}: {err})"))
}
