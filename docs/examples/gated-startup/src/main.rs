//! # Gated Startup Example
//!
//! Embeds marketplace validation into an application's startup path. The app
//! refuses to start unless it runs on an instance launched from the expected
//! AWS Marketplace listing, then reads its seat count from the license secret.
//!
//! ## Running This Example
//!
//! On an EC2 instance launched from your listing:
//!
//! ```bash
//! TALOS_EXPECTED_PRODUCT_CODE="your-product-code" \
//! TALOS_SECRET_NAME="your-license-secret" \
//! cargo run
//! ```
//!
//! The secret is expected to hold JSON such as `{"seats": 25, "tier": "pro"}`.

use std::process::ExitCode;

use talos_marketplace::config::MarketplaceConfig;
use talos_marketplace::errors::LicenseError;
use talos_marketplace::secrets::LicenseSecret;
use talos_marketplace::validator::LicenseValidator;
use thiserror::Error;

const DEFAULT_SEATS: u64 = 5;

#[derive(Debug, Error)]
enum StartupError {
    #[error(transparent)]
    License(#[from] LicenseError),

    #[error("malformed license payload: {0}")]
    MalformedLicense(String),
}

#[tokio::main]
async fn main() -> ExitCode {
    match startup().await {
        Ok(seats) => {
            println!("Licensed for {seats} seats - starting application");
            ExitCode::SUCCESS
        }
        Err(StartupError::License(e)) if e.is_instance_rejected() => {
            eprintln!("This build only runs on AWS Marketplace instances: {e}");
            ExitCode::FAILURE
        }
        Err(e) => {
            eprintln!("Startup aborted: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn startup() -> Result<u64, StartupError> {
    let config = MarketplaceConfig::load()?;
    config.validate()?;

    let validator = LicenseValidator::from_config(&config).await?;
    let report = validator.validate().await?;

    seats_from_license(report.license.as_ref())
}

fn seats_from_license(license: Option<&LicenseSecret>) -> Result<u64, StartupError> {
    match license {
        Some(license) => license
            .get("seats")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| {
                StartupError::MalformedLicense("missing numeric 'seats' field".to_string())
            }),
        None => Ok(DEFAULT_SEATS),
    }
}
