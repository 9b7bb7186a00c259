use std::process::ExitCode;

use talos_marketplace::config::init_config;
use talos_marketplace::errors::LicenseResult;
use talos_marketplace::logging;
use talos_marketplace::validator::LicenseValidator;

/// Validate this instance against its AWS Marketplace listing.
///
/// Configuration comes from `config.toml` and `TALOS_*` environment
/// variables; at minimum `TALOS_EXPECTED_PRODUCT_CODE` must be set.
#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => {
            println!("License validation successful!");
            ExitCode::SUCCESS
        }
        Err(e) => {
            println!("License validation failed: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> LicenseResult<()> {
    let config = init_config()?;
    logging::init(&config.logging)?;

    let validator = LicenseValidator::from_config(config).await?;

    println!("Validating AWS Marketplace license...");
    validator.verify_instance().await?;
    println!("Valid AWS Marketplace instance");

    match validator.get_license_secret().await? {
        Some(_) => {
            let secret_name = validator.config().secret_name().unwrap_or_default();
            println!("License key retrieved from {secret_name}");
        }
        None => println!("License validation complete"),
    }

    Ok(())
}
