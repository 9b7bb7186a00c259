//! Talos Marketplace - AWS Marketplace instance and license validation
//!
//! Confirms that the running EC2 instance was launched from a given AWS
//! Marketplace listing (via its IMDSv2 product codes) and, optionally, pulls
//! the license payload from AWS Secrets Manager.
//!
//! # Example
//!
//! ```rust,no_run
//! use talos_marketplace::config::init_config;
//! use talos_marketplace::validator::LicenseValidator;
//!
//! # async fn run() -> talos_marketplace::errors::LicenseResult<()> {
//! let config = init_config()?;
//! let validator = LicenseValidator::from_config(config).await?;
//! let report = validator.validate().await?;
//! if let Some(license) = report.license {
//!     println!("license tier: {:?}", license.get("tier"));
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod errors;
pub mod imds;
pub mod logging;
pub mod secrets;
pub mod validator;

pub use errors::{LicenseError, LicenseResult};
pub use validator::{LicenseValidator, ValidationReport};
