//! # stackctl
//!
//! Credential lifecycle and gateway provisioning for a multi-service
//! deployment (identity provider, API gateway, backend API, frontend).
//!
//! ## Architecture
//!
//! ```text
//! Orchestrator → SecretStore → ReadinessProbe → RouteProvisioner
//!      ↓
//! BackupManager (backup, recover, and snapshots before cleanup)
//! ```
//!
//! ## Core Components
//!
//! - **SecretStore**: preserves valid existing secrets, generates missing ones
//!   and propagates one canonical value into every service configuration file
//! - **BackupManager**: temporary and permanent snapshots of the tracked files
//! - **ReadinessProbe**: two-phase wait for the gateway admin API
//! - **RouteProvisioner**: idempotent reconciliation of routes and consumers,
//!   including providers discovered from OpenAPI documents
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use stackctl::{config::load_config, orchestrator::Orchestrator};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> stackctl::Result<()> {
//!     let config = load_config(std::path::Path::new("stackctl.toml"))?;
//!     let summary = Orchestrator::new(config, CancellationToken::new()).setup().await?;
//!     println!("{:?}", summary.routes);
//!     Ok(())
//! }
//! ```

pub mod backup;
pub mod cli;
pub mod config;
pub mod errors;
pub mod gateway;
pub mod observability;
pub mod openapi;
pub mod orchestrator;
pub mod secrets;
pub mod utils;

pub use config::DeploymentConfig;
pub use errors::{ExitStatus, Result, StackError};
pub use orchestrator::{Orchestrator, RunSummary};

/// Application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name from Cargo.toml
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_available() {
        assert!(!VERSION.is_empty());
        assert_eq!(APP_NAME, "stackctl");
    }
}
