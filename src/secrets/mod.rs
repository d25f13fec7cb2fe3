//! Shared secrets across service configuration files.
//!
//! Each declared secret has one canonical value per run. An existing valid
//! value found in a target service file is preserved; otherwise a new value is
//! generated from the operating system RNG. The canonical value is then
//! propagated into every target file with an atomic whole-file rewrite.
//!
//! # Example
//!
//! ```rust,ignore
//! use stackctl::secrets::SecretStore;
//!
//! let store = SecretStore::new(&config);
//! let report = store.ensure_all()?;
//! for secret in &report.secrets {
//!     println!("{} ({})", secret.name, secret.origin);
//! }
//! ```

pub mod env_file;
pub mod error;
pub mod generate;
pub mod store;
pub mod types;

pub use env_file::EnvFile;
pub use error::{Result, SecretsError};
pub use store::{EnsureReport, FailedWrite, FileWrite, SecretStore, SkippedService};
pub use types::{Secret, SecretClass, SecretOrigin, SecretString};
