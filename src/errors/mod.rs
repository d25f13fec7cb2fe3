//! # Error Handling
//!
//! Error taxonomy shared by every stackctl component. Errors local to one
//! provider or one file are recovered by the component that raised them; the
//! variants here are what reaches the orchestrator and the process exit code.

pub mod types;

pub use types::{ExitStatus, Result, StackError};
