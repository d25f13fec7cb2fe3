//! # Command Line Interface
//!
//! `stackctl` runs `setup` unless an operation flag selects something else.
//! Mutating operations hold a lock file in the configuration root for their
//! whole duration; Ctrl-C cancels the run between steps.

pub mod config;
pub mod output;

use std::path::PathBuf;

use clap::{ArgGroup, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use crate::config::load_config;
use crate::errors::{ExitStatus, StackError};
use crate::observability::{init_logging, log_config_info, LogFormat};
use crate::orchestrator::{Orchestrator, RunSummary};
use crate::utils::RootLock;
use output::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "stackctl")]
#[command(about = "Secret propagation, backups and gateway provisioning for a multi-service stack")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(group(
    ArgGroup::new("operation")
        .args(["backup", "recover", "list_backups", "delete_backup", "cleanup", "deep_cleanup", "clear_routes"])
        .multiple(false)
))]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Take a permanent backup, optionally named
    #[arg(long, value_name = "NAME", num_args = 0..=1)]
    pub backup: Option<Option<String>>,

    /// Restore a backup by id, name or name prefix (latest when omitted)
    #[arg(long, value_name = "SELECTOR", num_args = 0..=1)]
    pub recover: Option<Option<String>>,

    /// List backups, newest first
    #[arg(long)]
    pub list_backups: bool,

    /// Delete a backup by id, name or name prefix
    #[arg(long, value_name = "SELECTOR")]
    pub delete_backup: Option<String>,

    /// Remove runtime state; secrets are kept
    #[arg(long)]
    pub cleanup: bool,

    /// Remove runtime state and every service configuration file
    #[arg(long)]
    pub deep_cleanup: bool,

    /// Delete every gateway route created by stackctl
    #[arg(long)]
    pub clear_routes: bool,

    /// Path to the deployment manifest
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Gateway administrative key
    #[arg(long, global = true)]
    pub admin_key: Option<String>,

    /// Path to a file containing the gateway administrative key
    #[arg(long, global = true)]
    pub admin_key_file: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Log line format
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    pub log_format: LogFormat,

    /// Summary output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Table, global = true)]
    pub output: OutputFormat,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Commands {
    /// Ensure secrets, wait for the gateway and reconcile routes (default)
    Setup,
}

/// The single operation selected on the command line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Setup,
    Backup(Option<String>),
    Recover(Option<String>),
    ListBackups,
    DeleteBackup(String),
    Cleanup,
    DeepCleanup,
    ClearRoutes,
}

impl Operation {
    /// Everything except listing needs the root lock
    pub fn mutates(&self) -> bool {
        !matches!(self, Operation::ListBackups)
    }
}

impl Cli {
    pub fn operation(&self) -> Operation {
        if let Some(name) = &self.backup {
            Operation::Backup(name.clone())
        } else if let Some(selector) = &self.recover {
            Operation::Recover(selector.clone())
        } else if self.list_backups {
            Operation::ListBackups
        } else if let Some(selector) = &self.delete_backup {
            Operation::DeleteBackup(selector.clone())
        } else if self.cleanup {
            Operation::Cleanup
        } else if self.deep_cleanup {
            Operation::DeepCleanup
        } else if self.clear_routes {
            Operation::ClearRoutes
        } else {
            Operation::Setup
        }
    }
}

/// Run the CLI and return the process exit status
pub async fn run_cli() -> ExitStatus {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet, cli.log_format);

    let cancel = CancellationToken::new();
    spawn_interrupt_handler(cancel.clone());

    match run(cli, cancel).await {
        Ok(status) => status,
        Err(err) => {
            error!("{:#}", err);
            eprintln!("error: {:#}", err);
            err.downcast_ref::<StackError>().map(StackError::exit_status).unwrap_or(ExitStatus::Failure)
        }
    }
}

async fn run(cli: Cli, cancel: CancellationToken) -> anyhow::Result<ExitStatus> {
    let operation = cli.operation();
    let manifest = config::resolve_manifest_path(cli.config.clone());
    let admin_key = config::resolve_admin_key(cli.admin_key.clone(), cli.admin_key_file.clone())?;

    let deployment = load_config(&manifest)?;
    log_config_info(&deployment);

    let _lock = if operation.mutates() {
        Some(acquire_lock(&deployment.root)?)
    } else {
        None
    };

    let orchestrator = Orchestrator::new(deployment, cancel).with_admin_key(admin_key);
    let summary = execute(&orchestrator, &operation).await?;

    output::print_summary(&summary, cli.output)?;
    Ok(summary.exit_status())
}

async fn execute(orchestrator: &Orchestrator, operation: &Operation) -> Result<RunSummary, StackError> {
    match operation {
        Operation::Setup => orchestrator.setup().await,
        Operation::Backup(name) => orchestrator.backup(name.as_deref()),
        Operation::Recover(selector) => orchestrator.recover(selector.as_deref()),
        Operation::ListBackups => orchestrator.list_backups(),
        Operation::DeleteBackup(selector) => orchestrator.delete_backup(selector),
        Operation::Cleanup => orchestrator.cleanup(),
        Operation::DeepCleanup => orchestrator.deep_cleanup(),
        Operation::ClearRoutes => orchestrator.clear_routes().await,
    }
}

fn acquire_lock(root: &std::path::Path) -> Result<RootLock, StackError> {
    RootLock::acquire(root).map_err(|e| {
        let path = root.join(RootLock::FILE_NAME).display().to_string();
        if e.kind() == std::io::ErrorKind::AlreadyExists {
            StackError::Locked { path }
        } else {
            StackError::io(e, format!("creating lock file {}", path))
        }
    })
}

fn spawn_interrupt_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received; finishing in-flight writes and stopping");
            cancel.cancel();
        }
    });
}
