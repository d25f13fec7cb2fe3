//! Aggregate result of one orchestrator run.

use std::path::PathBuf;

use serde::Serialize;

use crate::backup::{BackupSummary, RestoreReport};
use crate::errors::ExitStatus;
use crate::gateway::{
    ClearReport, ConsumerFailure, ReconcileCounts, ReconcileReport, RouteFailure, SkippedProvider,
};
use crate::secrets::{EnsureReport, FailedWrite, FileWrite, SecretClass, SecretOrigin, SkippedService};

/// A secret as reported to the user. Never carries the value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SecretRow {
    pub name: String,
    pub origin: SecretOrigin,
    pub class: SecretClass,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_service: Option<String>,
    pub persisted: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub operation: String,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub secrets: Vec<SecretRow>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub files_written: Vec<FileWrite>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub file_failures: Vec<FailedWrite>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub skipped_services: Vec<SkippedService>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub routes: Option<ReconcileCounts>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consumers: Option<ReconcileCounts>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub skipped_providers: Vec<SkippedProvider>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub route_failures: Vec<RouteFailure>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub consumer_failures: Vec<ConsumerFailure>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub deleted_routes: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup: Option<BackupSummary>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub backups: Vec<BackupSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub restore: Option<RestoreReport>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub removed: Vec<PathBuf>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl RunSummary {
    pub fn new(operation: &str) -> Self {
        Self { operation: operation.to_string(), ..Self::default() }
    }

    pub fn record_secrets(&mut self, report: &EnsureReport) {
        self.secrets = report
            .secrets
            .iter()
            .map(|s| SecretRow {
                name: s.name.clone(),
                origin: s.origin,
                class: s.class,
                source_service: s.source_service.clone(),
                persisted: s.persisted,
            })
            .collect();
        self.files_written = report.written.clone();
        self.file_failures = report.failed.clone();
        self.skipped_services = report.skipped.clone();
        for name in &report.regenerated {
            self.warnings.push(format!("secret '{}' had an invalid value and was regenerated", name));
        }
        for secret in report.unpersisted() {
            self.warnings.push(format!("secret '{}' was not written to any service file", secret.name));
        }
    }

    pub fn record_reconcile(&mut self, report: ReconcileReport) {
        self.routes = Some(report.routes);
        self.consumers = Some(report.consumers);
        self.skipped_providers = report.skipped;
        self.route_failures = report.failures;
        self.consumer_failures = report.consumer_failures;
    }

    pub fn record_clear(&mut self, report: ClearReport) {
        self.deleted_routes = report.deleted;
        self.route_failures = report.failed;
    }

    /// True when something was attempted and did not succeed
    pub fn is_partial(&self) -> bool {
        !self.file_failures.is_empty()
            || !self.skipped_providers.is_empty()
            || !self.route_failures.is_empty()
            || !self.consumer_failures.is_empty()
    }

    pub fn exit_status(&self) -> ExitStatus {
        if self.is_partial() {
            ExitStatus::PartialProvisioning
        } else {
            ExitStatus::Success
        }
    }
}
