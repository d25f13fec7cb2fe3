//! Route and consumer reconciliation against the gateway admin API.
//!
//! Consumers bound by enabled providers are ensured first, once per run.
//! Providers are then reconciled concurrently (bounded by
//! `gateway.parallelism`); each produces its own outcome and the outcomes are
//! merged at the end, so no mutable state is shared between providers.
//!
//! A route is created when absent, updated when the stored object differs
//! from the desired body, and left alone otherwise. A failing route is
//! recorded and the remaining routes still run.

use std::collections::HashSet;
use std::sync::Arc;

use futures::{stream, StreamExt};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};

use super::client::{with_retry, AdminClient, AdminError};
use super::credentials::{upstream_headers, Credentials};
use super::model::{
    build_consumer, build_route, is_subset, DesiredRoute, Operation, RouteContext, UpstreamTarget,
    MANAGED_BY,
};
use super::route_id::split_route_id;
use crate::config::{AuthKind, ConsumerDeclaration, DeploymentConfig, EndpointSource, ProviderConfig};
use crate::openapi::{self, DiscoveryError};
use crate::provider_span;
use crate::utils::RetryPolicy;

#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    /// The administrative key was rejected; nothing further can succeed
    #[error("Admin API rejected the administrative key (HTTP {status}) while ensuring consumer '{username}'")]
    Unauthorized { username: String, status: u16 },

    #[error("Listing routes failed: {0}")]
    List(AdminError),

    #[error("Failed to build HTTP client: {0}")]
    Client(String),

    #[error("Provisioning cancelled")]
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Change {
    Created,
    Updated,
    Unchanged,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileCounts {
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub failed: usize,
}

impl ReconcileCounts {
    fn record(&mut self, change: Change) {
        match change {
            Change::Created => self.created += 1,
            Change::Updated => self.updated += 1,
            Change::Unchanged => self.unchanged += 1,
        }
    }

    fn merge(&mut self, other: &ReconcileCounts) {
        self.created += other.created;
        self.updated += other.updated;
        self.unchanged += other.unchanged;
        self.failed += other.failed;
    }

    /// Creates plus updates
    pub fn mutations(&self) -> usize {
        self.created + self.updated
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    Validation,
    SpecUnreachable,
    SpecInvalid,
    Credential,
    ConsumerUnavailable,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedProvider {
    pub provider: String,
    pub reason: SkipReason,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RouteFailure {
    pub provider: String,
    pub route_id: String,
    pub operation: String,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConsumerFailure {
    pub username: String,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderSummary {
    pub provider: String,
    pub routes: ReconcileCounts,
    pub skipped: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub routes: ReconcileCounts,
    pub consumers: ReconcileCounts,
    pub providers: Vec<ProviderSummary>,
    pub skipped: Vec<SkippedProvider>,
    pub failures: Vec<RouteFailure>,
    pub consumer_failures: Vec<ConsumerFailure>,
    pub cancelled: bool,
}

impl ReconcileReport {
    /// No failed route or consumer, no skipped provider, not cancelled
    pub fn is_complete(&self) -> bool {
        self.routes.failed == 0
            && self.skipped.is_empty()
            && self.consumer_failures.is_empty()
            && !self.cancelled
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ClearReport {
    pub deleted: Vec<String>,
    pub failed: Vec<RouteFailure>,
}

struct ProviderOutcome {
    index: usize,
    summary: ProviderSummary,
    skipped: Option<SkippedProvider>,
    failures: Vec<RouteFailure>,
    cancelled: bool,
}

impl ProviderOutcome {
    fn new(index: usize, provider: &str) -> Self {
        Self {
            index,
            summary: ProviderSummary {
                provider: provider.to_string(),
                routes: ReconcileCounts::default(),
                skipped: false,
            },
            skipped: None,
            failures: Vec::new(),
            cancelled: false,
        }
    }

    fn skip(mut self, reason: SkipReason, message: impl Into<String>) -> Self {
        let message = message.into();
        warn!(provider = %self.summary.provider, ?reason, %message, "Skipping provider");
        self.summary.skipped = true;
        self.skipped = Some(SkippedProvider {
            provider: self.summary.provider.clone(),
            reason,
            message,
        });
        self
    }
}

pub struct RouteProvisioner {
    admin: AdminClient,
    http: reqwest::Client,
    config: Arc<DeploymentConfig>,
    credentials: Credentials,
    retry: RetryPolicy,
}

impl RouteProvisioner {
    pub fn new(
        admin: AdminClient,
        config: Arc<DeploymentConfig>,
        credentials: Credentials,
    ) -> Result<Self, ProvisionError> {
        let http = reqwest::Client::builder()
            .timeout(config.gateway.request_timeout())
            .build()
            .map_err(|e| ProvisionError::Client(e.to_string()))?;

        let retry_config = &config.gateway.retry;
        let retry = RetryPolicy::fixed(
            std::time::Duration::from_millis(retry_config.interval_ms),
            std::time::Duration::from_secs(retry_config.deadline_secs),
        )
        .with_max_attempts(retry_config.max_attempts);

        Ok(Self { admin, http, config, credentials, retry })
    }

    /// Reconcile every enabled provider of the manifest
    pub async fn reconcile_all(&self, cancel: &CancellationToken) -> Result<ReconcileReport, ProvisionError> {
        let providers: Vec<ProviderConfig> = self.config.enabled_providers().cloned().collect();
        self.reconcile(&providers, cancel).await
    }

    pub async fn reconcile(
        &self,
        providers: &[ProviderConfig],
        cancel: &CancellationToken,
    ) -> Result<ReconcileReport, ProvisionError> {
        let providers: Vec<&ProviderConfig> = providers.iter().filter(|p| p.enabled).collect();
        let mut report = ReconcileReport::default();

        let failed_consumers = self.ensure_consumers(&providers, &mut report, cancel).await?;

        let parallelism = self.config.gateway.parallelism.max(1);
        let mut outcomes: Vec<ProviderOutcome> = stream::iter(providers.iter().enumerate())
            .map(|(index, provider)| {
                let span = provider_span!(provider.id);
                self.reconcile_provider(index, provider, &failed_consumers, cancel).instrument(span)
            })
            .buffer_unordered(parallelism)
            .collect()
            .await;
        outcomes.sort_by_key(|outcome| outcome.index);

        for outcome in outcomes {
            report.routes.merge(&outcome.summary.routes);
            report.failures.extend(outcome.failures);
            report.skipped.extend(outcome.skipped);
            report.cancelled |= outcome.cancelled;
            report.providers.push(outcome.summary);
        }

        info!(
            created = report.routes.created,
            updated = report.routes.updated,
            unchanged = report.routes.unchanged,
            failed = report.routes.failed,
            skipped_providers = report.skipped.len(),
            "Route reconciliation finished"
        );

        if report.cancelled {
            return Err(ProvisionError::Cancelled);
        }
        Ok(report)
    }

    /// Delete every route labelled as managed by this tool
    pub async fn clear_routes(&self, cancel: &CancellationToken) -> Result<ClearReport, ProvisionError> {
        let routes = with_retry(&self.retry, cancel, || self.admin.list_routes())
            .await
            .map_err(|e| match e {
                AdminError::Cancelled => ProvisionError::Cancelled,
                other => ProvisionError::List(other),
            })?;

        let mut report = ClearReport::default();
        for route in routes.iter().filter(|r| is_managed(r)) {
            let Some(id) = route.get("id").and_then(Value::as_str) else {
                continue;
            };
            if cancel.is_cancelled() {
                return Err(ProvisionError::Cancelled);
            }

            match with_retry(&self.retry, cancel, || self.admin.delete_route(id)).await {
                Ok(_) => {
                    info!(route_id = %id, "Deleted route");
                    report.deleted.push(id.to_string());
                }
                Err(AdminError::Cancelled) => return Err(ProvisionError::Cancelled),
                Err(err) => {
                    warn!(route_id = %id, error = %err, "Failed to delete route");
                    let provider = route
                        .pointer("/labels/provider")
                        .and_then(Value::as_str)
                        .or_else(|| split_route_id(id).map(|(provider, _)| provider))
                        .unwrap_or("unknown");
                    report.failed.push(RouteFailure {
                        provider: provider.to_string(),
                        route_id: id.to_string(),
                        operation: String::new(),
                        error: err.to_string(),
                    });
                }
            }
        }

        Ok(report)
    }

    /// Ensure every consumer bound by `providers`. Returns the usernames that failed.
    async fn ensure_consumers(
        &self,
        providers: &[&ProviderConfig],
        report: &mut ReconcileReport,
        cancel: &CancellationToken,
    ) -> Result<HashSet<String>, ProvisionError> {
        let mut wanted: Vec<&ConsumerDeclaration> = Vec::new();
        for provider in providers {
            for consumer in self.config.consumers_for(provider) {
                if !wanted.iter().any(|c| c.username == consumer.username) {
                    wanted.push(consumer);
                }
            }
        }

        let mut failed = HashSet::new();
        for consumer in wanted {
            if cancel.is_cancelled() {
                return Err(ProvisionError::Cancelled);
            }

            let Some(key) = self.credentials.secret(&consumer.key_secret) else {
                warn!(consumer = %consumer.username, secret = %consumer.key_secret, "Consumer key has no value");
                report.consumers.failed += 1;
                report.consumer_failures.push(ConsumerFailure {
                    username: consumer.username.clone(),
                    error: format!("secret '{}' has no value", consumer.key_secret),
                });
                failed.insert(consumer.username.clone());
                continue;
            };

            let desired = build_consumer(&consumer.username, key.expose_secret());
            match self.ensure_consumer(&consumer.username, &desired, cancel).await {
                Ok(change) => {
                    debug!(consumer = %consumer.username, ?change, "Consumer reconciled");
                    report.consumers.record(change);
                }
                Err(AdminError::Unauthorized { status }) => {
                    return Err(ProvisionError::Unauthorized {
                        username: consumer.username.clone(),
                        status,
                    })
                }
                Err(AdminError::Cancelled) => return Err(ProvisionError::Cancelled),
                Err(err) => {
                    warn!(consumer = %consumer.username, error = %err, "Failed to ensure consumer");
                    report.consumers.failed += 1;
                    report.consumer_failures.push(ConsumerFailure {
                        username: consumer.username.clone(),
                        error: err.to_string(),
                    });
                    failed.insert(consumer.username.clone());
                }
            }
        }

        Ok(failed)
    }

    async fn ensure_consumer(
        &self,
        username: &str,
        desired: &Value,
        cancel: &CancellationToken,
    ) -> Result<Change, AdminError> {
        let existing = with_retry(&self.retry, cancel, || self.admin.get_consumer(username)).await?;
        let change = match existing {
            Some(actual) if is_subset(desired, &actual) => return Ok(Change::Unchanged),
            Some(_) => Change::Updated,
            None => Change::Created,
        };
        with_retry(&self.retry, cancel, || self.admin.put_consumer(username, desired)).await?;
        Ok(change)
    }

    async fn ensure_route(
        &self,
        route: &DesiredRoute,
        cancel: &CancellationToken,
    ) -> Result<Change, AdminError> {
        let existing = with_retry(&self.retry, cancel, || self.admin.get_route(&route.id)).await?;
        let change = match existing {
            Some(actual) if is_subset(&route.body, &actual) => return Ok(Change::Unchanged),
            Some(_) => Change::Updated,
            None => Change::Created,
        };
        with_retry(&self.retry, cancel, || self.admin.put_route(&route.id, &route.body)).await?;
        Ok(change)
    }

    async fn reconcile_provider(
        &self,
        index: usize,
        provider: &ProviderConfig,
        failed_consumers: &HashSet<String>,
        cancel: &CancellationToken,
    ) -> ProviderOutcome {
        let mut outcome = ProviderOutcome::new(index, &provider.id);

        let base_url = match provider.validate_provider() {
            Ok(url) => url,
            Err(err) => return outcome.skip(SkipReason::Validation, err.to_string()),
        };

        let consumers: Vec<String> =
            self.config.consumers_for(provider).iter().map(|c| c.username.clone()).collect();
        if consumers.is_empty() {
            return outcome.skip(
                SkipReason::Validation,
                "no consumers are bound; routes would be reachable without authentication",
            );
        }
        if let Some(missing) = consumers.iter().find(|c| failed_consumers.contains(*c)) {
            return outcome.skip(
                SkipReason::ConsumerUnavailable,
                format!("consumer '{}' could not be ensured", missing),
            );
        }

        let credential = match (&provider.auth.kind, &provider.auth.credential) {
            (AuthKind::None, _) | (_, None) => None,
            (_, Some(source)) => match self.credentials.resolve(source) {
                Ok(value) => Some(value),
                Err(message) => return outcome.skip(SkipReason::Credential, message),
            },
        };
        let headers = match upstream_headers(&provider.auth, credential.as_ref()) {
            Ok(headers) => headers,
            Err(message) => return outcome.skip(SkipReason::Credential, message),
        };

        let (operations, server_path) = match &provider.endpoints {
            EndpointSource::Static { operations } => {
                let ops = operations
                    .iter()
                    .map(|op| Operation {
                        id: op.id.clone(),
                        method: op.method.to_ascii_uppercase(),
                        path: op.path.clone(),
                        enabled: op.enabled,
                    })
                    .collect::<Vec<_>>();
                (ops, None)
            }
            EndpointSource::Discovered { spec_url, operations: allowlist, spec_auth } => {
                let mut fetch_headers = HeaderMap::new();
                if *spec_auth {
                    for (name, value) in &headers {
                        if let (Ok(name), Ok(value)) =
                            (HeaderName::try_from(name.as_str()), HeaderValue::from_str(value))
                        {
                            fetch_headers.insert(name, value);
                        }
                    }
                }

                match openapi::discover(
                    &self.http,
                    spec_url,
                    fetch_headers,
                    self.config.gateway.request_timeout(),
                    &self.retry,
                    cancel,
                )
                .await
                {
                    Ok(spec) => {
                        info!(operations = spec.operations.len(), "Discovered operations");
                        (openapi::apply_allowlist(spec.operations, allowlist.as_deref()), spec.server_path)
                    }
                    Err(err @ DiscoveryError::SpecUnreachable { .. }) => {
                        return outcome.skip(SkipReason::SpecUnreachable, err.to_string())
                    }
                    Err(err @ DiscoveryError::SpecInvalid { .. }) => {
                        return outcome.skip(SkipReason::SpecInvalid, err.to_string())
                    }
                    Err(DiscoveryError::Cancelled) => {
                        outcome.cancelled = true;
                        return outcome;
                    }
                }
            }
        };

        if operations.is_empty() {
            return outcome.skip(SkipReason::Validation, "no operations selected");
        }

        let upstream = match UpstreamTarget::from_url(&base_url) {
            Ok(target) => target.with_fallback_base_path(server_path.as_deref()),
            Err(message) => return outcome.skip(SkipReason::Validation, message),
        };

        let ctx = RouteContext {
            route_prefix: &self.config.gateway.route_prefix,
            provider_id: &provider.id,
            provider_name: provider.display_name(),
            upstream: &upstream,
            consumers: &consumers,
            upstream_headers: &headers,
        };

        for op in &operations {
            if cancel.is_cancelled() {
                outcome.cancelled = true;
                break;
            }

            let route = build_route(&ctx, op);
            match self.ensure_route(&route, cancel).await {
                Ok(change) => {
                    debug!(route_id = %route.id, ?change, "Route reconciled");
                    outcome.summary.routes.record(change);
                }
                Err(AdminError::Cancelled) => {
                    outcome.cancelled = true;
                    break;
                }
                Err(err) => {
                    warn!(route_id = %route.id, operation = %op.id, error = %err, "Route reconciliation failed");
                    outcome.summary.routes.failed += 1;
                    outcome.failures.push(RouteFailure {
                        provider: provider.id.clone(),
                        route_id: route.id.clone(),
                        operation: op.id.clone(),
                        error: err.to_string(),
                    });
                }
            }
        }

        outcome
    }
}

fn is_managed(route: &Value) -> bool {
    route.pointer("/labels/managed-by").and_then(Value::as_str) == Some(MANAGED_BY)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_counts_merge_and_mutations() {
        let mut total = ReconcileCounts::default();
        let mut a = ReconcileCounts::default();
        a.record(Change::Created);
        a.record(Change::Unchanged);
        let b = ReconcileCounts { created: 0, updated: 2, unchanged: 1, failed: 1 };

        total.merge(&a);
        total.merge(&b);

        assert_eq!(total, ReconcileCounts { created: 1, updated: 2, unchanged: 2, failed: 1 });
        assert_eq!(total.mutations(), 3);
    }

    #[test]
    fn test_is_managed() {
        assert!(is_managed(&json!({"labels": {"managed-by": "stackctl"}})));
        assert!(!is_managed(&json!({"labels": {"managed-by": "someone-else"}})));
        assert!(!is_managed(&json!({"uri": "/manual"})));
    }

    #[test]
    fn test_report_completeness() {
        let mut report = ReconcileReport::default();
        assert!(report.is_complete());

        report.skipped.push(SkippedProvider {
            provider: "acme-1".into(),
            reason: SkipReason::SpecUnreachable,
            message: "connection refused".into(),
        });
        assert!(!report.is_complete());
    }
}
