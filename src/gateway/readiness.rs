//! Two-phase readiness wait for the gateway admin API.
//!
//! Phase 1 polls a TCP connect to the admin host and port. Phase 2 polls an
//! authenticated GET until the API answers 2xx with a JSON body. Both phases
//! use fixed-interval polling bounded by their own budget.

use std::time::Duration;

use tokio::net::TcpStream;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::client::{AdminClient, AdminError};
use crate::config::ReadinessConfig;
use crate::utils::{Attempt, RetryExhausted, RetryPolicy};

const PHASE_CONNECT: &str = "connect";
const PHASE_AUTHENTICATED: &str = "authenticated";

#[derive(Debug, thiserror::Error)]
pub enum ReadinessError {
    #[error("Gateway not ready after {}ms in {phase} phase: {last_error}", elapsed.as_millis())]
    NotReady { phase: &'static str, elapsed: Duration, last_error: String },

    #[error("Gateway rejected the administrative key after {}ms (HTTP {status})", elapsed.as_millis())]
    Unauthorized { elapsed: Duration, status: u16 },

    #[error("Readiness wait cancelled")]
    Cancelled,

    #[error("Invalid admin endpoint: {0}")]
    InvalidEndpoint(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadinessReport {
    pub connect_attempts: u32,
    pub auth_attempts: u32,
    pub elapsed: Duration,
}

#[derive(Debug, Clone)]
pub struct ReadinessProbe {
    client: AdminClient,
    path: String,
    interval: Duration,
    connect_timeout: Duration,
    auth_timeout: Duration,
}

impl ReadinessProbe {
    pub fn new(client: AdminClient, path: impl Into<String>, config: &ReadinessConfig) -> Self {
        Self {
            client,
            path: path.into(),
            interval: config.interval(),
            connect_timeout: config.connect_timeout(),
            auth_timeout: config.auth_timeout(),
        }
    }

    /// Wait until the admin API accepts authenticated requests.
    ///
    /// Total wait is bounded by the sum of both phase budgets. A 401/403 keeps
    /// polling within the phase-2 budget; if it is still the last observed
    /// error when the budget runs out the failure is reported as `Unauthorized`.
    pub async fn wait_until_ready(
        &self,
        cancel: &CancellationToken,
    ) -> Result<ReadinessReport, ReadinessError> {
        let started = Instant::now();
        let (host, port) = self.endpoint()?;
        let address = format!("{}:{}", host, port);
        let attempt_timeout = self.interval.max(Duration::from_millis(500));

        info!(endpoint = %address, "Waiting for gateway admin API");

        let connect_policy = RetryPolicy::fixed(self.interval, self.connect_timeout);
        let connect_attempts = connect_policy
            .run(cancel, |attempt| {
                let address = address.clone();
                async move {
                    match tokio::time::timeout(attempt_timeout, TcpStream::connect(&address)).await {
                        Ok(Ok(_)) => Ok(attempt),
                        Ok(Err(err)) => Err(Attempt::Transient(err.to_string())),
                        Err(_) => Err(Attempt::Transient(format!(
                            "connect timed out after {}ms",
                            attempt_timeout.as_millis()
                        ))),
                    }
                }
            })
            .await
            .map_err(|err| match err {
                RetryExhausted::Cancelled => ReadinessError::Cancelled,
                RetryExhausted::Permanent(last_error)
                | RetryExhausted::Exhausted { last_error, .. } => ReadinessError::NotReady {
                    phase: PHASE_CONNECT,
                    elapsed: started.elapsed(),
                    last_error,
                },
            })?;

        debug!(attempts = connect_attempts, "Admin port accepts connections");

        let auth_policy = RetryPolicy::fixed(self.interval, self.auth_timeout);
        let auth_attempts = auth_policy
            .run(cancel, |attempt| async move {
                self.client.probe(&self.path).await.map(|_| attempt).map_err(Attempt::Transient)
            })
            .await
            .map_err(|err| match err {
                RetryExhausted::Cancelled => ReadinessError::Cancelled,
                RetryExhausted::Permanent(AdminError::Unauthorized { status })
                | RetryExhausted::Exhausted {
                    last_error: AdminError::Unauthorized { status }, ..
                } => ReadinessError::Unauthorized { elapsed: started.elapsed(), status },
                RetryExhausted::Permanent(last_error)
                | RetryExhausted::Exhausted { last_error, .. } => ReadinessError::NotReady {
                    phase: PHASE_AUTHENTICATED,
                    elapsed: started.elapsed(),
                    last_error: last_error.to_string(),
                },
            })?;

        let elapsed = started.elapsed();
        info!(elapsed_ms = elapsed.as_millis() as u64, "Gateway admin API is ready");

        Ok(ReadinessReport { connect_attempts, auth_attempts, elapsed })
    }

    fn endpoint(&self) -> Result<(String, u16), ReadinessError> {
        let url = url::Url::parse(self.client.base_url())
            .map_err(|e| ReadinessError::InvalidEndpoint(format!("{}: {}", self.client.base_url(), e)))?;
        let host = url.host_str().ok_or_else(|| {
            ReadinessError::InvalidEndpoint(format!("'{}' does not contain a host", url))
        })?;
        let port = url.port_or_known_default().ok_or_else(|| {
            ReadinessError::InvalidEndpoint(format!("'{}' does not include a usable port", url))
        })?;
        Ok((host.to_string(), port))
    }
}
