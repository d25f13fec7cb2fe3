//! HTTP client for the gateway admin API
//!
//! Authenticates every request with the administrative key header and
//! classifies failures so callers can decide what to retry. Responses may be
//! wrapped (`{"value": {...}}`, `{"list": [...]}`) or bare.

use std::future::Future;
use std::time::Duration;

use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::config::GatewayConfig;
use crate::secrets::SecretString;
use crate::utils::{Attempt, RetryExhausted, RetryPolicy};

#[derive(Debug, Error)]
pub enum AdminError {
    #[error("Admin API rejected the administrative key (HTTP {status})")]
    Unauthorized { status: u16 },

    #[error("Admin API rejected the request (HTTP {status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("Admin API unavailable (HTTP {status}): {message}")]
    Unavailable { status: u16, message: String },

    #[error("Admin API request timed out after {elapsed_ms}ms: {message}")]
    Timeout { elapsed_ms: u64, message: String },

    #[error("Admin API transport error: {0}")]
    Transport(String),

    #[error("Admin API returned a malformed response: {0}")]
    InvalidResponse(String),

    #[error("Invalid admin API configuration: {0}")]
    Config(String),

    #[error("Admin API request cancelled")]
    Cancelled,
}

impl AdminError {
    /// Failures worth retrying: transport problems, timeouts, 429 and 5xx
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AdminError::Unavailable { .. } | AdminError::Timeout { .. } | AdminError::Transport(_)
        )
    }

    fn classify(self) -> Attempt<AdminError> {
        if self.is_transient() {
            Attempt::Transient(self)
        } else {
            Attempt::Permanent(self)
        }
    }
}

/// Admin API client configuration
#[derive(Debug, Clone)]
pub struct AdminClientConfig {
    /// Base URL of the admin API (e.g., "http://127.0.0.1:9180")
    pub base_url: String,
    pub api_key: SecretString,
    pub key_header: String,
    pub routes_path: String,
    pub consumers_path: String,
    /// Per-request timeout
    pub timeout: Duration,
}

impl AdminClientConfig {
    pub fn from_gateway(gateway: &GatewayConfig, api_key: SecretString) -> Self {
        Self {
            base_url: gateway.admin_url.trim_end_matches('/').to_string(),
            api_key,
            key_header: gateway.admin_key_header.clone(),
            routes_path: gateway.routes_path.clone(),
            consumers_path: gateway.consumers_path.clone(),
            timeout: gateway.request_timeout(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AdminClient {
    client: Client,
    config: AdminClientConfig,
}

impl AdminClient {
    pub fn new(config: AdminClientConfig) -> Result<Self, AdminError> {
        url::Url::parse(&config.base_url)
            .map_err(|e| AdminError::Config(format!("invalid admin URL '{}': {}", config.base_url, e)))?;

        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| AdminError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }

    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.config.base_url, path);
        debug!(method = %method, url = %url, "Admin API request");

        self.client
            .request(method, &url)
            .header(self.config.key_header.as_str(), self.config.api_key.expose_secret())
    }

    fn route_path(&self, id: &str) -> String {
        format!("{}/{}", self.config.routes_path.trim_end_matches('/'), id)
    }

    fn consumer_path(&self, username: &str) -> String {
        format!("{}/{}", self.config.consumers_path.trim_end_matches('/'), username)
    }

    /// Authenticated GET on `path` that must return 2xx with a JSON body
    pub async fn probe(&self, path: &str) -> Result<(), AdminError> {
        let response = self.send(self.request(Method::GET, path)).await?;
        match handle_response(response).await? {
            Value::Null => Err(AdminError::InvalidResponse("empty response body".to_string())),
            _ => Ok(()),
        }
    }

    pub async fn get_route(&self, id: &str) -> Result<Option<Value>, AdminError> {
        self.get_object(&self.route_path(id)).await
    }

    pub async fn put_route(&self, id: &str, body: &Value) -> Result<Value, AdminError> {
        self.put_object(&self.route_path(id), body).await
    }

    /// Returns `false` when the route did not exist
    pub async fn delete_route(&self, id: &str) -> Result<bool, AdminError> {
        let response = self.send(self.request(Method::DELETE, &self.route_path(id))).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        handle_response(response).await.map(|_| true)
    }

    pub async fn list_routes(&self) -> Result<Vec<Value>, AdminError> {
        let response = self.send(self.request(Method::GET, &self.config.routes_path)).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        let body = handle_response(response).await?;
        unwrap_list(body)
    }

    pub async fn get_consumer(&self, username: &str) -> Result<Option<Value>, AdminError> {
        self.get_object(&self.consumer_path(username)).await
    }

    pub async fn put_consumer(&self, username: &str, body: &Value) -> Result<Value, AdminError> {
        self.put_object(&self.consumer_path(username), body).await
    }

    async fn get_object(&self, path: &str) -> Result<Option<Value>, AdminError> {
        let response = self.send(self.request(Method::GET, path)).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body = handle_response(response).await?;
        Ok(Some(unwrap_value(body)))
    }

    async fn put_object(&self, path: &str, body: &Value) -> Result<Value, AdminError> {
        let response = self.send(self.request(Method::PUT, path).json(body)).await?;
        let body = handle_response(response).await?;
        Ok(unwrap_value(body))
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, AdminError> {
        request.send().await.map_err(|e| {
            if e.is_timeout() {
                AdminError::Timeout {
                    elapsed_ms: self.config.timeout.as_millis() as u64,
                    message: e.to_string(),
                }
            } else {
                AdminError::Transport(e.to_string())
            }
        })
    }
}

/// Run an admin API call under `policy`, retrying transient failures
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    mut op: F,
) -> Result<T, AdminError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, AdminError>>,
{
    let result = policy
        .run(cancel, |_| {
            let fut = op();
            async move { fut.await.map_err(AdminError::classify) }
        })
        .await;

    match result {
        Ok(value) => Ok(value),
        Err(RetryExhausted::Permanent(err)) => Err(err),
        Err(RetryExhausted::Exhausted { last_error, .. }) => Err(last_error),
        Err(RetryExhausted::Cancelled) => Err(AdminError::Cancelled),
    }
}

/// Check the status and parse the JSON body
async fn handle_response(response: Response) -> Result<Value, AdminError> {
    let status = response.status();
    debug!(status = %status, "Admin API response");

    if !status.is_success() {
        let error_text =
            response.text().await.unwrap_or_else(|_| "<unable to read error>".to_string());
        trace!("Error response:\n{}", error_text);

        let code = status.as_u16();
        return Err(match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => AdminError::Unauthorized { status: code },
            StatusCode::TOO_MANY_REQUESTS => AdminError::Unavailable { status: code, message: error_text },
            s if s.is_server_error() => AdminError::Unavailable { status: code, message: error_text },
            _ => AdminError::Rejected { status: code, message: error_text },
        });
    }

    let body = response
        .text()
        .await
        .map_err(|e| AdminError::Transport(format!("failed to read response body: {}", e)))?;
    if body.trim().is_empty() {
        return Ok(Value::Null);
    }

    serde_json::from_str(&body).map_err(|e| AdminError::InvalidResponse(e.to_string()))
}

/// `{"value": {...}}` or a bare object
fn unwrap_value(body: Value) -> Value {
    match body {
        Value::Object(mut map) if map.get("value").is_some_and(Value::is_object) => {
            map.remove("value").unwrap_or(Value::Null)
        }
        other => other,
    }
}

/// `{"list": [{"value": {...}}]}`, `{"list": [...]}` or a bare array
fn unwrap_list(body: Value) -> Result<Vec<Value>, AdminError> {
    let items = match body {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("list") {
            Some(Value::Array(items)) => items,
            Some(Value::Object(_)) | Some(Value::Null) | None => Vec::new(),
            Some(other) => {
                return Err(AdminError::InvalidResponse(format!("unexpected list payload: {}", other)))
            }
        },
        Value::Null => Vec::new(),
        other => {
            return Err(AdminError::InvalidResponse(format!("unexpected list payload: {}", other)))
        }
    };
    Ok(items.into_iter().map(unwrap_value).collect())
}
