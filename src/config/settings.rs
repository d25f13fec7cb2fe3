//! # Deployment Manifest
//!
//! Typed schema for `stackctl.toml`: the services and their configuration
//! files, the secrets they share, backup locations, the gateway admin API and
//! the upstream providers to expose through it.
//!
//! Validation happens in two tiers. Structural problems (duplicate ids,
//! references to undeclared services or secrets, paths escaping the
//! configuration root) fail [`DeploymentConfig::validate`] and abort the run
//! before anything is touched. Problems local to one provider are reported by
//! [`ProviderConfig::validate_provider`] at reconciliation time so the
//! provider can be skipped while the others proceed.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::errors::{Result, StackError};
use crate::secrets::{SecretClass, SecretString};
use crate::utils::{
    is_contained_relative, CONFIG_KEY_REGEX, OPERATION_ID_REGEX, PROVIDER_ID_REGEX,
    SERVICE_ID_REGEX,
};

const HTTP_METHODS: &[&str] = &["GET", "POST", "PUT", "PATCH", "DELETE", "HEAD", "OPTIONS"];

/// Root of the deployment manifest
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct DeploymentConfig {
    /// Directory holding the manifest; relative paths resolve against it
    #[serde(skip)]
    pub root: PathBuf,

    #[serde(default)]
    pub policy: PolicyConfig,

    #[serde(default)]
    #[validate(nested)]
    pub services: Vec<ServiceDeclaration>,

    #[serde(default)]
    #[validate(nested)]
    pub secrets: Vec<SecretDeclaration>,

    #[serde(default)]
    pub backup: BackupConfig,

    /// Derived/runtime state removed by `cleanup`
    #[serde(default)]
    pub runtime_paths: Vec<PathBuf>,

    #[serde(default)]
    #[validate(nested)]
    pub gateway: GatewayConfig,

    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
}

/// What to do when an existing secret value fails format validation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum InvalidSecretPolicy {
    #[default]
    Regenerate,
    Abort,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PolicyConfig {
    #[serde(default)]
    pub on_invalid: InvalidSecretPolicy,
}

/// A service owning one key-value configuration file
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ServiceDeclaration {
    #[validate(length(min = 1, max = 64, message = "Service id must be 1-64 characters"))]
    pub id: String,

    /// Configuration file, relative to the configuration root
    pub file: PathBuf,

    /// Seed used when `file` is absent but its directory exists
    #[serde(default)]
    pub template: Option<PathBuf>,
}

/// A secret shared by one or more services
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SecretDeclaration {
    #[validate(length(min = 1, max = 128, message = "Secret name must be 1-128 characters"))]
    pub name: String,

    #[serde(default)]
    pub class: SecretClass,

    #[serde(default)]
    #[validate(range(min = 8, max = 4096, message = "min_length must be between 8 and 4096"))]
    pub min_length: Option<usize>,

    /// Services that consume the secret, in discovery precedence order
    #[validate(length(min = 1, message = "A secret needs at least one target service"))]
    pub targets: Vec<SecretTarget>,
}

/// A consuming service, optionally under a service-local key name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SecretTarget {
    Service(String),
    Renamed { service: String, key: String },
}

impl SecretTarget {
    pub fn service(&self) -> &str {
        match self {
            SecretTarget::Service(service) => service,
            SecretTarget::Renamed { service, .. } => service,
        }
    }

    /// Key under which the secret is stored in the target's file
    pub fn key<'a>(&'a self, secret_name: &'a str) -> &'a str {
        match self {
            SecretTarget::Service(_) => secret_name,
            SecretTarget::Renamed { key, .. } => key,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupConfig {
    /// Permanent backups; must survive a host restart
    #[serde(default = "default_backup_dir")]
    pub dir: PathBuf,

    /// Temporary backups; volatile, defaults to a per-root directory under the system temp dir
    #[serde(default)]
    pub temp_dir: Option<PathBuf>,

    /// Tracked files beyond the service configuration files
    #[serde(default)]
    pub extra_files: Vec<PathBuf>,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self { dir: default_backup_dir(), temp_dir: None, extra_files: Vec::new() }
    }
}

/// Gateway admin API and route layout
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct GatewayConfig {
    #[serde(default = "default_admin_url")]
    #[validate(length(min = 1, message = "Admin URL cannot be empty"))]
    pub admin_url: String,

    /// Declared secret whose canonical value is the administrative key
    #[serde(default)]
    pub admin_key_secret: Option<String>,

    /// Literal administrative key; `admin_key_secret` takes precedence
    #[serde(default)]
    pub admin_key: Option<SecretString>,

    #[serde(default = "default_admin_key_header")]
    pub admin_key_header: String,

    #[serde(default = "default_routes_path")]
    pub routes_path: String,

    #[serde(default = "default_consumers_path")]
    pub consumers_path: String,

    /// Path polled by the authenticated readiness phase; defaults to `routes_path`
    #[serde(default)]
    pub readiness_path: Option<String>,

    /// Public path prefix for provider routes
    #[serde(default = "default_route_prefix")]
    pub route_prefix: String,

    #[serde(default = "default_request_timeout")]
    #[validate(range(min = 1, max = 300, message = "Request timeout must be between 1 and 300 seconds"))]
    pub request_timeout_secs: u64,

    /// Providers reconciled concurrently
    #[serde(default = "default_parallelism")]
    #[validate(range(min = 1, max = 64, message = "Parallelism must be between 1 and 64"))]
    pub parallelism: usize,

    #[serde(default)]
    #[validate(nested)]
    pub readiness: ReadinessConfig,

    #[serde(default)]
    #[validate(nested)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub consumers: Vec<ConsumerDeclaration>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            admin_url: default_admin_url(),
            admin_key_secret: None,
            admin_key: None,
            admin_key_header: default_admin_key_header(),
            routes_path: default_routes_path(),
            consumers_path: default_consumers_path(),
            readiness_path: None,
            route_prefix: default_route_prefix(),
            request_timeout_secs: default_request_timeout(),
            parallelism: default_parallelism(),
            readiness: ReadinessConfig::default(),
            retry: RetryConfig::default(),
            consumers: Vec::new(),
        }
    }
}

impl GatewayConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn readiness_path(&self) -> &str {
        self.readiness_path.as_deref().unwrap_or(&self.routes_path)
    }
}

/// Two-phase readiness budgets
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ReadinessConfig {
    #[serde(default = "default_poll_interval_ms")]
    #[validate(range(min = 10, max = 60000, message = "Poll interval must be between 10ms and 60s"))]
    pub interval_ms: u64,

    #[serde(default = "default_phase_timeout")]
    #[validate(range(min = 1, max = 3600, message = "Connect timeout must be between 1 and 3600 seconds"))]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_phase_timeout")]
    #[validate(range(min = 1, max = 3600, message = "Auth timeout must be between 1 and 3600 seconds"))]
    pub auth_timeout_secs: u64,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_poll_interval_ms(),
            connect_timeout_secs: default_phase_timeout(),
            auth_timeout_secs: default_phase_timeout(),
        }
    }
}

impl ReadinessConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn auth_timeout(&self) -> Duration {
        Duration::from_secs(self.auth_timeout_secs)
    }
}

/// Bounded retry for individual admin API calls
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    #[validate(range(min = 1, max = 20, message = "Max attempts must be between 1 and 20"))]
    pub max_attempts: u32,

    #[serde(default = "default_retry_interval_ms")]
    #[validate(range(max = 60000, message = "Retry interval must be at most 60s"))]
    pub interval_ms: u64,

    #[serde(default = "default_retry_deadline")]
    #[validate(range(min = 1, max = 600, message = "Retry deadline must be between 1 and 600 seconds"))]
    pub deadline_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            interval_ms: default_retry_interval_ms(),
            deadline_secs: default_retry_deadline(),
        }
    }
}

/// A caller identity that presents the same key on every route it uses
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumerDeclaration {
    pub username: String,
    /// Declared secret holding the consumer's key
    pub key_secret: String,
}

/// An upstream provider exposed through the gateway
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub id: String,

    #[serde(default)]
    pub display_name: Option<String>,

    pub base_url: String,

    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default)]
    pub auth: ProviderAuth,

    pub endpoints: EndpointSource,

    /// Consumers allowed to call this provider; all declared consumers when unset
    #[serde(default)]
    pub consumers: Option<Vec<String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum AuthKind {
    #[default]
    None,
    Bearer,
    ApiKey,
    Basic,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProviderAuth {
    #[serde(default)]
    pub kind: AuthKind,

    #[serde(default)]
    pub credential: Option<CredentialSource>,

    /// Header carrying the credential for `api-key` auth
    #[serde(default)]
    pub header: Option<String>,
}

/// Where an upstream credential is read from
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CredentialSource {
    /// A key in a service configuration file
    ServiceKey { service: String, key: String },
    /// The canonical value of a declared secret
    Secret { secret: String },
    /// A literal value in the manifest
    Value { value: SecretString },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "kebab-case")]
pub enum EndpointSource {
    #[serde(alias = "static-list")]
    Static { operations: Vec<StaticOperation> },
    Discovered {
        spec_url: String,
        /// Optional allowlist of operation ids
        #[serde(default)]
        operations: Option<Vec<String>>,
        /// Send the upstream credential when fetching the document
        #[serde(default)]
        spec_auth: bool,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StaticOperation {
    pub id: String,
    pub method: String,
    pub path: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl ProviderConfig {
    pub fn display_name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.id)
    }

    /// Checks local to this provider. A failure skips the provider; it does not abort the run.
    pub fn validate_provider(&self) -> Result<url::Url> {
        if !PROVIDER_ID_REGEX.is_match(&self.id) {
            return Err(StackError::validation_field(
                format!("Provider id '{}' must match [a-zA-Z0-9-]+", self.id),
                "providers.id",
            ));
        }

        let base = url::Url::parse(&self.base_url).map_err(|e| {
            StackError::validation_field(
                format!("Provider '{}' has an invalid base_url: {}", self.id, e),
                "providers.base_url",
            )
        })?;
        if !matches!(base.scheme(), "http" | "https") || base.host_str().is_none() {
            return Err(StackError::validation_field(
                format!("Provider '{}' base_url must be an absolute http(s) URL", self.id),
                "providers.base_url",
            ));
        }

        if self.auth.kind != AuthKind::None && self.auth.credential.is_none() {
            return Err(StackError::validation_field(
                format!("Provider '{}' uses {:?} auth but has no credential", self.id, self.auth.kind),
                "providers.auth.credential",
            ));
        }

        match &self.endpoints {
            EndpointSource::Static { operations } => {
                if operations.is_empty() {
                    return Err(StackError::validation_field(
                        format!("Provider '{}' declares no operations", self.id),
                        "providers.endpoints.operations",
                    ));
                }
                let mut seen = HashSet::new();
                for op in operations {
                    if !OPERATION_ID_REGEX.is_match(&op.id) || !seen.insert(op.id.as_str()) {
                        return Err(StackError::validation_field(
                            format!("Provider '{}' has an invalid or duplicate operation id '{}'", self.id, op.id),
                            "providers.endpoints.operations.id",
                        ));
                    }
                    if !HTTP_METHODS.contains(&op.method.to_ascii_uppercase().as_str()) {
                        return Err(StackError::validation_field(
                            format!("Operation '{}' has unsupported method '{}'", op.id, op.method),
                            "providers.endpoints.operations.method",
                        ));
                    }
                    if !op.path.starts_with('/') {
                        return Err(StackError::validation_field(
                            format!("Operation '{}' path must start with '/'", op.id),
                            "providers.endpoints.operations.path",
                        ));
                    }
                }
            }
            EndpointSource::Discovered { spec_url, .. } => {
                url::Url::parse(spec_url).map_err(|e| {
                    StackError::validation_field(
                        format!("Provider '{}' has an invalid spec_url: {}", self.id, e),
                        "providers.endpoints.spec_url",
                    )
                })?;
            }
        }

        Ok(base)
    }
}

impl DeploymentConfig {
    /// Parse a manifest from TOML text, rooted at `root`, and validate it
    pub fn from_toml_str(text: &str, root: impl Into<PathBuf>) -> Result<Self> {
        let mut config: DeploymentConfig = toml::from_str(text)
            .map_err(|e| StackError::config_with_source("Invalid manifest", Box::new(e)))?;
        config.root = root.into();
        config.validate()?;
        Ok(config)
    }

    /// Validate the entire configuration
    pub fn validate(&self) -> Result<()> {
        Validate::validate(self).map_err(StackError::from)?;
        self.validate_custom()?;
        Ok(())
    }

    /// Cross-field checks the validator derives cannot express
    fn validate_custom(&self) -> Result<()> {
        let mut service_ids = HashSet::new();
        for service in &self.services {
            if !SERVICE_ID_REGEX.is_match(&service.id) {
                return Err(StackError::config(format!("Invalid service id '{}'", service.id)));
            }
            if !service_ids.insert(service.id.as_str()) {
                return Err(StackError::config(format!("Duplicate service id '{}'", service.id)));
            }
            require_contained(&service.file, "services.file")?;
            if let Some(template) = &service.template {
                require_contained(template, "services.template")?;
            }
        }

        let mut secret_names = HashSet::new();
        let mut assigned_keys = HashSet::new();
        for secret in &self.secrets {
            if !CONFIG_KEY_REGEX.is_match(&secret.name) {
                return Err(StackError::config(format!("Invalid secret name '{}'", secret.name)));
            }
            if !secret_names.insert(secret.name.as_str()) {
                return Err(StackError::config(format!("Duplicate secret '{}'", secret.name)));
            }
            for target in &secret.targets {
                if !service_ids.contains(target.service()) {
                    return Err(StackError::config(format!(
                        "Secret '{}' targets undeclared service '{}'",
                        secret.name,
                        target.service()
                    )));
                }
                let key = target.key(&secret.name);
                if !CONFIG_KEY_REGEX.is_match(key) {
                    return Err(StackError::config(format!(
                        "Secret '{}' uses invalid key '{}' in service '{}'",
                        secret.name,
                        key,
                        target.service()
                    )));
                }
                if !assigned_keys.insert((target.service().to_string(), key.to_string())) {
                    return Err(StackError::config(format!(
                        "Key '{}' in service '{}' is claimed by more than one secret target",
                        key,
                        target.service()
                    )));
                }
            }
        }

        if !self.backup.dir.is_absolute() {
            require_contained(&self.backup.dir, "backup.dir")?;
        }
        for path in &self.backup.extra_files {
            require_contained(path, "backup.extra_files")?;
        }
        for path in &self.runtime_paths {
            require_contained(path, "runtime_paths")?;
        }

        let admin = url::Url::parse(&self.gateway.admin_url).map_err(|e| {
            StackError::config(format!("Invalid gateway admin_url '{}': {}", self.gateway.admin_url, e))
        })?;
        if !matches!(admin.scheme(), "http" | "https") || admin.host_str().is_none() {
            return Err(StackError::config("Gateway admin_url must be an absolute http(s) URL"));
        }
        if let Some(name) = &self.gateway.admin_key_secret {
            if !secret_names.contains(name.as_str()) {
                return Err(StackError::config(format!(
                    "gateway.admin_key_secret refers to undeclared secret '{}'",
                    name
                )));
            }
        }

        let mut usernames = HashSet::new();
        for consumer in &self.gateway.consumers {
            if !SERVICE_ID_REGEX.is_match(&consumer.username) {
                return Err(StackError::config(format!(
                    "Invalid consumer username '{}'",
                    consumer.username
                )));
            }
            if !usernames.insert(consumer.username.as_str()) {
                return Err(StackError::config(format!("Duplicate consumer '{}'", consumer.username)));
            }
            if !secret_names.contains(consumer.key_secret.as_str()) {
                return Err(StackError::config(format!(
                    "Consumer '{}' refers to undeclared secret '{}'",
                    consumer.username, consumer.key_secret
                )));
            }
        }

        let mut provider_ids = HashSet::new();
        for provider in &self.providers {
            if !provider_ids.insert(provider.id.as_str()) {
                return Err(StackError::config(format!("Duplicate provider id '{}'", provider.id)));
            }
            for username in provider.consumers.iter().flatten() {
                if !usernames.contains(username.as_str()) {
                    return Err(StackError::config(format!(
                        "Provider '{}' binds undeclared consumer '{}'",
                        provider.id, username
                    )));
                }
            }
        }

        Ok(())
    }

    /// Resolve a manifest path against the configuration root
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }

    pub fn service(&self, id: &str) -> Option<&ServiceDeclaration> {
        self.services.iter().find(|s| s.id == id)
    }

    pub fn secret(&self, name: &str) -> Option<&SecretDeclaration> {
        self.secrets.iter().find(|s| s.name == name)
    }

    pub fn backup_dir(&self) -> PathBuf {
        self.resolve(&self.backup.dir)
    }

    /// Temporary backup location. Set by the loader when the manifest leaves it unset.
    pub fn temp_backup_dir(&self) -> PathBuf {
        match &self.backup.temp_dir {
            Some(dir) => self.resolve(dir),
            None => self.backup_dir().join("tmp"),
        }
    }

    /// Tracked files as (owner, path relative to root): service files first, then extra files
    pub fn tracked_files(&self) -> Vec<(String, PathBuf)> {
        let mut files: Vec<(String, PathBuf)> =
            self.services.iter().map(|s| (s.id.clone(), s.file.clone())).collect();
        files.extend(self.backup.extra_files.iter().map(|p| ("extra".to_string(), p.clone())));
        files
    }

    /// Enabled providers, in manifest order
    pub fn enabled_providers(&self) -> impl Iterator<Item = &ProviderConfig> {
        self.providers.iter().filter(|p| p.enabled)
    }

    /// Consumers bound to `provider`
    pub fn consumers_for<'a>(&'a self, provider: &'a ProviderConfig) -> Vec<&'a ConsumerDeclaration> {
        match &provider.consumers {
            Some(names) => self
                .gateway
                .consumers
                .iter()
                .filter(|c| names.iter().any(|n| n == &c.username))
                .collect(),
            None => self.gateway.consumers.iter().collect(),
        }
    }
}

fn require_contained(path: &Path, field: &str) -> Result<()> {
    if is_contained_relative(path) {
        Ok(())
    } else {
        Err(StackError::config(format!(
            "{} entry '{}' must be a relative path inside the configuration root",
            field,
            path.display()
        )))
    }
}

fn default_true() -> bool {
    true
}

fn default_backup_dir() -> PathBuf {
    PathBuf::from(".stackctl/backups")
}

fn default_admin_url() -> String {
    "http://127.0.0.1:9180".to_string()
}

fn default_admin_key_header() -> String {
    "X-API-KEY".to_string()
}

fn default_routes_path() -> String {
    "/apisix/admin/routes".to_string()
}

fn default_consumers_path() -> String {
    "/apisix/admin/consumers".to_string()
}

fn default_route_prefix() -> String {
    "/ai".to_string()
}

fn default_request_timeout() -> u64 {
    10
}

fn default_parallelism() -> usize {
    4
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_phase_timeout() -> u64 {
    60
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_interval_ms() -> u64 {
    500
}

fn default_retry_deadline() -> u64 {
    15
}
