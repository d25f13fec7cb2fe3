//! # Structured Logging
//!
//! Span macros carrying a random `operation_id`, so log lines from one
//! provider's reconciliation or one top-level operation can be correlated even
//! when providers run concurrently.

/// Create a tracing span for one provider's reconciliation.
///
/// ```rust,ignore
/// let span = provider_span!("acme-1");
/// let span = provider_span!("acme-1", source = "discovered");
/// ```
#[macro_export]
macro_rules! provider_span {
    ($provider:expr) => {
        tracing::info_span!(
            "provider",
            provider = %$provider,
            operation_id = %uuid::Uuid::new_v4()
        )
    };
    ($provider:expr, $($field:tt)*) => {
        tracing::info_span!(
            "provider",
            provider = %$provider,
            operation_id = %uuid::Uuid::new_v4(),
            $($field)*
        )
    };
}

/// Create a tracing span for a top-level orchestrator operation
#[macro_export]
macro_rules! operation_span {
    ($operation:expr) => {
        tracing::info_span!(
            "operation",
            operation = %$operation,
            operation_id = %uuid::Uuid::new_v4()
        )
    };
    ($operation:expr, $($field:tt)*) => {
        tracing::info_span!(
            "operation",
            operation = %$operation,
            operation_id = %uuid::Uuid::new_v4(),
            $($field)*
        )
    };
}

/// Log the loaded manifest at startup. Never includes secret values.
pub fn log_config_info(config: &crate::config::DeploymentConfig) {
    tracing::info!(
        root = %config.root.display(),
        services = config.services.len(),
        secrets = config.secrets.len(),
        providers = config.providers.len(),
        admin_url = %config.gateway.admin_url,
        "stackctl deployment configuration"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_macros_compile() {
        let _span = provider_span!("acme-1");
        let _span = provider_span!("acme-1", source = "static");
        let _span = operation_span!("setup");
        let _span = operation_span!("recover", selector = "nightly");
    }

    #[test]
    fn test_log_config_info() {
        let config = crate::config::DeploymentConfig::from_toml_str("", "/srv/stack").unwrap();

        // This should not panic
        log_config_info(&config);
    }
}
