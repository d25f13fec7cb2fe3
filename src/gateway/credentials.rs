//! Resolution of consumer keys and upstream provider credentials.

use std::collections::{BTreeMap, HashMap, HashSet};

use base64::{engine::general_purpose::STANDARD, Engine as _};

use crate::config::{AuthKind, CredentialSource, ProviderAuth};
use crate::secrets::{EnsureReport, SecretStore, SecretString};

const DEFAULT_API_KEY_HEADER: &str = "x-api-key";

/// Canonical secret values for this run, with the secret store as a fallback
/// for values that were not part of an `ensure` pass.
///
/// Generated values that never reached a service file are unavailable: handing
/// them to the gateway would change on every run.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    secrets: HashMap<String, SecretString>,
    unpersisted: HashSet<String>,
    store: Option<SecretStore>,
}

impl Credentials {
    pub fn new(secrets: HashMap<String, SecretString>, store: Option<SecretStore>) -> Self {
        Self { secrets, unpersisted: HashSet::new(), store }
    }

    pub fn from_report(report: &EnsureReport, store: SecretStore) -> Self {
        let secrets = report
            .secrets
            .iter()
            .filter(|s| s.persisted)
            .map(|s| (s.name.clone(), s.value.clone()))
            .collect();
        let unpersisted = report.unpersisted().map(|s| s.name.clone()).collect();
        Self { secrets, unpersisted, store: Some(store) }
    }

    /// Canonical value of a declared secret
    pub fn secret(&self, name: &str) -> Option<SecretString> {
        if self.unpersisted.contains(name) {
            return None;
        }
        if let Some(value) = self.secrets.get(name) {
            return Some(value.clone());
        }
        self.store.as_ref().and_then(|store| store.lookup(name).ok().flatten())
    }

    pub fn resolve(&self, source: &CredentialSource) -> Result<SecretString, String> {
        match source {
            CredentialSource::Value { value } if value.is_empty() => {
                Err("literal credential is empty".to_string())
            }
            CredentialSource::Value { value } => Ok(value.clone()),
            CredentialSource::Secret { secret } if self.unpersisted.contains(secret) => {
                Err(format!("secret '{}' was not written to any service file", secret))
            }
            CredentialSource::Secret { secret } => self
                .secret(secret)
                .ok_or_else(|| format!("secret '{}' has no value", secret)),
            CredentialSource::ServiceKey { service, key } => {
                let store =
                    self.store.as_ref().ok_or_else(|| "no secret store available".to_string())?;
                store
                    .read_value(service, key)
                    .map_err(|e| e.to_string())?
                    .map(SecretString::new)
                    .ok_or_else(|| format!("key '{}' is not set in service '{}'", key, service))
            }
        }
    }
}

/// Headers injected towards the upstream for `auth`
pub fn upstream_headers(
    auth: &ProviderAuth,
    credential: Option<&SecretString>,
) -> Result<BTreeMap<String, String>, String> {
    let mut headers = BTreeMap::new();
    if auth.kind == AuthKind::None {
        return Ok(headers);
    }

    let credential = credential.ok_or_else(|| format!("{:?} auth requires a credential", auth.kind))?;
    let value = credential.expose_secret();

    match auth.kind {
        AuthKind::None => {}
        AuthKind::Bearer => {
            headers.insert("Authorization".to_string(), format!("Bearer {}", value));
        }
        AuthKind::ApiKey => {
            let header = auth.header.as_deref().unwrap_or(DEFAULT_API_KEY_HEADER);
            headers.insert(header.to_string(), value.to_string());
        }
        AuthKind::Basic => {
            if !value.contains(':') {
                return Err("basic auth credential must have the form user:password".to_string());
            }
            headers.insert("Authorization".to_string(), format!("Basic {}", STANDARD.encode(value)));
        }
    }

    Ok(headers)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn auth(kind: AuthKind, header: Option<&str>) -> ProviderAuth {
        ProviderAuth { kind, credential: None, header: header.map(str::to_string) }
    }

    #[test]
    fn test_header_per_auth_kind() {
        let cred = SecretString::new("sk-123");

        let bearer = upstream_headers(&auth(AuthKind::Bearer, None), Some(&cred)).unwrap();
        assert_eq!(bearer["Authorization"], "Bearer sk-123");

        let api_key = upstream_headers(&auth(AuthKind::ApiKey, None), Some(&cred)).unwrap();
        assert_eq!(api_key["x-api-key"], "sk-123");

        let custom = upstream_headers(&auth(AuthKind::ApiKey, Some("x-acme-key")), Some(&cred)).unwrap();
        assert_eq!(custom["x-acme-key"], "sk-123");

        let basic = SecretString::new("user:pass");
        let headers = upstream_headers(&auth(AuthKind::Basic, None), Some(&basic)).unwrap();
        assert_eq!(headers["Authorization"], "Basic dXNlcjpwYXNz");

        assert!(upstream_headers(&auth(AuthKind::None, None), None).unwrap().is_empty());
    }

    #[test]
    fn test_missing_or_malformed_credentials() {
        assert!(upstream_headers(&auth(AuthKind::Bearer, None), None).is_err());
        let no_colon = SecretString::new("justuser");
        assert!(upstream_headers(&auth(AuthKind::Basic, None), Some(&no_colon)).is_err());
    }

    #[test]
    fn test_resolve_sources() {
        let mut secrets = HashMap::new();
        secrets.insert("ACME_KEY".to_string(), SecretString::new("from-secret"));
        let credentials = Credentials::new(secrets, None);

        let from_secret = credentials
            .resolve(&CredentialSource::Secret { secret: "ACME_KEY".into() })
            .unwrap();
        assert_eq!(from_secret.expose_secret(), "from-secret");

        let literal = credentials
            .resolve(&CredentialSource::Value { value: SecretString::new("lit") })
            .unwrap();
        assert_eq!(literal.expose_secret(), "lit");

        assert!(credentials.resolve(&CredentialSource::Secret { secret: "NOPE".into() }).is_err());
        assert!(credentials
            .resolve(&CredentialSource::ServiceKey { service: "api".into(), key: "K".into() })
            .is_err());
    }
}
