//! Operation discovery from provider interface descriptions.
//!
//! Documents are OpenAPI 3.x in JSON or YAML. Only the path, method and
//! operation id of each operation are used; schemas are ignored.

use std::collections::HashSet;
use std::time::Duration;

use openapiv3::{OpenAPI, ReferenceOr, Server};
use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::gateway::model::Operation;
use crate::utils::{Attempt, RetryExhausted, RetryPolicy, OPERATION_ID_REGEX};

#[derive(Debug, Clone, thiserror::Error)]
pub enum DiscoveryError {
    #[error("Interface description unreachable at {url}: {message}")]
    SpecUnreachable { url: String, message: String },

    #[error("Interface description at {url} is invalid: {message}")]
    SpecInvalid { url: String, message: String },

    #[error("Discovery cancelled")]
    Cancelled,
}

/// Operations enumerated from one document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredSpec {
    pub operations: Vec<Operation>,
    /// Path of the document's first server, used when the provider base URL has none
    pub server_path: Option<String>,
}

/// Fetch and parse the document at `url`, retrying transient failures under `policy`
pub async fn discover(
    client: &reqwest::Client,
    url: &str,
    headers: HeaderMap,
    timeout: Duration,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
) -> Result<DiscoveredSpec, DiscoveryError> {
    let unreachable =
        |message: String| DiscoveryError::SpecUnreachable { url: url.to_string(), message };

    let fetched = policy
        .run(cancel, |attempt| {
            let request = client.get(url).headers(headers.clone()).timeout(timeout);
            async move {
                debug!(url = %url, attempt, "Fetching interface description");
                let response = request.send().await.map_err(|e| Attempt::Transient(e.to_string()))?;
                let status = response.status();
                if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
                    return Err(Attempt::Transient(format!("HTTP {}", status)));
                }
                if !status.is_success() {
                    return Err(Attempt::Permanent(format!("HTTP {}", status)));
                }
                response.text().await.map_err(|e| Attempt::Transient(e.to_string()))
            }
        })
        .await;

    let text = match fetched {
        Ok(text) => text,
        Err(RetryExhausted::Permanent(message)) => return Err(unreachable(message)),
        Err(RetryExhausted::Exhausted { last_error, .. }) => return Err(unreachable(last_error)),
        Err(RetryExhausted::Cancelled) => return Err(DiscoveryError::Cancelled),
    };

    let invalid = |message: String| DiscoveryError::SpecInvalid { url: url.to_string(), message };
    let document = parse_document(&text).map_err(invalid)?;
    let operations = enumerate_operations(&document).map_err(invalid)?;

    Ok(DiscoveredSpec { operations, server_path: server_base_path(&document) })
}

/// Parse JSON, falling back to YAML
pub fn parse_document(text: &str) -> Result<OpenAPI, String> {
    let document: OpenAPI = match serde_json::from_str(text) {
        Ok(document) => document,
        Err(json_err) => serde_yaml::from_str(text)
            .map_err(|yaml_err| format!("not valid JSON ({}) or YAML ({})", json_err, yaml_err))?,
    };

    if !document.openapi.starts_with("3.") {
        return Err(format!("unsupported OpenAPI version '{}'", document.openapi));
    }
    Ok(document)
}

/// Every operation in the document, in path order. Duplicate ids after
/// normalisation make the document invalid.
pub fn enumerate_operations(openapi: &OpenAPI) -> Result<Vec<Operation>, String> {
    let mut operations = Vec::new();
    let mut seen = HashSet::new();

    for (path_template, item) in openapi.paths.paths.iter() {
        let path_item = match item {
            ReferenceOr::Item(item) => item,
            ReferenceOr::Reference { reference } => {
                return Err(format!("path '{}' uses an unsupported reference {}", path_template, reference))
            }
        };

        if !path_template.starts_with('/') {
            return Err(format!("path '{}' must start with '/'", path_template));
        }

        let methods = [
            ("GET", &path_item.get),
            ("POST", &path_item.post),
            ("PUT", &path_item.put),
            ("DELETE", &path_item.delete),
            ("PATCH", &path_item.patch),
            ("HEAD", &path_item.head),
            ("OPTIONS", &path_item.options),
        ];

        for (method, operation) in methods.iter() {
            let Some(op) = operation else {
                continue;
            };

            let id = op
                .operation_id
                .as_deref()
                .map(normalize_operation_id)
                .filter(|id| !id.is_empty())
                .unwrap_or_else(|| fallback_operation_id(method, path_template));

            if !OPERATION_ID_REGEX.is_match(&id) {
                return Err(format!("operation id '{}' could not be normalised", id));
            }
            if !seen.insert(id.clone()) {
                return Err(format!("duplicate operation id '{}'", id));
            }

            operations.push(Operation {
                id,
                method: method.to_string(),
                path: path_template.clone(),
                enabled: !op.deprecated,
            });
        }
    }

    if operations.is_empty() {
        return Err("document declares no operations".to_string());
    }

    Ok(operations)
}

/// Keep only allowlisted operations; unknown allowlist entries are logged
pub fn apply_allowlist(operations: Vec<Operation>, allowlist: Option<&[String]>) -> Vec<Operation> {
    let Some(allowed) = allowlist else {
        return operations;
    };

    for name in allowed {
        if !operations.iter().any(|op| &op.id == name) {
            warn!(operation = %name, "Allowlisted operation not present in interface description");
        }
    }

    operations.into_iter().filter(|op| allowed.iter().any(|a| a == &op.id)).collect()
}

/// Map characters outside `[A-Za-z0-9_-]` to `-`, collapsing runs and trimming the ends
pub fn normalize_operation_id(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if c.is_ascii_alphanumeric() || c == '_' {
            out.push(c);
        } else if !out.ends_with('-') {
            out.push('-');
        }
    }
    out.trim_matches('-').to_string()
}

fn fallback_operation_id(method: &str, path: &str) -> String {
    normalize_operation_id(&format!("{}-{}", method.to_ascii_lowercase(), path))
}

/// Path component of the first server URL, with server variables set to their defaults
pub fn server_base_path(openapi: &OpenAPI) -> Option<String> {
    let server = openapi.servers.first()?;
    let url = substitute_variables(server);

    let path = if url.starts_with('/') {
        url
    } else {
        url::Url::parse(&url).ok()?.path().to_string()
    };

    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn substitute_variables(server: &Server) -> String {
    let mut url = server.url.clone();
    if let Some(variables) = &server.variables {
        for (name, variable) in variables {
            url = url.replace(&format!("{{{}}}", name), &variable.default);
        }
    }
    url
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHAT_SPEC: &str = r#"{
        "openapi": "3.0.0",
        "info": {"title": "Acme", "version": "1.0.0"},
        "servers": [{"url": "https://api.acme.example/{version}", "variables": {"version": {"default": "v1"}}}],
        "paths": {
            "/chat/completions": {
                "post": {"operationId": "chat", "responses": {"200": {"description": "OK"}}}
            },
            "/models": {
                "get": {"operationId": "models", "responses": {"200": {"description": "OK"}}}
            }
        }
    }"#;

    #[test]
    fn test_enumerates_operations() {
        let doc = parse_document(CHAT_SPEC).unwrap();
        let ops = enumerate_operations(&doc).unwrap();

        assert_eq!(ops.len(), 2);
        let chat = ops.iter().find(|op| op.id == "chat").unwrap();
        assert_eq!(chat.method, "POST");
        assert_eq!(chat.path, "/chat/completions");
        assert_eq!(server_base_path(&doc).as_deref(), Some("/v1"));
    }

    #[test]
    fn test_parses_yaml_documents() {
        let yaml = r#"
openapi: 3.0.3
info:
  title: Local
  version: "1"
paths:
  /models/{model}:
    get:
      responses:
        "200":
          description: OK
"#;
        let doc = parse_document(yaml).unwrap();
        let ops = enumerate_operations(&doc).unwrap();

        assert_eq!(ops[0].id, "get-models-model");
        assert_eq!(server_base_path(&doc), None);
    }

    #[test]
    fn test_rejects_garbage_and_wrong_versions() {
        assert!(parse_document("<html>not a spec</html>").is_err());
        let swagger = r#"{"openapi": "2.0", "info": {"title": "x", "version": "1"}, "paths": {}}"#;
        assert!(parse_document(swagger).is_err());
    }

    #[test]
    fn test_duplicate_ids_after_normalisation_are_invalid() {
        let spec = r#"{
            "openapi": "3.0.0",
            "info": {"title": "Dup", "version": "1"},
            "paths": {
                "/a": {"get": {"operationId": "list.items", "responses": {"200": {"description": "OK"}}}},
                "/b": {"get": {"operationId": "list items", "responses": {"200": {"description": "OK"}}}}
            }
        }"#;
        let doc = parse_document(spec).unwrap();
        let err = enumerate_operations(&doc).unwrap_err();
        assert!(err.contains("duplicate operation id 'list-items'"));
    }

    #[test]
    fn test_empty_document_is_invalid() {
        let spec = r#"{"openapi": "3.0.0", "info": {"title": "x", "version": "1"}, "paths": {}}"#;
        let doc = parse_document(spec).unwrap();
        assert!(enumerate_operations(&doc).is_err());
    }

    #[test]
    fn test_normalize_operation_id() {
        assert_eq!(normalize_operation_id("createChatCompletion"), "createChatCompletion");
        assert_eq!(normalize_operation_id("chat.completions/create"), "chat-completions-create");
        assert_eq!(normalize_operation_id("  list models  "), "list-models");
        assert_eq!(normalize_operation_id("snake_case_ok"), "snake_case_ok");
        assert_eq!(fallback_operation_id("POST", "/v1/chat/{id}"), "post-v1-chat-id");
    }

    #[test]
    fn test_allowlist_filters() {
        let doc = parse_document(CHAT_SPEC).unwrap();
        let ops = enumerate_operations(&doc).unwrap();
        let allow = vec!["chat".to_string(), "missing".to_string()];

        let filtered = apply_allowlist(ops.clone(), Some(&allow));
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].id, "chat");
        assert_eq!(apply_allowlist(ops, None).len(), 2);
    }

    #[tokio::test]
    async fn test_discover_classifies_failures() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/openapi.json"))
            .respond_with(ResponseTemplate::new(200).set_body_string(CHAT_SPEC))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/broken.json"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{\"not\": \"openapi\"}"))
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let policy = RetryPolicy::once();
        let cancel = CancellationToken::new();
        let timeout = Duration::from_secs(5);

        let spec = discover(
            &client,
            &format!("{}/openapi.json", server.uri()),
            HeaderMap::new(),
            timeout,
            &policy,
            &cancel,
        )
        .await
        .unwrap();
        assert_eq!(spec.operations.len(), 2);

        let invalid = discover(
            &client,
            &format!("{}/broken.json", server.uri()),
            HeaderMap::new(),
            timeout,
            &policy,
            &cancel,
        )
        .await
        .unwrap_err();
        assert!(matches!(invalid, DiscoveryError::SpecInvalid { .. }));

        let missing = discover(
            &client,
            &format!("{}/absent.json", server.uri()),
            HeaderMap::new(),
            timeout,
            &policy,
            &cancel,
        )
        .await
        .unwrap_err();
        assert!(matches!(missing, DiscoveryError::SpecUnreachable { .. }));
    }
}
