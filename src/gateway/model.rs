//! Desired-state bodies for gateway routes and consumers.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::{json, Map, Value};

use super::route_id::route_id;

/// Label value marking objects owned by this tool
pub const MANAGED_BY: &str = "stackctl";

/// One callable upstream operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Operation {
    pub id: String,
    pub method: String,
    /// Path template relative to the upstream base path, e.g. `/models/{model}`
    pub path: String,
    pub enabled: bool,
}

/// Where a provider's traffic is forwarded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamTarget {
    pub scheme: String,
    pub host: String,
    pub port: u16,
    /// Path prepended to every operation path; empty or `/segment...` without trailing slash
    pub base_path: String,
}

impl UpstreamTarget {
    pub fn from_url(url: &url::Url) -> Result<Self, String> {
        let host = url.host_str().ok_or_else(|| format!("URL '{}' does not contain a host", url))?;
        let port = url
            .port_or_known_default()
            .ok_or_else(|| format!("URL '{}' does not include a usable port", url))?;

        Ok(Self {
            scheme: url.scheme().to_string(),
            host: host.to_string(),
            port,
            base_path: url.path().trim_end_matches('/').to_string(),
        })
    }

    /// Use `fallback` as the base path when the URL carried none
    pub fn with_fallback_base_path(mut self, fallback: Option<&str>) -> Self {
        if self.base_path.is_empty() {
            if let Some(path) = fallback {
                self.base_path = path.trim_end_matches('/').to_string();
            }
        }
        self
    }

    fn node(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Everything shared by the routes of one provider
#[derive(Debug, Clone)]
pub struct RouteContext<'a> {
    pub route_prefix: &'a str,
    pub provider_id: &'a str,
    pub provider_name: &'a str,
    pub upstream: &'a UpstreamTarget,
    /// Consumers allowed to call the routes; must not be empty
    pub consumers: &'a [String],
    /// Headers injected towards the upstream (credentials)
    pub upstream_headers: &'a BTreeMap<String, String>,
}

/// A route as it should exist on the gateway
#[derive(Debug, Clone, PartialEq)]
pub struct DesiredRoute {
    pub id: String,
    pub provider: String,
    pub operation: String,
    pub body: Value,
}

pub fn build_route(ctx: &RouteContext<'_>, op: &Operation) -> DesiredRoute {
    let public = public_uri(ctx.route_prefix, ctx.provider_id, &op.path);
    let (regex_uri, replacement) = rewrite_rule(&public, &ctx.upstream.base_path, &op.path);

    let mut plugins = Map::new();
    plugins.insert("key-auth".to_string(), json!({}));
    plugins.insert("consumer-restriction".to_string(), json!({ "whitelist": ctx.consumers }));

    let mut proxy_rewrite = json!({ "regex_uri": [regex_uri, replacement] });
    if !ctx.upstream_headers.is_empty() {
        proxy_rewrite["headers"] = json!({ "set": ctx.upstream_headers });
    }
    plugins.insert("proxy-rewrite".to_string(), proxy_rewrite);

    let mut nodes = Map::new();
    nodes.insert(ctx.upstream.node(), json!(1));

    let id = route_id(ctx.provider_id, &op.id);
    let body = json!({
        "id": id,
        "name": format!("{}-{}", ctx.provider_id, op.id),
        "desc": format!("{} {} {}", ctx.provider_name, op.method, op.path),
        "uri": public,
        "methods": [op.method.to_ascii_uppercase()],
        "upstream": {
            "type": "roundrobin",
            "scheme": ctx.upstream.scheme,
            "nodes": nodes,
            "pass_host": "node",
        },
        "plugins": plugins,
        "labels": {
            "managed-by": MANAGED_BY,
            "provider": ctx.provider_id,
        },
        "status": if op.enabled { 1 } else { 0 },
    });

    DesiredRoute { id, provider: ctx.provider_id.to_string(), operation: op.id.clone(), body }
}

pub fn build_consumer(username: &str, key: &str) -> Value {
    json!({
        "username": username,
        "desc": format!("managed by {}", MANAGED_BY),
        "plugins": {
            "key-auth": { "key": key }
        },
    })
}

/// Public gateway path: `<prefix>/<provider><path>` with `{param}` written as `:param`
pub fn public_uri(prefix: &str, provider_id: &str, path: &str) -> String {
    let prefix = prefix.trim_end_matches('/');
    let converted: Vec<String> = path
        .split('/')
        .map(|segment| match template_param(segment) {
            Some(name) => format!(":{}", name),
            None => segment.to_string(),
        })
        .collect();
    format!("{}/{}{}", prefix, provider_id, converted.join("/"))
}

/// `regex_uri` pair mapping the public path to the upstream path, capturing parameters
fn rewrite_rule(public: &str, base_path: &str, path: &str) -> (String, String) {
    let mut pattern = String::from("^");
    let mut group = 0;
    for (i, segment) in public.split('/').enumerate() {
        if i > 0 {
            pattern.push('/');
        }
        if segment.starts_with(':') {
            pattern.push_str("([^/]+)");
        } else {
            pattern.push_str(&regex::escape(segment));
        }
    }
    pattern.push('$');

    let mut replacement = String::from(base_path);
    for (i, segment) in path.split('/').enumerate() {
        if i > 0 {
            replacement.push('/');
        }
        if template_param(segment).is_some() {
            group += 1;
            replacement.push_str(&format!("${}", group));
        } else {
            replacement.push_str(segment);
        }
    }
    if replacement.is_empty() {
        replacement.push('/');
    }

    (pattern, replacement)
}

fn template_param(segment: &str) -> Option<&str> {
    segment.strip_prefix('{').and_then(|s| s.strip_suffix('}')).filter(|name| !name.is_empty())
}

/// True when every field of `desired` is present and equal in `actual`.
/// Fields only the server adds (timestamps, ids of sub-objects) are ignored.
pub fn is_subset(desired: &Value, actual: &Value) -> bool {
    match (desired, actual) {
        (Value::Object(want), Value::Object(have)) => want
            .iter()
            .all(|(key, value)| have.get(key).is_some_and(|other| is_subset(value, other))),
        (Value::Array(want), Value::Array(have)) => {
            want.len() == have.len() && want.iter().zip(have).all(|(a, b)| is_subset(a, b))
        }
        (Value::Number(want), Value::Number(have)) => want.as_f64() == have.as_f64(),
        _ => desired == actual,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upstream() -> UpstreamTarget {
        UpstreamTarget::from_url(&url::Url::parse("https://api.acme.example/v1/").unwrap()).unwrap()
    }

    fn op(id: &str, method: &str, path: &str) -> Operation {
        Operation { id: id.into(), method: method.into(), path: path.into(), enabled: true }
    }

    #[test]
    fn test_upstream_from_url() {
        let target = upstream();
        assert_eq!(target.port, 443);
        assert_eq!(target.base_path, "/v1");
        assert_eq!(target.node(), "api.acme.example:443");

        let bare = UpstreamTarget::from_url(&url::Url::parse("http://llm:8000").unwrap())
            .unwrap()
            .with_fallback_base_path(Some("/api/"));
        assert_eq!(bare.base_path, "/api");
    }

    #[test]
    fn test_public_uri_converts_params() {
        assert_eq!(public_uri("/ai", "acme-1", "/chat/completions"), "/ai/acme-1/chat/completions");
        assert_eq!(public_uri("/ai/", "acme-1", "/models/{model}"), "/ai/acme-1/models/:model");
    }

    #[test]
    fn test_rewrite_rule_captures_params() {
        let public = public_uri("/ai", "acme-1", "/models/{model}/files/{file}");
        let (pattern, replacement) = rewrite_rule(&public, "/v1", "/models/{model}/files/{file}");

        assert_eq!(pattern, "^/ai/acme\\-1/models/([^/]+)/files/([^/]+)$");
        assert_eq!(replacement, "/v1/models/$1/files/$2");
        assert!(regex::Regex::new(&pattern).unwrap().is_match("/ai/acme-1/models/gpt/files/abc"));
    }

    #[test]
    fn test_build_route_body() {
        let target = upstream();
        let consumers = vec!["backend".to_string()];
        let mut headers = BTreeMap::new();
        headers.insert("Authorization".to_string(), "Bearer sk-test".to_string());
        let ctx = RouteContext {
            route_prefix: "/ai",
            provider_id: "acme-1",
            provider_name: "Acme",
            upstream: &target,
            consumers: &consumers,
            upstream_headers: &headers,
        };

        let route = build_route(&ctx, &op("chat", "post", "/chat/completions"));

        assert_eq!(route.id, "acme-1_chat");
        let body = &route.body;
        assert_eq!(body["uri"], "/ai/acme-1/chat/completions");
        assert_eq!(body["methods"], json!(["POST"]));
        assert_eq!(body["upstream"]["nodes"]["api.acme.example:443"], 1);
        assert_eq!(body["upstream"]["scheme"], "https");
        assert_eq!(body["plugins"]["consumer-restriction"]["whitelist"], json!(["backend"]));
        assert_eq!(body["plugins"]["proxy-rewrite"]["regex_uri"][1], "/v1/chat/completions");
        assert_eq!(
            body["plugins"]["proxy-rewrite"]["headers"]["set"]["Authorization"],
            "Bearer sk-test"
        );
        assert_eq!(body["labels"]["managed-by"], MANAGED_BY);
        assert_eq!(body["status"], 1);
    }

    #[test]
    fn test_route_always_requires_key_auth() {
        let target = upstream();
        let headers = BTreeMap::new();
        let consumers = vec!["backend".to_string()];
        let ctx = RouteContext {
            route_prefix: "/ai",
            provider_id: "local",
            provider_name: "local",
            upstream: &target,
            consumers: &consumers,
            upstream_headers: &headers,
        };
        let mut disabled = op("models", "GET", "/models");
        disabled.enabled = false;

        let route = build_route(&ctx, &disabled);
        assert_eq!(route.body["plugins"]["key-auth"], json!({}));
        assert!(route.body["plugins"]["proxy-rewrite"].get("headers").is_none());
        assert_eq!(route.body["status"], 0);
    }

    #[test]
    fn test_is_subset_ignores_server_fields() {
        let desired = json!({"uri": "/a", "status": 1, "plugins": {"key-auth": {}}});
        let stored = json!({
            "uri": "/a", "status": 1.0, "create_time": 1700000000,
            "plugins": {"key-auth": {"hide_credentials": false}}
        });
        assert!(is_subset(&desired, &stored));

        let drifted = json!({"uri": "/b", "status": 1, "plugins": {"key-auth": {}}});
        assert!(!is_subset(&desired, &drifted));
        assert!(!is_subset(&json!({"methods": ["GET"]}), &json!({"methods": ["GET", "POST"]})));
        assert!(!is_subset(&json!({"labels": {"a": "1"}}), &json!({})));
    }

    #[test]
    fn test_consumer_body() {
        let body = build_consumer("backend", "k3y");
        assert_eq!(body["username"], "backend");
        assert_eq!(body["plugins"]["key-auth"]["key"], "k3y");
    }
}
