//! Shared fixtures for integration tests: a temporary deployment root and a
//! stateful in-memory gateway admin API served by wiremock.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};

use serde_json::{json, Value};
use tempfile::TempDir;
use wiremock::matchers::path_regex;
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

use stackctl::DeploymentConfig;

pub const ADMIN_KEY: &str = "edd1c9f034335f136f87ad84b625c8f1";

#[derive(Debug, Default)]
pub struct AdminState {
    pub routes: BTreeMap<String, Value>,
    pub consumers: BTreeMap<String, Value>,
    pub puts: usize,
    pub deletes: usize,
    /// Route ids whose PUT is rejected with 400
    pub reject_routes: HashSet<String>,
}

/// In-memory admin API with the APISIX response envelope
#[derive(Clone)]
pub struct FakeAdminApi {
    pub state: Arc<Mutex<AdminState>>,
    key: Arc<Mutex<String>>,
}

impl FakeAdminApi {
    pub async fn start(key: &str) -> (MockServer, FakeAdminApi) {
        let server = MockServer::start().await;
        let api = FakeAdminApi {
            state: Arc::new(Mutex::new(AdminState::default())),
            key: Arc::new(Mutex::new(key.to_string())),
        };
        Mock::given(path_regex(r"^/apisix/admin/.*"))
            .respond_with(api.clone())
            .mount(&server)
            .await;
        (server, api)
    }

    pub fn set_key(&self, key: &str) {
        *self.key.lock().unwrap() = key.to_string();
    }

    pub fn route(&self, id: &str) -> Option<Value> {
        self.state.lock().unwrap().routes.get(id).cloned()
    }

    pub fn route_ids(&self) -> Vec<String> {
        self.state.lock().unwrap().routes.keys().cloned().collect()
    }

    pub fn consumer(&self, username: &str) -> Option<Value> {
        self.state.lock().unwrap().consumers.get(username).cloned()
    }

    pub fn puts(&self) -> usize {
        self.state.lock().unwrap().puts
    }

    pub fn reject_route(&self, id: &str) {
        self.state.lock().unwrap().reject_routes.insert(id.to_string());
    }

    /// Store an object directly, as if created by someone else
    pub fn insert_route(&self, id: &str, value: Value) {
        self.state.lock().unwrap().routes.insert(id.to_string(), value);
    }
}

impl Respond for FakeAdminApi {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let presented = request.headers.get("X-API-KEY").and_then(|v| v.to_str().ok());
        if presented != Some(self.key.lock().unwrap().as_str()) {
            return ResponseTemplate::new(401)
                .set_body_json(json!({"message": "failed to check token"}));
        }

        let rest = request.url.path().trim_start_matches("/apisix/admin/");
        let (collection, id) = match rest.split_once('/') {
            Some((collection, id)) => (collection.to_string(), Some(id.to_string())),
            None => (rest.to_string(), None),
        };

        let mut state = self.state.lock().unwrap();
        let method = request.method.as_str().to_string();

        let is_routes = collection == "routes";
        if !is_routes && collection != "consumers" {
            return ResponseTemplate::new(404).set_body_json(json!({"error_msg": "404 Route Not Found"}));
        }

        match (method.as_str(), id) {
            ("GET", None) => {
                let store = if is_routes { &state.routes } else { &state.consumers };
                let list: Vec<Value> = store
                    .iter()
                    .map(|(k, v)| json!({"key": format!("/apisix/{}/{}", collection, k), "value": v}))
                    .collect();
                ResponseTemplate::new(200).set_body_json(json!({"total": list.len(), "list": list}))
            }
            ("GET", Some(id)) => {
                let store = if is_routes { &state.routes } else { &state.consumers };
                match store.get(&id) {
                    Some(value) => ResponseTemplate::new(200)
                        .set_body_json(json!({"key": format!("/apisix/{}/{}", collection, id), "value": value})),
                    None => ResponseTemplate::new(404).set_body_json(json!({"message": "Key not found"})),
                }
            }
            ("PUT", Some(id)) => {
                if is_routes && state.reject_routes.contains(&id) {
                    return ResponseTemplate::new(400)
                        .set_body_json(json!({"error_msg": "invalid configuration: plugins"}));
                }
                let Ok(mut value) = serde_json::from_slice::<Value>(&request.body) else {
                    return ResponseTemplate::new(400).set_body_json(json!({"error_msg": "invalid JSON"}));
                };
                if let Some(map) = value.as_object_mut() {
                    map.insert("create_time".into(), json!(1_760_000_000));
                    map.insert("update_time".into(), json!(1_760_000_000));
                }
                state.puts += 1;
                let store = if is_routes { &mut state.routes } else { &mut state.consumers };
                let status = if store.insert(id.clone(), value.clone()).is_some() { 200 } else { 201 };
                ResponseTemplate::new(status)
                    .set_body_json(json!({"key": format!("/apisix/{}/{}", collection, id), "value": value}))
            }
            ("DELETE", Some(id)) => {
                let store = if is_routes { &mut state.routes } else { &mut state.consumers };
                if store.remove(&id).is_some() {
                    state.deletes += 1;
                    ResponseTemplate::new(200).set_body_json(json!({"deleted": "1"}))
                } else {
                    ResponseTemplate::new(404).set_body_json(json!({"message": "Key not found"}))
                }
            }
            _ => ResponseTemplate::new(405),
        }
    }
}

/// A deployment root with one directory per service
pub struct Stack {
    pub dir: TempDir,
}

impl Stack {
    pub fn new(service_dirs: &[&str]) -> Self {
        let dir = tempfile::tempdir().unwrap();
        for service in service_dirs {
            fs::create_dir_all(dir.path().join(service)).unwrap();
        }
        Self { dir }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn write(&self, rel: &str, contents: &str) {
        let path = self.dir.path().join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, contents).unwrap();
    }

    pub fn read(&self, rel: &str) -> String {
        fs::read_to_string(self.dir.path().join(rel)).unwrap()
    }

    pub fn exists(&self, rel: &str) -> bool {
        self.dir.path().join(rel).exists()
    }

    pub fn config(&self, manifest: &str) -> DeploymentConfig {
        DeploymentConfig::from_toml_str(manifest, self.dir.path()).unwrap()
    }
}

/// Value of `key` in a KEY=VALUE file
pub fn env_value(text: &str, key: &str) -> Option<String> {
    text.lines()
        .filter_map(|line| line.split_once('='))
        .filter(|(k, _)| k.trim().trim_start_matches("export ").trim() == key)
        .map(|(_, v)| v.trim().trim_matches('"').to_string())
        .last()
}

/// Minimal OpenAPI 3 document with the given (operationId, method, path) triples
pub fn openapi_document(operations: &[(&str, &str, &str)]) -> Value {
    let mut paths = serde_json::Map::new();
    for (id, method, path) in operations {
        let entry = paths.entry(path.to_string()).or_insert_with(|| json!({}));
        entry[method.to_ascii_lowercase()] = json!({
            "operationId": id,
            "responses": {"200": {"description": "ok"}}
        });
    }
    json!({
        "openapi": "3.0.3",
        "info": {"title": "test", "version": "1.0.0"},
        "paths": paths,
    })
}
