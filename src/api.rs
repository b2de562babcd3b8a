//! Mock API request handling.
//!
//! [`MockApi`] sequences scenario matching, section matching, identifier
//! resolution and the resource store for every mock request, and turns
//! store errors into HTTP-style responses.

use crate::config::{GlobalSettings, MockApiConfig, SectionConfig};
use crate::error::{Error, ErrorKind, Result};
use crate::identifier::{effective_content_type, resolve_identifiers};
use crate::matcher::SectionMatcher;
use crate::metrics::MetricsSink;
use crate::scenario::{Scenario, ScenarioStore};
use crate::store::{normalize_path, Namespace, Resource, ResourceStore, Scope};
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A mock request as seen by the API, independent of the transport.
#[derive(Debug, Clone, Default)]
pub struct ApiRequest {
    pub method: String,
    pub path: String,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl ApiRequest {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            ..Default::default()
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }
}

/// What produced a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
    Scenario,
    Resource,
    Error,
}

/// A response ready to be written by the transport.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    pub source: ResponseSource,
}

impl ApiResponse {
    fn new(status: u16, source: ResponseSource) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Vec::new(),
            source,
        }
    }

    fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// First header with this name, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Error response with a JSON body.
    pub fn from_error(err: &Error) -> Self {
        let kind = err.kind();
        let status = match kind {
            ErrorKind::NotFound => 404,
            ErrorKind::Conflict => 409,
            ErrorKind::InvalidRequest => 400,
            ErrorKind::Storage => 500,
        };
        let body = json!({ "error": kind.code(), "message": err.to_string() });
        ApiResponse::new(status, ResponseSource::Error)
            .with_header("Content-Type", "application/json")
            .with_body(body.to_string())
    }

    fn method_not_allowed(method: &str) -> Self {
        let body = json!({
            "error": "method_not_allowed",
            "message": format!("method not supported: {}", method),
        });
        ApiResponse::new(405, ResponseSource::Error)
            .with_header("Content-Type", "application/json")
            .with_header("Allow", "GET, POST, PUT, DELETE")
            .with_body(body.to_string())
    }
}

/// One exported composite key.
#[derive(Debug, Clone, Serialize)]
pub struct ExportEntry {
    pub scope: Scope,
    pub id: String,
    pub path: String,
    pub ids: Vec<String>,
    pub content_type: String,
    pub location: String,
    pub body_base64: String,
}

/// Dump of the resource store.
#[derive(Debug, Clone, Serialize)]
pub struct ResourceExport {
    pub exported_at: DateTime<Utc>,
    pub entries: Vec<ExportEntry>,
}

/// Mock API request orchestrator.
pub struct MockApi {
    settings: GlobalSettings,
    sections: SectionMatcher,
    resources: ResourceStore,
    scenarios: ScenarioStore,
    metrics: Arc<dyn MetricsSink>,
    #[cfg(test)]
    upsert_hook: Option<Box<dyn Fn(&ResourceStore) + Send + Sync>>,
}

/// Metrics key for requests that matched neither a scenario nor a section.
const UNMATCHED_ROUTE: &str = "unmatched";

impl MockApi {
    /// Create the API from configuration, registering seed scenarios.
    pub fn new(config: MockApiConfig, metrics: Arc<dyn MetricsSink>) -> Result<Self> {
        let scenarios = ScenarioStore::new();
        for definition in config.scenarios {
            scenarios.create(definition)?;
        }
        let sections = SectionMatcher::new(&config.sections);

        info!(
            sections = sections.len(),
            scenarios = scenarios.list()?.len(),
            "Mock API initialized"
        );

        Ok(Self {
            settings: config.settings,
            sections,
            resources: ResourceStore::new(),
            scenarios,
            metrics,
            #[cfg(test)]
            upsert_hook: None,
        })
    }

    pub fn settings(&self) -> &GlobalSettings {
        &self.settings
    }

    pub fn resources(&self) -> &ResourceStore {
        &self.resources
    }

    pub fn scenarios(&self) -> &ScenarioStore {
        &self.scenarios
    }

    /// Best scenario for `method path`, if any.
    pub fn match_scenario(&self, method: &str, path: &str) -> Result<Option<Scenario>> {
        self.scenarios.find(method, path)
    }

    /// Handle one mock request.
    ///
    /// Metrics are keyed by the matched route (scenario request line or
    /// section pattern) so that identifiers in paths do not multiply keys.
    pub fn handle(&self, request: &ApiRequest) -> ApiResponse {
        let (route, response) = self.dispatch(request);
        self.metrics.increment_request_count(&route);
        self.metrics.track_response(&route, response.status);

        if self.settings.log_requests {
            info!(
                method = %request.method,
                path = %request.path,
                status = response.status,
                source = ?response.source,
                "Handled request"
            );
        }
        response
    }

    fn dispatch(&self, request: &ApiRequest) -> (String, ApiResponse) {
        // Scenarios bypass sections entirely, including suppress_body.
        match self.match_scenario(&request.method, &request.path) {
            Ok(Some(scenario)) => {
                debug!(uuid = %scenario.uuid, path = %request.path, "Request matched scenario");
                return (scenario.request_path.clone(), scenario_response(&scenario));
            }
            Ok(None) => {}
            Err(e) => return (UNMATCHED_ROUTE.to_string(), ApiResponse::from_error(&e)),
        }

        let (name, section) = match self.sections.match_path(&request.path) {
            Ok(found) => found,
            Err(e) => {
                warn!(method = %request.method, path = %request.path, "No section matches path");
                return (UNMATCHED_ROUTE.to_string(), ApiResponse::from_error(&e));
            }
        };
        let route = section.path_pattern.clone();

        if !matches!(request.method.as_str(), "GET" | "POST" | "PUT" | "DELETE") {
            return (route, ApiResponse::method_not_allowed(&request.method));
        }

        let result = resolve_identifiers(
            &request.method,
            &request.path,
            &request.headers,
            &self.settings.default_content_type,
            &request.body,
            name,
            section,
        )
        .and_then(|ids| match request.method.as_str() {
            "GET" => self.read(name, section, &ids, request),
            "POST" => self.create(name, section, ids, request),
            "PUT" => self.put(name, section, &ids, request),
            _ => self.delete(name, section, &ids, request),
        });

        let response = result.unwrap_or_else(|e| {
            if e.kind() == ErrorKind::InvalidRequest {
                warn!(section = %name, path = %request.path, error = %e, "Rejected request");
            }
            ApiResponse::from_error(&e)
        });
        (route, response)
    }

    fn read(
        &self,
        name: &str,
        section: &SectionConfig,
        ids: &[String],
        request: &ApiRequest,
    ) -> Result<ApiResponse> {
        if let Some(id) = ids.first() {
            let collection = parent_path(&request.path);
            let ns = Namespace::new(name, section.strict_path, &collection);
            match self.resources.get(ns, id) {
                Ok(resource) => return Ok(resource_response(200, &resource, true)),
                // The last segment may name a nested collection instead.
                Err(Error::NotFound { .. }) => {
                    return match self.resources.get_by_path(name, &request.path) {
                        Ok(items) => Ok(collection_response(&items)),
                        Err(Error::PathNotFound { .. }) => Err(Error::not_found(id)),
                        Err(e) => Err(e),
                    };
                }
                Err(e) => return Err(e),
            }
        }

        match self.resources.get_by_path(name, &request.path) {
            Ok(items) => Ok(collection_response(&items)),
            Err(Error::PathNotFound { .. }) => Ok(collection_response(&[])),
            Err(e) => Err(e),
        }
    }

    fn create(
        &self,
        name: &str,
        section: &SectionConfig,
        ids: Vec<String>,
        request: &ApiRequest,
    ) -> Result<ApiResponse> {
        let payload = self.payload(&request.path, request);
        let created = self
            .resources
            .create(name, section.strict_path, ids, Some(payload))?;
        Ok(resource_response(201, &created, !section.suppress_body))
    }

    /// Update, or create when the identifier is unknown.
    fn put(
        &self,
        name: &str,
        section: &SectionConfig,
        ids: &[String],
        request: &ApiRequest,
    ) -> Result<ApiResponse> {
        let id = ids
            .first()
            .ok_or_else(|| Error::invalid("PUT requires a resource identifier"))?;
        let collection = parent_path(&request.path);
        let ns = Namespace::new(name, section.strict_path, &collection);
        let payload = self.payload(&collection, request);
        let with_body = !section.suppress_body;

        match self.resources.update(ns, id, payload.clone()) {
            Ok(updated) => Ok(resource_response(200, &updated, with_body)),
            Err(Error::NotFound { .. }) => {
                self.run_upsert_hook();
                match self.resources.create(
                    name,
                    section.strict_path,
                    vec![id.clone()],
                    Some(payload.clone()),
                ) {
                    Ok(created) => Ok(resource_response(201, &created, with_body)),
                    Err(Error::Conflict { .. }) => {
                        debug!(section = %name, id = %id, "Upsert raced with a create, retrying update");
                        self.run_upsert_hook();
                        self.resources
                            .update(ns, id, payload)
                            .map(|updated| resource_response(200, &updated, with_body))
                            .map_err(|e| {
                                Error::Storage(anyhow::anyhow!(
                                    "upsert of {} failed after conflict: {}",
                                    id,
                                    e
                                ))
                            })
                    }
                    Err(e) => Err(e),
                }
            }
            Err(e) => Err(e),
        }
    }

    fn delete(
        &self,
        name: &str,
        section: &SectionConfig,
        ids: &[String],
        request: &ApiRequest,
    ) -> Result<ApiResponse> {
        let id = ids
            .first()
            .ok_or_else(|| Error::invalid("DELETE requires a resource identifier"))?;
        let collection = parent_path(&request.path);
        let ns = Namespace::new(name, section.strict_path, &collection);
        self.resources.delete(ns, id)?;
        Ok(ApiResponse::new(204, ResponseSource::Resource))
    }

    fn payload(&self, path: &str, request: &ApiRequest) -> Resource {
        let content_type =
            effective_content_type(&request.headers, &self.settings.default_content_type);
        Resource::new(path, content_type, request.body.clone())
    }

    #[cfg(test)]
    fn run_upsert_hook(&self) {
        if let Some(hook) = &self.upsert_hook {
            hook(&self.resources);
        }
    }

    #[cfg(not(test))]
    fn run_upsert_hook(&self) {}

    /// Export every composite key of the resource store.
    pub fn export_resources(&self) -> Result<ResourceExport> {
        let mut entries = Vec::new();
        self.resources.for_each(|key, resource| {
            entries.push(ExportEntry {
                scope: key.scope.clone(),
                id: key.id.clone(),
                path: resource.path.clone(),
                ids: resource.ids.clone(),
                content_type: resource.content_type.clone(),
                location: resource.location.clone(),
                body_base64: base64::engine::general_purpose::STANDARD.encode(&resource.body),
            });
            Ok(())
        })?;
        Ok(ResourceExport {
            exported_at: Utc::now(),
            entries,
        })
    }
}

/// Path with its last segment removed.
fn parent_path(path: &str) -> String {
    let path = normalize_path(path);
    match path.rsplit_once('/') {
        Some((parent, _)) if !parent.is_empty() => parent.to_string(),
        _ => "/".to_string(),
    }
}

fn scenario_response(scenario: &Scenario) -> ApiResponse {
    let mut response = ApiResponse::new(scenario.status_code, ResponseSource::Scenario)
        .with_header("Content-Type", &scenario.content_type);
    if let Some(location) = &scenario.location {
        response = response.with_header("Location", location);
    }
    for (name, value) in &scenario.headers {
        if !name.eq_ignore_ascii_case("content-type") {
            response = response.with_header(name, value);
        }
    }
    response.with_body(scenario.data.as_bytes())
}

fn resource_response(status: u16, resource: &Resource, with_body: bool) -> ApiResponse {
    let mut response =
        ApiResponse::new(status, ResponseSource::Resource).with_header("Location", &resource.location);
    if with_body {
        response = response
            .with_header("Content-Type", &resource.content_type)
            .with_body(resource.body.clone());
    }
    response
}

fn collection_response(items: &[Resource]) -> ApiResponse {
    let values: Vec<Value> = items.iter().map(collection_item).collect();
    ApiResponse::new(200, ResponseSource::Resource)
        .with_header("Content-Type", "application/json")
        .with_body(Value::Array(values).to_string())
}

fn collection_item(resource: &Resource) -> Value {
    if resource.content_type.to_ascii_lowercase().contains("json") {
        if let Ok(value) = serde_json::from_slice(&resource.body) {
            return value;
        }
    }
    Value::String(String::from_utf8_lossy(&resource.body).into_owned())
}
