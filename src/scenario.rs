//! Scripted scenarios and their store.
//!
//! A scenario pairs a `"METHOD /path"` request line with a literal
//! response. Scenarios are consulted before any stored resource.

use crate::error::{Error, Result};
use crate::matcher::find_scenario;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, OnceLock, RwLock};
use tracing::debug;
use uuid::Uuid;

/// HTTP verbs accepted in a scenario request path.
pub const STANDARD_METHODS: [&str; 9] = [
    "GET", "HEAD", "POST", "PUT", "PATCH", "DELETE", "OPTIONS", "CONNECT", "TRACE",
];

/// Scenario as submitted by a client or listed in configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScenarioDefinition {
    /// Generated when absent
    #[serde(default)]
    pub uuid: Option<Uuid>,

    /// Request line, e.g. `GET /api/users/*`
    pub request_path: String,

    #[serde(default = "default_status")]
    pub status_code: u16,

    #[serde(default = "default_content_type")]
    pub content_type: String,

    #[serde(default)]
    pub location: Option<String>,

    #[serde(default)]
    pub data: String,

    #[serde(default)]
    pub headers: HashMap<String, String>,
}

fn default_status() -> u16 {
    200
}

fn default_content_type() -> String {
    "application/json".to_string()
}

impl ScenarioDefinition {
    /// Validate the definition without storing it.
    pub fn validate(&self) -> Result<()> {
        parse_request_path(&self.request_path)?;
        if !(100..=599).contains(&self.status_code) {
            return Err(Error::invalid(format!(
                "invalid status code: {}",
                self.status_code
            )));
        }
        if !media_type_regex().is_match(&self.content_type) {
            return Err(Error::invalid(format!(
                "invalid content type: {:?}",
                self.content_type
            )));
        }
        Ok(())
    }

    fn into_scenario(self, uuid: Uuid) -> Scenario {
        Scenario {
            uuid,
            request_path: self.request_path,
            status_code: self.status_code,
            content_type: self.content_type,
            location: self.location,
            data: self.data,
            headers: self.headers,
        }
    }
}

/// A stored scenario.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scenario {
    pub uuid: Uuid,
    pub request_path: String,
    pub status_code: u16,
    pub content_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    pub data: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

impl Scenario {
    /// Method and path pattern of this scenario.
    pub fn route(&self) -> Result<(&str, &str)> {
        parse_request_path(&self.request_path)
    }
}

fn request_path_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*([A-Za-z]+)\s+(/\S*)\s*$").expect("request path regex is valid")
    })
}

fn media_type_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[\w.+-]+/[\w.+-]+(\s*;.*)?$").expect("media type regex is valid")
    })
}

/// Split `"METHOD /path"` into its parts.
///
/// The method must be an uppercase standard verb. `*` may only appear as a
/// final `/*` segment.
pub fn parse_request_path(request_path: &str) -> Result<(&str, &str)> {
    let caps = request_path_regex()
        .captures(request_path)
        .ok_or_else(|| {
            Error::invalid(format!(
                "request path must be \"METHOD /path\": {:?}",
                request_path
            ))
        })?;
    let (Some(method), Some(path)) = (caps.get(1), caps.get(2)) else {
        return Err(Error::invalid("request path must be \"METHOD /path\""));
    };
    let (method, path) = (method.as_str(), path.as_str());

    if !STANDARD_METHODS.contains(&method) {
        return Err(Error::invalid(format!("unsupported method: {}", method)));
    }
    let literal = path.strip_suffix("/*").unwrap_or(path);
    if literal.contains('*') {
        return Err(Error::invalid(format!(
            "wildcard is only allowed as a trailing /* segment: {}",
            path
        )));
    }
    Ok((method, path))
}

#[derive(Default)]
struct Inner {
    next_seq: u64,
    /// Scenarios by creation sequence
    entries: BTreeMap<u64, Scenario>,
    index: HashMap<Uuid, u64>,
}

/// Concurrency-safe scenario store keyed by UUID.
#[derive(Clone, Default)]
pub struct ScenarioStore {
    inner: Arc<RwLock<Inner>>,
}

impl ScenarioStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and store a scenario, generating its UUID if needed.
    pub fn create(&self, definition: ScenarioDefinition) -> Result<Scenario> {
        definition.validate()?;
        let uuid = definition.uuid.unwrap_or_else(Uuid::new_v4);

        let mut inner = self.inner.write().map_err(|_| Error::poisoned())?;
        if inner.index.contains_key(&uuid) {
            return Err(Error::conflict(uuid.to_string()));
        }
        let scenario = definition.into_scenario(uuid);
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.index.insert(uuid, seq);
        inner.entries.insert(seq, scenario.clone());

        debug!(uuid = %uuid, request_path = %scenario.request_path, "Scenario created");
        Ok(scenario)
    }

    pub fn get(&self, uuid: &Uuid) -> Result<Scenario> {
        let inner = self.inner.read().map_err(|_| Error::poisoned())?;
        inner
            .index
            .get(uuid)
            .and_then(|seq| inner.entries.get(seq))
            .cloned()
            .ok_or_else(|| Error::not_found(uuid.to_string()))
    }

    /// Replace a scenario. The definition's UUID must be absent or equal
    /// to `uuid`.
    pub fn update(&self, uuid: &Uuid, definition: ScenarioDefinition) -> Result<Scenario> {
        if definition.uuid.is_some_and(|given| given != *uuid) {
            return Err(Error::invalid("scenario uuid cannot be changed"));
        }
        definition.validate()?;

        let mut inner = self.inner.write().map_err(|_| Error::poisoned())?;
        let seq = *inner
            .index
            .get(uuid)
            .ok_or_else(|| Error::not_found(uuid.to_string()))?;
        let slot = inner
            .entries
            .get_mut(&seq)
            .ok_or_else(|| Error::not_found(uuid.to_string()))?;
        *slot = definition.into_scenario(*uuid);

        debug!(uuid = %uuid, "Scenario updated");
        Ok(slot.clone())
    }

    pub fn delete(&self, uuid: &Uuid) -> Result<Scenario> {
        let mut inner = self.inner.write().map_err(|_| Error::poisoned())?;
        let seq = inner
            .index
            .remove(uuid)
            .ok_or_else(|| Error::not_found(uuid.to_string()))?;
        let scenario = inner
            .entries
            .remove(&seq)
            .ok_or_else(|| Error::not_found(uuid.to_string()))?;

        debug!(uuid = %uuid, "Scenario deleted");
        Ok(scenario)
    }

    /// All scenarios in creation order.
    pub fn list(&self) -> Result<Vec<Scenario>> {
        let inner = self.inner.read().map_err(|_| Error::poisoned())?;
        Ok(inner.entries.values().cloned().collect())
    }

    /// Best scenario for `method path`, matched under the read lock.
    ///
    /// Only the winner is cloned; earlier scenarios win ties.
    pub fn find(&self, method: &str, path: &str) -> Result<Option<Scenario>> {
        let inner = self.inner.read().map_err(|_| Error::poisoned())?;
        Ok(find_scenario(inner.entries.values(), method, path).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn definition(request_path: &str) -> ScenarioDefinition {
        ScenarioDefinition {
            uuid: None,
            request_path: request_path.to_string(),
            status_code: 200,
            content_type: "application/json".to_string(),
            location: None,
            data: "{}".to_string(),
            headers: HashMap::new(),
        }
    }

    #[test]
    fn test_parse_request_path() {
        assert_eq!(parse_request_path("GET /x").unwrap(), ("GET", "/x"));
        assert_eq!(parse_request_path("POST /api/*").unwrap(), ("POST", "/api/*"));
        assert_eq!(parse_request_path("DELETE /").unwrap(), ("DELETE", "/"));

        for bad in [
            "GET",
            "/x",
            "GET /x extra",
            "FETCH /x",
            "get /x",
            "GET x",
            "GET /a*/b",
            "GET /a/*/b",
        ] {
            let err = parse_request_path(bad).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidRequest, "{}", bad);
        }
    }

    #[test]
    fn test_parse_yaml_definition() {
        let yaml = r#"
request_path: POST /api/users
status_code: 201
content_type: application/json
location: /api/users/1
data: '{"id":1}'
headers:
  X-Mock: "yes"
"#;
        let def: ScenarioDefinition = serde_yaml::from_str(yaml).unwrap();
        assert!(def.validate().is_ok());
        assert_eq!(def.status_code, 201);
        assert_eq!(def.headers.get("X-Mock"), Some(&"yes".to_string()));
    }

    #[test]
    fn test_validation() {
        let mut def = definition("GET /x");
        def.status_code = 99;
        assert_eq!(def.validate().unwrap_err().kind(), ErrorKind::InvalidRequest);
        def.status_code = 600;
        assert!(def.validate().is_err());
        def.status_code = 204;
        def.content_type = "json".to_string();
        assert!(def.validate().is_err());
        def.content_type = "application/json; charset=utf-8".to_string();
        assert!(def.validate().is_ok());
    }

    #[test]
    fn test_crud() {
        let store = ScenarioStore::new();
        let created = store.create(definition("GET /x")).unwrap();
        assert_eq!(store.get(&created.uuid).unwrap(), created);

        let mut changed = definition("GET /y");
        changed.status_code = 418;
        let updated = store.update(&created.uuid, changed).unwrap();
        assert_eq!(updated.uuid, created.uuid);
        assert_eq!(updated.status_code, 418);

        store.delete(&created.uuid).unwrap();
        assert_eq!(
            store.get(&created.uuid).unwrap_err().kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            store.delete(&created.uuid).unwrap_err().kind(),
            ErrorKind::NotFound
        );
    }

    #[test]
    fn test_explicit_uuid() {
        let store = ScenarioStore::new();
        let uuid = Uuid::new_v4();
        let mut def = definition("GET /x");
        def.uuid = Some(uuid);
        assert_eq!(store.create(def.clone()).unwrap().uuid, uuid);
        assert_eq!(store.create(def).unwrap_err().kind(), ErrorKind::Conflict);
    }

    #[test]
    fn test_update_cannot_change_uuid() {
        let store = ScenarioStore::new();
        let created = store.create(definition("GET /x")).unwrap();

        let mut def = definition("GET /x");
        def.uuid = Some(Uuid::new_v4());
        let err = store.update(&created.uuid, def).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidRequest);

        let mut def = definition("GET /x");
        def.uuid = Some(created.uuid);
        assert!(store.update(&created.uuid, def).is_ok());

        let err = store
            .update(&Uuid::new_v4(), definition("GET /x"))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_invalid_definition_not_stored() {
        let store = ScenarioStore::new();
        assert!(store.create(definition("BREW /coffee")).is_err());
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn test_find_prefers_exact_then_earliest() {
        let store = ScenarioStore::new();
        let wildcard = store.create(definition("GET /a/*")).unwrap();
        store.create(definition("GET /a/*")).unwrap();
        assert_eq!(store.find("GET", "/a/z").unwrap().unwrap().uuid, wildcard.uuid);

        let exact = store.create(definition("GET /a/z")).unwrap();
        assert_eq!(store.find("GET", "/a/z").unwrap().unwrap().uuid, exact.uuid);

        store.delete(&wildcard.uuid).unwrap();
        assert_eq!(
            store.find("GET", "/a/y").unwrap().unwrap().request_path,
            "GET /a/*"
        );
        assert!(store.find("POST", "/a/z").unwrap().is_none());
    }

    #[test]
    fn test_list_keeps_creation_order() {
        let store = ScenarioStore::new();
        let first = store.create(definition("GET /1")).unwrap();
        let second = store.create(definition("GET /2")).unwrap();
        let third = store.create(definition("GET /3")).unwrap();
        store.update(&second.uuid, definition("GET /two")).unwrap();

        let listed: Vec<Uuid> = store.list().unwrap().iter().map(|s| s.uuid).collect();
        assert_eq!(listed, vec![first.uuid, second.uuid, third.uuid]);
    }
}
