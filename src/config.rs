//! Configuration for the mock API server.
//!
//! Defines sections (path patterns with identifier extraction rules),
//! seed scenarios and global settings.

use crate::identifier::is_supported_content_type;
use crate::scenario::ScenarioDefinition;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::Path;

/// Main configuration for the mock API server.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct MockApiConfig {
    /// Global settings
    #[serde(default)]
    pub settings: GlobalSettings,

    /// Sections by name
    #[serde(default)]
    pub sections: BTreeMap<String, SectionConfig>,

    /// Scenarios registered at startup
    #[serde(default)]
    pub scenarios: Vec<ScenarioDefinition>,
}

impl MockApiConfig {
    /// Load configuration from a YAML file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config = Self::from_yaml(&content)?;
        Ok(config)
    }

    /// Parse and validate a YAML document.
    pub fn from_yaml(yaml: &str) -> anyhow::Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> anyhow::Result<()> {
        self.settings.validate()?;
        for (name, section) in &self.sections {
            if name.is_empty() {
                anyhow::bail!("Section name cannot be empty");
            }
            section
                .validate()
                .map_err(|e| anyhow::anyhow!("Section {}: {}", name, e))?;
        }
        for (i, scenario) in self.scenarios.iter().enumerate() {
            scenario
                .validate()
                .map_err(|e| anyhow::anyhow!("Scenario {}: {}", i, e))?;
        }
        Ok(())
    }
}

/// A named storage rule for a family of paths.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SectionConfig {
    /// Literal prefix, optionally ending in a `/*` segment
    pub path_pattern: String,

    /// JSONPath or XML path expressions yielding identifiers from a body
    #[serde(default)]
    pub body_id_paths: Vec<String>,

    /// Request header carrying the identifier on create
    #[serde(default)]
    pub header_id_name: Option<String>,

    /// Identifiers are unique per resource path instead of per section
    #[serde(default)]
    pub strict_path: bool,

    /// Do not echo the stored body on create/update responses
    #[serde(default)]
    pub suppress_body: bool,
}

impl SectionConfig {
    /// Section with only a path pattern.
    pub fn new(path_pattern: impl Into<String>) -> Self {
        Self {
            path_pattern: path_pattern.into(),
            body_id_paths: Vec::new(),
            header_id_name: None,
            strict_path: false,
            suppress_body: false,
        }
    }

    /// Validate the section.
    pub fn validate(&self) -> anyhow::Result<()> {
        if !self.path_pattern.starts_with('/') {
            anyhow::bail!("path_pattern must start with '/': {}", self.path_pattern);
        }
        if self.base().contains('*') {
            anyhow::bail!(
                "wildcard is only allowed as a trailing /* segment: {}",
                self.path_pattern
            );
        }
        if self.body_id_paths.iter().any(|p| p.trim().is_empty()) {
            anyhow::bail!("body_id_paths entries cannot be empty");
        }
        if self
            .header_id_name
            .as_deref()
            .is_some_and(|name| name.trim().is_empty())
        {
            anyhow::bail!("header_id_name cannot be empty");
        }
        Ok(())
    }

    /// Whether the pattern ends in a wildcard segment.
    pub fn has_wildcard(&self) -> bool {
        self.path_pattern.ends_with("/*")
    }

    /// Literal part of the pattern, without the wildcard or trailing slash.
    pub fn base(&self) -> &str {
        let base = self
            .path_pattern
            .strip_suffix("/*")
            .unwrap_or(&self.path_pattern)
            .trim_end_matches('/');
        if base.is_empty() {
            "/"
        } else {
            base
        }
    }

    /// Number of path segments in the pattern, wildcard included.
    pub fn segment_count(&self) -> usize {
        segments(&self.path_pattern).count()
    }
}

/// Non-empty segments of a path.
pub fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

/// Global settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GlobalSettings {
    /// Listen address for the HTTP server
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,

    /// Mount point of the admin API
    #[serde(default = "default_admin_prefix")]
    pub admin_prefix: String,

    /// Log every handled request
    #[serde(default = "default_true")]
    pub log_requests: bool,

    /// Content type used for stored bodies submitted without one
    #[serde(default = "default_content_type")]
    pub default_content_type: String,
}

impl Default for GlobalSettings {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            admin_prefix: default_admin_prefix(),
            log_requests: true,
            default_content_type: default_content_type(),
        }
    }
}

impl GlobalSettings {
    fn validate(&self) -> anyhow::Result<()> {
        let prefix = &self.admin_prefix;
        if !prefix.starts_with('/') || prefix.len() < 2 || prefix.ends_with('/') {
            anyhow::bail!("admin_prefix must look like /name: {}", prefix);
        }
        if !is_supported_content_type(&self.default_content_type) {
            anyhow::bail!(
                "default_content_type is not a supported body type: {}",
                self.default_content_type
            );
        }
        Ok(())
    }
}

fn default_true() -> bool {
    true
}

fn default_listen() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

fn default_admin_prefix() -> String {
    "/__admin".to_string()
}

fn default_content_type() -> String {
    "application/json".to_string()
}

/// Sample configuration printed by `--print-config`.
pub const SAMPLE_CONFIG: &str = r#"settings:
  listen: 127.0.0.1:8080
  admin_prefix: /__admin
  log_requests: true

sections:
  users:
    path_pattern: /api/users/*
    body_id_paths: ["$.id", "$.legacy_code"]
    header_id_name: X-Resource-Id
  orders:
    path_pattern: /api/customers/*
    body_id_paths: ["/order/@id", "//number"]
    strict_path: true
    suppress_body: true

scenarios:
  - request_path: GET /api/health
    status_code: 200
    content_type: application/json
    data: '{"status":"up"}'
  - request_path: POST /api/payments/*
    status_code: 503
    content_type: application/json
    data: '{"error":"payments offline"}'
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_sections() {
        let yaml = r#"
sections:
  users:
    path_pattern: /api/users/*
    body_id_paths: ["$.id"]
    header_id_name: X-Id
  orders:
    path_pattern: /api/orders
    strict_path: true
"#;
        let config = MockApiConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.sections.len(), 2);

        let users = &config.sections["users"];
        assert!(users.has_wildcard());
        assert_eq!(users.base(), "/api/users");
        assert_eq!(users.segment_count(), 3);
        assert_eq!(users.header_id_name.as_deref(), Some("X-Id"));
        assert!(!users.strict_path);

        let orders = &config.sections["orders"];
        assert!(!orders.has_wildcard());
        assert_eq!(orders.base(), "/api/orders");
        assert!(orders.strict_path);
    }

    #[test]
    fn test_defaults() {
        let config = MockApiConfig::from_yaml("{}").unwrap();
        assert!(config.sections.is_empty());
        assert_eq!(config.settings.admin_prefix, "/__admin");
        assert_eq!(config.settings.listen.port(), 8080);
        assert!(config.settings.log_requests);
    }

    #[test]
    fn test_root_wildcard_base() {
        assert_eq!(SectionConfig::new("/*").base(), "/");
        assert_eq!(SectionConfig::new("/").base(), "/");
        assert_eq!(SectionConfig::new("/a/").base(), "/a");
    }

    #[test]
    fn test_invalid_sections() {
        for pattern in ["api/users", "/api/*/users", "/api*"] {
            let yaml = format!("sections:\n  bad:\n    path_pattern: \"{}\"\n", pattern);
            assert!(MockApiConfig::from_yaml(&yaml).is_err(), "{}", pattern);
        }

        let yaml = r#"
sections:
  bad:
    path_pattern: /x
    header_id_name: " "
"#;
        assert!(MockApiConfig::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_unknown_field_rejected() {
        let yaml = r#"
sections:
  users:
    path_pattern: /users
    strict: true
"#;
        assert!(MockApiConfig::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_invalid_seed_scenario() {
        let yaml = r#"
scenarios:
  - request_path: BREW /coffee
    status_code: 418
"#;
        let err = MockApiConfig::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("Scenario 0"));
    }

    #[test]
    fn test_invalid_admin_prefix() {
        let yaml = "settings:\n  admin_prefix: /\n";
        assert!(MockApiConfig::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_default_content_type_must_be_supported() {
        let yaml = "settings:\n  default_content_type: image/png\n";
        let err = MockApiConfig::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("default_content_type"));

        let yaml = "settings:\n  default_content_type: text/plain\n";
        let config = MockApiConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.settings.default_content_type, "text/plain");
    }

    #[test]
    fn test_sample_config_is_valid() {
        let config = MockApiConfig::from_yaml(SAMPLE_CONFIG).unwrap();
        assert_eq!(config.sections.len(), 2);
        assert_eq!(config.scenarios.len(), 2);
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE_CONFIG.as_bytes()).unwrap();
        let config = MockApiConfig::from_file(file.path()).unwrap();
        assert!(config.sections.contains_key("users"));

        let missing = MockApiConfig::from_file(Path::new("/nonexistent/mock-api.yaml"));
        assert!(missing.is_err());
    }
}
