//! Identifier resolution.
//!
//! Derives the candidate identifiers of a request from its last path
//! segment (reads, updates, deletes) or from a header and the structured
//! body (creates).

use crate::config::{segments, SectionConfig};
use crate::error::{Error, Result};
use jsonpath_rust::JsonPath;
use serde_json::Value;
use std::collections::HashMap;
use tracing::debug;

/// Candidate identifiers for a request, primary first.
///
/// An empty result means the request addresses a collection (or, for
/// `POST`, that the caller must generate an identifier). Writes without a
/// `Content-Type` header are treated as `default_content_type`.
pub fn resolve_identifiers(
    method: &str,
    path: &str,
    headers: &HashMap<String, String>,
    default_content_type: &str,
    body: &[u8],
    section_name: &str,
    section: &SectionConfig,
) -> Result<Vec<String>> {
    match method {
        "GET" | "DELETE" => Ok(path_identifier(path, section_name, section)
            .into_iter()
            .collect()),
        "PUT" => {
            require_supported_content_type(headers, default_content_type)?;
            Ok(path_identifier(path, section_name, section)
                .into_iter()
                .collect())
        }
        "POST" => {
            let content_type = require_supported_content_type(headers, default_content_type)?;

            if let Some(name) = &section.header_id_name {
                if let Some(id) = header_value(headers, name).map(str::trim) {
                    if !id.is_empty() {
                        return Ok(vec![id.to_string()]);
                    }
                }
            }

            if section.body_id_paths.is_empty() {
                return Ok(Vec::new());
            }
            extract_body_identifiers(content_type, body, &section.body_id_paths)
        }
        _ => Ok(Vec::new()),
    }
}

/// The last path segment when the path addresses a single resource.
pub fn path_identifier(path: &str, section_name: &str, section: &SectionConfig) -> Option<String> {
    let segs: Vec<&str> = segments(path).collect();
    let pattern_len = section.segment_count();
    let last = *segs.last()?;

    let beyond_pattern = segs.len() > pattern_len;
    let on_wildcard = section.has_wildcard() && segs.len() == pattern_len;
    if (beyond_pattern || on_wildcard) && last != section_name {
        Some(last.to_string())
    } else {
        None
    }
}

/// Case-insensitive header lookup.
pub fn header_value<'a>(headers: &'a HashMap<String, String>, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

/// Whether a body with this content type can be stored.
pub fn is_supported_content_type(content_type: &str) -> bool {
    let ct = content_type.trim().to_ascii_lowercase();
    ct.contains("json")
        || ct.contains("xml")
        || ct.starts_with("text/")
        || ct.starts_with("application/octet-stream")
        || ct.starts_with("application/x-www-form-urlencoded")
}

/// The request's content type, or `default` when the header is absent or
/// blank.
pub fn effective_content_type<'a>(
    headers: &'a HashMap<String, String>,
    default: &'a str,
) -> &'a str {
    header_value(headers, "content-type")
        .map(str::trim)
        .filter(|ct| !ct.is_empty())
        .unwrap_or(default)
}

fn require_supported_content_type<'a>(
    headers: &'a HashMap<String, String>,
    default: &'a str,
) -> Result<&'a str> {
    match effective_content_type(headers, default) {
        "" => Err(Error::invalid("missing content type")),
        ct if is_supported_content_type(ct) => Ok(ct),
        ct => Err(Error::invalid(format!("unsupported content type: {}", ct))),
    }
}

/// Apply every expression to the body and collect all distinct values.
pub fn extract_body_identifiers(
    content_type: &str,
    body: &[u8],
    expressions: &[String],
) -> Result<Vec<String>> {
    let ct = content_type.to_ascii_lowercase();
    let mut ids = Vec::new();

    if ct.contains("json") {
        let json: Value = serde_json::from_slice(body)?;
        for expr in expressions {
            for id in json_path_values(&json, expr) {
                push_unique(&mut ids, id);
            }
        }
    } else if ct.contains("xml") {
        let text = std::str::from_utf8(body)
            .map_err(|e| Error::invalid(format!("XML body is not valid UTF-8: {}", e)))?;
        let doc = roxmltree::Document::parse(text)?;
        for expr in expressions {
            for id in xml_path_values(&doc, expr) {
                push_unique(&mut ids, id);
            }
        }
    }

    Ok(ids)
}

fn push_unique(ids: &mut Vec<String>, id: String) {
    if !id.is_empty() && !ids.contains(&id) {
        ids.push(id);
    }
}

fn json_path_values(json: &Value, expr: &str) -> Vec<String> {
    let path = match JsonPath::try_from(expr) {
        Ok(p) => p,
        Err(e) => {
            debug!(expression = %expr, error = %e, "Skipping invalid JSON path");
            return Vec::new();
        }
    };

    match path.find(json) {
        Value::Array(items) => items.iter().filter_map(scalar_to_id).collect(),
        Value::Null => Vec::new(),
        other => scalar_to_id(&other).into_iter().collect(),
    }
}

fn scalar_to_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Evaluate a small XPath subset: `/a/b`, `//b`, `a//b`, `*`, a final
/// `@attr` or `text()` step.
fn xml_path_values(doc: &roxmltree::Document<'_>, expr: &str) -> Vec<String> {
    let (mut descendant, rest) = match expr.strip_prefix("//") {
        Some(rest) => (true, rest),
        None => match expr.strip_prefix('/') {
            Some(rest) => (false, rest),
            None => (true, expr),
        },
    };

    let steps: Vec<&str> = rest.split('/').collect();
    let mut nodes = vec![doc.root()];

    for (i, step) in steps.iter().enumerate() {
        if step.is_empty() {
            descendant = true;
            continue;
        }
        if i + 1 == steps.len() {
            if let Some(attr) = step.strip_prefix('@') {
                return nodes
                    .iter()
                    .filter_map(|n| n.attribute(attr))
                    .map(|v| v.trim().to_string())
                    .collect();
            }
            if *step == "text()" {
                return nodes.iter().filter_map(element_text).collect();
            }
        }

        nodes = nodes
            .iter()
            .flat_map(|n| {
                if descendant {
                    n.descendants().skip(1).collect::<Vec<_>>()
                } else {
                    n.children().collect::<Vec<_>>()
                }
            })
            .filter(|n| n.is_element() && (*step == "*" || n.tag_name().name() == *step))
            .collect();
        descendant = false;
    }

    nodes.iter().filter_map(element_text).collect()
}

fn element_text(node: &roxmltree::Node<'_, '_>) -> Option<String> {
    let text: String = node
        .descendants()
        .filter(|n| n.is_text())
        .filter_map(|n| n.text())
        .collect();
    let text = text.trim();
    if text.is_empty() {
        None
    } else {
        Some(text.to_string())
    }
}
