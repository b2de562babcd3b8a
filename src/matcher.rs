//! Request matching logic.
//!
//! Two matchers run for every mock request: scenarios are checked first,
//! then the request path is mapped onto a configured section.

use crate::config::SectionConfig;
use crate::error::{Error, Result};
use crate::scenario::Scenario;
use std::collections::BTreeMap;
use tracing::trace;

/// Maps request paths onto configured sections.
///
/// When several patterns match, the longest literal base wins; equal
/// lengths fall back to section name order.
#[derive(Debug, Clone, Default)]
pub struct SectionMatcher {
    /// Sorted by base length (descending), then name
    sections: Vec<(String, SectionConfig)>,
}

impl SectionMatcher {
    pub fn new(sections: &BTreeMap<String, SectionConfig>) -> Self {
        let mut sections: Vec<(String, SectionConfig)> = sections
            .iter()
            .map(|(name, section)| (name.clone(), section.clone()))
            .collect();
        // BTreeMap order is by name, and the sort is stable.
        sections.sort_by(|a, b| b.1.base().len().cmp(&a.1.base().len()));
        Self { sections }
    }

    /// Find the section responsible for `path`.
    pub fn match_path(&self, path: &str) -> Result<(&str, &SectionConfig)> {
        self.sections
            .iter()
            .find(|(_, section)| path_matches_base(path, section.base()))
            .map(|(name, section)| (name.as_str(), section))
            .ok_or_else(|| Error::PathNotFound {
                path: path.to_string(),
            })
    }

    pub fn len(&self) -> usize {
        self.sections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }
}

/// `path` equals `base` or lies below it on a segment boundary.
fn path_matches_base(path: &str, base: &str) -> bool {
    if base == "/" {
        return path.starts_with('/');
    }
    match path.strip_prefix(base) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

/// How specifically `scenario` answers `method path`.
///
/// `None` when it does not match, `usize::MAX` for an exact pattern,
/// otherwise the length of the wildcard base. Scenarios with an
/// unparseable request path never match.
pub fn scenario_specificity(scenario: &Scenario, method: &str, path: &str) -> Option<usize> {
    let Ok((scenario_method, pattern)) = scenario.route() else {
        trace!(uuid = %scenario.uuid, "Skipping scenario with malformed request path");
        return None;
    };
    if scenario_method != method {
        return None;
    }
    if pattern == path {
        return Some(usize::MAX);
    }

    let base = pattern.strip_suffix("/*")?;
    let matched = if base.is_empty() {
        path.starts_with('/')
    } else {
        path == base
            || path
                .strip_prefix(base)
                .is_some_and(|rest| rest.starts_with('/'))
    };
    matched.then_some(base.len())
}

/// Find the scenario answering `method path`.
///
/// An exact pattern wins outright. Otherwise the wildcard pattern with the
/// longest base wins; ties go to the earliest scenario in iteration order.
pub fn find_scenario<'a, I>(scenarios: I, method: &str, path: &str) -> Option<&'a Scenario>
where
    I: IntoIterator<Item = &'a Scenario>,
{
    let mut best: Option<(&'a Scenario, usize)> = None;
    for scenario in scenarios {
        if let Some(rank) = scenario_specificity(scenario, method, path) {
            if best.map_or(true, |(_, top)| rank > top) {
                best = Some((scenario, rank));
            }
        }
    }
    best.map(|(scenario, _)| scenario)
}
