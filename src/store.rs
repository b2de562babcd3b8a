//! In-memory resource store.
//!
//! Records live in an arena keyed by an internal [`RecordId`]. Each alias
//! identifier of a record is registered as a [`CompositeKey`] pointing at
//! that arena slot, so every alias observes the same record. A path index
//! maps normalized paths to the primary key of the records stored there
//! and backs collection reads.
//!
//! Uniqueness is enforced per [`Scope`]: the whole section for regular
//! sections, or a single resource path for strict-path sections.

use crate::error::{Error, Result};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::{Arc, RwLock};
use tracing::debug;

/// Internal identity of a stored record.
pub type RecordId = u64;

/// Uniqueness domain of an identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(tag = "kind", content = "name", rename_all = "snake_case")]
pub enum Scope {
    /// Identifier is unique within a whole section.
    Section(String),
    /// Identifier is unique within one exact resource path.
    Path(String),
}

impl Scope {
    pub fn new(section: &str, strict: bool, path: &str) -> Self {
        if strict {
            Scope::Path(normalize_path(path))
        } else {
            Scope::Section(section.to_string())
        }
    }
}

/// The store's real key: a scope plus one external identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CompositeKey {
    pub scope: Scope,
    pub id: String,
}

impl CompositeKey {
    pub fn new(scope: Scope, id: impl Into<String>) -> Self {
        Self {
            scope,
            id: id.into(),
        }
    }
}

impl fmt::Display for CompositeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.scope {
            Scope::Section(name) => write!(f, "section:{}:{}", name, self.id),
            Scope::Path(path) => write!(f, "path:{}:{}", path, self.id),
        }
    }
}

/// A stored resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    /// Collection path the resource lives under (no trailing slash)
    pub path: String,
    /// Alias identifiers; the first one is primary
    pub ids: Vec<String>,
    pub content_type: String,
    pub body: Vec<u8>,
    /// `path/primary-id`
    pub location: String,
}

impl Resource {
    /// Build a payload for create/update. Identifiers and location are
    /// assigned by the store.
    pub fn new(path: impl Into<String>, content_type: impl Into<String>, body: Vec<u8>) -> Self {
        Self {
            path: path.into(),
            ids: Vec::new(),
            content_type: content_type.into(),
            body,
            location: String::new(),
        }
    }
}

/// Where an identifier lookup starts.
///
/// `path` is the collection path of the request; it only determines the
/// scope for strict sections.
#[derive(Debug, Clone, Copy)]
pub struct Namespace<'a> {
    pub section: &'a str,
    pub strict: bool,
    pub path: &'a str,
}

impl<'a> Namespace<'a> {
    pub fn new(section: &'a str, strict: bool, path: &'a str) -> Self {
        Self {
            section,
            strict,
            path,
        }
    }

    fn key(&self, strict: bool, id: &str) -> CompositeKey {
        CompositeKey::new(Scope::new(self.section, strict, self.path), id)
    }
}

struct Slot {
    section: String,
    strict: bool,
    resource: Resource,
}

impl Slot {
    fn keys(&self) -> Vec<CompositeKey> {
        let scope = Scope::new(&self.section, self.strict, &self.resource.path);
        self.resource
            .ids
            .iter()
            .map(|id| CompositeKey::new(scope.clone(), id))
            .collect()
    }
}

#[derive(Default)]
struct Inner {
    next_id: RecordId,
    records: BTreeMap<RecordId, Slot>,
    keys: HashMap<CompositeKey, RecordId>,
    paths: HashMap<String, Vec<CompositeKey>>,
}

impl Inner {
    /// Resolve an identifier: the caller's own scope first, then the
    /// opposite strictness. Non-strict callers do not know which path a
    /// strict record lives under, so for them every path scope of the
    /// section is searched.
    fn locate(&self, ns: &Namespace<'_>, id: &str) -> Option<RecordId> {
        if let Some(rid) = self.keys.get(&ns.key(ns.strict, id)) {
            return Some(*rid);
        }
        if let Some(rid) = self.keys.get(&ns.key(!ns.strict, id)) {
            if self.section_of(*rid) == Some(ns.section) {
                return Some(*rid);
            }
        }
        if ns.strict {
            return None;
        }
        self.keys
            .iter()
            .filter(|(key, _)| key.id == id && matches!(key.scope, Scope::Path(_)))
            .map(|(_, rid)| *rid)
            .filter(|rid| self.section_of(*rid) == Some(ns.section))
            .min()
    }

    fn section_of(&self, rid: RecordId) -> Option<&str> {
        self.records.get(&rid).map(|slot| slot.section.as_str())
    }

    fn index(&mut self, resource: &Resource, primary: &CompositeKey) {
        for path in [&resource.path, &resource.location] {
            self.paths
                .entry(path.clone())
                .or_default()
                .push(primary.clone());
        }
    }

    fn unindex(&mut self, resource: &Resource, primary: &CompositeKey) {
        for path in [&resource.path, &resource.location] {
            if let Some(keys) = self.paths.get_mut(path) {
                keys.retain(|key| key != primary);
                if keys.is_empty() {
                    self.paths.remove(path);
                }
            }
        }
    }

    fn collect(&self, keys: &[CompositeKey], section: &str, found: &mut BTreeSet<RecordId>) {
        for key in keys {
            if let Some(rid) = self.keys.get(key) {
                if self.section_of(*rid) == Some(section) {
                    found.insert(*rid);
                }
            }
        }
    }
}

/// Concurrency-safe resource store.
///
/// Cloning yields another handle to the same store.
#[derive(Clone, Default)]
pub struct ResourceStore {
    inner: Arc<RwLock<Inner>>,
}

impl ResourceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `record` under every identifier in `ids`.
    ///
    /// An empty `ids` gets one generated identifier. If any identifier is
    /// already taken in the target scope nothing is written.
    pub fn create(
        &self,
        section: &str,
        strict: bool,
        ids: Vec<String>,
        record: Option<Resource>,
    ) -> Result<Resource> {
        let mut record = record.ok_or_else(|| Error::invalid("resource payload is required"))?;

        let mut unique: Vec<String> = Vec::with_capacity(ids.len().max(1));
        for id in ids {
            if id.is_empty() {
                return Err(Error::invalid("identifier cannot be empty"));
            }
            if !unique.contains(&id) {
                unique.push(id);
            }
        }
        if unique.is_empty() {
            unique.push(generate_id());
        }

        record.path = normalize_path(&record.path);
        let scope = Scope::new(section, strict, &record.path);
        let keys: Vec<CompositeKey> = unique
            .iter()
            .map(|id| CompositeKey::new(scope.clone(), id))
            .collect();

        let mut inner = self.inner.write().map_err(|_| Error::poisoned())?;
        if let Some(taken) = keys.iter().find(|key| inner.keys.contains_key(key)) {
            return Err(Error::conflict(&taken.id));
        }

        record.location = join_path(&record.path, &unique[0]);
        record.ids = unique;

        let rid = inner.next_id;
        inner.next_id += 1;
        for key in &keys {
            inner.keys.insert(key.clone(), rid);
        }
        inner.index(&record, &keys[0]);
        inner.records.insert(
            rid,
            Slot {
                section: section.to_string(),
                strict,
                resource: record.clone(),
            },
        );

        debug!(
            section = %section,
            strict,
            ids = ?record.ids,
            location = %record.location,
            "Resource created"
        );
        Ok(record)
    }

    /// Fetch a resource by any of its identifiers.
    pub fn get(&self, ns: Namespace<'_>, id: &str) -> Result<Resource> {
        if id.is_empty() {
            return Err(Error::invalid("identifier cannot be empty"));
        }
        let inner = self.inner.read().map_err(|_| Error::poisoned())?;
        inner
            .locate(&ns, id)
            .and_then(|rid| inner.records.get(&rid))
            .map(|slot| slot.resource.clone())
            .ok_or_else(|| Error::not_found(id))
    }

    /// Every resource of `section` stored at `path` or below it, in
    /// creation order.
    pub fn get_by_path(&self, section: &str, path: &str) -> Result<Vec<Resource>> {
        if path.is_empty() {
            return Err(Error::invalid("path cannot be empty"));
        }
        let path = normalize_path(path);
        let inner = self.inner.read().map_err(|_| Error::poisoned())?;

        let mut found = BTreeSet::new();
        if let Some(keys) = inner.paths.get(&path) {
            inner.collect(keys, section, &mut found);
        }
        if found.is_empty() {
            let prefix = join_path(&path, "");
            for (indexed, keys) in &inner.paths {
                if indexed.starts_with(&prefix) {
                    inner.collect(keys, section, &mut found);
                }
            }
        }
        if found.is_empty() {
            return Err(Error::PathNotFound { path });
        }

        Ok(found
            .into_iter()
            .filter_map(|rid| inner.records.get(&rid))
            .map(|slot| slot.resource.clone())
            .collect())
    }

    /// Replace the payload of the resource addressed by `id`.
    ///
    /// The identifier set of the stored record is kept; `record.ids` is
    /// ignored.
    pub fn update(&self, ns: Namespace<'_>, id: &str, record: Resource) -> Result<Resource> {
        if id.is_empty() {
            return Err(Error::invalid("identifier cannot be empty"));
        }
        let mut inner = self.inner.write().map_err(|_| Error::poisoned())?;
        let rid = inner.locate(&ns, id).ok_or_else(|| Error::not_found(id))?;

        let (old_keys, old, section, strict) = match inner.records.get(&rid) {
            Some(slot) => (
                slot.keys(),
                slot.resource.clone(),
                slot.section.clone(),
                slot.strict,
            ),
            None => return Err(Error::not_found(id)),
        };

        let mut updated = record;
        updated.path = if updated.path.is_empty() {
            old.path.clone()
        } else {
            normalize_path(&updated.path)
        };
        updated.ids = old.ids.clone();
        updated.location = join_path(&updated.path, &updated.ids[0]);

        let scope = Scope::new(&section, strict, &updated.path);
        let new_keys: Vec<CompositeKey> = updated
            .ids
            .iter()
            .map(|alias| CompositeKey::new(scope.clone(), alias))
            .collect();
        if let Some(taken) = new_keys
            .iter()
            .find(|key| inner.keys.get(key).is_some_and(|owner| *owner != rid))
        {
            return Err(Error::conflict(&taken.id));
        }

        for key in &old_keys {
            inner.keys.remove(key);
        }
        inner.unindex(&old, &old_keys[0]);
        for key in &new_keys {
            inner.keys.insert(key.clone(), rid);
        }
        inner.index(&updated, &new_keys[0]);
        if let Some(slot) = inner.records.get_mut(&rid) {
            slot.resource = updated.clone();
        }

        debug!(
            section = %section,
            id = %id,
            moved = old.path != updated.path,
            "Resource updated"
        );
        Ok(updated)
    }

    /// Remove the resource addressed by `id` together with all its aliases.
    pub fn delete(&self, ns: Namespace<'_>, id: &str) -> Result<Resource> {
        if id.is_empty() {
            return Err(Error::invalid("identifier cannot be empty"));
        }
        let mut inner = self.inner.write().map_err(|_| Error::poisoned())?;
        let rid = inner.locate(&ns, id).ok_or_else(|| Error::not_found(id))?;
        let slot = inner
            .records
            .remove(&rid)
            .ok_or_else(|| Error::not_found(id))?;

        let keys = slot.keys();
        for key in &keys {
            inner.keys.remove(key);
        }
        inner.unindex(&slot.resource, &keys[0]);

        debug!(section = %slot.section, id = %id, aliases = keys.len(), "Resource deleted");
        Ok(slot.resource)
    }

    /// Call `f` for every composite key over a snapshot of the store.
    ///
    /// The lock is released before `f` runs; the first error aborts the
    /// iteration.
    pub fn for_each<F>(&self, mut f: F) -> Result<()>
    where
        F: FnMut(&CompositeKey, &Resource) -> anyhow::Result<()>,
    {
        let snapshot: Vec<(CompositeKey, Resource)> = {
            let inner = self.inner.read().map_err(|_| Error::poisoned())?;
            inner
                .records
                .values()
                .flat_map(|slot| {
                    slot.keys()
                        .into_iter()
                        .map(|key| (key, slot.resource.clone()))
                })
                .collect()
        };

        for (key, resource) in &snapshot {
            f(key, resource).map_err(Error::Storage)?;
        }
        Ok(())
    }

    /// Number of stored records (not keys).
    pub fn len(&self) -> Result<usize> {
        let inner = self.inner.read().map_err(|_| Error::poisoned())?;
        Ok(inner.records.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

/// Strip trailing separators; the root stays `/`.
pub fn normalize_path(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() && path.starts_with('/') {
        "/".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Join a normalized path and a segment with a single separator.
pub fn join_path(path: &str, segment: &str) -> String {
    if path.ends_with('/') {
        format!("{}{}", path, segment)
    } else {
        format!("{}/{}", path, segment)
    }
}

/// Fresh random identifier for resources created without one.
pub fn generate_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
