//! Resource Registry - Load resource definitions from JSON
//!
//! This module loads the per-resource sync tables from embedded JSON and
//! provides lookup by UriTemplate. The registry is immutable, built once at
//! startup, and passed into the engine explicitly.

use crate::error::SyncError;
use serde::Deserialize;
use std::collections::HashMap;

/// Embedded resource JSON files (compiled into the binary)
const RESOURCE_FILES: &[&str] = &[include_str!("../resources/freshdesk.json")];

/// How the since-value is rendered into a filter clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DateFormat {
    /// Full timestamp, passed through as supplied.
    #[default]
    DateTime,
    /// Date-only: the value is truncated at the `T` separator.
    Date,
}

/// Incremental-cursor support for one UriTemplate.
#[derive(Debug, Clone, Deserialize)]
pub struct SyncDef {
    /// Native upstream parameter carrying the lower bound.
    pub param: String,
    /// Comparison operator used in search-class boolean clauses.
    pub operator: String,
    /// Full-load sentinel: the "beginning of time" literal used when the
    /// caller supplies no cursor. `null` means no filter is applied at all.
    #[serde(default)]
    pub sentinel: Option<String>,
    #[serde(default)]
    pub date_format: DateFormat,
}

/// One parent/child hierarchy relation.
#[derive(Debug, Clone, Deserialize)]
pub struct ChildDef {
    /// Child path template; `_id_` is replaced by the parent entity's id.
    pub path: String,
    /// Field the materialized child collection is attached under.
    pub field: String,
}

/// Extension partitions: alternate filter values scanned after the default
/// scan to pick up records excluded from default listings.
#[derive(Debug, Clone, Deserialize)]
pub struct ExtensionDef {
    pub param: String,
    pub values: Vec<String>,
}

/// Resource definition from JSON, keyed by UriTemplate.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ResourceDef {
    #[serde(default)]
    pub sync: Option<SyncDef>,
    #[serde(default)]
    pub children: Vec<ChildDef>,
    #[serde(default)]
    pub extensions: Option<ExtensionDef>,
    /// Downstream receiver paths mutations are forwarded to.
    #[serde(default)]
    pub forward_targets: Vec<String>,
    /// Whether records of this type carry an `updated_at` concept.
    #[serde(default = "default_true")]
    pub tracks_updated: bool,
}

fn default_true() -> bool {
    true
}

/// Root structure of resources/*.json
#[derive(Debug, Clone, Deserialize)]
struct RegistryFile {
    #[serde(default)]
    resources: HashMap<String, ResourceDef>,
}

/// Immutable per-resource configuration table.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    resources: HashMap<String, ResourceDef>,
}

impl Registry {
    /// Load the registry from the embedded JSON files.
    pub fn load() -> Result<Self, SyncError> {
        let mut registry = Registry::default();
        for content in RESOURCE_FILES {
            registry.merge_json(content)?;
        }
        Ok(registry)
    }

    /// Parse one JSON document into the registry. Later files win on key
    /// collisions, so deployments can override the embedded defaults.
    pub fn merge_json(&mut self, content: &str) -> Result<(), SyncError> {
        let file: RegistryFile = serde_json::from_str(content)
            .map_err(|e| SyncError::Config(format!("invalid resource JSON: {e}")))?;
        self.resources.extend(file.resources);
        Ok(())
    }

    /// Build a registry from a single JSON document (test seams).
    pub fn from_json(content: &str) -> Result<Self, SyncError> {
        let mut registry = Registry::default();
        registry.merge_json(content)?;
        Ok(registry)
    }

    /// Look up a resource definition by UriTemplate.
    pub fn get(&self, template: &str) -> Option<&ResourceDef> {
        self.resources.get(template)
    }

    /// Whether the template supports incremental cursors.
    pub fn sync_supported(&self, template: &str) -> bool {
        self.get(template).is_some_and(|def| def.sync.is_some())
    }

    /// Whether records of this template carry a last-changed marker.
    /// Unknown templates default to carrying one.
    pub fn tracks_updated(&self, template: &str) -> bool {
        self.get(template).is_none_or(|def| def.tracks_updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedded_registry_loads_successfully() {
        let registry = Registry::load().expect("embedded JSON must parse");
        assert!(registry.get("tickets").is_some());
    }

    #[test]
    fn tickets_declare_children_and_extensions() {
        let registry = Registry::load().unwrap();
        let tickets = registry.get("tickets").unwrap();
        let fields: Vec<&str> = tickets.children.iter().map(|c| c.field.as_str()).collect();
        assert_eq!(fields, vec!["conversations", "time_entries"]);

        let ext = tickets.extensions.as_ref().unwrap();
        assert_eq!(ext.param, "filter");
        assert_eq!(ext.values, vec!["spam", "deleted"]);
    }

    #[test]
    fn search_resources_use_date_only_clauses() {
        let registry = Registry::load().unwrap();
        let companies = registry.get("search/companies").unwrap();
        let sync = companies.sync.as_ref().unwrap();
        assert_eq!(sync.operator, ":>");
        assert_eq!(sync.date_format, DateFormat::Date);
        assert!(sync.sentinel.is_none());
    }

    #[test]
    fn surveys_are_blacklisted_from_updated_marker() {
        let registry = Registry::load().unwrap();
        assert!(!registry.tracks_updated("surveys"));
        assert!(registry.tracks_updated("tickets"));
        assert!(registry.tracks_updated("never-heard-of-it"));
    }

    #[test]
    fn folders_nest_under_categories() {
        let registry = Registry::load().unwrap();
        let folders = registry.get("solutions/categories/_id_/folders").unwrap();
        assert_eq!(folders.children[0].path, "solutions/folders/_id_/articles");
        assert_eq!(folders.children[0].field, "articles");
    }
}
