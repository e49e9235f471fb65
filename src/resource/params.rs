//! Cursor & Parameter Resolver
//!
//! Translates a logical resource path plus the caller's pull-protocol
//! parameters (`since`, `limit`, `page_size`, free-text `query`) into the
//! parameter set the upstream API understands. Pull-protocol parameters are
//! always stripped before the upstream call.

use super::registry::{DateFormat, Registry, SyncDef};
use crate::config::Settings;
use chrono::{DateTime, SecondsFormat};
use std::collections::BTreeMap;

/// Normalize a resource path to its UriTemplate by replacing purely numeric
/// segments with the `_id_` placeholder.
pub fn uri_template(path: &str) -> String {
    path.trim_matches('/')
        .split('/')
        .map(|segment| {
            if !segment.is_empty() && segment.bytes().all(|b| b.is_ascii_digit()) {
                "_id_"
            } else {
                segment
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Search-class resources live under `search/` and page through a
/// `results`/`total` envelope.
pub fn is_search_class(template: &str) -> bool {
    template.starts_with("search/")
}

/// A template addressing one record rather than a collection.
pub fn is_single_item(template: &str) -> bool {
    template.ends_with("_id_")
}

/// Output of the resolver: upstream parameters plus scan metadata.
#[derive(Debug, Clone)]
pub struct ResolvedParams {
    pub params: BTreeMap<String, String>,
    /// True when the caller supplied no cursor and the scan covers
    /// everything from the full-load sentinel onwards.
    pub is_full_scan: bool,
    /// The caller pinned a specific page; pagination must not advance.
    pub caller_fixed_page: bool,
}

/// Resolve upstream request parameters for one scan path.
pub fn resolve(
    path: &str,
    raw: &BTreeMap<String, String>,
    registry: &Registry,
    settings: &Settings,
) -> ResolvedParams {
    resolve_with_cursor(path, raw, registry, settings, true)
}

/// Resolver variant for mutating calls: page-size defaulting and
/// pull-parameter stripping only. A write never gains a cursor filter the
/// caller did not supply.
pub fn resolve_for_mutation(
    path: &str,
    raw: &BTreeMap<String, String>,
    registry: &Registry,
    settings: &Settings,
) -> ResolvedParams {
    resolve_with_cursor(path, raw, registry, settings, false)
}

fn resolve_with_cursor(
    path: &str,
    raw: &BTreeMap<String, String>,
    registry: &Registry,
    settings: &Settings,
    with_cursor: bool,
) -> ResolvedParams {
    let template = uri_template(path);
    let search = is_search_class(&template);
    let mut params = raw.clone();

    if !search && !is_single_item(&template) {
        let ceiling = settings.page_size;
        let limit = raw.get("limit").and_then(|v| v.parse::<u32>().ok());
        let page_size = raw.get("page_size").and_then(|v| v.parse::<u32>().ok());
        let per_page = [Some(ceiling), limit, page_size]
            .into_iter()
            .flatten()
            .min()
            .unwrap_or(ceiling);
        params
            .entry("per_page".to_string())
            .or_insert_with(|| per_page.to_string());
    }

    let mut is_full_scan = true;
    let sync = if with_cursor {
        registry.get(&template).and_then(|def| def.sync.as_ref())
    } else {
        None
    };
    if let Some(sync) = sync {
        let since_value = match raw.get("since") {
            Some(supplied) => {
                is_full_scan = false;
                Some(apply_skew(supplied, settings.cursor_skew_seconds))
            }
            // No cursor: fall back to the full-load sentinel. A null
            // sentinel means no filter at all.
            None => sync.sentinel.clone(),
        };

        if let Some(value) = since_value {
            if search {
                let clause = since_clause(sync, &value);
                let combined = match raw.get("query") {
                    Some(q) => format!("\"({}) AND {}\"", q.replace('"', ""), clause),
                    None => format!("\"{clause}\""),
                };
                params.insert("query".to_string(), combined);
            } else {
                params.insert(sync.param.clone(), value);
            }
        }
    }

    let caller_fixed_page = raw.contains_key("page");

    // Pull-protocol parameters never reach upstream.
    params.remove("since");
    params.remove("limit");
    params.remove("page_size");

    ResolvedParams {
        params,
        is_full_scan,
        caller_fixed_page,
    }
}

/// Render one boolean filter clause, e.g. `updated_at:>'2024-01-01'`.
fn since_clause(sync: &SyncDef, value: &str) -> String {
    let rendered = match sync.date_format {
        DateFormat::Date => value.split('T').next().unwrap_or(value),
        DateFormat::DateTime => value,
    };
    format!("{}{}'{}'", sync.param, sync.operator, rendered)
}

/// Subtract the configured clock-skew tolerance from a caller-supplied
/// cursor. Unparsable cursors pass through untouched.
fn apply_skew(since: &str, skew_seconds: i64) -> String {
    if skew_seconds == 0 {
        return since.to_string();
    }
    match DateTime::parse_from_rfc3339(since) {
        Ok(ts) => (ts - chrono::Duration::seconds(skew_seconds))
            .to_rfc3339_opts(SecondsFormat::Secs, true),
        Err(e) => {
            tracing::warn!(since, %e, "cursor is not RFC 3339, skipping skew correction");
            since.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> Settings {
        Settings::default()
    }

    fn registry() -> Registry {
        Registry::load().unwrap()
    }

    fn raw(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn numeric_segments_become_placeholders() {
        assert_eq!(uri_template("tickets"), "tickets");
        assert_eq!(
            uri_template("tickets/123/conversations"),
            "tickets/_id_/conversations"
        );
        assert_eq!(uri_template("companies/42"), "companies/_id_");
        // Mixed segments stay as-is; only purely numeric ones are ids.
        assert_eq!(uri_template("v2things/a1"), "v2things/a1");
    }

    #[test]
    fn list_resources_default_to_page_size_ceiling() {
        let resolved = resolve("companies", &raw(&[]), &registry(), &settings());
        assert_eq!(resolved.params.get("per_page").unwrap(), "100");
        assert!(resolved.is_full_scan);
    }

    #[test]
    fn client_limit_caps_page_size() {
        let resolved = resolve("companies", &raw(&[("limit", "25")]), &registry(), &settings());
        assert_eq!(resolved.params.get("per_page").unwrap(), "25");
        assert!(!resolved.params.contains_key("limit"));
    }

    #[test]
    fn smallest_of_limit_and_page_size_wins() {
        let resolved = resolve(
            "companies",
            &raw(&[("limit", "80"), ("page_size", "40")]),
            &registry(),
            &settings(),
        );
        assert_eq!(resolved.params.get("per_page").unwrap(), "40");
    }

    #[test]
    fn search_and_single_item_paths_get_no_page_size() {
        let resolved = resolve("search/companies", &raw(&[]), &registry(), &settings());
        assert!(!resolved.params.contains_key("per_page"));

        let resolved = resolve("tickets/42", &raw(&[]), &registry(), &settings());
        assert!(!resolved.params.contains_key("per_page"));
    }

    #[test]
    fn since_maps_to_native_param_for_list_class() {
        let resolved = resolve(
            "tickets",
            &raw(&[("since", "2024-01-01T00:00:00Z")]),
            &registry(),
            &settings(),
        );
        assert_eq!(
            resolved.params.get("updated_since").unwrap(),
            "2024-01-01T00:00:00Z"
        );
        assert!(!resolved.is_full_scan);
        assert!(!resolved.params.contains_key("since"));
    }

    #[test]
    fn missing_since_uses_full_load_sentinel() {
        let resolved = resolve("tickets", &raw(&[]), &registry(), &settings());
        assert_eq!(
            resolved.params.get("updated_since").unwrap(),
            "1970-01-01T00:00:00Z"
        );
        assert!(resolved.is_full_scan);
    }

    #[test]
    fn null_sentinel_applies_no_filter() {
        let resolved = resolve("search/companies", &raw(&[]), &registry(), &settings());
        assert!(!resolved.params.contains_key("query"));
        assert!(resolved.is_full_scan);
    }

    #[test]
    fn search_since_builds_quoted_clause() {
        let resolved = resolve(
            "search/companies",
            &raw(&[("since", "2024-03-05T10:30:00Z")]),
            &registry(),
            &settings(),
        );
        assert_eq!(
            resolved.params.get("query").unwrap(),
            "\"updated_at:>'2024-03-05'\""
        );
    }

    #[test]
    fn search_since_and_query_are_and_combined() {
        let resolved = resolve(
            "search/contacts",
            &raw(&[
                ("since", "2024-03-05T10:30:00Z"),
                ("query", "\"active:true\""),
            ]),
            &registry(),
            &settings(),
        );
        assert_eq!(
            resolved.params.get("query").unwrap(),
            "\"(active:true) AND updated_at:>'2024-03-05'\""
        );
    }

    #[test]
    fn skew_correction_rewinds_supplied_cursor_only() {
        let mut s = settings();
        s.cursor_skew_seconds = 60;
        let resolved = resolve(
            "tickets",
            &raw(&[("since", "2024-01-01T00:01:00Z")]),
            &registry(),
            &s,
        );
        assert_eq!(
            resolved.params.get("updated_since").unwrap(),
            "2024-01-01T00:00:00Z"
        );

        // Sentinel path: no caller cursor, no correction.
        let resolved = resolve("tickets", &raw(&[]), &registry(), &s);
        assert_eq!(
            resolved.params.get("updated_since").unwrap(),
            "1970-01-01T00:00:00Z"
        );
    }

    #[test]
    fn pull_protocol_params_are_always_stripped() {
        let resolved = resolve(
            "agents",
            &raw(&[("since", "2024-01-01T00:00:00Z"), ("limit", "10"), ("page_size", "5")]),
            &registry(),
            &settings(),
        );
        for key in ["since", "limit", "page_size"] {
            assert!(!resolved.params.contains_key(key), "{key} leaked upstream");
        }
    }

    #[test]
    fn mutation_resolution_never_injects_a_cursor_filter() {
        let resolved = resolve_for_mutation("tickets", &raw(&[]), &registry(), &settings());
        assert!(!resolved.params.contains_key("updated_since"));
        assert_eq!(resolved.params.get("per_page").unwrap(), "100");

        // Pull-protocol params are still stripped on writes.
        let resolved = resolve_for_mutation(
            "tickets",
            &raw(&[("since", "2024-01-01T00:00:00Z"), ("limit", "10")]),
            &registry(),
            &settings(),
        );
        assert!(!resolved.params.contains_key("since"));
        assert!(!resolved.params.contains_key("limit"));
        assert!(!resolved.params.contains_key("updated_since"));
    }

    #[test]
    fn caller_pinned_page_is_flagged() {
        let resolved = resolve("tickets", &raw(&[("page", "3")]), &registry(), &settings());
        assert!(resolved.caller_fixed_page);
        assert_eq!(resolved.params.get("page").unwrap(), "3");
    }
}
