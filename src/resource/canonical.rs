//! Canonicalizer
//!
//! Normalizes one raw upstream record into the connector's entity shape:
//! a synthetic string `_id` coerced from the source id, and a `_updated`
//! marker copied from the source's own timestamp, except for resource types
//! that have no such concept. Unknown fields pass through untouched and
//! re-application is a no-op.

use super::registry::Registry;
use serde_json::Value;

/// Coerce a source id (numeric or opaque) into the synthetic string identity.
pub fn entity_id(record: &Value) -> Option<String> {
    match record.get("id")? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Canonicalize one record in place.
pub fn canonicalize(record: &mut Value, template: &str, registry: &Registry, generate_id: bool) {
    let Some(map) = record.as_object_mut() else {
        return;
    };

    if generate_id {
        let id = match map.get("id") {
            Some(Value::String(s)) => Some(s.clone()),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        };
        if let Some(id) = id {
            map.insert("_id".to_string(), Value::String(id));
        }
    }

    if registry.tracks_updated(template) {
        if let Some(updated) = map.get("updated_at").cloned() {
            map.insert("_updated".to_string(), updated);
        }
    }
}

/// Build the minimal downstream tombstone for a deleted record.
pub fn tombstone(id: &str) -> Value {
    serde_json::json!({ "_id": id, "_deleted": true })
}

/// Mask the named properties of a record with the replacement string.
pub fn anonymize(record: &mut Value, fields: &[String], mask: &str) {
    let Some(map) = record.as_object_mut() else {
        return;
    };
    for field in fields {
        if map.contains_key(field) {
            map.insert(field.clone(), Value::String(mask.to_string()));
        }
    }
}
