//! Change Forwarder
//!
//! After a mutating call succeeds upstream, the change is delivered to the
//! downstream receivers configured for the resource. Delivery is
//! best-effort and fire-and-forget: a failed POST is logged and never
//! alters the result already returned to the original caller.

use super::canonical;
use super::registry::Registry;
use crate::config::Settings;
use reqwest::Client;
use serde_json::Value;

/// What a successful mutation produced, as far as forwarding cares.
#[derive(Debug)]
pub enum Change {
    /// Create or update: the upstream response body, pre-canonicalization.
    Upsert(Value),
    /// Delete: only the record's identity survives.
    Delete { id: String },
}

/// Deliver one change to every downstream target of the template.
pub async fn forward_change(
    http: &Client,
    settings: &Settings,
    registry: &Registry,
    template: &str,
    change: Change,
) {
    let targets = match registry.get(template) {
        Some(def) if !def.forward_targets.is_empty() => &def.forward_targets,
        _ => return,
    };
    let Some(base_url) = settings.downstream_base_url.as_deref() else {
        tracing::debug!(template, "no downstream receiver configured, skipping forward");
        return;
    };

    let record = match change {
        Change::Delete { id } => canonical::tombstone(&id),
        Change::Upsert(mut body) => {
            canonical::canonicalize(&mut body, template, registry, settings.generate_id);
            body
        }
    };

    for target in targets {
        let url = format!("{}/{}", base_url.trim_end_matches('/'), target);
        let mut request = http.post(&url).json(&record);
        if let Some(token) = settings.downstream_jwt.as_deref() {
            request = request.bearer_auth(token);
        }
        match request.send().await {
            Ok(response) if response.status().is_success() => {
                tracing::debug!(template, url, "change forwarded downstream");
            }
            Ok(response) => {
                tracing::error!(
                    template,
                    url,
                    status = response.status().as_u16(),
                    "downstream receiver rejected forwarded change"
                );
            }
            Err(e) => {
                tracing::error!(template, url, error = %e, "downstream forward failed");
            }
        }
    }
}
