//! Paginated Fetch Engine
//!
//! Orchestrates one top-level scan: resolve parameters, loop upstream pages,
//! canonicalize every record, expand declared parent/child hierarchies by
//! recursing into itself, consult the rate-limit governor, and stream the
//! finished entities one at a time over a bounded channel. After the primary
//! scan it walks the resource's extension partitions (deleted/spam listings)
//! with hierarchy expansion disabled.
//!
//! Everything is strictly sequential: one outstanding upstream call at a
//! time, page order preserved, child collections nested under their parent
//! rather than interleaved.

use super::canonical;
use super::params::{self, ResolvedParams};
use super::registry::{Registry, ResourceDef};
use crate::config::Settings;
use crate::error::SyncError;
use crate::stream::StreamEvent;
use crate::upstream::{self, resolve_policy, RateLimitPolicy, RateSnapshot, Session};
use reqwest::Method;
use serde_json::Value;
use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tokio::sync::mpsc;

/// Mutable scan context for one top-level request, passed by reference down
/// the recursion tree so policy and scan-mode flags stay consistent across
/// every call the request spawns. Never shared across requests.
#[derive(Debug)]
pub struct ExecutionState {
    /// No caller cursor: the scan covers everything from the sentinel on.
    pub is_full_scan: bool,
    /// True only inside nested hierarchy/extension calls.
    pub is_recursed: bool,
    /// Last policy the governor resolved; transitions are logged once.
    pub active_policy: RateLimitPolicy,
    /// Hierarchy expansion toggle for the scan currently running.
    pub is_hierarchy_on: bool,
    /// Which extension partition is being scanned (0 = primary scan).
    pub extension_index: usize,
}

/// One fetched page, already split into records and an advance decision.
struct PageOutcome {
    entities: Vec<Value>,
    next: Option<NextPage>,
    /// Governor ordered a clean early stop before this page was processed.
    halted: bool,
}

enum NextPage {
    /// List-class: follow the URL from the `Link` header.
    Url(String),
    /// Search-class: bump the `page` parameter.
    Number(u32),
}

/// True when the caller's own filter already selects one of the resource's
/// extension partitions. Exact string equality on the declared param; any
/// broader match leaves hierarchy and the extension pass enabled.
fn extension_selected(def: Option<&ResourceDef>, raw: &BTreeMap<String, String>) -> bool {
    def.and_then(|d| d.extensions.as_ref())
        .is_some_and(|ext| {
            raw.get(&ext.param)
                .is_some_and(|value| ext.values.iter().any(|v| v == value))
        })
}

/// The scan orchestrator. Borrowed pieces only; one engine value serves one
/// inbound request.
pub struct FetchEngine<'a> {
    pub session: &'a Session,
    pub registry: &'a Registry,
    pub settings: &'a Settings,
}

impl FetchEngine<'_> {
    /// Run one complete top-level scan, streaming entities into `tx`.
    ///
    /// The caller owns the channel's receiving side and the array framing;
    /// this only ever produces entity events. Errors are returned, not sent.
    pub async fn run(
        &self,
        path: &str,
        raw: &BTreeMap<String, String>,
        tx: mpsc::Sender<StreamEvent>,
    ) -> Result<(), SyncError> {
        let resolved = params::resolve(path, raw, self.registry, self.settings);
        let template = params::uri_template(path);
        let def = self.registry.get(&template);
        let caller_in_extension = extension_selected(def, raw);
        let sync_supported = self.registry.sync_supported(&template);

        let mut state = ExecutionState {
            is_full_scan: resolved.is_full_scan,
            is_recursed: false,
            active_policy: RateLimitPolicy::Default,
            is_hierarchy_on: !caller_in_extension,
            extension_index: 0,
        };

        tracing::debug!(
            path,
            template,
            is_full_scan = state.is_full_scan,
            hierarchy = state.is_hierarchy_on,
            "starting scan"
        );

        let halted = self
            .scan_stream(path, &template, &resolved, None, &mut state, sync_supported, &tx)
            .await?;

        // Extension pass: top level only, once per partition, skipped when
        // the caller already selected a partition or the governor stopped
        // the primary scan early.
        if halted || caller_in_extension {
            return Ok(());
        }
        let Some(ext) = def.and_then(|d| d.extensions.as_ref()) else {
            return Ok(());
        };
        for (index, value) in ext.values.iter().enumerate() {
            state.extension_index = index + 1;
            state.is_hierarchy_on = false;
            tracing::debug!(path, partition = %value, "scanning extension partition");
            let partition = Some((ext.param.as_str(), value.as_str()));
            if self
                .scan_stream(path, &template, &resolved, partition, &mut state, sync_supported, &tx)
                .await?
            {
                break;
            }
        }
        Ok(())
    }

    /// Page loop for one scan (primary or one extension partition),
    /// streaming processed entities. Returns whether the governor halted
    /// the request early.
    #[allow(clippy::too_many_arguments)]
    async fn scan_stream(
        &self,
        path: &str,
        template: &str,
        resolved: &ResolvedParams,
        partition: Option<(&str, &str)>,
        state: &mut ExecutionState,
        sync_supported: bool,
        tx: &mpsc::Sender<StreamEvent>,
    ) -> Result<bool, SyncError> {
        let mut request_params = resolved.params.clone();
        if let Some((param, value)) = partition {
            request_params.insert(param.to_string(), value.to_string());
        }

        let mut page_url = self.session.url_for(path);
        let mut page_counter: u32 = 0;
        loop {
            page_counter += 1;
            let page = self
                .fetch_page(
                    template,
                    &page_url,
                    &request_params,
                    page_counter,
                    resolved.caller_fixed_page,
                    state,
                    sync_supported,
                )
                .await?;
            if page.halted {
                return Ok(true);
            }
            for mut entity in page.entities {
                self.process_entity(&mut entity, template, state).await?;
                if tx.send(StreamEvent::Entity(entity)).await.is_err() {
                    // Receiver dropped: the client disconnected mid-stream.
                    tracing::debug!(path, "response stream closed, abandoning scan");
                    return Ok(true);
                }
            }
            match page.next {
                Some(NextPage::Url(url)) => page_url = url,
                Some(NextPage::Number(n)) => {
                    request_params.insert("page".to_string(), n.to_string());
                }
                None => return Ok(false),
            }
        }
    }

    /// Fetch and classify one page.
    #[allow(clippy::too_many_arguments)]
    async fn fetch_page(
        &self,
        template: &str,
        url: &str,
        request_params: &BTreeMap<String, String>,
        page_counter: u32,
        caller_fixed_page: bool,
        state: &mut ExecutionState,
        sync_supported: bool,
    ) -> Result<PageOutcome, SyncError> {
        let response = self
            .session
            .call(Method::GET, url, request_params, None)
            .await?;
        if response.status != 200 {
            return Err(SyncError::UpstreamHttp {
                method: "GET".to_string(),
                url: url.to_string(),
                status: response.status,
                body: response.body,
            });
        }

        // Only the top-level call answers to the governor.
        if !state.is_recursed
            && self
                .consult_governor(template, response.rate.as_ref(), state, sync_supported)
                .await?
        {
            return Ok(PageOutcome {
                entities: Vec::new(),
                next: None,
                halted: true,
            });
        }

        let body = response.json()?;
        if params::is_search_class(template) {
            let entities = body
                .get("results")
                .and_then(Value::as_array)
                .cloned()
                .ok_or_else(|| {
                    SyncError::MalformedResponse("search envelope missing `results`".to_string())
                })?;
            let total = body.get("total").and_then(Value::as_u64).unwrap_or(0);
            let ceiling = u64::from(self.settings.search_page_size);
            let next = if total > ceiling * u64::from(page_counter) {
                if page_counter >= self.settings.search_max_pages {
                    tracing::error!(
                        template,
                        total,
                        page_counter,
                        "max page number reached before fetching all records"
                    );
                    return Err(SyncError::PaginationExhausted {
                        total,
                        max_pages: self.settings.search_max_pages,
                    });
                }
                Some(NextPage::Number(page_counter + 1))
            } else {
                None
            };
            Ok(PageOutcome {
                entities,
                next,
                halted: false,
            })
        } else {
            let entities = match body {
                Value::Array(items) => items,
                // Single-record GET: the body is the record itself.
                record @ Value::Object(_) => vec![record],
                other => {
                    return Err(SyncError::MalformedResponse(format!(
                        "expected array or object page, got {other}"
                    )))
                }
            };
            let next = response
                .link
                .as_deref()
                .and_then(upstream::next_link)
                .filter(|_| !caller_fixed_page)
                .map(NextPage::Url);
            Ok(PageOutcome {
                entities,
                next,
                halted: false,
            })
        }
    }

    /// Resolve and act on the rate-limit policy after one top-level
    /// response. Returns whether the scan must stop cleanly.
    async fn consult_governor(
        &self,
        template: &str,
        rate: Option<&RateSnapshot>,
        state: &mut ExecutionState,
        sync_supported: bool,
    ) -> Result<bool, SyncError> {
        let Some(rate) = rate else {
            return Ok(false);
        };
        let policy = resolve_policy(&self.settings.policy_rules, rate);
        if policy != state.active_policy {
            tracing::info!(
                template,
                previous = ?state.active_policy,
                current = ?policy,
                remaining = rate.remaining,
                total = rate.total,
                "rate-limit policy transition"
            );
            state.active_policy = policy;
        }
        match policy {
            RateLimitPolicy::Default => Ok(false),
            RateLimitPolicy::DelayedResponse => {
                tokio::time::sleep(Duration::from_secs(self.settings.throttle_delay_seconds))
                    .await;
                Ok(false)
            }
            RateLimitPolicy::RejectRequests => {
                if sync_supported && !state.is_full_scan {
                    // Incremental scans stop cleanly; the caller re-pulls
                    // with the same cursor once capacity recovers.
                    tracing::warn!(template, "rate limit floor reached, ending incremental scan");
                    Ok(true)
                } else {
                    Err(SyncError::RateLimitRejected {
                        path: template.to_string(),
                    })
                }
            }
        }
    }

    /// Canonicalize one record, expand its declared children, and apply the
    /// anonymization mask.
    async fn process_entity(
        &self,
        entity: &mut Value,
        template: &str,
        state: &mut ExecutionState,
    ) -> Result<(), SyncError> {
        canonical::canonicalize(entity, template, self.registry, self.settings.generate_id);

        if state.is_hierarchy_on {
            if let Some(def) = self.registry.get(template) {
                if !def.children.is_empty() {
                    if let Some(id) = canonical::entity_id(entity) {
                        for child in &def.children {
                            let child_path = child.path.replace("_id_", &id);
                            let collection =
                                self.fetch_child_collection(child_path, state).await?;
                            if let Some(map) = entity.as_object_mut() {
                                map.insert(child.field.clone(), Value::Array(collection));
                            }
                        }
                    }
                }
            }
        }

        if let Some(fields) = self.settings.anonymize.get(template) {
            canonical::anonymize(entity, fields, &self.settings.anonymization_string);
        }
        Ok(())
    }

    /// Recursively materialize one child collection, depth-first. Nested
    /// calls share the parent's `ExecutionState` with `is_recursed` set, so
    /// they never consult the governor and never run extension passes;
    /// hierarchy stays on by default so grandchildren expand too.
    fn fetch_child_collection<'b>(
        &'b self,
        path: String,
        state: &'b mut ExecutionState,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Value>, SyncError>> + Send + 'b>> {
        Box::pin(async move {
            let template = params::uri_template(&path);
            // Child scans carry the page-size ceiling and nothing else.
            let mut request_params = BTreeMap::new();
            request_params.insert("per_page".to_string(), self.settings.page_size.to_string());

            let previous = (state.is_recursed, state.is_hierarchy_on);
            state.is_recursed = true;
            state.is_hierarchy_on = true;

            let result = self
                .collect_pages(&path, &template, request_params, state)
                .await;

            state.is_recursed = previous.0;
            state.is_hierarchy_on = previous.1;
            result
        })
    }

    /// Page loop for nested calls: same advance rules, materialized output.
    async fn collect_pages(
        &self,
        path: &str,
        template: &str,
        mut request_params: BTreeMap<String, String>,
        state: &mut ExecutionState,
    ) -> Result<Vec<Value>, SyncError> {
        let mut collected = Vec::new();
        let mut page_url = self.session.url_for(path);
        let mut page_counter: u32 = 0;
        loop {
            page_counter += 1;
            let page = self
                .fetch_page(
                    template,
                    &page_url,
                    &request_params,
                    page_counter,
                    false,
                    state,
                    false,
                )
                .await?;
            for mut entity in page.entities {
                self.process_entity(&mut entity, template, state).await?;
                collected.push(entity);
            }
            match page.next {
                Some(NextPage::Url(url)) => page_url = url,
                Some(NextPage::Number(n)) => {
                    request_params.insert("page".to_string(), n.to_string());
                }
                None => return Ok(collected),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn tickets_def() -> ResourceDef {
        Registry::load().unwrap().get("tickets").unwrap().clone()
    }

    #[test]
    fn exact_extension_filter_disables_hierarchy() {
        let def = tickets_def();
        assert!(extension_selected(Some(&def), &raw(&[("filter", "spam")])));
        assert!(extension_selected(Some(&def), &raw(&[("filter", "deleted")])));
    }

    #[test]
    fn partial_filter_match_keeps_hierarchy() {
        let def = tickets_def();
        assert!(!extension_selected(Some(&def), &raw(&[("filter", "spam-ish")])));
        assert!(!extension_selected(Some(&def), &raw(&[("filter", "new_and_my_open")])));
        assert!(!extension_selected(Some(&def), &raw(&[])));
        assert!(!extension_selected(None, &raw(&[("filter", "spam")])));
    }
}
