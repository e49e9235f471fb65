//! Configuration Management
//!
//! All connection settings come from the environment, matching the
//! deployment convention of the integration platform this connector serves.
//! `Settings` is built once at startup and passed into the engine explicitly;
//! a missing required variable refuses startup.

use crate::error::SyncError;
use crate::upstream::ratelimit::{PolicyRule, RateLimitPolicy};
use std::collections::HashMap;
use std::str::FromStr;

/// Default Freshdesk API mount point.
const DEFAULT_API_PATH: &str = "/api/v2/";

/// Page-size ceiling for list-class resources.
const DEFAULT_PAGE_SIZE: u32 = 100;

/// Page-size ceiling Freshdesk enforces on `search/` calls.
const DEFAULT_SEARCH_PAGE_SIZE: u32 = 30;

/// Deepest page Freshdesk allows on `search/` calls.
const DEFAULT_SEARCH_MAX_PAGES: u32 = 10;

/// Connector settings, loaded once at startup.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Freshdesk account root, e.g. `https://acme.freshdesk.com`.
    pub domain: String,
    /// Freshdesk API key (sent as basic-auth username).
    pub api_key: String,
    /// API mount point appended to the domain.
    pub api_path: String,
    /// Page-size ceiling for list-class resources.
    pub page_size: u32,
    /// Page-size ceiling for search-class resources.
    pub search_page_size: u32,
    /// Maximum page number a search-class scan may reach.
    pub search_max_pages: u32,
    /// Inject the synthetic `_id` field into emitted records.
    pub generate_id: bool,
    /// Seconds subtracted from a caller-supplied cursor to tolerate clock
    /// drift between systems. Applied only when a cursor was supplied.
    pub cursor_skew_seconds: i64,
    /// Ordered governor rules; first match wins.
    pub policy_rules: Vec<PolicyRule>,
    /// Sleep applied by the DELAYED_RESPONSE policy, in seconds.
    pub throttle_delay_seconds: u64,
    /// Base URL of the downstream receiver for mutation forwarding.
    pub downstream_base_url: Option<String>,
    /// Bearer token for downstream delivery.
    pub downstream_jwt: Option<String>,
    /// Per-UriTemplate list of properties to mask before emission.
    pub anonymize: HashMap<String, Vec<String>>,
    /// Replacement value for masked properties.
    pub anonymization_string: String,
    /// Listen port for the inbound HTTP surface.
    pub port: u16,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            domain: String::new(),
            api_key: String::new(),
            api_path: DEFAULT_API_PATH.to_string(),
            page_size: DEFAULT_PAGE_SIZE,
            search_page_size: DEFAULT_SEARCH_PAGE_SIZE,
            search_max_pages: DEFAULT_SEARCH_MAX_PAGES,
            generate_id: true,
            cursor_skew_seconds: 0,
            policy_rules: default_policy_rules(),
            throttle_delay_seconds: 10,
            downstream_base_url: None,
            downstream_jwt: None,
            anonymize: HashMap::new(),
            anonymization_string: "*".to_string(),
            port: 5000,
        }
    }
}

/// Governor defaults: hard stop under 10 remaining calls, throttle under a
/// fifth of capacity left.
fn default_policy_rules() -> Vec<PolicyRule> {
    vec![
        PolicyRule {
            policy: RateLimitPolicy::RejectRequests,
            threshold: 10.0,
        },
        PolicyRule {
            policy: RateLimitPolicy::DelayedResponse,
            threshold: 0.2,
        },
    ]
}

impl Settings {
    /// Load settings from the environment.
    ///
    /// `freshdesk_domain` and `freshdesk_apikey` are mandatory; everything
    /// else has a default.
    pub fn from_env() -> Result<Self, SyncError> {
        let domain = require_var("freshdesk_domain")?;
        url::Url::parse(&domain)
            .map_err(|e| SyncError::Config(format!("freshdesk_domain: {e}")))?;
        let api_key = require_var("freshdesk_apikey")?;

        let mut settings = Settings {
            domain,
            api_key,
            ..Settings::default()
        };

        if let Ok(path) = std::env::var("freshdesk_api_path") {
            settings.api_path = path;
        }
        settings.page_size = parse_var("page_size", settings.page_size)?;
        settings.search_page_size = parse_var(
            "freshdesk_filter_call_max_page_size",
            settings.search_page_size,
        )?;
        settings.search_max_pages = parse_var(
            "freshdesk_filter_call_max_page_no",
            settings.search_max_pages,
        )?;
        settings.generate_id = std::env::var("generate_id")
            .map(|v| v != "False" && v != "false")
            .unwrap_or(true);
        settings.cursor_skew_seconds =
            parse_var("cursor_skew_seconds", settings.cursor_skew_seconds)?;
        settings.throttle_delay_seconds =
            parse_var("throttle_delay_seconds", settings.throttle_delay_seconds)?;
        settings.port = parse_var("port", settings.port)?;

        if let Ok(rules) = std::env::var("rate_limit_policies") {
            settings.policy_rules = serde_json::from_str(&rules)
                .map_err(|e| SyncError::Config(format!("rate_limit_policies: {e}")))?;
        }

        settings.downstream_base_url = std::env::var("downstream_base_url").ok();
        settings.downstream_jwt = std::env::var("downstream_jwt").ok();

        if let Ok(map) = std::env::var("properties_to_anonymize_per_uri_template") {
            // Deployment manifests quote this JSON with single quotes.
            let normalized = map.replace('\'', "\"");
            settings.anonymize = serde_json::from_str(&normalized).map_err(|e| {
                SyncError::Config(format!("properties_to_anonymize_per_uri_template: {e}"))
            })?;
        }
        if let Ok(mask) = std::env::var("anonymization_string") {
            settings.anonymization_string = mask;
        }

        Ok(settings)
    }

    /// Root URL every upstream path is joined to.
    pub fn upstream_root(&self) -> String {
        format!("{}{}", self.domain.trim_end_matches('/'), self.api_path)
    }
}

fn require_var(key: &str) -> Result<String, SyncError> {
    match std::env::var(key) {
        Ok(v) if !v.is_empty() => Ok(v),
        _ => Err(SyncError::Config(format!(
            "mandatory variable `{key}` is not initialized"
        ))),
    }
}

fn parse_var<T: FromStr + Copy>(key: &str, default: T) -> Result<T, SyncError>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|e| SyncError::Config(format!("{key}: {e}"))),
        Err(_) => Ok(default),
    }
}
