//! Rate-Limit Governor
//!
//! Evaluates the `X-Ratelimit-Remaining` / `X-Ratelimit-Total` figures of
//! every top-level upstream response against an ordered rule table and
//! resolves the policy the scan must follow next. Pure policy selection
//! lives here; acting on the policy (sleeping, aborting) is the engine's job.

use serde::{Deserialize, Serialize};

/// Scan policy resolved from remaining upstream capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitPolicy {
    /// Plenty of headroom; proceed normally.
    #[default]
    Default,
    /// Headroom getting thin; throttle by sleeping between pages.
    DelayedResponse,
    /// Headroom exhausted; stop issuing upstream calls.
    RejectRequests,
}

/// One governor rule. A threshold under 1 bounds the remaining/total ratio;
/// a threshold of 1 or more bounds the raw remaining count.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PolicyRule {
    pub policy: RateLimitPolicy,
    pub threshold: f64,
}

/// Capacity figures read from one upstream response.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateSnapshot {
    pub remaining: f64,
    pub total: f64,
}

impl RateSnapshot {
    /// Parse the snapshot from header values; absent or unparsable headers
    /// yield no snapshot and the governor keeps the current policy.
    pub fn from_headers(remaining: Option<&str>, total: Option<&str>) -> Option<Self> {
        let remaining = remaining?.trim().parse::<f64>().ok()?;
        let total = total?.trim().parse::<f64>().ok()?;
        Some(Self { remaining, total })
    }
}

/// Resolve the active policy for a capacity snapshot.
///
/// Rules are scanned in table order and the first match wins. Boundary
/// values match: a ratio or count exactly at its threshold selects the rule.
/// No match, or a snapshot with a non-positive total, resolves to `Default`.
pub fn resolve_policy(rules: &[PolicyRule], snapshot: &RateSnapshot) -> RateLimitPolicy {
    if snapshot.total <= 0.0 {
        return RateLimitPolicy::Default;
    }
    let ratio = snapshot.remaining / snapshot.total;
    for rule in rules {
        let matched = if rule.threshold < 1.0 {
            ratio <= rule.threshold
        } else {
            snapshot.remaining <= rule.threshold
        };
        if matched {
            return rule.policy;
        }
    }
    RateLimitPolicy::Default
}
