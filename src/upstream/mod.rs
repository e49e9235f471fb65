//! Freshdesk API interaction module
//!
//! Everything that talks to the upstream ticketing platform lives here:
//! the per-request HTTP session with throttle absorption, and the
//! rate-limit governor consulted after each top-level response.
//!
//! # Module Structure
//!
//! - [`client`] - per-request session, header parsing, 429 retry handling
//! - [`ratelimit`] - policy rules and governor evaluation

pub mod client;
pub mod ratelimit;

pub use client::{expected_status, next_link, parse_retry_after, Session, UpstreamResponse};
pub use ratelimit::{resolve_policy, PolicyRule, RateLimitPolicy, RateSnapshot};
