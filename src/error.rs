//! Error taxonomy for the connector
//!
//! Scan failures fall into a small set of kinds that the call layer maps to
//! either an in-band error marker (GET streams, where the status is already
//! committed) or a plain error response (mutations and startup).

use thiserror::Error;

/// Errors raised by the fetch engine, the governor, and startup wiring.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Upstream returned a non-throttling, unexpected status code.
    #[error("upstream returned {status} for {method} {url}")]
    UpstreamHttp {
        method: String,
        url: String,
        status: u16,
        body: String,
    },

    /// A search-class scan hit the page-count cap before the reported total
    /// was satisfied. The cursor window is too wide to page through safely.
    #[error("max page number {max_pages} reached before fetching all records (total={total})")]
    PaginationExhausted { total: u64, max_pages: u32 },

    /// The rate-limit governor rejected further calls during a full scan.
    /// Incremental scans are stopped cleanly instead of raising this.
    #[error("rate limit floor reached; aborting full scan of {path}")]
    RateLimitRejected { path: String },

    /// Required connection settings missing or malformed at startup.
    #[error("configuration error: {0}")]
    Config(String),

    /// Transport-level failure talking to upstream.
    #[error("upstream transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Upstream body was not the JSON shape the resource class promises.
    #[error("malformed upstream response: {0}")]
    MalformedResponse(String),
}
