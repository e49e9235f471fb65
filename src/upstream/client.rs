//! Upstream HTTP session
//!
//! Thin wrapper over reqwest for talking to the Freshdesk REST API. One
//! `Session` is acquired per inbound request and reused for every upstream
//! call made during that request's lifetime, including recursive hierarchy
//! fetches. Throttling (`429` + `Retry-After`) is absorbed here: the call
//! sleeps and retries the same request, invisibly to the engine.

use super::ratelimit::RateSnapshot;
use crate::config::Settings;
use crate::error::SyncError;
use reqwest::{Client, Method, StatusCode};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;

/// Maximum length of response body to log (to avoid logging sensitive data)
const MAX_LOG_BODY_LENGTH: usize = 200;

/// Give up after this many consecutive throttled retries of one request.
const MAX_THROTTLE_RETRIES: u32 = 5;

/// Sleep applied when `Retry-After` is missing or unparsable.
const FALLBACK_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Longest upstream-advertised delay honored; anything above counts as
/// unparsable.
const MAX_RETRY_AFTER_SECONDS: f64 = 86_400.0;

/// (method, status) pairs Freshdesk returns on success.
const VALID_RESPONSE_COMBOS: &[(&str, u16)] =
    &[("GET", 200), ("POST", 201), ("PUT", 200), ("DELETE", 204)];

/// Sanitize response body for logging.
/// Truncates long responses and strips non-printable characters.
fn sanitize_for_log(body: &str) -> String {
    let truncated = if body.len() > MAX_LOG_BODY_LENGTH {
        // The byte budget may land inside a multibyte character.
        let mut cut = MAX_LOG_BODY_LENGTH;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        format!(
            "{}... [truncated, {} bytes total]",
            &body[..cut],
            body.len()
        )
    } else {
        body.to_string()
    };

    truncated.replace(|c: char| !c.is_ascii_graphic() && c != ' ', "")
}

/// Parse a `Retry-After` value: float seconds, or a numeral followed by a
/// `min` suffix meaning minutes. No other unit form is defined upstream.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    let value = value.trim();
    if let Some(minutes) = value.strip_suffix("min") {
        let minutes = minutes.trim().parse::<u64>().ok()?;
        let seconds = minutes.checked_mul(60)?;
        if seconds as f64 > MAX_RETRY_AFTER_SECONDS {
            return None;
        }
        return Some(Duration::from_secs(seconds));
    }
    let seconds = value.parse::<f64>().ok()?;
    if !seconds.is_finite() || seconds.is_sign_negative() || seconds > MAX_RETRY_AFTER_SECONDS {
        return None;
    }
    Some(Duration::from_secs_f64(seconds))
}

/// Extract the next-page URL from a `Link` response header.
/// Freshdesk sends `<https://...?page=2>; rel="next"`.
pub fn next_link(header: &str) -> Option<String> {
    let start = header.find('<')?;
    let end = header.find('>')?;
    if end <= start + 1 {
        return None;
    }
    Some(header[start + 1..end].to_string())
}

/// Expected success status for a mutating or reading method.
pub fn expected_status(method: &Method) -> u16 {
    VALID_RESPONSE_COMBOS
        .iter()
        .find(|(m, _)| *m == method.as_str())
        .map(|(_, s)| *s)
        .unwrap_or(200)
}

/// One upstream response, headers already picked apart.
#[derive(Debug)]
pub struct UpstreamResponse {
    pub status: u16,
    pub body: String,
    pub content_type: Option<String>,
    pub link: Option<String>,
    pub rate: Option<RateSnapshot>,
}

impl UpstreamResponse {
    /// Parse the body as JSON.
    pub fn json(&self) -> Result<Value, SyncError> {
        serde_json::from_str(&self.body)
            .map_err(|e| SyncError::MalformedResponse(format!("invalid JSON body: {e}")))
    }
}

/// Per-request upstream session: shared connection pool plus credentials.
#[derive(Clone)]
pub struct Session {
    http: Client,
    root: String,
    api_key: String,
}

impl Session {
    /// Acquire a session for one inbound request.
    pub fn new(http: Client, settings: &Settings) -> Self {
        Self {
            http,
            root: settings.upstream_root(),
            api_key: settings.api_key.clone(),
        }
    }

    /// Build the upstream URL for a resource path.
    pub fn url_for(&self, path: &str) -> String {
        format!("{}{}", self.root, path.trim_start_matches('/'))
    }

    /// Issue one upstream call.
    ///
    /// A `429` response is handled internally: sleep for the advertised
    /// `Retry-After`, retry the same request, up to a retry cap. Any other
    /// status is returned to the caller, who decides whether it is an error
    /// for its context; unexpected combos are logged here either way.
    pub async fn call(
        &self,
        method: Method,
        url: &str,
        params: &BTreeMap<String, String>,
        body: Option<&Value>,
    ) -> Result<UpstreamResponse, SyncError> {
        let mut throttle_retries = 0;

        loop {
            tracing::debug!(%method, url, ?params, "upstream call");

            let mut request = self
                .http
                .request(method.clone(), url)
                .basic_auth(&self.api_key, Some("X"))
                .header("Content-Type", "application/json");
            if !params.is_empty() {
                request = request.query(params);
            }
            if let Some(body) = body {
                request = request.json(body);
            }

            let response = request.send().await?;
            let status = response.status();
            let retry_after = response
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            let content_type = response
                .headers()
                .get("Content-Type")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            let link = response
                .headers()
                .get("Link")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            let rate = RateSnapshot::from_headers(
                response
                    .headers()
                    .get("X-Ratelimit-Remaining")
                    .and_then(|v| v.to_str().ok()),
                response
                    .headers()
                    .get("X-Ratelimit-Total")
                    .and_then(|v| v.to_str().ok()),
            );
            let body_text = response.text().await?;

            if status == StatusCode::TOO_MANY_REQUESTS {
                throttle_retries += 1;
                if throttle_retries > MAX_THROTTLE_RETRIES {
                    tracing::error!(url, "still throttled after {MAX_THROTTLE_RETRIES} retries");
                    return Err(SyncError::UpstreamHttp {
                        method: method.to_string(),
                        url: url.to_string(),
                        status: status.as_u16(),
                        body: sanitize_for_log(&body_text),
                    });
                }
                let delay = retry_after
                    .as_deref()
                    .and_then(parse_retry_after)
                    .unwrap_or(FALLBACK_RETRY_DELAY);
                tracing::warn!(url, ?delay, "throttled by upstream, sleeping before retry");
                tokio::time::sleep(delay).await;
                continue;
            }

            if !VALID_RESPONSE_COMBOS.contains(&(method.as_str(), status.as_u16())) {
                tracing::error!(
                    %method,
                    url,
                    status = status.as_u16(),
                    body = %sanitize_for_log(&body_text),
                    "unexpected upstream response"
                );
            }

            return Ok(UpstreamResponse {
                status: status.as_u16(),
                body: body_text,
                content_type,
                link,
                rate,
            });
        }
    }
}
