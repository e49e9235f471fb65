//! Inbound HTTP surface
//!
//! Routes every `GET /<resource-path>` into the fetch engine and streams
//! the result as one JSON array; the success status is committed before
//! the scan finishes, so failures surface in-band through the stream
//! writer. Mutating methods are proxied verbatim to upstream and, on the
//! expected success status, handed to the change forwarder.

use crate::config::Settings;
use crate::error::SyncError;
use crate::resource::{self, forward_change, Change, FetchEngine, Registry};
use crate::stream::{json_array_body, StreamEvent, CHANNEL_CAPACITY};
use crate::upstream::{self, Session};
use axum::body::{Body, Bytes};
use axum::extract::{Path, Query, State};
use axum::http::{header, Method, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Shared wiring for all handlers: immutable configuration plus the
/// connection pool every per-request session borrows.
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub registry: Arc<Registry>,
    pub http: reqwest::Client,
}

impl AppState {
    pub fn new(settings: Settings, registry: Registry) -> Result<Self, SyncError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("freshdesk-sync/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            settings: Arc::new(settings),
            registry: Arc::new(registry),
            http,
        })
    }
}

/// Build the router: one wildcard route, GET streaming, mutations proxied.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route(
            "/{*path}",
            get(handle_get)
                .post(handle_mutation)
                .put(handle_mutation)
                .delete(handle_mutation),
        )
        .with_state(state)
}

/// Streamed scan. The array shape is guaranteed even on mid-stream failure.
async fn handle_get(
    State(state): State<AppState>,
    Path(path): Path<String>,
    Query(raw): Query<BTreeMap<String, String>>,
) -> Response {
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
    let session = Session::new(state.http.clone(), &state.settings);
    let settings = state.settings.clone();
    let registry = state.registry.clone();

    tokio::spawn(async move {
        let engine = FetchEngine {
            session: &session,
            registry: &registry,
            settings: &settings,
        };
        if let Err(e) = engine.run(&path, &raw, tx.clone()).await {
            tracing::error!(path, error = %e, "scan failed mid-stream");
            let _ = tx.send(StreamEvent::Failed(e.to_string())).await;
        }
    });

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/json; charset=utf-8")
        .body(Body::from_stream(json_array_body(rx)))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

/// Verbatim mutation proxy with downstream forwarding on success.
async fn handle_mutation(
    State(state): State<AppState>,
    method: Method,
    Path(path): Path<String>,
    Query(raw): Query<BTreeMap<String, String>>,
    body: Bytes,
) -> Response {
    let request_body = if body.is_empty() {
        None
    } else {
        match serde_json::from_slice::<Value>(&body) {
            Ok(v) => Some(v),
            Err(e) => {
                return error_response(
                    StatusCode::BAD_REQUEST,
                    format!("request body is not valid JSON: {e}"),
                )
            }
        }
    };

    let Ok(upstream_method) = reqwest::Method::from_bytes(method.as_str().as_bytes()) else {
        return error_response(StatusCode::METHOD_NOT_ALLOWED, "unsupported method".to_string());
    };

    let resolved = resource::resolve_for_mutation(&path, &raw, &state.registry, &state.settings);
    let session = Session::new(state.http.clone(), &state.settings);
    let url = session.url_for(&path);

    let response = match session
        .call(
            upstream_method.clone(),
            &url,
            &resolved.params,
            request_body.as_ref(),
        )
        .await
    {
        Ok(r) => r,
        Err(e) => {
            tracing::error!(path, error = %e, "mutation call failed");
            return error_response(StatusCode::BAD_GATEWAY, e.to_string());
        }
    };

    if response.status == upstream::expected_status(&upstream_method) {
        // Forwarding and canonicalization config live on the collection;
        // PUT/DELETE address one record of it.
        let template = resource::uri_template(&path);
        let template = template
            .strip_suffix("/_id_")
            .unwrap_or(&template)
            .to_string();
        let change = if upstream_method == reqwest::Method::DELETE {
            Some(Change::Delete {
                id: record_id_from_path(&path),
            })
        } else {
            match serde_json::from_str::<Value>(&response.body) {
                Ok(v) => Some(Change::Upsert(v)),
                Err(e) => {
                    tracing::warn!(path, error = %e, "mutation succeeded but body is not JSON, nothing to forward");
                    None
                }
            }
        };
        if let Some(change) = change {
            let http = state.http.clone();
            let settings = state.settings.clone();
            let registry = state.registry.clone();
            tokio::spawn(async move {
                forward_change(&http, &settings, &registry, &template, change).await;
            });
        }
    }

    let status =
        StatusCode::from_u16(response.status).unwrap_or(StatusCode::BAD_GATEWAY);
    let content_type = response
        .content_type
        .unwrap_or_else(|| "application/json; charset=utf-8".to_string());
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, content_type)
        .body(Body::from(response.body))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

/// Identity of the record a mutation addressed, taken from the path.
fn record_id_from_path(path: &str) -> String {
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(path)
        .to_string()
}

fn error_response(status: StatusCode, message: String) -> Response {
    (status, Json(json!({ "message": message }))).into_response()
}
