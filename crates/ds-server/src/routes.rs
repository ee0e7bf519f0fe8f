//! Route handlers.

use crate::service::ServiceState;
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use ds_cache::kind::ArtifactKind;
use ds_core::error::CoreError;
use ds_core::fingerprint::Fingerprint;
use serde::Serialize;
use std::sync::Arc;

/// JSON error body. Never contains secrets or resolved SQL.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error_code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reproduction_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Assemble the application router.
pub fn build_router(state: Arc<ServiceState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/report", get(report))
        .route("/cache/{kind}/{file}", get(cache_artifact))
        .route("/fs/{jail}/{*path}", get(crate::fs::filestore))
        .fallback(not_found)
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({"status": "ok"}))
}

async fn not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({"error_code": "NotFound", "message": "no such route"})),
    )
        .into_response()
}

/// GET /report?report=<id>&<params>: dispatch and return the manifest.
async fn report(
    State(state): State<Arc<ServiceState>>,
    Query(params): Query<Vec<(String, String)>>,
) -> Response {
    let report_ref = match params
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case("report"))
    {
        Some((_, v)) if !v.is_empty() => v.clone(),
        _ => {
            return error_response(
                &CoreError::ReportNotFound {
                    report: "(missing report parameter)".to_string(),
                },
                None,
            );
        }
    };
    let wants_html = params
        .iter()
        .any(|(k, v)| k.eq_ignore_ascii_case("format") && v.eq_ignore_ascii_case("html"));
    let reproduction = reproduction_url(&params);

    let dispatcher = Arc::clone(&state.dispatcher);
    let dispatch_ref = report_ref.clone();
    let dispatch_params = params.clone();
    let result = tokio::task::spawn_blocking(move || {
        dispatcher.dispatch(&dispatch_ref, &dispatch_params)
    })
    .await;

    match result {
        Ok(Ok(manifest)) => {
            if wants_html {
                Html(crate::html::render_shell(&manifest)).into_response()
            } else {
                Json(manifest).into_response()
            }
        }
        Ok(Err(err)) => error_response(&err, Some(reproduction)),
        Err(join_err) => {
            log::error!("dispatch task panicked: {join_err}");
            error_response(
                &CoreError::CacheCorrupt {
                    detail: "dispatch task failed".to_string(),
                },
                Some(reproduction),
            )
        }
    }
}

/// GET /cache/{kind}/{fp}.parquet: immutable content-addressed bytes.
async fn cache_artifact(
    State(state): State<Arc<ServiceState>>,
    Path((kind, file)): Path<(String, String)>,
) -> Response {
    let Some(kind) = ArtifactKind::from_dir_name(&kind) else {
        return not_found().await;
    };
    let Some(stem) = file.strip_suffix(".parquet") else {
        return not_found().await;
    };
    if Fingerprint::from_hex(stem).is_none() {
        return not_found().await;
    }

    let path = state.layout.cache_dir(kind.dir_name()).join(&file);
    match tokio::fs::read(&path).await {
        Ok(bytes) => (
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, "application/octet-stream".to_string()),
                (
                    header::CACHE_CONTROL,
                    "public, max-age=31536000, immutable".to_string(),
                ),
            ],
            bytes,
        )
            .into_response(),
        Err(_) => not_found().await,
    }
}

/// The request URL minus any `__client__` params: replaying it reproduces
/// the same artifacts bit-for-bit.
fn reproduction_url(params: &[(String, String)]) -> String {
    let query: Vec<String> = params
        .iter()
        .filter(|(k, _)| !k.to_ascii_lowercase().starts_with("__client__"))
        .map(|(k, v)| format!("{}={}", urlencode(k), urlencode(v)))
        .collect();
    format!("/report?{}", query.join("&"))
}

/// Minimal query-component encoding.
fn urlencode(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' | b'/' => {
                out.push(byte as char);
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

/// Render a CoreError as the JSON error shape with its mapped status.
pub fn error_response(err: &CoreError, reproduction_url: Option<String>) -> Response {
    let (report, detail) = match err {
        CoreError::SqlExecutionError { report, node, .. } => {
            (Some(report.clone()), Some(format!("node '{node}'")))
        }
        CoreError::ReportNotFound { report } => (Some(report.clone()), None),
        _ => (None, None),
    };
    let body = ErrorBody {
        error_code: err.code().to_string(),
        message: err.to_string(),
        report,
        reproduction_url,
        detail,
    };
    let status =
        StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(body)).into_response()
}

#[cfg(test)]
#[path = "routes_test.rs"]
mod tests;
