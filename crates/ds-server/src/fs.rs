//! Jailed static filestore: `/fs/<jail>/<path>`.
//!
//! Each jail is a configured directory with extension allow/deny lists and
//! a size cap. Traversal out of the jail is refused before any filesystem
//! access, and again after canonicalization in case of symlinks.

use crate::service::ServiceState;
use axum::extract::{Path as UrlPath, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use ds_core::config::FilestoreJail;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

/// GET /fs/{jail}/{*path}
pub async fn filestore(
    State(state): State<Arc<ServiceState>>,
    UrlPath((jail, rel)): UrlPath<(String, String)>,
) -> Response {
    let Some(jail_config) = state.config.filestore.iter().find(|j| j.jail == jail) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    serve_jailed(&state, jail_config, &rel).await
}

async fn serve_jailed(state: &ServiceState, jail: &FilestoreJail, rel: &str) -> Response {
    let Some(relative) = sanitize(rel) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    if !extension_allowed(jail, &relative) {
        return StatusCode::FORBIDDEN.into_response();
    }

    let jail_root = state.layout.root.join(&jail.root);
    let target = jail_root.join(&relative);

    // canonicalize both sides so symlinks cannot step outside the jail
    let (Ok(canonical_root), Ok(canonical_target)) =
        (jail_root.canonicalize(), target.canonicalize())
    else {
        return StatusCode::NOT_FOUND.into_response();
    };
    if !canonical_target.starts_with(&canonical_root) {
        return StatusCode::NOT_FOUND.into_response();
    }

    let Ok(meta) = tokio::fs::metadata(&canonical_target).await else {
        return StatusCode::NOT_FOUND.into_response();
    };
    if !meta.is_file() {
        return StatusCode::NOT_FOUND.into_response();
    }
    if meta.len() > jail.max_bytes {
        return StatusCode::PAYLOAD_TOO_LARGE.into_response();
    }

    match tokio::fs::read(&canonical_target).await {
        Ok(bytes) => (
            StatusCode::OK,
            [(
                header::CONTENT_TYPE,
                content_type(&canonical_target).to_string(),
            )],
            bytes,
        )
            .into_response(),
        Err(_) => StatusCode::NOT_FOUND.into_response(),
    }
}

/// Reject absolute paths and any `..` component before touching the disk.
pub fn sanitize(rel: &str) -> Option<PathBuf> {
    let path = Path::new(rel);
    let mut clean = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {}
            _ => return None,
        }
    }
    if clean.as_os_str().is_empty() {
        None
    } else {
        Some(clean)
    }
}

/// Deny list wins over allow list; an empty allow list admits everything
/// not denied.
pub fn extension_allowed(jail: &FilestoreJail, path: &Path) -> bool {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();
    if jail.deny_extensions.iter().any(|d| d.eq_ignore_ascii_case(&ext)) {
        return false;
    }
    if jail.allow_extensions.is_empty() {
        return true;
    }
    jail.allow_extensions.iter().any(|a| a.eq_ignore_ascii_case(&ext))
}

fn content_type(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase()
        .as_str()
    {
        "json" => "application/json",
        "csv" => "text/csv",
        "txt" => "text/plain; charset=utf-8",
        "html" => "text/html; charset=utf-8",
        "parquet" => "application/octet-stream",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
#[path = "fs_test.rs"]
mod tests;
