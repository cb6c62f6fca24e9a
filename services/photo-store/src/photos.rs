//! Photo storage routes
//!
//! Thin JSON/bytes surface over the configured `FileSystem`. Uploaded bodies
//! are spooled to a temp file first since the backends work on local paths.

use std::path::{Path, PathBuf};
use std::time::Instant;

use axum::body::Bytes;
use axum::extract::{Path as RoutePath, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use photo_fs::Photo;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::AppState;
use crate::error::{Error, Result};
use crate::metrics::finish;

/// Header carrying the photo's capture time (unix seconds).
pub const DATE_TAKEN_HEADER: &str = "x-date-taken";

fn request_id() -> String {
    format!("req_{}", uuid::Uuid::new_v4().as_simple())
}

fn json_response(status: StatusCode, body: serde_json::Value) -> Response {
    (
        status,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
        .into_response()
}

fn respond(
    route: &'static str,
    started: Instant,
    request_id: &str,
    result: Result<Response>,
) -> Response {
    let response = match result {
        Ok(response) => response,
        Err(e) => {
            warn!(request_id, route, error = %e, "photo request failed");
            e.into_response(request_id)
        }
    };
    finish(route, started, response)
}

#[derive(Debug, Default, Deserialize)]
pub struct InitializeRequest {
    #[serde(default)]
    edit_mode: bool,
}

/// POST /photos/initialize
pub async fn initialize(
    State(state): State<AppState>,
    body: Option<axum::Json<InitializeRequest>>,
) -> Response {
    let started = Instant::now();
    let request_id = request_id();
    let edit_mode = body.map(|b| b.0.edit_mode).unwrap_or(false);

    let result: Result<Response> = async {
        state.fs.initialize(edit_mode).await?;
        info!(edit_mode, identity = ?state.fs.identity(), "storage initialized");
        Ok::<_, Error>(json_response(
            StatusCode::OK,
            serde_json::json!({ "status": "initialized", "edit_mode": edit_mode }),
        ))
    }
    .await;
    respond("photos_initialize", started, &request_id, result)
}

/// PUT /photos/{*remote_path}: body is the file content.
pub async fn put_photo(
    State(state): State<AppState>,
    RoutePath(remote_path): RoutePath<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let started = Instant::now();
    let request_id = request_id();
    let remote_file = format!("/{}", remote_path.trim_start_matches('/'));

    let result: Result<Response> = async {
        let date_taken = date_taken(&headers)?;
        let spool = spool_path(&state.upload_dir, &remote_file);
        tokio::fs::write(&spool, &body)
            .await
            .map_err(|e| Error::Io(format!("spooling upload: {e}")))?;

        let stored = state.fs.put_photo(&spool, &remote_file, date_taken).await;
        remove_temp(&spool).await;
        stored?;

        info!(request_id, remote_file, bytes = body.len(), "photo stored");
        Ok::<_, Error>(json_response(
            StatusCode::CREATED,
            serde_json::json!({ "status": "stored", "remote_file": remote_file }),
        ))
    }
    .await;
    respond("photos_put", started, &request_id, result)
}

/// POST /photos/delete: body is a `Photo`.
pub async fn delete_photo(
    State(state): State<AppState>,
    axum::Json(photo): axum::Json<Photo>,
) -> Response {
    let started = Instant::now();
    let request_id = request_id();
    let result: Result<Response> = async {
        state.fs.delete_photo(&photo).await?;
        info!(request_id, photo = %photo.id, "photo deleted");
        Ok::<_, Error>(json_response(
            StatusCode::OK,
            serde_json::json!({ "status": "deleted", "id": photo.id }),
        ))
    }
    .await;
    respond("photos_delete", started, &request_id, result)
}

/// POST /photos/download: body is a `Photo`; responds with the original's bytes.
pub async fn download_photo(
    State(state): State<AppState>,
    axum::Json(photo): axum::Json<Photo>,
) -> Response {
    let started = Instant::now();
    let request_id = request_id();
    let result: Result<Response> = async {
        let local = state.fs.download_photo(&photo).await?;
        file_response(local).await
    }
    .await;
    respond("photos_download", started, &request_id, result)
}

/// GET /photos/{*remote_path}
pub async fn get_photo(
    State(state): State<AppState>,
    RoutePath(remote_path): RoutePath<String>,
) -> Response {
    let started = Instant::now();
    let request_id = request_id();
    let remote_file = format!("/{}", remote_path.trim_start_matches('/'));
    let result: Result<Response> = async {
        let local = state.fs.get_photo(&remote_file).await?;
        file_response(local).await
    }
    .await;
    respond("photos_get", started, &request_id, result)
}

fn date_taken(headers: &HeaderMap) -> Result<Option<i64>> {
    let Some(value) = headers.get(DATE_TAKEN_HEADER) else {
        return Ok(None);
    };
    value
        .to_str()
        .ok()
        .and_then(|v| v.trim().parse::<i64>().ok())
        .map(Some)
        .ok_or_else(|| {
            Error::InvalidRequest(format!("{DATE_TAKEN_HEADER} must be unix seconds"))
        })
}

fn spool_path(dir: &Path, remote_file: &str) -> PathBuf {
    let id = uuid::Uuid::new_v4().simple();
    match Path::new(remote_file).extension().and_then(|e| e.to_str()) {
        Some(ext) => dir.join(format!("upload-{id}.{ext}")),
        None => dir.join(format!("upload-{id}")),
    }
}

/// Read a temp file handed out by the backend, then remove it.
async fn file_response(local: PathBuf) -> Result<Response> {
    let bytes = tokio::fs::read(&local)
        .await
        .map_err(|e| Error::Io(format!("reading {}: {e}", local.display())));
    remove_temp(&local).await;
    let bytes = bytes?;
    debug!(bytes = bytes.len(), "serving photo");
    Ok((
        StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, "application/octet-stream")],
        bytes,
    )
        .into_response())
}

async fn remove_temp(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        warn!(path = %path.display(), error = %e, "failed to remove temp file");
    }
}
