use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path as AxumPath, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;

use dispatch_common::ids::TaskId;

use crate::layout::{sanitize_filename, task_file_path};
use crate::AppState;

/// GET /download/:task_id/:filename — serve a task input file (receptor or
/// a ligand) to a compute node. Unauthenticated: the wire-level password
/// only gates the command channel.
pub async fn download_handler(
    State(state): State<Arc<AppState>>,
    AxumPath((task_id, filename)): AxumPath<(String, String)>,
) -> impl IntoResponse {
    let task_id = match TaskId::parse(task_id) {
        Ok(id) => id,
        Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    };
    let filename = match sanitize_filename(&filename) {
        Ok(f) => f,
        Err(msg) => return (StatusCode::BAD_REQUEST, msg.to_string()).into_response(),
    };

    let path = task_file_path(&state.tasks_dir, task_id.as_str(), filename);

    match tokio::fs::read(&path).await {
        Ok(bytes) => {
            metrics::counter!("fileserver_downloads_total", "status" => "ok").increment(1);
            (StatusCode::OK, bytes).into_response()
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            metrics::counter!("fileserver_downloads_total", "status" => "not_found").increment(1);
            (StatusCode::NOT_FOUND, "file not found").into_response()
        }
        Err(e) => {
            tracing::warn!(error = %e, path = %path.display(), "failed to read file for download");
            metrics::counter!("fileserver_downloads_total", "status" => "error").increment(1);
            (StatusCode::INTERNAL_SERVER_ERROR, "failed to read file").into_response()
        }
    }
}

/// POST /upload/result/:task_id/:filename — accept a completed docking
/// result file from a compute node.
pub async fn upload_result_handler(
    State(state): State<Arc<AppState>>,
    AxumPath((task_id, filename)): AxumPath<(String, String)>,
    body: Bytes,
) -> impl IntoResponse {
    let task_id = match TaskId::parse(task_id) {
        Ok(id) => id,
        Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    };
    let filename = match sanitize_filename(&filename) {
        Ok(f) => f,
        Err(msg) => return (StatusCode::BAD_REQUEST, msg.to_string()).into_response(),
    };

    let dir = std::path::Path::new(&state.results_dir).join(task_id.as_str());
    if let Err(e) = tokio::fs::create_dir_all(&dir).await {
        tracing::warn!(error = %e, "failed to create results directory");
        return (StatusCode::INTERNAL_SERVER_ERROR, "failed to store result").into_response();
    }

    let path = dir.join(filename);
    match tokio::fs::write(&path, &body).await {
        Ok(()) => {
            metrics::counter!("fileserver_uploads_total", "status" => "ok").increment(1);
            (StatusCode::OK, "stored").into_response()
        }
        Err(e) => {
            tracing::warn!(error = %e, path = %path.display(), "failed to write uploaded result");
            metrics::counter!("fileserver_uploads_total", "status" => "error").increment(1);
            (StatusCode::INTERNAL_SERVER_ERROR, "failed to store result").into_response()
        }
    }
}
