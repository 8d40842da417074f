//! Export endpoints: artifact downloads and JSON-wrapped content.

use axum::{
    extract::{Path, State},
    response::Response,
    Json,
};
use serde_json::{json, Value};
use std::path::PathBuf;
use uuid::Uuid;

use crate::conversion::JobStatus;
use crate::error::{Error, Result};
use crate::server::state::AppState;
use crate::settings::OUTPUT_FORMAT_IDS;

use super::send_file;

/// GET /api/export/:id/:format - download one export artifact
pub async fn download(
    State(state): State<AppState>,
    Path((id, format)): Path<(Uuid, String)>,
) -> Result<Response> {
    let path = resolve_artifact(&state, id, &format)?;
    let download_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("export")
        .to_string();

    send_file(&path, mime_for_format(&format), &download_name).await
}

/// GET /api/export/:id/:format/content - artifact content as JSON
pub async fn content(
    State(state): State<AppState>,
    Path((id, format)): Path<(Uuid, String)>,
) -> Result<Json<Value>> {
    let path = resolve_artifact(&state, id, &format)?;
    let content = tokio::fs::read_to_string(&path)
        .await
        .map_err(|_| Error::ArtifactNotFound(format!("format '{}' for job {}", format, id)))?;

    Ok(Json(json!({
        "job_id": id,
        "format": format,
        "content": content,
    })))
}

/// Resolve an artifact path, validating the format key first. Falls back
/// to scanning the on-disk output layout when the job has been evicted
/// from the registry.
fn resolve_artifact(state: &AppState, id: Uuid, format: &str) -> Result<PathBuf> {
    if !OUTPUT_FORMAT_IDS.contains(&format) {
        return Err(Error::invalid_input(format!(
            "Invalid format '{}'. Valid formats: {}",
            format,
            OUTPUT_FORMAT_IDS.join(", ")
        )));
    }

    if let Some(job) = state.registry().get(id) {
        if job.status != JobStatus::Completed {
            return Err(Error::invalid_input("Conversion not completed"));
        }
        return job
            .output_paths
            .get(format)
            .cloned()
            .ok_or_else(|| {
                Error::ArtifactNotFound(format!("format '{}' for job {}", format, id))
            });
    }

    state
        .files()
        .find_output(id, format)
        .ok_or_else(|| Error::JobNotFound(id.to_string()))
}

fn mime_for_format(format: &str) -> &'static str {
    match format {
        "markdown" => "text/markdown",
        "html" => "text/html",
        "json" | "document_tokens" | "chunks" => "application/json",
        _ => "text/plain",
    }
}
