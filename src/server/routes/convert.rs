//! Conversion endpoints: upload, batch upload, URL ingestion, job
//! status and artifact listings.

use axum::{
    extract::{Multipart, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::conversion::{ConversionJob, JobStatus};
use crate::error::{Error, Result};
use crate::server::state::AppState;
use crate::settings::parse_overrides;
use crate::storage::{detect_input_format, FileManager};

use super::send_file;

/// Response for a submitted conversion
#[derive(Debug, Serialize)]
pub struct ConvertResponse {
    pub job_id: Uuid,
    pub filename: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_format: Option<String>,
    pub status: String,
    pub message: String,
}

/// One entry in a batch submission response
#[derive(Debug, Serialize)]
pub struct BatchItem {
    pub filename: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_format: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Status poll response
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub job_id: Uuid,
    pub status: String,
    pub progress: u8,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub formats_available: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub images_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tables_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunks_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preview: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Longest preview returned by the status endpoint
const STATUS_PREVIEW_LIMIT: usize = 1000;

impl StatusResponse {
    fn from_job(job: &ConversionJob) -> Self {
        let mut response = Self {
            job_id: job.id,
            status: job.status.as_str().to_string(),
            progress: job.progress,
            message: job.message.clone(),
            confidence: None,
            formats_available: None,
            images_count: None,
            tables_count: None,
            chunks_count: None,
            preview: None,
            page_count: None,
            error: None,
        };

        match job.status {
            JobStatus::Completed => {
                response.confidence = job.confidence;
                response.formats_available =
                    Some(job.output_paths.keys().cloned().collect());
                response.images_count = Some(job.images.len());
                response.tables_count = Some(job.tables.len());
                response.chunks_count = Some(job.chunks.len());
                if let Some(summary) = &job.summary {
                    let mut preview = summary.markdown_preview.clone();
                    if preview.len() > STATUS_PREVIEW_LIMIT {
                        let mut cut = STATUS_PREVIEW_LIMIT;
                        while cut > 0 && !preview.is_char_boundary(cut) {
                            cut -= 1;
                        }
                        preview.truncate(cut);
                    }
                    response.preview = Some(preview);
                    response.page_count = Some(summary.page_count);
                }
            }
            JobStatus::Failed => {
                response.error = job.error.clone();
            }
            _ => {}
        }

        response
    }
}

/// Pull the uploaded file fields and the optional settings override out
/// of a multipart body.
async fn read_multipart(
    multipart: &mut Multipart,
) -> Result<(Vec<(String, Bytes)>, Value)> {
    let mut files = Vec::new();
    let mut overrides = Value::Object(Default::default());

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| Error::invalid_input(format!("Failed to read multipart field: {}", e)))?
    {
        let name = field.name().unwrap_or("").to_string();
        if name == "settings" {
            let raw = field
                .text()
                .await
                .map_err(|e| Error::invalid_input(format!("Failed to read settings: {}", e)))?;
            // Malformed overrides fall back to the persisted layer
            overrides = parse_overrides(Some(&raw));
            continue;
        }

        let Some(filename) = field.file_name().map(|s| s.to_string()) else {
            continue;
        };
        if filename.is_empty() {
            continue;
        }
        let data = field
            .bytes()
            .await
            .map_err(|e| Error::invalid_input(format!("Failed to read file {}: {}", filename, e)))?;
        files.push((filename, data));
    }

    Ok((files, overrides))
}

/// POST /api/convert - upload a document and start conversion
pub async fn convert(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<ConvertResponse>)> {
    let (files, overrides) = read_multipart(&mut multipart).await?;
    let (filename, data) = files
        .into_iter()
        .next()
        .ok_or_else(|| Error::invalid_input("No file provided"))?;

    if !FileManager::is_allowed(&filename) {
        return Err(Error::UnsupportedFileType(filename));
    }

    let settings = state.resolve_request_settings(&overrides);
    let saved = state.files().save_upload(&data, &filename)?;
    let job_id = state.submit_conversion(
        None,
        saved.path,
        filename.clone(),
        &saved.safe_filename,
        saved.size,
        settings,
    )?;

    Ok((
        StatusCode::ACCEPTED,
        Json(ConvertResponse {
            job_id,
            input_format: detect_input_format(&filename).map(String::from),
            filename,
            status: "pending".to_string(),
            message: "Conversion started".to_string(),
        }),
    ))
}

/// POST /api/convert/batch - upload several documents at once.
/// Disallowed files are rejected per-file; the rest still convert.
pub async fn convert_batch(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<Value>)> {
    let (files, overrides) = read_multipart(&mut multipart).await?;
    if files.is_empty() {
        return Err(Error::invalid_input("No files provided"));
    }

    let settings = state.resolve_request_settings(&overrides);
    let mut jobs = Vec::new();

    for (filename, data) in files {
        if !FileManager::is_allowed(&filename) {
            jobs.push(BatchItem {
                filename,
                status: "rejected".to_string(),
                job_id: None,
                input_format: None,
                error: Some("File type not allowed".to_string()),
            });
            continue;
        }

        let submitted = state
            .files()
            .save_upload(&data, &filename)
            .and_then(|saved| {
                state.submit_conversion(
                    None,
                    saved.path,
                    filename.clone(),
                    &saved.safe_filename,
                    saved.size,
                    settings.clone(),
                )
            });

        match submitted {
            Ok(job_id) => jobs.push(BatchItem {
                input_format: detect_input_format(&filename).map(String::from),
                filename,
                status: "pending".to_string(),
                job_id: Some(job_id),
                error: None,
            }),
            Err(e) => jobs.push(BatchItem {
                filename,
                status: "rejected".to_string(),
                job_id: None,
                input_format: None,
                error: Some(e.to_string()),
            }),
        }
    }

    let started = jobs.iter().filter(|j| j.status == "pending").count();
    let total = jobs.len();
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "jobs": jobs,
            "total": total,
            "message": format!("Started {} conversions", started),
        })),
    ))
}

/// Request body for URL-based ingestion
#[derive(Debug, Deserialize)]
pub struct ConvertUrlRequest {
    pub url: String,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub settings: Option<Value>,
}

/// POST /api/convert/url - fetch a document by URL and convert it.
/// The job identity is allocated before the job exists so the staged
/// download is associated with it from the start.
pub async fn convert_url(
    State(state): State<AppState>,
    Json(request): Json<ConvertUrlRequest>,
) -> Result<(StatusCode, Json<ConvertResponse>)> {
    let url = request.url.trim();
    if url.is_empty() {
        return Err(Error::invalid_input("URL must not be empty"));
    }

    let filename = request
        .filename
        .clone()
        .filter(|f| !f.trim().is_empty())
        .or_else(|| {
            url.rsplit('/')
                .next()
                .map(|segment| segment.split(['?', '#']).next().unwrap_or("").to_string())
                .filter(|s| s.contains('.'))
        })
        .ok_or_else(|| {
            Error::invalid_input("Could not derive a filename from the URL; pass one explicitly")
        })?;

    if !FileManager::is_allowed(&filename) {
        return Err(Error::UnsupportedFileType(filename));
    }

    let job_id = Uuid::new_v4();
    tracing::info!("Fetching {} for job {}", url, job_id);
    let response = reqwest::get(url).await?.error_for_status()?;
    let data = response.bytes().await?;

    let overrides = request
        .settings
        .unwrap_or(Value::Object(Default::default()));
    let settings = state.resolve_request_settings(&overrides);
    let saved = state.files().save_upload(&data, &filename)?;
    state.submit_conversion(
        Some(job_id),
        saved.path,
        filename.clone(),
        &saved.safe_filename,
        saved.size,
        settings,
    )?;

    Ok((
        StatusCode::ACCEPTED,
        Json(ConvertResponse {
            job_id,
            input_format: detect_input_format(&filename).map(String::from),
            filename,
            status: "pending".to_string(),
            message: "Conversion started".to_string(),
        }),
    ))
}

/// GET /api/convert/:id/status - poll job status.
/// Falls back to the history store when the job has been evicted from
/// the in-memory registry.
pub async fn status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<StatusResponse>> {
    if let Some(job) = state.registry().get(id) {
        return Ok(Json(StatusResponse::from_job(&job)));
    }

    if let Some(entry) = state.history().get(id)? {
        let completed = entry.status == "completed";
        let formats: Vec<String> = state
            .files()
            .available_formats(id)
            .into_iter()
            .map(|(key, _)| key)
            .collect();

        return Ok(Json(StatusResponse {
            job_id: id,
            status: entry.status.clone(),
            progress: if completed { 100 } else { 0 },
            message: if completed {
                "Conversion completed".to_string()
            } else {
                "Conversion failed".to_string()
            },
            confidence: entry.confidence.map(|c| c as f32),
            formats_available: (!formats.is_empty()).then_some(formats),
            images_count: None,
            tables_count: None,
            chunks_count: None,
            preview: None,
            page_count: None,
            error: entry.error_message,
        }));
    }

    Err(Error::JobNotFound(id.to_string()))
}

/// GET /api/convert/:id/result - full result of a completed conversion
pub async fn result(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Response> {
    if let Some(job) = state.registry().get(id) {
        if job.status != JobStatus::Completed {
            return Ok(not_yet_completed(id, &job));
        }

        return Ok(Json(json!({
            "job_id": job.id,
            "status": "completed",
            "confidence": job.confidence,
            "formats_available": job.output_paths.keys().collect::<Vec<_>>(),
            "result": job.summary,
            "images_count": job.images.len(),
            "tables_count": job.tables.len(),
            "chunks_count": job.chunks.len(),
            "completed_at": job.completed_at.map(|t| t.to_rfc3339()),
        }))
        .into_response());
    }

    if let Some(entry) = state.history().get(id)? {
        let formats: Vec<String> = state
            .files()
            .available_formats(id)
            .into_iter()
            .map(|(key, _)| key)
            .collect();
        return Ok(Json(json!({
            "job_id": id,
            "status": entry.status,
            "confidence": entry.confidence,
            "formats_available": formats,
            "error": entry.error_message,
            "completed_at": entry.completed_at.map(|t| t.to_rfc3339()),
        }))
        .into_response());
    }

    Err(Error::JobNotFound(id.to_string()))
}

/// GET /api/convert/:id/images - extracted image descriptors
pub async fn list_images(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response> {
    let job = require_job(&state, id)?;
    if job.status != JobStatus::Completed {
        return Ok(not_yet_completed(id, &job));
    }

    let count = job.images.len();
    Ok(Json(json!({
        "job_id": id,
        "images": job.images,
        "count": count,
    }))
    .into_response())
}

/// GET /api/convert/:id/images/:image_id - download one extracted image
pub async fn download_image(
    State(state): State<AppState>,
    Path((id, image_id)): Path<(Uuid, usize)>,
) -> Result<Response> {
    let job = require_completed(&state, id)?;
    let image = job
        .images
        .iter()
        .find(|img| img.id == image_id)
        .ok_or_else(|| Error::ArtifactNotFound(format!("image {} of job {}", image_id, id)))?;

    let mime = mime_guess::from_path(&image.path)
        .first_or_octet_stream()
        .to_string();
    send_file(&image.path, &mime, &image.filename).await
}

/// GET /api/convert/:id/tables - extracted table descriptors
pub async fn list_tables(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response> {
    let job = require_job(&state, id)?;
    if job.status != JobStatus::Completed {
        return Ok(not_yet_completed(id, &job));
    }

    let count = job.tables.len();
    Ok(Json(json!({
        "job_id": id,
        "tables": job.tables,
        "count": count,
    }))
    .into_response())
}

/// GET /api/convert/:id/tables/:table_id/csv - download one table as CSV
pub async fn download_table_csv(
    State(state): State<AppState>,
    Path((id, table_id)): Path<(Uuid, usize)>,
) -> Result<Response> {
    let job = require_completed(&state, id)?;
    let table = job
        .tables
        .iter()
        .find(|t| t.id == table_id)
        .ok_or_else(|| Error::ArtifactNotFound(format!("table {} of job {}", table_id, id)))?;
    let path = table
        .csv_path
        .as_ref()
        .ok_or_else(|| Error::ArtifactNotFound(format!("CSV for table {}", table_id)))?;

    send_file(path, "text/csv", &format!("table_{}.csv", table_id)).await
}

/// GET /api/convert/:id/tables/:table_id/image - rendered table image
pub async fn download_table_image(
    State(state): State<AppState>,
    Path((id, table_id)): Path<(Uuid, usize)>,
) -> Result<Response> {
    let job = require_completed(&state, id)?;
    let table = job
        .tables
        .iter()
        .find(|t| t.id == table_id)
        .ok_or_else(|| Error::ArtifactNotFound(format!("table {} of job {}", table_id, id)))?;
    let path = table
        .image_path
        .as_ref()
        .ok_or_else(|| Error::ArtifactNotFound(format!("image for table {}", table_id)))?;

    send_file(path, "image/png", &format!("table_{}.png", table_id)).await
}

/// GET /api/convert/:id/chunks - RAG chunks
pub async fn list_chunks(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response> {
    let job = require_job(&state, id)?;
    if job.status != JobStatus::Completed {
        return Ok(not_yet_completed(id, &job));
    }

    let count = job.chunks.len();
    Ok(Json(json!({
        "job_id": id,
        "chunks": job.chunks,
        "count": count,
    }))
    .into_response())
}

/// DELETE /api/convert/:id - remove a job, its artifacts, and its
/// history row. A conversion already dispatched keeps running.
pub async fn delete_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>> {
    state.delete_job(id)?;
    Ok(Json(json!({
        "message": format!("Job {} deleted", id),
        "job_id": id,
    })))
}

fn require_job(state: &AppState, id: Uuid) -> Result<ConversionJob> {
    state
        .registry()
        .get(id)
        .ok_or_else(|| Error::JobNotFound(id.to_string()))
}

fn require_completed(state: &AppState, id: Uuid) -> Result<ConversionJob> {
    let job = require_job(state, id)?;
    if job.status != JobStatus::Completed {
        return Err(Error::invalid_input("Conversion not completed"));
    }
    Ok(job)
}

fn not_yet_completed(id: Uuid, job: &ConversionJob) -> Response {
    (
        StatusCode::ACCEPTED,
        Json(json!({
            "job_id": id,
            "status": job.status.as_str(),
            "message": "Conversion not yet completed",
        })),
    )
        .into_response()
}
