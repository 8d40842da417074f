//! API routes for the conversion server

pub mod convert;
pub mod export;
pub mod history;
pub mod settings;

use axum::{
    extract::DefaultBodyLimit,
    http::header,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use std::path::Path;

use crate::error::{Error, Result};
use crate::server::state::AppState;
use crate::storage::ALLOWED_EXTENSIONS;

/// Build all API routes
pub fn api_routes(max_upload_size: usize) -> Router<AppState> {
    Router::new()
        // Conversion - with larger body limit for file uploads
        .route(
            "/convert",
            post(convert::convert).layer(DefaultBodyLimit::max(max_upload_size)),
        )
        .route(
            "/convert/batch",
            post(convert::convert_batch).layer(DefaultBodyLimit::max(max_upload_size)),
        )
        .route("/convert/url", post(convert::convert_url))
        // Job status and artifacts
        .route("/convert/:id/status", get(convert::status))
        .route("/convert/:id/result", get(convert::result))
        .route("/convert/:id/images", get(convert::list_images))
        .route("/convert/:id/images/:image_id", get(convert::download_image))
        .route("/convert/:id/tables", get(convert::list_tables))
        .route("/convert/:id/tables/:table_id/csv", get(convert::download_table_csv))
        .route(
            "/convert/:id/tables/:table_id/image",
            get(convert::download_table_image),
        )
        .route("/convert/:id/chunks", get(convert::list_chunks))
        .route("/convert/:id", delete(convert::delete_job))
        // Exports
        .route("/export/:id/:format", get(export::download))
        .route("/export/:id/:format/content", get(export::content))
        // Settings
        .route(
            "/settings",
            get(settings::get_settings).put(settings::update_settings),
        )
        .route("/settings/reset", post(settings::reset_settings))
        .route("/settings/options", get(settings::options))
        // History
        .route("/history", get(history::list).delete(history::clear))
        .route("/history/recent", get(history::recent))
        .route("/history/stats", get(history::stats))
        .route("/history/search", get(history::search))
        .route("/history/cleanup", post(history::cleanup))
        .route(
            "/history/:id",
            get(history::get_entry).delete(history::delete_entry),
        )
        // Info
        .route("/health", get(health))
        .route("/formats", get(formats))
}

/// GET /api/health
async fn health(
    axum::extract::State(state): axum::extract::State<AppState>,
) -> Json<serde_json::Value> {
    let jobs = state.registry().stats();
    Json(serde_json::json!({
        "status": "healthy",
        "service": "docmill",
        "version": env!("CARGO_PKG_VERSION"),
        "jobs": jobs,
        "queued": state.scheduler().queued_jobs(),
        "worker_slots": state.scheduler().max_concurrent_jobs(),
    }))
}

/// GET /api/formats - supported input and output formats
async fn formats() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "input_formats": [
            {"id": "pdf", "name": "PDF Document", "extensions": [".pdf"]},
            {"id": "docx", "name": "Microsoft Word", "extensions": [".docx"]},
            {"id": "pptx", "name": "PowerPoint", "extensions": [".pptx"]},
            {"id": "xlsx", "name": "Excel Spreadsheet", "extensions": [".xlsx"]},
            {"id": "html", "name": "HTML", "extensions": [".html", ".htm"]},
            {"id": "md", "name": "Markdown", "extensions": [".md", ".markdown"]},
            {"id": "csv", "name": "CSV", "extensions": [".csv"]},
            {"id": "text", "name": "Plain Text", "extensions": [".txt"]},
            {"id": "image", "name": "Image", "extensions": [".png", ".jpg", ".jpeg", ".tiff", ".tif", ".gif", ".webp", ".bmp"]},
            {"id": "audio", "name": "Audio", "extensions": [".wav", ".mp3"]},
            {"id": "vtt", "name": "WebVTT", "extensions": [".vtt"]},
            {"id": "xml", "name": "XML", "extensions": [".xml"]},
            {"id": "asciidoc", "name": "AsciiDoc", "extensions": [".asciidoc", ".adoc"]},
        ],
        "output_formats": [
            {"id": "markdown", "name": "Markdown", "extension": ".md"},
            {"id": "html", "name": "HTML", "extension": ".html"},
            {"id": "json", "name": "JSON", "extension": ".json"},
            {"id": "text", "name": "Plain Text", "extension": ".txt"},
            {"id": "doctags", "name": "DocTags", "extension": ".doctags"},
            {"id": "document_tokens", "name": "Document Tokens", "extension": ".tokens.json"},
        ],
        "allowed_extensions": ALLOWED_EXTENSIONS,
    }))
}

/// Stream a file as an attachment download
pub(crate) async fn send_file(path: &Path, mime: &str, download_name: &str) -> Result<Response> {
    let data = tokio::fs::read(path)
        .await
        .map_err(|_| Error::ArtifactNotFound(download_name.to_string()))?;

    Ok((
        [
            (header::CONTENT_TYPE, mime.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", download_name),
            ),
        ],
        data,
    )
        .into_response())
}
