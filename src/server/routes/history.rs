//! Conversion history endpoints

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::server::state::AppState;

/// Query parameters for listing history
#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default = "default_list_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
    #[serde(default)]
    pub status: Option<String>,
}

fn default_list_limit() -> usize {
    50
}

/// Query parameters for recent entries
#[derive(Debug, Deserialize)]
pub struct RecentQuery {
    #[serde(default = "default_recent_limit")]
    pub limit: usize,
}

fn default_recent_limit() -> usize {
    10
}

/// Query parameters for search
#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub q: String,
    #[serde(default = "default_search_limit")]
    pub limit: usize,
}

fn default_search_limit() -> usize {
    20
}

/// Request body for cleanup
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct CleanupRequest {
    pub days: Option<i64>,
    pub max_age_hours: Option<u64>,
}

/// GET /api/history - list entries with pagination and status filter
pub async fn list(
    State(state): State<AppState>,
    Query(params): Query<ListQuery>,
) -> Result<Json<Value>> {
    let limit = params.limit.clamp(1, 100);
    let entries = state
        .history()
        .list(limit, params.offset, params.status.as_deref())?;
    let count = entries.len();

    Ok(Json(json!({
        "entries": entries,
        "count": count,
        "limit": limit,
        "offset": params.offset,
    })))
}

/// GET /api/history/recent - most recent entries
pub async fn recent(
    State(state): State<AppState>,
    Query(params): Query<RecentQuery>,
) -> Result<Json<Value>> {
    let limit = params.limit.clamp(1, 50);
    let entries = state.history().recent(limit)?;
    let count = entries.len();

    Ok(Json(json!({
        "entries": entries,
        "count": count,
    })))
}

/// GET /api/history/:id - one entry
pub async fn get_entry(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>> {
    let entry = state
        .history()
        .get(id)?
        .ok_or_else(|| Error::JobNotFound(id.to_string()))?;
    Ok(Json(serde_json::to_value(entry)?))
}

/// DELETE /api/history/:id - delete an entry and its output files
pub async fn delete_entry(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>> {
    if state.history().get(id)?.is_none() {
        return Err(Error::JobNotFound(id.to_string()));
    }

    state.files().delete_output_dir(id);
    state.history().delete(id)?;

    Ok(Json(json!({
        "message": format!("History entry {} deleted", id),
        "job_id": id,
    })))
}

/// DELETE /api/history - clear all entries and their output files
pub async fn clear(State(state): State<AppState>) -> Result<Json<Value>> {
    let entries = state.history().list(1000, 0, None)?;
    for entry in &entries {
        state.files().delete_output_dir(entry.id);
    }
    let count = state.history().delete_all()?;

    Ok(Json(json!({
        "message": format!("Cleared {} history entries", count),
        "deleted_count": count,
    })))
}

/// GET /api/history/stats - conversion and storage statistics
pub async fn stats(State(state): State<AppState>) -> Result<Json<Value>> {
    let conversions = state.history().stats()?;
    let storage = state.files().storage_stats();

    Ok(Json(json!({
        "conversions": conversions,
        "storage": storage,
    })))
}

/// GET /api/history/search - search entries by filename
pub async fn search(
    State(state): State<AppState>,
    Query(params): Query<SearchQuery>,
) -> Result<Json<Value>> {
    if params.q.is_empty() {
        return Ok(Json(json!({
            "entries": [],
            "count": 0,
            "query": "",
        })));
    }

    let limit = params.limit.clamp(1, 50);
    let entries = state.history().search(&params.q, limit)?;
    let count = entries.len();

    Ok(Json(json!({
        "entries": entries,
        "count": count,
        "query": params.q,
    })))
}

/// POST /api/history/cleanup - purge old entries and stale files
pub async fn cleanup(
    State(state): State<AppState>,
    body: Option<Json<CleanupRequest>>,
) -> Result<Json<Value>> {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    let days = request.days.unwrap_or(30);
    let max_age_hours = request.max_age_hours.unwrap_or(24);

    let removed_ids = state.history().cleanup_old(days)?;
    for id in &removed_ids {
        state.files().delete_output_dir(*id);
    }

    let (uploads_deleted, outputs_deleted) = state
        .files()
        .cleanup_old(Duration::from_secs(max_age_hours * 3600));

    Ok(Json(json!({
        "message": "Cleanup completed",
        "results": {
            "history_entries_deleted": removed_ids.len(),
            "upload_files_deleted": uploads_deleted,
            "output_folders_deleted": outputs_deleted,
        },
    })))
}
