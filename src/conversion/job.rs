//! Conversion job model

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::settings::ConversionSettings;

/// Job lifecycle status.
///
/// Transitions are `Pending -> Processing -> {Completed, Failed}`; the
/// terminal states are never left.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

/// An image extracted from the document, materialized on disk
#[derive(Debug, Clone, Serialize)]
pub struct ExtractedImage {
    /// 1-based identifier scoped to the job
    pub id: usize,
    pub filename: String,
    pub path: PathBuf,
    pub caption: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

/// A table extracted from the document, materialized as CSV (and
/// optionally a rendered image)
#[derive(Debug, Clone, Serialize)]
pub struct ExtractedTable {
    /// 1-based identifier scoped to the job
    pub id: usize,
    pub caption: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub rows: Vec<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub csv_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_path: Option<PathBuf>,
}

/// A token-bounded chunk generated for RAG applications
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocChunk {
    /// 1-based identifier scoped to the job
    pub id: usize,
    pub text: String,
    pub headings: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<usize>,
}

/// Structured summary attached to a completed job
#[derive(Debug, Clone, Serialize)]
pub struct JobSummary {
    pub markdown_preview: String,
    pub formats_available: Vec<String>,
    pub page_count: usize,
    pub images_count: usize,
    pub tables_count: usize,
    pub chunks_count: usize,
    pub warnings: Vec<String>,
}

/// One submitted conversion request and its mutable lifecycle state.
///
/// After creation a job is mutated only by the worker executing it; a
/// polling caller always reads a cloned snapshot from the registry.
#[derive(Debug, Clone)]
pub struct ConversionJob {
    pub id: Uuid,
    pub input_path: PathBuf,
    pub original_filename: String,
    /// Immutable settings snapshot; a new snapshot is a new value
    pub settings: ConversionSettings,
    pub status: JobStatus,
    pub progress: u8,
    pub message: String,
    pub confidence: Option<f32>,
    pub error: Option<String>,
    pub summary: Option<JobSummary>,
    /// Output format key -> artifact path
    pub output_paths: BTreeMap<String, PathBuf>,
    pub images: Vec<ExtractedImage>,
    pub tables: Vec<ExtractedTable>,
    pub chunks: Vec<DocChunk>,
    pub page_count: usize,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ConversionJob {
    pub fn new(
        id: Uuid,
        input_path: PathBuf,
        original_filename: String,
        settings: ConversionSettings,
    ) -> Self {
        Self {
            id,
            input_path,
            original_filename,
            settings,
            status: JobStatus::Pending,
            progress: 0,
            message: "Queued for processing".to_string(),
            confidence: None,
            error: None,
            summary: None,
            output_paths: BTreeMap::new(),
            images: Vec::new(),
            tables: Vec::new(),
            chunks: Vec::new(),
            page_count: 0,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    /// File stem used for export artifact names
    pub fn output_stem(&self) -> String {
        std::path::Path::new(&self.original_filename)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("document")
            .to_string()
    }
}
