//! Conversion engine seam.
//!
//! The document understanding itself (layout analysis, OCR, table
//! structure recognition) is performed by an engine behind these traits.
//! The backend only configures engines, invokes them, and post-processes
//! their results; it never reimplements any of that logic.

pub mod basic;
pub mod document;
pub mod options;

use std::path::Path;
use std::sync::Arc;

use thiserror::Error;

pub use document::{DocItem, EngineDocument, PictureItem, TableItem};
pub use options::{
    AcceleratorDevice, AcceleratorOptions, EnrichmentOptions, OcrBackend, OcrEngineOptions,
    PipelineOptions, TableMode, TableStructureOptions,
};

/// Result type alias for engine operations
pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Errors raised by a conversion engine
#[derive(Debug, Error)]
pub enum EngineError {
    /// Engine pipeline failure; the message is matched against the
    /// OCR/accelerator indicators for the degraded-mode retry.
    #[error("{0}")]
    Pipeline(String),

    /// Input format the engine cannot handle
    #[error("Unsupported input format: {0}")]
    UnsupportedFormat(String),

    /// IO error reading the input
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Tri-state engine outcome, distinct from errors: a partial success is a
/// finished conversion with warnings attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversionOutcome {
    Success,
    PartialSuccess,
    Failure,
}

/// A nested layout prediction with an optional confidence score
#[derive(Debug, Clone, Default)]
pub struct LayoutCluster {
    pub label: String,
    pub confidence: Option<f32>,
    pub children: Vec<LayoutCluster>,
}

/// A single OCR cell prediction
#[derive(Debug, Clone)]
pub struct OcrCell {
    pub text: String,
    pub confidence: Option<f32>,
}

/// Per-page predictions attached to an engine result
#[derive(Debug, Clone, Default)]
pub struct PageRecord {
    pub index: usize,
    pub confidence: Option<f32>,
    pub layout: Vec<LayoutCluster>,
    pub ocr_cells: Vec<OcrCell>,
}

/// Complete result of one engine invocation
#[derive(Debug, Clone)]
pub struct ConversionOutput {
    pub outcome: ConversionOutcome,
    pub document: EngineDocument,
    pub pages: Vec<PageRecord>,
    pub warnings: Vec<String>,
}

impl ConversionOutput {
    /// Success with no page predictions (text-like inputs)
    pub fn success(document: EngineDocument) -> Self {
        let pages = (1..=document.page_count.max(1))
            .map(|index| PageRecord {
                index,
                ..Default::default()
            })
            .collect();
        Self {
            outcome: ConversionOutcome::Success,
            document,
            pages,
            warnings: Vec::new(),
        }
    }
}

/// A configured engine instance, ready to convert documents.
///
/// `convert` blocks for the full duration of the conversion (potentially
/// minutes for large documents); callers run it on a blocking thread.
/// The engine enforces its own `document_timeout` when one is configured.
pub trait ConversionEngine: Send + Sync {
    fn convert(&self, input: &Path) -> EngineResult<ConversionOutput>;
}

/// Creates configured engine instances. Instantiation is expensive, so
/// callers cache the returned instances keyed by their settings.
pub trait EngineFactory: Send + Sync {
    fn create(&self, options: &PipelineOptions) -> EngineResult<Arc<dyn ConversionEngine>>;
}
