//! Engine-native configuration objects.
//!
//! Settings snapshots are translated into these option structs by the
//! conversion adapter. Backend, device, and table-mode identifiers are
//! closed enums with an explicit fallback for unrecognized values, so a
//! bad identifier never hard-fails a job.

use std::time::Duration;

/// Supported OCR backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OcrBackend {
    EasyOcr,
    Tesseract,
    OcrMac,
    RapidOcr,
}

impl OcrBackend {
    /// Parse a backend identifier, falling back to EasyOCR for anything
    /// unrecognized.
    pub fn from_id(id: &str) -> Self {
        match id {
            "easyocr" => Self::EasyOcr,
            "tesseract" => Self::Tesseract,
            "ocrmac" => Self::OcrMac,
            "rapidocr" => Self::RapidOcr,
            other => {
                tracing::warn!("Unknown OCR backend '{}', defaulting to easyocr", other);
                Self::EasyOcr
            }
        }
    }

    pub fn id(&self) -> &'static str {
        match self {
            Self::EasyOcr => "easyocr",
            Self::Tesseract => "tesseract",
            Self::OcrMac => "ocrmac",
            Self::RapidOcr => "rapidocr",
        }
    }
}

/// Accelerator device selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AcceleratorDevice {
    #[default]
    Auto,
    Cpu,
    Cuda,
    Mps,
}

impl AcceleratorDevice {
    /// Parse a device identifier with an Auto fallback.
    pub fn from_id(id: &str) -> Self {
        match id {
            "auto" => Self::Auto,
            "cpu" => Self::Cpu,
            "cuda" => Self::Cuda,
            "mps" => Self::Mps,
            _ => Self::Auto,
        }
    }
}

/// Table structure recognition mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TableMode {
    Fast,
    #[default]
    Accurate,
}

impl TableMode {
    /// Parse a mode identifier with an Accurate fallback.
    pub fn from_id(id: &str) -> Self {
        match id {
            "fast" => Self::Fast,
            "accurate" => Self::Accurate,
            _ => Self::Accurate,
        }
    }
}

/// Map an ISO-ish language code to the EasyOCR-specific code. Unknown
/// codes fall back to English.
pub fn easyocr_language(code: &str) -> &'static str {
    match code {
        "en" => "en",
        "de" => "de",
        "fr" => "fr",
        "es" => "es",
        "it" => "it",
        "pt" => "pt",
        "nl" => "nl",
        "pl" => "pl",
        "ru" => "ru",
        "ja" => "ja",
        "zh" => "ch_sim",
        "zh-tw" => "ch_tra",
        "ko" => "ko",
        "ar" => "ar",
        "hi" => "hi",
        "th" => "th",
        "vi" => "vi",
        "tr" => "tr",
        "uk" => "uk",
        "cs" => "cs",
        "el" => "el",
        "he" => "he",
        "id" => "id",
        "ms" => "ms",
        "sv" => "sv",
        "da" => "da",
        "fi" => "fi",
        "no" => "no",
        _ => "en",
    }
}

/// Backend-specific OCR options
#[derive(Debug, Clone, PartialEq)]
pub enum OcrEngineOptions {
    EasyOcr {
        languages: Vec<String>,
        force_full_page_ocr: bool,
        use_gpu: bool,
        confidence_threshold: f32,
        bitmap_area_threshold: f32,
    },
    Tesseract {
        languages: Vec<String>,
        force_full_page_ocr: bool,
        bitmap_area_threshold: f32,
    },
    OcrMac {
        languages: Vec<String>,
        force_full_page_ocr: bool,
        bitmap_area_threshold: f32,
    },
    RapidOcr {
        languages: Vec<String>,
        force_full_page_ocr: bool,
        bitmap_area_threshold: f32,
    },
}

impl OcrEngineOptions {
    pub fn backend(&self) -> OcrBackend {
        match self {
            Self::EasyOcr { .. } => OcrBackend::EasyOcr,
            Self::Tesseract { .. } => OcrBackend::Tesseract,
            Self::OcrMac { .. } => OcrBackend::OcrMac,
            Self::RapidOcr { .. } => OcrBackend::RapidOcr,
        }
    }
}

/// Table structure options
#[derive(Debug, Clone, PartialEq)]
pub struct TableStructureOptions {
    pub mode: TableMode,
    pub do_cell_matching: bool,
}

/// Accelerator options
#[derive(Debug, Clone, PartialEq)]
pub struct AcceleratorOptions {
    pub num_threads: usize,
    pub device: AcceleratorDevice,
}

impl Default for AcceleratorOptions {
    fn default() -> Self {
        Self {
            num_threads: 4,
            device: AcceleratorDevice::Auto,
        }
    }
}

/// Enrichment passes the engine should run
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EnrichmentOptions {
    pub code: bool,
    pub formula: bool,
    pub picture_classification: bool,
    pub picture_description: bool,
}

/// Full pipeline configuration handed to the engine factory
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineOptions {
    pub do_ocr: bool,
    pub ocr: Option<OcrEngineOptions>,
    pub do_table_structure: bool,
    pub table_structure: Option<TableStructureOptions>,
    pub generate_page_images: bool,
    pub generate_picture_images: bool,
    pub generate_table_images: bool,
    pub images_scale: f32,
    pub enrichment: EnrichmentOptions,
    pub accelerator: AcceleratorOptions,
    pub document_timeout: Option<Duration>,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            do_ocr: true,
            ocr: None,
            do_table_structure: true,
            table_structure: None,
            generate_page_images: false,
            generate_picture_images: true,
            generate_table_images: true,
            images_scale: 1.0,
            enrichment: EnrichmentOptions::default(),
            accelerator: AcceleratorOptions::default(),
            document_timeout: None,
        }
    }
}
