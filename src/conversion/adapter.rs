//! Conversion adapter: settings snapshot -> engine configuration ->
//! engine invocation, with the degraded-mode OCR retry.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::engine::{
    AcceleratorDevice, AcceleratorOptions, ConversionEngine, ConversionOutput, EngineFactory,
    EnrichmentOptions, OcrBackend, OcrEngineOptions, PipelineOptions, TableMode,
    TableStructureOptions,
};
use crate::engine::options::easyocr_language;
use crate::error::{Error, Result};
use crate::settings::ConversionSettings;

/// Error-message fragments that identify an OCR or accelerator failure.
/// A first conversion attempt failing with one of these is retried with
/// OCR disabled instead of failing the job.
const OCR_ERROR_INDICATORS: &[&str] = &[
    "meta tensor",
    "easyocr",
    "tesseract",
    "ocrmac",
    "rapidocr",
    "ocr",
    "no module named",
    "cannot import",
    "cuda",
    "gpu",
];

fn is_ocr_error(message: &str) -> bool {
    let lowered = message.to_lowercase();
    OCR_ERROR_INDICATORS.iter().any(|i| lowered.contains(i))
}

/// Result of an adapter invocation
#[derive(Debug)]
pub struct AdapterOutcome {
    pub output: ConversionOutput,
    /// True when the result came from the OCR-disabled retry
    pub degraded: bool,
}

/// Translates settings snapshots into engine configuration and invokes
/// the engine, caching configured instances by settings hash (engine
/// instantiation is expensive and most jobs share a handful of presets).
pub struct ConversionAdapter {
    factory: Arc<dyn EngineFactory>,
    // Append-only: entries are never evicted. Bounded in practice by the
    // number of distinct settings presets a deployment uses.
    engines: Mutex<HashMap<String, Arc<dyn ConversionEngine>>>,
}

impl ConversionAdapter {
    pub fn new(factory: Arc<dyn EngineFactory>) -> Self {
        Self {
            factory,
            engines: Mutex::new(HashMap::new()),
        }
    }

    /// Build engine-native pipeline options from a settings snapshot.
    pub fn pipeline_options(settings: &ConversionSettings) -> PipelineOptions {
        let ocr_enabled = settings.ocr.enabled;
        let table_enabled = settings.tables.enabled;

        PipelineOptions {
            do_ocr: ocr_enabled,
            ocr: ocr_enabled.then(|| ocr_options(settings)),
            do_table_structure: table_enabled,
            table_structure: table_enabled.then(|| TableStructureOptions {
                mode: TableMode::from_id(&settings.tables.mode),
                do_cell_matching: settings.tables.do_cell_matching,
            }),
            generate_page_images: settings.images.generate_page_images,
            generate_picture_images: settings.images.generate_picture_images,
            generate_table_images: settings.images.generate_table_images,
            images_scale: settings.images.images_scale,
            enrichment: EnrichmentOptions {
                code: settings.enrichment.code,
                formula: settings.enrichment.formula,
                picture_classification: settings.enrichment.picture_classification,
                picture_description: settings.enrichment.picture_description,
            },
            accelerator: AcceleratorOptions {
                num_threads: settings.performance.num_threads,
                device: AcceleratorDevice::from_id(&settings.performance.device),
            },
            document_timeout: settings
                .performance
                .document_timeout
                .map(Duration::from_secs_f64),
        }
    }

    /// Get or create a configured engine for the snapshot.
    fn engine_for(&self, settings: &ConversionSettings) -> Result<Arc<dyn ConversionEngine>> {
        let key = settings.settings_hash();
        if let Some(engine) = self.engines.lock().get(&key) {
            return Ok(engine.clone());
        }

        let options = Self::pipeline_options(settings);
        let engine = self
            .factory
            .create(&options)
            .map_err(|e| Error::conversion(e.to_string()))?;

        self.engines.lock().insert(key, engine.clone());
        Ok(engine)
    }

    /// Convert a document, retrying once without OCR when the failure
    /// matches the OCR/accelerator pattern. Any other error, or a retry
    /// failure, propagates with the original message.
    pub fn convert(&self, input: &Path, settings: &ConversionSettings) -> Result<AdapterOutcome> {
        let first_attempt = self
            .engine_for(settings)
            .and_then(|engine| engine.convert(input).map_err(|e| Error::conversion(e.to_string())));

        let original_error = match first_attempt {
            Ok(output) => {
                return Ok(AdapterOutcome {
                    output,
                    degraded: false,
                })
            }
            Err(e) => e.to_string(),
        };

        if settings.ocr.enabled && is_ocr_error(&original_error) {
            tracing::warn!("OCR error detected, retrying without OCR: {}", original_error);
            let fallback = settings.without_ocr();
            let retry = self
                .engine_for(&fallback)
                .and_then(|engine| engine.convert(input).map_err(|e| Error::conversion(e.to_string())));

            if let Ok(output) = retry {
                return Ok(AdapterOutcome {
                    output,
                    degraded: true,
                });
            }
            tracing::error!("Fallback conversion without OCR also failed");
        }

        Err(Error::Conversion(original_error))
    }
}

fn ocr_options(settings: &ConversionSettings) -> OcrEngineOptions {
    let ocr = &settings.ocr;
    let languages = vec![ocr.language.clone()];

    match OcrBackend::from_id(&ocr.backend) {
        OcrBackend::EasyOcr => OcrEngineOptions::EasyOcr {
            languages: vec![easyocr_language(&ocr.language).to_string()],
            force_full_page_ocr: ocr.force_full_page_ocr,
            use_gpu: ocr.use_gpu,
            confidence_threshold: ocr.confidence_threshold,
            bitmap_area_threshold: ocr.bitmap_area_threshold,
        },
        OcrBackend::Tesseract => OcrEngineOptions::Tesseract {
            languages,
            force_full_page_ocr: ocr.force_full_page_ocr,
            bitmap_area_threshold: ocr.bitmap_area_threshold,
        },
        OcrBackend::OcrMac => OcrEngineOptions::OcrMac {
            languages,
            force_full_page_ocr: ocr.force_full_page_ocr,
            bitmap_area_threshold: ocr.bitmap_area_threshold,
        },
        OcrBackend::RapidOcr => OcrEngineOptions::RapidOcr {
            languages,
            force_full_page_ocr: ocr.force_full_page_ocr,
            bitmap_area_threshold: ocr.bitmap_area_threshold,
        },
    }
}
