//! Conversion settings: defaults, layered resolution, and the persisted
//! user-settings store.
//!
//! A settings snapshot is resolved once per job by deep-merging three
//! layers (hardcoded defaults < persisted user settings < per-request
//! overrides) and is never mutated afterwards.

use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// Fully-resolved settings snapshot governing one conversion job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ConversionSettings {
    pub ocr: OcrSettings,
    pub tables: TableSettings,
    pub images: ImageSettings,
    pub enrichment: EnrichmentSettings,
    pub performance: PerformanceSettings,
    pub chunking: ChunkingSettings,
    pub output: OutputSettings,
}

/// OCR settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrSettings {
    pub enabled: bool,
    pub language: String,
    /// Backend identifier: easyocr, tesseract, ocrmac, rapidocr
    pub backend: String,
    pub force_full_page_ocr: bool,
    pub use_gpu: bool,
    pub confidence_threshold: f32,
    pub bitmap_area_threshold: f32,
}

impl Default for OcrSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            language: "en".to_string(),
            backend: "easyocr".to_string(),
            force_full_page_ocr: false,
            use_gpu: false,
            confidence_threshold: 0.5,
            bitmap_area_threshold: 0.05,
        }
    }
}

/// Table extraction settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TableSettings {
    pub enabled: bool,
    pub structure_extraction: bool,
    /// Table structure mode: fast or accurate
    pub mode: String,
    pub do_cell_matching: bool,
}

impl Default for TableSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            structure_extraction: true,
            mode: "accurate".to_string(),
            do_cell_matching: true,
        }
    }
}

/// Image handling settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageSettings {
    pub extract: bool,
    pub classify: bool,
    pub generate_page_images: bool,
    pub generate_picture_images: bool,
    pub generate_table_images: bool,
    pub images_scale: f32,
}

impl Default for ImageSettings {
    fn default() -> Self {
        Self {
            extract: true,
            classify: true,
            generate_page_images: false,
            generate_picture_images: true,
            generate_table_images: true,
            images_scale: 1.0,
        }
    }
}

/// Optional enrichment passes performed by the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct EnrichmentSettings {
    pub code: bool,
    pub formula: bool,
    pub picture_classification: bool,
    pub picture_description: bool,
}

/// Performance / accelerator settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceSettings {
    /// Device identifier: auto, cpu, cuda, mps
    pub device: String,
    pub num_threads: usize,
    /// Maximum engine processing time in seconds (None = no limit)
    pub document_timeout: Option<f64>,
}

impl Default for PerformanceSettings {
    fn default() -> Self {
        Self {
            device: "auto".to_string(),
            num_threads: 4,
            document_timeout: None,
        }
    }
}

/// RAG chunking settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingSettings {
    pub enabled: bool,
    pub max_tokens: usize,
    pub merge_peers: bool,
}

impl Default for ChunkingSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            max_tokens: 512,
            merge_peers: true,
        }
    }
}

/// Output format settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputSettings {
    pub default_format: String,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            default_format: "markdown".to_string(),
        }
    }
}

impl ConversionSettings {
    /// Stable hash of the snapshot, used to key cached engine instances.
    pub fn settings_hash(&self) -> String {
        // Struct field order is fixed, so serialization is canonical.
        let encoded = serde_json::to_vec(self).unwrap_or_default();
        let digest = Sha256::digest(&encoded);
        hex::encode(digest)
    }

    /// Derive a snapshot with OCR forced off (degraded-mode retry).
    pub fn without_ocr(&self) -> Self {
        let mut derived = self.clone();
        derived.ocr.enabled = false;
        derived
    }
}

/// Deep-merge `updates` into `base`: nested objects recurse, everything
/// else (scalars, arrays) is replaced by the override value.
pub fn deep_merge(base: &mut Value, updates: &Value) {
    match (base, updates) {
        (Value::Object(base_map), Value::Object(update_map)) => {
            for (key, value) in update_map {
                match base_map.get_mut(key) {
                    Some(existing) if existing.is_object() && value.is_object() => {
                        deep_merge(existing, value);
                    }
                    _ => {
                        base_map.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (base, updates) => *base = updates.clone(),
    }
}

/// Resolve a settings snapshot from the three layers.
///
/// Malformed layers deserialize-tolerantly: any value that is not a JSON
/// object is treated as empty and the lower layer wins.
pub fn resolve_settings(persisted: &Value, overrides: &Value) -> ConversionSettings {
    let mut merged = serde_json::to_value(ConversionSettings::default())
        .expect("default settings serialize");

    if persisted.is_object() {
        deep_merge(&mut merged, persisted);
    }
    if overrides.is_object() {
        deep_merge(&mut merged, overrides);
    }

    // Unknown or ill-typed leaves fall back to defaults rather than
    // failing the request.
    serde_json::from_value(merged).unwrap_or_default()
}

/// Parse a request-supplied settings override string. Non-parseable
/// payloads are treated as empty.
pub fn parse_overrides(raw: Option<&str>) -> Value {
    raw.and_then(|s| serde_json::from_str(s).ok())
        .unwrap_or(Value::Object(Default::default()))
}

/// Persisted user settings, stored as a JSON document on disk.
pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Load the persisted layer as raw JSON (empty object when absent or
    /// unreadable).
    pub fn load_raw(&self) -> Value {
        match fs::read_to_string(&self.path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                tracing::warn!("Ignoring malformed settings file {:?}: {}", self.path, e);
                Value::Object(Default::default())
            }),
            Err(_) => Value::Object(Default::default()),
        }
    }

    /// Load user settings merged over the hardcoded defaults.
    pub fn load(&self) -> ConversionSettings {
        resolve_settings(&self.load_raw(), &Value::Object(Default::default()))
    }

    /// Deep-merge `updates` into the persisted layer and write it back.
    pub fn update(&self, updates: &Value) -> Result<ConversionSettings> {
        let mut current = serde_json::to_value(self.load())?;
        deep_merge(&mut current, updates);
        let settings: ConversionSettings = serde_json::from_value(current)?;
        self.save(&settings)?;
        Ok(settings)
    }

    /// Replace the persisted layer with the hardcoded defaults.
    pub fn reset(&self) -> Result<ConversionSettings> {
        let defaults = ConversionSettings::default();
        self.save(&defaults)?;
        Ok(defaults)
    }

    fn save(&self, settings: &ConversionSettings) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(settings)?;
        fs::write(&self.path, content)?;
        Ok(())
    }
}

/// Supported OCR backend identifiers.
pub const OCR_BACKEND_IDS: &[&str] = &["easyocr", "tesseract", "ocrmac", "rapidocr"];

/// Supported accelerator device identifiers.
pub const DEVICE_IDS: &[&str] = &["auto", "cpu", "cuda", "mps"];

/// Supported table structure modes.
pub const TABLE_MODE_IDS: &[&str] = &["fast", "accurate"];

/// Supported output format keys.
pub const OUTPUT_FORMAT_IDS: &[&str] = &[
    "markdown",
    "html",
    "json",
    "text",
    "doctags",
    "document_tokens",
    "chunks",
];

/// Validate a settings update payload before persisting it. Only checks
/// fields that are present; unknown keys are tolerated (they are dropped
/// on deserialization).
pub fn validate_update(updates: &Value) -> Result<()> {
    fn check_id(value: &Value, pointer: &str, allowed: &[&str], what: &str) -> Result<()> {
        if let Some(id) = value.pointer(pointer).and_then(Value::as_str) {
            if !allowed.contains(&id) {
                return Err(Error::invalid_input(format!(
                    "{} must be one of: {}",
                    what,
                    allowed.join(", ")
                )));
            }
        }
        Ok(())
    }

    fn check_range(value: &Value, pointer: &str, min: f64, max: f64, what: &str) -> Result<()> {
        if let Some(n) = value.pointer(pointer).and_then(Value::as_f64) {
            if n < min || n > max {
                return Err(Error::invalid_input(format!(
                    "{} must be between {} and {}",
                    what, min, max
                )));
            }
        }
        Ok(())
    }

    check_id(updates, "/ocr/backend", OCR_BACKEND_IDS, "ocr.backend")?;
    check_id(updates, "/performance/device", DEVICE_IDS, "performance.device")?;
    check_id(updates, "/tables/mode", TABLE_MODE_IDS, "tables.mode")?;
    check_id(
        updates,
        "/output/default_format",
        OUTPUT_FORMAT_IDS,
        "output.default_format",
    )?;
    check_range(updates, "/ocr/confidence_threshold", 0.0, 1.0, "ocr.confidence_threshold")?;
    check_range(
        updates,
        "/ocr/bitmap_area_threshold",
        0.0,
        1.0,
        "ocr.bitmap_area_threshold",
    )?;
    check_range(updates, "/images/images_scale", 0.1, 4.0, "images.images_scale")?;
    check_range(updates, "/performance/num_threads", 1.0, 32.0, "performance.num_threads")?;
    check_range(updates, "/chunking/max_tokens", 64.0, 8192.0, "chunking.max_tokens")?;

    if let Some(timeout) = updates.pointer("/performance/document_timeout") {
        if !timeout.is_null() {
            let positive = timeout.as_f64().map(|t| t > 0.0).unwrap_or(false);
            if !positive {
                return Err(Error::invalid_input(
                    "performance.document_timeout must be a positive number or null",
                ));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_merge_empty_is_noop() {
        let defaults = ConversionSettings::default();
        let resolved = resolve_settings(&json!({}), &json!({}));
        assert_eq!(resolved, defaults);
    }

    #[test]
    fn test_merge_is_idempotent() {
        let current = serde_json::to_value(ConversionSettings::default()).unwrap();
        let resolved = resolve_settings(&current, &json!({}));
        assert_eq!(resolved, ConversionSettings::default());
    }

    #[test]
    fn test_override_replaces_leaf_keeps_siblings() {
        let resolved = resolve_settings(
            &json!({"ocr": {"language": "de"}}),
            &json!({"ocr": {"enabled": false}}),
        );
        assert!(!resolved.ocr.enabled);
        assert_eq!(resolved.ocr.language, "de");
        // Untouched sections keep defaults
        assert_eq!(resolved.tables.mode, "accurate");
        assert_eq!(resolved.chunking.max_tokens, 512);
    }

    #[test]
    fn test_request_layer_wins_over_persisted() {
        let resolved = resolve_settings(
            &json!({"performance": {"num_threads": 8}}),
            &json!({"performance": {"num_threads": 2}}),
        );
        assert_eq!(resolved.performance.num_threads, 2);
    }

    #[test]
    fn test_malformed_overrides_fall_back() {
        let overrides = parse_overrides(Some("not valid json"));
        let resolved = resolve_settings(&json!({"ocr": {"backend": "tesseract"}}), &overrides);
        assert_eq!(resolved.ocr.backend, "tesseract");
    }

    #[test]
    fn test_scalar_replaces_not_merges() {
        let mut base = json!({"a": [1, 2, 3], "b": {"c": 1}});
        deep_merge(&mut base, &json!({"a": [9], "b": {"d": 2}}));
        assert_eq!(base, json!({"a": [9], "b": {"c": 1, "d": 2}}));
    }

    #[test]
    fn test_settings_hash_tracks_content() {
        let a = ConversionSettings::default();
        let b = a.without_ocr();
        assert_eq!(a.settings_hash(), ConversionSettings::default().settings_hash());
        assert_ne!(a.settings_hash(), b.settings_hash());
    }

    #[test]
    fn test_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::new(dir.path().join("user_settings.json"));

        assert_eq!(store.load(), ConversionSettings::default());

        let updated = store
            .update(&json!({"chunking": {"enabled": true, "max_tokens": 256}}))
            .unwrap();
        assert!(updated.chunking.enabled);
        assert_eq!(updated.chunking.max_tokens, 256);
        // merge_peers untouched by the update
        assert!(updated.chunking.merge_peers);

        let reloaded = store.load();
        assert_eq!(reloaded, updated);

        let reset = store.reset().unwrap();
        assert_eq!(reset, ConversionSettings::default());
    }

    #[test]
    fn test_validate_update_rejects_unknown_backend() {
        assert!(validate_update(&json!({"ocr": {"backend": "easyocr"}})).is_ok());
        assert!(validate_update(&json!({"ocr": {"backend": "paddleocr"}})).is_err());
        assert!(validate_update(&json!({"images": {"images_scale": 9.0}})).is_err());
        assert!(validate_update(&json!({"performance": {"document_timeout": null}})).is_ok());
        assert!(validate_update(&json!({"performance": {"document_timeout": -1}})).is_err());
    }
}
