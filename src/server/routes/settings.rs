//! Settings endpoints: the persisted user layer and the option catalog.

use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::error::Result;
use crate::server::state::AppState;
use crate::settings::{
    validate_update, ConversionSettings, DEVICE_IDS, OCR_BACKEND_IDS, OUTPUT_FORMAT_IDS,
    TABLE_MODE_IDS,
};

/// GET /api/settings - current persisted settings over defaults
pub async fn get_settings(State(state): State<AppState>) -> Json<ConversionSettings> {
    Json(state.settings_store().load())
}

/// PUT /api/settings - deep-merge an update into the persisted layer
pub async fn update_settings(
    State(state): State<AppState>,
    Json(updates): Json<Value>,
) -> Result<Json<ConversionSettings>> {
    validate_update(&updates)?;
    let settings = state.settings_store().update(&updates)?;
    Ok(Json(settings))
}

/// POST /api/settings/reset - restore hardcoded defaults
pub async fn reset_settings(State(state): State<AppState>) -> Result<Json<ConversionSettings>> {
    Ok(Json(state.settings_store().reset()?))
}

/// GET /api/settings/options - catalog of selectable values
pub async fn options() -> Json<Value> {
    Json(json!({
        "ocr_backends": [
            {"id": "easyocr", "name": "EasyOCR", "description": "General-purpose OCR with GPU support"},
            {"id": "tesseract", "name": "Tesseract", "description": "Classic OCR engine"},
            {"id": "ocrmac", "name": "macOS Vision", "description": "Native macOS OCR (Mac only)"},
            {"id": "rapidocr", "name": "RapidOCR", "description": "Fast OCR with ONNX runtime"},
        ],
        "devices": [
            {"id": "auto", "name": "Auto", "description": "Automatically select best device"},
            {"id": "cpu", "name": "CPU", "description": "Use CPU only"},
            {"id": "cuda", "name": "NVIDIA GPU", "description": "Use CUDA-enabled GPU"},
            {"id": "mps", "name": "Apple Silicon", "description": "Use Apple Metal Performance Shaders"},
        ],
        "table_modes": [
            {"id": "fast", "name": "Fast", "description": "Faster but less accurate table detection"},
            {"id": "accurate", "name": "Accurate", "description": "More precise table structure recognition"},
        ],
        "ocr_languages": [
            {"code": "en", "name": "English"},
            {"code": "de", "name": "German"},
            {"code": "fr", "name": "French"},
            {"code": "es", "name": "Spanish"},
            {"code": "it", "name": "Italian"},
            {"code": "pt", "name": "Portuguese"},
            {"code": "nl", "name": "Dutch"},
            {"code": "pl", "name": "Polish"},
            {"code": "ru", "name": "Russian"},
            {"code": "ja", "name": "Japanese"},
            {"code": "zh", "name": "Chinese (Simplified)"},
            {"code": "zh-tw", "name": "Chinese (Traditional)"},
            {"code": "ko", "name": "Korean"},
            {"code": "ar", "name": "Arabic"},
            {"code": "hi", "name": "Hindi"},
            {"code": "th", "name": "Thai"},
            {"code": "vi", "name": "Vietnamese"},
            {"code": "tr", "name": "Turkish"},
            {"code": "uk", "name": "Ukrainian"},
            {"code": "cs", "name": "Czech"},
            {"code": "el", "name": "Greek"},
            {"code": "he", "name": "Hebrew"},
            {"code": "id", "name": "Indonesian"},
            {"code": "ms", "name": "Malay"},
            {"code": "sv", "name": "Swedish"},
            {"code": "da", "name": "Danish"},
            {"code": "fi", "name": "Finnish"},
            {"code": "no", "name": "Norwegian"},
        ],
        "valid_ids": {
            "ocr_backends": OCR_BACKEND_IDS,
            "devices": DEVICE_IDS,
            "table_modes": TABLE_MODE_IDS,
            "output_formats": OUTPUT_FORMAT_IDS,
        },
    }))
}
