//! Persistent storage: the SQLite conversion history and the on-disk
//! upload/output file layout.

pub mod files;
pub mod history;

pub use files::{detect_input_format, FileManager, SavedUpload, StorageStats, ALLOWED_EXTENSIONS};
pub use history::{HistoryDb, HistoryEntry, HistoryStats};
