//! Upload staging and output-directory management.
//!
//! Output artifacts live under `{output_root}/{job_id}/` in a fixed
//! layout. That layout is load-bearing: when a job has been evicted from
//! the in-memory registry, available formats are reconstructed by
//! scanning its output directory.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use serde::Serialize;
use uuid::Uuid;
use walkdir::WalkDir;

use crate::error::{Error, Result};

/// Extensions accepted by the upload endpoints
pub const ALLOWED_EXTENSIONS: &[&str] = &[
    "pdf", "docx", "pptx", "xlsx", "html", "htm", "md", "markdown", "csv", "txt", "png", "jpg",
    "jpeg", "tiff", "tif", "gif", "webp", "bmp", "wav", "mp3", "vtt", "xml", "json", "asciidoc",
    "adoc",
];

/// A staged upload ready for conversion
#[derive(Debug, Clone)]
pub struct SavedUpload {
    pub path: PathBuf,
    pub safe_filename: String,
    pub size: u64,
}

/// Disk usage summary for the status endpoints
#[derive(Debug, Clone, Serialize)]
pub struct StorageStats {
    pub upload_count: usize,
    pub upload_bytes: u64,
    pub output_count: usize,
    pub output_bytes: u64,
}

/// Manages the upload staging area and per-job output directories
#[derive(Debug, Clone)]
pub struct FileManager {
    upload_dir: PathBuf,
    output_dir: PathBuf,
}

impl FileManager {
    pub fn new(upload_dir: PathBuf, output_dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&upload_dir)?;
        fs::create_dir_all(&output_dir)?;
        Ok(Self {
            upload_dir,
            output_dir,
        })
    }

    /// Check a filename against the extension allow-list
    pub fn is_allowed(filename: &str) -> bool {
        extension_of(filename)
            .map(|ext| ALLOWED_EXTENSIONS.contains(&ext.as_str()))
            .unwrap_or(false)
    }

    /// Stage uploaded bytes under a collision-free name:
    /// `{stem}_{8-char-uuid}{ext}` with a lowercased extension.
    pub fn save_upload(&self, data: &[u8], original_filename: &str) -> Result<SavedUpload> {
        if data.is_empty() {
            return Err(Error::invalid_input("Uploaded file is empty"));
        }

        let safe_filename = sanitize_filename(original_filename);
        let path = Path::new(&safe_filename);
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("unnamed_file");
        let ext = extension_of(&safe_filename)
            .map(|e| format!(".{}", e))
            .unwrap_or_default();

        let unique_id = Uuid::new_v4().simple().to_string();
        let staged_name = format!("{}_{}{}", stem, &unique_id[..8], ext);
        let staged_path = self.upload_dir.join(staged_name);

        fs::write(&staged_path, data)?;

        Ok(SavedUpload {
            path: staged_path,
            safe_filename,
            size: data.len() as u64,
        })
    }

    /// Output directory for one job
    pub fn output_dir(&self, job_id: Uuid) -> PathBuf {
        self.output_dir.join(job_id.to_string())
    }

    pub fn output_root(&self) -> &Path {
        &self.output_dir
    }

    /// Delete a job's output directory; false when it did not exist
    pub fn delete_output_dir(&self, job_id: Uuid) -> bool {
        let dir = self.output_dir(job_id);
        if dir.is_dir() {
            if let Err(e) = fs::remove_dir_all(&dir) {
                tracing::warn!("Failed to delete output dir {:?}: {}", dir, e);
                return false;
            }
            return true;
        }
        false
    }

    /// Delete a staged upload, refusing paths outside the staging area
    pub fn delete_upload(&self, path: &Path) -> bool {
        if path.starts_with(&self.upload_dir) && path.is_file() {
            return fs::remove_file(path).is_ok();
        }
        false
    }

    /// Reconstruct the available export formats for a job by scanning
    /// its output directory. Used when the in-memory registry no longer
    /// holds the job.
    pub fn available_formats(&self, job_id: Uuid) -> Vec<(String, PathBuf)> {
        let dir = self.output_dir(job_id);
        let mut formats = Vec::new();
        if !dir.is_dir() {
            return formats;
        }

        for entry in fs::read_dir(&dir).into_iter().flatten().flatten() {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if let Some(format) = format_for_artifact(&name) {
                formats.push((format.to_string(), path));
            }
        }

        formats.sort();
        formats
    }

    /// Resolve one export artifact for a job by format key
    pub fn find_output(&self, job_id: Uuid, format: &str) -> Option<PathBuf> {
        self.available_formats(job_id)
            .into_iter()
            .find(|(key, _)| key == format)
            .map(|(_, path)| path)
    }

    /// Delete uploads and output directories older than `max_age`.
    /// Returns `(uploads_deleted, output_dirs_deleted)`.
    pub fn cleanup_old(&self, max_age: Duration) -> (usize, usize) {
        let cutoff = SystemTime::now()
            .checked_sub(max_age)
            .unwrap_or(SystemTime::UNIX_EPOCH);
        let mut uploads_deleted = 0;
        let mut outputs_deleted = 0;

        for entry in fs::read_dir(&self.upload_dir).into_iter().flatten().flatten() {
            let path = entry.path();
            if path.is_file() && modified_before(&path, cutoff) && fs::remove_file(&path).is_ok() {
                uploads_deleted += 1;
            }
        }

        for entry in fs::read_dir(&self.output_dir).into_iter().flatten().flatten() {
            let path = entry.path();
            if path.is_dir() && modified_before(&path, cutoff) && fs::remove_dir_all(&path).is_ok()
            {
                outputs_deleted += 1;
            }
        }

        (uploads_deleted, outputs_deleted)
    }

    /// Disk usage across the staging area and all output directories
    pub fn storage_stats(&self) -> StorageStats {
        let mut stats = StorageStats {
            upload_count: 0,
            upload_bytes: 0,
            output_count: 0,
            output_bytes: 0,
        };

        for entry in WalkDir::new(&self.upload_dir).into_iter().flatten() {
            if entry.file_type().is_file() {
                stats.upload_count += 1;
                stats.upload_bytes += entry.metadata().map(|m| m.len()).unwrap_or(0);
            }
        }

        for entry in fs::read_dir(&self.output_dir).into_iter().flatten().flatten() {
            if entry.path().is_dir() {
                stats.output_count += 1;
                for file in WalkDir::new(entry.path()).into_iter().flatten() {
                    if file.file_type().is_file() {
                        stats.output_bytes += file.metadata().map(|m| m.len()).unwrap_or(0);
                    }
                }
            }
        }

        stats
    }
}

/// Detect the input format identifier from a filename extension
pub fn detect_input_format(filename: &str) -> Option<&'static str> {
    let ext = extension_of(filename)?;
    let format = match ext.as_str() {
        "pdf" => "pdf",
        "docx" => "docx",
        "pptx" => "pptx",
        "xlsx" => "xlsx",
        "html" | "htm" => "html",
        "md" | "markdown" => "md",
        "csv" => "csv",
        "txt" => "text",
        "png" | "jpg" | "jpeg" | "tiff" | "tif" | "gif" | "webp" | "bmp" => "image",
        "wav" | "mp3" => "audio",
        "vtt" => "vtt",
        "xml" => "xml",
        "asciidoc" | "adoc" => "asciidoc",
        "json" => "json",
        _ => return None,
    };
    Some(format)
}

/// Map an artifact filename back to its export format key
fn format_for_artifact(name: &str) -> Option<&'static str> {
    if name.ends_with(".chunks.json") {
        return Some("chunks");
    }
    if name.ends_with(".tokens.json") {
        return Some("document_tokens");
    }
    match extension_of(name)?.as_str() {
        "md" => Some("markdown"),
        "html" => Some("html"),
        "json" => Some("json"),
        "txt" => Some("text"),
        "doctags" => Some("doctags"),
        _ => None,
    }
}

fn extension_of(filename: &str) -> Option<String> {
    Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
}

/// Strip path components and replace anything outside a conservative
/// character set.
fn sanitize_filename(filename: &str) -> String {
    let base = Path::new(filename)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("unnamed_file");

    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();

    let trimmed = cleaned.trim_matches(|c| c == '.' || c == '_');
    if trimmed.is_empty() {
        "unnamed_file".to_string()
    } else {
        trimmed.to_string()
    }
}

fn modified_before(path: &Path, cutoff: SystemTime) -> bool {
    path.metadata()
        .and_then(|m| m.modified())
        .map(|mtime| mtime < cutoff)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> (tempfile::TempDir, FileManager) {
        let dir = tempfile::tempdir().unwrap();
        let fm = FileManager::new(dir.path().join("uploads"), dir.path().join("outputs")).unwrap();
        (dir, fm)
    }

    #[test]
    fn test_extension_allow_list() {
        assert!(FileManager::is_allowed("report.pdf"));
        assert!(FileManager::is_allowed("REPORT.PDF"));
        assert!(FileManager::is_allowed("notes.md"));
        assert!(!FileManager::is_allowed("binary.exe"));
        assert!(!FileManager::is_allowed("no_extension"));
    }

    #[test]
    fn test_save_upload_stages_unique_lowercase_name() {
        let (_dir, fm) = manager();
        let saved = fm.save_upload(b"content", "Quarterly Report.PDF").unwrap();

        assert_eq!(saved.safe_filename, "Quarterly_Report.PDF");
        assert_eq!(saved.size, 7);
        let staged = saved.path.file_name().unwrap().to_str().unwrap();
        assert!(staged.starts_with("Quarterly_Report_"));
        assert!(staged.ends_with(".pdf"), "extension not lowercased: {}", staged);
        assert!(saved.path.exists());

        // Same name stages to a different file
        let again = fm.save_upload(b"content", "Quarterly Report.PDF").unwrap();
        assert_ne!(saved.path, again.path);
    }

    #[test]
    fn test_save_upload_rejects_empty() {
        let (_dir, fm) = manager();
        assert!(fm.save_upload(b"", "empty.pdf").is_err());
    }

    #[test]
    fn test_sanitize_strips_path_components() {
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename("weird name!.pdf"), "weird_name_.pdf");
        assert_eq!(sanitize_filename("..."), "unnamed_file");
    }

    #[test]
    fn test_detect_input_format() {
        assert_eq!(detect_input_format("a.pdf"), Some("pdf"));
        assert_eq!(detect_input_format("a.htm"), Some("html"));
        assert_eq!(detect_input_format("a.jpeg"), Some("image"));
        assert_eq!(detect_input_format("a.zip"), None);
    }

    #[test]
    fn test_available_formats_scans_output_layout() {
        let (_dir, fm) = manager();
        let job_id = Uuid::new_v4();
        let out = fm.output_dir(job_id);
        fs::create_dir_all(out.join("images")).unwrap();
        fs::write(out.join("report.md"), "# hi").unwrap();
        fs::write(out.join("report.html"), "<html>").unwrap();
        fs::write(out.join("report.tokens.json"), "[]").unwrap();
        fs::write(out.join("report.chunks.json"), "[]").unwrap();
        fs::write(out.join("images").join("image_1.png"), "png").unwrap();

        let formats: Vec<String> = fm
            .available_formats(job_id)
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(formats, vec!["chunks", "document_tokens", "html", "markdown"]);

        assert!(fm.find_output(job_id, "markdown").is_some());
        assert!(fm.find_output(job_id, "text").is_none());
    }

    #[test]
    fn test_delete_output_dir() {
        let (_dir, fm) = manager();
        let job_id = Uuid::new_v4();
        let out = fm.output_dir(job_id);
        fs::create_dir_all(&out).unwrap();
        fs::write(out.join("report.md"), "# hi").unwrap();

        assert!(fm.delete_output_dir(job_id));
        assert!(!out.exists());
        assert!(!fm.delete_output_dir(job_id));
    }

    #[test]
    fn test_delete_upload_guards_staging_area() {
        let (dir, fm) = manager();
        let saved = fm.save_upload(b"data", "doc.pdf").unwrap();
        assert!(fm.delete_upload(&saved.path));

        let outside = dir.path().join("outside.pdf");
        fs::write(&outside, "data").unwrap();
        assert!(!fm.delete_upload(&outside));
        assert!(outside.exists());
    }

    #[test]
    fn test_storage_stats_counts_bytes() {
        let (_dir, fm) = manager();
        fm.save_upload(b"12345", "a.pdf").unwrap();
        let job_id = Uuid::new_v4();
        let out = fm.output_dir(job_id);
        fs::create_dir_all(&out).unwrap();
        fs::write(out.join("a.md"), "123").unwrap();

        let stats = fm.storage_stats();
        assert_eq!(stats.upload_count, 1);
        assert_eq!(stats.upload_bytes, 5);
        assert_eq!(stats.output_count, 1);
        assert_eq!(stats.output_bytes, 3);
    }

    #[test]
    fn test_cleanup_old_respects_age() {
        let (_dir, fm) = manager();
        fm.save_upload(b"data", "a.pdf").unwrap();
        let job_id = Uuid::new_v4();
        fs::create_dir_all(fm.output_dir(job_id)).unwrap();

        // Nothing is older than an hour
        assert_eq!(fm.cleanup_old(Duration::from_secs(3600)), (0, 0));
        // Everything is older than zero seconds
        let (uploads, outputs) = fm.cleanup_old(Duration::from_secs(0));
        assert_eq!((uploads, outputs), (1, 1));
    }
}
