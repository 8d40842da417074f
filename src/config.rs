//! Configuration for the conversion backend

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Server configuration
    pub server: ServerConfig,
    /// Storage locations
    pub storage: StorageConfig,
    /// Job processing configuration
    pub processing: ProcessingConfig,
}

impl AppConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| Error::Config(format!("Invalid config file: {}", e)))
    }

    /// Load from the given path when present, defaults otherwise
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) if path.exists() => Self::from_file(path),
            Some(path) => Err(Error::Config(format!(
                "Config file not found: {}",
                path.display()
            ))),
            None => Ok(Self::default()),
        }
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host address
    pub host: String,
    /// Port number
    pub port: u16,
    /// Enable CORS
    pub enable_cors: bool,
    /// Maximum upload size in bytes (default: 100MB)
    pub max_upload_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            enable_cors: true,
            max_upload_size: 100 * 1024 * 1024, // 100MB
        }
    }
}

/// Storage locations
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Staging area for uploaded files
    pub upload_dir: PathBuf,
    /// Root of the per-job output directories
    pub output_dir: PathBuf,
    /// SQLite history database path
    pub database_path: PathBuf,
    /// Persisted user settings path
    pub settings_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
            .join("docmill");

        Self {
            upload_dir: data_dir.join("uploads"),
            output_dir: data_dir.join("outputs"),
            database_path: data_dir.join("history.db"),
            settings_path: data_dir.join("user_settings.json"),
        }
    }
}

/// Job processing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    /// Hard ceiling on concurrent engine invocations. The engine is
    /// resource-intensive per invocation, so this stays small even on
    /// large machines.
    pub max_concurrent_jobs: usize,
    /// Capacity of the pending-job queue
    pub queue_capacity: usize,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: num_cpus::get().min(2),
            queue_capacity: 1000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_bounded() {
        let config = AppConfig::default();
        assert!(config.processing.max_concurrent_jobs >= 1);
        assert!(config.processing.max_concurrent_jobs <= 2);
        assert_eq!(config.server.port, 8080);
    }

    #[test]
    fn test_from_file_partial_override() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("docmill.toml");
        std::fs::write(
            &path,
            r#"
[server]
port = 9999

[processing]
max_concurrent_jobs = 4
"#,
        )
        .unwrap();

        let config = AppConfig::from_file(&path).unwrap();
        assert_eq!(config.server.port, 9999);
        assert_eq!(config.processing.max_concurrent_jobs, 4);
        // Unspecified sections keep defaults
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.processing.queue_capacity, 1000);
    }

    #[test]
    fn test_missing_explicit_path_is_an_error() {
        let missing = PathBuf::from("/nonexistent/docmill.toml");
        assert!(AppConfig::load_or_default(Some(&missing)).is_err());
        assert!(AppConfig::load_or_default(None).is_ok());
    }
}
