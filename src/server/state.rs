//! Application state for the conversion server

use parking_lot::RwLock;
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::conversion::{
    CompletionCallback, ConversionAdapter, ConversionScheduler, JobRegistry,
};
use crate::engine::basic::BasicEngineFactory;
use crate::engine::EngineFactory;
use crate::error::Result;
use crate::settings::{resolve_settings, ConversionSettings, SettingsStore};
use crate::storage::{detect_input_format, FileManager, HistoryDb};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    /// Configuration
    config: AppConfig,
    /// In-memory job registry, owned here and handed to routes and the
    /// scheduler by reference
    registry: Arc<JobRegistry>,
    /// Bounded worker pool
    scheduler: ConversionScheduler,
    /// Durable conversion history
    history: Arc<HistoryDb>,
    /// Upload staging and output layout
    files: FileManager,
    /// Persisted user settings
    settings_store: SettingsStore,
    /// Ready state
    ready: RwLock<bool>,
}

impl AppState {
    /// Create application state with the built-in engine.
    /// Must be called from within a tokio runtime (the scheduler spawns
    /// its dispatcher task).
    pub fn new(config: AppConfig) -> Result<Self> {
        Self::with_engine(config, Arc::new(BasicEngineFactory))
    }

    /// Create application state with a custom engine factory
    pub fn with_engine(config: AppConfig, factory: Arc<dyn EngineFactory>) -> Result<Self> {
        tracing::info!("Initializing conversion backend state...");

        let registry = Arc::new(JobRegistry::new());
        let adapter = Arc::new(ConversionAdapter::new(factory));

        let history = Arc::new(HistoryDb::new(&config.storage.database_path)?);
        tracing::info!("History store opened at {:?}", config.storage.database_path);

        let files = FileManager::new(
            config.storage.upload_dir.clone(),
            config.storage.output_dir.clone(),
        )?;
        let settings_store = SettingsStore::new(config.storage.settings_path.clone());

        let scheduler = ConversionScheduler::start(
            registry.clone(),
            adapter,
            config.storage.output_dir.clone(),
            config.processing.max_concurrent_jobs,
            config.processing.queue_capacity,
        );

        Ok(Self {
            inner: Arc::new(AppStateInner {
                config,
                registry,
                scheduler,
                history,
                files,
                settings_store,
                ready: RwLock::new(true),
            }),
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.inner.config
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.inner.registry
    }

    pub fn scheduler(&self) -> &ConversionScheduler {
        &self.inner.scheduler
    }

    pub fn history(&self) -> &HistoryDb {
        &self.inner.history
    }

    pub fn files(&self) -> &FileManager {
        &self.inner.files
    }

    pub fn settings_store(&self) -> &SettingsStore {
        &self.inner.settings_store
    }

    /// Check if the server is ready
    pub fn is_ready(&self) -> bool {
        *self.inner.ready.read()
    }

    /// Set ready state
    pub fn set_ready(&self, ready: bool) {
        *self.inner.ready.write() = ready;
    }

    /// Resolve the settings snapshot for one request: hardcoded defaults
    /// under the persisted user layer, with per-request overrides on top.
    pub fn resolve_request_settings(&self, overrides: &serde_json::Value) -> ConversionSettings {
        resolve_settings(&self.inner.settings_store.load_raw(), overrides)
    }

    /// Create a job, record it in the history store, and queue it for
    /// execution. A caller-supplied id pre-allocates the identity (URL
    /// ingestion stages side files before the job exists).
    pub fn submit_conversion(
        &self,
        job_id: Option<Uuid>,
        input_path: PathBuf,
        original_filename: String,
        safe_filename: &str,
        file_size: u64,
        settings: ConversionSettings,
    ) -> Result<Uuid> {
        let input_format = detect_input_format(&original_filename);

        let id = match job_id {
            Some(id) => self.inner.registry.create_with_id(
                id,
                input_path,
                original_filename.clone(),
                settings.clone(),
            ),
            None => self.inner.registry.create(
                input_path,
                original_filename.clone(),
                settings.clone(),
            ),
        };

        self.inner.history.create(
            id,
            safe_filename,
            &original_filename,
            input_format,
            &settings,
            Some(file_size),
        )?;

        self.inner.scheduler.submit(id, self.history_callback())?;
        Ok(id)
    }

    /// Completion callback persisting the terminal outcome into the
    /// history store. Fired exactly once per job; its own failures are
    /// logged, never retried.
    fn history_callback(&self) -> CompletionCallback {
        let history = self.inner.history.clone();
        Box::new(move |job| {
            let output_path = job
                .output_paths
                .get("markdown")
                .map(|p| p.to_string_lossy().to_string());
            if let Err(e) = history.update_status(
                job.id,
                job.status.as_str(),
                job.confidence,
                job.error.as_deref(),
                output_path.as_deref(),
            ) {
                tracing::error!("Failed to persist outcome of job {}: {}", job.id, e);
            }
        })
    }

    /// Delete a job everywhere: registry entry, output directory, and
    /// history row. A conversion already dispatched keeps running; its
    /// registry entry is simply abandoned.
    pub fn delete_job(&self, id: Uuid) -> Result<()> {
        self.inner.registry.remove(id);
        self.inner.files.delete_output_dir(id);
        self.inner.history.delete(id)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversion::JobStatus;
    use std::time::Duration;

    fn test_config(dir: &std::path::Path) -> AppConfig {
        let mut config = AppConfig::default();
        config.storage.upload_dir = dir.join("uploads");
        config.storage.output_dir = dir.join("outputs");
        config.storage.database_path = dir.join("history.db");
        config.storage.settings_path = dir.join("user_settings.json");
        config
    }

    #[tokio::test]
    async fn test_submit_creates_registry_and_history_entries() {
        let dir = tempfile::tempdir().unwrap();
        let state = AppState::new(test_config(dir.path())).unwrap();

        let saved = state.files().save_upload(b"plain text", "notes.txt").unwrap();
        let id = state
            .submit_conversion(
                None,
                saved.path,
                "notes.txt".to_string(),
                &saved.safe_filename,
                saved.size,
                ConversionSettings::default(),
            )
            .unwrap();

        assert!(state.registry().get(id).is_some());
        assert!(state.history().get(id).unwrap().is_some());

        // The job completes and the terminal status lands in history
        for _ in 0..500 {
            if let Some(job) = state.registry().get(id) {
                if job.status.is_terminal() {
                    break;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let job = state.registry().get(id).unwrap();
        assert_eq!(job.status, JobStatus::Completed);

        // The callback runs after the final registry sync; give it a beat
        for _ in 0..100 {
            if state.history().get(id).unwrap().unwrap().status == "completed" {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let entry = state.history().get(id).unwrap().unwrap();
        assert_eq!(entry.status, "completed");
        assert!(entry.output_path.is_some());
    }

    #[tokio::test]
    async fn test_delete_job_clears_everything() {
        let dir = tempfile::tempdir().unwrap();
        let state = AppState::new(test_config(dir.path())).unwrap();

        let saved = state.files().save_upload(b"text", "doc.txt").unwrap();
        let id = state
            .submit_conversion(
                None,
                saved.path,
                "doc.txt".to_string(),
                &saved.safe_filename,
                saved.size,
                ConversionSettings::default(),
            )
            .unwrap();

        state.delete_job(id).unwrap();
        assert!(state.registry().get(id).is_none());
        assert!(state.history().get(id).unwrap().is_none());
        assert!(!state.files().output_dir(id).exists());
    }

    #[tokio::test]
    async fn test_request_settings_layering() {
        let dir = tempfile::tempdir().unwrap();
        let state = AppState::new(test_config(dir.path())).unwrap();

        state
            .settings_store()
            .update(&serde_json::json!({"ocr": {"language": "de"}}))
            .unwrap();

        let resolved = state
            .resolve_request_settings(&serde_json::json!({"ocr": {"enabled": false}}));
        assert!(!resolved.ocr.enabled);
        assert_eq!(resolved.ocr.language, "de");
    }
}
