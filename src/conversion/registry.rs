//! In-memory job registry.
//!
//! An explicitly constructed object handed to routes and the scheduler
//! through the application state; there is no module-level singleton.
//! The registry is not persisted: after a restart the history store and
//! the on-disk output layout are the only source of truth.

use dashmap::DashMap;
use serde::Serialize;
use std::path::PathBuf;
use uuid::Uuid;

use crate::settings::ConversionSettings;

use super::job::{ConversionJob, JobStatus};

/// Registry of in-flight and recently finished jobs.
///
/// Structural operations (insert, remove, lookup) are safe from any
/// thread; field mutation after creation happens only inside the worker
/// that owns the job, which republishes whole snapshots via [`sync`].
/// Readers therefore always observe a consistent snapshot.
///
/// [`sync`]: JobRegistry::sync
#[derive(Default)]
pub struct JobRegistry {
    jobs: DashMap<Uuid, ConversionJob>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a job in `Pending` state under a fresh identifier.
    pub fn create(
        &self,
        input_path: PathBuf,
        original_filename: String,
        settings: ConversionSettings,
    ) -> Uuid {
        self.create_with_id(Uuid::new_v4(), input_path, original_filename, settings)
    }

    /// Create a job under a caller-supplied identifier (URL ingestion
    /// pre-allocates ids so side files can be associated before the job
    /// exists). An existing entry under the same id is silently
    /// overwritten; ids are generated immediately before use, so a
    /// collision is not expected in practice.
    pub fn create_with_id(
        &self,
        id: Uuid,
        input_path: PathBuf,
        original_filename: String,
        settings: ConversionSettings,
    ) -> Uuid {
        let job = ConversionJob::new(id, input_path, original_filename, settings);
        self.jobs.insert(id, job);
        id
    }

    /// Snapshot lookup; returns a clone so readers never hold a lock
    /// while the worker publishes updates.
    pub fn get(&self, id: Uuid) -> Option<ConversionJob> {
        self.jobs.get(&id).map(|j| j.value().clone())
    }

    /// Remove a job. Silently a no-op when the job does not exist; a job
    /// already dispatched to a worker keeps running, its registry entry
    /// is simply abandoned.
    pub fn remove(&self, id: Uuid) -> Option<ConversionJob> {
        self.jobs.remove(&id).map(|(_, job)| job)
    }

    /// Republish the worker's authoritative copy of a job. No-op when
    /// the job has been removed mid-run.
    pub fn sync(&self, job: &ConversionJob) {
        if let Some(mut entry) = self.jobs.get_mut(&job.id) {
            *entry = job.clone();
        }
    }

    /// Apply a single mutation in place (used before dispatch, while no
    /// worker owns the job yet).
    pub fn update<F: FnOnce(&mut ConversionJob)>(&self, id: Uuid, f: F) {
        if let Some(mut entry) = self.jobs.get_mut(&id) {
            f(&mut entry);
        }
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// List snapshots of all jobs
    pub fn list(&self) -> Vec<ConversionJob> {
        self.jobs.iter().map(|e| e.value().clone()).collect()
    }

    pub fn count_by_status(&self, status: JobStatus) -> usize {
        self.jobs.iter().filter(|j| j.status == status).count()
    }

    /// Registry statistics
    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            total_jobs: self.jobs.len(),
            pending: self.count_by_status(JobStatus::Pending),
            processing: self.count_by_status(JobStatus::Processing),
            completed: self.count_by_status(JobStatus::Completed),
            failed: self.count_by_status(JobStatus::Failed),
        }
    }
}

/// Registry statistics
#[derive(Debug, Clone, Serialize)]
pub struct RegistryStats {
    pub total_jobs: usize,
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry_with_job() -> (JobRegistry, Uuid) {
        let registry = JobRegistry::new();
        let id = registry.create(
            PathBuf::from("/tmp/in.txt"),
            "in.txt".to_string(),
            ConversionSettings::default(),
        );
        (registry, id)
    }

    #[test]
    fn test_create_starts_pending() {
        let (registry, id) = registry_with_job();
        let job = registry.get(id).unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.progress, 0);
        assert!(job.completed_at.is_none());
    }

    #[test]
    fn test_caller_supplied_id_overwrites() {
        let (registry, id) = registry_with_job();
        registry.create_with_id(
            id,
            PathBuf::from("/tmp/other.txt"),
            "other.txt".to_string(),
            ConversionSettings::default(),
        );
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get(id).unwrap().original_filename, "other.txt");
    }

    #[test]
    fn test_remove_missing_is_noop() {
        let registry = JobRegistry::new();
        assert!(registry.remove(Uuid::new_v4()).is_none());
    }

    #[test]
    fn test_sync_after_remove_is_noop() {
        let (registry, id) = registry_with_job();
        let mut job = registry.get(id).unwrap();
        registry.remove(id);

        job.status = JobStatus::Completed;
        registry.sync(&job);
        assert!(registry.get(id).is_none());
    }

    #[test]
    fn test_stats_count_statuses() {
        let (registry, id) = registry_with_job();
        registry.update(id, |job| job.status = JobStatus::Processing);
        let stats = registry.stats();
        assert_eq!(stats.total_jobs, 1);
        assert_eq!(stats.processing, 1);
        assert_eq!(stats.pending, 0);
    }
}
