//! Bounded worker pool for conversion jobs.
//!
//! A single dispatcher task drains a FIFO queue of submitted jobs and
//! hands each one to a blocking worker. A semaphore with a small number
//! of permits caps how many engine invocations run at once; the permit
//! is acquired before the next job is popped, so jobs are dispatched in
//! submission order and at most N are ever in `Processing`.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, Semaphore};
use tokio::time::timeout;
use uuid::Uuid;

use crate::error::{Error, Result};

use super::adapter::ConversionAdapter;
use super::job::{ConversionJob, JobStatus};
use super::materialize::materialize;
use super::registry::JobRegistry;

/// Callback fired exactly once when a job reaches a terminal state.
pub type CompletionCallback = Box<dyn Fn(&ConversionJob) + Send + Sync>;

struct QueueEntry {
    job_id: Uuid,
    on_complete: CompletionCallback,
}

/// How long the dispatcher blocks on the queue before re-checking the
/// shutdown flag.
const POP_TIMEOUT: Duration = Duration::from_millis(500);

/// Scheduler handle held by the application state.
///
/// `submit` never blocks; execution is asynchronous and jobs run to
/// completion once dispatched. There is no preemptive cancellation of a
/// running engine call: deleting a job only abandons its registry entry.
pub struct ConversionScheduler {
    registry: Arc<JobRegistry>,
    sender: mpsc::Sender<QueueEntry>,
    queued: Arc<AtomicUsize>,
    shutdown: Arc<AtomicBool>,
    max_concurrent_jobs: usize,
}

impl ConversionScheduler {
    /// Start the dispatcher task. Must be called from within a tokio
    /// runtime.
    pub fn start(
        registry: Arc<JobRegistry>,
        adapter: Arc<ConversionAdapter>,
        output_root: PathBuf,
        max_concurrent_jobs: usize,
        queue_capacity: usize,
    ) -> Self {
        let max_concurrent_jobs = max_concurrent_jobs.max(1);
        let (sender, receiver) = mpsc::channel(queue_capacity.max(1));
        let queued = Arc::new(AtomicUsize::new(0));
        let shutdown = Arc::new(AtomicBool::new(false));

        let dispatcher = Dispatcher {
            registry: registry.clone(),
            adapter,
            output_root,
            permits: Arc::new(Semaphore::new(max_concurrent_jobs)),
            queued: queued.clone(),
            shutdown: shutdown.clone(),
        };
        tokio::spawn(dispatcher.run(receiver));

        tracing::info!(
            "Conversion scheduler started ({} concurrent job slots)",
            max_concurrent_jobs
        );

        Self {
            registry,
            sender,
            queued,
            shutdown,
            max_concurrent_jobs,
        }
    }

    /// Queue a job for execution. Returns immediately; the job's message
    /// reflects its queue position.
    pub fn submit(&self, job_id: Uuid, on_complete: CompletionCallback) -> Result<()> {
        self.sender
            .try_send(QueueEntry { job_id, on_complete })
            .map_err(|_| Error::internal("conversion queue is full or shut down"))?;

        let position = self.queued.fetch_add(1, Ordering::SeqCst) + 1;
        self.registry.update(job_id, |job| {
            job.message = format!("Queued for processing (position: {})", position);
        });
        Ok(())
    }

    /// Jobs waiting in the queue (not yet dispatched).
    pub fn queued_jobs(&self) -> usize {
        self.queued.load(Ordering::SeqCst)
    }

    pub fn max_concurrent_jobs(&self) -> usize {
        self.max_concurrent_jobs
    }

    /// Signal the dispatcher to stop. Queued jobs are abandoned; jobs
    /// already dispatched run to completion.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }
}

struct Dispatcher {
    registry: Arc<JobRegistry>,
    adapter: Arc<ConversionAdapter>,
    output_root: PathBuf,
    permits: Arc<Semaphore>,
    queued: Arc<AtomicUsize>,
    shutdown: Arc<AtomicBool>,
}

impl Dispatcher {
    async fn run(self, mut receiver: mpsc::Receiver<QueueEntry>) {
        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                break;
            }

            // Wait for a free slot first so pops stay in FIFO order.
            let permit = match self.permits.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };

            // Short-timeout pop so the loop keeps observing shutdown.
            let entry = match timeout(POP_TIMEOUT, receiver.recv()).await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(_) => continue,
            };
            self.queued.fetch_sub(1, Ordering::SeqCst);

            let worker = Worker {
                registry: self.registry.clone(),
                adapter: self.adapter.clone(),
                output_root: self.output_root.clone(),
            };
            tokio::task::spawn_blocking(move || {
                worker.run(entry.job_id, entry.on_complete);
                drop(permit);
            });
        }

        tracing::info!("Conversion dispatcher stopped");
    }
}

/// Executes one job's full pipeline on a blocking thread. All mutation
/// of the job's state happens here; readers see whole snapshots
/// republished through the registry.
struct Worker {
    registry: Arc<JobRegistry>,
    adapter: Arc<ConversionAdapter>,
    output_root: PathBuf,
}

impl Worker {
    fn run(self, job_id: Uuid, on_complete: CompletionCallback) {
        let Some(mut job) = self.registry.get(job_id) else {
            tracing::info!("Job {} was removed before dispatch, skipping", job_id);
            return;
        };

        job.status = JobStatus::Processing;
        job.progress = 10;
        job.message = "Starting document conversion...".to_string();
        self.registry.sync(&job);
        tracing::info!("Processing job {} ({})", job.id, job.original_filename);

        // Finalization runs regardless of how the pipeline ends, so the
        // completion callback fires exactly once per job.
        if let Err(e) = self.execute(&mut job) {
            job.status = JobStatus::Failed;
            job.error = Some(e.to_string());
            job.message = format!("Conversion failed: {}", e);
            tracing::error!("Job {} failed: {}", job.id, e);
        }

        job.completed_at = Some(Utc::now());
        self.registry.sync(&job);
        on_complete(&job);
    }

    fn execute(&self, job: &mut ConversionJob) -> Result<()> {
        job.progress = 20;
        job.message = if job.settings.ocr.enabled {
            format!(
                "Analyzing document with OCR ({}, {})...",
                job.settings.ocr.backend, job.settings.ocr.language
            )
        } else {
            "Analyzing document structure...".to_string()
        };
        self.registry.sync(job);

        let outcome = self.adapter.convert(&job.input_path, &job.settings)?;

        job.progress = 50;
        job.message = "Processing document content...".to_string();
        self.registry.sync(job);

        if outcome.output.outcome == crate::engine::ConversionOutcome::Failure {
            let mut message = "Conversion failed with status: failure".to_string();
            if !outcome.output.warnings.is_empty() {
                message.push_str(&format!(" - {}", outcome.output.warnings.join("; ")));
            }
            return Err(Error::Conversion(message));
        }

        let output_dir = self.output_root.join(job.id.to_string());
        let registry = &self.registry;
        materialize(&outcome.output, job, &output_dir, &|snapshot| {
            registry.sync(snapshot)
        })?;

        job.status = JobStatus::Completed;
        job.progress = 100;
        job.message = if outcome.degraded {
            "Converted without OCR (OCR initialization failed)".to_string()
        } else if outcome.output.outcome == crate::engine::ConversionOutcome::PartialSuccess {
            "Conversion completed with some warnings".to_string()
        } else {
            "Conversion completed successfully".to_string()
        };
        tracing::info!("Job {} completed", job.id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::basic::BasicEngineFactory;
    use crate::settings::ConversionSettings;
    use std::fs;
    use std::sync::atomic::AtomicUsize;

    async fn wait_terminal(registry: &JobRegistry, id: Uuid) -> ConversionJob {
        for _ in 0..500 {
            if let Some(job) = registry.get(id) {
                if job.status.is_terminal() {
                    return job;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {} never reached a terminal state", id);
    }

    fn scheduler_with_basic_engine(
        output_root: PathBuf,
    ) -> (Arc<JobRegistry>, ConversionScheduler) {
        let registry = Arc::new(JobRegistry::new());
        let adapter = Arc::new(ConversionAdapter::new(Arc::new(BasicEngineFactory)));
        let scheduler =
            ConversionScheduler::start(registry.clone(), adapter, output_root, 2, 100);
        (registry, scheduler)
    }

    #[tokio::test]
    async fn test_submit_stamps_queue_position() {
        let dir = tempfile::tempdir().unwrap();
        let (registry, scheduler) = scheduler_with_basic_engine(dir.path().to_path_buf());

        let input = dir.path().join("note.txt");
        fs::write(&input, "hello world").unwrap();
        let id = registry.create(input, "note.txt".to_string(), ConversionSettings::default());

        scheduler.submit(id, Box::new(|_| {})).unwrap();
        let job = registry.get(id).unwrap();
        assert!(
            job.message.starts_with("Queued for processing")
                || job.status != JobStatus::Pending,
            "unexpected message: {}",
            job.message
        );

        let done = wait_terminal(&registry, id).await;
        assert_eq!(done.status, JobStatus::Completed);
        assert_eq!(done.progress, 100);
    }

    #[tokio::test]
    async fn test_removed_job_is_skipped_without_callback() {
        let dir = tempfile::tempdir().unwrap();
        let (registry, scheduler) = scheduler_with_basic_engine(dir.path().to_path_buf());

        let input = dir.path().join("gone.txt");
        fs::write(&input, "soon removed").unwrap();
        let id = registry.create(input, "gone.txt".to_string(), ConversionSettings::default());

        let fired = Arc::new(AtomicUsize::new(0));
        let fired_in_cb = fired.clone();
        registry.remove(id);
        scheduler
            .submit(id, Box::new(move |_| {
                fired_in_cb.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert!(registry.get(id).is_none());
    }

    #[tokio::test]
    async fn test_shutdown_stops_dispatch() {
        let dir = tempfile::tempdir().unwrap();
        let (registry, scheduler) = scheduler_with_basic_engine(dir.path().to_path_buf());

        scheduler.shutdown();
        tokio::time::sleep(Duration::from_millis(700)).await;

        let input = dir.path().join("late.txt");
        fs::write(&input, "never runs").unwrap();
        let id = registry.create(input, "late.txt".to_string(), ConversionSettings::default());
        // Submission may still enqueue, but nothing picks the job up.
        let _ = scheduler.submit(id, Box::new(|_| {}));
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(registry.get(id).unwrap().status, JobStatus::Pending);
    }
}
