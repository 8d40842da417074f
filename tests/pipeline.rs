//! End-to-end tests for the conversion pipeline: scheduler dispatch,
//! bounded concurrency, degraded-mode retry, and completion
//! notification, driven with stub engines.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use uuid::Uuid;

use docmill::conversion::{
    ConversionAdapter, ConversionJob, ConversionScheduler, JobRegistry, JobStatus,
};
use docmill::engine::basic::BasicEngineFactory;
use docmill::engine::{
    ConversionEngine, ConversionOutput, DocItem, EngineDocument, EngineError, EngineFactory,
    EngineResult, PipelineOptions,
};
use docmill::settings::ConversionSettings;
use docmill::storage::HistoryDb;

/// Engine that sleeps, tracking how many invocations overlap.
struct SlowEngine {
    delay: Duration,
    running: Arc<AtomicUsize>,
    max_running: Arc<AtomicUsize>,
    started: Arc<Mutex<Vec<PathBuf>>>,
}

impl ConversionEngine for SlowEngine {
    fn convert(&self, input: &Path) -> EngineResult<ConversionOutput> {
        self.started.lock().unwrap().push(input.to_path_buf());
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(now, Ordering::SeqCst);

        std::thread::sleep(self.delay);
        self.running.fetch_sub(1, Ordering::SeqCst);

        let mut doc = EngineDocument::new(
            input.file_stem().and_then(|s| s.to_str()).unwrap_or("doc"),
        );
        doc.items = vec![DocItem::Paragraph {
            text: "converted".to_string(),
            page: Some(1),
        }];
        Ok(ConversionOutput::success(doc))
    }
}

struct SlowFactory {
    delay: Duration,
    running: Arc<AtomicUsize>,
    max_running: Arc<AtomicUsize>,
    started: Arc<Mutex<Vec<PathBuf>>>,
}

impl SlowFactory {
    fn new(delay: Duration) -> Self {
        Self {
            delay,
            running: Arc::new(AtomicUsize::new(0)),
            max_running: Arc::new(AtomicUsize::new(0)),
            started: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl EngineFactory for SlowFactory {
    fn create(&self, _options: &PipelineOptions) -> EngineResult<Arc<dyn ConversionEngine>> {
        Ok(Arc::new(SlowEngine {
            delay: self.delay,
            running: self.running.clone(),
            max_running: self.max_running.clone(),
            started: self.started.clone(),
        }))
    }
}

/// Engine whose failures depend on whether OCR is enabled.
struct FailingEngine {
    message: String,
    fail_without_ocr: bool,
    do_ocr: bool,
}

impl ConversionEngine for FailingEngine {
    fn convert(&self, _input: &Path) -> EngineResult<ConversionOutput> {
        if self.do_ocr || self.fail_without_ocr {
            return Err(EngineError::Pipeline(self.message.clone()));
        }
        Ok(ConversionOutput::success(EngineDocument::new("recovered")))
    }
}

struct FailingFactory {
    message: String,
    fail_without_ocr: bool,
}

impl EngineFactory for FailingFactory {
    fn create(&self, options: &PipelineOptions) -> EngineResult<Arc<dyn ConversionEngine>> {
        Ok(Arc::new(FailingEngine {
            message: self.message.clone(),
            fail_without_ocr: self.fail_without_ocr,
            do_ocr: options.do_ocr,
        }))
    }
}

struct Harness {
    _dir: tempfile::TempDir,
    registry: Arc<JobRegistry>,
    scheduler: ConversionScheduler,
    input_dir: PathBuf,
}

impl Harness {
    fn new(factory: Arc<dyn EngineFactory>, max_concurrent_jobs: usize) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let input_dir = dir.path().join("inputs");
        fs::create_dir_all(&input_dir).unwrap();

        let registry = Arc::new(JobRegistry::new());
        let adapter = Arc::new(ConversionAdapter::new(factory));
        let scheduler = ConversionScheduler::start(
            registry.clone(),
            adapter,
            dir.path().join("outputs"),
            max_concurrent_jobs,
            100,
        );

        Self {
            _dir: dir,
            registry,
            scheduler,
            input_dir,
        }
    }

    fn submit(&self, name: &str, content: &str, settings: ConversionSettings) -> Uuid {
        let input = self.input_dir.join(name);
        fs::write(&input, content).unwrap();
        let id = self
            .registry
            .create(input, name.to_string(), settings);
        self.scheduler.submit(id, Box::new(|_| {})).unwrap();
        id
    }

    fn submit_with_callback(
        &self,
        name: &str,
        settings: ConversionSettings,
        on_complete: docmill::conversion::CompletionCallback,
    ) -> Uuid {
        let input = self.input_dir.join(name);
        fs::write(&input, "content").unwrap();
        let id = self
            .registry
            .create(input, name.to_string(), settings);
        self.scheduler.submit(id, on_complete).unwrap();
        id
    }

    async fn wait_terminal(&self, id: Uuid) -> ConversionJob {
        for _ in 0..1000 {
            if let Some(job) = self.registry.get(id) {
                if job.status.is_terminal() {
                    return job;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {} never reached a terminal state", id);
    }
}

#[tokio::test]
async fn test_text_conversion_completes_end_to_end() {
    let harness = Harness::new(Arc::new(BasicEngineFactory), 2);
    let mut settings = ConversionSettings::default();
    settings.ocr.enabled = false;
    settings.tables.enabled = false;

    let id = harness.submit("notes.txt", "First paragraph.\n\nSecond one.", settings);
    let job = harness.wait_terminal(id).await;

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.progress, 100);
    assert!(job.error.is_none());

    let summary = job.summary.as_ref().unwrap();
    assert_eq!(summary.images_count, 0);
    assert_eq!(summary.tables_count, 0);
    assert!(!summary.markdown_preview.is_empty());

    // The markdown artifact starts with exactly the preview text
    let md_path = job.output_paths.get("markdown").unwrap();
    let content = fs::read_to_string(md_path).unwrap();
    assert!(content.starts_with(&summary.markdown_preview));
}

#[tokio::test]
async fn test_at_most_n_jobs_processing() {
    let factory = Arc::new(SlowFactory::new(Duration::from_millis(150)));
    let max_running = factory.max_running.clone();
    let harness = Harness::new(factory, 2);

    let ids: Vec<Uuid> = (0..6)
        .map(|i| {
            harness.submit(
                &format!("doc{}.txt", i),
                "text",
                ConversionSettings::default(),
            )
        })
        .collect();

    for id in ids {
        let job = harness.wait_terminal(id).await;
        assert_eq!(job.status, JobStatus::Completed);
    }

    assert!(
        max_running.load(Ordering::SeqCst) <= 2,
        "more than 2 jobs ran concurrently: {}",
        max_running.load(Ordering::SeqCst)
    );
}

#[tokio::test]
async fn test_dispatch_order_is_fifo_at_capacity_one() {
    let factory = Arc::new(SlowFactory::new(Duration::from_millis(50)));
    let started = factory.started.clone();
    let harness = Harness::new(factory, 1);

    let first = harness.submit("first.txt", "a", ConversionSettings::default());
    let second = harness.submit("second.txt", "b", ConversionSettings::default());

    harness.wait_terminal(first).await;
    harness.wait_terminal(second).await;

    let order = started.lock().unwrap();
    assert_eq!(order.len(), 2);
    assert!(order[0].ends_with("first.txt"));
    assert!(order[1].ends_with("second.txt"));
}

#[tokio::test]
async fn test_notifier_fires_exactly_once_on_failure() {
    let harness = Harness::new(
        Arc::new(FailingFactory {
            message: "disk full".to_string(),
            fail_without_ocr: true,
        }),
        2,
    );

    let fired = Arc::new(AtomicUsize::new(0));
    let statuses = Arc::new(Mutex::new(Vec::new()));
    let fired_cb = fired.clone();
    let statuses_cb = statuses.clone();

    let id = harness.submit_with_callback(
        "doomed.pdf",
        ConversionSettings::default().without_ocr(),
        Box::new(move |job| {
            fired_cb.fetch_add(1, Ordering::SeqCst);
            statuses_cb.lock().unwrap().push(job.status);
            assert!(job.completed_at.is_some());
        }),
    );

    let job = harness.wait_terminal(id).await;
    // Give the callback a beat; it runs right after the final sync
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(fired.load(Ordering::SeqCst), 1);
    assert_eq!(*statuses.lock().unwrap(), vec![JobStatus::Failed]);
}

#[tokio::test]
async fn test_generic_engine_error_fails_verbatim() {
    let harness = Harness::new(
        Arc::new(FailingFactory {
            message: "disk full".to_string(),
            fail_without_ocr: true,
        }),
        2,
    );

    let id = harness.submit("broken.pdf", "x", ConversionSettings::default());
    let job = harness.wait_terminal(id).await;

    assert_eq!(job.status, JobStatus::Failed);
    let error = job.error.unwrap();
    assert!(error.contains("disk full"), "error was: {}", error);
}

#[tokio::test]
async fn test_cuda_error_retries_without_ocr_and_completes() {
    let harness = Harness::new(
        Arc::new(FailingFactory {
            message: "CUDA error: no kernel image is available".to_string(),
            fail_without_ocr: false,
        }),
        2,
    );

    let id = harness.submit("scan.pdf", "x", ConversionSettings::default());
    let job = harness.wait_terminal(id).await;

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.progress, 100);
    assert!(
        job.message.contains("without OCR"),
        "message was: {}",
        job.message
    );
}

#[tokio::test]
async fn test_status_never_regresses_from_terminal() {
    let harness = Harness::new(Arc::new(BasicEngineFactory), 2);

    let id = harness.submit("steady.txt", "some text", ConversionSettings::default());
    let job = harness.wait_terminal(id).await;
    assert_eq!(job.status, JobStatus::Completed);

    // Snapshot again after a delay: terminal state is absorbing
    tokio::time::sleep(Duration::from_millis(100)).await;
    let again = harness.registry.get(id).unwrap();
    assert_eq!(again.status, JobStatus::Completed);
    assert_eq!(again.progress, 100);
}

#[tokio::test]
async fn test_unknown_id_misses_registry_and_history() {
    let harness = Harness::new(Arc::new(BasicEngineFactory), 2);
    let history = HistoryDb::in_memory().unwrap();

    let unknown = Uuid::new_v4();
    assert!(harness.registry.get(unknown).is_none());
    assert!(history.get(unknown).unwrap().is_none());
}

#[tokio::test]
async fn test_chunking_enabled_produces_chunk_artifact() {
    let harness = Harness::new(Arc::new(BasicEngineFactory), 2);
    let mut settings = ConversionSettings::default();
    settings.chunking.enabled = true;
    settings.chunking.max_tokens = 16;

    let id = harness.submit(
        "chunky.md",
        "# Title\n\nSome body text that will be chunked.\n\nAnother paragraph here.",
        settings,
    );
    let job = harness.wait_terminal(id).await;

    assert_eq!(job.status, JobStatus::Completed);
    assert!(!job.chunks.is_empty());
    let chunks_path = job.output_paths.get("chunks").unwrap();
    let persisted: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(chunks_path).unwrap()).unwrap();
    assert_eq!(persisted.as_array().unwrap().len(), job.chunks.len());
}

#[tokio::test]
async fn test_unsupported_input_fails_with_engine_message() {
    let harness = Harness::new(Arc::new(BasicEngineFactory), 2);

    let id = harness.submit("image.tiff", "binary", ConversionSettings::default().without_ocr());
    let job = harness.wait_terminal(id).await;

    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.error.unwrap().contains("Unsupported input format"));
}
