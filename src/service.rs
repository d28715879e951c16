// src/service.rs

//! Service front-end.
//!
//! A [`StaxService`] owns what all of its jobs share: the timed event queue,
//! the cache of parsed job definitions, the expression evaluator, the event
//! sink and the factory for remote-call backends. It starts jobs (each on
//! its own tokio task), routes external control operations to them, starts
//! sub-jobs on their behalf and loads the documents they import.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::anyhow;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::HitCache;
use crate::config::{ServiceConfig, load_job};
use crate::definition::JobDefinition;
use crate::engine::{
    ControlError, DocumentLoader, Job, JobEvent, JobHandle, JobId, JobOptions, JobOutcome, JobRunner,
    JobSettings, RequestId, SubJobLauncher, SubJobOutcome, SubJobRequest, TimedEventQueue,
};
use crate::errors::{Result, StaxError};
use crate::events::{EventKind, EventSink, LifecycleEvent, TracingEventSink};
use crate::exec::{LocalServiceBackend, RemoteCallBackend};
use crate::expr::{CelEvaluator, ExpressionEvaluator};
use crate::registry::{BlockInfo, TestcaseSummary};

/// Capacity of each job's event channel.
const JOB_CHANNEL_CAPACITY: usize = 256;

/// Machine name recorded in source locations of local documents.
pub const LOCAL_MACHINE: &str = "local";

/// Creates the remote-call backend of a new job.
pub trait BackendFactory: Send + Sync {
    fn create(&self, job_tx: mpsc::Sender<JobEvent>) -> Box<dyn RemoteCallBackend>;
}

impl<F> BackendFactory for F
where
    F: Fn(mpsc::Sender<JobEvent>) -> Box<dyn RemoteCallBackend> + Send + Sync,
{
    fn create(&self, job_tx: mpsc::Sender<JobEvent>) -> Box<dyn RemoteCallBackend> {
        self(job_tx)
    }
}

/// Backends serving the built-in local services.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalBackendFactory;

impl BackendFactory for LocalBackendFactory {
    fn create(&self, job_tx: mpsc::Sender<JobEvent>) -> Box<dyn RemoteCallBackend> {
        Box::new(LocalServiceBackend::new(job_tx))
    }
}

/// A job that has been started.
#[derive(Debug)]
pub struct SubmittedJob {
    pub handle: JobHandle,
    pub outcome: JoinHandle<Result<JobOutcome>>,
}

impl SubmittedJob {
    pub fn id(&self) -> JobId {
        self.handle.job()
    }

    /// Wait for the job to end.
    pub async fn wait(self) -> Result<JobOutcome> {
        self.outcome
            .await
            .map_err(|e| StaxError::Other(anyhow!("job task failed: {e}")))?
    }
}

struct ServiceInner {
    config: ServiceConfig,
    evaluator: Arc<dyn ExpressionEvaluator>,
    timers: TimedEventQueue,
    documents: Mutex<HitCache<PathBuf, Arc<JobDefinition>>>,
    jobs: Mutex<BTreeMap<JobId, JobHandle>>,
    next_job: AtomicU32,
    sink: Arc<dyn EventSink>,
    backends: Arc<dyn BackendFactory>,
}

/// Cheap to clone; clones share the same service.
#[derive(Clone)]
pub struct StaxService {
    inner: Arc<ServiceInner>,
}

impl std::fmt::Debug for StaxService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaxService")
            .field("config", &self.inner.config)
            .field("jobs", &self.job_ids())
            .finish_non_exhaustive()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl StaxService {
    /// Service with the tracing event sink and local backends. Must be
    /// called from within a tokio runtime.
    pub fn new(config: ServiceConfig) -> Self {
        Self::with_parts(
            config,
            Arc::new(TracingEventSink),
            Arc::new(LocalBackendFactory),
        )
    }

    pub fn with_parts(
        config: ServiceConfig,
        sink: Arc<dyn EventSink>,
        backends: Arc<dyn BackendFactory>,
    ) -> Self {
        let cache_size = config.config.document_cache_size;
        Self {
            inner: Arc::new(ServiceInner {
                config,
                evaluator: Arc::new(CelEvaluator::new()),
                timers: TimedEventQueue::spawn(),
                documents: Mutex::new(HitCache::new(cache_size)),
                jobs: Mutex::new(BTreeMap::new()),
                next_job: AtomicU32::new(1),
                sink,
                backends,
            }),
        }
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.inner.config
    }

    /// Load and validate a job document, using the definition cache.
    pub fn load_definition(&self, path: &Path) -> Result<Arc<JobDefinition>> {
        let key = path.to_path_buf();
        let mut documents = lock(&self.inner.documents);
        documents.get_or_try_insert_with(&key, || {
            debug!(file = %path.display(), "loading job definition");
            load_job(path, LOCAL_MACHINE).map(Arc::new)
        })
    }

    /// Drop a cached definition so the next load re-reads the file.
    pub fn invalidate_definition(&self, path: &Path) {
        lock(&self.inner.documents).invalidate(&path.to_path_buf());
    }

    /// Start a job on its own task.
    pub fn submit(&self, definition: Arc<JobDefinition>, options: JobOptions) -> SubmittedJob {
        let inner = &self.inner;
        let id = inner.next_job.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(JOB_CHANNEL_CAPACITY);

        let settings = JobSettings::from_config(&inner.config.config);
        let job = Job::new(id, definition, Arc::clone(&inner.evaluator), settings, options);
        let backend = inner.backends.create(tx.clone());
        let launcher: Arc<dyn SubJobLauncher> = Arc::new(self.clone());
        let documents: Arc<dyn DocumentLoader> = Arc::new(self.clone());
        let runner = JobRunner::new(
            job,
            tx.clone(),
            rx,
            backend,
            inner.timers.clone(),
            Arc::clone(&inner.sink),
        )
        .with_launcher(launcher)
        .with_documents(documents);

        let handle = JobHandle::new(id, tx);
        lock(&inner.jobs).insert(id, handle.clone());
        info!(job = id, "job submitted");

        let service = self.clone();
        let outcome = tokio::spawn(async move {
            let result = runner.run().await;
            lock(&service.inner.jobs).remove(&id);
            if let Err(err) = &result {
                warn!(job = id, error = %err, "job runner failed");
            }
            result
        });

        SubmittedJob { handle, outcome }
    }

    /// Load `path`, run it and wait for the outcome.
    pub async fn run_file(&self, path: &Path, options: JobOptions) -> Result<JobOutcome> {
        let definition = self.load_definition(path)?;
        self.submit(definition, options).wait().await
    }

    pub fn job_ids(&self) -> Vec<JobId> {
        lock(&self.inner.jobs).keys().copied().collect()
    }

    pub fn handle(&self, job: JobId) -> std::result::Result<JobHandle, ControlError> {
        lock(&self.inner.jobs)
            .get(&job)
            .cloned()
            .ok_or(ControlError::JobNotFound(job))
    }

    pub async fn hold_block(
        &self,
        job: JobId,
        block: &str,
        timeout_ms: u64,
    ) -> std::result::Result<(), ControlError> {
        self.handle(job)?.hold_block(block, timeout_ms).await
    }

    pub async fn release_block(&self, job: JobId, block: &str) -> std::result::Result<(), ControlError> {
        self.handle(job)?.release_block(block).await
    }

    pub async fn terminate_block(&self, job: JobId, block: &str) -> std::result::Result<(), ControlError> {
        self.handle(job)?.terminate_block(block).await
    }

    pub async fn terminate_job(&self, job: JobId) -> std::result::Result<(), ControlError> {
        self.handle(job)?.terminate_job().await
    }

    pub async fn resume_breakpoint(&self, job: JobId, id: u64) -> std::result::Result<(), ControlError> {
        self.handle(job)?.resume_breakpoint(id).await
    }

    pub async fn list_blocks(&self, job: JobId) -> std::result::Result<Vec<BlockInfo>, ControlError> {
        self.handle(job)?.list_blocks().await
    }

    pub async fn list_testcases(
        &self,
        job: JobId,
    ) -> std::result::Result<Vec<TestcaseSummary>, ControlError> {
        self.handle(job)?.list_testcases().await
    }
}

impl DocumentLoader for StaxService {
    fn load(&self, file: &Path) -> Result<Arc<JobDefinition>> {
        self.load_definition(file)
    }
}

impl SubJobLauncher for StaxService {
    fn launch(
        &self,
        parent: JobId,
        id: RequestId,
        request: SubJobRequest,
        reply: mpsc::Sender<JobEvent>,
    ) {
        let service = self.clone();
        tokio::spawn(async move {
            let definition = match service.load_definition(&request.file) {
                Ok(definition) => definition,
                Err(err) => {
                    warn!(job = parent, request = id, file = %request.file.display(), error = %err, "sub-job failed to start");
                    let outcome = SubJobOutcome::StartFailed(err.to_string());
                    if reply.send(JobEvent::SubJobCompleted { id, outcome }).await.is_err() {
                        debug!(job = parent, request = id, "parent job ended before sub-job start failure");
                    }
                    return;
                }
            };

            let options = JobOptions {
                name: request.name.clone(),
                function: request.function.clone(),
                args: request.args.clone(),
                ..JobOptions::default()
            };
            let submitted = service.submit(definition, options);
            let child = submitted.id();
            info!(job = parent, sub_job = child, file = %request.file.display(), "sub-job started");
            service.inner.sink.generate_event(
                &LifecycleEvent::new(parent, EventKind::SubJob, child.to_string(), "start")
                    .with("file", request.file.display().to_string()),
            );
            if reply.send(JobEvent::SubJobStarted { id, job: child }).await.is_err() {
                debug!(job = parent, sub_job = child, "parent job ended before sub-job start notice");
            }

            let outcome = match submitted.wait().await {
                Ok(outcome) => SubJobOutcome::Completed(Box::new(outcome)),
                Err(err) => SubJobOutcome::StartFailed(err.to_string()),
            };
            service.inner.sink.generate_event(&LifecycleEvent::new(
                parent,
                EventKind::SubJob,
                child.to_string(),
                "end",
            ));
            if reply.send(JobEvent::SubJobCompleted { id, outcome }).await.is_err() {
                debug!(job = parent, sub_job = child, "parent job ended before sub-job completion");
            }
        });
    }
}
