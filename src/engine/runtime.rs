// src/engine/runtime.rs

use std::collections::VecDeque;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::definition::JobDefinition;
use crate::errors::{Result, StaxError};
use crate::events::EventSink;
use crate::exec::RemoteCallBackend;

use super::{
    Job, JobCommand, JobEvent, JobId, JobOutcome, RequestId, RequestOutcome, SubJobOutcome,
    SubJobRequest, TimedEventQueue,
};

/// Starts sub-jobs on behalf of a running job.
///
/// The launcher reports back on `reply` with `SubJobStarted` once the
/// sub-job exists and `SubJobCompleted` when it ends (or fails to start).
pub trait SubJobLauncher: Send + Sync {
    fn launch(
        &self,
        parent: JobId,
        id: RequestId,
        request: SubJobRequest,
        reply: mpsc::Sender<JobEvent>,
    );
}

/// Loads the job documents that `import` elements name.
pub trait DocumentLoader: Send + Sync {
    fn load(&self, file: &Path) -> Result<Arc<JobDefinition>>;
}

/// Drives one job in response to `JobEvent`s, and delegates timers, remote
/// requests, sub-jobs and lifecycle events to its collaborators.
///
/// This is a pure IO shell around [`Job`], which contains all the execution
/// semantics. This struct handles async IO: reading events from the channel
/// and executing the commands the job emits.
pub struct JobRunner<B: RemoteCallBackend> {
    job: Job,
    event_rx: mpsc::Receiver<JobEvent>,
    event_tx: mpsc::Sender<JobEvent>,
    backend: B,
    timers: TimedEventQueue,
    sink: Arc<dyn EventSink>,
    launcher: Option<Arc<dyn SubJobLauncher>>,
    documents: Option<Arc<dyn DocumentLoader>>,
    /// Events generated by the runner itself, handled before the channel.
    pending: VecDeque<JobEvent>,
}

impl<B: RemoteCallBackend> fmt::Debug for JobRunner<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobRunner")
            .field("job", &self.job.id())
            .field("pending", &self.pending.len())
            .finish_non_exhaustive()
    }
}

impl<B: RemoteCallBackend> JobRunner<B> {
    /// `event_tx` must be the sending half of `event_rx`; it is handed to
    /// the timed event queue and the sub-job launcher for replies.
    pub fn new(
        job: Job,
        event_tx: mpsc::Sender<JobEvent>,
        event_rx: mpsc::Receiver<JobEvent>,
        backend: B,
        timers: TimedEventQueue,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            job,
            event_rx,
            event_tx,
            backend,
            timers,
            sink,
            launcher: None,
            documents: None,
            pending: VecDeque::new(),
        }
    }

    pub fn with_launcher(mut self, launcher: Arc<dyn SubJobLauncher>) -> Self {
        self.launcher = Some(launcher);
        self
    }

    pub fn with_documents(mut self, documents: Arc<dyn DocumentLoader>) -> Self {
        self.documents = Some(documents);
        self
    }

    /// Main event loop.
    ///
    /// - Starts the job and runs its threads until they are all blocked.
    /// - Executes the commands the job emitted.
    /// - Waits for the next `JobEvent` and feeds it into the job.
    ///
    /// Returns once the job has an outcome.
    pub async fn run(mut self) -> Result<JobOutcome> {
        let job = self.job.id();
        info!(job, name = %self.job.name(), "job runner started");

        self.job.start();
        loop {
            self.job.run_until_idle();

            for command in self.job.drain_commands() {
                self.execute_command(command).await;
            }

            if let Some(outcome) = self.job.outcome() {
                info!(job, status = %outcome.status, "job runner exiting");
                return Ok(outcome.clone());
            }

            let event = match self.pending.pop_front() {
                Some(event) => event,
                None => self.event_rx.recv().await.ok_or_else(|| {
                    StaxError::ChannelClosed(format!("event channel of job {job}"))
                })?,
            };
            debug!(job, ?event, "job received event");
            self.job.handle_event(event);
        }
    }

    /// Execute a single command from the job.
    async fn execute_command(&mut self, command: JobCommand) {
        let job = self.job.id();
        match command {
            JobCommand::ScheduleTimer { id, after } => {
                self.timers.add(job, id, after, self.event_tx.clone());
            }
            JobCommand::CancelTimer { id } => self.timers.cancel(job, id),
            JobCommand::SubmitRequest { id, request } => {
                if let Err(err) = self.backend.submit(id, request).await {
                    warn!(job, request = id, error = %err, "remote request could not be submitted");
                    self.pending.push_back(JobEvent::RequestCompleted {
                        id,
                        outcome: RequestOutcome::StartFailed(err.to_string()),
                    });
                }
            }
            JobCommand::CancelRequest { id } => {
                if let Err(err) = self.backend.cancel(id).await {
                    debug!(job, request = id, error = %err, "remote request could not be cancelled");
                }
            }
            JobCommand::StartSubJob { id, request } => match &self.launcher {
                Some(launcher) => launcher.launch(job, id, request, self.event_tx.clone()),
                None => {
                    warn!(job, request = id, file = %request.file.display(), "no sub-job launcher configured");
                    self.pending.push_back(JobEvent::SubJobCompleted {
                        id,
                        outcome: SubJobOutcome::StartFailed(
                            "sub-jobs are not available in this runner".to_string(),
                        ),
                    });
                }
            },
            JobCommand::LoadDocument { id, file } => {
                let outcome = match &self.documents {
                    Some(documents) => documents.load(&file).map_err(|err| {
                        warn!(job, request = id, file = %file.display(), error = %err, "imported document could not be loaded");
                        err.to_string()
                    }),
                    None => {
                        warn!(job, request = id, file = %file.display(), "no document loader configured");
                        Err("imports are not available in this runner".to_string())
                    }
                };
                self.pending.push_back(JobEvent::DocumentLoaded { id, outcome });
            }
            JobCommand::Publish(event) => self.sink.generate_event(&event),
        }
    }
}
