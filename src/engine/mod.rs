// src/engine/mod.rs

//! Job execution engine.
//!
//! This module ties together:
//! - the per-job core ([`Job`]): thread arena, run queue, condition stacks
//!   and the job-scoped registries,
//! - the action-facing API ([`ThreadContext`]),
//! - the timed event queue shared by every job of a service,
//! - the async shell ([`JobRunner`]) that owns one `Job`, feeds it
//!   [`JobEvent`]s and executes the [`JobCommand`]s it emits.
//!
//! The core never performs IO. Everything that leaves the job (timers,
//! remote requests, sub-jobs, imported documents, lifecycle events) is
//! expressed as a command.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local};
use tokio::sync::oneshot;

use crate::definition::JobDefinition;
use crate::events::LifecycleEvent;
use crate::expr::Value;
use crate::registry::TestcaseSummary;

pub type JobId = u32;
pub type ThreadId = u32;
pub type FrameId = u64;
pub type ConditionId = u64;
pub type TimedEventId = u64;
pub type RequestId = u64;

/// Thread number of the root STAX-Thread of every job.
pub const ROOT_THREAD: ThreadId = 1;

/// Name of the block wrapping the whole job. Terminating it terminates the job.
pub const MAIN_BLOCK: &str = "main";

/// Why a thread stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ThreadEnd {
    #[default]
    Normal,
    StoppedByParent,
    DuplicateSignal,
}

/// Final status of a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    Normal,
    /// Conditions were still pending when the root thread ended.
    Abnormal { reason: String },
    /// The `main` block was terminated.
    Terminated { reason: Option<String> },
}

impl JobStatus {
    pub fn is_normal(&self) -> bool {
        matches!(self, JobStatus::Normal)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Normal => f.write_str("normal"),
            JobStatus::Abnormal { reason } => write!(f, "abnormal ({reason})"),
            JobStatus::Terminated { reason: Some(reason) } => write!(f, "terminated ({reason})"),
            JobStatus::Terminated { reason: None } => f.write_str("terminated"),
        }
    }
}

/// Everything a caller learns about a finished job.
#[derive(Debug, Clone)]
pub struct JobOutcome {
    pub job: JobId,
    pub name: String,
    pub status: JobStatus,
    /// `STAXResult` of the start function.
    pub result: Value,
    pub testcases: Vec<TestcaseSummary>,
    pub started: DateTime<Local>,
    pub ended: DateTime<Local>,
}

/// A request for the remote-call collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteRequest {
    pub location: String,
    pub service: String,
    pub request: String,
}

/// Completion of a remote request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestOutcome {
    Completed { rc: i32, result: String },
    StartFailed(String),
}

/// A request to start a sub-job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubJobRequest {
    pub file: PathBuf,
    pub name: Option<String>,
    pub function: Option<String>,
    pub args: Option<String>,
}

#[derive(Debug, Clone)]
pub enum SubJobOutcome {
    Completed(Box<JobOutcome>),
    StartFailed(String),
}

/// A document loaded for `import`, or why it could not be loaded.
pub type DocumentOutcome = Result<Arc<JobDefinition>, String>;

/// Inputs to the job core.
#[derive(Debug)]
pub enum JobEvent {
    /// A timed event scheduled by the job fired.
    TimerFired { id: TimedEventId },
    RequestCompleted { id: RequestId, outcome: RequestOutcome },
    SubJobStarted { id: RequestId, job: JobId },
    SubJobCompleted { id: RequestId, outcome: SubJobOutcome },
    DocumentLoaded { id: RequestId, outcome: DocumentOutcome },
    /// External operation; the reply goes back over the oneshot.
    Control {
        op: ControlOp,
        reply: oneshot::Sender<Result<ControlReply, ControlError>>,
    },
}

/// Outputs of the job core, executed by the async shell.
#[derive(Debug, Clone)]
pub enum JobCommand {
    ScheduleTimer { id: TimedEventId, after: Duration },
    CancelTimer { id: TimedEventId },
    SubmitRequest { id: RequestId, request: RemoteRequest },
    CancelRequest { id: RequestId },
    StartSubJob { id: RequestId, request: SubJobRequest },
    /// Load another job document for `import`.
    LoadDocument { id: RequestId, file: PathBuf },
    Publish(LifecycleEvent),
}

pub mod blocks;
pub mod condition;
pub mod context;
pub mod control;
pub mod job;
pub mod runtime;
pub mod signals;
pub mod thread;
pub mod timed_events;

pub use condition::{Condition, ConditionKind, ConditionStack, ExceptionInfo};
pub use context::ThreadContext;
pub use control::{ControlError, ControlOp, ControlReply, JobHandle};
pub use job::{Job, JobOptions, JobSettings};
pub use runtime::{DocumentLoader, JobRunner, SubJobLauncher};
pub use thread::{ThreadInfo, ThreadState};
pub use timed_events::TimedEventQueue;
