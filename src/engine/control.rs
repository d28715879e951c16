// src/engine/control.rs

//! External control operations (HOLD / RELEASE / TERMINATE / RESUME / LIST).
//!
//! Operations travel to the job's runner as [`JobEvent::Control`] and are
//! applied between steps, so they never interleave with a running action.

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use crate::registry::{BlockInfo, TestcaseSummary};

use super::{JobEvent, JobId, ThreadInfo};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlOp {
    HoldBlock { block: String, timeout_ms: u64 },
    ReleaseBlock { block: String },
    TerminateBlock { block: String },
    TerminateJob,
    ResumeBreakpoint { id: u64 },
    ListBlocks,
    ListThreads,
    ListTestcases,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlReply {
    Done,
    Blocks(Vec<BlockInfo>),
    Threads(Vec<ThreadInfo>),
    Testcases(Vec<TestcaseSummary>),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ControlError {
    #[error("Job {0} does not exist")]
    JobNotFound(JobId),

    #[error("Job {0} has already finished")]
    JobComplete(JobId),

    #[error("Block '{0}' does not exist")]
    BlockNotFound(String),

    #[error("Block '{0}' is already held")]
    BlockAlreadyHeld(String),

    #[error("Block '{0}' is not held")]
    BlockNotHeld(String),

    #[error("Block '{0}' is already terminating")]
    BlockAlreadyTerminating(String),

    #[error("Breakpoint {0} does not exist")]
    BreakpointNotFound(u64),

    #[error("Job {0} stopped accepting requests")]
    Disconnected(JobId),
}

/// Cloneable handle for sending control operations to a running job.
#[derive(Debug, Clone)]
pub struct JobHandle {
    job: JobId,
    tx: mpsc::Sender<JobEvent>,
}

impl JobHandle {
    pub fn new(job: JobId, tx: mpsc::Sender<JobEvent>) -> Self {
        Self { job, tx }
    }

    pub fn job(&self) -> JobId {
        self.job
    }

    pub async fn send(&self, op: ControlOp) -> Result<ControlReply, ControlError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(JobEvent::Control { op, reply })
            .await
            .map_err(|_| ControlError::Disconnected(self.job))?;
        rx.await.map_err(|_| ControlError::Disconnected(self.job))?
    }

    pub async fn hold_block(&self, block: &str, timeout_ms: u64) -> Result<(), ControlError> {
        self.send(ControlOp::HoldBlock {
            block: block.to_string(),
            timeout_ms,
        })
        .await
        .map(|_| ())
    }

    pub async fn release_block(&self, block: &str) -> Result<(), ControlError> {
        self.send(ControlOp::ReleaseBlock {
            block: block.to_string(),
        })
        .await
        .map(|_| ())
    }

    pub async fn terminate_block(&self, block: &str) -> Result<(), ControlError> {
        self.send(ControlOp::TerminateBlock {
            block: block.to_string(),
        })
        .await
        .map(|_| ())
    }

    pub async fn terminate_job(&self) -> Result<(), ControlError> {
        self.send(ControlOp::TerminateJob).await.map(|_| ())
    }

    pub async fn resume_breakpoint(&self, id: u64) -> Result<(), ControlError> {
        self.send(ControlOp::ResumeBreakpoint { id }).await.map(|_| ())
    }

    pub async fn list_blocks(&self) -> Result<Vec<BlockInfo>, ControlError> {
        match self.send(ControlOp::ListBlocks).await? {
            ControlReply::Blocks(blocks) => Ok(blocks),
            _ => Ok(Vec::new()),
        }
    }

    pub async fn list_threads(&self) -> Result<Vec<ThreadInfo>, ControlError> {
        match self.send(ControlOp::ListThreads).await? {
            ControlReply::Threads(threads) => Ok(threads),
            _ => Ok(Vec::new()),
        }
    }

    pub async fn list_testcases(&self) -> Result<Vec<TestcaseSummary>, ControlError> {
        match self.send(ControlOp::ListTestcases).await? {
            ControlReply::Testcases(testcases) => Ok(testcases),
            _ => Ok(Vec::new()),
        }
    }
}
