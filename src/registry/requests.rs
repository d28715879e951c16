// src/registry/requests.rs

//! Outstanding remote requests, sub-jobs and document loads.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Local};
use tracing::{debug, warn};

use crate::engine::{
    FrameId, JobCommand, JobId, RemoteRequest, RequestId, SubJobRequest, ThreadId,
};

use super::JobComponent;

/// A remote request submitted by a `stafcmd` action.
#[derive(Debug, Clone)]
pub struct PendingRequest {
    pub thread: ThreadId,
    pub frame: FrameId,
    pub request: RemoteRequest,
    pub submitted: DateTime<Local>,
}

#[derive(Debug, Default)]
pub struct RequestRegistry {
    pending: BTreeMap<RequestId, PendingRequest>,
}

impl RequestRegistry {
    pub fn insert(&mut self, id: RequestId, pending: PendingRequest) {
        self.pending.insert(id, pending);
    }

    /// Remove an entry on completion or cancellation.
    pub fn take(&mut self, id: RequestId) -> Option<PendingRequest> {
        self.pending.remove(&id)
    }

    pub fn get(&self, id: RequestId) -> Option<&PendingRequest> {
        self.pending.get(&id)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&RequestId, &PendingRequest)> {
        self.pending.iter()
    }
}

impl JobComponent for RequestRegistry {
    fn name(&self) -> &'static str {
        "requests"
    }

    fn init_job(&mut self, _job: JobId) {
        self.pending.clear();
    }

    fn terminate_job(&mut self, job: JobId) -> Vec<JobCommand> {
        std::mem::take(&mut self.pending)
            .into_iter()
            .map(|(id, pending)| {
                debug!(
                    job,
                    request = id,
                    service = %pending.request.service,
                    "cancelling request left at job end"
                );
                JobCommand::CancelRequest { id }
            })
            .collect()
    }
}

/// A sub-job started by a `job` action.
#[derive(Debug, Clone)]
pub struct PendingSubJob {
    pub thread: ThreadId,
    pub frame: FrameId,
    pub request: SubJobRequest,
    /// Known once the service reports the start.
    pub job: Option<JobId>,
    pub submitted: DateTime<Local>,
}

#[derive(Debug, Default)]
pub struct SubJobRegistry {
    pending: BTreeMap<RequestId, PendingSubJob>,
}

impl SubJobRegistry {
    pub fn insert(&mut self, id: RequestId, pending: PendingSubJob) {
        self.pending.insert(id, pending);
    }

    pub fn get_mut(&mut self, id: RequestId) -> Option<&mut PendingSubJob> {
        self.pending.get_mut(&id)
    }

    pub fn take(&mut self, id: RequestId) -> Option<PendingSubJob> {
        self.pending.remove(&id)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

impl JobComponent for SubJobRegistry {
    fn name(&self) -> &'static str {
        "subjobs"
    }

    fn init_job(&mut self, _job: JobId) {
        self.pending.clear();
    }

    fn terminate_job(&mut self, job: JobId) -> Vec<JobCommand> {
        for (id, pending) in std::mem::take(&mut self.pending) {
            warn!(
                job,
                request = id,
                sub_job = ?pending.job,
                file = %pending.request.file.display(),
                "parent job ended while sub-job was still running"
            );
        }
        Vec::new()
    }
}

/// A document requested by an `import` action.
#[derive(Debug, Clone)]
pub struct PendingImport {
    pub thread: ThreadId,
    pub frame: FrameId,
    pub file: PathBuf,
    pub submitted: DateTime<Local>,
}

#[derive(Debug, Default)]
pub struct ImportRegistry {
    pending: BTreeMap<RequestId, PendingImport>,
}

impl ImportRegistry {
    pub fn insert(&mut self, id: RequestId, pending: PendingImport) {
        self.pending.insert(id, pending);
    }

    pub fn take(&mut self, id: RequestId) -> Option<PendingImport> {
        self.pending.remove(&id)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

impl JobComponent for ImportRegistry {
    fn name(&self) -> &'static str {
        "imports"
    }

    fn init_job(&mut self, _job: JobId) {
        self.pending.clear();
    }

    fn terminate_job(&mut self, job: JobId) -> Vec<JobCommand> {
        for (id, pending) in std::mem::take(&mut self.pending) {
            debug!(
                job,
                request = id,
                file = %pending.file.display(),
                "dropping document load left at job end"
            );
        }
        Vec::new()
    }
}
