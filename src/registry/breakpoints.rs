// src/registry/breakpoints.rs

use std::collections::BTreeMap;

use crate::engine::{ConditionId, FrameId, JobCommand, JobId, ThreadId};

use super::JobComponent;

/// A thread held at a `breakpoint` element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Breakpoint {
    pub id: u64,
    pub thread: ThreadId,
    pub frame: FrameId,
    /// Hold condition to remove on resume.
    pub condition: ConditionId,
    pub location: String,
}

#[derive(Debug, Default)]
pub struct BreakpointRegistry {
    active: BTreeMap<u64, Breakpoint>,
}

impl BreakpointRegistry {
    pub fn register(&mut self, breakpoint: Breakpoint) {
        self.active.insert(breakpoint.id, breakpoint);
    }

    pub fn remove(&mut self, id: u64) -> Option<Breakpoint> {
        self.active.remove(&id)
    }

    pub fn list(&self) -> Vec<Breakpoint> {
        self.active.values().cloned().collect()
    }
}

impl JobComponent for BreakpointRegistry {
    fn name(&self) -> &'static str {
        "breakpoints"
    }

    fn init_job(&mut self, _job: JobId) {
        self.active.clear();
    }

    fn terminate_job(&mut self, _job: JobId) -> Vec<JobCommand> {
        self.active.clear();
        Vec::new()
    }
}
