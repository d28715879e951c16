// src/registry/mod.rs

//! Job-scoped registries.
//!
//! Each registry is owned by exactly one [`Job`](crate::engine::Job) and is
//! only mutated through it. An entry is removed exactly once, by whichever
//! path moves the entity to its terminal state. Every registry implements
//! [`JobComponent`] so that the job can initialise it at start and release
//! what is left when the job ends.

pub mod blocks;
pub mod breakpoints;
pub mod requests;
pub mod testcases;

pub use blocks::{BlockEntry, BlockInfo, BlockRegistry, BlockState};
pub use breakpoints::{Breakpoint, BreakpointRegistry};
pub use requests::{
    ImportRegistry, PendingImport, PendingRequest, PendingSubJob, RequestRegistry, SubJobRegistry,
};
pub use testcases::{Testcase, TestcaseRegistry, TestcaseSummary};

use crate::engine::{JobCommand, JobId};

/// Hooks called by the job at start and at completion.
pub trait JobComponent {
    fn name(&self) -> &'static str;

    fn init_job(&mut self, job: JobId);

    /// Release whatever is left and return the commands needed to do so
    /// (cancelled timers, cancelled requests, summary events).
    fn terminate_job(&mut self, job: JobId) -> Vec<JobCommand>;
}
