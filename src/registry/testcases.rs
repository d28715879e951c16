// src/registry/testcases.rs

//! Testcase accounting.
//!
//! Testcases are keyed by their full dotted name. Entering a testcase that
//! already exists merges into it; its mode can only escalate from `Default`
//! to `Strict`.

use std::collections::BTreeMap;
use std::time::Duration;

use tracing::debug;

use crate::engine::{JobCommand, JobId};
use crate::events::{EventKind, LifecycleEvent};
use crate::types::{TcStatusResult, TestcaseMode};

use super::JobComponent;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Testcase {
    pub mode: TestcaseMode,
    pub passes: u32,
    pub fails: u32,
    pub last_status: Option<TcStatusResult>,
    pub last_message: String,
    pub elapsed: Duration,
    pub starts: u32,
    pub stops: u32,
}

/// Reported state of one testcase at job end or on request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestcaseSummary {
    pub name: String,
    pub mode: TestcaseMode,
    pub passes: u32,
    pub fails: u32,
    pub last_status: Option<TcStatusResult>,
    pub last_message: String,
    pub elapsed: Duration,
    pub starts: u32,
    pub stops: u32,
}

#[derive(Debug, Default)]
pub struct TestcaseRegistry {
    testcases: BTreeMap<String, Testcase>,
}

impl TestcaseRegistry {
    /// Record a start of `name`, creating it if needed.
    pub fn start(&mut self, name: &str, mode: TestcaseMode) -> &Testcase {
        let testcase = self.testcases.entry(name.to_string()).or_default();
        testcase.mode = testcase.mode.max(mode);
        testcase.starts += 1;
        testcase
    }

    pub fn stop(&mut self, name: &str, elapsed: Duration) {
        if let Some(testcase) = self.testcases.get_mut(name) {
            testcase.stops += 1;
            testcase.elapsed += elapsed;
        }
    }

    /// Record a status. Returns false if the testcase is unknown.
    pub fn record(&mut self, name: &str, result: TcStatusResult, message: &str) -> bool {
        let Some(testcase) = self.testcases.get_mut(name) else {
            return false;
        };
        match result {
            TcStatusResult::Pass => testcase.passes += 1,
            TcStatusResult::Fail => testcase.fails += 1,
            TcStatusResult::Info => {}
        }
        testcase.last_status = Some(result);
        testcase.last_message = message.to_string();
        true
    }

    pub fn get(&self, name: &str) -> Option<&Testcase> {
        self.testcases.get(name)
    }

    /// Strict testcases are always reported; default ones once they have a
    /// status.
    pub fn summaries(&self) -> Vec<TestcaseSummary> {
        self.testcases
            .iter()
            .filter(|(_, tc)| tc.mode == TestcaseMode::Strict || tc.last_status.is_some())
            .map(|(name, tc)| TestcaseSummary {
                name: name.clone(),
                mode: tc.mode,
                passes: tc.passes,
                fails: tc.fails,
                last_status: tc.last_status,
                last_message: tc.last_message.clone(),
                elapsed: tc.elapsed,
                starts: tc.starts,
                stops: tc.stops,
            })
            .collect()
    }
}

impl JobComponent for TestcaseRegistry {
    fn name(&self) -> &'static str {
        "testcases"
    }

    fn init_job(&mut self, _job: JobId) {
        self.testcases.clear();
    }

    fn terminate_job(&mut self, job: JobId) -> Vec<JobCommand> {
        let commands: Vec<JobCommand> = self
            .summaries()
            .into_iter()
            .map(|tc| {
                let status = match tc.last_status {
                    Some(status) => status.to_string(),
                    None => "fail".to_string(),
                };
                JobCommand::Publish(
                    LifecycleEvent::new(job, EventKind::Testcase, tc.name, "summary")
                        .with("status", status)
                        .with("passes", tc.passes.to_string())
                        .with("fails", tc.fails.to_string())
                        .with("elapsed_ms", tc.elapsed.as_millis().to_string()),
                )
            })
            .collect();
        debug!(job, reported = commands.len(), "testcase summaries published");
        commands
    }
}
