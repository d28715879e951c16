#![allow(dead_code)]

//! Drives a [`Job`] synchronously, without a runtime.
//!
//! Commands the job emits are recorded: timers, remote requests and
//! document loads stay pending until the test fires or completes them.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use stax::definition::JobDefinition;
use stax::engine::{
    ControlError, ControlOp, ControlReply, DocumentOutcome, Job, JobCommand, JobEvent, JobOptions, JobOutcome,
    JobSettings, RemoteRequest, RequestId, RequestOutcome, SubJobOutcome, SubJobRequest,
    TimedEventId,
};
use stax::events::{EventKind, LifecycleEvent};
use stax::expr::{CelEvaluator, Value};

/// Upper bound on fire/complete rounds in [`CoreHarness::run_to_completion`].
const MAX_ROUNDS: usize = 10_000;

pub struct CoreHarness {
    job: Job,
    timers: Vec<(TimedEventId, Duration)>,
    requests: Vec<(RequestId, RemoteRequest)>,
    cancelled_requests: Vec<RequestId>,
    subjobs: Vec<(RequestId, SubJobRequest)>,
    imports: Vec<(RequestId, PathBuf)>,
    events: Vec<LifecycleEvent>,
}

impl CoreHarness {
    pub fn new(definition: Arc<JobDefinition>) -> Self {
        Self::with_settings(definition, JobSettings::default(), JobOptions::default())
    }

    pub fn with_settings(
        definition: Arc<JobDefinition>,
        settings: JobSettings,
        options: JobOptions,
    ) -> Self {
        let job = Job::new(1, definition, Arc::new(CelEvaluator::new()), settings, options);
        Self {
            job,
            timers: Vec::new(),
            requests: Vec::new(),
            cancelled_requests: Vec::new(),
            subjobs: Vec::new(),
            imports: Vec::new(),
            events: Vec::new(),
        }
    }

    /// Start the job and run it until every thread is blocked.
    pub fn start(&mut self) {
        self.job.start();
        self.step();
    }

    pub fn job(&self) -> &Job {
        &self.job
    }

    pub fn event(&mut self, event: JobEvent) {
        self.job.handle_event(event);
        self.step();
    }

    pub fn fire_timer(&mut self, id: TimedEventId) {
        self.timers.retain(|(t, _)| *t != id);
        self.event(JobEvent::TimerFired { id });
    }

    /// Fire the pending timer with the shortest delay.
    pub fn fire_next_timer(&mut self) -> bool {
        let next = self
            .timers
            .iter()
            .min_by_key(|(id, after)| (*after, *id))
            .map(|(id, _)| *id);
        match next {
            Some(id) => {
                self.fire_timer(id);
                true
            }
            None => false,
        }
    }

    pub fn complete_request(&mut self, id: RequestId, outcome: RequestOutcome) {
        self.requests.retain(|(r, _)| *r != id);
        self.event(JobEvent::RequestCompleted { id, outcome });
    }

    /// Complete the oldest pending request with rc 0 and its request text
    /// as result.
    pub fn complete_next_request(&mut self) -> bool {
        let Some((id, request)) = self.requests.first().cloned() else {
            return false;
        };
        self.complete_request(
            id,
            RequestOutcome::Completed {
                rc: 0,
                result: request.request,
            },
        );
        true
    }

    pub fn fail_subjob(&mut self, id: RequestId, message: &str) {
        self.subjobs.retain(|(r, _)| *r != id);
        self.event(JobEvent::SubJobCompleted {
            id,
            outcome: SubJobOutcome::StartFailed(message.to_string()),
        });
    }

    pub fn complete_import(&mut self, id: RequestId, outcome: DocumentOutcome) {
        self.imports.retain(|(r, _)| *r != id);
        self.event(JobEvent::DocumentLoaded { id, outcome });
    }

    pub fn control(&mut self, op: ControlOp) -> Result<ControlReply, ControlError> {
        let reply = self.job.control(op);
        self.step();
        reply
    }

    /// Complete requests and fire timers until the job ends.
    pub fn run_to_completion(&mut self) -> JobOutcome {
        for _ in 0..MAX_ROUNDS {
            if let Some(outcome) = self.job.outcome() {
                return outcome.clone();
            }
            if !self.complete_next_request() && !self.fire_next_timer() {
                panic!(
                    "job is stuck: no pending timers or requests; threads: {:?}",
                    self.job.thread_infos()
                );
            }
        }
        panic!("job did not complete within {MAX_ROUNDS} rounds");
    }

    pub fn outcome(&self) -> Option<&JobOutcome> {
        self.job.outcome()
    }

    /// `STAXResult` of the start function. Panics if the job is still running.
    pub fn result(&self) -> Value {
        self.job
            .outcome()
            .map(|o| o.result.clone())
            .expect("job has not completed")
    }

    pub fn pending_timers(&self) -> &[(TimedEventId, Duration)] {
        &self.timers
    }

    pub fn pending_requests(&self) -> &[(RequestId, RemoteRequest)] {
        &self.requests
    }

    pub fn cancelled_requests(&self) -> &[RequestId] {
        &self.cancelled_requests
    }

    pub fn pending_subjobs(&self) -> &[(RequestId, SubJobRequest)] {
        &self.subjobs
    }

    pub fn pending_imports(&self) -> &[(RequestId, PathBuf)] {
        &self.imports
    }

    pub fn events(&self) -> &[LifecycleEvent] {
        &self.events
    }

    pub fn events_of(&self, kind: EventKind) -> Vec<&LifecycleEvent> {
        self.events.iter().filter(|e| e.kind == kind).collect()
    }

    /// Texts of every published `message` event, in order.
    pub fn messages(&self) -> Vec<String> {
        self.events_of(EventKind::Message)
            .into_iter()
            .filter_map(|e| e.property("text").map(str::to_string))
            .collect()
    }

    /// Names of every raised signal, in order.
    pub fn signals(&self) -> Vec<String> {
        self.events_of(EventKind::Signal)
            .into_iter()
            .map(|e| e.name.clone())
            .collect()
    }

    fn step(&mut self) {
        self.job.run_until_idle();
        for command in self.job.drain_commands() {
            match command {
                JobCommand::ScheduleTimer { id, after } => self.timers.push((id, after)),
                JobCommand::CancelTimer { id } => self.timers.retain(|(t, _)| *t != id),
                JobCommand::SubmitRequest { id, request } => self.requests.push((id, request)),
                JobCommand::CancelRequest { id } => {
                    self.requests.retain(|(r, _)| *r != id);
                    self.cancelled_requests.push(id);
                }
                JobCommand::StartSubJob { id, request } => self.subjobs.push((id, request)),
                JobCommand::LoadDocument { id, file } => self.imports.push((id, file)),
                JobCommand::Publish(event) => self.events.push(event),
            }
        }
    }
}
