// src/engine/job.rs

//! Pure job core.
//!
//! A `Job` owns the thread arena, the run queue and the job-scoped
//! registries of one workflow execution. All state changes go through
//! `&mut Job`: action steps, timer callbacks, remote completions and
//! external control operations are therefore serialised without locks, and
//! admission checks happen in the same step as the thread inserts they
//! guard.
//!
//! The core performs no IO. Timers, remote requests, sub-jobs and lifecycle
//! events leave the job as [`JobCommand`]s collected in an outbox that the
//! async shell drains after every step.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local};
use tracing::{debug, error, info, trace, warn};

use crate::actions::{Action, BlockAction, CallAction, SequenceAction, SourceLocation};
use crate::config::ConfigSection;
use crate::definition::{FunctionTemplate, JobDefinition};
use crate::events::{EventKind, LifecycleEvent};
use crate::expr::{ExpressionEvaluator, Scope, Value};
use crate::registry::{
    BlockRegistry, BreakpointRegistry, ImportRegistry, JobComponent, RequestRegistry,
    SubJobRegistry, TestcaseRegistry,
};

use super::control::{ControlError, ControlOp, ControlReply};
use super::signals::{self, NO_SUCH_SIGNAL_HANDLER};
use super::thread::{Frame, Notifiee, StaxThread, ThreadInfo, ThreadState};
use super::{
    Condition, ConditionId, ConditionKind, FrameId, JobCommand, JobEvent, JobId, JobOutcome,
    JobStatus, MAIN_BLOCK, ROOT_THREAD, ThreadContext, ThreadEnd, ThreadId, TimedEventId,
};

/// Per-job execution limits and switches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSettings {
    /// Maximum number of live STAX-Threads; 0 means unlimited.
    pub max_threads: u32,
    /// Steps a thread may take before yielding to other runnable threads.
    pub max_nonblocking_actions: usize,
    /// Whether `breakpoint` elements hold their thread.
    pub breakpoints: bool,
    /// Whether testcase start/stop events are published.
    pub log_tc_start_stop: bool,
}

impl Default for JobSettings {
    fn default() -> Self {
        Self {
            max_threads: 0,
            max_nonblocking_actions: 100,
            breakpoints: false,
            log_tc_start_stop: false,
        }
    }
}

impl JobSettings {
    pub fn from_config(section: &ConfigSection) -> Self {
        Self {
            max_threads: section.max_stax_threads,
            max_nonblocking_actions: section.max_nonblocking_actions,
            breakpoints: section.breakpoints,
            log_tc_start_stop: section.log_tc_start_stop,
        }
    }
}

/// Per-submission overrides.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobOptions {
    pub name: Option<String>,
    pub function: Option<String>,
    pub args: Option<String>,
    pub max_threads: Option<u32>,
    pub breakpoints: Option<bool>,
}

/// What a scheduled timed event wakes up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum TimerTarget {
    Action { thread: ThreadId, frame: FrameId },
    BlockRelease { block: String },
}

#[derive(Debug)]
pub struct Job {
    id: JobId,
    name: String,
    definition: Arc<JobDefinition>,
    evaluator: Arc<dyn ExpressionEvaluator>,
    settings: JobSettings,
    start_function: String,
    start_args: Option<String>,
    pub(crate) threads: BTreeMap<ThreadId, StaxThread>,
    run_queue: VecDeque<ThreadId>,
    next_thread: ThreadId,
    next_id: u64,
    pub(crate) timers: HashMap<TimedEventId, TimerTarget>,
    pub(crate) blocks: BlockRegistry,
    pub(crate) testcases: TestcaseRegistry,
    pub(crate) requests: RequestRegistry,
    pub(crate) subjobs: SubJobRegistry,
    pub(crate) imports: ImportRegistry,
    pub(crate) breakpoints: BreakpointRegistry,
    /// Functions added by `import`; looked up before the definition's.
    imported: BTreeMap<String, Arc<FunctionTemplate>>,
    outbox: Vec<JobCommand>,
    started: Option<DateTime<Local>>,
    /// Set once the `main` block (or the root thread) is terminated.
    pub(crate) termination: Option<Option<String>>,
    outcome: Option<JobOutcome>,
}

impl Job {
    pub fn new(
        id: JobId,
        definition: Arc<JobDefinition>,
        evaluator: Arc<dyn ExpressionEvaluator>,
        mut settings: JobSettings,
        options: JobOptions,
    ) -> Self {
        if let Some(max) = options.max_threads.or(definition.max_threads) {
            settings.max_threads = max;
        }
        if let Some(breakpoints) = options.breakpoints {
            settings.breakpoints = breakpoints;
        }

        Self {
            id,
            name: options.name.unwrap_or_else(|| definition.name.clone()),
            start_function: options
                .function
                .unwrap_or_else(|| definition.start_function.clone()),
            start_args: options.args.or_else(|| definition.start_args.clone()),
            definition,
            evaluator,
            settings,
            threads: BTreeMap::new(),
            run_queue: VecDeque::new(),
            next_thread: ROOT_THREAD,
            next_id: 0,
            timers: HashMap::new(),
            blocks: BlockRegistry::default(),
            testcases: TestcaseRegistry::default(),
            requests: RequestRegistry::default(),
            subjobs: SubJobRegistry::default(),
            imports: ImportRegistry::default(),
            breakpoints: BreakpointRegistry::default(),
            imported: BTreeMap::new(),
            outbox: Vec::new(),
            started: None,
            termination: None,
            outcome: None,
        }
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn settings(&self) -> &JobSettings {
        &self.settings
    }

    pub fn definition(&self) -> &Arc<JobDefinition> {
        &self.definition
    }

    pub(crate) fn evaluator(&self) -> &Arc<dyn ExpressionEvaluator> {
        &self.evaluator
    }

    pub fn is_complete(&self) -> bool {
        self.outcome.is_some()
    }

    pub fn outcome(&self) -> Option<&JobOutcome> {
        self.outcome.as_ref()
    }

    /// Look up a function, imported ones first.
    pub fn function(&self, name: &str) -> Option<Arc<FunctionTemplate>> {
        self.imported
            .get(name)
            .or_else(|| self.definition.functions.get(name))
            .cloned()
    }

    /// Add or replace a function in this job's table.
    pub(crate) fn add_function(&mut self, function: Arc<FunctionTemplate>) {
        debug!(job = self.id, function = %function.name, file = %function.location.file.display(), "function imported");
        self.imported.insert(function.name.clone(), function);
    }

    pub fn live_thread_count(&self) -> usize {
        self.threads.len()
    }

    pub fn thread_state(&self, thread: ThreadId) -> Option<ThreadState> {
        self.threads.get(&thread).map(|t| t.state)
    }

    pub fn thread_infos(&self) -> Vec<ThreadInfo> {
        self.threads.values().map(StaxThread::info).collect()
    }

    /// Commands emitted since the last drain, in emission order.
    pub fn drain_commands(&mut self) -> Vec<JobCommand> {
        std::mem::take(&mut self.outbox)
    }

    /// Create the root thread and schedule it. Calling `start` twice is a
    /// no-op.
    pub fn start(&mut self) {
        if self.started.is_some() {
            return;
        }
        self.started = Some(Local::now());

        let job = self.id;
        let mut components: [&mut dyn JobComponent; 6] = [
            &mut self.blocks,
            &mut self.testcases,
            &mut self.requests,
            &mut self.subjobs,
            &mut self.imports,
            &mut self.breakpoints,
        ];
        for component in components.iter_mut() {
            trace!(job, component = component.name(), "init_job");
            component.init_job(job);
        }

        let scope = Scope::new();
        scope.set("STAXJobID", Value::from(self.id));
        scope.set("STAXJobName", Value::from(self.name.clone()));
        scope.set("STAXThreadID", Value::from(ROOT_THREAD));
        scope.set("RC", Value::from(0));
        scope.set("STAXResult", Value::Null);

        let location = Arc::new(SourceLocation::internal(
            "job",
            &self.definition.file,
            &self.definition.machine,
        ));
        let mut steps: Vec<Arc<dyn Action>> = self.definition.defaults.clone();
        steps.push(Arc::new(CallAction::start(
            Arc::clone(&location),
            &self.start_function,
            self.start_args.clone(),
        )));
        let body: Arc<dyn Action> = Arc::new(SequenceAction::new(Arc::clone(&location), steps));
        let main = BlockAction::literal(location, MAIN_BLOCK, body);

        let mut root = StaxThread::new(
            ROOT_THREAD,
            None,
            scope,
            signals::default_signal_handlers(),
            ROOT_THREAD.to_string(),
        );
        let frame = self.next_id();
        root.stack.push(Frame {
            id: frame,
            action: Some(main.clone_action()),
        });
        self.threads.insert(ROOT_THREAD, root);
        self.next_thread = ROOT_THREAD + 1;

        info!(
            job = self.id,
            name = %self.name,
            function = %self.start_function,
            max_threads = self.settings.max_threads,
            "job started"
        );
        self.publish(
            LifecycleEvent::new(self.id, EventKind::Job, self.name.clone(), "begin")
                .with("function", self.start_function.clone()),
        );
        self.schedule(ROOT_THREAD);
    }

    /// Run threads until every live thread is blocked or the job is done.
    pub fn run_until_idle(&mut self) {
        while let Some(thread) = self.run_queue.pop_front() {
            self.run_thread(thread);
        }
    }

    /// Apply one external event.
    pub fn handle_event(&mut self, event: JobEvent) {
        match event {
            JobEvent::TimerFired { id } => self.fire_timer(id),
            JobEvent::RequestCompleted { id, outcome } => match self.requests.take(id) {
                Some(pending) => {
                    let delivered = self.with_frame(pending.thread, pending.frame, |action, ctx| {
                        action.request_complete(ctx, id, outcome)
                    });
                    if !delivered {
                        debug!(job = self.id, request = id, "request owner is gone; dropping completion");
                    }
                }
                None => debug!(job = self.id, request = id, "completion for unknown request ignored"),
            },
            JobEvent::SubJobStarted { id, job } => {
                let target = self.subjobs.get_mut(id).map(|pending| {
                    pending.job = Some(job);
                    (pending.thread, pending.frame)
                });
                match target {
                    Some((thread, frame)) => {
                        self.with_frame(thread, frame, |action, ctx| {
                            action.sub_job_started(ctx, id, job)
                        });
                    }
                    None => debug!(job = self.id, request = id, "start notice for unknown sub-job ignored"),
                }
            }
            JobEvent::SubJobCompleted { id, outcome } => match self.subjobs.take(id) {
                Some(pending) => {
                    self.with_frame(pending.thread, pending.frame, |action, ctx| {
                        action.sub_job_complete(ctx, id, outcome)
                    });
                }
                None => debug!(job = self.id, request = id, "completion for unknown sub-job ignored"),
            },
            JobEvent::DocumentLoaded { id, outcome } => match self.imports.take(id) {
                Some(pending) => {
                    self.with_frame(pending.thread, pending.frame, |action, ctx| {
                        action.document_loaded(ctx, id, outcome)
                    });
                }
                None => debug!(job = self.id, request = id, "document for unknown import ignored"),
            },
            JobEvent::Control { op, reply } => {
                let result = self.control(op);
                if reply.send(result).is_err() {
                    debug!(job = self.id, "control caller went away before the reply");
                }
            }
        }
    }

    /// Apply one external control operation.
    pub fn control(&mut self, op: ControlOp) -> Result<ControlReply, ControlError> {
        if self.outcome.is_some() {
            return Err(ControlError::JobComplete(self.id));
        }
        debug!(job = self.id, ?op, "control operation");

        match op {
            ControlOp::HoldBlock { block, timeout_ms } => {
                self.hold_block(&block, timeout_ms).map(|_| ControlReply::Done)
            }
            ControlOp::ReleaseBlock { block } => {
                self.release_block(&block).map(|_| ControlReply::Done)
            }
            ControlOp::TerminateBlock { block } => self
                .terminate_block(&block, None)
                .map(|_| ControlReply::Done),
            ControlOp::TerminateJob => {
                self.terminate_job(Some("terminated by request".to_string()));
                Ok(ControlReply::Done)
            }
            ControlOp::ResumeBreakpoint { id } => {
                self.resume_breakpoint(id).map(|_| ControlReply::Done)
            }
            ControlOp::ListBlocks => Ok(ControlReply::Blocks(self.blocks.infos())),
            ControlOp::ListThreads => Ok(ControlReply::Threads(self.thread_infos())),
            ControlOp::ListTestcases => Ok(ControlReply::Testcases(self.testcases.summaries())),
        }
    }

    /// Terminate the whole job by terminating its `main` block.
    pub fn terminate_job(&mut self, reason: Option<String>) {
        if self.outcome.is_some() {
            return;
        }
        match self.terminate_block(MAIN_BLOCK, reason.clone()) {
            Ok(()) => {}
            Err(ControlError::BlockAlreadyTerminating(_)) => {
                debug!(job = self.id, "job already terminating");
            }
            Err(_) => {
                // Outside the main block (defaults or final unwinding).
                self.termination.get_or_insert(reason);
                self.terminate_thread(ROOT_THREAD, ThreadEnd::StoppedByParent);
            }
        }
    }

    /// Release a thread held at a breakpoint.
    pub fn resume_breakpoint(&mut self, id: u64) -> Result<(), ControlError> {
        let breakpoint = self
            .breakpoints
            .remove(id)
            .ok_or(ControlError::BreakpointNotFound(id))?;
        info!(job = self.id, breakpoint = id, thread = breakpoint.thread, "resuming breakpoint");
        if self.remove_condition(breakpoint.thread, breakpoint.condition) {
            self.schedule(breakpoint.thread);
        }
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Scheduling
    // ---------------------------------------------------------------------

    pub(crate) fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    pub(crate) fn emit(&mut self, command: JobCommand) {
        self.outbox.push(command);
    }

    pub(crate) fn publish(&mut self, event: LifecycleEvent) {
        self.outbox.push(JobCommand::Publish(event));
    }

    /// Make a created or blocked thread runnable.
    pub(crate) fn schedule(&mut self, thread: ThreadId) {
        let Some(t) = self.threads.get_mut(&thread) else {
            return;
        };
        let first_start = match t.state {
            ThreadState::Created => true,
            ThreadState::Blocked => false,
            ThreadState::Runnable | ThreadState::Running | ThreadState::Complete => return,
        };
        t.state = ThreadState::Runnable;
        let parent = t.parent;
        self.run_queue.push_back(thread);

        if first_start {
            let mut event =
                LifecycleEvent::new(self.id, EventKind::Thread, thread.to_string(), "start");
            if let Some(parent) = parent {
                event = event.with("parent", parent.to_string());
            }
            self.publish(event);
        }
    }

    fn run_thread(&mut self, thread: ThreadId) {
        match self.threads.get_mut(&thread) {
            Some(t) if t.state == ThreadState::Runnable => t.state = ThreadState::Running,
            _ => return,
        }

        let max_steps = self.settings.max_nonblocking_actions.max(1);
        for _ in 0..max_steps {
            let Some(t) = self.threads.get_mut(&thread) else {
                return;
            };

            let Some(frame) = t.stack.last().map(|f| f.id) else {
                if t.children.is_empty() {
                    self.complete_thread(thread);
                } else {
                    t.state = ThreadState::Blocked;
                }
                return;
            };

            match t.conditions.first().cloned() {
                Some(condition) if condition.is_hold() => {
                    trace!(job = self.id, thread, condition = %condition, "thread blocked");
                    t.state = ThreadState::Blocked;
                    return;
                }
                Some(condition) => {
                    self.with_frame(thread, frame, |action, ctx| {
                        action.handle_condition(ctx, &condition)
                    });
                }
                None => {
                    self.with_frame(thread, frame, |action, ctx| action.execute(ctx));
                }
            }
        }

        // Step budget used up: go to the back of the queue.
        if let Some(t) = self.threads.get_mut(&thread) {
            if t.state == ThreadState::Running {
                t.state = ThreadState::Runnable;
                self.run_queue.push_back(thread);
            }
        }
    }

    /// Call into the action in `frame` of `thread`. The action is taken out
    /// of its frame for the duration of the call; afterwards it is put back,
    /// or the frame is removed if the action popped itself. Returns false if
    /// the frame no longer exists.
    pub(crate) fn with_frame<F>(&mut self, thread: ThreadId, frame: FrameId, call: F) -> bool
    where
        F: FnOnce(&mut dyn Action, &mut ThreadContext<'_>),
    {
        let Some(mut action) = self
            .threads
            .get_mut(&thread)
            .and_then(|t| t.stack.iter_mut().find(|f| f.id == frame))
            .and_then(|f| f.action.take())
        else {
            return false;
        };

        let popped = {
            let mut ctx = ThreadContext::new(self, thread, frame);
            call(action.as_mut(), &mut ctx);
            ctx.popped()
        };

        if let Some(t) = self.threads.get_mut(&thread) {
            if let Some(index) = t.frame_index(frame) {
                if popped {
                    t.stack.remove(index);
                } else {
                    t.stack[index].action = Some(action);
                }
            }
        }
        true
    }

    fn complete_thread(&mut self, thread: ThreadId) {
        let Some(mut t) = self.threads.remove(&thread) else {
            return;
        };
        t.state = ThreadState::Complete;
        let inheritable = t.conditions.take_inheritable();

        debug!(
            job = self.id,
            thread,
            end = ?t.end,
            pending = inheritable.len(),
            "thread complete"
        );

        let leftovers = match t.parent {
            Some(parent) => {
                if !inheritable.is_empty() {
                    if let Some(p) = self.threads.get_mut(&parent) {
                        for condition in inheritable {
                            p.conditions.add(condition);
                        }
                    }
                    self.schedule(parent);
                }
                Vec::new()
            }
            None => {
                // Anything still pending besides holds and the thread's own
                // termination was never handled by an action.
                let stray: Vec<Condition> = t
                    .conditions
                    .iter()
                    .filter(|c| {
                        !c.is_hold() && !matches!(c.kind(), ConditionKind::TerminateThread)
                    })
                    .cloned()
                    .collect();
                for condition in &stray {
                    warn!(
                        job = self.id,
                        thread,
                        condition = %condition,
                        source = condition.source(),
                        "condition still pending when the root thread ended"
                    );
                }
                let mut leftovers = inheritable;
                leftovers.extend(stray);
                leftovers
            }
        };

        self.publish(
            LifecycleEvent::new(self.id, EventKind::Thread, thread.to_string(), "end")
                .with("end", format!("{:?}", t.end)),
        );

        for notifiee in std::mem::take(&mut t.notifiees) {
            match notifiee {
                Notifiee::Parent(parent) => {
                    let now_idle = self.threads.get_mut(&parent).is_some_and(|p| {
                        p.children.remove(&thread);
                        p.children.is_empty()
                    });
                    if now_idle {
                        self.schedule(parent);
                    }
                }
                Notifiee::Action {
                    thread: owner,
                    frame,
                } => {
                    let end = t.end;
                    let delivered = self.with_frame(owner, frame, |action, ctx| {
                        action.thread_complete(ctx, thread, end)
                    });
                    if !delivered {
                        debug!(job = self.id, thread, owner, frame, "completion notifiee is gone");
                    }
                }
            }
        }

        if t.parent.is_none() {
            self.finish(&t, leftovers);
        }
    }

    /// Root thread ended: compute the outcome and release job resources.
    fn finish(&mut self, root: &StaxThread, leftovers: Vec<Condition>) {
        let status = if let Some(reason) = self.termination.clone() {
            JobStatus::Terminated { reason }
        } else if !leftovers.is_empty() {
            let reason = leftovers
                .iter()
                .map(|c| format!("unhandled {c}"))
                .collect::<Vec<_>>()
                .join("; ");
            JobStatus::Abnormal { reason }
        } else if root.end != ThreadEnd::Normal {
            JobStatus::Abnormal {
                reason: format!("root thread ended with {:?}", root.end),
            }
        } else {
            JobStatus::Normal
        };

        let job = self.id;
        let mut components: [&mut dyn JobComponent; 6] = [
            &mut self.blocks,
            &mut self.testcases,
            &mut self.requests,
            &mut self.subjobs,
            &mut self.imports,
            &mut self.breakpoints,
        ];
        let mut commands = Vec::new();
        for component in components.iter_mut() {
            trace!(job, component = component.name(), "terminate_job");
            commands.extend(component.terminate_job(job));
        }
        let cancelled: HashSet<TimedEventId> = commands
            .iter()
            .filter_map(|c| match c {
                JobCommand::CancelTimer { id } => Some(*id),
                _ => None,
            })
            .collect();
        self.outbox.extend(commands);

        let leftover_timers: Vec<TimedEventId> = self
            .timers
            .drain()
            .map(|(id, _)| id)
            .filter(|id| !cancelled.contains(id))
            .collect();
        for id in leftover_timers {
            self.emit(JobCommand::CancelTimer { id });
        }

        let ended = Local::now();
        let outcome = JobOutcome {
            job,
            name: self.name.clone(),
            status: status.clone(),
            result: root.scope.get("STAXResult").unwrap_or(Value::Null),
            testcases: self.testcases.summaries(),
            started: self.started.unwrap_or(ended),
            ended,
        };

        match &status {
            JobStatus::Normal => info!(job, name = %self.name, "job complete"),
            other => warn!(job, name = %self.name, status = %other, "job complete"),
        }
        self.publish(
            LifecycleEvent::new(job, EventKind::Job, self.name.clone(), "end")
                .with("status", status.to_string()),
        );
        self.outcome = Some(outcome);
    }

    // ---------------------------------------------------------------------
    // Thread operations used by actions and control paths
    // ---------------------------------------------------------------------

    /// Check that `additional` threads can be started without exceeding
    /// `max_threads`. Returns the diagnostic message on failure.
    pub(crate) fn check_admission(&self, additional: usize) -> Result<(), String> {
        let max = self.settings.max_threads as usize;
        let live = self.threads.len();
        if max > 0 && live + additional > max {
            return Err(format!(
                "Starting {additional} thread(s) with {live} already running would exceed \
                 the maximum of {max} STAX-Threads for job {}",
                self.id
            ));
        }
        Ok(())
    }

    /// Create a child of `parent`. The child copies the parent's signal
    /// handlers and any cascading conditions, and gets either a shared or a
    /// forked scope. It is not scheduled.
    pub(crate) fn create_child_thread(
        &mut self,
        parent: ThreadId,
        share_scope: bool,
    ) -> Option<ThreadId> {
        let id = self.next_thread;
        let p = self.threads.get_mut(&parent)?;
        self.next_thread += 1;

        let scope = if share_scope {
            p.scope.clone()
        } else {
            self.evaluator.clone_scope(&p.scope)
        };
        if !share_scope {
            scope.set("STAXThreadID", Value::from(id));
        }
        let cascaded: Vec<Condition> = p.conditions.iter().filter(|c| c.cascades()).cloned().collect();
        p.children.insert(id);

        let mut child = StaxThread::new(
            id,
            Some(parent),
            scope,
            p.signal_handlers.clone(),
            format!("{}.{}", p.hierarchy, id),
        );
        child.notifiees.push(Notifiee::Parent(parent));
        for condition in cascaded {
            child.conditions.add(condition);
        }

        trace!(job = self.id, parent, thread = id, hierarchy = %child.hierarchy, "child thread created");
        self.threads.insert(id, child);
        Some(id)
    }

    pub(crate) fn push_action(&mut self, thread: ThreadId, action: Box<dyn Action>) {
        let frame = self.next_id();
        if let Some(t) = self.threads.get_mut(&thread) {
            t.stack.push(Frame {
                id: frame,
                action: Some(action),
            });
        }
    }

    pub(crate) fn new_condition(&mut self, kind: ConditionKind, source: &str) -> Condition {
        Condition::new(self.next_id(), kind, source)
    }

    pub(crate) fn add_condition(&mut self, thread: ThreadId, condition: Condition) -> bool {
        self.threads
            .get_mut(&thread)
            .is_some_and(|t| t.conditions.add(condition))
    }

    pub(crate) fn remove_condition(&mut self, thread: ThreadId, id: ConditionId) -> bool {
        self.threads
            .get_mut(&thread)
            .is_some_and(|t| t.conditions.remove(id).is_some())
    }

    /// Ask a thread to unwind.
    pub(crate) fn terminate_thread(&mut self, thread: ThreadId, end: ThreadEnd) {
        let condition = self.new_condition(ConditionKind::TerminateThread, "Thread");
        let Some(t) = self.threads.get_mut(&thread) else {
            return;
        };
        if t.end == ThreadEnd::Normal {
            t.end = end;
        }
        t.conditions.add(condition);
        debug!(job = self.id, thread, ?end, "terminating thread");
        self.schedule(thread);
    }

    /// `thread` and all of its descendants, parents before children.
    pub(crate) fn subtree(&self, thread: ThreadId) -> Vec<ThreadId> {
        let mut out = Vec::new();
        let mut pending = vec![thread];
        while let Some(id) = pending.pop() {
            if let Some(t) = self.threads.get(&id) {
                out.push(id);
                pending.extend(t.children.iter().rev().copied());
            }
        }
        out
    }

    /// Raise a named signal on `thread`.
    pub(crate) fn raise_signal(&mut self, thread: ThreadId, signal: &str) {
        let Some(t) = self.threads.get_mut(&thread) else {
            return;
        };

        if t.signal_stack.iter().any(|s| s == signal) {
            error!(
                job = self.id,
                thread,
                signal,
                "signal raised while its handler is already running; terminating thread"
            );
            self.terminate_thread(thread, ThreadEnd::DuplicateSignal);
            return;
        }

        match t.signal_handlers.get(signal).cloned() {
            Some(handler) => {
                debug!(job = self.id, thread, signal, "raising signal");
                t.signal_stack.push(signal.to_string());
                let execution = crate::actions::SignalExecutionAction::new(signal, handler);
                self.push_action(thread, Box::new(execution));
                self.publish(
                    LifecycleEvent::new(self.id, EventKind::Signal, signal.to_string(), "raised")
                        .with("thread", thread.to_string()),
                );
            }
            None if signal == NO_SUCH_SIGNAL_HANDLER => {
                error!(job = self.id, thread, "no handler for {NO_SUCH_SIGNAL_HANDLER}");
            }
            None => {
                warn!(job = self.id, thread, signal, "no handler for signal");
                t.scope.set(
                    signals::message_var(NO_SUCH_SIGNAL_HANDLER),
                    Value::from(signal.to_string()),
                );
                self.raise_signal(thread, NO_SUCH_SIGNAL_HANDLER);
            }
        }
    }

    pub(crate) fn signal_handled(&mut self, thread: ThreadId, signal: &str) {
        if let Some(t) = self.threads.get_mut(&thread) {
            if let Some(index) = t.signal_stack.iter().rposition(|s| s == signal) {
                t.signal_stack.remove(index);
            }
        }
    }

    pub(crate) fn schedule_timer(&mut self, target: TimerTarget, after: Duration) -> TimedEventId {
        let id = self.next_id();
        self.timers.insert(id, target);
        self.emit(JobCommand::ScheduleTimer { id, after });
        id
    }

    pub(crate) fn cancel_timer(&mut self, id: TimedEventId) {
        if self.timers.remove(&id).is_some() {
            self.emit(JobCommand::CancelTimer { id });
        }
    }

    fn fire_timer(&mut self, id: TimedEventId) {
        match self.timers.remove(&id) {
            None => debug!(job = self.id, timer = id, "stale timed event ignored"),
            Some(TimerTarget::Action { thread, frame }) => {
                let delivered =
                    self.with_frame(thread, frame, |action, ctx| action.timed_event(ctx, id));
                if !delivered {
                    debug!(job = self.id, timer = id, thread, frame, "timed event target is gone");
                }
            }
            Some(TimerTarget::BlockRelease { block }) => self.hold_timed_out(&block, id),
        }
    }

    /// Call stack of `thread`, outermost first. The frame currently being
    /// called is rendered as `current`.
    pub(crate) fn call_stack(&self, thread: ThreadId, current: &str) -> Vec<String> {
        self.threads
            .get(&thread)
            .map(|t| {
                t.stack
                    .iter()
                    .map(|f| match &f.action {
                        Some(action) => action.summary(),
                        None => current.to_string(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}
