// src/engine/context.rs

//! The API actions use to act on their thread and job.
//!
//! A `ThreadContext` exists only for the duration of one call into an
//! action (`execute`, `handle_condition` or a callback). It knows which
//! thread and which frame it was created for, so "current thread" and
//! "notify this frame" need no extra bookkeeping in the actions.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Local;

use crate::actions::{Action, SourceLocation};
use crate::definition::FunctionTemplate;
use crate::events::LifecycleEvent;
use crate::expr::{EvaluationError, Scope, Value};
use crate::registry::{PendingImport, PendingRequest, PendingSubJob};

use super::job::TimerTarget;
use super::signals::{self, EVALUATION_ERROR};
use super::{
    Condition, ConditionId, ConditionKind, FrameId, Job, JobCommand, JobId, JobSettings,
    RemoteRequest, RequestId, SubJobRequest, ThreadEnd, ThreadId, TimedEventId,
};

pub struct ThreadContext<'a> {
    job: &'a mut Job,
    thread: ThreadId,
    frame: FrameId,
    popped: bool,
}

impl<'a> ThreadContext<'a> {
    pub(crate) fn new(job: &'a mut Job, thread: ThreadId, frame: FrameId) -> Self {
        Self {
            job,
            thread,
            frame,
            popped: false,
        }
    }

    pub(crate) fn popped(&self) -> bool {
        self.popped
    }

    pub fn job_id(&self) -> JobId {
        self.job.id()
    }

    pub fn thread_id(&self) -> ThreadId {
        self.thread
    }

    pub fn frame_id(&self) -> FrameId {
        self.frame
    }

    pub fn settings(&self) -> &JobSettings {
        self.job.settings()
    }

    pub(crate) fn job(&mut self) -> &mut Job {
        self.job
    }

    // ----- call stack -----

    pub fn push_action(&mut self, action: Box<dyn Action>) {
        self.job.push_action(self.thread, action);
    }

    /// Remove the calling action from the stack once the call returns.
    /// Calling it more than once has no further effect.
    pub fn pop_action(&mut self) {
        self.popped = true;
    }

    /// Call stack of this thread, outermost first; the calling action is
    /// rendered as `current`.
    pub fn call_stack(&self, current: &str) -> Vec<String> {
        self.job.call_stack(self.thread, current)
    }

    // ----- conditions -----

    pub fn new_condition(&mut self, kind: ConditionKind, source: &str) -> Condition {
        self.job.new_condition(kind, source)
    }

    pub fn add_condition(&mut self, condition: Condition) -> bool {
        self.job.add_condition(self.thread, condition)
    }

    pub fn remove_condition(&mut self, id: ConditionId) -> bool {
        self.job.remove_condition(self.thread, id)
    }

    /// Pending conditions, highest priority first.
    pub fn conditions(&self) -> Vec<Condition> {
        self.job
            .threads
            .get(&self.thread)
            .map(|t| t.conditions.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn retain_conditions(&mut self, keep: impl FnMut(&Condition) -> bool) {
        if let Some(t) = self.job.threads.get_mut(&self.thread) {
            t.conditions.retain(keep);
        }
    }

    pub fn has_inheritable_conditions(&self) -> bool {
        self.job
            .threads
            .get(&self.thread)
            .is_some_and(|t| t.conditions.has_inheritable())
    }

    pub fn take_inheritable_conditions(&mut self) -> Vec<Condition> {
        self.job
            .threads
            .get_mut(&self.thread)
            .map(|t| t.conditions.take_inheritable())
            .unwrap_or_default()
    }

    // ----- scheduling -----

    pub fn schedule(&mut self) {
        self.job.schedule(self.thread);
    }

    pub fn schedule_thread(&mut self, thread: ThreadId) {
        self.job.schedule(thread);
    }

    // ----- variables and evaluation -----

    pub fn scope(&self) -> Scope {
        self.job
            .threads
            .get(&self.thread)
            .map(|t| t.scope.clone())
            .unwrap_or_default()
    }

    /// Swap in a new scope for this thread, returning the old one.
    pub fn replace_scope(&mut self, scope: Scope) -> Scope {
        match self.job.threads.get_mut(&self.thread) {
            Some(t) => std::mem::replace(&mut t.scope, scope),
            None => scope,
        }
    }

    pub fn get_var(&self, name: &str) -> Option<Value> {
        self.job.threads.get(&self.thread).and_then(|t| t.scope.get(name))
    }

    pub fn get_string_var(&self, name: &str) -> Option<String> {
        match self.get_var(name)? {
            Value::String(s) => Some(s),
            Value::Null => None,
            other => Some(other.to_string()),
        }
    }

    pub fn set_var(&mut self, name: &str, value: Value) {
        let scope = self.scope();
        self.job.evaluator().set_var(&scope, name, value);
    }

    pub fn remove_var(&mut self, name: &str) {
        self.scope().remove(name);
    }

    pub fn eval_object(&self, expr: &str) -> Result<Value, EvaluationError> {
        self.job.evaluator().eval_object(expr, &self.scope())
    }

    pub fn eval_bool(&self, expr: &str) -> Result<bool, EvaluationError> {
        self.job.evaluator().eval_bool(expr, &self.scope())
    }

    pub fn eval_int(&self, expr: &str) -> Result<i64, EvaluationError> {
        self.job.evaluator().eval_int(expr, &self.scope())
    }

    pub fn eval_string(&self, expr: &str) -> Result<String, EvaluationError> {
        self.job.evaluator().eval_string(expr, &self.scope())
    }

    pub fn eval_list(&self, expr: &str) -> Result<Vec<Value>, EvaluationError> {
        self.job.evaluator().eval_list(expr, &self.scope())
    }

    pub fn exec(&self, code: &str) -> Result<(), EvaluationError> {
        self.job.evaluator().exec(code, &self.scope())
    }

    /// Pop the calling action and raise the evaluation signal for a failed
    /// attribute.
    pub fn evaluation_failed(
        &mut self,
        location: &SourceLocation,
        attribute: Option<&str>,
        error: &EvaluationError,
    ) {
        self.pop_action();
        let message = location.error_message(attribute, &error.to_string());
        self.raise_signal_with_message(EVALUATION_ERROR, &message);
    }

    pub fn eval_object_or_raise(
        &mut self,
        location: &SourceLocation,
        attribute: &str,
        expr: &str,
    ) -> Option<Value> {
        let result = self.eval_object(expr);
        self.or_raise(location, attribute, result)
    }

    pub fn eval_bool_or_raise(
        &mut self,
        location: &SourceLocation,
        attribute: &str,
        expr: &str,
    ) -> Option<bool> {
        let result = self.eval_bool(expr);
        self.or_raise(location, attribute, result)
    }

    pub fn eval_int_or_raise(
        &mut self,
        location: &SourceLocation,
        attribute: &str,
        expr: &str,
    ) -> Option<i64> {
        let result = self.eval_int(expr);
        self.or_raise(location, attribute, result)
    }

    pub fn eval_string_or_raise(
        &mut self,
        location: &SourceLocation,
        attribute: &str,
        expr: &str,
    ) -> Option<String> {
        let result = self.eval_string(expr);
        self.or_raise(location, attribute, result)
    }

    pub fn eval_list_or_raise(
        &mut self,
        location: &SourceLocation,
        attribute: &str,
        expr: &str,
    ) -> Option<Vec<Value>> {
        let result = self.eval_list(expr);
        self.or_raise(location, attribute, result)
    }

    fn or_raise<T>(
        &mut self,
        location: &SourceLocation,
        attribute: &str,
        result: Result<T, EvaluationError>,
    ) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(error) => {
                self.evaluation_failed(location, Some(attribute), &error);
                None
            }
        }
    }

    // ----- signals -----

    pub fn raise_signal(&mut self, signal: &str) {
        self.job.raise_signal(self.thread, signal);
    }

    /// Store `message` in `<signal>Msg` and raise `signal`.
    pub fn raise_signal_with_message(&mut self, signal: &str, message: &str) {
        self.set_var(&signals::message_var(signal), Value::from(message));
        self.job.raise_signal(self.thread, signal);
    }

    pub fn register_signal_handler(&mut self, signal: &str, handler: Arc<dyn Action>) {
        if let Some(t) = self.job.threads.get_mut(&self.thread) {
            t.signal_handlers.insert(signal.to_string(), handler);
        }
    }

    pub fn signal_handled(&mut self, signal: &str) {
        self.job.signal_handled(self.thread, signal);
    }

    // ----- child threads -----

    /// Check that `additional` threads may start now.
    pub fn check_admission(&self, additional: usize) -> Result<(), String> {
        self.job.check_admission(additional)
    }

    /// Create an unscheduled child thread of this thread.
    pub fn create_child_thread(&mut self, share_scope: bool) -> Option<ThreadId> {
        self.job.create_child_thread(self.thread, share_scope)
    }

    pub fn push_action_on(&mut self, thread: ThreadId, action: Box<dyn Action>) {
        self.job.push_action(thread, action);
    }

    pub fn set_var_on(&mut self, thread: ThreadId, name: &str, value: Value) {
        if let Some(t) = self.job.threads.get(&thread) {
            let scope = t.scope.clone();
            self.job.evaluator().set_var(&scope, name, value);
        }
    }

    /// Deliver `thread_complete` for `child` to the calling frame.
    pub fn notify_on_completion(&mut self, child: ThreadId) {
        let notifiee = super::thread::Notifiee::Action {
            thread: self.thread,
            frame: self.frame,
        };
        if let Some(t) = self.job.threads.get_mut(&child) {
            t.notifiees.push(notifiee);
        }
    }

    pub fn terminate_thread(&mut self, thread: ThreadId, end: ThreadEnd) {
        self.job.terminate_thread(thread, end);
    }

    // ----- timers, requests, sub-jobs, imports -----

    /// Schedule a `timed_event` callback to the calling frame.
    pub fn schedule_timer(&mut self, after: Duration) -> TimedEventId {
        let target = TimerTarget::Action {
            thread: self.thread,
            frame: self.frame,
        };
        self.job.schedule_timer(target, after)
    }

    pub fn cancel_timer(&mut self, id: TimedEventId) {
        self.job.cancel_timer(id);
    }

    /// Submit a remote request; completion is delivered to the calling frame.
    pub fn submit_request(&mut self, request: RemoteRequest) -> RequestId {
        let id = self.job.next_id();
        self.job.requests.insert(
            id,
            PendingRequest {
                thread: self.thread,
                frame: self.frame,
                request: request.clone(),
                submitted: Local::now(),
            },
        );
        self.job.emit(JobCommand::SubmitRequest { id, request });
        id
    }

    pub fn cancel_request(&mut self, id: RequestId) {
        if self.job.requests.take(id).is_some() {
            self.job.emit(JobCommand::CancelRequest { id });
        }
    }

    /// Start a sub-job; notices are delivered to the calling frame.
    pub fn start_sub_job(&mut self, request: SubJobRequest) -> RequestId {
        let id = self.job.next_id();
        self.job.subjobs.insert(
            id,
            PendingSubJob {
                thread: self.thread,
                frame: self.frame,
                request: request.clone(),
                job: None,
                submitted: Local::now(),
            },
        );
        self.job.emit(JobCommand::StartSubJob { id, request });
        id
    }

    /// Forget a sub-job without waiting for it.
    pub fn release_sub_job(&mut self, id: RequestId) {
        self.job.subjobs.take(id);
    }

    /// Ask for a job document; it is delivered to the calling frame.
    pub fn load_document(&mut self, file: PathBuf) -> RequestId {
        let id = self.job.next_id();
        self.job.imports.insert(
            id,
            PendingImport {
                thread: self.thread,
                frame: self.frame,
                file: file.clone(),
                submitted: Local::now(),
            },
        );
        self.job.emit(JobCommand::LoadDocument { id, file });
        id
    }

    /// Stop waiting for a document load.
    pub fn release_import(&mut self, id: RequestId) {
        self.job.imports.take(id);
    }

    // ----- job-level lookups -----

    pub fn function(&self, name: &str) -> Option<Arc<FunctionTemplate>> {
        self.job.function(name)
    }

    pub fn function_exists(&self, name: &str) -> bool {
        self.job.function(name).is_some()
    }

    pub fn import_function(&mut self, function: Arc<FunctionTemplate>) {
        self.job.add_function(function);
    }

    pub fn publish(&mut self, event: LifecycleEvent) {
        self.job.publish(event);
    }
}
