// src/actions/parallel_iterate.rs

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::debug;

use crate::engine::signals::{EMPTY_LIST, INVALID_MAX_THREADS, MAX_THREADS_EXCEEDED};
use crate::engine::{Condition, ConditionId, ConditionKind, ThreadContext, ThreadEnd, ThreadId};
use crate::expr::Value;

use super::parallel::{release_parent, stop_children};
use super::{Action, SourceLocation};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IterateState {
    Init,
    WaitThreads,
    Unwinding,
    Complete,
}

/// Runs its body on a child thread per list element, with at most
/// `maxthreads` children alive at a time (0 means all at once).
///
/// Each child gets its own scope with `var` bound to its element and
/// `indexvar` to the element's 0-based position. When a child completes,
/// the next unstarted element is handed to a new child, unless the parent
/// has a condition pending.
#[derive(Debug, Clone)]
pub struct ParallelIterateAction {
    location: Arc<SourceLocation>,
    var: String,
    list: String,
    indexvar: Option<String>,
    max_threads: Option<String>,
    body: Arc<dyn Action>,
    state: IterateState,
    items: Vec<Value>,
    submitted: usize,
    children: BTreeSet<ThreadId>,
    hold: Option<ConditionId>,
    hard_hold: Option<ConditionId>,
}

impl ParallelIterateAction {
    pub fn new(
        location: Arc<SourceLocation>,
        var: String,
        list: String,
        indexvar: Option<String>,
        max_threads: Option<String>,
        body: Arc<dyn Action>,
    ) -> Self {
        Self {
            location,
            var,
            list,
            indexvar,
            max_threads,
            body,
            state: IterateState::Init,
            items: Vec::new(),
            submitted: 0,
            children: BTreeSet::new(),
            hold: None,
            hard_hold: None,
        }
    }

    /// Start a child for the next unstarted element.
    fn spawn_next(&mut self, ctx: &mut ThreadContext<'_>) -> Option<ThreadId> {
        let index = self.submitted;
        let item = self.items.get(index)?.clone();
        let child = ctx.create_child_thread(false)?;
        self.submitted += 1;

        if let Some(indexvar) = &self.indexvar {
            ctx.set_var_on(child, indexvar, Value::from(index));
        }
        ctx.set_var_on(child, &self.var, item);
        ctx.notify_on_completion(child);
        ctx.push_action_on(child, self.body.clone_action());
        self.children.insert(child);
        Some(child)
    }

    fn fail(&mut self, ctx: &mut ThreadContext<'_>, signal: &str, attribute: Option<&str>, message: &str) {
        self.state = IterateState::Complete;
        ctx.pop_action();
        let message = self.location.error_message(attribute, message);
        ctx.raise_signal_with_message(signal, &message);
    }
}

impl Action for ParallelIterateAction {
    fn location(&self) -> &SourceLocation {
        &self.location
    }

    fn info(&self) -> String {
        format!("{} ({}/{})", self.var, self.submitted, self.items.len())
    }

    fn details(&self) -> String {
        format!("state={:?} children={:?}", self.state, self.children)
    }

    fn execute(&mut self, ctx: &mut ThreadContext<'_>) {
        match self.state {
            IterateState::Init => {
                let Some(items) = ctx.eval_list_or_raise(&self.location, "in", &self.list) else {
                    return;
                };
                if items.is_empty() {
                    let message = format!("The list to iterate over is empty: {}", self.list);
                    self.fail(ctx, EMPTY_LIST, Some("in"), &message);
                    return;
                }

                let requested = match &self.max_threads {
                    Some(expr) => {
                        let Some(max) = ctx.eval_int_or_raise(&self.location, "maxthreads", expr)
                        else {
                            return;
                        };
                        max
                    }
                    None => 0,
                };
                if requested < 0 {
                    let message =
                        format!("The maxthreads must be an integer >= 0. Invalid value: {requested}");
                    self.fail(ctx, INVALID_MAX_THREADS, Some("maxthreads"), &message);
                    return;
                }
                let batch = match usize::try_from(requested).unwrap_or(usize::MAX) {
                    0 => items.len(),
                    n => n.min(items.len()),
                };

                if let Err(message) = ctx.check_admission(batch) {
                    self.fail(ctx, MAX_THREADS_EXCEEDED, None, &message);
                    return;
                }

                self.items = items;
                let mut started = Vec::with_capacity(batch);
                for _ in 0..batch {
                    match self.spawn_next(ctx) {
                        Some(child) => started.push(child),
                        None => break,
                    }
                }
                for child in started {
                    ctx.schedule_thread(child);
                }

                let hold = ctx.new_condition(ConditionKind::Hold, &self.location.to_string());
                self.hold = Some(hold.id());
                ctx.add_condition(hold);
                self.state = IterateState::WaitThreads;
                debug!(
                    job = ctx.job_id(),
                    thread = ctx.thread_id(),
                    items = self.items.len(),
                    batch,
                    "paralleliterate started"
                );
            }
            IterateState::WaitThreads | IterateState::Unwinding => {
                if self.children.is_empty() {
                    self.state = IterateState::Complete;
                    ctx.pop_action();
                }
            }
            IterateState::Complete => ctx.pop_action(),
        }
    }

    fn handle_condition(&mut self, ctx: &mut ThreadContext<'_>, _condition: &Condition) {
        if self.children.is_empty() {
            self.state = IterateState::Complete;
            ctx.pop_action();
            return;
        }
        self.state = IterateState::Unwinding;
        let source = self.location.to_string();
        stop_children(ctx, &self.children, &mut self.hard_hold, &source);
    }

    fn thread_complete(&mut self, ctx: &mut ThreadContext<'_>, child: ThreadId, end: ThreadEnd) {
        self.children.remove(&child);

        let interrupted = ctx.conditions().iter().any(|c| !c.is_hold());
        if self.state == IterateState::WaitThreads
            && !interrupted
            && self.submitted < self.items.len()
        {
            if let Some(next) = self.spawn_next(ctx) {
                debug!(job = ctx.job_id(), child, ?end, next, "paralleliterate refill");
                ctx.schedule_thread(next);
                return;
            }
        }

        if self.children.is_empty() {
            if self.state == IterateState::WaitThreads {
                self.state = IterateState::Complete;
            }
            release_parent(ctx, &mut self.hold, &mut self.hard_hold);
        }
    }

    fn clone_action(&self) -> Box<dyn Action> {
        Box::new(Self::new(
            Arc::clone(&self.location),
            self.var.clone(),
            self.list.clone(),
            self.indexvar.clone(),
            self.max_threads.clone(),
            Arc::clone(&self.body),
        ))
    }
}
