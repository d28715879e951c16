// src/actions/parallel.rs

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::debug;

use crate::engine::signals::MAX_THREADS_EXCEEDED;
use crate::engine::{
    Condition, ConditionId, ConditionKind, ThreadContext, ThreadEnd, ThreadId,
};

use super::{Action, SourceLocation};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParallelState {
    Init,
    WaitThreads,
    Unwinding,
    Complete,
}

/// Runs every branch on its own child thread and waits for all of them.
///
/// While children are outstanding the parent carries a hold. A condition
/// reaching the parent in that time terminates the children; the parent
/// stays hard-held until the last one has reported completion.
#[derive(Debug, Clone)]
pub struct ParallelAction {
    location: Arc<SourceLocation>,
    branches: Arc<Vec<Arc<dyn Action>>>,
    state: ParallelState,
    children: BTreeSet<ThreadId>,
    hold: Option<ConditionId>,
    hard_hold: Option<ConditionId>,
}

impl ParallelAction {
    pub fn new(location: Arc<SourceLocation>, branches: Vec<Arc<dyn Action>>) -> Self {
        Self {
            location,
            branches: Arc::new(branches),
            state: ParallelState::Init,
            children: BTreeSet::new(),
            hold: None,
            hard_hold: None,
        }
    }
}

/// Shared by `parallel` and `paralleliterate`: hard-hold the parent and stop
/// every outstanding child.
pub(crate) fn stop_children(
    ctx: &mut ThreadContext<'_>,
    children: &BTreeSet<ThreadId>,
    hard_hold: &mut Option<ConditionId>,
    source: &str,
) {
    if hard_hold.is_none() {
        let condition = ctx.new_condition(ConditionKind::HardHold, source);
        *hard_hold = Some(condition.id());
        ctx.add_condition(condition);
    }
    for &child in children {
        ctx.terminate_thread(child, ThreadEnd::StoppedByParent);
    }
}

/// Lift the wait holds once no child is left.
pub(crate) fn release_parent(
    ctx: &mut ThreadContext<'_>,
    hold: &mut Option<ConditionId>,
    hard_hold: &mut Option<ConditionId>,
) {
    for id in [hold.take(), hard_hold.take()].into_iter().flatten() {
        ctx.remove_condition(id);
    }
    ctx.schedule();
}

impl Action for ParallelAction {
    fn location(&self) -> &SourceLocation {
        &self.location
    }

    fn info(&self) -> String {
        format!("{} branches", self.branches.len())
    }

    fn details(&self) -> String {
        format!("state={:?} children={:?}", self.state, self.children)
    }

    fn execute(&mut self, ctx: &mut ThreadContext<'_>) {
        match self.state {
            ParallelState::Init => {
                if self.branches.is_empty() {
                    self.state = ParallelState::Complete;
                    ctx.pop_action();
                    return;
                }
                if let Err(message) = ctx.check_admission(self.branches.len()) {
                    self.state = ParallelState::Complete;
                    ctx.pop_action();
                    let message = self.location.error_message(None, &message);
                    ctx.raise_signal_with_message(MAX_THREADS_EXCEEDED, &message);
                    return;
                }

                let mut started = Vec::with_capacity(self.branches.len());
                for branch in self.branches.iter() {
                    let Some(child) = ctx.create_child_thread(false) else {
                        break;
                    };
                    ctx.notify_on_completion(child);
                    ctx.push_action_on(child, branch.clone_action());
                    self.children.insert(child);
                    started.push(child);
                }
                for child in started {
                    ctx.schedule_thread(child);
                }

                let hold = ctx.new_condition(ConditionKind::Hold, &self.location.to_string());
                self.hold = Some(hold.id());
                ctx.add_condition(hold);
                self.state = ParallelState::WaitThreads;
                debug!(
                    job = ctx.job_id(),
                    thread = ctx.thread_id(),
                    children = ?self.children,
                    "parallel branches started"
                );
            }
            ParallelState::WaitThreads | ParallelState::Unwinding => {
                if self.children.is_empty() {
                    self.state = ParallelState::Complete;
                    ctx.pop_action();
                }
            }
            ParallelState::Complete => ctx.pop_action(),
        }
    }

    fn handle_condition(&mut self, ctx: &mut ThreadContext<'_>, _condition: &Condition) {
        if self.children.is_empty() {
            self.state = ParallelState::Complete;
            ctx.pop_action();
            return;
        }
        self.state = ParallelState::Unwinding;
        let source = self.location.to_string();
        stop_children(ctx, &self.children, &mut self.hard_hold, &source);
    }

    fn thread_complete(&mut self, ctx: &mut ThreadContext<'_>, child: ThreadId, end: ThreadEnd) {
        self.children.remove(&child);
        debug!(
            job = ctx.job_id(),
            thread = ctx.thread_id(),
            child,
            ?end,
            remaining = self.children.len(),
            "parallel branch complete"
        );
        if self.children.is_empty() {
            if self.state == ParallelState::WaitThreads {
                self.state = ParallelState::Complete;
            }
            release_parent(ctx, &mut self.hold, &mut self.hard_hold);
        }
    }

    fn clone_action(&self) -> Box<dyn Action> {
        Box::new(Self {
            location: Arc::clone(&self.location),
            branches: Arc::clone(&self.branches),
            state: ParallelState::Init,
            children: BTreeSet::new(),
            hold: None,
            hard_hold: None,
        })
    }
}
