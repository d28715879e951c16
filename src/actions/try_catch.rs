// src/actions/try_catch.rs

//! `try`, `catch` and `finally`.

use std::sync::Arc;

use serde_json::json;
use tracing::debug;

use crate::engine::{
    Condition, ConditionId, ConditionKind, ExceptionInfo, ThreadContext, ThreadEnd, ThreadId,
};
use crate::expr::Value;

use super::{Action, SourceLocation};

/// True if a catch for `pattern` handles an exception named `name`.
///
/// `...` catches everything; otherwise the pattern must equal the name or
/// be a dot-separated prefix of it (`A.B` catches `A.B.C` but not `A.BC`).
pub fn catch_matches(pattern: &str, name: &str) -> bool {
    pattern == "..."
        || pattern == name
        || name
            .strip_prefix(pattern)
            .is_some_and(|rest| rest.starts_with('.'))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TryState {
    Init,
    ActionCalled,
    Complete,
}

/// Runs its body; an exception reaching it is handed to the first `catch`
/// whose pattern matches.
#[derive(Debug, Clone)]
pub struct TryAction {
    location: Arc<SourceLocation>,
    body: Arc<dyn Action>,
    catches: Arc<Vec<CatchAction>>,
    state: TryState,
    /// Catch patterns, evaluated on entry.
    patterns: Vec<String>,
}

impl TryAction {
    pub fn new(location: Arc<SourceLocation>, body: Arc<dyn Action>, catches: Vec<CatchAction>) -> Self {
        Self {
            location,
            body,
            catches: Arc::new(catches),
            state: TryState::Init,
            patterns: Vec::new(),
        }
    }

    fn handler_for(&self, name: &str) -> Option<&CatchAction> {
        self.patterns
            .iter()
            .position(|pattern| catch_matches(pattern, name))
            .and_then(|index| self.catches.get(index))
    }
}

impl Action for TryAction {
    fn location(&self) -> &SourceLocation {
        &self.location
    }

    fn details(&self) -> String {
        format!("state={:?} catches={:?}", self.state, self.patterns)
    }

    fn execute(&mut self, ctx: &mut ThreadContext<'_>) {
        match self.state {
            TryState::Init => {
                let mut patterns = Vec::with_capacity(self.catches.len());
                for catch in self.catches.iter() {
                    let Some(pattern) =
                        ctx.eval_string_or_raise(&catch.location, "exception", &catch.exception)
                    else {
                        return;
                    };
                    patterns.push(pattern);
                }
                self.patterns = patterns;
                self.state = TryState::ActionCalled;
                ctx.push_action(self.body.clone_action());
            }
            TryState::ActionCalled | TryState::Complete => {
                self.state = TryState::Complete;
                ctx.pop_action();
            }
        }
    }

    fn handle_condition(&mut self, ctx: &mut ThreadContext<'_>, condition: &Condition) {
        self.state = TryState::Complete;
        ctx.pop_action();

        if let Some(exception) = condition.exception() {
            if let Some(handler) = self.handler_for(&exception.name) {
                debug!(
                    job = ctx.job_id(),
                    thread = ctx.thread_id(),
                    exception = %exception.name,
                    "exception caught"
                );
                ctx.push_action(Box::new(handler.bound_to(exception.clone())));
            }
        }

        // Exceptions this try handles never outlive it.
        let patterns = self.patterns.clone();
        ctx.retain_conditions(|c| match c.exception() {
            Some(e) => !patterns.iter().any(|p| catch_matches(p, &e.name)),
            None => true,
        });
    }

    fn clone_action(&self) -> Box<dyn Action> {
        Box::new(Self {
            state: TryState::Init,
            patterns: Vec::new(),
            ..self.clone()
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CatchState {
    Init,
    ActionCalled,
    Complete,
}

/// Handler body for one exception pattern. Only ever pushed by a `try`,
/// bound to the exception it caught.
#[derive(Debug, Clone)]
pub struct CatchAction {
    location: Arc<SourceLocation>,
    exception: String,
    var: Option<String>,
    typevar: Option<String>,
    sourcevar: Option<String>,
    body: Arc<dyn Action>,
    state: CatchState,
    thrown: Option<ExceptionInfo>,
}

impl CatchAction {
    pub fn new(
        location: Arc<SourceLocation>,
        exception: String,
        var: Option<String>,
        typevar: Option<String>,
        sourcevar: Option<String>,
        body: Arc<dyn Action>,
    ) -> Self {
        Self {
            location,
            exception,
            var,
            typevar,
            sourcevar,
            body,
            state: CatchState::Init,
            thrown: None,
        }
    }

    fn bound_to(&self, thrown: ExceptionInfo) -> Self {
        Self {
            state: CatchState::Init,
            thrown: Some(thrown),
            ..self.clone()
        }
    }
}

impl Action for CatchAction {
    fn location(&self) -> &SourceLocation {
        &self.location
    }

    fn info(&self) -> String {
        self.exception.clone()
    }

    fn execute(&mut self, ctx: &mut ThreadContext<'_>) {
        match (self.state, &self.thrown) {
            (CatchState::Init, Some(thrown)) => {
                if let Some(var) = &self.var {
                    ctx.set_var(var, thrown.data.clone());
                }
                if let Some(typevar) = &self.typevar {
                    ctx.set_var(typevar, Value::from(thrown.name.clone()));
                }
                if let Some(sourcevar) = &self.sourcevar {
                    ctx.set_var(
                        sourcevar,
                        json!({
                            "source": thrown.source,
                            "stackTrace": thrown.stack_trace,
                        }),
                    );
                }
                self.state = CatchState::ActionCalled;
                ctx.push_action(self.body.clone_action());
            }
            _ => {
                self.state = CatchState::Complete;
                ctx.pop_action();
            }
        }
    }

    fn handle_condition(&mut self, ctx: &mut ThreadContext<'_>, _condition: &Condition) {
        self.state = CatchState::Complete;
        ctx.pop_action();

        let mut rethrown = false;
        ctx.retain_conditions(|c| {
            let is_rethrow = matches!(c.kind(), ConditionKind::Rethrow);
            rethrown |= is_rethrow;
            !is_rethrow
        });

        if let (true, Some(thrown)) = (rethrown, self.thrown.clone()) {
            let source = thrown.source.clone();
            let condition = ctx.new_condition(ConditionKind::Exception(thrown), &source);
            ctx.add_condition(condition);
        }
    }

    fn clone_action(&self) -> Box<dyn Action> {
        Box::new(Self {
            state: CatchState::Init,
            ..self.clone()
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FinallyState {
    Init,
    TryAction,
    WaitThread,
    ThreadComplete,
    Complete,
}

/// Runs the wrapped `try` and then, however it ended, the finally body on a
/// child thread sharing this thread's variables.
///
/// Inheritable conditions pending when the try unwinds are set aside while
/// the finally body runs, and restored afterwards unless the finally body
/// raised inheritable conditions of its own.
#[derive(Debug, Clone)]
pub struct FinallyAction {
    location: Arc<SourceLocation>,
    try_action: Arc<dyn Action>,
    finally: Arc<dyn Action>,
    state: FinallyState,
    saved: Vec<Condition>,
    hard_hold: Option<ConditionId>,
    thread: Option<ThreadId>,
}

impl FinallyAction {
    pub fn new(location: Arc<SourceLocation>, try_action: Arc<dyn Action>, finally: Arc<dyn Action>) -> Self {
        Self {
            location,
            try_action,
            finally,
            state: FinallyState::Init,
            saved: Vec::new(),
            hard_hold: None,
            thread: None,
        }
    }

    fn run_finally(&mut self, ctx: &mut ThreadContext<'_>) {
        let hold = ctx.new_condition(ConditionKind::HardHold, &self.location.to_string());
        self.hard_hold = Some(hold.id());
        ctx.add_condition(hold);
        self.state = FinallyState::WaitThread;

        match ctx.create_child_thread(true) {
            Some(child) => {
                self.thread = Some(child);
                ctx.notify_on_completion(child);
                ctx.push_action_on(child, self.finally.clone_action());
                ctx.schedule_thread(child);
            }
            None => self.resume(ctx),
        }
    }

    fn resume(&mut self, ctx: &mut ThreadContext<'_>) {
        if !ctx.has_inheritable_conditions() {
            for condition in self.saved.drain(..) {
                ctx.add_condition(condition);
            }
        } else {
            self.saved.clear();
        }
        self.state = FinallyState::ThreadComplete;
        if let Some(hold) = self.hard_hold.take() {
            ctx.remove_condition(hold);
        }
        ctx.schedule();
    }
}

impl Action for FinallyAction {
    fn location(&self) -> &SourceLocation {
        &self.location
    }

    fn details(&self) -> String {
        format!("state={:?} saved={}", self.state, self.saved.len())
    }

    fn execute(&mut self, ctx: &mut ThreadContext<'_>) {
        match self.state {
            FinallyState::Init => {
                self.state = FinallyState::TryAction;
                ctx.push_action(self.try_action.clone_action());
            }
            FinallyState::TryAction => self.run_finally(ctx),
            FinallyState::WaitThread => {}
            FinallyState::ThreadComplete | FinallyState::Complete => {
                self.state = FinallyState::Complete;
                ctx.pop_action();
            }
        }
    }

    fn handle_condition(&mut self, ctx: &mut ThreadContext<'_>, _condition: &Condition) {
        match self.state {
            FinallyState::TryAction => {
                self.saved = ctx.take_inheritable_conditions();
                self.run_finally(ctx);
            }
            FinallyState::WaitThread => {}
            _ => {
                self.state = FinallyState::Complete;
                ctx.pop_action();
            }
        }
    }

    fn thread_complete(&mut self, ctx: &mut ThreadContext<'_>, child: ThreadId, end: ThreadEnd) {
        if self.thread != Some(child) {
            return;
        }
        debug!(job = ctx.job_id(), thread = ctx.thread_id(), child, ?end, "finally body complete");
        self.thread = None;
        self.resume(ctx);
    }

    fn clone_action(&self) -> Box<dyn Action> {
        Box::new(Self::new(
            Arc::clone(&self.location),
            Arc::clone(&self.try_action),
            Arc::clone(&self.finally),
        ))
    }
}
