// src/actions/flow.rs

//! Single-step actions that add a condition and pop themselves:
//! `break`, `continue`, `return`, `throw` and `rethrow`.

use std::sync::Arc;

use crate::engine::{ConditionKind, ExceptionInfo, ThreadContext};
use crate::expr::Value;

use super::{Action, NameSpec, SourceLocation};

#[derive(Debug, Clone)]
pub struct BreakAction {
    location: Arc<SourceLocation>,
}

impl BreakAction {
    pub fn new(location: Arc<SourceLocation>) -> Self {
        Self { location }
    }
}

impl Action for BreakAction {
    fn location(&self) -> &SourceLocation {
        &self.location
    }

    fn execute(&mut self, ctx: &mut ThreadContext<'_>) {
        ctx.pop_action();
        let condition = ctx.new_condition(ConditionKind::Break, &self.location.to_string());
        ctx.add_condition(condition);
    }

    fn clone_action(&self) -> Box<dyn Action> {
        Box::new(self.clone())
    }
}

#[derive(Debug, Clone)]
pub struct ContinueAction {
    location: Arc<SourceLocation>,
}

impl ContinueAction {
    pub fn new(location: Arc<SourceLocation>) -> Self {
        Self { location }
    }
}

impl Action for ContinueAction {
    fn location(&self) -> &SourceLocation {
        &self.location
    }

    fn execute(&mut self, ctx: &mut ThreadContext<'_>) {
        ctx.pop_action();
        let condition = ctx.new_condition(ConditionKind::Continue, &self.location.to_string());
        ctx.add_condition(condition);
    }

    fn clone_action(&self) -> Box<dyn Action> {
        Box::new(self.clone())
    }
}

/// Leaves the current function, optionally with a value.
#[derive(Debug, Clone)]
pub struct ReturnAction {
    location: Arc<SourceLocation>,
    value: Option<String>,
}

impl ReturnAction {
    pub fn new(location: Arc<SourceLocation>, value: Option<String>) -> Self {
        Self { location, value }
    }
}

impl Action for ReturnAction {
    fn location(&self) -> &SourceLocation {
        &self.location
    }

    fn info(&self) -> String {
        self.value.clone().unwrap_or_default()
    }

    fn execute(&mut self, ctx: &mut ThreadContext<'_>) {
        let value = match &self.value {
            Some(expr) => match ctx.eval_object_or_raise(&self.location, "value", expr) {
                Some(value) => value,
                None => return,
            },
            None => Value::Null,
        };
        ctx.pop_action();
        let condition = ctx.new_condition(ConditionKind::Return(value), &self.location.to_string());
        ctx.add_condition(condition);
    }

    fn clone_action(&self) -> Box<dyn Action> {
        Box::new(self.clone())
    }
}

/// Raises a script-level exception.
#[derive(Debug, Clone)]
pub struct ThrowAction {
    location: Arc<SourceLocation>,
    exception: NameSpec,
    data: Option<String>,
}

impl ThrowAction {
    pub fn new(location: Arc<SourceLocation>, exception: NameSpec, data: Option<String>) -> Self {
        Self {
            location,
            exception,
            data,
        }
    }
}

impl Action for ThrowAction {
    fn location(&self) -> &SourceLocation {
        &self.location
    }

    fn info(&self) -> String {
        self.exception.to_string()
    }

    fn execute(&mut self, ctx: &mut ThreadContext<'_>) {
        let Some(name) = self.exception.resolve(ctx, &self.location, "exception") else {
            return;
        };
        let data = match &self.data {
            Some(expr) => match ctx.eval_object_or_raise(&self.location, "data", expr) {
                Some(data) => data,
                None => return,
            },
            None => Value::Null,
        };

        let exception = ExceptionInfo {
            name,
            data,
            source: self.location.to_string(),
            stack_trace: ctx.call_stack(&self.summary()),
        };
        ctx.pop_action();
        let condition =
            ctx.new_condition(ConditionKind::Exception(exception), &self.location.to_string());
        ctx.add_condition(condition);
    }

    fn clone_action(&self) -> Box<dyn Action> {
        Box::new(self.clone())
    }
}

/// Re-raises the exception of the enclosing `catch` once it unwinds.
#[derive(Debug, Clone)]
pub struct RethrowAction {
    location: Arc<SourceLocation>,
}

impl RethrowAction {
    pub fn new(location: Arc<SourceLocation>) -> Self {
        Self { location }
    }
}

impl Action for RethrowAction {
    fn location(&self) -> &SourceLocation {
        &self.location
    }

    fn execute(&mut self, ctx: &mut ThreadContext<'_>) {
        ctx.pop_action();
        let condition = ctx.new_condition(ConditionKind::Rethrow, &self.location.to_string());
        ctx.add_condition(condition);
    }

    fn clone_action(&self) -> Box<dyn Action> {
        Box::new(self.clone())
    }
}
