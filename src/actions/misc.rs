// src/actions/misc.rs

//! Leaf actions: `log`, `message`, `script`, `nop` and `breakpoint`.

use std::sync::Arc;

use tracing::{debug, error, info, trace, warn};

use crate::engine::{Condition, ConditionId, ConditionKind, ThreadContext};
use crate::events::{EventKind, LifecycleEvent};
use crate::expr::EvaluationError;
use crate::registry::Breakpoint;
use crate::types::JobLogLevel;

use super::{Action, SourceLocation};

/// Writes a job log record.
#[derive(Debug, Clone)]
pub struct LogAction {
    location: Arc<SourceLocation>,
    text: String,
    level: Option<String>,
    /// Also send the text as a message.
    message: Option<String>,
}

impl LogAction {
    pub fn new(
        location: Arc<SourceLocation>,
        text: String,
        level: Option<String>,
        message: Option<String>,
    ) -> Self {
        Self {
            location,
            text,
            level,
            message,
        }
    }
}

impl Action for LogAction {
    fn location(&self) -> &SourceLocation {
        &self.location
    }

    fn info(&self) -> String {
        self.text.clone()
    }

    fn execute(&mut self, ctx: &mut ThreadContext<'_>) {
        let Some(text) = ctx.eval_string_or_raise(&self.location, "text", &self.text) else {
            return;
        };
        let level = match &self.level {
            Some(expr) => {
                let Some(level) = ctx.eval_string_or_raise(&self.location, "level", expr) else {
                    return;
                };
                match level.parse::<JobLogLevel>() {
                    Ok(level) => level,
                    Err(message) => {
                        let error = EvaluationError::new(expr.clone(), message);
                        ctx.evaluation_failed(&self.location, Some("level"), &error);
                        return;
                    }
                }
            }
            None => JobLogLevel::Info,
        };
        let also_message = match &self.message {
            Some(expr) => match ctx.eval_bool_or_raise(&self.location, "message", expr) {
                Some(flag) => flag,
                None => return,
            },
            None => false,
        };
        ctx.pop_action();

        let (job, thread) = (ctx.job_id(), ctx.thread_id());
        match level {
            JobLogLevel::Fatal | JobLogLevel::Error | JobLogLevel::Fail => {
                error!(job, thread, %level, "{text}")
            }
            JobLogLevel::Warning => warn!(job, thread, %level, "{text}"),
            JobLogLevel::Debug => debug!(job, thread, %level, "{text}"),
            JobLogLevel::Trace => trace!(job, thread, %level, "{text}"),
            _ => info!(job, thread, %level, "{text}"),
        }

        ctx.publish(
            LifecycleEvent::new(job, EventKind::Log, level.to_string(), "logged")
                .with("text", text.clone())
                .with("thread", thread.to_string()),
        );
        if also_message {
            ctx.publish(LifecycleEvent::new(job, EventKind::Message, "message", "sent").with("text", text));
        }
    }

    fn clone_action(&self) -> Box<dyn Action> {
        Box::new(self.clone())
    }
}

/// Sends a message to whoever monitors the job.
#[derive(Debug, Clone)]
pub struct MessageAction {
    location: Arc<SourceLocation>,
    text: String,
}

impl MessageAction {
    pub fn new(location: Arc<SourceLocation>, text: String) -> Self {
        Self { location, text }
    }
}

impl Action for MessageAction {
    fn location(&self) -> &SourceLocation {
        &self.location
    }

    fn info(&self) -> String {
        self.text.clone()
    }

    fn execute(&mut self, ctx: &mut ThreadContext<'_>) {
        let Some(text) = ctx.eval_string_or_raise(&self.location, "text", &self.text) else {
            return;
        };
        ctx.pop_action();
        ctx.publish(
            LifecycleEvent::new(ctx.job_id(), EventKind::Message, "message", "sent")
                .with("text", text)
                .with("thread", ctx.thread_id().to_string()),
        );
    }

    fn clone_action(&self) -> Box<dyn Action> {
        Box::new(self.clone())
    }
}

/// Runs statements in the thread's scope.
#[derive(Debug, Clone)]
pub struct ScriptAction {
    location: Arc<SourceLocation>,
    code: String,
}

impl ScriptAction {
    pub fn new(location: Arc<SourceLocation>, code: String) -> Self {
        Self { location, code }
    }
}

impl Action for ScriptAction {
    fn location(&self) -> &SourceLocation {
        &self.location
    }

    fn execute(&mut self, ctx: &mut ThreadContext<'_>) {
        match ctx.exec(&self.code) {
            Ok(()) => ctx.pop_action(),
            Err(error) => ctx.evaluation_failed(&self.location, None, &error),
        }
    }

    fn clone_action(&self) -> Box<dyn Action> {
        Box::new(self.clone())
    }
}

#[derive(Debug, Clone)]
pub struct NopAction {
    location: Arc<SourceLocation>,
}

impl NopAction {
    pub fn new(location: Arc<SourceLocation>) -> Self {
        Self { location }
    }
}

impl Action for NopAction {
    fn location(&self) -> &SourceLocation {
        &self.location
    }

    fn execute(&mut self, ctx: &mut ThreadContext<'_>) {
        ctx.pop_action();
    }

    fn clone_action(&self) -> Box<dyn Action> {
        Box::new(self.clone())
    }
}

/// Holds the thread until an external resume when breakpoints are enabled
/// for the job; otherwise does nothing.
#[derive(Debug, Clone)]
pub struct BreakpointAction {
    location: Arc<SourceLocation>,
    held: Option<(u64, ConditionId)>,
}

impl BreakpointAction {
    pub fn new(location: Arc<SourceLocation>) -> Self {
        Self {
            location,
            held: None,
        }
    }
}

impl Action for BreakpointAction {
    fn location(&self) -> &SourceLocation {
        &self.location
    }

    fn details(&self) -> String {
        match self.held {
            Some((id, _)) => format!("breakpoint {id}"),
            None => String::new(),
        }
    }

    fn execute(&mut self, ctx: &mut ThreadContext<'_>) {
        if self.held.is_some() || !ctx.settings().breakpoints {
            ctx.pop_action();
            return;
        }

        let hold = ctx.new_condition(ConditionKind::Hold, "Breakpoint");
        let condition = hold.id();
        ctx.add_condition(hold);
        let id = ctx.job().next_id();
        let breakpoint = Breakpoint {
            id,
            thread: ctx.thread_id(),
            frame: ctx.frame_id(),
            condition,
            location: self.location.to_string(),
        };
        ctx.job().breakpoints.register(breakpoint);
        self.held = Some((id, condition));

        info!(job = ctx.job_id(), thread = ctx.thread_id(), breakpoint = id, "thread held at breakpoint");
        ctx.publish(
            LifecycleEvent::new(ctx.job_id(), EventKind::Breakpoint, id.to_string(), "hit")
                .with("thread", ctx.thread_id().to_string())
                .with("location", self.location.to_string()),
        );
    }

    fn handle_condition(&mut self, ctx: &mut ThreadContext<'_>, _condition: &Condition) {
        if let Some((id, condition)) = self.held.take() {
            ctx.job().breakpoints.remove(id);
            ctx.remove_condition(condition);
        }
        ctx.pop_action();
    }

    fn clone_action(&self) -> Box<dyn Action> {
        Box::new(Self::new(Arc::clone(&self.location)))
    }
}
