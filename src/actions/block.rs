// src/actions/block.rs

use std::sync::Arc;

use tracing::debug;

use crate::engine::signals::INVALID_BLOCK_NAME;
use crate::engine::{Condition, ConditionId, ConditionKind, ThreadContext};
use crate::expr::Value;

use super::{Action, NameSpec, SourceLocation};

/// `STAXBlockRC` after a normal exit.
pub const BLOCK_RC_NORMAL: i64 = 0;
/// `STAXBlockRC` when the block could not be entered.
pub const BLOCK_RC_ABNORMAL: i64 = 1;
/// `STAXBlockRC` after the block was terminated.
pub const BLOCK_RC_TERMINATED: i64 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockState {
    Init,
    ActionCalled,
    Complete,
}

/// A named region that can be held, released and terminated from outside.
///
/// A nested block's full name is its parent's name, a dot, and its own
/// name, e.g. `main.setup`. The name is registered with the job for the
/// block's dynamic extent and must be unique while registered.
#[derive(Debug, Clone)]
pub struct BlockAction {
    location: Arc<SourceLocation>,
    name: NameSpec,
    body: Arc<dyn Action>,
    state: BlockState,
    full_name: Option<String>,
    terminate: Option<ConditionId>,
}

impl BlockAction {
    pub fn new(location: Arc<SourceLocation>, name: NameSpec, body: Arc<dyn Action>) -> Self {
        Self {
            location,
            name,
            body,
            state: BlockState::Init,
            full_name: None,
            terminate: None,
        }
    }

    /// Block with a fixed name, used for the job's `main` block.
    pub fn literal(location: Arc<SourceLocation>, name: &str, body: Arc<dyn Action>) -> Self {
        Self::new(location, NameSpec::Literal(name.to_string()), body)
    }

    fn enter(&mut self, ctx: &mut ThreadContext<'_>) {
        let Some(name) = self.name.resolve(ctx, &self.location, "name") else {
            ctx.set_var("STAXBlockRC", Value::from(BLOCK_RC_ABNORMAL));
            return;
        };
        let full_name = match ctx.get_string_var("STAXCurrentBlock") {
            Some(parent) => format!("{parent}.{name}"),
            None => name,
        };

        let thread = ctx.thread_id();
        match ctx.job().enter_block(&full_name, thread) {
            Ok((_hold, terminate)) => self.terminate = Some(terminate),
            Err(message) => {
                self.state = BlockState::Complete;
                ctx.pop_action();
                ctx.set_var("STAXBlockRC", Value::from(BLOCK_RC_ABNORMAL));
                let message = self.location.error_message(
                    Some("name"),
                    &format!(
                        "{message}. Use a variable in the block name to make it unique, \
                         e.g. within a paralleliterate."
                    ),
                );
                ctx.raise_signal_with_message(INVALID_BLOCK_NAME, &message);
                return;
            }
        }

        let mut stack = match ctx.get_var("STAXBlockStack") {
            Some(Value::Array(stack)) => stack,
            _ => Vec::new(),
        };
        stack.push(Value::from(full_name.clone()));
        ctx.set_var("STAXBlockStack", Value::Array(stack));
        ctx.set_var("STAXCurrentBlock", Value::from(full_name.clone()));

        debug!(job = ctx.job_id(), thread, block = %full_name, "entering block");
        self.full_name = Some(full_name);
        self.state = BlockState::ActionCalled;
        ctx.push_action(self.body.clone_action());
    }

    fn exit(&mut self, ctx: &mut ThreadContext<'_>, rc: i64) {
        if let Some(terminate) = self.terminate.take() {
            ctx.remove_condition(terminate);
        }
        if let Some(name) = self.full_name.take() {
            let mut stack = match ctx.get_var("STAXBlockStack") {
                Some(Value::Array(stack)) => stack,
                _ => Vec::new(),
            };
            if stack.last().and_then(Value::as_str) == Some(name.as_str()) {
                stack.pop();
            }
            let current = stack.last().cloned().unwrap_or(Value::Null);
            ctx.set_var("STAXBlockStack", Value::Array(stack));
            ctx.set_var("STAXCurrentBlock", current);
            ctx.job().exit_block(&name);
        }
        ctx.set_var("STAXBlockRC", Value::from(rc));
        self.state = BlockState::Complete;
        ctx.pop_action();
    }
}

impl Action for BlockAction {
    fn location(&self) -> &SourceLocation {
        &self.location
    }

    fn info(&self) -> String {
        self.full_name
            .clone()
            .unwrap_or_else(|| self.name.to_string())
    }

    fn execute(&mut self, ctx: &mut ThreadContext<'_>) {
        match self.state {
            BlockState::Init => self.enter(ctx),
            BlockState::ActionCalled => self.exit(ctx, BLOCK_RC_NORMAL),
            BlockState::Complete => ctx.pop_action(),
        }
    }

    fn handle_condition(&mut self, ctx: &mut ThreadContext<'_>, condition: &Condition) {
        let rc = match condition.kind() {
            ConditionKind::TerminateBlock { .. } => BLOCK_RC_TERMINATED,
            _ => BLOCK_RC_NORMAL,
        };
        self.exit(ctx, rc);
    }

    fn clone_action(&self) -> Box<dyn Action> {
        Box::new(Self::new(
            Arc::clone(&self.location),
            self.name.clone(),
            Arc::clone(&self.body),
        ))
    }
}
