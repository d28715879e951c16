// src/actions/block_control.rs

//! `hold`, `release` and `terminate` elements.

use std::sync::Arc;

use tracing::debug;

use crate::engine::signals::{BLOCK_DOES_NOT_EXIST, INVALID_TIMER_VALUE};
use crate::engine::{ControlError, ThreadContext};

use super::timer::parse_duration;
use super::{Action, SourceLocation};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockOp {
    Hold,
    Release,
    Terminate,
}

/// Script-issued block operation. The block defaults to the innermost
/// block of the current thread. Holding a held block or releasing a running
/// one is silently ignored.
#[derive(Debug, Clone)]
pub struct BlockControlAction {
    location: Arc<SourceLocation>,
    op: BlockOp,
    block: Option<String>,
    condition: Option<String>,
    timeout: Option<String>,
}

impl BlockControlAction {
    pub fn new(
        location: Arc<SourceLocation>,
        op: BlockOp,
        block: Option<String>,
        condition: Option<String>,
        timeout: Option<String>,
    ) -> Self {
        Self {
            location,
            op,
            block,
            condition,
            timeout,
        }
    }
}

impl Action for BlockControlAction {
    fn location(&self) -> &SourceLocation {
        &self.location
    }

    fn info(&self) -> String {
        self.block.clone().unwrap_or_default()
    }

    fn execute(&mut self, ctx: &mut ThreadContext<'_>) {
        if let Some(expr) = &self.condition {
            match ctx.eval_bool_or_raise(&self.location, "if", expr) {
                Some(true) => {}
                Some(false) => {
                    ctx.pop_action();
                    return;
                }
                None => return,
            }
        }

        let name = match &self.block {
            Some(expr) => match ctx.eval_string_or_raise(&self.location, "block", expr) {
                Some(name) => name,
                None => return,
            },
            None => ctx.get_string_var("STAXCurrentBlock").unwrap_or_default(),
        };

        let timeout_ms = match (&self.timeout, self.op) {
            (Some(expr), BlockOp::Hold) => {
                let Some(text) = ctx.eval_string_or_raise(&self.location, "timeout", expr) else {
                    return;
                };
                match parse_duration(&text) {
                    Ok(timeout) => u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                    Err(message) => {
                        ctx.pop_action();
                        let message = self.location.error_message(
                            Some("timeout"),
                            &format!("Invalid timeout value: {text}\n\n{message}"),
                        );
                        ctx.raise_signal_with_message(INVALID_TIMER_VALUE, &message);
                        return;
                    }
                }
            }
            _ => 0,
        };

        ctx.pop_action();
        let result = match self.op {
            BlockOp::Hold => ctx.job().hold_block(&name, timeout_ms),
            BlockOp::Release => ctx.job().release_block(&name),
            BlockOp::Terminate => ctx.job().terminate_block(&name, None),
        };

        match result {
            Ok(()) => {}
            Err(ControlError::BlockNotFound(_)) => {
                let message = self
                    .location
                    .error_message(Some("block"), &format!("Block '{name}' does not exist."));
                ctx.raise_signal_with_message(BLOCK_DOES_NOT_EXIST, &message);
            }
            Err(err) => {
                debug!(job = ctx.job_id(), block = %name, op = ?self.op, %err, "block operation ignored");
            }
        }
    }

    fn clone_action(&self) -> Box<dyn Action> {
        Box::new(self.clone())
    }
}
