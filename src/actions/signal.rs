// src/actions/signal.rs

//! Signal actions: `signalhandler`, `raise`, the internal signal-execution
//! wrapper and the job's default handlers.

use std::sync::Arc;

use tracing::{debug, error};

use crate::engine::signals;
use crate::engine::{Condition, MAIN_BLOCK, ThreadContext};
use crate::events::{EventKind, LifecycleEvent};

use super::{Action, NameSpec, SourceLocation};

/// What a default handler does after logging the signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalPolicy {
    Continue,
    Terminate,
}

/// Body of a built-in handler.
#[derive(Debug, Clone)]
pub struct SignalDefaultAction {
    location: Arc<SourceLocation>,
    signal: String,
    policy: SignalPolicy,
    log_message: bool,
}

impl SignalDefaultAction {
    pub fn new(signal: &str, policy: SignalPolicy, log_message: bool) -> Self {
        Self {
            location: Arc::new(SourceLocation {
                element: "signalhandler".to_string(),
                ..SourceLocation::default()
            }),
            signal: signal.to_string(),
            policy,
            log_message,
        }
    }

    pub fn policy(&self) -> SignalPolicy {
        self.policy
    }
}

impl Action for SignalDefaultAction {
    fn location(&self) -> &SourceLocation {
        &self.location
    }

    fn info(&self) -> String {
        self.signal.clone()
    }

    fn execute(&mut self, ctx: &mut ThreadContext<'_>) {
        ctx.pop_action();

        if self.log_message {
            let message = ctx
                .get_string_var(&signals::message_var(&self.signal))
                .unwrap_or_default();
            error!(
                job = ctx.job_id(),
                thread = ctx.thread_id(),
                signal = %self.signal,
                "{message}"
            );
            let event = LifecycleEvent::new(ctx.job_id(), EventKind::Log, self.signal.clone(), "error")
                .with("text", format!("{} signal raised. {message}", self.signal));
            ctx.publish(event);
        }

        if self.policy == SignalPolicy::Terminate {
            let reason = format!("{} signal raised; terminating block \"{MAIN_BLOCK}\"", self.signal);
            debug!(job = ctx.job_id(), signal = %self.signal, "default handler terminating job");
            ctx.job().terminate_job(Some(reason));
        }
    }

    fn clone_action(&self) -> Box<dyn Action> {
        Box::new(self.clone())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExecutionState {
    Init,
    HandlerRunning,
}

/// Runs a handler body on the thread that raised the signal and clears the
/// signal from the thread's signal stack once the body is done.
#[derive(Debug, Clone)]
pub struct SignalExecutionAction {
    location: Arc<SourceLocation>,
    signal: String,
    handler: Arc<dyn Action>,
    state: ExecutionState,
}

impl SignalExecutionAction {
    pub fn new(signal: &str, handler: Arc<dyn Action>) -> Self {
        Self {
            location: Arc::new(SourceLocation {
                element: "signal".to_string(),
                ..SourceLocation::default()
            }),
            signal: signal.to_string(),
            handler,
            state: ExecutionState::Init,
        }
    }
}

impl Action for SignalExecutionAction {
    fn location(&self) -> &SourceLocation {
        &self.location
    }

    fn info(&self) -> String {
        self.signal.clone()
    }

    fn execute(&mut self, ctx: &mut ThreadContext<'_>) {
        match self.state {
            ExecutionState::Init => {
                self.state = ExecutionState::HandlerRunning;
                ctx.push_action(self.handler.clone_action());
            }
            ExecutionState::HandlerRunning => {
                ctx.signal_handled(&self.signal);
                ctx.pop_action();
            }
        }
    }

    fn handle_condition(&mut self, ctx: &mut ThreadContext<'_>, _condition: &Condition) {
        ctx.signal_handled(&self.signal);
        ctx.pop_action();
    }

    fn clone_action(&self) -> Box<dyn Action> {
        Box::new(Self::new(&self.signal, Arc::clone(&self.handler)))
    }
}

/// `signalhandler`: installs a handler on the current thread.
#[derive(Debug, Clone)]
pub struct SignalHandlerAction {
    location: Arc<SourceLocation>,
    signal: NameSpec,
    handler: Arc<dyn Action>,
}

impl SignalHandlerAction {
    pub fn new(location: Arc<SourceLocation>, signal: NameSpec, handler: Arc<dyn Action>) -> Self {
        Self {
            location,
            signal,
            handler,
        }
    }
}

impl Action for SignalHandlerAction {
    fn location(&self) -> &SourceLocation {
        &self.location
    }

    fn info(&self) -> String {
        self.signal.to_string()
    }

    fn execute(&mut self, ctx: &mut ThreadContext<'_>) {
        let Some(signal) = self.signal.resolve(ctx, &self.location, "signal") else {
            return;
        };
        ctx.pop_action();
        debug!(job = ctx.job_id(), thread = ctx.thread_id(), signal = %signal, "signal handler registered");
        ctx.register_signal_handler(&signal, Arc::clone(&self.handler));
    }

    fn clone_action(&self) -> Box<dyn Action> {
        Box::new(self.clone())
    }
}

/// `raise`: raises a named signal.
#[derive(Debug, Clone)]
pub struct RaiseAction {
    location: Arc<SourceLocation>,
    signal: NameSpec,
}

impl RaiseAction {
    pub fn new(location: Arc<SourceLocation>, signal: NameSpec) -> Self {
        Self { location, signal }
    }
}

impl Action for RaiseAction {
    fn location(&self) -> &SourceLocation {
        &self.location
    }

    fn info(&self) -> String {
        self.signal.to_string()
    }

    fn execute(&mut self, ctx: &mut ThreadContext<'_>) {
        let Some(signal) = self.signal.resolve(ctx, &self.location, "signal") else {
            return;
        };
        ctx.pop_action();
        ctx.raise_signal(&signal);
    }

    fn clone_action(&self) -> Box<dyn Action> {
        Box::new(self.clone())
    }
}
