// src/actions/process.rs

//! `stafcmd`: one request to a remote (or local) service.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::engine::signals::COMMAND_START_ERROR;
use crate::engine::{
    Condition, ConditionId, ConditionKind, RemoteRequest, RequestId, RequestOutcome, ThreadContext,
};
use crate::events::{EventKind, LifecycleEvent};
use crate::expr::Value;

use super::{Action, SourceLocation};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CmdState {
    Init,
    Waiting { request: RequestId, hold: ConditionId },
    Complete,
}

/// Submits `(location, service, request)` and waits for the reply. On
/// completion `RC` and `STAFResult` are set, plus `var` when given.
#[derive(Debug, Clone)]
pub struct StafCmdAction {
    location: Arc<SourceLocation>,
    name: Option<String>,
    machine: String,
    service: String,
    request: String,
    var: Option<String>,
    state: CmdState,
}

impl StafCmdAction {
    pub fn new(
        location: Arc<SourceLocation>,
        name: Option<String>,
        machine: String,
        service: String,
        request: String,
        var: Option<String>,
    ) -> Self {
        Self {
            location,
            name,
            machine,
            service,
            request,
            var,
            state: CmdState::Init,
        }
    }
}

impl Action for StafCmdAction {
    fn location(&self) -> &SourceLocation {
        &self.location
    }

    fn info(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| format!("{} {}", self.service, self.request))
    }

    fn details(&self) -> String {
        format!("{:?}", self.state)
    }

    fn execute(&mut self, ctx: &mut ThreadContext<'_>) {
        match self.state {
            CmdState::Init => {
                let Some(location) = ctx.eval_string_or_raise(&self.location, "location", &self.machine) else {
                    return;
                };
                let Some(service) = ctx.eval_string_or_raise(&self.location, "service", &self.service) else {
                    return;
                };
                let Some(request) = ctx.eval_string_or_raise(&self.location, "request", &self.request) else {
                    return;
                };

                let remote = RemoteRequest {
                    location: location.clone(),
                    service: service.clone(),
                    request: request.clone(),
                };
                let id = ctx.submit_request(remote);
                let hold = ctx.new_condition(ConditionKind::Hold, "StafCmd");
                let hold_id = hold.id();
                ctx.add_condition(hold);
                self.state = CmdState::Waiting {
                    request: id,
                    hold: hold_id,
                };

                debug!(job = ctx.job_id(), thread = ctx.thread_id(), request = id, %location, %service, "command submitted");
                ctx.publish(
                    LifecycleEvent::new(ctx.job_id(), EventKind::Command, self.info(), "start")
                        .with("location", location)
                        .with("service", service)
                        .with("request", request),
                );
            }
            CmdState::Waiting { .. } => {}
            CmdState::Complete => ctx.pop_action(),
        }
    }

    fn handle_condition(&mut self, ctx: &mut ThreadContext<'_>, _condition: &Condition) {
        if let CmdState::Waiting { request, hold } = self.state {
            debug!(job = ctx.job_id(), thread = ctx.thread_id(), request, "cancelling command");
            ctx.cancel_request(request);
            ctx.remove_condition(hold);
        }
        self.state = CmdState::Complete;
        ctx.pop_action();
    }

    fn clone_action(&self) -> Box<dyn Action> {
        Box::new(Self::new(
            Arc::clone(&self.location),
            self.name.clone(),
            self.machine.clone(),
            self.service.clone(),
            self.request.clone(),
            self.var.clone(),
        ))
    }

    fn request_complete(&mut self, ctx: &mut ThreadContext<'_>, id: RequestId, outcome: RequestOutcome) {
        let CmdState::Waiting { request, hold } = self.state else {
            return;
        };
        if request != id {
            return;
        }
        ctx.remove_condition(hold);
        self.state = CmdState::Complete;

        match outcome {
            RequestOutcome::Completed { rc, result } => {
                debug!(job = ctx.job_id(), thread = ctx.thread_id(), request = id, rc, "command complete");
                ctx.set_var("RC", Value::from(rc));
                ctx.set_var("STAFResult", Value::from(result.clone()));
                if let Some(var) = &self.var {
                    ctx.set_var(var, Value::from(result));
                }
                ctx.publish(
                    LifecycleEvent::new(ctx.job_id(), EventKind::Command, self.info(), "stop")
                        .with("rc", rc.to_string()),
                );
            }
            RequestOutcome::StartFailed(reason) => {
                warn!(job = ctx.job_id(), thread = ctx.thread_id(), request = id, %reason, "command failed to start");
                ctx.pop_action();
                let message = self.location.error_message(None, &reason);
                ctx.raise_signal_with_message(COMMAND_START_ERROR, &message);
            }
        }
        ctx.schedule();
    }
}
