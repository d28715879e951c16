// src/actions/subjob.rs

//! `job`: runs another job document as a sub-job.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, info};

use crate::engine::signals::SUB_JOB_START_ERROR;
use crate::engine::{
    Condition, ConditionId, ConditionKind, JobId, JobStatus, RequestId, SubJobOutcome,
    SubJobRequest, ThreadContext,
};
use crate::expr::Value;

use super::{Action, SourceLocation};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SubJobState {
    Init,
    Starting { request: RequestId, hold: ConditionId },
    Running { request: RequestId, hold: ConditionId },
    Complete,
}

/// Unevaluated attributes of a `job` element.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubJobSpec {
    pub file: String,
    pub name: Option<String>,
    pub function: Option<String>,
    pub args: Option<String>,
    /// Wait for the sub-job to finish; defaults to true.
    pub wait: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SubJobAction {
    location: Arc<SourceLocation>,
    spec: SubJobSpec,
    wait: bool,
    state: SubJobState,
}

impl SubJobAction {
    pub fn new(location: Arc<SourceLocation>, spec: SubJobSpec) -> Self {
        Self {
            location,
            spec,
            wait: true,
            state: SubJobState::Init,
        }
    }

    /// `None` when evaluation failed and the signal was raised.
    fn eval_optional(
        &self,
        ctx: &mut ThreadContext<'_>,
        attribute: &str,
        expr: Option<&str>,
    ) -> Option<Option<String>> {
        match expr {
            Some(expr) => ctx
                .eval_string_or_raise(&self.location, attribute, expr)
                .map(Some),
            None => Some(None),
        }
    }
}

fn status_name(status: &JobStatus) -> &'static str {
    match status {
        JobStatus::Normal => "Normal",
        JobStatus::Abnormal { .. } => "Abnormal",
        JobStatus::Terminated { .. } => "Terminated",
    }
}

impl Action for SubJobAction {
    fn location(&self) -> &SourceLocation {
        &self.location
    }

    fn info(&self) -> String {
        self.spec.file.clone()
    }

    fn details(&self) -> String {
        format!("{:?}", self.state)
    }

    fn execute(&mut self, ctx: &mut ThreadContext<'_>) {
        match self.state {
            SubJobState::Init => {
                let Some(file) = ctx.eval_string_or_raise(&self.location, "file", &self.spec.file) else {
                    return;
                };
                let Some(name) = self.eval_optional(ctx, "name", self.spec.name.as_deref()) else {
                    return;
                };
                let Some(function) =
                    self.eval_optional(ctx, "function", self.spec.function.as_deref())
                else {
                    return;
                };
                if let Some(wait) = self.spec.wait.clone() {
                    match ctx.eval_bool_or_raise(&self.location, "wait", &wait) {
                        Some(wait) => self.wait = wait,
                        None => return,
                    }
                }

                let request = SubJobRequest {
                    file: PathBuf::from(&file),
                    name,
                    function,
                    args: self.spec.args.clone(),
                };
                let id = ctx.start_sub_job(request);
                let hold = ctx.new_condition(ConditionKind::Hold, "SubJob");
                let hold_id = hold.id();
                ctx.add_condition(hold);
                self.state = SubJobState::Starting {
                    request: id,
                    hold: hold_id,
                };
                debug!(job = ctx.job_id(), thread = ctx.thread_id(), request = id, file = %file, wait = self.wait, "sub-job requested");
            }
            SubJobState::Starting { .. } | SubJobState::Running { .. } => {}
            SubJobState::Complete => ctx.pop_action(),
        }
    }

    fn handle_condition(&mut self, ctx: &mut ThreadContext<'_>, _condition: &Condition) {
        if let SubJobState::Starting { request, hold } | SubJobState::Running { request, hold } =
            self.state
        {
            ctx.release_sub_job(request);
            ctx.remove_condition(hold);
        }
        self.state = SubJobState::Complete;
        ctx.pop_action();
    }

    fn clone_action(&self) -> Box<dyn Action> {
        Box::new(Self::new(Arc::clone(&self.location), self.spec.clone()))
    }

    fn sub_job_started(&mut self, ctx: &mut ThreadContext<'_>, id: RequestId, job: JobId) {
        let SubJobState::Starting { request, hold } = self.state else {
            return;
        };
        if request != id {
            return;
        }
        info!(job = ctx.job_id(), sub_job = job, "sub-job started");
        ctx.set_var("STAXSubJobID", Value::from(job));
        ctx.set_var("RC", Value::from(0));

        if self.wait {
            self.state = SubJobState::Running { request, hold };
        } else {
            ctx.release_sub_job(request);
            ctx.remove_condition(hold);
            self.state = SubJobState::Complete;
            ctx.schedule();
        }
    }

    fn sub_job_complete(&mut self, ctx: &mut ThreadContext<'_>, id: RequestId, outcome: SubJobOutcome) {
        let (SubJobState::Starting { request, hold } | SubJobState::Running { request, hold }) =
            self.state
        else {
            return;
        };
        if request != id {
            return;
        }
        ctx.remove_condition(hold);
        self.state = SubJobState::Complete;

        match outcome {
            SubJobOutcome::Completed(outcome) => {
                info!(job = ctx.job_id(), sub_job = outcome.job, status = %outcome.status, "sub-job complete");
                ctx.set_var("STAXSubJobID", Value::from(outcome.job));
                ctx.set_var("STAXSubJobResult", outcome.result.clone());
                ctx.set_var("STAXSubJobStatus", Value::from(status_name(&outcome.status)));
                ctx.set_var("RC", Value::from(0));
            }
            SubJobOutcome::StartFailed(reason) => {
                ctx.set_var("RC", Value::from(-1));
                ctx.pop_action();
                let message = self.location.error_message(Some("file"), &reason);
                ctx.raise_signal_with_message(SUB_JOB_START_ERROR, &message);
            }
        }
        ctx.schedule();
    }
}
