// src/actions/testcase.rs

//! `testcase` and `tcstatus`.
//!
//! Testcase names nest: a testcase entered inside another gets the dotted
//! name `outer.inner`, tracked through `STAXCurrentTestcase`.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info};

use crate::engine::signals::{INVALID_TC_STATUS_RESULT, INVALID_TESTCASE_MODE, TESTCASE_MISSING};
use crate::engine::{Condition, ThreadContext};
use crate::events::{EventKind, LifecycleEvent};
use crate::expr::Value;
use crate::types::{TcStatusResult, TestcaseMode};

use super::{Action, NameSpec, SourceLocation};

const CURRENT_TESTCASE: &str = "STAXCurrentTestcase";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TestcaseState {
    Init,
    BodyRunning,
    Complete,
}

#[derive(Debug, Clone)]
pub struct TestcaseAction {
    location: Arc<SourceLocation>,
    name: NameSpec,
    mode: Option<String>,
    body: Arc<dyn Action>,
    state: TestcaseState,
    full_name: String,
    previous: Option<Value>,
    started: Option<Instant>,
}

impl TestcaseAction {
    pub fn new(
        location: Arc<SourceLocation>,
        name: NameSpec,
        mode: Option<String>,
        body: Arc<dyn Action>,
    ) -> Self {
        Self {
            location,
            name,
            mode,
            body,
            state: TestcaseState::Init,
            full_name: String::new(),
            previous: None,
            started: None,
        }
    }

    fn finish(&mut self, ctx: &mut ThreadContext<'_>) {
        let elapsed = self.started.take().map(|s| s.elapsed()).unwrap_or_default();
        ctx.job().testcases.stop(&self.full_name, elapsed);
        ctx.set_var(CURRENT_TESTCASE, self.previous.take().unwrap_or(Value::Null));

        debug!(
            job = ctx.job_id(),
            testcase = %self.full_name,
            elapsed_ms = elapsed.as_millis() as u64,
            "testcase stopped"
        );
        if ctx.settings().log_tc_start_stop {
            let event = LifecycleEvent::new(ctx.job_id(), EventKind::Testcase, self.full_name.clone(), "stop")
                .with("elapsed_ms", elapsed.as_millis().to_string());
            ctx.publish(event);
        }
        self.state = TestcaseState::Complete;
        ctx.pop_action();
    }
}

impl Action for TestcaseAction {
    fn location(&self) -> &SourceLocation {
        &self.location
    }

    fn info(&self) -> String {
        if self.full_name.is_empty() {
            self.name.to_string()
        } else {
            self.full_name.clone()
        }
    }

    fn execute(&mut self, ctx: &mut ThreadContext<'_>) {
        match self.state {
            TestcaseState::Init => {
                let Some(name) = self.name.resolve(ctx, &self.location, "name") else {
                    return;
                };
                let mode = match &self.mode {
                    Some(expr) => {
                        let Some(mode) = ctx.eval_string_or_raise(&self.location, "mode", expr) else {
                            return;
                        };
                        match mode.parse::<TestcaseMode>() {
                            Ok(mode) => mode,
                            Err(message) => {
                                ctx.pop_action();
                                let message = self.location.error_message(Some("mode"), &message);
                                ctx.raise_signal_with_message(INVALID_TESTCASE_MODE, &message);
                                return;
                            }
                        }
                    }
                    None => TestcaseMode::Default,
                };

                let previous = ctx.get_var(CURRENT_TESTCASE).unwrap_or(Value::Null);
                self.full_name = match &previous {
                    Value::String(parent) if !parent.is_empty() => format!("{parent}.{name}"),
                    _ => name,
                };
                self.previous = Some(previous);
                ctx.set_var(CURRENT_TESTCASE, Value::from(self.full_name.clone()));

                let mode = ctx.job().testcases.start(&self.full_name, mode).mode;
                self.started = Some(Instant::now());
                debug!(job = ctx.job_id(), testcase = %self.full_name, ?mode, "testcase started");
                if ctx.settings().log_tc_start_stop {
                    let event = LifecycleEvent::new(
                        ctx.job_id(),
                        EventKind::Testcase,
                        self.full_name.clone(),
                        "start",
                    )
                    .with("mode", format!("{mode:?}").to_lowercase());
                    ctx.publish(event);
                }

                self.state = TestcaseState::BodyRunning;
                ctx.push_action(self.body.clone_action());
            }
            TestcaseState::BodyRunning => self.finish(ctx),
            TestcaseState::Complete => ctx.pop_action(),
        }
    }

    fn handle_condition(&mut self, ctx: &mut ThreadContext<'_>, _condition: &Condition) {
        if self.state == TestcaseState::BodyRunning {
            self.finish(ctx);
        } else {
            ctx.pop_action();
        }
    }

    fn clone_action(&self) -> Box<dyn Action> {
        Box::new(Self::new(
            Arc::clone(&self.location),
            self.name.clone(),
            self.mode.clone(),
            Arc::clone(&self.body),
        ))
    }
}

/// `tcstatus`: records pass, fail or info on the current testcase.
#[derive(Debug, Clone)]
pub struct TcStatusAction {
    location: Arc<SourceLocation>,
    result: String,
    message: Option<String>,
}

impl TcStatusAction {
    pub fn new(location: Arc<SourceLocation>, result: String, message: Option<String>) -> Self {
        Self {
            location,
            result,
            message,
        }
    }
}

impl Action for TcStatusAction {
    fn location(&self) -> &SourceLocation {
        &self.location
    }

    fn info(&self) -> String {
        self.result.clone()
    }

    fn execute(&mut self, ctx: &mut ThreadContext<'_>) {
        let Some(result) = ctx.eval_string_or_raise(&self.location, "result", &self.result) else {
            return;
        };
        let message = match &self.message {
            Some(expr) => match ctx.eval_string_or_raise(&self.location, "message", expr) {
                Some(message) => message,
                None => return,
            },
            None => String::new(),
        };
        ctx.pop_action();

        let result = match result.parse::<TcStatusResult>() {
            Ok(result) => result,
            Err(message) => {
                let message = self.location.error_message(Some("result"), &message);
                ctx.raise_signal_with_message(INVALID_TC_STATUS_RESULT, &message);
                return;
            }
        };

        let Some(testcase) = ctx.get_string_var(CURRENT_TESTCASE).filter(|t| !t.is_empty()) else {
            let message = self
                .location
                .error_message(None, "tcstatus used outside of any testcase");
            ctx.raise_signal_with_message(TESTCASE_MISSING, &message);
            return;
        };

        if !ctx.job().testcases.record(&testcase, result, &message) {
            let message = self
                .location
                .error_message(None, &format!("testcase \"{testcase}\" does not exist"));
            ctx.raise_signal_with_message(TESTCASE_MISSING, &message);
            return;
        }

        info!(job = ctx.job_id(), testcase = %testcase, %result, "{message}");
        let event = LifecycleEvent::new(ctx.job_id(), EventKind::TestcaseStatus, testcase, result.to_string())
            .with("message", message);
        ctx.publish(event);
    }

    fn clone_action(&self) -> Box<dyn Action> {
        Box::new(self.clone())
    }
}
