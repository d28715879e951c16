// src/actions/timer.rs

use std::sync::{Arc, LazyLock};
use std::time::Duration;

use regex::Regex;
use tracing::debug;

use crate::engine::signals::INVALID_TIMER_VALUE;
use crate::engine::{Condition, ConditionId, ConditionKind, ThreadContext, TimedEventId};
use crate::expr::Value;

use super::{Action, SourceLocation};

static DURATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d+)([smhdwy]?)$").expect("duration regex is valid")
});

/// Parse `<n>[s|m|h|d|w|y]`; a plain number is milliseconds.
pub fn parse_duration(text: &str) -> Result<Duration, String> {
    let text = text.trim().to_ascii_lowercase();
    let captures = DURATION.captures(&text).ok_or_else(|| {
        format!("'{text}' is not a duration; expected <number>[s|m|h|d|w|y]")
    })?;
    let amount: u64 = captures[1]
        .parse()
        .map_err(|_| format!("'{text}' is out of range"))?;
    let unit_ms: u64 = match &captures[2] {
        "" => 1,
        "s" => 1_000,
        "m" => 60_000,
        "h" => 3_600_000,
        "d" => 86_400_000,
        "w" => 604_800_000,
        _ => 31_536_000_000,
    };
    amount
        .checked_mul(unit_ms)
        .map(Duration::from_millis)
        .ok_or_else(|| format!("'{text}' is out of range"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimerState {
    Init,
    Running,
    Complete,
}

/// Runs its body against a deadline. Sets `RC` to 0 when the body
/// finishes first, 1 when the deadline does, and -1 for an invalid
/// duration.
#[derive(Debug, Clone)]
pub struct TimerAction {
    location: Arc<SourceLocation>,
    duration: String,
    body: Arc<dyn Action>,
    state: TimerState,
    timer: Option<TimedEventId>,
    expired: Option<ConditionId>,
}

impl TimerAction {
    pub fn new(location: Arc<SourceLocation>, duration: String, body: Arc<dyn Action>) -> Self {
        Self {
            location,
            duration,
            body,
            state: TimerState::Init,
            timer: None,
            expired: None,
        }
    }

    fn finish(&mut self, ctx: &mut ThreadContext<'_>, rc: i64) {
        if let Some(timer) = self.timer.take() {
            ctx.cancel_timer(timer);
        }
        if let Some(expired) = self.expired.take() {
            ctx.remove_condition(expired);
        }
        ctx.set_var("RC", Value::from(rc));
        self.state = TimerState::Complete;
        ctx.pop_action();
    }
}

impl Action for TimerAction {
    fn location(&self) -> &SourceLocation {
        &self.location
    }

    fn info(&self) -> String {
        self.duration.clone()
    }

    fn execute(&mut self, ctx: &mut ThreadContext<'_>) {
        match self.state {
            TimerState::Init => {
                let text = match ctx.eval_string(&self.duration) {
                    Ok(text) => text,
                    Err(error) => {
                        ctx.set_var("RC", Value::from(-1));
                        ctx.evaluation_failed(&self.location, Some("duration"), &error);
                        return;
                    }
                };
                match parse_duration(&text) {
                    Ok(after) => {
                        self.timer = Some(ctx.schedule_timer(after));
                        self.state = TimerState::Running;
                        ctx.push_action(self.body.clone_action());
                    }
                    Err(message) => {
                        ctx.set_var("RC", Value::from(-1));
                        self.state = TimerState::Complete;
                        ctx.pop_action();
                        let message = self.location.error_message(Some("duration"), &message);
                        ctx.raise_signal_with_message(INVALID_TIMER_VALUE, &message);
                    }
                }
            }
            TimerState::Running => self.finish(ctx, 0),
            TimerState::Complete => ctx.pop_action(),
        }
    }

    fn handle_condition(&mut self, ctx: &mut ThreadContext<'_>, condition: &Condition) {
        let ours = self.expired == Some(condition.id());
        if ours {
            self.finish(ctx, 1);
        } else {
            if let Some(timer) = self.timer.take() {
                ctx.cancel_timer(timer);
            }
            self.state = TimerState::Complete;
            ctx.pop_action();
        }
    }

    fn timed_event(&mut self, ctx: &mut ThreadContext<'_>, id: TimedEventId) {
        if self.state != TimerState::Running || self.timer != Some(id) {
            return;
        }
        self.timer = None;
        debug!(job = ctx.job_id(), thread = ctx.thread_id(), duration = %self.duration, "timer expired");
        let condition = ctx.new_condition(ConditionKind::TimerExpired { timer: id }, &self.location.to_string());
        self.expired = Some(condition.id());
        ctx.add_condition(condition);
        ctx.schedule();
    }

    fn clone_action(&self) -> Box<dyn Action> {
        Box::new(Self::new(
            Arc::clone(&self.location),
            self.duration.clone(),
            Arc::clone(&self.body),
        ))
    }
}
