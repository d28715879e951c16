// src/actions/loops.rs

use std::sync::Arc;

use crate::engine::{Condition, ConditionKind, ThreadContext};
use crate::expr::Value;

use super::{Action, SourceLocation};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopState {
    Init,
    TopOfLoop,
    BottomOfLoop,
    Complete,
}

/// Counted and/or conditional loop.
///
/// `from`, `to` and `by` are evaluated once on entry; the sign of `by`
/// decides whether `to` is an upper or a lower bound. `while` is tested at
/// the top of every iteration and `until` at the bottom. Without `to`,
/// `while` or `until` the loop only ends through `break` or a condition.
#[derive(Debug, Clone)]
pub struct LoopAction {
    location: Arc<SourceLocation>,
    var: Option<String>,
    from: String,
    to: Option<String>,
    by: String,
    while_expr: Option<String>,
    until_expr: Option<String>,
    body: Arc<dyn Action>,
    state: LoopState,
    index: i64,
    to_value: Option<i64>,
    by_value: i64,
}

#[derive(Debug, Clone, Default)]
pub struct LoopSpec {
    pub var: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub by: Option<String>,
    pub while_expr: Option<String>,
    pub until_expr: Option<String>,
}

impl LoopAction {
    pub fn new(location: Arc<SourceLocation>, spec: LoopSpec, body: Arc<dyn Action>) -> Self {
        Self {
            location,
            var: spec.var,
            from: spec.from.unwrap_or_else(|| "1".to_string()),
            to: spec.to,
            by: spec.by.unwrap_or_else(|| "1".to_string()),
            while_expr: spec.while_expr,
            until_expr: spec.until_expr,
            body,
            state: LoopState::Init,
            index: 0,
            to_value: None,
            by_value: 1,
        }
    }

    fn in_range(&self) -> bool {
        match self.to_value {
            Some(to) if self.by_value < 0 => self.index >= to,
            Some(to) => self.index <= to,
            None => true,
        }
    }
}

impl Action for LoopAction {
    fn location(&self) -> &SourceLocation {
        &self.location
    }

    fn info(&self) -> String {
        let mut info = format!("{}", self.index);
        if let Some(to) = self.to_value {
            info.push_str(&format!(" to {to}"));
        }
        if self.by_value != 1 {
            info.push_str(&format!(" by {}", self.by_value));
        }
        info
    }

    fn details(&self) -> String {
        format!("state={:?} index={}", self.state, self.index)
    }

    fn execute(&mut self, ctx: &mut ThreadContext<'_>) {
        match self.state {
            LoopState::Init => {
                let Some(from) = ctx.eval_int_or_raise(&self.location, "from", &self.from) else {
                    return;
                };
                if let Some(to) = &self.to {
                    let Some(to) = ctx.eval_int_or_raise(&self.location, "to", to) else {
                        return;
                    };
                    self.to_value = Some(to);
                }
                let Some(by) = ctx.eval_int_or_raise(&self.location, "by", &self.by) else {
                    return;
                };
                self.index = from;
                self.by_value = by;
                self.state = LoopState::TopOfLoop;
            }
            LoopState::TopOfLoop => {
                if let Some(var) = &self.var {
                    ctx.set_var(var, Value::from(self.index));
                }

                let mut keep_going = self.in_range();
                if keep_going {
                    if let Some(expr) = &self.while_expr {
                        let Some(value) = ctx.eval_bool_or_raise(&self.location, "while", expr)
                        else {
                            return;
                        };
                        keep_going = value;
                    }
                }

                if keep_going {
                    self.state = LoopState::BottomOfLoop;
                    ctx.push_action(self.body.clone_action());
                } else {
                    self.state = LoopState::Complete;
                    ctx.pop_action();
                }
            }
            LoopState::BottomOfLoop => {
                if let Some(expr) = &self.until_expr {
                    let Some(done) = ctx.eval_bool_or_raise(&self.location, "until", expr) else {
                        return;
                    };
                    if done {
                        self.state = LoopState::Complete;
                        ctx.pop_action();
                        return;
                    }
                }
                // An index that would leave the i64 range is past any bound.
                match self.index.checked_add(self.by_value) {
                    Some(next) => {
                        self.index = next;
                        self.state = LoopState::TopOfLoop;
                    }
                    None => {
                        self.state = LoopState::Complete;
                        ctx.pop_action();
                    }
                }
            }
            LoopState::Complete => ctx.pop_action(),
        }
    }

    fn handle_condition(&mut self, ctx: &mut ThreadContext<'_>, condition: &Condition) {
        if !matches!(condition.kind(), ConditionKind::Continue) {
            self.state = LoopState::Complete;
            ctx.pop_action();
        }
        // Break and continue never outlive the loop that handles them.
        ctx.retain_conditions(|c| !matches!(c.kind(), ConditionKind::Break | ConditionKind::Continue));
    }

    fn clone_action(&self) -> Box<dyn Action> {
        Box::new(Self {
            state: LoopState::Init,
            index: 0,
            to_value: None,
            by_value: 1,
            ..self.clone()
        })
    }
}
