// src/actions/iterate.rs

use std::sync::Arc;

use crate::engine::signals::EMPTY_LIST;
use crate::engine::{Condition, ConditionKind, ThreadContext};
use crate::expr::Value;

use super::{Action, SourceLocation};

/// Runs its body once per list element on the current thread.
///
/// The list is evaluated once on entry. Each pass binds `var` to the
/// element and, if given, `indexvar` to its 0-based position.
#[derive(Debug, Clone)]
pub struct IterateAction {
    location: Arc<SourceLocation>,
    var: String,
    list: String,
    indexvar: Option<String>,
    body: Arc<dyn Action>,
    items: Option<Vec<Value>>,
    next: usize,
    done: bool,
}

impl IterateAction {
    pub fn new(
        location: Arc<SourceLocation>,
        var: String,
        list: String,
        indexvar: Option<String>,
        body: Arc<dyn Action>,
    ) -> Self {
        Self {
            location,
            var,
            list,
            indexvar,
            body,
            items: None,
            next: 0,
            done: false,
        }
    }
}

impl Action for IterateAction {
    fn location(&self) -> &SourceLocation {
        &self.location
    }

    fn info(&self) -> String {
        match &self.items {
            Some(items) => format!("{} ({}/{})", self.var, self.next, items.len()),
            None => self.var.clone(),
        }
    }

    fn execute(&mut self, ctx: &mut ThreadContext<'_>) {
        if self.done {
            ctx.pop_action();
            return;
        }

        if self.items.is_none() {
            let Some(items) = ctx.eval_list_or_raise(&self.location, "in", &self.list) else {
                return;
            };
            if items.is_empty() {
                self.done = true;
                ctx.pop_action();
                let message = self.location.error_message(
                    Some("in"),
                    &format!("The list to iterate over is empty: {}", self.list),
                );
                ctx.raise_signal_with_message(EMPTY_LIST, &message);
                return;
            }
            self.items = Some(items);
        }

        let item = self
            .items
            .as_ref()
            .and_then(|items| items.get(self.next))
            .cloned();
        match item {
            Some(item) => {
                ctx.set_var(&self.var, item);
                if let Some(indexvar) = &self.indexvar {
                    ctx.set_var(indexvar, Value::from(self.next));
                }
                self.next += 1;
                ctx.push_action(self.body.clone_action());
            }
            None => {
                self.done = true;
                ctx.pop_action();
            }
        }
    }

    fn handle_condition(&mut self, ctx: &mut ThreadContext<'_>, condition: &Condition) {
        if !matches!(condition.kind(), ConditionKind::Continue) {
            self.done = true;
            ctx.pop_action();
        }
        ctx.retain_conditions(|c| !matches!(c.kind(), ConditionKind::Break | ConditionKind::Continue));
    }

    fn clone_action(&self) -> Box<dyn Action> {
        Box::new(Self {
            items: None,
            next: 0,
            done: false,
            ..self.clone()
        })
    }
}
