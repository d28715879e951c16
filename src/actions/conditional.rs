// src/actions/conditional.rs

use std::sync::Arc;

use crate::engine::ThreadContext;

use super::{Action, SourceLocation};

/// One `if` / `elseif` test and the action it guards.
#[derive(Debug, Clone)]
pub struct Branch {
    pub expr: String,
    pub action: Arc<dyn Action>,
}

/// `if` with optional `elseif` and `else` branches. At most one branch runs.
#[derive(Debug, Clone)]
pub struct IfAction {
    location: Arc<SourceLocation>,
    branches: Arc<Vec<Branch>>,
    otherwise: Option<Arc<dyn Action>>,
    taken: bool,
}

impl IfAction {
    pub fn new(
        location: Arc<SourceLocation>,
        branches: Vec<Branch>,
        otherwise: Option<Arc<dyn Action>>,
    ) -> Self {
        Self {
            location,
            branches: Arc::new(branches),
            otherwise,
            taken: false,
        }
    }
}

impl Action for IfAction {
    fn location(&self) -> &SourceLocation {
        &self.location
    }

    fn info(&self) -> String {
        self.branches
            .first()
            .map(|b| b.expr.clone())
            .unwrap_or_default()
    }

    fn execute(&mut self, ctx: &mut ThreadContext<'_>) {
        if self.taken {
            ctx.pop_action();
            return;
        }
        self.taken = true;

        for branch in self.branches.iter() {
            let Some(matched) = ctx.eval_bool_or_raise(&self.location, "expr", &branch.expr) else {
                return;
            };
            if matched {
                ctx.push_action(branch.action.clone_action());
                return;
            }
        }

        match &self.otherwise {
            Some(action) => ctx.push_action(action.clone_action()),
            None => ctx.pop_action(),
        }
    }

    fn clone_action(&self) -> Box<dyn Action> {
        Box::new(Self {
            taken: false,
            ..self.clone()
        })
    }
}
