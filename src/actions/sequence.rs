// src/actions/sequence.rs

use std::sync::Arc;

use crate::engine::ThreadContext;

use super::{Action, SourceLocation};

/// Runs its steps one after another on the current thread.
#[derive(Debug, Clone)]
pub struct SequenceAction {
    location: Arc<SourceLocation>,
    steps: Arc<Vec<Arc<dyn Action>>>,
    next: usize,
}

impl SequenceAction {
    pub fn new(location: Arc<SourceLocation>, steps: Vec<Arc<dyn Action>>) -> Self {
        Self {
            location,
            steps: Arc::new(steps),
            next: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

impl Action for SequenceAction {
    fn location(&self) -> &SourceLocation {
        &self.location
    }

    fn details(&self) -> String {
        format!("next={} of {}", self.next, self.steps.len())
    }

    fn execute(&mut self, ctx: &mut ThreadContext<'_>) {
        match self.steps.get(self.next) {
            Some(step) => {
                self.next += 1;
                ctx.push_action(step.clone_action());
            }
            None => ctx.pop_action(),
        }
    }

    fn clone_action(&self) -> Box<dyn Action> {
        Box::new(Self {
            location: Arc::clone(&self.location),
            steps: Arc::clone(&self.steps),
            next: 0,
        })
    }
}
