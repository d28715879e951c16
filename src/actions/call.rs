// src/actions/call.rs

use std::sync::Arc;

use serde_json::Map;

use crate::engine::signals::FUNCTION_DOES_NOT_EXIST;
use crate::engine::ThreadContext;

use super::function::CallValue;
use super::{Action, FunctionAction, NameSpec, SourceLocation};

/// Arguments of a `call`, as unevaluated expressions.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum CallArgs {
    #[default]
    None,
    /// One expression; its value is passed as-is.
    Single(String),
    /// `call-with-list`: one expression per positional argument.
    Positional(Vec<String>),
    /// `call-with-map`: one expression per named argument.
    Named(Vec<(String, String)>),
}

/// Calls a function by (evaluated) name.
#[derive(Debug, Clone)]
pub struct CallAction {
    location: Arc<SourceLocation>,
    function: NameSpec,
    args: CallArgs,
}

impl CallAction {
    pub fn new(location: Arc<SourceLocation>, function: NameSpec, args: CallArgs) -> Self {
        Self {
            location,
            function,
            args,
        }
    }

    /// Call of the job's start function with its start arguments.
    pub fn start(location: Arc<SourceLocation>, function: &str, args: Option<String>) -> Self {
        Self::new(
            location,
            NameSpec::Literal(function.to_string()),
            args.map(CallArgs::Single).unwrap_or_default(),
        )
    }

    fn evaluate_args(&self, ctx: &mut ThreadContext<'_>) -> Option<CallValue> {
        match &self.args {
            CallArgs::None => Some(CallValue::None),
            CallArgs::Single(expr) => ctx
                .eval_object_or_raise(&self.location, "args", expr)
                .map(CallValue::Single),
            CallArgs::Positional(exprs) => {
                let mut values = Vec::with_capacity(exprs.len());
                for expr in exprs {
                    values.push(ctx.eval_object_or_raise(&self.location, "arg", expr)?);
                }
                Some(CallValue::Positional(values))
            }
            CallArgs::Named(pairs) => {
                let mut values = Map::new();
                for (name, expr) in pairs {
                    values.insert(
                        name.clone(),
                        ctx.eval_object_or_raise(&self.location, name, expr)?,
                    );
                }
                Some(CallValue::Named(values))
            }
        }
    }
}

impl Action for CallAction {
    fn location(&self) -> &SourceLocation {
        &self.location
    }

    fn info(&self) -> String {
        self.function.to_string()
    }

    fn execute(&mut self, ctx: &mut ThreadContext<'_>) {
        let Some(name) = self.function.resolve(ctx, &self.location, "function") else {
            return;
        };
        let Some(template) = ctx.function(&name) else {
            ctx.pop_action();
            let message = self
                .location
                .error_message(Some("function"), &format!("Function '{name}' does not exist"));
            ctx.raise_signal_with_message(FUNCTION_DOES_NOT_EXIST, &message);
            return;
        };
        let Some(arg) = self.evaluate_args(ctx) else {
            return;
        };

        ctx.pop_action();
        ctx.push_action(Box::new(FunctionAction::new(template, arg)));
    }

    fn clone_action(&self) -> Box<dyn Action> {
        Box::new(self.clone())
    }
}
