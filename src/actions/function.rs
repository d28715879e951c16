// src/actions/function.rs

use std::sync::Arc;

use serde_json::Map;
use tracing::trace;

use crate::definition::FunctionTemplate;
use crate::engine::signals::FUNCTION_ARG_VALIDATE;
use crate::engine::{Condition, ConditionKind, ThreadContext};
use crate::expr::{Scope, Value};
use crate::types::FunctionScope;

use super::{Action, SourceLocation};

/// Evaluated arguments of a call.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum CallValue {
    #[default]
    None,
    /// Value of an `args` attribute.
    Single(Value),
    Positional(Vec<Value>),
    Named(Map<String, Value>),
}

impl CallValue {
    /// The value exposed to the function body as `STAXArg`.
    pub fn to_value(&self) -> Value {
        match self {
            CallValue::None => Value::Null,
            CallValue::Single(value) => value.clone(),
            CallValue::Positional(values) => Value::Array(values.clone()),
            CallValue::Named(values) => Value::Object(values.clone()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FunctionState {
    Init,
    ActionCalled,
    Complete,
}

/// One invocation of a function, created by `call`.
///
/// The call's argument value is always available as `STAXArg`. Declared
/// arguments are bound by position or by name. A single value binds to a
/// lone declared argument; otherwise a list binds by position and a map by
/// name. `STAXResult` is set in the caller's scope on the way out.
#[derive(Debug, Clone)]
pub struct FunctionAction {
    template: Arc<FunctionTemplate>,
    arg: CallValue,
    state: FunctionState,
    caller_scope: Option<Scope>,
    caller_function: Option<Value>,
}

impl FunctionAction {
    pub fn new(template: Arc<FunctionTemplate>, arg: CallValue) -> Self {
        Self {
            template,
            arg,
            state: FunctionState::Init,
            caller_scope: None,
            caller_function: None,
        }
    }

    /// Bind declared arguments. Returns the diagnostic on failure.
    fn bind_args(&self, ctx: &mut ThreadContext<'_>) -> Result<(), String> {
        let declared = &self.template.args;
        ctx.set_var("STAXArg", self.arg.to_value());
        if declared.is_empty() {
            return Ok(());
        }

        let mut provided: Vec<Option<Value>> = vec![None; declared.len()];
        match &self.arg {
            CallValue::None => {}
            CallValue::Single(value) if declared.len() == 1 => provided[0] = Some(value.clone()),
            CallValue::Single(Value::Array(values)) | CallValue::Positional(values) => {
                if values.len() > declared.len() {
                    return Err(format!(
                        "Function '{}' accepts at most {} argument(s) but {} were passed",
                        self.template.name,
                        declared.len(),
                        values.len()
                    ));
                }
                for (slot, value) in provided.iter_mut().zip(values) {
                    *slot = Some(value.clone());
                }
            }
            CallValue::Single(Value::Object(values)) | CallValue::Named(values) => {
                for (name, value) in values {
                    let Some(index) = declared.iter().position(|a| &a.name == name) else {
                        return Err(format!(
                            "Function '{}' has no argument named '{name}'",
                            self.template.name
                        ));
                    };
                    provided[index] = Some(value.clone());
                }
            }
            CallValue::Single(value) => provided[0] = Some(value.clone()),
        }

        for (arg, value) in declared.iter().zip(provided) {
            let value = match (value, &arg.default) {
                (Some(value), _) => value,
                (None, Some(default)) => ctx.eval_object(default).map_err(|e| {
                    format!("Default value of argument '{}' failed to evaluate: {e}", arg.name)
                })?,
                (None, None) if arg.required => {
                    return Err(format!(
                        "Function '{}' requires argument '{}'",
                        self.template.name, arg.name
                    ));
                }
                (None, None) => Value::Null,
            };
            ctx.set_var(&arg.name, value);
        }
        Ok(())
    }

    fn leave(&mut self, ctx: &mut ThreadContext<'_>, result: Option<Value>) {
        if let Some(scope) = self.caller_scope.take() {
            ctx.replace_scope(scope);
        }
        if let Some(previous) = self.caller_function.take() {
            ctx.set_var("STAXCurrentFunction", previous);
        }
        if let Some(result) = result {
            ctx.set_var("STAXResult", result);
        }
        self.state = FunctionState::Complete;
        ctx.pop_action();
    }
}

impl Action for FunctionAction {
    fn location(&self) -> &SourceLocation {
        &self.template.location
    }

    fn info(&self) -> String {
        self.template.name.clone()
    }

    fn execute(&mut self, ctx: &mut ThreadContext<'_>) {
        match self.state {
            FunctionState::Init => {
                self.caller_function = Some(ctx.get_var("STAXCurrentFunction").unwrap_or(Value::Null));
                if self.template.scope == FunctionScope::Local {
                    let local = ctx.scope().fork();
                    self.caller_scope = Some(ctx.replace_scope(local));
                }
                ctx.set_var("STAXCurrentFunction", Value::from(self.template.name.clone()));

                if let Err(message) = self.bind_args(ctx) {
                    self.leave(ctx, None);
                    let message = self.template.location.error_message(None, &message);
                    ctx.raise_signal_with_message(FUNCTION_ARG_VALIDATE, &message);
                    return;
                }

                trace!(job = ctx.job_id(), thread = ctx.thread_id(), function = %self.template.name, "function entered");
                self.state = FunctionState::ActionCalled;
                ctx.push_action(self.template.body.clone_action());
            }
            FunctionState::ActionCalled => self.leave(ctx, Some(Value::Null)),
            FunctionState::Complete => ctx.pop_action(),
        }
    }

    fn handle_condition(&mut self, ctx: &mut ThreadContext<'_>, condition: &Condition) {
        match condition.kind() {
            ConditionKind::Return(value) => {
                ctx.remove_condition(condition.id());
                self.leave(ctx, Some(value.clone()));
            }
            _ => self.leave(ctx, None),
        }
    }

    fn clone_action(&self) -> Box<dyn Action> {
        Box::new(Self::new(Arc::clone(&self.template), self.arg.clone()))
    }
}
