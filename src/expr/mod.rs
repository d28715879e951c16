// src/expr/mod.rs

//! Expression evaluation seam.
//!
//! Every attribute of an action is an unevaluated expression string. The
//! engine never interprets those strings itself; it hands them to an
//! [`ExpressionEvaluator`] together with the thread's [`Scope`]. The typed
//! helpers (`eval_bool`, `eval_int`, ...) are provided on top of
//! `eval_object`, so an implementation only needs `eval_object` and `exec`.
//!
//! The production implementation is [`CelEvaluator`].

pub mod cel;
pub mod scope;

use std::fmt;

use thiserror::Error;

pub use cel::CelEvaluator;
pub use scope::Scope;

/// Value type held in a scope and produced by evaluation.
pub type Value = serde_json::Value;

/// Failure to evaluate an expression or execute a script.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}\n  expression: {expression}")]
pub struct EvaluationError {
    pub expression: String,
    pub message: String,
}

impl EvaluationError {
    pub fn new(expression: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            expression: expression.into(),
            message: message.into(),
        }
    }
}

pub trait ExpressionEvaluator: Send + Sync + fmt::Debug {
    /// Evaluate `expr` in `scope` and return the raw value.
    fn eval_object(&self, expr: &str, scope: &Scope) -> Result<Value, EvaluationError>;

    /// Execute a block of statements, which may assign variables in `scope`.
    fn exec(&self, code: &str, scope: &Scope) -> Result<(), EvaluationError>;

    fn eval_bool(&self, expr: &str, scope: &Scope) -> Result<bool, EvaluationError> {
        Ok(is_truthy(&self.eval_object(expr, scope)?))
    }

    fn eval_string(&self, expr: &str, scope: &Scope) -> Result<String, EvaluationError> {
        Ok(value_to_string(&self.eval_object(expr, scope)?))
    }

    fn eval_int(&self, expr: &str, scope: &Scope) -> Result<i64, EvaluationError> {
        let value = self.eval_object(expr, scope)?;
        value_to_int(&value).ok_or_else(|| {
            EvaluationError::new(expr, format!("expression did not evaluate to an integer: {value}"))
        })
    }

    /// Evaluate to a list. Lists are returned as-is, maps yield their keys and
    /// any other value is wrapped in a one-element list.
    fn eval_list(&self, expr: &str, scope: &Scope) -> Result<Vec<Value>, EvaluationError> {
        Ok(match self.eval_object(expr, scope)? {
            Value::Array(items) => items,
            Value::Object(map) => map.into_iter().map(|(k, _)| Value::String(k)).collect(),
            other => vec![other],
        })
    }

    fn set_var(&self, scope: &Scope, name: &str, value: Value) {
        scope.set(name, value);
    }

    fn clone_scope(&self, scope: &Scope) -> Scope {
        scope.fork()
    }
}

pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

/// Render a value the way it is written to logs and result variables.
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "None".to_string(),
        other => other.to_string(),
    }
}

pub fn value_to_int(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.fract() == 0.0 && f.is_finite())
                .map(|f| f as i64)
        }),
        Value::String(s) => s.trim().parse().ok(),
        Value::Bool(b) => Some(i64::from(*b)),
        _ => None,
    }
}
