// src/expr/cel.rs

//! CEL-backed expression evaluator.
//!
//! Expressions are compiled once and kept in an LRU [`HitCache`]. Scope variables
//! are bound into a fresh CEL context for every evaluation. JSON numbers that
//! fit in an `i64` are bound as CEL `int` so that arithmetic against integer
//! literals type-checks.
//!
//! `exec` runs a small statement language on top of CEL: statements are
//! separated by newlines or `;`, `name = expr` assigns, any other statement is
//! evaluated for its side effects (none) and discarded, and `#` starts a
//! comment line.

use std::sync::{Arc, LazyLock, Mutex};

use cel_interpreter::objects::Key;
use cel_interpreter::{Context, Program, Value as CelValue};
use regex::Regex;
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};
use tracing::trace;

use super::{EvaluationError, ExpressionEvaluator, Scope, Value};
use crate::cache::HitCache;

const DEFAULT_PROGRAM_CACHE_SIZE: usize = 512;

static ASSIGNMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)^\s*([A-Za-z_][A-Za-z0-9_]*)\s*=(.*)$").expect("assignment regex is valid")
});

#[derive(Debug)]
pub struct CelEvaluator {
    programs: Mutex<HitCache<String, Arc<Program>>>,
}

impl Default for CelEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

impl CelEvaluator {
    pub fn new() -> Self {
        Self::with_cache_size(DEFAULT_PROGRAM_CACHE_SIZE)
    }

    pub fn with_cache_size(size: usize) -> Self {
        Self {
            programs: Mutex::new(HitCache::new(size)),
        }
    }

    fn compile(&self, expr: &str) -> Result<Arc<Program>, EvaluationError> {
        let mut programs = self
            .programs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        programs.get_or_try_insert_with(&expr.to_string(), || {
            trace!(expr, "compiling expression");
            Program::compile(expr)
                .map(Arc::new)
                .map_err(|e| EvaluationError::new(expr, format!("syntax error: {e}")))
        })
    }

    fn bind_scope(context: &mut Context, expr: &str, scope: &Scope) -> Result<(), EvaluationError> {
        for (name, value) in scope.snapshot() {
            context
                .add_variable(name.as_str(), CelJson(&value))
                .map_err(|e| {
                    EvaluationError::new(expr, format!("cannot bind variable '{name}': {e}"))
                })?;
        }
        Ok(())
    }
}

impl ExpressionEvaluator for CelEvaluator {
    fn eval_object(&self, expr: &str, scope: &Scope) -> Result<Value, EvaluationError> {
        let program = self.compile(expr.trim())?;
        let mut context = Context::default();
        Self::bind_scope(&mut context, expr, scope)?;
        let result = program
            .execute(&context)
            .map_err(|e| EvaluationError::new(expr, e.to_string()))?;
        Ok(cel_to_json(&result))
    }

    fn exec(&self, code: &str, scope: &Scope) -> Result<(), EvaluationError> {
        for statement in split_statements(code) {
            let statement = statement.trim();
            if statement.is_empty() || statement.starts_with('#') {
                continue;
            }

            match parse_assignment(statement) {
                Some((name, expr)) => {
                    let value = self.eval_object(expr, scope)?;
                    scope.set(name, value);
                }
                None => {
                    self.eval_object(statement, scope)?;
                }
            }
        }
        Ok(())
    }
}

/// Split on newlines and `;` outside of string literals.
fn split_statements(code: &str) -> Vec<&str> {
    let mut statements = Vec::new();
    let mut quote: Option<char> = None;
    let mut escaped = false;
    let mut start = 0;

    for (i, c) in code.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match (quote, c) {
            (Some(_), '\\') => escaped = true,
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '\'' | '"') => quote = Some(c),
            (None, '\n' | ';') => {
                statements.push(&code[start..i]);
                start = i + c.len_utf8();
            }
            (None, _) => {}
        }
    }
    statements.push(&code[start..]);
    statements
}

/// `name = expr` (but not `name == expr`).
fn parse_assignment(statement: &str) -> Option<(&str, &str)> {
    let caps = ASSIGNMENT.captures(statement)?;
    let name = caps.get(1)?.as_str();
    let rest = caps.get(2)?.as_str();
    if rest.starts_with('=') {
        return None;
    }
    Some((name, rest.trim()))
}

/// Serializes a JSON value for CEL, binding integral numbers as `int`.
struct CelJson<'a>(&'a Value);

impl Serialize for CelJson<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.0 {
            Value::Null => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => serializer.serialize_i64(i),
                None => serializer.serialize_f64(n.as_f64().unwrap_or(f64::NAN)),
            },
            Value::String(s) => serializer.serialize_str(s),
            Value::Array(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(&CelJson(item))?;
                }
                seq.end()
            }
            Value::Object(map) => {
                let mut out = serializer.serialize_map(Some(map.len()))?;
                for (key, value) in map {
                    out.serialize_entry(key, &CelJson(value))?;
                }
                out.end()
            }
        }
    }
}

fn cel_to_json(value: &CelValue) -> Value {
    match value {
        CelValue::Null => Value::Null,
        CelValue::Bool(b) => Value::Bool(*b),
        CelValue::Int(i) => Value::from(*i),
        CelValue::UInt(u) => Value::from(*u),
        CelValue::Float(f) => serde_json::Number::from_f64(*f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        CelValue::String(s) => Value::String(s.to_string()),
        CelValue::List(items) => Value::Array(items.iter().map(cel_to_json).collect()),
        CelValue::Map(map) => {
            let mut object = serde_json::Map::new();
            for (key, item) in map.map.iter() {
                object.insert(key_to_string(key), cel_to_json(item));
            }
            Value::Object(object)
        }
        other => Value::String(format!("{other:?}")),
    }
}

fn key_to_string(key: &Key) -> String {
    match key {
        Key::Int(i) => i.to_string(),
        Key::Uint(u) => u.to_string(),
        Key::Bool(b) => b.to_string(),
        Key::String(s) => s.to_string(),
    }
}
