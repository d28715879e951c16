// src/definition/node.rs

//! Serialized form of one parsed element.
//!
//! ```toml
//! [function.body]
//! element = "loop"
//! line = 12
//! var = "i"
//! from = "1"
//! to = "5"
//!
//! [[function.body.children]]
//! element = "script"
//! text = "total = total + i"
//! ```
//!
//! Every key other than `element`, `line`, `text` and `children` is an
//! attribute. Attribute values are unevaluated expressions; numbers and
//! booleans are accepted and kept in their literal form.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, StaxError};

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum AttrValue {
    Text(String),
    Integer(i64),
    Float(f64),
    Bool(bool),
}

impl fmt::Display for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttrValue::Text(s) => f.write_str(s),
            AttrValue::Integer(i) => write!(f, "{i}"),
            AttrValue::Float(x) => write!(f, "{x}"),
            AttrValue::Bool(b) => write!(f, "{b}"),
        }
    }
}

impl From<&str> for AttrValue {
    fn from(s: &str) -> Self {
        AttrValue::Text(s.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(s: String) -> Self {
        AttrValue::Text(s)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ActionNode {
    pub element: String,

    #[serde(default)]
    pub line: u32,

    /// Element content (script code, log text, call arguments...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<ActionNode>,

    #[serde(flatten)]
    pub attrs: BTreeMap<String, AttrValue>,
}

impl ActionNode {
    pub fn new(element: impl Into<String>) -> Self {
        Self {
            element: element.into(),
            line: 0,
            text: None,
            children: Vec::new(),
            attrs: BTreeMap::new(),
        }
    }

    pub fn attr(mut self, name: &str, value: impl Into<AttrValue>) -> Self {
        self.attrs.insert(name.to_string(), value.into());
        self
    }

    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn child(mut self, child: ActionNode) -> Self {
        self.children.push(child);
        self
    }

    pub fn children(mut self, children: impl IntoIterator<Item = ActionNode>) -> Self {
        self.children.extend(children);
        self
    }

    pub fn at_line(mut self, line: u32) -> Self {
        self.line = line;
        self
    }

    /// Attribute value in expression form.
    pub fn get(&self, name: &str) -> Option<String> {
        self.attrs.get(name).map(ToString::to_string)
    }

    pub fn required(&self, name: &str) -> Result<String> {
        self.get(name).ok_or_else(|| {
            StaxError::definition(
                &self.element,
                self.line,
                format!("missing required attribute \"{name}\""),
            )
        })
    }

    /// Attribute, falling back to the element text.
    pub fn attr_or_text(&self, name: &str) -> Option<String> {
        self.get(name).or_else(|| self.text.clone())
    }

    pub fn error(&self, message: impl Into<String>) -> StaxError {
        StaxError::definition(&self.element, self.line, message)
    }

    /// Line of the first child of each element type.
    pub fn child_lines(&self) -> BTreeMap<String, u32> {
        let mut lines = BTreeMap::new();
        for child in &self.children {
            lines.entry(child.element.clone()).or_insert(child.line);
        }
        lines
    }
}
