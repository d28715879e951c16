// src/definition/document.rs

//! On-disk job document.
//!
//! ```toml
//! [job]
//! name = "nightly"
//! function = "main"
//! args = "{'count': 3}"
//!
//! [[signalhandler]]
//! signal = "'STAXEmptyList'"
//! body = { element = "nop" }
//!
//! [[script]]
//! code = "retries = 2"
//!
//! [[function]]
//! name = "main"
//! scope = "local"
//! body = { element = "message", text = "'hello'" }
//! ```

use serde::{Deserialize, Serialize};

use crate::types::FunctionScope;

use super::node::ActionNode;

#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
pub struct JobDocument {
    #[serde(default)]
    pub job: JobSection,

    /// Scripts run before the start function.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub script: Vec<ScriptDocument>,

    /// Handlers installed on the root thread before the start function.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub signalhandler: Vec<SignalHandlerDocument>,

    #[serde(default)]
    pub function: Vec<FunctionDocument>,
}

/// `[job]` section.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize, Serialize)]
pub struct JobSection {
    /// Job name; defaults to the document's file stem.
    #[serde(default)]
    pub name: Option<String>,

    /// Start function; defaults to the first function in the document.
    #[serde(default)]
    pub function: Option<String>,

    /// Expression passed to the start function.
    #[serde(default)]
    pub args: Option<String>,

    #[serde(default)]
    pub max_threads: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ScriptDocument {
    pub code: String,
    #[serde(default)]
    pub line: u32,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SignalHandlerDocument {
    pub signal: String,
    pub body: ActionNode,
    #[serde(default)]
    pub line: u32,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct FunctionDocument {
    pub name: String,

    #[serde(default)]
    pub scope: FunctionScope,

    /// Free-form description.
    #[serde(default)]
    pub prolog: Option<String>,

    #[serde(default, rename = "arg", skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<ArgDocument>,

    /// Functions an `import` of this one brings along.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub requires: Vec<String>,

    pub body: ActionNode,

    #[serde(default)]
    pub line: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ArgDocument {
    pub name: String,

    /// Defaults to true unless a default is given.
    #[serde(default)]
    pub required: Option<bool>,

    /// Expression evaluated when the argument is not passed.
    #[serde(default)]
    pub default: Option<String>,

    #[serde(default)]
    pub description: Option<String>,
}
