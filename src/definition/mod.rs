// src/definition/mod.rs

//! Job definitions.
//!
//! A [`JobDocument`] is the deserialized job file. [`JobDefinition`] is the
//! validated, immutable result: the function table of action templates and
//! the defaults that run before the start function. One definition can back
//! any number of jobs.

pub mod document;
pub mod factory;
pub mod node;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use crate::actions::{Action, NameSpec, ScriptAction, SignalHandlerAction, SourceLocation};
use crate::errors::{Result, StaxError};
use crate::types::FunctionScope;

pub use document::{
    ArgDocument, FunctionDocument, JobDocument, JobSection, ScriptDocument, SignalHandlerDocument,
};
pub use factory::{BuildContext, build_action};
pub use node::{ActionNode, AttrValue};

/// A declared function argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgDef {
    pub name: String,
    pub required: bool,
    /// Expression evaluated when the argument is not passed.
    pub default: Option<String>,
}

/// A function as stored in the job's function table.
#[derive(Debug)]
pub struct FunctionTemplate {
    pub name: String,
    pub location: Arc<SourceLocation>,
    pub scope: FunctionScope,
    pub prolog: Option<String>,
    pub args: Vec<ArgDef>,
    /// Names pulled in alongside this function by `import`.
    pub requires: Vec<String>,
    pub body: Arc<dyn Action>,
}

#[derive(Debug)]
pub struct JobDefinition {
    pub name: String,
    pub file: PathBuf,
    pub machine: String,
    pub start_function: String,
    pub start_args: Option<String>,
    pub functions: BTreeMap<String, Arc<FunctionTemplate>>,
    /// Job-level signal handlers, then scripts, in document order.
    pub defaults: Vec<Arc<dyn Action>>,
    pub max_threads: Option<u32>,
}

impl JobDefinition {
    /// Validate a document and build its action templates.
    ///
    /// Checks that there is at least one function, that function and
    /// argument names are unique, that the start function exists and that
    /// every element is well formed.
    pub fn from_document(doc: &JobDocument, file: &Path, machine: &str) -> Result<Self> {
        let ctx = BuildContext::new(file, machine);

        let first = doc.function.first().ok_or_else(|| {
            StaxError::ConfigError(format!(
                "job document {} must define at least one [[function]]",
                file.display()
            ))
        })?;

        let mut functions = BTreeMap::new();
        for function in &doc.function {
            let template = build_function(function, &ctx)?;
            if functions.insert(function.name.clone(), Arc::new(template)).is_some() {
                return Err(StaxError::definition(
                    "function",
                    function.line,
                    format!("duplicate function name \"{}\"", function.name),
                ));
            }
        }

        for function in &doc.function {
            if let Some(missing) = function.requires.iter().find(|r| !functions.contains_key(*r)) {
                return Err(StaxError::definition(
                    "function",
                    function.line,
                    format!(
                        "function \"{}\" requires unknown function \"{missing}\"",
                        function.name
                    ),
                ));
            }
        }

        let start_function = doc.job.function.clone().unwrap_or_else(|| first.name.clone());
        if !functions.contains_key(&start_function) {
            return Err(StaxError::ConfigError(format!(
                "start function \"{start_function}\" is not defined in {}",
                file.display()
            )));
        }

        let mut defaults: Vec<Arc<dyn Action>> = Vec::new();
        for handler in &doc.signalhandler {
            let location = Arc::new(SourceLocation {
                element: "signalhandler".to_string(),
                file: file.to_path_buf(),
                machine: machine.to_string(),
                line: handler.line,
                child_lines: BTreeMap::new(),
            });
            defaults.push(Arc::new(SignalHandlerAction::new(
                location,
                NameSpec::Expression(handler.signal.clone()),
                build_action(&handler.body, &ctx)?,
            )));
        }
        for script in &doc.script {
            let location = Arc::new(SourceLocation {
                element: "script".to_string(),
                file: file.to_path_buf(),
                machine: machine.to_string(),
                line: script.line,
                child_lines: BTreeMap::new(),
            });
            defaults.push(Arc::new(ScriptAction::new(location, script.code.clone())));
        }

        let name = doc.job.name.clone().unwrap_or_else(|| {
            file.file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "job".to_string())
        });

        debug!(
            job = %name,
            file = %file.display(),
            functions = functions.len(),
            start = %start_function,
            "job definition built"
        );

        Ok(Self {
            name,
            file: file.to_path_buf(),
            machine: machine.to_string(),
            start_function,
            start_args: doc.job.args.clone(),
            functions,
            defaults,
            max_threads: doc.job.max_threads,
        })
    }
}

fn build_function(doc: &FunctionDocument, ctx: &BuildContext) -> Result<FunctionTemplate> {
    let mut args = Vec::with_capacity(doc.args.len());
    for arg in &doc.args {
        if args.iter().any(|a: &ArgDef| a.name == arg.name) {
            return Err(StaxError::definition(
                "function",
                doc.line,
                format!("function \"{}\" declares argument \"{}\" twice", doc.name, arg.name),
            ));
        }
        args.push(ArgDef {
            name: arg.name.clone(),
            required: arg.required.unwrap_or(arg.default.is_none()),
            default: arg.default.clone(),
        });
    }

    let location = Arc::new(SourceLocation {
        element: "function".to_string(),
        file: ctx.file.clone(),
        machine: ctx.machine.clone(),
        line: doc.line,
        child_lines: BTreeMap::from([(doc.body.element.clone(), doc.body.line)]),
    });

    Ok(FunctionTemplate {
        name: doc.name.clone(),
        location,
        scope: doc.scope,
        prolog: doc.prolog.clone(),
        args,
        requires: doc.requires.clone(),
        body: build_action(&doc.body, ctx)?,
    })
}
