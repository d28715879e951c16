// src/actions/import.rs

//! `import`: adds the functions of another job document to the running
//! job's function table.
//!
//! `include` and `exclude` are lists of regular expressions matched against
//! the start of each function name. With no `include` every function is
//! requested. A requested function that already exists is left alone unless
//! `replace` is true. Functions named in a requested function's `requires`
//! are brought along, transitively, if the job does not have them yet.
//! An `include` pattern that matches no function of the document is
//! reported as not found.
//!
//! On completion `STAXResult` is a list of seven entries:
//! `[error, imported, imported_required, existing, existing_required,
//! not_requested, not_found]`, where `error` is `None` or
//! `[STAXImportError, message]`. In `mode = 'ignore'` a failed import only
//! sets `error`; in `mode = 'error'` (the default) it raises
//! `STAXImportError`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use regex::Regex;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::definition::JobDefinition;
use crate::engine::signals::IMPORT_ERROR;
use crate::engine::{
    Condition, ConditionId, ConditionKind, DocumentOutcome, RequestId, ThreadContext,
};
use crate::expr::Value;

use super::{Action, SourceLocation};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ImportMode {
    Error,
    Ignore,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ImportState {
    Init,
    Loading { request: RequestId, hold: ConditionId },
    Complete,
}

/// Unevaluated attributes of an `import` element.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportSpec {
    pub file: String,
    pub mode: Option<String>,
    pub replace: Option<String>,
    pub include: Option<String>,
    pub exclude: Option<String>,
}

/// What one import did with each function it looked at.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportReport {
    pub imported: Vec<String>,
    pub imported_required: Vec<String>,
    pub existing: Vec<String>,
    pub existing_required: Vec<String>,
    pub not_requested: Vec<String>,
    pub not_found: Vec<String>,
}

impl ImportReport {
    fn to_value(&self, error: Value) -> Value {
        json!([
            error,
            self.imported,
            self.imported_required,
            self.existing,
            self.existing_required,
            self.not_requested,
            self.not_found,
        ])
    }
}

/// Evaluated `include`/`exclude` filters.
#[derive(Debug, Clone, Default)]
struct Filters {
    include: Vec<(String, Regex)>,
    exclude: Vec<(String, Regex)>,
}

impl Filters {
    fn compile(include: Vec<String>, exclude: Vec<String>) -> Result<Self, String> {
        let compile = |patterns: Vec<String>| {
            patterns
                .into_iter()
                .map(|pattern| {
                    Regex::new(&format!("^(?:{pattern})"))
                        .map(|re| (pattern.clone(), re))
                        .map_err(|e| format!("invalid pattern '{pattern}': {e}"))
                })
                .collect::<Result<Vec<_>, String>>()
        };
        Ok(Self {
            include: compile(include)?,
            exclude: compile(exclude)?,
        })
    }

    fn requested(&self, name: &str) -> bool {
        let included =
            self.include.is_empty() || self.include.iter().any(|(_, re)| re.is_match(name));
        included && !self.exclude.iter().any(|(_, re)| re.is_match(name))
    }
}

#[derive(Debug, Clone)]
pub struct ImportAction {
    location: Arc<SourceLocation>,
    spec: ImportSpec,
    mode: ImportMode,
    replace: bool,
    filters: Filters,
    file: PathBuf,
    state: ImportState,
}

impl ImportAction {
    pub fn new(location: Arc<SourceLocation>, spec: ImportSpec) -> Self {
        Self {
            location,
            spec,
            mode: ImportMode::Error,
            replace: false,
            filters: Filters::default(),
            file: PathBuf::new(),
            state: ImportState::Init,
        }
    }

    /// Relative files are taken relative to the document holding the
    /// `import` element.
    fn resolve(&self, file: &str) -> PathBuf {
        let path = Path::new(file);
        if path.is_absolute() {
            return path.to_path_buf();
        }
        match self.location.file.parent() {
            Some(dir) => dir.join(path),
            None => path.to_path_buf(),
        }
    }

    fn eval_names(
        &self,
        ctx: &mut ThreadContext<'_>,
        attribute: &str,
        expr: Option<&str>,
    ) -> Option<Vec<String>> {
        let Some(expr) = expr else {
            return Some(Vec::new());
        };
        let values = ctx.eval_list_or_raise(&self.location, attribute, expr)?;
        Some(
            values
                .into_iter()
                .map(|v| match v {
                    Value::String(s) => s,
                    other => other.to_string(),
                })
                .collect(),
        )
    }

    /// Evaluate every attribute. `None` when a signal was raised.
    fn prepare(&mut self, ctx: &mut ThreadContext<'_>) -> Option<PathBuf> {
        let file = ctx.eval_string_or_raise(&self.location, "file", &self.spec.file)?;

        if let Some(mode) = self.spec.mode.clone() {
            let mode = ctx.eval_string_or_raise(&self.location, "mode", &mode)?;
            self.mode = match mode.to_ascii_lowercase().as_str() {
                "error" => ImportMode::Error,
                "ignore" => ImportMode::Ignore,
                _ => {
                    self.state = ImportState::Complete;
                    ctx.pop_action();
                    let message = self.location.error_message(
                        Some("mode"),
                        &format!("Invalid import mode: {mode}\nImport mode must be 'error' or 'ignore'."),
                    );
                    ctx.raise_signal_with_message(IMPORT_ERROR, &message);
                    return None;
                }
            };
        }
        if let Some(replace) = self.spec.replace.clone() {
            self.replace = ctx.eval_bool_or_raise(&self.location, "replace", &replace)?;
        }

        let include = self.eval_names(ctx, "include", self.spec.include.clone().as_deref())?;
        let exclude = self.eval_names(ctx, "exclude", self.spec.exclude.clone().as_deref())?;
        match Filters::compile(include, exclude) {
            Ok(filters) => self.filters = filters,
            Err(message) => {
                self.fail(ctx, &message);
                return None;
            }
        }

        Some(self.resolve(&file))
    }

    /// Add the requested functions of `source` (and what they require).
    fn merge(&self, ctx: &mut ThreadContext<'_>, source: &JobDefinition) -> ImportReport {
        let mut report = ImportReport::default();
        let mut required = Vec::new();

        for (name, function) in &source.functions {
            if !self.filters.requested(name) {
                report.not_requested.push(name.clone());
                continue;
            }
            required.extend(function.requires.iter().cloned());
            if self.replace || !ctx.function_exists(name) {
                ctx.import_function(Arc::clone(function));
                report.imported.push(name.clone());
            } else {
                report.existing.push(name.clone());
            }
        }

        while let Some(name) = required.pop() {
            let handled = [
                &report.imported,
                &report.existing,
                &report.imported_required,
                &report.existing_required,
            ];
            if handled.iter().any(|names| names.contains(&name)) {
                continue;
            }
            if ctx.function_exists(&name) {
                report.not_requested.retain(|n| *n != name);
                report.existing_required.push(name);
                continue;
            }
            let Some(function) = source.functions.get(&name) else {
                warn!(job = ctx.job_id(), function = %name, file = %source.file.display(), "required function not found");
                continue;
            };
            required.extend(function.requires.iter().cloned());
            ctx.import_function(Arc::clone(function));
            report.not_requested.retain(|n| *n != name);
            report.imported_required.push(name);
        }

        for (pattern, re) in &self.filters.include {
            if !source.functions.keys().any(|name| re.is_match(name)) {
                report.not_found.push(pattern.clone());
            }
        }
        report
    }

    fn fail(&mut self, ctx: &mut ThreadContext<'_>, reason: &str) {
        self.state = ImportState::Complete;
        ctx.pop_action();
        let message = self.location.error_message(Some("file"), reason);
        match self.mode {
            ImportMode::Error => {
                warn!(job = ctx.job_id(), thread = ctx.thread_id(), %reason, "import failed");
                ctx.raise_signal_with_message(IMPORT_ERROR, &message);
            }
            ImportMode::Ignore => {
                info!(job = ctx.job_id(), thread = ctx.thread_id(), %reason, "import failed; ignored");
                let error = json!([IMPORT_ERROR, message]);
                ctx.set_var("STAXResult", ImportReport::default().to_value(error));
            }
        }
    }
}

impl Action for ImportAction {
    fn location(&self) -> &SourceLocation {
        &self.location
    }

    fn info(&self) -> String {
        self.spec.file.clone()
    }

    fn details(&self) -> String {
        format!("file={} state={:?}", self.file.display(), self.state)
    }

    fn execute(&mut self, ctx: &mut ThreadContext<'_>) {
        match self.state {
            ImportState::Init => {
                let Some(file) = self.prepare(ctx) else {
                    return;
                };
                let request = ctx.load_document(file.clone());
                let hold = ctx.new_condition(ConditionKind::Hold, "Import");
                let hold_id = hold.id();
                ctx.add_condition(hold);
                debug!(job = ctx.job_id(), thread = ctx.thread_id(), request, file = %file.display(), "import requested");
                self.file = file;
                self.state = ImportState::Loading {
                    request,
                    hold: hold_id,
                };
            }
            ImportState::Loading { .. } => {}
            ImportState::Complete => ctx.pop_action(),
        }
    }

    fn handle_condition(&mut self, ctx: &mut ThreadContext<'_>, _condition: &Condition) {
        if let ImportState::Loading { request, hold } = self.state {
            ctx.release_import(request);
            ctx.remove_condition(hold);
        }
        self.state = ImportState::Complete;
        ctx.pop_action();
    }

    fn clone_action(&self) -> Box<dyn Action> {
        Box::new(Self::new(Arc::clone(&self.location), self.spec.clone()))
    }

    fn document_loaded(
        &mut self,
        ctx: &mut ThreadContext<'_>,
        id: RequestId,
        outcome: DocumentOutcome,
    ) {
        let ImportState::Loading { request, hold } = self.state else {
            return;
        };
        if request != id {
            return;
        }
        ctx.remove_condition(hold);

        match outcome {
            Ok(source) => {
                let report = self.merge(ctx, &source);
                info!(
                    job = ctx.job_id(),
                    file = %self.file.display(),
                    imported = report.imported.len() + report.imported_required.len(),
                    existing = report.existing.len(),
                    "functions imported"
                );
                ctx.set_var("STAXResult", report.to_value(Value::Null));
                self.state = ImportState::Complete;
            }
            Err(reason) => self.fail(ctx, &reason),
        }
        ctx.schedule();
    }
}
