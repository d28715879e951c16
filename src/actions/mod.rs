// src/actions/mod.rs

//! Action variants.
//!
//! An action is a small explicit state machine living in one frame of a
//! thread's call stack. The engine calls [`Action::execute`] to advance it
//! one step, or [`Action::handle_condition`] when a condition is pending on
//! the thread and this action is on top. Actions never block: waiting is
//! expressed with a hold condition plus one of the callbacks.
//!
//! Definitions hold actions as immutable `Arc<dyn Action>` templates; every
//! execution pushes a fresh [`Action::clone_action`], so per-execution
//! state never aliases between executions.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::engine::{
    Condition, DocumentOutcome, JobId, RequestId, RequestOutcome, SubJobOutcome, ThreadContext,
    ThreadEnd, ThreadId, TimedEventId,
};

pub mod block;
pub mod block_control;
pub mod call;
pub mod conditional;
pub mod flow;
pub mod function;
pub mod import;
pub mod iterate;
pub mod loops;
pub mod misc;
pub mod parallel;
pub mod parallel_iterate;
pub mod process;
pub mod sequence;
pub mod signal;
pub mod subjob;
pub mod testcase;
pub mod timer;
pub mod try_catch;

pub use block::BlockAction;
pub use block_control::{BlockControlAction, BlockOp};
pub use call::{CallAction, CallArgs};
pub use conditional::{Branch, IfAction};
pub use flow::{BreakAction, ContinueAction, RethrowAction, ReturnAction, ThrowAction};
pub use function::{CallValue, FunctionAction};
pub use import::{ImportAction, ImportReport, ImportSpec};
pub use iterate::IterateAction;
pub use loops::{LoopAction, LoopSpec};
pub use misc::{BreakpointAction, LogAction, MessageAction, NopAction, ScriptAction};
pub use parallel::ParallelAction;
pub use parallel_iterate::ParallelIterateAction;
pub use process::StafCmdAction;
pub use sequence::SequenceAction;
pub use signal::{
    RaiseAction, SignalDefaultAction, SignalExecutionAction, SignalHandlerAction, SignalPolicy,
};
pub use subjob::{SubJobAction, SubJobSpec};
pub use testcase::{TcStatusAction, TestcaseAction};
pub use timer::{TimerAction, parse_duration};
pub use try_catch::{CatchAction, FinallyAction, TryAction, catch_matches};

/// Where an action was defined.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceLocation {
    pub element: String,
    pub file: PathBuf,
    pub machine: String,
    pub line: u32,
    /// Line of the first occurrence of each child element.
    pub child_lines: BTreeMap<String, u32>,
}

impl SourceLocation {
    /// Location of an action the engine builds itself.
    pub fn internal(element: &str, file: &Path, machine: &str) -> Self {
        Self {
            element: element.to_string(),
            file: file.to_path_buf(),
            machine: machine.to_string(),
            line: 0,
            child_lines: BTreeMap::new(),
        }
    }

    /// Line of child element `element`, falling back to this element.
    pub fn line_of(&self, element: &str) -> u32 {
        self.child_lines.get(element).copied().unwrap_or(self.line)
    }

    /// Diagnostic stored in a signal's message variable.
    pub fn error_message(&self, attribute: Option<&str>, message: &str) -> String {
        let what = match attribute {
            Some(attribute) => format!(
                "Error in element type \"{}\" attribute \"{attribute}\"",
                self.element
            ),
            None => format!("Error in element type \"{}\"", self.element),
        };
        format!("{self}\n\n{what}:\n\n{message}")
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "File: {}, Machine: {}, Line {}",
            self.file.display(),
            self.machine,
            self.line
        )
    }
}

/// A name attribute that is either fixed or evaluated at run time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NameSpec {
    Literal(String),
    Expression(String),
}

impl NameSpec {
    /// Resolve the name. On evaluation failure the calling action is popped
    /// and the evaluation signal raised.
    pub fn resolve(
        &self,
        ctx: &mut ThreadContext<'_>,
        location: &SourceLocation,
        attribute: &str,
    ) -> Option<String> {
        match self {
            NameSpec::Literal(name) => Some(name.clone()),
            NameSpec::Expression(expr) => ctx.eval_string_or_raise(location, attribute, expr),
        }
    }
}

impl fmt::Display for NameSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NameSpec::Literal(name) | NameSpec::Expression(name) => f.write_str(name),
        }
    }
}

pub trait Action: Send + Sync + fmt::Debug {
    fn location(&self) -> &SourceLocation;

    /// Short description shown in call stacks, e.g. the block name.
    fn info(&self) -> String {
        String::new()
    }

    /// Internal state, for diagnostics.
    fn details(&self) -> String {
        String::new()
    }

    fn summary(&self) -> String {
        let info = self.info();
        if info.is_empty() {
            self.location().element.clone()
        } else {
            format!("{}: {info}", self.location().element)
        }
    }

    /// Advance one step on the normal path.
    fn execute(&mut self, ctx: &mut ThreadContext<'_>);

    /// React to the highest-priority pending condition. The default pops
    /// the action and leaves the condition for the frame below.
    fn handle_condition(&mut self, ctx: &mut ThreadContext<'_>, _condition: &Condition) {
        ctx.pop_action();
    }

    /// Independent copy in its initial state.
    fn clone_action(&self) -> Box<dyn Action>;

    /// A thread this action registered for has completed.
    fn thread_complete(&mut self, _ctx: &mut ThreadContext<'_>, _child: ThreadId, _end: ThreadEnd) {}

    /// A timed event this action scheduled has fired.
    fn timed_event(&mut self, _ctx: &mut ThreadContext<'_>, _id: TimedEventId) {}

    /// A remote request this action submitted has completed.
    fn request_complete(&mut self, _ctx: &mut ThreadContext<'_>, _id: RequestId, _outcome: RequestOutcome) {}

    /// A sub-job this action requested has started.
    fn sub_job_started(&mut self, _ctx: &mut ThreadContext<'_>, _id: RequestId, _job: JobId) {}

    /// A sub-job this action requested has ended or failed to start.
    fn sub_job_complete(&mut self, _ctx: &mut ThreadContext<'_>, _id: RequestId, _outcome: SubJobOutcome) {}

    /// A document this action asked for has been loaded (or failed to).
    fn document_loaded(&mut self, _ctx: &mut ThreadContext<'_>, _id: RequestId, _outcome: DocumentOutcome) {}
}
