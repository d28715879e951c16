// src/engine/signals.rs

//! Named signals and the job's default handlers.
//!
//! Every job's root thread starts with one handler per built-in signal.
//! A default handler logs the diagnostic stored in `<signal>Msg` at error
//! level and then either lets the thread continue or terminates the `main`
//! block. `signalhandler` elements replace entries on the thread that runs
//! them (and on threads spawned from it afterwards).

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::actions::{Action, SignalDefaultAction, SignalPolicy};

pub const EVALUATION_ERROR: &str = "STAXEvaluationError";
pub const FUNCTION_DOES_NOT_EXIST: &str = "STAXFunctionDoesNotExist";
pub const FUNCTION_ARG_VALIDATE: &str = "STAXFunctionArgValidate";
pub const INVALID_BLOCK_NAME: &str = "STAXInvalidBlockName";
pub const BLOCK_DOES_NOT_EXIST: &str = "STAXBlockDoesNotExist";
pub const COMMAND_START_ERROR: &str = "STAXCommandStartError";
pub const SUB_JOB_START_ERROR: &str = "STAXSubJobStartError";
pub const IMPORT_ERROR: &str = "STAXImportError";
pub const TESTCASE_MISSING: &str = "STAXTestcaseMissingError";
pub const INVALID_TC_STATUS_RESULT: &str = "STAXInvalidTcStatusResult";
pub const INVALID_TESTCASE_MODE: &str = "STAXInvalidTestcaseMode";
pub const INVALID_TIMER_VALUE: &str = "STAXInvalidTimerValue";
pub const NO_SUCH_SIGNAL_HANDLER: &str = "STAXNoSuchSignalHandler";
pub const EMPTY_LIST: &str = "STAXEmptyList";
pub const MAX_THREADS_EXCEEDED: &str = "STAXMaxThreadsExceeded";
pub const INVALID_MAX_THREADS: &str = "STAXInvalidMaxThreads";

/// Built-in signals and what their default handler does after logging.
pub const DEFAULT_SIGNALS: &[(&str, SignalPolicy, bool)] = &[
    (EVALUATION_ERROR, SignalPolicy::Terminate, true),
    (FUNCTION_DOES_NOT_EXIST, SignalPolicy::Terminate, true),
    (FUNCTION_ARG_VALIDATE, SignalPolicy::Terminate, true),
    (INVALID_BLOCK_NAME, SignalPolicy::Terminate, true),
    (BLOCK_DOES_NOT_EXIST, SignalPolicy::Continue, true),
    (COMMAND_START_ERROR, SignalPolicy::Terminate, true),
    (SUB_JOB_START_ERROR, SignalPolicy::Continue, true),
    (IMPORT_ERROR, SignalPolicy::Terminate, true),
    (TESTCASE_MISSING, SignalPolicy::Continue, true),
    (INVALID_TC_STATUS_RESULT, SignalPolicy::Continue, true),
    (INVALID_TESTCASE_MODE, SignalPolicy::Continue, true),
    (INVALID_TIMER_VALUE, SignalPolicy::Terminate, true),
    (NO_SUCH_SIGNAL_HANDLER, SignalPolicy::Continue, true),
    (EMPTY_LIST, SignalPolicy::Continue, false),
    (MAX_THREADS_EXCEEDED, SignalPolicy::Terminate, true),
    (INVALID_MAX_THREADS, SignalPolicy::Terminate, true),
];

/// Name of the variable holding the diagnostic for `signal`.
pub fn message_var(signal: &str) -> String {
    format!("{signal}Msg")
}

/// Handler table of a job's root thread.
pub fn default_signal_handlers() -> BTreeMap<String, Arc<dyn Action>> {
    DEFAULT_SIGNALS
        .iter()
        .map(|&(signal, policy, log_message)| {
            let handler: Arc<dyn Action> =
                Arc::new(SignalDefaultAction::new(signal, policy, log_message));
            (signal.to_string(), handler)
        })
        .collect()
}
