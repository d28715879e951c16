// src/types.rs

//! Small enums shared by the job document, the actions and the registries.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Testcase accounting mode.
///
/// - `Default`: a testcase is reported only once it has at least one status.
/// - `Strict`: a testcase is reported as soon as it starts, and a testcase
///   with no status counts as a failure.
///
/// When the same testcase name is entered again the mode only escalates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestcaseMode {
    #[default]
    Default,
    Strict,
}

impl FromStr for TestcaseMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "default" => Ok(TestcaseMode::Default),
            "strict" => Ok(TestcaseMode::Strict),
            other => Err(format!(
                "invalid testcase mode: {other} (expected \"default\" or \"strict\")"
            )),
        }
    }
}

/// Result recorded by a `tcstatus` element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TcStatusResult {
    Pass,
    Fail,
    Info,
}

impl FromStr for TcStatusResult {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pass" => Ok(TcStatusResult::Pass),
            "fail" => Ok(TcStatusResult::Fail),
            "info" => Ok(TcStatusResult::Info),
            other => Err(format!(
                "invalid tcstatus result: {other} (expected \"pass\", \"fail\" or \"info\")"
            )),
        }
    }
}

impl fmt::Display for TcStatusResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TcStatusResult::Pass => "pass",
            TcStatusResult::Fail => "fail",
            TcStatusResult::Info => "info",
        };
        f.write_str(s)
    }
}

/// Variable scope of a function body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FunctionScope {
    /// Runs in the caller's scope.
    #[default]
    Global,
    /// Runs in a private copy of the caller's scope.
    Local,
}

impl FromStr for FunctionScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "global" => Ok(FunctionScope::Global),
            "local" => Ok(FunctionScope::Local),
            other => Err(format!(
                "invalid function scope: {other} (expected \"global\" or \"local\")"
            )),
        }
    }
}

/// Level of a job log record written by the `log` element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JobLogLevel {
    Fatal,
    Error,
    Warning,
    #[default]
    Info,
    Pass,
    Fail,
    Status,
    Start,
    Stop,
    Debug,
    Trace,
}

impl FromStr for JobLogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "fatal" => Ok(JobLogLevel::Fatal),
            "error" => Ok(JobLogLevel::Error),
            "warning" | "warn" => Ok(JobLogLevel::Warning),
            "info" => Ok(JobLogLevel::Info),
            "pass" => Ok(JobLogLevel::Pass),
            "fail" => Ok(JobLogLevel::Fail),
            "status" => Ok(JobLogLevel::Status),
            "start" => Ok(JobLogLevel::Start),
            "stop" => Ok(JobLogLevel::Stop),
            "debug" => Ok(JobLogLevel::Debug),
            "trace" => Ok(JobLogLevel::Trace),
            other => Err(format!("invalid log level: {other}")),
        }
    }
}

impl fmt::Display for JobLogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobLogLevel::Fatal => "fatal",
            JobLogLevel::Error => "error",
            JobLogLevel::Warning => "warning",
            JobLogLevel::Info => "info",
            JobLogLevel::Pass => "pass",
            JobLogLevel::Fail => "fail",
            JobLogLevel::Status => "status",
            JobLogLevel::Start => "start",
            JobLogLevel::Stop => "stop",
            JobLogLevel::Debug => "debug",
            JobLogLevel::Trace => "trace",
        };
        f.write_str(s)
    }
}
