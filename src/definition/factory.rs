// src/definition/factory.rs

//! Turns [`ActionNode`] trees into immutable action templates.
//!
//! Structural problems (unknown elements, missing required attributes,
//! wrong number of children) are reported here, at load time. Everything
//! that depends on run-time values is checked by the actions themselves.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::trace;

use crate::actions::{
    Action, BlockAction, BlockControlAction, BlockOp, Branch, BreakAction, BreakpointAction,
    CallAction, CallArgs, CatchAction, ContinueAction, FinallyAction, IfAction, ImportAction,
    ImportSpec, IterateAction, LogAction, LoopAction, LoopSpec, MessageAction, NameSpec, NopAction, ParallelAction,
    ParallelIterateAction, RaiseAction, RethrowAction, ReturnAction, ScriptAction,
    SequenceAction, SignalHandlerAction, SourceLocation, StafCmdAction, SubJobAction, SubJobSpec,
    TcStatusAction, TestcaseAction, ThrowAction, TimerAction, TryAction,
};
use crate::errors::Result;

use super::node::ActionNode;

/// Where the nodes being built come from.
#[derive(Debug, Clone)]
pub struct BuildContext {
    pub file: PathBuf,
    pub machine: String,
}

impl BuildContext {
    pub fn new(file: impl Into<PathBuf>, machine: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            machine: machine.into(),
        }
    }

    pub fn location(&self, node: &ActionNode) -> Arc<SourceLocation> {
        Arc::new(SourceLocation {
            element: node.element.clone(),
            file: self.file.clone(),
            machine: self.machine.clone(),
            line: node.line,
            child_lines: node.child_lines(),
        })
    }
}

pub fn build_action(node: &ActionNode, ctx: &BuildContext) -> Result<Arc<dyn Action>> {
    trace!(element = %node.element, line = node.line, "building action");
    let location = ctx.location(node);

    let action: Arc<dyn Action> = match node.element.as_str() {
        "sequence" => Arc::new(SequenceAction::new(location, build_children(node, ctx)?)),
        "parallel" => Arc::new(ParallelAction::new(location, build_children(node, ctx)?)),
        "if" => build_if(node, ctx, location)?,
        "loop" => {
            let spec = LoopSpec {
                var: node.get("var"),
                from: node.get("from"),
                to: node.get("to"),
                by: node.get("by"),
                while_expr: node.get("while"),
                until_expr: node.get("until"),
            };
            Arc::new(LoopAction::new(location, spec, single_child(node, ctx)?))
        }
        "iterate" => Arc::new(IterateAction::new(
            location,
            node.required("var")?,
            node.required("in")?,
            node.get("indexvar"),
            single_child(node, ctx)?,
        )),
        "paralleliterate" => Arc::new(ParallelIterateAction::new(
            location,
            node.required("var")?,
            node.required("in")?,
            node.get("indexvar"),
            node.get("maxthreads"),
            single_child(node, ctx)?,
        )),
        "break" => Arc::new(BreakAction::new(location)),
        "continue" => Arc::new(ContinueAction::new(location)),
        "block" => Arc::new(BlockAction::new(
            location,
            NameSpec::Expression(node.required("name")?),
            single_child(node, ctx)?,
        )),
        "hold" => block_control(node, location, BlockOp::Hold),
        "release" => block_control(node, location, BlockOp::Release),
        "terminate" => block_control(node, location, BlockOp::Terminate),
        "try" => build_try(node, ctx, location)?,
        "throw" => Arc::new(ThrowAction::new(
            location,
            NameSpec::Expression(node.required("exception")?),
            node.attr_or_text("data"),
        )),
        "rethrow" => Arc::new(RethrowAction::new(location)),
        "timer" => Arc::new(TimerAction::new(
            location,
            node.required("duration")?,
            single_child(node, ctx)?,
        )),
        "call" => Arc::new(CallAction::new(
            location,
            NameSpec::Expression(node.required("function")?),
            node.attr_or_text("args").map(CallArgs::Single).unwrap_or_default(),
        )),
        "call-with-list" => Arc::new(CallAction::new(
            location,
            NameSpec::Expression(node.required("function")?),
            CallArgs::Positional(call_list_args(node)?),
        )),
        "call-with-map" => Arc::new(CallAction::new(
            location,
            NameSpec::Expression(node.required("function")?),
            CallArgs::Named(call_map_args(node)?),
        )),
        "return" => Arc::new(ReturnAction::new(location, node.attr_or_text("value"))),
        "signalhandler" => Arc::new(SignalHandlerAction::new(
            location,
            NameSpec::Expression(node.required("signal")?),
            single_child(node, ctx)?,
        )),
        "raise" => Arc::new(RaiseAction::new(
            location,
            NameSpec::Expression(node.required("signal")?),
        )),
        "testcase" => Arc::new(TestcaseAction::new(
            location,
            NameSpec::Expression(node.required("name")?),
            node.get("mode"),
            single_child(node, ctx)?,
        )),
        "tcstatus" => Arc::new(TcStatusAction::new(
            location,
            node.required("result")?,
            node.attr_or_text("message"),
        )),
        "log" => Arc::new(LogAction::new(
            location,
            required_text(node, "text")?,
            node.get("level"),
            node.get("message"),
        )),
        "message" => Arc::new(MessageAction::new(location, required_text(node, "text")?)),
        "script" => Arc::new(ScriptAction::new(location, required_text(node, "code")?)),
        "nop" => Arc::new(NopAction::new(location)),
        "breakpoint" => Arc::new(BreakpointAction::new(location)),
        "stafcmd" => Arc::new(StafCmdAction::new(
            location,
            node.get("name"),
            node.required("location")?,
            node.required("service")?,
            node.required("request")?,
            node.get("var"),
        )),
        "job" => Arc::new(SubJobAction::new(
            location,
            SubJobSpec {
                file: node.required("file")?,
                name: node.get("name"),
                function: node.get("function"),
                args: node.get("args"),
                wait: node.get("wait"),
            },
        )),
        "process" => build_process(node, location)?,
        "import" => Arc::new(ImportAction::new(
            location,
            ImportSpec {
                file: node.required("file")?,
                mode: node.get("mode"),
                replace: node.get("replace"),
                include: node.get("include"),
                exclude: node.get("exclude"),
            },
        )),
        other => return Err(node.error(format!("unknown element \"{other}\""))),
    };
    Ok(action)
}

/// `process` is a `START COMMAND` request to the `PROCESS` service, on
/// `location` (default local). `parms` is appended to the command.
fn build_process(node: &ActionNode, location: Arc<SourceLocation>) -> Result<Arc<dyn Action>> {
    let command = node.required("command")?;
    let request = match node.get("parms") {
        Some(parms) => format!("'START COMMAND ' + ({command}) + ' ' + ({parms})"),
        None => format!("'START COMMAND ' + ({command})"),
    };
    Ok(Arc::new(StafCmdAction::new(
        location,
        node.get("name"),
        node.get("location").unwrap_or_else(|| "'local'".to_string()),
        "'PROCESS'".to_string(),
        request,
        node.get("var"),
    )))
}

fn build_children(node: &ActionNode, ctx: &BuildContext) -> Result<Vec<Arc<dyn Action>>> {
    node.children.iter().map(|c| build_action(c, ctx)).collect()
}

/// The one child of a wrapping element.
fn single_child(node: &ActionNode, ctx: &BuildContext) -> Result<Arc<dyn Action>> {
    match node.children.as_slice() {
        [child] => build_action(child, ctx),
        [] => Err(node.error("requires exactly one child element, found none")),
        children => Err(node.error(format!(
            "requires exactly one child element, found {}",
            children.len()
        ))),
    }
}

fn required_text(node: &ActionNode, attribute: &str) -> Result<String> {
    node.attr_or_text(attribute).ok_or_else(|| {
        node.error(format!("requires a \"{attribute}\" attribute or element text"))
    })
}

fn block_control(node: &ActionNode, location: Arc<SourceLocation>, op: BlockOp) -> Arc<dyn Action> {
    let timeout = match op {
        BlockOp::Hold => node.get("timeout"),
        BlockOp::Release | BlockOp::Terminate => None,
    };
    Arc::new(BlockControlAction::new(
        location,
        op,
        node.get("block"),
        node.get("if"),
        timeout,
    ))
}

/// `if` takes one guarded child, then any number of `elseif` and at most
/// one trailing `else`.
fn build_if(
    node: &ActionNode,
    ctx: &BuildContext,
    location: Arc<SourceLocation>,
) -> Result<Arc<dyn Action>> {
    let mut children = node.children.iter();
    let first = children
        .next()
        .ok_or_else(|| node.error("requires a child element"))?;
    let mut branches = vec![Branch {
        expr: node.required("expr")?,
        action: build_action(first, ctx)?,
    }];
    let mut otherwise = None;

    for child in children {
        if otherwise.is_some() {
            return Err(child.error("no element may follow <else>"));
        }
        match child.element.as_str() {
            "elseif" => branches.push(Branch {
                expr: child.required("expr")?,
                action: single_child(child, ctx)?,
            }),
            "else" => otherwise = Some(single_child(child, ctx)?),
            other => {
                return Err(child.error(format!(
                    "unexpected <{other}> inside <if>; expected <elseif> or <else>"
                )));
            }
        }
    }
    Ok(Arc::new(IfAction::new(location, branches, otherwise)))
}

/// `try` takes its body first, then `catch` elements, then an optional
/// `finally`. A `finally` wraps the whole try.
fn build_try(
    node: &ActionNode,
    ctx: &BuildContext,
    location: Arc<SourceLocation>,
) -> Result<Arc<dyn Action>> {
    let mut children = node.children.iter();
    let body = children
        .next()
        .ok_or_else(|| node.error("requires a body element"))
        .and_then(|child| build_action(child, ctx))?;

    let mut catches = Vec::new();
    let mut finally = None;
    for child in children {
        if finally.is_some() {
            return Err(child.error("no element may follow <finally>"));
        }
        match child.element.as_str() {
            "catch" => catches.push(CatchAction::new(
                ctx.location(child),
                child.required("exception")?,
                child.get("var"),
                child.get("typevar"),
                child.get("sourcevar"),
                single_child(child, ctx)?,
            )),
            "finally" => finally = Some((ctx.location(child), single_child(child, ctx)?)),
            other => {
                return Err(child.error(format!(
                    "unexpected <{other}> inside <try>; expected <catch> or <finally>"
                )));
            }
        }
    }

    match (catches.is_empty(), finally) {
        (true, None) => Err(node.error("requires at least one <catch> or a <finally>")),
        (false, None) => Ok(Arc::new(TryAction::new(location, body, catches))),
        (true, Some((finally_location, finally))) => {
            Ok(Arc::new(FinallyAction::new(finally_location, body, finally)))
        }
        (false, Some((finally_location, finally))) => {
            let guarded: Arc<dyn Action> = Arc::new(TryAction::new(location, body, catches));
            Ok(Arc::new(FinallyAction::new(finally_location, guarded, finally)))
        }
    }
}

/// Positional arguments: `arg` children whose text is the expression.
fn call_list_args(node: &ActionNode) -> Result<Vec<String>> {
    node.children
        .iter()
        .map(|child| {
            if child.element != "arg" {
                return Err(child.error("only <arg> elements are allowed in <call-with-list>"));
            }
            required_text(child, "value")
        })
        .collect()
}

/// Named arguments: `arg` children with a `name` attribute.
fn call_map_args(node: &ActionNode) -> Result<Vec<(String, String)>> {
    node.children
        .iter()
        .map(|child| {
            if child.element != "arg" {
                return Err(child.error("only <arg> elements are allowed in <call-with-map>"));
            }
            Ok((child.required("name")?, required_text(child, "value")?))
        })
        .collect()
}
