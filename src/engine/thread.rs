// src/engine/thread.rs

//! STAX-Thread state.
//!
//! A thread is a call stack of action frames plus a condition stack. Threads
//! live in the job's arena and refer to each other by number only.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{DateTime, Local};

use crate::actions::Action;
use crate::expr::Scope;

use super::{ConditionStack, FrameId, ThreadEnd, ThreadId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    /// Created but never scheduled.
    Created,
    /// Waiting in the run queue.
    Runnable,
    Running,
    /// Held, or waiting for child threads.
    Blocked,
    Complete,
}

/// One entry of a thread's call stack.
///
/// `action` is `None` only while the action is being called; the frame keeps
/// its slot so that actions pushed during the call land above it.
#[derive(Debug)]
pub(crate) struct Frame {
    pub(crate) id: FrameId,
    pub(crate) action: Option<Box<dyn Action>>,
}

/// Who is told when a thread completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Notifiee {
    /// The parent thread: drops the child from its child set.
    Parent(ThreadId),
    /// An action frame: receives `thread_complete`.
    Action { thread: ThreadId, frame: FrameId },
}

#[derive(Debug)]
pub(crate) struct StaxThread {
    pub(crate) id: ThreadId,
    pub(crate) parent: Option<ThreadId>,
    pub(crate) state: ThreadState,
    pub(crate) end: ThreadEnd,
    pub(crate) stack: Vec<Frame>,
    pub(crate) conditions: ConditionStack,
    pub(crate) children: BTreeSet<ThreadId>,
    pub(crate) notifiees: Vec<Notifiee>,
    pub(crate) scope: Scope,
    pub(crate) signal_handlers: BTreeMap<String, Arc<dyn Action>>,
    pub(crate) signal_stack: Vec<String>,
    /// Thread numbers from the root down to this thread, e.g. `1.2.5`.
    pub(crate) hierarchy: String,
    pub(crate) started: DateTime<Local>,
}

impl StaxThread {
    pub(crate) fn new(
        id: ThreadId,
        parent: Option<ThreadId>,
        scope: Scope,
        signal_handlers: BTreeMap<String, Arc<dyn Action>>,
        hierarchy: String,
    ) -> Self {
        Self {
            id,
            parent,
            state: ThreadState::Created,
            end: ThreadEnd::Normal,
            stack: Vec::new(),
            conditions: ConditionStack::new(),
            children: BTreeSet::new(),
            notifiees: Vec::new(),
            scope,
            signal_handlers,
            signal_stack: Vec::new(),
            hierarchy,
            started: Local::now(),
        }
    }

    pub(crate) fn frame_index(&self, frame: FrameId) -> Option<usize> {
        self.stack.iter().position(|f| f.id == frame)
    }

    pub(crate) fn info(&self) -> ThreadInfo {
        ThreadInfo {
            id: self.id,
            parent: self.parent,
            state: self.state,
            hierarchy: self.hierarchy.clone(),
            call_stack: self
                .stack
                .iter()
                .map(|f| match &f.action {
                    Some(action) => action.summary(),
                    None => "<running>".to_string(),
                })
                .collect(),
            conditions: self.conditions.iter().map(|c| c.to_string()).collect(),
            started: self.started,
        }
    }
}

/// Snapshot of a thread for external listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadInfo {
    pub id: ThreadId,
    pub parent: Option<ThreadId>,
    pub state: ThreadState,
    pub hierarchy: String,
    /// Outermost first.
    pub call_stack: Vec<String>,
    /// Highest priority first.
    pub conditions: Vec<String>,
    pub started: DateTime<Local>,
}
