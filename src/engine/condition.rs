// src/engine/condition.rs

//! Conditions and the per-thread condition stack.
//!
//! A condition is a signal pending on a thread. While a thread has pending
//! conditions, the highest-priority one is handed to the top action's
//! `handle_condition` instead of calling `execute`. A thread whose
//! highest-priority condition is a hold is blocked.
//!
//! Priority, highest first:
//!
//! | kind            | priority | inheritable |
//! |-----------------|----------|-------------|
//! | HardHold        | 0        | no          |
//! | TerminateThread | 1        | no          |
//! | TerminateBlock  | 2        | no          |
//! | TimerExpired    | 3        | no          |
//! | Exception       | 4        | yes         |
//! | Rethrow         | 5        | yes         |
//! | Return          | 6        | no          |
//! | Break           | 7        | yes         |
//! | Continue        | 8        | yes         |
//! | Hold            | 9        | no          |
//!
//! Inheritable conditions still pending when a thread ends move to its
//! parent. Conditions marked `cascade` (block holds) are copied onto child
//! threads spawned while they are pending.

use std::fmt;

use crate::expr::Value;

use super::{ConditionId, TimedEventId};

/// Payload of a thrown exception.
#[derive(Debug, Clone, PartialEq)]
pub struct ExceptionInfo {
    pub name: String,
    pub data: Value,
    /// Location of the `throw` element.
    pub source: String,
    /// Call stack of the throwing thread, outermost first.
    pub stack_trace: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConditionKind {
    HardHold,
    TerminateThread,
    TerminateBlock { block: String },
    TimerExpired { timer: TimedEventId },
    Exception(ExceptionInfo),
    Rethrow,
    Return(Value),
    Break,
    Continue,
    Hold,
}

impl ConditionKind {
    pub fn priority(&self) -> u8 {
        match self {
            ConditionKind::HardHold => 0,
            ConditionKind::TerminateThread => 1,
            ConditionKind::TerminateBlock { .. } => 2,
            ConditionKind::TimerExpired { .. } => 3,
            ConditionKind::Exception(_) => 4,
            ConditionKind::Rethrow => 5,
            ConditionKind::Return(_) => 6,
            ConditionKind::Break => 7,
            ConditionKind::Continue => 8,
            ConditionKind::Hold => 9,
        }
    }

    pub fn is_inheritable(&self) -> bool {
        matches!(
            self,
            ConditionKind::Exception(_)
                | ConditionKind::Rethrow
                | ConditionKind::Break
                | ConditionKind::Continue
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            ConditionKind::HardHold => "HardHold",
            ConditionKind::TerminateThread => "TerminateThread",
            ConditionKind::TerminateBlock { .. } => "TerminateBlock",
            ConditionKind::TimerExpired { .. } => "TimerExpired",
            ConditionKind::Exception(_) => "Exception",
            ConditionKind::Rethrow => "Rethrow",
            ConditionKind::Return(_) => "Return",
            ConditionKind::Break => "Break",
            ConditionKind::Continue => "Continue",
            ConditionKind::Hold => "Hold",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    id: ConditionId,
    kind: ConditionKind,
    source: String,
    cascade: bool,
}

impl Condition {
    pub fn new(id: ConditionId, kind: ConditionKind, source: impl Into<String>) -> Self {
        Self {
            id,
            kind,
            source: source.into(),
            cascade: false,
        }
    }

    /// Mark the condition as copied onto child threads spawned while it is
    /// pending.
    pub fn cascading(mut self) -> Self {
        self.cascade = true;
        self
    }

    pub fn id(&self) -> ConditionId {
        self.id
    }

    pub fn kind(&self) -> &ConditionKind {
        &self.kind
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn cascades(&self) -> bool {
        self.cascade
    }

    pub fn priority(&self) -> u8 {
        self.kind.priority()
    }

    pub fn is_inheritable(&self) -> bool {
        self.kind.is_inheritable()
    }

    /// Hold and hard hold block the thread.
    pub fn is_hold(&self) -> bool {
        matches!(self.kind, ConditionKind::Hold | ConditionKind::HardHold)
    }

    pub fn exception(&self) -> Option<&ExceptionInfo> {
        match &self.kind {
            ConditionKind::Exception(info) => Some(info),
            _ => None,
        }
    }

    /// Same condition under a new identity.
    pub fn reissue(&self, id: ConditionId) -> Self {
        Self {
            id,
            ..self.clone()
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ConditionKind::Exception(info) => write!(
                f,
                "Exception '{}' (source: {}, data: {})",
                info.name, info.source, info.data
            ),
            ConditionKind::TerminateBlock { block } => {
                write!(f, "TerminateBlock '{block}' (source: {})", self.source)
            }
            kind => write!(f, "{} (source: {})", kind.name(), self.source),
        }
    }
}

/// Conditions of one thread, kept ordered by priority. Within one priority
/// the most recently added condition comes first.
#[derive(Debug, Clone, Default)]
pub struct ConditionStack {
    entries: Vec<Condition>,
}

impl ConditionStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a condition. Adding a condition whose id is already present is a
    /// no-op and returns false.
    pub fn add(&mut self, condition: Condition) -> bool {
        if self.contains(condition.id()) {
            return false;
        }
        let priority = condition.priority();
        let at = self
            .entries
            .iter()
            .position(|c| c.priority() >= priority)
            .unwrap_or(self.entries.len());
        self.entries.insert(at, condition);
        true
    }

    pub fn remove(&mut self, id: ConditionId) -> Option<Condition> {
        let at = self.entries.iter().position(|c| c.id() == id)?;
        Some(self.entries.remove(at))
    }

    pub fn contains(&self, id: ConditionId) -> bool {
        self.entries.iter().any(|c| c.id() == id)
    }

    /// Highest-priority condition.
    pub fn first(&self) -> Option<&Condition> {
        self.entries.first()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Condition> {
        self.entries.iter()
    }

    /// Keep only the conditions for which `keep` returns true.
    pub fn retain(&mut self, keep: impl FnMut(&Condition) -> bool) {
        self.entries.retain(keep);
    }

    pub fn has_inheritable(&self) -> bool {
        self.iter().any(Condition::is_inheritable)
    }

    /// Remove and return every inheritable condition, highest priority first.
    pub fn take_inheritable(&mut self) -> Vec<Condition> {
        let (taken, kept): (Vec<Condition>, Vec<Condition>) = self
            .entries
            .drain(..)
            .partition(Condition::is_inheritable);
        self.entries = kept;
        taken
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
