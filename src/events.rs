// src/events.rs

//! Lifecycle events.
//!
//! Jobs publish an event whenever a job, thread, block, testcase, command
//! or sub-job changes state, and for `log` / `message` elements. Events are
//! handed to an [`EventSink`]; the default sink writes them through
//! `tracing`.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Mutex;

use chrono::{DateTime, Local};
use tracing::{info, warn};

use crate::engine::JobId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
    Job,
    Thread,
    Block,
    Testcase,
    TestcaseStatus,
    Command,
    SubJob,
    Breakpoint,
    Message,
    Log,
    Signal,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EventKind::Job => "job",
            EventKind::Thread => "thread",
            EventKind::Block => "block",
            EventKind::Testcase => "testcase",
            EventKind::TestcaseStatus => "tcstatus",
            EventKind::Command => "command",
            EventKind::SubJob => "subjob",
            EventKind::Breakpoint => "breakpoint",
            EventKind::Message => "message",
            EventKind::Log => "log",
            EventKind::Signal => "signal",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleEvent {
    pub job: JobId,
    pub kind: EventKind,
    /// Name of the entity the event is about (block name, thread number...).
    pub name: String,
    pub status: String,
    pub timestamp: DateTime<Local>,
    pub properties: BTreeMap<String, String>,
}

impl LifecycleEvent {
    pub fn new(
        job: JobId,
        kind: EventKind,
        name: impl Into<String>,
        status: impl Into<String>,
    ) -> Self {
        Self {
            job,
            kind,
            name: name.into(),
            status: status.into(),
            timestamp: Local::now(),
            properties: BTreeMap::new(),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }
}

/// Receiver of lifecycle events.
pub trait EventSink: Send + Sync {
    fn generate_event(&self, event: &LifecycleEvent);
}

/// Writes events as structured `tracing` records.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn generate_event(&self, event: &LifecycleEvent) {
        match event.kind {
            EventKind::Message => info!(
                job = event.job,
                message = event.property("text").unwrap_or_default(),
                "message"
            ),
            EventKind::Signal => warn!(
                job = event.job,
                signal = %event.name,
                status = %event.status,
                properties = ?event.properties,
                "signal"
            ),
            kind => info!(
                job = event.job,
                kind = %kind,
                name = %event.name,
                status = %event.status,
                properties = ?event.properties,
                "lifecycle event"
            ),
        }
    }
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct MemoryEventSink {
    events: Mutex<Vec<LifecycleEvent>>,
}

impl MemoryEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<LifecycleEvent> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn of_kind(&self, kind: EventKind) -> Vec<LifecycleEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.kind == kind)
            .collect()
    }
}

impl EventSink for MemoryEventSink {
    fn generate_event(&self, event: &LifecycleEvent) {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(event.clone());
    }
}
