// src/registry/blocks.rs

use std::collections::BTreeMap;

use chrono::{DateTime, Local};
use tracing::debug;

use crate::engine::{Condition, JobCommand, JobId, ThreadId, TimedEventId};

use super::JobComponent;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockState {
    Running,
    Held,
}

/// A block registered for its dynamic extent.
#[derive(Debug, Clone)]
pub struct BlockEntry {
    pub name: String,
    /// Thread running the `block` element.
    pub owner: ThreadId,
    pub state: BlockState,
    /// Added to the owner and every descendant while held.
    pub hold: Condition,
    /// Added to the owner when the block is terminated.
    pub terminate: Condition,
    /// Pending auto-release of a hold with a timeout.
    pub hold_timer: Option<TimedEventId>,
    pub terminating: bool,
    pub started: DateTime<Local>,
}

/// Snapshot of a block for external listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockInfo {
    pub name: String,
    pub owner: ThreadId,
    pub state: BlockState,
    pub terminating: bool,
    pub started: DateTime<Local>,
}

#[derive(Debug, Default)]
pub struct BlockRegistry {
    blocks: BTreeMap<String, BlockEntry>,
}

impl BlockRegistry {
    /// Register a block. Fails (returning the entry) if the name is taken.
    pub fn register(&mut self, entry: BlockEntry) -> Result<(), Box<BlockEntry>> {
        if self.blocks.contains_key(&entry.name) {
            return Err(Box::new(entry));
        }
        self.blocks.insert(entry.name.clone(), entry);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&BlockEntry> {
        self.blocks.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut BlockEntry> {
        self.blocks.get_mut(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<BlockEntry> {
        self.blocks.remove(name)
    }

    pub fn state(&self, name: &str) -> Option<BlockState> {
        self.blocks.get(name).map(|b| b.state)
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn infos(&self) -> Vec<BlockInfo> {
        self.blocks
            .values()
            .map(|b| BlockInfo {
                name: b.name.clone(),
                owner: b.owner,
                state: b.state,
                terminating: b.terminating,
                started: b.started,
            })
            .collect()
    }
}

impl JobComponent for BlockRegistry {
    fn name(&self) -> &'static str {
        "blocks"
    }

    fn init_job(&mut self, _job: JobId) {
        self.blocks.clear();
    }

    fn terminate_job(&mut self, job: JobId) -> Vec<JobCommand> {
        let commands = self
            .blocks
            .values()
            .filter_map(|b| b.hold_timer)
            .map(|id| JobCommand::CancelTimer { id })
            .collect();
        if !self.blocks.is_empty() {
            debug!(job, remaining = self.blocks.len(), "dropping blocks left at job end");
        }
        self.blocks.clear();
        commands
    }
}
