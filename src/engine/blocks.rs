// src/engine/blocks.rs

//! Block hold / release / terminate.
//!
//! A held block carries one hold condition that is added to the owning
//! thread and every descendant; new children of a held thread inherit it
//! because the condition cascades. Release removes it from the same set and
//! reschedules every thread it was removed from. Terminate only touches the
//! owning thread, whose `block` action unwinds it.

use std::time::Duration;

use chrono::Local;
use tracing::{debug, info};

use crate::events::{EventKind, LifecycleEvent};
use crate::registry::{BlockEntry, BlockState};

use super::job::TimerTarget;
use super::{
    Condition, ConditionId, ConditionKind, ControlError, Job, MAIN_BLOCK, ThreadId, TimedEventId,
};

impl Job {
    /// Register a block for its dynamic extent. Returns the ids of the
    /// block's hold and terminate conditions, or the diagnostic if the name
    /// is already in use.
    pub(crate) fn enter_block(
        &mut self,
        name: &str,
        owner: ThreadId,
    ) -> Result<(ConditionId, ConditionId), String> {
        if self.blocks.get(name).is_some() {
            return Err(format!("Block name '{name}' is already in use by another block"));
        }

        let source = format!("Block {name}");
        let hold = Condition::new(self.next_id(), ConditionKind::Hold, source.clone()).cascading();
        let terminate = Condition::new(
            self.next_id(),
            ConditionKind::TerminateBlock {
                block: name.to_string(),
            },
            source,
        );
        let ids = (hold.id(), terminate.id());

        let registered = self.blocks.register(BlockEntry {
            name: name.to_string(),
            owner,
            state: BlockState::Running,
            hold,
            terminate,
            hold_timer: None,
            terminating: false,
            started: Local::now(),
        });
        if registered.is_err() {
            return Err(format!("Block name '{name}' is already in use by another block"));
        }

        debug!(job = self.id(), block = name, thread = owner, "block entered");
        self.publish(
            LifecycleEvent::new(self.id(), EventKind::Block, name.to_string(), "begin")
                .with("thread", owner.to_string()),
        );
        Ok(ids)
    }

    /// Unregister a block. Any hold it still has is lifted.
    pub(crate) fn exit_block(&mut self, name: &str) {
        if self.blocks.state(name) == Some(BlockState::Held) {
            self.clear_hold(name);
        }
        let Some(entry) = self.blocks.remove(name) else {
            return;
        };
        if let Some(timer) = entry.hold_timer {
            self.cancel_timer(timer);
        }

        debug!(job = self.id(), block = name, "block exited");
        self.publish(LifecycleEvent::new(
            self.id(),
            EventKind::Block,
            name.to_string(),
            "end",
        ));
    }

    /// Hold a running block. A `timeout_ms` of 0 holds until released.
    pub fn hold_block(&mut self, name: &str, timeout_ms: u64) -> Result<(), ControlError> {
        let entry = self
            .blocks
            .get(name)
            .ok_or_else(|| ControlError::BlockNotFound(name.to_string()))?;
        if entry.terminating {
            return Err(ControlError::BlockAlreadyTerminating(name.to_string()));
        }
        if entry.state == BlockState::Held {
            return Err(ControlError::BlockAlreadyHeld(name.to_string()));
        }
        let owner = entry.owner;
        let hold = entry.hold.clone();

        let timer = (timeout_ms > 0).then(|| {
            self.schedule_timer(
                TimerTarget::BlockRelease {
                    block: name.to_string(),
                },
                Duration::from_millis(timeout_ms),
            )
        });
        if let Some(entry) = self.blocks.get_mut(name) {
            entry.state = BlockState::Held;
            entry.hold_timer = timer;
        }

        for thread in self.subtree(owner) {
            self.add_condition(thread, hold.clone());
        }

        info!(job = self.id(), block = name, timeout_ms, "block held");
        self.publish(
            LifecycleEvent::new(self.id(), EventKind::Block, name.to_string(), "held")
                .with("timeout_ms", timeout_ms.to_string()),
        );
        Ok(())
    }

    /// Release a held block.
    pub fn release_block(&mut self, name: &str) -> Result<(), ControlError> {
        match self.blocks.state(name) {
            None => return Err(ControlError::BlockNotFound(name.to_string())),
            Some(BlockState::Running) => return Err(ControlError::BlockNotHeld(name.to_string())),
            Some(BlockState::Held) => {}
        }

        self.clear_hold(name);
        info!(job = self.id(), block = name, "block released");
        self.publish(LifecycleEvent::new(
            self.id(),
            EventKind::Block,
            name.to_string(),
            "released",
        ));
        Ok(())
    }

    /// Terminate a block. A held block is released first so that its
    /// descendants can unwind.
    pub fn terminate_block(&mut self, name: &str, reason: Option<String>) -> Result<(), ControlError> {
        let entry = self
            .blocks
            .get(name)
            .ok_or_else(|| ControlError::BlockNotFound(name.to_string()))?;
        if entry.terminating {
            return Err(ControlError::BlockAlreadyTerminating(name.to_string()));
        }
        if entry.state == BlockState::Held {
            self.clear_hold(name);
        }

        let Some(entry) = self.blocks.get_mut(name) else {
            return Err(ControlError::BlockNotFound(name.to_string()));
        };
        entry.terminating = true;
        let owner = entry.owner;
        let condition = entry.terminate.clone();

        if name == MAIN_BLOCK {
            self.termination.get_or_insert(reason.clone());
        }
        self.add_condition(owner, condition);
        self.schedule(owner);

        info!(job = self.id(), block = name, reason = ?reason, "block terminating");
        let mut event = LifecycleEvent::new(self.id(), EventKind::Block, name.to_string(), "terminated");
        if let Some(reason) = reason {
            event = event.with("reason", reason);
        }
        self.publish(event);
        Ok(())
    }

    /// Auto-release after a hold timeout.
    pub(crate) fn hold_timed_out(&mut self, name: &str, timer: TimedEventId) {
        let current = self
            .blocks
            .get(name)
            .is_some_and(|b| b.state == BlockState::Held && b.hold_timer == Some(timer));
        if !current {
            debug!(job = self.id(), block = name, timer, "stale hold timeout ignored");
            return;
        }

        info!(job = self.id(), block = name, "hold timeout expired; releasing block");
        self.clear_hold(name);
        self.publish(
            LifecycleEvent::new(self.id(), EventKind::Block, name.to_string(), "released")
                .with("reason", "timeout"),
        );
    }

    fn clear_hold(&mut self, name: &str) {
        let Some(entry) = self.blocks.get_mut(name) else {
            return;
        };
        entry.state = BlockState::Running;
        let timer = entry.hold_timer.take();
        let owner = entry.owner;
        let hold = entry.hold.id();

        if let Some(timer) = timer {
            self.cancel_timer(timer);
        }
        for thread in self.subtree(owner) {
            if self.remove_condition(thread, hold) {
                self.schedule(thread);
            }
        }
    }
}
