// src/engine/timed_events.rs

//! Timed event queue.
//!
//! One tokio task per service owns a binary heap of pending timed events
//! ordered by deadline, with an insertion sequence number breaking ties.
//! When an event comes due it is delivered to its job as
//! [`JobEvent::TimerFired`]. Cancelled events are dropped from the pending
//! map; their heap entries are skipped when they surface.

use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, info, trace};

use super::{JobEvent, JobId, TimedEventId};

type Key = (JobId, TimedEventId);

#[derive(Debug)]
enum QueueCommand {
    Add {
        key: Key,
        deadline: Instant,
        notify: mpsc::Sender<JobEvent>,
    },
    Cancel {
        key: Key,
    },
}

#[derive(Debug, PartialEq, Eq)]
struct Scheduled {
    deadline: Instant,
    seq: u64,
    key: Key,
}

impl Ord for Scheduled {
    fn cmp(&self, other: &Self) -> Ordering {
        self.deadline
            .cmp(&other.deadline)
            .then(self.seq.cmp(&other.seq))
    }
}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Handle to the timed event task. Cloning shares the same queue.
#[derive(Debug, Clone)]
pub struct TimedEventQueue {
    tx: mpsc::UnboundedSender<QueueCommand>,
}

impl TimedEventQueue {
    /// Spawn the queue task. The task stops once every handle is dropped.
    pub fn spawn() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_queue(rx));
        Self { tx }
    }

    /// Deliver `TimerFired { id }` to `notify` after `after`.
    pub fn add(&self, job: JobId, id: TimedEventId, after: Duration, notify: mpsc::Sender<JobEvent>) {
        let command = QueueCommand::Add {
            key: (job, id),
            deadline: Instant::now() + after,
            notify,
        };
        if self.tx.send(command).is_err() {
            debug!(job, timer = id, "timed event queue is gone; event not scheduled");
        }
    }

    pub fn cancel(&self, job: JobId, id: TimedEventId) {
        if self.tx.send(QueueCommand::Cancel { key: (job, id) }).is_err() {
            debug!(job, timer = id, "timed event queue is gone; nothing to cancel");
        }
    }
}

async fn run_queue(mut rx: mpsc::UnboundedReceiver<QueueCommand>) {
    info!("timed event queue started");

    let mut heap: BinaryHeap<Reverse<Scheduled>> = BinaryHeap::new();
    let mut pending: HashMap<Key, mpsc::Sender<JobEvent>> = HashMap::new();
    let mut seq: u64 = 0;

    loop {
        let next_deadline = heap.peek().map(|Reverse(s)| s.deadline);

        tokio::select! {
            command = rx.recv() => match command {
                Some(QueueCommand::Add { key, deadline, notify }) => {
                    seq += 1;
                    trace!(job = key.0, timer = key.1, seq, "timed event added");
                    pending.insert(key, notify);
                    heap.push(Reverse(Scheduled { deadline, seq, key }));
                }
                Some(QueueCommand::Cancel { key }) => {
                    if pending.remove(&key).is_some() {
                        trace!(job = key.0, timer = key.1, "timed event cancelled");
                    }
                }
                None => break,
            },
            _ = async {
                match next_deadline {
                    Some(deadline) => sleep_until(deadline).await,
                    None => std::future::pending::<()>().await,
                }
            } => {
                let now = Instant::now();
                while heap.peek().is_some_and(|Reverse(s)| s.deadline <= now) {
                    let Some(Reverse(due)) = heap.pop() else {
                        break;
                    };
                    let Some(notify) = pending.remove(&due.key) else {
                        continue;
                    };
                    let (job, id) = due.key;
                    trace!(job, timer = id, "timed event fired");
                    if notify.send(JobEvent::TimerFired { id }).await.is_err() {
                        debug!(job, timer = id, "job finished before its timed event fired");
                    }
                }
            }
        }
    }

    info!(pending = pending.len(), "timed event queue finished (all handles dropped)");
}
