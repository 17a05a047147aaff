// src/queue/mod.rs

//! Queues: ordered admission points for work items.
//!
//! Semantics:
//! - A *Serial* queue runs at most one item at a time, in exactly the order
//!   items were admitted. The scheduler may only dispatch the head of the
//!   order, and only once the previously dispatched item is terminal.
//! - A *Concurrent* queue runs at most `limit` items simultaneously, with
//!   no ordering guarantee among them; dispatch eligibility is decided by
//!   priority, then admission order.
//! - Suspension blocks new dispatch, never submission and never items that
//!   are already running.

use std::collections::VecDeque;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::{Error, Result};
use crate::work::WorkId;

/// Unique identity of a queue within a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct QueueId(pub(crate) u64);

impl fmt::Display for QueueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "queue#{}", self.0)
    }
}

/// Execution discipline of a queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueueKind {
    /// One item at a time, strict FIFO.
    Serial,
    /// Up to `limit` items at a time, admission order not execution order.
    Concurrent { limit: usize },
}

/// Engine-side record for one queue. Owned by the engine loop.
#[derive(Debug)]
pub(crate) struct QueueRecord {
    pub name: String,
    pub kind: QueueKind,
    /// Effective concurrency bound: 1 for Serial, N for Concurrent.
    pub limit: usize,
    pub suspended: bool,
    /// Admitted-but-not-dispatched items, in admission order. Items leave
    /// the order when claimed by a worker or cancelled.
    pub order: VecDeque<WorkId>,
    /// Items from this queue currently executing.
    pub running: usize,
}

impl QueueRecord {
    pub fn new(name: String, kind: QueueKind) -> Result<Self> {
        let limit = match kind {
            QueueKind::Serial => 1,
            QueueKind::Concurrent { limit } => {
                if limit < 1 {
                    return Err(Error::InvalidConfiguration(format!(
                        "queue '{name}': concurrency limit must be >= 1 (got {limit})"
                    )));
                }
                limit
            }
        };

        Ok(Self {
            name,
            kind,
            limit,
            suspended: false,
            order: VecDeque::new(),
            running: 0,
        })
    }

    /// True when the queue itself permits another dispatch.
    pub fn has_slot(&self) -> bool {
        !self.suspended && self.running < self.limit
    }

    pub fn admit(&mut self, id: WorkId) {
        self.order.push_back(id);
    }

    /// Drop an item from the admission order (cancellation of a queued
    /// item). Predecessors and successors are unaffected.
    pub fn remove(&mut self, id: WorkId) {
        self.order.retain(|&queued| queued != id);
    }

    /// Items this queue is willing to offer the scheduler right now,
    /// in admission order. Readiness of the individual items is checked
    /// by the engine, which owns the item states.
    pub fn dispatch_window(&self) -> impl Iterator<Item = WorkId> + '_ {
        let len = match self.kind {
            // Strict FIFO: only ever the head.
            QueueKind::Serial => usize::from(!self.order.is_empty()),
            QueueKind::Concurrent { .. } => self.order.len(),
        };
        self.order.iter().take(len).copied()
    }
}
