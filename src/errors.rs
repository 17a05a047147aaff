// src/errors.rs

//! Crate-wide error taxonomy.
//!
//! Configuration and graph errors are synchronous return values to the
//! submitting caller. Execution errors never cross threads as panics: they
//! are captured per work item and surface only through
//! [`WorkHandle::wait`](crate::work::WorkHandle::wait) or an observer.

use thiserror::Error;

use crate::queue::QueueId;
use crate::work::WorkId;

#[derive(Debug, Error)]
pub enum Error {
    /// Bad limits at creation time; nothing was scheduled.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The requested dependency edge would make the graph cyclic; the graph
    /// was left unchanged.
    #[error("dependency of {dependent} on {dependency} would create a cycle")]
    CycleDetected {
        dependent: WorkId,
        dependency: WorkId,
    },

    /// The queue is no longer accepting work (pool shutdown requested).
    #[error("{0} is not accepting new work")]
    QueueSuspended(QueueId),

    #[error("no such queue: {0}")]
    QueueNotFound(QueueId),

    #[error("no such work item: {0}")]
    UnknownWorkItem(WorkId),

    /// The callable ran and returned an error (or panicked).
    #[error("work item failed: {0}")]
    ExecutionFailed(String),

    /// The work item never finished: cancelled before or during execution.
    #[error("work item was cancelled")]
    Cancelled,

    /// The scheduling pool has shut down; no further commands are accepted.
    #[error("pool is closed")]
    PoolClosed,
}

pub type Result<T> = std::result::Result<T, Error>;
