// src/work/mod.rs

//! Work items: identity, priority, lifecycle state, cancellation, results.
//!
//! A work item is an opaque callable plus its scheduling metadata. The
//! engine owns the record; the submitting caller gets a
//! [`WorkHandle`] that can await or observe the outcome and receives the
//! callable's typed success value.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{oneshot, watch};
use tracing::debug;

use crate::errors::{Error, Result};
use crate::queue::QueueId;

/// Unique identity of a submitted work item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WorkId(pub(crate) u64);

impl fmt::Display for WorkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "work#{}", self.0)
    }
}

/// Dispatch priority. Higher priorities are preferred when multiple items
/// are eligible; ties are broken by admission order.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
}

/// Lifecycle state of a work item.
///
/// Transitions are monotonic and only ever applied by the engine loop:
/// `Pending → Ready → Running → {Succeeded | Failed | Cancelled}`, with
/// `Cancelled` also reachable directly from `Pending` and `Ready`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkState {
    /// Submitted, but waiting on unfinished dependencies.
    Pending,
    /// All dependencies succeeded; eligible for dispatch.
    Ready,
    /// Claimed by a worker and currently executing.
    Running,
    /// Terminal: the callable returned a value.
    Succeeded,
    /// Terminal: the callable returned an error (or panicked).
    Failed(Arc<String>),
    /// Terminal: cancelled before or during execution, or by a failed
    /// dependency.
    Cancelled,
}

impl WorkState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkState::Succeeded | WorkState::Failed(_) | WorkState::Cancelled
        )
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, WorkState::Cancelled)
    }
}

/// Terminal outcome reported by a worker back to the engine.
#[derive(Debug, Clone)]
pub(crate) enum Outcome {
    Succeeded,
    Failed(String),
    Cancelled,
}

/// Monotonic cancellation flag shared between the engine, the timeout timer,
/// and the executing callable. Never resets once raised.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Execution context handed to every callable.
///
/// Cancellation is cooperative: the callable is expected to call
/// [`is_cancelled`](WorkContext::is_cancelled) or
/// [`checkpoint`](WorkContext::checkpoint) at convenient points and exit
/// early when asked to stop.
#[derive(Debug, Clone)]
pub struct WorkContext {
    cancel: CancelFlag,
}

impl WorkContext {
    pub(crate) fn new(cancel: CancelFlag) -> Self {
        Self { cancel }
    }

    /// True once cancellation of this item has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_set()
    }

    /// Bail out with `?` when cancellation has been requested.
    ///
    /// The resulting early return is recorded as `Cancelled`, not `Failed`,
    /// because the flag is set when the callable's error reaches the worker.
    pub fn checkpoint(&self) -> anyhow::Result<()> {
        if self.cancel.is_set() {
            anyhow::bail!("cancellation requested");
        }
        Ok(())
    }
}

/// Type-erased callable as seen by the engine.
///
/// The typed success value has already been routed to the caller's
/// [`WorkHandle`] by the wrapper built in `Pool::submit_with`; the engine
/// only learns success-or-error-text.
pub(crate) type Job =
    Box<dyn FnOnce(&WorkContext) -> std::result::Result<(), String> + Send + 'static>;

/// Engine-side record for one work item.
///
/// Held exclusively by the engine loop; every state transition goes through
/// [`transition`](WorkRecord::transition) so the watch channel and the log
/// stay consistent with the state field.
pub(crate) struct WorkRecord {
    pub id: WorkId,
    pub queue: QueueId,
    pub priority: Priority,
    pub state: WorkState,
    pub cancel: CancelFlag,
    pub timeout: Option<Duration>,
    /// Taken by the engine when the item is claimed.
    pub job: Option<Job>,
    state_tx: watch::Sender<WorkState>,
}

impl WorkRecord {
    pub fn new(
        id: WorkId,
        queue: QueueId,
        priority: Priority,
        timeout: Option<Duration>,
        job: Job,
        initial: WorkState,
    ) -> (Self, watch::Receiver<WorkState>) {
        let (state_tx, state_rx) = watch::channel(initial.clone());
        let record = Self {
            id,
            queue,
            priority,
            state: initial,
            cancel: CancelFlag::new(),
            timeout,
            job: Some(job),
            state_tx,
        };
        (record, state_rx)
    }

    /// Apply a state transition and publish it to observers.
    ///
    /// Terminal states are write-once: a second transition on a terminal
    /// record is ignored.
    pub fn transition(&mut self, next: WorkState) {
        if self.state.is_terminal() {
            debug!(id = %self.id, state = ?self.state, "ignoring transition on terminal item");
            return;
        }
        debug!(id = %self.id, from = ?self.state, to = ?next, "work item transition");
        self.state = next.clone();
        let _ = self.state_tx.send(next);
    }
}

/// Caller-side handle for a submitted work item.
pub struct WorkHandle<T> {
    pub(crate) id: WorkId,
    pub(crate) state_rx: watch::Receiver<WorkState>,
    pub(crate) value_rx: oneshot::Receiver<T>,
}

impl<T> fmt::Debug for WorkHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkHandle")
            .field("id", &self.id)
            .field("state", &*self.state_rx.borrow())
            .finish()
    }
}

impl<T: Send + 'static> WorkHandle<T> {
    pub fn id(&self) -> WorkId {
        self.id
    }

    /// Snapshot of the item's current state.
    pub fn state(&self) -> WorkState {
        self.state_rx.borrow().clone()
    }

    /// Block (asynchronously) until the item is terminal and return its
    /// result: the callable's value on success, [`Error::ExecutionFailed`]
    /// on failure, [`Error::Cancelled`] if it never finished.
    pub async fn wait(mut self) -> Result<T> {
        let terminal = self
            .state_rx
            .wait_for(WorkState::is_terminal)
            .await
            .map_err(|_| Error::PoolClosed)?
            .clone();

        match terminal {
            WorkState::Succeeded => self.value_rx.await.map_err(|_| Error::PoolClosed),
            WorkState::Failed(msg) => Err(Error::ExecutionFailed(msg.to_string())),
            WorkState::Cancelled => Err(Error::Cancelled),
            other => unreachable!("wait_for returned non-terminal state {other:?}"),
        }
    }

    /// Non-blocking completion notification: runs `callback` with the
    /// terminal state once the item finishes.
    pub fn observe(&self, callback: impl FnOnce(WorkState) + Send + 'static) {
        let mut rx = self.state_rx.clone();
        tokio::spawn(async move {
            if let Ok(state) = rx.wait_for(WorkState::is_terminal).await {
                callback(state.clone());
            }
        });
    }
}
