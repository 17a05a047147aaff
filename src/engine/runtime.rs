// src/engine/runtime.rs

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use crate::engine::worker;
use crate::errors::{Error, Result};
use crate::graph::DependencyGraph;
use crate::queue::{QueueId, QueueKind, QueueRecord};
use crate::work::{Job, Outcome, Priority, WorkId, WorkRecord, WorkState};

/// Commands consumed by the engine loop.
///
/// Control commands (everything but `WorkFinished`) carry a oneshot reply:
/// the controller call returns only after the loop has applied the
/// transition, which is what makes e.g. cancellation of a `Pending` item
/// synchronous from the caller's point of view.
pub(crate) enum EngineCommand {
    CreateQueue {
        name: String,
        kind: QueueKind,
        reply: oneshot::Sender<Result<QueueId>>,
    },
    Submit {
        queue: QueueId,
        priority: Priority,
        dependencies: Vec<WorkId>,
        timeout: Option<Duration>,
        job: Job,
        reply: oneshot::Sender<Result<Admitted>>,
    },
    AddDependency {
        dependent: WorkId,
        dependency: WorkId,
        reply: oneshot::Sender<Result<()>>,
    },
    Cancel {
        id: WorkId,
        reply: oneshot::Sender<Result<()>>,
    },
    SetSuspended {
        queue: QueueId,
        suspended: bool,
        reply: oneshot::Sender<Result<()>>,
    },
    Shutdown {
        drain: bool,
        reply: oneshot::Sender<()>,
    },
    /// Sent by workers; never carries a reply.
    WorkFinished { id: WorkId, outcome: Outcome },
}

/// What the engine hands back for an accepted submission.
pub(crate) struct Admitted {
    pub id: WorkId,
    pub state_rx: watch::Receiver<WorkState>,
}

/// Spawn the engine loop and return its command channel.
pub(crate) fn spawn(workers: usize) -> mpsc::Sender<EngineCommand> {
    let (cmd_tx, cmd_rx) = mpsc::channel::<EngineCommand>(64);
    let engine = Engine::new(workers, cmd_tx.downgrade(), cmd_rx);
    tokio::spawn(engine.run());
    cmd_tx
}

/// The scheduling core.
///
/// Owns every queue record, work record and the dependency graph. All
/// mutation happens inside [`run`](Engine::run), so a `Ready → Running`
/// claim can never be raced: the loop is the single coordination point.
struct Engine {
    /// Global ceiling on simultaneously executing items.
    workers: usize,
    queues: HashMap<QueueId, QueueRecord>,
    /// Queue scan order; insertion-ordered so the round-robin cursor is
    /// stable.
    queue_ids: Vec<QueueId>,
    items: HashMap<WorkId, WorkRecord>,
    graph: DependencyGraph,

    next_queue_id: u64,
    /// Also serves as the admission sequence: ids are allocated in
    /// submission order.
    next_work_id: u64,
    /// Items currently executing, across all queues.
    running: usize,
    /// Rotates the queue scan start so a busy serial queue cannot shadow
    /// the others.
    scan_cursor: usize,

    shutting_down: bool,
    drain: bool,
    shutdown_replies: Vec<oneshot::Sender<()>>,

    /// Weak so an abandoned pool (all handles dropped, nothing running)
    /// closes the channel and lets the loop exit; running workers hold
    /// strong senders of their own.
    cmd_tx: mpsc::WeakSender<EngineCommand>,
    cmd_rx: mpsc::Receiver<EngineCommand>,
}

impl Engine {
    fn new(
        workers: usize,
        cmd_tx: mpsc::WeakSender<EngineCommand>,
        cmd_rx: mpsc::Receiver<EngineCommand>,
    ) -> Self {
        Self {
            workers,
            queues: HashMap::new(),
            queue_ids: Vec::new(),
            items: HashMap::new(),
            graph: DependencyGraph::new(),
            next_queue_id: 0,
            next_work_id: 0,
            running: 0,
            scan_cursor: 0,
            shutting_down: false,
            drain: false,
            shutdown_replies: Vec::new(),
            cmd_tx,
            cmd_rx,
        }
    }

    /// Main event loop: apply one command, dispatch whatever became
    /// eligible, exit once a requested shutdown has fully drained.
    async fn run(mut self) {
        info!(workers = self.workers, "dispatch engine started");

        while let Some(cmd) = self.cmd_rx.recv().await {
            self.handle(cmd);
            self.dispatch_eligible();
            if self.maybe_finish() {
                break;
            }
        }

        info!("dispatch engine stopped");
    }

    fn handle(&mut self, cmd: EngineCommand) {
        match cmd {
            EngineCommand::CreateQueue { name, kind, reply } => {
                let _ = reply.send(self.create_queue(name, kind));
            }
            EngineCommand::Submit {
                queue,
                priority,
                dependencies,
                timeout,
                job,
                reply,
            } => {
                let _ = reply.send(self.submit(queue, priority, dependencies, timeout, job));
            }
            EngineCommand::AddDependency {
                dependent,
                dependency,
                reply,
            } => {
                let _ = reply.send(self.add_dependency(dependent, dependency));
            }
            EngineCommand::Cancel { id, reply } => {
                let _ = reply.send(self.cancel(id));
            }
            EngineCommand::SetSuspended {
                queue,
                suspended,
                reply,
            } => {
                let _ = reply.send(self.set_suspended(queue, suspended));
            }
            EngineCommand::Shutdown { drain, reply } => {
                self.shutdown(drain, reply);
            }
            EngineCommand::WorkFinished { id, outcome } => {
                self.work_finished(id, outcome);
            }
        }
    }

    fn create_queue(&mut self, name: String, kind: QueueKind) -> Result<QueueId> {
        if self.shutting_down {
            return Err(Error::PoolClosed);
        }

        let record = QueueRecord::new(name, kind)?;
        let id = QueueId(self.next_queue_id);
        self.next_queue_id += 1;

        info!(queue = %id, name = %record.name, ?kind, "queue created");
        self.queue_ids.push(id);
        self.queues.insert(id, record);
        Ok(id)
    }

    fn submit(
        &mut self,
        queue: QueueId,
        priority: Priority,
        dependencies: Vec<WorkId>,
        timeout: Option<Duration>,
        job: Job,
    ) -> Result<Admitted> {
        if self.shutting_down {
            return Err(Error::QueueSuspended(queue));
        }
        if !self.queues.contains_key(&queue) {
            return Err(Error::QueueNotFound(queue));
        }
        for &dep in &dependencies {
            if !self.items.contains_key(&dep) {
                return Err(Error::UnknownWorkItem(dep));
            }
        }

        // Classify dependencies at admission time: already-succeeded ones
        // count as satisfied, a failed or cancelled one dooms the new item
        // immediately.
        let mut doomed = false;
        let mut unfinished = 0usize;
        for &dep in &dependencies {
            match self.items[&dep].state {
                WorkState::Succeeded => {}
                WorkState::Failed(_) | WorkState::Cancelled => doomed = true,
                _ => unfinished += 1,
            }
        }

        let initial = if doomed {
            WorkState::Cancelled
        } else if unfinished == 0 {
            WorkState::Ready
        } else {
            WorkState::Pending
        };

        let id = WorkId(self.next_work_id);
        self.next_work_id += 1;

        let (record, state_rx) = WorkRecord::new(id, queue, priority, timeout, job, initial);

        self.graph.add_node(id);
        for &dep in &dependencies {
            // A freshly created node has no dependents, so these edges can
            // never close a cycle; the check still guards the invariant.
            self.graph.add_edge(id, dep)?;
        }

        match record.state {
            WorkState::Cancelled => {
                record.cancel.set();
                warn!(
                    id = %id,
                    "submitted with a failed or cancelled dependency; admitted as Cancelled"
                );
            }
            _ => {
                if let Some(q) = self.queues.get_mut(&queue) {
                    q.admit(id);
                }
            }
        }

        debug!(id = %id, queue = %queue, ?priority, state = ?record.state, "work item admitted");
        self.items.insert(id, record);

        Ok(Admitted { id, state_rx })
    }

    fn add_dependency(&mut self, dependent: WorkId, dependency: WorkId) -> Result<()> {
        if !self.items.contains_key(&dependent) {
            return Err(Error::UnknownWorkItem(dependent));
        }
        if !self.items.contains_key(&dependency) {
            return Err(Error::UnknownWorkItem(dependency));
        }

        match self.items[&dependent].state {
            WorkState::Pending | WorkState::Ready => {}
            ref started => {
                return Err(Error::InvalidConfiguration(format!(
                    "cannot add dependency: {dependent} has already started ({started:?})"
                )));
            }
        }

        self.graph.add_edge(dependent, dependency)?;
        debug!(dependent = %dependent, dependency = %dependency, "dependency edge added");

        match self.items[&dependency].state.clone() {
            WorkState::Succeeded => {}
            WorkState::Failed(_) | WorkState::Cancelled => {
                self.cancel_queued(dependent);
            }
            _ => {
                // The one backward transition in the machine: a new
                // unfinished dependency re-blocks a Ready item.
                if let Some(record) = self.items.get_mut(&dependent)
                    && matches!(record.state, WorkState::Ready)
                {
                    record.transition(WorkState::Pending);
                }
            }
        }

        Ok(())
    }

    fn cancel(&mut self, id: WorkId) -> Result<()> {
        let state = match self.items.get(&id) {
            Some(record) => record.state.clone(),
            None => return Err(Error::UnknownWorkItem(id)),
        };

        match state {
            WorkState::Pending | WorkState::Ready => {
                info!(id = %id, "cancelling queued work item");
                self.cancel_queued(id);
            }
            WorkState::Running => {
                // Cooperative: raise the flag and let the callable notice.
                info!(id = %id, "cancellation requested for running work item");
                if let Some(record) = self.items.get(&id) {
                    record.cancel.set();
                }
            }
            terminal => {
                debug!(id = %id, state = ?terminal, "cancel on terminal item is a no-op");
            }
        }

        Ok(())
    }

    fn set_suspended(&mut self, queue: QueueId, suspended: bool) -> Result<()> {
        // A queue suspended mid-drain would stall shutdown forever.
        if self.shutting_down {
            return Err(Error::PoolClosed);
        }
        let q = self
            .queues
            .get_mut(&queue)
            .ok_or(Error::QueueNotFound(queue))?;
        q.suspended = suspended;
        info!(queue = %queue, name = %q.name, suspended, "queue suspension changed");
        Ok(())
    }

    fn shutdown(&mut self, drain: bool, reply: oneshot::Sender<()>) {
        info!(drain, "shutdown requested");
        self.shutting_down = true;
        self.shutdown_replies.push(reply);

        if drain {
            self.drain = true;
            for q in self.queues.values_mut() {
                if q.suspended {
                    info!(name = %q.name, "resuming suspended queue to drain it");
                    q.suspended = false;
                }
            }
        } else {
            let queued: Vec<WorkId> = self
                .items
                .values()
                .filter(|r| matches!(r.state, WorkState::Pending | WorkState::Ready))
                .map(|r| r.id)
                .collect();
            for id in queued {
                self.cancel_queued(id);
            }
        }
    }

    fn work_finished(&mut self, id: WorkId, outcome: Outcome) {
        let Some(record) = self.items.get_mut(&id) else {
            warn!(id = %id, "completion for unknown work item; ignoring");
            return;
        };

        let queue = record.queue;
        let terminal = match outcome {
            Outcome::Succeeded => WorkState::Succeeded,
            Outcome::Failed(msg) => WorkState::Failed(Arc::new(msg)),
            Outcome::Cancelled => WorkState::Cancelled,
        };
        let succeeded = matches!(terminal, WorkState::Succeeded);

        debug!(id = %id, state = ?terminal, "work item finished");
        record.transition(terminal);

        if let Some(q) = self.queues.get_mut(&queue) {
            q.running = q.running.saturating_sub(1);
        }
        self.running = self.running.saturating_sub(1);

        if succeeded {
            self.promote_dependents(id);
        } else {
            self.cascade_cancel(id);
        }
    }

    /// Cancel a `Pending`/`Ready` item: raise its flag, make it terminal,
    /// drop it from its queue's order, and cascade to its dependents.
    fn cancel_queued(&mut self, id: WorkId) {
        if let Some(record) = self.items.get_mut(&id) {
            record.cancel.set();
            record.transition(WorkState::Cancelled);
            let queue = record.queue;
            if let Some(q) = self.queues.get_mut(&queue) {
                q.remove(id);
            }
        }
        self.cascade_cancel(id);
    }

    /// Transitively cancel every not-yet-started dependent of a failed or
    /// cancelled item. Nothing is ever left `Pending` behind a dead
    /// dependency.
    fn cascade_cancel(&mut self, source: WorkId) {
        let mut stack = self.graph.dependents_of(source);

        while let Some(id) = stack.pop() {
            let Some(record) = self.items.get_mut(&id) else {
                continue;
            };
            match record.state {
                WorkState::Pending | WorkState::Ready => {
                    record.cancel.set();
                    record.transition(WorkState::Cancelled);
                    debug!(id = %id, upstream = %source, "cancelled by dependency failure");
                    let queue = record.queue;
                    if let Some(q) = self.queues.get_mut(&queue) {
                        q.remove(id);
                    }
                    stack.extend(self.graph.dependents_of(id));
                }
                _ => {}
            }
        }
    }

    /// After a success, move any dependent whose dependencies are now all
    /// satisfied from `Pending` to `Ready`.
    fn promote_dependents(&mut self, id: WorkId) {
        for dependent in self.graph.dependents_of(id) {
            let promotable = matches!(
                self.items.get(&dependent).map(|r| &r.state),
                Some(WorkState::Pending)
            ) && self.deps_satisfied(dependent);

            if promotable
                && let Some(record) = self.items.get_mut(&dependent)
            {
                record.transition(WorkState::Ready);
            }
        }
    }

    fn deps_satisfied(&self, id: WorkId) -> bool {
        self.graph.dependencies_of(id).iter().all(|dep| {
            matches!(
                self.items.get(dep).map(|r| &r.state),
                Some(WorkState::Succeeded)
            )
        })
    }

    /// Claim and hand out dispatchable items until either the worker
    /// ceiling is hit or nothing is eligible.
    fn dispatch_eligible(&mut self) {
        if self.shutting_down && !self.drain {
            return;
        }
        while self.running < self.workers {
            let Some((queue, id)) = self.next_dispatchable() else {
                break;
            };
            self.claim(queue, id);
        }
    }

    /// Pick the best dispatchable item across all queues: higher priority
    /// first, then earliest admission (smaller id). The scan starts at a
    /// rotating cursor so every queue gets looked at first in turn.
    fn next_dispatchable(&mut self) -> Option<(QueueId, WorkId)> {
        let n = self.queue_ids.len();
        if n == 0 {
            return None;
        }

        let mut best: Option<(Priority, WorkId, QueueId)> = None;

        for offset in 0..n {
            let queue_id = self.queue_ids[(self.scan_cursor + offset) % n];
            let Some(q) = self.queues.get(&queue_id) else {
                continue;
            };
            if !q.has_slot() {
                continue;
            }

            for id in q.dispatch_window() {
                let Some(record) = self.items.get(&id) else {
                    continue;
                };
                if !matches!(record.state, WorkState::Ready) {
                    continue;
                }
                let better = match best {
                    None => true,
                    Some((priority, admitted, _)) => {
                        record.priority > priority
                            || (record.priority == priority && id < admitted)
                    }
                };
                if better {
                    best = Some((record.priority, id, queue_id));
                }
            }
        }

        best.map(|(_, id, queue_id)| {
            self.scan_cursor = self.scan_cursor.wrapping_add(1);
            (queue_id, id)
        })
    }

    /// `Ready → Running`: take the job, account for the queue and pool
    /// slots, and hand the item to a worker.
    fn claim(&mut self, queue: QueueId, id: WorkId) {
        let Some(engine_tx) = self.cmd_tx.upgrade() else {
            // Every handle is gone and nothing is running; the loop is
            // about to wind down, so there is nobody to report to.
            return;
        };
        let Some(record) = self.items.get_mut(&id) else {
            return;
        };
        let Some(job) = record.job.take() else {
            warn!(id = %id, "claimed item has no job; skipping");
            return;
        };

        record.transition(WorkState::Running);
        let cancel = record.cancel.clone();
        let timeout = record.timeout;

        if let Some(q) = self.queues.get_mut(&queue) {
            q.remove(id);
            q.running += 1;
        }
        self.running += 1;

        debug!(id = %id, queue = %queue, in_flight = self.running, "dispatching work item");
        worker::spawn(id, job, cancel, timeout, engine_tx);
    }

    /// Once shutdown has been requested and every item is terminal, notify
    /// the waiters and let the loop exit.
    fn maybe_finish(&mut self) -> bool {
        if !self.shutting_down {
            return false;
        }
        if self.items.values().any(|r| !r.state.is_terminal()) {
            return false;
        }

        info!("all work terminal after shutdown; engine loop exiting");
        for reply in self.shutdown_replies.drain(..) {
            let _ = reply.send(());
        }
        true
    }
}
