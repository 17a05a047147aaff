// src/pool.rs

//! Public controller surface.
//!
//! A [`Pool`] is a cloneable handle over the engine's command channel.
//! Every call round-trips through the engine loop, so when a call returns
//! the corresponding transition has been applied: after `cancel` on a
//! `Pending` item returns, the item *is* `Cancelled`.

use std::time::Duration;

use tokio::sync::{mpsc, oneshot};

use crate::config::PoolConfig;
use crate::engine::runtime::{self, EngineCommand};
use crate::errors::{Error, Result};
use crate::queue::{QueueId, QueueKind};
use crate::work::{Job, Priority, WorkContext, WorkHandle, WorkId};

/// Submission options: priority, dependencies, optional timeout.
#[derive(Debug, Clone, Default)]
pub struct SubmitOpts {
    pub priority: Priority,
    /// Items that must succeed before this one may start. A failed or
    /// cancelled dependency cancels this item instead.
    pub dependencies: Vec<WorkId>,
    /// Armed at dispatch time as an automatic cancellation request.
    pub timeout: Option<Duration>,
}

impl SubmitOpts {
    pub fn priority(priority: Priority) -> Self {
        Self {
            priority,
            ..Self::default()
        }
    }

    pub fn after(dependencies: impl IntoIterator<Item = WorkId>) -> Self {
        Self {
            dependencies: dependencies.into_iter().collect(),
            ..Self::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Handle to a running scheduling pool.
#[derive(Debug, Clone)]
pub struct Pool {
    cmd_tx: mpsc::Sender<EngineCommand>,
}

impl Pool {
    /// Validate the configuration and start the engine loop.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(config: PoolConfig) -> Result<Self> {
        config.validate()?;
        let cmd_tx = runtime::spawn(config.effective_workers());
        Ok(Self { cmd_tx })
    }

    /// Create a queue. A `Concurrent` kind with a zero limit is rejected
    /// with [`Error::InvalidConfiguration`].
    pub async fn create_queue(
        &self,
        name: impl Into<String>,
        kind: QueueKind,
    ) -> Result<QueueId> {
        let name = name.into();
        self.request(|reply| EngineCommand::CreateQueue { name, kind, reply })
            .await?
    }

    /// Submit a callable with default options (normal priority, no
    /// dependencies, no timeout).
    pub async fn submit<T, F>(&self, queue: QueueId, job: F) -> Result<WorkHandle<T>>
    where
        T: Send + 'static,
        F: FnOnce(&WorkContext) -> anyhow::Result<T> + Send + 'static,
    {
        self.submit_with(queue, SubmitOpts::default(), job).await
    }

    /// Submit a callable.
    ///
    /// The callable's `Ok` value is delivered through the returned
    /// [`WorkHandle`]; its `Err` is recorded as the item's failure. The
    /// engine itself only sees success-or-error-text.
    pub async fn submit_with<T, F>(
        &self,
        queue: QueueId,
        opts: SubmitOpts,
        job: F,
    ) -> Result<WorkHandle<T>>
    where
        T: Send + 'static,
        F: FnOnce(&WorkContext) -> anyhow::Result<T> + Send + 'static,
    {
        let (value_tx, value_rx) = oneshot::channel::<T>();
        let boxed: Job = Box::new(move |ctx| match job(ctx) {
            Ok(value) => {
                // The receiver may be gone (caller dropped the handle);
                // the outcome still counts as success.
                let _ = value_tx.send(value);
                Ok(())
            }
            Err(error) => Err(format!("{error:#}")),
        });

        let admitted = self
            .request(|reply| EngineCommand::Submit {
                queue,
                priority: opts.priority,
                dependencies: opts.dependencies,
                timeout: opts.timeout,
                job: boxed,
                reply,
            })
            .await??;

        Ok(WorkHandle {
            id: admitted.id,
            state_rx: admitted.state_rx,
            value_rx,
        })
    }

    /// Make `dependent` wait for `dependency`. Fails with
    /// [`Error::CycleDetected`] if the edge would close a cycle, leaving
    /// the graph unchanged; only valid while `dependent` has not started.
    pub async fn add_dependency(&self, dependent: WorkId, dependency: WorkId) -> Result<()> {
        self.request(|reply| EngineCommand::AddDependency {
            dependent,
            dependency,
            reply,
        })
        .await?
    }

    /// Request cancellation of a work item.
    ///
    /// Queued items are `Cancelled` by the time this returns; a running
    /// item has its flag raised and finishes cooperatively; a terminal
    /// item is left untouched.
    pub async fn cancel(&self, id: WorkId) -> Result<()> {
        self.request(|reply| EngineCommand::Cancel { id, reply })
            .await?
    }

    /// Stop dispatching from a queue. Running items are unaffected and
    /// submission stays open; queued items simply wait.
    pub async fn suspend(&self, queue: QueueId) -> Result<()> {
        self.request(|reply| EngineCommand::SetSuspended {
            queue,
            suspended: true,
            reply,
        })
        .await?
    }

    pub async fn resume(&self, queue: QueueId) -> Result<()> {
        self.request(|reply| EngineCommand::SetSuspended {
            queue,
            suspended: false,
            reply,
        })
        .await?
    }

    /// Shut the pool down and wait for it to finish.
    ///
    /// New submissions are rejected from this point on. With `drain` set,
    /// everything already admitted runs to completion first (suspended
    /// queues are resumed for the purpose); without it, every item that is
    /// not currently running is cancelled immediately and only in-flight
    /// items are awaited.
    pub async fn shutdown(&self, drain: bool) -> Result<()> {
        self.request(|reply| EngineCommand::Shutdown { drain, reply })
            .await
    }

    async fn request<R>(
        &self,
        command: impl FnOnce(oneshot::Sender<R>) -> EngineCommand,
    ) -> Result<R> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(command(reply_tx))
            .await
            .map_err(|_| Error::PoolClosed)?;
        reply_rx.await.map_err(|_| Error::PoolClosed)
    }
}
