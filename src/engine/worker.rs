// src/engine/worker.rs

use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::engine::runtime::EngineCommand;
use crate::work::{CancelFlag, Job, Outcome, WorkContext, WorkId};

/// Execute one claimed work item in its own task and report the outcome
/// back into the engine loop.
///
/// The callable runs on the blocking pool so it may compute or block freely
/// without stalling the engine. Every failure mode, including a panic, is
/// folded into a `WorkFinished` command; a work item can never take a
/// worker or the pool down with it.
pub(crate) fn spawn(
    id: WorkId,
    job: Job,
    cancel: CancelFlag,
    timeout: Option<Duration>,
    engine_tx: mpsc::Sender<EngineCommand>,
) {
    tokio::spawn(async move {
        let outcome = execute(id, job, cancel, timeout).await;
        if engine_tx
            .send(EngineCommand::WorkFinished { id, outcome })
            .await
            .is_err()
        {
            warn!(id = %id, "engine loop gone before completion could be reported");
        }
    });
}

async fn execute(id: WorkId, job: Job, cancel: CancelFlag, timeout: Option<Duration>) -> Outcome {
    // Dispatch-time checkpoint: a cancel that raced the claim wins here.
    if cancel.is_set() {
        debug!(id = %id, "cancelled before execution started");
        return Outcome::Cancelled;
    }

    // A timeout is just an automatic cancellation request on a timer.
    let timer = timeout.map(|after| {
        let flag = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            debug!(id = %id, ?after, "timeout elapsed; requesting cancellation");
            flag.set();
        })
    });

    let flag = cancel.clone();
    let joined = tokio::task::spawn_blocking(move || {
        let ctx = WorkContext::new(flag);
        job(&ctx)
    })
    .await;

    if let Some(timer) = timer {
        timer.abort();
    }

    match joined {
        Ok(Ok(())) => Outcome::Succeeded,
        // An error with the flag raised means the callable observed the
        // cancellation and bailed out: it never finished.
        Ok(Err(_)) if cancel.is_set() => Outcome::Cancelled,
        Ok(Err(message)) => Outcome::Failed(message),
        Err(join_error) => {
            warn!(id = %id, error = %join_error, "work item panicked");
            Outcome::Failed(format!("work item panicked: {join_error}"))
        }
    }
}
