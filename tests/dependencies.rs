use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::bail;
use dispatchq::{Error, Pool, PoolConfig, QueueKind, SubmitOpts, WorkState};

fn pool(workers: usize) -> Pool {
    Pool::new(PoolConfig::with_workers(workers)).expect("valid pool config")
}

#[tokio::test]
async fn chain_runs_in_dependency_order_across_queues() -> anyhow::Result<()> {
    let pool = pool(4);
    let q1 = pool.create_queue("serial", QueueKind::Serial).await?;
    let q2 = pool
        .create_queue("wide", QueueKind::Concurrent { limit: 4 })
        .await?;

    let order: Arc<Mutex<Vec<&'static str>>> = Arc::default();

    let o = order.clone();
    let a = pool
        .submit(q1, move |_ctx| {
            std::thread::sleep(Duration::from_millis(20));
            o.lock().unwrap().push("a");
            Ok(1u32)
        })
        .await?;

    let o = order.clone();
    let b = pool
        .submit_with(q2, SubmitOpts::after([a.id()]), move |_ctx| {
            o.lock().unwrap().push("b");
            Ok(2u32)
        })
        .await?;

    let o = order.clone();
    let c = pool
        .submit_with(q2, SubmitOpts::after([b.id()]), move |_ctx| {
            o.lock().unwrap().push("c");
            Ok(3u32)
        })
        .await?;

    assert_eq!(a.wait().await?, 1);
    assert_eq!(b.wait().await?, 2);
    assert_eq!(c.wait().await?, 3);
    assert_eq!(*order.lock().unwrap(), vec!["a", "b", "c"]);

    pool.shutdown(true).await?;
    Ok(())
}

#[tokio::test]
async fn failed_dependency_cancels_dependents_without_running_them() -> anyhow::Result<()> {
    let pool = pool(4);
    let queue = pool
        .create_queue("wide", QueueKind::Concurrent { limit: 4 })
        .await?;

    let a = pool
        .submit(queue, |_ctx| -> anyhow::Result<()> { bail!("deliberate failure") })
        .await?;

    let b_ran = Arc::new(AtomicBool::new(false));
    let ran = b_ran.clone();
    let b = pool
        .submit_with(queue, SubmitOpts::after([a.id()]), move |_ctx| {
            ran.store(true, Ordering::SeqCst);
            Ok(())
        })
        .await?;

    // Transitive dependent behind b.
    let c = pool
        .submit_with(queue, SubmitOpts::after([b.id()]), |_ctx| Ok(()))
        .await?;

    let a_err = a.wait().await.unwrap_err();
    assert!(matches!(a_err, Error::ExecutionFailed(ref msg) if msg.contains("deliberate failure")));

    assert!(matches!(b.wait().await.unwrap_err(), Error::Cancelled));
    assert!(matches!(c.wait().await.unwrap_err(), Error::Cancelled));
    assert!(!b_ran.load(Ordering::SeqCst), "dependent callable must never run");

    pool.shutdown(true).await?;
    Ok(())
}

#[tokio::test]
async fn dependency_on_terminal_items_is_resolved_at_submission() -> anyhow::Result<()> {
    let pool = pool(2);
    let queue = pool
        .create_queue("wide", QueueKind::Concurrent { limit: 2 })
        .await?;

    let ok = pool.submit(queue, |_ctx| Ok(7)).await?;
    let ok_id = ok.id();
    assert_eq!(ok.wait().await?, 7);

    let failed = pool
        .submit(queue, |_ctx| -> anyhow::Result<()> { bail!("boom") })
        .await?;
    let failed_id = failed.id();
    assert!(failed.wait().await.is_err());

    // An already-succeeded dependency counts as satisfied.
    let after_ok = pool
        .submit_with(queue, SubmitOpts::after([ok_id]), |_ctx| Ok("ran"))
        .await?;
    assert_eq!(after_ok.wait().await?, "ran");

    // An already-failed one dooms the submission immediately.
    let after_failed = pool
        .submit_with(queue, SubmitOpts::after([failed_id]), |_ctx| Ok("never"))
        .await?;
    assert_eq!(after_failed.state(), WorkState::Cancelled);
    assert!(matches!(after_failed.wait().await.unwrap_err(), Error::Cancelled));

    pool.shutdown(true).await?;
    Ok(())
}

#[tokio::test]
async fn cycle_is_rejected_and_scheduling_still_works() -> anyhow::Result<()> {
    let pool = pool(2);
    let queue = pool.create_queue("serial", QueueKind::Serial).await?;

    // Suspend so neither item starts before we try to close the cycle.
    pool.suspend(queue).await?;

    let a = pool.submit(queue, |_ctx| Ok("a")).await?;
    let b = pool
        .submit_with(queue, SubmitOpts::after([a.id()]), |_ctx| Ok("b"))
        .await?;

    let err = pool.add_dependency(a.id(), b.id()).await.unwrap_err();
    assert!(matches!(err, Error::CycleDetected { .. }));

    // The failed attempt left the graph as it was: the chain still runs.
    pool.resume(queue).await?;
    assert_eq!(a.wait().await?, "a");
    assert_eq!(b.wait().await?, "b");

    pool.shutdown(true).await?;
    Ok(())
}

#[tokio::test]
async fn dependency_added_after_submission_reblocks_and_orders() -> anyhow::Result<()> {
    let pool = pool(2);
    let queue = pool
        .create_queue("wide", QueueKind::Concurrent { limit: 2 })
        .await?;

    // Both items are admitted independently; neither starts while suspended.
    pool.suspend(queue).await?;

    let order: Arc<Mutex<Vec<&'static str>>> = Arc::default();

    let o = order.clone();
    let a = pool
        .submit(queue, move |_ctx| {
            std::thread::sleep(Duration::from_millis(20));
            o.lock().unwrap().push("a");
            Ok(())
        })
        .await?;

    let o = order.clone();
    let b = pool
        .submit(queue, move |_ctx| {
            o.lock().unwrap().push("b");
            Ok(())
        })
        .await?;
    assert_eq!(b.state(), WorkState::Ready);

    // Wiring an unfinished dependency re-blocks the Ready item.
    pool.add_dependency(b.id(), a.id()).await?;
    assert_eq!(b.state(), WorkState::Pending);

    pool.resume(queue).await?;
    a.wait().await?;
    let b_id = b.id();
    b.wait().await?;
    assert_eq!(*order.lock().unwrap(), vec!["a", "b"]);

    // Once an item has started there is nothing left to order.
    let late = pool.submit(queue, |_ctx| Ok(())).await?;
    let err = pool.add_dependency(b_id, late.id()).await.unwrap_err();
    assert!(matches!(err, Error::InvalidConfiguration(_)));
    late.wait().await?;

    pool.shutdown(true).await?;
    Ok(())
}

#[tokio::test]
async fn unknown_dependency_is_rejected() -> anyhow::Result<()> {
    let other_pool = pool(1);
    let other_queue = other_pool.create_queue("other", QueueKind::Serial).await?;
    let foreign = other_pool.submit(other_queue, |_ctx| Ok(())).await?;

    let pool = pool(1);
    let queue = pool.create_queue("serial", QueueKind::Serial).await?;

    let err = pool
        .submit_with(queue, SubmitOpts::after([foreign.id()]), |_ctx| Ok(()))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::UnknownWorkItem(_)));

    other_pool.shutdown(true).await?;
    pool.shutdown(true).await?;
    Ok(())
}
