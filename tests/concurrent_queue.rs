use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dispatchq::{Pool, PoolConfig, Priority, QueueKind, SubmitOpts};

fn pool(workers: usize) -> Pool {
    Pool::new(PoolConfig::with_workers(workers)).expect("valid pool config")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn running_items_never_exceed_queue_limit() -> anyhow::Result<()> {
    const LIMIT: usize = 2;

    let pool = pool(8);
    let queue = pool
        .create_queue("bounded", QueueKind::Concurrent { limit: LIMIT })
        .await?;

    let in_flight = Arc::new(AtomicUsize::new(0));
    let high_water = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for _ in 0..6 {
        let in_flight = in_flight.clone();
        let high_water = high_water.clone();
        let handle = pool
            .submit(queue, move |_ctx| {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                high_water.fetch_max(now, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(30));
                in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            })
            .await?;
        handles.push(handle);
    }

    for handle in handles {
        handle.wait().await?;
    }

    let peak = high_water.load(Ordering::SeqCst);
    assert!(peak <= LIMIT, "peak concurrency {peak} exceeded limit {LIMIT}");
    assert!(peak >= 1);

    pool.shutdown(true).await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn global_worker_ceiling_caps_all_queues_together() -> anyhow::Result<()> {
    let pool = pool(2);
    let q1 = pool
        .create_queue("wide-1", QueueKind::Concurrent { limit: 8 })
        .await?;
    let q2 = pool
        .create_queue("wide-2", QueueKind::Concurrent { limit: 8 })
        .await?;

    let in_flight = Arc::new(AtomicUsize::new(0));
    let high_water = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for i in 0..8 {
        let in_flight = in_flight.clone();
        let high_water = high_water.clone();
        let queue = if i % 2 == 0 { q1 } else { q2 };
        let handle = pool
            .submit(queue, move |_ctx| {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                high_water.fetch_max(now, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(20));
                in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            })
            .await?;
        handles.push(handle);
    }

    for handle in handles {
        handle.wait().await?;
    }

    assert!(high_water.load(Ordering::SeqCst) <= 2);
    pool.shutdown(true).await?;
    Ok(())
}

#[tokio::test]
async fn higher_priority_is_dispatched_first() -> anyhow::Result<()> {
    let pool = pool(1);
    let queue = pool
        .create_queue("prioritised", QueueKind::Concurrent { limit: 1 })
        .await?;

    // Queue everything up while suspended so dispatch order is decided in
    // one scan, not by submission timing.
    pool.suspend(queue).await?;

    let order: Arc<Mutex<Vec<&'static str>>> = Arc::default();
    let mut handles = Vec::new();
    for (name, priority) in [
        ("low", Priority::Low),
        ("normal", Priority::Normal),
        ("high", Priority::High),
    ] {
        let order = order.clone();
        let handle = pool
            .submit_with(queue, SubmitOpts::priority(priority), move |_ctx| {
                order.lock().unwrap().push(name);
                Ok(())
            })
            .await?;
        handles.push(handle);
    }

    pool.resume(queue).await?;
    for handle in handles {
        handle.wait().await?;
    }

    assert_eq!(*order.lock().unwrap(), vec!["high", "normal", "low"]);
    pool.shutdown(true).await?;
    Ok(())
}

#[tokio::test]
async fn equal_priority_ties_break_on_admission_order() -> anyhow::Result<()> {
    let pool = pool(1);
    let queue = pool
        .create_queue("fifo-ties", QueueKind::Concurrent { limit: 1 })
        .await?;

    pool.suspend(queue).await?;

    let order: Arc<Mutex<Vec<usize>>> = Arc::default();
    let mut handles = Vec::new();
    for i in 0..4 {
        let order = order.clone();
        let handle = pool
            .submit(queue, move |_ctx| {
                order.lock().unwrap().push(i);
                Ok(())
            })
            .await?;
        handles.push(handle);
    }

    pool.resume(queue).await?;
    for handle in handles {
        handle.wait().await?;
    }

    assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3]);
    pool.shutdown(true).await?;
    Ok(())
}
