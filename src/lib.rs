// src/lib.rs

//! `dispatchq`: a task scheduling core.
//!
//! Units of work are submitted to queues that enforce ordering and
//! concurrency bounds:
//!
//! - a *Serial* queue runs one item at a time, in admission order;
//! - a *Concurrent* queue runs up to its limit simultaneously;
//! - items may depend on other items across queues; the dependency graph
//!   stays acyclic, and a failed or cancelled dependency cancels its
//!   dependents instead of leaving them stuck;
//! - cancellation is cooperative: queued items are cancelled immediately,
//!   running callables observe a flag through their [`WorkContext`];
//! - the pool imposes a global worker ceiling on top of each queue's own
//!   limit.
//!
//! ```
//! use dispatchq::{Pool, PoolConfig, QueueKind};
//!
//! # #[tokio::main(flavor = "multi_thread", worker_threads = 2)]
//! # async fn main() -> dispatchq::Result<()> {
//! let pool = Pool::new(PoolConfig::new())?;
//! let queue = pool.create_queue("background", QueueKind::Serial).await?;
//!
//! let handle = pool.submit(queue, |_ctx| Ok(21 * 2)).await?;
//! assert_eq!(handle.wait().await?, 42);
//!
//! pool.shutdown(true).await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
mod engine;
pub mod errors;
pub mod graph;
pub mod logging;
pub mod pool;
pub mod queue;
pub mod work;

pub use config::PoolConfig;
pub use errors::{Error, Result};
pub use graph::DependencyGraph;
pub use pool::{Pool, SubmitOpts};
pub use queue::{QueueId, QueueKind};
pub use work::{Priority, WorkContext, WorkHandle, WorkId, WorkState};
