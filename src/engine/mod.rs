// src/engine/mod.rs

//! The dispatch engine.
//!
//! - [`runtime`] owns all mutable scheduling state (queues, work records,
//!   the dependency graph) inside a single event loop driven by an `mpsc`
//!   command channel; this loop is the one place where states transition
//!   and dispatch claims happen, so no claim can race another.
//! - [`worker`] executes a claimed work item on the blocking pool and
//!   reports the outcome back into the loop as a command.

pub(crate) mod runtime;
pub(crate) mod worker;
