//! Dependency-graph job execution.
//!
//! A [`Job`] wraps one callback plus its edges to other jobs. Edges are
//! typed: a [`Edge::Strict`] prerequisite must succeed before the dependent
//! runs, an [`Edge::Unconditional`] prerequisite only has to reach a terminal
//! state (cleanup / finally semantics). A failed job fails every strict
//! descendant without running it, while unconditional descendants still run.
//!
//! The [`JobServer`] runs jobs on worker threads, one thread per running job,
//! bounded by a concurrency limit. Scheduling is event driven: new work is
//! admitted only when jobs are added or when a worker finishes. There is no
//! polling loop.
//!
//! ```text
//! crop_a ──┐
//!          ├──▶ render_1 ──┐
//! crop_b ──┘               ├──▶ merge_1 ──▶ finalize ┄┄▶ cleanup
//!             render_2 ────┘
//! ```
//!
//! (`┄┄▶` is an unconditional edge.)
//!
//! Edges must not form cycles. This is not checked: a cycle leaves its
//! members blocked forever and [`JobServer::await_completion`] never returns.

mod graph;
mod job;
mod server;

pub use job::{BoxError, Edge, Job, JobError, JobId, JobState};
pub use server::{
    FailedJob, JobServer, JobServerError, JobServerOptions, JobStats, ServerHandle, ServerSnapshot,
};

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock a mutex, recovering the guard if a panicking thread poisoned it.
///
/// Job callbacks run under `catch_unwind`, so poisoning can only come from a
/// bug in the scheduler itself; the protected state is still consistent at
/// every unlock point.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
