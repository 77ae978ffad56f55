//! Bounded-concurrency executor for job graphs.
//!
//! All scheduler state (queue, running set, counters) lives behind a single
//! mutex paired with a condition variable. Waiters block on the condvar;
//! every change that can end a wait calls `notify_all`.
//!
//! Admission (`start_jobs`) runs only when jobs are added or when a worker
//! finishes. Each admitted job gets its own thread, so a job may block
//! (e.g. on an external process) without stalling the scheduler.

use super::graph::GraphWriter;
use super::job::{Job, JobError, JobId, JobState};
use super::lock;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error, info, trace, warn};

#[derive(Error, Debug)]
pub enum JobServerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// Aggregate failure reported once all jobs drained.
    #[error("{failed} job(s) failed and {skipped} were skipped ({successful} succeeded)")]
    ExecutionFailed {
        successful: usize,
        failed: usize,
        skipped: usize,
        failures: Vec<FailedJob>,
    },
    /// The wait was abandoned; the listed jobs keep running.
    #[error("wait interrupted with {} running and {} queued job(s)", .snapshot.running.len(), .snapshot.queued.len())]
    WaitInterrupted { snapshot: ServerSnapshot },
}

/// Configuration for a [`JobServer`].
#[derive(Debug, Clone)]
pub struct JobServerOptions {
    /// Maximum simultaneously running jobs. `None` uses the hardware
    /// parallelism.
    pub concurrency: Option<usize>,
    /// Report an aggregate error from [`JobServer::await_completion`] when
    /// any job failed.
    pub raise_on_failure: bool,
    /// Append every job and edge to a Graphviz file.
    pub graph_file: Option<PathBuf>,
}

impl Default for JobServerOptions {
    fn default() -> Self {
        Self {
            concurrency: None,
            raise_on_failure: true,
            graph_file: None,
        }
    }
}

/// Outcome counters, cumulative over the server's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobStats {
    /// Callback returned `Ok`.
    pub successful: usize,
    /// Callback returned an error or panicked.
    pub failed: usize,
    /// Failed through a strict prerequisite without running.
    pub skipped: usize,
}

impl JobStats {
    pub fn total(&self) -> usize {
        self.successful + self.failed + self.skipped
    }

    pub fn all_succeeded(&self) -> bool {
        self.failed == 0 && self.skipped == 0
    }
}

impl fmt::Display for JobStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} succeeded, {} failed, {} skipped",
            self.successful, self.failed, self.skipped
        )
    }
}

/// A job that failed while running.
#[derive(Debug, Clone)]
pub struct FailedJob {
    pub id: JobId,
    pub label: Option<String>,
    pub error: JobError,
}

impl fmt::Display for FailedJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.label {
            Some(label) => write!(f, "{} ({}): {}", self.id, label, self.error),
            None => write!(f, "{}: {}", self.id, self.error),
        }
    }
}

/// Point-in-time view of in-flight jobs, as display strings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerSnapshot {
    pub running: Vec<String>,
    pub queued: Vec<String>,
}

impl ServerSnapshot {
    pub fn is_idle(&self) -> bool {
        self.running.is_empty() && self.queued.is_empty()
    }
}

#[derive(Default)]
struct ServerState {
    queued: Vec<Job>,
    running: HashMap<JobId, Job>,
    stats: JobStats,
    failures: Vec<FailedJob>,
}

impl ServerState {
    fn is_drained(&self) -> bool {
        self.queued.is_empty() && self.running.is_empty()
    }

    fn snapshot(&self) -> ServerSnapshot {
        let mut running: Vec<&Job> = self.running.values().collect();
        running.sort_by_key(|job| job.id());
        ServerSnapshot {
            running: running.iter().map(|job| job.to_string()).collect(),
            queued: self.queued.iter().map(|job| job.to_string()).collect(),
        }
    }
}

struct Shared {
    state: Mutex<ServerState>,
    cond: Condvar,
    limit: usize,
    raise_on_failure: bool,
    graph: Option<Mutex<GraphWriter>>,
}

impl Shared {
    fn wait<'a>(&self, guard: MutexGuard<'a, ServerState>) -> MutexGuard<'a, ServerState> {
        self.cond.wait(guard).unwrap_or_else(PoisonError::into_inner)
    }
}

/// Executes [`Job`] graphs on worker threads.
///
/// Dropping the server blocks until every submitted job has drained, so
/// work is never abandoned when a scope exits early (including by panic).
pub struct JobServer {
    shared: Arc<Shared>,
}

/// Cloneable, `Send` handle for submitting jobs from inside running jobs.
#[derive(Clone)]
pub struct ServerHandle {
    shared: Arc<Shared>,
}

impl ServerHandle {
    pub fn add_jobs<'a>(&self, jobs: impl IntoIterator<Item = &'a Job>) {
        add_jobs(&self.shared, jobs);
    }
}

impl JobServer {
    pub fn new(options: JobServerOptions) -> Result<Self, JobServerError> {
        let limit = options
            .concurrency
            .unwrap_or_else(default_concurrency)
            .max(1);
        let graph = match &options.graph_file {
            Some(path) => Some(Mutex::new(GraphWriter::create(path)?)),
            None => None,
        };
        debug!(limit, raise_on_failure = options.raise_on_failure, "job server started");
        Ok(Self {
            shared: Arc::new(Shared {
                state: Mutex::new(ServerState::default()),
                cond: Condvar::new(),
                limit,
                raise_on_failure: options.raise_on_failure,
                graph,
            }),
        })
    }

    /// Run `f` against a fresh server, then drain it.
    ///
    /// Returns `f`'s value, or the aggregate error if jobs failed and the
    /// server raises on failure.
    pub fn scope<T>(
        options: JobServerOptions,
        f: impl FnOnce(&JobServer) -> T,
    ) -> Result<T, JobServerError> {
        let server = JobServer::new(options)?;
        let value = f(&server);
        server.await_completion()?;
        Ok(value)
    }

    pub fn concurrency(&self) -> usize {
        self.shared.limit
    }

    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Register jobs plus every job connected to them, then start whatever
    /// is runnable.
    pub fn add_jobs<'a>(&self, jobs: impl IntoIterator<Item = &'a Job>) {
        add_jobs(&self.shared, jobs);
    }

    /// Block until every listed job is terminal.
    ///
    /// A job that was never submitted (directly or through an edge) cannot
    /// run, so waiting on it returns immediately instead of deadlocking.
    pub fn wait<'a>(&self, jobs: impl IntoIterator<Item = &'a Job>) {
        let jobs: Vec<&Job> = jobs.into_iter().collect();
        for job in &jobs {
            if !job.is_registered() {
                warn!(job = %job, "waiting on a job that was never submitted");
            }
        }
        let mut state = lock(&self.shared.state);
        while jobs
            .iter()
            .any(|job| job.is_registered() && !job.state().is_terminal())
        {
            state = self.shared.wait(state);
        }
    }

    /// Block until all submitted jobs drained.
    pub fn await_completion(&self) -> Result<JobStats, JobServerError> {
        let mut state = lock(&self.shared.state);
        while !state.is_drained() {
            state = self.shared.wait(state);
        }
        self.summarize(&state)
    }

    /// Like [`await_completion`](Self::await_completion) but gives up after
    /// `timeout`. Giving up only abandons the wait: in-flight jobs keep
    /// running and are logged and returned in the error.
    pub fn await_completion_timeout(&self, timeout: Duration) -> Result<JobStats, JobServerError> {
        let state = lock(&self.shared.state);
        let (state, result) = self
            .shared
            .cond
            .wait_timeout_while(state, timeout, |s| !s.is_drained())
            .unwrap_or_else(PoisonError::into_inner);
        if result.timed_out() && !state.is_drained() {
            let snapshot = state.snapshot();
            drop(state);
            for job in &snapshot.running {
                warn!(job = %job, "still running when wait was interrupted");
            }
            for job in &snapshot.queued {
                warn!(job = %job, "still queued when wait was interrupted");
            }
            return Err(JobServerError::WaitInterrupted { snapshot });
        }
        self.summarize(&state)
    }

    pub fn snapshot(&self) -> ServerSnapshot {
        lock(&self.shared.state).snapshot()
    }

    pub fn stats(&self) -> JobStats {
        lock(&self.shared.state).stats
    }

    pub fn failures(&self) -> Vec<FailedJob> {
        lock(&self.shared.state).failures.clone()
    }

    fn summarize(&self, state: &ServerState) -> Result<JobStats, JobServerError> {
        let stats = state.stats;
        if stats.all_succeeded() {
            info!(%stats, "all jobs completed");
            return Ok(stats);
        }
        error!(%stats, "job execution had failures");
        if self.shared.raise_on_failure {
            return Err(JobServerError::ExecutionFailed {
                successful: stats.successful,
                failed: stats.failed,
                skipped: stats.skipped,
                failures: state.failures.clone(),
            });
        }
        Ok(stats)
    }
}

impl Drop for JobServer {
    fn drop(&mut self) {
        {
            let mut state = lock(&self.shared.state);
            while !state.is_drained() {
                state = self.shared.wait(state);
            }
        }
        if let Some(graph) = &self.shared.graph {
            lock(graph).finish();
        }
    }
}

fn default_concurrency() -> usize {
    thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
}

fn add_jobs<'a>(shared: &Arc<Shared>, jobs: impl IntoIterator<Item = &'a Job>) {
    let discovered = discover(jobs);
    if discovered.is_empty() {
        start_jobs(shared);
        return;
    }
    for job in &discovered {
        job.resolve_orphaned_parents();
    }
    if let Some(graph) = &shared.graph {
        let mut graph = lock(graph);
        for job in &discovered {
            graph.node(job);
        }
        for job in &discovered {
            for (parent, edge) in job.incoming_edges() {
                graph.edge(parent, job.id(), edge);
            }
        }
    }
    trace!(count = discovered.len(), "registering jobs");
    lock(&shared.state).queued.extend(discovered);
    start_jobs(shared);
}

/// Walk the connected component of `roots` and claim every unregistered job.
fn discover<'a>(roots: impl IntoIterator<Item = &'a Job>) -> Vec<Job> {
    let mut seen = HashSet::new();
    let mut stack: Vec<Job> = roots.into_iter().cloned().collect();
    let mut claimed = Vec::new();
    while let Some(job) = stack.pop() {
        if !seen.insert(job.id()) {
            continue;
        }
        stack.extend(job.neighbours());
        if job.claim() {
            claimed.push(job);
        }
    }
    claimed.sort_by_key(|job| job.id());
    claimed
}

/// Admit runnable jobs up to the concurrency limit.
fn start_jobs(shared: &Arc<Shared>) {
    let admitted = {
        let mut state = lock(&shared.state);
        let mut admitted = Vec::new();
        let mut remaining = Vec::with_capacity(state.queued.len());
        let mut skipped = 0;
        for job in std::mem::take(&mut state.queued) {
            let job_state = job.state();
            if job_state.is_terminal() {
                debug!(job = %job, "skipped after prerequisite failure");
                skipped += 1;
            } else if job_state == JobState::Waiting
                && state.running.len() + admitted.len() < shared.limit
                && job.try_start()
            {
                admitted.push(job);
            } else {
                remaining.push(job);
            }
        }
        state.queued = remaining;
        state.stats.skipped += skipped;
        for job in &admitted {
            state.running.insert(job.id(), job.clone());
        }
        if skipped > 0 {
            shared.cond.notify_all();
        }
        admitted
    };
    for job in admitted {
        spawn_worker(shared, job);
    }
}

fn spawn_worker(shared: &Arc<Shared>, job: Job) {
    let worker_shared = Arc::clone(shared);
    let worker_job = job.clone();
    let spawned = thread::Builder::new()
        .name(job.id().to_string())
        .spawn(move || run_worker(worker_shared, worker_job));
    if let Err(e) = spawned {
        error!(job = %job, error = %e, "could not spawn worker thread");
        let result = Err(JobError::Spawn(e.to_string()));
        job.complete(&result);
        finish(shared, &job, &result);
        start_jobs(shared);
    }
}

fn run_worker(shared: Arc<Shared>, job: Job) {
    debug!(job = %job, "job started");
    let started = Instant::now();
    let result = job.run();
    let elapsed_ms = started.elapsed().as_millis() as u64;
    match &result {
        Ok(()) => debug!(job = %job, elapsed_ms, "job finished"),
        Err(e) => {
            match e.detail() {
                Some(detail) => error!(job = %job, error = %e, detail, "job failed"),
                None => error!(job = %job, error = %e, "job failed"),
            }
            debug!(job = %job, detail = ?e, elapsed_ms, "job failure detail");
        }
    }
    finish(&shared, &job, &result);
    start_jobs(&shared);
}

fn finish(shared: &Shared, job: &Job, result: &Result<(), JobError>) {
    let mut state = lock(&shared.state);
    state.running.remove(&job.id());
    match result {
        Ok(()) => state.stats.successful += 1,
        Err(e) => {
            state.stats.failed += 1;
            state.failures.push(FailedJob {
                id: job.id(),
                label: job.label().map(str::to_string),
                error: e.clone(),
            });
        }
    }
    shared.cond.notify_all();
}
