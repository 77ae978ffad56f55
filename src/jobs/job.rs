//! The [`Job`] node type and its edge bookkeeping.
//!
//! Each job guards its graph node with its own mutex. No code path ever
//! holds two job locks at once: edge insertion locks the child, releases it,
//! then locks the parent; completion takes the child list under the job's
//! lock and notifies children after releasing it.

use super::lock;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use thiserror::Error;
use tracing::warn;

/// Error type job callbacks return.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

type Callback = Box<dyn FnOnce() -> Result<(), BoxError> + Send + 'static>;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique job identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(u64);

impl JobId {
    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job-{}", self.0)
    }
}

/// Lifecycle of a job.
///
/// `Blocked → Waiting → Running → {Finished | Failed}`. A job can also move
/// from `Blocked` straight to `Failed` when a strict prerequisite fails.
/// Every transition happens at most once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobState {
    /// At least one prerequisite has not reached a terminal state.
    Blocked,
    /// Runnable; waiting for a free worker slot.
    Waiting,
    Running,
    Finished,
    Failed,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Finished | JobState::Failed)
    }
}

/// Kind of dependency edge between a prerequisite and its dependent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Edge {
    /// The dependent runs only if the prerequisite succeeded.
    Strict,
    /// The dependent runs once the prerequisite is terminal, success or not.
    Unconditional,
}

/// Why a job ended up [`JobState::Failed`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobError {
    /// The callback returned an error. `detail` is its `Debug` rendering,
    /// which names the error type; `causes` holds the `source()` chain.
    #[error("{message}")]
    Callback {
        message: String,
        detail: String,
        causes: Vec<String>,
    },
    #[error("panicked: {0}")]
    Panicked(String),
    /// Failed without running because a strict prerequisite failed.
    #[error("prerequisite {0} failed")]
    Prerequisite(JobId),
    #[error("could not start worker thread: {0}")]
    Spawn(String),
}

impl JobError {
    fn from_callback(err: &(dyn std::error::Error + 'static)) -> Self {
        let mut causes = Vec::new();
        let mut source = err.source();
        while let Some(cause) = source {
            causes.push(cause.to_string());
            source = cause.source();
        }
        JobError::Callback {
            message: err.to_string(),
            detail: format!("{err:?}"),
            causes,
        }
    }

    /// `Debug` rendering of a callback error.
    pub fn detail(&self) -> Option<&str> {
        match self {
            JobError::Callback { detail, .. } => Some(detail),
            _ => None,
        }
    }

    /// True when the job never ran because of an upstream failure.
    pub fn is_propagated(&self) -> bool {
        matches!(self, JobError::Prerequisite(_))
    }
}

#[derive(Debug, Clone, Copy)]
enum ParentOutcome {
    Satisfied,
    Failed,
}

struct ParentLink {
    id: JobId,
    edge: Edge,
    job: Weak<JobInner>,
    resolved: bool,
}

struct Node {
    state: JobState,
    pending: usize,
    parents: Vec<ParentLink>,
    children: Vec<(Edge, Job)>,
    registered: bool,
    error: Option<JobError>,
}

struct JobInner {
    id: JobId,
    label: Option<String>,
    callback: Mutex<Option<Callback>>,
    node: Mutex<Node>,
}

/// A schedulable unit of work.
///
/// `Job` is a cheap handle; clones refer to the same node. Declare edges
/// before handing the job to a [`JobServer`](super::JobServer). Jobs reachable
/// through edges from a submitted job are discovered and scheduled with it.
#[derive(Clone)]
pub struct Job {
    inner: Arc<JobInner>,
}

impl Job {
    /// Create an unlabelled job.
    pub fn new<F>(callback: F) -> Self
    where
        F: FnOnce() -> Result<(), BoxError> + Send + 'static,
    {
        Self::build(None, Some(Box::new(callback)))
    }

    /// Create a job with a human-readable label for logs and graph dumps.
    pub fn named<F>(label: impl Into<String>, callback: F) -> Self
    where
        F: FnOnce() -> Result<(), BoxError> + Send + 'static,
    {
        Self::build(Some(label.into()), Some(Box::new(callback)))
    }

    /// A job without a callback. Useful as a join point in a graph.
    pub fn barrier(label: impl Into<String>) -> Self {
        Self::build(Some(label.into()), None)
    }

    fn build(label: Option<String>, callback: Option<Callback>) -> Self {
        Self {
            inner: Arc::new(JobInner {
                id: JobId(NEXT_ID.fetch_add(1, Ordering::Relaxed)),
                label,
                callback: Mutex::new(callback),
                node: Mutex::new(Node {
                    state: JobState::Waiting,
                    pending: 0,
                    parents: Vec::new(),
                    children: Vec::new(),
                    registered: false,
                    error: None,
                }),
            }),
        }
    }

    pub fn id(&self) -> JobId {
        self.inner.id
    }

    pub fn label(&self) -> Option<&str> {
        self.inner.label.as_deref()
    }

    pub fn state(&self) -> JobState {
        lock(&self.inner.node).state
    }

    /// The failure reason once the job is [`JobState::Failed`].
    pub fn error(&self) -> Option<JobError> {
        lock(&self.inner.node).error.clone()
    }

    /// Add strict prerequisites: this job runs only after all of them
    /// finished successfully.
    pub fn depends_on<'a>(&self, parents: impl IntoIterator<Item = &'a Job>) -> &Self {
        for parent in parents {
            self.add_parent(parent, Edge::Strict);
        }
        self
    }

    /// Add unconditional prerequisites: this job runs once all of them are
    /// terminal, whether they succeeded or failed.
    pub fn depends_unconditionally_on<'a>(
        &self,
        parents: impl IntoIterator<Item = &'a Job>,
    ) -> &Self {
        for parent in parents {
            self.add_parent(parent, Edge::Unconditional);
        }
        self
    }

    /// Make `children` strictly depend on this job.
    pub fn then<'a>(&self, children: impl IntoIterator<Item = &'a Job>) -> &Self {
        for child in children {
            child.add_parent(self, Edge::Strict);
        }
        self
    }

    /// Make `children` run after this job regardless of its outcome.
    pub fn finally_do<'a>(&self, children: impl IntoIterator<Item = &'a Job>) -> &Self {
        for child in children {
            child.add_parent(self, Edge::Unconditional);
        }
        self
    }

    fn add_parent(&self, parent: &Job, edge: Edge) {
        if Arc::ptr_eq(&self.inner, &parent.inner) {
            warn!(job = %self, "ignoring dependency of a job on itself");
            return;
        }
        {
            let mut node = lock(&self.inner.node);
            if !matches!(node.state, JobState::Blocked | JobState::Waiting) {
                warn!(job = %self, parent = %parent, state = ?node.state,
                    "ignoring dependency added to a job that already started");
                return;
            }
            node.pending += 1;
            node.state = JobState::Blocked;
            node.parents.push(ParentLink {
                id: parent.id(),
                edge,
                job: Arc::downgrade(&parent.inner),
                resolved: false,
            });
        }
        let settled = {
            let mut parent_node = lock(&parent.inner.node);
            match parent_node.state {
                JobState::Finished => Some(ParentOutcome::Satisfied),
                JobState::Failed => Some(ParentOutcome::Failed),
                _ => {
                    parent_node.children.push((edge, self.clone()));
                    None
                }
            }
        };
        if let Some(outcome) = settled {
            self.resolve_parent(parent.id(), outcome);
        }
    }

    /// Record that `parent` reached a terminal state.
    fn resolve_parent(&self, parent: JobId, outcome: ParentOutcome) {
        let cascade = {
            let mut node = lock(&self.inner.node);
            let Some(link) = node
                .parents
                .iter_mut()
                .find(|link| link.id == parent && !link.resolved)
            else {
                return;
            };
            link.resolved = true;
            let edge = link.edge;
            if node.state.is_terminal() {
                return;
            }
            match (edge, outcome) {
                (Edge::Strict, ParentOutcome::Failed) => {
                    node.state = JobState::Failed;
                    node.error = Some(JobError::Prerequisite(parent));
                    Some(std::mem::take(&mut node.children))
                }
                _ => {
                    node.pending = node.pending.saturating_sub(1);
                    if node.pending == 0 && node.state == JobState::Blocked {
                        node.state = JobState::Waiting;
                    }
                    None
                }
            }
        };
        if let Some(children) = cascade {
            for (_, child) in children {
                child.resolve_parent(self.id(), ParentOutcome::Failed);
            }
        }
    }

    /// Execute the callback on the calling thread and notify dependents.
    ///
    /// Errors and panics from the callback become [`JobError`]s.
    pub(crate) fn run(&self) -> Result<(), JobError> {
        let callback = lock(&self.inner.callback).take();
        let result = match callback {
            None => Ok(()),
            Some(callback) => match panic::catch_unwind(AssertUnwindSafe(callback)) {
                Ok(Ok(())) => Ok(()),
                Ok(Err(err)) => Err(JobError::from_callback(err.as_ref())),
                Err(payload) => Err(JobError::Panicked(panic_message(payload.as_ref()))),
            },
        };
        self.complete(&result);
        result
    }

    /// Move to a terminal state and notify every child.
    pub(crate) fn complete(&self, result: &Result<(), JobError>) {
        let children = {
            let mut node = lock(&self.inner.node);
            match result {
                Ok(()) => node.state = JobState::Finished,
                Err(err) => {
                    node.state = JobState::Failed;
                    node.error = Some(err.clone());
                }
            }
            std::mem::take(&mut node.children)
        };
        let outcome = match result {
            Ok(()) => ParentOutcome::Satisfied,
            Err(_) => ParentOutcome::Failed,
        };
        for (_, child) in children {
            child.resolve_parent(self.id(), outcome);
        }
    }

    /// Claim the job for a server. Returns false if it was already claimed.
    pub(crate) fn claim(&self) -> bool {
        !std::mem::replace(&mut lock(&self.inner.node).registered, true)
    }

    pub(crate) fn is_registered(&self) -> bool {
        lock(&self.inner.node).registered
    }

    /// Atomically move `Waiting → Running`.
    pub(crate) fn try_start(&self) -> bool {
        let mut node = lock(&self.inner.node);
        if node.state == JobState::Waiting {
            node.state = JobState::Running;
            true
        } else {
            false
        }
    }

    /// All jobs directly connected to this one, in either direction.
    pub(crate) fn neighbours(&self) -> Vec<Job> {
        let node = lock(&self.inner.node);
        node.children
            .iter()
            .map(|(_, child)| child.clone())
            .chain(
                node.parents
                    .iter()
                    .filter_map(|link| link.job.upgrade().map(|inner| Job { inner })),
            )
            .collect()
    }

    pub(crate) fn incoming_edges(&self) -> Vec<(JobId, Edge)> {
        lock(&self.inner.node)
            .parents
            .iter()
            .map(|link| (link.id, link.edge))
            .collect()
    }

    /// Fail edges to prerequisites that were dropped before ever running.
    ///
    /// Such a prerequisite is unreachable and can never notify this job.
    pub(crate) fn resolve_orphaned_parents(&self) {
        let orphans: Vec<JobId> = lock(&self.inner.node)
            .parents
            .iter()
            .filter(|link| !link.resolved && link.job.strong_count() == 0)
            .map(|link| link.id)
            .collect();
        for parent in orphans {
            warn!(job = %self, %parent, "prerequisite was dropped without being scheduled");
            self.resolve_parent(parent, ParentOutcome::Failed);
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.label() {
            Some(label) => write!(f, "{} ({})", self.id(), label),
            None => write!(f, "{}", self.id()),
        }
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id())
            .field("label", &self.label())
            .field("state", &self.state())
            .finish()
    }
}
