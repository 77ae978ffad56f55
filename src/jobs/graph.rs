//! Graphviz dump of every job and edge a server sees.
//!
//! The file is written incrementally (one statement per line, flushed after
//! each write) so a run that is interrupted still leaves a readable prefix:
//!
//! ```text
//! digraph jobs {
//!     "job-1" [label="crop:january"];
//!     "job-2" [label="render:page1/0"];
//!     "job-1" -> "job-2";
//!     "job-2" -> "job-7" [style=dashed];
//! }
//! ```
//!
//! Unconditional edges are drawn dashed. Write failures are logged once and
//! never affect scheduling.

use super::job::{Edge, Job, JobId};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::warn;

pub(crate) struct GraphWriter {
    path: PathBuf,
    out: BufWriter<File>,
    failed: bool,
    finished: bool,
}

impl GraphWriter {
    pub fn create(path: &Path) -> io::Result<Self> {
        let mut out = BufWriter::new(File::create(path)?);
        writeln!(out, "digraph jobs {{")?;
        out.flush()?;
        Ok(Self {
            path: path.to_path_buf(),
            out,
            failed: false,
            finished: false,
        })
    }

    pub fn node(&mut self, job: &Job) {
        let label = job.label().map(str::to_string).unwrap_or_else(|| job.id().to_string());
        let line = format!("    \"{}\" [label=\"{}\"];", job.id(), escape(&label));
        self.write_line(&line);
    }

    pub fn edge(&mut self, from: JobId, to: JobId, edge: Edge) {
        let line = match edge {
            Edge::Strict => format!("    \"{from}\" -> \"{to}\";"),
            Edge::Unconditional => format!("    \"{from}\" -> \"{to}\" [style=dashed];"),
        };
        self.write_line(&line);
    }

    /// Close the graph. Idempotent.
    pub fn finish(&mut self) {
        if !self.finished {
            self.write_line("}");
            self.finished = true;
        }
    }

    fn write_line(&mut self, line: &str) {
        if self.failed || self.finished {
            return;
        }
        let result = writeln!(self.out, "{line}").and_then(|_| self.out.flush());
        if let Err(e) = result {
            warn!(path = %self.path.display(), error = %e, "could not write job graph; disabling dump");
            self.failed = true;
        }
    }
}

fn escape(label: &str) -> String {
    label.replace('\\', "\\\\").replace('"', "\\\"")
}
