//! Job types shared by all backends.
//!
//! The status state machine:
//!
//! ```text
//!   submit() ──→ Pending ──→ Running ──→ Done
//!                   │                      ▲
//!                   └──────────────────────┘
//! ```
//!
//! Success, failure and cancellation all end in `Done`; the exit code tells
//! them apart. A job that finishes between two polls may never be observed
//! as `Pending` or `Running`.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::capture::CapturePaths;
use crate::error::{SchedError, SchedResult};

/// Opaque job identifier assigned at submission.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobId(pub String);

impl JobId {
    /// Create a new job ID.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for JobId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Canonical job status.
///
/// Variants are declared in lifecycle order, so `Ord` gives the
/// monotonic ordering `Pending < Running < Done`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum JobStatus {
    /// Accepted by the backend, not running yet.
    Pending,
    /// Currently running.
    Running,
    /// Finished, failed or cancelled.
    Done,
}

impl JobStatus {
    /// Check if this is the terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Done)
    }

    /// Combine a previously seen status with a new observation.
    ///
    /// Never moves backwards.
    pub fn merge(self, observed: JobStatus) -> JobStatus {
        self.max(observed)
    }

    /// Get a human-readable status name.
    pub fn name(&self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Running => "RUNNING",
            JobStatus::Done => "DONE",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

const DEFAULT_JOB_NAME: &str = "batchlink";

fn default_name() -> String {
    DEFAULT_JOB_NAME.to_string()
}

fn default_num_nodes() -> u32 {
    1
}

/// Description of a job to submit.
///
/// Arguments are inserted into the job script verbatim and are not
/// escaped, so `$VARIABLE` references expand inside the job. Quote them
/// yourself where needed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobDescription {
    /// Job name shown by the backend.
    #[serde(default = "default_name")]
    pub name: String,

    /// Command to run.
    pub command: Option<String>,

    /// Arguments passed to the command.
    pub arguments: Vec<String>,

    /// Directory to run in. Backend default when absent.
    pub working_directory: Option<PathBuf>,

    /// File to redirect the command's standard output to.
    pub stdout_file: Option<PathBuf>,

    /// File to redirect the command's standard error to.
    pub stderr_file: Option<PathBuf>,

    /// Environment variables exported before the command runs.
    pub environment: BTreeMap<String, String>,

    /// Queue (partition) to submit to.
    pub queue_name: Option<String>,

    /// Number of nodes to reserve.
    #[serde(default = "default_num_nodes")]
    pub num_nodes: u32,

    /// MPI processes to start per node.
    pub mpi_processes_per_node: Option<u32>,

    /// Walltime reservation.
    pub time_reserved: Option<Duration>,
}

impl Default for JobDescription {
    fn default() -> Self {
        Self {
            name: default_name(),
            command: None,
            arguments: Vec::new(),
            working_directory: None,
            stdout_file: None,
            stderr_file: None,
            environment: BTreeMap::new(),
            queue_name: None,
            num_nodes: default_num_nodes(),
            mpi_processes_per_node: None,
            time_reserved: None,
        }
    }
}

impl JobDescription {
    /// Create a description running `command`.
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: Some(command.into()),
            ..Default::default()
        }
    }

    /// Set the job name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the arguments.
    pub fn with_arguments<I, S>(mut self, arguments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.arguments = arguments.into_iter().map(Into::into).collect();
        self
    }

    /// Append one argument.
    pub fn with_argument(mut self, argument: impl Into<String>) -> Self {
        self.arguments.push(argument.into());
        self
    }

    /// Set the working directory.
    pub fn with_working_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_directory = Some(dir.into());
        self
    }

    /// Redirect standard output.
    pub fn with_stdout_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.stdout_file = Some(path.into());
        self
    }

    /// Redirect standard error.
    pub fn with_stderr_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.stderr_file = Some(path.into());
        self
    }

    /// Set an environment variable.
    pub fn with_env(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(name.into(), value.into());
        self
    }

    /// Set the queue.
    pub fn with_queue(mut self, queue: impl Into<String>) -> Self {
        self.queue_name = Some(queue.into());
        self
    }

    /// Set the number of nodes.
    pub fn with_num_nodes(mut self, num_nodes: u32) -> Self {
        self.num_nodes = num_nodes;
        self
    }

    /// Set the number of MPI processes per node.
    pub fn with_mpi_processes_per_node(mut self, processes: u32) -> Self {
        self.mpi_processes_per_node = Some(processes);
        self
    }

    /// Set the walltime reservation.
    pub fn with_time_reserved(mut self, time: Duration) -> Self {
        self.time_reserved = Some(time);
        self
    }

    /// Return the command, rejecting descriptions that cannot be submitted.
    pub fn validate(&self) -> SchedResult<&str> {
        let command = match self.command.as_deref().map(str::trim) {
            Some(command) if !command.is_empty() => command,
            _ => {
                return Err(SchedError::InvalidArgument(
                    "job description is missing a command".to_string(),
                ));
            }
        };

        if self.num_nodes == 0 {
            return Err(SchedError::InvalidArgument(
                "num_nodes must be at least 1".to_string(),
            ));
        }

        if self.mpi_processes_per_node == Some(0) {
            return Err(SchedError::InvalidArgument(
                "mpi_processes_per_node must be at least 1".to_string(),
            ));
        }

        if let Some(name) = self.environment.keys().find(|k| !is_shell_identifier(k)) {
            return Err(SchedError::InvalidArgument(format!(
                "invalid environment variable name: {name:?}"
            )));
        }

        Ok(command)
    }
}

fn is_shell_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Bookkeeping for one submitted job. Owned by the scheduler's job table.
#[derive(Debug, Clone)]
pub(crate) struct JobRecord {
    pub job_id: JobId,

    /// Backend handle: the process ID for the direct backend, the backend
    /// job ID otherwise.
    pub handle: String,

    pub capture: CapturePaths,

    pub status: JobStatus,

    /// Exit code reported by the backend's own tools, if any.
    pub backend_exit_code: Option<i32>,

    /// Exit code read from the sentinel file.
    pub exit_code: Option<i32>,

    /// Set once a terminal exit code was handed to the caller.
    pub exit_code_retrieved: bool,

    pub cancel_requested: bool,

    pub submitted_at: DateTime<Utc>,

    pub last_polled_at: Option<DateTime<Utc>>,
}

impl JobRecord {
    pub fn new(job_id: JobId, handle: String, capture: CapturePaths) -> Self {
        Self {
            job_id,
            handle,
            capture,
            status: JobStatus::Pending,
            backend_exit_code: None,
            exit_code: None,
            exit_code_retrieved: false,
            cancel_requested: false,
            submitted_at: Utc::now(),
            last_polled_at: None,
        }
    }

    /// Apply a status observation, keeping the status monotonic.
    pub fn observe(&mut self, observed: JobStatus) -> JobStatus {
        self.status = self.status.merge(observed);
        self.last_polled_at = Some(Utc::now());
        self.status
    }
}
