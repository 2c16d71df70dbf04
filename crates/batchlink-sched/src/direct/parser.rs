//! Parsers for the direct backend's launcher and status check output.

use std::fmt;

use crate::error::{SchedError, SchedResult};
use crate::job::JobStatus;

/// Printed by the status check when the exit-code sentinel exists.
pub const SENTINEL_MARKER: &str = "DONE";

/// Printed by the status check when no process with the PID exists.
pub const GONE_MARKER: &str = "GONE";

/// A launched process, identified by its PID and its start time.
///
/// The start time is field 22 of `/proc/<pid>/stat`, in clock ticks since
/// boot. Together with the PID it tells the job apart from a later process
/// that was given the same PID. It is `None` on hosts without procfs.
///
/// Rendered as `<pid>` or `<pid>:<start time>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessHandle {
    pub pid: u32,
    pub start_time: Option<u64>,
}

impl ProcessHandle {
    /// Parse a rendered handle.
    pub fn parse(handle: &str) -> SchedResult<Self> {
        let invalid = || SchedError::parse("direct", format!("invalid process handle {handle:?}"));

        let (pid, start_time) = match handle.trim().split_once(':') {
            Some((pid, start)) => (pid, Some(start)),
            None => (handle.trim(), None),
        };

        let pid = pid
            .parse::<u32>()
            .ok()
            .filter(|pid| *pid > 0)
            .ok_or_else(invalid)?;
        let start_time = match start_time {
            Some(start) => Some(start.parse::<u64>().map_err(|_| invalid())?),
            None => None,
        };

        Ok(Self { pid, start_time })
    }

    /// Whether `observed` belongs to another process than the one launched.
    ///
    /// Unknown start times on either side never count as a mismatch.
    pub fn is_reused_by(&self, observed: Option<u64>) -> bool {
        matches!((self.start_time, observed), (Some(expected), Some(actual)) if expected != actual)
    }
}

impl fmt::Display for ProcessHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.start_time {
            Some(start) => write!(f, "{}:{}", self.pid, start),
            None => write!(f, "{}", self.pid),
        }
    }
}

/// Parse the launcher output (`<pid>:<start time>`) into a handle.
///
/// The start time may be empty when procfs is unavailable.
pub fn parse_launch_output(output: &str) -> SchedResult<ProcessHandle> {
    let line = output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .last()
        .unwrap_or("");
    let line = line.strip_suffix(':').unwrap_or(line);

    ProcessHandle::parse(line).map_err(|_| {
        SchedError::Submission(format!("unexpected launcher output: {:?}", output.trim()))
    })
}

/// Split a status line into the process state and its start time.
fn parse_state_line(output: &str) -> (Option<&str>, Option<u64>) {
    let Some(line) = output.lines().map(str::trim).find(|l| !l.is_empty()) else {
        return (None, None);
    };
    let mut fields = line.split_whitespace();
    let state = fields.next();
    let start_time = fields.next().and_then(|f| f.parse().ok());
    (state, start_time)
}

/// Translate the status check output into a status.
///
/// The check prints the one-letter state and the start time from
/// `/proc/<pid>/stat`. Zombies (`Z`), dead tasks (`X`), a missing process,
/// a process started at another time than `handle` and an existing sentinel
/// all mean the job has finished. A local job is never pending.
pub fn parse_status_output(output: &str, handle: &ProcessHandle) -> JobStatus {
    match parse_state_line(output) {
        (None, _) | (Some(SENTINEL_MARKER), _) | (Some(GONE_MARKER), _) => JobStatus::Done,
        (Some(_), start_time) if handle.is_reused_by(start_time) => JobStatus::Done,
        (Some(state), _) => match state.chars().next() {
            Some('Z') | Some('X') | Some('x') => JobStatus::Done,
            _ => JobStatus::Running,
        },
    }
}

/// Whether the status check output shows the PID taken by another process.
pub fn is_reused_pid(output: &str, handle: &ProcessHandle) -> bool {
    match parse_state_line(output) {
        (Some(GONE_MARKER), _) | (None, _) => false,
        (Some(_), start_time) => handle.is_reused_by(start_time),
    }
}

/// Check `kill`'s stderr for the "process is gone" error.
pub fn is_no_such_process(stderr: &str) -> bool {
    stderr.contains("No such process")
}
