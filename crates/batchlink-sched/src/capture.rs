//! Exit-code capture protocol.
//!
//! Backends forget finished jobs, and their query tools rarely report a
//! reliable exit code. Every job script therefore runs the user command in a
//! subshell and publishes `$?` to a sentinel file before exiting:
//!
//! ```text
//! <work_dir>/scripts/<token>.sh     submitted job script
//! <work_dir>/exit/<token>.code      sentinel, written after the command ends
//! <work_dir>/logs/<token>.out|.err  default output of the direct backend
//! ```
//!
//! The sentinel is written to a temporary name and renamed into place, so a
//! reader never sees a partial file. Its existence alone proves the user
//! command finished.
//!
//! Once the code has been read, the scheduler deletes the sentinel and the
//! script and keeps the code in the job record.

use std::path::{Path, PathBuf};
use std::time::Duration;

use uuid::Uuid;

use crate::error::{SchedError, SchedResult};
use crate::fs::FileSystem;
use crate::script::shell_quote;

/// Shell variable holding the user command's exit code inside the wrapper.
const RC_VAR: &str = "__batchlink_rc";

/// Where one job's capture files live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturePaths {
    /// Unique token the file names derive from.
    pub token: String,
    /// The job script.
    pub script: PathBuf,
    /// The exit-code sentinel.
    pub exit_code: PathBuf,
    /// Default standard output of the job.
    pub stdout_log: PathBuf,
    /// Default standard error of the job.
    pub stderr_log: PathBuf,
}

impl CapturePaths {
    /// Derive the capture paths for `token` below `work_dir`.
    pub fn new(work_dir: &Path, token: &str) -> Self {
        Self {
            token: token.to_string(),
            script: work_dir.join("scripts").join(format!("{token}.sh")),
            exit_code: work_dir.join("exit").join(format!("{token}.code")),
            stdout_log: work_dir.join("logs").join(format!("{token}.out")),
            stderr_log: work_dir.join("logs").join(format!("{token}.err")),
        }
    }

    /// Allocate paths under a fresh, collision-free token.
    pub fn generate(work_dir: &Path) -> Self {
        let token = Uuid::new_v4().simple().to_string();
        Self::new(work_dir, &token)
    }

    /// Directories that must exist before a job is submitted.
    pub fn directories(work_dir: &Path) -> [PathBuf; 3] {
        [
            work_dir.join("scripts"),
            work_dir.join("exit"),
            work_dir.join("logs"),
        ]
    }

    /// Render the lines that run `command_line` and publish its exit code.
    ///
    /// `command_line` must already include redirections.
    pub fn wrap(&self, command_line: &str) -> String {
        let sentinel = shell_quote(&self.exit_code.to_string_lossy());
        let partial = shell_quote(&format!("{}.tmp", self.exit_code.display()));

        let mut out = String::new();
        out.push_str(&format!("( {command_line} )\n"));
        out.push_str(&format!("{RC_VAR}=$?\n"));
        out.push_str(&format!("echo \"${RC_VAR}\" > {partial}\n"));
        out.push_str(&format!("mv -f {partial} {sentinel}\n"));
        out.push_str(&format!("exit ${RC_VAR}\n"));
        out
    }
}

/// Parse sentinel file contents.
pub fn parse_exit_code(contents: &str) -> Option<i32> {
    contents.trim().parse().ok()
}

/// Read the sentinel at `path`, retrying up to `attempts` times.
///
/// Shared filesystems may expose the file some time after the backend
/// reports the job as finished, hence the retries.
pub async fn read_exit_code(
    fs: &dyn FileSystem,
    path: &Path,
    attempts: u32,
    delay: Duration,
) -> SchedResult<i32> {
    let attempts = attempts.max(1);
    let mut reason = String::new();

    for attempt in 1..=attempts {
        match fs.read_text(path).await {
            Ok(contents) => match parse_exit_code(&contents) {
                Some(code) => return Ok(code),
                None => reason = format!("unparseable contents {:?}", contents.trim()),
            },
            Err(e) => reason = e.to_string(),
        }

        tracing::debug!(
            "Sentinel {} not readable (attempt {}/{}): {}",
            path.display(),
            attempt,
            attempts,
            reason
        );
        if attempt < attempts {
            tokio::time::sleep(delay).await;
        }
    }

    Err(SchedError::CaptureFailure {
        path: path.to_path_buf(),
        reason,
    })
}

/// Check whether a sentinel exists. Errors count as absent.
pub async fn sentinel_exists(fs: &dyn FileSystem, path: &Path) -> bool {
    match fs.exists(path).await {
        Ok(exists) => exists,
        Err(e) => {
            tracing::debug!("Cannot check sentinel {}: {}", path.display(), e);
            false
        }
    }
}
