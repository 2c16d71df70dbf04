//! Error handling for the scheduler layer.

use std::path::PathBuf;

use thiserror::Error;

use crate::job::JobId;

/// Result type for scheduler operations.
pub type SchedResult<T> = Result<T, SchedError>;

/// Errors that can occur during scheduler operations.
#[derive(Error, Debug)]
pub enum SchedError {
    /// The job description is malformed (e.g. no command).
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The backend rejected the submission or returned no usable job ID.
    #[error("Submission failed: {0}")]
    Submission(String),

    /// The job ID is not tracked by this scheduler.
    #[error("Job not found: {0}")]
    NotFound(JobId),

    /// The backend's cancellation tool failed. Non-fatal: the job stays queryable.
    #[error("Cancellation of job {job_id} failed: {message}")]
    Cancellation { job_id: JobId, message: String },

    /// The exit code of a finished job could not be recovered.
    #[error("Exit code capture failed for {}: {reason}", path.display())]
    CaptureFailure { path: PathBuf, reason: String },

    /// A backend tool could not be started through the execution channel.
    #[error("Command `{command}` failed: {source}")]
    Channel {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// The output of a backend tool did not have the expected shape.
    #[error("Unexpected output from `{command}`: {message}")]
    Parse { command: String, message: String },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SchedError {
    pub(crate) fn channel(command: &str, source: std::io::Error) -> Self {
        SchedError::Channel {
            command: command.to_string(),
            source,
        }
    }

    pub(crate) fn parse(command: &str, message: impl Into<String>) -> Self {
        SchedError::Parse {
            command: command.to_string(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SchedError::NotFound(JobId::new("job-123"));
        assert_eq!(err.to_string(), "Job not found: job-123");

        let err = SchedError::Cancellation {
            job_id: JobId::new("42"),
            message: "permission denied".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Cancellation of job 42 failed: permission denied"
        );

        let err = SchedError::CaptureFailure {
            path: PathBuf::from("/work/exit/abc.code"),
            reason: "file not found".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Exit code capture failed for /work/exit/abc.code: file not found"
        );
    }

    #[test]
    fn test_parse_error_display() {
        let err = SchedError::parse("sbatch", "Unexpected output format: oops");
        assert_eq!(
            err.to_string(),
            "Unexpected output from `sbatch`: Unexpected output format: oops"
        );
    }
}
