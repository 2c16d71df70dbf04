//! Execution channel: the collaborator that runs backend tools.
//!
//! Schedulers never spawn processes themselves. Every backend command goes
//! through an [`ExecutionChannel`], so the same scheduler can drive a local
//! machine or a remote login node.

use std::collections::BTreeMap;
use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;

/// Result of one command invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` when the command was killed by a signal.
    pub exit_code: Option<i32>,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl CommandOutput {
    /// Check whether the command exited with code zero.
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Runs a command line and returns its result.
///
/// One call is one invocation: implementations must not retry.
#[async_trait]
pub trait ExecutionChannel: Send + Sync {
    /// Run `command` with `args`, wait for it to finish and collect its output.
    ///
    /// An `Err` means the command could not be run at all; a command that
    /// ran and failed is an `Ok` with a non-zero exit code.
    async fn run(
        &self,
        command: &str,
        args: &[String],
        working_directory: Option<&Path>,
        environment: &BTreeMap<String, String>,
    ) -> std::io::Result<CommandOutput>;
}

/// Runs commands as child processes of the current process.
#[derive(Debug, Clone, Default)]
pub struct LocalChannel;

impl LocalChannel {
    /// Create a new local channel.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ExecutionChannel for LocalChannel {
    async fn run(
        &self,
        command: &str,
        args: &[String],
        working_directory: Option<&Path>,
        environment: &BTreeMap<String, String>,
    ) -> std::io::Result<CommandOutput> {
        let mut cmd = Command::new(command);
        cmd.args(args)
            .envs(environment)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = working_directory {
            cmd.current_dir(dir);
        }

        let output = cmd.output().await?;

        Ok(CommandOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}
