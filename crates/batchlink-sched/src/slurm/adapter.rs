//! SLURM adapter for job submission and tracking.

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::capture::CapturePaths;
use crate::channel::ExecutionChannel;
use crate::error::{SchedError, SchedResult};
use crate::job::{JobDescription, JobId, JobStatus};
use crate::scheduler::{Adapter, Capabilities, Observation, Submission};
use crate::script::ScriptHeader;
use crate::slurm::{parser, templates};

/// SLURM job state as printed by squeue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlurmState {
    Pending,
    Configuring,
    Requeued,
    Held,
    Running,
    Suspended,
    Completing,
    Resizing,
    Completed,
    Failed,
    Timeout,
    Cancelled,
    NodeFail,
    Preempted,
    OutOfMemory,
    Unknown(String),
}

impl SlurmState {
    /// Translate into the canonical status. `None` for unknown states.
    pub fn status(&self) -> Option<JobStatus> {
        match self {
            SlurmState::Pending
            | SlurmState::Configuring
            | SlurmState::Requeued
            | SlurmState::Held => Some(JobStatus::Pending),
            SlurmState::Running
            | SlurmState::Suspended
            | SlurmState::Completing
            | SlurmState::Resizing => Some(JobStatus::Running),
            SlurmState::Completed
            | SlurmState::Failed
            | SlurmState::Timeout
            | SlurmState::Cancelled
            | SlurmState::NodeFail
            | SlurmState::Preempted
            | SlurmState::OutOfMemory => Some(JobStatus::Done),
            SlurmState::Unknown(_) => None,
        }
    }
}

/// Configuration for the SLURM adapter.
#[derive(Debug, Clone, Default)]
pub struct SlurmConfig {
    /// SLURM account for billing.
    pub account: Option<String>,

    /// Modules to load before running.
    pub modules: Vec<String>,

    /// Additional `#SBATCH` options, without the prefix (e.g. `--mem=4G`).
    pub extra_directives: Vec<String>,
}

impl SlurmConfig {
    /// Set the account.
    pub fn with_account(mut self, account: impl Into<String>) -> Self {
        self.account = Some(account.into());
        self
    }

    /// Add a module to load.
    pub fn with_module(mut self, module: impl Into<String>) -> Self {
        self.modules.push(module.into());
        self
    }

    /// Add an `#SBATCH` option.
    pub fn with_directive(mut self, directive: impl Into<String>) -> Self {
        self.extra_directives.push(directive.into());
        self
    }
}

/// Adapter for the SLURM workload manager (sbatch, squeue, scancel).
#[derive(Debug, Clone, Default)]
pub struct SlurmAdapter {
    config: SlurmConfig,
}

impl SlurmAdapter {
    /// Create a new SLURM adapter with the given configuration.
    pub fn new(config: SlurmConfig) -> Self {
        Self { config }
    }

    /// Get the configuration.
    pub fn config(&self) -> &SlurmConfig {
        &self.config
    }

    async fn run_squeue(
        &self,
        channel: &dyn ExecutionChannel,
        slurm_job_id: &str,
    ) -> SchedResult<Option<SlurmState>> {
        let args = vec![
            "-h".to_string(),
            "-j".to_string(),
            slurm_job_id.to_string(),
            "-o".to_string(),
            "%T".to_string(),
        ];
        tracing::debug!("Running squeue {}", args.join(" "));
        let output = channel
            .run("squeue", &args, None, &BTreeMap::new())
            .await
            .map_err(|e| SchedError::channel("squeue", e))?;

        if parser::is_unknown_job_error(&output.stderr) {
            return Ok(None);
        }
        if !output.success() {
            return Err(SchedError::parse("squeue", output.stderr.trim()));
        }

        Ok(parser::parse_squeue_output(&output.stdout))
    }
}

#[async_trait]
impl Adapter for SlurmAdapter {
    fn capabilities(&self) -> Capabilities {
        Capabilities {
            backend: "slurm",
            supports_queues: true,
            supports_multi_node: true,
            enforces_walltime: true,
        }
    }

    fn script_header(&self, desc: &JobDescription) -> ScriptHeader {
        templates::generate_header(desc, &self.config)
    }

    async fn submit(
        &self,
        channel: &dyn ExecutionChannel,
        desc: &JobDescription,
        capture: &CapturePaths,
    ) -> SchedResult<Submission> {
        let args = vec![capture.script.to_string_lossy().into_owned()];
        tracing::debug!("Running sbatch {}", args[0]);

        let output = channel
            .run(
                "sbatch",
                &args,
                desc.working_directory.as_deref(),
                &BTreeMap::new(),
            )
            .await
            .map_err(|e| SchedError::Submission(format!("cannot run sbatch: {e}")))?;

        if !output.success() {
            return Err(SchedError::Submission(format!(
                "sbatch exited with {:?}: {}",
                output.exit_code,
                output.stderr.trim()
            )));
        }

        let job_id = parser::parse_sbatch_output(&output.stdout)?;
        Ok(Submission {
            job_id: JobId::new(job_id.clone()),
            handle: job_id,
        })
    }

    async fn query(
        &self,
        channel: &dyn ExecutionChannel,
        handle: &str,
        _capture: &CapturePaths,
    ) -> SchedResult<Observation> {
        let mut state = self.run_squeue(channel, handle).await?;
        if state.is_none() {
            // SLURM sometimes drops a job from squeue for a moment while it
            // moves to COMPLETING, so look once more before calling it gone.
            state = self.run_squeue(channel, handle).await?;
        }

        Ok(match state {
            None => Observation::absent(),
            Some(state) => match state.status() {
                Some(status) => Observation::status(status),
                None => {
                    tracing::warn!("Unknown SLURM state for job {}: {:?}", handle, state);
                    Observation::unknown()
                }
            },
        })
    }

    async fn terminate(&self, channel: &dyn ExecutionChannel, handle: &str) -> SchedResult<()> {
        let output = channel
            .run("scancel", &[handle.to_string()], None, &BTreeMap::new())
            .await
            .map_err(|e| SchedError::channel("scancel", e))?;

        parser::parse_scancel_output(output.exit_code, &output.stderr)
    }
}
