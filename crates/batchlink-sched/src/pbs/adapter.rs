//! PBS adapter for job submission and tracking.

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::capture::CapturePaths;
use crate::channel::{CommandOutput, ExecutionChannel};
use crate::error::{SchedError, SchedResult};
use crate::job::{JobDescription, JobId, JobStatus};
use crate::pbs::{parser, templates};
use crate::scheduler::{Adapter, Capabilities, Observation, Submission};
use crate::script::ScriptHeader;

/// PBS job state.
///
/// PBS uses single-letter state codes:
/// - Q: Queued (waiting in queue)
/// - R: Running
/// - E: Exiting (job completing)
/// - C: Completed (Torque)
/// - F: Finished (PBS Pro)
/// - H: Held
/// - W: Waiting (delayed start)
/// - S/U: Suspended
/// - T: Being moved to new location
/// - M: Moved to another server
/// - B: Array job has at least one subjob running
/// - X: Subjob finished
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PbsState {
    /// Job is queued and waiting for resources.
    Queued,
    /// Job is waiting for scheduled start time.
    Waiting,
    /// Job is held and will not run until released.
    Held,
    /// Job is currently running.
    Running,
    /// Job is exiting (finishing up).
    Exiting,
    /// Job has been suspended.
    Suspended,
    /// Job is being moved to another location.
    Transit,
    /// Job was moved to another server.
    Moved,
    /// Array job with subjobs running.
    ArrayRunning,
    /// Job has completed.
    Completed,
    /// Job has finished.
    Finished,
    /// Subjob has finished.
    Expired,
    /// Unknown state.
    Unknown(String),
}

impl PbsState {
    /// Translate into the canonical status. `None` for unknown states.
    pub fn status(&self) -> Option<JobStatus> {
        match self {
            PbsState::Queued | PbsState::Waiting | PbsState::Held => Some(JobStatus::Pending),
            PbsState::Running
            | PbsState::Exiting
            | PbsState::Suspended
            | PbsState::Transit
            | PbsState::Moved
            | PbsState::ArrayRunning => Some(JobStatus::Running),
            PbsState::Completed | PbsState::Finished | PbsState::Expired => Some(JobStatus::Done),
            PbsState::Unknown(_) => None,
        }
    }
}

/// Job information parsed from `qstat -f`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PbsJobInfo {
    /// PBS job ID (e.g. "12345.pbs-server").
    pub job_id: String,
    /// Current state.
    pub state: PbsState,
    /// Exit status, once the job has finished.
    pub exit_status: Option<i32>,
}

/// Configuration for the PBS adapter.
#[derive(Debug, Clone, Default)]
pub struct PbsConfig {
    /// Account to charge (`-A`).
    pub account: Option<String>,

    /// Modules to load before running.
    pub modules: Vec<String>,

    /// Additional `#PBS` options, without the prefix (e.g. `-l mem=8gb`).
    pub extra_directives: Vec<String>,
}

impl PbsConfig {
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

    /// Add a `#PBS` option.
    pub fn with_directive(mut self, directive: impl Into<String>) -> Self {
        self.extra_directives.push(directive.into());
        self
    }
}

/// Adapter for PBS Pro and Torque (qsub, qstat, qdel).
#[derive(Debug, Clone, Default)]
pub struct PbsAdapter {
    config: PbsConfig,
}

impl PbsAdapter {
    /// Create a new PBS adapter with the given configuration.
    pub fn new(config: PbsConfig) -> Self {
        Self { config }
    }

    /// Get the configuration.
    pub fn config(&self) -> &PbsConfig {
        &self.config
    }

    /// Query `qstat -f` for a job. `None` when PBS no longer knows it.
    ///
    /// PBS Pro drops finished jobs from the live listing; their record is
    /// then fetched from the job history with `qstat -x -f`.
    async fn run_qstat(
        &self,
        channel: &dyn ExecutionChannel,
        pbs_job_id: &str,
    ) -> SchedResult<Option<PbsJobInfo>> {
        let output = qstat(channel, &["-f", pbs_job_id]).await?;

        if parser::is_unknown_job_error(&output.stderr) {
            return Ok(None);
        }
        if parser::is_finished_job_error(&output.stderr) {
            return Ok(self.run_qstat_history(channel, pbs_job_id).await);
        }
        if !output.success() {
            return Err(SchedError::parse("qstat", output.stderr.trim()));
        }

        Ok(parser::parse_qstat_full_output(&output.stdout))
    }

    /// Query the PBS Pro job history. Any failure counts as no record.
    async fn run_qstat_history(
        &self,
        channel: &dyn ExecutionChannel,
        pbs_job_id: &str,
    ) -> Option<PbsJobInfo> {
        match qstat(channel, &["-x", "-f", pbs_job_id]).await {
            Ok(output) if output.success() => parser::parse_qstat_full_output(&output.stdout),
            Ok(output) => {
                tracing::debug!(
                    "No history for PBS job {}: {}",
                    pbs_job_id,
                    output.stderr.trim()
                );
                None
            }
            Err(e) => {
                tracing::debug!("No history for PBS job {}: {}", pbs_job_id, e);
                None
            }
        }
    }
}

async fn qstat(channel: &dyn ExecutionChannel, args: &[&str]) -> SchedResult<CommandOutput> {
    let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
    tracing::debug!("Running qstat {}", args.join(" "));
    channel
        .run("qstat", &args, None, &BTreeMap::new())
        .await
        .map_err(|e| SchedError::channel("qstat", e))
}

#[async_trait]
impl Adapter for PbsAdapter {
    fn capabilities(&self) -> Capabilities {
        Capabilities {
            backend: "pbs",
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
        tracing::debug!("Running qsub {}", args[0]);

        let output = channel
            .run(
                "qsub",
                &args,
                desc.working_directory.as_deref(),
                &BTreeMap::new(),
            )
            .await
            .map_err(|e| SchedError::Submission(format!("cannot run qsub: {e}")))?;

        if !output.success() {
            return Err(SchedError::Submission(format!(
                "qsub exited with {:?}: {}",
                output.exit_code,
                output.stderr.trim()
            )));
        }

        let job_id = parser::parse_qsub_output(&output.stdout)?;
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
        let Some(info) = self.run_qstat(channel, handle).await? else {
            return Ok(Observation::absent());
        };
        if !parser::is_same_job(&info.job_id, handle) {
            tracing::warn!("qstat for job {} listed job {}", handle, info.job_id);
            return Ok(Observation::unknown());
        }

        match info.state.status() {
            Some(status) => Ok(Observation {
                status: Some(status),
                exit_code: if status.is_terminal() {
                    info.exit_status
                } else {
                    None
                },
            }),
            None => {
                tracing::warn!("Unknown PBS state for job {}: {:?}", handle, info.state);
                Ok(Observation::unknown())
            }
        }
    }

    async fn terminate(&self, channel: &dyn ExecutionChannel, handle: &str) -> SchedResult<()> {
        let output = channel
            .run("qdel", &[handle.to_string()], None, &BTreeMap::new())
            .await
            .map_err(|e| SchedError::channel("qdel", e))?;

        parser::parse_qdel_output(output.exit_code, &output.stderr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pbs_state() {
        assert_eq!(PbsState::Completed.status(), Some(JobStatus::Done));
        assert_eq!(PbsState::Finished.status(), Some(JobStatus::Done));
        assert_eq!(PbsState::Running.status(), Some(JobStatus::Running));
        assert_eq!(PbsState::Held.status(), Some(JobStatus::Pending));
        assert_eq!(PbsState::Unknown("Z".to_string()).status(), None);
    }

    #[test]
    fn test_pbs_capabilities() {
        let caps = PbsAdapter::default().capabilities();
        assert_eq!(caps.backend, "pbs");
        assert!(caps.supports_queues);
        assert!(caps.enforces_walltime);
    }

    #[test]
    fn test_pbs_config_builders() {
        let config = PbsConfig::default()
            .with_account("proj")
            .with_module("gcc")
            .with_directive("-m abe");
        assert_eq!(config.account.as_deref(), Some("proj"));
        assert_eq!(config.modules, vec!["gcc"]);
        assert_eq!(config.extra_directives, vec!["-m abe"]);
    }
}
