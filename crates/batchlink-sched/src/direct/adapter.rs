//! Direct adapter running jobs as local background processes.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::capture::CapturePaths;
use crate::channel::{CommandOutput, ExecutionChannel, LocalChannel};
use crate::direct::parser::{self, GONE_MARKER, ProcessHandle, SENTINEL_MARKER};
use crate::error::{SchedError, SchedResult};
use crate::fs::LocalFileSystem;
use crate::job::{JobDescription, JobId};
use crate::scheduler::{
    Adapter, Capabilities, HpcScheduler, Observation, SchedulerConfig, Submission,
};
use crate::script::{ScriptHeader, shell_quote};

/// Interval between liveness checks while a cancelled job shuts down.
const KILL_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Configuration for the direct adapter.
#[derive(Debug, Clone)]
pub struct DirectConfig {
    /// Time between SIGTERM and SIGKILL, both on cancel and on walltime expiry.
    pub kill_grace_period: Duration,

    /// Shell used to launch, check and signal jobs.
    pub shell: String,
}

impl Default for DirectConfig {
    fn default() -> Self {
        Self {
            kill_grace_period: Duration::from_secs(3),
            shell: "bash".to_string(),
        }
    }
}

impl DirectConfig {
    /// Set the grace period before SIGKILL.
    pub fn with_kill_grace_period(mut self, grace: Duration) -> Self {
        self.kill_grace_period = grace;
        self
    }

    /// Set the shell.
    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }
}

/// Adapter that runs each job as a detached process group on the host the
/// execution channel reaches.
///
/// There is a single node and no queue: `queue_name`, `num_nodes` and
/// `mpi_processes_per_node` are accepted and ignored. `time_reserved` is
/// enforced with `timeout(1)`.
#[derive(Debug, Clone, Default)]
pub struct DirectAdapter {
    config: DirectConfig,
}

impl DirectAdapter {
    /// Create a new direct adapter with the given configuration.
    pub fn new(config: DirectConfig) -> Self {
        Self { config }
    }

    /// Get the configuration.
    pub fn config(&self) -> &DirectConfig {
        &self.config
    }

    /// Shell line that starts the script in a new session and prints its PID
    /// and start time as `<pid>:<start time>`.
    ///
    /// The session leader's PID doubles as the process group ID, so the
    /// whole job tree can be signalled at once.
    pub fn launch_command(&self, desc: &JobDescription, capture: &CapturePaths) -> String {
        let mut line = String::from("setsid ");

        if let Some(time) = desc.time_reserved {
            line.push_str(&format!(
                "timeout --kill-after={}s {}s ",
                self.config.kill_grace_period.as_secs().max(1),
                time.as_secs().max(1)
            ));
        }

        line.push_str(&format!(
            "{} {} </dev/null >>{} 2>>{} & pid=$!; \
             s=$(cat /proc/$pid/stat 2>/dev/null); s=${{s##*) }}; set -- $s; echo \"$pid:${{20}}\"",
            shell_quote(&self.config.shell),
            shell_quote(&capture.script.to_string_lossy()),
            shell_quote(&capture.stdout_log.to_string_lossy()),
            shell_quote(&capture.stderr_log.to_string_lossy()),
        ));
        line
    }

    /// Shell snippet printing the state and start time of `pid`, or a marker.
    pub fn process_state_command(pid: u32) -> String {
        format!(
            "if [ -r /proc/{pid}/stat ]; then s=$(< /proc/{pid}/stat); s=${{s##*) }}; set -- $s; echo \"$1 ${{20}}\"; \
             elif kill -0 {pid} 2>/dev/null; then echo R; \
             else echo {GONE_MARKER}; fi"
        )
    }

    /// Shell snippet reporting the sentinel, or else the process state.
    pub fn status_command(pid: u32, capture: &CapturePaths) -> String {
        format!(
            "if [ -e {sentinel} ]; then echo {SENTINEL_MARKER}; else {state}; fi",
            sentinel = shell_quote(&capture.exit_code.to_string_lossy()),
            state = Self::process_state_command(pid),
        )
    }

    async fn shell(
        &self,
        channel: &dyn ExecutionChannel,
        script: String,
    ) -> SchedResult<CommandOutput> {
        tracing::debug!("Running {} -c {}", self.config.shell, script);
        channel
            .run(
                &self.config.shell,
                &["-c".to_string(), script],
                None,
                &BTreeMap::new(),
            )
            .await
            .map_err(|e| SchedError::channel(&self.config.shell, e))
    }

    /// Send `signal` to the process group led by `pid`.
    ///
    /// Returns `false` when the group no longer exists.
    async fn signal_group(
        &self,
        channel: &dyn ExecutionChannel,
        pid: u32,
        signal: &str,
    ) -> SchedResult<bool> {
        let output = self
            .shell(channel, format!("kill -{signal} -- -{pid}"))
            .await?;

        if output.success() {
            Ok(true)
        } else if parser::is_no_such_process(&output.stderr) {
            Ok(false)
        } else {
            Err(SchedError::parse("kill", output.stderr.trim()))
        }
    }
}

#[async_trait]
impl Adapter for DirectAdapter {
    fn capabilities(&self) -> Capabilities {
        Capabilities {
            backend: "direct",
            supports_queues: false,
            supports_multi_node: false,
            enforces_walltime: true,
        }
    }

    fn script_header(&self, desc: &JobDescription) -> ScriptHeader {
        if desc.queue_name.is_some()
            || desc.num_nodes > 1
            || desc.mpi_processes_per_node.is_some()
        {
            tracing::debug!(
                "Direct backend ignores queue {:?}, {} nodes and {:?} processes per node of job {}",
                desc.queue_name,
                desc.num_nodes,
                desc.mpi_processes_per_node,
                desc.name
            );
        }
        ScriptHeader::default()
    }

    async fn submit(
        &self,
        channel: &dyn ExecutionChannel,
        desc: &JobDescription,
        capture: &CapturePaths,
    ) -> SchedResult<Submission> {
        let launcher = self.launch_command(desc, capture);
        tracing::debug!("Launching {}", launcher);

        let output = channel
            .run(
                &self.config.shell,
                &["-c".to_string(), launcher],
                desc.working_directory.as_deref(),
                &BTreeMap::new(),
            )
            .await
            .map_err(|e| {
                SchedError::Submission(format!("cannot run {}: {e}", self.config.shell))
            })?;

        if !output.success() {
            return Err(SchedError::Submission(format!(
                "launcher exited with {:?}: {}",
                output.exit_code,
                output.stderr.trim()
            )));
        }

        let process = parser::parse_launch_output(&output.stdout)?;
        if process.start_time.is_none() {
            tracing::debug!("No start time for process {}", process.pid);
        }
        Ok(Submission {
            job_id: JobId::new(capture.token.clone()),
            handle: process.to_string(),
        })
    }

    async fn query(
        &self,
        channel: &dyn ExecutionChannel,
        handle: &str,
        capture: &CapturePaths,
    ) -> SchedResult<Observation> {
        let process = ProcessHandle::parse(handle)?;
        let output = self
            .shell(channel, Self::status_command(process.pid, capture))
            .await?;

        Ok(Observation::status(parser::parse_status_output(
            &output.stdout,
            &process,
        )))
    }

    async fn terminate(&self, channel: &dyn ExecutionChannel, handle: &str) -> SchedResult<()> {
        let process = ProcessHandle::parse(handle)?;
        let pid = process.pid;

        let output = self
            .shell(channel, Self::process_state_command(pid))
            .await?;
        if parser::is_reused_pid(&output.stdout, &process) {
            tracing::debug!("PID {} now belongs to another process", pid);
            return Ok(());
        }

        if !self.signal_group(channel, pid, "TERM").await? {
            tracing::debug!("Process group {} already gone", pid);
            return Ok(());
        }

        let deadline = Instant::now() + self.config.kill_grace_period;
        while Instant::now() < deadline {
            tokio::time::sleep(KILL_POLL_INTERVAL).await;
            if !self.signal_group(channel, pid, "0").await? {
                return Ok(());
            }
        }

        tracing::warn!(
            "Process group {} survived SIGTERM for {:?}, sending SIGKILL",
            pid,
            self.config.kill_grace_period
        );
        self.signal_group(channel, pid, "KILL").await?;
        Ok(())
    }
}

impl HpcScheduler<DirectAdapter> {
    /// Scheduler running jobs on this host with the default direct adapter.
    pub fn local(config: SchedulerConfig) -> Self {
        Self::new(
            DirectAdapter::default(),
            Arc::new(LocalChannel::new()),
            Arc::new(LocalFileSystem::new()),
            config,
        )
    }
}
