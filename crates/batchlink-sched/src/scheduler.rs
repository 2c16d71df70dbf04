//! The scheduler contract and its shared implementation.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::OnceCell;
use tokio::time::Instant;

use crate::capture::{self, CapturePaths};
use crate::channel::ExecutionChannel;
use crate::error::{SchedError, SchedResult};
use crate::fs::FileSystem;
use crate::job::{JobDescription, JobId, JobRecord, JobStatus};
use crate::script::{ScriptBuilder, ScriptHeader};
use crate::table::JobTable;

/// Default number of records with a retrieved exit code kept in memory.
const MAX_RETAINED_JOBS: usize = 10_000;

/// What a backend can do with the fields of a [`JobDescription`].
///
/// Fields a backend does not support are accepted and ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// Short backend name, e.g. `"slurm"`.
    pub backend: &'static str,
    /// Whether `queue_name` selects a queue.
    pub supports_queues: bool,
    /// Whether `num_nodes` and `mpi_processes_per_node` are honoured.
    pub supports_multi_node: bool,
    /// Whether `time_reserved` is enforced by terminating the job.
    pub enforces_walltime: bool,
}

/// Configuration shared by all schedulers.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Directory for job scripts, sentinels and default logs. Must be
    /// visible both to the filesystem collaborator and to running jobs.
    pub work_dir: PathBuf,

    /// Interval between status polls in `wait`.
    pub poll_interval: Duration,

    /// How many times a missing sentinel is re-read before giving up.
    pub capture_attempts: u32,

    /// Delay between sentinel reads.
    pub capture_retry_delay: Duration,

    /// Records with a retrieved exit code kept before the oldest are dropped.
    pub max_retained_jobs: usize,

    /// Shell fragment inserted at the top of every job script.
    pub script_prefix: Option<String>,
}

fn absolute_work_dir(path: PathBuf) -> PathBuf {
    match std::path::absolute(&path) {
        Ok(absolute) => absolute,
        Err(e) => {
            tracing::warn!("Cannot resolve work directory {}: {}", path.display(), e);
            path
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            work_dir: std::env::var("BATCHLINK_WORK_DIR")
                .map(PathBuf::from)
                .or_else(|_| std::env::var("HOME").map(|d| PathBuf::from(d).join(".batchlink")))
                .unwrap_or_else(|_| std::env::temp_dir().join("batchlink")),
            poll_interval: Duration::from_secs(1),
            capture_attempts: 5,
            capture_retry_delay: Duration::from_secs(1),
            max_retained_jobs: MAX_RETAINED_JOBS,
            script_prefix: None,
        }
    }
}

impl SchedulerConfig {
    /// Create a configuration using `work_dir`.
    ///
    /// A relative `work_dir` is resolved against the current directory, as
    /// job scripts change directory before publishing their exit code.
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: absolute_work_dir(work_dir.into()),
            ..Default::default()
        }
    }

    /// Set the polling interval used by `wait`.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set how sentinel files are re-read.
    pub fn with_capture_retries(mut self, attempts: u32, delay: Duration) -> Self {
        self.capture_attempts = attempts;
        self.capture_retry_delay = delay;
        self
    }

    /// Set the number of finished records kept in memory.
    pub fn with_max_retained_jobs(mut self, max: usize) -> Self {
        self.max_retained_jobs = max;
        self
    }

    /// Set the job script prefix.
    pub fn with_script_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.script_prefix = Some(prefix.into());
        self
    }
}

/// Uniform interface over job-execution backends.
#[async_trait]
pub trait Scheduler: Send + Sync {
    /// What this backend supports.
    fn capabilities(&self) -> Capabilities;

    /// Interval used by [`Scheduler::wait`] between polls.
    fn poll_interval(&self) -> Duration;

    /// Submit a job and return its ID.
    ///
    /// Fails with [`SchedError::InvalidArgument`] before any backend call
    /// when the description has no command.
    async fn submit(&self, desc: JobDescription) -> SchedResult<JobId>;

    /// Query the backend once for the job's status.
    async fn get_status(&self, job_id: &JobId) -> SchedResult<JobStatus>;

    /// Exit code of a finished job.
    ///
    /// `None` while the job is not `Done`, or when the code could not be
    /// recovered (e.g. the job was killed).
    async fn get_exit_code(&self, job_id: &JobId) -> SchedResult<Option<i32>>;

    /// Ask the backend to terminate the job.
    ///
    /// Idempotent. Returns before the job is necessarily `Done`.
    async fn cancel(&self, job_id: &JobId) -> SchedResult<()>;

    /// IDs of all jobs currently tracked.
    async fn jobs(&self) -> Vec<JobId>;

    /// Poll until the job is `Done` or `timeout` elapses.
    ///
    /// Returns the exit code, or `None` on timeout. Never cancels the job.
    async fn wait(&self, job_id: &JobId, timeout: Duration) -> SchedResult<Option<i32>> {
        let deadline = Instant::now() + timeout;

        loop {
            if self.get_status(job_id).await?.is_terminal() {
                return self.get_exit_code(job_id).await;
            }

            let now = Instant::now();
            if now >= deadline {
                tracing::debug!("Timeout waiting for job {}", job_id);
                return Ok(None);
            }

            tokio::time::sleep(self.poll_interval().min(deadline - now)).await;
        }
    }
}

/// Backend ID and handle returned by a successful submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    /// ID handed to the caller.
    pub job_id: JobId,
    /// Backend handle used for queries and termination.
    pub handle: String,
}

/// One status observation from a backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Observation {
    /// Translated status, `None` when the backend reported an unknown state.
    pub status: Option<JobStatus>,
    /// Exit code reported by the backend itself, if any.
    pub exit_code: Option<i32>,
}

impl Observation {
    /// An observation carrying only a status.
    pub fn status(status: JobStatus) -> Self {
        Self {
            status: Some(status),
            exit_code: None,
        }
    }

    /// The job is gone from the backend's listing, so it has finished.
    pub fn absent() -> Self {
        Self::status(JobStatus::Done)
    }

    /// The backend reported a state this crate does not know.
    pub fn unknown() -> Self {
        Self::default()
    }
}

/// Backend-specific commands behind a [`HpcScheduler`].
#[async_trait]
pub trait Adapter: Send + Sync {
    /// What this backend supports.
    fn capabilities(&self) -> Capabilities;

    /// Directives and setup lines for the job script.
    fn script_header(&self, desc: &JobDescription) -> ScriptHeader;

    /// Hand the already written script at `capture.script` to the backend.
    async fn submit(
        &self,
        channel: &dyn ExecutionChannel,
        desc: &JobDescription,
        capture: &CapturePaths,
    ) -> SchedResult<Submission>;

    /// Query the backend once.
    async fn query(
        &self,
        channel: &dyn ExecutionChannel,
        handle: &str,
        capture: &CapturePaths,
    ) -> SchedResult<Observation>;

    /// Ask the backend to terminate the job. "Not found" counts as success.
    async fn terminate(&self, channel: &dyn ExecutionChannel, handle: &str) -> SchedResult<()>;
}

/// Scheduler implementation shared by all backends.
pub struct HpcScheduler<A: Adapter> {
    adapter: A,
    channel: Arc<dyn ExecutionChannel>,
    fs: Arc<dyn FileSystem>,
    config: SchedulerConfig,
    builder: ScriptBuilder,
    table: JobTable,
    layout: OnceCell<()>,
}

impl<A: Adapter> HpcScheduler<A> {
    /// Create a scheduler driving `adapter` through the given collaborators.
    pub fn new(
        adapter: A,
        channel: Arc<dyn ExecutionChannel>,
        fs: Arc<dyn FileSystem>,
        mut config: SchedulerConfig,
    ) -> Self {
        config.work_dir = absolute_work_dir(config.work_dir);
        let builder = match config.script_prefix {
            Some(ref prefix) => ScriptBuilder::new().with_prefix(prefix.clone()),
            None => ScriptBuilder::new(),
        };
        let table = JobTable::new(config.max_retained_jobs);

        Self {
            adapter,
            channel,
            fs,
            config,
            builder,
            table,
            layout: OnceCell::new(),
        }
    }

    /// Replace the script builder, e.g. to set a prefix.
    pub fn with_script_builder(mut self, builder: ScriptBuilder) -> Self {
        self.builder = builder;
        self
    }

    /// The backend adapter.
    pub fn adapter(&self) -> &A {
        &self.adapter
    }

    /// The configuration.
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// The script builder.
    pub fn script_builder(&self) -> &ScriptBuilder {
        &self.builder
    }

    /// Render the job script without submitting it.
    pub fn render_script(
        &self,
        desc: &JobDescription,
        capture: &CapturePaths,
    ) -> SchedResult<String> {
        let header = self.adapter.script_header(desc);
        self.builder.render(desc, &header, capture)
    }

    async fn ensure_layout(&self) -> SchedResult<()> {
        self.layout
            .get_or_try_init(|| async {
                for dir in CapturePaths::directories(&self.config.work_dir) {
                    self.fs.create_dir_all(&dir).await?;
                }
                Ok::<(), SchedError>(())
            })
            .await?;
        Ok(())
    }

    async fn record(&self, job_id: &JobId) -> SchedResult<JobRecord> {
        self.table
            .get(job_id)
            .await
            .ok_or_else(|| SchedError::NotFound(job_id.clone()))
    }

    /// Delete the sentinel and the script of a job whose code has been read.
    async fn remove_capture_files(&self, capture: &CapturePaths) {
        for path in [&capture.exit_code, &capture.script] {
            if let Err(e) = self.fs.unlink(path).await {
                tracing::debug!("Cannot remove {}: {}", path.display(), e);
            }
        }
    }

    async fn retrieved(&self, job_id: &JobId, code: Option<i32>) -> Option<i32> {
        self.table
            .update(job_id, |r| {
                if code.is_some() {
                    r.exit_code = code;
                }
                r.exit_code_retrieved = true;
            })
            .await;
        self.table.reclaim().await;
        code
    }
}

#[async_trait]
impl<A: Adapter> Scheduler for HpcScheduler<A> {
    fn capabilities(&self) -> Capabilities {
        self.adapter.capabilities()
    }

    fn poll_interval(&self) -> Duration {
        self.config.poll_interval
    }

    async fn submit(&self, desc: JobDescription) -> SchedResult<JobId> {
        desc.validate()?;

        let capture = CapturePaths::generate(&self.config.work_dir);
        let script = self.render_script(&desc, &capture)?;
        tracing::debug!("Job script for {}:\n{}", capture.token, script);

        self.ensure_layout().await?;
        self.fs.write(&capture.script, script.as_bytes()).await?;

        let submission = match self
            .adapter
            .submit(self.channel.as_ref(), &desc, &capture)
            .await
        {
            Ok(submission) => submission,
            Err(e) => {
                tracing::error!("Submission of job {} failed: {}", desc.name, e);
                if let Err(e) = self.fs.unlink(&capture.script).await {
                    tracing::debug!("Cannot remove {}: {}", capture.script.display(), e);
                }
                return Err(e);
            }
        };

        let job_id = submission.job_id.clone();
        if self.table.get(&job_id).await.is_some() {
            tracing::warn!("Backend reused job ID {}, replacing its record", job_id);
        }
        self.table
            .insert(JobRecord::new(job_id.clone(), submission.handle, capture))
            .await;

        tracing::info!(
            "Job {} submitted to {} as {}",
            desc.name,
            self.adapter.capabilities().backend,
            job_id
        );
        Ok(job_id)
    }

    async fn get_status(&self, job_id: &JobId) -> SchedResult<JobStatus> {
        let record = self.record(job_id).await?;
        if record.status.is_terminal() {
            return Ok(record.status);
        }

        let observation = match self
            .adapter
            .query(self.channel.as_ref(), &record.handle, &record.capture)
            .await
        {
            Ok(observation) => observation,
            Err(e) => {
                tracing::warn!("Status query for job {} failed: {}", job_id, e);
                if capture::sentinel_exists(self.fs.as_ref(), &record.capture.exit_code).await {
                    Observation::status(JobStatus::Done)
                } else {
                    Observation::unknown()
                }
            }
        };

        let status = self
            .table
            .update(job_id, |r| {
                if observation.exit_code.is_some() {
                    r.backend_exit_code = observation.exit_code;
                }
                match observation.status {
                    Some(status) => r.observe(status),
                    None => r.status,
                }
            })
            .await
            .ok_or_else(|| SchedError::NotFound(job_id.clone()))?;

        tracing::debug!("Job {} is {}", job_id, status);
        Ok(status)
    }

    async fn get_exit_code(&self, job_id: &JobId) -> SchedResult<Option<i32>> {
        if !self.get_status(job_id).await?.is_terminal() {
            return Ok(None);
        }

        let record = self.record(job_id).await?;
        if record.exit_code.is_some() || record.exit_code_retrieved {
            return Ok(self.retrieved(job_id, record.exit_code).await);
        }

        // A cancelled job usually dies before writing its sentinel.
        let attempts = if record.cancel_requested {
            1
        } else {
            self.config.capture_attempts
        };

        match capture::read_exit_code(
            self.fs.as_ref(),
            &record.capture.exit_code,
            attempts,
            self.config.capture_retry_delay,
        )
        .await
        {
            Ok(code) => {
                // Cached before the sentinel goes away, so a concurrent
                // reader that misses the file finds the code in the record.
                let code = self.retrieved(job_id, Some(code)).await;
                self.remove_capture_files(&record.capture).await;
                Ok(code)
            }
            Err(e) => {
                tracing::warn!("Job {}: {}", job_id, e);
                // Settle the outcome once: a code cached by a concurrent
                // reader wins, then the backend's own code, else none.
                let code = self
                    .table
                    .update(job_id, |r| {
                        if r.exit_code.is_none() {
                            r.exit_code = r.backend_exit_code;
                        }
                        r.exit_code_retrieved = true;
                        r.exit_code
                    })
                    .await
                    .flatten();
                self.table.reclaim().await;
                Ok(code)
            }
        }
    }

    async fn cancel(&self, job_id: &JobId) -> SchedResult<()> {
        let record = self.record(job_id).await?;
        if record.status.is_terminal() {
            tracing::debug!("Job {} already done, nothing to cancel", job_id);
            return Ok(());
        }

        self.table
            .update(job_id, |r| r.cancel_requested = true)
            .await;

        match self
            .adapter
            .terminate(self.channel.as_ref(), &record.handle)
            .await
        {
            Ok(()) => tracing::info!("Cancellation of job {} requested", job_id),
            Err(e) => {
                let err = SchedError::Cancellation {
                    job_id: job_id.clone(),
                    message: e.to_string(),
                };
                tracing::warn!("{}", err);
            }
        }
        Ok(())
    }

    async fn jobs(&self) -> Vec<JobId> {
        self.table.ids().await
    }
}
