//! Batch job scheduling for direct, SLURM and PBS backends
//!
//! This crate submits, monitors and cancels jobs on heterogeneous execution
//! backends through one interface, the [`Scheduler`] trait.
//!
//! # Overview
//!
//! Every job goes through the same lifecycle:
//! 1. **Submission**: A [`JobDescription`] is rendered into a bash script with
//!    the backend's native directives and handed to its submission tool
//! 2. **Polling**: Each status query runs the backend's query tool once and
//!    folds the native state into [`JobStatus`] (`Pending < Running < Done`,
//!    never moving backwards)
//! 3. **Exit code**: The script publishes the command's exit code to a
//!    sentinel file, which is read back once the job is done, long after the
//!    backend has forgotten it
//!
//! # Supported Backends
//!
//! | Backend | Commands | Notes |
//! |---------|----------|-------|
//! | Direct | bash, setsid, timeout, kill | single node, no queue |
//! | SLURM | sbatch, squeue, scancel | |
//! | PBS/Torque | qsub, qstat, qdel | |
//!
//! Backends are reached through an [`ExecutionChannel`] and a [`FileSystem`],
//! so the same code drives a local host or a remote login node.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use batchlink_sched::{DirectScheduler, JobDescription, Scheduler, SchedulerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let scheduler = DirectScheduler::local(SchedulerConfig::new("/tmp/batchlink"));
//!
//!     let job = JobDescription::new("python3")
//!         .with_arguments(["train.py", "--epochs", "3"])
//!         .with_env("OMP_NUM_THREADS", "4")
//!         .with_time_reserved(Duration::from_secs(3600));
//!
//!     let job_id = scheduler.submit(job).await?;
//!     let exit_code = scheduler.wait(&job_id, Duration::from_secs(7200)).await?;
//!     println!("{job_id} finished with {exit_code:?}");
//!     Ok(())
//! }
//! ```
//!
//! # Example: SLURM
//!
//! ```ignore
//! use std::sync::Arc;
//! use batchlink_sched::{LocalChannel, LocalFileSystem, SchedulerConfig, SlurmScheduler};
//! use batchlink_sched::slurm::{SlurmAdapter, SlurmConfig};
//!
//! let adapter = SlurmAdapter::new(
//!     SlurmConfig::default()
//!         .with_account("project_462000xxx")
//!         .with_module("cray-python"),
//! );
//! let scheduler = SlurmScheduler::new(
//!     adapter,
//!     Arc::new(LocalChannel::new()),
//!     Arc::new(LocalFileSystem::new()),
//!     SchedulerConfig::new("/scratch/project_462000xxx/batchlink"),
//! );
//! ```

pub mod capture;
pub mod channel;
pub mod direct;
pub mod error;
pub mod fs;
pub mod job;
pub mod pbs;
pub mod scheduler;
pub mod script;
pub mod slurm;
mod table;

pub use capture::CapturePaths;
pub use channel::{CommandOutput, ExecutionChannel, LocalChannel};
pub use direct::{DirectAdapter, DirectConfig};
pub use error::{SchedError, SchedResult};
pub use fs::{FileSystem, LocalFileSystem};
pub use job::{JobDescription, JobId, JobStatus};
pub use pbs::{PbsAdapter, PbsConfig};
pub use scheduler::{
    Adapter, Capabilities, HpcScheduler, Observation, Scheduler, SchedulerConfig, Submission,
};
pub use script::{ScriptBuilder, ScriptHeader};
pub use slurm::{SlurmAdapter, SlurmConfig};

/// Scheduler running jobs directly on the host behind the channel.
pub type DirectScheduler = HpcScheduler<DirectAdapter>;

/// Scheduler submitting to SLURM.
pub type SlurmScheduler = HpcScheduler<SlurmAdapter>;

/// Scheduler submitting to PBS Pro or Torque.
pub type PbsScheduler = HpcScheduler<PbsAdapter>;
