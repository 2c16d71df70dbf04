//! End-to-end tests running real jobs with the direct scheduler.
//!
//! Requires bash, setsid and timeout on the host.

mod common;

use std::sync::Arc;
use std::time::Duration;

use batchlink_sched::{
    DirectScheduler, JobDescription, JobStatus, SchedError, Scheduler, SchedulerConfig,
};
use tempfile::TempDir;

use common::init_tracing;

const WAIT: Duration = Duration::from_secs(20);

fn scheduler(tmp: &TempDir) -> DirectScheduler {
    DirectScheduler::local(config(tmp))
}

fn config(tmp: &TempDir) -> SchedulerConfig {
    SchedulerConfig::new(tmp.path().join("work"))
        .with_poll_interval(Duration::from_millis(50))
        .with_capture_retries(3, Duration::from_millis(50))
}

#[tokio::test]
async fn test_exit_code_round_trip() {
    init_tracing();
    let tmp = TempDir::new().unwrap();
    let scheduler = scheduler(&tmp);

    for code in [0, 1, 7, 255] {
        let job_id = scheduler
            .submit(JobDescription::new("exit").with_argument(code.to_string()))
            .await
            .unwrap();
        assert_eq!(scheduler.wait(&job_id, WAIT).await.unwrap(), Some(code));
        assert_eq!(scheduler.get_status(&job_id).await.unwrap(), JobStatus::Done);
        assert_eq!(scheduler.get_exit_code(&job_id).await.unwrap(), Some(code));
    }
}

#[tokio::test]
async fn test_sentinel_removed_after_read() {
    init_tracing();
    let tmp = TempDir::new().unwrap();
    let scheduler = scheduler(&tmp);

    let job_id = scheduler.submit(JobDescription::new("true")).await.unwrap();
    assert_eq!(scheduler.wait(&job_id, WAIT).await.unwrap(), Some(0));

    let sentinel = tmp
        .path()
        .join("work")
        .join("exit")
        .join(format!("{job_id}.code"));
    assert!(!sentinel.exists());
}

#[tokio::test]
async fn test_environment_is_propagated() {
    init_tracing();
    let tmp = TempDir::new().unwrap();
    let scheduler = scheduler(&tmp);
    let check = r#"test "$GREETING" = "hello 'world'""#;

    let job_id = scheduler
        .submit(JobDescription::new(check).with_env("GREETING", "hello 'world'"))
        .await
        .unwrap();
    assert_eq!(scheduler.wait(&job_id, WAIT).await.unwrap(), Some(0));

    let job_id = scheduler.submit(JobDescription::new(check)).await.unwrap();
    assert_eq!(scheduler.wait(&job_id, WAIT).await.unwrap(), Some(1));
}

#[tokio::test]
async fn test_output_redirection() {
    init_tracing();
    let tmp = TempDir::new().unwrap();
    let scheduler = scheduler(&tmp);
    let stdout = tmp.path().join("job.out");
    let stderr = tmp.path().join("job.err");

    let desc = JobDescription::new("sh")
        .with_arguments(["-c", "'echo to-out; echo to-err >&2'"])
        .with_stdout_file(&stdout)
        .with_stderr_file(&stderr);
    let job_id = scheduler.submit(desc).await.unwrap();
    assert_eq!(scheduler.wait(&job_id, WAIT).await.unwrap(), Some(0));

    assert_eq!(std::fs::read_to_string(&stdout).unwrap(), "to-out\n");
    assert_eq!(std::fs::read_to_string(&stderr).unwrap(), "to-err\n");
}

#[tokio::test]
async fn test_default_output_goes_to_work_dir_logs() {
    init_tracing();
    let tmp = TempDir::new().unwrap();
    let scheduler = scheduler(&tmp);

    let job_id = scheduler
        .submit(JobDescription::new("echo").with_argument("hello"))
        .await
        .unwrap();
    assert_eq!(scheduler.wait(&job_id, WAIT).await.unwrap(), Some(0));

    let log = tmp
        .path()
        .join("work")
        .join("logs")
        .join(format!("{job_id}.out"));
    assert_eq!(std::fs::read_to_string(log).unwrap(), "hello\n");
}

#[tokio::test]
async fn test_working_directory() {
    init_tracing();
    let tmp = TempDir::new().unwrap();
    let scheduler = scheduler(&tmp);
    let dir = tmp.path().join("run dir");
    std::fs::create_dir(&dir).unwrap();

    let desc = JobDescription::new("pwd")
        .with_working_directory(&dir)
        .with_stdout_file(tmp.path().join("pwd.out"));
    let job_id = scheduler.submit(desc).await.unwrap();
    assert_eq!(scheduler.wait(&job_id, WAIT).await.unwrap(), Some(0));

    let printed = std::fs::read_to_string(tmp.path().join("pwd.out")).unwrap();
    assert_eq!(printed.trim_end(), dir.to_string_lossy());
}

#[tokio::test]
async fn test_running_job_is_never_pending() {
    init_tracing();
    let tmp = TempDir::new().unwrap();
    let scheduler = scheduler(&tmp);

    let job_id = scheduler
        .submit(JobDescription::new("sleep").with_argument("30"))
        .await
        .unwrap();
    assert_eq!(scheduler.get_status(&job_id).await.unwrap(), JobStatus::Running);
    assert_eq!(scheduler.get_exit_code(&job_id).await.unwrap(), None);

    scheduler.cancel(&job_id).await.unwrap();
    assert_eq!(scheduler.wait(&job_id, WAIT).await.unwrap(), None);
    assert_eq!(scheduler.get_status(&job_id).await.unwrap(), JobStatus::Done);
}

#[tokio::test]
async fn test_wait_timeout_leaves_job_running() {
    init_tracing();
    let tmp = TempDir::new().unwrap();
    let scheduler = scheduler(&tmp);

    let job_id = scheduler
        .submit(JobDescription::new("sleep").with_argument("30"))
        .await
        .unwrap();
    let code = scheduler
        .wait(&job_id, Duration::from_millis(200))
        .await
        .unwrap();
    assert_eq!(code, None);
    assert_eq!(scheduler.get_status(&job_id).await.unwrap(), JobStatus::Running);

    scheduler.cancel(&job_id).await.unwrap();
}

#[tokio::test]
async fn test_cancel_is_idempotent() {
    init_tracing();
    let tmp = TempDir::new().unwrap();
    let scheduler = scheduler(&tmp);

    let job_id = scheduler
        .submit(JobDescription::new("sleep").with_argument("30"))
        .await
        .unwrap();
    scheduler.cancel(&job_id).await.unwrap();
    scheduler.cancel(&job_id).await.unwrap();

    scheduler.wait(&job_id, WAIT).await.unwrap();
    assert_eq!(scheduler.get_status(&job_id).await.unwrap(), JobStatus::Done);
    scheduler.cancel(&job_id).await.unwrap();

    // Finished jobs can be cancelled too.
    let job_id = scheduler.submit(JobDescription::new("true")).await.unwrap();
    assert_eq!(scheduler.wait(&job_id, WAIT).await.unwrap(), Some(0));
    scheduler.cancel(&job_id).await.unwrap();
    assert_eq!(scheduler.get_exit_code(&job_id).await.unwrap(), Some(0));
}

#[tokio::test]
async fn test_walltime_is_enforced() {
    init_tracing();
    let tmp = TempDir::new().unwrap();
    let scheduler = scheduler(&tmp);

    let desc = JobDescription::new("sleep")
        .with_argument("60")
        .with_time_reserved(Duration::from_secs(1));
    let job_id = scheduler.submit(desc).await.unwrap();

    // Killed before the sentinel could be written.
    assert_eq!(scheduler.wait(&job_id, WAIT).await.unwrap(), None);
    assert_eq!(scheduler.get_status(&job_id).await.unwrap(), JobStatus::Done);
}

#[tokio::test]
async fn test_script_prefix_runs_before_command() {
    init_tracing();
    let tmp = TempDir::new().unwrap();
    let scheduler =
        DirectScheduler::local(config(&tmp).with_script_prefix("export INJECTED=from_prefix"));

    let job_id = scheduler
        .submit(JobDescription::new(r#"test "$INJECTED" = from_prefix"#))
        .await
        .unwrap();
    assert_eq!(scheduler.wait(&job_id, WAIT).await.unwrap(), Some(0));
}

#[tokio::test]
async fn test_queue_and_nodes_are_ignored() {
    init_tracing();
    let tmp = TempDir::new().unwrap();
    let scheduler = scheduler(&tmp);
    assert!(!scheduler.capabilities().supports_queues);

    let desc = JobDescription::new("true")
        .with_queue("gpu")
        .with_num_nodes(16)
        .with_mpi_processes_per_node(4);
    let job_id = scheduler.submit(desc).await.unwrap();
    assert_eq!(scheduler.wait(&job_id, WAIT).await.unwrap(), Some(0));
}

#[tokio::test]
async fn test_submit_without_command_fails() {
    init_tracing();
    let tmp = TempDir::new().unwrap();
    let scheduler = scheduler(&tmp);

    let err = scheduler
        .submit(JobDescription::default())
        .await
        .unwrap_err();
    assert!(matches!(err, SchedError::InvalidArgument(_)));
    assert!(scheduler.jobs().await.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_jobs() {
    init_tracing();
    let tmp = TempDir::new().unwrap();
    let scheduler = Arc::new(scheduler(&tmp));

    let mut handles = Vec::new();
    for code in 0..8 {
        let scheduler = Arc::clone(&scheduler);
        handles.push(tokio::spawn(async move {
            let job_id = scheduler
                .submit(JobDescription::new("exit").with_argument(code.to_string()))
                .await
                .unwrap();
            (code, scheduler.wait(&job_id, WAIT).await.unwrap())
        }));
    }

    for handle in handles {
        let (code, observed) = handle.await.unwrap();
        assert_eq!(observed, Some(code));
    }
    assert_eq!(scheduler.jobs().await.len(), 8);
}
