//! Parsers for PBS command output.

use crate::error::{SchedError, SchedResult};
use crate::pbs::adapter::{PbsJobInfo, PbsState};

/// Parse qsub output to extract job ID.
///
/// qsub output format varies by PBS implementation:
/// - PBS Pro: "12345.pbs-server"
/// - Torque: "12345.server.domain.com"
/// - Some sites: just "12345"
pub fn parse_qsub_output(output: &str) -> SchedResult<String> {
    let trimmed = output.trim();
    // Warnings may precede the ID; it is always the last line.
    let job_id = trimmed.lines().last().unwrap_or("").trim();

    let numeric = job_id.split('.').next().unwrap_or("");
    // Array jobs: "12345[].server"
    let numeric = numeric.strip_suffix("[]").unwrap_or(numeric);

    if !numeric.is_empty()
        && numeric.chars().all(|c| c.is_ascii_digit())
        && !job_id.contains(char::is_whitespace)
    {
        return Ok(job_id.to_string());
    }

    Err(SchedError::Submission(format!(
        "unexpected qsub output: {trimmed:?}"
    )))
}

/// Parse qstat full output (-f flag) to extract job information.
///
/// qstat -f output format:
/// ```text
/// Job Id: 12345.pbs-server
///     Job_Name = my_job
///     job_state = R
///     queue = batch
///     exit_status = 0
/// ```
///
/// Returns `None` if no job is listed.
pub fn parse_qstat_full_output(output: &str) -> Option<PbsJobInfo> {
    let mut job_id = String::new();
    let mut state = None;
    let mut exit_status = None;

    for line in output.lines() {
        let line = line.trim();

        if let Some(id) = line.strip_prefix("Job Id:") {
            if !job_id.is_empty() {
                // Only the first job of a listing is of interest.
                break;
            }
            job_id = id.trim().to_string();
            continue;
        }

        if let Some((key, value)) = line.split_once('=') {
            let value = value.trim();
            match key.trim() {
                "job_state" => state = Some(parse_pbs_state(value)),
                // Torque writes "exit_status", PBS Pro "Exit_status"
                "exit_status" | "Exit_status" => exit_status = value.parse().ok(),
                _ => {}
            }
        }
    }

    if job_id.is_empty() {
        return None;
    }

    Some(PbsJobInfo {
        job_id,
        state: state.unwrap_or_else(|| PbsState::Unknown(String::new())),
        exit_status,
    })
}

/// Check qstat/qdel stderr for the "job is not known" error.
pub fn is_unknown_job_error(stderr: &str) -> bool {
    stderr.contains("Unknown Job Id") || stderr.contains("does not exist")
}

/// Check qstat/qdel stderr for PBS Pro's "job has finished" error.
///
/// PBS Pro answers `qstat -f` for a job that left the live listing with
/// "Job has finished, use -x or -H to obtain historical job information".
pub fn is_finished_job_error(stderr: &str) -> bool {
    stderr.contains("Job has finished")
}

/// Check whether a listed job ID refers to the job submitted as `handle`.
///
/// Servers may list the ID with a different or longer host suffix than
/// qsub printed, so only the sequence number is compared.
pub fn is_same_job(listed: &str, handle: &str) -> bool {
    fn sequence(id: &str) -> &str {
        id.trim().split('.').next().unwrap_or("")
    }
    sequence(listed) == sequence(handle)
}

/// Parse PBS state string to PbsState enum.
pub fn parse_pbs_state(state: &str) -> PbsState {
    match state.trim().to_uppercase().as_str() {
        "Q" | "QUEUED" => PbsState::Queued,
        "W" | "WAITING" => PbsState::Waiting,
        "H" | "HELD" => PbsState::Held,
        "R" | "RUNNING" => PbsState::Running,
        "E" | "EXITING" => PbsState::Exiting,
        "S" | "SUSPENDED" | "U" => PbsState::Suspended,
        "T" | "TRANSIT" => PbsState::Transit,
        "M" | "MOVED" => PbsState::Moved,
        "B" | "BEGUN" => PbsState::ArrayRunning,
        "C" | "COMPLETED" => PbsState::Completed,
        "F" | "FINISHED" => PbsState::Finished,
        "X" | "EXPIRED" => PbsState::Expired,
        _ => PbsState::Unknown(state.to_string()),
    }
}

/// Check qdel's result.
///
/// A job that is already gone or finishing counts as cancelled.
pub fn parse_qdel_output(exit_code: Option<i32>, stderr: &str) -> SchedResult<()> {
    let stderr = stderr.trim();
    if is_unknown_job_error(stderr)
        || is_finished_job_error(stderr)
        || stderr.contains("has already finished")
        || stderr.contains("being deleted")
    {
        return Ok(());
    }

    if exit_code != Some(0) {
        return Err(SchedError::parse("qdel", stderr));
    }

    Ok(())
}
