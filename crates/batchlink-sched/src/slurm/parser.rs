//! Parsers for SLURM command output.

use crate::error::{SchedError, SchedResult};
use crate::slurm::adapter::SlurmState;

/// Parse sbatch output to extract the job ID.
///
/// sbatch output format: "Submitted batch job 12345", optionally followed by
/// " on cluster <name>". `--parsable` output ("12345;cluster") is accepted too.
pub fn parse_sbatch_output(output: &str) -> SchedResult<String> {
    let trimmed = output.trim();
    let rest = trimmed.strip_prefix("Submitted batch job ").unwrap_or(trimmed);

    let job_id = rest
        .split_whitespace()
        .next()
        .and_then(|token| token.split(';').next())
        .unwrap_or("");

    if !job_id.is_empty() && job_id.chars().all(|c| c.is_ascii_digit()) {
        return Ok(job_id.to_string());
    }

    Err(SchedError::Submission(format!(
        "unexpected sbatch output: {trimmed:?}"
    )))
}

/// Parse `squeue -h -j <id> -o %T` output.
///
/// Returns `None` when the job is not listed. Array jobs print one line per
/// task; the first line wins.
pub fn parse_squeue_output(output: &str) -> Option<SlurmState> {
    output
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(parse_slurm_state)
}

/// Check squeue's stderr for the "job is not known" error.
pub fn is_unknown_job_error(stderr: &str) -> bool {
    stderr.contains("Invalid job id") || stderr.contains("does not exist")
}

/// Parse SLURM state string.
pub fn parse_slurm_state(state: &str) -> SlurmState {
    // squeue may append a reason, e.g. "CANCELLED by 1000"
    let code = state.split_whitespace().next().unwrap_or("");
    match code.to_uppercase().as_str() {
        "PENDING" | "PD" => SlurmState::Pending,
        "CONFIGURING" | "CF" => SlurmState::Configuring,
        "REQUEUED" | "RQ" | "REQUEUE_HOLD" | "RH" | "REQUEUE_FED" | "RF" => {
            SlurmState::Requeued
        }
        "RESV_DEL_HOLD" | "RD" => SlurmState::Held,
        "RUNNING" | "R" => SlurmState::Running,
        "SUSPENDED" | "S" | "STOPPED" | "ST" => SlurmState::Suspended,
        "COMPLETING" | "CG" | "STAGE_OUT" | "SO" | "SIGNALING" | "SI" => SlurmState::Completing,
        "RESIZING" | "RS" => SlurmState::Resizing,
        "COMPLETED" | "CD" => SlurmState::Completed,
        "FAILED" | "F" | "BOOT_FAIL" | "BF" | "SPECIAL_EXIT" | "SE" => SlurmState::Failed,
        "TIMEOUT" | "TO" | "DEADLINE" | "DL" => SlurmState::Timeout,
        "CANCELLED" | "CA" | "REVOKED" | "RV" => SlurmState::Cancelled,
        "NODE_FAIL" | "NF" => SlurmState::NodeFail,
        "PREEMPTED" | "PR" => SlurmState::Preempted,
        "OUT_OF_MEMORY" | "OOM" => SlurmState::OutOfMemory,
        _ => SlurmState::Unknown(state.to_string()),
    }
}

/// Check scancel's result.
///
/// A job that is already gone or finishing counts as cancelled.
pub fn parse_scancel_output(exit_code: Option<i32>, stderr: &str) -> SchedResult<()> {
    let stderr = stderr.trim();
    if is_unknown_job_error(stderr) || stderr.contains("already completing") {
        return Ok(());
    }

    if exit_code != Some(0) || stderr.contains("error") {
        return Err(SchedError::parse("scancel", stderr));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobStatus;

    #[test]
    fn test_parse_sbatch_output() {
        let output = "Submitted batch job 12345\n";
        assert_eq!(parse_sbatch_output(output).unwrap(), "12345");

        let output = "Submitted batch job 9999999 on cluster lumi";
        assert_eq!(parse_sbatch_output(output).unwrap(), "9999999");

        let output = "4242;lumi\n";
        assert_eq!(parse_sbatch_output(output).unwrap(), "4242");
    }

    #[test]
    fn test_parse_sbatch_output_error() {
        let output = "sbatch: error: Batch job submission failed: Invalid partition name";
        assert!(matches!(
            parse_sbatch_output(output),
            Err(SchedError::Submission(_))
        ));
        assert!(parse_sbatch_output("").is_err());
    }

    #[test]
    fn test_parse_squeue_output() {
        assert_eq!(parse_squeue_output("RUNNING\n"), Some(SlurmState::Running));
        assert_eq!(parse_squeue_output("\n  PENDING\n"), Some(SlurmState::Pending));
        assert_eq!(
            parse_squeue_output("COMPLETING\nCOMPLETING\n"),
            Some(SlurmState::Completing)
        );
        assert_eq!(parse_squeue_output(""), None);
        assert_eq!(parse_squeue_output("  \n"), None);
    }

    #[test]
    fn test_parse_slurm_state() {
        assert_eq!(parse_slurm_state("PENDING"), SlurmState::Pending);
        assert_eq!(parse_slurm_state("PD"), SlurmState::Pending);
        assert_eq!(parse_slurm_state("RUNNING"), SlurmState::Running);
        assert_eq!(parse_slurm_state("R"), SlurmState::Running);
        assert_eq!(parse_slurm_state("COMPLETED"), SlurmState::Completed);
        assert_eq!(parse_slurm_state("FAILED"), SlurmState::Failed);
        assert_eq!(parse_slurm_state("CANCELLED by 1000"), SlurmState::Cancelled);
        assert!(matches!(
            parse_slurm_state("UNKNOWN_STATE"),
            SlurmState::Unknown(_)
        ));
    }

    #[test]
    fn test_state_table() {
        for code in ["PENDING", "CONFIGURING", "REQUEUED", "REQUEUE_HOLD", "RESV_DEL_HOLD"] {
            assert_eq!(parse_slurm_state(code).status(), Some(JobStatus::Pending), "{code}");
        }
        for code in [
            "RUNNING",
            "SUSPENDED",
            "COMPLETING",
            "STOPPED",
            "RESIZING",
            "SIGNALING",
            "STAGE_OUT",
        ] {
            assert_eq!(parse_slurm_state(code).status(), Some(JobStatus::Running), "{code}");
        }
        for code in [
            "BOOT_FAIL",
            "CANCELLED",
            "COMPLETED",
            "DEADLINE",
            "FAILED",
            "NODE_FAIL",
            "OUT_OF_MEMORY",
            "PREEMPTED",
            "REVOKED",
            "SPECIAL_EXIT",
            "TIMEOUT",
        ] {
            assert_eq!(parse_slurm_state(code).status(), Some(JobStatus::Done), "{code}");
        }
        assert_eq!(parse_slurm_state("WHATEVER").status(), None);
    }

    #[test]
    fn test_parse_scancel_output() {
        assert!(parse_scancel_output(Some(0), "").is_ok());
        assert!(
            parse_scancel_output(
                Some(1),
                "scancel: error: Kill job error on job id 12345: Invalid job id specified"
            )
            .is_ok()
        );
        assert!(parse_scancel_output(Some(0), "scancel: Job 12 is already completing").is_ok());
        assert!(
            parse_scancel_output(Some(1), "scancel: error: Access/permission denied").is_err()
        );
    }
}
