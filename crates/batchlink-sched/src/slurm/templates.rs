//! SLURM batch script directives.

use std::time::Duration;

use crate::job::JobDescription;
use crate::script::{ScriptHeader, sanitize_name};
use crate::slurm::adapter::SlurmConfig;

/// Generate the `#SBATCH` header and setup lines for a job.
pub fn generate_header(desc: &JobDescription, config: &SlurmConfig) -> ScriptHeader {
    let mut directives = Vec::new();

    directives.push(format!("#SBATCH --job-name={}", sanitize_name(&desc.name)));

    if let Some(time) = desc.time_reserved {
        directives.push(format!("#SBATCH --time={}", format_time(time)));
    }

    if let Some(ref partition) = desc.queue_name {
        directives.push(format!("#SBATCH --partition={partition}"));
    }

    directives.push(format!("#SBATCH --nodes={}", desc.num_nodes));

    if let Some(ppn) = desc.mpi_processes_per_node {
        directives.push(format!("#SBATCH --ntasks-per-node={ppn}"));
        directives.push("#SBATCH --overcommit".to_string());
    }

    if let Some(ref account) = config.account {
        directives.push(format!("#SBATCH --account={account}"));
    }

    for directive in &config.extra_directives {
        directives.push(format!("#SBATCH {directive}"));
    }

    let setup = config
        .modules
        .iter()
        .map(|module| format!("module load {module}"))
        .collect();

    ScriptHeader { directives, setup }
}

/// Format a duration as a SLURM time limit (D-HH:MM:SS or HH:MM:SS).
///
/// Partial minutes are kept, SLURM accepts seconds.
pub fn format_time(time: Duration) -> String {
    let total = time.as_secs().max(1);
    let days = total / 86_400;
    let hours = (total % 86_400) / 3_600;
    let minutes = (total % 3_600) / 60;
    let seconds = total % 60;

    if days > 0 {
        format!("{days}-{hours:02}:{minutes:02}:{seconds:02}")
    } else {
        format!("{hours:02}:{minutes:02}:{seconds:02}")
    }
}
