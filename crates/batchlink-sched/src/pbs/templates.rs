//! PBS/Torque batch script directives.

use std::time::Duration;

use crate::job::JobDescription;
use crate::pbs::adapter::PbsConfig;
use crate::script::{ScriptHeader, sanitize_name};

/// Generate the `#PBS` header and setup lines for a job.
pub fn generate_header(desc: &JobDescription, config: &PbsConfig) -> ScriptHeader {
    let mut directives = Vec::new();

    directives.push(format!("#PBS -N {}", pbs_name(&desc.name)));

    if let Some(ref queue) = desc.queue_name {
        directives.push(format!("#PBS -q {queue}"));
    }

    if let Some(time) = desc.time_reserved {
        directives.push(format!("#PBS -l walltime={}", format_walltime(time)));
    }

    match desc.mpi_processes_per_node {
        Some(ppn) => directives.push(format!("#PBS -l nodes={}:ppn={ppn}", desc.num_nodes)),
        None => directives.push(format!("#PBS -l nodes={}", desc.num_nodes)),
    }

    if let Some(ref account) = config.account {
        directives.push(format!("#PBS -A {account}"));
    }

    for directive in &config.extra_directives {
        directives.push(format!("#PBS {directive}"));
    }

    let setup = config
        .modules
        .iter()
        .map(|module| format!("module load {module}"))
        .collect();

    ScriptHeader { directives, setup }
}

/// Format a duration as PBS walltime (HH:MM:SS, hours may exceed 24).
pub fn format_walltime(time: Duration) -> String {
    let total = time.as_secs().max(1);
    let hours = total / 3_600;
    let minutes = (total % 3_600) / 60;
    let seconds = total % 60;
    format!("{hours:02}:{minutes:02}:{seconds:02}")
}

/// PBS job names are limited to 15 characters on older Torque servers and
/// must start with a letter.
fn pbs_name(name: &str) -> String {
    let mut name = sanitize_name(name);
    if !name.starts_with(|c: char| c.is_ascii_alphabetic()) {
        name.insert(0, 'j');
    }
    name.chars().take(15).collect()
}
