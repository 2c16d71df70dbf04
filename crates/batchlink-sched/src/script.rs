//! Job script rendering shared by all backends.
//!
//! A rendered script has the same layout for every backend:
//!
//! ```text
//! #!/bin/bash
//! <backend directives>          #SBATCH ... / #PBS ...
//! <prefix>                      optional, see ScriptBuilder::with_prefix
//! <setup>                       e.g. module load lines
//! export NAME='value'           one per environment entry
//! ( cd <wd> && command args >out 2>err )
//! <exit-code capture>
//! ```

use crate::capture::CapturePaths;
use crate::error::SchedResult;
use crate::job::JobDescription;

/// Backend-specific part of a job script.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScriptHeader {
    /// Scheduler directive lines, e.g. `#SBATCH --nodes=2`.
    pub directives: Vec<String>,
    /// Shell lines run before the environment is exported.
    pub setup: Vec<String>,
}

/// Renders job descriptions into bash job scripts.
#[derive(Debug, Clone, Default)]
pub struct ScriptBuilder {
    prefix: Option<String>,
}

impl ScriptBuilder {
    /// Create a builder without a prefix.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a shell fragment right after the directives of every script.
    ///
    /// Useful for instrumentation, e.g. `echo started >> /tmp/trace`.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        self.prefix = if prefix.trim().is_empty() {
            None
        } else {
            Some(prefix)
        };
        self
    }

    /// The configured prefix, if any.
    pub fn prefix(&self) -> Option<&str> {
        self.prefix.as_deref()
    }

    /// Render the full job script.
    pub fn render(
        &self,
        desc: &JobDescription,
        header: &ScriptHeader,
        capture: &CapturePaths,
    ) -> SchedResult<String> {
        let command_line = command_line(desc)?;
        let mut script = String::from("#!/bin/bash\n");

        for directive in &header.directives {
            script.push_str(directive);
            script.push('\n');
        }

        if let Some(ref prefix) = self.prefix {
            script.push_str(prefix.trim_end());
            script.push('\n');
        }

        for line in &header.setup {
            script.push_str(line);
            script.push('\n');
        }

        for (name, value) in &desc.environment {
            script.push_str(&format!("export {}={}\n", name, shell_quote(value)));
        }

        script.push_str(&capture.wrap(&command_line));
        Ok(script)
    }
}

/// Build the command line run inside the capture subshell.
pub fn command_line(desc: &JobDescription) -> SchedResult<String> {
    let command = desc.validate()?;
    let mut line = String::new();

    if let Some(ref dir) = desc.working_directory {
        line.push_str(&format!("cd {} && ", shell_quote(&dir.to_string_lossy())));
    }

    line.push_str(command);
    for arg in &desc.arguments {
        line.push(' ');
        line.push_str(arg);
    }

    if let Some(ref out) = desc.stdout_file {
        line.push_str(&format!(" >{}", shell_quote(&out.to_string_lossy())));
    }
    if let Some(ref err) = desc.stderr_file {
        line.push_str(&format!(" 2>{}", shell_quote(&err.to_string_lossy())));
    }

    Ok(line)
}

/// Quote a string for bash using single quotes.
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Sanitize a job name for backend directives.
pub fn sanitize_name(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .take(64) // SLURM truncates job names beyond 64 characters
        .collect();

    if sanitized.is_empty() {
        "batchlink".to_string()
    } else {
        sanitized
    }
}
