//! Shared helpers for the integration tests.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use batchlink_sched::{CommandOutput, ExecutionChannel};

/// Install a subscriber honouring `RUST_LOG` once per test binary.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn ok(stdout: &str) -> CommandOutput {
    CommandOutput {
        exit_code: Some(0),
        stdout: stdout.to_string(),
        stderr: String::new(),
    }
}

pub fn failed(exit_code: i32, stderr: &str) -> CommandOutput {
    CommandOutput {
        exit_code: Some(exit_code),
        stdout: String::new(),
        stderr: stderr.to_string(),
    }
}

/// One recorded channel invocation.
#[derive(Debug, Clone)]
pub struct Call {
    pub command: String,
    pub args: Vec<String>,
    pub working_directory: Option<PathBuf>,
}

/// Channel replaying canned outputs per command name.
///
/// The last queued output of a command is repeated once the queue drains.
/// Commands without any output fail to spawn.
#[derive(Default)]
pub struct FakeChannel {
    responses: Mutex<HashMap<String, VecDeque<CommandOutput>>>,
    calls: Mutex<Vec<Call>>,
}

impl FakeChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, command: &str, output: CommandOutput) -> &Self {
        self.responses
            .lock()
            .unwrap()
            .entry(command.to_string())
            .or_default()
            .push_back(output);
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, command: &str) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| c.command == command)
            .collect()
    }
}

#[async_trait]
impl ExecutionChannel for FakeChannel {
    async fn run(
        &self,
        command: &str,
        args: &[String],
        working_directory: Option<&Path>,
        _environment: &BTreeMap<String, String>,
    ) -> std::io::Result<CommandOutput> {
        self.calls.lock().unwrap().push(Call {
            command: command.to_string(),
            args: args.to_vec(),
            working_directory: working_directory.map(Path::to_path_buf),
        });

        let mut responses = self.responses.lock().unwrap();
        let queue = responses.get_mut(command).ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::NotFound, format!("{command}: not found"))
        })?;

        let output = if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        };
        output.ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::NotFound, format!("{command}: not found"))
        })
    }
}

/// Sentinel path belonging to a submitted script path.
pub fn sentinel_for(work_dir: &Path, script: &str) -> PathBuf {
    let token = Path::new(script)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap()
        .to_string();
    work_dir.join("exit").join(format!("{token}.code"))
}
