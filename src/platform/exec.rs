//! External process execution: shell-style and direct invocations with captured output.
//!
//! Every external collaborator (container-engine CLI, kernel log, cloud CLI) runs
//! through [`CommandRunner`] so tests can script responses without spawning anything.
//! No timeout is imposed here; a hung command blocks only the calling monitor.

#![allow(missing_docs)]

use std::fmt;
use std::process::Command;

use parking_lot::Mutex;

use crate::core::errors::{HwdError, Result};

/// What to execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invocation {
    /// Run through `sh -c`, allowing pipes and substitutions.
    Shell(String),
    /// Run a program directly with an argument vector (no shell quoting).
    Program { program: String, args: Vec<String> },
}

impl Invocation {
    #[must_use]
    pub fn shell(command: impl Into<String>) -> Self {
        Self::Shell(command.into())
    }

    #[must_use]
    pub fn program<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Program {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Shell(command) => f.write_str(command),
            Self::Program { program, args } => {
                f.write_str(program)?;
                for arg in args {
                    write!(f, " {arg}")?;
                }
                Ok(())
            }
        }
    }
}

/// Exit status, stdout alone, and combined stdout/stderr text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// `None` when the process was killed by a signal.
    pub status: Option<i32>,
    /// Stdout only. Parse machine-readable payloads from here.
    pub stdout: String,
    /// Stdout followed by stderr, for reporting.
    pub output: String,
}

impl CommandOutput {
    #[must_use]
    pub fn ok(output: impl Into<String>) -> Self {
        let output = output.into();
        Self {
            status: Some(0),
            stdout: output.clone(),
            output,
        }
    }

    #[must_use]
    pub fn failed(status: i32, output: impl Into<String>) -> Self {
        let output = output.into();
        Self {
            status: Some(status),
            stdout: output.clone(),
            output,
        }
    }

    /// Append stderr text to the combined output, leaving stdout untouched.
    #[must_use]
    pub fn with_stderr(mut self, stderr: &str) -> Self {
        append_stream(&mut self.output, stderr);
        self
    }

    #[must_use]
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    /// Output split into lines, dropping empty ones.
    #[must_use]
    pub fn lines(&self) -> Vec<String> {
        self.output
            .lines()
            .map(str::trim_end)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Human-readable exit description (`exit status 1`, `killed by signal`).
    #[must_use]
    pub fn exit_description(&self) -> String {
        self.status.map_or_else(
            || "killed by signal".to_string(),
            |code| format!("exit status {code}"),
        )
    }
}

/// Executes invocations. `Err` means the process could not be started at all.
pub trait CommandRunner: Send + Sync {
    fn run(&self, invocation: &Invocation) -> Result<CommandOutput>;
}

/// Real process runner.
#[derive(Debug, Default, Clone, Copy)]
pub struct ShellRunner;

impl CommandRunner for ShellRunner {
    fn run(&self, invocation: &Invocation) -> Result<CommandOutput> {
        let mut command = match invocation {
            Invocation::Shell(script) => {
                let mut command = Command::new("sh");
                command.arg("-c").arg(script);
                command
            }
            Invocation::Program { program, args } => {
                let mut command = Command::new(program);
                command.args(args);
                command
            }
        };

        let output = command.output().map_err(|source| HwdError::Runtime {
            details: format!("failed to start {invocation}: {source}"),
        })?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let mut combined = stdout.clone();
        append_stream(&mut combined, &String::from_utf8_lossy(&output.stderr));

        Ok(CommandOutput {
            status: output.status.code(),
            stdout,
            output: combined,
        })
    }
}

fn append_stream(combined: &mut String, stderr: &str) {
    if stderr.is_empty() {
        return;
    }
    if !combined.is_empty() && !combined.ends_with('\n') {
        combined.push('\n');
    }
    combined.push_str(stderr);
}

#[derive(Debug, Clone)]
enum ScriptedResponse {
    Output(CommandOutput),
    SpawnFailure(String),
}

/// Deterministic runner for tests: responses are matched by substring of the
/// rendered invocation; unmatched invocations succeed with empty output.
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    rules: Mutex<Vec<(String, ScriptedResponse)>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedRunner {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer any invocation containing `needle` with `output`.
    #[must_use]
    pub fn respond(self, needle: impl Into<String>, output: CommandOutput) -> Self {
        self.set_response(needle, output);
        self
    }

    /// Make any invocation containing `needle` fail to start.
    #[must_use]
    pub fn fail_spawn(self, needle: impl Into<String>, details: impl Into<String>) -> Self {
        self.rules
            .lock()
            .insert(0, (needle.into(), ScriptedResponse::SpawnFailure(details.into())));
        self
    }

    /// Replace (or add) the response for `needle` while the runner is shared.
    pub fn set_response(&self, needle: impl Into<String>, output: CommandOutput) {
        let needle = needle.into();
        let mut rules = self.rules.lock();
        rules.retain(|(existing, _)| *existing != needle);
        rules.insert(0, (needle, ScriptedResponse::Output(output)));
    }

    /// Rendered invocations seen so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    /// Number of recorded invocations containing `needle`.
    #[must_use]
    pub fn count_matching(&self, needle: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|call| call.contains(needle))
            .count()
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, invocation: &Invocation) -> Result<CommandOutput> {
        let rendered = invocation.to_string();
        self.calls.lock().push(rendered.clone());
        let response = self
            .rules
            .lock()
            .iter()
            .find(|(needle, _)| rendered.contains(needle.as_str()))
            .map(|(_, response)| response.clone());
        match response {
            Some(ScriptedResponse::Output(output)) => Ok(output),
            Some(ScriptedResponse::SpawnFailure(details)) => Err(HwdError::Runtime {
                details: format!("failed to start {rendered}: {details}"),
            }),
            None => Ok(CommandOutput::ok("")),
        }
    }
}
