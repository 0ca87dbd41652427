//! Reclaim disk space by pruning unused container artifacts.
//!
//! Two independent best-effort passes run in order: non-running containers,
//! then unreferenced images. A failing first pass never prevents the second.
//! No timeout is added on top of the external command.

#![allow(missing_docs)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::core::config::RemediationConfig;
use crate::core::errors::HwdError;
use crate::platform::exec::{CommandRunner, Invocation};

/// Result of one corrective command. Transient: reported, then dropped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemediationOutcome {
    pub command_label: String,
    pub exit_error: Option<String>,
    pub output_lines: Vec<String>,
    #[serde(skip)]
    pub duration: Duration,
}

impl RemediationOutcome {
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.exit_error.is_none()
    }

    /// The failure as a typed error, if the step failed.
    #[must_use]
    pub fn error(&self) -> Option<HwdError> {
        self.exit_error
            .as_ref()
            .map(|details| HwdError::RemediationFailed {
                command: self.command_label.clone(),
                details: details.clone(),
            })
    }
}

/// All steps of one reclaim pass for a resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReclaimReport {
    pub resource_label: String,
    pub steps: Vec<RemediationOutcome>,
}

impl ReclaimReport {
    #[must_use]
    pub fn failures(&self) -> usize {
        self.steps.iter().filter(|step| !step.succeeded()).count()
    }
}

/// A named corrective command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemediationStep {
    pub label: &'static str,
    pub command: String,
}

/// Executes the reclaim passes through a command runner.
pub struct Remediator {
    runner: Arc<dyn CommandRunner>,
    steps: Vec<RemediationStep>,
}

impl Remediator {
    #[must_use]
    pub fn new(runner: Arc<dyn CommandRunner>, config: &RemediationConfig) -> Self {
        Self {
            runner,
            steps: vec![
                RemediationStep {
                    label: "remove_containers",
                    command: config.container_prune.clone(),
                },
                RemediationStep {
                    label: "remove_images",
                    command: config.image_prune.clone(),
                },
            ],
        }
    }

    /// Run every step in order, capturing each step's output and failure.
    #[must_use]
    pub fn reclaim(&self, resource_label: &str) -> ReclaimReport {
        let steps = self.steps.iter().map(|step| self.run_step(step)).collect();
        ReclaimReport {
            resource_label: resource_label.to_string(),
            steps,
        }
    }

    fn run_step(&self, step: &RemediationStep) -> RemediationOutcome {
        let started = Instant::now();
        let invocation = Invocation::shell(&step.command);
        let (exit_error, output_lines) = match self.runner.run(&invocation) {
            Ok(output) if output.success() => (None, output.lines()),
            Ok(output) => (Some(output.exit_description()), output.lines()),
            Err(err) => (Some(err.to_string()), Vec::new()),
        };
        RemediationOutcome {
            command_label: step.command.clone(),
            exit_error,
            output_lines,
            duration: started.elapsed(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::exec::{CommandOutput, ScriptedRunner};

    fn remediator(runner: ScriptedRunner) -> (Remediator, Arc<ScriptedRunner>) {
        let runner = Arc::new(runner);
        (
            Remediator::new(runner.clone(), &RemediationConfig::default()),
            runner,
        )
    }

    #[test]
    fn runs_both_steps_in_order() {
        let (remediator, runner) = remediator(
            ScriptedRunner::new()
                .respond(
                    "container prune",
                    CommandOutput::ok("Deleted Containers:\nabc123\n\nTotal reclaimed space: 1.2GB\n"),
                )
                .respond("image prune", CommandOutput::ok("Total reclaimed space: 0B\n")),
        );
        let report = remediator.reclaim("/");
        assert_eq!(report.resource_label, "/");
        assert_eq!(report.steps.len(), 2);
        assert_eq!(report.failures(), 0);
        assert_eq!(
            report.steps[0].output_lines,
            vec!["Deleted Containers:", "abc123", "Total reclaimed space: 1.2GB"]
        );
        let calls = runner.calls();
        assert!(calls[0].contains("container prune"));
        assert!(calls[1].contains("image prune"));
    }

    #[test]
    fn failing_first_step_does_not_block_second() {
        let (remediator, runner) = remediator(
            ScriptedRunner::new()
                .respond(
                    "container prune",
                    CommandOutput::failed(1, "Error response from daemon: a prune operation is already running"),
                )
                .respond("image prune", CommandOutput::ok("Total reclaimed space: 3GB")),
        );
        let report = remediator.reclaim("/");
        assert_eq!(report.failures(), 1);
        assert_eq!(report.steps[0].exit_error.as_deref(), Some("exit status 1"));
        assert!(report.steps[1].succeeded());
        assert_eq!(runner.calls().len(), 2);
        let err = report.steps[0].error().expect("typed error");
        assert_eq!(err.code(), "HWD-2101");
    }

    #[test]
    fn spawn_failure_is_captured_not_raised() {
        let (remediator, _) = remediator(
            ScriptedRunner::new()
                .fail_spawn("container prune", "sh: not found")
                .fail_spawn("image prune", "sh: not found"),
        );
        let report = remediator.reclaim("container-engine");
        assert_eq!(report.failures(), 2);
        assert!(report.steps.iter().all(|s| s.output_lines.is_empty()));
    }
}
