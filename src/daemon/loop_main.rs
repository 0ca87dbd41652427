//! Monitor loop: one named thread per resource, each ticking on its own timer.
//!
//! Every monitor owns its [`MonitorState`] exclusively. Threads share only
//! read-only collaborators behind `Arc`: the host identity, the engine handle,
//! the telemetry sink, the remediator and the health reporter.
//!
//! A tick body is `sample -> report -> decide -> act`. Any error inside it is
//! turned into an error line; a panic is caught at the tick boundary and
//! reported the same way. Nothing stops a monitor thread. There is no
//! cancellation: the process runs until it is killed.

#![allow(missing_docs)]

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::core::config::Config;
use crate::core::errors::{HwdError, Result};
use crate::core::identity::{HostIdentity, resolve_identity};
use crate::daemon::health::{AwsCliFleetHealth, FleetHealth, HealthReporter};
use crate::daemon::policy::{Action, Decision, MonitorState, ThresholdRule, decide, decide_pattern};
use crate::daemon::remediation::{ReclaimReport, Remediator};
use crate::logger::line::MetricLine;
use crate::logger::telemetry::TelemetrySink;
use crate::monitor::engine::{ContainerEngine, DockerCli, EngineSampler};
use crate::monitor::fs_stats::FsSampler;
use crate::monitor::kernel_log::KernelLogScanner;
use crate::monitor::sample::UtilizationSample;
use crate::platform::exec::{CommandRunner, ShellRunner};
use crate::platform::pal::Platform;

/// Monitor name used on telemetry lines for reclaim passes.
pub const RECLAIM_MONITOR: &str = "remove_docker";

/// One periodic task body.
pub trait Monitor: Send {
    /// Name used for the thread and as the first word of every line.
    fn name(&self) -> &'static str;

    /// Run one tick. Errors are reported inside; the returned action is what
    /// the policy chose (`None` when sampling failed).
    fn tick(&mut self) -> Action;
}

/// Read-only collaborators shared by every monitor.
#[derive(Clone)]
pub struct MonitorContext {
    pub instance: HostIdentity,
    pub telemetry: Arc<TelemetrySink>,
    pub remediator: Arc<Remediator>,
    pub reporter: Arc<HealthReporter>,
}

impl MonitorContext {
    fn line(&self, monitor: &str) -> MetricLine {
        MetricLine::new(monitor, self.instance.as_str())
    }

    fn report_error(&self, monitor: &str, err: &HwdError) {
        self.telemetry.emit_error(monitor, self.instance.as_str(), err);
    }

    fn report_level_change(&self, monitor: &str, decision: &Decision, utilization: f64) {
        if let Some(from) = decision.level_changed_from {
            self.telemetry.emit(
                self.line(monitor)
                    .str("level_change", decision.level.to_string())
                    .str("from", from.to_string())
                    .percent("utilization", utilization),
            );
        }
    }

    /// Run both reclaim passes and report every step.
    fn reclaim(&self, resource_label: &str) -> ReclaimReport {
        let report = self.remediator.reclaim(resource_label);
        for step in &report.steps {
            let base = || self.line(RECLAIM_MONITOR).str("resource", resource_label);
            self.telemetry.emit(base().str("cmd", step.command_label.as_str()));
            for out in &step.output_lines {
                self.telemetry.emit(base().str("out", out.as_str()));
            }
            if let Some(err) = step.error() {
                self.telemetry
                    .emit(base().str("error", err.to_string()).str("code", err.code()));
            }
        }
        report
    }

    /// Announce the escalation, then make the single fleet call.
    fn escalate(&self, monitor: &str, reason: &str) {
        self.telemetry
            .emit(self.line(monitor).flag("unhealthy", true).str("msg", reason));
        if let Err(err) = self.reporter.report_unhealthy(reason) {
            self.report_error(monitor, &err);
        }
    }

    /// Apply a threshold decision for a utilization sample.
    fn act_on(&self, monitor: &str, rule: &ThresholdRule, sample: &UtilizationSample, decision: &Decision) {
        self.report_level_change(monitor, decision, sample.utilization);
        match decision.action {
            Action::None => {}
            Action::Reclaim => {
                self.reclaim(&rule.resource_label);
            }
            Action::Escalate => {
                let reason = format!(
                    "{} utilization {:.2}% reached {:.2}%",
                    rule.resource_label,
                    sample.utilization,
                    rule.escalate_at.unwrap_or(sample.utilization)
                );
                self.escalate(monitor, &reason);
            }
        }
    }
}

// ──────────────────── monitors ────────────────────

/// Root volume utilization.
pub struct DiskMonitor {
    ctx: MonitorContext,
    sampler: FsSampler,
    rule: ThresholdRule,
    state: MonitorState,
}

impl DiskMonitor {
    #[must_use]
    pub fn new(ctx: MonitorContext, sampler: FsSampler, rule: ThresholdRule) -> Self {
        Self {
            ctx,
            sampler,
            rule,
            state: MonitorState::new(),
        }
    }

    #[must_use]
    pub fn state(&self) -> &MonitorState {
        &self.state
    }
}

impl Monitor for DiskMonitor {
    fn name(&self) -> &'static str {
        "disk"
    }

    fn tick(&mut self) -> Action {
        let sample = match self.sampler.sample() {
            Ok((sample, _stats)) => sample,
            Err(err) => {
                self.ctx.report_error(self.name(), &err);
                return Action::None;
            }
        };

        self.ctx.telemetry.emit(
            self.ctx
                .line(self.name())
                .percent("utilization", sample.utilization)
                .gigabytes("used", sample.used)
                .gigabytes("available", sample.available),
        );

        let decision = decide(sample.utilization, &self.rule, &self.state);
        self.state.advance(&decision);
        self.ctx.act_on(self.name(), &self.rule, &sample, &decision);
        decision.action
    }
}

/// Container-engine data space utilization.
pub struct EngineMonitor {
    ctx: MonitorContext,
    sampler: EngineSampler,
    rule: ThresholdRule,
    state: MonitorState,
}

impl EngineMonitor {
    #[must_use]
    pub fn new(ctx: MonitorContext, sampler: EngineSampler, rule: ThresholdRule) -> Self {
        Self {
            ctx,
            sampler,
            rule,
            state: MonitorState::new(),
        }
    }

    #[must_use]
    pub fn state(&self) -> &MonitorState {
        &self.state
    }
}

impl Monitor for EngineMonitor {
    fn name(&self) -> &'static str {
        "docker"
    }

    fn tick(&mut self) -> Action {
        let sample = match self.sampler.sample() {
            Ok(sample) => sample,
            Err(err) => {
                self.ctx.report_error(self.name(), &err);
                return Action::None;
            }
        };

        self.ctx.telemetry.emit(
            self.ctx
                .line(self.name())
                .percent("utilization", sample.utilization)
                .gigabytes("used", sample.used)
                .gigabytes("available", sample.available)
                .gigabytes("total", sample.total),
        );

        let decision = decide(sample.utilization, &self.rule, &self.state);
        self.state.advance(&decision);
        self.ctx.act_on(self.name(), &self.rule, &sample, &decision);
        decision.action
    }
}

/// Kernel ring buffer watch for read-only remounts. Escalates once per process.
pub struct KernelLogMonitor {
    ctx: MonitorContext,
    scanner: KernelLogScanner,
    state: MonitorState,
}

impl KernelLogMonitor {
    #[must_use]
    pub fn new(ctx: MonitorContext, scanner: KernelLogScanner) -> Self {
        Self {
            ctx,
            scanner,
            state: MonitorState::new(),
        }
    }

    #[must_use]
    pub fn state(&self) -> &MonitorState {
        &self.state
    }
}

impl Monitor for KernelLogMonitor {
    fn name(&self) -> &'static str {
        "dmesg"
    }

    fn tick(&mut self) -> Action {
        let matched = match self.scanner.scan() {
            Ok(matched) => matched,
            Err(err) => {
                self.ctx.report_error(self.name(), &err);
                return Action::None;
            }
        };

        let action = decide_pattern(matched.is_some(), &self.state);
        self.state.advance_pattern(action);
        if let (Action::Escalate, Some(line)) = (action, matched.as_deref()) {
            self.ctx.escalate(self.name(), line);
        }
        action
    }
}

/// Container and image counts. Reports only; no policy.
pub struct ContainersMonitor {
    ctx: MonitorContext,
    engine: Arc<dyn ContainerEngine>,
}

impl ContainersMonitor {
    #[must_use]
    pub fn new(ctx: MonitorContext, engine: Arc<dyn ContainerEngine>) -> Self {
        Self { ctx, engine }
    }
}

impl Monitor for ContainersMonitor {
    fn name(&self) -> &'static str {
        "containers"
    }

    fn tick(&mut self) -> Action {
        match self.engine.info() {
            Ok(info) => {
                let inventory = info.inventory();
                self.ctx.telemetry.emit(
                    self.ctx
                        .line(self.name())
                        .uint("total", inventory.total)
                        .uint("running", inventory.running)
                        .uint("paused", inventory.paused)
                        .uint("stopped", inventory.stopped)
                        .uint("images", inventory.images),
                );
            }
            Err(err) => self.ctx.report_error(self.name(), &err),
        }
        Action::None
    }
}

// ──────────────────── tick harness ────────────────────

/// Run one tick with panic isolation. A panic becomes an error line and the
/// monitor keeps its state for the next tick.
pub fn guarded_tick(monitor: &mut dyn Monitor, ctx: &MonitorContext) -> Action {
    match panic::catch_unwind(AssertUnwindSafe(|| monitor.tick())) {
        Ok(action) => action,
        Err(payload) => {
            let err = HwdError::Runtime {
                details: format!("tick panicked: {}", panic_message(payload.as_ref())),
            };
            ctx.report_error(monitor.name(), &err);
            Action::None
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(ToString::to_string)
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string())
}

/// Tick immediately, then once per `interval`, forever.
///
/// Ticks within one monitor are strictly sequential: a slow tick delays the
/// next one and missed timer events are coalesced by the ticker.
pub fn run_forever(mut monitor: Box<dyn Monitor>, ctx: &MonitorContext, interval: Duration) {
    ctx.telemetry.emit(ctx.line(monitor.name()));
    let ticker = crossbeam_channel::tick(interval);
    loop {
        guarded_tick(monitor.as_mut(), ctx);
        if ticker.recv().is_err() {
            thread::sleep(interval);
        }
    }
}

// ──────────────────── daemon ────────────────────

/// External collaborators, injectable for tests.
pub struct Collaborators {
    pub platform: Arc<dyn Platform>,
    pub runner: Arc<dyn CommandRunner>,
    pub engine: Arc<dyn ContainerEngine>,
    pub fleet: Arc<dyn FleetHealth>,
    pub telemetry: Arc<TelemetrySink>,
}

impl Collaborators {
    /// Real processes, the engine CLI, the AWS CLI and stdout telemetry.
    #[must_use]
    pub fn production(config: &Config, platform: Arc<dyn Platform>) -> Self {
        let runner: Arc<dyn CommandRunner> = Arc::new(ShellRunner);
        Self {
            platform,
            engine: Arc::new(DockerCli::new(Arc::clone(&runner), &config.engine.binary)),
            fleet: Arc::new(AwsCliFleetHealth::new(Arc::clone(&runner))),
            telemetry: Arc::new(TelemetrySink::from_config(
                &config.telemetry,
                Arc::clone(&runner),
            )),
            runner,
        }
    }
}

/// The assembled daemon: shared context plus the enabled monitors.
pub struct MonitorDaemon {
    config: Config,
    ctx: MonitorContext,
    monitors: Vec<Box<dyn Monitor>>,
}

impl MonitorDaemon {
    /// Resolve identity and build production collaborators.
    #[must_use]
    pub fn init(config: Config, platform: Arc<dyn Platform>) -> Self {
        let instance = resolve_identity(&config.identity, platform.as_ref());
        let collaborators = Collaborators::production(&config, platform);
        Self::assemble(config, collaborators, instance)
    }

    /// Build the daemon from explicit collaborators and identity.
    #[must_use]
    pub fn assemble(config: Config, collaborators: Collaborators, instance: HostIdentity) -> Self {
        let Collaborators {
            platform,
            runner,
            engine,
            fleet,
            telemetry,
        } = collaborators;

        let ctx = MonitorContext {
            reporter: Arc::new(HealthReporter::new(fleet, instance.clone(), &config.fleet)),
            remediator: Arc::new(Remediator::new(Arc::clone(&runner), &config.remediation)),
            telemetry,
            instance,
        };

        let mut monitors: Vec<Box<dyn Monitor>> = Vec::new();
        if config.monitor.containers {
            monitors.push(Box::new(ContainersMonitor::new(
                ctx.clone(),
                Arc::clone(&engine),
            )));
        }
        if config.monitor.disk {
            monitors.push(Box::new(DiskMonitor::new(
                ctx.clone(),
                FsSampler::new(Arc::clone(&platform), config.disk.path.clone()),
                config.disk.rule(),
            )));
        }
        if config.monitor.engine {
            monitors.push(Box::new(EngineMonitor::new(
                ctx.clone(),
                EngineSampler::new(Arc::clone(&engine)),
                config.engine.rule(),
            )));
        }
        if config.monitor.kernel_log {
            monitors.push(Box::new(KernelLogMonitor::new(
                ctx.clone(),
                KernelLogScanner::new(
                    Arc::clone(&runner),
                    config.kernel_log.command.clone(),
                    config.kernel_log.pattern.clone(),
                ),
            )));
        }

        Self {
            config,
            ctx,
            monitors,
        }
    }

    #[must_use]
    pub fn instance(&self) -> &HostIdentity {
        &self.ctx.instance
    }

    #[must_use]
    pub fn monitor_names(&self) -> Vec<&'static str> {
        self.monitors.iter().map(|monitor| monitor.name()).collect()
    }

    /// One guarded tick of every monitor, in order, on the calling thread.
    pub fn tick_all(&mut self) -> Vec<(&'static str, Action)> {
        let ctx = &self.ctx;
        self.monitors
            .iter_mut()
            .map(|monitor| (monitor.name(), guarded_tick(monitor.as_mut(), ctx)))
            .collect()
    }

    /// Spawn one thread per monitor and join them. Does not return under
    /// normal operation.
    pub fn run(self) -> Result<()> {
        let config_hash = self.config.stable_hash().unwrap_or_default();
        eprintln!(
            "[HWD-DAEMON] starting hwd {} instance={} source={:?} interval={}s config_hash={} monitors={}",
            env!("CARGO_PKG_VERSION"),
            self.ctx.instance,
            self.ctx.instance.source(),
            self.config.monitor.interval_secs,
            config_hash,
            self.monitor_names().join(","),
        );
        if let Some(stream) = self.ctx.telemetry.forwarding_to() {
            eprintln!("[HWD-DAEMON] forwarding telemetry to stream={stream}");
        }

        if self.monitors.is_empty() {
            return Err(HwdError::InvalidConfig {
                details: "every monitor is disabled".to_string(),
            });
        }

        let interval = self.config.monitor.interval();
        let mut handles = Vec::with_capacity(self.monitors.len());
        for monitor in self.monitors {
            let name = monitor.name();
            let ctx = self.ctx.clone();
            let handle = thread::Builder::new()
                .name(format!("hwd-{name}"))
                .spawn(move || run_forever(monitor, &ctx, interval))
                .map_err(|source| HwdError::Runtime {
                    details: format!("failed to spawn {name} monitor thread: {source}"),
                })?;
            handles.push((name, handle));
        }

        for (name, handle) in handles {
            if handle.join().is_err() {
                eprintln!("[HWD-DAEMON] {name} monitor thread exited unexpectedly");
            }
        }
        Err(HwdError::Runtime {
            details: "all monitor threads stopped".to_string(),
        })
    }
}
