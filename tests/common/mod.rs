#![allow(dead_code)]

use std::fs;
use std::path::PathBuf;
use std::process::{Command, ExitStatus};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use host_warden::core::config::{Config, TelemetryFormat};
use host_warden::core::identity::{HostIdentity, IdentitySource};
use host_warden::daemon::health::RecordingFleet;
use host_warden::daemon::loop_main::{Collaborators, MonitorDaemon};
use host_warden::logger::forward::RecordingForwarder;
use host_warden::logger::line::{FieldValue, MetricLine};
use host_warden::logger::telemetry::TelemetrySink;
use host_warden::monitor::engine::ScriptedEngine;
use host_warden::platform::exec::ScriptedRunner;
use host_warden::platform::pal::{FsStats, MockPlatform};

pub const GIB: u64 = 1 << 30;
pub const INSTANCE: &str = "i-0feedbee";

pub struct CmdResult {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
    pub log_path: PathBuf,
}

fn now_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis())
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

fn resolve_bin_path() -> PathBuf {
    if let Ok(path) = std::env::var("CARGO_BIN_EXE_hwd") {
        return PathBuf::from(path);
    }

    let exe_name = if cfg!(windows) { "hwd.exe" } else { "hwd" };
    let fallback = std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(PathBuf::from))
        .and_then(|deps| deps.parent().map(PathBuf::from))
        .map(|debug_dir| debug_dir.join(exe_name));

    match fallback {
        Some(path) if path.exists() => path,
        _ => panic!("unable to resolve hwd binary path for integration test"),
    }
}

/// Run the `hwd` binary with a scrubbed `HWD_*` environment plus `envs`.
///
/// Only use this for startup-failure cases: a valid config runs forever.
pub fn run_hwd_case(case_name: &str, envs: &[(&str, &str)]) -> CmdResult {
    let root = std::env::temp_dir().join("hwd-test-logs");
    fs::create_dir_all(&root).expect("create temp test log dir");

    let log_path = root.join(format!("{}-{}.log", sanitize(case_name), now_millis()));
    let bin_path = resolve_bin_path();

    let mut command = Command::new(&bin_path);
    for (name, _) in std::env::vars() {
        if name.starts_with("HWD_") || name == "KINESIS" {
            command.env_remove(name);
        }
    }
    let output = command
        .envs(envs.iter().copied())
        .env("RUST_BACKTRACE", "1")
        .output()
        .expect("execute hwd");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();

    let mut log_content = String::new();
    log_content.push_str(&format!("case={case_name}\n"));
    log_content.push_str(&format!("bin={}\n", bin_path.display()));
    log_content.push_str(&format!("env={envs:?}\n"));
    log_content.push_str(&format!("status={}\n", output.status));
    log_content.push_str("----- stdout -----\n");
    log_content.push_str(&stdout);
    log_content.push('\n');
    log_content.push_str("----- stderr -----\n");
    log_content.push_str(&stderr);
    log_content.push('\n');
    fs::write(&log_path, log_content).expect("write test log");

    CmdResult {
        status: output.status,
        stdout,
        stderr,
        log_path,
    }
}

/// Stats for a `total_gib` volume with `free_gib` free.
pub fn volume(total_gib: u64, free_gib: u64) -> FsStats {
    FsStats::from_bytes("/", total_gib * GIB, free_gib * GIB)
}

/// Engine driver status with decimal sizes.
pub fn driver_status(available: &str, total: &str, used: &str) -> ScriptedEngine {
    ScriptedEngine::with_driver_status(&[
        ("Data Space Available", available),
        ("Data Space Total", total),
        ("Data Space Used", used),
    ])
}

/// A daemon wired to in-memory doubles, ticked on the test thread.
pub struct Harness {
    pub platform: Arc<MockPlatform>,
    pub runner: Arc<ScriptedRunner>,
    pub engine: Arc<ScriptedEngine>,
    pub fleet: Arc<RecordingFleet>,
    pub forwarder: Arc<RecordingForwarder>,
    pub telemetry: Arc<TelemetrySink>,
    pub daemon: MonitorDaemon,
}

impl Harness {
    /// Defaults: root volume 100 GiB with 50 free, engine 10% used, quiet kernel log.
    pub fn new(config: Config) -> Self {
        Self::with_parts(config, volume(100, 50), driver_status("90 GB", "100 GB", "10 GB"))
    }

    pub fn with_parts(config: Config, root: FsStats, engine: ScriptedEngine) -> Self {
        let path = config.disk.path.clone();
        let platform = Arc::new(MockPlatform::with_hostname("ip-10-0-0-1").with_stats(path, root));
        let runner = Arc::new(ScriptedRunner::new());
        let engine = Arc::new(engine);
        let fleet = Arc::new(RecordingFleet::new());
        let forwarder = Arc::new(RecordingForwarder::new());
        let telemetry = Arc::new(
            TelemetrySink::capturing(TelemetryFormat::Logfmt)
                .with_forwarder(forwarder.clone(), config.telemetry.forward_prefix.clone()),
        );
        let daemon = MonitorDaemon::assemble(
            config,
            Collaborators {
                platform: platform.clone(),
                runner: runner.clone(),
                engine: engine.clone(),
                fleet: fleet.clone(),
                telemetry: telemetry.clone(),
            },
            HostIdentity::new(INSTANCE, IdentitySource::Metadata),
        );
        Self {
            platform,
            runner,
            engine,
            fleet,
            forwarder,
            telemetry,
            daemon,
        }
    }

    pub fn tick(&mut self) {
        self.daemon.tick_all();
    }

    pub fn ticks(&mut self, n: usize) {
        for _ in 0..n {
            self.tick();
        }
    }

    pub fn lines(&self) -> Vec<MetricLine> {
        self.telemetry.captured()
    }

    pub fn logfmt(&self) -> Vec<String> {
        self.telemetry.captured_logfmt()
    }

    /// Lines from `monitor` that carry field `key`.
    pub fn lines_with(&self, monitor: &str, key: &str) -> Vec<MetricLine> {
        self.lines()
            .into_iter()
            .filter(|line| line.monitor() == monitor && line.field(key).is_some())
            .collect()
    }

    pub fn reclaim_passes(&self) -> usize {
        self.runner.count_matching("container prune")
    }
}

/// Only the given monitors enabled.
pub fn config_with(monitors: &[&str]) -> Config {
    let mut config = Config::default();
    config.monitor.disk = monitors.contains(&"disk");
    config.monitor.engine = monitors.contains(&"docker");
    config.monitor.kernel_log = monitors.contains(&"dmesg");
    config.monitor.containers = monitors.contains(&"containers");
    config
}

pub fn str_field<'a>(line: &'a MetricLine, key: &str) -> Option<&'a str> {
    match line.field(key) {
        Some(FieldValue::Str(value)) => Some(value.as_str()),
        _ => None,
    }
}
