//! Container-engine sampler: driver status parsing and data-space utilization.
//!
//! The engine's `info` payload carries an unordered list of `[label, value]`
//! pairs describing its storage backend. Only three labels are consumed, by
//! exact match; values are human-readable sizes such as `"10.5 GB"`.

#![allow(missing_docs)]
#![allow(clippy::cast_precision_loss)]

use std::sync::{Arc, LazyLock};

use parking_lot::Mutex;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::core::errors::{HwdError, Result};
use crate::monitor::sample::{ENGINE_GIGABYTE, UtilizationSample};
use crate::platform::exec::{CommandRunner, Invocation};

pub const DATA_SPACE_AVAILABLE: &str = "Data Space Available";
pub const DATA_SPACE_TOTAL: &str = "Data Space Total";
pub const DATA_SPACE_USED: &str = "Data Space Used";

/// Resource label used in engine metrics and errors.
pub const ENGINE_RESOURCE: &str = "container-engine";

static SIZE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*([0-9]+(?:\.[0-9]+)?)\s*([KMGTPE]i?B|[KMGTPE]|B)?\s*$")
        .unwrap_or_else(|err| panic!("size pattern must compile: {err}"))
});

/// Subset of the engine `info` payload that the monitors read.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct EngineInfo {
    pub driver: String,
    #[serde(deserialize_with = "null_as_empty")]
    pub driver_status: Vec<(String, String)>,
    pub containers: u64,
    pub containers_running: u64,
    pub containers_paused: u64,
    pub containers_stopped: u64,
    pub images: u64,
}

/// Container counts derived from an `info` payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ContainerInventory {
    pub total: u64,
    pub running: u64,
    pub paused: u64,
    pub stopped: u64,
    pub images: u64,
}

impl EngineInfo {
    #[must_use]
    pub fn inventory(&self) -> ContainerInventory {
        ContainerInventory {
            total: self.containers,
            running: self.containers_running,
            paused: self.containers_paused,
            stopped: self.containers_stopped,
            images: self.images,
        }
    }

    /// Value of a driver-status label, matched exactly.
    #[must_use]
    pub fn driver_value(&self, label: &str) -> Option<&str> {
        driver_value(&self.driver_status, label)
    }
}

fn null_as_empty<'de, D>(deserializer: D) -> std::result::Result<Vec<(String, String)>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<Vec<(String, String)>>::deserialize(deserializer)?.unwrap_or_default())
}

/// Handle to the container engine. Shared read-only across monitors.
pub trait ContainerEngine: Send + Sync {
    fn info(&self) -> Result<EngineInfo>;
}

/// Engine client backed by the engine CLI's JSON `info` output.
pub struct DockerCli {
    runner: Arc<dyn CommandRunner>,
    binary: String,
}

impl DockerCli {
    #[must_use]
    pub fn new(runner: Arc<dyn CommandRunner>, binary: impl Into<String>) -> Self {
        Self {
            runner,
            binary: binary.into(),
        }
    }
}

impl ContainerEngine for DockerCli {
    fn info(&self) -> Result<EngineInfo> {
        let invocation = Invocation::program(&self.binary, ["info", "--format", "{{json .}}"]);
        let output = self
            .runner
            .run(&invocation)
            .map_err(|err| HwdError::unavailable(ENGINE_RESOURCE, err.to_string()))?;
        if !output.success() {
            return Err(HwdError::unavailable(
                ENGINE_RESOURCE,
                format!("{}: {}", output.exit_description(), output.output.trim()),
            ));
        }
        serde_json::from_str(output.stdout.trim()).map_err(|err| {
            HwdError::unavailable(ENGINE_RESOURCE, format!("unparseable info payload: {err}"))
        })
    }
}

/// In-memory engine for tests: returns the current scripted payload or failure.
#[derive(Debug)]
pub struct ScriptedEngine {
    state: Mutex<std::result::Result<EngineInfo, String>>,
}

impl ScriptedEngine {
    #[must_use]
    pub fn new(info: EngineInfo) -> Self {
        Self {
            state: Mutex::new(Ok(info)),
        }
    }

    /// Engine whose driver status is exactly `pairs`.
    #[must_use]
    pub fn with_driver_status(pairs: &[(&str, &str)]) -> Self {
        Self::new(EngineInfo {
            driver: "devicemapper".to_string(),
            driver_status: pairs
                .iter()
                .map(|(label, value)| ((*label).to_string(), (*value).to_string()))
                .collect(),
            ..EngineInfo::default()
        })
    }

    pub fn set_info(&self, info: EngineInfo) {
        *self.state.lock() = Ok(info);
    }

    /// Make subsequent `info` calls fail as if the engine were down.
    pub fn set_down(&self, details: impl Into<String>) {
        *self.state.lock() = Err(details.into());
    }
}

impl ContainerEngine for ScriptedEngine {
    fn info(&self) -> Result<EngineInfo> {
        self.state
            .lock()
            .clone()
            .map_err(|details| HwdError::unavailable(ENGINE_RESOURCE, details))
    }
}

/// Samples engine data space on every call. No caching.
pub struct EngineSampler {
    engine: Arc<dyn ContainerEngine>,
}

impl EngineSampler {
    #[must_use]
    pub fn new(engine: Arc<dyn ContainerEngine>) -> Self {
        Self { engine }
    }

    pub fn sample(&self) -> Result<UtilizationSample> {
        let info = self.engine.info()?;
        engine_utilization(&info.driver_status)
    }
}

fn driver_value<'a>(pairs: &'a [(String, String)], label: &str) -> Option<&'a str> {
    pairs
        .iter()
        .find(|(key, _)| key == label)
        .map(|(_, value)| value.as_str())
}

fn required_size(pairs: &[(String, String)], label: &'static str) -> Result<Option<u64>> {
    let Some(raw) = driver_value(pairs, label) else {
        return Ok(None);
    };
    parse_size(raw)
        .map(Some)
        .ok_or_else(|| HwdError::MetricUnavailable {
            resource: ENGINE_RESOURCE.to_string(),
            metric: label,
            details: format!("unparseable size {raw:?}"),
        })
}

/// Derive data-space utilization (`used / total * 100`) from driver status pairs.
///
/// A missing or zero total is `MetricUnavailable`: utilization is undefined and
/// no value is reported. When only one of used/available is present the other is
/// derived from the total.
pub fn engine_utilization(pairs: &[(String, String)]) -> Result<UtilizationSample> {
    let total = required_size(pairs, DATA_SPACE_TOTAL)?.ok_or_else(|| {
        HwdError::MetricUnavailable {
            resource: ENGINE_RESOURCE.to_string(),
            metric: DATA_SPACE_TOTAL,
            details: "driver status has no total".to_string(),
        }
    })?;
    if total == 0 {
        return Err(HwdError::MetricUnavailable {
            resource: ENGINE_RESOURCE.to_string(),
            metric: DATA_SPACE_TOTAL,
            details: "driver reports zero total".to_string(),
        });
    }

    let available = required_size(pairs, DATA_SPACE_AVAILABLE)?;
    let used = required_size(pairs, DATA_SPACE_USED)?;
    let (available, used) = match (available, used) {
        (Some(available), Some(used)) => (available, used),
        (Some(available), None) => (available, total.saturating_sub(available)),
        (None, Some(used)) => (total.saturating_sub(used), used),
        (None, None) => {
            return Err(HwdError::MetricUnavailable {
                resource: ENGINE_RESOURCE.to_string(),
                metric: DATA_SPACE_USED,
                details: "driver status has neither used nor available".to_string(),
            });
        }
    };

    let total = total as f64;
    let used = used as f64;
    Ok(UtilizationSample {
        resource_label: ENGINE_RESOURCE.to_string(),
        available: available as f64 / ENGINE_GIGABYTE,
        total: total / ENGINE_GIGABYTE,
        used: used / ENGINE_GIGABYTE,
        utilization: used / total * 100.0,
    })
}

/// Parse a human-readable size (`"10.5 GB"`, `"512MiB"`, `"1.2 kB"`, `"42"`) into bytes.
///
/// Decimal units (kB, MB, GB, ...) are powers of 1000; binary units (KiB, MiB,
/// ...) powers of 1024. Unit letters are case-insensitive.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn parse_size(raw: &str) -> Option<u64> {
    let upper = raw.to_ascii_uppercase().replace("IB", "iB");
    let caps = SIZE_RE.captures(&upper)?;
    let value: f64 = caps.get(1)?.as_str().parse().ok()?;
    let unit = caps.get(2).map_or("B", |m| m.as_str());
    let multiplier: f64 = match unit {
        "B" => 1.0,
        "K" | "KB" => 1e3,
        "M" | "MB" => 1e6,
        "G" | "GB" => 1e9,
        "T" | "TB" => 1e12,
        "P" | "PB" => 1e15,
        "E" | "EB" => 1e18,
        "KiB" => 1024.0,
        "MiB" => 1024.0_f64.powi(2),
        "GiB" => 1024.0_f64.powi(3),
        "TiB" => 1024.0_f64.powi(4),
        "PiB" => 1024.0_f64.powi(5),
        "EiB" => 1024.0_f64.powi(6),
        _ => return None,
    };
    let bytes = (value * multiplier).round();
    if !bytes.is_finite() || bytes >= u64::MAX as f64 {
        return None;
    }
    Some(bytes as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::exec::{CommandOutput, ScriptedRunner};

    fn pairs(raw: &[(&str, &str)]) -> Vec<(String, String)> {
        raw.iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn parses_decimal_and_binary_units() {
        assert_eq!(parse_size("10 GB"), Some(10_000_000_000));
        assert_eq!(parse_size("10.5 GB"), Some(10_500_000_000));
        assert_eq!(parse_size("1.2kB"), Some(1_200));
        assert_eq!(parse_size("512 MiB"), Some(512 * 1024 * 1024));
        assert_eq!(parse_size("3 TiB"), Some(3 * 1024_u64.pow(4)));
        assert_eq!(parse_size("42"), Some(42));
        assert_eq!(parse_size("42 B"), Some(42));
        assert_eq!(parse_size(" 2 gb "), Some(2_000_000_000));
    }

    #[test]
    fn rejects_garbage_sizes() {
        assert_eq!(parse_size(""), None);
        assert_eq!(parse_size("GB"), None);
        assert_eq!(parse_size("ten GB"), None);
        assert_eq!(parse_size("10 XB"), None);
        assert_eq!(parse_size("-1 GB"), None);
    }

    #[test]
    fn driver_status_scenario_is_eighty_percent() {
        let status = pairs(&[
            ("Data Space Available", "10 GB"),
            ("Data Space Total", "50 GB"),
            ("Data Space Used", "40 GB"),
        ]);
        let sample = engine_utilization(&status).expect("sample");
        assert!((sample.available - 10.0).abs() < 1e-9);
        assert!((sample.total - 50.0).abs() < 1e-9);
        assert!((sample.used - 40.0).abs() < 1e-9);
        assert!((sample.utilization - 80.0).abs() < 1e-9);
    }

    #[test]
    fn label_order_does_not_matter() {
        let status = pairs(&[
            ("Pool Name", "docker-202:1-pool"),
            ("Data Space Used", "40 GB"),
            ("Metadata Space Total", "2 GB"),
            ("Data Space Total", "50 GB"),
            ("Data Space Available", "10 GB"),
        ]);
        let sample = engine_utilization(&status).expect("sample");
        assert!((sample.utilization - 80.0).abs() < 1e-9);
    }

    #[test]
    fn labels_match_exactly() {
        let status = pairs(&[
            ("Metadata Space Total", "50 GB"),
            ("data space total", "50 GB"),
            ("Data Space Used", "40 GB"),
        ]);
        let err = engine_utilization(&status).expect_err("no exact total label");
        assert_eq!(err.code(), "HWD-2002");
    }

    #[test]
    fn missing_total_is_metric_unavailable() {
        let status = pairs(&[
            ("Data Space Available", "10 GB"),
            ("Data Space Used", "40 GB"),
        ]);
        let err = engine_utilization(&status).expect_err("missing total");
        match err {
            HwdError::MetricUnavailable { metric, .. } => assert_eq!(metric, DATA_SPACE_TOTAL),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn zero_total_is_metric_unavailable() {
        let status = pairs(&[("Data Space Total", "0 B"), ("Data Space Used", "0 B")]);
        let err = engine_utilization(&status).expect_err("zero total");
        assert_eq!(err.code(), "HWD-2002");
    }

    #[test]
    fn overlay_driver_without_status_is_metric_unavailable() {
        let err = engine_utilization(&[]).expect_err("overlay2 has no data space");
        assert_eq!(err.code(), "HWD-2002");
    }

    #[test]
    fn missing_used_is_derived_from_total() {
        let status = pairs(&[
            ("Data Space Available", "25 GB"),
            ("Data Space Total", "100 GB"),
        ]);
        let sample = engine_utilization(&status).expect("sample");
        assert!((sample.used - 75.0).abs() < 1e-9);
        assert!((sample.utilization - 75.0).abs() < 1e-9);
    }

    #[test]
    fn unparseable_value_is_metric_unavailable() {
        let status = pairs(&[("Data Space Total", "lots"), ("Data Space Used", "1 GB")]);
        let err = engine_utilization(&status).expect_err("garbage total");
        assert_eq!(err.code(), "HWD-2002");
    }

    #[test]
    fn info_payload_deserializes_with_null_driver_status() {
        let info: EngineInfo = serde_json::from_str(
            r#"{"Driver":"overlay2","DriverStatus":null,"Containers":5,"ContainersRunning":2,
                "ContainersPaused":1,"ContainersStopped":2,"Images":9,"ServerVersion":"24.0"}"#,
        )
        .expect("payload");
        assert!(info.driver_status.is_empty());
        let inventory = info.inventory();
        assert_eq!(inventory.total, 5);
        assert_eq!(inventory.running, 2);
        assert_eq!(inventory.paused, 1);
        assert_eq!(inventory.stopped, 2);
        assert_eq!(inventory.images, 9);
    }

    #[test]
    fn docker_cli_parses_info_output() {
        let payload = r#"{"Driver":"devicemapper","DriverStatus":[["Data Space Used","40 GB"],["Data Space Total","50 GB"],["Data Space Available","10 GB"]],"Containers":3}"#;
        let runner =
            Arc::new(ScriptedRunner::new().respond("docker info", CommandOutput::ok(payload)));
        let cli = DockerCli::new(runner.clone(), "docker");
        let info = cli.info().expect("info");
        assert_eq!(info.driver_value(DATA_SPACE_TOTAL), Some("50 GB"));
        assert_eq!(info.containers, 3);
        assert_eq!(runner.calls(), vec!["docker info --format {{json .}}"]);
    }

    #[test]
    fn docker_cli_ignores_stderr_warnings() {
        let payload = r#"{"Driver":"overlay2","DriverStatus":[["Data Space Total","50 GB"]],"Containers":4}"#;
        let runner = Arc::new(ScriptedRunner::new().respond(
            "docker info",
            CommandOutput::ok(payload)
                .with_stderr("WARNING: Error loading config file: /root/.docker/config.json\n"),
        ));
        let info = DockerCli::new(runner, "docker").info().expect("info");
        assert_eq!(info.containers, 4);
        assert_eq!(info.driver_value(DATA_SPACE_TOTAL), Some("50 GB"));
    }

    #[test]
    fn docker_cli_failure_is_resource_unavailable() {
        let runner = Arc::new(ScriptedRunner::new().respond(
            "docker info",
            CommandOutput::failed(1, "Cannot connect to the Docker daemon"),
        ));
        let err = DockerCli::new(runner, "docker")
            .info()
            .expect_err("engine down");
        assert_eq!(err.code(), "HWD-2001");
        assert!(err.to_string().contains("Cannot connect"));
    }

    #[test]
    fn docker_cli_garbage_is_resource_unavailable() {
        let runner =
            Arc::new(ScriptedRunner::new().respond("docker info", CommandOutput::ok("<html>")));
        let err = DockerCli::new(runner, "docker")
            .info()
            .expect_err("not json");
        assert_eq!(err.code(), "HWD-2001");
    }

    #[test]
    fn scripted_engine_can_go_down() {
        let engine = ScriptedEngine::with_driver_status(&[
            ("Data Space Total", "50 GB"),
            ("Data Space Used", "40 GB"),
        ]);
        assert!(engine.info().is_ok());
        engine.set_down("socket closed");
        assert_eq!(engine.info().expect_err("down").code(), "HWD-2001");
    }
}
