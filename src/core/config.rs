//! Configuration system: optional TOML file + env var overrides + compiled-in defaults.
//!
//! The daemon takes no command-line flags. The file location comes from
//! `HWD_CONFIG`; every field can additionally be overridden through an
//! `HWD_*` environment variable. The forwarding stream keeps its historical
//! `KINESIS` variable name.

#![allow(missing_docs)]

use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::errors::{HwdError, Result};
use crate::daemon::policy::ThresholdRule;

/// Environment variable naming the config file.
pub const CONFIG_PATH_ENV: &str = "HWD_CONFIG";
/// Historical environment variable naming the forwarding stream.
pub const LEGACY_STREAM_ENV: &str = "KINESIS";

/// Full host warden configuration model.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub monitor: MonitorConfig,
    pub disk: DiskConfig,
    pub engine: EngineConfig,
    pub kernel_log: KernelLogConfig,
    pub remediation: RemediationConfig,
    pub identity: IdentityConfig,
    pub telemetry: TelemetryConfig,
    pub fleet: FleetConfig,
}

/// Scheduling cadence and per-monitor switches.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MonitorConfig {
    pub interval_secs: u64,
    pub disk: bool,
    pub engine: bool,
    pub kernel_log: bool,
    pub containers: bool,
}

/// Root volume thresholds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DiskConfig {
    pub path: PathBuf,
    pub reclaim_at: f64,
    pub escalate_at: Option<f64>,
    pub hysteresis_pct: f64,
    pub reclaim_cooldown_ticks: u64,
}

/// Container-engine storage thresholds and client binary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    pub binary: String,
    pub reclaim_at: f64,
    pub escalate_at: Option<f64>,
    pub hysteresis_pct: f64,
    pub reclaim_cooldown_ticks: u64,
}

/// Kernel ring buffer scan.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct KernelLogConfig {
    pub pattern: String,
    pub command: String,
}

/// Shell commands used to reclaim space.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RemediationConfig {
    pub container_prune: String,
    pub image_prune: String,
}

/// Instance identity lookup.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct IdentityConfig {
    pub endpoint: String,
    pub timeout_ms: u64,
    pub fallback_prefix: String,
    pub hostname_chars: usize,
}

/// Rendering of telemetry lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TelemetryFormat {
    #[default]
    Logfmt,
    Json,
}

impl fmt::Display for TelemetryFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Logfmt => write!(f, "logfmt"),
            Self::Json => write!(f, "json"),
        }
    }
}

/// Telemetry sink settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Forwarding stream; `None` disables forwarding entirely.
    pub stream: Option<String>,
    pub format: TelemetryFormat,
    pub forward_prefix: String,
}

/// Fleet-manager health reporting.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct FleetConfig {
    pub enabled: bool,
    pub respect_grace_period: bool,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_secs: 300,
            disk: true,
            engine: true,
            kernel_log: true,
            containers: true,
        }
    }
}

impl Default for DiskConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/"),
            reclaim_at: 80.0,
            escalate_at: Some(98.0),
            hysteresis_pct: 2.0,
            reclaim_cooldown_ticks: 12,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            binary: "docker".to_string(),
            reclaim_at: 80.0,
            escalate_at: None,
            hysteresis_pct: 2.0,
            reclaim_cooldown_ticks: 12,
        }
    }
}

impl Default for KernelLogConfig {
    fn default() -> Self {
        Self {
            pattern: "Remounting filesystem read-only".to_string(),
            command: "dmesg".to_string(),
        }
    }
}

impl Default for RemediationConfig {
    fn default() -> Self {
        Self {
            container_prune: "docker container prune --force".to_string(),
            image_prune: "docker image prune --all --force".to_string(),
        }
    }
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://169.254.169.254/latest/meta-data/instance-id".to_string(),
            timeout_ms: 500,
            fallback_prefix: "i-".to_string(),
            hostname_chars: 8,
        }
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            stream: None,
            format: TelemetryFormat::Logfmt,
            forward_prefix: "agent: ".to_string(),
        }
    }
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            respect_grace_period: true,
        }
    }
}

impl DiskConfig {
    /// Threshold rule for the root volume monitor.
    #[must_use]
    pub fn rule(&self) -> ThresholdRule {
        ThresholdRule {
            resource_label: self.path.to_string_lossy().into_owned(),
            reclaim_at: self.reclaim_at,
            escalate_at: self.escalate_at,
            hysteresis_pct: self.hysteresis_pct,
            reclaim_cooldown_ticks: self.reclaim_cooldown_ticks,
        }
    }
}

impl EngineConfig {
    /// Threshold rule for the container-engine data space monitor.
    #[must_use]
    pub fn rule(&self) -> ThresholdRule {
        ThresholdRule {
            resource_label: "container-engine".to_string(),
            reclaim_at: self.reclaim_at,
            escalate_at: self.escalate_at,
            hysteresis_pct: self.hysteresis_pct,
            reclaim_cooldown_ticks: self.reclaim_cooldown_ticks,
        }
    }
}

impl MonitorConfig {
    #[must_use]
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl IdentityConfig {
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Config {
    /// Default configuration path.
    #[must_use]
    pub fn default_path() -> PathBuf {
        PathBuf::from("/etc/hwd/config.toml")
    }

    /// Load config from the path named by `HWD_CONFIG` (or the default path).
    pub fn load_from_env() -> Result<Self> {
        let explicit = env_var(CONFIG_PATH_ENV).map(PathBuf::from);
        Self::load(explicit.as_deref())
    }

    /// Load config from default or explicit path, then apply env overrides.
    ///
    /// Missing config file is not an error when loading from default path; defaults are used.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with(path, env_var)
    }

    fn load_with<F>(path: Option<&Path>, lookup: F) -> Result<Self>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let path_buf = path.map_or_else(Self::default_path, Path::to_path_buf);
        let is_explicit_path = path.is_some();

        let mut cfg = if path_buf.exists() {
            let raw = fs::read_to_string(&path_buf).map_err(|source| HwdError::Io {
                path: path_buf.clone(),
                source,
            })?;
            toml::from_str::<Self>(&raw)?
        } else if is_explicit_path {
            return Err(HwdError::MissingConfig { path: path_buf });
        } else {
            Self::default()
        };

        cfg.apply_env_overrides_from(lookup)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Deterministic hash of the effective config for startup logging.
    ///
    /// FNV-1a over the canonical JSON form, stable across processes.
    pub fn stable_hash(&self) -> Result<String> {
        let canonical = serde_json::to_string(self)?;
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in canonical.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        Ok(format!("{hash:016x}"))
    }

    #[allow(clippy::too_many_lines)]
    fn apply_env_overrides_from<F>(&mut self, mut lookup: F) -> Result<()>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let mut get = |name: &str| lookup(name).filter(|raw| !raw.trim().is_empty());

        // monitor
        if let Some(raw) = get("HWD_MONITOR_INTERVAL_SECS") {
            self.monitor.interval_secs = parse_env("HWD_MONITOR_INTERVAL_SECS", &raw)?;
        }
        if let Some(raw) = get("HWD_MONITOR_DISK") {
            self.monitor.disk = parse_env("HWD_MONITOR_DISK", &raw)?;
        }
        if let Some(raw) = get("HWD_MONITOR_ENGINE") {
            self.monitor.engine = parse_env("HWD_MONITOR_ENGINE", &raw)?;
        }
        if let Some(raw) = get("HWD_MONITOR_KERNEL_LOG") {
            self.monitor.kernel_log = parse_env("HWD_MONITOR_KERNEL_LOG", &raw)?;
        }
        if let Some(raw) = get("HWD_MONITOR_CONTAINERS") {
            self.monitor.containers = parse_env("HWD_MONITOR_CONTAINERS", &raw)?;
        }

        // disk
        if let Some(raw) = get("HWD_DISK_PATH") {
            self.disk.path = PathBuf::from(raw);
        }
        if let Some(raw) = get("HWD_DISK_RECLAIM_AT") {
            self.disk.reclaim_at = parse_env("HWD_DISK_RECLAIM_AT", &raw)?;
        }
        if let Some(raw) = get("HWD_DISK_ESCALATE_AT") {
            self.disk.escalate_at = parse_optional_pct("HWD_DISK_ESCALATE_AT", &raw)?;
        }
        if let Some(raw) = get("HWD_DISK_HYSTERESIS_PCT") {
            self.disk.hysteresis_pct = parse_env("HWD_DISK_HYSTERESIS_PCT", &raw)?;
        }
        if let Some(raw) = get("HWD_DISK_RECLAIM_COOLDOWN_TICKS") {
            self.disk.reclaim_cooldown_ticks =
                parse_env("HWD_DISK_RECLAIM_COOLDOWN_TICKS", &raw)?;
        }

        // engine
        if let Some(raw) = get("HWD_ENGINE_BINARY") {
            self.engine.binary = raw;
        }
        if let Some(raw) = get("HWD_ENGINE_RECLAIM_AT") {
            self.engine.reclaim_at = parse_env("HWD_ENGINE_RECLAIM_AT", &raw)?;
        }
        if let Some(raw) = get("HWD_ENGINE_ESCALATE_AT") {
            self.engine.escalate_at = parse_optional_pct("HWD_ENGINE_ESCALATE_AT", &raw)?;
        }
        if let Some(raw) = get("HWD_ENGINE_HYSTERESIS_PCT") {
            self.engine.hysteresis_pct = parse_env("HWD_ENGINE_HYSTERESIS_PCT", &raw)?;
        }
        if let Some(raw) = get("HWD_ENGINE_RECLAIM_COOLDOWN_TICKS") {
            self.engine.reclaim_cooldown_ticks =
                parse_env("HWD_ENGINE_RECLAIM_COOLDOWN_TICKS", &raw)?;
        }

        // kernel log
        if let Some(raw) = get("HWD_KERNEL_LOG_PATTERN") {
            self.kernel_log.pattern = raw;
        }
        if let Some(raw) = get("HWD_KERNEL_LOG_COMMAND") {
            self.kernel_log.command = raw;
        }

        // remediation
        if let Some(raw) = get("HWD_REMEDIATION_CONTAINER_PRUNE") {
            self.remediation.container_prune = raw;
        }
        if let Some(raw) = get("HWD_REMEDIATION_IMAGE_PRUNE") {
            self.remediation.image_prune = raw;
        }

        // identity
        if let Some(raw) = get("HWD_IDENTITY_ENDPOINT") {
            self.identity.endpoint = raw;
        }
        if let Some(raw) = get("HWD_IDENTITY_TIMEOUT_MS") {
            self.identity.timeout_ms = parse_env("HWD_IDENTITY_TIMEOUT_MS", &raw)?;
        }

        // telemetry: the dedicated name wins over the historical one.
        if let Some(raw) = get("HWD_TELEMETRY_STREAM").or_else(|| get(LEGACY_STREAM_ENV)) {
            self.telemetry.stream = Some(raw.trim().to_string());
        }
        if let Some(raw) = get("HWD_TELEMETRY_FORMAT") {
            self.telemetry.format = match raw.trim().to_ascii_lowercase().as_str() {
                "logfmt" => TelemetryFormat::Logfmt,
                "json" => TelemetryFormat::Json,
                other => {
                    return Err(HwdError::ConfigParse {
                        context: "env",
                        details: format!("HWD_TELEMETRY_FORMAT={other:?}: expected logfmt or json"),
                    });
                }
            };
        }

        // fleet
        if let Some(raw) = get("HWD_FLEET_ENABLED") {
            self.fleet.enabled = parse_env("HWD_FLEET_ENABLED", &raw)?;
        }
        if let Some(raw) = get("HWD_FLEET_RESPECT_GRACE_PERIOD") {
            self.fleet.respect_grace_period = parse_env("HWD_FLEET_RESPECT_GRACE_PERIOD", &raw)?;
        }

        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.monitor.interval_secs == 0 {
            return Err(HwdError::InvalidConfig {
                details: "monitor.interval_secs must be >= 1".to_string(),
            });
        }

        validate_thresholds(
            "disk",
            self.disk.reclaim_at,
            self.disk.escalate_at,
            self.disk.hysteresis_pct,
            self.disk.reclaim_cooldown_ticks,
        )?;
        validate_thresholds(
            "engine",
            self.engine.reclaim_at,
            self.engine.escalate_at,
            self.engine.hysteresis_pct,
            self.engine.reclaim_cooldown_ticks,
        )?;

        if self.disk.path.as_os_str().is_empty() {
            return Err(HwdError::InvalidConfig {
                details: "disk.path must not be empty".to_string(),
            });
        }

        let required = [
            ("engine.binary", &self.engine.binary),
            ("kernel_log.pattern", &self.kernel_log.pattern),
            ("kernel_log.command", &self.kernel_log.command),
            ("remediation.container_prune", &self.remediation.container_prune),
            ("remediation.image_prune", &self.remediation.image_prune),
            ("identity.endpoint", &self.identity.endpoint),
        ];
        for (name, value) in required {
            if value.trim().is_empty() {
                return Err(HwdError::InvalidConfig {
                    details: format!("{name} must not be empty"),
                });
            }
        }

        if self.identity.timeout_ms == 0 {
            return Err(HwdError::InvalidConfig {
                details: "identity.timeout_ms must be >= 1".to_string(),
            });
        }

        if self
            .telemetry
            .stream
            .as_deref()
            .is_some_and(|stream| stream.trim().is_empty())
        {
            return Err(HwdError::InvalidConfig {
                details: "telemetry.stream must be omitted rather than empty".to_string(),
            });
        }

        Ok(())
    }
}

fn validate_thresholds(
    section: &str,
    reclaim_at: f64,
    escalate_at: Option<f64>,
    hysteresis_pct: f64,
    cooldown_ticks: u64,
) -> Result<()> {
    validate_pct(&format!("{section}.reclaim_at"), reclaim_at)?;
    if let Some(escalate_at) = escalate_at {
        validate_pct(&format!("{section}.escalate_at"), escalate_at)?;
        if escalate_at <= reclaim_at {
            return Err(HwdError::InvalidConfig {
                details: format!(
                    "{section}.escalate_at ({escalate_at}) must be above reclaim_at ({reclaim_at})"
                ),
            });
        }
    }
    if !(0.0..reclaim_at).contains(&hysteresis_pct) {
        return Err(HwdError::InvalidConfig {
            details: format!(
                "{section}.hysteresis_pct must be in [0,{reclaim_at}), got {hysteresis_pct}"
            ),
        });
    }
    if cooldown_ticks == 0 {
        return Err(HwdError::InvalidConfig {
            details: format!("{section}.reclaim_cooldown_ticks must be >= 1"),
        });
    }
    Ok(())
}

fn validate_pct(name: &str, value: f64) -> Result<()> {
    if !(value > 0.0 && value <= 100.0) {
        return Err(HwdError::InvalidConfig {
            details: format!("{name} must be in (0,100], got {value}"),
        });
    }
    Ok(())
}

fn env_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|raw| !raw.trim().is_empty())
}

fn parse_env<T>(name: &str, raw: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: fmt::Display,
{
    raw.trim().parse::<T>().map_err(|error| HwdError::ConfigParse {
        context: "env",
        details: format!("{name}={raw:?}: {error}"),
    })
}

/// `off`/`none` disables an optional threshold.
fn parse_optional_pct(name: &str, raw: &str) -> Result<Option<f64>> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "off" | "none" => Ok(None),
        _ => parse_env(name, raw).map(Some),
    }
}
