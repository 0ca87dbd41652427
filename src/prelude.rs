//! Convenience re-exports for library consumers.
//!
//! ```rust,no_run
//! use host_warden::prelude::*;
//! ```

// Core
pub use crate::core::config::Config;
pub use crate::core::errors::{HwdError, Result};
pub use crate::core::identity::{HostIdentity, resolve_identity};

// Platform
pub use crate::platform::exec::{CommandOutput, CommandRunner, Invocation, ShellRunner};
pub use crate::platform::pal::{FsStats, Platform, detect_platform};

// Monitor
pub use crate::monitor::engine::{ContainerEngine, EngineInfo, EngineSampler};
pub use crate::monitor::fs_stats::FsSampler;
pub use crate::monitor::kernel_log::KernelLogScanner;
pub use crate::monitor::sample::UtilizationSample;

// Daemon
pub use crate::daemon::health::{FleetHealth, HealthReporter, HealthStatus};
pub use crate::daemon::loop_main::{Collaborators, Monitor, MonitorDaemon};
pub use crate::daemon::policy::{Action, BreachLevel, MonitorState, ThresholdRule, decide};
pub use crate::daemon::remediation::{ReclaimReport, RemediationOutcome, Remediator};

// Logger
pub use crate::logger::line::MetricLine;
pub use crate::logger::telemetry::TelemetrySink;
