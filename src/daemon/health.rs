//! Fleet-manager health signalling.
//!
//! [`HealthReporter::report_unhealthy`] makes exactly one external call per
//! invocation and keeps no memory of earlier calls. Callers rely on the
//! policy's terminal escalation to call it at most once per condition.

#![allow(missing_docs)]

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::core::config::FleetConfig;
use crate::core::errors::{HwdError, Result};
use crate::core::identity::HostIdentity;
use crate::platform::exec::{CommandRunner, Invocation};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Healthy => write!(f, "Healthy"),
            Self::Unhealthy => write!(f, "Unhealthy"),
        }
    }
}

/// The single write operation of the fleet health API.
pub trait FleetHealth: Send + Sync {
    fn set_instance_health(
        &self,
        instance_id: &str,
        status: HealthStatus,
        respect_grace_period: bool,
    ) -> Result<()>;
}

/// Calls `aws autoscaling set-instance-health` through the command runner.
pub struct AwsCliFleetHealth {
    runner: Arc<dyn CommandRunner>,
    binary: String,
}

impl AwsCliFleetHealth {
    #[must_use]
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            binary: "aws".to_string(),
        }
    }
}

impl FleetHealth for AwsCliFleetHealth {
    fn set_instance_health(
        &self,
        instance_id: &str,
        status: HealthStatus,
        respect_grace_period: bool,
    ) -> Result<()> {
        let grace = if respect_grace_period {
            "--should-respect-grace-period"
        } else {
            "--no-should-respect-grace-period"
        };
        let invocation = Invocation::program(
            &self.binary,
            [
                "autoscaling".to_string(),
                "set-instance-health".to_string(),
                "--instance-id".to_string(),
                instance_id.to_string(),
                "--health-status".to_string(),
                status.to_string(),
                grace.to_string(),
            ],
        );
        let output = self.runner.run(&invocation)?;
        if output.success() {
            Ok(())
        } else {
            Err(HwdError::Runtime {
                details: format!("{}: {}", output.exit_description(), output.output.trim()),
            })
        }
    }
}

/// One recorded `set_instance_health` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FleetCall {
    pub instance_id: String,
    pub status: HealthStatus,
    pub respect_grace_period: bool,
}

/// In-memory fleet API for tests.
#[derive(Debug, Default)]
pub struct RecordingFleet {
    calls: Mutex<Vec<FleetCall>>,
    failure: Mutex<Option<String>>,
}

impl RecordingFleet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fleet whose API call errors after being recorded.
    #[must_use]
    pub fn failing(details: impl Into<String>) -> Self {
        let fleet = Self::default();
        *fleet.failure.lock() = Some(details.into());
        fleet
    }

    #[must_use]
    pub fn calls(&self) -> Vec<FleetCall> {
        self.calls.lock().clone()
    }
}

impl FleetHealth for RecordingFleet {
    fn set_instance_health(
        &self,
        instance_id: &str,
        status: HealthStatus,
        respect_grace_period: bool,
    ) -> Result<()> {
        self.calls.lock().push(FleetCall {
            instance_id: instance_id.to_string(),
            status,
            respect_grace_period,
        });
        match self.failure.lock().as_ref() {
            Some(details) => Err(HwdError::Runtime {
                details: details.clone(),
            }),
            None => Ok(()),
        }
    }
}

/// Marks this host unhealthy in the fleet manager.
pub struct HealthReporter {
    fleet: Arc<dyn FleetHealth>,
    instance: HostIdentity,
    respect_grace_period: bool,
    enabled: bool,
}

impl HealthReporter {
    #[must_use]
    pub fn new(fleet: Arc<dyn FleetHealth>, instance: HostIdentity, config: &FleetConfig) -> Self {
        Self {
            fleet,
            instance,
            respect_grace_period: config.respect_grace_period,
            enabled: config.enabled,
        }
    }

    #[must_use]
    pub const fn enabled(&self) -> bool {
        self.enabled
    }

    /// Report the host unhealthy. `reason` is carried for the caller's telemetry;
    /// the fleet API itself takes no reason.
    ///
    /// A disabled reporter is a no-op that returns `Ok`.
    pub fn report_unhealthy(&self, reason: &str) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        self.fleet
            .set_instance_health(
                self.instance.as_str(),
                HealthStatus::Unhealthy,
                self.respect_grace_period,
            )
            .map_err(|err| HwdError::EscalationFailed {
                instance: self.instance.to_string(),
                details: format!("{err} (reason: {reason})"),
            })
    }
}
