#![forbid(unsafe_code)]

//! Host warden (hwd): a host-resident self-healing monitor for container hosts.
//!
//! Four independent monitors run on their own threads:
//! 1. **disk**: root volume utilization; prunes container artifacts when full
//!    and marks the host unhealthy past the escalation threshold
//! 2. **docker**: container-engine data space, same policy
//! 3. **dmesg**: kernel log watch for read-only remounts
//! 4. **containers**: container and image counts
//!
//! Every tick emits structured lines to stdout and, optionally, to a log stream.
//!
//! # Library usage
//!
//! ```rust,no_run
//! use host_warden::prelude::*;
//! ```
//!
//! Individual modules can also be imported directly:
//!
//! ```rust,no_run
//! use host_warden::core::config::Config;
//! use host_warden::daemon::policy::{ThresholdRule, decide};
//! ```

pub mod prelude;

pub mod core;
pub mod daemon;
pub mod logger;
pub mod monitor;
pub mod platform;
