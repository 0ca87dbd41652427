//! Daemon subsystem: monitor loop, threshold policy, remediation, and fleet
//! health escalation.

pub mod health;
pub mod loop_main;
pub mod policy;
pub mod remediation;
