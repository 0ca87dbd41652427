//! Resource sampling: filesystem stats, container-engine data space, kernel log.

pub mod engine;
pub mod fs_stats;
pub mod kernel_log;
pub mod sample;
