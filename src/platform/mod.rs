//! Platform abstraction: filesystem statistics, hostname, external process execution.

pub mod exec;
pub mod pal;
