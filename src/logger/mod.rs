//! Telemetry: structured lines, stdout sink, and best-effort stream forwarding.

pub mod forward;
pub mod line;
pub mod telemetry;
