//! Utilization samples produced fresh on every tick.

#![allow(missing_docs)]

use serde::Serialize;

/// Bytes per gigabyte for filesystem samples (binary, matches `df -h`).
pub const FS_GIGABYTE: f64 = 1024.0 * 1024.0 * 1024.0;
/// Bytes per gigabyte for engine samples (decimal, matches the engine's own units).
pub const ENGINE_GIGABYTE: f64 = 1_000_000_000.0;

/// One resource's derived capacity figures, in gigabytes.
///
/// Ephemeral: built from live state each tick and dropped after reporting.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UtilizationSample {
    pub resource_label: String,
    pub available: f64,
    pub total: f64,
    pub used: f64,
    /// Percent of capacity consumed, in `[0, 100]`.
    pub utilization: f64,
}

impl UtilizationSample {
    /// Whether `used + available` matches `total` within `tolerance` gigabytes.
    #[must_use]
    pub fn is_consistent(&self, tolerance: f64) -> bool {
        ((self.used + self.available) - self.total).abs() <= tolerance
    }
}
