//! Filesystem sampler: statvfs block counts turned into utilization figures.
//!
//! Utilization is `used / (used + available) * 100` with `available` taken from
//! the free block count. The engine sampler uses `used / total`; the two formulas
//! are kept per resource so existing alert thresholds keep their meaning.

#![allow(missing_docs)]
#![allow(clippy::cast_precision_loss)]

use std::path::PathBuf;
use std::sync::Arc;

use crate::core::errors::{HwdError, Result};
use crate::monitor::sample::{FS_GIGABYTE, UtilizationSample};
use crate::platform::pal::{FsStats, Platform};

/// Samples one mount path on every call. No caching.
pub struct FsSampler {
    platform: Arc<dyn Platform>,
    path: PathBuf,
}

impl FsSampler {
    #[must_use]
    pub fn new(platform: Arc<dyn Platform>, path: impl Into<PathBuf>) -> Self {
        Self {
            platform,
            path: path.into(),
        }
    }

    /// Stat the path and derive a sample.
    ///
    /// Fails with `ResourceUnavailable` when the path cannot be statted and
    /// `MetricUnavailable` when the filesystem reports no capacity.
    pub fn sample(&self) -> Result<(UtilizationSample, FsStats)> {
        let stats = self.platform.fs_stats(&self.path)?;
        let label = self.path.to_string_lossy().into_owned();
        let sample = filesystem_utilization(&label, &stats)?;
        Ok((sample, stats))
    }
}

/// Pure derivation of a filesystem sample from raw block statistics.
pub fn filesystem_utilization(label: &str, stats: &FsStats) -> Result<UtilizationSample> {
    let total = stats.total_bytes();
    let free = stats.free_bytes().min(total);
    if total == 0 {
        return Err(HwdError::MetricUnavailable {
            resource: label.to_string(),
            metric: "total blocks",
            details: "filesystem reports zero capacity".to_string(),
        });
    }

    let available = free as f64 / FS_GIGABYTE;
    let used = (total - free) as f64 / FS_GIGABYTE;
    let utilization = (used / (used + available) * 100.0).clamp(0.0, 100.0);

    Ok(UtilizationSample {
        resource_label: label.to_string(),
        available,
        total: total as f64 / FS_GIGABYTE,
        used,
        utilization,
    })
}
