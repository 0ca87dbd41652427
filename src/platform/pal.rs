//! PAL trait and platform-specific implementations.

#![allow(missing_docs)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::core::errors::{HwdError, Result};

/// Raw block-device statistics for a mount path.
///
/// Counts are in units of `block_size` bytes (the statvfs fragment size).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FsStats {
    pub block_size: u64,
    pub blocks: u64,
    pub blocks_free: u64,
    pub blocks_available: u64,
    pub mount_point: PathBuf,
    pub is_readonly: bool,
}

impl FsStats {
    /// Build stats from byte totals, using 4 KiB blocks.
    #[must_use]
    pub fn from_bytes(mount_point: impl Into<PathBuf>, total_bytes: u64, free_bytes: u64) -> Self {
        const BLOCK: u64 = 4096;
        Self {
            block_size: BLOCK,
            blocks: total_bytes / BLOCK,
            blocks_free: free_bytes / BLOCK,
            blocks_available: free_bytes / BLOCK,
            mount_point: mount_point.into(),
            is_readonly: false,
        }
    }

    #[must_use]
    pub fn total_bytes(&self) -> u64 {
        self.blocks.saturating_mul(self.block_size)
    }

    #[must_use]
    pub fn free_bytes(&self) -> u64 {
        self.blocks_free.saturating_mul(self.block_size)
    }
}

/// OS abstraction used by the samplers and identity resolution.
pub trait Platform: Send + Sync {
    fn fs_stats(&self, path: &Path) -> Result<FsStats>;
    fn hostname(&self) -> Result<String>;
}

/// Linux platform implementation using `statvfs` + `gethostname`.
#[derive(Debug, Default)]
pub struct LinuxPlatform;

impl LinuxPlatform {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[cfg(unix)]
impl Platform for LinuxPlatform {
    fn fs_stats(&self, path: &Path) -> Result<FsStats> {
        let stat = nix::sys::statvfs::statvfs(path)
            .map_err(|error| HwdError::unavailable(path.display().to_string(), error.to_string()))?;
        Ok(FsStats {
            block_size: stat.fragment_size(),
            blocks: stat.blocks(),
            blocks_free: stat.blocks_free(),
            blocks_available: stat.blocks_available(),
            mount_point: path.to_path_buf(),
            is_readonly: stat.flags().contains(nix::sys::statvfs::FsFlags::ST_RDONLY),
        })
    }

    fn hostname(&self) -> Result<String> {
        let raw = nix::unistd::gethostname().map_err(|error| HwdError::Runtime {
            details: format!("gethostname: {error}"),
        })?;
        raw.into_string().map_err(|raw| HwdError::Runtime {
            details: format!("hostname is not valid UTF-8: {raw:?}"),
        })
    }
}

/// In-memory mock implementation for deterministic tests.
///
/// Stats can be swapped while the mock is shared, so a test can drive a
/// running monitor through fill and drain cycles.
#[derive(Debug, Default)]
pub struct MockPlatform {
    stats_by_path: Mutex<HashMap<PathBuf, FsStats>>,
    hostname: Option<String>,
}

impl MockPlatform {
    #[must_use]
    pub fn new(stats_by_path: HashMap<PathBuf, FsStats>, hostname: Option<String>) -> Self {
        Self {
            stats_by_path: Mutex::new(stats_by_path),
            hostname,
        }
    }

    #[must_use]
    pub fn with_hostname(hostname: impl Into<String>) -> Self {
        Self {
            stats_by_path: Mutex::new(HashMap::new()),
            hostname: Some(hostname.into()),
        }
    }

    #[must_use]
    pub fn with_stats(mut self, path: impl Into<PathBuf>, stats: FsStats) -> Self {
        self.stats_by_path.get_mut().insert(path.into(), stats);
        self
    }

    /// Replace the stats for `path`.
    pub fn set_stats(&self, path: impl Into<PathBuf>, stats: FsStats) {
        self.stats_by_path.lock().insert(path.into(), stats);
    }

    /// Make `path` look unmounted from now on.
    pub fn unmount(&self, path: &Path) {
        self.stats_by_path.lock().remove(path);
    }
}

impl Platform for MockPlatform {
    fn fs_stats(&self, path: &Path) -> Result<FsStats> {
        self.stats_by_path
            .lock()
            .get(path)
            .cloned()
            .ok_or_else(|| HwdError::unavailable(path.display().to_string(), "not mounted"))
    }

    fn hostname(&self) -> Result<String> {
        self.hostname.clone().ok_or_else(|| HwdError::Runtime {
            details: "mock hostname not set".to_string(),
        })
    }
}

/// Detect active platform implementation.
pub fn detect_platform() -> Result<Arc<dyn Platform>> {
    #[cfg(unix)]
    {
        Ok(Arc::new(LinuxPlatform::new()))
    }
    #[cfg(not(unix))]
    {
        Err(HwdError::UnsupportedPlatform {
            details: "statvfs-based sampling requires a unix host".to_string(),
        })
    }
}
