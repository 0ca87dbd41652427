//! Kernel ring buffer scan for filesystem read-only remounts.

#![allow(missing_docs)]

use std::sync::Arc;

use memchr::memmem;

use crate::core::errors::{HwdError, Result};
use crate::platform::exec::{CommandRunner, Invocation};

/// Resource label used in kernel-log errors.
pub const KERNEL_LOG_RESOURCE: &str = "kernel-log";

/// Reads the kernel log through a command and looks for a fixed substring.
pub struct KernelLogScanner {
    runner: Arc<dyn CommandRunner>,
    command: String,
    pattern: String,
}

impl KernelLogScanner {
    #[must_use]
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        command: impl Into<String>,
        pattern: impl Into<String>,
    ) -> Self {
        Self {
            runner,
            command: command.into(),
            pattern: pattern.into(),
        }
    }

    /// First log line containing the pattern, if any.
    pub fn scan(&self) -> Result<Option<String>> {
        let output = self
            .runner
            .run(&Invocation::shell(&self.command))
            .map_err(|err| HwdError::unavailable(KERNEL_LOG_RESOURCE, err.to_string()))?;
        if !output.success() {
            return Err(HwdError::unavailable(
                KERNEL_LOG_RESOURCE,
                format!("{}: {}", output.exit_description(), output.output.trim()),
            ));
        }
        Ok(find_matching_line(output.output.as_bytes(), self.pattern.as_bytes()))
    }
}

/// Locate `pattern` in `haystack` and return the whole line containing it, trimmed.
#[must_use]
pub fn find_matching_line(haystack: &[u8], pattern: &[u8]) -> Option<String> {
    if pattern.is_empty() {
        return None;
    }
    let at = memmem::find(haystack, pattern)?;
    let start = memchr::memrchr(b'\n', &haystack[..at]).map_or(0, |nl| nl + 1);
    let end = memchr::memchr(b'\n', &haystack[at..]).map_or(haystack.len(), |nl| at + nl);
    Some(
        String::from_utf8_lossy(&haystack[start..end])
            .trim()
            .to_string(),
    )
}
