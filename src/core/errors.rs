//! HWD-prefixed error types with structured error codes.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Shared `Result` alias for the project.
pub type Result<T> = std::result::Result<T, HwdError>;

/// Top-level error type for the host warden.
#[derive(Debug, Error)]
pub enum HwdError {
    #[error("[HWD-1001] invalid configuration: {details}")]
    InvalidConfig { details: String },

    #[error("[HWD-1002] missing configuration file: {path}")]
    MissingConfig { path: PathBuf },

    #[error("[HWD-1003] configuration parse failure in {context}: {details}")]
    ConfigParse {
        context: &'static str,
        details: String,
    },

    #[error("[HWD-1101] unsupported platform: {details}")]
    UnsupportedPlatform { details: String },

    /// The sampling source could not be reached (unmounted path, engine down).
    #[error("[HWD-2001] resource {resource} unavailable: {details}")]
    ResourceUnavailable { resource: String, details: String },

    /// The source answered but a required field was absent or zero.
    #[error("[HWD-2002] metric {metric} unavailable for {resource}: {details}")]
    MetricUnavailable {
        resource: String,
        metric: &'static str,
        details: String,
    },

    #[error("[HWD-2101] remediation {command} failed: {details}")]
    RemediationFailed { command: String, details: String },

    #[error("[HWD-2201] escalation for {instance} failed: {details}")]
    EscalationFailed { instance: String, details: String },

    #[error("[HWD-2301] forward to stream {stream} failed: {details}")]
    ForwardFailed { stream: String, details: String },

    #[error("[HWD-2901] serialization failure in {context}: {details}")]
    Serialization {
        context: &'static str,
        details: String,
    },

    #[error("[HWD-3002] IO failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[HWD-3900] runtime failure: {details}")]
    Runtime { details: String },
}

impl HwdError {
    /// Stable machine-parseable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "HWD-1001",
            Self::MissingConfig { .. } => "HWD-1002",
            Self::ConfigParse { .. } => "HWD-1003",
            Self::UnsupportedPlatform { .. } => "HWD-1101",
            Self::ResourceUnavailable { .. } => "HWD-2001",
            Self::MetricUnavailable { .. } => "HWD-2002",
            Self::RemediationFailed { .. } => "HWD-2101",
            Self::EscalationFailed { .. } => "HWD-2201",
            Self::ForwardFailed { .. } => "HWD-2301",
            Self::Serialization { .. } => "HWD-2901",
            Self::Io { .. } => "HWD-3002",
            Self::Runtime { .. } => "HWD-3900",
        }
    }

    /// Whether retrying on a later tick might resolve the failure.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ResourceUnavailable { .. }
                | Self::MetricUnavailable { .. }
                | Self::RemediationFailed { .. }
                | Self::ForwardFailed { .. }
                | Self::Io { .. }
                | Self::Runtime { .. }
        )
    }

    /// Convenience constructor for IO errors with a known path.
    #[must_use]
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Convenience constructor for unreachable sampling sources.
    #[must_use]
    pub fn unavailable(resource: impl Into<String>, details: impl Into<String>) -> Self {
        Self::ResourceUnavailable {
            resource: resource.into(),
            details: details.into(),
        }
    }
}

impl From<serde_json::Error> for HwdError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization {
            context: "serde_json",
            details: value.to_string(),
        }
    }
}

impl From<toml::de::Error> for HwdError {
    fn from(value: toml::de::Error) -> Self {
        Self::ConfigParse {
            context: "toml",
            details: value.to_string(),
        }
    }
}
