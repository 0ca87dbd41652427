//! Forwarding of rendered lines to an external log stream.

#![allow(missing_docs)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use crate::core::errors::{HwdError, Result};
use crate::platform::exec::{CommandRunner, Invocation};

/// Sends one record to a named destination. Implementations must be safe to
/// call from every monitor thread at once.
pub trait StreamForwarder: Send + Sync {
    fn put_record(&self, data: &[u8]) -> Result<()>;
    fn destination(&self) -> &str;
}

/// Forwarder that shells out to `aws kinesis put-record`.
///
/// Every record gets a fresh random partition key so records spread across
/// shards. Credentials and region come from the CLI's own environment.
pub struct KinesisCliForwarder {
    runner: Arc<dyn CommandRunner>,
    stream: String,
    binary: String,
}

impl KinesisCliForwarder {
    #[must_use]
    pub fn new(runner: Arc<dyn CommandRunner>, stream: impl Into<String>) -> Self {
        Self {
            runner,
            stream: stream.into(),
            binary: "aws".to_string(),
        }
    }

    fn invocation(&self, data: &str) -> Invocation {
        Invocation::program(
            &self.binary,
            [
                "kinesis".to_string(),
                "put-record".to_string(),
                "--stream-name".to_string(),
                self.stream.clone(),
                "--partition-key".to_string(),
                partition_key(),
                "--data".to_string(),
                data.to_string(),
                "--cli-binary-format".to_string(),
                "raw-in-base64-out".to_string(),
            ],
        )
    }
}

impl StreamForwarder for KinesisCliForwarder {
    fn put_record(&self, data: &[u8]) -> Result<()> {
        let text = String::from_utf8_lossy(data);
        let output = self
            .runner
            .run(&self.invocation(&text))
            .map_err(|err| HwdError::ForwardFailed {
                stream: self.stream.clone(),
                details: err.to_string(),
            })?;
        if output.success() {
            Ok(())
        } else {
            Err(HwdError::ForwardFailed {
                stream: self.stream.clone(),
                details: format!("{}: {}", output.exit_description(), output.output.trim()),
            })
        }
    }

    fn destination(&self) -> &str {
        &self.stream
    }
}

/// Random 64-bit partition key in hex.
#[must_use]
pub fn partition_key() -> String {
    format!("{:016x}", rand::random::<u64>())
}

/// Test forwarder that records payloads and can be told to fail.
#[derive(Debug, Default)]
pub struct RecordingForwarder {
    records: Mutex<Vec<String>>,
    failing: AtomicBool,
}

impl RecordingForwarder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Forwarder whose every send fails after recording the attempt.
    #[must_use]
    pub fn failing() -> Self {
        let forwarder = Self::default();
        forwarder.set_failing(true);
        forwarder
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Every attempted payload, including failed ones.
    #[must_use]
    pub fn records(&self) -> Vec<String> {
        self.records.lock().clone()
    }
}

impl StreamForwarder for RecordingForwarder {
    fn put_record(&self, data: &[u8]) -> Result<()> {
        self.records
            .lock()
            .push(String::from_utf8_lossy(data).into_owned());
        if self.failing.load(Ordering::SeqCst) {
            return Err(HwdError::ForwardFailed {
                stream: "recording".to_string(),
                details: "scripted failure".to_string(),
            });
        }
        Ok(())
    }

    fn destination(&self) -> &str {
        "recording"
    }
}
