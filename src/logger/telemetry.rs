//! Best-effort telemetry sink shared by every monitor thread.
//!
//! `emit` writes the rendered line to local output first, as one `write_all`
//! so concurrent monitors never interleave partial lines. It then forwards the
//! line when a stream is configured. Forwarding is attempted once per line:
//! no retry, no buffering. Failures go to stderr and are never returned.

#![allow(missing_docs)]

use std::io::{self, Write};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::core::config::{TelemetryConfig, TelemetryFormat};
use crate::core::errors::HwdError;
use crate::logger::forward::{KinesisCliForwarder, StreamForwarder};
use crate::logger::line::MetricLine;
use crate::platform::exec::CommandRunner;

/// Where rendered lines go locally.
#[derive(Debug)]
enum LocalOutput {
    Stdout,
    /// Keep lines in memory (tests and embedding).
    Capture(Mutex<Vec<MetricLine>>),
}

pub struct TelemetrySink {
    format: TelemetryFormat,
    forward_prefix: String,
    forwarder: Option<Arc<dyn StreamForwarder>>,
    local: LocalOutput,
}

impl TelemetrySink {
    /// Sink writing to stdout with no forwarding.
    #[must_use]
    pub fn stdout(format: TelemetryFormat) -> Self {
        Self {
            format,
            forward_prefix: String::new(),
            forwarder: None,
            local: LocalOutput::Stdout,
        }
    }

    /// Sink that keeps lines in memory instead of printing them.
    #[must_use]
    pub fn capturing(format: TelemetryFormat) -> Self {
        Self {
            format,
            forward_prefix: String::new(),
            forwarder: None,
            local: LocalOutput::Capture(Mutex::new(Vec::new())),
        }
    }

    /// Build the production sink. Forwarding is enabled only when a stream is named.
    #[must_use]
    pub fn from_config(config: &TelemetryConfig, runner: Arc<dyn CommandRunner>) -> Self {
        let sink = Self::stdout(config.format);
        match config.stream.as_deref() {
            Some(stream) => sink.with_forwarder(
                Arc::new(KinesisCliForwarder::new(runner, stream)),
                config.forward_prefix.clone(),
            ),
            None => sink,
        }
    }

    #[must_use]
    pub fn with_forwarder(
        mut self,
        forwarder: Arc<dyn StreamForwarder>,
        prefix: impl Into<String>,
    ) -> Self {
        self.forwarder = Some(forwarder);
        self.forward_prefix = prefix.into();
        self
    }

    #[must_use]
    pub const fn format(&self) -> TelemetryFormat {
        self.format
    }

    #[must_use]
    pub fn forwarding_to(&self) -> Option<&str> {
        self.forwarder.as_deref().map(|forwarder| forwarder.destination())
    }

    /// Report one line. Never fails.
    pub fn emit(&self, line: MetricLine) {
        let mut rendered = line.render(self.format);
        rendered.push('\n');

        match &self.local {
            LocalOutput::Stdout => {
                write_or_fallback(&mut io::stdout().lock(), &mut io::stderr(), &rendered);
            }
            LocalOutput::Capture(lines) => lines.lock().push(line),
        }

        if let Some(forwarder) = &self.forwarder {
            let mut payload = Vec::with_capacity(self.forward_prefix.len() + rendered.len());
            payload.extend_from_slice(self.forward_prefix.as_bytes());
            payload.extend_from_slice(rendered.as_bytes());
            if let Err(err) = forwarder.put_record(&payload) {
                eprintln!("[HWD-FORWARD] {err}");
            }
        }
    }

    /// Report a failure as an error-class line: `error=<message> code=<HWD-NNNN>`.
    pub fn emit_error(&self, monitor: &str, instance: &str, err: &HwdError) {
        self.emit(
            MetricLine::new(monitor, instance)
                .str("error", err.to_string())
                .str("code", err.code()),
        );
    }

    /// Lines kept by a capturing sink, in emission order. Empty for stdout sinks.
    #[must_use]
    pub fn captured(&self) -> Vec<MetricLine> {
        match &self.local {
            LocalOutput::Stdout => Vec::new(),
            LocalOutput::Capture(lines) => lines.lock().clone(),
        }
    }

    /// Captured lines rendered as logfmt.
    #[must_use]
    pub fn captured_logfmt(&self) -> Vec<String> {
        self.captured().iter().map(MetricLine::to_logfmt).collect()
    }
}

/// Write one rendered line; on failure, report it and the line on `fallback`.
fn write_or_fallback(out: &mut impl Write, fallback: &mut impl Write, rendered: &str) {
    if let Err(err) = out.write_all(rendered.as_bytes()).and_then(|()| out.flush()) {
        let _ = write!(fallback, "[HWD-TELEMETRY] stdout write failed: {err}: {rendered}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::forward::RecordingForwarder;
    use crate::platform::exec::ScriptedRunner;

    fn line() -> MetricLine {
        MetricLine::new("disk", "i-1").percent("utilization", 42.0)
    }

    struct BrokenPipe;

    impl Write for BrokenPipe {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn stdout_failure_falls_back_to_tagged_stderr() {
        let mut fallback = Vec::new();
        write_or_fallback(&mut BrokenPipe, &mut fallback, "disk monitor instance=i-1\n");
        let text = String::from_utf8(fallback).expect("utf8");
        assert!(text.starts_with("[HWD-TELEMETRY] stdout write failed: closed"));
        assert!(text.ends_with("disk monitor instance=i-1\n"));
    }

    #[test]
    fn stdout_success_writes_nothing_to_fallback() {
        let mut out = Vec::new();
        let mut fallback = Vec::new();
        write_or_fallback(&mut out, &mut fallback, "x\n");
        assert_eq!(out, b"x\n");
        assert!(fallback.is_empty());
    }

    #[test]
    fn forwards_with_prefix_and_newline() {
        let forwarder = Arc::new(RecordingForwarder::new());
        let sink = TelemetrySink::capturing(TelemetryFormat::Logfmt)
            .with_forwarder(forwarder.clone(), "agent: ");
        sink.emit(line());
        assert_eq!(
            forwarder.records(),
            vec!["agent: disk monitor instance=i-1 utilization=42.00%\n"]
        );
        assert_eq!(sink.captured().len(), 1);
    }

    #[test]
    fn forward_failure_is_swallowed_and_local_line_kept() {
        let forwarder = Arc::new(RecordingForwarder::failing());
        let sink = TelemetrySink::capturing(TelemetryFormat::Logfmt)
            .with_forwarder(forwarder.clone(), "agent: ");
        sink.emit(line());
        sink.emit(line());
        assert_eq!(sink.captured().len(), 2);
        assert_eq!(forwarder.records().len(), 2);
    }

    #[test]
    fn error_lines_carry_code() {
        let sink = TelemetrySink::capturing(TelemetryFormat::Logfmt);
        sink.emit_error("disk", "i-1", &HwdError::unavailable("/cgroup", "not mounted"));
        let rendered = sink.captured_logfmt();
        assert_eq!(rendered.len(), 1);
        assert!(rendered[0].starts_with("disk monitor instance=i-1 error=\"[HWD-2001]"));
        assert!(rendered[0].ends_with("code=HWD-2001"));
    }

    #[test]
    fn from_config_without_stream_does_not_forward() {
        let sink = TelemetrySink::from_config(
            &TelemetryConfig::default(),
            Arc::new(ScriptedRunner::new()),
        );
        assert!(sink.forwarding_to().is_none());
    }

    #[test]
    fn from_config_with_stream_forwards_there() {
        let config = TelemetryConfig {
            stream: Some("fleet-logs".to_string()),
            ..TelemetryConfig::default()
        };
        let sink = TelemetrySink::from_config(&config, Arc::new(ScriptedRunner::new()));
        assert_eq!(sink.forwarding_to(), Some("fleet-logs"));
    }

    #[test]
    fn sink_is_shareable_across_threads() {
        let sink = Arc::new(TelemetrySink::capturing(TelemetryFormat::Json));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let sink = Arc::clone(&sink);
                std::thread::spawn(move || {
                    for _ in 0..25 {
                        sink.emit(line());
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("thread");
        }
        assert_eq!(sink.captured().len(), 100);
    }
}
