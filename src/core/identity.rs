//! Host identity: resolved once at startup, then shared read-only by every monitor.
//!
//! The metadata endpoint is queried with a short deadline. Any failure (timeout,
//! connection refused, non-200 status, empty body) falls back to an
//! `i-`-prefixed, truncated local hostname so metric dimensions keep the same shape
//! off-cloud.

use std::fmt;
use std::time::Duration;

use reqwest::StatusCode;
use serde::Serialize;

use crate::core::config::IdentityConfig;
use crate::platform::pal::Platform;

/// Hostname substituted when the OS cannot report one.
const UNKNOWN_HOSTNAME: &str = "hosterr";

/// Where the identity came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentitySource {
    Metadata,
    Hostname,
}

/// Immutable per-process machine identifier, used only as a metric dimension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostIdentity {
    id: String,
    source: IdentitySource,
}

impl HostIdentity {
    #[must_use]
    pub fn new(id: impl Into<String>, source: IdentitySource) -> Self {
        Self {
            id: id.into(),
            source,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub const fn source(&self) -> IdentitySource {
        self.source
    }
}

impl fmt::Display for HostIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

/// Resolve the host identity: metadata endpoint first, hostname fallback second.
///
/// Never fails; diagnostics for the fallback path go to stderr.
#[must_use]
pub fn resolve_identity(config: &IdentityConfig, platform: &dyn Platform) -> HostIdentity {
    match fetch_instance_id(&config.endpoint, config.timeout()) {
        Ok(id) => HostIdentity::new(id, IdentitySource::Metadata),
        Err(details) => {
            let hostname = platform.hostname().unwrap_or_else(|err| {
                eprintln!("[HWD-IDENTITY] hostname lookup failed: {err}");
                UNKNOWN_HOSTNAME.to_string()
            });
            let id = fallback_identity(&config.fallback_prefix, &hostname, config.hostname_chars);
            eprintln!("[HWD-IDENTITY] metadata lookup failed ({details}); using {id}");
            HostIdentity::new(id, IdentitySource::Hostname)
        }
    }
}

/// `prefix` + the first `max_chars` characters of `hostname`.
#[must_use]
pub fn fallback_identity(prefix: &str, hostname: &str, max_chars: usize) -> String {
    let short: String = hostname.chars().take(max_chars).collect();
    format!("{prefix}{short}")
}

fn fetch_instance_id(endpoint: &str, timeout: Duration) -> std::result::Result<String, String> {
    let client = reqwest::blocking::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|err| format!("client build: {err}"))?;
    let response = client.get(endpoint).send().map_err(|err| err.to_string())?;
    if response.status() != StatusCode::OK {
        return Err(format!("status {}", response.status()));
    }
    let body = response.text().map_err(|err| err.to_string())?;
    let id = body.trim();
    if id.is_empty() {
        return Err("empty instance id".to_string());
    }
    Ok(id.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::pal::MockPlatform;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::thread;
    use std::time::Instant;

    fn config_for(endpoint: String, timeout_ms: u64) -> IdentityConfig {
        IdentityConfig {
            endpoint,
            timeout_ms,
            ..IdentityConfig::default()
        }
    }

    /// Serve exactly one HTTP response on an ephemeral port.
    fn serve_once(status_line: &'static str, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("addr");
        thread::spawn(move || {
            if let Ok((mut stream, _)) = listener.accept() {
                let mut buf = [0u8; 1024];
                let _ = stream.read(&mut buf);
                let response = format!(
                    "{status_line}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = stream.write_all(response.as_bytes());
            }
        });
        format!("http://{addr}/latest/meta-data/instance-id")
    }

    #[test]
    fn fallback_truncates_to_eight_chars() {
        assert_eq!(fallback_identity("i-", "ip-10-0-1-23", 8), "i-ip-10-0-");
        assert_eq!(fallback_identity("i-", "box", 8), "i-box");
        assert_eq!(fallback_identity("i-", "", 8), "i-");
    }

    #[test]
    fn fallback_counts_characters_not_bytes() {
        assert_eq!(fallback_identity("i-", "héllo-wörld", 8), "i-héllo-wö");
    }

    #[test]
    fn metadata_success_is_used_verbatim() {
        let url = serve_once("HTTP/1.1 200 OK", "i-0abc123def\n");
        let platform = MockPlatform::with_hostname("workstation-42");
        let identity = resolve_identity(&config_for(url, 2_000), &platform);
        assert_eq!(identity.as_str(), "i-0abc123def");
        assert_eq!(identity.source(), IdentitySource::Metadata);
    }

    #[test]
    fn non_200_falls_back_to_hostname() {
        let url = serve_once("HTTP/1.1 404 Not Found", "nope");
        let platform = MockPlatform::with_hostname("workstation-42");
        let identity = resolve_identity(&config_for(url, 2_000), &platform);
        assert_eq!(identity.as_str(), "i-workstat");
        assert_eq!(identity.source(), IdentitySource::Hostname);
    }

    #[test]
    fn timeout_falls_back_within_deadline() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("addr");
        thread::spawn(move || {
            // Accept and never answer.
            if let Ok((stream, _)) = listener.accept() {
                thread::sleep(Duration::from_secs(5));
                drop(stream);
            }
        });

        let platform = MockPlatform::with_hostname("buildhost-7");
        let started = Instant::now();
        let identity = resolve_identity(&config_for(format!("http://{addr}/id"), 500), &platform);
        assert_eq!(identity.as_str(), "i-buildhos");
        assert_eq!(identity.source(), IdentitySource::Hostname);
        assert!(
            started.elapsed() < Duration::from_secs(3),
            "lookup should respect the deadline, took {:?}",
            started.elapsed()
        );
    }

    #[test]
    fn unreachable_endpoint_falls_back() {
        // Bind then drop to get a port with nothing listening.
        let addr = TcpListener::bind("127.0.0.1:0")
            .expect("bind")
            .local_addr()
            .expect("addr");
        let platform = MockPlatform::with_hostname("edge");
        let identity = resolve_identity(&config_for(format!("http://{addr}/id"), 500), &platform);
        assert_eq!(identity.as_str(), "i-edge");
    }

    #[test]
    fn failing_hostname_uses_placeholder() {
        let addr = TcpListener::bind("127.0.0.1:0")
            .expect("bind")
            .local_addr()
            .expect("addr");
        let platform = MockPlatform::default();
        let identity = resolve_identity(&config_for(format!("http://{addr}/id"), 500), &platform);
        assert_eq!(identity.as_str(), "i-hosterr");
    }
}
