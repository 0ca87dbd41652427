//! Structured metric/event lines rendered as logfmt or one JSON object per line.
//!
//! A line is `<monitor> monitor instance=<id>` followed by ordered fields.
//! logfmt values containing whitespace, quotes, `=` or nothing at all are
//! quoted with Rust string escaping.

#![allow(missing_docs)]

use std::fmt::Write as _;

use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};

use crate::core::config::TelemetryFormat;

/// One field value with its logfmt rendering rules.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Str(String),
    /// Fixed-precision float with a unit suffix (`80.00%`, `12.5000G`).
    Float {
        value: f64,
        precision: usize,
        suffix: &'static str,
    },
    Uint(u64),
    Bool(bool),
}

/// A single telemetry record.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricLine {
    monitor: String,
    instance: String,
    fields: Vec<(String, FieldValue)>,
}

impl MetricLine {
    #[must_use]
    pub fn new(monitor: impl Into<String>, instance: impl Into<String>) -> Self {
        Self {
            monitor: monitor.into(),
            instance: instance.into(),
            fields: Vec::new(),
        }
    }

    #[must_use]
    pub fn str(mut self, key: &str, value: impl Into<String>) -> Self {
        self.fields
            .push((key.to_string(), FieldValue::Str(value.into())));
        self
    }

    /// Percentage with two decimals, rendered `80.00%`.
    #[must_use]
    pub fn percent(self, key: &str, value: f64) -> Self {
        self.float(key, value, 2, "%")
    }

    /// Gigabytes with four decimals, rendered `12.3456G`.
    #[must_use]
    pub fn gigabytes(self, key: &str, value: f64) -> Self {
        self.float(key, value, 4, "G")
    }

    #[must_use]
    pub fn float(mut self, key: &str, value: f64, precision: usize, suffix: &'static str) -> Self {
        self.fields.push((
            key.to_string(),
            FieldValue::Float {
                value,
                precision,
                suffix,
            },
        ));
        self
    }

    #[must_use]
    pub fn uint(mut self, key: &str, value: u64) -> Self {
        self.fields.push((key.to_string(), FieldValue::Uint(value)));
        self
    }

    #[must_use]
    pub fn flag(mut self, key: &str, value: bool) -> Self {
        self.fields.push((key.to_string(), FieldValue::Bool(value)));
        self
    }

    #[must_use]
    pub fn monitor(&self) -> &str {
        &self.monitor
    }

    #[must_use]
    pub fn instance(&self) -> &str {
        &self.instance
    }

    #[must_use]
    pub fn fields(&self) -> &[(String, FieldValue)] {
        &self.fields
    }

    /// Look up the first field named `key`.
    #[must_use]
    pub fn field(&self, key: &str) -> Option<&FieldValue> {
        self.fields
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value)
    }

    #[must_use]
    pub fn render(&self, format: TelemetryFormat) -> String {
        match format {
            TelemetryFormat::Logfmt => self.to_logfmt(),
            TelemetryFormat::Json => self.to_json(),
        }
    }

    #[must_use]
    pub fn to_logfmt(&self) -> String {
        let mut out = format!("{} monitor instance={}", self.monitor, quote(&self.instance));
        for (key, value) in &self.fields {
            let _ = write!(out, " {key}=");
            match value {
                FieldValue::Str(text) => out.push_str(&quote(text)),
                FieldValue::Float {
                    value,
                    precision,
                    suffix,
                } => {
                    let _ = write!(out, "{value:.precision$}{suffix}");
                }
                FieldValue::Uint(value) => {
                    let _ = write!(out, "{value}");
                }
                FieldValue::Bool(value) => {
                    let _ = write!(out, "{value}");
                }
            }
        }
        out
    }

    /// JSON object with `ts`, `monitor`, `instance`, then the fields in order.
    ///
    /// Floats keep full precision here; the unit suffix is dropped. Non-finite
    /// floats become `null`.
    #[must_use]
    pub fn to_json(&self) -> String {
        let mut object = Map::new();
        object.insert(
            "ts".to_string(),
            Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)),
        );
        object.insert("monitor".to_string(), Value::String(self.monitor.clone()));
        object.insert("instance".to_string(), Value::String(self.instance.clone()));
        for (key, value) in &self.fields {
            let json = match value {
                FieldValue::Str(text) => Value::String(text.clone()),
                FieldValue::Float { value, .. } => serde_json::Number::from_f64(*value)
                    .map_or(Value::Null, Value::Number),
                FieldValue::Uint(value) => Value::from(*value),
                FieldValue::Bool(value) => Value::Bool(*value),
            };
            object.insert(key.clone(), json);
        }
        Value::Object(object).to_string()
    }
}

fn quote(raw: &str) -> String {
    let needs_quotes = raw.is_empty()
        || raw
            .chars()
            .any(|c| c.is_whitespace() || c == '"' || c == '=' || c.is_control());
    if needs_quotes {
        format!("{raw:?}")
    } else {
        raw.to_string()
    }
}
