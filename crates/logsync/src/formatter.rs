// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Encodes records into newline-terminated wire lines.
//!
//! The wire format is resolved once when the consumer is built; an unsupported
//! format never reaches the writer or the checkpoint store.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::cef::CefEncoder;
use crate::error::{ConfigurationError, FormatError};
use crate::stream::{LabelMap, LogRecord, StreamType, TIMESTAMP_FIELD};
use crate::syslog::{self, SyslogFormat, DEFAULT_PRIORITY};

/// Wire format identifiers accepted in configuration.
pub const SUPPORTED_FORMATS: [&str; 2] = ["CEF", "JSON"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireFormat {
    Cef,
    Json,
}

impl FromStr for WireFormat {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CEF" => Ok(WireFormat::Cef),
            "JSON" => Ok(WireFormat::Json),
            _ => Err(ConfigurationError::UnsupportedLogFormat(s.to_string())),
        }
    }
}

impl fmt::Display for WireFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WireFormat::Cef => f.write_str("CEF"),
            WireFormat::Json => f.write_str("JSON"),
        }
    }
}

#[derive(Debug, Clone)]
pub enum Formatter {
    Cef(CefEncoder),
    /// Compact JSON, optionally prefixed with a syslog header.
    Json { syslog: Option<SyslogFormat> },
}

impl Formatter {
    /// Resolves `format` into an encoder. `labels` is only used for CEF and is
    /// captured as an immutable snapshot.
    pub fn new(
        format: &str,
        stream: StreamType,
        labels: LabelMap,
        syslog: Option<SyslogFormat>,
    ) -> Result<Self, ConfigurationError> {
        Ok(match format.parse::<WireFormat>()? {
            WireFormat::Cef => Formatter::Cef(CefEncoder::new(stream, labels)),
            WireFormat::Json => Formatter::Json { syslog },
        })
    }

    #[must_use]
    pub fn wire_format(&self) -> WireFormat {
        match self {
            Formatter::Cef(_) => WireFormat::Cef,
            Formatter::Json { .. } => WireFormat::Json,
        }
    }

    pub fn encode(&self, record: &LogRecord) -> Result<Vec<u8>, FormatError> {
        let mut line = match self {
            Formatter::Cef(encoder) => encoder.encode(record),
            Formatter::Json { syslog } => {
                let payload = serde_json::to_string(record)?;
                match syslog {
                    Some(format) => {
                        let timestamp = record_timestamp(record)?;
                        let header = syslog::header(*format, timestamp, DEFAULT_PRIORITY);
                        format!("{header} {payload}")
                    }
                    None => payload,
                }
            }
        };
        line.push('\n');
        Ok(line.into_bytes())
    }
}

/// Reads the record's Unix timestamp (seconds, integer or fractional) as UTC.
fn record_timestamp(record: &LogRecord) -> Result<DateTime<Utc>, FormatError> {
    let missing = FormatError::MissingTimestamp(TIMESTAMP_FIELD);
    match record.get(TIMESTAMP_FIELD) {
        Some(Value::Number(number)) => {
            let datetime = if let Some(seconds) = number.as_i64() {
                DateTime::from_timestamp(seconds, 0)
            } else {
                number.as_f64().and_then(|seconds| {
                    let whole = seconds.floor();
                    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                    let nanos = ((seconds - whole) * 1e9).round().min(999_999_999.0) as u32;
                    #[allow(clippy::cast_possible_truncation)]
                    DateTime::from_timestamp(whole as i64, nanos)
                })
            };
            datetime.ok_or(missing)
        }
        _ => Err(missing),
    }
}
