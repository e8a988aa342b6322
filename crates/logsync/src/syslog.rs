// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Syslog header construction for RFC 5424 and RFC 3164.
//!
//! ```text
//! RFC5424: <PRI>VERSION TIMESTAMP HOSTNAME     <38>1 2024-01-02T03:04:05.678+00:00 host
//! RFC3164: <PRI>TIMESTAMP HOSTNAME             <38>Jan 02 03:04:05 host
//! ```

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::error::ConfigurationError;
use crate::hostname::cached_hostname;

/// facility=4 (auth) and severity=6 (informational): 4 * 8 + 6
pub const DEFAULT_PRIORITY: u8 = 38;
pub const SYSLOG_VERSION: u8 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(try_from = "String")]
pub enum SyslogFormat {
    #[default]
    Rfc5424,
    Rfc3164,
}

impl FromStr for SyslogFormat {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "RFC5424" => Ok(SyslogFormat::Rfc5424),
            "RFC3164" => Ok(SyslogFormat::Rfc3164),
            _ => Err(ConfigurationError::UnsupportedSyslogFormat(s.to_string())),
        }
    }
}

impl TryFrom<String> for SyslogFormat {
    type Error = ConfigurationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl fmt::Display for SyslogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyslogFormat::Rfc5424 => f.write_str("RFC5424"),
            SyslogFormat::Rfc3164 => f.write_str("RFC3164"),
        }
    }
}

/// Builds a header for the local machine.
#[must_use]
pub fn header(format: SyslogFormat, timestamp: DateTime<Utc>, priority: u8) -> String {
    header_for_host(format, timestamp, priority, cached_hostname())
}

/// Parses `format` before building the header, for callers holding a raw config value.
pub fn header_from_str(
    format: &str,
    timestamp: DateTime<Utc>,
    priority: u8,
) -> Result<String, ConfigurationError> {
    Ok(header(format.parse()?, timestamp, priority))
}

#[must_use]
pub fn header_for_host(
    format: SyslogFormat,
    timestamp: DateTime<Utc>,
    priority: u8,
    hostname: &str,
) -> String {
    match format {
        SyslogFormat::Rfc5424 => format!(
            "<{priority}>{SYSLOG_VERSION} {} {hostname}",
            timestamp.format("%Y-%m-%dT%H:%M:%S%.3f%:z")
        ),
        SyslogFormat::Rfc3164 => format!(
            "<{priority}>{} {hostname}",
            timestamp.format("%b %d %H:%M:%S")
        ),
    }
}
