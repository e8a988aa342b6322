// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Common Event Format encoding.
//!
//! ```text
//! CEF:0|Duo Security|DuoLogSync|0.1.0|authentication|Authentication Log|5|rt=1700000000000 src=10.0.0.1 duser=alice
//! ```

use serde_json::Value;

use crate::stream::{LabelMap, LogRecord, StreamType, TIMESTAMP_FIELD};

pub const CEF_VERSION: u8 = 0;
pub const DEVICE_VENDOR: &str = "Duo Security";
pub const DEVICE_PRODUCT: &str = "DuoLogSync";
pub const DEVICE_VERSION: &str = env!("CARGO_PKG_VERSION");
pub const DEFAULT_SEVERITY: u8 = 5;

/// Encodes records of one stream type using a fixed label table.
#[derive(Debug, Clone)]
pub struct CefEncoder {
    signature_id: &'static str,
    name: &'static str,
    labels: LabelMap,
}

impl CefEncoder {
    #[must_use]
    pub fn new(stream: StreamType, labels: LabelMap) -> Self {
        let (signature_id, name) = stream.cef_event();
        Self {
            signature_id,
            name,
            labels,
        }
    }

    #[must_use]
    pub fn encode(&self, record: &LogRecord) -> String {
        let mut line = format!(
            "CEF:{CEF_VERSION}|{}|{}|{}|{}|{}|{DEFAULT_SEVERITY}|",
            escape_header(DEVICE_VENDOR),
            escape_header(DEVICE_PRODUCT),
            escape_header(DEVICE_VERSION),
            escape_header(self.signature_id),
            escape_header(self.name),
        );

        let mut extensions = Vec::with_capacity(self.labels.len() + 1);
        if let Some(millis) = record.get(TIMESTAMP_FIELD).and_then(timestamp_millis) {
            extensions.push(format!("rt={millis}"));
        }
        for (field, label) in &self.labels {
            let Some(value) = lookup(record, field).and_then(render) else {
                continue;
            };
            extensions.push(format!("{label}={}", escape_extension(&value)));
        }
        line.push_str(&extensions.join(" "));
        line
    }
}

/// Follows a dotted path through nested objects.
fn lookup<'a>(record: &'a LogRecord, path: &str) -> Option<&'a Value> {
    let mut parts = path.split('.');
    let mut current = record.get(parts.next()?)?;
    for part in parts {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

fn render(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(_) | Value::Number(_) => Some(value.to_string()),
        Value::Array(_) | Value::Object(_) => serde_json::to_string(value).ok(),
    }
}

fn timestamp_millis(value: &Value) -> Option<i64> {
    if let Some(seconds) = value.as_i64() {
        return seconds.checked_mul(1000);
    }
    #[allow(clippy::cast_possible_truncation)]
    value.as_f64().map(|seconds| (seconds * 1000.0).round() as i64)
}

fn escape_header(value: &str) -> String {
    value.replace('\\', "\\\\").replace('|', "\\|")
}

fn escape_extension(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('=', "\\=")
        .replace("\r\n", "\\n")
        .replace('\n', "\\n")
        .replace('\r', "\\r")
}
