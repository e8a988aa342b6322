// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Log stream categories and the record types that flow through a pipeline.

use std::fmt;
use std::str::FromStr;

use serde_json::{Map, Value};

/// One security event, as returned by the upstream API. Field order is preserved.
pub type LogRecord = Map<String, Value>;

/// Records enqueued by a producer. An empty batch only wakes the consumer.
pub type LogBatch = Vec<LogRecord>;

/// Opaque position in a stream, persisted as JSON.
pub type Offset = Value;

/// Field a consumer stamps on every record of a child account stream.
pub const CHILD_ACCOUNT_FIELD: &str = "child_account_id";

/// Field holding the record's Unix timestamp in seconds.
pub const TIMESTAMP_FIELD: &str = "timestamp";

const MILLISECONDS_PER_SECOND: i64 = 1000;

/// Category of security log with its own producer, consumer and queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamType {
    Auth,
    Telephony,
    AdminAction,
}

impl StreamType {
    pub const ALL: [StreamType; 3] = [
        StreamType::Auth,
        StreamType::Telephony,
        StreamType::AdminAction,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            StreamType::Auth => "auth",
            StreamType::Telephony => "telephony",
            StreamType::AdminAction => "adminaction",
        }
    }

    /// Multiplier applied to a timestamp in seconds to get this stream's offset unit.
    /// Authentication logs are paged by millisecond.
    #[must_use]
    pub fn offset_scale(self) -> i64 {
        match self {
            StreamType::Auth => MILLISECONDS_PER_SECOND,
            StreamType::Telephony | StreamType::AdminAction => 1,
        }
    }

    /// CEF signature id and event name.
    #[must_use]
    pub fn cef_event(self) -> (&'static str, &'static str) {
        match self {
            StreamType::Auth => ("authentication", "Authentication Log"),
            StreamType::Telephony => ("telephony", "Telephony Log"),
            StreamType::AdminAction => ("adminaction", "Administrator Action Log"),
        }
    }

    /// Default mapping from dotted record field paths to CEF extension keys.
    #[must_use]
    pub fn cef_labels(self) -> LabelMap {
        let labels: &[(&str, &str)] = match self {
            StreamType::Auth => &[
                ("access_device.ip", "src"),
                ("access_device.hostname", "shost"),
                ("auth_device.ip", "dst"),
                ("auth_device.name", "dhost"),
                ("user.name", "duser"),
                ("application.name", "dproc"),
                ("event_type", "cat"),
                ("factor", "cs1"),
                ("result", "outcome"),
                ("reason", "reason"),
                ("txid", "externalId"),
                (CHILD_ACCOUNT_FIELD, "cs2"),
            ],
            StreamType::Telephony => &[
                ("type", "cat"),
                ("context", "cs1"),
                ("phone", "dst"),
                ("credits", "cn1"),
                (CHILD_ACCOUNT_FIELD, "cs2"),
            ],
            StreamType::AdminAction => &[
                ("username", "suser"),
                ("action", "act"),
                ("object", "duid"),
                ("description", "msg"),
                ("host", "dhost"),
                (CHILD_ACCOUNT_FIELD, "cs2"),
            ],
        };
        labels
            .iter()
            .map(|(field, label)| ((*field).to_string(), (*label).to_string()))
            .collect()
    }
}

impl fmt::Display for StreamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Endpoint identifier that does not name a known stream.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0} is not a recognized endpoint")]
pub struct UnknownStream(pub String);

impl FromStr for StreamType {
    type Err = UnknownStream;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StreamType::ALL
            .into_iter()
            .find(|stream| stream.as_str() == s)
            .ok_or_else(|| UnknownStream(s.to_string()))
    }
}

/// Ordered mapping from dotted field path to CEF key.
pub type LabelMap = Vec<(String, String)>;
