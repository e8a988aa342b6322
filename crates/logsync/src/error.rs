// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Error taxonomy for the log sync pipeline.
//!
//! Configuration errors are fatal and surface to the caller before any task is
//! spawned. Transport errors end the current batch and turn into a shutdown
//! request. Recovery errors never leave the checkpoint module.

use std::io;

/// Invalid or unsupported configuration. Always fatal.
#[derive(Debug, thiserror::Error)]
pub enum ConfigurationError {
    #[error("{0} is not a supported log format")]
    UnsupportedLogFormat(String),

    #[error("{0} is not a supported syslog format")]
    UnsupportedSyslogFormat(String),

    #[error("{0} is not a supported transport protocol")]
    UnsupportedProtocol(String),

    #[error("Failed to load config: {0}")]
    Load(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Failure while writing a line to a downstream collector.
#[derive(Debug, thiserror::Error)]
pub enum WriteError {
    /// The connection was reset or closed by the peer.
    #[error("connection to server was reset: {0}")]
    ConnectionReset(io::Error),

    #[error("failed to write to server: {0}")]
    Io(io::Error),
}

impl From<io::Error> for WriteError {
    fn from(error: io::Error) -> Self {
        match error.kind() {
            io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
            | io::ErrorKind::UnexpectedEof => WriteError::ConnectionReset(error),
            _ => WriteError::Io(error),
        }
    }
}

/// Failure while encoding a single record.
#[derive(Debug, thiserror::Error)]
pub enum FormatError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error("record has no usable '{0}' field for the syslog header")]
    MissingTimestamp(&'static str),

    #[error("failed to serialize record: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Failure while persisting an offset.
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("failed to write checkpoint file: {0}")]
    Io(#[from] io::Error),

    #[error("failed to serialize offset: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("checkpoint task did not complete: {0}")]
    Join(String),
}

/// Reasons a checkpoint could not be recovered at startup.
#[derive(Debug, thiserror::Error)]
pub(crate) enum RecoveryError {
    #[error("could not read checkpoint file: {0}")]
    Unreadable(#[from] io::Error),

    #[error("checkpoint file is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// Failure reported by the upstream log API client.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Host resolution, proxy, or socket level failure.
    #[error("{0}")]
    Network(String),

    /// The API rejected the integration credentials.
    #[error("{0}")]
    Credentials(String),

    #[error("API call did not complete: {0}")]
    Join(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = ConfigurationError::UnsupportedLogFormat("xml".to_string());
        assert_eq!(error.to_string(), "xml is not a supported log format");

        let error = ConfigurationError::UnsupportedSyslogFormat("RFC1".to_string());
        assert_eq!(error.to_string(), "RFC1 is not a supported syslog format");
    }

    #[test]
    fn test_io_errors_classified_as_connection_reset() {
        for kind in [
            io::ErrorKind::BrokenPipe,
            io::ErrorKind::ConnectionReset,
            io::ErrorKind::ConnectionAborted,
            io::ErrorKind::NotConnected,
        ] {
            let error = WriteError::from(io::Error::new(kind, "gone"));
            assert!(matches!(error, WriteError::ConnectionReset(_)), "{kind:?}");
        }
    }

    #[test]
    fn test_other_io_errors_are_not_resets() {
        let error = WriteError::from(io::Error::new(io::ErrorKind::PermissionDenied, "nope"));
        assert!(matches!(error, WriteError::Io(_)));
    }
}
