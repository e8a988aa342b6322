// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Tracing setup for the log sync process.
//!
//! Every line is prefixed so the process's own logs are easy to tell apart
//! from the security events it forwards:
//!
//! ```text
//! DUO_LOG_SYNC | INFO | auth consumer: successfully wrote all logs
//! DUO_LOG_SYNC | WARN | DuoLogSync: shutting down due to [telephony consumer: [...]]
//! ```

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;
use std::sync::Mutex;

use tracing_core::{Event, Subscriber};
use tracing_subscriber::fmt::{
    format::{self, FormatEvent, FormatFields},
    writer::BoxMakeWriter,
    FmtContext, FormattedFields,
};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

pub const LOG_PREFIX: &str = "DUO_LOG_SYNC";

/// Dependencies that are too chatty at debug level.
const QUIET_TARGETS: &str = "figment=off,mio=off";

/// Renders `DUO_LOG_SYNC | LEVEL | span{fields}: message fields`.
#[derive(Debug, Clone, Copy)]
pub struct Formatter;

impl<S, N> FormatEvent<S, N> for Formatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: format::Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let metadata = event.metadata();
        write!(&mut writer, "{LOG_PREFIX} | {} | ", metadata.level())?;

        if let Some(scope) = ctx.event_scope() {
            for span in scope.from_root() {
                write!(writer, "{}", span.name())?;

                let ext = span.extensions();
                if let Some(fields) = ext.get::<FormattedFields<N>>() {
                    if !fields.is_empty() {
                        write!(writer, "{{{fields}}}")?;
                    }
                }
                write!(writer, ": ")?;
            }
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LoggerError {
    #[error("invalid log level {level}: {reason}")]
    InvalidLevel { level: String, reason: String },

    #[error("a global tracing subscriber is already installed")]
    AlreadyInitialized,
}

/// Builds the filter for `level`, with noisy dependencies silenced.
pub fn env_filter(level: &str) -> Result<EnvFilter, LoggerError> {
    EnvFilter::try_new(format!("{QUIET_TARGETS},{level}")).map_err(|e| {
        LoggerError::InvalidLevel {
            level: level.to_string(),
            reason: e.to_string(),
        }
    })
}

/// Where log lines end up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogDestination {
    File,
    Stderr,
}

fn open_log_file(log_filepath: &Path) -> io::Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_filepath)
}

fn log_writer(log_filepath: &Path) -> (BoxMakeWriter, LogDestination) {
    match open_log_file(log_filepath) {
        Ok(file) => (BoxMakeWriter::new(Mutex::new(file)), LogDestination::File),
        Err(e) => {
            eprintln!(
                "{LOG_PREFIX} | WARN | could not open {} ({e}), logging to stderr",
                log_filepath.display()
            );
            (BoxMakeWriter::new(io::stderr), LogDestination::Stderr)
        }
    }
}

/// Builds the subscriber without installing it. Lines are appended to
/// `log_filepath`; if it cannot be opened they go to stderr instead.
pub fn subscriber(
    level: &str,
    log_filepath: &Path,
) -> Result<(impl Subscriber + Send + Sync + 'static, LogDestination), LoggerError> {
    let filter = env_filter(level)?;
    let (writer, destination) = log_writer(log_filepath);
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(false)
        .event_format(Formatter)
        .with_writer(writer)
        .finish();
    Ok((subscriber, destination))
}

/// Installs the global subscriber built by [`subscriber`].
pub fn init(level: &str, log_filepath: &Path) -> Result<LogDestination, LoggerError> {
    let (subscriber, destination) = subscriber(level, log_filepath)?;
    subscriber
        .try_init()
        .map_err(|_| LoggerError::AlreadyInitialized)?;
    Ok(destination)
}
