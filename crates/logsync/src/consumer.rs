// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Drains one stream's queue into the shared writer and checkpoints progress.
//!
//! ```text
//!   WAIT ──batch──> PROCESS ──> WAIT
//!     │                           │
//!     └──── shutdown requested ───┴──> TERMINATED
//! ```
//!
//! After every non-empty batch the offset of the last record that reached the
//! collector is persisted, even when the batch was cut short by a transport
//! failure. Records after the failure are fetched again on restart, so delivery
//! is at-least-once.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, error, info, warn};

use crate::checkpoint::CheckpointStore;
use crate::error::WriteError;
use crate::formatter::Formatter;
use crate::producer::extract_offset;
use crate::shutdown::Coordinator;
use crate::stream::{LogBatch, Offset, StreamType, CHILD_ACCOUNT_FIELD};
use crate::writer::Writer;

/// What happened to the records of one batch.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchOutcome {
    pub written: usize,
    /// Records dropped because they could not be encoded.
    pub skipped: usize,
    /// A write failed and the rest of the batch was abandoned.
    pub interrupted: bool,
}

/// Drains one stream's queue, writes each record and checkpoints after every batch.
pub struct Consumer {
    stream: StreamType,
    formatter: Formatter,
    queue: UnboundedReceiver<LogBatch>,
    writer: Arc<dyn Writer>,
    checkpoints: CheckpointStore,
    coordinator: Coordinator,
    log_offset: Offset,
    child_account_id: Option<String>,
}

impl Consumer {
    #[must_use]
    pub fn new(
        stream: StreamType,
        formatter: Formatter,
        queue: UnboundedReceiver<LogBatch>,
        writer: Arc<dyn Writer>,
        checkpoints: CheckpointStore,
        coordinator: Coordinator,
        log_offset: Offset,
    ) -> Self {
        Self {
            stream,
            formatter,
            queue,
            writer,
            checkpoints,
            coordinator,
            log_offset,
            child_account_id: None,
        }
    }

    #[must_use]
    pub fn with_child_account(mut self, child_account_id: Option<String>) -> Self {
        self.child_account_id = child_account_id;
        self
    }

    #[must_use]
    pub fn log_offset(&self) -> &Offset {
        &self.log_offset
    }

    pub async fn consume(mut self) {
        let stream = self.stream;
        while self.coordinator.is_running() {
            info!("{stream} consumer: waiting for logs");
            let Some(batch) = self.queue.recv().await else {
                debug!("{stream} consumer: queue closed");
                break;
            };

            // The wake-up may be the producer's shutdown sentinel.
            if !self.coordinator.is_running() {
                if !batch.is_empty() {
                    debug!(
                        "{stream} consumer: discarding {} logs received during shutdown",
                        batch.len()
                    );
                }
                continue;
            }

            if batch.is_empty() {
                info!("{stream} consumer: No logs to write");
                continue;
            }

            self.process_batch(batch).await;
        }

        info!("{stream} consumer: shutting down");
    }

    /// Encodes and writes every record of a non-empty batch in order, then
    /// checkpoints the offset of the last record handled.
    pub async fn process_batch(&mut self, batch: LogBatch) -> BatchOutcome {
        let stream = self.stream;
        let mut outcome = BatchOutcome::default();
        if batch.is_empty() {
            return outcome;
        }

        info!("{stream} consumer: writing {} logs", batch.len());
        let mut offset = self.log_offset.clone();
        for mut record in batch {
            if let Some(child_account_id) = &self.child_account_id {
                record.insert(
                    CHILD_ACCOUNT_FIELD.to_string(),
                    Value::String(child_account_id.clone()),
                );
            }

            let line = match self.formatter.encode(&record) {
                Ok(line) => line,
                Err(e) => {
                    warn!("{stream} consumer: skipping log that could not be formatted: {e}");
                    outcome.skipped += 1;
                    offset = extract_offset(Some(&record), &offset);
                    continue;
                }
            };

            match self.writer.write(&line).await {
                Ok(()) => {
                    outcome.written += 1;
                    offset = extract_offset(Some(&record), &offset);
                }
                Err(e) => {
                    outcome.interrupted = true;
                    self.coordinator
                        .request_shutdown(format!("{stream} consumer: [{e}]"));
                    if matches!(e, WriteError::ConnectionReset(_)) {
                        warn!("DuoLogSync: connection to server was reset");
                    }
                    break;
                }
            }
        }

        if outcome.interrupted {
            warn!("{stream} consumer: failed to write some logs");
        } else {
            info!("{stream} consumer: successfully wrote all logs");
        }

        self.log_offset = offset;
        if let Err(e) = self
            .checkpoints
            .write(stream, &self.log_offset, self.child_account_id.as_deref())
            .await
        {
            error!("{stream} consumer: could not save checkpoint {}: {e}", self.log_offset);
        }

        outcome
    }
}
