// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Wires one queue, producer and consumer per enabled stream and runs them all
//! until every task has finished.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::checkpoint::{default_offset, CheckpointStore};
use crate::config::Config;
use crate::consumer::Consumer;
use crate::error::{ApiError, ConfigurationError};
use crate::formatter::Formatter;
use crate::pool::BlockingPool;
use crate::producer::{LogApi, Producer};
use crate::shutdown::Coordinator;
use crate::stream::{Offset, StreamType};
use crate::writer::Writer;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error("failed to list child accounts: {0}")]
    ChildAccounts(#[source] ApiError),
}

/// Summary returned once every task of the pipeline has stopped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineReport {
    /// Streams that got a producer/consumer pair (once per stream, not per child).
    pub started: Vec<StreamType>,
    /// Endpoint identifiers that were not recognized.
    pub skipped: Vec<String>,
    pub shutdown_reason: Option<String>,
}

/// One producer/consumer pair per enabled stream and child account, sharing
/// a writer and a coordinator.
pub struct Pipeline {
    config: Arc<Config>,
    api: Arc<dyn LogApi>,
    writer: Arc<dyn Writer>,
    coordinator: Coordinator,
    /// API polls.
    pool: BlockingPool,
    checkpoint_pool: BlockingPool,
}

impl Pipeline {
    #[must_use]
    pub fn new(
        config: Arc<Config>,
        api: Arc<dyn LogApi>,
        writer: Arc<dyn Writer>,
        coordinator: Coordinator,
    ) -> Self {
        Self {
            config,
            api,
            writer,
            coordinator,
            pool: BlockingPool::default(),
            checkpoint_pool: BlockingPool::default(),
        }
    }

    fn checkpoint_store(&self) -> CheckpointStore {
        CheckpointStore::new(self.config.checkpoint_dir(), self.checkpoint_pool.clone())
    }

    /// Builds every pair first, so a configuration error leaves nothing
    /// running, then waits for all of them to terminate.
    pub async fn run(self) -> Result<PipelineReport, PipelineError> {
        let config = &self.config;
        let checkpoints = self.checkpoint_store();
        let child_accounts = self.child_accounts().await?;

        let mut report = PipelineReport::default();
        let mut producers = Vec::new();
        let mut consumers = Vec::new();

        for endpoint in config.enabled_endpoints() {
            let stream = match endpoint.parse::<StreamType>() {
                Ok(stream) => stream,
                Err(e) => {
                    warn!("DuoLogSync: {e}, skipping");
                    report.skipped.push(endpoint);
                    continue;
                }
            };

            if child_accounts.is_empty() {
                warn!("DuoLogSync: no child accounts to fetch {stream} logs for");
                continue;
            }
            for child_account_id in &child_accounts {
                let formatter = Formatter::new(
                    config.log_format(),
                    stream,
                    stream.cef_labels(),
                    config.syslog_format(),
                )?;
                let offset = self.starting_offset(&checkpoints, stream, child_account_id.as_deref());
                let (tx, rx) = mpsc::unbounded_channel();

                producers.push(
                    Producer::new(
                        stream,
                        Arc::clone(&self.api),
                        tx,
                        self.coordinator.clone(),
                        self.pool.clone(),
                        offset.clone(),
                    )
                    .with_poll_interval(config.api_timeout())
                    .with_child_account(child_account_id.clone()),
                );
                consumers.push(
                    Consumer::new(
                        stream,
                        formatter,
                        rx,
                        Arc::clone(&self.writer),
                        checkpoints.clone(),
                        self.coordinator.clone(),
                        offset,
                    )
                    .with_child_account(child_account_id.clone()),
                );
            }
            report.started.push(stream);
        }

        let signals = self.coordinator.listen_for_signals();
        let mut tasks = JoinSet::new();
        for producer in producers {
            tasks.spawn(producer.produce());
        }
        for consumer in consumers {
            tasks.spawn(consumer.consume());
        }
        info!("DuoLogSync: started {} tasks", tasks.len());

        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                error!("DuoLogSync: pipeline task failed: {e}");
                self.coordinator
                    .request_shutdown(format!("pipeline task failed: {e}"));
            }
        }

        signals.abort();
        report.shutdown_reason = self.coordinator.shutdown_reason();
        info!("DuoLogSync: all tasks finished");
        Ok(report)
    }

    /// `[None]` for a regular account, one entry per allowed child for an MSP.
    async fn child_accounts(&self) -> Result<Vec<Option<String>>, PipelineError> {
        if !self.config.account_is_msp() {
            return Ok(vec![None]);
        }

        let api = Arc::clone(&self.api);
        let children = self
            .pool
            .run(move || api.child_accounts())
            .await
            .map_err(|e| PipelineError::ChildAccounts(ApiError::Join(e.to_string())))?
            .map_err(PipelineError::ChildAccounts)?;

        Ok(children
            .into_iter()
            .filter(|child| {
                let blocked = self.config.is_blocked(child);
                if blocked {
                    info!("DuoLogSync: skipping blocked child account {child}");
                }
                !blocked
            })
            .map(Some)
            .collect())
    }

    fn starting_offset(
        &self,
        checkpoints: &CheckpointStore,
        stream: StreamType,
        child_account_id: Option<&str>,
    ) -> Offset {
        let default_timestamp = self.config.default_offset;
        if self.config.checkpointing_enabled() {
            checkpoints.recover(stream, child_account_id, default_timestamp)
        } else {
            debug!("{stream}: checkpointing disabled, starting from the configured offset");
            default_offset(stream, default_timestamp)
        }
    }
}
