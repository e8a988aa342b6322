// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Polls the upstream log API and feeds batches to a consumer.
//!
//! The API client itself is supplied through [`LogApi`]. Its calls block, so
//! they run on the [`BlockingPool`] rather than on the async workers.

use std::sync::Arc;
use std::time::Duration;

use chrono::DateTime;
use serde_json::{json, Value};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{error, info, warn};

use crate::config::API_TIMEOUT_DEFAULT;
use crate::error::ApiError;
use crate::pool::BlockingPool;
use crate::shutdown::Coordinator;
use crate::stream::{LogBatch, LogRecord, Offset, StreamType, TIMESTAMP_FIELD};

/// Raw API response: an array of records, or the auth v2 object
/// `{"authlogs": [...], "metadata": {"next_offset": ...}}`.
pub type ApiResult = Value;

/// Client for the upstream log API. Calls may block for a long time.
pub trait LogApi: Send + Sync + 'static {
    fn fetch(
        &self,
        stream: StreamType,
        offset: &Offset,
        child_account_id: Option<&str>,
    ) -> Result<ApiResult, ApiError>;

    /// Child account ids managed by an MSP parent account.
    fn child_accounts(&self) -> Result<Vec<String>, ApiError> {
        Ok(Vec::new())
    }
}

/// Polls the API for one stream (and child account) and queues each batch.
pub struct Producer {
    stream: StreamType,
    api: Arc<dyn LogApi>,
    queue: UnboundedSender<LogBatch>,
    coordinator: Coordinator,
    pool: BlockingPool,
    poll_interval: Duration,
    log_offset: Offset,
    child_account_id: Option<String>,
}

impl Producer {
    #[must_use]
    pub fn new(
        stream: StreamType,
        api: Arc<dyn LogApi>,
        queue: UnboundedSender<LogBatch>,
        coordinator: Coordinator,
        pool: BlockingPool,
        log_offset: Offset,
    ) -> Self {
        Self {
            stream,
            api,
            queue,
            coordinator,
            pool,
            poll_interval: Duration::from_secs(API_TIMEOUT_DEFAULT),
            log_offset,
            child_account_id: None,
        }
    }

    #[must_use]
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
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

    /// Sleeps, fetches and enqueues until shutdown. Always finishes by pushing
    /// an empty batch so a waiting consumer wakes up, then drops the queue.
    pub async fn produce(mut self) {
        let stream = self.stream;
        while self.coordinator.is_running() {
            info!(
                "{stream} producer: fetching next logs after {} seconds",
                self.poll_interval.as_secs()
            );
            if self
                .coordinator
                .restless_sleep(self.poll_interval)
                .await
                .is_err()
            {
                break;
            }

            info!("{stream} producer: fetching logs");
            match self.call_log_api().await {
                Ok(result) => self.add_logs_to_queue(&result),
                Err(e) => {
                    match &e {
                        ApiError::Credentials(_) => error!(
                            "DuoLogSync: check that the duoclient ikey and skey in the config file are correct"
                        ),
                        ApiError::Network(_) | ApiError::Join(_) => error!(
                            "DuoLogSync: check that the duoclient host and/or proxy_server provided in the config file is correct"
                        ),
                    }
                    self.coordinator
                        .request_shutdown(format!("{stream} producer: [{e}]"));
                }
            }
        }

        if self.queue.send(Vec::new()).is_err() {
            warn!("{stream} producer: consumer already stopped");
        }
        info!("{stream} producer: shutting down");
    }

    async fn call_log_api(&self) -> Result<ApiResult, ApiError> {
        let api = Arc::clone(&self.api);
        let stream = self.stream;
        let offset = self.log_offset.clone();
        let child_account_id = self.child_account_id.clone();
        self.pool
            .run(move || api.fetch(stream, &offset, child_account_id.as_deref()))
            .await
            .map_err(|e| ApiError::Join(e.to_string()))?
    }

    fn add_logs_to_queue(&mut self, result: &ApiResult) {
        let stream = self.stream;
        let logs = get_logs(result);
        if logs.is_empty() {
            info!("{stream} producer: no new logs available");
            return;
        }
        self.log_offset = batch_offset(result, &self.log_offset);

        let count = logs.len();
        info!("{stream} producer: adding {count} logs to the queue");
        if self.queue.send(logs).is_err() {
            warn!("{stream} producer: consumer is gone, dropping {count} logs");
            return;
        }
        info!("{stream} producer: added {count} logs to the queue");
    }
}

/// Records carried by an API response.
#[must_use]
pub fn get_logs(result: &ApiResult) -> LogBatch {
    let items = match result {
        Value::Array(items) => items.as_slice(),
        Value::Object(map) => match map.get("authlogs") {
            Some(Value::Array(items)) => items.as_slice(),
            _ => &[],
        },
        _ => &[],
    };
    items
        .iter()
        .filter_map(|item| match item {
            Value::Object(record) => Some(record.clone()),
            other => {
                warn!("Ignoring log entry that is not an object: {other}");
                None
            }
        })
        .collect()
}

/// Offset to resume from after a whole API response has been handed off.
#[must_use]
pub fn batch_offset(result: &ApiResult, current: &Offset) -> Offset {
    match result {
        Value::Object(map) => extract_offset(Some(map), current),
        Value::Array(items) => items
            .last()
            .and_then(Value::as_object)
            .and_then(timestamp_offset)
            .unwrap_or_else(|| current.clone()),
        _ => current.clone(),
    }
}

/// Offset to resume from after `record` was written; `current` when there is
/// no record or nothing in it identifies a position.
///
/// - auth v2 response: `metadata.next_offset`
/// - record with `isotimestamp` and `txid`: `["<epoch millis>", "<txid>"]`
/// - record with a numeric `timestamp`: `timestamp + 1`
#[must_use]
pub fn extract_offset(record: Option<&LogRecord>, current: &Offset) -> Offset {
    let Some(record) = record else {
        return current.clone();
    };

    let has_authlogs = record
        .get("authlogs")
        .and_then(Value::as_array)
        .is_some_and(|logs| !logs.is_empty());
    if has_authlogs {
        if let Some(next_offset) = record
            .get("metadata")
            .and_then(|metadata| metadata.get("next_offset"))
            .filter(|next_offset| !next_offset.is_null())
        {
            return next_offset.clone();
        }
    }

    if let (Some(isotimestamp), Some(txid)) = (
        record.get("isotimestamp").and_then(Value::as_str),
        record.get("txid"),
    ) {
        if let Ok(parsed) = DateTime::parse_from_rfc3339(isotimestamp) {
            let txid = match txid {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            return json!([parsed.timestamp_millis().to_string(), txid]);
        }
    }

    timestamp_offset(record).unwrap_or_else(|| current.clone())
}

fn timestamp_offset(record: &LogRecord) -> Option<Offset> {
    let timestamp = record.get(TIMESTAMP_FIELD)?;
    if let Some(seconds) = timestamp.as_i64() {
        return seconds.checked_add(1).map(Value::from);
    }
    timestamp.as_f64().map(|seconds| json!(seconds + 1.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tokio::sync::mpsc;

    fn record(value: Value) -> LogRecord {
        value.as_object().unwrap().clone()
    }

    struct ScriptedApi {
        responses: Mutex<Vec<Result<ApiResult, ApiError>>>,
        offsets: Mutex<Vec<Offset>>,
    }

    impl ScriptedApi {
        fn new(responses: Vec<Result<ApiResult, ApiError>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses),
                offsets: Mutex::new(Vec::new()),
            })
        }
    }

    impl LogApi for ScriptedApi {
        fn fetch(
            &self,
            _stream: StreamType,
            offset: &Offset,
            _child_account_id: Option<&str>,
        ) -> Result<ApiResult, ApiError> {
            self.offsets.lock().unwrap().push(offset.clone());
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                Ok(json!([]))
            } else {
                responses.remove(0)
            }
        }
    }

    #[test]
    fn test_extract_offset_from_timestamp() {
        let offset = extract_offset(Some(&record(json!({"timestamp": 1000}))), &json!(1));
        assert_eq!(offset, json!(1001));
    }

    #[test]
    fn test_extract_offset_from_isotimestamp_and_txid() {
        let offset = extract_offset(
            Some(&record(json!({
                "timestamp": 1_704_164_645,
                "isotimestamp": "2024-01-02T03:04:05.678901+00:00",
                "txid": "5b5f1c3e"
            }))),
            &json!(0),
        );
        assert_eq!(offset, json!(["1704164645678", "5b5f1c3e"]));
    }

    #[test]
    fn test_extract_offset_from_auth_v2_response() {
        let response = record(json!({
            "authlogs": [{"txid": "a"}],
            "metadata": {"next_offset": ["1704164645678", "a"]}
        }));
        assert_eq!(
            extract_offset(Some(&response), &json!(0)),
            json!(["1704164645678", "a"])
        );
    }

    #[test]
    fn test_extract_offset_without_record_keeps_current() {
        assert_eq!(extract_offset(None, &json!(42)), json!(42));
        assert_eq!(
            extract_offset(Some(&record(json!({"user": "x"}))), &json!(42)),
            json!(42)
        );
    }

    #[test]
    fn test_extract_offset_out_of_range_timestamp_keeps_current() {
        assert_eq!(
            extract_offset(Some(&record(json!({"timestamp": i64::MAX}))), &json!(42)),
            json!(42)
        );
        assert_eq!(
            extract_offset(Some(&record(json!({"timestamp": i64::MAX - 1}))), &json!(42)),
            json!(i64::MAX)
        );
    }

    #[test]
    fn test_batch_offset_uses_last_record() {
        let result = json!([{"timestamp": 10}, {"timestamp": 20}]);
        assert_eq!(batch_offset(&result, &json!(0)), json!(21));
        assert_eq!(batch_offset(&json!([]), &json!(5)), json!(5));
    }

    #[test]
    fn test_get_logs_unwraps_authlogs() {
        let result = json!({
            "authlogs": [{"txid": "a"}, {"txid": "b"}],
            "metadata": {"next_offset": null}
        });
        let logs = get_logs(&result);
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[1]["txid"], json!("b"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_produce_enqueues_batches_and_advances_offset() {
        let api = ScriptedApi::new(vec![Ok(json!([{"timestamp": 100}, {"timestamp": 200}]))]);
        let coordinator = Coordinator::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let producer = Producer::new(
            StreamType::Telephony,
            api.clone(),
            tx,
            coordinator.clone(),
            BlockingPool::default(),
            json!(50),
        )
        .with_poll_interval(Duration::from_secs(120));
        let handle = tokio::spawn(producer.produce());

        let batch = rx.recv().await.unwrap();
        assert_eq!(batch.len(), 2);

        // Second poll returns nothing; the producer keeps polling from the new offset.
        tokio::time::sleep(Duration::from_secs(121)).await;
        coordinator.request_shutdown("test");
        handle.await.unwrap();

        let offsets = api.offsets.lock().unwrap().clone();
        assert_eq!(offsets[0], json!(50));
        assert_eq!(offsets[1], json!(201));

        // Sentinel, then the queue closes.
        assert_eq!(rx.recv().await, Some(Vec::new()));
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_api_error_requests_shutdown() {
        let api = ScriptedApi::new(vec![Err(ApiError::Credentials(
            "Received 401 Invalid signature".to_string(),
        ))]);
        let coordinator = Coordinator::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let producer = Producer::new(
            StreamType::AdminAction,
            api,
            tx,
            coordinator.clone(),
            BlockingPool::default(),
            json!(0),
        );

        producer.produce().await;

        assert!(!coordinator.is_running());
        assert_eq!(
            coordinator.shutdown_reason().as_deref(),
            Some("adminaction producer: [Received 401 Invalid signature]")
        );
        assert_eq!(rx.recv().await, Some(Vec::new()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_during_sleep_sends_sentinel() {
        let api = ScriptedApi::new(vec![]);
        let coordinator = Coordinator::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let producer = Producer::new(
            StreamType::Auth,
            api.clone(),
            tx,
            coordinator.clone(),
            BlockingPool::default(),
            json!(0),
        );
        let handle = tokio::spawn(producer.produce());

        tokio::time::sleep(Duration::from_secs(1)).await;
        coordinator.request_shutdown("test");
        handle.await.unwrap();

        assert!(api.offsets.lock().unwrap().is_empty());
        assert_eq!(rx.recv().await, Some(Vec::new()));
    }
}
