// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Process-wide shutdown coordination.
//!
//! Every producer and consumer receives a clone of the same [`Coordinator`].
//! Shutdown is cooperative: tasks poll [`Coordinator::is_running`] after each
//! suspension point and finish their in-flight work before exiting.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Debug, Default)]
struct Inner {
    token: CancellationToken,
    reason: Mutex<Option<String>>,
}

/// Returned by [`Coordinator::restless_sleep`] when shutdown interrupts the sleep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("shutdown was requested")]
pub struct ShutdownRequested;

/// Shared running flag plus the reason the first shutdown request gave.
#[derive(Debug, Clone, Default)]
pub struct Coordinator {
    inner: Arc<Inner>,
}

impl Coordinator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.inner.token.is_cancelled()
    }

    /// Requests shutdown. Only the first request records its reason and
    /// returns `true`; later calls are no-ops.
    pub fn request_shutdown(&self, reason: impl Into<String>) -> bool {
        let reason = reason.into();
        {
            let mut current = match self.inner.reason.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            if current.is_some() || self.inner.token.is_cancelled() {
                return false;
            }
            *current = Some(reason.clone());
        }
        warn!("DuoLogSync: shutting down due to [{reason}]");
        self.inner.token.cancel();
        true
    }

    #[must_use]
    pub fn shutdown_reason(&self) -> Option<String> {
        match self.inner.reason.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Resolves once shutdown has been requested.
    pub async fn cancelled(&self) {
        self.inner.token.cancelled().await;
    }

    /// Sleeps for `duration` unless shutdown is requested first.
    pub async fn restless_sleep(&self, duration: Duration) -> Result<(), ShutdownRequested> {
        tokio::select! {
            () = tokio::time::sleep(duration) => {
                if self.is_running() { Ok(()) } else { Err(ShutdownRequested) }
            }
            () = self.inner.token.cancelled() => Err(ShutdownRequested),
        }
    }

    /// Turns Ctrl-C into a shutdown request. The listener ends with the coordinator.
    pub fn listen_for_signals(&self) -> JoinHandle<()> {
        let coordinator = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                result = tokio::signal::ctrl_c() => match result {
                    Ok(()) => {
                        info!("DuoLogSync: received interrupt signal");
                        coordinator.request_shutdown("interrupted by user");
                    }
                    Err(e) => error!("Unable to listen for shutdown signal: {e}"),
                },
                () = coordinator.cancelled() => {}
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_coordinator_is_running() {
        let coordinator = Coordinator::new();
        assert!(coordinator.is_running());
        assert_eq!(coordinator.shutdown_reason(), None);
    }

    #[test]
    fn test_first_request_wins() {
        let coordinator = Coordinator::new();
        let clone = coordinator.clone();

        assert!(clone.request_shutdown("connection reset"));
        assert!(!coordinator.request_shutdown("second reason"));

        assert!(!coordinator.is_running());
        assert_eq!(
            coordinator.shutdown_reason().as_deref(),
            Some("connection reset")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_restless_sleep_completes_while_running() {
        let coordinator = Coordinator::new();
        assert_eq!(
            coordinator.restless_sleep(Duration::from_secs(120)).await,
            Ok(())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_restless_sleep_wakes_on_shutdown() {
        let coordinator = Coordinator::new();
        let sleeper = coordinator.clone();
        let handle =
            tokio::spawn(async move { sleeper.restless_sleep(Duration::from_secs(3600)).await });

        tokio::time::sleep(Duration::from_secs(1)).await;
        coordinator.request_shutdown("test");

        assert_eq!(handle.await.unwrap(), Err(ShutdownRequested));
    }

    #[tokio::test]
    async fn test_signal_listener_ends_after_shutdown() {
        let coordinator = Coordinator::new();
        let listener = coordinator.listen_for_signals();
        assert!(!listener.is_finished());

        coordinator.request_shutdown("pipeline finished");

        tokio::time::timeout(Duration::from_secs(5), listener)
            .await
            .expect("listener should stop with the coordinator")
            .unwrap();
        assert_eq!(
            coordinator.shutdown_reason().as_deref(),
            Some("pipeline finished")
        );
    }
}
