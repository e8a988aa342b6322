// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Small bounded pool for blocking, high-latency calls (API polling, checkpoint
//! file writes) so they never stall the async workers driving other streams.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinError;

pub const DEFAULT_POOL_SIZE: usize = 3;

#[derive(Debug, Clone)]
pub struct BlockingPool {
    permits: Arc<Semaphore>,
}

impl Default for BlockingPool {
    fn default() -> Self {
        Self::new(DEFAULT_POOL_SIZE)
    }
}

impl BlockingPool {
    #[must_use]
    pub fn new(size: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(size.max(1))),
        }
    }

    /// Runs `f` on the blocking thread pool once one of this pool's slots is free.
    pub async fn run<F, T>(&self, f: F) -> Result<T, JoinError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        // The semaphore is never closed, so acquiring can only fail if that changes.
        let permit = Arc::clone(&self.permits).acquire_owned().await.ok();
        let result = tokio::task::spawn_blocking(f).await;
        drop(permit);
        result
    }
}
