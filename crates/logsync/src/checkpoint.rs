// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Durable per-stream offsets.
//!
//! Each (stream, child account) pair owns one file,
//! `<dir>/<stream>_checkpoint_data[_<child>].txt`, holding a single JSON value
//! and a trailing newline. Files are truncated and rewritten on every update.
//! There is no rename or fsync, so a crash mid-write can leave a truncated file;
//! [`CheckpointStore::read`] treats that like a missing file.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, info};

use crate::error::{CheckpointError, RecoveryError};
use crate::pool::BlockingPool;
use crate::stream::{Offset, StreamType};

/// Path shared by reads and writes for the same (stream, child account) pair.
#[must_use]
pub fn checkpoint_path(
    directory: &Path,
    stream: StreamType,
    child_account_id: Option<&str>,
) -> PathBuf {
    let file_name = match child_account_id {
        Some(child) => format!("{stream}_checkpoint_data_{child}.txt"),
        None => format!("{stream}_checkpoint_data.txt"),
    };
    directory.join(file_name)
}

/// Per-stream offset files under one directory. Async writes run on the
/// store's own blocking pool.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    directory: PathBuf,
    pool: BlockingPool,
}

impl CheckpointStore {
    pub fn new(directory: impl Into<PathBuf>, pool: BlockingPool) -> Self {
        Self {
            directory: directory.into(),
            pool,
        }
    }

    /// Persists `offset` on the blocking pool and waits for the file to be closed.
    pub async fn write(
        &self,
        stream: StreamType,
        offset: &Offset,
        child_account_id: Option<&str>,
    ) -> Result<(), CheckpointError> {
        let path = checkpoint_path(&self.directory, stream, child_account_id);
        let offset = offset.clone();
        info!("{stream} consumer: saving latest log offset to a checkpointing file");
        self.pool
            .run(move || write_offset(&path, &offset))
            .await
            .map_err(|e| CheckpointError::Join(e.to_string()))?
    }

    /// Same as [`CheckpointStore::write`], on the calling thread.
    pub fn write_blocking(
        &self,
        stream: StreamType,
        offset: &Offset,
        child_account_id: Option<&str>,
    ) -> Result<(), CheckpointError> {
        write_offset(
            &checkpoint_path(&self.directory, stream, child_account_id),
            offset,
        )
    }

    /// Reads the stored offset, or the default starting offset (`default_timestamp`
    /// seconds, scaled to the stream's unit) when the file is missing or corrupt.
    #[must_use]
    pub fn read(
        stream: StreamType,
        directory: &Path,
        child_account_id: Option<&str>,
        default_timestamp: i64,
    ) -> Offset {
        let path = checkpoint_path(directory, stream, child_account_id);
        match read_offset(&path) {
            Ok(offset) => {
                debug!("Recovered {stream} offset {offset} from {}", path.display());
                offset
            }
            Err(e) => {
                let offset = default_offset(stream, default_timestamp);
                info!(
                    "Could not read checkpoint file for {stream} logs ({e}), \
                     consuming logs from {offset} timestamp"
                );
                offset
            }
        }
    }

    /// [`CheckpointStore::read`] against this store's directory.
    #[must_use]
    pub fn recover(
        &self,
        stream: StreamType,
        child_account_id: Option<&str>,
        default_timestamp: i64,
    ) -> Offset {
        Self::read(stream, &self.directory, child_account_id, default_timestamp)
    }
}

/// Default starting offset in the stream's unit.
#[must_use]
pub fn default_offset(stream: StreamType, default_timestamp: i64) -> Offset {
    Value::from(default_timestamp.saturating_mul(stream.offset_scale()))
}

fn write_offset(path: &Path, offset: &Offset) -> Result<(), CheckpointError> {
    let mut contents = serde_json::to_string(offset)?;
    contents.push('\n');
    let mut file = File::create(path)?;
    file.write_all(contents.as_bytes())?;
    file.flush()?;
    Ok(())
}

fn read_offset(path: &Path) -> Result<Offset, RecoveryError> {
    let contents = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&contents)?)
}
