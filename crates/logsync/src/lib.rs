// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! # logsync
//!
//! Polls security event logs from an identity-security API and forwards them
//! to a SIEM collector, one producer/consumer pair per log stream.
//!
//! ```text
//!   LogApi ──> Producer ──queue──> Consumer ──> Formatter ──> Writer
//!                 ^                   │
//!                 │                   v
//!           starting offset <── CheckpointStore
//! ```
//!
//! - [`pipeline`]: wires and runs every pair until shutdown
//! - [`consumer`]: batch processing and checkpointing
//! - [`formatter`], [`cef`], [`syslog`]: wire encodings
//! - [`checkpoint`]: durable per-stream offsets
//! - [`shutdown`]: cooperative shutdown shared by every task

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]
#![deny(clippy::all)]
#![deny(unused_extern_crates)]

pub mod cef;
pub mod checkpoint;
pub mod config;
pub mod consumer;
pub mod error;
pub mod formatter;
pub mod hostname;
pub mod logger;
pub mod pipeline;
pub mod pool;
pub mod producer;
pub mod shutdown;
pub mod stream;
pub mod syslog;
pub mod writer;

pub use config::Config;
pub use pipeline::{Pipeline, PipelineReport};
pub use shutdown::Coordinator;
pub use stream::{LogBatch, LogRecord, Offset, StreamType};
