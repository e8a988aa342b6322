// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Transports that deliver encoded lines to a log collector.
//!
//! One writer is shared by every consumer of a pipeline, so implementations
//! serialize access internally.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpStream, UdpSocket};
use tokio::sync::Mutex;
use tracing::info;

use crate::config::{Protocol, ServerConfig};
use crate::error::{ConfigurationError, WriteError};

#[async_trait]
pub trait Writer: Send + Sync {
    /// Sends one encoded line. A connection that was reset by the peer is
    /// reported as [`WriteError::ConnectionReset`].
    async fn write(&self, data: &[u8]) -> Result<(), WriteError>;
}

pub struct TcpWriter {
    stream: Mutex<TcpStream>,
    peer: String,
}

impl TcpWriter {
    pub async fn connect(host: &str, port: u16) -> Result<Self, WriteError> {
        let stream = TcpStream::connect((host, port)).await?;
        let peer = format!("{host}:{port}");
        info!("DuoLogSync: opened TCP connection to {peer}");
        Ok(Self {
            stream: Mutex::new(stream),
            peer,
        })
    }
}

impl fmt::Debug for TcpWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TcpWriter").field("peer", &self.peer).finish()
    }
}

#[async_trait]
impl Writer for TcpWriter {
    async fn write(&self, data: &[u8]) -> Result<(), WriteError> {
        let mut stream = self.stream.lock().await;
        stream.write_all(data).await?;
        stream.flush().await?;
        Ok(())
    }
}

/// Sends each line as a single datagram.
#[derive(Debug)]
pub struct UdpWriter {
    socket: UdpSocket,
}

impl UdpWriter {
    pub async fn connect(host: &str, port: u16) -> Result<Self, WriteError> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket.connect((host, port)).await?;
        info!("DuoLogSync: sending UDP datagrams to {host}:{port}");
        Ok(Self { socket })
    }
}

#[async_trait]
impl Writer for UdpWriter {
    async fn write(&self, data: &[u8]) -> Result<(), WriteError> {
        self.socket.send(data).await?;
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CreateWriterError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error("failed to connect to server {server}: {source}")]
    Connect { server: String, source: WriteError },
}

/// Opens the transport described by `server`.
pub async fn create_writer(server: &ServerConfig) -> Result<Arc<dyn Writer>, CreateWriterError> {
    let connect_error = |source| CreateWriterError::Connect {
        server: server.id.clone(),
        source,
    };
    match server.protocol {
        Protocol::Tcp => Ok(Arc::new(
            TcpWriter::connect(&server.hostname, server.port)
                .await
                .map_err(connect_error)?,
        )),
        Protocol::Udp => Ok(Arc::new(
            UdpWriter::connect(&server.hostname, server.port)
                .await
                .map_err(connect_error)?,
        )),
        Protocol::TcpSsl => Err(ConfigurationError::UnsupportedProtocol(
            Protocol::TcpSsl.to_string(),
        )
        .into()),
    }
}
