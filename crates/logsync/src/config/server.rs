// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Downstream collector definitions and the endpoint to server mapping.

use std::fmt;
use std::path::PathBuf;

use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum Protocol {
    #[serde(rename = "TCP")]
    Tcp,
    #[serde(rename = "TCPSSL")]
    TcpSsl,
    #[serde(rename = "UDP")]
    Udp,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Tcp => f.write_str("TCP"),
            Protocol::TcpSsl => f.write_str("TCPSSL"),
            Protocol::Udp => f.write_str("UDP"),
        }
    }
}

/// A log collector that receives formatted lines.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ServerConfig {
    pub id: String,
    pub hostname: String,
    pub port: u16,
    pub protocol: Protocol,
    #[serde(default)]
    pub cert_filepath: Option<PathBuf>,
}

/// Routes the listed endpoints to the server with id `server`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EndpointServerMapping {
    pub server: String,
    pub endpoints: Vec<String>,
}
