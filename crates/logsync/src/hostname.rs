// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Local hostname used in syslog headers.

use std::sync::OnceLock;
use tracing::warn;

static HOSTNAME: OnceLock<String> = OnceLock::new();

/// Hostname of this machine, resolved once per process.
pub fn cached_hostname() -> &'static str {
    HOSTNAME.get_or_init(get_hostname)
}

/// Resolve the system hostname, falling back to "unknown" rather than failing.
#[must_use]
pub fn get_hostname() -> String {
    match nix::unistd::gethostname() {
        Ok(hostname_osstr) => {
            if let Some(hostname_str) = hostname_osstr.to_str() {
                if !hostname_str.is_empty() {
                    return hostname_str.to_string();
                }
            }
            warn!("System hostname is empty or not valid UTF-8");
        }
        Err(e) => {
            warn!("Failed to get system hostname: {}", e);
        }
    }

    warn!("Could not determine hostname, using 'unknown'");
    "unknown".to_string()
}
