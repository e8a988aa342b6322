// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Configuration for the log sync pipeline.
//!
//! Loaded from a YAML file, with `DLS_`-prefixed environment variables taking
//! precedence (`__` separates nested keys, e.g.
//! `DLS_DLS_SETTINGS__CHECKPOINTING__ENABLED=true`).
//!
//! ```yaml
//! version: "1.0.0"
//! dls_settings:
//!   log_format: JSON
//!   api: { offset: 180, timeout: 120 }
//!   checkpointing: { enabled: true, directory: /var/lib/duologsync }
//!   syslog: { enabled: true, format: RFC5424 }
//! servers:
//!   - { id: main, hostname: siem.example.com, port: 514, protocol: TCP }
//! account:
//!   ikey: DIXXXXXXXXXXXXXXXXXX
//!   skey: secret
//!   hostname: api-xxxxxxxx.duosecurity.com
//!   endpoint_server_mappings:
//!     - { server: main, endpoints: [auth, telephony, adminaction] }
//! ```

pub mod server;

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use figment::{
    providers::{Env, Format, Yaml},
    Figment,
};
use serde::Deserialize;
use tracing::info;

pub use self::server::{EndpointServerMapping, Protocol, ServerConfig};
use crate::error::ConfigurationError;
use crate::formatter::SUPPORTED_FORMATS;
use crate::syslog::SyslogFormat;

pub const DIRECTORY_DEFAULT: &str = "/tmp";
pub const LOG_FILEPATH_DEFAULT: &str = "/tmp/duologsync.log";
pub const LOG_FORMAT_DEFAULT: &str = "JSON";
pub const LOG_LEVEL_DEFAULT: &str = "info";
/// Days of history fetched when no checkpoint exists.
pub const API_OFFSET_DEFAULT: u32 = 180;
pub const API_OFFSET_MAX: u32 = 180;
/// Seconds between API polls; also the minimum accepted value.
pub const API_TIMEOUT_DEFAULT: u64 = 120;
pub const ENV_PREFIX: &str = "DLS_";

const SECONDS_PER_DAY: i64 = 24 * 60 * 60;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Config {
    pub version: String,
    #[serde(default)]
    pub dls_settings: DlsSettings,
    pub servers: Vec<ServerConfig>,
    pub account: AccountConfig,
    /// Unix timestamp (seconds) logs are fetched from when no checkpoint exists.
    /// Derived from `dls_settings.api.offset` at load time.
    #[serde(skip)]
    pub default_offset: i64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct DlsSettings {
    pub log_filepath: PathBuf,
    pub log_format: String,
    pub log_level: String,
    pub api: ApiSettings,
    pub checkpointing: CheckpointingSettings,
    pub syslog: SyslogSettings,
}

impl Default for DlsSettings {
    fn default() -> Self {
        Self {
            log_filepath: PathBuf::from(LOG_FILEPATH_DEFAULT),
            log_format: LOG_FORMAT_DEFAULT.to_string(),
            log_level: LOG_LEVEL_DEFAULT.to_string(),
            api: ApiSettings::default(),
            checkpointing: CheckpointingSettings::default(),
            syslog: SyslogSettings::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ApiSettings {
    /// Days back to start fetching from.
    pub offset: u32,
    /// Seconds between API calls.
    pub timeout: u64,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            offset: API_OFFSET_DEFAULT,
            timeout: API_TIMEOUT_DEFAULT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct CheckpointingSettings {
    pub enabled: bool,
    pub directory: PathBuf,
}

impl Default for CheckpointingSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            directory: PathBuf::from(DIRECTORY_DEFAULT),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SyslogSettings {
    pub enabled: bool,
    pub format: SyslogFormat,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct AccountConfig {
    pub ikey: String,
    pub skey: String,
    pub hostname: String,
    pub endpoint_server_mappings: Vec<EndpointServerMapping>,
    #[serde(default)]
    pub is_msp: bool,
    /// Child account ids excluded from an MSP sync.
    #[serde(default)]
    pub block_list: Vec<String>,
}

impl Config {
    /// Loads, normalizes and validates the config file at `path`.
    pub fn load(path: &Path) -> Result<Config, ConfigurationError> {
        if !path.is_file() {
            return Err(ConfigurationError::Load(format!(
                "{} does not exist or is not a file",
                path.display()
            )));
        }
        Self::from_figment(
            Figment::new()
                .merge(Yaml::file(path))
                .merge(Env::prefixed(ENV_PREFIX).split("__")),
        )
    }

    /// Parses YAML held in memory. Environment overrides are not applied.
    pub fn from_yaml_str(yaml: &str) -> Result<Config, ConfigurationError> {
        Self::from_figment(Figment::new().merge(Yaml::string(yaml)))
    }

    fn from_figment(figment: Figment) -> Result<Config, ConfigurationError> {
        let mut config: Config = figment
            .extract()
            .map_err(|e| ConfigurationError::Load(e.to_string()))?;
        config.validate()?;
        config.normalize(Utc::now());
        Ok(config)
    }

    /// Raises a too-short poll interval and resolves the default offset against `now`.
    pub fn normalize(&mut self, now: DateTime<Utc>) {
        if self.dls_settings.api.timeout < API_TIMEOUT_DEFAULT {
            self.dls_settings.api.timeout = API_TIMEOUT_DEFAULT;
            info!("DuoLogSync: Setting default api timeout to {API_TIMEOUT_DEFAULT} seconds.");
        }
        self.default_offset =
            now.timestamp() - i64::from(self.dls_settings.api.offset) * SECONDS_PER_DAY;
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.version.trim().is_empty() {
            return Err(invalid("version cannot be empty"));
        }

        if !self.supported_formats().contains(&self.log_format()) {
            return Err(ConfigurationError::UnsupportedLogFormat(
                self.dls_settings.log_format.clone(),
            ));
        }

        if self.dls_settings.api.offset > API_OFFSET_MAX {
            return Err(invalid(format!(
                "dls_settings.api.offset must be between 0 and {API_OFFSET_MAX} days, got {}",
                self.dls_settings.api.offset
            )));
        }

        if self.servers.is_empty() {
            return Err(invalid("at least one server must be defined"));
        }
        for server in &self.servers {
            if server.id.trim().is_empty() || server.hostname.trim().is_empty() {
                return Err(invalid("servers require a non-empty id and hostname"));
            }
            if server.protocol == Protocol::TcpSsl && server.cert_filepath.is_none() {
                return Err(invalid(format!(
                    "server {} uses TCPSSL and requires cert_filepath",
                    server.id
                )));
            }
        }

        let account = &self.account;
        for (name, value) in [
            ("ikey", &account.ikey),
            ("skey", &account.skey),
            ("hostname", &account.hostname),
        ] {
            if value.trim().is_empty() {
                return Err(invalid(format!("account.{name} cannot be empty")));
            }
        }
        if account.endpoint_server_mappings.is_empty() {
            return Err(invalid("account.endpoint_server_mappings cannot be empty"));
        }
        for mapping in &account.endpoint_server_mappings {
            if mapping.endpoints.is_empty() {
                return Err(invalid(format!(
                    "mapping for server {} lists no endpoints",
                    mapping.server
                )));
            }
            if self.server(&mapping.server).is_none() {
                return Err(invalid(format!(
                    "mapping references unknown server {}",
                    mapping.server
                )));
            }
        }
        let first = &account.endpoint_server_mappings[0].server;
        if account
            .endpoint_server_mappings
            .iter()
            .any(|mapping| &mapping.server != first)
        {
            return Err(invalid(
                "all endpoints must be mapped to the same server; multiple destinations are not supported",
            ));
        }

        Ok(())
    }

    #[must_use]
    pub fn server(&self, id: &str) -> Option<&ServerConfig> {
        self.servers.iter().find(|server| server.id == id)
    }

    /// The collector every stream writes to.
    #[must_use]
    pub fn destination_server(&self) -> Option<&ServerConfig> {
        self.account
            .endpoint_server_mappings
            .first()
            .and_then(|mapping| self.server(&mapping.server))
    }

    /// Endpoint identifiers from every mapping, in order, without duplicates.
    /// Identifiers are not checked against known streams here.
    #[must_use]
    pub fn enabled_endpoints(&self) -> Vec<String> {
        let mut endpoints: Vec<String> = Vec::new();
        for endpoint in self
            .account
            .endpoint_server_mappings
            .iter()
            .flat_map(|mapping| mapping.endpoints.iter())
        {
            if !endpoints.contains(endpoint) {
                endpoints.push(endpoint.clone());
            }
        }
        endpoints
    }

    #[must_use]
    pub fn log_format(&self) -> &str {
        &self.dls_settings.log_format
    }

    /// Wire format identifiers `log_format` may name.
    #[must_use]
    pub fn supported_formats(&self) -> &'static [&'static str] {
        &SUPPORTED_FORMATS
    }

    #[must_use]
    pub fn checkpointing_enabled(&self) -> bool {
        self.dls_settings.checkpointing.enabled
    }

    #[must_use]
    pub fn checkpoint_dir(&self) -> &Path {
        &self.dls_settings.checkpointing.directory
    }

    #[must_use]
    pub fn syslog_enabled(&self) -> bool {
        self.dls_settings.syslog.enabled
    }

    /// Header format to wrap JSON lines with, if syslog is enabled.
    #[must_use]
    pub fn syslog_format(&self) -> Option<SyslogFormat> {
        self.syslog_enabled()
            .then_some(self.dls_settings.syslog.format)
    }

    #[must_use]
    pub fn api_timeout(&self) -> Duration {
        Duration::from_secs(self.dls_settings.api.timeout)
    }

    #[must_use]
    pub fn account_is_msp(&self) -> bool {
        self.account.is_msp
    }

    #[must_use]
    pub fn is_blocked(&self, child_account_id: &str) -> bool {
        self.account
            .block_list
            .iter()
            .any(|blocked| blocked == child_account_id)
    }
}

fn invalid(message: impl Into<String>) -> ConfigurationError {
    ConfigurationError::Invalid(message.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const MINIMAL: &str = r#"
version: "1.0.0"
servers:
  - id: main
    hostname: 127.0.0.1
    port: 514
    protocol: TCP
account:
  ikey: DIXXXXXXXXXXXXXXXXXX
  skey: secret
  hostname: api-test.duosecurity.com
  endpoint_server_mappings:
    - server: main
      endpoints: [auth, telephony]
"#;

    #[test]
    fn test_minimal_config_uses_defaults() {
        figment::Jail::expect_with(|jail| {
            jail.clear_env();
            jail.create_file("config.yml", MINIMAL)?;

            let config = Config::load(Path::new("config.yml")).unwrap();
            assert_eq!(config.log_format(), "JSON");
            assert_eq!(config.supported_formats(), &["CEF", "JSON"]);
            assert_eq!(config.dls_settings.log_level, "info");
            assert_eq!(
                config.dls_settings.log_filepath,
                PathBuf::from("/tmp/duologsync.log")
            );
            assert!(!config.checkpointing_enabled());
            assert_eq!(config.checkpoint_dir(), Path::new("/tmp"));
            assert!(!config.syslog_enabled());
            assert_eq!(config.syslog_format(), None);
            assert_eq!(config.api_timeout(), Duration::from_secs(120));
            assert!(!config.account_is_msp());
            assert_eq!(config.enabled_endpoints(), vec!["auth", "telephony"]);
            assert_eq!(config.destination_server().unwrap().port, 514);
            Ok(())
        });
    }

    #[test]
    fn test_full_config() {
        figment::Jail::expect_with(|jail| {
            jail.clear_env();
            jail.create_file(
                "config.yml",
                r#"
version: "1.0.0"
dls_settings:
  log_filepath: /var/log/dls.log
  log_format: CEF
  api:
    offset: 10
    timeout: 300
  checkpointing:
    enabled: true
    directory: /var/lib/dls
  proxy:
    proxy_server: proxy.local
    proxy_port: 3128
  syslog:
    enabled: true
    format: RFC3164
servers:
  - id: siem
    hostname: siem.local
    port: 6514
    protocol: TCPSSL
    cert_filepath: /etc/ssl/siem.pem
account:
  ikey: DIXXXXXXXXXXXXXXXXXX
  skey: secret
  hostname: api-test.duosecurity.com
  is_msp: true
  block_list: [DA1]
  endpoint_server_mappings:
    - server: siem
      endpoints: [auth]
    - server: siem
      endpoints: [adminaction, auth]
"#,
            )?;

            let config = Config::load(Path::new("config.yml")).unwrap();
            assert_eq!(config.log_format(), "CEF");
            assert!(config.checkpointing_enabled());
            assert_eq!(config.checkpoint_dir(), Path::new("/var/lib/dls"));
            assert_eq!(config.syslog_format(), Some(SyslogFormat::Rfc3164));
            assert_eq!(config.api_timeout(), Duration::from_secs(300));
            assert!(config.account_is_msp());
            assert!(config.is_blocked("DA1"));
            assert!(!config.is_blocked("DA2"));
            assert_eq!(config.enabled_endpoints(), vec!["auth", "adminaction"]);
            assert_eq!(
                config.destination_server().unwrap().protocol,
                Protocol::TcpSsl
            );
            Ok(())
        });
    }

    #[test]
    fn test_env_overrides_file() {
        figment::Jail::expect_with(|jail| {
            jail.clear_env();
            jail.create_file("config.yml", MINIMAL)?;
            jail.set_env("DLS_DLS_SETTINGS__LOG_FORMAT", "CEF");
            jail.set_env("DLS_DLS_SETTINGS__CHECKPOINTING__ENABLED", "true");

            let config = Config::load(Path::new("config.yml")).unwrap();
            assert_eq!(config.log_format(), "CEF");
            assert!(config.checkpointing_enabled());
            Ok(())
        });
    }

    #[test]
    fn test_short_timeout_is_raised() {
        let mut config = Config::from_yaml_str(MINIMAL).unwrap();
        config.dls_settings.api.timeout = 5;
        config.normalize(Utc::now());
        assert_eq!(config.api_timeout(), Duration::from_secs(API_TIMEOUT_DEFAULT));
    }

    #[test]
    fn test_default_offset_is_days_before_now() {
        let mut config = Config::from_yaml_str(MINIMAL).unwrap();
        config.dls_settings.api.offset = 2;
        let now = Utc.with_ymd_and_hms(2024, 1, 3, 0, 0, 0).unwrap();
        config.normalize(now);
        assert_eq!(
            config.default_offset,
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap().timestamp()
        );
    }

    #[test]
    fn test_missing_file_is_load_error() {
        let result = Config::load(Path::new("/nonexistent/dls/config.yml"));
        assert!(matches!(result, Err(ConfigurationError::Load(_))));
    }

    #[test]
    fn test_unsupported_log_format() {
        let yaml = MINIMAL.replace("servers:", "dls_settings:\n  log_format: XML\nservers:");
        let result = Config::from_yaml_str(&yaml);
        assert!(matches!(
            result,
            Err(ConfigurationError::UnsupportedLogFormat(ref f)) if f == "XML"
        ));
    }

    #[test]
    fn test_unsupported_syslog_format_fails_to_load() {
        let yaml = MINIMAL.replace(
            "servers:",
            "dls_settings:\n  syslog:\n    enabled: true\n    format: RFC1\nservers:",
        );
        assert!(matches!(
            Config::from_yaml_str(&yaml),
            Err(ConfigurationError::Load(_))
        ));
    }

    #[test]
    fn test_offset_out_of_range() {
        let yaml = MINIMAL.replace("servers:", "dls_settings:\n  api:\n    offset: 181\nservers:");
        assert!(matches!(
            Config::from_yaml_str(&yaml),
            Err(ConfigurationError::Invalid(_))
        ));
    }

    #[test]
    fn test_tcpssl_requires_certificate() {
        let yaml = MINIMAL.replace("protocol: TCP", "protocol: TCPSSL");
        assert!(matches!(
            Config::from_yaml_str(&yaml),
            Err(ConfigurationError::Invalid(_))
        ));
    }

    #[test]
    fn test_mapping_to_unknown_server() {
        let yaml = MINIMAL.replace("- server: main", "- server: other");
        assert!(matches!(
            Config::from_yaml_str(&yaml),
            Err(ConfigurationError::Invalid(_))
        ));
    }

    #[test]
    fn test_multiple_destinations_rejected() {
        let yaml = MINIMAL
            .replace(
                "servers:\n",
                "servers:\n  - id: backup\n    hostname: 127.0.0.2\n    port: 514\n    protocol: UDP\n",
            )
            .replace(
                "      endpoints: [auth, telephony]\n",
                "      endpoints: [auth]\n    - server: backup\n      endpoints: [telephony]\n",
            );
        let result = Config::from_yaml_str(&yaml);
        assert!(
            matches!(result, Err(ConfigurationError::Invalid(ref m)) if m.contains("same server")),
            "{result:?}"
        );
    }

    #[test]
    fn test_missing_account_is_load_error() {
        let yaml = r#"
version: "1.0.0"
servers:
  - { id: main, hostname: 127.0.0.1, port: 514, protocol: TCP }
"#;
        assert!(matches!(
            Config::from_yaml_str(yaml),
            Err(ConfigurationError::Load(_))
        ));
    }

    #[test]
    fn test_port_out_of_range_is_load_error() {
        let yaml = MINIMAL.replace("port: 514", "port: 70000");
        assert!(matches!(
            Config::from_yaml_str(&yaml),
            Err(ConfigurationError::Load(_))
        ));
    }
}
