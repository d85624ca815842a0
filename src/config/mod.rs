//! # Configuration Management
//!
//! Bridge configuration with layered loading: built-in defaults, an optional
//! TOML file, then `PBJ_`-prefixed environment variables.
//!
//! ## Example
//!
//! ```rust,no_run
//! use pbj_bridge::config::ConfigLoader;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ConfigLoader::new().load()?;
//! println!("Reading from {:?}", config.receive_queue);
//! # Ok(())
//! # }
//! ```
//!
//! Environment keys use `__` between nesting levels:
//! `PBJ_RECEIVE_QUEUE=in`, `PBJ_BROKER__HOST=artemis`, `PBJ_SINK__HEARTBEAT_MS=0`.

pub mod error;
pub mod loader;

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};

use crate::constants::{defaults, params};
use crate::messaging::{BrokerCredentials, StompChannelConfig};
use crate::pipeline::{ExceptionPolicy, ReconnectPolicy};

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigLoader;

/// Root configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub broker: BrokerConfig,
    /// Inbound queue; the pipeline refuses to start without it
    pub receive_queue: Option<String>,
    /// Outbound queue; the pipeline refuses to start without it
    pub send_queue: Option<String>,
    pub accept_stop: bool,
    pub send_stop: bool,
    pub output_dir: String,
    /// Add the XMI file writer ahead of the sink
    pub write_xmi: bool,
    pub exception_policy: ExceptionPolicy,
    pub source: StompChannelConfig,
    /// Missing fields fall back to the sink defaults, not the source ones
    #[serde(deserialize_with = "sink_channel")]
    pub sink: StompChannelConfig,
    pub reconnect: ReconnectPolicy,
    pub logging: LoggingConfig,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            broker: BrokerConfig::default(),
            receive_queue: None,
            send_queue: None,
            accept_stop: true,
            send_stop: true,
            output_dir: defaults::OUTPUT_DIR.to_string(),
            write_xmi: false,
            exception_policy: ExceptionPolicy::default(),
            source: StompChannelConfig::default(),
            sink: StompChannelConfig::for_sink(),
            reconnect: ReconnectPolicy::default(),
            logging: LoggingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: defaults::HOST.to_string(),
            port: defaults::PORT,
            username: defaults::USERNAME.to_string(),
            password: defaults::PASSWORD.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub log_dir: String,
    /// Also write JSON logs under `log_dir`
    pub file_output: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_dir: "log".to_string(),
            file_output: true,
        }
    }
}

/// Fields of a `[sink]` table that were actually set
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ChannelOverrides {
    heartbeat_ms: Option<u64>,
    connect_timeout_ms: Option<u64>,
    receipt_timeout_ms: Option<u64>,
    max_frame_bytes: Option<usize>,
    event_buffer: Option<usize>,
}

impl ChannelOverrides {
    fn apply(self, mut base: StompChannelConfig) -> StompChannelConfig {
        if let Some(value) = self.heartbeat_ms {
            base.heartbeat_ms = value;
        }
        if let Some(value) = self.connect_timeout_ms {
            base.connect_timeout_ms = value;
        }
        if let Some(value) = self.receipt_timeout_ms {
            base.receipt_timeout_ms = value;
        }
        if let Some(value) = self.max_frame_bytes {
            base.max_frame_bytes = value;
        }
        if let Some(value) = self.event_buffer {
            base.event_buffer = value;
        }
        base
    }
}

fn sink_channel<'de, D>(deserializer: D) -> Result<StompChannelConfig, D::Error>
where
    D: Deserializer<'de>,
{
    let overrides = ChannelOverrides::deserialize(deserializer)?;
    Ok(overrides.apply(StompChannelConfig::for_sink()))
}

fn yes_no(value: bool) -> String {
    if value { "yes" } else { "no" }.to_string()
}

impl BridgeConfig {
    /// Reject values that cannot work regardless of the pipeline's shape.
    ///
    /// Queue names are not checked here; the participants that need them
    /// report them missing when parameters are bound.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.broker.host.trim().is_empty() {
            return Err(ConfigurationError::missing_required_field("host", "broker"));
        }
        if self.broker.port == 0 {
            return Err(ConfigurationError::invalid_value(
                "port",
                "0",
                "broker port must be non-zero",
            ));
        }
        if self.reconnect.multiplier < 1.0 {
            return Err(ConfigurationError::invalid_value(
                "multiplier",
                self.reconnect.multiplier.to_string(),
                "reconnect backoff must not shrink",
            ));
        }
        if self.reconnect.initial_delay_ms > self.reconnect.max_delay_ms {
            return Err(ConfigurationError::invalid_value(
                "initial_delay_ms",
                self.reconnect.initial_delay_ms.to_string(),
                "must not exceed reconnect.max_delay_ms",
            ));
        }
        if self.reconnect.max_attempts == Some(0) {
            return Err(ConfigurationError::invalid_value(
                "max_attempts",
                "0",
                "omit the field to retry forever",
            ));
        }
        for (context, channel) in [("source", &self.source), ("sink", &self.sink)] {
            if channel.max_frame_bytes == 0 {
                return Err(ConfigurationError::invalid_value("max_frame_bytes", "0", context));
            }
            if channel.event_buffer == 0 {
                return Err(ConfigurationError::invalid_value("event_buffer", "0", context));
            }
        }
        Ok(())
    }

    pub fn credentials(&self) -> BrokerCredentials {
        BrokerCredentials::new(
            self.broker.host.as_str(),
            self.broker.port,
            self.broker.username.as_str(),
            self.broker.password.as_str(),
        )
    }

    /// Raw pipeline parameters; unset queues are left out so the owning
    /// participant reports them missing.
    pub fn to_params(&self) -> BTreeMap<String, String> {
        let mut raw = BTreeMap::new();
        if let Some(queue) = &self.receive_queue {
            raw.insert(params::RECEIVE_QUEUE.to_string(), queue.clone());
        }
        if let Some(queue) = &self.send_queue {
            raw.insert(params::SEND_QUEUE.to_string(), queue.clone());
        }
        raw.insert(params::HOST.to_string(), self.broker.host.clone());
        raw.insert(params::PORT.to_string(), self.broker.port.to_string());
        raw.insert(params::USERNAME.to_string(), self.broker.username.clone());
        raw.insert(params::PASSWORD.to_string(), self.broker.password.clone());
        raw.insert(params::ACCEPT_STOP.to_string(), yes_no(self.accept_stop));
        raw.insert(params::SEND_STOP.to_string(), yes_no(self.send_stop));
        raw.insert(params::OUTPUT_DIR.to_string(), self.output_dir.clone());
        raw
    }

    /// Copy safe to log
    pub fn sanitized(&self) -> Self {
        let mut copy = self.clone();
        copy.broker.password = "***".to_string();
        copy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = BridgeConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.broker.port, 61616);
        assert_eq!(config.sink.heartbeat_ms, defaults::SINK_HEARTBEAT_MS);
        assert_eq!(config.source.heartbeat_ms, defaults::SOURCE_HEARTBEAT_MS);
        assert_eq!(config.exception_policy, ExceptionPolicy::Shutdown);
    }

    #[test]
    fn test_to_params_omits_unset_queues() {
        let mut config = BridgeConfig::default();
        config.send_queue = Some("out".to_string());
        config.accept_stop = false;
        let raw = config.to_params();
        assert!(!raw.contains_key(params::RECEIVE_QUEUE));
        assert_eq!(raw[params::SEND_QUEUE], "out");
        assert_eq!(raw[params::ACCEPT_STOP], "no");
        assert_eq!(raw[params::SEND_STOP], "yes");
        assert_eq!(raw[params::PORT], "61616");
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = BridgeConfig::default();
        config.broker.port = 0;
        assert!(config.validate().is_err());

        let mut config = BridgeConfig::default();
        config.reconnect.initial_delay_ms = 60_000;
        assert!(config.validate().is_err());

        let mut config = BridgeConfig::default();
        config.broker.host = " ".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigurationError::MissingRequiredField { .. })
        ));
    }

    #[test]
    fn test_sanitized_masks_password() {
        let mut config = BridgeConfig::default();
        config.broker.password = "hunter2".to_string();
        let json = serde_json::to_string(&config.sanitized()).unwrap();
        assert!(!json.contains("hunter2"));
        assert_eq!(config.credentials().password, "hunter2");
    }
}
