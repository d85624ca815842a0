//! Configuration Loader
//!
//! Layers an optional TOML file and the process environment over the
//! defaults and validates the result.

use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};

use config::{Config, Environment, File, FileFormat};
use tracing::{debug, info};

use super::error::{ConfigResult, ConfigurationError};
use super::BridgeConfig;

/// Environment variable naming an explicit configuration file
pub const CONFIG_PATH_VAR: &str = "PBJ_CONFIG_PATH";
/// File used when no explicit path is given; optional
pub const DEFAULT_CONFIG_FILE: &str = "config/pbj.toml";

const ENV_PREFIX: &str = "PBJ";

#[derive(Debug, Clone, Default)]
pub struct ConfigLoader {
    /// Explicit file; must exist
    file: Option<PathBuf>,
    /// Replaces the process environment, for tests
    env_source: Option<HashMap<String, String>>,
}

impl ConfigLoader {
    /// Loader honoring `PBJ_CONFIG_PATH`
    pub fn new() -> Self {
        Self {
            file: env::var(CONFIG_PATH_VAR).ok().map(PathBuf::from),
            env_source: None,
        }
    }

    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.file = Some(path.into());
        self
    }

    /// Read overrides from `vars` instead of the process environment
    pub fn with_env_source(mut self, vars: HashMap<String, String>) -> Self {
        self.env_source = Some(vars);
        self
    }

    pub fn load(&self) -> ConfigResult<BridgeConfig> {
        let mut builder = Config::builder();

        match &self.file {
            Some(path) => {
                if !path.exists() {
                    return Err(ConfigurationError::config_file_not_found(path));
                }
                debug!(path = %path.display(), "Loading configuration file");
                builder = builder.add_source(File::from(path.as_path()).format(FileFormat::Toml));
            }
            None => {
                builder = builder.add_source(
                    File::from(Path::new(DEFAULT_CONFIG_FILE))
                        .format(FileFormat::Toml)
                        .required(false),
                );
            }
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true)
                .source(self.env_source.clone()),
        );

        let config: BridgeConfig = builder.build()?.try_deserialize()?;
        config.validate()?;

        debug!(
            config = %serde_json::to_string(&config.sanitized())
                .unwrap_or_else(|_| "[serialization error]".to_string()),
            "Configuration loaded"
        );
        info!(
            broker = %config.credentials().address(),
            receive_queue = ?config.receive_queue,
            send_queue = ?config.send_queue,
            policy = %config.exception_policy,
            "Configuration ready"
        );
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::defaults;
    use crate::messaging::StompChannelConfig;
    use crate::pipeline::ExceptionPolicy;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults_without_file_or_env() {
        let config = ConfigLoader::default()
            .with_env_source(HashMap::new())
            .load()
            .unwrap();
        assert_eq!(config, BridgeConfig::default());
    }

    #[test]
    fn test_file_then_env_override() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
receive_queue = "to_java"
send_queue = "from_java"
exception_policy = "skip_document"

[broker]
host = "artemis"
port = 61613

[reconnect]
max_attempts = 5
"#
        )
        .unwrap();

        let config = ConfigLoader::default()
            .with_file(file.path())
            .with_env_source(env(&[
                ("PBJ_BROKER__HOST", "override"),
                ("PBJ_ACCEPT_STOP", "false"),
                ("PBJ_SINK__HEARTBEAT_MS", "0"),
            ]))
            .load()
            .unwrap();

        assert_eq!(config.receive_queue.as_deref(), Some("to_java"));
        assert_eq!(config.broker.host, "override");
        assert_eq!(config.broker.port, 61613);
        assert_eq!(config.broker.username, "guest");
        assert!(!config.accept_stop);
        assert_eq!(config.sink.heartbeat_ms, 0);
        assert_eq!(config.exception_policy, ExceptionPolicy::SkipDocument);
        assert_eq!(config.reconnect.max_attempts, Some(5));
    }

    #[test]
    fn test_partial_sink_table_keeps_sink_heartbeat() {
        let config = ConfigLoader::default()
            .with_env_source(env(&[("PBJ_SINK__CONNECT_TIMEOUT_MS", "5000")]))
            .load()
            .unwrap();
        assert_eq!(config.sink.connect_timeout_ms, 5000);
        assert_eq!(config.sink.heartbeat_ms, defaults::SINK_HEARTBEAT_MS);
        assert_eq!(config.source, StompChannelConfig::default());

        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[sink]\nreceipt_timeout_ms = 250").unwrap();
        let config = ConfigLoader::default()
            .with_file(file.path())
            .with_env_source(HashMap::new())
            .load()
            .unwrap();
        assert_eq!(config.sink.receipt_timeout_ms, 250);
        assert_eq!(config.sink.heartbeat_ms, defaults::SINK_HEARTBEAT_MS);
    }

    #[test]
    fn test_missing_explicit_file() {
        let err = ConfigLoader::default()
            .with_file("/definitely/not/here/pbj.toml")
            .load()
            .unwrap_err();
        assert!(matches!(err, ConfigurationError::ConfigFileNotFound { .. }));
    }

    #[test]
    fn test_invalid_value_is_rejected() {
        let err = ConfigLoader::default()
            .with_env_source(env(&[("PBJ_BROKER__PORT", "0")]))
            .load()
            .unwrap_err();
        assert!(matches!(err, ConfigurationError::InvalidValue { .. }));
    }
}
