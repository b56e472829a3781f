// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Configuration loading and processing for ualink.
//!
//! # Loading Pipeline
//!
//! 1. Read the file and pick the format from its extension
//! 2. Expand `${VAR}` / `${VAR:default}` placeholders in the raw text
//! 3. Parse YAML (through the `config` crate), TOML or JSON
//! 4. Apply `UALINK_<SECTION>_<KEY>` environment overrides
//! 5. Resolve relative paths against the config file's directory
//! 6. Validate
//!
//! # Environment Variable Override
//!
//! ```text
//! UALINK_BROKER_URL=broker.example.com
//! UALINK_BROKER_PORT=1883
//! UALINK_PUBLISHER_STRATEGY=store_forward
//! UALINK_LOG_LEVEL=debug
//! ```

use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::de::DeserializeOwned;
use tracing::{debug, info};

use crate::error::{ConfigError, ConfigResult};
use crate::schema::{
    BrokerKind, LogFormat, LogLevel, PublisherStrategy, SecretValue, SourceBackend, UalinkConfig,
};

/// Default environment variable prefix.
pub const DEFAULT_ENV_PREFIX: &str = "UALINK";

// =============================================================================
// Environment Source
// =============================================================================

/// Where environment variables are read from.
#[derive(Debug, Clone, Default)]
pub enum EnvSource {
    /// The process environment.
    #[default]
    Process,
    /// A fixed map, used by tests and embedders.
    Map(HashMap<String, String>),
}

impl EnvSource {
    /// Creates a map source from key/value pairs.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        EnvSource::Map(pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }

    /// Looks up a variable.
    pub fn get(&self, name: &str) -> Option<String> {
        match self {
            EnvSource::Process => env::var(name).ok(),
            EnvSource::Map(map) => map.get(name).cloned(),
        }
    }
}

// =============================================================================
// ConfigLoader
// =============================================================================

/// Configuration loader for ualink.
///
/// # Examples
///
/// ```no_run
/// use ualink_config::loader::ConfigLoader;
///
/// let config = ConfigLoader::new().load("ualink.yaml").unwrap();
/// ```
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    /// Directory that relative `spill_dir`, `points_file` and `pki_dir` are joined onto.
    base_path: Option<PathBuf>,

    /// Prefix of override variables, without the trailing underscore.
    env_prefix: String,

    /// Whether to expand placeholders and apply overrides.
    resolve_env_vars: bool,

    /// Join relative paths onto the base directory.
    resolve_paths: bool,

    /// Whether to validate after loading.
    validate: bool,

    /// Environment lookup.
    env: EnvSource,
}

impl ConfigLoader {
    /// Creates a loader with `UALINK` overrides, placeholders, path resolution and validation on.
    pub fn new() -> Self {
        Self {
            base_path: None,
            env_prefix: DEFAULT_ENV_PREFIX.to_string(),
            resolve_env_vars: true,
            resolve_paths: true,
            validate: true,
            env: EnvSource::Process,
        }
    }

    /// Overrides the directory relative paths are resolved against.
    pub fn with_base_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.base_path = Some(path.into());
        self
    }

    /// Sets the override prefix, e.g. `PLANT` for `PLANT_BROKER_URL`.
    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    /// Toggles `${VAR}` placeholder expansion and `UALINK_*` overrides.
    pub fn with_env_vars(mut self, enabled: bool) -> Self {
        self.resolve_env_vars = enabled;
        self
    }

    /// Toggles joining relative paths onto the config file's directory.
    pub fn with_path_resolution(mut self, enabled: bool) -> Self {
        self.resolve_paths = enabled;
        self
    }

    /// Enables or disables validation. Callers that patch the result must
    /// call [`UalinkConfig::validate`] themselves.
    pub fn with_validation(mut self, enabled: bool) -> Self {
        self.validate = enabled;
        self
    }

    /// Replaces the environment lookup.
    pub fn with_env_source(mut self, env: EnvSource) -> Self {
        self.env = env;
        self
    }

    /// Reads, expands, deserializes, overrides, resolves and validates `path`.
    ///
    /// The format is chosen by extension: `.yaml`/`.yml`, `.toml` or `.json`.
    pub fn load(&self, path: impl AsRef<Path>) -> ConfigResult<UalinkConfig> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading configuration");

        let base_path = self.base_path.clone().unwrap_or_else(|| {
            path.parent()
                .map(|p| p.to_path_buf())
                .unwrap_or_else(|| PathBuf::from("."))
        });

        let content = self.read_file(path)?;
        let format = ConfigFormat::from_path(path)?;
        let mut config = self.parse_content(&content, format, path)?;

        if self.resolve_env_vars {
            self.apply_env_overrides(&mut config)?;
        }

        if self.resolve_paths {
            resolve_relative_paths(&mut config, &base_path);
        }

        if self.validate {
            config.validate()?;
        }

        info!(path = %path.display(), publisher = %config.gateway.publisher_name, "Configuration loaded");
        debug!(
            broker = %config.broker.kind,
            publisher = ?config.publisher.strategy,
            source = ?config.source.backend,
            "Configuration summary"
        );

        Ok(config)
    }

    /// Loads configuration from a string. Paths are left as written.
    pub fn load_from_str(&self, content: &str, format: ConfigFormat) -> ConfigResult<UalinkConfig> {
        let content = if self.resolve_env_vars {
            self.resolve_env_placeholders(content)?
        } else {
            content.to_string()
        };
        let mut config = parse_str(&content, format)?;

        if self.resolve_env_vars {
            self.apply_env_overrides(&mut config)?;
        }

        if self.validate {
            config.validate()?;
        }
        Ok(config)
    }

    fn read_file(&self, path: &Path) -> ConfigResult<String> {
        if !path.exists() {
            return Err(ConfigError::file_not_found(path));
        }
        fs::read_to_string(path).map_err(|e| ConfigError::io(path, e))
    }

    fn parse_content(
        &self,
        content: &str,
        format: ConfigFormat,
        path: &Path,
    ) -> ConfigResult<UalinkConfig> {
        let content = if self.resolve_env_vars {
            self.resolve_env_placeholders(content)?
        } else {
            content.to_string()
        };

        parse_str(&content, format).map_err(|e| match e {
            ConfigError::Serialization { message } => ConfigError::parse(path, message),
            other => other,
        })
    }

    /// Expands `${VAR_NAME}` and `${VAR_NAME:default}`.
    ///
    /// A variable without a default that is not set is an error. An
    /// unterminated `${` is kept as written.
    pub fn resolve_env_placeholders(&self, content: &str) -> ConfigResult<String> {
        let mut result = String::with_capacity(content.len());
        let mut chars = content.chars().peekable();

        while let Some(c) = chars.next() {
            if c != '$' || chars.peek() != Some(&'{') {
                result.push(c);
                continue;
            }
            chars.next();

            let mut var_content = String::new();
            let mut found_close = false;
            for c in chars.by_ref() {
                if c == '}' {
                    found_close = true;
                    break;
                }
                var_content.push(c);
            }

            if !found_close {
                result.push_str("${");
                result.push_str(&var_content);
                continue;
            }

            let (var_name, default_value) = match var_content.split_once(':') {
                Some((name, default)) => (name, Some(default)),
                None => (var_content.as_str(), None),
            };

            match (self.env.get(var_name), default_value) {
                (Some(value), _) => result.push_str(&value),
                (None, Some(default)) => result.push_str(default),
                (None, None) => return Err(ConfigError::env_var_not_found(var_name)),
            }
        }

        Ok(result)
    }

    fn var(&self, key: &str) -> Option<(String, String)> {
        let name = format!("{}_{}", self.env_prefix, key);
        self.env.get(&name).map(|value| (name, value))
    }

    /// Applies `<PREFIX>_<SECTION>_<KEY>` overrides.
    fn apply_env_overrides(&self, config: &mut UalinkConfig) -> ConfigResult<()> {
        // Gateway
        if let Some((_, value)) = self.var("GATEWAY_PUBLISHER_NAME") {
            config.gateway.publisher_name = value;
        }
        if let Some((_, value)) = self.var("GATEWAY_APPLICATION_URI") {
            config.gateway.application_uri = value;
        }

        // Broker
        if let Some((name, value)) = self.var("BROKER_KIND") {
            config.broker.kind = parse_broker_kind(&value)
                .ok_or_else(|| ConfigError::invalid_env_var(name, "expected mqtt, kafka or memory"))?;
        }
        if let Some((_, value)) = self.var("BROKER_URL") {
            config.broker.url = value;
        }
        if let Some((name, value)) = self.var("BROKER_PORT") {
            config.broker.port = parse_number(&name, &value)?;
        }
        if let Some((_, value)) = self.var("BROKER_CLIENT_NAME") {
            config.broker.client_name = value;
        }
        if let Some((_, value)) = self.var("BROKER_USERNAME") {
            config.broker.username = value;
        }
        if let Some((_, value)) = self.var("BROKER_PASSWORD") {
            config.broker.password = SecretValue::new(value);
        }
        if let Some((_, value)) = self.var("BROKER_USE_TLS") {
            config.broker.use_tls = parse_bool(&value);
        }
        if let Some((_, value)) = self.var("BROKER_MESSAGE_TOPIC") {
            config.broker.message_topic = value;
        }
        if let Some((_, value)) = self.var("BROKER_METADATA_TOPIC") {
            config.broker.metadata_topic = value;
        }
        if let Some((_, value)) = self.var("BROKER_COMMAND_TOPIC") {
            config.broker.command_topic = value;
        }
        if let Some((_, value)) = self.var("BROKER_RESPONSE_TOPIC") {
            config.broker.response_topic = value;
        }
        if let Some((name, value)) = self.var("BROKER_MESSAGE_SIZE") {
            config.broker.message_size = parse_number(&name, &value)?;
        }

        // Publisher
        if let Some((name, value)) = self.var("PUBLISHER_STRATEGY") {
            config.publisher.strategy = parse_strategy(&value)
                .ok_or_else(|| ConfigError::invalid_env_var(name, "expected direct or store_forward"))?;
        }
        if let Some((_, value)) = self.var("PUBLISHER_SPILL_DIR") {
            config.publisher.spill_dir = PathBuf::from(value);
        }
        if let Some((name, value)) = self.var("PUBLISHER_DRAIN_BATCH") {
            config.publisher.drain_batch = parse_number(&name, &value)?;
        }

        // Batching
        if let Some((name, value)) = self.var("BATCHING_SEND_INTERVAL_SECS") {
            config.batching.send_interval_secs = parse_number(&name, &value)?;
        }
        if let Some((name, value)) = self.var("BATCHING_QUEUE_CAPACITY") {
            config.batching.queue_capacity = parse_number(&name, &value)?;
        }

        // Source
        if let Some((name, value)) = self.var("SOURCE_BACKEND") {
            config.source.backend = parse_backend(&value)
                .ok_or_else(|| ConfigError::invalid_env_var(name, "expected simulated or opcua"))?;
        }
        if let Some((_, value)) = self.var("SOURCE_TRUST_SERVER_CERTS") {
            config.source.trust_server_certs = parse_bool(&value);
        }

        // Persistence
        if let Some((_, value)) = self.var("PERSISTENCE_POINTS_FILE") {
            config.persistence.points_file = PathBuf::from(value);
        }
        if let Some((_, value)) = self.var("PERSISTENCE_AUTO_LOAD") {
            config.persistence.auto_load = parse_bool(&value);
        }

        // Diagnostics
        if let Some((name, value)) = self.var("DIAGNOSTICS_INTERVAL_SECS") {
            config.diagnostics.interval_secs = parse_number(&name, &value)?;
        }
        if let Some((_, value)) = self.var("DIAGNOSTICS_SEND_STATUS") {
            config.diagnostics.send_status = parse_bool(&value);
        }
        if let Some((_, value)) = self.var("DIAGNOSTICS_SEND_METADATA") {
            config.diagnostics.send_metadata = parse_bool(&value);
        }

        // Logging
        if let Some((_, value)) = self.var("LOG_LEVEL") {
            if let Some(level) = parse_log_level(&value) {
                config.logging.level = level;
            }
        }
        if let Some((_, value)) = self.var("LOG_FORMAT") {
            if let Some(format) = parse_log_format(&value) {
                config.logging.format = format;
            }
        }

        Ok(())
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn resolve_relative_paths(config: &mut UalinkConfig, base_path: &Path) {
    for path in [
        &mut config.publisher.spill_dir,
        &mut config.persistence.points_file,
        &mut config.source.pki_dir,
    ] {
        if path.is_relative() {
            *path = base_path.join(&*path);
        }
    }
}

// =============================================================================
// ConfigFormat
// =============================================================================

/// Configuration file formats understood by the loader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    /// YAML format.
    Yaml,
    /// TOML format.
    Toml,
    /// JSON format.
    Json,
}

impl ConfigFormat {
    /// Picks the format from the file extension.
    pub fn from_path(path: &Path) -> ConfigResult<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase());

        match ext.as_deref() {
            Some("yaml") | Some("yml") => Ok(ConfigFormat::Yaml),
            Some("toml") => Ok(ConfigFormat::Toml),
            Some("json") => Ok(ConfigFormat::Json),
            Some(other) => Err(ConfigError::unsupported_format(other)),
            None => Err(ConfigError::unsupported_format("(no extension)")),
        }
    }

    /// Canonical extension.
    pub fn extension(&self) -> &'static str {
        match self {
            ConfigFormat::Yaml => "yaml",
            ConfigFormat::Toml => "toml",
            ConfigFormat::Json => "json",
        }
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

fn parse_str(content: &str, format: ConfigFormat) -> ConfigResult<UalinkConfig> {
    match format {
        ConfigFormat::Yaml => yaml_parse(content),
        ConfigFormat::Toml => {
            toml::from_str(content).map_err(|e| ConfigError::serialization(e.to_string()))
        }
        ConfigFormat::Json => {
            serde_json::from_str(content).map_err(|e| ConfigError::serialization(e.to_string()))
        }
    }
}

/// YAML goes through the `config` crate.
fn yaml_parse<T: DeserializeOwned>(content: &str) -> ConfigResult<T> {
    let config = config::Config::builder()
        .add_source(config::File::from_str(content, config::FileFormat::Yaml))
        .build()
        .map_err(|e| ConfigError::serialization(e.to_string()))?;

    config
        .try_deserialize()
        .map_err(|e| ConfigError::serialization(e.to_string()))
}

fn parse_number<T: FromStr>(name: &str, value: &str) -> ConfigResult<T> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::invalid_env_var(name, "expected a number"))
}

/// Accepts the usual truthy spellings for boolean overrides.
pub fn parse_bool(value: &str) -> bool {
    matches!(
        value.to_lowercase().as_str(),
        "true" | "1" | "yes" | "on" | "enabled"
    )
}

/// Maps an override value onto a [`LogLevel`].
pub fn parse_log_level(value: &str) -> Option<LogLevel> {
    match value.to_lowercase().as_str() {
        "trace" => Some(LogLevel::Trace),
        "debug" => Some(LogLevel::Debug),
        "info" => Some(LogLevel::Info),
        "warn" | "warning" => Some(LogLevel::Warn),
        "error" => Some(LogLevel::Error),
        _ => None,
    }
}

/// Parses a log format string.
pub fn parse_log_format(value: &str) -> Option<LogFormat> {
    match value.to_lowercase().as_str() {
        "text" | "pretty" => Some(LogFormat::Text),
        "compact" => Some(LogFormat::Compact),
        "json" => Some(LogFormat::Json),
        _ => None,
    }
}

fn parse_broker_kind(value: &str) -> Option<BrokerKind> {
    match value.to_lowercase().as_str() {
        "mqtt" => Some(BrokerKind::Mqtt),
        "kafka" => Some(BrokerKind::Kafka),
        "memory" => Some(BrokerKind::Memory),
        _ => None,
    }
}

fn parse_strategy(value: &str) -> Option<PublisherStrategy> {
    match value.to_lowercase().as_str() {
        "direct" => Some(PublisherStrategy::Direct),
        "store_forward" | "store-forward" => Some(PublisherStrategy::StoreForward),
        _ => None,
    }
}

fn parse_backend(value: &str) -> Option<SourceBackend> {
    match value.to_lowercase().as_str() {
        "simulated" => Some(SourceBackend::Simulated),
        "opcua" => Some(SourceBackend::Opcua),
        _ => None,
    }
}

// =============================================================================
// Convenience Functions
// =============================================================================

/// Loads, overrides and validates a gateway configuration file.
pub fn load_config(path: impl AsRef<Path>) -> ConfigResult<UalinkConfig> {
    ConfigLoader::new().load(path)
}

/// Same pipeline as [`load`](Self::load) for in-memory text; paths resolve against the base path.
pub fn load_config_str(content: &str, format: ConfigFormat) -> ConfigResult<UalinkConfig> {
    ConfigLoader::new().load_from_str(content, format)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Duration;
    use tempfile::NamedTempFile;

    fn isolated() -> ConfigLoader {
        ConfigLoader::new().with_env_source(EnvSource::from_pairs(Vec::<(String, String)>::new()))
    }

    const YAML: &str = r#"
gateway:
  publisher_name: line-1
broker:
  kind: mqtt
  url: broker.local
  port: 1883
  use_tls: false
  message_topic: plant/data
  command_topic: plant/cmd/#
  response_topic: plant/rsp
publisher:
  strategy: store_forward
  spill_dir: spill
batching:
  send_interval_secs: 0
source:
  suppressed_status_codes: [2150891520]
logging:
  level: debug
  format: json
"#;

    #[test]
    fn test_load_yaml() {
        let mut file = NamedTempFile::with_suffix(".yaml").unwrap();
        file.write_all(YAML.as_bytes()).unwrap();

        let config = isolated().load(file.path()).unwrap();
        assert_eq!(config.gateway.publisher_name, "line-1");
        assert_eq!(config.broker.port, 1883);
        assert!(!config.broker.use_tls);
        assert_eq!(config.publisher.strategy, PublisherStrategy::StoreForward);
        assert_eq!(config.source.suppressed_status_codes, vec![0x8034_0000]);
        assert_eq!(config.logging.level, LogLevel::Debug);
        assert_eq!(config.logging.format, LogFormat::Json);

        let dir = file.path().parent().unwrap();
        assert_eq!(config.publisher.spill_dir, dir.join("spill"));
        assert_eq!(config.persistence.points_file, dir.join("settings/persistency.json"));

        assert!(config.to_settings().immediate_mode());
    }

    #[test]
    fn test_load_toml_and_json() {
        let toml = "[broker]\nkind = \"memory\"\n\n[batching]\nqueue_capacity = 5\n";
        let config = isolated().load_from_str(toml, ConfigFormat::Toml).unwrap();
        assert_eq!(config.broker.kind, BrokerKind::Memory);
        assert_eq!(config.batching.queue_capacity, 5);

        let json = r#"{"broker":{"kind":"memory"},"diagnostics":{"interval_secs":5}}"#;
        let config = isolated().load_from_str(json, ConfigFormat::Json).unwrap();
        assert_eq!(config.to_settings().diagnostics_interval, Duration::from_secs(5));
    }

    #[test]
    fn test_config_format_from_path() {
        assert_eq!(ConfigFormat::from_path(Path::new("a.yml")).unwrap(), ConfigFormat::Yaml);
        assert_eq!(ConfigFormat::from_path(Path::new("a.TOML")).unwrap(), ConfigFormat::Toml);
        assert_eq!(ConfigFormat::from_path(Path::new("a.json")).unwrap(), ConfigFormat::Json);
        assert!(ConfigFormat::from_path(Path::new("a.ini")).is_err());
        assert!(ConfigFormat::from_path(Path::new("config")).is_err());
    }

    #[test]
    fn test_env_placeholder_resolution() {
        let loader = ConfigLoader::new()
            .with_env_source(EnvSource::from_pairs([("BROKER_HOST", "mq.plant")]));

        let resolved = loader
            .resolve_env_placeholders("url: ${BROKER_HOST}\nport: ${BROKER_PORT:1883}")
            .unwrap();
        assert_eq!(resolved, "url: mq.plant\nport: 1883");

        let err = loader.resolve_env_placeholders("url: ${MISSING}").unwrap_err();
        assert!(matches!(err, ConfigError::EnvVarNotFound { ref name } if name == "MISSING"));

        let kept = loader.resolve_env_placeholders("text ${open").unwrap();
        assert_eq!(kept, "text ${open");
    }

    #[test]
    fn test_env_overrides() {
        let loader = ConfigLoader::new().with_env_source(EnvSource::from_pairs([
            ("UALINK_BROKER_KIND", "memory"),
            ("UALINK_BROKER_PORT", "1884"),
            ("UALINK_BROKER_PASSWORD", "s3cret"),
            ("UALINK_PUBLISHER_STRATEGY", "store-forward"),
            ("UALINK_PERSISTENCE_AUTO_LOAD", "yes"),
            ("UALINK_LOG_LEVEL", "warning"),
        ]));

        let config = loader.load_from_str("", ConfigFormat::Yaml).unwrap();
        assert_eq!(config.broker.kind, BrokerKind::Memory);
        assert_eq!(config.broker.port, 1884);
        assert_eq!(config.broker.password.expose(), "s3cret");
        assert_eq!(config.publisher.strategy, PublisherStrategy::StoreForward);
        assert!(config.persistence.auto_load);
        assert_eq!(config.logging.level, LogLevel::Warn);
    }

    #[test]
    fn test_invalid_env_override() {
        let loader = ConfigLoader::new().with_env_source(EnvSource::from_pairs([
            ("UALINK_BROKER_KIND", "memory"),
            ("UALINK_BROKER_PORT", "not-a-port"),
        ]));
        let err = loader.load_from_str("", ConfigFormat::Yaml).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnvVar { ref name, .. } if name == "UALINK_BROKER_PORT"));
    }

    #[test]
    fn test_unknown_field_rejected() {
        let err = isolated()
            .load_from_str("broker:\n  kind: memory\n  colour: blue\n", ConfigFormat::Yaml)
            .unwrap_err();
        assert!(matches!(err, ConfigError::Serialization { .. }));
    }

    #[test]
    fn test_validation_runs() {
        let err = isolated()
            .load_from_str("broker:\n  kind: memory\npublisher:\n  drain_batch: 0\n", ConfigFormat::Yaml)
            .unwrap_err();
        assert!(matches!(err, ConfigError::Validation { ref field, .. } if field == "publisher.drain_batch"));
    }

    #[test]
    fn test_validation_can_be_deferred() {
        let config = isolated()
            .with_validation(false)
            .load_from_str("", ConfigFormat::Yaml)
            .unwrap();
        assert!(config.broker.url.is_empty());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_bool() {
        assert!(parse_bool("true"));
        assert!(parse_bool("ON"));
        assert!(parse_bool("enabled"));
        assert!(!parse_bool("false"));
        assert!(!parse_bool("0"));
    }

    #[test]
    fn test_parse_log_level_and_format() {
        assert_eq!(parse_log_level("INFO"), Some(LogLevel::Info));
        assert_eq!(parse_log_level("nope"), None);
        assert_eq!(parse_log_format("compact"), Some(LogFormat::Compact));
        assert_eq!(parse_log_format("pretty"), Some(LogFormat::Text));
    }

    #[test]
    fn test_file_not_found() {
        let err = isolated().load("/nonexistent/ualink.yaml").unwrap_err();
        assert!(err.is_not_found());
    }
}
