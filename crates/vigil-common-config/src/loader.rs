//! Configuration file loading and parsing.

use crate::env::apply_overrides;
use crate::types::VigilConfig;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use thiserror::Error;

/// Default configuration file name.
pub const CONFIG_FILE_NAME: &str = "vigil.yaml";

/// Config loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {path}")]
    NotFound { path: PathBuf },

    #[error("failed to read config: {source}")]
    ReadError {
        #[from]
        source: std::io::Error,
    },

    #[error("invalid YAML at line {}: {message}", line.map(|l| l.to_string()).unwrap_or_else(|| "unknown".to_string()))]
    ParseError { line: Option<usize>, message: String },

    #[error("validation error: {message}")]
    ValidationError { message: String },

    #[error("environment variable not found: {var}")]
    EnvVarNotFound { var: String },
}

/// Configuration loader.
pub struct ConfigLoader {
    path: PathBuf,
}

impl ConfigLoader {
    /// Create a loader for an explicit config file.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Create a loader for `vigil.yaml` inside a directory.
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        Self::new(dir.as_ref().join(CONFIG_FILE_NAME))
    }

    /// The file this loader reads.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load configuration, falling back to defaults when the file is absent.
    ///
    /// Environment overrides are applied after parsing and before validation.
    pub fn load(&self) -> Result<VigilConfig, ConfigError> {
        let mut config = if self.path.exists() {
            self.parse_file()?
        } else {
            VigilConfig::default()
        };

        apply_overrides(&mut config);
        validate(&config)?;
        Ok(config)
    }

    /// Load configuration, failing when the file is absent.
    pub fn load_required(&self) -> Result<VigilConfig, ConfigError> {
        if !self.path.exists() {
            return Err(ConfigError::NotFound {
                path: self.path.clone(),
            });
        }
        self.load()
    }

    fn parse_file(&self) -> Result<VigilConfig, ConfigError> {
        let contents = std::fs::read_to_string(&self.path)?;
        let expanded = expand_env_vars(&contents)?;

        serde_yaml::from_str(&expanded).map_err(|e| ConfigError::ParseError {
            line: e.location().map(|l| l.line()),
            message: e.to_string(),
        })
    }

    /// Save configuration to file.
    pub fn save(&self, config: &VigilConfig) -> Result<(), ConfigError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let yaml = serde_yaml::to_string(config).map_err(|e| ConfigError::ParseError {
            line: None,
            message: e.to_string(),
        })?;

        std::fs::write(&self.path, yaml)?;
        Ok(())
    }
}

fn env_var_pattern() -> &'static regex::Regex {
    static PATTERN: OnceLock<regex::Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        regex::Regex::new(r"\$\{([^}:]+)(?::-([^}]*))?\}").expect("static pattern compiles")
    })
}

/// Expand environment variables in the form `${VAR}` or `${VAR:-default}`.
pub fn expand_env_vars(content: &str) -> Result<String, ConfigError> {
    let mut result = content.to_string();

    for cap in env_var_pattern().captures_iter(content) {
        let full_match = &cap[0];
        let var_name = &cap[1];
        let default = cap.get(2).map(|m| m.as_str());

        let value = match std::env::var(var_name) {
            Ok(v) => v,
            Err(_) => match default {
                Some(d) => d.to_string(),
                None => {
                    return Err(ConfigError::EnvVarNotFound {
                        var: var_name.to_string(),
                    })
                }
            },
        };

        result = result.replace(full_match, &value);
    }

    Ok(result)
}

fn invalid(message: &str) -> ConfigError {
    ConfigError::ValidationError {
        message: message.to_string(),
    }
}

/// Validate configuration values.
pub fn validate(config: &VigilConfig) -> Result<(), ConfigError> {
    if config.bus.queue_capacity == 0 {
        return Err(invalid("bus.queue_capacity must be greater than 0"));
    }
    if config.dedup.enabled && config.dedup.window_ms == 0 {
        return Err(invalid("dedup.window_ms must be greater than 0 when dedup is enabled"));
    }
    if config.batch.max_batch_size == 0 {
        return Err(invalid("batch.max_batch_size must be greater than 0"));
    }
    if config.batch.max_batch_age_ms == 0 {
        return Err(invalid("batch.max_batch_age_ms must be greater than 0"));
    }
    if config.batch.max_in_flight == 0 {
        return Err(invalid("batch.max_in_flight must be greater than 0"));
    }
    if config.batch.sink_queue == 0 {
        return Err(invalid("batch.sink_queue must be greater than 0"));
    }
    if config.overflow.replay_interval_ms == 0 {
        return Err(invalid("overflow.replay_interval_ms must be greater than 0"));
    }
    if config.ingress.enabled && config.ingress.socket_path.trim().is_empty() {
        return Err(invalid("ingress.socket_path must not be empty"));
    }
    if config.ingress.max_message_bytes == 0 {
        return Err(invalid("ingress.max_message_bytes must be greater than 0"));
    }
    if config.outputs.local.enabled && config.outputs.local.max_file_size == 0 {
        return Err(invalid("outputs.local.max_file_size must be greater than 0"));
    }
    if config.outputs.broadcast.enabled && config.outputs.broadcast.subscriber_queue == 0 {
        return Err(invalid("outputs.broadcast.subscriber_queue must be greater than 0"));
    }
    if config.outputs.forwarder.enabled {
        if config.outputs.forwarder.url.trim().is_empty() {
            return Err(invalid("outputs.forwarder.url is required when the forwarder is enabled"));
        }
        if config.outputs.forwarder.batch_size == 0 {
            return Err(invalid("outputs.forwarder.batch_size must be greater than 0"));
        }
    }
    Ok(())
}
