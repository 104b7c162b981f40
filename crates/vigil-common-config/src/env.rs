//! Environment variable handling.

use crate::types::VigilConfig;
use std::env;
use thiserror::Error;

/// Environment variable errors.
#[derive(Debug, Error)]
pub enum EnvError {
    #[error("required environment variable not set: {var}")]
    NotSet { var: String },

    #[error("invalid value for {var}: {message}")]
    InvalidValue { var: String, message: String },
}

/// Environment variable names.
pub mod vars {
    // Configuration
    pub const VIGIL_CONFIG_PATH: &str = "VIGIL_CONFIG_PATH";
    pub const VIGIL_DATA_DIR: &str = "VIGIL_DATA_DIR";
    pub const VIGIL_SOCKET_PATH: &str = "VIGIL_SOCKET_PATH";
    pub const VIGIL_ENV: &str = "VIGIL_ENV";

    // Logging
    pub const VIGIL_LOG_LEVEL: &str = "VIGIL_LOG_LEVEL";
    pub const RUST_LOG: &str = "RUST_LOG";
}

/// Environment configuration.
pub struct Environment {
    _guard: (),
}

impl Environment {
    /// Initialize environment from .env files.
    ///
    /// Later files override earlier ones; missing files are ignored.
    pub fn init() -> Self {
        let _ = dotenvy::from_filename(".env");
        let _ = dotenvy::from_filename(".env.local");

        if let Ok(env) = env::var(vars::VIGIL_ENV) {
            let _ = dotenvy::from_filename(format!(".env.{}", env));
        }

        Self { _guard: () }
    }

    /// Get a required string variable.
    pub fn require(var: &str) -> Result<String, EnvError> {
        env::var(var).map_err(|_| EnvError::NotSet { var: var.to_string() })
    }

    /// Get an optional, non-empty string variable.
    pub fn get(var: &str) -> Option<String> {
        env::var(var).ok().filter(|v| !v.is_empty())
    }

    /// Get a boolean variable.
    pub fn get_bool(var: &str) -> Option<bool> {
        env::var(var)
            .ok()
            .map(|v| matches!(v.to_lowercase().as_str(), "true" | "1" | "yes"))
    }

    /// Get an integer variable.
    pub fn get_int<T: std::str::FromStr>(var: &str) -> Result<Option<T>, EnvError> {
        match env::var(var) {
            Ok(v) => v.parse().map(Some).map_err(|_| EnvError::InvalidValue {
                var: var.to_string(),
                message: format!("expected an integer, got {v:?}"),
            }),
            Err(_) => Ok(None),
        }
    }
}

/// Apply `VIGIL_DATA_DIR` and `VIGIL_SOCKET_PATH` on top of a loaded config.
pub fn apply_overrides(config: &mut VigilConfig) {
    if let Some(dir) = Environment::get(vars::VIGIL_DATA_DIR) {
        config.bus.data_dir = dir;
    }
    if let Some(path) = Environment::get(vars::VIGIL_SOCKET_PATH) {
        config.ingress.socket_path = path;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_int_parses_and_rejects() {
        env::set_var("VIGIL_TEST_INT_OK", "42");
        env::set_var("VIGIL_TEST_INT_BAD", "forty-two");

        assert_eq!(Environment::get_int::<u32>("VIGIL_TEST_INT_OK").unwrap(), Some(42));
        assert!(Environment::get_int::<u32>("VIGIL_TEST_INT_BAD").is_err());
        assert_eq!(Environment::get_int::<u32>("VIGIL_TEST_INT_UNSET").unwrap(), None);

        env::remove_var("VIGIL_TEST_INT_OK");
        env::remove_var("VIGIL_TEST_INT_BAD");
    }

    #[test]
    fn test_get_bool() {
        env::set_var("VIGIL_TEST_BOOL", "Yes");
        assert_eq!(Environment::get_bool("VIGIL_TEST_BOOL"), Some(true));
        env::set_var("VIGIL_TEST_BOOL", "off");
        assert_eq!(Environment::get_bool("VIGIL_TEST_BOOL"), Some(false));
        env::remove_var("VIGIL_TEST_BOOL");
        assert_eq!(Environment::get_bool("VIGIL_TEST_BOOL"), None);
    }

    #[test]
    fn test_require_missing() {
        assert!(matches!(
            Environment::require("VIGIL_TEST_DEFINITELY_UNSET"),
            Err(EnvError::NotSet { .. })
        ));
    }
}
