//! Loader configuration from environment variables or TOML.
//!
//! All values are read from `MODELPACK_*` environment variables with
//! sensible defaults. Invalid values fall back to defaults without crashing.
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |---|---|---|
//! | `MODELPACK_MODEL_NAME` | model | Model to select inside a package |
//! | `MODELPACK_NUM_RUNNERS` | 1 | Runners per loaded model |
//! | `MODELPACK_MAX_RUNNERS` | max(64, 4 x CPUs) | Ceiling for requested runners |
//! | `MODELPACK_DEVICE_INDEX` | -1 | Device ordinal, negative for host |
//! | `MODELPACK_SINGLE_THREADED` | false | Serialize all calls on one runner |
//! | `MODELPACK_VERIFY_CONSTANTS` | true | Check constant SHA-256 digests |
//! | `MODELPACK_LOG_LEVEL` | info | Tracing filter directive |
//! | `MODELPACK_LOG_FORMAT` | json | `json` or `pretty` |

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::engine::HOST_DEVICE_INDEX;
use crate::telemetry::LogConfig;

pub const DEFAULT_MODEL_NAME: &str = "model";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config: {0}")]
    Parse(String),
}

/// Settings applied when opening packages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    pub model_name: String,
    pub single_threaded: bool,
    pub num_runners: usize,
    pub max_runners: usize,
    pub device_index: i8,
    pub verify_constants: bool,
    pub log: LogConfig,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            model_name: DEFAULT_MODEL_NAME.to_string(),
            single_threaded: false,
            num_runners: 1,
            max_runners: default_max_runners(),
            device_index: HOST_DEVICE_INDEX,
            verify_constants: true,
            log: LogConfig::default(),
        }
    }
}

impl LoaderConfig {
    /// Parse settings from TOML. Missing keys take their defaults.
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(source).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let source = std::fs::read_to_string(path)?;
        Self::from_toml_str(&source)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.model_name.is_empty() {
            return Err(ConfigError::Parse("model_name cannot be empty".into()));
        }
        if self.max_runners == 0 {
            return Err(ConfigError::Parse("max_runners must be at least 1".into()));
        }
        Ok(())
    }
}

/// Runner ceiling: 4 per logical CPU, never below 64.
pub fn default_max_runners() -> usize {
    (num_cpus::get() * 4).max(64)
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(val) => val.trim().parse::<T>().unwrap_or(default),
        Err(_) => default,
    }
}

fn parse_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(val) => match val.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            _ => default,
        },
        Err(_) => default,
    }
}

/// Load configuration from environment variables.
///
/// Missing or invalid values fall back to defaults without panicking.
pub fn load() -> LoaderConfig {
    let defaults = LoaderConfig::default();

    let model_name = std::env::var("MODELPACK_MODEL_NAME")
        .ok()
        .filter(|name| !name.trim().is_empty())
        .unwrap_or(defaults.model_name);
    let num_runners = parse_env("MODELPACK_NUM_RUNNERS", defaults.num_runners).max(1);
    let max_runners = parse_env("MODELPACK_MAX_RUNNERS", defaults.max_runners).max(1);
    let device_index = parse_env("MODELPACK_DEVICE_INDEX", defaults.device_index);
    let single_threaded = parse_bool("MODELPACK_SINGLE_THREADED", defaults.single_threaded);
    let verify_constants = parse_bool("MODELPACK_VERIFY_CONSTANTS", defaults.verify_constants);

    let level = std::env::var("MODELPACK_LOG_LEVEL")
        .ok()
        .filter(|level| !level.trim().is_empty())
        .unwrap_or(defaults.log.level);
    let format = std::env::var("MODELPACK_LOG_FORMAT")
        .ok()
        .and_then(|format| format.parse().ok())
        .unwrap_or(defaults.log.format);

    LoaderConfig {
        model_name,
        single_threaded,
        num_runners,
        max_runners,
        device_index,
        verify_constants,
        log: LogConfig {
            format,
            level,
            output_path: None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::LogFormat;
    use std::sync::Mutex;

    // Serialize env-mutating tests to avoid cross-test pollution.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    const ENV_KEYS: &[&str] = &[
        "MODELPACK_MODEL_NAME",
        "MODELPACK_NUM_RUNNERS",
        "MODELPACK_MAX_RUNNERS",
        "MODELPACK_DEVICE_INDEX",
        "MODELPACK_SINGLE_THREADED",
        "MODELPACK_VERIFY_CONSTANTS",
        "MODELPACK_LOG_LEVEL",
        "MODELPACK_LOG_FORMAT",
    ];

    fn clear_env_vars() {
        for k in ENV_KEYS {
            std::env::remove_var(k);
        }
    }

    #[test]
    fn test_defaults_are_sensible() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env_vars();
        let cfg = load();
        assert_eq!(cfg.model_name, "model");
        assert_eq!(cfg.num_runners, 1);
        assert!(cfg.max_runners >= 64);
        assert_eq!(cfg.device_index, -1);
        assert!(!cfg.single_threaded);
        assert!(cfg.verify_constants);
        assert_eq!(cfg.log.level, "info");
        assert_eq!(cfg.log.format, LogFormat::Json);
        assert_eq!(cfg, LoaderConfig::default());
    }

    #[test]
    fn test_env_vars_override_defaults() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env_vars();
        std::env::set_var("MODELPACK_MODEL_NAME", "forward");
        std::env::set_var("MODELPACK_NUM_RUNNERS", "4");
        std::env::set_var("MODELPACK_DEVICE_INDEX", "0");
        std::env::set_var("MODELPACK_SINGLE_THREADED", "yes");
        std::env::set_var("MODELPACK_VERIFY_CONSTANTS", "off");
        std::env::set_var("MODELPACK_LOG_FORMAT", "pretty");
        let cfg = load();
        assert_eq!(cfg.model_name, "forward");
        assert_eq!(cfg.num_runners, 4);
        assert_eq!(cfg.device_index, 0);
        assert!(cfg.single_threaded);
        assert!(!cfg.verify_constants);
        assert_eq!(cfg.log.format, LogFormat::Pretty);
        clear_env_vars();
    }

    #[test]
    fn test_invalid_env_falls_back_to_default() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env_vars();
        std::env::set_var("MODELPACK_NUM_RUNNERS", "many");
        std::env::set_var("MODELPACK_DEVICE_INDEX", "300");
        std::env::set_var("MODELPACK_SINGLE_THREADED", "maybe");
        std::env::set_var("MODELPACK_LOG_FORMAT", "xml");
        let cfg = load();
        assert_eq!(cfg.num_runners, 1);
        assert_eq!(cfg.device_index, -1);
        assert!(!cfg.single_threaded);
        assert_eq!(cfg.log.format, LogFormat::Json);
        clear_env_vars();
    }

    #[test]
    fn test_runner_floor() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env_vars();
        std::env::set_var("MODELPACK_NUM_RUNNERS", "0");
        std::env::set_var("MODELPACK_MAX_RUNNERS", "0");
        let cfg = load();
        assert_eq!(cfg.num_runners, 1);
        assert_eq!(cfg.max_runners, 1);
        clear_env_vars();
    }

    #[test]
    fn test_toml_config() {
        let cfg = LoaderConfig::from_toml_str(
            r#"
            model_name = "forward"
            num_runners = 4
            device_index = 0

            [log]
            format = "pretty"
            level = "modelpack_core=debug"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.model_name, "forward");
        assert_eq!(cfg.num_runners, 4);
        assert_eq!(cfg.device_index, 0);
        assert!(cfg.verify_constants);
        assert_eq!(cfg.log.format, LogFormat::Pretty);
        assert_eq!(cfg.log.level, "modelpack_core=debug");
    }

    #[test]
    fn test_toml_rejects_bad_values() {
        assert!(LoaderConfig::from_toml_str("num_runners = \"four\"").is_err());
        assert!(LoaderConfig::from_toml_str("max_runners = 0").is_err());
        assert!(LoaderConfig::from_toml_str("model_name = \"\"").is_err());
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("modelpack.toml");
        std::fs::write(&path, "single_threaded = true\n").unwrap();
        assert!(LoaderConfig::from_file(&path).unwrap().single_threaded);
        assert!(matches!(
            LoaderConfig::from_file(dir.path().join("absent.toml")),
            Err(ConfigError::Io(_))
        ));
    }
}
