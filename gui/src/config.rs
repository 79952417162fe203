//! Configuration module for the stm32pio GUI backend.
//!
//! This module handles parsing configuration from environment variables.
//!
//! # Environment Variables
//!
//! | Variable | Required | Default | Description |
//! |----------|----------|---------|-------------|
//! | `STM32PIO_SETTINGS_PATH` | No | `<config dir>/stm32pio/settings.json` | Settings file holding the projects list |
//! | `STM32PIO_VERBOSE` | No | stored `verbose` setting | Force verbose logging (`1`, `0`, `true`, `false`) |
//!
//! # Example
//!
//! ```no_run
//! use stm32pio_gui::config::Config;
//!
//! let config = Config::from_env().expect("Failed to load configuration");
//! println!("Settings file: {}", config.settings_path.display());
//! ```

use std::env;
use std::path::PathBuf;

use directories::BaseDirs;
use thiserror::Error;

/// Application directory name inside the platform configuration directory.
const APP_DIR: &str = "stm32pio";

/// Default settings file name.
const SETTINGS_FILE_NAME: &str = "settings.json";

/// Errors that can occur during configuration parsing.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Environment variable has an invalid value.
    #[error("invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Failed to determine the platform configuration directory.
    #[error("failed to determine configuration directory")]
    NoConfigDirectory,
}

/// Configuration for the GUI backend.
#[derive(Debug, Clone)]
pub struct Config {
    /// Path of the JSON settings file.
    pub settings_path: PathBuf,

    /// Verbose logging override. When `None`, the persisted `verbose`
    /// setting decides.
    pub verbose: Option<bool>,
}

impl Config {
    /// Creates a new `Config` by parsing environment variables.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if:
    /// - `STM32PIO_VERBOSE` is set but is not a recognized boolean
    /// - `STM32PIO_SETTINGS_PATH` is unset and the configuration directory
    ///   cannot be determined
    pub fn from_env() -> Result<Self, ConfigError> {
        let settings_path = match env::var("STM32PIO_SETTINGS_PATH") {
            Ok(path) if !path.trim().is_empty() => PathBuf::from(path),
            _ => default_settings_path()?,
        };

        let verbose = match env::var("STM32PIO_VERBOSE") {
            Ok(val) => Some(parse_bool(&val).ok_or_else(|| ConfigError::InvalidValue {
                key: "STM32PIO_VERBOSE".to_string(),
                message: format!("expected one of 1, 0, true, false, got '{val}'"),
            })?),
            Err(_) => None,
        };

        Ok(Self {
            settings_path,
            verbose,
        })
    }
}

/// Returns `<config dir>/stm32pio/settings.json` for the current user.
pub fn default_settings_path() -> Result<PathBuf, ConfigError> {
    let base_dirs = BaseDirs::new().ok_or(ConfigError::NoConfigDirectory)?;
    Ok(base_dirs
        .config_dir()
        .join(APP_DIR)
        .join(SETTINGS_FILE_NAME))
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
