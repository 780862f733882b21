//! Configuration module for Cinnabar
//!
//! Provides the subset of server configuration the scripting subsystem
//! consumes, plus a parser for the Redis-compatible `key value` file format.

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

/// Main configuration structure for Cinnabar
#[derive(Debug, Clone)]
pub struct Config {
    /// Number of databases
    pub databases: usize,

    /// Maximum script wall-clock budget in milliseconds before the
    /// slow-script path engages; 0 disables the budget. Kill requests are
    /// observed either way.
    pub lua_time_limit: u64,

    /// Log level
    pub log_level: LogLevel,
}

/// Log level configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Debug level - most verbose
    Debug,

    /// Verbose level
    Verbose,

    /// Notice level - default
    Notice,

    /// Warning level
    Warning,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            databases: 16,
            lua_time_limit: 5000,
            log_level: LogLevel::Notice,
        }
    }
}

/// Error type for configuration parsing
#[derive(Debug, thiserror::Error)]
pub enum ConfigParseError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Invalid line format
    #[error("Invalid line format at line {0}: {1}")]
    Format(usize, String),

    /// Invalid parameter value
    #[error("Invalid value for parameter '{0}' at line {1}: {2}")]
    Value(String, usize, String),
}

impl Config {
    /// Parse a Redis-compatible configuration file. Unknown parameters are
    /// ignored since the scripting subsystem shares its file with the rest
    /// of the server.
    pub fn from_file(path: &Path) -> Result<Config, ConfigParseError> {
        let file = File::open(path).map_err(ConfigParseError::Io)?;
        let reader = BufReader::new(file);
        let mut config = Config::default();

        for (line_num, line_result) in reader.lines().enumerate() {
            let line = line_result?;
            let line = line.trim();

            // Skip empty lines and comments
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let mut parts = line.splitn(2, char::is_whitespace);
            let key = parts.next().unwrap_or("").to_lowercase();
            let value = match parts.next() {
                Some(v) => v.trim(),
                None => {
                    return Err(ConfigParseError::Format(line_num + 1, line.to_string()));
                }
            };

            match key.as_str() {
                "databases" => {
                    config.databases = value.parse().map_err(|_| {
                        ConfigParseError::Value(key.clone(), line_num + 1, value.to_string())
                    })?;
                }
                "lua-time-limit" => {
                    config.lua_time_limit = value.parse().map_err(|_| {
                        ConfigParseError::Value(key.clone(), line_num + 1, value.to_string())
                    })?;
                }
                "loglevel" => {
                    config.log_level = match value {
                        "debug" => LogLevel::Debug,
                        "verbose" => LogLevel::Verbose,
                        "notice" => LogLevel::Notice,
                        "warning" => LogLevel::Warning,
                        _ => {
                            return Err(ConfigParseError::Value(
                                key.clone(),
                                line_num + 1,
                                value.to_string(),
                            ));
                        }
                    };
                }
                _ => {} // not ours
            }
        }

        Ok(config)
    }
}
