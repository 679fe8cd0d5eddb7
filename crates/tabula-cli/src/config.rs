use std::env;

use tabula_core::DEFAULT_DATETIME_FORMAT;

/// Tool configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Tracing filter used when `RUST_LOG` is not set
    pub log_filter: String,
    /// Date-time format applied to columns still using the built-in default
    pub datetime_format: String,
    /// Maximum number of undo levels kept while editing
    pub history_depth: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_filter: "info".to_string(),
            datetime_format: DEFAULT_DATETIME_FORMAT.to_string(),
            history_depth: 100,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let defaults = Self::default();
        let log_filter = lookup("TABULA_LOG").unwrap_or(defaults.log_filter);
        let datetime_format =
            lookup("TABULA_DATETIME_FORMAT").unwrap_or(defaults.datetime_format);
        let history_depth = match lookup("TABULA_HISTORY_DEPTH") {
            Some(depth) => depth.trim().parse()?,
            None => defaults.history_depth,
        };

        Ok(Self {
            log_filter,
            datetime_format,
            history_depth,
        })
    }
}
