use std::path::PathBuf;

use thiserror::Error;

use crate::diagnostics::TextRange;
use crate::diagnostics::format_config_error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to locate wikihist home: {0}")]
    Home(#[source] std::io::Error),

    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("{}:{}:{}: {message}", path.display(), range.start.line, range.start.column)]
    Parse {
        path: PathBuf,
        range: TextRange,
        message: String,
    },

    #[error("invalid config override: {0}")]
    Override(String),

    #[error("invalid value for `{key}`: {message}")]
    Invalid { key: &'static str, message: String },

    #[error("`snapshot.path` is not configured; set it in config.toml or pass -c snapshot.path=...")]
    MissingSnapshotPath,
}

impl ConfigError {
    /// Human-oriented rendering. Parse errors include the offending line of
    /// the config file when it can still be read.
    pub fn render(&self) -> String {
        match self {
            ConfigError::Parse {
                path,
                range,
                message,
            } => {
                let contents = std::fs::read_to_string(path).unwrap_or_default();
                format_config_error(path, *range, message, &contents)
            }
            other => other.to_string(),
        }
    }
}
