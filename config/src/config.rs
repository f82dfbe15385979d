use std::num::NonZeroUsize;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use wikihist_core::DEFAULT_CACHE_CAPACITY;
use wikihist_core::DEFAULT_LEASE;
use wikihist_core::PassOptions;
use wikihist_core::RetryPolicy;
use wikihist_state::HISTORY_DB_FILENAME;
use wikihist_state::HistoryOptions;
use wikihist_state::InclusionFilter;
use wikihist_state::ReplacePolicy;
use wikihist_utils_cli::CliConfigOverrides;

use crate::config_toml::ConfigToml;
use crate::diagnostics::range_for_toml_error;
use crate::error::ConfigError;
use crate::home::find_wikihist_home;

pub const CONFIG_TOML_FILE: &str = "config.toml";

const DEFAULT_NAMESPACES: [i64; 1] = [0];
const DEFAULT_MIN_TITLE_LEN: usize = 1;
const DEFAULT_MAX_TITLE_LEN: usize = 5;
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_LOG_LEVEL: &str = "info";

/// Validated application configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Config file this was loaded from. It may not exist.
    pub config_path: PathBuf,
    pub snapshot_path: Option<PathBuf>,
    pub history_path: PathBuf,
    pub filter: InclusionFilter,
    pub cache_capacity: NonZeroUsize,
    pub retry: RetryPolicy,
    /// SQLite busy timeout applied to both the snapshot and history pools.
    pub busy_timeout: Duration,
    pub max_connections: u32,
    pub lease: Duration,
    pub replace_policy: ReplacePolicy,
    pub log_level: String,
}

impl Config {
    /// Load `config_path`, or `$WIKIHIST_HOME/config.toml` when no path is
    /// given, then apply `-c` overrides on top.
    ///
    /// An explicit path must exist. The default file is optional.
    pub fn load(
        config_path: Option<&Path>,
        overrides: &CliConfigOverrides,
    ) -> Result<Self, ConfigError> {
        match config_path {
            Some(path) => Self::load_from_file(path, overrides, true),
            None => {
                let home = find_wikihist_home().map_err(ConfigError::Home)?;
                Self::load_from_file(&home.join(CONFIG_TOML_FILE), overrides, false)
            }
        }
    }

    fn load_from_file(
        path: &Path,
        overrides: &CliConfigOverrides,
        required: bool,
    ) -> Result<Self, ConfigError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(err) if !required && err.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("no config file at {}, using defaults", path.display());
                String::new()
            }
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };

        let parse_error = |err: toml::de::Error| ConfigError::Parse {
            path: path.to_path_buf(),
            range: range_for_toml_error(&contents, &err),
            message: err.message().to_string(),
        };
        let table: toml::Table = toml::from_str(&contents).map_err(parse_error)?;
        // Type-check the file alone first so errors point into it.
        toml::from_str::<ConfigToml>(&contents).map_err(parse_error)?;

        let mut merged = toml::Value::Table(table);
        overrides
            .apply_on_value(&mut merged)
            .map_err(ConfigError::Override)?;
        let config_toml: ConfigToml = merged
            .try_into()
            .map_err(|err: toml::de::Error| ConfigError::Override(err.message().to_string()))?;

        let base_dir = path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        Self::from_toml(config_toml, path.to_path_buf(), base_dir)
    }

    /// Apply defaults and validate. Relative paths resolve against
    /// `base_dir`.
    pub fn from_toml(
        cfg: ConfigToml,
        config_path: PathBuf,
        base_dir: &Path,
    ) -> Result<Self, ConfigError> {
        let resolve = |path: PathBuf| {
            if path.is_absolute() {
                path
            } else {
                base_dir.join(path)
            }
        };

        let min_title_len = cfg.filter.min_title_len.unwrap_or(DEFAULT_MIN_TITLE_LEN);
        let max_title_len = match cfg.filter.max_title_len.unwrap_or(DEFAULT_MAX_TITLE_LEN) {
            0 => None,
            max => Some(max),
        };
        if let Some(max) = max_title_len
            && min_title_len > max
        {
            return Err(ConfigError::Invalid {
                key: "filter.min_title_len",
                message: format!("{min_title_len} exceeds filter.max_title_len ({max})"),
            });
        }
        let filter = InclusionFilter {
            namespaces: cfg
                .filter
                .namespaces
                .unwrap_or_else(|| DEFAULT_NAMESPACES.to_vec()),
            min_title_len,
            max_title_len,
        };

        let cache_capacity = match cfg.resolver.cache_capacity {
            Some(capacity) => NonZeroUsize::new(capacity).ok_or_else(|| ConfigError::Invalid {
                key: "resolver.cache_capacity",
                message: "must be greater than zero".to_string(),
            })?,
            None => DEFAULT_CACHE_CAPACITY,
        };

        let default_retry = RetryPolicy::default();
        let retry = RetryPolicy {
            max_retries: cfg.store.max_retries.unwrap_or(default_retry.max_retries),
            initial_delay: cfg
                .store
                .retry_initial_delay_ms
                .map_or(default_retry.initial_delay, Duration::from_millis),
        };

        let default_history = HistoryOptions::default();
        let max_connections = cfg
            .store
            .max_connections
            .unwrap_or(default_history.max_connections);
        if max_connections == 0 {
            return Err(ConfigError::Invalid {
                key: "store.max_connections",
                message: "must be greater than zero".to_string(),
            });
        }

        let lease = match cfg.pass.lease_seconds {
            Some(0) => {
                return Err(ConfigError::Invalid {
                    key: "pass.lease_seconds",
                    message: "must be greater than zero".to_string(),
                });
            }
            Some(seconds) => Duration::from_secs(seconds),
            None => DEFAULT_LEASE,
        };

        let log_level = cfg
            .log
            .level
            .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string());
        if log_level.trim().is_empty() {
            return Err(ConfigError::Invalid {
                key: "log.level",
                message: "must not be empty".to_string(),
            });
        }

        Ok(Self {
            config_path,
            snapshot_path: cfg.snapshot.path.map(resolve),
            history_path: cfg
                .history
                .path
                .map_or_else(|| base_dir.join(HISTORY_DB_FILENAME), resolve),
            filter,
            cache_capacity,
            retry,
            busy_timeout: Duration::from_millis(
                cfg.store.busy_timeout_ms.unwrap_or(DEFAULT_BUSY_TIMEOUT_MS),
            ),
            max_connections,
            lease,
            replace_policy: cfg.pass.replace_policy.unwrap_or_default(),
            log_level,
        })
    }

    pub fn snapshot_path(&self) -> Result<&Path, ConfigError> {
        self.snapshot_path
            .as_deref()
            .ok_or(ConfigError::MissingSnapshotPath)
    }

    pub fn pass_options(&self) -> PassOptions {
        PassOptions {
            filter: self.filter.clone(),
            replace_policy: self.replace_policy,
            cache_capacity: self.cache_capacity,
            retry: self.retry,
            lease: self.lease,
        }
    }

    pub fn history_options(&self) -> HistoryOptions {
        HistoryOptions {
            busy_timeout: self.busy_timeout,
            max_connections: self.max_connections,
        }
    }
}
