//! On-disk shape of `config.toml`. Every field is optional; defaults are
//! applied when the file is validated into a [`crate::Config`].

use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;
use wikihist_state::ReplacePolicy;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigToml {
    pub snapshot: SnapshotToml,
    pub history: HistoryToml,
    pub filter: FilterToml,
    pub resolver: ResolverToml,
    pub store: StoreToml,
    pub pass: PassToml,
    pub log: LogToml,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SnapshotToml {
    /// SQLite database with MediaWiki-shaped `page` and `redirect` tables.
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HistoryToml {
    /// Defaults to `history.sqlite` next to the config file.
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FilterToml {
    pub namespaces: Option<Vec<i64>>,
    pub min_title_len: Option<usize>,
    /// `0` removes the upper bound.
    pub max_title_len: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ResolverToml {
    pub cache_capacity: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreToml {
    pub max_retries: Option<u32>,
    pub retry_initial_delay_ms: Option<u64>,
    pub busy_timeout_ms: Option<u64>,
    pub max_connections: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PassToml {
    pub lease_seconds: Option<u64>,
    pub replace_policy: Option<ReplacePolicy>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogToml {
    /// Default `tracing` filter when `RUST_LOG` is unset.
    pub level: Option<String>,
}
