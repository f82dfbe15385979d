//! Configuration loading for wikihist.
//!
//! `config.toml` is parsed into [`ConfigToml`], `-c key=value` overrides are
//! layered on top, and the result is validated into a [`Config`] that hands
//! out ready-made pass and store options.

mod config;
mod config_toml;
mod diagnostics;
mod error;
mod home;

pub use config::CONFIG_TOML_FILE;
pub use config::Config;
pub use config_toml::ConfigToml;
pub use config_toml::FilterToml;
pub use config_toml::HistoryToml;
pub use config_toml::LogToml;
pub use config_toml::PassToml;
pub use config_toml::ResolverToml;
pub use config_toml::SnapshotToml;
pub use config_toml::StoreToml;
pub use diagnostics::TextPosition;
pub use diagnostics::TextRange;
pub use diagnostics::format_config_error;
pub use error::ConfigError;
pub use home::find_wikihist_home;
