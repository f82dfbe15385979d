mod commands;
mod logging;
mod output;

use std::path::PathBuf;

use clap::Args;
use clap::Parser;
use wikihist_config::Config;
use wikihist_utils_cli::CliConfigOverrides;

pub use logging::init_tracing;

/// Maintain a point-in-time history of wiki redirects.
#[derive(Debug, Parser)]
#[clap(author, version, bin_name = "wikihist")]
pub struct Cli {
    /// Config file to load instead of `$WIKIHIST_HOME/config.toml`.
    #[arg(long = "config-file", value_name = "PATH", global = true)]
    pub config_file: Option<PathBuf>,

    #[clap(flatten)]
    pub config_overrides: CliConfigOverrides,

    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Debug, clap::Subcommand)]
pub enum Command {
    /// Reconcile the configured snapshot into the history database.
    Run(RunArgs),

    /// Create or migrate the history database.
    Init,

    /// Print every recorded version of one page.
    History(HistoryArgs),

    /// Print the redirect mapping that was current at a batch marker.
    AsOf(AsOfArgs),

    /// Summarize the history database and the pass ledger.
    Stats(OutputArgs),

    /// Check every page history for overlapping or duplicate versions.
    Verify(OutputArgs),
}

#[derive(Debug, Args)]
pub struct OutputArgs {
    /// Print JSON instead of text.
    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Batch marker for the pass. Defaults to the current time in epoch
    /// milliseconds.
    #[arg(long = "batch-marker", value_name = "N")]
    pub batch_marker: Option<i64>,

    #[clap(flatten)]
    pub output: OutputArgs,
}

#[derive(Debug, Args)]
pub struct HistoryArgs {
    #[arg(value_name = "PAGE_ID")]
    pub page_id: i64,

    #[clap(flatten)]
    pub output: OutputArgs,
}

#[derive(Debug, Args)]
pub struct AsOfArgs {
    #[arg(value_name = "MARKER")]
    pub marker: i64,

    #[clap(flatten)]
    pub output: OutputArgs,
}

pub async fn run_main(cli: Cli) -> anyhow::Result<()> {
    let Cli {
        config_file,
        config_overrides,
        command,
    } = cli;

    let config = Config::load(config_file.as_deref(), &config_overrides)
        .map_err(|err| anyhow::anyhow!(err.render()))?;
    init_tracing(&config.log_level);

    match command {
        Command::Run(args) => commands::run_pass(&config, args).await,
        Command::Init => commands::init(&config).await,
        Command::History(args) => commands::history(&config, args).await,
        Command::AsOf(args) => commands::as_of(&config, args).await,
        Command::Stats(args) => commands::stats(&config, args).await,
        Command::Verify(args) => commands::verify(&config, args).await,
    }
}
