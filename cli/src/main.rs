use clap::Parser;
use wikihist_cli::Cli;
use wikihist_cli::run_main;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    run_main(Cli::parse()).await
}
