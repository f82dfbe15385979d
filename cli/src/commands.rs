use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use wikihist_config::Config;
use wikihist_core::PassController;
use wikihist_state::BatchMarker;
use wikihist_state::HistoryRuntime;
use wikihist_state::SnapshotDb;

use crate::AsOfArgs;
use crate::HistoryArgs;
use crate::OutputArgs;
use crate::RunArgs;
use crate::output;

/// Passes shown by `stats`.
const RECENT_PASSES: usize = 5;

async fn open_history(config: &Config) -> anyhow::Result<Arc<HistoryRuntime>> {
    HistoryRuntime::init(config.history_path.clone(), config.history_options())
        .await
        .with_context(|| {
            format!(
                "failed to open history database {}",
                config.history_path.display()
            )
        })
}

pub(crate) async fn init(config: &Config) -> anyhow::Result<()> {
    let history = open_history(config).await?;
    println!("history database ready at {}", history.db_path().display());
    Ok(())
}

pub(crate) async fn run_pass(config: &Config, args: RunArgs) -> anyhow::Result<()> {
    let snapshot_path = config.snapshot_path()?;
    let snapshot = Arc::new(
        SnapshotDb::open(snapshot_path.to_path_buf(), config.busy_timeout)
            .await
            .with_context(|| format!("failed to open snapshot {}", snapshot_path.display()))?,
    );
    let history = open_history(config).await?;
    let controller = PassController::new(
        snapshot.clone(),
        history,
        snapshot,
        config.pass_options(),
    );

    let cancel = CancellationToken::new();
    let interrupt = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, aborting pass");
                cancel.cancel();
            }
        }
    });
    let result = controller
        .run_with_cancel(args.batch_marker.map(BatchMarker::new), &cancel)
        .await;
    interrupt.abort();

    let summary = result?;
    output::print_summary(&summary, args.output.json)
}

pub(crate) async fn history(config: &Config, args: HistoryArgs) -> anyhow::Result<()> {
    let history = open_history(config).await?;
    let versions = history.history_for_page(args.page_id).await?;
    output::print_versions(&versions, args.output.json)
}

pub(crate) async fn as_of(config: &Config, args: AsOfArgs) -> anyhow::Result<()> {
    let history = open_history(config).await?;
    let versions = history
        .versions_as_of(BatchMarker::new(args.marker))
        .await?;
    output::print_versions(&versions, args.output.json)
}

pub(crate) async fn stats(config: &Config, args: OutputArgs) -> anyhow::Result<()> {
    let history = open_history(config).await?;
    let stats = output::HistoryStats {
        open_versions: history.count_open_versions().await?,
        latest_pass: history.count_confirmed_in_latest_pass().await?,
        recent_passes: history.list_passes(RECENT_PASSES).await?,
    };
    output::print_stats(&stats, args.json)
}

pub(crate) async fn verify(config: &Config, args: OutputArgs) -> anyhow::Result<()> {
    let history = open_history(config).await?;
    let violations = history.verify_history().await?;
    output::print_violations(&violations, args.json)?;
    if !violations.is_empty() {
        anyhow::bail!("found {} history violation(s)", violations.len());
    }
    Ok(())
}
