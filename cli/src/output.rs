use serde::Serialize;
use serde_json::json;
use wikihist_core::PassSummary;
use wikihist_state::BatchMarker;
use wikihist_state::HistoryViolation;
use wikihist_state::PassRecord;
use wikihist_state::RedirectVersion;

#[derive(Debug, Serialize)]
pub(crate) struct HistoryStats {
    pub(crate) open_versions: i64,
    /// Latest completed pass and how many open versions it confirmed.
    pub(crate) latest_pass: Option<(BatchMarker, i64)>,
    pub(crate) recent_passes: Vec<PassRecord>,
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub(crate) fn print_summary(summary: &PassSummary, json: bool) -> anyhow::Result<()> {
    let counts = &summary.counts;
    let elapsed_ms = summary.elapsed.as_millis() as u64;
    if json {
        return print_json(&json!({
            "batch_marker": summary.batch_marker,
            "counts": counts,
            "elapsed_ms": elapsed_ms,
            "resolver": {
                "by_title": {
                    "hits": summary.resolver.by_title.hits,
                    "misses": summary.resolver.by_title.misses,
                },
                "by_id": {
                    "hits": summary.resolver.by_id.hits,
                    "misses": summary.resolver.by_id.misses,
                },
            },
        }));
    }

    println!("pass {} completed in {elapsed_ms}ms", summary.batch_marker);
    println!("  candidates  {}", counts.candidates);
    println!("  created     {}", counts.created);
    println!("  renewed     {}", counts.renewed);
    println!("  replaced    {}", counts.replaced);
    println!("  expired     {}", counts.expired);
    println!(
        "  dropped     {} (filtered {}, invalid {}, target missing {}, target is redirect {}, identity missing {}, duplicates {})",
        counts.dropped(),
        counts.filtered,
        counts.invalid,
        counts.target_missing,
        counts.target_is_redirect,
        counts.identity_missing,
        counts.duplicates
    );
    println!(
        "  resolver    titles {} hits / {} misses, ids {} hits / {} misses",
        summary.resolver.by_title.hits,
        summary.resolver.by_title.misses,
        summary.resolver.by_id.hits,
        summary.resolver.by_id.misses
    );
    Ok(())
}

fn format_version(version: &RedirectVersion) -> String {
    let to = version
        .effective_to
        .map_or_else(|| "open".to_string(), |to| to.to_string());
    format!(
        "{} {} -> {}:{} (page {}) [{}, {to}) confirmed {}",
        version.page_id,
        version.page_title,
        version.target_namespace,
        version.target_title,
        version.target_page_id,
        version.effective_from,
        version.batch_marker
    )
}

pub(crate) fn print_versions(versions: &[RedirectVersion], json: bool) -> anyhow::Result<()> {
    if json {
        return print_json(versions);
    }
    if versions.is_empty() {
        println!("no versions");
    }
    for version in versions {
        println!("{}", format_version(version));
    }
    Ok(())
}

pub(crate) fn print_stats(stats: &HistoryStats, json: bool) -> anyhow::Result<()> {
    if json {
        return print_json(stats);
    }
    println!("open versions  {}", stats.open_versions);
    match stats.latest_pass {
        Some((marker, confirmed)) => {
            println!("latest pass    {marker} ({confirmed} redirects confirmed)");
        }
        None => println!("latest pass    none"),
    }
    for pass in &stats.recent_passes {
        let mut line = format!(
            "  {} {} started {} applied {} expired {}",
            pass.batch_marker,
            pass.status.as_str(),
            pass.started_at.to_rfc3339(),
            pass.counts.applied(),
            pass.counts.expired
        );
        if let Some(reason) = &pass.abort_reason {
            line.push_str(&format!(" ({reason})"));
        }
        println!("{line}");
    }
    Ok(())
}

pub(crate) fn print_violations(violations: &[HistoryViolation], json: bool) -> anyhow::Result<()> {
    if json {
        return print_json(violations);
    }
    if violations.is_empty() {
        println!("history is consistent");
    }
    for violation in violations {
        println!("{violation}");
    }
    Ok(())
}
