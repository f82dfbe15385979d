//! Property tests: random multi-pass snapshots never break the per-page
//! history invariants, and replaying a snapshot is a no-op apart from RENEW.
//! The same passes are also run against the SQLite store and snapshot.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use proptest::prelude::*;
use tokio_test::block_on;
use wikihist_core::PassController;
use wikihist_core::PassOptions;
use wikihist_core::RetryPolicy;
use wikihist_core::memory::InMemorySnapshot;
use wikihist_core::memory::InMemoryTemporalStore;
use wikihist_state::BatchMarker;
use wikihist_state::HistoryRuntime;
use wikihist_state::RedirectCandidate;
use wikihist_state::ReplacePolicy;
use wikihist_state::SnapshotDb;
use wikihist_state::find_history_violations;
use wikihist_state::history_db_path;
use wikihist_state::testing::SnapshotFixture;
use wikihist_state::testing::unique_temp_dir;

/// Target titles; "Ghost" has no page and "Hub" is itself a redirect.
const TARGETS: [&str; 6] = ["Dog", "Cat", "Cow", "Puppy", "Ghost", "Hub"];

fn pages() -> Arc<InMemorySnapshot> {
    let snapshot = InMemorySnapshot::default();
    for (offset, title) in ["Dog", "Cat", "Cow", "Puppy"].into_iter().enumerate() {
        snapshot.add_page(100 + offset as i64, 0, title, false);
    }
    snapshot.add_page(200, 0, "Hub", true);
    for page_id in 1..=8 {
        snapshot.add_page(page_id, 0, &format!("P{page_id}"), true);
    }
    Arc::new(snapshot)
}

fn arb_pass() -> impl Strategy<Value = Vec<(i64, usize)>> {
    prop::collection::vec((1i64..=8, 0usize..TARGETS.len()), 0..12)
}

fn arb_policy() -> impl Strategy<Value = ReplacePolicy> {
    prop::sample::select(vec![ReplacePolicy::Target, ReplacePolicy::TargetAndTitle])
}

fn load(snapshot: &InMemorySnapshot, pass: &[(i64, usize)]) {
    snapshot.clear_redirects();
    for (page_id, target) in pass {
        snapshot.push_candidate(RedirectCandidate::new(*page_id, 0, TARGETS[*target]));
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn histories_stay_valid_across_random_passes(
        passes in prop::collection::vec(arb_pass(), 1..6),
        replace_policy in arb_policy(),
    ) {
        let snapshot = pages();
        let store = Arc::new(InMemoryTemporalStore::default());
        let controller = PassController::new(
            snapshot.clone(),
            store.clone(),
            snapshot.clone(),
            PassOptions {
                replace_policy,
                retry: RetryPolicy::no_retries(),
                ..PassOptions::default()
            },
        );

        for (index, pass) in passes.iter().enumerate() {
            load(&snapshot, pass);
            let marker = BatchMarker::new((index as i64 + 1) * 10);
            let summary = block_on(controller.run(Some(marker))).expect("pass");

            let violations = find_history_violations(&store.all_versions());
            prop_assert!(violations.is_empty(), "violations: {:?}", violations);

            let mut open_pages: Vec<i64> = store
                .open_versions()
                .iter()
                .map(|version| version.page_id)
                .collect();
            open_pages.sort_unstable();
            let mut listed: Vec<i64> = pass
                .iter()
                .filter(|(_, target)| *target < 4)
                .map(|(page_id, _)| *page_id)
                .collect();
            listed.sort_unstable();
            listed.dedup();
            // Every open version was confirmed by this pass, and only pages
            // whose first listing resolved can be open.
            prop_assert!(open_pages.iter().all(|page_id| listed.contains(page_id)));
            prop_assert!(
                store
                    .open_versions()
                    .iter()
                    .all(|version| version.batch_marker == marker)
            );
            prop_assert_eq!(summary.counts.candidates, pass.len() as u64);
        }
    }

    #[test]
    fn replaying_a_snapshot_only_renews(
        pass in arb_pass(),
        replace_policy in arb_policy(),
    ) {
        let snapshot = pages();
        let store = Arc::new(InMemoryTemporalStore::default());
        let controller = PassController::new(
            snapshot.clone(),
            store.clone(),
            snapshot.clone(),
            PassOptions {
                replace_policy,
                retry: RetryPolicy::no_retries(),
                ..PassOptions::default()
            },
        );
        load(&snapshot, &pass);

        let first = block_on(controller.run(Some(BatchMarker::new(1)))).expect("first pass");
        let open_before = store.open_versions().len();
        let second = block_on(controller.run(Some(BatchMarker::new(2)))).expect("second pass");

        prop_assert_eq!(second.counts.created, 0);
        prop_assert_eq!(second.counts.replaced, 0);
        prop_assert_eq!(second.counts.expired, 0);
        prop_assert_eq!(second.counts.renewed, first.counts.created);
        prop_assert_eq!(store.open_versions().len(), open_before);
    }
}

/// A snapshot table holds one redirect per page, so the last listing wins.
fn final_targets(pass: &[(i64, usize)]) -> BTreeMap<i64, usize> {
    pass.iter().copied().collect()
}

async fn sqlite_pages(dir: &std::path::Path) -> anyhow::Result<SnapshotFixture> {
    let fixture = SnapshotFixture::create(dir.join("snapshot.sqlite")).await?;
    for (offset, title) in ["Dog", "Cat", "Cow", "Puppy"].into_iter().enumerate() {
        fixture.add_page(100 + offset as i64, 0, title, false).await?;
    }
    fixture.add_page(200, 0, "Hub", true).await?;
    for page_id in 1..=8 {
        fixture
            .add_page(page_id, 0, &format!("P{page_id}"), true)
            .await?;
    }
    Ok(fixture)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(8))]

    #[test]
    fn sqlite_histories_stay_valid_across_random_passes(
        passes in prop::collection::vec(arb_pass(), 1..5),
        replace_policy in arb_policy(),
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("tokio runtime");
        let dir = unique_temp_dir();
        let (fixture, history, controller) = runtime.block_on(async {
            let fixture = sqlite_pages(&dir).await.expect("snapshot fixture");
            let history = HistoryRuntime::init(history_db_path(&dir), Default::default())
                .await
                .expect("init history");
            let snapshot = Arc::new(
                SnapshotDb::open(fixture.db_path().to_path_buf(), Duration::from_secs(1))
                    .await
                    .expect("open snapshot"),
            );
            let controller = PassController::new(
                snapshot.clone(),
                history.clone(),
                snapshot,
                PassOptions {
                    replace_policy,
                    retry: RetryPolicy::no_retries(),
                    ..PassOptions::default()
                },
            );
            (fixture, history, controller)
        });

        for (index, pass) in passes.iter().enumerate() {
            let targets = final_targets(pass);
            let marker = BatchMarker::new((index as i64 + 1) * 10);
            let summary = runtime.block_on(async {
                fixture.clear_redirects().await.expect("clear redirects");
                for (page_id, target) in &targets {
                    fixture
                        .add_redirect(*page_id, 0, TARGETS[*target])
                        .await
                        .expect("add redirect");
                }
                controller.run(Some(marker)).await.expect("pass")
            });

            let versions = runtime.block_on(history.all_versions()).expect("all versions");
            let violations = find_history_violations(&versions);
            prop_assert!(violations.is_empty(), "violations: {:?}", violations);

            let open: Vec<_> = versions.iter().filter(|version| version.is_open()).collect();
            let mut open_pages: Vec<i64> = open.iter().map(|version| version.page_id).collect();
            open_pages.sort_unstable();
            let resolvable: Vec<i64> = targets
                .iter()
                .filter(|(_, target)| **target < 4)
                .map(|(page_id, _)| *page_id)
                .collect();
            prop_assert_eq!(open_pages, resolvable);
            prop_assert!(open.iter().all(|version| version.batch_marker == marker));
            prop_assert!(open.iter().all(|version| {
                targets
                    .get(&version.page_id)
                    .is_some_and(|target| TARGETS[*target] == version.target_title)
            }), "open versions must point at their page's resolved target");
            prop_assert_eq!(summary.counts.candidates, targets.len() as u64);
        }

        runtime.block_on(fixture.remove());
        let _ = std::fs::remove_dir_all(&dir);
    }
}
