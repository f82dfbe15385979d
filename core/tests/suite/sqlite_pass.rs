use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use wikihist_core::PassController;
use wikihist_core::PassOptions;
use wikihist_state::BatchMarker;
use wikihist_state::HistoryRuntime;
use wikihist_state::InclusionFilter;
use wikihist_state::PassStatus;
use wikihist_state::SnapshotDb;
use wikihist_state::history_db_path;
use wikihist_state::testing::SnapshotFixture;
use wikihist_state::testing::unique_temp_dir;

async fn seeded_fixture() -> SnapshotFixture {
    let dir = unique_temp_dir();
    let fixture = SnapshotFixture::create(dir.join("snapshot.sqlite"))
        .await
        .expect("create snapshot");
    for (page_id, title, is_redirect) in [
        (7, "Dog", false),
        (8, "Cat", false),
        (9, "Puppy", false),
        (42, "Doggo", true),
        (43, "Kitty", true),
        (44, "Pupper", true),
    ] {
        fixture
            .add_page(page_id, 0, title, is_redirect)
            .await
            .expect("add page");
    }
    fixture.add_redirect(42, 0, "Dog").await.expect("redirect");
    fixture.add_redirect(43, 0, "Cat").await.expect("redirect");
    // Target title longer than the filter allows.
    fixture
        .add_redirect(44, 0, "Puppies")
        .await
        .expect("redirect");
    fixture
}

async fn controller(fixture: &SnapshotFixture, history: Arc<HistoryRuntime>) -> PassController {
    let snapshot = Arc::new(
        SnapshotDb::open(fixture.db_path().to_path_buf(), Duration::from_secs(1))
            .await
            .expect("open snapshot"),
    );
    PassController::new(
        snapshot.clone(),
        history,
        snapshot,
        PassOptions {
            filter: InclusionFilter {
                namespaces: vec![0],
                min_title_len: 1,
                max_title_len: Some(5),
            },
            ..PassOptions::default()
        },
    )
}

#[tokio::test]
async fn passes_over_sqlite_build_contiguous_history() {
    let fixture = seeded_fixture().await;
    let home = unique_temp_dir();
    let history = HistoryRuntime::init(history_db_path(&home), Default::default())
        .await
        .expect("init history");

    let first = controller(&fixture, history.clone())
        .await
        .run(Some(BatchMarker::new(1_000)))
        .await
        .expect("first pass");
    assert_eq!(first.counts.candidates, 2);
    assert_eq!(first.counts.created, 2);

    fixture.add_redirect(42, 0, "Puppy").await.expect("retarget");
    fixture.remove_redirect(43).await.expect("remove");
    let second = controller(&fixture, history.clone())
        .await
        .run(Some(BatchMarker::new(2_000)))
        .await
        .expect("second pass");
    assert_eq!(second.counts.replaced, 1);
    assert_eq!(second.counts.expired, 1);

    let dog = history.history_for_page(42).await.expect("history");
    assert_eq!(
        dog.iter()
            .map(|version| (
                version.target_title.as_str(),
                version.page_title.as_str(),
                version.effective_from.get(),
                version.effective_to.map(BatchMarker::get),
            ))
            .collect::<Vec<_>>(),
        vec![
            ("Dog", "Doggo", 1_000, Some(2_000)),
            ("Puppy", "Doggo", 2_000, None),
        ]
    );
    let cat = history.history_for_page(43).await.expect("history");
    assert_eq!(cat[0].effective_to, Some(BatchMarker::new(2_000)));

    let as_of_first = history
        .versions_as_of(BatchMarker::new(1_500))
        .await
        .expect("as of");
    assert_eq!(as_of_first.len(), 2);
    assert_eq!(history.count_open_versions().await.expect("count"), 1);
    assert_eq!(
        history
            .count_confirmed_in_latest_pass()
            .await
            .expect("confirmed"),
        Some((BatchMarker::new(2_000), 1))
    );
    assert_eq!(history.verify_history().await.expect("verify"), Vec::new());

    let latest = history
        .latest_completed_pass()
        .await
        .expect("ledger")
        .expect("completed pass");
    assert_eq!(latest.batch_marker, BatchMarker::new(2_000));
    assert_eq!(latest.status, PassStatus::Completed);
    assert_eq!(latest.counts, second.counts);

    fixture.remove().await;
    let _ = tokio::fs::remove_dir_all(home).await;
}

#[tokio::test]
async fn rerunning_identical_snapshot_only_renews() {
    let fixture = seeded_fixture().await;
    let home = unique_temp_dir();
    let history = HistoryRuntime::init(history_db_path(&home), Default::default())
        .await
        .expect("init history");
    let controller = controller(&fixture, history.clone()).await;

    controller
        .run(Some(BatchMarker::new(1)))
        .await
        .expect("first pass");
    let second = controller
        .run(Some(BatchMarker::new(2)))
        .await
        .expect("second pass");
    assert_eq!(second.counts.renewed, 2);
    assert_eq!(second.counts.applied(), 2);
    assert_eq!(second.counts.expired, 0);
    assert_eq!(history.all_versions().await.expect("versions").len(), 2);

    fixture.remove().await;
    let _ = tokio::fs::remove_dir_all(home).await;
}
