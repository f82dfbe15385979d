use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use tokio_util::sync::CancellationToken;
use wikihist_core::PassController;
use wikihist_core::PassOptions;
use wikihist_core::ReconcileError;
use wikihist_core::RetryPolicy;
use wikihist_core::TemporalStore;
use wikihist_core::memory::InMemorySnapshot;
use wikihist_core::memory::InMemoryTemporalStore;
use wikihist_core::memory::StoreOperation;
use wikihist_state::BatchMarker;
use wikihist_state::InclusionFilter;
use wikihist_state::PassStatus;
use wikihist_state::RedirectCandidate;
use wikihist_state::StoreError;

fn options() -> PassOptions {
    PassOptions {
        filter: InclusionFilter {
            namespaces: vec![0],
            min_title_len: 1,
            max_title_len: Some(5),
        },
        retry: RetryPolicy {
            max_retries: 2,
            initial_delay: Duration::from_millis(1),
        },
        ..PassOptions::default()
    }
}

fn controller(
    snapshot: &Arc<InMemorySnapshot>,
    store: &Arc<InMemoryTemporalStore>,
) -> PassController {
    PassController::new(snapshot.clone(), store.clone(), snapshot.clone(), options())
}

/// Pages 1..=3 redirect to Dog, Cat and Cow; 10 is a redirect itself.
fn animal_snapshot() -> Arc<InMemorySnapshot> {
    let snapshot = InMemorySnapshot::default();
    for (page_id, title) in [(7, "Dog"), (8, "Cat"), (9, "Puppy"), (11, "Cow")] {
        snapshot.add_page(page_id, 0, title, false);
    }
    snapshot.add_page(10, 0, "Hound", true);
    snapshot.add_page(1, 0, "Doggo", true);
    snapshot.add_page(2, 0, "Kitty", true);
    snapshot.add_page(3, 0, "Moo", true);
    snapshot.set_redirect(1, 0, "Dog");
    snapshot.set_redirect(2, 0, "Cat");
    snapshot.set_redirect(3, 0, "Cow");
    Arc::new(snapshot)
}

#[tokio::test]
async fn first_pass_creates_every_resolvable_redirect() {
    let snapshot = animal_snapshot();
    let store = Arc::new(InMemoryTemporalStore::default());

    let summary = controller(&snapshot, &store)
        .run(Some(BatchMarker::new(100)))
        .await
        .expect("pass");
    assert_eq!(summary.batch_marker, BatchMarker::new(100));
    assert_eq!(summary.counts.candidates, 3);
    assert_eq!(summary.counts.created, 3);
    assert_eq!(summary.counts.expired, 0);
    assert_eq!(store.open_versions().len(), 3);

    let passes = store.passes();
    assert_eq!(passes.len(), 1);
    assert_eq!(passes[0].status, PassStatus::Completed);
    assert_eq!(passes[0].counts, summary.counts);
}

#[tokio::test]
async fn second_pass_over_identical_input_renews_everything() {
    let snapshot = animal_snapshot();
    let store = Arc::new(InMemoryTemporalStore::default());
    let controller = controller(&snapshot, &store);

    controller
        .run(Some(BatchMarker::new(100)))
        .await
        .expect("first pass");
    let before = store.open_versions().len();
    let summary = controller
        .run(Some(BatchMarker::new(200)))
        .await
        .expect("second pass");

    assert_eq!(summary.counts.renewed, 3);
    assert_eq!(summary.counts.created, 0);
    assert_eq!(summary.counts.replaced, 0);
    assert_eq!(summary.counts.expired, 0);
    assert_eq!(store.open_versions().len(), before);
    assert!(
        store
            .open_versions()
            .iter()
            .all(|version| version.batch_marker == BatchMarker::new(200)
                && version.effective_from == BatchMarker::new(100))
    );
}

#[tokio::test]
async fn retargeted_redirect_is_replaced() {
    let snapshot = animal_snapshot();
    let store = Arc::new(InMemoryTemporalStore::default());
    let controller = controller(&snapshot, &store);

    controller
        .run(Some(BatchMarker::new(100)))
        .await
        .expect("first pass");
    snapshot.set_redirect(1, 0, "Puppy");
    let summary = controller
        .run(Some(BatchMarker::new(200)))
        .await
        .expect("second pass");
    assert_eq!(summary.counts.replaced, 1);
    assert_eq!(summary.counts.renewed, 2);

    let history = store.history_for_page(1);
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].target_title, "Dog");
    assert_eq!(history[0].effective_to, Some(BatchMarker::new(200)));
    assert_eq!(history[1].target_title, "Puppy");
    assert_eq!(history[1].effective_from, BatchMarker::new(200));
    assert_eq!(history[1].effective_to, None);
}

#[tokio::test]
async fn redirect_missing_from_next_snapshot_is_swept() {
    let snapshot = animal_snapshot();
    let store = Arc::new(InMemoryTemporalStore::default());
    let controller = controller(&snapshot, &store);

    controller
        .run(Some(BatchMarker::new(100)))
        .await
        .expect("first pass");
    snapshot.remove_redirect(2);
    let summary = controller
        .run(Some(BatchMarker::new(200)))
        .await
        .expect("second pass");

    assert_eq!(summary.counts.expired, 1);
    let history = store.history_for_page(2);
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].effective_to, Some(BatchMarker::new(200)));
    assert_eq!(history[0].batch_marker, BatchMarker::new(100));
}

#[tokio::test]
async fn empty_snapshot_expires_everything() {
    let snapshot = animal_snapshot();
    let store = Arc::new(InMemoryTemporalStore::default());
    let controller = controller(&snapshot, &store);

    controller
        .run(Some(BatchMarker::new(100)))
        .await
        .expect("first pass");
    snapshot.clear_redirects();
    let summary = controller
        .run(Some(BatchMarker::new(200)))
        .await
        .expect("second pass");

    assert_eq!(summary.counts.candidates, 0);
    assert_eq!(summary.counts.created, 0);
    assert_eq!(summary.counts.expired, 3);
    assert_eq!(store.open_versions(), Vec::new());
}

#[tokio::test]
async fn redirect_to_a_redirect_never_acts_and_old_version_expires() {
    let snapshot = animal_snapshot();
    let store = Arc::new(InMemoryTemporalStore::default());
    let controller = controller(&snapshot, &store);

    controller
        .run(Some(BatchMarker::new(100)))
        .await
        .expect("first pass");
    snapshot.set_redirect(3, 0, "Hound");
    let summary = controller
        .run(Some(BatchMarker::new(200)))
        .await
        .expect("second pass");

    assert_eq!(summary.counts.target_is_redirect, 1);
    assert_eq!(summary.counts.replaced, 0);
    let history = store.history_for_page(3);
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].target_title, "Cow");
    assert_eq!(history[0].effective_to, Some(BatchMarker::new(200)));
}

#[tokio::test]
async fn duplicate_listing_is_counted_and_ignored() {
    let snapshot = animal_snapshot();
    snapshot.push_candidate(RedirectCandidate::new(1, 0, "Cat"));
    let store = Arc::new(InMemoryTemporalStore::default());

    let summary = controller(&snapshot, &store)
        .run(Some(BatchMarker::new(100)))
        .await
        .expect("pass");
    assert_eq!(summary.counts.created, 3);
    assert_eq!(summary.counts.duplicates, 1);
    assert_eq!(store.history_for_page(1)[0].target_title, "Dog");
}

#[tokio::test]
async fn snapshot_failure_aborts_without_sweeping() {
    let snapshot = animal_snapshot();
    let store = Arc::new(InMemoryTemporalStore::default());
    let controller = controller(&snapshot, &store);

    controller
        .run(Some(BatchMarker::new(100)))
        .await
        .expect("first pass");
    snapshot.fail_after(1);
    let err = controller
        .run(Some(BatchMarker::new(200)))
        .await
        .expect_err("snapshot fails");
    assert!(matches!(err, ReconcileError::Snapshot(_)));

    // Pages 2 and 3 were never confirmed, but the sweep did not run.
    assert_eq!(store.open_versions().len(), 3);
    let passes = store.passes();
    assert_eq!(passes[1].status, PassStatus::Aborted);
    assert_eq!(passes[1].counts.renewed, 1);
    assert!(passes[1].abort_reason.is_some());
}

#[tokio::test]
async fn cancelled_pass_is_aborted() {
    let snapshot = animal_snapshot();
    let store = Arc::new(InMemoryTemporalStore::default());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = controller(&snapshot, &store)
        .run_with_cancel(Some(BatchMarker::new(100)), &cancel)
        .await
        .expect_err("cancelled");
    assert!(matches!(
        err,
        ReconcileError::Cancelled { marker } if marker == BatchMarker::new(100)
    ));
    assert_eq!(store.all_versions(), Vec::new());
    assert_eq!(store.passes()[0].status, PassStatus::Aborted);
}

#[tokio::test]
async fn transient_store_errors_are_retried() {
    let snapshot = animal_snapshot();
    let store = Arc::new(InMemoryTemporalStore::default());
    store.inject_busy(StoreOperation::OpenVersion, 2);

    let summary = controller(&snapshot, &store)
        .run(Some(BatchMarker::new(100)))
        .await
        .expect("pass survives two busy errors");
    assert_eq!(summary.counts.created, 3);
}

#[tokio::test]
async fn exhausted_retries_abort_the_pass() {
    let snapshot = animal_snapshot();
    let store = Arc::new(InMemoryTemporalStore::default());
    let controller = controller(&snapshot, &store);
    controller
        .run(Some(BatchMarker::new(100)))
        .await
        .expect("first pass");

    snapshot.remove_redirect(3);
    store.inject_busy(StoreOperation::Sweep, 10);
    let err = controller
        .run(Some(BatchMarker::new(200)))
        .await
        .expect_err("sweep keeps failing");
    assert!(matches!(
        err,
        ReconcileError::RetriesExhausted {
            operation: "sweep",
            attempts: 3,
            ..
        }
    ));
    assert_eq!(store.open_versions().len(), 3);
    assert_eq!(store.passes()[1].status, PassStatus::Aborted);
}

#[tokio::test]
async fn stale_or_reused_markers_are_rejected() {
    let snapshot = animal_snapshot();
    let store = Arc::new(InMemoryTemporalStore::default());
    let controller = controller(&snapshot, &store);
    controller
        .run(Some(BatchMarker::new(100)))
        .await
        .expect("first pass");

    for marker in [100, 50] {
        let err = controller
            .run(Some(BatchMarker::new(marker)))
            .await
            .expect_err("non-monotonic marker");
        assert!(matches!(
            err,
            ReconcileError::PassRejected {
                source: StoreError::NonMonotonicBatchMarker { .. },
                ..
            }
        ));
    }
    assert_eq!(store.passes().len(), 1);
}

#[tokio::test]
async fn concurrent_pass_is_rejected_while_lease_is_fresh() {
    let snapshot = animal_snapshot();
    let store = Arc::new(InMemoryTemporalStore::default());
    store
        .begin_pass(BatchMarker::new(50), Duration::from_secs(3600))
        .await
        .expect("claim lease");

    let err = controller(&snapshot, &store)
        .run(Some(BatchMarker::new(100)))
        .await
        .expect_err("lease held");
    assert!(matches!(
        err,
        ReconcileError::PassRejected {
            source: StoreError::PassInProgress { .. },
            ..
        }
    ));
}

#[tokio::test]
async fn default_marker_is_current_time() {
    let snapshot = animal_snapshot();
    let store = Arc::new(InMemoryTemporalStore::default());
    let before = BatchMarker::now();
    let summary = controller(&snapshot, &store)
        .run(None)
        .await
        .expect("pass");
    assert!(summary.batch_marker >= before);
    assert!(summary.batch_marker <= BatchMarker::now());
}

#[tokio::test]
async fn heartbeats_hold_the_lease_through_a_long_pass() {
    let snapshot = InMemorySnapshot::default();
    snapshot.add_page(7, 0, "Dog", false);
    for page_id in 1..=6 {
        snapshot.add_page(page_id, 0, &format!("R{page_id}"), true);
        snapshot.set_redirect(page_id, 0, "Dog");
    }
    snapshot.pace(Duration::from_millis(150));
    let snapshot = Arc::new(snapshot);
    let store = Arc::new(InMemoryTemporalStore::default());
    let lease = Duration::from_millis(600);
    let controller = PassController::new(
        snapshot.clone(),
        store.clone(),
        snapshot.clone(),
        PassOptions {
            lease,
            ..options()
        },
    );

    let (summary, rival) = tokio::join!(controller.run(Some(BatchMarker::new(100))), async {
        // Past the lease measured from the start of the pass.
        tokio::time::sleep(Duration::from_millis(750)).await;
        store.begin_pass(BatchMarker::new(200), lease).await
    });

    assert!(matches!(
        rival,
        Err(StoreError::PassInProgress { running }) if running == BatchMarker::new(100)
    ));
    let summary = summary.expect("pass keeps its lease");
    assert_eq!(summary.counts.created, 6);
    let passes = store.passes();
    assert_eq!(passes.len(), 1);
    assert_eq!(passes[0].status, PassStatus::Completed);
}

#[tokio::test]
async fn pass_that_lost_its_lease_aborts_without_sweeping() {
    let snapshot = animal_snapshot();
    let store = Arc::new(InMemoryTemporalStore::default());
    controller(&snapshot, &store)
        .run(Some(BatchMarker::new(100)))
        .await
        .expect("first pass");

    snapshot.remove_redirect(3);
    snapshot.pace(Duration::from_millis(400));
    let lease = Duration::from_millis(100);
    let stalled = PassController::new(
        snapshot.clone(),
        store.clone(),
        snapshot.clone(),
        PassOptions {
            lease,
            ..options()
        },
    );

    let (outcome, rival) = tokio::join!(stalled.run(Some(BatchMarker::new(200))), async {
        tokio::time::sleep(Duration::from_millis(200)).await;
        store.begin_pass(BatchMarker::new(300), lease).await
    });

    rival.expect("stale lease is taken over");
    let err = outcome.expect_err("lease lost");
    assert!(matches!(
        err,
        ReconcileError::LeaseLost { marker } if marker == BatchMarker::new(200)
    ));

    // Nothing was written under the lost lease and page 3 was not swept.
    let open = store.open_versions();
    assert_eq!(open.len(), 3);
    assert!(
        open.iter()
            .all(|version| version.batch_marker == BatchMarker::new(100))
    );
    let statuses: Vec<_> = store
        .passes()
        .iter()
        .map(|entry| (entry.batch_marker.get(), entry.status, entry.abort_reason.clone()))
        .collect();
    assert_eq!(
        statuses,
        vec![
            (100, PassStatus::Completed, None),
            (200, PassStatus::Aborted, Some("lease expired".to_string())),
            (300, PassStatus::Running, None),
        ]
    );
}
