//! Behavior-driven tests for cancellation and resume
//!
//! A stop request lets in-flight identifiers finish, checkpoints the run and
//! leaves it resumable by the next run with the same settings.

use std::sync::Arc;

use secfeed_tests::*;

const CATALOG: [&str; 3] = ["AAA", "BBB", "CCC"];

#[tokio::test]
async fn cancelled_incremental_run_resumes_with_the_remaining_identifiers() {
    // Given: A run of one-identifier batches that is stopped while BBB is in flight
    let (_temp, warehouse) = open_warehouse();
    let universe = universe(&CATALOG);
    let stop = StopSignal::new();
    let interrupting = Arc::new(ScriptedProvider::new().with_stop_on("BBB.NS", stop.clone()));

    // When: The first run is interrupted
    let first = pipeline(fast_config(IngestMode::Incremental, 1), &warehouse, &interrupting)
        .with_stop_signal(stop)
        .run(&universe)
        .await
        .expect("first run");

    // Then: The in-flight identifier finished and the rest were left alone
    assert_eq!(first.status, RunStatus::Cancelled);
    assert_eq!(first.processed, 2);
    assert_eq!(first.complete, 2);
    assert_eq!(interrupting.calls_for("CCC.NS"), 0);

    // When: The run is started again with the same settings
    let provider = Arc::new(ScriptedProvider::new());
    let second = pipeline(fast_config(IngestMode::Incremental, 1), &warehouse, &provider)
        .run(&universe)
        .await
        .expect("second run");

    // Then: It continues the same run and fetches only what is left
    assert_eq!(second.status, RunStatus::Completed);
    assert!(second.resumed);
    assert_eq!(second.run_id, first.run_id);
    assert_eq!(second.processed, 1);
    assert_eq!(second.skipped, 2);
    assert_eq!(provider.calls(), REQUESTS_PER_IDENTIFIER);
    assert_eq!(provider.calls_for("CCC.NS"), REQUESTS_PER_IDENTIFIER);
    assert_eq!(row_count(&warehouse, "instruments"), 3);
}

#[tokio::test]
async fn cancelled_full_run_restarts_at_its_checkpoint_batch() {
    // Given: A full run stopped after the second of three batches
    let (_temp, warehouse) = open_warehouse();
    let universe = universe(&CATALOG);
    let stop = StopSignal::new();
    let interrupting = Arc::new(ScriptedProvider::new().with_stop_on("BBB.NS", stop.clone()));
    let first = pipeline(fast_config(IngestMode::Full, 1), &warehouse, &interrupting)
        .with_stop_signal(stop)
        .run(&universe)
        .await
        .expect("first run");
    assert_eq!(first.status, RunStatus::Cancelled);

    // When: The full run is started again
    let provider = Arc::new(ScriptedProvider::new());
    let second = pipeline(fast_config(IngestMode::Full, 1), &warehouse, &provider)
        .run(&universe)
        .await
        .expect("second run");

    // Then: It skips the batches that were already checkpointed
    assert!(second.resumed);
    assert_eq!(second.start_batch, 2);
    assert_eq!(second.processed, 1);
    assert_eq!(provider.calls_for("AAA.NS"), 0);
    assert_eq!(provider.calls_for("BBB.NS"), 0);
    assert_eq!(provider.calls_for("CCC.NS"), REQUESTS_PER_IDENTIFIER);
}

#[tokio::test]
async fn fresh_run_ignores_an_unfinished_one() {
    // Given: An unfinished full run
    let (_temp, warehouse) = open_warehouse();
    let universe = universe(&CATALOG);
    let stop = StopSignal::new();
    let interrupting = Arc::new(ScriptedProvider::new().with_stop_on("AAA.NS", stop.clone()));
    let first = pipeline(fast_config(IngestMode::Full, 1), &warehouse, &interrupting)
        .with_stop_signal(stop)
        .run(&universe)
        .await
        .expect("first run");
    assert_eq!(first.status, RunStatus::Cancelled);

    // When: A new run is forced
    let provider = Arc::new(ScriptedProvider::new());
    let config = IngestConfig {
        resume: false,
        ..fast_config(IngestMode::Full, 1)
    };
    let second = pipeline(config, &warehouse, &provider)
        .run(&universe)
        .await
        .expect("second run");

    // Then: Every identifier is fetched again under a new run id
    assert!(!second.resumed);
    assert_ne!(second.run_id, first.run_id);
    assert_eq!(second.processed, 3);
    assert_eq!(provider.calls(), 3 * REQUESTS_PER_IDENTIFIER);
}

#[tokio::test]
async fn stop_before_the_first_batch_processes_nothing() {
    // Given: A stop signal raised before the run starts
    let (_temp, warehouse) = open_warehouse();
    let provider = Arc::new(ScriptedProvider::new());
    let stop = StopSignal::new();
    stop.raise();

    // When: The run starts
    let report = pipeline(fast_config(IngestMode::Incremental, 2), &warehouse, &provider)
        .with_stop_signal(stop)
        .run(&universe(&CATALOG))
        .await
        .expect("run");

    // Then: It is cancelled without a single request
    assert_eq!(report.status, RunStatus::Cancelled);
    assert_eq!(report.processed, 0);
    assert_eq!(provider.calls(), 0);
}
