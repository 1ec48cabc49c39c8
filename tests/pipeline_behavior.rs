//! Behavior-driven tests for ingestion runs
//!
//! These tests drive the whole pipeline (backlog, batches, fetch, normalize,
//! upsert, ledger) against a scripted provider and a temporary warehouse.

use std::sync::Arc;

use serde_json::json;

use secfeed_core::AuditOptions;
use secfeed_tests::*;

// =============================================================================
// Ingestion: Happy Path
// =============================================================================

#[tokio::test]
async fn when_every_request_succeeds_all_entity_tables_are_populated() {
    // Given: Two identifiers and a provider that answers everything
    let (_temp, warehouse) = open_warehouse();
    let provider = Arc::new(ScriptedProvider::new());
    let universe = universe(&["TCS", "INFY"]);

    // When: An incremental run completes
    let report = pipeline(fast_config(IngestMode::Incremental, 10), &warehouse, &provider)
        .run(&universe)
        .await
        .expect("run");

    // Then: Every identifier is complete and each kind cost one request (two for statements)
    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(report.processed, 2);
    assert_eq!(report.complete, 2);
    assert!(report.failed_identifiers.is_empty());
    assert_eq!(provider.calls(), 2 * REQUESTS_PER_IDENTIFIER);

    // And: Rows landed in every entity table
    assert_eq!(row_count(&warehouse, "instruments"), 2);
    assert_eq!(row_count(&warehouse, "metric_snapshots"), 2);
    assert_eq!(row_count(&warehouse, "price_history"), 4);
    assert_eq!(row_count(&warehouse, "financial_statements"), 4);
    assert_eq!(row_count(&warehouse, "corporate_actions"), 2);
    assert_eq!(row_count(&warehouse, "holders"), 2);
    assert_eq!(row_count(&warehouse, "earnings"), 2);

    // And: The run report carries per-kind totals
    let prices = report.kinds[&EntityKind::PriceHistory];
    assert_eq!(prices.succeeded, 2);
    assert_eq!(prices.inserted, 4);
    assert_eq!(prices.updated, 0);
}

#[tokio::test]
async fn when_incremental_run_repeats_nothing_is_refetched() {
    // Given: A warehouse that already holds a complete run
    let (_temp, warehouse) = open_warehouse();
    let provider = Arc::new(ScriptedProvider::new());
    let universe = universe(&["TCS", "INFY", "WIPRO"]);
    pipeline(fast_config(IngestMode::Incremental, 2), &warehouse, &provider)
        .run(&universe)
        .await
        .expect("first run");
    let calls_after_first = provider.calls();
    let prices_after_first = row_count(&warehouse, "price_history");

    // When: The same incremental run is started again
    let report = pipeline(fast_config(IngestMode::Incremental, 2), &warehouse, &provider)
        .run(&universe)
        .await
        .expect("second run");

    // Then: No request is made and no row changes
    assert_eq!(provider.calls(), calls_after_first);
    assert_eq!(report.planned, 0);
    assert_eq!(report.skipped, 3);
    assert_eq!(report.processed, 0);
    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(row_count(&warehouse, "price_history"), prices_after_first);
}

#[tokio::test]
async fn when_full_run_repeats_rows_are_updated_not_duplicated() {
    // Given: A warehouse that already holds one identifier
    let (_temp, warehouse) = open_warehouse();
    let provider = Arc::new(ScriptedProvider::new());
    let universe = universe(&["HDFCBANK"]);
    pipeline(fast_config(IngestMode::Full, 10), &warehouse, &provider)
        .run(&universe)
        .await
        .expect("first run");

    // When: A full run refetches it
    let report = pipeline(fast_config(IngestMode::Full, 10), &warehouse, &provider)
        .run(&universe)
        .await
        .expect("second run");

    // Then: Existing keys are updated in place
    assert_eq!(provider.calls(), 2 * REQUESTS_PER_IDENTIFIER);
    let prices = report.kinds[&EntityKind::PriceHistory];
    assert_eq!(prices.inserted, 0);
    assert_eq!(prices.updated, 2);
    assert_eq!(row_count(&warehouse, "price_history"), 2);
}

// =============================================================================
// Ingestion: Partial Failures
// =============================================================================

#[tokio::test]
async fn when_one_of_fifty_identifiers_is_unknown_the_rest_complete() {
    // Given: Fifty identifiers, one of which the provider does not know
    let (_temp, warehouse) = open_warehouse();
    let provider = Arc::new(ScriptedProvider::new().with_missing("SYM17.NS"));
    let tokens: Vec<String> = (1..=50).map(|index| format!("SYM{index:02}")).collect();
    let tokens: Vec<&str> = tokens.iter().map(String::as_str).collect();
    let universe = universe(&tokens);

    // When: The run processes them in batches of ten
    let report = pipeline(fast_config(IngestMode::Incremental, 10), &warehouse, &provider)
        .run(&universe)
        .await
        .expect("run");

    // Then: The run completes and only the unknown identifier is reported as failed
    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(report.processed, 50);
    assert_eq!(report.complete, 49);
    assert_eq!(report.failed_identifiers, vec![String::from("SYM17.NS")]);
    assert!((report.success_rate() - 0.98).abs() < 1e-9);

    let prices = report.kinds[&EntityKind::PriceHistory];
    assert_eq!(prices.succeeded, 49);
    assert_eq!(prices.failed, 1);

    // And: Not-found is not retried
    assert_eq!(provider.calls_for("SYM17.NS"), REQUESTS_PER_IDENTIFIER);

    // And: The failure is recorded with its error code
    let failed = report
        .outcomes
        .iter()
        .find(|outcome| outcome.symbol == "SYM17.NS" && outcome.kind == EntityKind::PriceHistory)
        .expect("outcome for the unknown identifier");
    assert_eq!(failed.error_code.as_deref(), Some("not_found"));

    // And: The next incremental run only plans the failed identifier
    let plan = pipeline(fast_config(IngestMode::Incremental, 10), &warehouse, &provider)
        .plan(&universe)
        .expect("plan");
    assert_eq!(plan.to_fetch.len(), 1);
    assert_eq!(plan.to_fetch[0].symbol.as_str(), "SYM17.NS");
    assert_eq!(plan.to_skip.len(), 49);
}

#[tokio::test]
async fn when_the_provider_throttles_the_run_slows_down_and_completes() {
    // Given: A provider that rate-limits every request for the first identifier
    let (_temp, warehouse) = open_warehouse();
    let provider = Arc::new(ScriptedProvider::new().with_throttled("AAA.NS"));

    // When: Two one-identifier batches run
    let report = pipeline(fast_config(IngestMode::Incremental, 1), &warehouse, &provider)
        .run(&universe(&["AAA", "BBB"]))
        .await
        .expect("run");

    // Then: The run completes and only the throttled batch raised the delay
    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(report.processed, 2);
    assert_eq!(report.complete, 1);
    assert_eq!(report.failed_identifiers, vec![String::from("AAA.NS")]);
    assert_eq!(report.throttle_adjustments, 1);
    assert_eq!(report.final_item_delay_ms, 250);

    // And: The throttled kinds are recorded as rate limited
    assert!(report
        .outcomes
        .iter()
        .filter(|outcome| outcome.symbol == "AAA.NS")
        .all(|outcome| outcome.error_code.as_deref() == Some("rate_limited")));
}

#[tokio::test]
async fn when_a_fetch_task_panics_its_identifier_is_reported_as_failed() {
    // Given: A provider that panics while fetching one of two identifiers
    let (_temp, warehouse) = open_warehouse();
    let provider = Arc::new(ScriptedProvider::new().with_panic_on("INFY.NS"));

    // When: Both run in the same batch
    let report = pipeline(fast_config(IngestMode::Incremental, 10), &warehouse, &provider)
        .run(&universe(&["INFY", "TCS"]))
        .await
        .expect("run");

    // Then: The other identifier completes and the panicked one is accounted for
    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(report.processed, 2);
    assert_eq!(report.complete, 1);
    assert_eq!(report.failed_identifiers, vec![String::from("INFY.NS")]);
    let aborted: Vec<_> = report
        .outcomes
        .iter()
        .filter(|outcome| outcome.symbol == "INFY.NS")
        .collect();
    assert_eq!(aborted.len(), EntityKind::ALL.len());
    assert!(aborted
        .iter()
        .all(|outcome| outcome.error_code.as_deref() == Some("aborted")));

    // And: The next incremental run plans it again
    let plan = pipeline(fast_config(IngestMode::Incremental, 10), &warehouse, &provider)
        .plan(&universe(&["INFY", "TCS"]))
        .expect("plan");
    assert_eq!(plan.to_fetch.len(), 1);
    assert_eq!(plan.to_fetch[0].symbol.as_str(), "INFY.NS");
}

#[tokio::test]
async fn when_a_metric_overflows_it_is_dropped_and_other_kinds_persist() {
    // Given: A summary whose dividend yield exceeds its column bound
    let (_temp, warehouse) = open_warehouse();
    let provider = Arc::new(ScriptedProvider::new().with_summary(json!({
        "price": {"longName": "Reliance Industries Limited"},
        "summaryDetail": {
            "dividendYield": {"raw": 123_456.0, "fmt": "12345600%"},
            "beta": {"raw": 0.85}
        }
    })));
    let universe = universe(&["RELIANCE"]);

    // When: The identifier is ingested
    let report = pipeline(fast_config(IngestMode::Incremental, 10), &warehouse, &provider)
        .run(&universe)
        .await
        .expect("run");

    // Then: The identifier still completes
    assert_eq!(report.complete, 1);
    assert_eq!(report.kinds[&EntityKind::Metrics].succeeded, 1);
    assert_eq!(report.quality_events, 1);

    // And: The offending field is NULL, its neighbours are kept
    let result = warehouse
        .execute_query(
            "SELECT dividend_yield, beta FROM metric_snapshots WHERE symbol = 'RELIANCE.NS'",
            QueryGuardrails::default(),
        )
        .expect("query");
    assert_eq!(result.row_count, 1);
    assert!(result.rows[0][0].is_null());
    let beta = result.rows[0][1].as_f64().expect("beta");
    assert!((beta - 0.85).abs() < 1e-9);

    // And: A quality event explains the drop
    let events = warehouse
        .execute_query(
            "SELECT entity_kind, column_name, issue FROM quality_events",
            QueryGuardrails::default(),
        )
        .expect("query");
    assert_eq!(events.row_count, 1);
    assert_eq!(events.rows[0][0], json!("metrics"));
    assert_eq!(events.rows[0][1], json!("dividend_yield"));
    assert_eq!(events.rows[0][2], json!("out_of_range"));

    // And: Prices for the same identifier were stored
    assert_eq!(row_count(&warehouse, "price_history"), 2);
}

#[tokio::test]
async fn when_a_metric_only_overflows_after_rounding_its_neighbours_survive() {
    // Given: A dividend yield that rounds up to the column bound at scale 8
    let (_temp, warehouse) = open_warehouse();
    let provider = Arc::new(ScriptedProvider::new().with_summary(json!({
        "price": {"longName": "Reliance Industries Limited"},
        "summaryDetail": {
            "dividendYield": {"raw": 9_999.999_999_999},
            "beta": {"raw": 0.85}
        }
    })));

    // When: The identifier is ingested
    let report = pipeline(fast_config(IngestMode::Incremental, 10), &warehouse, &provider)
        .run(&universe(&["RELIANCE"]))
        .await
        .expect("run");

    // Then: The metrics snapshot is stored without the offending field
    assert_eq!(report.kinds[&EntityKind::Metrics].succeeded, 1);
    assert_eq!(report.quality_events, 1);
    let result = warehouse
        .execute_query(
            "SELECT dividend_yield, beta FROM metric_snapshots",
            QueryGuardrails::default(),
        )
        .expect("query");
    assert_eq!(result.row_count, 1);
    assert!(result.rows[0][0].is_null());
    let beta = result.rows[0][1].as_f64().expect("beta");
    assert!((beta - 0.85).abs() < 1e-9);
}

// =============================================================================
// Planning and Audit
// =============================================================================

#[tokio::test]
async fn backlog_plan_counts_requests_without_fetching() {
    // Given: A fresh warehouse and three identifiers
    let (_temp, warehouse) = open_warehouse();
    let provider = Arc::new(ScriptedProvider::new());
    let universe = universe(&["TCS", "INFY", "WIPRO"]);

    // When: The backlog is planned with batches of two
    let plan = pipeline(fast_config(IngestMode::Incremental, 2), &warehouse, &provider)
        .plan(&universe)
        .expect("plan");

    // Then: Every kind is planned for every identifier and nothing was requested
    assert_eq!(plan.universe, 3);
    assert_eq!(plan.to_fetch.len(), 3);
    assert_eq!(plan.requests, 3 * EntityKind::ALL.len());
    assert_eq!(plan.batches, 2);
    assert!(plan.resumes.is_none());
    assert_eq!(provider.calls(), 0);
}

#[tokio::test]
async fn audit_measures_coverage_against_the_catalog() {
    // Given: Two of three catalog identifiers were ingested
    let (_temp, warehouse) = open_warehouse();
    let provider = Arc::new(ScriptedProvider::new());
    pipeline(fast_config(IngestMode::Incremental, 10), &warehouse, &provider)
        .run(&universe(&["TCS", "INFY"]))
        .await
        .expect("run");

    // When: Coverage is audited against the full catalog
    let report = warehouse
        .audit(&AuditOptions {
            catalog: Some(vec![
                String::from("INFY.NS"),
                String::from("TCS.NS"),
                String::from("WIPRO.NS"),
            ]),
            ..AuditOptions::default()
        })
        .expect("audit");

    // Then: Each kind reports two thirds coverage and the gap is named
    assert_eq!(report.catalog_size, 3);
    let prices = report.kind(EntityKind::PriceHistory).expect("price coverage");
    assert_eq!(prices.coverage_pct, 66.7);
    assert_eq!(prices.distinct_instruments, 2);
    assert_eq!(prices.earliest.as_deref(), Some("2024-01-02"));
    assert_eq!(prices.latest.as_deref(), Some("2024-01-03"));
    assert_eq!(report.missing_prices, vec![String::from("WIPRO.NS")]);
}
