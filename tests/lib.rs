// Shared fixtures for the end-to-end pipeline tests.
//
// `ScriptedProvider` answers every resource from canned documents shaped like the
// Yahoo payloads, counts requests, and can be told to report some identifiers as
// unknown or throttled, to panic on one, or to raise a stop signal when a given
// identifier is first requested.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::{json, Value};
use tempfile::TempDir;

pub use secfeed_core::{
    load_universe, CatalogSource, EntityKind, FetchError, IngestConfig, IngestMode,
    MarketDataProvider, Pipeline, ProviderFuture, QueryGuardrails, RunStatus, StopSignal, Symbol,
    Universe, Warehouse, WarehouseConfig,
};
pub use secfeed_warehouse::PeriodType;

/// Requests one fully successful identifier costs.
pub const REQUESTS_PER_IDENTIFIER: usize = 7;

#[derive(Default)]
pub struct ScriptedProvider {
    calls: AtomicUsize,
    per_symbol: Mutex<BTreeMap<String, usize>>,
    missing: BTreeSet<String>,
    throttled: BTreeSet<String>,
    panics: BTreeSet<String>,
    summary: Option<Value>,
    stop_on: Option<(String, StopSignal)>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every resource for `symbol` answers NotFound.
    pub fn with_missing(mut self, symbol: &str) -> Self {
        self.missing.insert(symbol.to_owned());
        self
    }

    /// Every resource for `symbol` answers RateLimited.
    pub fn with_throttled(mut self, symbol: &str) -> Self {
        self.throttled.insert(symbol.to_owned());
        self
    }

    /// Requests for `symbol` panic inside the fetch task.
    pub fn with_panic_on(mut self, symbol: &str) -> Self {
        self.panics.insert(symbol.to_owned());
        self
    }

    /// Replace the quoteSummary document.
    pub fn with_summary(mut self, summary: Value) -> Self {
        self.summary = Some(summary);
        self
    }

    /// Raise `stop` the first time `symbol` is requested.
    pub fn with_stop_on(mut self, symbol: &str, stop: StopSignal) -> Self {
        self.stop_on = Some((symbol.to_owned(), stop));
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn calls_for(&self, symbol: &str) -> usize {
        self.per_symbol
            .lock()
            .expect("per-symbol counter poisoned")
            .get(symbol)
            .copied()
            .unwrap_or(0)
    }

    fn answer(&self, symbol: &Symbol, document: Value) -> ProviderFuture<'_> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self
            .per_symbol
            .lock()
            .expect("per-symbol counter poisoned")
            .entry(symbol.as_str().to_owned())
            .or_default() += 1;

        if let Some((trigger, stop)) = &self.stop_on {
            if trigger == symbol.as_str() {
                stop.raise();
            }
        }

        if self.panics.contains(symbol.as_str()) {
            panic!("scripted provider failure for {symbol}");
        }

        let result = if self.missing.contains(symbol.as_str()) {
            Err(FetchError::not_found(format!("{symbol}: not found (404)")))
        } else if self.throttled.contains(symbol.as_str()) {
            Err(FetchError::rate_limited(format!("{symbol}: throttled (429)")))
        } else {
            Ok(document)
        };
        Box::pin(async move { result })
    }
}

impl MarketDataProvider for ScriptedProvider {
    fn summary<'a>(&'a self, symbol: &'a Symbol) -> ProviderFuture<'a> {
        let summary = self.summary.clone().unwrap_or_else(summary_document);
        self.answer(symbol, summary)
    }

    fn price_history<'a>(&'a self, symbol: &'a Symbol) -> ProviderFuture<'a> {
        self.answer(symbol, chart_document())
    }

    fn statements<'a>(&'a self, symbol: &'a Symbol, period: PeriodType) -> ProviderFuture<'a> {
        self.answer(symbol, statements_document(period))
    }

    fn corporate_actions<'a>(&'a self, symbol: &'a Symbol) -> ProviderFuture<'a> {
        self.answer(symbol, chart_document())
    }

    fn holders<'a>(&'a self, symbol: &'a Symbol) -> ProviderFuture<'a> {
        self.answer(symbol, summary_document())
    }

    fn earnings<'a>(&'a self, symbol: &'a Symbol) -> ProviderFuture<'a> {
        self.answer(symbol, summary_document())
    }
}

pub fn summary_document() -> Value {
    json!({
        "price": {"longName": "Tata Consultancy Services Limited", "currency": "INR"},
        "assetProfile": {"sector": "Technology", "fullTimeEmployees": 601_546},
        "summaryDetail": {"beta": {"raw": 0.55}, "dividendYield": {"raw": 0.0132}},
        "financialData": {"recommendationKey": "buy"},
        "institutionOwnership": {"ownershipList": [
            {"organization": "Fund A", "reportDate": {"raw": 1_711_843_200},
             "position": {"raw": 1_000_000}, "value": {"raw": 5.0e8}, "pctHeld": {"raw": 0.012}}
        ]},
        "earningsHistory": {"history": [
            {"quarter": {"raw": 1_711_843_200}, "epsActual": {"raw": 33.0}, "epsEstimate": {"raw": 32.1}}
        ]}
    })
}

/// Two daily bars (2024-01-02 and 2024-01-03 at +05:30) and one dividend.
pub fn chart_document() -> Value {
    json!({
        "timestamp": [1_704_166_200, 1_704_252_600],
        "indicators": {
            "quote": [{
                "open": [3_700.0, 3_760.0],
                "high": [3_790.0, 3_800.0],
                "low": [3_690.0, 3_740.0],
                "close": [3_770.5, 3_781.0],
                "volume": [1_800_000, 2_100_000]
            }],
            "adjclose": [{"adjclose": [3_700.2, 3_710.9]}]
        },
        "events": {
            "dividends": {"1704166200": {"amount": 9.0, "date": 1_704_166_200}}
        }
    })
}

pub fn statements_document(period: PeriodType) -> Value {
    let series = match period {
        PeriodType::Annual => "annualTotalRevenue",
        PeriodType::Quarterly => "quarterlyTotalRevenue",
    };
    json!([{
        "meta": {"type": [series]},
        series: [
            {"asOfDate": "2024-03-31", "reportedValue": {"raw": 2.4e12}}
        ]
    }])
}

/// Fresh warehouse in a temporary directory; keep the `TempDir` alive.
pub fn open_warehouse() -> (TempDir, Warehouse) {
    let temp = tempfile::tempdir().expect("tempdir");
    let warehouse = Warehouse::open(WarehouseConfig {
        home: temp.path().to_path_buf(),
        db_path: temp.path().join("secfeed.duckdb"),
        max_pool_size: 2,
    })
    .expect("warehouse open");
    (temp, warehouse)
}

/// No pacing delays and a single attempt per request.
pub fn fast_config(mode: IngestMode, batch_size: usize) -> IngestConfig {
    IngestConfig {
        mode,
        batch_size,
        item_delay_ms: 0,
        batch_delay_ms: 0,
        max_retries: 1,
        ..IngestConfig::default()
    }
}

pub fn universe(tokens: &[&str]) -> Universe {
    load_universe(
        &CatalogSource::Inline(tokens.iter().map(|token| (*token).to_owned()).collect()),
        Some(".NS"),
    )
    .expect("universe")
}

pub fn pipeline(
    config: IngestConfig,
    warehouse: &Warehouse,
    provider: &Arc<ScriptedProvider>,
) -> Pipeline {
    let provider: Arc<dyn MarketDataProvider> = provider.clone();
    Pipeline::new(config, warehouse.clone(), provider)
}

/// `SELECT COUNT(*)` over `table`.
pub fn row_count(warehouse: &Warehouse, table: &str) -> i64 {
    let result = warehouse
        .execute_query(
            &format!("SELECT COUNT(*) FROM {table}"),
            QueryGuardrails::default(),
        )
        .expect("count query");
    result.rows[0][0].as_i64().expect("integer count")
}
