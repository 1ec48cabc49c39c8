//! # secfeed warehouse
//!
//! Embedded DuckDB store for the ingestion pipeline.
//!
//! - [`schema`] is the column catalog shared with the normalizer.
//! - [`store`] writes normalized bundles, one transaction per entity kind.
//! - [`runs`] keeps the run ledger that drives backlog resolution and resume.
//! - [`audit`] reports coverage, date ranges, price gaps and stale instruments.
//! - [`derive`] computes historical valuation and growth ratios from stored statements.
//! - [`query`] runs guarded operator SQL.
//!
//! ```rust,no_run
//! use secfeed_warehouse::{AuditOptions, Warehouse, WarehouseConfig};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let warehouse = Warehouse::open(WarehouseConfig::from_env())?;
//!     let report = warehouse.audit(&AuditOptions::default())?;
//!     println!("{} instruments in catalog", report.catalog_size);
//!     Ok(())
//! }
//! ```

pub mod audit;
pub mod derive;
pub mod duckdb;
pub mod migrations;
pub mod query;
pub mod records;
pub mod runs;
pub mod schema;
pub mod store;

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use ::duckdb::Connection;
use thiserror::Error;

pub use audit::{AuditOptions, CoverageReport, GapFinding, KindCoverage, StaleInstrument};
pub use derive::DeriveReport;
pub use duckdb::{AccessMode, DuckDbConnectionManager, PooledConnection};
pub use query::{QueryGuardrails, QueryResult, SqlColumn};
pub use records::{
    format_date, parse_date, ActionType, CorporateActionRecord, EarningsRecord, FieldSet,
    FieldValue, HistoricalMetricRecord, HolderRecord, InstrumentRecord, MetricSnapshotRecord,
    NormalizedBundle, PeriodType, PriceRecord, QualityEvent, QualityIssue, StatementRecord,
};
pub use runs::{CompletedKinds, OutcomeRecord, OutcomeStatus, RunRecord, RunStatus};
pub use schema::{ColumnSpec, ColumnType, EntityKind, TableSpec};
pub use store::{KindReport, PersistError, PersistErrorKind, PersistReport};

#[derive(Debug, Error)]
pub enum WarehouseError {
    #[error(transparent)]
    DuckDb(#[from] ::duckdb::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("query rejected: {0}")]
    QueryRejected(String),

    #[error("query timed out after {timeout_ms}ms")]
    QueryTimeout { timeout_ms: u64 },

    /// Stored data that does not decode into the expected domain value.
    #[error("invalid data in store: {0}")]
    InvalidData(String),
}

#[derive(Debug, Clone)]
pub struct WarehouseConfig {
    /// Root directory for secfeed state.
    pub home: PathBuf,
    pub db_path: PathBuf,
    pub max_pool_size: usize,
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        let home = resolve_home(None);
        Self {
            db_path: home.join("secfeed.duckdb"),
            home,
            max_pool_size: 4,
        }
    }
}

impl WarehouseConfig {
    /// Read `SECFEED_HOME`, `SECFEED_DB_PATH` and `SECFEED_POOL_SIZE`.
    pub fn from_env() -> Self {
        let home = resolve_home(env::var_os("SECFEED_HOME").map(PathBuf::from));
        let db_path = env::var_os("SECFEED_DB_PATH")
            .map(PathBuf::from)
            .filter(|path| !path.as_os_str().is_empty())
            .unwrap_or_else(|| home.join("secfeed.duckdb"));
        let max_pool_size = env::var("SECFEED_POOL_SIZE")
            .ok()
            .and_then(|value| value.trim().parse::<usize>().ok())
            .filter(|size| *size > 0)
            .unwrap_or(4);
        Self {
            home,
            db_path,
            max_pool_size,
        }
    }
}

/// Handle to the ingestion store. Cheap to clone; clones share one pool.
#[derive(Clone)]
pub struct Warehouse {
    manager: DuckDbConnectionManager,
}

impl Warehouse {
    /// Open (creating if needed) the database file and apply pending migrations.
    pub fn open(config: WarehouseConfig) -> Result<Self, WarehouseError> {
        if let Some(parent) = config.db_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let manager = DuckDbConnectionManager::open(config.db_path.clone(), config.max_pool_size)?;
        let warehouse = Self { manager };
        warehouse.initialize()?;
        tracing::debug!(db_path = %config.db_path.display(), "warehouse opened");
        Ok(warehouse)
    }

    fn initialize(&self) -> Result<(), WarehouseError> {
        let connection = self.manager.acquire(AccessMode::ReadWrite)?;
        migrations::apply_migrations(&connection)?;
        Ok(())
    }

    pub fn db_path(&self) -> &Path {
        self.manager.db_path()
    }
}

/// Commit on success, roll back on failure.
pub(crate) fn finalize_transaction<T, E>(
    connection: &Connection,
    result: Result<T, E>,
) -> Result<T, E>
where
    E: From<::duckdb::Error>,
{
    match result {
        Ok(value) => {
            connection.execute_batch("COMMIT")?;
            Ok(value)
        }
        Err(error) => {
            let _ = connection.execute_batch("ROLLBACK");
            Err(error)
        }
    }
}

fn resolve_home(explicit: Option<PathBuf>) -> PathBuf {
    if let Some(path) = explicit.filter(|path| !path.as_os_str().is_empty()) {
        return path;
    }

    if let Some(home) = env::var_os("HOME") {
        return PathBuf::from(home).join(".secfeed");
    }

    PathBuf::from(".secfeed")
}
