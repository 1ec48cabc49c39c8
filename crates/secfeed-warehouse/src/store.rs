//! Transactional upsert store.
//!
//! Every entity kind in a bundle is written in its own transaction on its own pooled
//! connection. A failure rolls back that kind only; the other kinds of the same
//! identifier still commit.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt::{Display, Formatter};

use ::duckdb::{params, Connection, ToSql};
use serde::Serialize;
use thiserror::Error;

use crate::duckdb::AccessMode;
use crate::records::{FieldValue, NormalizedBundle, QualityEvent, TableRow};
use crate::schema::{EntityKind, TableSpec};
use crate::{finalize_transaction, Warehouse};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PersistErrorKind {
    ConstraintViolation,
    RangeOverflow,
    ConnectionLost,
    /// Anything the classifier does not recognise.
    Database,
}

impl PersistErrorKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ConstraintViolation => "constraint_violation",
            Self::RangeOverflow => "range_overflow",
            Self::ConnectionLost => "connection_lost",
            Self::Database => "database",
        }
    }

    fn classify(message: &str) -> Self {
        if message.contains("Conversion Error")
            || message.contains("out of range")
            || message.contains("Out of Range")
        {
            Self::RangeOverflow
        } else if message.contains("Constraint") {
            Self::ConstraintViolation
        } else if message.contains("IO Error")
            || message.contains("Connection")
            || message.contains("invalidated")
        {
            Self::ConnectionLost
        } else {
            Self::Database
        }
    }
}

impl Display for PersistErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed entity-kind transaction.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("{kind}: {message}")]
pub struct PersistError {
    pub kind: PersistErrorKind,
    pub message: String,
}

impl From<::duckdb::Error> for PersistError {
    fn from(error: ::duckdb::Error) -> Self {
        let message = error.to_string();
        Self {
            kind: PersistErrorKind::classify(&message),
            message,
        }
    }
}

/// Outcome of one entity-kind transaction.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct KindReport {
    pub inserted: usize,
    pub updated: usize,
    /// Rows superseded by a later row with the same key in the same bundle.
    pub skipped: usize,
    /// Rows rolled back because the transaction failed.
    pub failed: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<PersistError>,
}

impl KindReport {
    fn failed(rows: usize, error: PersistError) -> Self {
        Self {
            failed: rows,
            error: Some(error),
            ..Self::default()
        }
    }

    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PersistReport {
    pub symbol: String,
    pub kinds: BTreeMap<EntityKind, KindReport>,
    pub quality_events: usize,
}

impl Warehouse {
    /// Persist every kind carried by `bundle`, one transaction per kind.
    ///
    /// Never fails as a whole: per-kind failures are reported in the returned
    /// [`PersistReport`].
    pub fn persist(&self, bundle: &NormalizedBundle) -> PersistReport {
        let symbol = bundle.symbol.as_str();
        let mut report = PersistReport {
            symbol: symbol.to_owned(),
            ..PersistReport::default()
        };

        if let Some(profile) = &bundle.profile {
            let outcome = self.persist_kind(symbol, std::slice::from_ref(profile));
            report.kinds.insert(EntityKind::Profile, outcome);
        }
        if let Some(metrics) = &bundle.metrics {
            let outcome = self.persist_kind(symbol, std::slice::from_ref(metrics));
            report.kinds.insert(EntityKind::Metrics, outcome);
        }
        if let Some(prices) = &bundle.prices {
            report
                .kinds
                .insert(EntityKind::PriceHistory, self.persist_kind(symbol, prices));
        }
        if let Some(statements) = &bundle.statements {
            report
                .kinds
                .insert(EntityKind::Statements, self.persist_kind(symbol, statements));
        }
        if let Some(actions) = &bundle.corporate_actions {
            report.kinds.insert(
                EntityKind::CorporateActions,
                self.persist_kind(symbol, actions),
            );
        }
        if let Some(holders) = &bundle.holders {
            report
                .kinds
                .insert(EntityKind::Holders, self.persist_kind(symbol, holders));
        }
        if let Some(earnings) = &bundle.earnings {
            report
                .kinds
                .insert(EntityKind::Earnings, self.persist_kind(symbol, earnings));
        }

        match self.record_quality_events(&bundle.quality_events) {
            Ok(count) => report.quality_events = count,
            Err(error) => {
                tracing::warn!(symbol, error = %error, "failed to record quality events");
            }
        }

        report
    }

    fn persist_kind<R: TableRow>(&self, symbol: &str, rows: &[R]) -> KindReport {
        let kind = R::spec().kind;
        match self.upsert_with_reconnect(symbol, rows) {
            Ok(report) => {
                tracing::debug!(
                    symbol,
                    kind = %kind,
                    inserted = report.inserted,
                    updated = report.updated,
                    skipped = report.skipped,
                    "persisted entity kind"
                );
                report
            }
            Err(error) => {
                tracing::warn!(symbol, kind = %kind, error = %error, "entity kind rolled back");
                KindReport::failed(rows.len(), error)
            }
        }
    }

    pub(crate) fn upsert_with_reconnect<R: TableRow>(
        &self,
        symbol: &str,
        rows: &[R],
    ) -> Result<KindReport, PersistError> {
        retry_on_connection_loss(symbol, R::spec().kind, || {
            let connection = self.manager.acquire(AccessMode::ReadWrite)?;
            let result = upsert_rows(&connection, symbol, rows);
            if matches!(&result, Err(error) if error.kind == PersistErrorKind::ConnectionLost) {
                connection.discard();
            }
            result
        })
    }

    pub(crate) fn record_quality_events(&self, events: &[QualityEvent]) -> Result<usize, PersistError> {
        if events.is_empty() {
            return Ok(0);
        }

        let connection = self.manager.acquire(AccessMode::ReadWrite)?;
        connection.execute_batch("BEGIN TRANSACTION")?;
        let result = (|| -> Result<usize, PersistError> {
            for event in events {
                connection.execute(
                    "INSERT INTO quality_events (symbol, entity_kind, column_name, issue, detail) \
                     VALUES (?, ?, ?, ?, ?)",
                    params![
                        event.symbol,
                        event.kind.as_str(),
                        event.column,
                        event.issue.label(),
                        event.issue.detail(),
                    ],
                )?;
            }
            Ok(events.len())
        })();

        finalize_transaction(&connection, result)
    }
}

/// Run `attempt` a second time, on a fresh connection, when the first one lost its
/// connection. Any other failure is returned as is.
fn retry_on_connection_loss<T>(
    symbol: &str,
    kind: EntityKind,
    mut attempt: impl FnMut() -> Result<T, PersistError>,
) -> Result<T, PersistError> {
    match attempt() {
        Err(error) if error.kind == PersistErrorKind::ConnectionLost => {
            tracing::warn!(
                symbol,
                kind = %kind,
                error = %error,
                "connection lost; retrying on a fresh connection"
            );
            attempt()
        }
        other => other,
    }
}

fn upsert_rows<R: TableRow>(
    connection: &Connection,
    symbol: &str,
    rows: &[R],
) -> Result<KindReport, PersistError> {
    let spec = R::spec();
    let mut report = KindReport::default();
    if rows.is_empty() {
        return Ok(report);
    }

    // Later rows win over earlier rows with the same key.
    let mut latest: HashMap<String, usize> = HashMap::with_capacity(rows.len());
    for (index, row) in rows.iter().enumerate() {
        if let Some(key) = key_text(&row.key()) {
            if latest.insert(key, index).is_some() {
                report.skipped += 1;
            }
        } else {
            report.skipped += 1;
        }
    }

    let sql = upsert_sql(spec);
    connection.execute_batch("BEGIN TRANSACTION")?;
    let result = (|| -> Result<(), PersistError> {
        let existing = existing_keys(connection, spec, symbol)?;
        let symbol_value = FieldValue::Text(symbol.to_owned());
        for (index, row) in rows.iter().enumerate() {
            let key = row.key();
            let Some(key_text) = key_text(&key) else {
                continue;
            };
            if latest.get(&key_text) != Some(&index) {
                continue;
            }

            let values = row.values();
            let bound: Vec<&dyn ToSql> = std::iter::once(&symbol_value)
                .chain(key.iter())
                .chain(values.iter())
                .map(|value| value as &dyn ToSql)
                .collect();
            connection.execute(sql.as_str(), bound.as_slice())?;

            if existing.contains(&key_text) {
                report.updated += 1;
            } else {
                report.inserted += 1;
            }
        }
        Ok(())
    })();

    finalize_transaction(connection, result)?;
    Ok(report)
}

/// `|`-joined key text, or `None` when any key part is null or empty.
fn key_text(key: &[FieldValue]) -> Option<String> {
    let parts = key
        .iter()
        .map(|value| value.key_text().filter(|text| !text.is_empty()))
        .collect::<Option<Vec<_>>>()?;
    Some(parts.join("|"))
}

fn existing_keys(
    connection: &Connection,
    spec: &TableSpec,
    symbol: &str,
) -> Result<HashSet<String>, ::duckdb::Error> {
    let select = if spec.keys.is_empty() {
        String::from("''")
    } else {
        spec.keys
            .iter()
            .map(|column| format!("CAST({} AS VARCHAR)", column.name))
            .collect::<Vec<_>>()
            .join(", ")
    };
    let sql = format!("SELECT {select} FROM {} WHERE symbol = ?", spec.table);
    let width = spec.keys.len().max(1);

    let mut statement = connection.prepare(sql.as_str())?;
    let mut rows = statement.query(params![symbol])?;
    let mut keys = HashSet::new();
    while let Some(row) = rows.next()? {
        let mut parts = Vec::with_capacity(width);
        for index in 0..width {
            parts.push(row.get::<_, String>(index)?);
        }
        keys.insert(parts.join("|"));
    }
    Ok(keys)
}

fn upsert_sql(spec: &TableSpec) -> String {
    let key_names: Vec<&str> = std::iter::once("symbol")
        .chain(spec.keys.iter().map(|column| column.name))
        .collect();
    let column_names: Vec<&str> = key_names
        .iter()
        .copied()
        .chain(spec.columns.iter().map(|column| column.name))
        .collect();
    let placeholders: Vec<&str> = std::iter::once("?")
        .chain(
            spec.keys
                .iter()
                .chain(spec.columns.iter())
                .map(|column| column.placeholder()),
        )
        .collect();
    let updates: Vec<String> = spec
        .columns
        .iter()
        .map(|column| format!("{name} = excluded.{name}", name = column.name))
        .chain(std::iter::once(String::from(
            "updated_at = excluded.updated_at",
        )))
        .collect();

    format!(
        "INSERT INTO {table} ({columns}, updated_at) VALUES ({values}, CURRENT_TIMESTAMP) \
         ON CONFLICT ({keys}) DO UPDATE SET {updates}",
        table = spec.table,
        columns = column_names.join(", "),
        values = placeholders.join(", "),
        keys = key_names.join(", "),
        updates = updates.join(", "),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::{
        FieldSet, HolderRecord, MetricSnapshotRecord, PriceRecord, QualityIssue,
    };
    use crate::schema::PRICE_HISTORY;
    use crate::WarehouseConfig;
    use tempfile::{tempdir, TempDir};
    use time::{Date, Month};

    fn open_warehouse() -> (TempDir, Warehouse) {
        let temp = tempdir().expect("tempdir");
        let home = temp.path().join("secfeed-home");
        let warehouse = Warehouse::open(WarehouseConfig {
            db_path: home.join("secfeed.duckdb"),
            home,
            max_pool_size: 2,
        })
        .expect("warehouse open");
        (temp, warehouse)
    }

    fn day(month: Month, day: u8) -> Date {
        Date::from_calendar_date(2024, month, day).expect("date")
    }

    fn count(warehouse: &Warehouse, sql: &str) -> i64 {
        let connection = warehouse
            .manager
            .acquire(AccessMode::ReadOnly)
            .expect("connection");
        connection
            .query_row(sql, [], |row| row.get(0))
            .expect("count")
    }

    #[test]
    fn classifies_duckdb_messages() {
        assert_eq!(
            PersistErrorKind::classify(
                "Conversion Error: Could not convert 1000000000000.0 to DECIMAL(12,8)"
            ),
            PersistErrorKind::RangeOverflow
        );
        assert_eq!(
            PersistErrorKind::classify("Constraint Error: CHECK constraint failed"),
            PersistErrorKind::ConstraintViolation
        );
        assert_eq!(
            PersistErrorKind::classify("FATAL Error: database has been invalidated"),
            PersistErrorKind::ConnectionLost
        );
        assert_eq!(
            PersistErrorKind::classify("Binder Error: something else"),
            PersistErrorKind::Database
        );
    }

    fn lost() -> PersistError {
        let message = "FATAL Error: database has been invalidated";
        PersistError {
            kind: PersistErrorKind::classify(message),
            message: message.to_owned(),
        }
    }

    #[test]
    fn lost_connection_is_retried_once() {
        let mut attempts = 0;

        let result = retry_on_connection_loss("TCS.NS", EntityKind::PriceHistory, || {
            attempts += 1;
            if attempts == 1 {
                Err(lost())
            } else {
                Ok(KindReport {
                    inserted: 2,
                    ..KindReport::default()
                })
            }
        });

        assert_eq!(attempts, 2);
        assert_eq!(result.expect("second attempt").inserted, 2);
    }

    #[test]
    fn connection_that_stays_lost_fails_after_the_retry() {
        let mut attempts = 0;

        let result: Result<KindReport, PersistError> =
            retry_on_connection_loss("TCS.NS", EntityKind::PriceHistory, || {
                attempts += 1;
                Err(lost())
            });

        assert_eq!(attempts, 2);
        assert_eq!(
            result.expect_err("still lost").kind,
            PersistErrorKind::ConnectionLost
        );
    }

    #[test]
    fn other_failures_are_not_retried() {
        let mut attempts = 0;

        let result: Result<KindReport, PersistError> =
            retry_on_connection_loss("TCS.NS", EntityKind::Metrics, || {
                attempts += 1;
                Err(PersistError {
                    kind: PersistErrorKind::RangeOverflow,
                    message: String::from("Conversion Error"),
                })
            });

        assert_eq!(attempts, 1);
        assert!(result.is_err());
    }

    #[test]
    fn upsert_sql_updates_payload_columns_on_conflict() {
        let sql = upsert_sql(&PRICE_HISTORY);
        assert!(sql.starts_with("INSERT INTO price_history (symbol, trade_date, open_price"));
        assert!(sql.contains("CAST(? AS DATE)"));
        assert!(sql.contains("ON CONFLICT (symbol, trade_date) DO UPDATE SET open_price = excluded.open_price"));
    }

    #[test]
    fn second_persist_updates_instead_of_inserting() {
        let (_temp, warehouse) = open_warehouse();
        let mut bundle = NormalizedBundle::new("INFY.NS");
        bundle.prices = Some(vec![
            PriceRecord::new(day(Month::January, 2)).with_ohlc(1.0, 2.0, 0.5, 1.5),
            PriceRecord::new(day(Month::January, 3)).with_ohlc(1.5, 2.5, 1.0, 2.0),
        ]);

        let first = warehouse.persist(&bundle);
        let second = warehouse.persist(&bundle);

        assert_eq!(first.kinds[&EntityKind::PriceHistory].inserted, 2);
        assert_eq!(second.kinds[&EntityKind::PriceHistory].inserted, 0);
        assert_eq!(second.kinds[&EntityKind::PriceHistory].updated, 2);
        assert_eq!(count(&warehouse, "SELECT COUNT(*) FROM price_history"), 2);
    }

    #[test]
    fn duplicate_keys_in_one_bundle_keep_the_last_row() {
        let (_temp, warehouse) = open_warehouse();
        let mut bundle = NormalizedBundle::new("TCS.NS");
        bundle.prices = Some(vec![
            PriceRecord::new(day(Month::March, 1)).with_ohlc(1.0, 1.0, 1.0, 1.0),
            PriceRecord::new(day(Month::March, 1)).with_ohlc(9.0, 9.0, 9.0, 9.0),
        ]);

        let report = warehouse.persist(&bundle);

        let prices = &report.kinds[&EntityKind::PriceHistory];
        assert_eq!((prices.inserted, prices.skipped), (1, 1));
        assert_eq!(
            count(
                &warehouse,
                "SELECT CAST(close_price AS BIGINT) FROM price_history"
            ),
            9
        );
    }

    #[test]
    fn overflow_fails_only_the_metrics_transaction() {
        let (_temp, warehouse) = open_warehouse();
        let mut fields = FieldSet::new();
        fields.insert("dividend_yield", FieldValue::Decimal(1e12));
        let mut bundle = NormalizedBundle::new("HDFCBANK.NS");
        bundle.metrics = Some(MetricSnapshotRecord { fields });
        bundle.prices = Some(vec![
            PriceRecord::new(day(Month::May, 6)).with_ohlc(10.0, 11.0, 9.0, 10.5)
        ]);
        bundle.holders = Some(vec![HolderRecord {
            holder_name: String::from("Vanguard"),
            report_date: day(Month::March, 31),
            shares: Some(1_000),
            market_value: Some(10_500.0),
            pct_held: Some(0.01),
        }]);

        let report = warehouse.persist(&bundle);

        let metrics = &report.kinds[&EntityKind::Metrics];
        assert_eq!(
            metrics.error.as_ref().map(|error| error.kind),
            Some(PersistErrorKind::RangeOverflow)
        );
        assert_eq!(metrics.failed, 1);
        assert!(report.kinds[&EntityKind::PriceHistory].succeeded());
        assert!(report.kinds[&EntityKind::Holders].succeeded());
        assert_eq!(count(&warehouse, "SELECT COUNT(*) FROM metric_snapshots"), 0);
        assert_eq!(count(&warehouse, "SELECT COUNT(*) FROM price_history"), 1);
    }

    #[test]
    fn quality_events_are_recorded_with_the_bundle() {
        let (_temp, warehouse) = open_warehouse();
        let mut bundle = NormalizedBundle::new("WIPRO.NS");
        bundle.quality_events.push(QualityEvent {
            symbol: String::from("WIPRO.NS"),
            kind: EntityKind::Metrics,
            column: String::from("payout_ratio"),
            issue: QualityIssue::OutOfRange {
                value: 1e9,
                bound: 10_000.0,
            },
        });

        let report = warehouse.persist(&bundle);

        assert_eq!(report.quality_events, 1);
        assert_eq!(
            count(
                &warehouse,
                "SELECT COUNT(*) FROM quality_events WHERE issue = 'out_of_range'"
            ),
            1
        );
    }
}
