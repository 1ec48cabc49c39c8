//! Guarded SQL for operators inspecting the store.
//!
//! One statement per call, a leading keyword from a read-only allowlist, and a row
//! cap. The pooled connection itself can write; the allowlist is the only barrier.
//! The timeout is checked between rows, so a single slow row is not interrupted.

use std::time::{Duration, Instant};

use ::duckdb::types::{TimeUnit, Value as DuckValue};
use ::duckdb::{params, Statement};
use serde::Serialize;
use serde_json::{Number, Value};
use time::format_description::well_known::Rfc3339;
use time::{Date, OffsetDateTime};

use crate::duckdb::AccessMode;
use crate::records::format_date;
use crate::{Warehouse, WarehouseError};

const READ_ONLY_KEYWORDS: [&str; 6] = ["SELECT", "WITH", "EXPLAIN", "SHOW", "DESCRIBE", "SUMMARIZE"];

/// Julian day number of 1970-01-01.
const UNIX_EPOCH_JULIAN_DAY: i32 = 2_440_588;

#[derive(Debug, Clone, Copy)]
pub struct QueryGuardrails {
    pub max_rows: usize,
    pub query_timeout_ms: u64,
}

impl Default for QueryGuardrails {
    fn default() -> Self {
        Self {
            max_rows: 10_000,
            query_timeout_ms: 5_000,
        }
    }
}

impl QueryGuardrails {
    fn check(self) -> Result<Duration, WarehouseError> {
        if self.max_rows == 0 {
            return Err(rejected("max rows must be greater than zero"));
        }
        if self.query_timeout_ms == 0 {
            return Err(rejected("query timeout must be greater than zero"));
        }
        Ok(Duration::from_millis(self.query_timeout_ms))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SqlColumn {
    pub name: String,
    #[serde(rename = "type")]
    pub r#type: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryResult {
    pub columns: Vec<SqlColumn>,
    pub rows: Vec<Vec<Value>>,
    pub row_count: usize,
    /// Set when `max_rows` cut the result short.
    pub truncated: bool,
}

impl Warehouse {
    /// Run one allowlisted statement against the store.
    pub fn execute_query(
        &self,
        sql: &str,
        guardrails: QueryGuardrails,
    ) -> Result<QueryResult, WarehouseError> {
        let timeout = guardrails.check()?;
        let sql = read_only_statement(sql)?;
        let started = Instant::now();

        let connection = self.manager.acquire(AccessMode::ReadOnly)?;
        let mut statement = connection.prepare(sql)?;
        let mut cursor = statement.query(params![])?;
        let columns = cursor.as_ref().map(describe).unwrap_or_default();

        let mut rows = Vec::new();
        let mut truncated = false;
        while let Some(row) = cursor.next()? {
            if started.elapsed() > timeout {
                return Err(timed_out(timeout));
            }
            if rows.len() == guardrails.max_rows {
                truncated = true;
                break;
            }
            let mut values = Vec::with_capacity(columns.len());
            for index in 0..columns.len() {
                values.push(json_value(row.get::<_, DuckValue>(index)?));
            }
            rows.push(values);
        }

        tracing::debug!(
            rows = rows.len(),
            truncated,
            elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            "query executed"
        );
        Ok(QueryResult {
            columns,
            row_count: rows.len(),
            rows,
            truncated,
        })
    }
}

/// Column names and types of an executed statement.
fn describe(statement: &Statement<'_>) -> Vec<SqlColumn> {
    (0..statement.column_count())
        .map(|index| SqlColumn {
            name: statement
                .column_name(index)
                .map_or_else(|_| format!("column_{index}"), ToString::to_string),
            r#type: statement.column_type(index).to_string(),
        })
        .collect()
}

/// Trim, drop trailing semicolons and accept a single read-only statement.
fn read_only_statement(sql: &str) -> Result<&str, WarehouseError> {
    let sql = sql.trim().trim_end_matches(';').trim();
    let Some(keyword) = sql.split_whitespace().next() else {
        return Err(rejected("query must not be empty"));
    };
    if !READ_ONLY_KEYWORDS
        .iter()
        .any(|allowed| keyword.eq_ignore_ascii_case(allowed))
    {
        return Err(rejected(&format!(
            "{keyword} is not allowed; use one of {}",
            READ_ONLY_KEYWORDS.join(", ")
        )));
    }
    if sql.contains(';') {
        return Err(rejected("one statement per query"));
    }
    Ok(sql)
}

fn json_value(value: DuckValue) -> Value {
    match value {
        DuckValue::Null => Value::Null,
        DuckValue::Boolean(flag) => Value::Bool(flag),
        DuckValue::TinyInt(number) => Value::from(number),
        DuckValue::SmallInt(number) => Value::from(number),
        DuckValue::Int(number) => Value::from(number),
        DuckValue::BigInt(number) => Value::from(number),
        DuckValue::UTinyInt(number) => Value::from(number),
        DuckValue::USmallInt(number) => Value::from(number),
        DuckValue::UInt(number) => Value::from(number),
        DuckValue::UBigInt(number) => Value::from(number),
        DuckValue::HugeInt(number) => {
            i64::try_from(number).map_or_else(|_| Value::String(number.to_string()), Value::from)
        }
        DuckValue::Float(number) => float(f64::from(number)),
        DuckValue::Double(number) => float(number),
        DuckValue::Decimal(number) => number
            .to_string()
            .parse::<f64>()
            .map_or(Value::Null, float),
        DuckValue::Text(text) => Value::String(text),
        DuckValue::Date32(days) => Date::from_julian_day(UNIX_EPOCH_JULIAN_DAY + days)
            .map_or(Value::Null, |date| Value::String(format_date(date))),
        DuckValue::Timestamp(unit, ticks) => timestamp(unit, ticks),
        other => Value::String(format!("{other:?}")),
    }
}

fn float(number: f64) -> Value {
    Number::from_f64(number).map_or(Value::Null, Value::Number)
}

fn timestamp(unit: TimeUnit, ticks: i64) -> Value {
    let nanos = i128::from(ticks)
        * match unit {
            TimeUnit::Second => 1_000_000_000,
            TimeUnit::Millisecond => 1_000_000,
            TimeUnit::Microsecond => 1_000,
            TimeUnit::Nanosecond => 1,
        };
    OffsetDateTime::from_unix_timestamp_nanos(nanos)
        .ok()
        .and_then(|instant| instant.format(&Rfc3339).ok())
        .map_or(Value::Null, Value::String)
}

fn rejected(reason: &str) -> WarehouseError {
    WarehouseError::QueryRejected(reason.to_owned())
}

fn timed_out(timeout: Duration) -> WarehouseError {
    WarehouseError::QueryTimeout {
        timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::{NormalizedBundle, PriceRecord};
    use crate::WarehouseConfig;
    use tempfile::{tempdir, TempDir};
    use time::Month;

    fn open_warehouse() -> (TempDir, Warehouse) {
        let temp = tempdir().expect("tempdir");
        let home = temp.path().to_path_buf();
        let warehouse = Warehouse::open(WarehouseConfig {
            db_path: home.join("query.duckdb"),
            home,
            max_pool_size: 2,
        })
        .expect("warehouse open");
        (temp, warehouse)
    }

    #[test]
    fn lists_ingestion_tables() {
        let (_temp, warehouse) = open_warehouse();

        let result = warehouse
            .execute_query(
                "SELECT table_name FROM information_schema.tables WHERE table_name = 'price_history';",
                QueryGuardrails::default(),
            )
            .expect("query");

        assert_eq!(result.row_count, 1);
        assert_eq!(result.columns[0].name, "table_name");
        assert_eq!(result.rows[0][0], Value::String(String::from("price_history")));
    }

    #[test]
    fn dates_are_rendered_as_iso_strings() {
        let (_temp, warehouse) = open_warehouse();
        let day = Date::from_calendar_date(2024, Month::January, 2).expect("date");
        let mut bundle = NormalizedBundle::new("TCS.NS");
        bundle.prices = Some(vec![PriceRecord::new(day).with_ohlc(1.0, 2.0, 0.5, 1.5)]);
        warehouse.persist(&bundle);

        let result = warehouse
            .execute_query(
                "SELECT trade_date, close_price FROM price_history",
                QueryGuardrails::default(),
            )
            .expect("query");

        assert_eq!(result.rows[0][0], Value::String(String::from("2024-01-02")));
        assert_eq!(result.rows[0][1], serde_json::json!(1.5));
    }

    #[test]
    fn rejects_writes_and_stacked_statements() {
        let (_temp, warehouse) = open_warehouse();

        for sql in [
            "DELETE FROM price_history",
            "SELECT 1; DROP TABLE instruments",
            "   ",
        ] {
            let error = warehouse
                .execute_query(sql, QueryGuardrails::default())
                .expect_err("should reject");
            assert!(matches!(error, WarehouseError::QueryRejected(_)), "{sql}");
        }
    }

    #[test]
    fn empty_results_still_describe_their_columns() {
        let (_temp, warehouse) = open_warehouse();

        let result = warehouse
            .execute_query(
                "SELECT symbol, trade_date FROM price_history",
                QueryGuardrails::default(),
            )
            .expect("query");

        assert_eq!(result.row_count, 0);
        let names: Vec<&str> = result.columns.iter().map(|column| column.name.as_str()).collect();
        assert_eq!(names, vec!["symbol", "trade_date"]);
    }

    #[test]
    fn statement_runs_once_per_query() {
        let (_temp, warehouse) = open_warehouse();
        warehouse
            .manager
            .acquire(AccessMode::ReadWrite)
            .expect("connection")
            .execute_batch("CREATE SEQUENCE calls START 1")
            .expect("sequence");

        let result = warehouse
            .execute_query("SELECT nextval('calls') AS value", QueryGuardrails::default())
            .expect("query");

        assert_eq!(result.columns[0].name, "value");
        assert_eq!(result.rows[0][0], serde_json::json!(1));
    }

    #[test]
    fn truncates_at_max_rows() {
        let (_temp, warehouse) = open_warehouse();

        let result = warehouse
            .execute_query(
                "select * from range(10)",
                QueryGuardrails {
                    max_rows: 3,
                    query_timeout_ms: 5_000,
                },
            )
            .expect("query");

        assert_eq!(result.row_count, 3);
        assert!(result.truncated);
    }
}
