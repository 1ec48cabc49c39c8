//! Completeness auditor: per-kind coverage, price gaps and stale instruments.

use std::collections::BTreeSet;

use ::duckdb::{params, Connection};
use serde::Serialize;
use time::{Date, Duration, Weekday};

use crate::duckdb::AccessMode;
use crate::records::{format_date, parse_date};
use crate::schema::{EntityKind, TableSpec};
use crate::{Warehouse, WarehouseError};

#[derive(Debug, Clone)]
pub struct AuditOptions {
    /// Identifiers that define 100% coverage; defaults to the `instruments` table.
    pub catalog: Option<Vec<String>>,
    pub gap_tolerance_days: i64,
    pub max_gap_findings: usize,
    pub stale_after_days: i64,
}

impl Default for AuditOptions {
    fn default() -> Self {
        Self {
            catalog: None,
            gap_tolerance_days: 5,
            max_gap_findings: 100,
            stale_after_days: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KindCoverage {
    pub kind: EntityKind,
    pub total_records: u64,
    pub distinct_instruments: usize,
    pub coverage_pct: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub earliest: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GapFinding {
    pub symbol: String,
    pub from: String,
    pub to: String,
    pub missing_weekdays: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StaleInstrument {
    pub symbol: String,
    pub latest_price: String,
    pub days_behind: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoverageReport {
    pub catalog_size: usize,
    pub kinds: Vec<KindCoverage>,
    pub gaps: Vec<GapFinding>,
    pub total_gaps: usize,
    /// Newest price date in the store; staleness is measured against it.
    pub reference_date: Option<String>,
    pub stale: Vec<StaleInstrument>,
    pub missing_prices: Vec<String>,
}

impl CoverageReport {
    pub fn kind(&self, kind: EntityKind) -> Option<&KindCoverage> {
        self.kinds.iter().find(|coverage| coverage.kind == kind)
    }
}

impl Warehouse {
    /// Summarize what the store holds. Issues only reads.
    pub fn audit(&self, options: &AuditOptions) -> Result<CoverageReport, WarehouseError> {
        let connection = self.manager.acquire(AccessMode::ReadOnly)?;
        let catalog: BTreeSet<String> = match &options.catalog {
            Some(symbols) => symbols.iter().cloned().collect(),
            None => distinct_symbols(&connection, "instruments")?,
        };

        let mut kinds = Vec::with_capacity(EntityKind::ALL.len());
        for kind in EntityKind::ALL {
            kinds.push(kind_coverage(&connection, kind.table(), &catalog)?);
        }

        let (gaps, total_gaps) = price_gaps(&connection, options)?;
        let latest_prices = latest_prices(&connection)?;
        let reference = latest_prices.iter().map(|(_, date)| *date).max();

        let mut stale = Vec::new();
        let mut missing_prices = Vec::new();
        for symbol in &catalog {
            let latest = latest_prices
                .iter()
                .find(|(priced, _)| priced == symbol)
                .map(|(_, date)| *date);
            match (latest, reference) {
                (None, _) => missing_prices.push(symbol.clone()),
                (Some(latest), Some(reference)) => {
                    let days_behind = (reference - latest).whole_days();
                    if days_behind > options.stale_after_days {
                        stale.push(StaleInstrument {
                            symbol: symbol.clone(),
                            latest_price: format_date(latest),
                            days_behind,
                        });
                    }
                }
                (Some(_), None) => {}
            }
        }

        let report = CoverageReport {
            catalog_size: catalog.len(),
            kinds,
            gaps,
            total_gaps,
            reference_date: reference.map(format_date),
            stale,
            missing_prices,
        };
        tracing::info!(
            catalog = report.catalog_size,
            gaps = report.total_gaps,
            stale = report.stale.len(),
            missing_prices = report.missing_prices.len(),
            "audit complete"
        );
        Ok(report)
    }
}

fn distinct_symbols(connection: &Connection, table: &str) -> Result<BTreeSet<String>, WarehouseError> {
    let sql = format!("SELECT DISTINCT symbol FROM {table}");
    let mut statement = connection.prepare(sql.as_str())?;
    let rows = statement.query_map([], |row| row.get::<_, String>(0))?;
    let mut symbols = BTreeSet::new();
    for row in rows {
        symbols.insert(row?);
    }
    Ok(symbols)
}

fn kind_coverage(
    connection: &Connection,
    spec: &TableSpec,
    catalog: &BTreeSet<String>,
) -> Result<KindCoverage, WarehouseError> {
    let total: i64 = connection.query_row(
        format!("SELECT COUNT(*) FROM {}", spec.table).as_str(),
        [],
        |row| row.get(0),
    )?;
    let distinct = distinct_symbols(connection, spec.table)?
        .intersection(catalog)
        .count();

    let (earliest, latest) = match spec.date_column {
        Some(column) => connection.query_row(
            format!(
                "SELECT CAST(MIN({column}) AS VARCHAR), CAST(MAX({column}) AS VARCHAR) \
                 FROM {table} WHERE {column} IS NOT NULL",
                table = spec.table
            )
            .as_str(),
            [],
            |row| Ok((row.get::<_, Option<String>>(0)?, row.get::<_, Option<String>>(1)?)),
        )?,
        None => (None, None),
    };

    Ok(KindCoverage {
        kind: spec.kind,
        total_records: u64::try_from(total).unwrap_or_default(),
        distinct_instruments: distinct,
        coverage_pct: coverage_pct(distinct, catalog.len()),
        earliest,
        latest,
    })
}

fn coverage_pct(covered: usize, catalog: usize) -> f64 {
    if catalog == 0 {
        return 0.0;
    }
    let pct = covered as f64 * 100.0 / catalog as f64;
    (pct * 10.0).round() / 10.0
}

fn price_gaps(
    connection: &Connection,
    options: &AuditOptions,
) -> Result<(Vec<GapFinding>, usize), WarehouseError> {
    let mut statement = connection.prepare(
        "SELECT symbol, CAST(prev_date AS VARCHAR), CAST(trade_date AS VARCHAR) FROM ( \
             SELECT symbol, trade_date, \
                    LAG(trade_date) OVER (PARTITION BY symbol ORDER BY trade_date) AS prev_date \
             FROM price_history WHERE trade_date IS NOT NULL \
         ) WHERE prev_date IS NOT NULL AND date_diff('day', prev_date, trade_date) > ? \
         ORDER BY symbol, trade_date",
    )?;
    let mut rows = statement.query(params![options.gap_tolerance_days])?;

    let mut gaps = Vec::new();
    let mut total = 0;
    while let Some(row) = rows.next()? {
        total += 1;
        if gaps.len() >= options.max_gap_findings {
            continue;
        }
        let symbol: String = row.get(0)?;
        let from: String = row.get(1)?;
        let to: String = row.get(2)?;
        let missing_weekdays = match (parse_date(&from), parse_date(&to)) {
            (Some(start), Some(end)) => weekdays_between(start, end),
            _ => 0,
        };
        gaps.push(GapFinding {
            symbol,
            from,
            to,
            missing_weekdays,
        });
    }
    Ok((gaps, total))
}

fn latest_prices(connection: &Connection) -> Result<Vec<(String, Date)>, WarehouseError> {
    let mut statement = connection.prepare(
        "SELECT symbol, CAST(MAX(trade_date) AS VARCHAR) FROM price_history \
         WHERE trade_date IS NOT NULL GROUP BY symbol",
    )?;
    let mut rows = statement.query([])?;
    let mut latest = Vec::new();
    while let Some(row) = rows.next()? {
        let symbol: String = row.get(0)?;
        let date: String = row.get(1)?;
        let date = parse_date(&date).ok_or_else(|| {
            WarehouseError::InvalidData(format!("unparseable price date '{date}' for {symbol}"))
        })?;
        latest.push((symbol, date));
    }
    Ok(latest)
}

/// Weekdays strictly between `start` and `end`.
fn weekdays_between(start: Date, end: Date) -> u32 {
    let mut count = 0;
    let mut day = start + Duration::days(1);
    while day < end {
        if !matches!(day.weekday(), Weekday::Saturday | Weekday::Sunday) {
            count += 1;
        }
        day += Duration::days(1);
    }
    count
}
