//! Historical ratios derived from stored statements and prices.
//!
//! Each statement period is paired with the last close on or before its period end
//! and with the statement of the same type one year earlier. Ratios go through the
//! same scale and bound checks as fetched metrics; values that would not fit are
//! dropped with a quality event instead of failing the symbol.

use std::collections::BTreeMap;

use serde::Serialize;
use time::{Date, Duration};

use crate::duckdb::AccessMode;
use crate::records::{parse_date, FieldSet, FieldValue, HistoricalMetricRecord, PeriodType};
use crate::records::{QualityEvent, QualityIssue};
use crate::schema::{ColumnType, TableSpec, HISTORICAL_METRICS};
use crate::{Warehouse, WarehouseError};

/// How far the prior-year statement may sit from exactly one year back.
const PRIOR_YEAR_TOLERANCE_DAYS: i64 = 45;

const FACTS_SQL: &str = "\
SELECT s.symbol, CAST(s.period_end AS VARCHAR), s.period_type,
       CAST(s.total_revenue AS DOUBLE), CAST(s.gross_profit AS DOUBLE),
       CAST(s.operating_income AS DOUBLE), CAST(s.net_income AS DOUBLE),
       CAST(s.diluted_eps AS DOUBLE), CAST(s.total_assets AS DOUBLE),
       CAST(s.current_assets AS DOUBLE), CAST(s.current_liabilities AS DOUBLE),
       CAST(s.stockholders_equity AS DOUBLE), CAST(s.total_debt AS DOUBLE),
       CAST(s.shares_issued AS DOUBLE), CAST(s.operating_cash_flow AS DOUBLE),
       CAST(s.free_cash_flow AS DOUBLE),
       CAST(p.trade_date AS VARCHAR), CAST(p.close_price AS DOUBLE)
FROM financial_statements s
ASOF LEFT JOIN (
    SELECT symbol, trade_date, close_price FROM price_history WHERE close_price IS NOT NULL
) p ON s.symbol = p.symbol AND s.period_end >= p.trade_date
ORDER BY s.symbol, s.period_type, s.period_end";

/// Statement figures for one period plus the close it is valued at.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PeriodFacts {
    pub period_end: Option<Date>,
    pub total_revenue: Option<f64>,
    pub gross_profit: Option<f64>,
    pub operating_income: Option<f64>,
    pub net_income: Option<f64>,
    pub diluted_eps: Option<f64>,
    pub total_assets: Option<f64>,
    pub current_assets: Option<f64>,
    pub current_liabilities: Option<f64>,
    pub stockholders_equity: Option<f64>,
    pub total_debt: Option<f64>,
    pub shares: Option<f64>,
    pub operating_cash_flow: Option<f64>,
    pub free_cash_flow: Option<f64>,
    pub price_date: Option<Date>,
    pub close_price: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DeriveReport {
    pub symbols: usize,
    pub periods: usize,
    pub inserted: usize,
    pub updated: usize,
    pub quality_events: usize,
    /// Symbols whose transaction rolled back.
    pub failed_symbols: Vec<String>,
}

impl Warehouse {
    /// Recompute `historical_metrics` for `symbols`, or for every symbol with
    /// statements when `None`. One transaction per symbol.
    pub fn derive_historical_metrics(
        &self,
        symbols: Option<&[String]>,
    ) -> Result<DeriveReport, WarehouseError> {
        let facts = self.load_period_facts()?;
        let mut report = DeriveReport::default();

        for (symbol, periods) in facts {
            if symbols.is_some_and(|wanted| !wanted.iter().any(|name| *name == symbol)) {
                continue;
            }
            report.symbols += 1;

            let mut events = Vec::new();
            let records = derive_symbol(&symbol, &periods, &mut events);
            report.periods += records.len();

            match self.upsert_with_reconnect(&symbol, &records) {
                Ok(written) => {
                    report.inserted += written.inserted;
                    report.updated += written.updated;
                }
                Err(error) => {
                    tracing::warn!(symbol = %symbol, error = %error, "historical metrics rolled back");
                    report.failed_symbols.push(symbol);
                    continue;
                }
            }

            match self.record_quality_events(&events) {
                Ok(count) => report.quality_events += count,
                Err(error) => {
                    tracing::warn!(symbol = %symbol, error = %error, "failed to record quality events");
                }
            }
        }

        tracing::info!(
            symbols = report.symbols,
            periods = report.periods,
            inserted = report.inserted,
            updated = report.updated,
            failed = report.failed_symbols.len(),
            "historical metrics derived"
        );
        Ok(report)
    }

    fn load_period_facts(
        &self,
    ) -> Result<BTreeMap<String, BTreeMap<PeriodType, Vec<PeriodFacts>>>, WarehouseError> {
        let connection = self.manager.acquire(AccessMode::ReadOnly)?;
        let mut statement = connection.prepare(FACTS_SQL)?;
        let mut rows = statement.query([])?;

        let mut facts: BTreeMap<String, BTreeMap<PeriodType, Vec<PeriodFacts>>> = BTreeMap::new();
        while let Some(row) = rows.next()? {
            let symbol: String = row.get(0)?;
            let period_end: String = row.get(1)?;
            let period_type: String = row.get(2)?;
            let period_type = period_type
                .parse::<PeriodType>()
                .map_err(WarehouseError::InvalidData)?;
            let price_date: Option<String> = row.get(16)?;

            let period = PeriodFacts {
                period_end: parse_date(&period_end),
                total_revenue: row.get(3)?,
                gross_profit: row.get(4)?,
                operating_income: row.get(5)?,
                net_income: row.get(6)?,
                diluted_eps: row.get(7)?,
                total_assets: row.get(8)?,
                current_assets: row.get(9)?,
                current_liabilities: row.get(10)?,
                stockholders_equity: row.get(11)?,
                total_debt: row.get(12)?,
                shares: row.get(13)?,
                operating_cash_flow: row.get(14)?,
                free_cash_flow: row.get(15)?,
                price_date: price_date.as_deref().and_then(parse_date),
                close_price: row.get(17)?,
            };
            if period.period_end.is_none() {
                return Err(WarehouseError::InvalidData(format!(
                    "unparseable period end '{period_end}' for {symbol}"
                )));
            }
            facts
                .entry(symbol)
                .or_default()
                .entry(period_type)
                .or_default()
                .push(period);
        }
        Ok(facts)
    }
}

fn derive_symbol(
    symbol: &str,
    periods: &BTreeMap<PeriodType, Vec<PeriodFacts>>,
    events: &mut Vec<QualityEvent>,
) -> Vec<HistoricalMetricRecord> {
    let mut records = Vec::new();
    for (period_type, series) in periods {
        for current in series {
            let Some(period_end) = current.period_end else {
                continue;
            };
            let prior = prior_year(series, period_end);
            let fields = checked(symbol, &HISTORICAL_METRICS, derive_period(current, prior), events);
            if fields.is_empty() {
                continue;
            }
            records.push(HistoricalMetricRecord {
                period_end,
                period_type: *period_type,
                fields,
            });
        }
    }
    records
}

/// Latest period of the same series on or before one year earlier, if close enough.
fn prior_year(series: &[PeriodFacts], period_end: Date) -> Option<&PeriodFacts> {
    let target = period_end
        .replace_year(period_end.year() - 1)
        .unwrap_or(period_end - Duration::days(365));
    series
        .iter()
        .filter(|period| period.period_end.is_some_and(|end| end <= target))
        .max_by_key(|period| period.period_end)
        .filter(|period| {
            period
                .period_end
                .is_some_and(|end| (target - end).whole_days() <= PRIOR_YEAR_TOLERANCE_DAYS)
        })
}

/// Raw ratios for one period. Denominators must be positive except for earnings
/// growth, which divides by the magnitude of the prior figure.
pub fn derive_period(current: &PeriodFacts, prior: Option<&PeriodFacts>) -> Vec<(&'static str, FieldValue)> {
    let mut values: Vec<(&'static str, FieldValue)> = Vec::new();
    let mut put = |name: &'static str, value: Option<f64>| {
        if let Some(value) = value {
            values.push((name, FieldValue::Decimal(value)));
        }
    };

    let price = current.close_price;
    let revenue = positive(current.total_revenue);
    let shares = positive(current.shares);
    let equity = positive(current.stockholders_equity);
    let market_cap = price.zip(shares).map(|(price, shares)| price * shares);
    let book_value_per_share = ratio(current.stockholders_equity, shares);

    put("close_price", price);
    put("market_cap", market_cap);
    put("book_value_per_share", book_value_per_share);
    put("trailing_pe", ratio(price, positive(current.diluted_eps)));
    put("price_to_book", ratio(price, positive(book_value_per_share)));
    put("price_to_sales", ratio(market_cap, revenue));
    put("gross_margin", ratio(current.gross_profit, revenue));
    put("operating_margin", ratio(current.operating_income, revenue));
    put("profit_margin", ratio(current.net_income, revenue));
    put("return_on_assets", ratio(current.net_income, positive(current.total_assets)));
    put("return_on_equity", ratio(current.net_income, equity));
    put("debt_to_equity", ratio(current.total_debt, equity));
    put("current_ratio", ratio(current.current_assets, positive(current.current_liabilities)));
    put("operating_cashflow", current.operating_cash_flow);
    put("free_cashflow", current.free_cash_flow);
    put("fcf_per_share", ratio(current.free_cash_flow, shares));

    if let Some(prior) = prior {
        put(
            "revenue_growth_yoy",
            current
                .total_revenue
                .zip(positive(prior.total_revenue))
                .map(|(now, before)| (now - before) / before),
        );
        put(
            "earnings_growth_yoy",
            current
                .net_income
                .zip(prior.net_income.filter(|before| *before != 0.0))
                .map(|(now, before)| (now - before) / before.abs()),
        );
    }

    if price.is_some() {
        if let Some(day) = current.price_date {
            values.push(("price_date", FieldValue::Date(day)));
        }
    }
    values
}

/// Keep values that fit their column at its scale; report the rest.
fn checked(
    symbol: &str,
    spec: &TableSpec,
    values: Vec<(&'static str, FieldValue)>,
    events: &mut Vec<QualityEvent>,
) -> FieldSet {
    let mut fields = FieldSet::new();
    for (name, value) in values {
        let Some(column) = spec.column(name) else {
            continue;
        };
        if let (FieldValue::Decimal(number), ColumnType::Decimal { .. }) = (&value, column.ty) {
            let bound = column.decimal_bound().unwrap_or(f64::MAX);
            if !number.is_finite() || column.round_to_scale(*number).abs() >= bound {
                events.push(QualityEvent {
                    symbol: symbol.to_owned(),
                    kind: spec.kind,
                    column: format!("{}.{name}", spec.table),
                    issue: QualityIssue::OutOfRange {
                        value: *number,
                        bound,
                    },
                });
                continue;
            }
        }
        fields.insert(column.name, value);
    }
    fields
}

fn positive(value: Option<f64>) -> Option<f64> {
    value.filter(|value| *value > 0.0)
}

fn ratio(numerator: Option<f64>, denominator: Option<f64>) -> Option<f64> {
    numerator
        .zip(denominator.filter(|value| *value != 0.0))
        .map(|(numerator, denominator)| numerator / denominator)
}
