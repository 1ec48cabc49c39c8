//! Canonical entity records handed from the normalizer to the store.

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

use ::duckdb::types::{ToSqlOutput, Value as DuckValue};
use ::duckdb::ToSql;
use serde::{Deserialize, Serialize};
use time::{Date, Month};

use crate::schema::{
    EntityKind, TableSpec, CORPORATE_ACTIONS, EARNINGS, FINANCIAL_STATEMENTS,
    HISTORICAL_METRICS, HOLDERS, INSTRUMENTS, METRIC_SNAPSHOTS, PRICE_HISTORY,
};

/// A single column value after normalization. `Null` means "absent".
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Null,
    Decimal(f64),
    Integer(i64),
    Text(String),
    Date(Date),
}

impl FieldValue {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Decimal(value) => Some(*value),
            Self::Integer(value) => Some(*value as f64),
            _ => None,
        }
    }

    /// Render key values the way `CAST(column AS VARCHAR)` does.
    pub(crate) fn key_text(&self) -> Option<String> {
        match self {
            Self::Null => None,
            Self::Decimal(value) => Some(value.to_string()),
            Self::Integer(value) => Some(value.to_string()),
            Self::Text(value) => Some(value.clone()),
            Self::Date(value) => Some(format_date(*value)),
        }
    }
}

impl From<Option<f64>> for FieldValue {
    fn from(value: Option<f64>) -> Self {
        value.map_or(Self::Null, Self::Decimal)
    }
}

impl From<Option<i64>> for FieldValue {
    fn from(value: Option<i64>) -> Self {
        value.map_or(Self::Null, Self::Integer)
    }
}

impl From<Date> for FieldValue {
    fn from(value: Date) -> Self {
        Self::Date(value)
    }
}

impl ToSql for FieldValue {
    fn to_sql(&self) -> ::duckdb::Result<ToSqlOutput<'_>> {
        let value = match self {
            Self::Null => DuckValue::Null,
            Self::Decimal(value) => DuckValue::Double(*value),
            Self::Integer(value) => DuckValue::BigInt(*value),
            Self::Text(value) => DuckValue::Text(value.clone()),
            // Bound as text against a `CAST(? AS DATE)` placeholder.
            Self::Date(value) => DuckValue::Text(format_date(*value)),
        };
        Ok(ToSqlOutput::Owned(value))
    }
}

/// Column name -> value for the wide, mapping-driven tables.
pub type FieldSet = BTreeMap<&'static str, FieldValue>;

/// Statement period granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeriodType {
    Annual,
    Quarterly,
}

impl PeriodType {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Annual => "annual",
            Self::Quarterly => "quarterly",
        }
    }
}

impl Display for PeriodType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PeriodType {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        [Self::Annual, Self::Quarterly]
            .into_iter()
            .find(|period| period.as_str() == value)
            .ok_or_else(|| format!("unknown period type '{value}'"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    Dividend,
    Split,
}

impl ActionType {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Dividend => "dividend",
            Self::Split => "split",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct InstrumentRecord {
    pub fields: FieldSet,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricSnapshotRecord {
    pub fields: FieldSet,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatementRecord {
    pub period_end: Date,
    pub period_type: PeriodType,
    pub fields: FieldSet,
}

/// One derived period; see [`crate::derive`].
#[derive(Debug, Clone, PartialEq)]
pub struct HistoricalMetricRecord {
    pub period_end: Date,
    pub period_type: PeriodType,
    pub fields: FieldSet,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PriceRecord {
    pub trade_date: Date,
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub close: Option<f64>,
    pub adj_close: Option<f64>,
    pub volume: Option<i64>,
    pub dividend: Option<f64>,
    pub split_ratio: Option<f64>,
}

impl PriceRecord {
    pub fn new(trade_date: Date) -> Self {
        Self {
            trade_date,
            open: None,
            high: None,
            low: None,
            close: None,
            adj_close: None,
            volume: None,
            dividend: None,
            split_ratio: None,
        }
    }

    pub fn with_ohlc(mut self, open: f64, high: f64, low: f64, close: f64) -> Self {
        self.open = Some(open);
        self.high = Some(high);
        self.low = Some(low);
        self.close = Some(close);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CorporateActionRecord {
    pub action_date: Date,
    pub action_type: ActionType,
    pub amount: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HolderRecord {
    pub holder_name: String,
    pub report_date: Date,
    pub shares: Option<i64>,
    pub market_value: Option<f64>,
    pub pct_held: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EarningsRecord {
    pub quarter_end: Date,
    pub eps_actual: Option<f64>,
    pub eps_estimate: Option<f64>,
    pub eps_difference: Option<f64>,
    pub surprise_pct: Option<f64>,
}

/// A record that maps onto one row of a [`TableSpec`].
pub trait TableRow {
    fn spec() -> &'static TableSpec;

    /// Natural key values after `symbol`, in `spec().keys` order.
    fn key(&self) -> Vec<FieldValue>;

    /// Payload values in `spec().columns` order.
    fn values(&self) -> Vec<FieldValue>;
}

fn values_from_fields(spec: &TableSpec, fields: &FieldSet) -> Vec<FieldValue> {
    spec.columns
        .iter()
        .map(|column| fields.get(column.name).cloned().unwrap_or(FieldValue::Null))
        .collect()
}

impl TableRow for InstrumentRecord {
    fn spec() -> &'static TableSpec {
        &INSTRUMENTS
    }

    fn key(&self) -> Vec<FieldValue> {
        Vec::new()
    }

    fn values(&self) -> Vec<FieldValue> {
        values_from_fields(Self::spec(), &self.fields)
    }
}

impl TableRow for MetricSnapshotRecord {
    fn spec() -> &'static TableSpec {
        &METRIC_SNAPSHOTS
    }

    fn key(&self) -> Vec<FieldValue> {
        Vec::new()
    }

    fn values(&self) -> Vec<FieldValue> {
        values_from_fields(Self::spec(), &self.fields)
    }
}

impl TableRow for StatementRecord {
    fn spec() -> &'static TableSpec {
        &FINANCIAL_STATEMENTS
    }

    fn key(&self) -> Vec<FieldValue> {
        vec![
            FieldValue::Date(self.period_end),
            FieldValue::Text(self.period_type.as_str().to_owned()),
        ]
    }

    fn values(&self) -> Vec<FieldValue> {
        values_from_fields(Self::spec(), &self.fields)
    }
}

impl TableRow for HistoricalMetricRecord {
    fn spec() -> &'static TableSpec {
        &HISTORICAL_METRICS
    }

    fn key(&self) -> Vec<FieldValue> {
        vec![
            FieldValue::Date(self.period_end),
            FieldValue::Text(self.period_type.as_str().to_owned()),
        ]
    }

    fn values(&self) -> Vec<FieldValue> {
        values_from_fields(Self::spec(), &self.fields)
    }
}

impl TableRow for PriceRecord {
    fn spec() -> &'static TableSpec {
        &PRICE_HISTORY
    }

    fn key(&self) -> Vec<FieldValue> {
        vec![FieldValue::Date(self.trade_date)]
    }

    fn values(&self) -> Vec<FieldValue> {
        vec![
            self.open.into(),
            self.high.into(),
            self.low.into(),
            self.close.into(),
            self.adj_close.into(),
            self.volume.into(),
            self.dividend.into(),
            self.split_ratio.into(),
        ]
    }
}

impl TableRow for CorporateActionRecord {
    fn spec() -> &'static TableSpec {
        &CORPORATE_ACTIONS
    }

    fn key(&self) -> Vec<FieldValue> {
        vec![
            FieldValue::Date(self.action_date),
            FieldValue::Text(self.action_type.as_str().to_owned()),
        ]
    }

    fn values(&self) -> Vec<FieldValue> {
        vec![self.amount.into()]
    }
}

impl TableRow for HolderRecord {
    fn spec() -> &'static TableSpec {
        &HOLDERS
    }

    fn key(&self) -> Vec<FieldValue> {
        vec![
            FieldValue::Text(self.holder_name.clone()),
            FieldValue::Date(self.report_date),
        ]
    }

    fn values(&self) -> Vec<FieldValue> {
        vec![
            self.shares.into(),
            self.market_value.into(),
            self.pct_held.into(),
        ]
    }
}

impl TableRow for EarningsRecord {
    fn spec() -> &'static TableSpec {
        &EARNINGS
    }

    fn key(&self) -> Vec<FieldValue> {
        vec![FieldValue::Date(self.quarter_end)]
    }

    fn values(&self) -> Vec<FieldValue> {
        vec![
            self.eps_actual.into(),
            self.eps_estimate.into(),
            self.eps_difference.into(),
            self.surprise_pct.into(),
        ]
    }
}

/// What happened to a field on its way to the store.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "issue", rename_all = "snake_case")]
pub enum QualityIssue {
    /// Numeric value outside the column's representable range; stored as absent.
    OutOfRange { value: f64, bound: f64 },
    /// Text longer than the column maximum; stored truncated.
    Clamped { original_len: usize, max_len: usize },
    /// Value present but not coercible to the column type; stored as absent.
    Unparseable { raw: String },
}

impl QualityIssue {
    pub const fn label(&self) -> &'static str {
        match self {
            Self::OutOfRange { .. } => "out_of_range",
            Self::Clamped { .. } => "clamped",
            Self::Unparseable { .. } => "unparseable",
        }
    }

    pub fn detail(&self) -> String {
        match self {
            Self::OutOfRange { value, bound } => format!("|{value}| >= {bound}"),
            Self::Clamped {
                original_len,
                max_len,
            } => format!("{original_len} chars clamped to {max_len}"),
            Self::Unparseable { raw } => raw.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QualityEvent {
    pub symbol: String,
    pub kind: EntityKind,
    pub column: String,
    #[serde(flatten)]
    pub issue: QualityIssue,
}

/// Everything fetched and normalized for one identifier.
///
/// `None` means the kind was not requested or its fetch failed; `Some(vec![])` means
/// the provider answered with no rows, which still counts as a completed kind.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizedBundle {
    pub symbol: String,
    pub profile: Option<InstrumentRecord>,
    pub metrics: Option<MetricSnapshotRecord>,
    pub prices: Option<Vec<PriceRecord>>,
    pub statements: Option<Vec<StatementRecord>>,
    pub corporate_actions: Option<Vec<CorporateActionRecord>>,
    pub holders: Option<Vec<HolderRecord>>,
    pub earnings: Option<Vec<EarningsRecord>>,
    pub quality_events: Vec<QualityEvent>,
}

impl NormalizedBundle {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            ..Self::default()
        }
    }

    /// Kinds carried by this bundle, in persistence order.
    pub fn kinds(&self) -> Vec<EntityKind> {
        let present = [
            (EntityKind::Profile, self.profile.is_some()),
            (EntityKind::Metrics, self.metrics.is_some()),
            (EntityKind::PriceHistory, self.prices.is_some()),
            (EntityKind::Statements, self.statements.is_some()),
            (EntityKind::CorporateActions, self.corporate_actions.is_some()),
            (EntityKind::Holders, self.holders.is_some()),
            (EntityKind::Earnings, self.earnings.is_some()),
        ];
        present
            .into_iter()
            .filter_map(|(kind, is_present)| is_present.then_some(kind))
            .collect()
    }
}

/// `YYYY-MM-DD`, matching `DuckDB`'s textual DATE form.
pub fn format_date(date: Date) -> String {
    format!(
        "{:04}-{:02}-{:02}",
        date.year(),
        u8::from(date.month()),
        date.day()
    )
}

/// Parse `YYYY-MM-DD`, ignoring anything after the day (e.g. a time component).
pub fn parse_date(value: &str) -> Option<Date> {
    let value = value.trim();
    let day_part = value.get(..10)?;
    let mut parts = day_part.split('-');
    let year: i32 = parts.next()?.parse().ok()?;
    let month: u8 = parts.next()?.parse().ok()?;
    let day: u8 = parts.next()?.parse().ok()?;
    Date::from_calendar_date(year, Month::try_from(month).ok()?, day).ok()
}
