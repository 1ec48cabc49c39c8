//! Turns loosely typed provider documents into canonical records.
//!
//! Coercion is driven by the destination column: decimals are range-checked against
//! `10^(precision - scale)`, text is trimmed and clamped, dates come from epoch
//! seconds in a fixed reference offset or from ISO strings. Anything dropped or
//! altered on the way leaves a [`QualityEvent`].

use std::collections::BTreeMap;

use serde_json::Value;
use time::{Date, OffsetDateTime, UtcOffset};

use secfeed_warehouse::schema::{
    ColumnSpec, ColumnType, TableSpec, CORPORATE_ACTIONS, EARNINGS, FINANCIAL_STATEMENTS,
    HOLDERS, INSTRUMENTS, METRIC_SNAPSHOTS, PRICE_HISTORY,
};
use secfeed_warehouse::{
    parse_date, ActionType, CorporateActionRecord, EarningsRecord, EntityKind, FieldSet,
    FieldValue, HolderRecord, InstrumentRecord, MetricSnapshotRecord, PeriodType, PriceRecord,
    QualityEvent, QualityIssue, StatementRecord,
};

use crate::fields::{self, FieldMapping, METRIC_FIELDS, PROFILE_FIELDS};

/// India Standard Time, the reference offset for exchange-local trade dates.
pub const DEFAULT_OFFSET_MINUTES: i32 = 330;

/// Collects quality events for one identifier and entity kind.
struct Sink<'a> {
    symbol: &'a str,
    kind: EntityKind,
    events: &'a mut Vec<QualityEvent>,
}

impl Sink<'_> {
    fn push(&mut self, column: &str, issue: QualityIssue) {
        tracing::debug!(
            symbol = self.symbol,
            kind = %self.kind,
            column,
            issue = issue.label(),
            "field adjusted during normalization"
        );
        self.events.push(QualityEvent {
            symbol: self.symbol.to_owned(),
            kind: self.kind,
            column: column.to_owned(),
            issue,
        });
    }
}

enum Numeric {
    Absent,
    Value(f64),
    Unparseable(String),
}

/// Accepts `{raw: n}` wrappers, plain numbers and numeric strings.
fn numeric(raw: &Value) -> Numeric {
    let parsed = match raw {
        Value::Null => return Numeric::Absent,
        Value::Object(object) => {
            return match object.get("raw") {
                Some(inner) => numeric(inner),
                None => Numeric::Absent,
            };
        }
        Value::Number(number) => number.as_f64(),
        Value::String(text) => {
            let text = text.trim();
            if text.is_empty() {
                return Numeric::Absent;
            }
            text.replace(',', "").parse::<f64>().ok()
        }
        Value::Bool(_) | Value::Array(_) => None,
    };

    match parsed {
        Some(value) if value.is_finite() => Numeric::Value(value),
        _ => Numeric::Unparseable(raw.to_string()),
    }
}

fn text(raw: &Value) -> Option<String> {
    match raw {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        Value::Object(object) => object
            .get("fmt")
            .or_else(|| object.get("raw"))
            .and_then(text),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Normalizer {
    offset: UtcOffset,
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new(DEFAULT_OFFSET_MINUTES)
    }
}

impl Normalizer {
    /// Offsets outside +/- 24h fall back to UTC.
    pub fn new(offset_minutes: i32) -> Self {
        let offset = UtcOffset::from_whole_seconds(offset_minutes.saturating_mul(60))
            .unwrap_or(UtcOffset::UTC);
        Self { offset }
    }

    pub fn offset(&self) -> UtcOffset {
        self.offset
    }

    /// Calendar date of an epoch timestamp in the reference offset.
    pub fn epoch_to_date(&self, seconds: i64) -> Option<Date> {
        OffsetDateTime::from_unix_timestamp(seconds)
            .ok()
            .map(|instant| instant.to_offset(self.offset).date())
    }

    fn date(&self, raw: &Value) -> Result<Option<Date>, String> {
        match raw {
            Value::String(text) if text.trim().is_empty() => Ok(None),
            Value::String(text) => parse_date(text).map(Some).ok_or_else(|| raw.to_string()),
            _ => match numeric(raw) {
                Numeric::Absent => Ok(None),
                Numeric::Value(seconds) => self
                    .epoch_to_date(seconds as i64)
                    .map(Some)
                    .ok_or_else(|| raw.to_string()),
                Numeric::Unparseable(raw) => Err(raw),
            },
        }
    }

    fn coerce(&self, column: &ColumnSpec, raw: &Value, sink: &mut Sink<'_>) -> FieldValue {
        match column.ty {
            ColumnType::Decimal { .. } | ColumnType::BigInt => match numeric(raw) {
                Numeric::Absent => FieldValue::Null,
                Numeric::Unparseable(raw) => {
                    sink.push(column.name, QualityIssue::Unparseable { raw });
                    FieldValue::Null
                }
                Numeric::Value(value) => {
                    let bound = column.decimal_bound().unwrap_or(i64::MAX as f64);
                    if column.round_to_scale(value).abs() >= bound {
                        sink.push(column.name, QualityIssue::OutOfRange { value, bound });
                        FieldValue::Null
                    } else if matches!(column.ty, ColumnType::BigInt) {
                        FieldValue::Integer(value.round() as i64)
                    } else {
                        FieldValue::Decimal(value)
                    }
                }
            },
            ColumnType::Text { max_len } => {
                let Some(value) = text(raw) else {
                    return FieldValue::Null;
                };
                let value = value.trim();
                if value.is_empty() {
                    return FieldValue::Null;
                }
                let original_len = value.chars().count();
                if original_len > max_len {
                    sink.push(
                        column.name,
                        QualityIssue::Clamped {
                            original_len,
                            max_len,
                        },
                    );
                    FieldValue::Text(value.chars().take(max_len).collect())
                } else {
                    FieldValue::Text(value.to_owned())
                }
            }
            ColumnType::Date => match self.date(raw) {
                Ok(Some(date)) => FieldValue::Date(date),
                Ok(None) => FieldValue::Null,
                Err(raw) => {
                    sink.push(column.name, QualityIssue::Unparseable { raw });
                    FieldValue::Null
                }
            },
        }
    }

    fn coerce_named(
        &self,
        spec: &TableSpec,
        column: &str,
        raw: &Value,
        sink: &mut Sink<'_>,
    ) -> FieldValue {
        match spec.column(column) {
            Some(column) => self.coerce(column, raw, sink),
            None => {
                tracing::debug!(table = spec.table, column, "unknown column in mapping");
                FieldValue::Null
            }
        }
    }

    fn decimal(&self, spec: &TableSpec, column: &str, raw: &Value, sink: &mut Sink<'_>) -> Option<f64> {
        self.coerce_named(spec, column, raw, sink).as_f64()
    }

    fn integer(&self, spec: &TableSpec, column: &str, raw: &Value, sink: &mut Sink<'_>) -> Option<i64> {
        match self.coerce_named(spec, column, raw, sink) {
            FieldValue::Integer(value) => Some(value),
            _ => None,
        }
    }

    fn mapped_fields(
        &self,
        spec: &TableSpec,
        mappings: &[FieldMapping],
        summary: &Value,
        sink: &mut Sink<'_>,
    ) -> FieldSet {
        let mut fields = FieldSet::new();
        for mapping in mappings {
            let raw = &summary[mapping.module][mapping.key];
            let value = self.coerce_named(spec, mapping.column, raw, sink);
            if !value.is_null() {
                fields.insert(mapping.column, value);
            }
        }
        fields
    }

    /// Profile columns from a quoteSummary document.
    pub fn profile(
        &self,
        symbol: &str,
        summary: &Value,
        events: &mut Vec<QualityEvent>,
    ) -> InstrumentRecord {
        let mut sink = Sink {
            symbol,
            kind: EntityKind::Profile,
            events,
        };
        InstrumentRecord {
            fields: self.mapped_fields(&INSTRUMENTS, PROFILE_FIELDS, summary, &mut sink),
        }
    }

    /// Metric snapshot columns from a quoteSummary document.
    pub fn metrics(
        &self,
        symbol: &str,
        summary: &Value,
        events: &mut Vec<QualityEvent>,
    ) -> MetricSnapshotRecord {
        let mut sink = Sink {
            symbol,
            kind: EntityKind::Metrics,
            events,
        };
        MetricSnapshotRecord {
            fields: self.mapped_fields(&METRIC_SNAPSHOTS, METRIC_FIELDS, summary, &mut sink),
        }
    }

    /// Daily bars from a chart result. Rows without any OHLC value are skipped and
    /// a repeated date keeps its last row.
    pub fn prices(
        &self,
        symbol: &str,
        chart: &Value,
        events: &mut Vec<QualityEvent>,
    ) -> Vec<PriceRecord> {
        let mut sink = Sink {
            symbol,
            kind: EntityKind::PriceHistory,
            events,
        };
        let Some(timestamps) = chart["timestamp"].as_array() else {
            return Vec::new();
        };
        let quote = &chart["indicators"]["quote"][0];
        let adjclose = &chart["indicators"]["adjclose"][0]["adjclose"];

        let mut dividends = BTreeMap::new();
        let mut splits = BTreeMap::new();
        for (date, event) in self.events(&chart["events"]["dividends"]) {
            dividends.insert(date, event["amount"].clone());
        }
        for (date, event) in self.events(&chart["events"]["splits"]) {
            splits.insert(date, split_ratio(event));
        }

        let mut rows = BTreeMap::new();
        for (index, timestamp) in timestamps.iter().enumerate() {
            let Some(trade_date) = timestamp.as_i64().and_then(|ts| self.epoch_to_date(ts)) else {
                continue;
            };
            let spec = &PRICE_HISTORY;
            let mut row = PriceRecord::new(trade_date);
            row.open = self.decimal(spec, "open_price", &quote["open"][index], &mut sink);
            row.high = self.decimal(spec, "high_price", &quote["high"][index], &mut sink);
            row.low = self.decimal(spec, "low_price", &quote["low"][index], &mut sink);
            row.close = self.decimal(spec, "close_price", &quote["close"][index], &mut sink);
            if row.open.is_none() && row.high.is_none() && row.low.is_none() && row.close.is_none() {
                continue;
            }
            row.adj_close = self.decimal(spec, "adj_close", &adjclose[index], &mut sink);
            row.volume = self.integer(spec, "volume", &quote["volume"][index], &mut sink);
            if let Some(amount) = dividends.get(&trade_date) {
                row.dividend = self.decimal(spec, "dividend", amount, &mut sink);
            }
            if let Some(ratio) = splits.get(&trade_date) {
                row.split_ratio = self.decimal(spec, "split_ratio", ratio, &mut sink);
            }
            rows.insert(trade_date, row);
        }
        rows.into_values().collect()
    }

    /// Dividends and splits from a long-range chart result.
    pub fn corporate_actions(
        &self,
        symbol: &str,
        chart: &Value,
        events: &mut Vec<QualityEvent>,
    ) -> Vec<CorporateActionRecord> {
        let mut sink = Sink {
            symbol,
            kind: EntityKind::CorporateActions,
            events,
        };
        let mut actions = BTreeMap::new();
        for (action_date, event) in self.events(&chart["events"]["dividends"]) {
            let amount = self.decimal(&CORPORATE_ACTIONS, "amount", &event["amount"], &mut sink);
            actions.insert(
                (action_date, ActionType::Dividend),
                CorporateActionRecord {
                    action_date,
                    action_type: ActionType::Dividend,
                    amount,
                },
            );
        }
        for (action_date, event) in self.events(&chart["events"]["splits"]) {
            let amount = self.decimal(&CORPORATE_ACTIONS, "amount", &split_ratio(event), &mut sink);
            actions.insert(
                (action_date, ActionType::Split),
                CorporateActionRecord {
                    action_date,
                    action_type: ActionType::Split,
                    amount,
                },
            );
        }
        actions.into_values().collect()
    }

    /// Statement rows from fundamentals-timeseries series, one row per period end.
    pub fn statements(
        &self,
        symbol: &str,
        series: &Value,
        events: &mut Vec<QualityEvent>,
    ) -> Vec<StatementRecord> {
        let mut sink = Sink {
            symbol,
            kind: EntityKind::Statements,
            events,
        };
        let mut rows: BTreeMap<(Date, PeriodType), FieldSet> = BTreeMap::new();
        for entry in series.as_array().into_iter().flatten() {
            let Some(series_name) = entry["meta"]["type"][0].as_str() else {
                continue;
            };
            let Some((period_type, column)) = fields::statement_column(series_name) else {
                continue;
            };
            for point in entry[series_name].as_array().into_iter().flatten() {
                let Some(period_end) = point["asOfDate"].as_str().and_then(parse_date) else {
                    continue;
                };
                let value = self.coerce_named(
                    &FINANCIAL_STATEMENTS,
                    column,
                    &point["reportedValue"],
                    &mut sink,
                );
                let fields = rows.entry((period_end, period_type)).or_default();
                if !value.is_null() {
                    fields.insert(column, value);
                }
            }
        }
        rows.into_iter()
            .map(|((period_end, period_type), fields)| StatementRecord {
                period_end,
                period_type,
                fields,
            })
            .collect()
    }

    /// Institutional holders from `institutionOwnership.ownershipList`.
    pub fn holders(
        &self,
        symbol: &str,
        summary: &Value,
        events: &mut Vec<QualityEvent>,
    ) -> Vec<HolderRecord> {
        let mut sink = Sink {
            symbol,
            kind: EntityKind::Holders,
            events,
        };
        let mut holders = BTreeMap::new();
        let list = &summary["institutionOwnership"]["ownershipList"];
        for entry in list.as_array().into_iter().flatten() {
            let FieldValue::Text(holder_name) =
                self.coerce_named(&HOLDERS, "holder_name", &entry["organization"], &mut sink)
            else {
                continue;
            };
            let FieldValue::Date(report_date) =
                self.coerce_named(&HOLDERS, "report_date", &entry["reportDate"], &mut sink)
            else {
                continue;
            };
            let record = HolderRecord {
                shares: self.integer(&HOLDERS, "shares", &entry["position"], &mut sink),
                market_value: self.decimal(&HOLDERS, "market_value", &entry["value"], &mut sink),
                pct_held: self.decimal(&HOLDERS, "pct_held", &entry["pctHeld"], &mut sink),
                holder_name: holder_name.clone(),
                report_date,
            };
            holders.insert((holder_name, report_date), record);
        }
        holders.into_values().collect()
    }

    /// Quarterly EPS history from `earningsHistory.history`.
    pub fn earnings(
        &self,
        symbol: &str,
        summary: &Value,
        events: &mut Vec<QualityEvent>,
    ) -> Vec<EarningsRecord> {
        let mut sink = Sink {
            symbol,
            kind: EntityKind::Earnings,
            events,
        };
        let mut quarters = BTreeMap::new();
        let history = &summary["earningsHistory"]["history"];
        for entry in history.as_array().into_iter().flatten() {
            let FieldValue::Date(quarter_end) =
                self.coerce_named(&EARNINGS, "quarter_end", &entry["quarter"], &mut sink)
            else {
                continue;
            };
            quarters.insert(
                quarter_end,
                EarningsRecord {
                    quarter_end,
                    eps_actual: self.decimal(&EARNINGS, "eps_actual", &entry["epsActual"], &mut sink),
                    eps_estimate: self.decimal(
                        &EARNINGS,
                        "eps_estimate",
                        &entry["epsEstimate"],
                        &mut sink,
                    ),
                    eps_difference: self.decimal(
                        &EARNINGS,
                        "eps_difference",
                        &entry["epsDifference"],
                        &mut sink,
                    ),
                    surprise_pct: self.decimal(
                        &EARNINGS,
                        "surprise_pct",
                        &entry["surprisePercent"],
                        &mut sink,
                    ),
                },
            );
        }
        quarters.into_values().collect()
    }

    /// Chart events keyed by their own `date` field.
    fn events<'v>(&self, events: &'v Value) -> Vec<(Date, &'v Value)> {
        events
            .as_object()
            .into_iter()
            .flat_map(|events| events.values())
            .filter_map(|event| {
                let date = event["date"].as_i64().and_then(|ts| self.epoch_to_date(ts))?;
                Some((date, event))
            })
            .collect()
    }
}

fn split_ratio(event: &Value) -> Value {
    let numerator = event["numerator"].as_f64();
    let denominator = event["denominator"].as_f64().filter(|value| *value != 0.0);
    match (numerator, denominator) {
        (Some(numerator), Some(denominator)) => Value::from(numerator / denominator),
        _ => Value::Null,
    }
}
