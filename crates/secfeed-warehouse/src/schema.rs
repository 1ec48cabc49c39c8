//! Column catalog for the ingestion tables.
//!
//! The normalizer reads precision, scale and text limits from here before a value
//! is handed to the store, and the store builds its upsert statements from the same
//! tables. The DDL in [`crate::migrations`] must declare every column listed below.

use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Entity kinds written by the pipeline, one transaction scope each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Profile,
    PriceHistory,
    Metrics,
    Statements,
    CorporateActions,
    Holders,
    Earnings,
}

impl EntityKind {
    pub const ALL: [EntityKind; 7] = [
        Self::Profile,
        Self::PriceHistory,
        Self::Metrics,
        Self::Statements,
        Self::CorporateActions,
        Self::Holders,
        Self::Earnings,
    ];

    /// Kinds an identifier needs before incremental runs skip it.
    pub const REQUIRED: [EntityKind; 3] = [Self::PriceHistory, Self::Metrics, Self::Statements];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Profile => "profile",
            Self::PriceHistory => "price_history",
            Self::Metrics => "metrics",
            Self::Statements => "statements",
            Self::CorporateActions => "corporate_actions",
            Self::Holders => "holders",
            Self::Earnings => "earnings",
        }
    }

    pub const fn is_required(self) -> bool {
        matches!(self, Self::PriceHistory | Self::Metrics | Self::Statements)
    }

    pub fn table(self) -> &'static TableSpec {
        match self {
            Self::Profile => &INSTRUMENTS,
            Self::PriceHistory => &PRICE_HISTORY,
            Self::Metrics => &METRIC_SNAPSHOTS,
            Self::Statements => &FINANCIAL_STATEMENTS,
            Self::CorporateActions => &CORPORATE_ACTIONS,
            Self::Holders => &HOLDERS,
            Self::Earnings => &EARNINGS,
        }
    }
}

impl Display for EntityKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == value)
            .ok_or_else(|| format!("unknown entity kind '{value}'"))
    }
}

/// Destination column type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Decimal { precision: u8, scale: u8 },
    BigInt,
    Text { max_len: usize },
    Date,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnSpec {
    pub name: &'static str,
    pub ty: ColumnType,
}

impl ColumnSpec {
    const fn decimal(name: &'static str, precision: u8, scale: u8) -> Self {
        Self {
            name,
            ty: ColumnType::Decimal { precision, scale },
        }
    }

    const fn bigint(name: &'static str) -> Self {
        Self {
            name,
            ty: ColumnType::BigInt,
        }
    }

    const fn text(name: &'static str, max_len: usize) -> Self {
        Self {
            name,
            ty: ColumnType::Text { max_len },
        }
    }

    const fn date(name: &'static str) -> Self {
        Self {
            name,
            ty: ColumnType::Date,
        }
    }

    /// Exclusive magnitude bound for decimal columns: `10^(precision - scale)`.
    pub fn decimal_bound(&self) -> Option<f64> {
        match self.ty {
            ColumnType::Decimal { precision, scale } => {
                Some(10_f64.powi(i32::from(precision.saturating_sub(scale))))
            }
            _ => None,
        }
    }

    /// The value as the store will keep it: decimals round half away from zero at
    /// their scale, integers at the unit.
    pub fn round_to_scale(&self, value: f64) -> f64 {
        match self.ty {
            ColumnType::Decimal { scale, .. } => {
                let factor = 10_f64.powi(i32::from(scale));
                (value * factor).round() / factor
            }
            ColumnType::BigInt => value.round(),
            _ => value,
        }
    }

    /// SQL placeholder used when binding this column.
    pub(crate) const fn placeholder(&self) -> &'static str {
        match self.ty {
            ColumnType::Date => "CAST(? AS DATE)",
            _ => "?",
        }
    }
}

/// Table layout: natural key columns after `symbol`, then payload columns.
#[derive(Debug)]
pub struct TableSpec {
    pub kind: EntityKind,
    pub table: &'static str,
    pub keys: &'static [ColumnSpec],
    pub columns: &'static [ColumnSpec],
    /// Column used for earliest/latest coverage, if the kind is dated.
    pub date_column: Option<&'static str>,
}

impl TableSpec {
    pub fn column(&self, name: &str) -> Option<&'static ColumnSpec> {
        self.keys
            .iter()
            .chain(self.columns.iter())
            .find(|column| column.name == name)
    }
}

pub static INSTRUMENTS: TableSpec = TableSpec {
    kind: EntityKind::Profile,
    table: "instruments",
    keys: &[],
    columns: &[
        ColumnSpec::text("short_name", 128),
        ColumnSpec::text("long_name", 256),
        ColumnSpec::text("sector", 100),
        ColumnSpec::text("industry", 100),
        ColumnSpec::text("country", 64),
        ColumnSpec::text("exchange", 32),
        ColumnSpec::text("currency", 8),
        ColumnSpec::text("quote_type", 32),
        ColumnSpec::text("website", 256),
        ColumnSpec::bigint("employees"),
        ColumnSpec::text("business_summary", 4000),
        ColumnSpec::date("first_trade_date"),
    ],
    date_column: None,
};

pub static METRIC_SNAPSHOTS: TableSpec = TableSpec {
    kind: EntityKind::Metrics,
    table: "metric_snapshots",
    keys: &[],
    columns: &[
        ColumnSpec::decimal("market_cap", 20, 2),
        ColumnSpec::decimal("enterprise_value", 20, 2),
        ColumnSpec::bigint("shares_outstanding"),
        ColumnSpec::bigint("float_shares"),
        ColumnSpec::bigint("average_volume"),
        ColumnSpec::decimal("current_price", 15, 4),
        ColumnSpec::decimal("previous_close", 15, 4),
        ColumnSpec::decimal("fifty_two_week_high", 15, 4),
        ColumnSpec::decimal("fifty_two_week_low", 15, 4),
        ColumnSpec::decimal("fifty_day_average", 15, 4),
        ColumnSpec::decimal("two_hundred_day_average", 15, 4),
        ColumnSpec::decimal("trailing_pe", 15, 6),
        ColumnSpec::decimal("forward_pe", 15, 6),
        ColumnSpec::decimal("peg_ratio", 15, 6),
        ColumnSpec::decimal("price_to_book", 15, 6),
        ColumnSpec::decimal("price_to_sales", 15, 6),
        ColumnSpec::decimal("enterprise_to_revenue", 15, 6),
        ColumnSpec::decimal("enterprise_to_ebitda", 15, 6),
        ColumnSpec::decimal("dividend_yield", 12, 8),
        ColumnSpec::decimal("dividend_rate", 15, 4),
        ColumnSpec::decimal("payout_ratio", 12, 8),
        ColumnSpec::decimal("five_year_avg_dividend_yield", 12, 6),
        ColumnSpec::date("ex_dividend_date"),
        ColumnSpec::decimal("beta", 12, 6),
        ColumnSpec::decimal("book_value", 15, 4),
        ColumnSpec::decimal("eps_trailing", 15, 4),
        ColumnSpec::decimal("eps_forward", 15, 4),
        ColumnSpec::decimal("revenue_per_share", 15, 4),
        ColumnSpec::decimal("total_cash_per_share", 15, 4),
        ColumnSpec::decimal("total_revenue", 20, 2),
        ColumnSpec::decimal("gross_profits", 20, 2),
        ColumnSpec::decimal("ebitda", 20, 2),
        ColumnSpec::decimal("operating_cashflow", 20, 2),
        ColumnSpec::decimal("free_cashflow", 20, 2),
        ColumnSpec::decimal("total_cash", 20, 2),
        ColumnSpec::decimal("total_debt", 20, 2),
        ColumnSpec::decimal("debt_to_equity", 15, 6),
        ColumnSpec::decimal("return_on_assets", 12, 8),
        ColumnSpec::decimal("return_on_equity", 12, 8),
        ColumnSpec::decimal("profit_margins", 12, 8),
        ColumnSpec::decimal("operating_margins", 12, 8),
        ColumnSpec::decimal("gross_margins", 12, 8),
        ColumnSpec::decimal("earnings_growth", 12, 8),
        ColumnSpec::decimal("revenue_growth", 12, 8),
        ColumnSpec::decimal("target_mean_price", 15, 4),
        ColumnSpec::decimal("recommendation_mean", 8, 4),
        ColumnSpec::text("recommendation_key", 32),
        ColumnSpec::bigint("analyst_opinions"),
    ],
    date_column: None,
};

pub static PRICE_HISTORY: TableSpec = TableSpec {
    kind: EntityKind::PriceHistory,
    table: "price_history",
    keys: &[ColumnSpec::date("trade_date")],
    columns: &[
        ColumnSpec::decimal("open_price", 15, 4),
        ColumnSpec::decimal("high_price", 15, 4),
        ColumnSpec::decimal("low_price", 15, 4),
        ColumnSpec::decimal("close_price", 15, 4),
        ColumnSpec::decimal("adj_close", 15, 4),
        ColumnSpec::bigint("volume"),
        ColumnSpec::decimal("dividend", 15, 6),
        ColumnSpec::decimal("split_ratio", 12, 6),
    ],
    date_column: Some("trade_date"),
};

pub static FINANCIAL_STATEMENTS: TableSpec = TableSpec {
    kind: EntityKind::Statements,
    table: "financial_statements",
    keys: &[
        ColumnSpec::date("period_end"),
        ColumnSpec::text("period_type", 16),
    ],
    columns: &[
        ColumnSpec::decimal("total_revenue", 20, 2),
        ColumnSpec::decimal("cost_of_revenue", 20, 2),
        ColumnSpec::decimal("gross_profit", 20, 2),
        ColumnSpec::decimal("operating_expense", 20, 2),
        ColumnSpec::decimal("operating_income", 20, 2),
        ColumnSpec::decimal("ebitda", 20, 2),
        ColumnSpec::decimal("ebit", 20, 2),
        ColumnSpec::decimal("interest_expense", 20, 2),
        ColumnSpec::decimal("pretax_income", 20, 2),
        ColumnSpec::decimal("tax_provision", 20, 2),
        ColumnSpec::decimal("net_income", 20, 2),
        ColumnSpec::decimal("basic_eps", 15, 4),
        ColumnSpec::decimal("diluted_eps", 15, 4),
        ColumnSpec::decimal("total_assets", 20, 2),
        ColumnSpec::decimal("current_assets", 20, 2),
        ColumnSpec::decimal("total_liabilities", 20, 2),
        ColumnSpec::decimal("current_liabilities", 20, 2),
        ColumnSpec::decimal("stockholders_equity", 20, 2),
        ColumnSpec::decimal("cash_and_equivalents", 20, 2),
        ColumnSpec::decimal("total_debt", 20, 2),
        ColumnSpec::decimal("long_term_debt", 20, 2),
        ColumnSpec::decimal("inventory", 20, 2),
        ColumnSpec::decimal("receivables", 20, 2),
        ColumnSpec::bigint("shares_issued"),
        ColumnSpec::decimal("operating_cash_flow", 20, 2),
        ColumnSpec::decimal("investing_cash_flow", 20, 2),
        ColumnSpec::decimal("financing_cash_flow", 20, 2),
        ColumnSpec::decimal("capital_expenditure", 20, 2),
        ColumnSpec::decimal("free_cash_flow", 20, 2),
        ColumnSpec::decimal("dividends_paid", 20, 2),
    ],
    date_column: Some("period_end"),
};

pub static CORPORATE_ACTIONS: TableSpec = TableSpec {
    kind: EntityKind::CorporateActions,
    table: "corporate_actions",
    keys: &[
        ColumnSpec::date("action_date"),
        ColumnSpec::text("action_type", 16),
    ],
    columns: &[ColumnSpec::decimal("amount", 15, 6)],
    date_column: Some("action_date"),
};

pub static HOLDERS: TableSpec = TableSpec {
    kind: EntityKind::Holders,
    table: "holders",
    keys: &[
        ColumnSpec::text("holder_name", 256),
        ColumnSpec::date("report_date"),
    ],
    columns: &[
        ColumnSpec::bigint("shares"),
        ColumnSpec::decimal("market_value", 20, 2),
        ColumnSpec::decimal("pct_held", 12, 8),
    ],
    date_column: Some("report_date"),
};

pub static EARNINGS: TableSpec = TableSpec {
    kind: EntityKind::Earnings,
    table: "earnings",
    keys: &[ColumnSpec::date("quarter_end")],
    columns: &[
        ColumnSpec::decimal("eps_actual", 15, 4),
        ColumnSpec::decimal("eps_estimate", 15, 4),
        ColumnSpec::decimal("eps_difference", 15, 4),
        ColumnSpec::decimal("surprise_pct", 12, 6),
    ],
    date_column: Some("quarter_end"),
};

/// Ratios derived from stored statements and prices. Not fetched, so it is not an
/// [`EntityKind`] table of its own; writes and quality events report as statements.
pub static HISTORICAL_METRICS: TableSpec = TableSpec {
    kind: EntityKind::Statements,
    table: "historical_metrics",
    keys: &[
        ColumnSpec::date("period_end"),
        ColumnSpec::text("period_type", 16),
    ],
    columns: &[
        ColumnSpec::date("price_date"),
        ColumnSpec::decimal("close_price", 15, 4),
        ColumnSpec::decimal("market_cap", 20, 2),
        ColumnSpec::decimal("book_value_per_share", 15, 4),
        ColumnSpec::decimal("trailing_pe", 15, 6),
        ColumnSpec::decimal("price_to_book", 15, 6),
        ColumnSpec::decimal("price_to_sales", 15, 6),
        ColumnSpec::decimal("gross_margin", 12, 8),
        ColumnSpec::decimal("operating_margin", 12, 8),
        ColumnSpec::decimal("profit_margin", 12, 8),
        ColumnSpec::decimal("return_on_assets", 12, 8),
        ColumnSpec::decimal("return_on_equity", 12, 8),
        ColumnSpec::decimal("debt_to_equity", 15, 6),
        ColumnSpec::decimal("current_ratio", 15, 6),
        ColumnSpec::decimal("revenue_growth_yoy", 12, 8),
        ColumnSpec::decimal("earnings_growth_yoy", 12, 8),
        ColumnSpec::decimal("operating_cashflow", 20, 2),
        ColumnSpec::decimal("free_cashflow", 20, 2),
        ColumnSpec::decimal("fcf_per_share", 15, 4),
    ],
    date_column: Some("period_end"),
};
