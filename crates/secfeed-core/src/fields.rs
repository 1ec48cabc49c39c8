//! Declarative source -> column mappings for the wide entity tables.
//!
//! Destination types, precision and text limits are not repeated here; the
//! normalizer reads them from the warehouse column catalog.

use secfeed_warehouse::PeriodType;

/// `summary[module][key]` feeds `column`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldMapping {
    pub module: &'static str,
    pub key: &'static str,
    pub column: &'static str,
}

const fn map(module: &'static str, key: &'static str, column: &'static str) -> FieldMapping {
    FieldMapping {
        module,
        key,
        column,
    }
}

pub static PROFILE_FIELDS: &[FieldMapping] = &[
    map("price", "shortName", "short_name"),
    map("price", "longName", "long_name"),
    map("assetProfile", "sector", "sector"),
    map("assetProfile", "industry", "industry"),
    map("assetProfile", "country", "country"),
    map("price", "exchangeName", "exchange"),
    map("price", "currency", "currency"),
    map("quoteType", "quoteType", "quote_type"),
    map("assetProfile", "website", "website"),
    map("assetProfile", "fullTimeEmployees", "employees"),
    map("assetProfile", "longBusinessSummary", "business_summary"),
    map("quoteType", "firstTradeDateEpochUtc", "first_trade_date"),
];

pub static METRIC_FIELDS: &[FieldMapping] = &[
    map("price", "marketCap", "market_cap"),
    map("defaultKeyStatistics", "enterpriseValue", "enterprise_value"),
    map("defaultKeyStatistics", "sharesOutstanding", "shares_outstanding"),
    map("defaultKeyStatistics", "floatShares", "float_shares"),
    map("summaryDetail", "averageVolume", "average_volume"),
    map("financialData", "currentPrice", "current_price"),
    map("summaryDetail", "previousClose", "previous_close"),
    map("summaryDetail", "fiftyTwoWeekHigh", "fifty_two_week_high"),
    map("summaryDetail", "fiftyTwoWeekLow", "fifty_two_week_low"),
    map("summaryDetail", "fiftyDayAverage", "fifty_day_average"),
    map("summaryDetail", "twoHundredDayAverage", "two_hundred_day_average"),
    map("summaryDetail", "trailingPE", "trailing_pe"),
    map("summaryDetail", "forwardPE", "forward_pe"),
    map("defaultKeyStatistics", "pegRatio", "peg_ratio"),
    map("defaultKeyStatistics", "priceToBook", "price_to_book"),
    map("summaryDetail", "priceToSalesTrailing12Months", "price_to_sales"),
    map("defaultKeyStatistics", "enterpriseToRevenue", "enterprise_to_revenue"),
    map("defaultKeyStatistics", "enterpriseToEbitda", "enterprise_to_ebitda"),
    map("summaryDetail", "dividendYield", "dividend_yield"),
    map("summaryDetail", "dividendRate", "dividend_rate"),
    map("summaryDetail", "payoutRatio", "payout_ratio"),
    map("summaryDetail", "fiveYearAvgDividendYield", "five_year_avg_dividend_yield"),
    map("summaryDetail", "exDividendDate", "ex_dividend_date"),
    map("summaryDetail", "beta", "beta"),
    map("defaultKeyStatistics", "bookValue", "book_value"),
    map("defaultKeyStatistics", "trailingEps", "eps_trailing"),
    map("defaultKeyStatistics", "forwardEps", "eps_forward"),
    map("financialData", "revenuePerShare", "revenue_per_share"),
    map("financialData", "totalCashPerShare", "total_cash_per_share"),
    map("financialData", "totalRevenue", "total_revenue"),
    map("financialData", "grossProfits", "gross_profits"),
    map("financialData", "ebitda", "ebitda"),
    map("financialData", "operatingCashflow", "operating_cashflow"),
    map("financialData", "freeCashflow", "free_cashflow"),
    map("financialData", "totalCash", "total_cash"),
    map("financialData", "totalDebt", "total_debt"),
    map("financialData", "debtToEquity", "debt_to_equity"),
    map("financialData", "returnOnAssets", "return_on_assets"),
    map("financialData", "returnOnEquity", "return_on_equity"),
    map("financialData", "profitMargins", "profit_margins"),
    map("financialData", "operatingMargins", "operating_margins"),
    map("financialData", "grossMargins", "gross_margins"),
    map("financialData", "earningsGrowth", "earnings_growth"),
    map("financialData", "revenueGrowth", "revenue_growth"),
    map("financialData", "targetMeanPrice", "target_mean_price"),
    map("financialData", "recommendationMean", "recommendation_mean"),
    map("financialData", "recommendationKey", "recommendation_key"),
    map("financialData", "numberOfAnalystOpinions", "analyst_opinions"),
];

/// Fundamentals-timeseries series name (without the period prefix) -> column.
pub static STATEMENT_SERIES: &[(&str, &str)] = &[
    ("TotalRevenue", "total_revenue"),
    ("CostOfRevenue", "cost_of_revenue"),
    ("GrossProfit", "gross_profit"),
    ("OperatingExpense", "operating_expense"),
    ("OperatingIncome", "operating_income"),
    ("EBITDA", "ebitda"),
    ("EBIT", "ebit"),
    ("InterestExpense", "interest_expense"),
    ("PretaxIncome", "pretax_income"),
    ("TaxProvision", "tax_provision"),
    ("NetIncome", "net_income"),
    ("BasicEPS", "basic_eps"),
    ("DilutedEPS", "diluted_eps"),
    ("TotalAssets", "total_assets"),
    ("CurrentAssets", "current_assets"),
    ("TotalLiabilitiesNetMinorityInterest", "total_liabilities"),
    ("CurrentLiabilities", "current_liabilities"),
    ("StockholdersEquity", "stockholders_equity"),
    ("CashAndCashEquivalents", "cash_and_equivalents"),
    ("TotalDebt", "total_debt"),
    ("LongTermDebt", "long_term_debt"),
    ("Inventory", "inventory"),
    ("Receivables", "receivables"),
    ("ShareIssued", "shares_issued"),
    ("OperatingCashFlow", "operating_cash_flow"),
    ("InvestingCashFlow", "investing_cash_flow"),
    ("FinancingCashFlow", "financing_cash_flow"),
    ("CapitalExpenditure", "capital_expenditure"),
    ("FreeCashFlow", "free_cash_flow"),
    ("CashDividendsPaid", "dividends_paid"),
];

fn period_prefix(period: PeriodType) -> &'static str {
    match period {
        PeriodType::Annual => "annual",
        PeriodType::Quarterly => "quarterly",
    }
}

/// Series names to request for one period granularity.
pub fn statement_series(period: PeriodType) -> Vec<String> {
    let prefix = period_prefix(period);
    STATEMENT_SERIES
        .iter()
        .map(|(series, _)| format!("{prefix}{series}"))
        .collect()
}

/// Resolve a returned series name such as `quarterlyNetIncome`.
pub fn statement_column(series_name: &str) -> Option<(PeriodType, &'static str)> {
    [PeriodType::Annual, PeriodType::Quarterly]
        .into_iter()
        .find_map(|period| {
            let series = series_name.strip_prefix(period_prefix(period))?;
            STATEMENT_SERIES
                .iter()
                .find(|(name, _)| *name == series)
                .map(|(_, column)| (period, *column))
        })
}
