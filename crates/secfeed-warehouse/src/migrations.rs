use ::duckdb::{params, Connection};

struct Migration {
    version: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: "0001_entity_tables",
        sql: r#"
CREATE TABLE IF NOT EXISTS instruments (
    symbol VARCHAR PRIMARY KEY,
    short_name VARCHAR,
    long_name VARCHAR,
    sector VARCHAR,
    industry VARCHAR,
    country VARCHAR,
    exchange VARCHAR,
    currency VARCHAR,
    quote_type VARCHAR,
    website VARCHAR,
    employees BIGINT,
    business_summary VARCHAR,
    first_trade_date DATE,
    updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
);

CREATE TABLE IF NOT EXISTS metric_snapshots (
    symbol VARCHAR PRIMARY KEY,
    market_cap DECIMAL(20,2),
    enterprise_value DECIMAL(20,2),
    shares_outstanding BIGINT,
    float_shares BIGINT,
    average_volume BIGINT,
    current_price DECIMAL(15,4),
    previous_close DECIMAL(15,4),
    fifty_two_week_high DECIMAL(15,4),
    fifty_two_week_low DECIMAL(15,4),
    fifty_day_average DECIMAL(15,4),
    two_hundred_day_average DECIMAL(15,4),
    trailing_pe DECIMAL(15,6),
    forward_pe DECIMAL(15,6),
    peg_ratio DECIMAL(15,6),
    price_to_book DECIMAL(15,6),
    price_to_sales DECIMAL(15,6),
    enterprise_to_revenue DECIMAL(15,6),
    enterprise_to_ebitda DECIMAL(15,6),
    dividend_yield DECIMAL(12,8),
    dividend_rate DECIMAL(15,4),
    payout_ratio DECIMAL(12,8),
    five_year_avg_dividend_yield DECIMAL(12,6),
    ex_dividend_date DATE,
    beta DECIMAL(12,6),
    book_value DECIMAL(15,4),
    eps_trailing DECIMAL(15,4),
    eps_forward DECIMAL(15,4),
    revenue_per_share DECIMAL(15,4),
    total_cash_per_share DECIMAL(15,4),
    total_revenue DECIMAL(20,2),
    gross_profits DECIMAL(20,2),
    ebitda DECIMAL(20,2),
    operating_cashflow DECIMAL(20,2),
    free_cashflow DECIMAL(20,2),
    total_cash DECIMAL(20,2),
    total_debt DECIMAL(20,2),
    debt_to_equity DECIMAL(15,6),
    return_on_assets DECIMAL(12,8),
    return_on_equity DECIMAL(12,8),
    profit_margins DECIMAL(12,8),
    operating_margins DECIMAL(12,8),
    gross_margins DECIMAL(12,8),
    earnings_growth DECIMAL(12,8),
    revenue_growth DECIMAL(12,8),
    target_mean_price DECIMAL(15,4),
    recommendation_mean DECIMAL(8,4),
    recommendation_key VARCHAR,
    analyst_opinions BIGINT,
    updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
);

CREATE TABLE IF NOT EXISTS price_history (
    symbol VARCHAR NOT NULL,
    trade_date DATE NOT NULL,
    open_price DECIMAL(15,4),
    high_price DECIMAL(15,4),
    low_price DECIMAL(15,4),
    close_price DECIMAL(15,4),
    adj_close DECIMAL(15,4),
    volume BIGINT,
    dividend DECIMAL(15,6),
    split_ratio DECIMAL(12,6),
    updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
    PRIMARY KEY(symbol, trade_date)
);

CREATE TABLE IF NOT EXISTS financial_statements (
    symbol VARCHAR NOT NULL,
    period_end DATE NOT NULL,
    period_type VARCHAR NOT NULL,
    total_revenue DECIMAL(20,2),
    cost_of_revenue DECIMAL(20,2),
    gross_profit DECIMAL(20,2),
    operating_expense DECIMAL(20,2),
    operating_income DECIMAL(20,2),
    ebitda DECIMAL(20,2),
    ebit DECIMAL(20,2),
    interest_expense DECIMAL(20,2),
    pretax_income DECIMAL(20,2),
    tax_provision DECIMAL(20,2),
    net_income DECIMAL(20,2),
    basic_eps DECIMAL(15,4),
    diluted_eps DECIMAL(15,4),
    total_assets DECIMAL(20,2),
    current_assets DECIMAL(20,2),
    total_liabilities DECIMAL(20,2),
    current_liabilities DECIMAL(20,2),
    stockholders_equity DECIMAL(20,2),
    cash_and_equivalents DECIMAL(20,2),
    total_debt DECIMAL(20,2),
    long_term_debt DECIMAL(20,2),
    inventory DECIMAL(20,2),
    receivables DECIMAL(20,2),
    shares_issued BIGINT,
    operating_cash_flow DECIMAL(20,2),
    investing_cash_flow DECIMAL(20,2),
    financing_cash_flow DECIMAL(20,2),
    capital_expenditure DECIMAL(20,2),
    free_cash_flow DECIMAL(20,2),
    dividends_paid DECIMAL(20,2),
    updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
    PRIMARY KEY(symbol, period_end, period_type),
    CHECK (period_type IN ('annual', 'quarterly'))
);

CREATE TABLE IF NOT EXISTS corporate_actions (
    symbol VARCHAR NOT NULL,
    action_date DATE NOT NULL,
    action_type VARCHAR NOT NULL,
    amount DECIMAL(15,6),
    updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
    PRIMARY KEY(symbol, action_date, action_type),
    CHECK (action_type IN ('dividend', 'split'))
);

CREATE TABLE IF NOT EXISTS holders (
    symbol VARCHAR NOT NULL,
    holder_name VARCHAR NOT NULL,
    report_date DATE NOT NULL,
    shares BIGINT,
    market_value DECIMAL(20,2),
    pct_held DECIMAL(12,8),
    updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
    PRIMARY KEY(symbol, holder_name, report_date)
);

CREATE TABLE IF NOT EXISTS earnings (
    symbol VARCHAR NOT NULL,
    quarter_end DATE NOT NULL,
    eps_actual DECIMAL(15,4),
    eps_estimate DECIMAL(15,4),
    eps_difference DECIMAL(15,4),
    surprise_pct DECIMAL(12,6),
    updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
    PRIMARY KEY(symbol, quarter_end)
);
"#,
    },
    Migration {
        version: "0002_run_ledger",
        sql: r#"
CREATE TABLE IF NOT EXISTS ingest_runs (
    run_id VARCHAR PRIMARY KEY,
    mode VARCHAR NOT NULL,
    config_fingerprint VARCHAR NOT NULL,
    work_fingerprint VARCHAR NOT NULL,
    planned_items BIGINT NOT NULL,
    planned_batches BIGINT NOT NULL,
    next_batch BIGINT NOT NULL DEFAULT 0,
    last_symbol VARCHAR,
    status VARCHAR NOT NULL,
    started_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
    finished_at TIMESTAMP
);

CREATE TABLE IF NOT EXISTS ingest_log (
    run_id VARCHAR NOT NULL,
    symbol VARCHAR NOT NULL,
    entity_kind VARCHAR NOT NULL,
    status VARCHAR NOT NULL,
    inserted BIGINT NOT NULL DEFAULT 0,
    updated BIGINT NOT NULL DEFAULT 0,
    error_code VARCHAR,
    error_message VARCHAR,
    recorded_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
);
"#,
    },
    Migration {
        version: "0003_quality_events",
        sql: r#"
CREATE TABLE IF NOT EXISTS quality_events (
    symbol VARCHAR NOT NULL,
    entity_kind VARCHAR NOT NULL,
    column_name VARCHAR NOT NULL,
    issue VARCHAR NOT NULL,
    detail VARCHAR,
    recorded_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
);

CREATE INDEX IF NOT EXISTS idx_ingest_log_symbol_kind ON ingest_log(symbol, entity_kind);
CREATE INDEX IF NOT EXISTS idx_ingest_log_run ON ingest_log(run_id);
"#,
    },
    Migration {
        version: "0004_historical_metrics",
        sql: r#"
CREATE TABLE IF NOT EXISTS historical_metrics (
    symbol VARCHAR NOT NULL,
    period_end DATE NOT NULL,
    period_type VARCHAR NOT NULL,
    price_date DATE,
    close_price DECIMAL(15,4),
    market_cap DECIMAL(20,2),
    book_value_per_share DECIMAL(15,4),
    trailing_pe DECIMAL(15,6),
    price_to_book DECIMAL(15,6),
    price_to_sales DECIMAL(15,6),
    gross_margin DECIMAL(12,8),
    operating_margin DECIMAL(12,8),
    profit_margin DECIMAL(12,8),
    return_on_assets DECIMAL(12,8),
    return_on_equity DECIMAL(12,8),
    debt_to_equity DECIMAL(15,6),
    current_ratio DECIMAL(15,6),
    revenue_growth_yoy DECIMAL(12,8),
    earnings_growth_yoy DECIMAL(12,8),
    operating_cashflow DECIMAL(20,2),
    free_cashflow DECIMAL(20,2),
    fcf_per_share DECIMAL(15,4),
    updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
    PRIMARY KEY(symbol, period_end, period_type),
    CHECK (period_type IN ('annual', 'quarterly'))
);
"#,
    },
];

pub fn apply_migrations(connection: &Connection) -> Result<(), ::duckdb::Error> {
    connection.execute_batch(
        r#"
CREATE TABLE IF NOT EXISTS schema_migrations (
    version VARCHAR PRIMARY KEY,
    applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
);
"#,
    )?;

    for migration in MIGRATIONS {
        let applied: i64 = connection.query_row(
            "SELECT COUNT(*) FROM schema_migrations WHERE version = ?",
            params![migration.version],
            |row| row.get(0),
        )?;
        if applied > 0 {
            continue;
        }

        connection.execute_batch(migration.sql)?;
        connection.execute(
            "INSERT INTO schema_migrations (version) VALUES (?)",
            params![migration.version],
        )?;
        tracing::debug!(version = migration.version, "applied migration");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{EntityKind, HISTORICAL_METRICS};

    fn declared_columns(connection: &Connection, table: &str) -> Vec<String> {
        let mut statement = connection
            .prepare(
                "SELECT column_name FROM information_schema.columns WHERE table_name = ? ORDER BY ordinal_position",
            )
            .expect("prepare");
        let rows = statement
            .query_map(params![table], |row| row.get::<_, String>(0))
            .expect("query");
        rows.map(|row| row.expect("row")).collect()
    }

    #[test]
    fn migrations_are_idempotent() {
        let connection = Connection::open_in_memory().expect("in-memory db");
        apply_migrations(&connection).expect("first pass");
        apply_migrations(&connection).expect("second pass");

        let applied: i64 = connection
            .query_row("SELECT COUNT(*) FROM schema_migrations", [], |row| row.get(0))
            .expect("count");
        assert_eq!(applied, MIGRATIONS.len() as i64);
    }

    #[test]
    fn every_catalog_column_is_declared() {
        let connection = Connection::open_in_memory().expect("in-memory db");
        apply_migrations(&connection).expect("migrate");

        let specs = EntityKind::ALL
            .into_iter()
            .map(EntityKind::table)
            .chain(std::iter::once(&HISTORICAL_METRICS));
        for spec in specs {
            let declared = declared_columns(&connection, spec.table);
            for column in spec.keys.iter().chain(spec.columns.iter()) {
                assert!(
                    declared.iter().any(|name| name == column.name),
                    "{}.{} missing from DDL",
                    spec.table,
                    column.name
                );
            }
        }
    }
}
