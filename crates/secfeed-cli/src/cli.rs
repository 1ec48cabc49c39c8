//! CLI argument definitions for secfeed.
//!
//! # Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `ingest` | Run the ingestion pipeline and print the run and coverage reports |
//! | `backlog` | Show planned work and ETA without fetching |
//! | `audit` | Coverage, date ranges, price gaps and stale instruments |
//! | `catalog` | Validate a catalog and list accepted and rejected tokens |
//! | `derive` | Recompute historical ratios from stored statements and prices |
//! | `sql` | Guarded SQL against the warehouse (SELECT-style statements only) |
//!
//! # Global Options
//!
//! | Option | Default | Description |
//! |--------|---------|-------------|
//! | `--pretty` | `false` | Pretty-print JSON output |
//! | `--log-level` | `info` | Level for `secfeed*` targets when `RUST_LOG` is unset |
//! | `--log-format` | `text` | Log format on stderr (text, json) |
//! | `--db-path` | `$SECFEED_DB_PATH` | Warehouse file |
//!
//! # Examples
//!
//! ```bash
//! secfeed ingest --catalog EQUITY_L.csv --mode incremental
//! secfeed ingest --symbols RELIANCE,TCS,INFY --batch-size 10 --pretty
//! secfeed backlog --catalog EQUITY_L.csv
//! secfeed audit --catalog EQUITY_L.csv --pretty
//! secfeed derive --symbols RELIANCE,TCS
//! secfeed sql "SELECT symbol, COUNT(*) FROM price_history GROUP BY 1"
//! ```

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use secfeed_core::IngestMode;

/// secfeed - equity data ingestion into a local DuckDB warehouse
#[derive(Debug, Parser)]
#[command(
    name = "secfeed",
    author,
    version,
    about = "Equity data ingestion into a local DuckDB warehouse",
    long_about = "secfeed pulls profiles, daily prices, key metrics, financial statements, \
corporate actions, holders and earnings for a catalog of exchange-listed equities, \
and keeps a local DuckDB warehouse complete across incremental, resumable runs.\n\
\n\
Use 'secfeed <command> --help' for command-specific help."
)]
pub struct Cli {
    /// Pretty-print JSON output with indentation.
    #[arg(long, global = true, default_value_t = false)]
    pub pretty: bool,

    /// Log level for secfeed targets; `RUST_LOG` takes precedence when set.
    #[arg(long, global = true, env = "SECFEED_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Log output format (written to stderr).
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    /// Warehouse file; overrides SECFEED_DB_PATH.
    #[arg(long, global = true)]
    pub db_path: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ModeArg {
    /// Fetch only what never succeeded.
    Incremental,
    /// Refetch everything.
    Full,
}

impl From<ModeArg> for IngestMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Incremental => Self::Incremental,
            ModeArg::Full => Self::Full,
        }
    }
}

/// Available CLI commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the ingestion pipeline.
    ///
    /// Prints `{ "run": RunReport, "coverage": CoverageReport }`. A run that
    /// completes with failed entity kinds still exits 0; an interrupted run
    /// exits 130 and resumes on the next invocation with the same settings.
    ///
    /// # Examples
    ///
    ///   secfeed ingest --catalog EQUITY_L.csv
    ///   secfeed ingest --symbols RELIANCE,TCS --mode full
    Ingest(IngestArgs),

    /// Show the resolved backlog and ETA without fetching.
    Backlog(IngestArgs),

    /// Report warehouse completeness.
    Audit(AuditArgs),

    /// Validate a catalog file.
    Catalog(CatalogArgs),

    /// Recompute per-period P/E, P/B, ROE, margins and YoY growth from stored
    /// statements and the last close on or before each period end.
    Derive(DeriveArgs),

    /// Run one SELECT-style SQL statement against the warehouse.
    ///
    ///   secfeed sql "SELECT COUNT(*) FROM price_history"
    Sql(SqlArgs),
}

/// Where the identifier universe comes from.
#[derive(Debug, Clone, Args)]
pub struct UniverseArgs {
    /// Catalog file: one identifier per line, or an equity CSV with a SYMBOL column.
    #[arg(long, env = "SECFEED_CATALOG", conflicts_with = "symbols")]
    pub catalog: Option<PathBuf>,

    /// Inline identifiers, comma separated.
    #[arg(long, value_delimiter = ',')]
    pub symbols: Vec<String>,

    /// Exchange suffix for bare tokens (e.g. .NS); empty disables. Overrides
    /// SECFEED_EXCHANGE_SUFFIX.
    #[arg(long)]
    pub suffix: Option<String>,
}

#[derive(Debug, Clone, Args)]
pub struct IngestArgs {
    #[command(flatten)]
    pub universe: UniverseArgs,

    #[arg(long, value_enum)]
    pub mode: Option<ModeArg>,

    #[arg(long)]
    pub batch_size: Option<usize>,

    #[arg(long)]
    pub item_delay_ms: Option<u64>,

    #[arg(long)]
    pub batch_delay_ms: Option<u64>,

    /// Total attempts per provider request.
    #[arg(long)]
    pub max_retries: Option<u32>,

    #[arg(long)]
    pub history_years: Option<u32>,

    #[arg(long)]
    pub requests_per_minute: Option<u32>,

    /// Start a new run even if an unfinished one matches.
    #[arg(long, default_value_t = false)]
    pub fresh: bool,
}

#[derive(Debug, Clone, Args)]
pub struct AuditArgs {
    #[command(flatten)]
    pub universe: UniverseArgs,

    /// Calendar days between price rows before a gap is reported.
    #[arg(long, default_value_t = 5)]
    pub gap_tolerance_days: i64,

    #[arg(long, default_value_t = 100)]
    pub max_gaps: usize,

    #[arg(long, default_value_t = 30)]
    pub stale_after_days: i64,
}

#[derive(Debug, Clone, Args)]
pub struct CatalogArgs {
    #[command(flatten)]
    pub universe: UniverseArgs,
}

/// Limits derivation to a catalog; every symbol with statements when omitted.
#[derive(Debug, Clone, Args)]
pub struct DeriveArgs {
    #[command(flatten)]
    pub universe: UniverseArgs,
}

#[derive(Debug, Clone, Args)]
pub struct SqlArgs {
    /// SELECT/WITH/EXPLAIN/SHOW/DESCRIBE/SUMMARIZE statement.
    pub query: String,

    #[arg(long, default_value_t = 10_000)]
    pub max_rows: usize,

    #[arg(long, default_value_t = 5_000)]
    pub query_timeout_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ingest_flags_parse() {
        let cli = Cli::try_parse_from([
            "secfeed",
            "ingest",
            "--symbols",
            "RELIANCE,TCS",
            "--mode",
            "full",
            "--batch-size",
            "10",
            "--fresh",
            "--pretty",
        ])
        .expect("parse");

        let Command::Ingest(args) = cli.command else {
            panic!("expected ingest");
        };
        assert_eq!(args.universe.symbols, vec!["RELIANCE", "TCS"]);
        assert_eq!(args.mode, Some(ModeArg::Full));
        assert_eq!(args.batch_size, Some(10));
        assert!(args.fresh);
        assert!(cli.pretty);
    }

    #[test]
    fn catalog_and_symbols_conflict() {
        let result = Cli::try_parse_from([
            "secfeed",
            "backlog",
            "--catalog",
            "EQUITY_L.csv",
            "--symbols",
            "TCS",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn derive_accepts_an_optional_symbol_list() {
        let cli =
            Cli::try_parse_from(["secfeed", "derive", "--symbols", "TCS,INFY"]).expect("parse");
        let Command::Derive(args) = cli.command else {
            panic!("expected derive");
        };
        assert_eq!(args.universe.symbols, vec!["TCS", "INFY"]);

        let cli = Cli::try_parse_from(["secfeed", "derive"]).expect("parse");
        assert!(matches!(cli.command, Command::Derive(_)));
    }

    #[test]
    fn sql_defaults_apply() {
        let cli = Cli::try_parse_from(["secfeed", "sql", "SELECT 1"]).expect("parse");
        let Command::Sql(args) = cli.command else {
            panic!("expected sql");
        };
        assert_eq!(args.max_rows, 10_000);
        assert_eq!(args.query_timeout_ms, 5_000);
    }
}
