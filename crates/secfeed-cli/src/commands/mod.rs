mod audit;
mod backlog;
mod catalog;
mod derive;
mod ingest;
mod sql;

use std::process::ExitCode;

use serde_json::Value;

use secfeed_core::{
    load_universe, CatalogSource, IngestConfig, Universe, Warehouse, WarehouseConfig,
};

use crate::cli::{Cli, Command, UniverseArgs};
use crate::error::CliError;

/// JSON document to print and the exit code to return after printing it.
pub struct CommandOutput {
    pub data: Value,
    pub exit_code: ExitCode,
}

impl CommandOutput {
    pub fn ok(data: Value) -> Self {
        Self {
            data,
            exit_code: ExitCode::SUCCESS,
        }
    }

    pub fn with_exit_code(mut self, code: u8) -> Self {
        self.exit_code = ExitCode::from(code);
        self
    }
}

pub async fn run(cli: &Cli) -> Result<CommandOutput, CliError> {
    match &cli.command {
        Command::Ingest(args) => ingest::run(cli, args).await,
        Command::Backlog(args) => backlog::run(cli, args),
        Command::Audit(args) => audit::run(cli, args),
        Command::Catalog(args) => catalog::run(args),
        Command::Derive(args) => derive::run(cli, args),
        Command::Sql(args) => sql::run(cli, args),
    }
}

fn open_warehouse(cli: &Cli) -> Result<Warehouse, CliError> {
    let mut config = WarehouseConfig::from_env();
    if let Some(path) = &cli.db_path {
        config.db_path = path.clone();
    }
    Ok(Warehouse::open(config)?)
}

/// `--suffix` wins over the configured suffix; an empty flag disables suffixing.
fn effective_suffix(args: &UniverseArgs, config: &IngestConfig) -> Option<String> {
    match &args.suffix {
        Some(suffix) if suffix.trim().is_empty() => None,
        Some(suffix) => Some(suffix.trim().to_owned()),
        None => config.exchange_suffix.clone(),
    }
}

fn catalog_source(args: &UniverseArgs) -> Option<CatalogSource> {
    if let Some(path) = &args.catalog {
        return Some(CatalogSource::File(path.clone()));
    }
    (!args.symbols.is_empty()).then(|| CatalogSource::Inline(args.symbols.clone()))
}

fn require_universe(args: &UniverseArgs, suffix: Option<&str>) -> Result<Universe, CliError> {
    let source = catalog_source(args).ok_or_else(|| {
        CliError::Usage(String::from(
            "a catalog is required: pass --catalog PATH, --symbols A,B or set SECFEED_CATALOG",
        ))
    })?;
    Ok(load_universe(&source, suffix)?)
}

/// Validated identifiers when a catalog was given, `None` to cover the whole store.
fn optional_symbols(args: &UniverseArgs) -> Result<Option<Vec<String>>, CliError> {
    if catalog_source(args).is_none() {
        return Ok(None);
    }
    let config = IngestConfig::from_env()?;
    let suffix = effective_suffix(args, &config);
    let universe = require_universe(args, suffix.as_deref())?;
    Ok(Some(
        universe
            .symbols
            .iter()
            .map(|symbol| symbol.as_str().to_owned())
            .collect(),
    ))
}
