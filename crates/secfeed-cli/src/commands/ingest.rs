use std::sync::Arc;

use serde::Serialize;

use secfeed_core::{
    AuditOptions, CoverageReport, IngestConfig, Pipeline, ReqwestHttpClient, RequestBudget,
    RunReport, RunStatus, Warehouse, YahooProvider,
};

use crate::cli::{Cli, IngestArgs};
use crate::error::CliError;

use super::{effective_suffix, open_warehouse, require_universe, CommandOutput};

const CANCELLED_EXIT_CODE: u8 = 130;

#[derive(Debug, Serialize)]
struct IngestDocument<'a> {
    run: &'a RunReport,
    coverage: &'a CoverageReport,
}

/// Environment configuration with command-line overrides applied.
pub(super) fn ingest_config(args: &IngestArgs) -> Result<IngestConfig, CliError> {
    let mut config = IngestConfig::from_env()?;
    if let Some(mode) = args.mode {
        config.mode = mode.into();
    }
    if let Some(batch_size) = args.batch_size {
        config.batch_size = batch_size;
    }
    if let Some(item_delay_ms) = args.item_delay_ms {
        config.item_delay_ms = item_delay_ms;
    }
    if let Some(batch_delay_ms) = args.batch_delay_ms {
        config.batch_delay_ms = batch_delay_ms;
    }
    if let Some(max_retries) = args.max_retries {
        config.max_retries = max_retries;
    }
    if let Some(history_years) = args.history_years {
        config.history_years = history_years;
    }
    if let Some(requests_per_minute) = args.requests_per_minute {
        config.requests_per_minute = requests_per_minute;
    }
    config.exchange_suffix = effective_suffix(&args.universe, &config);
    config.resume = !args.fresh;
    config.validate()?;
    Ok(config)
}

pub(super) fn pipeline(config: IngestConfig, warehouse: Warehouse) -> Pipeline {
    let provider = YahooProvider::new(
        Arc::new(ReqwestHttpClient::new()),
        RequestBudget::per_minute(config.requests_per_minute),
    )
    .with_history_years(config.history_years)
    .with_timeout_ms(config.http_timeout_ms);
    Pipeline::new(config, warehouse, Arc::new(provider))
}

pub async fn run(cli: &Cli, args: &IngestArgs) -> Result<CommandOutput, CliError> {
    let config = ingest_config(args)?;
    let universe = require_universe(&args.universe, config.exchange_suffix.as_deref())?;
    let warehouse = open_warehouse(cli)?;
    let pipeline = pipeline(config, warehouse.clone());

    let stop = pipeline.stop_signal();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received; finishing in-flight identifiers");
            stop.raise();
        }
    });

    let report = pipeline.run(&universe).await;
    interrupt.abort();
    let report = report?;

    let coverage = warehouse.audit(&AuditOptions {
        catalog: Some(
            universe
                .symbols
                .iter()
                .map(|symbol| symbol.as_str().to_owned())
                .collect(),
        ),
        ..AuditOptions::default()
    })?;

    let output = CommandOutput::ok(serde_json::to_value(IngestDocument {
        run: &report,
        coverage: &coverage,
    })?);
    Ok(if report.status == RunStatus::Cancelled {
        output.with_exit_code(CANCELLED_EXIT_CODE)
    } else {
        output
    })
}
