//! # secfeed core
//!
//! Ingestion pipeline for exchange-listed equities: loads an identifier catalog,
//! works out what still needs fetching, paces requests against a rate-limited
//! provider and hands normalized records to the warehouse.
//!
//! ## Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`adapters`] | Yahoo Finance provider over the HTTP seam |
//! | [`backlog`] | Incremental/full backlog resolution from the run ledger |
//! | [`catalog`] | Identifier universe loading and validation |
//! | [`config`] | `SECFEED_*` environment configuration |
//! | [`domain`] | `Symbol` and `IngestMode` |
//! | [`error`] | Core error types |
//! | [`fetch`] | Per-identifier fetch with bounded retry |
//! | [`fields`] | Source key -> column mapping tables |
//! | [`http_client`] | HTTP transport abstraction |
//! | [`normalize`] | Coercion into canonical records with quality events |
//! | [`pipeline`] | Batch loop, cancellation, resume and run reports |
//! | [`provider`] | Provider trait and fetch error taxonomy |
//! | [`retry`] | Retry state machine and backoff |
//! | [`scheduler`] | Batches, pacing and ETA |
//! | [`throttling`] | Shared requests-per-minute budget |
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use secfeed_core::{
//!     load_universe, CatalogSource, IngestConfig, Pipeline, ReqwestHttpClient, RequestBudget,
//!     Warehouse, WarehouseConfig, YahooProvider,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = IngestConfig::from_env()?;
//!     let universe = load_universe(
//!         &CatalogSource::Inline(vec!["RELIANCE".into(), "TCS".into()]),
//!         config.exchange_suffix.as_deref(),
//!     )?;
//!     let provider = YahooProvider::new(
//!         Arc::new(ReqwestHttpClient::new()),
//!         RequestBudget::per_minute(config.requests_per_minute),
//!     );
//!     let warehouse = Warehouse::open(WarehouseConfig::from_env())?;
//!     let report = Pipeline::new(config, warehouse, Arc::new(provider)).run(&universe).await?;
//!     println!("{} identifiers processed", report.processed);
//!     Ok(())
//! }
//! ```

pub mod adapters;
pub mod backlog;
pub mod catalog;
pub mod config;
pub mod domain;
pub mod error;
pub mod fetch;
pub mod fields;
pub mod http_client;
pub mod normalize;
pub mod pipeline;
pub mod provider;
pub mod retry;
pub mod scheduler;
pub mod throttling;

pub use adapters::YahooProvider;
pub use backlog::{Backlog, WorkItem};
pub use catalog::{load_universe, CatalogSource, RejectedToken, Universe};
pub use config::IngestConfig;
pub use domain::{IngestMode, Symbol, MAX_SYMBOL_LEN};
pub use error::{CatalogError, ConfigError, PipelineError, ValidationError};
pub use fetch::{FetchedItem, Fetcher};
pub use http_client::{HttpClient, HttpError, HttpRequest, HttpResponse, ReqwestHttpClient};
pub use normalize::Normalizer;
pub use pipeline::{KindTotals, Pipeline, Plan, RunReport, StopSignal};
pub use provider::{FetchError, FetchErrorKind, MarketDataProvider, ProviderFuture};
pub use retry::{Backoff, RetryConfig, RetryMachine, RetryState};
pub use scheduler::{Batch, Pacing, Schedule};
pub use throttling::RequestBudget;

// Warehouse (re-exported from secfeed-warehouse)
pub use secfeed_warehouse::{
    AuditOptions, CoverageReport, DeriveReport, EntityKind, QueryGuardrails, QueryResult,
    RunStatus, Warehouse, WarehouseConfig, WarehouseError,
};
