//! Per-identifier fetch: provider requests with bounded retry, then normalization.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde_json::Value;

use secfeed_warehouse::{EntityKind, NormalizedBundle, PeriodType};

use crate::backlog::WorkItem;
use crate::normalize::Normalizer;
use crate::provider::{FetchError, MarketDataProvider, ProviderFuture};
use crate::retry::{RetryConfig, RetryMachine, RetryState};
use crate::scheduler::duration_ms;
use crate::Symbol;

/// Result of fetching one work item. A kind in `failures` must not be counted as
/// completed even if some of its rows made it into `bundle`.
#[derive(Debug, Clone)]
pub struct FetchedItem {
    pub symbol: Symbol,
    pub requested: BTreeSet<EntityKind>,
    pub bundle: NormalizedBundle,
    pub failures: BTreeMap<EntityKind, FetchError>,
    /// At least one request was rate limited.
    pub throttled: bool,
}

#[derive(Clone)]
pub struct Fetcher {
    provider: Arc<dyn MarketDataProvider>,
    normalizer: Normalizer,
    retry: RetryConfig,
}

impl Fetcher {
    pub fn new(provider: Arc<dyn MarketDataProvider>, normalizer: Normalizer, retry: RetryConfig) -> Self {
        Self {
            provider,
            normalizer,
            retry,
        }
    }

    /// Fetch and normalize every requested kind. Never fails as a whole.
    pub async fn fetch(&self, item: WorkItem) -> FetchedItem {
        let symbol = &item.symbol;
        let wants = |kind: EntityKind| item.kinds.contains(&kind);
        let provider = self.provider.as_ref();
        let normalizer = &self.normalizer;

        let mut bundle = NormalizedBundle::new(symbol.as_str());
        let mut failures = BTreeMap::new();
        let mut throttled = false;

        if wants(EntityKind::Profile) || wants(EntityKind::Metrics) {
            match self
                .attempt(symbol, "summary", &mut throttled, || provider.summary(symbol))
                .await
            {
                Ok(summary) => {
                    if wants(EntityKind::Profile) {
                        bundle.profile =
                            Some(normalizer.profile(symbol.as_str(), &summary, &mut bundle.quality_events));
                    }
                    if wants(EntityKind::Metrics) {
                        bundle.metrics =
                            Some(normalizer.metrics(symbol.as_str(), &summary, &mut bundle.quality_events));
                    }
                }
                Err(error) => {
                    for kind in [EntityKind::Profile, EntityKind::Metrics] {
                        if wants(kind) {
                            failures.insert(kind, error.clone());
                        }
                    }
                }
            }
        }

        if wants(EntityKind::PriceHistory) {
            match self
                .attempt(symbol, "price_history", &mut throttled, || {
                    provider.price_history(symbol)
                })
                .await
            {
                Ok(chart) => {
                    bundle.prices =
                        Some(normalizer.prices(symbol.as_str(), &chart, &mut bundle.quality_events));
                }
                Err(error) => {
                    failures.insert(EntityKind::PriceHistory, error);
                }
            }
        }

        if wants(EntityKind::Statements) {
            let mut rows = Vec::new();
            let mut any_succeeded = false;
            for period in [PeriodType::Annual, PeriodType::Quarterly] {
                match self
                    .attempt(symbol, "statements", &mut throttled, || {
                        provider.statements(symbol, period)
                    })
                    .await
                {
                    Ok(series) => {
                        any_succeeded = true;
                        rows.extend(normalizer.statements(
                            symbol.as_str(),
                            &series,
                            &mut bundle.quality_events,
                        ));
                    }
                    Err(error) => {
                        failures.entry(EntityKind::Statements).or_insert(error);
                    }
                }
            }
            if any_succeeded {
                bundle.statements = Some(rows);
            }
        }

        if wants(EntityKind::CorporateActions) {
            match self
                .attempt(symbol, "corporate_actions", &mut throttled, || {
                    provider.corporate_actions(symbol)
                })
                .await
            {
                Ok(chart) => {
                    bundle.corporate_actions = Some(normalizer.corporate_actions(
                        symbol.as_str(),
                        &chart,
                        &mut bundle.quality_events,
                    ));
                }
                Err(error) => {
                    failures.insert(EntityKind::CorporateActions, error);
                }
            }
        }

        if wants(EntityKind::Holders) {
            match self
                .attempt(symbol, "holders", &mut throttled, || provider.holders(symbol))
                .await
            {
                Ok(summary) => {
                    bundle.holders =
                        Some(normalizer.holders(symbol.as_str(), &summary, &mut bundle.quality_events));
                }
                Err(error) => {
                    failures.insert(EntityKind::Holders, error);
                }
            }
        }

        if wants(EntityKind::Earnings) {
            match self
                .attempt(symbol, "earnings", &mut throttled, || provider.earnings(symbol))
                .await
            {
                Ok(summary) => {
                    bundle.earnings =
                        Some(normalizer.earnings(symbol.as_str(), &summary, &mut bundle.quality_events));
                }
                Err(error) => {
                    failures.insert(EntityKind::Earnings, error);
                }
            }
        }

        for (kind, error) in &failures {
            tracing::warn!(
                symbol = %symbol,
                kind = %kind,
                code = error.code(),
                error = %error.message,
                "entity kind fetch failed"
            );
        }

        FetchedItem {
            symbol: item.symbol.clone(),
            requested: item.kinds.clone(),
            bundle,
            failures,
            throttled,
        }
    }

    /// Run one provider request through the retry state machine.
    async fn attempt<'p>(
        &self,
        symbol: &Symbol,
        resource: &'static str,
        throttled: &mut bool,
        call: impl Fn() -> ProviderFuture<'p>,
    ) -> Result<Value, FetchError> {
        let mut machine = RetryMachine::new(self.retry.clone());
        let mut last_error = None;

        while let Some(attempt) = machine.begin_attempt() {
            match call().await {
                Ok(document) => {
                    machine.succeed();
                    return Ok(document);
                }
                Err(error) => {
                    *throttled |= error.is_throttle();
                    if let RetryState::Retrying { delay, .. } = machine.fail(error.retryable()) {
                        tracing::debug!(
                            symbol = %symbol,
                            resource,
                            attempt,
                            delay_ms = duration_ms(delay),
                            error = %error,
                            "retrying provider request"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    last_error = Some(error);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| FetchError::network(format!("{resource}: no attempt made"))))
    }
}
