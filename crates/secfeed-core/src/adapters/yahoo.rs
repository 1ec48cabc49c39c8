//! Yahoo Finance adapter.
//!
//! Uses the chart (v8), quoteSummary (v10) and fundamentals-timeseries endpoints.
//! Session cookies live in the transport's cookie jar; the crumb token is cached
//! here and appended to every query.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde_json::Value;
use time::OffsetDateTime;

use secfeed_warehouse::PeriodType;

use crate::fields;
use crate::http_client::{HttpClient, HttpRequest, HttpResponse};
use crate::provider::{FetchError, FetchErrorKind, MarketDataProvider, ProviderFuture};
use crate::throttling::RequestBudget;
use crate::Symbol;

const BASE_URL: &str = "https://query2.finance.yahoo.com";
const COOKIE_URL: &str = "https://fc.yahoo.com";
const CRUMB_URLS: [&str; 2] = [
    "https://query1.finance.yahoo.com/v1/test/getcrumb",
    "https://query2.finance.yahoo.com/v1/test/getcrumb",
];
const REFERER: &str = "https://finance.yahoo.com/";
const CRUMB_TTL: Duration = Duration::from_secs(3_600);
/// Earliest period start the timeseries endpoint accepts (1985-08-22).
const STATEMENTS_PERIOD_START: i64 = 493_590_046;

pub const SUMMARY_MODULES: &str =
    "assetProfile,price,summaryDetail,defaultKeyStatistics,financialData,quoteType";

#[derive(Debug, Default)]
struct CrumbState {
    crumb: Option<String>,
    refreshed_at: Option<Instant>,
}

/// Cached crumb. The lock is never held across a request.
#[derive(Debug, Default)]
struct CrumbCache {
    state: Mutex<CrumbState>,
}

impl CrumbCache {
    fn cached(&self) -> Option<Option<String>> {
        let state = self.state.lock().expect("crumb cache mutex poisoned");
        state
            .refreshed_at
            .filter(|at| at.elapsed() < CRUMB_TTL)
            .map(|_| state.crumb.clone())
    }

    fn store(&self, crumb: Option<String>) {
        let mut state = self.state.lock().expect("crumb cache mutex poisoned");
        state.crumb = crumb;
        state.refreshed_at = Some(Instant::now());
    }

    fn invalidate(&self) {
        let mut state = self.state.lock().expect("crumb cache mutex poisoned");
        *state = CrumbState::default();
    }
}

pub struct YahooProvider {
    http: Arc<dyn HttpClient>,
    budget: RequestBudget,
    crumb: CrumbCache,
    history_years: u32,
    timeout_ms: u64,
}

impl YahooProvider {
    pub fn new(http: Arc<dyn HttpClient>, budget: RequestBudget) -> Self {
        tracing::debug!(requests_per_minute = budget.limit(), "yahoo provider ready");
        Self {
            http,
            budget,
            crumb: CrumbCache::default(),
            history_years: 5,
            timeout_ms: 10_000,
        }
    }

    pub fn with_history_years(mut self, years: u32) -> Self {
        self.history_years = years.max(1);
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    async fn send(&self, url: String) -> Result<HttpResponse, FetchError> {
        self.budget.acquire().await;
        let request = HttpRequest::get(url)
            .with_header("referer", REFERER)
            .with_timeout_ms(self.timeout_ms);
        Ok(self.http.execute(request).await?)
    }

    async fn crumb(&self) -> Option<String> {
        if let Some(crumb) = self.crumb.cached() {
            return crumb;
        }

        // The cookie endpoint answers 404 but still sets the session cookie.
        if let Err(error) = self.send(COOKIE_URL.to_owned()).await {
            tracing::debug!(error = %error, "session cookie request failed");
        }

        let mut crumb = None;
        for url in CRUMB_URLS {
            match self.send(url.to_owned()).await {
                Ok(response) if response.is_success() => {
                    let body = response.body.trim();
                    if !body.is_empty()
                        && body.len() < 100
                        && !body.contains(' ')
                        && !body.contains('<')
                    {
                        crumb = Some(body.to_owned());
                        break;
                    }
                }
                Ok(response) => {
                    tracing::debug!(url, status = response.status, "crumb endpoint refused");
                }
                Err(error) => tracing::debug!(url, error = %error, "crumb request failed"),
            }
        }

        if crumb.is_none() {
            tracing::debug!("continuing without a crumb");
        }
        self.crumb.store(crumb.clone());
        crumb
    }

    /// GET `url` (with crumb) and decode JSON; one crumb refresh on 401.
    async fn get_json(&self, url: String, context: &str) -> Result<Value, FetchError> {
        let mut refreshed = false;
        loop {
            let target = match self.crumb().await {
                Some(crumb) => format!("{url}&crumb={}", urlencoding::encode(&crumb)),
                None => url.clone(),
            };
            let response = self.send(target).await?;

            if response.status == 401 && !refreshed {
                tracing::debug!(context, "unauthorized; refreshing crumb");
                self.crumb.invalidate();
                refreshed = true;
                continue;
            }
            if !response.is_success() {
                return Err(error_from_response(&response, context));
            }

            return serde_json::from_str(&response.body).map_err(|error| {
                FetchError::malformed(format!("{context}: undecodable JSON: {error}"))
            });
        }
    }

    async fn quote_summary(&self, symbol: &Symbol, modules: &str) -> Result<Value, FetchError> {
        let url = format!(
            "{BASE_URL}/v10/finance/quoteSummary/{}?modules={modules}",
            urlencoding::encode(symbol.as_str())
        );
        let document = self.get_json(url, "quoteSummary").await?;
        first_result(document, "quoteSummary")
    }

    async fn chart(&self, symbol: &Symbol, window: &str) -> Result<Value, FetchError> {
        let url = format!(
            "{BASE_URL}/v8/finance/chart/{}?{window}&events=div%2Csplits",
            urlencoding::encode(symbol.as_str())
        );
        let document = self.get_json(url, "chart").await?;
        first_result(document, "chart")
    }
}

impl MarketDataProvider for YahooProvider {
    fn summary<'a>(&'a self, symbol: &'a Symbol) -> ProviderFuture<'a> {
        Box::pin(async move { self.quote_summary(symbol, SUMMARY_MODULES).await })
    }

    fn price_history<'a>(&'a self, symbol: &'a Symbol) -> ProviderFuture<'a> {
        Box::pin(async move {
            let end = OffsetDateTime::now_utc().unix_timestamp();
            let start = end - i64::from(self.history_years) * 365 * 86_400;
            self.chart(symbol, &format!("period1={start}&period2={end}&interval=1d"))
                .await
        })
    }

    fn statements<'a>(&'a self, symbol: &'a Symbol, period: PeriodType) -> ProviderFuture<'a> {
        Box::pin(async move {
            let end = OffsetDateTime::now_utc().unix_timestamp();
            let url = format!(
                "{BASE_URL}/ws/fundamentals-timeseries/v1/finance/timeseries/{}?type={}&period1={STATEMENTS_PERIOD_START}&period2={end}",
                urlencoding::encode(symbol.as_str()),
                fields::statement_series(period).join(",")
            );
            let document = self.get_json(url, "timeseries").await?;
            let envelope = envelope(&document, "timeseries")?;
            match envelope.get("result") {
                Some(Value::Array(series)) => Ok(Value::Array(series.clone())),
                _ => Err(FetchError::malformed("timeseries: missing result array")),
            }
        })
    }

    fn corporate_actions<'a>(&'a self, symbol: &'a Symbol) -> ProviderFuture<'a> {
        Box::pin(async move { self.chart(symbol, "range=max&interval=1mo").await })
    }

    fn holders<'a>(&'a self, symbol: &'a Symbol) -> ProviderFuture<'a> {
        Box::pin(async move { self.quote_summary(symbol, "institutionOwnership").await })
    }

    fn earnings<'a>(&'a self, symbol: &'a Symbol) -> ProviderFuture<'a> {
        Box::pin(async move { self.quote_summary(symbol, "earningsHistory").await })
    }
}

fn envelope<'a>(document: &'a Value, root: &str) -> Result<&'a Value, FetchError> {
    let envelope = document
        .get(root)
        .ok_or_else(|| FetchError::malformed(format!("{root}: missing envelope")))?;
    match envelope.get("error") {
        None | Some(Value::Null) => Ok(envelope),
        Some(error) => Err(error_from_payload(error, root)),
    }
}

fn first_result(document: Value, root: &str) -> Result<Value, FetchError> {
    let envelope = envelope(&document, root)?;
    match envelope.get("result") {
        Some(Value::Array(results)) => results
            .first()
            .cloned()
            .ok_or_else(|| FetchError::not_found(format!("{root}: empty result"))),
        _ => Err(FetchError::malformed(format!("{root}: missing result"))),
    }
}

fn error_from_payload(error: &Value, context: &str) -> FetchError {
    let code = error.get("code").and_then(Value::as_str).unwrap_or_default();
    let description = error
        .get("description")
        .and_then(Value::as_str)
        .unwrap_or(code);
    if code.eq_ignore_ascii_case("Not Found") {
        FetchError::not_found(format!("{context}: {description}"))
    } else {
        FetchError::malformed(format!("{context}: {code}: {description}"))
    }
}

fn error_from_response(response: &HttpResponse, context: &str) -> FetchError {
    if let Ok(document) = serde_json::from_str::<Value>(&response.body) {
        let payload = document
            .as_object()
            .and_then(|object| object.values().find_map(|envelope| envelope.get("error")))
            .filter(|error| !error.is_null());
        if let Some(error) = payload {
            let mapped = error_from_payload(error, context);
            if mapped.kind == FetchErrorKind::NotFound {
                return mapped;
            }
        }
    }
    FetchError::from_status(response, context)
}
