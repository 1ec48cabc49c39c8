//! Market-data provider seam.
//!
//! Adapters return loosely typed JSON documents; everything typed happens in the
//! normalizer. Transport and payload failures are mapped onto [`FetchErrorKind`].

use std::fmt::{Display, Formatter};
use std::future::Future;
use std::pin::Pin;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use secfeed_warehouse::PeriodType;

use crate::http_client::{HttpError, HttpResponse};
use crate::Symbol;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchErrorKind {
    NotFound,
    RateLimited,
    Malformed,
    NetworkError,
}

impl FetchErrorKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::RateLimited => "rate_limited",
            Self::Malformed => "malformed",
            Self::NetworkError => "network_error",
        }
    }
}

impl Display for FetchErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("{kind}: {message}")]
pub struct FetchError {
    pub kind: FetchErrorKind,
    pub message: String,
}

impl FetchError {
    pub fn new(kind: FetchErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::NotFound, message)
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::RateLimited, message)
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::Malformed, message)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::NetworkError, message)
    }

    pub const fn code(&self) -> &'static str {
        self.kind.as_str()
    }

    /// Rate limits and network failures are worth another attempt.
    pub const fn retryable(&self) -> bool {
        matches!(
            self.kind,
            FetchErrorKind::RateLimited | FetchErrorKind::NetworkError
        )
    }

    pub const fn is_throttle(&self) -> bool {
        matches!(self.kind, FetchErrorKind::RateLimited)
    }

    /// Map a non-2xx response.
    pub fn from_status(response: &HttpResponse, context: &str) -> Self {
        match response.status {
            404 => Self::not_found(format!("{context}: not found (404)")),
            429 | 503 => Self::rate_limited(format!(
                "{context}: throttled ({})",
                response.status
            )),
            status if status >= 500 => {
                Self::network(format!("{context}: upstream status {status}"))
            }
            status => Self::malformed(format!("{context}: unexpected status {status}")),
        }
    }
}

impl From<HttpError> for FetchError {
    fn from(error: HttpError) -> Self {
        Self::network(error.message())
    }
}

pub type ProviderFuture<'a> = Pin<Box<dyn Future<Output = Result<Value, FetchError>> + Send + 'a>>;

/// One method per upstream resource. Each call is an independent request.
pub trait MarketDataProvider: Send + Sync {
    /// Profile and metric modules in one document.
    fn summary<'a>(&'a self, symbol: &'a Symbol) -> ProviderFuture<'a>;

    /// Daily bars for the configured history window.
    fn price_history<'a>(&'a self, symbol: &'a Symbol) -> ProviderFuture<'a>;

    fn statements<'a>(&'a self, symbol: &'a Symbol, period: PeriodType) -> ProviderFuture<'a>;

    fn corporate_actions<'a>(&'a self, symbol: &'a Symbol) -> ProviderFuture<'a>;

    fn holders<'a>(&'a self, symbol: &'a Symbol) -> ProviderFuture<'a>;

    fn earnings<'a>(&'a self, symbol: &'a Symbol) -> ProviderFuture<'a>;
}
