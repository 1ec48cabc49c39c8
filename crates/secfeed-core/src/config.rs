//! Ingestion settings from the environment (and `.env`).

use std::str::FromStr;
use std::time::Duration;

use serde::Serialize;

use crate::normalize::{Normalizer, DEFAULT_OFFSET_MINUTES};
use crate::retry::RetryConfig;
use crate::scheduler::Pacing;
use crate::{ConfigError, IngestMode};

pub const DEFAULT_EXCHANGE_SUFFIX: &str = ".NS";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestConfig {
    pub batch_size: usize,
    pub item_delay_ms: u64,
    pub batch_delay_ms: u64,
    /// Total attempts per provider request.
    pub max_retries: u32,
    pub mode: IngestMode,
    pub history_years: u32,
    /// Appended to bare catalog tokens; `None` disables.
    pub exchange_suffix: Option<String>,
    pub tz_offset_minutes: i32,
    pub requests_per_minute: u32,
    pub http_timeout_ms: u64,
    /// Pick up an unfinished run with the same configuration.
    pub resume: bool,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            item_delay_ms: 300,
            batch_delay_ms: 2_000,
            max_retries: 3,
            mode: IngestMode::Incremental,
            history_years: 5,
            exchange_suffix: Some(DEFAULT_EXCHANGE_SUFFIX.to_owned()),
            tz_offset_minutes: DEFAULT_OFFSET_MINUTES,
            requests_per_minute: 120,
            http_timeout_ms: 10_000,
            resume: true,
        }
    }
}

impl IngestConfig {
    /// Load `.env` if present, then read `SECFEED_*` variables over the defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let config = Self {
            batch_size: parse_var(&lookup, "SECFEED_BATCH_SIZE", "integer", defaults.batch_size)?,
            item_delay_ms: parse_var(&lookup, "SECFEED_ITEM_DELAY_MS", "integer", defaults.item_delay_ms)?,
            batch_delay_ms: parse_var(
                &lookup,
                "SECFEED_BATCH_DELAY_MS",
                "integer",
                defaults.batch_delay_ms,
            )?,
            max_retries: parse_var(&lookup, "SECFEED_MAX_RETRIES", "integer", defaults.max_retries)?,
            mode: match lookup("SECFEED_MODE") {
                Some(value) if !value.trim().is_empty() => value.parse()?,
                _ => defaults.mode,
            },
            history_years: parse_var(
                &lookup,
                "SECFEED_HISTORY_YEARS",
                "integer",
                defaults.history_years,
            )?,
            exchange_suffix: match lookup("SECFEED_EXCHANGE_SUFFIX") {
                Some(value) => normalize_suffix(&value),
                None => defaults.exchange_suffix,
            },
            tz_offset_minutes: parse_var(
                &lookup,
                "SECFEED_TZ_OFFSET_MINUTES",
                "integer",
                defaults.tz_offset_minutes,
            )?,
            requests_per_minute: parse_var(
                &lookup,
                "SECFEED_REQUESTS_PER_MINUTE",
                "integer",
                defaults.requests_per_minute,
            )?,
            http_timeout_ms: parse_var(
                &lookup,
                "SECFEED_HTTP_TIMEOUT_MS",
                "integer",
                defaults.http_timeout_ms,
            )?,
            resume: defaults.resume,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::OutOfRange(String::from(
                "batch size must be greater than zero",
            )));
        }
        if self.max_retries == 0 {
            return Err(ConfigError::OutOfRange(String::from(
                "max retries must allow at least one attempt",
            )));
        }
        if self.history_years == 0 {
            return Err(ConfigError::OutOfRange(String::from(
                "history years must be greater than zero",
            )));
        }
        if self.tz_offset_minutes.abs() >= 24 * 60 {
            return Err(ConfigError::OutOfRange(format!(
                "timezone offset {} minutes is outside +/-24h",
                self.tz_offset_minutes
            )));
        }
        if self.requests_per_minute == 0 {
            return Err(ConfigError::OutOfRange(String::from(
                "requests per minute must be greater than zero",
            )));
        }
        Ok(())
    }

    pub fn pacing(&self) -> Pacing {
        Pacing::new(
            Duration::from_millis(self.item_delay_ms),
            Duration::from_millis(self.batch_delay_ms),
        )
    }

    pub fn retry(&self) -> RetryConfig {
        RetryConfig::exponential(self.max_retries)
    }

    pub fn normalizer(&self) -> Normalizer {
        Normalizer::new(self.tz_offset_minutes)
    }

    /// Settings that decide what a run fetches. Runs with the same fingerprint can
    /// resume each other. Pacing and transport settings are not part of it.
    pub fn fingerprint(&self) -> String {
        format!(
            "mode={};suffix={};history_years={};tz={}",
            self.mode,
            self.exchange_suffix.as_deref().unwrap_or(""),
            self.history_years,
            self.tz_offset_minutes
        )
    }
}

fn normalize_suffix(value: &str) -> Option<String> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    let value = value.to_ascii_uppercase();
    Some(if value.starts_with('.') {
        value
    } else {
        format!(".{value}")
    })
}

fn parse_var<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    expected: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(name) {
        Some(value) if !value.trim().is_empty() => {
            value
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidValue {
                    name,
                    expected,
                    value,
                })
        }
        _ => Ok(default),
    }
}
