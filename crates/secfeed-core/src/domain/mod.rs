//! Identifier types and ingestion modes.

mod symbol;

use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ConfigError;

pub use symbol::{Symbol, MAX_SYMBOL_LEN};

/// How the backlog treats identifiers that already have data.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestMode {
    /// Fetch only kinds that never succeeded.
    #[default]
    Incremental,
    /// Refetch everything.
    Full,
}

impl IngestMode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Incremental => "incremental",
            Self::Full => "full",
        }
    }
}

impl Display for IngestMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IngestMode {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "incremental" => Ok(Self::Incremental),
            "full" => Ok(Self::Full),
            other => Err(ConfigError::InvalidValue {
                name: "mode",
                expected: "mode (full|incremental)",
                value: other.to_owned(),
            }),
        }
    }
}
