//! Run ledger: one row per ingestion run and one row per (run, identifier, kind)
//! outcome. Backlog resolution and checkpoint resume both read from here.

use std::collections::{BTreeSet, HashMap};
use std::fmt::{Display, Formatter};
use std::str::FromStr;

use ::duckdb::{params, OptionalExt, ToSql};
use serde::{Deserialize, Serialize};

use crate::duckdb::AccessMode;
use crate::schema::EntityKind;
use crate::{finalize_transaction, Warehouse, WarehouseError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Cancelled,
    Failed,
}

impl RunStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        }
    }
}

impl Display for RunStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = WarehouseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "cancelled" => Ok(Self::Cancelled),
            "failed" => Ok(Self::Failed),
            other => Err(WarehouseError::InvalidData(format!(
                "unknown run status '{other}'"
            ))),
        }
    }
}

/// A row of `ingest_runs`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunRecord {
    pub run_id: String,
    pub mode: String,
    pub config_fingerprint: String,
    pub work_fingerprint: String,
    pub planned_items: usize,
    pub planned_batches: usize,
    pub next_batch: usize,
    pub last_symbol: Option<String>,
    pub status: RunStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Succeeded,
    Failed,
}

impl OutcomeStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }
}

/// One (identifier, entity kind) result within a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutcomeRecord {
    pub symbol: String,
    pub kind: EntityKind,
    pub status: OutcomeStatus,
    pub inserted: usize,
    pub updated: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl OutcomeRecord {
    pub fn succeeded(symbol: impl Into<String>, kind: EntityKind, inserted: usize, updated: usize) -> Self {
        Self {
            symbol: symbol.into(),
            kind,
            status: OutcomeStatus::Succeeded,
            inserted,
            updated,
            error_code: None,
            error_message: None,
        }
    }

    pub fn failed(
        symbol: impl Into<String>,
        kind: EntityKind,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            kind,
            status: OutcomeStatus::Failed,
            inserted: 0,
            updated: 0,
            error_code: Some(code.into()),
            error_message: Some(message.into()),
        }
    }
}

/// Identifier -> entity kinds with at least one succeeded outcome.
pub type CompletedKinds = HashMap<String, BTreeSet<EntityKind>>;

fn to_count(value: i64) -> usize {
    usize::try_from(value).unwrap_or_default()
}

fn to_bigint(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

impl Warehouse {
    /// Insert a new run in `running` state.
    pub fn begin_run(&self, run: &RunRecord) -> Result<(), WarehouseError> {
        let connection = self.manager.acquire(AccessMode::ReadWrite)?;
        connection.execute(
            "INSERT INTO ingest_runs \
             (run_id, mode, config_fingerprint, work_fingerprint, planned_items, planned_batches, next_batch, status) \
             VALUES (?, ?, ?, ?, ?, ?, ?, 'running')",
            params![
                run.run_id,
                run.mode,
                run.config_fingerprint,
                run.work_fingerprint,
                to_bigint(run.planned_items),
                to_bigint(run.planned_batches),
                to_bigint(run.next_batch),
            ],
        )?;
        tracing::debug!(run_id = %run.run_id, mode = %run.mode, "run started");
        Ok(())
    }

    /// Flip an interrupted run back to `running` with a freshly planned schedule.
    pub fn resume_run(
        &self,
        run_id: &str,
        work_fingerprint: &str,
        planned_items: usize,
        planned_batches: usize,
        next_batch: usize,
    ) -> Result<(), WarehouseError> {
        let connection = self.manager.acquire(AccessMode::ReadWrite)?;
        let updated = connection.execute(
            "UPDATE ingest_runs SET status = 'running', finished_at = NULL, work_fingerprint = ?, \
             planned_items = ?, planned_batches = ?, next_batch = ? WHERE run_id = ?",
            params![
                work_fingerprint,
                to_bigint(planned_items),
                to_bigint(planned_batches),
                to_bigint(next_batch),
                run_id,
            ],
        )?;
        if updated == 0 {
            return Err(WarehouseError::InvalidData(format!(
                "run '{run_id}' does not exist"
            )));
        }
        Ok(())
    }

    /// Record the first batch index that still has to run.
    pub fn checkpoint_run(
        &self,
        run_id: &str,
        next_batch: usize,
        last_symbol: Option<&str>,
    ) -> Result<(), WarehouseError> {
        let connection = self.manager.acquire(AccessMode::ReadWrite)?;
        connection.execute(
            "UPDATE ingest_runs SET next_batch = ?, last_symbol = COALESCE(?, last_symbol) WHERE run_id = ?",
            params![to_bigint(next_batch), last_symbol, run_id],
        )?;
        Ok(())
    }

    pub fn finish_run(&self, run_id: &str, status: RunStatus) -> Result<(), WarehouseError> {
        let connection = self.manager.acquire(AccessMode::ReadWrite)?;
        connection.execute(
            "UPDATE ingest_runs SET status = ?, finished_at = CURRENT_TIMESTAMP WHERE run_id = ?",
            params![status.as_str(), run_id],
        )?;
        tracing::debug!(run_id, status = %status, "run finished");
        Ok(())
    }

    /// Append per-kind outcomes for one or more identifiers in a single transaction.
    pub fn record_outcomes(
        &self,
        run_id: &str,
        outcomes: &[OutcomeRecord],
    ) -> Result<(), WarehouseError> {
        if outcomes.is_empty() {
            return Ok(());
        }

        let connection = self.manager.acquire(AccessMode::ReadWrite)?;
        connection.execute_batch("BEGIN TRANSACTION")?;
        let result = (|| -> Result<(), WarehouseError> {
            for outcome in outcomes {
                connection.execute(
                    "INSERT INTO ingest_log \
                     (run_id, symbol, entity_kind, status, inserted, updated, error_code, error_message) \
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
                    params![
                        run_id,
                        outcome.symbol,
                        outcome.kind.as_str(),
                        outcome.status.as_str(),
                        to_bigint(outcome.inserted),
                        to_bigint(outcome.updated),
                        outcome.error_code,
                        outcome.error_message,
                    ],
                )?;
            }
            Ok(())
        })();

        finalize_transaction(&connection, result)
    }

    /// Entity kinds each identifier has completed in any run.
    pub fn completed_kinds(&self) -> Result<CompletedKinds, WarehouseError> {
        self.query_completed_kinds(None)
    }

    /// Entity kinds each identifier completed within `run_id`.
    pub fn completed_kinds_for_run(&self, run_id: &str) -> Result<CompletedKinds, WarehouseError> {
        self.query_completed_kinds(Some(run_id))
    }

    fn query_completed_kinds(&self, run_id: Option<&str>) -> Result<CompletedKinds, WarehouseError> {
        let connection = self.manager.acquire(AccessMode::ReadOnly)?;
        let mut sql = String::from(
            "SELECT DISTINCT symbol, entity_kind FROM ingest_log WHERE status = 'succeeded'",
        );
        let bound: Vec<&dyn ToSql> = match &run_id {
            Some(run_id) => {
                sql.push_str(" AND run_id = ?");
                vec![run_id as &dyn ToSql]
            }
            None => Vec::new(),
        };
        let mut statement = connection.prepare(sql.as_str())?;
        let mut rows = statement.query(bound.as_slice())?;

        let mut completed = CompletedKinds::new();
        while let Some(row) = rows.next()? {
            let symbol: String = row.get(0)?;
            let kind: String = row.get(1)?;
            let kind = kind
                .parse::<EntityKind>()
                .map_err(WarehouseError::InvalidData)?;
            completed.entry(symbol).or_default().insert(kind);
        }
        Ok(completed)
    }

    /// Most recent run with this configuration that did not complete.
    pub fn latest_unfinished_run(
        &self,
        config_fingerprint: &str,
    ) -> Result<Option<RunRecord>, WarehouseError> {
        let connection = self.manager.acquire(AccessMode::ReadOnly)?;
        let row = connection
            .query_row(
                "SELECT run_id, mode, config_fingerprint, work_fingerprint, planned_items, \
                 planned_batches, next_batch, last_symbol, status \
                 FROM ingest_runs WHERE config_fingerprint = ? AND status <> 'completed' \
                 ORDER BY started_at DESC LIMIT 1",
                params![config_fingerprint],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, i64>(4)?,
                        row.get::<_, i64>(5)?,
                        row.get::<_, i64>(6)?,
                        row.get::<_, Option<String>>(7)?,
                        row.get::<_, String>(8)?,
                    ))
                },
            )
            .optional()?;

        let Some((run_id, mode, config, work, items, batches, next_batch, last_symbol, status)) =
            row
        else {
            return Ok(None);
        };

        Ok(Some(RunRecord {
            run_id,
            mode,
            config_fingerprint: config,
            work_fingerprint: work,
            planned_items: to_count(items),
            planned_batches: to_count(batches),
            next_batch: to_count(next_batch),
            last_symbol,
            status: status.parse()?,
        }))
    }
}
