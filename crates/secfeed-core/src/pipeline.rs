//! Ingestion run: backlog, batch loop, persistence and the run ledger.
//!
//! Fetches for a batch run concurrently on a `JoinSet`; persistence for every
//! identifier happens afterwards on the batch loop itself, so one identifier is
//! never written by two tasks.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::Notify;
use tokio::task::{self, JoinSet};
use uuid::Uuid;

use secfeed_warehouse::{
    CompletedKinds, EntityKind, OutcomeRecord, OutcomeStatus, PersistReport, RunRecord, RunStatus,
    Warehouse,
};

use crate::backlog::{self, WorkItem};
use crate::catalog::Universe;
use crate::config::IngestConfig;
use crate::fetch::{FetchedItem, Fetcher};
use crate::provider::MarketDataProvider;
use crate::scheduler::{duration_ms, Pacing, Schedule};
use crate::{IngestMode, PipelineError, Symbol};

/// Cooperative cancellation shared between the operator surface and the batch loop.
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    raised: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.raised.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_raised(&self) -> bool {
        self.raised.load(Ordering::SeqCst)
    }

    /// Resolve once the signal is raised.
    pub async fn raised(&self) {
        let notified = self.notify.notified();
        if self.is_raised() {
            return;
        }
        notified.await;
    }

    /// Sleep for `delay`, waking early if the signal is raised.
    async fn pause(&self, delay: Duration) {
        if delay.is_zero() {
            return;
        }
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = self.raised() => {}
        }
    }
}

/// What a run would do, without fetching anything.
#[derive(Debug, Clone, Serialize)]
pub struct Plan {
    pub mode: IngestMode,
    pub universe: usize,
    pub to_fetch: Vec<WorkItem>,
    pub to_skip: Vec<Symbol>,
    pub requests: usize,
    pub batches: usize,
    pub estimate_ms: u64,
    /// Unfinished run this configuration would resume.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resumes: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct KindTotals {
    pub succeeded: usize,
    pub failed: usize,
    pub inserted: usize,
    pub updated: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub mode: IngestMode,
    pub status: RunStatus,
    pub resumed: bool,
    pub start_batch: usize,
    pub universe: usize,
    pub rejected: usize,
    /// Identifiers in the schedule.
    pub planned: usize,
    pub skipped: usize,
    pub processed: usize,
    /// Processed identifiers where every requested kind succeeded.
    pub complete: usize,
    pub failed_identifiers: Vec<String>,
    pub kinds: BTreeMap<EntityKind, KindTotals>,
    pub outcomes: Vec<OutcomeRecord>,
    pub quality_events: usize,
    pub elapsed_ms: u64,
    pub throttle_adjustments: u32,
    pub final_item_delay_ms: u64,
}

impl RunReport {
    pub fn success_rate(&self) -> f64 {
        if self.processed == 0 {
            return 1.0;
        }
        self.complete as f64 / self.processed as f64
    }

    fn record(&mut self, outcomes: &[OutcomeRecord], quality_events: usize) {
        self.processed += 1;
        self.quality_events += quality_events;

        let mut failed = false;
        for outcome in outcomes {
            let totals = self.kinds.entry(outcome.kind).or_default();
            match outcome.status {
                OutcomeStatus::Succeeded => {
                    totals.succeeded += 1;
                    totals.inserted += outcome.inserted;
                    totals.updated += outcome.updated;
                }
                OutcomeStatus::Failed => {
                    totals.failed += 1;
                    failed = true;
                }
            }
        }

        if failed {
            if let Some(outcome) = outcomes.first() {
                self.failed_identifiers.push(outcome.symbol.clone());
            }
        } else {
            self.complete += 1;
        }
        self.outcomes.extend_from_slice(outcomes);
    }
}

/// Per-kind ledger rows for one fetched identifier.
fn outcomes_for(item: &FetchedItem, persisted: &PersistReport) -> Vec<OutcomeRecord> {
    let symbol = item.symbol.as_str();
    item.requested
        .iter()
        .map(|kind| {
            if let Some(error) = item.failures.get(kind) {
                return OutcomeRecord::failed(symbol, *kind, error.code(), error.message.clone());
            }
            match persisted.kinds.get(kind) {
                Some(report) => match &report.error {
                    None => OutcomeRecord::succeeded(symbol, *kind, report.inserted, report.updated),
                    Some(error) => {
                        OutcomeRecord::failed(symbol, *kind, error.kind.as_str(), error.message.clone())
                    }
                },
                None => OutcomeRecord::failed(symbol, *kind, "malformed", "no data produced"),
            }
        })
        .collect()
}

/// Every requested kind of an identifier whose fetch task died fails as `aborted`.
fn aborted_outcomes(work: &WorkItem, error: &str) -> Vec<OutcomeRecord> {
    work.kinds
        .iter()
        .map(|kind| {
            OutcomeRecord::failed(
                work.symbol.as_str(),
                *kind,
                "aborted",
                format!("fetch task failed: {error}"),
            )
        })
        .collect()
}

/// FNV-1a over the scheduled identifiers and kinds; identifies a work list.
fn work_fingerprint(items: &[WorkItem]) -> String {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    let mut feed = |bytes: &[u8]| {
        for byte in bytes {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
    };
    for item in items {
        feed(item.symbol.as_str().as_bytes());
        for kind in &item.kinds {
            feed(b":");
            feed(kind.as_str().as_bytes());
        }
        feed(b"\n");
    }
    format!("{:016x}:{}", hash, items.len())
}

struct RunStart {
    run_id: String,
    start_batch: usize,
    resumed: bool,
    done_in_run: CompletedKinds,
}

pub struct Pipeline {
    config: IngestConfig,
    warehouse: Warehouse,
    fetcher: Fetcher,
    stop: StopSignal,
}

impl Pipeline {
    pub fn new(config: IngestConfig, warehouse: Warehouse, provider: Arc<dyn MarketDataProvider>) -> Self {
        let fetcher = Fetcher::new(provider, config.normalizer(), config.retry());
        Self {
            config,
            warehouse,
            fetcher,
            stop: StopSignal::new(),
        }
    }

    pub fn with_stop_signal(mut self, stop: StopSignal) -> Self {
        self.stop = stop;
        self
    }

    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    /// Resolve the backlog and estimate the run without fetching.
    pub fn plan(&self, universe: &Universe) -> Result<Plan, PipelineError> {
        self.config.validate()?;
        let completed = self.warehouse.completed_kinds()?;
        let backlog = backlog::resolve(universe, &completed, self.config.mode);
        let requests = backlog.planned_requests();
        let schedule = Schedule::new(backlog.to_fetch, self.config.batch_size);
        let resumes = if self.config.resume {
            self.warehouse
                .latest_unfinished_run(&self.config.fingerprint())?
                .map(|run| run.run_id)
        } else {
            None
        };

        Ok(Plan {
            mode: self.config.mode,
            universe: universe.len(),
            requests,
            batches: schedule.batch_count(),
            estimate_ms: duration_ms(schedule.estimate(&self.config.pacing())),
            to_fetch: schedule.items().to_vec(),
            to_skip: backlog.to_skip,
            resumes,
        })
    }

    /// Execute one ingestion run over `universe`.
    ///
    /// Per-identifier failures end up in the report; only store failures on the run
    /// ledger abort the run, which is then left resumable.
    pub async fn run(&self, universe: &Universe) -> Result<RunReport, PipelineError> {
        self.config.validate()?;
        let started = Instant::now();

        let completed = self.warehouse.completed_kinds()?;
        let backlog = backlog::resolve(universe, &completed, self.config.mode);
        let skipped = backlog.to_skip.len();
        let schedule = Schedule::new(backlog.to_fetch, self.config.batch_size);
        let work_fingerprint = work_fingerprint(schedule.items());

        let start = self.start_run(&schedule, &work_fingerprint)?;
        let mut report = RunReport {
            run_id: start.run_id.clone(),
            mode: self.config.mode,
            status: RunStatus::Running,
            resumed: start.resumed,
            start_batch: start.start_batch,
            universe: universe.len(),
            rejected: universe.rejected.len(),
            planned: schedule.items().len(),
            skipped,
            processed: 0,
            complete: 0,
            failed_identifiers: Vec::new(),
            kinds: BTreeMap::new(),
            outcomes: Vec::new(),
            quality_events: 0,
            elapsed_ms: 0,
            throttle_adjustments: 0,
            final_item_delay_ms: 0,
        };

        let mut pacing = self.config.pacing();
        let result = self.batch_loop(&schedule, &start, &mut pacing, &mut report).await;
        report.throttle_adjustments = pacing.adjustments;
        report.final_item_delay_ms = duration_ms(pacing.per_item_delay);
        report.elapsed_ms = duration_ms(started.elapsed());

        let status = match result {
            Ok(status) => status,
            Err(error) => {
                if let Err(finish_error) = self.warehouse.finish_run(&start.run_id, RunStatus::Failed) {
                    tracing::warn!(run_id = %start.run_id, error = %finish_error, "could not mark run failed");
                }
                return Err(error);
            }
        };
        self.warehouse.finish_run(&start.run_id, status)?;
        report.status = status;

        tracing::info!(
            run_id = %report.run_id,
            status = %status,
            processed = report.processed,
            complete = report.complete,
            failed = report.failed_identifiers.len(),
            skipped = report.skipped,
            quality_events = report.quality_events,
            success_rate = %format!("{:.1}%", report.success_rate() * 100.0),
            elapsed_ms = report.elapsed_ms,
            "ingestion run finished"
        );
        Ok(report)
    }

    fn start_run(&self, schedule: &Schedule, work_fingerprint: &str) -> Result<RunStart, PipelineError> {
        let config_fingerprint = self.config.fingerprint();
        let previous = if self.config.resume {
            self.warehouse.latest_unfinished_run(&config_fingerprint)?
        } else {
            None
        };

        if let Some(run) = previous {
            let (start_batch, done_in_run) = match self.config.mode {
                IngestMode::Full => {
                    let start_batch = if run.work_fingerprint == work_fingerprint {
                        run.next_batch.min(schedule.batch_count())
                    } else {
                        0
                    };
                    (start_batch, self.warehouse.completed_kinds_for_run(&run.run_id)?)
                }
                // The backlog already excludes everything that completed.
                IngestMode::Incremental => (0, CompletedKinds::new()),
            };
            self.warehouse.resume_run(
                &run.run_id,
                work_fingerprint,
                schedule.items().len(),
                schedule.batch_count(),
                start_batch,
            )?;
            tracing::info!(
                run_id = %run.run_id,
                start_batch,
                previous_status = %run.status,
                "resuming unfinished run"
            );
            return Ok(RunStart {
                run_id: run.run_id,
                start_batch,
                resumed: true,
                done_in_run,
            });
        }

        let run_id = Uuid::new_v4().to_string();
        self.warehouse.begin_run(&RunRecord {
            run_id: run_id.clone(),
            mode: self.config.mode.as_str().to_owned(),
            config_fingerprint,
            work_fingerprint: work_fingerprint.to_owned(),
            planned_items: schedule.items().len(),
            planned_batches: schedule.batch_count(),
            next_batch: 0,
            last_symbol: None,
            status: RunStatus::Running,
        })?;
        Ok(RunStart {
            run_id,
            start_batch: 0,
            resumed: false,
            done_in_run: CompletedKinds::new(),
        })
    }

    async fn batch_loop(
        &self,
        schedule: &Schedule,
        start: &RunStart,
        pacing: &mut Pacing,
        report: &mut RunReport,
    ) -> Result<RunStatus, PipelineError> {
        let total_batches = schedule.batch_count();
        tracing::info!(
            run_id = %start.run_id,
            items = schedule.items().len(),
            batches = total_batches,
            start_batch = start.start_batch,
            estimate_ms = duration_ms(
                schedule.estimate_remaining(total_batches.saturating_sub(start.start_batch), pacing)
            ),
            "ingestion run started"
        );

        for batch in schedule.batches(start.start_batch) {
            if self.stop.is_raised() {
                return Ok(RunStatus::Cancelled);
            }

            let mut in_flight = JoinSet::new();
            let mut spawned: HashMap<task::Id, WorkItem> = HashMap::new();
            let mut interrupted = false;
            for item in batch.items {
                if self.stop.is_raised() {
                    interrupted = true;
                    break;
                }
                let Some(item) = item
                    .clone()
                    .without(start.done_in_run.get(item.symbol.as_str()))
                else {
                    report.skipped += 1;
                    continue;
                };
                if !in_flight.is_empty() {
                    self.stop.pause(pacing.per_item_delay).await;
                    if self.stop.is_raised() {
                        interrupted = true;
                        break;
                    }
                }
                let fetcher = self.fetcher.clone();
                let tracked = item.clone();
                let handle = in_flight.spawn(async move { fetcher.fetch(item).await });
                spawned.insert(handle.id(), tracked);
            }

            let mut fetched = Vec::with_capacity(in_flight.len());
            let mut aborted = Vec::new();
            while let Some(joined) = in_flight.join_next_with_id().await {
                match joined {
                    Ok((id, item)) => {
                        spawned.remove(&id);
                        fetched.push(item);
                    }
                    Err(error) => {
                        tracing::error!(batch = batch.index, error = %error, "fetch task aborted");
                        if let Some(work) = spawned.remove(&error.id()) {
                            aborted.push((work, error.to_string()));
                        }
                    }
                }
            }
            fetched.sort_by(|left, right| left.symbol.cmp(&right.symbol));

            let mut outcomes = Vec::new();
            for item in &fetched {
                let persisted = self.warehouse.persist(&item.bundle);
                let item_outcomes = outcomes_for(item, &persisted);
                report.record(&item_outcomes, persisted.quality_events);
                outcomes.extend(item_outcomes);
            }
            for (work, error) in &aborted {
                let item_outcomes = aborted_outcomes(work, error);
                report.record(&item_outcomes, 0);
                outcomes.extend(item_outcomes);
            }
            self.warehouse.record_outcomes(&start.run_id, &outcomes)?;

            if fetched.iter().any(|item| item.throttled) {
                pacing.on_throttle();
            }

            let next_batch = if interrupted { batch.index } else { batch.index + 1 };
            let last_symbol = fetched.last().map(|item| item.symbol.as_str());
            self.warehouse
                .checkpoint_run(&start.run_id, next_batch, last_symbol)?;

            let remaining = total_batches.saturating_sub(next_batch);
            tracing::info!(
                batch = batch.index,
                fetched = fetched.len(),
                remaining,
                delay_ms = duration_ms(pacing.per_item_delay),
                eta_ms = duration_ms(schedule.estimate_remaining(remaining, pacing)),
                "batch complete"
            );

            if interrupted {
                return Ok(RunStatus::Cancelled);
            }
            if remaining > 0 {
                self.stop.pause(pacing.per_batch_delay).await;
            }
        }

        if self.stop.is_raised() {
            tracing::info!(run_id = %start.run_id, "stop requested after the last batch");
        }
        Ok(RunStatus::Completed)
    }
}
