//! Backlog resolver: decides which (identifier, entity kind) pairs a run fetches.

use std::collections::BTreeSet;

use serde::Serialize;

use secfeed_warehouse::{CompletedKinds, EntityKind};

use crate::catalog::Universe;
use crate::{IngestMode, Symbol};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkItem {
    pub symbol: Symbol,
    pub kinds: BTreeSet<EntityKind>,
}

impl WorkItem {
    pub fn all_kinds(symbol: Symbol) -> Self {
        Self {
            symbol,
            kinds: EntityKind::ALL.into_iter().collect(),
        }
    }

    /// Drop kinds already done; `None` when nothing is left.
    pub fn without(mut self, done: Option<&BTreeSet<EntityKind>>) -> Option<Self> {
        if let Some(done) = done {
            self.kinds.retain(|kind| !done.contains(kind));
        }
        (!self.kinds.is_empty()).then_some(self)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Backlog {
    pub to_fetch: Vec<WorkItem>,
    pub to_skip: Vec<Symbol>,
}

impl Backlog {
    pub fn planned_requests(&self) -> usize {
        self.to_fetch.iter().map(|item| item.kinds.len()).sum()
    }
}

/// Split the universe into work and skips.
///
/// Incremental: an identifier is skipped once every required kind has succeeded;
/// otherwise it is requeued with exactly the kinds that never succeeded.
/// Full: every identifier gets every kind.
pub fn resolve(universe: &Universe, completed: &CompletedKinds, mode: IngestMode) -> Backlog {
    let mut backlog = Backlog::default();
    for symbol in &universe.symbols {
        match mode {
            IngestMode::Full => backlog.to_fetch.push(WorkItem::all_kinds(symbol.clone())),
            IngestMode::Incremental => {
                let done = completed.get(symbol.as_str());
                let required_done = EntityKind::REQUIRED
                    .iter()
                    .all(|kind| done.is_some_and(|done| done.contains(kind)));
                if required_done {
                    backlog.to_skip.push(symbol.clone());
                    continue;
                }
                if let Some(item) = WorkItem::all_kinds(symbol.clone()).without(done) {
                    backlog.to_fetch.push(item);
                }
            }
        }
    }

    tracing::info!(
        mode = %mode,
        to_fetch = backlog.to_fetch.len(),
        to_skip = backlog.to_skip.len(),
        requests = backlog.planned_requests(),
        "backlog resolved"
    );
    backlog
}

#[cfg(test)]
mod tests {
    use super::*;

    fn universe(symbols: &[&str]) -> Universe {
        Universe {
            symbols: symbols
                .iter()
                .map(|symbol| Symbol::parse(symbol).expect("symbol"))
                .collect(),
            rejected: Vec::new(),
        }
    }

    #[test]
    fn incremental_skips_identifiers_with_all_required_kinds() {
        let mut completed = CompletedKinds::new();
        completed.insert(
            String::from("TCS.NS"),
            EntityKind::REQUIRED.into_iter().collect(),
        );

        let backlog = resolve(
            &universe(&["INFY.NS", "TCS.NS"]),
            &completed,
            IngestMode::Incremental,
        );

        assert_eq!(backlog.to_skip, vec![Symbol::parse("TCS.NS").expect("symbol")]);
        assert_eq!(backlog.to_fetch.len(), 1);
        assert_eq!(backlog.to_fetch[0].kinds.len(), EntityKind::ALL.len());
    }

    #[test]
    fn incremental_requeues_only_missing_kinds() {
        let mut completed = CompletedKinds::new();
        completed.insert(
            String::from("SBIN.NS"),
            BTreeSet::from([EntityKind::Profile, EntityKind::PriceHistory, EntityKind::Metrics]),
        );

        let backlog = resolve(&universe(&["SBIN.NS"]), &completed, IngestMode::Incremental);

        let kinds = &backlog.to_fetch[0].kinds;
        assert!(kinds.contains(&EntityKind::Statements));
        assert!(!kinds.contains(&EntityKind::PriceHistory));
        assert!(!kinds.contains(&EntityKind::Profile));
    }

    #[test]
    fn full_mode_fetches_everything() {
        let mut completed = CompletedKinds::new();
        completed.insert(
            String::from("TCS.NS"),
            EntityKind::ALL.into_iter().collect(),
        );

        let backlog = resolve(&universe(&["TCS.NS"]), &completed, IngestMode::Full);

        assert!(backlog.to_skip.is_empty());
        assert_eq!(backlog.planned_requests(), EntityKind::ALL.len());
    }
}
