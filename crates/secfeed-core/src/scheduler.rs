//! Batch scheduling and pacing.

use std::time::Duration;

use serde::Serialize;

use crate::backlog::WorkItem;

const THROTTLE_FLOOR: Duration = Duration::from_millis(250);
const THROTTLE_CEILING: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch<'a> {
    pub index: usize,
    pub items: &'a [WorkItem],
}

/// Fixed partition of the work list into batches of `batch_size`.
#[derive(Debug, Clone)]
pub struct Schedule {
    items: Vec<WorkItem>,
    batch_size: usize,
}

impl Schedule {
    pub fn new(items: Vec<WorkItem>, batch_size: usize) -> Self {
        Self {
            items,
            batch_size: batch_size.max(1),
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn items(&self) -> &[WorkItem] {
        &self.items
    }

    pub fn batch_count(&self) -> usize {
        self.items.len().div_ceil(self.batch_size)
    }

    /// Lazily yield batches starting at `start`; a start past the end yields nothing.
    pub fn batches(&self, start: usize) -> impl Iterator<Item = Batch<'_>> + '_ {
        self.items
            .chunks(self.batch_size)
            .enumerate()
            .skip(start)
            .map(|(index, items)| Batch { index, items })
    }

    /// Wall-clock estimate for `remaining` batches under `pacing`.
    pub fn estimate_remaining(&self, remaining: usize, pacing: &Pacing) -> Duration {
        let per_batch = pacing
            .per_item_delay
            .saturating_mul(u32::try_from(self.batch_size).unwrap_or(u32::MAX))
            .saturating_add(pacing.per_batch_delay);
        per_batch.saturating_mul(u32::try_from(remaining).unwrap_or(u32::MAX))
    }

    /// Estimate for the whole schedule.
    pub fn estimate(&self, pacing: &Pacing) -> Duration {
        self.estimate_remaining(self.batch_count(), pacing)
    }
}

/// Delays owned by the batch loop. Throttle signals only ever slow it down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Pacing {
    #[serde(with = "millis")]
    pub per_item_delay: Duration,
    #[serde(with = "millis")]
    pub per_batch_delay: Duration,
    pub adjustments: u32,
}

impl Pacing {
    pub fn new(per_item_delay: Duration, per_batch_delay: Duration) -> Self {
        Self {
            per_item_delay,
            per_batch_delay,
            adjustments: 0,
        }
    }

    /// Double the per-item delay for the rest of the run.
    pub fn on_throttle(&mut self) -> Duration {
        let doubled = if self.per_item_delay.is_zero() {
            THROTTLE_FLOOR
        } else {
            self.per_item_delay.saturating_mul(2).max(THROTTLE_FLOOR)
        };
        let previous = self.per_item_delay;
        self.per_item_delay = doubled.min(THROTTLE_CEILING);
        self.adjustments += 1;
        tracing::warn!(
            previous_ms = duration_ms(previous),
            delay_ms = duration_ms(self.per_item_delay),
            "provider throttled; slowing down"
        );
        self.per_item_delay
    }
}

pub(crate) fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

mod millis {
    use std::time::Duration;

    use serde::Serializer;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(super::duration_ms(*value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Symbol;

    fn items(count: usize) -> Vec<WorkItem> {
        (0..count)
            .map(|index| {
                WorkItem::all_kinds(Symbol::parse(&format!("S{index}.NS")).expect("symbol"))
            })
            .collect()
    }

    #[test]
    fn partitions_into_fixed_size_batches() {
        let schedule = Schedule::new(items(5), 2);

        let sizes: Vec<usize> = schedule.batches(0).map(|batch| batch.items.len()).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
        assert_eq!(schedule.batch_count(), 3);
    }

    #[test]
    fn restarts_from_a_checkpoint_index() {
        let schedule = Schedule::new(items(5), 2);

        let indices: Vec<usize> = schedule.batches(1).map(|batch| batch.index).collect();
        assert_eq!(indices, vec![1, 2]);
        assert_eq!(schedule.batches(3).count(), 0);
    }

    #[test]
    fn estimate_multiplies_batches_by_per_batch_cost() {
        let schedule = Schedule::new(items(4), 2);
        let pacing = Pacing::new(Duration::from_millis(300), Duration::from_secs(2));

        assert_eq!(schedule.estimate(&pacing), Duration::from_millis(2 * (2 * 300 + 2_000)));
    }

    #[test]
    fn throttle_doubles_with_floor_and_ceiling() {
        let mut pacing = Pacing::new(Duration::ZERO, Duration::ZERO);
        assert_eq!(pacing.on_throttle(), Duration::from_millis(250));
        assert_eq!(pacing.on_throttle(), Duration::from_millis(500));

        let mut slow = Pacing::new(Duration::from_secs(200), Duration::ZERO);
        assert_eq!(slow.on_throttle(), Duration::from_secs(300));
        assert_eq!(slow.adjustments, 1);
    }
}
