use crate::types::{EpochNumber, RestoreWatermark, TargetEpoch, Waypoint};
use serde::Serialize;

/// Where a plan begins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum PlanStart {
    /// Empty ledger, replay from epoch 0.
    Genesis,
    /// Resume after the archive epoch the watermark is anchored to.
    Resume { after_epoch: EpochNumber },
    /// Empty ledger, start from a trusted state snapshot.
    Snapshot { waypoint: Waypoint },
}

/// Ordered, finite sequence of epochs to fetch. Iterating yields epoch numbers
/// in strictly increasing order; the plan is recomputed rather than persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestorePlan {
    start: PlanStart,
    first: EpochNumber,
    last: EpochNumber,
    cursor: EpochNumber,
    exhausted: bool,
}

impl RestorePlan {
    fn new(start: PlanStart, first: EpochNumber, last: EpochNumber) -> Self {
        Self {
            start,
            first,
            last,
            cursor: first,
            exhausted: first > last,
        }
    }

    pub fn start(&self) -> &PlanStart {
        &self.start
    }

    pub fn first_epoch(&self) -> EpochNumber {
        self.first
    }

    pub fn target_epoch(&self) -> EpochNumber {
        self.last
    }

    pub fn is_empty(&self) -> bool {
        self.first > self.last
    }

    /// Epochs not yet yielded.
    pub fn remaining(&self) -> u64 {
        if self.exhausted {
            0
        } else {
            self.last - self.cursor + 1
        }
    }

    /// Snapshot waypoint the first epoch must be verified against, if any.
    pub fn snapshot_waypoint(&self) -> Option<&Waypoint> {
        match &self.start {
            PlanStart::Snapshot { waypoint } => Some(waypoint),
            _ => None,
        }
    }
}

impl Iterator for RestorePlan {
    type Item = EpochNumber;

    fn next(&mut self) -> Option<Self::Item> {
        if self.exhausted {
            return None;
        }
        let epoch = self.cursor;
        if epoch == self.last {
            self.exhausted = true;
        } else {
            self.cursor += 1;
        }
        Some(epoch)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = usize::try_from(self.remaining()).unwrap_or(usize::MAX);
        (remaining, Some(remaining))
    }
}

/// Computes restore plans from the persisted watermark and archive metadata.
#[derive(Debug, Clone, Default)]
pub struct RestorePlanner {
    snapshot: Option<Waypoint>,
}

impl RestorePlanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Planner that prefers the configured snapshot waypoint on first run.
    pub fn with_snapshot(snapshot: Option<Waypoint>) -> Self {
        Self { snapshot }
    }

    /// Plans the epochs needed to reach `target`.
    ///
    /// `latest_available` is the archive's advertised tip and
    /// `snapshot_epochs` the snapshot epochs it exposes.
    pub fn plan(
        &self,
        current_watermark: Option<&RestoreWatermark>,
        target: TargetEpoch,
        latest_available: EpochNumber,
        snapshot_epochs: &[EpochNumber],
    ) -> RestorePlan {
        let last = target.resolve(latest_available);
        match current_watermark {
            Some(watermark) => RestorePlan::new(
                PlanStart::Resume {
                    after_epoch: watermark.archive_epoch(),
                },
                watermark.archive_epoch().saturating_add(1),
                last,
            ),
            None => match self.usable_snapshot(last, snapshot_epochs) {
                Some(waypoint) => {
                    let first = waypoint.epoch;
                    RestorePlan::new(PlanStart::Snapshot { waypoint }, first, last)
                }
                None => RestorePlan::new(PlanStart::Genesis, 0, last),
            },
        }
    }

    fn usable_snapshot(&self, last: EpochNumber, snapshot_epochs: &[EpochNumber]) -> Option<Waypoint> {
        let waypoint = self.snapshot.as_ref()?;
        if waypoint.epoch > last || !snapshot_epochs.contains(&waypoint.epoch) {
            return None;
        }
        Some(waypoint.clone())
    }
}
