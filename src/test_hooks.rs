use crate::types::EpochNumber;

/// Deterministic fault injected into the apply pipeline during tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TestHook {
    /// Abort after staging the unit for `epoch`, before the watermark moves.
    CrashAfterStage { epoch: EpochNumber },
    /// Abort after the watermark for `epoch` is committed, before staging is promoted.
    CrashAfterWatermarkCommit { epoch: EpochNumber },
    /// Flip a payload byte of the segment fetched for `epoch`.
    CorruptFetchedSegment { epoch: EpochNumber },
}

/// Where in the staged commit a crash hook fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrashPoint {
    AfterStage,
    AfterWatermarkCommit,
}

impl CrashPoint {
    pub fn as_str(self) -> &'static str {
        match self {
            CrashPoint::AfterStage => "after_stage",
            CrashPoint::AfterWatermarkCommit => "after_watermark_commit",
        }
    }
}

/// Registry of active hooks shared by integration tests.
#[derive(Debug, Default, Clone)]
pub struct TestHookRegistry {
    hooks: Vec<TestHook>,
}

impl TestHookRegistry {
    pub fn new() -> Self {
        Self { hooks: Vec::new() }
    }

    pub fn register(&mut self, hook: TestHook) {
        self.hooks.push(hook);
    }

    /// Removes every hook, as a restarted process would start without them.
    pub fn clear(&mut self) {
        self.hooks.clear();
    }

    pub fn hooks(&self) -> &[TestHook] {
        &self.hooks
    }

    /// True when a crash is armed at `point` for `epoch`.
    pub fn crash_at(&self, point: CrashPoint, epoch: EpochNumber) -> bool {
        self.hooks.iter().any(|hook| match (hook, point) {
            (TestHook::CrashAfterStage { epoch: target }, CrashPoint::AfterStage) => {
                *target == epoch
            }
            (
                TestHook::CrashAfterWatermarkCommit { epoch: target },
                CrashPoint::AfterWatermarkCommit,
            ) => *target == epoch,
            _ => false,
        })
    }

    /// True when the fetched segment for `epoch` should be corrupted.
    pub fn corrupt_segment(&self, epoch: EpochNumber) -> bool {
        self.hooks.iter().any(|hook| {
            matches!(hook, TestHook::CorruptFetchedSegment { epoch: target } if *target == epoch)
        })
    }
}
