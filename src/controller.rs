//! Node bootstrap orchestration: restore from archives, catch up from peers,
//! hand off to consensus once live and supervise desync afterwards.

use crate::applier::{ApplyError, ApplyOutcome, StateApplier};
use crate::config::{ConfigError, NodeBootstrapConfig};
use crate::logging::{JournalError, JournalRotationPolicy, LogLevel, ProgressJournal};
use crate::peers::PeerSet;
use crate::planner::RestorePlanner;
use crate::prefetch::{RetryObserver, SegmentPrefetcher};
use crate::progress::{
    ProgressReporter, LAG_EXCEEDED_REASON, PEER_UNRESPONSIVE_REASON, SEGMENT_UNAVAILABLE_REASON,
    STORAGE_DEGRADED_REASON, VERIFICATION_FAILED_REASON,
};
use crate::retry::{fetch_with_retry, head_with_retry, RetryError, Sleeper, ThreadSleeper};
use crate::shutdown::ShutdownSignal;
use crate::source::{ArchiveCursor, ArchiveSource, PeerCursor, PeerSource, SourceError};
use crate::storage::{FileLedgerStore, FileWatermarkStore, LedgerStore, WatermarkStore};
use crate::test_hooks::TestHookRegistry;
use crate::tracker::{CatchUpTracker, LagObservation, SyncState, Transition};
use crate::types::{ArchiveSegment, EpochNumber, RestoreWatermark, TargetEpoch, Version, Waypoint};
use crate::verifier::{ChainAnchor, ManifestVerifier, VerificationError};
use std::io;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Consensus/execution engine that takes over once the node is live.
pub trait ExecutionHandoff: Send {
    /// Starts consensus participation from `waypoint`.
    fn begin(&mut self, waypoint: &Waypoint);

    /// Pauses participation while the node resyncs.
    fn suspend(&mut self, reason: &str);
}

/// Handoff that only logs; used when no engine is attached.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingHandoff;

impl ExecutionHandoff for LoggingHandoff {
    fn begin(&mut self, waypoint: &Waypoint) {
        info!(
            epoch = waypoint.epoch,
            version = waypoint.version,
            waypoint = %waypoint,
            "handing off to consensus"
        );
    }

    fn suspend(&mut self, reason: &str) {
        warn!(reason, "consensus participation suspended");
    }
}

/// Fatal bootstrap failure.
#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("source setup failed: {0}")]
    Source(#[from] SourceError),
    #[error("no archive mirror configured")]
    NoArchives,
    #[error("every archive mirror was rejected: {0}")]
    Verification(VerificationError),
    #[error("archive data unavailable from every mirror (epoch {epoch:?}): {last}")]
    SegmentUnavailable {
        epoch: Option<EpochNumber>,
        last: RetryError,
    },
    #[error("every peer is exhausted")]
    PeersExhausted,
    #[error(transparent)]
    Apply(#[from] ApplyError),
    #[error(transparent)]
    Journal(#[from] JournalError),
    #[error("failed to start prefetch workers: {0}")]
    Prefetch(#[source] io::Error),
}

impl BootstrapError {
    /// Process exit code for this failure class.
    pub fn exit_code(&self) -> i32 {
        match self {
            BootstrapError::Verification(VerificationError::ChainMismatch { .. }) => 2,
            BootstrapError::Verification(VerificationError::UntrustedSegment { .. }) => 3,
            BootstrapError::Verification(VerificationError::CorruptPayload { .. }) => 4,
            BootstrapError::SegmentUnavailable { .. } => 5,
            BootstrapError::Apply(ApplyError::StorageIO { .. }) | BootstrapError::Journal(_) => 6,
            BootstrapError::Apply(ApplyError::WatermarkConflict { .. }) => 7,
            BootstrapError::PeersExhausted => 8,
            BootstrapError::Config(_) | BootstrapError::Source(_) | BootstrapError::NoArchives => {
                64
            }
            BootstrapError::Apply(_) | BootstrapError::Prefetch(_) => 70,
        }
    }
}

/// Why one mirror could not finish the restore.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MirrorFailure {
    Verification(VerificationError),
    Unavailable {
        epoch: Option<EpochNumber>,
        error: RetryError,
    },
}

enum MirrorRun {
    Completed,
    Cancelled,
    Failed(MirrorFailure),
}

/// Result of a restore pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreSummary {
    pub watermark: Option<RestoreWatermark>,
    pub segments_applied: u64,
    pub mirror_failures: Vec<MirrorFailure>,
    pub cancelled: bool,
}

/// Result of one peer poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncStep {
    Polled {
        head: Version,
        applied: usize,
        state: SyncState,
    },
    /// The selected peer failed and was rotated away.
    Rotated,
    Cancelled,
}

/// How `run` ended without a fatal error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Live { waypoint: Waypoint },
    ShutDown { state: SyncState },
}

/// Initial state from the persisted watermark and the archive tip, when known.
///
/// The archive side is measured from the archive checkpoint, so history
/// caught up from peers does not hide newly published archive epochs.
pub fn initial_state(
    watermark: Option<&RestoreWatermark>,
    archive_latest: Option<EpochNumber>,
) -> SyncState {
    match (watermark, archive_latest) {
        (None, _) => SyncState::Restoring,
        (Some(watermark), Some(latest)) if watermark.archive_epoch() < latest => {
            SyncState::Restoring
        }
        (Some(_), _) => SyncState::Syncing,
    }
}

pub struct BootstrapController<L: LedgerStore, W: WatermarkStore> {
    config: NodeBootstrapConfig,
    archives: Vec<Arc<dyn ArchiveSource>>,
    active_archive: usize,
    archive_latest: Option<EpochNumber>,
    /// Watermark epoch at which the last restore pass finished.
    restore_goal: Option<EpochNumber>,
    peers: PeerSet,
    applier: StateApplier<L, W>,
    verifier: ManifestVerifier,
    planner: RestorePlanner,
    tracker: CatchUpTracker,
    progress: ProgressReporter,
    journal: Option<ProgressJournal>,
    handoff: Box<dyn ExecutionHandoff>,
    sleeper: Arc<dyn Sleeper>,
    shutdown: ShutdownSignal,
    hooks: TestHookRegistry,
}

impl BootstrapController<FileLedgerStore, FileWatermarkStore> {
    /// Wires file-backed stores, the journal and the configured sources.
    pub fn from_config(
        config: NodeBootstrapConfig,
        shutdown: ShutdownSignal,
    ) -> Result<Self, BootstrapError> {
        config.validate()?;
        let ledger = FileLedgerStore::open(&config.data_dir)
            .map_err(|source| ApplyError::StorageIO { attempts: 1, source })?;
        let applier = StateApplier::open_with(
            ledger,
            FileWatermarkStore::new(&config.data_dir),
            config.storage_retry.clone(),
            Arc::new(ThreadSleeper),
            TestHookRegistry::new(),
        )?;
        let journal = ProgressJournal::open(&config.data_dir, JournalRotationPolicy::default())?;
        let archives = config.connect_archives()?;
        let peers = config.connect_peers()?;
        Ok(Self::new(config, archives, peers, applier, shutdown).with_journal(journal))
    }
}

impl<L: LedgerStore, W: WatermarkStore> BootstrapController<L, W> {
    pub fn new(
        config: NodeBootstrapConfig,
        archives: Vec<Arc<dyn ArchiveSource>>,
        peers: Vec<Arc<dyn PeerSource>>,
        applier: StateApplier<L, W>,
        shutdown: ShutdownSignal,
    ) -> Self {
        let progress = ProgressReporter::new();
        if let Some(watermark) = applier.watermark() {
            progress.record_watermark(watermark);
        }
        let tracker = CatchUpTracker::new(SyncState::Restoring, config.tracker());
        let planner = RestorePlanner::with_snapshot(config.snapshot.clone());
        Self {
            config,
            archives,
            active_archive: 0,
            archive_latest: None,
            restore_goal: None,
            peers: PeerSet::new(peers),
            applier,
            verifier: ManifestVerifier::new(),
            planner,
            tracker,
            progress,
            journal: None,
            handoff: Box::new(LoggingHandoff),
            sleeper: Arc::new(ThreadSleeper),
            shutdown,
            hooks: TestHookRegistry::new(),
        }
    }

    pub fn with_journal(mut self, journal: ProgressJournal) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn with_handoff(mut self, handoff: Box<dyn ExecutionHandoff>) -> Self {
        self.handoff = handoff;
        self
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn with_hooks(mut self, hooks: TestHookRegistry) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn progress(&self) -> ProgressReporter {
        self.progress.clone()
    }

    pub fn watermark(&self) -> Option<&RestoreWatermark> {
        self.applier.watermark()
    }

    pub fn state(&self) -> SyncState {
        self.tracker.state()
    }

    /// Index of the archive mirror currently preferred.
    pub fn active_archive(&self) -> usize {
        self.active_archive
    }

    /// Reads the archive tip (first mirror that answers) and picks the starting state.
    pub fn decide_initial_state(&mut self) -> SyncState {
        let latest = self
            .archives
            .iter()
            .find_map(|archive| match archive.latest_available_epoch() {
                Ok(latest) => Some(latest),
                Err(err) => {
                    debug!(archive = archive.name(), error = %err, "archive tip unavailable");
                    None
                }
            });
        if let Some(latest) = latest {
            self.archive_latest = Some(latest);
            self.progress.record_archive_tip(latest);
        }
        let state = initial_state(self.applier.watermark(), latest);
        info!(
            state = %state,
            restored_through_epoch = ?self.applier.watermark().map(|wm| wm.restored_through_epoch),
            archive_latest = ?latest,
            "initial bootstrap state"
        );
        state
    }

    /// Restores from the archives up to `target`, rotating across mirrors.
    pub fn run_restore(&mut self, target: TargetEpoch) -> Result<RestoreSummary, BootstrapError> {
        let result = self.restore_all(target);
        if let Err(err) = &result {
            self.record_fatal(err);
        }
        result
    }

    /// Bootstraps and supervises until shutdown.
    pub fn run(&mut self) -> Result<RunOutcome, BootstrapError> {
        let result = self.drive(false);
        if let Err(err) = &result {
            self.record_fatal(err);
        }
        result
    }

    /// Bootstraps and returns as soon as the node is live.
    pub fn run_until_live(&mut self) -> Result<RunOutcome, BootstrapError> {
        let result = self.drive(true);
        if let Err(err) = &result {
            self.record_fatal(err);
        }
        result
    }

    fn drive(&mut self, stop_when_live: bool) -> Result<RunOutcome, BootstrapError> {
        let initial = self.decide_initial_state();
        self.tracker = CatchUpTracker::new(initial, self.config.tracker());
        self.progress.set_state(initial);
        self.journal(LogLevel::Info, None, None, &format!("starting in {initial}"));

        if initial == SyncState::Restoring {
            let summary = self.restore_all(TargetEpoch::Latest)?;
            if summary.cancelled {
                return Ok(RunOutcome::ShutDown {
                    state: self.tracker.state(),
                });
            }
        }

        loop {
            if self.shutdown.is_requested() {
                info!(state = %self.tracker.state(), "shutdown requested");
                return Ok(RunOutcome::ShutDown {
                    state: self.tracker.state(),
                });
            }
            match self.sync_once()? {
                SyncStep::Cancelled => {
                    return Ok(RunOutcome::ShutDown {
                        state: self.tracker.state(),
                    })
                }
                SyncStep::Polled {
                    state: SyncState::Live,
                    ..
                } if stop_when_live => {
                    if let Some(watermark) = self.applier.watermark() {
                        return Ok(RunOutcome::Live {
                            waypoint: watermark.waypoint(),
                        });
                    }
                }
                SyncStep::Polled { applied, .. } if applied > 0 => continue,
                _ => {}
            }
            self.sleeper.sleep(self.config.poll_interval());
        }
    }

    fn restore_all(&mut self, target: TargetEpoch) -> Result<RestoreSummary, BootstrapError> {
        if self.archives.is_empty() {
            return Err(BootstrapError::NoArchives);
        }
        self.progress.set_state(SyncState::Restoring);
        let mut summary = RestoreSummary {
            watermark: None,
            segments_applied: 0,
            mirror_failures: Vec::new(),
            cancelled: false,
        };
        let start = self.active_archive;
        let mirrors = self.archives.len();
        for offset in 0..mirrors {
            let index = (start + offset) % mirrors;
            if offset > 0 {
                self.progress.mirror_rotated();
                info!(
                    archive = self.archives[index].name(),
                    "rotating to next archive mirror"
                );
            }
            self.active_archive = index;
            match self.restore_from(index, target, &mut summary.segments_applied)? {
                MirrorRun::Completed => {
                    self.progress.clear_reason(VERIFICATION_FAILED_REASON);
                    self.progress.clear_reason(SEGMENT_UNAVAILABLE_REASON);
                    summary.watermark = self.applier.watermark().cloned();
                    self.restore_goal = Some(
                        summary
                            .watermark
                            .as_ref()
                            .map_or(0, |wm| wm.restored_through_epoch),
                    );
                    info!(
                        segments_applied = summary.segments_applied,
                        restored_through_epoch = ?summary.watermark.as_ref().map(|wm| wm.restored_through_epoch),
                        "restore complete"
                    );
                    self.journal(
                        LogLevel::Info,
                        summary.watermark.as_ref().map(|wm| wm.restored_through_epoch),
                        summary.watermark.as_ref().map(|wm| wm.restored_through_version),
                        "restore complete",
                    );
                    return Ok(summary);
                }
                MirrorRun::Cancelled => {
                    summary.watermark = self.applier.watermark().cloned();
                    summary.cancelled = true;
                    return Ok(summary);
                }
                MirrorRun::Failed(failure) => {
                    let archive = self.archives[index].name().to_string();
                    warn!(archive, failure = ?failure, "archive mirror failed");
                    self.journal(
                        LogLevel::Warn,
                        failure_epoch(&failure),
                        None,
                        &format!("mirror {archive} failed: {failure:?}"),
                    );
                    summary.mirror_failures.push(failure);
                }
            }
        }
        Err(fatal_from(summary.mirror_failures))
    }

    fn restore_from(
        &mut self,
        index: usize,
        target: TargetEpoch,
        applied: &mut u64,
    ) -> Result<MirrorRun, BootstrapError> {
        let archive = Arc::clone(&self.archives[index]);
        let cursor = ArchiveCursor::new(archive.as_ref());
        let latest = match head_with_retry(
            &cursor,
            &self.config.retry,
            self.sleeper.as_ref(),
            &self.shutdown,
        ) {
            Ok(latest) => latest,
            Err(RetryError::Cancelled) => return Ok(MirrorRun::Cancelled),
            Err(error) => {
                return Ok(MirrorRun::Failed(MirrorFailure::Unavailable { epoch: None, error }))
            }
        };
        self.archive_latest = Some(latest);
        self.progress.record_archive_tip(latest);
        let snapshot_epochs = archive.snapshot_epochs().unwrap_or_else(|err| {
            warn!(archive = archive.name(), error = %err, "snapshot listing unavailable");
            Vec::new()
        });

        let plan = self
            .planner
            .plan(self.applier.watermark(), target, latest, &snapshot_epochs);
        info!(
            archive = archive.name(),
            start = ?plan.start(),
            first_epoch = plan.first_epoch(),
            target_epoch = plan.target_epoch(),
            remaining = plan.remaining(),
            "restore plan"
        );
        if plan.is_empty() {
            return Ok(MirrorRun::Completed);
        }
        let snapshot = plan.snapshot_waypoint().cloned();

        let progress = self.progress.clone();
        let on_retry: RetryObserver = Arc::new(move |epoch, attempt, err| {
            progress.fetch_retried();
            progress.add_reason(SEGMENT_UNAVAILABLE_REASON);
            debug!(epoch, attempt, error = %err, "segment fetch retry");
        });
        let mut prefetcher = SegmentPrefetcher::spawn(
            Arc::clone(&archive),
            plan.first_epoch(),
            plan.target_epoch(),
            &self.config.prefetch,
            self.config.retry.clone(),
            Arc::clone(&self.sleeper),
            self.shutdown.clone(),
            on_retry,
        )
        .map_err(BootstrapError::Prefetch)?;

        while let Some((epoch, outcome)) = prefetcher.next() {
            if self.shutdown.is_requested() {
                return Ok(MirrorRun::Cancelled);
            }
            let mut segment = match outcome {
                Ok(segment) => segment,
                Err(RetryError::Cancelled) => return Ok(MirrorRun::Cancelled),
                Err(RetryError::Permanent(SourceError::Malformed { reason, .. })) => {
                    let err = VerificationError::CorruptPayload {
                        epoch,
                        reason: format!("segment does not decode: {reason}"),
                    };
                    self.progress.verification_failed();
                    warn!(epoch, kind = err.kind(), error = %err, "segment rejected");
                    return Ok(MirrorRun::Failed(MirrorFailure::Verification(err)));
                }
                Err(error) => {
                    return Ok(MirrorRun::Failed(MirrorFailure::Unavailable {
                        epoch: Some(epoch),
                        error,
                    }))
                }
            };
            self.progress.clear_reason(SEGMENT_UNAVAILABLE_REASON);
            if self.hooks.corrupt_segment(epoch) {
                corrupt_payload(&mut segment);
            }

            let verified = match (&snapshot, self.applier.watermark()) {
                (Some(waypoint), None) => self.verifier.verify_snapshot(segment, waypoint),
                (_, Some(watermark)) => {
                    self.verifier
                        .verify(segment, &ChainAnchor::from_watermark(watermark))
                }
                (None, None) => self.verifier.verify(
                    segment,
                    &ChainAnchor::genesis(self.config.genesis_validator_set_digest),
                ),
            };
            let verified = match verified {
                Ok(verified) => verified,
                Err(err) => {
                    self.progress.verification_failed();
                    warn!(epoch, kind = err.kind(), error = %err, "segment rejected");
                    return Ok(MirrorRun::Failed(MirrorFailure::Verification(err)));
                }
            };

            match self.applier.apply(&verified)? {
                ApplyOutcome::Applied(watermark) => {
                    self.progress.record_watermark(&watermark);
                    self.progress.segment_applied();
                    *applied += 1;
                }
                ApplyOutcome::Anchored(watermark) => {
                    self.progress.record_watermark(&watermark);
                }
                ApplyOutcome::Overlapping(watermark) => {
                    info!(
                        epoch,
                        restored_through_version = watermark.restored_through_version,
                        "archive epoch overlaps peer-applied versions, continuing from peers"
                    );
                    self.journal(
                        LogLevel::Info,
                        Some(epoch),
                        Some(watermark.restored_through_version),
                        "archive restore stopped at peer-applied versions",
                    );
                    return Ok(MirrorRun::Completed);
                }
                ApplyOutcome::AlreadyApplied(_) => {}
            }
        }
        if self.shutdown.is_requested() {
            return Ok(MirrorRun::Cancelled);
        }
        Ok(MirrorRun::Completed)
    }

    /// One catch-up poll: read the peer head, pull and apply deltas, update the tracker.
    pub fn sync_once(&mut self) -> Result<SyncStep, BootstrapError> {
        let (index, peer) = self.peers.select().ok_or(BootstrapError::PeersExhausted)?;
        let cursor = PeerCursor::new(peer.as_ref(), self.config.delta_batch_limit);
        let head = match head_with_retry(
            &cursor,
            &self.config.retry,
            self.sleeper.as_ref(),
            &self.shutdown,
        ) {
            Ok(head) => head,
            Err(RetryError::Cancelled) => return Ok(SyncStep::Cancelled),
            Err(err) => {
                self.peer_unresponsive(index, peer.name(), &err);
                return Ok(SyncStep::Rotated);
            }
        };
        self.peers.record_responsive(index);
        self.progress.clear_reason(PEER_UNRESPONSIVE_REASON);
        self.progress.record_head(head, self.config.lag_threshold);
        self.observe(head);

        let pending_from = self
            .applier
            .watermark()
            .filter(|watermark| head > watermark.restored_through_version)
            .map(RestoreWatermark::next_version);
        let mut applied = 0;
        if let Some(from) = pending_from {
            let mut deltas = match fetch_with_retry(
                &cursor,
                from,
                &self.config.retry,
                self.sleeper.as_ref(),
                &self.shutdown,
            ) {
                Ok(deltas) => deltas,
                Err(RetryError::Cancelled) => return Ok(SyncStep::Cancelled),
                Err(err) => {
                    self.peer_unresponsive(index, peer.name(), &err);
                    return Ok(SyncStep::Rotated);
                }
            };
            deltas.sort_by_key(|delta| delta.first_version);
            let mut rejected = false;
            for delta in &deltas {
                if self.shutdown.is_requested() {
                    break;
                }
                match self.applier.apply_delta(delta) {
                    Ok(ApplyOutcome::Applied(watermark)) => {
                        self.progress.record_watermark(&watermark);
                        self.progress.delta_applied();
                        applied += 1;
                    }
                    Ok(ApplyOutcome::AlreadyApplied(_)) => {}
                    Ok(ApplyOutcome::Anchored(_) | ApplyOutcome::Overlapping(_)) => {
                        unreachable!("apply_delta never yields segment-only outcomes")
                    }
                    Err(ApplyError::InvalidDelta(err)) => {
                        warn!(
                            peer = peer.name(),
                            first_version = delta.first_version,
                            error = %err,
                            "rejected delta"
                        );
                        self.progress.delta_rejected();
                        self.progress.peer_rotated();
                        self.peers.record_invalid(index);
                        self.journal(
                            LogLevel::Warn,
                            Some(delta.consensus_proof.epoch),
                            Some(delta.first_version),
                            &format!("delta from {} rejected: {err}", peer.name()),
                        );
                        rejected = true;
                        break;
                    }
                    Err(err) => return Err(err.into()),
                }
            }
            if !rejected && applied > 0 {
                self.peers.record_success(index);
            }
            self.progress.record_head(head, self.config.lag_threshold);
            self.observe(head);
        }
        Ok(SyncStep::Polled {
            head,
            applied,
            state: self.tracker.state(),
        })
    }

    fn observe(&mut self, head: Version) {
        let observation = LagObservation::new(
            self.applier.watermark(),
            self.restore_goal.or(self.archive_latest).unwrap_or_default(),
            head,
        );
        if let Some(transition) = self.tracker.observe(&observation) {
            self.on_transition(transition);
        }
    }

    fn on_transition(&mut self, transition: Transition) {
        info!(
            from = %transition.from,
            to = %transition.to,
            lag = transition.lag,
            "bootstrap state transition"
        );
        self.progress.set_state(transition.to);
        let watermark = self.applier.watermark().cloned();
        self.journal(
            LogLevel::Info,
            watermark.as_ref().map(|wm| wm.restored_through_epoch),
            watermark.as_ref().map(|wm| wm.restored_through_version),
            &format!(
                "{} -> {} (lag {})",
                transition.from, transition.to, transition.lag
            ),
        );
        match (transition.from, transition.to) {
            (_, SyncState::Live) => {
                if let Some(watermark) = watermark {
                    let waypoint = watermark.waypoint();
                    self.progress.record_waypoint(waypoint.clone());
                    self.handoff.begin(&waypoint);
                }
            }
            (SyncState::Live, SyncState::Syncing) => self.handoff.suspend(LAG_EXCEEDED_REASON),
            _ => {}
        }
    }

    fn peer_unresponsive(&mut self, index: usize, peer: &str, err: &RetryError) {
        warn!(peer, attempts = err.attempts(), error = %err, "peer unresponsive");
        self.peers.record_unresponsive(index);
        self.progress.add_reason(PEER_UNRESPONSIVE_REASON);
        self.progress.peer_rotated();
        self.journal(
            LogLevel::Warn,
            None,
            None,
            &format!("peer {peer} unresponsive: {err}"),
        );
    }

    fn record_fatal(&mut self, err: &BootstrapError) {
        error!(error = %err, exit_code = err.exit_code(), "bootstrap failed");
        if matches!(err, BootstrapError::Apply(ApplyError::StorageIO { .. })) {
            self.progress.add_reason(STORAGE_DEGRADED_REASON);
        }
        let watermark = self.applier.watermark().cloned();
        self.journal(
            LogLevel::Error,
            watermark.as_ref().map(|wm| wm.restored_through_epoch),
            watermark.as_ref().map(|wm| wm.restored_through_version),
            &format!("fatal: {err}"),
        );
    }

    fn journal(
        &mut self,
        level: LogLevel,
        epoch: Option<EpochNumber>,
        version: Option<Version>,
        message: &str,
    ) {
        if let Some(journal) = self.journal.as_mut() {
            if let Err(err) = journal.record(level, "controller", epoch, version, message) {
                warn!(error = %err, "failed to append to bootstrap journal");
            }
        }
    }
}

fn failure_epoch(failure: &MirrorFailure) -> Option<EpochNumber> {
    match failure {
        MirrorFailure::Verification(err) => Some(err.epoch()),
        MirrorFailure::Unavailable { epoch, .. } => *epoch,
    }
}

/// Chain mismatches dominate; otherwise the first verification error, else unavailability.
fn fatal_from(failures: Vec<MirrorFailure>) -> BootstrapError {
    let mut verification: Option<VerificationError> = None;
    let mut unavailable: Option<(Option<EpochNumber>, RetryError)> = None;
    for failure in failures {
        match failure {
            MirrorFailure::Verification(err @ VerificationError::ChainMismatch { .. }) => {
                return BootstrapError::Verification(err)
            }
            MirrorFailure::Verification(err) => {
                verification.get_or_insert(err);
            }
            MirrorFailure::Unavailable { epoch, error } => {
                unavailable.get_or_insert((epoch, error));
            }
        }
    }
    match (verification, unavailable) {
        (Some(err), _) => BootstrapError::Verification(err),
        (None, Some((epoch, last))) => BootstrapError::SegmentUnavailable { epoch, last },
        (None, None) => BootstrapError::NoArchives,
    }
}

fn corrupt_payload(segment: &mut ArchiveSegment) {
    match segment.payload.first_mut() {
        Some(byte) => *byte ^= 0xff,
        None => segment.payload.push(0xff),
    }
}
