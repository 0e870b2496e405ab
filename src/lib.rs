//! Restore-and-catch-up bootstrap for 0L full nodes: verified archive restore,
//! peer catch-up and handoff to consensus.

pub mod app;
pub mod applier;
pub mod config;
pub mod controller;
pub mod crypto;
pub mod export;
pub mod logging;
pub mod peers;
pub mod planner;
pub mod prefetch;
pub mod progress;
pub mod reorder;
pub mod retry;
pub mod shutdown;
pub mod source;
pub mod storage;
pub mod test_hooks;
pub mod tracker;
pub mod types;
pub mod verifier;

pub use applier::{
    validate_delta, ApplyError, ApplyOutcome, ConsensusValidationError, StateApplier,
};
pub use config::{ArchiveEndpoint, ConfigError, NodeBootstrapConfig};
pub use controller::{
    initial_state, BootstrapController, BootstrapError, ExecutionHandoff, LoggingHandoff,
    MirrorFailure, RestoreSummary, RunOutcome, SyncStep,
};
pub use crypto::{certify, validator_set_of, verify_quorum, QuorumError, ValidatorSigner};
pub use export::SegmentExporter;
pub use logging::{
    init_tracing, JournalError, JournalRecord, JournalRotationPolicy, LogLevel, ProgressJournal,
    JOURNAL_FILE,
};
pub use peers::{PeerSet, DEFAULT_MAX_STRIKES, DEFAULT_READMISSION_ROUNDS};
pub use planner::{PlanStart, RestorePlan, RestorePlanner};
pub use prefetch::{
    FetchOutcome, PrefetchConfig, PrefetchMetrics, RetryObserver, SegmentPrefetcher,
};
pub use progress::{
    ProgressCounters, ProgressReporter, ProgressSnapshot, LAG_EXCEEDED_REASON,
    PEER_UNRESPONSIVE_REASON, RESTORE_IN_PROGRESS_REASON, SEGMENT_UNAVAILABLE_REASON,
    STORAGE_DEGRADED_REASON, VERIFICATION_FAILED_REASON,
};
pub use reorder::ReorderBuffer;
pub use retry::{
    fetch_with_retry, head_with_retry, retry_with_backoff, RetryError, RetryPolicy, Sleeper,
    ThreadSleeper,
};
pub use shutdown::ShutdownSignal;
pub use source::{
    ArchiveCursor, ArchiveManifest, ArchiveSource, DataSource, DirectoryArchive, HttpArchive,
    HttpPeer, PeerCursor, PeerSource, SourceError, ARCHIVE_MANIFEST_FILE,
};
pub use storage::{
    FileLedgerStore, FileWatermarkStore, LedgerStore, RecoveryReport, StageTicket, StagedKind,
    StagedMeta, StagedUnit, StorageError, WatermarkStore, WATERMARK_KEY,
};
pub use test_hooks::{CrashPoint, TestHook, TestHookRegistry};
pub use tracker::{
    next_state, CatchUpTracker, LagObservation, SyncState, TrackerConfig, TrackerPosition,
    Transition,
};
pub use types::{
    ArchiveCheckpoint, ArchiveSegment, ConsensusProof, Epoch, EpochNumber, HashParseError,
    HashValue, LedgerDelta, QuorumCertificate, RestoreWatermark, TargetEpoch, ValidatorInfo,
    ValidatorSet, ValidatorSignature, Version, Waypoint,
};
pub use verifier::{ChainAnchor, ManifestVerifier, VerificationError, VerifiedSegment};
