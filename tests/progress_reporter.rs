use ol_bootstrap::{
    HashValue, ProgressReporter, RestoreWatermark, SyncState, ValidatorSet, LAG_EXCEEDED_REASON,
    RESTORE_IN_PROGRESS_REASON, VERIFICATION_FAILED_REASON,
};

fn watermark(epoch: u64, version: u64) -> RestoreWatermark {
    RestoreWatermark {
        restored_through_epoch: epoch,
        restored_through_version: version,
        last_verified_hash: HashValue::digest(b"tip"),
        active_validator_set: ValidatorSet::default(),
        archive_checkpoint: None,
    }
}

#[test]
fn restoring_is_never_ready() {
    let progress = ProgressReporter::new();
    progress.set_state(SyncState::Restoring);
    let snapshot = progress.snapshot();
    assert!(snapshot.reasons.contains(RESTORE_IN_PROGRESS_REASON));
    assert!(!snapshot.is_ready());

    progress.set_state(SyncState::Live);
    assert!(progress.snapshot().is_ready());
}

#[test]
fn lag_reason_follows_the_threshold() {
    let progress = ProgressReporter::new();
    progress.set_state(SyncState::Syncing);
    progress.record_watermark(&watermark(10, 109));
    progress.record_head(609, 100);
    let snapshot = progress.snapshot();
    assert_eq!(snapshot.lag, Some(500));
    assert_eq!(snapshot.known_head_version, Some(609));
    assert!(snapshot.reasons.contains(LAG_EXCEEDED_REASON));

    progress.record_head(209, 100);
    assert!(progress.snapshot().reasons.contains(LAG_EXCEEDED_REASON));
    progress.record_head(208, 100);
    assert!(!progress.snapshot().reasons.contains(LAG_EXCEEDED_REASON));
}

#[test]
fn reasons_block_readiness_until_cleared() {
    let progress = ProgressReporter::new();
    progress.set_state(SyncState::Live);
    progress.verification_failed();
    progress.add_reason("   ");
    let snapshot = progress.snapshot();
    assert_eq!(snapshot.reasons.len(), 1);
    assert!(!snapshot.is_ready());

    progress.clear_reason(VERIFICATION_FAILED_REASON);
    assert!(progress.snapshot().is_ready());
}

#[test]
fn counters_are_exported_as_metrics() {
    let progress = ProgressReporter::new();
    let shared = progress.clone();
    shared.segment_applied();
    shared.segment_applied();
    shared.delta_applied();
    shared.fetch_retried();
    shared.delta_rejected();
    shared.mirror_rotated();
    shared.peer_rotated();
    progress.record_watermark(&watermark(1, 19));
    progress.record_head(25, 100);

    let metrics = progress.metrics();
    let value = |name: &str| {
        metrics
            .iter()
            .find(|(metric, _)| *metric == name)
            .map(|(_, value)| *value)
    };
    assert_eq!(value("ol_bootstrap_segments_applied_total"), Some(2));
    assert_eq!(value("ol_bootstrap_deltas_applied_total"), Some(1));
    assert_eq!(value("ol_bootstrap_fetch_retries_total"), Some(1));
    assert_eq!(value("ol_bootstrap_deltas_rejected_total"), Some(1));
    assert_eq!(value("ol_bootstrap_mirror_rotations_total"), Some(1));
    assert_eq!(value("ol_bootstrap_peer_rotations_total"), Some(1));
    assert_eq!(value("ol_bootstrap_lag_versions"), Some(6));
}

#[test]
fn snapshot_serializes_for_status_output() {
    let progress = ProgressReporter::new();
    progress.set_state(SyncState::Syncing);
    progress.record_archive_tip(10);
    let json = serde_json::to_value(progress.snapshot()).unwrap();
    assert_eq!(json["state"], "syncing");
    assert_eq!(json["archive_latest_epoch"], 10);
    assert_eq!(json["counters"]["segments_applied"], 0);
}
