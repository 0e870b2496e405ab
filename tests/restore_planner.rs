use ol_bootstrap::{
    ArchiveCheckpoint, HashValue, PlanStart, RestorePlanner, RestoreWatermark, TargetEpoch,
    ValidatorSet, Waypoint,
};

fn watermark(epoch: u64) -> RestoreWatermark {
    RestoreWatermark {
        restored_through_epoch: epoch,
        restored_through_version: (epoch + 1) * 10 - 1,
        last_verified_hash: HashValue::digest(&epoch.to_be_bytes()),
        active_validator_set: ValidatorSet::default(),
        archive_checkpoint: None,
    }
}

fn waypoint(epoch: u64) -> Waypoint {
    Waypoint {
        epoch,
        version: (epoch + 1) * 10 - 1,
        segment_hash: HashValue::digest(b"snapshot"),
        validator_set_digest: HashValue::digest(b"validators"),
    }
}

#[test]
fn empty_ledger_plans_from_genesis() {
    let plan = RestorePlanner::new().plan(None, TargetEpoch::Latest, 10, &[]);
    assert_eq!(plan.start(), &PlanStart::Genesis);
    assert_eq!(plan.remaining(), 11);
    assert_eq!(plan.collect::<Vec<_>>(), (0..=10).collect::<Vec<_>>());
}

#[test]
fn resumes_after_the_watermark_and_is_idempotent() {
    let planner = RestorePlanner::new();
    let current = watermark(4);
    let first = planner.plan(Some(&current), TargetEpoch::Latest, 10, &[]);
    let again = planner.plan(Some(&current), TargetEpoch::Latest, 10, &[]);
    assert_eq!(first.start(), &PlanStart::Resume { after_epoch: 4 });
    assert_eq!(first.size_hint(), (6, Some(6)));
    assert_eq!(first.clone().collect::<Vec<_>>(), vec![5, 6, 7, 8, 9, 10]);
    assert_eq!(first, again);
}

#[test]
fn resumes_after_the_archive_checkpoint_when_deltas_closed_an_epoch() {
    let mut current = watermark(5);
    current.archive_checkpoint = Some(ArchiveCheckpoint {
        epoch: 4,
        last_version: 49,
        content_hash: HashValue::digest(b"epoch-4"),
        next_validator_set_digest: HashValue::digest(b"validators"),
    });
    let plan = RestorePlanner::new().plan(Some(&current), TargetEpoch::Latest, 7, &[]);
    assert_eq!(plan.start(), &PlanStart::Resume { after_epoch: 4 });
    assert_eq!(plan.collect::<Vec<_>>(), vec![5, 6, 7]);
}

#[test]
fn explicit_targets_are_clamped_to_the_archive_tip() {
    let planner = RestorePlanner::new();
    let plan = planner.plan(None, TargetEpoch::Epoch(3), 10, &[]);
    assert_eq!(plan.target_epoch(), 3);
    assert_eq!(plan.count(), 4);

    let plan = planner.plan(None, TargetEpoch::Epoch(42), 10, &[]);
    assert_eq!(plan.target_epoch(), 10);
}

#[test]
fn up_to_date_watermark_yields_an_empty_plan() {
    let plan = RestorePlanner::new().plan(Some(&watermark(10)), TargetEpoch::Latest, 10, &[]);
    assert!(plan.is_empty());
    assert_eq!(plan.remaining(), 0);
    assert_eq!(plan.count(), 0);

    let plan = RestorePlanner::new().plan(Some(&watermark(8)), TargetEpoch::Epoch(5), 10, &[]);
    assert!(plan.is_empty());
}

#[test]
fn snapshot_waypoint_is_used_only_on_an_empty_ledger() {
    let planner = RestorePlanner::with_snapshot(Some(waypoint(6)));

    let plan = planner.plan(None, TargetEpoch::Latest, 10, &[2, 6]);
    assert_eq!(plan.first_epoch(), 6);
    assert_eq!(plan.snapshot_waypoint(), Some(&waypoint(6)));
    assert_eq!(plan.collect::<Vec<_>>(), vec![6, 7, 8, 9, 10]);

    let plan = planner.plan(Some(&watermark(7)), TargetEpoch::Latest, 10, &[6]);
    assert_eq!(plan.start(), &PlanStart::Resume { after_epoch: 7 });
    assert!(plan.snapshot_waypoint().is_none());
}

#[test]
fn unpublished_or_out_of_range_snapshots_fall_back_to_genesis() {
    let planner = RestorePlanner::with_snapshot(Some(waypoint(6)));
    let plan = planner.plan(None, TargetEpoch::Latest, 10, &[2]);
    assert_eq!(plan.start(), &PlanStart::Genesis);

    let plan = planner.plan(None, TargetEpoch::Epoch(4), 10, &[6]);
    assert_eq!(plan.start(), &PlanStart::Genesis);
    assert_eq!(plan.target_epoch(), 4);
}
