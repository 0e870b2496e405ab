use std::fs;

use ol_bootstrap::{
    FileLedgerStore, FileWatermarkStore, HashValue, LedgerStore, RestoreWatermark, StagedKind,
    StagedUnit, StorageError, ValidatorInfo, ValidatorSet, WatermarkStore, WATERMARK_KEY,
};
use tempfile::TempDir;

fn watermark(epoch: u64, version: u64) -> RestoreWatermark {
    RestoreWatermark {
        restored_through_epoch: epoch,
        restored_through_version: version,
        last_verified_hash: HashValue::digest(&version.to_be_bytes()),
        active_validator_set: ValidatorSet::new(vec![ValidatorInfo::new("val-0", "00ff", 10)]),
        archive_checkpoint: None,
    }
}

fn unit(epoch: u64, first: u64, last: u64) -> StagedUnit {
    StagedUnit {
        kind: StagedKind::Segment,
        epoch,
        first_version: first,
        last_version: last,
        hash: HashValue::digest(&first.to_be_bytes()),
        payload: format!("payload-{epoch}").into_bytes(),
    }
}

#[test]
fn missing_record_loads_as_empty() {
    let dir = TempDir::new().unwrap();
    let store = FileWatermarkStore::new(dir.path());
    assert_eq!(store.load().expect("load"), None);
    assert!(store.path().ends_with(format!("{WATERMARK_KEY}.json")));
}

#[test]
fn compare_and_swap_advances_and_detects_stale_writers() {
    let dir = TempDir::new().unwrap();
    let mut store = FileWatermarkStore::new(dir.path());
    let first = watermark(0, 9);
    let second = watermark(1, 19);

    store.compare_and_swap(None, &first).expect("initial swap");
    store
        .compare_and_swap(Some(&first), &second)
        .expect("second swap");
    assert_eq!(store.load().unwrap(), Some(second.clone()));

    let err = store
        .compare_and_swap(Some(&first), &watermark(2, 29))
        .expect_err("stale expectation");
    match err {
        StorageError::Conflict { expected, observed } => {
            assert_eq!(expected, Some(9));
            assert_eq!(observed, Some(19));
        }
        other => panic!("unexpected error {other:?}"),
    }

    let reopened = FileWatermarkStore::new(dir.path());
    assert_eq!(reopened.load().unwrap(), Some(second));
}

#[test]
fn corrupt_record_is_reported_not_ignored() {
    let dir = TempDir::new().unwrap();
    let store = FileWatermarkStore::new(dir.path());
    fs::write(store.path(), b"{\"key\": \"restore-watermark\"").unwrap();
    assert!(matches!(store.load(), Err(StorageError::Corrupt(_))));

    let record = serde_json::json!({
        "key": "something-else",
        "format": 1,
        "watermark": watermark(0, 9),
    });
    fs::write(store.path(), serde_json::to_vec(&record).unwrap()).unwrap();
    assert!(matches!(store.load(), Err(StorageError::Corrupt(_))));
}

#[test]
fn recovery_promotes_covered_units_and_discards_the_rest() {
    let dir = TempDir::new().unwrap();
    let mut ledger = FileLedgerStore::open(dir.path()).unwrap();
    let committed = ledger.stage(&unit(0, 0, 9)).unwrap();
    ledger.promote(committed).unwrap();
    ledger.stage(&unit(1, 10, 19)).unwrap();
    ledger.stage(&unit(2, 20, 29)).unwrap();

    let report = ledger.recover(Some(&watermark(1, 19))).expect("recover");
    assert_eq!(report.promoted.len(), 1);
    assert_eq!(report.promoted[0].epoch, 1);
    assert_eq!(report.discarded, 1);

    let metas = ledger.committed().unwrap();
    let ranges: Vec<_> = metas
        .iter()
        .map(|meta| (meta.first_version, meta.last_version))
        .collect();
    assert_eq!(ranges, vec![(0, 9), (10, 19)]);
    assert_eq!(fs::read_dir(ledger.staging_dir()).unwrap().count(), 0);
}

#[test]
fn recovery_without_watermark_discards_everything_staged() {
    let dir = TempDir::new().unwrap();
    let mut ledger = FileLedgerStore::open(dir.path()).unwrap();
    ledger.stage(&unit(0, 0, 9)).unwrap();
    fs::write(ledger.staging_dir().join("00000000000000000010-00000000000000000019.bin"), b"torn")
        .unwrap();

    let report = ledger.recover(None).unwrap();
    assert!(report.promoted.is_empty());
    assert_eq!(report.discarded, 2);
    assert!(ledger.committed().unwrap().is_empty());
    assert_eq!(fs::read_dir(ledger.staging_dir()).unwrap().count(), 0);
}

#[test]
fn discard_removes_a_staged_unit() {
    let dir = TempDir::new().unwrap();
    let mut ledger = FileLedgerStore::open(dir.path()).unwrap();
    let ticket = ledger.stage(&unit(0, 0, 9)).unwrap();
    assert_eq!(ticket.meta().bytes, "payload-0".len());
    ledger.discard(ticket).unwrap();
    assert_eq!(fs::read_dir(ledger.staging_dir()).unwrap().count(), 0);
    assert!(ledger.committed().unwrap().is_empty());
}
