use ol_bootstrap::{JournalRotationPolicy, LogLevel, ProgressJournal, JOURNAL_FILE};
use serde_json::Value;
use tempfile::TempDir;

#[test]
fn journal_records_round_trip_through_the_file() {
    let dir = TempDir::new().unwrap();
    let mut journal = ProgressJournal::open(dir.path(), JournalRotationPolicy::default()).unwrap();
    journal
        .record(LogLevel::Info, "restore", Some(3), Some(39), "segment applied")
        .unwrap();
    journal
        .record(LogLevel::Error, "controller", None, None, "restore failed")
        .unwrap();
    assert_eq!(journal.path(), dir.path().join(JOURNAL_FILE));

    let raw = std::fs::read_to_string(journal.path()).unwrap();
    let first: Value = serde_json::from_str(raw.lines().next().unwrap()).unwrap();
    assert_eq!(first["level"], "INFO");
    assert_eq!(first["component"], "restore");
    assert_eq!(first["epoch"], 3);
    assert_eq!(first["version"], 39);

    let records = ProgressJournal::read_records(journal.path()).unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[1].level, LogLevel::Error);
    assert_eq!(records[1].epoch, None);
    assert_eq!(records[1].message, "restore failed");
}

#[test]
fn level_override_filters_records() {
    let dir = TempDir::new().unwrap();
    let mut journal = ProgressJournal::open(dir.path(), JournalRotationPolicy::default()).unwrap();
    journal.set_level(LogLevel::Warn);
    assert_eq!(journal.level(), LogLevel::Warn);
    journal
        .record(LogLevel::Info, "tracker", None, None, "info suppressed")
        .unwrap();
    journal
        .record(LogLevel::Warn, "tracker", None, None, "warn visible")
        .unwrap();

    let records = ProgressJournal::read_records(journal.path()).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].message, "warn visible");
}

#[test]
fn rotation_keeps_a_bounded_number_of_files() {
    let dir = TempDir::new().unwrap();
    let policy = JournalRotationPolicy {
        max_bytes: 128,
        max_files: 2,
    };
    let mut journal = ProgressJournal::open(dir.path(), policy).unwrap();
    for epoch in 0..20 {
        journal
            .record(LogLevel::Info, "restore", Some(epoch), None, "segment applied")
            .unwrap();
    }

    let base = journal.path().to_path_buf();
    let rotated = |index: usize| {
        let mut name = base.as_os_str().to_os_string();
        name.push(format!(".{index}"));
        std::path::PathBuf::from(name)
    };
    assert!(rotated(1).exists());
    assert!(rotated(2).exists());
    assert!(!rotated(3).exists());

    let latest = ProgressJournal::read_records(&base).unwrap();
    assert!(!latest.is_empty());
    assert_eq!(latest.last().unwrap().epoch, Some(19));
    assert!(std::fs::metadata(&base).unwrap().len() <= 128);
}

#[test]
fn reopening_appends_to_the_existing_journal() {
    let dir = TempDir::new().unwrap();
    {
        let mut journal =
            ProgressJournal::open(dir.path(), JournalRotationPolicy::default()).unwrap();
        journal
            .record(LogLevel::Info, "restore", Some(0), None, "first run")
            .unwrap();
    }
    let mut journal = ProgressJournal::open(dir.path(), JournalRotationPolicy::default()).unwrap();
    journal
        .record(LogLevel::Info, "restore", Some(1), None, "second run")
        .unwrap();

    let messages: Vec<_> = ProgressJournal::read_records(journal.path())
        .unwrap()
        .into_iter()
        .map(|record| record.message)
        .collect();
    assert_eq!(messages, vec!["first run", "second run"]);
}

#[test]
fn missing_journal_reads_as_empty() {
    let dir = TempDir::new().unwrap();
    let records = ProgressJournal::read_records(dir.path().join(JOURNAL_FILE)).unwrap();
    assert!(records.is_empty());
}
