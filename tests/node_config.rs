use std::fs;
use std::time::Duration;

use ol_bootstrap::{
    ArchiveEndpoint, ArchiveSource, ConfigError, HashValue, NodeBootstrapConfig, TargetEpoch,
};
use serde_json::json;
use tempfile::TempDir;

fn digest() -> HashValue {
    HashValue::digest(b"genesis validators")
}

fn base() -> serde_json::Value {
    json!({
        "data_dir": "/var/lib/ol",
        "archives": [
            {"kind": "directory", "path": "/mnt/archive"},
            {"kind": "http", "url": "https://archive.example.org/epochs"}
        ],
        "peers": ["http://127.0.0.1:8080"],
        "genesis_validator_set_digest": digest().to_hex(),
    })
}

fn parse(value: serde_json::Value) -> NodeBootstrapConfig {
    serde_json::from_value(value).expect("config parses")
}

#[test]
fn omitted_knobs_take_defaults() {
    let config = parse(base());
    config.validate().expect("valid");
    assert_eq!(config.target_epoch, TargetEpoch::Latest);
    assert_eq!(config.lag_threshold, 100);
    assert_eq!(config.live_confirmations, 1);
    assert_eq!(config.delta_batch_limit, 500);
    assert_eq!(config.poll_interval(), Duration::from_secs(1));
    assert_eq!(config.http_timeout(), Duration::from_secs(10));
    assert_eq!(config.storage_retry.max_attempts, 3);
    assert_eq!(config.prefetch.workers, 2);
    assert_eq!(config.prefetch.window, 4);
    assert!(config.snapshot.is_none());
    assert_eq!(config.tracker().lag_threshold, 100);
    assert_eq!(
        config.archives[0],
        ArchiveEndpoint::Directory {
            path: "/mnt/archive".into()
        }
    );
    assert_eq!(config, parse(serde_json::to_value(&config).unwrap()));
}

#[test]
fn target_epoch_accepts_latest_or_a_number() {
    for (raw, expected) in [
        (json!("latest"), TargetEpoch::Latest),
        (json!("LATEST"), TargetEpoch::Latest),
        (json!(12), TargetEpoch::Epoch(12)),
        (json!("42"), TargetEpoch::Epoch(42)),
    ] {
        let mut value = base();
        value["target_epoch"] = raw;
        assert_eq!(parse(value).target_epoch, expected);
    }

    let mut value = base();
    value["target_epoch"] = json!("soon");
    assert!(serde_json::from_value::<NodeBootstrapConfig>(value).is_err());
    assert_eq!(
        serde_json::to_value(TargetEpoch::Epoch(7)).unwrap(),
        json!(7)
    );
}

#[test]
fn validation_rejects_unusable_settings() {
    let cases: Vec<(&str, serde_json::Value)> = vec![
        ("archives", json!([])),
        ("lag_threshold", json!(0)),
        ("live_confirmations", json!(0)),
        ("delta_batch_limit", json!(0)),
        ("prefetch", json!({"workers": 0})),
        ("retry", json!({"max_attempts": 0})),
        ("storage_retry", json!({"initial_backoff_ms": 5000, "max_backoff_ms": 10})),
        ("peers", json!([" "])),
    ];
    for (field, raw) in cases {
        let mut value = base();
        value[field] = raw;
        let err = parse(value).validate().expect_err(field);
        assert!(matches!(err, ConfigError::Invalid(_)), "{field}: {err}");
    }

    let mut value = base();
    value["archives"] = json!([{"kind": "http", "url": ""}]);
    assert!(parse(value).validate().is_err());
}

#[test]
fn load_reads_and_validates_a_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("bootstrap.json");

    let err = NodeBootstrapConfig::load(&path).expect_err("missing file");
    assert!(matches!(err, ConfigError::Io { .. }));

    fs::write(&path, b"{not json").unwrap();
    assert!(matches!(
        NodeBootstrapConfig::load(&path),
        Err(ConfigError::Parse(_))
    ));

    let mut value = base();
    value["archives"] = json!([]);
    fs::write(&path, serde_json::to_vec(&value).unwrap()).unwrap();
    assert!(matches!(
        NodeBootstrapConfig::load(&path),
        Err(ConfigError::Invalid(_))
    ));

    fs::write(&path, serde_json::to_vec(&base()).unwrap()).unwrap();
    let config = NodeBootstrapConfig::load(&path).expect("valid file");
    assert_eq!(config.peers.len(), 1);
    assert_eq!(config.genesis_validator_set_digest, digest());
}

#[test]
fn directory_archives_connect_without_io() {
    let dir = TempDir::new().unwrap();
    let mut config = NodeBootstrapConfig::new(dir.path(), digest());
    config.archives.push(ArchiveEndpoint::Directory {
        path: dir.path().join("archive"),
    });
    config.validate().unwrap();
    let archives = config.connect_archives().unwrap();
    assert_eq!(archives.len(), 1);
    assert!(archives[0].name().starts_with("dir:"));
    assert!(config.connect_peers().unwrap().is_empty());
}
