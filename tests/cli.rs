use std::fs;
use std::path::{Path, PathBuf};

use clap::Parser;
use ol_bootstrap::app::{run_cli, Cli, Command};
use ol_bootstrap::{
    ArchiveEndpoint, DirectoryArchive, FileWatermarkStore, HashValue, NodeBootstrapConfig,
    SegmentExporter, ValidatorSigner, WatermarkStore,
};
use tempfile::TempDir;

fn publish_archive(root: &Path, epochs: u64) -> HashValue {
    let mut exporter = SegmentExporter::genesis(vec![
        ValidatorSigner::from_seed("val-0", [11; 32], 10),
        ValidatorSigner::from_seed("val-1", [12; 32], 10),
        ValidatorSigner::from_seed("val-2", [13; 32], 10),
    ]);
    let genesis = exporter.validator_set().digest();
    let archive = DirectoryArchive::new(root);
    for epoch in 0..epochs {
        let segment = exporter.export_segment(format!("epoch-{epoch}").into_bytes(), 10);
        archive.write_segment(&segment).expect("publish segment");
    }
    genesis
}

fn write_config(dir: &TempDir, genesis: HashValue) -> PathBuf {
    let archive_root = dir.path().join("archive");
    let mut config = NodeBootstrapConfig::new(dir.path().join("data"), genesis);
    config.archives.push(ArchiveEndpoint::Directory { path: archive_root });
    let path = dir.path().join("bootstrap.json");
    fs::write(&path, serde_json::to_vec_pretty(&config).unwrap()).unwrap();
    path
}

#[test]
fn parses_subcommands() {
    let cli = Cli::try_parse_from(["ol-bootstrap", "restore", "--config", "node.json", "--epoch", "7"])
        .expect("restore parses");
    match cli.command {
        Command::Restore { config, epoch } => {
            assert_eq!(config, PathBuf::from("node.json"));
            assert_eq!(epoch, Some(7));
        }
        other => panic!("unexpected command {other:?}"),
    }

    let cli = Cli::try_parse_from(["ol-bootstrap", "start", "--config", "node.json"]).unwrap();
    assert!(matches!(cli.command, Command::Start { .. }));
    assert!(Cli::try_parse_from(["ol-bootstrap", "status"]).is_err());
}

#[test]
fn restore_then_status_reports_the_watermark() {
    let dir = TempDir::new().unwrap();
    let genesis = publish_archive(&dir.path().join("archive"), 4);
    let config = write_config(&dir, genesis);

    let code = run_cli(Cli {
        command: Command::Restore {
            config: config.clone(),
            epoch: Some(2),
        },
    })
    .expect("restore runs");
    assert_eq!(code, 0);
    let watermark = FileWatermarkStore::new(dir.path().join("data"))
        .load()
        .unwrap()
        .expect("watermark persisted");
    assert_eq!(watermark.restored_through_epoch, 2);

    let code = run_cli(Cli {
        command: Command::Status { config },
    })
    .expect("status runs");
    assert_eq!(code, 0);
}

#[test]
fn fatal_errors_map_to_exit_codes() {
    let dir = TempDir::new().unwrap();
    publish_archive(&dir.path().join("archive"), 2);
    let config = write_config(&dir, HashValue::digest(b"not the genesis set"));

    let code = run_cli(Cli {
        command: Command::Restore {
            config,
            epoch: None,
        },
    })
    .unwrap();
    assert_eq!(code, 3);

    let missing = dir.path().join("missing.json");
    let code = run_cli(Cli {
        command: Command::Start { config: missing },
    })
    .unwrap();
    assert_eq!(code, 64);
}

#[test]
fn undecodable_segment_exits_as_corrupt_payload() {
    let dir = TempDir::new().unwrap();
    let archive_root = dir.path().join("archive");
    let genesis = publish_archive(&archive_root, 3);
    fs::write(archive_root.join("epoch_1.json"), b"{\"epoch_number\": 1, ").unwrap();
    let config = write_config(&dir, genesis);

    let code = run_cli(Cli {
        command: Command::Restore {
            config,
            epoch: None,
        },
    })
    .unwrap();
    assert_eq!(code, 4);
    let watermark = FileWatermarkStore::new(dir.path().join("data"))
        .load()
        .unwrap()
        .expect("epoch 0 restored");
    assert_eq!(watermark.restored_through_epoch, 0);
}
