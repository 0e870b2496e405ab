use ol_bootstrap::{
    certify, ChainAnchor, HashValue, ManifestVerifier, SegmentExporter, ValidatorSigner,
    VerificationError,
};

fn signers(tag: u8, count: u8) -> Vec<ValidatorSigner> {
    (0..count)
        .map(|index| {
            ValidatorSigner::from_seed(format!("val-{tag}-{index}"), [tag * 16 + index + 1; 32], 10)
        })
        .collect()
}

fn exporter() -> SegmentExporter {
    SegmentExporter::genesis(signers(1, 4))
}

#[test]
fn accepts_a_linked_attested_chain() {
    let mut exporter = exporter();
    let genesis = ChainAnchor::genesis(exporter.validator_set().digest());
    let first = exporter.export_segment(b"epoch-0".to_vec(), 10);
    let second = exporter.export_segment(b"epoch-1".to_vec(), 5);
    let verifier = ManifestVerifier::new();

    let anchor = ChainAnchor::after(&first);
    let verified = verifier.verify(first, &genesis).expect("genesis segment verifies");
    assert_eq!(verified.epoch_number(), 0);
    assert!(!verified.from_snapshot());

    let verified = verifier.verify(second, &anchor).expect("second segment verifies");
    assert_eq!(verified.segment().start_version, 10);
    assert_eq!(verified.segment().last_version(), 14);
}

#[test]
fn tampered_payload_is_corrupt() {
    let mut exporter = exporter();
    let genesis = ChainAnchor::genesis(exporter.validator_set().digest());
    let mut segment = exporter.export_segment(b"epoch-0".to_vec(), 10);
    segment.payload[0] ^= 0x01;

    let err = ManifestVerifier::new()
        .verify(segment, &genesis)
        .expect_err("payload digest mismatch");
    assert!(matches!(err, VerificationError::CorruptPayload { epoch: 0, .. }));
    assert_eq!(err.kind(), "corrupt_payload");
}

#[test]
fn empty_epoch_is_corrupt() {
    let mut exporter = exporter();
    let genesis = ChainAnchor::genesis(exporter.validator_set().digest());
    let segment = exporter.export_segment(b"empty".to_vec(), 0);

    let err = ManifestVerifier::new()
        .verify(segment, &genesis)
        .expect_err("zero transactions rejected");
    assert!(matches!(err, VerificationError::CorruptPayload { .. }));
}

#[test]
fn broken_linkage_is_a_chain_mismatch() {
    let mut exporter = exporter();
    let first = exporter.export_segment(b"epoch-0".to_vec(), 10);
    let second = exporter.export_segment(b"epoch-1".to_vec(), 10);
    let anchor = ChainAnchor::after(&first);
    let verifier = ManifestVerifier::new();

    let mut forged = second.clone();
    forged.prev_segment_hash = HashValue::digest(b"forged");
    let err = verifier.verify(forged, &anchor).expect_err("prev hash mismatch");
    assert!(matches!(err, VerificationError::ChainMismatch { epoch: 1, .. }));

    let mut shifted = second.clone();
    shifted.start_version = 11;
    let err = verifier.verify(shifted, &anchor).expect_err("start version mismatch");
    assert!(matches!(err, VerificationError::ChainMismatch { .. }));

    let genesis = ChainAnchor::genesis(first.validator_set.digest());
    let err = verifier.verify(second, &genesis).expect_err("skipping epoch 0");
    assert_eq!(err.kind(), "chain_mismatch");
}

#[test]
fn attestation_must_come_from_a_trusted_quorum() {
    let mut exporter = exporter();
    let trusted = exporter.validator_set().digest();
    let segment = exporter.export_segment(b"epoch-0".to_vec(), 10);
    let verifier = ManifestVerifier::new();

    let stranger = ChainAnchor::genesis(HashValue::digest(b"some other set"));
    let err = verifier
        .verify(segment.clone(), &stranger)
        .expect_err("untrusted validator digest");
    assert!(matches!(err, VerificationError::UntrustedSegment { .. }));

    let mut unsigned = segment.clone();
    unsigned.attestation = None;
    let err = verifier
        .verify(unsigned, &ChainAnchor::genesis(trusted))
        .expect_err("missing attestation");
    assert!(matches!(err, VerificationError::UntrustedSegment { .. }));

    let mut minority = segment.clone();
    if let Some(certificate) = minority.attestation.as_mut() {
        certificate.signatures.truncate(2);
    }
    let err = verifier
        .verify(minority, &ChainAnchor::genesis(trusted))
        .expect_err("half the voting power is not a quorum");
    assert!(err.to_string().contains("below quorum"));

    let mut duplicated = segment.clone();
    if let Some(certificate) = duplicated.attestation.as_mut() {
        let first = certificate.signatures[0].clone();
        certificate.signatures.push(first);
    }
    let err = verifier
        .verify(duplicated, &ChainAnchor::genesis(trusted))
        .expect_err("duplicate signer");
    assert!(err.to_string().contains("more than once"));

    let mut outsider = segment;
    outsider.attestation = Some(certify(&signers(9, 4), &outsider.signing_message()));
    let err = verifier
        .verify(outsider, &ChainAnchor::genesis(trusted))
        .expect_err("signatures from outside the set");
    assert!(matches!(err, VerificationError::UntrustedSegment { .. }));
}

#[test]
fn follows_validator_set_rotation() {
    let mut exporter = exporter();
    let genesis = ChainAnchor::genesis(exporter.validator_set().digest());
    let first = exporter.export_segment_rotating(b"epoch-0".to_vec(), 10, signers(2, 3));
    let second = exporter.export_segment(b"epoch-1".to_vec(), 10);
    let verifier = ManifestVerifier::new();

    let anchor = ChainAnchor::after(&first);
    verifier.verify(first, &genesis).expect("epoch 0 verifies");
    verifier
        .verify(second.clone(), &anchor)
        .expect("epoch 1 verifies under the rotated set");

    let stale = ChainAnchor {
        validator_set_digest: genesis.validator_set_digest,
        ..anchor
    };
    let err = verifier
        .verify(second, &stale)
        .expect_err("old set no longer trusted");
    assert!(matches!(err, VerificationError::UntrustedSegment { epoch: 1, .. }));
}

#[test]
fn snapshot_segments_verify_against_the_waypoint() {
    let mut exporter = exporter();
    for epoch in 0..3u8 {
        exporter.export_segment(vec![epoch; 4], 10);
    }
    let waypoint = exporter.waypoint();
    let snapshot = exporter.export_segment(b"epoch-3".to_vec(), 10);
    let pinned = exporter.waypoint();
    let verifier = ManifestVerifier::new();

    let verified = verifier
        .verify_snapshot(snapshot.clone(), &pinned)
        .expect("snapshot matches its waypoint");
    assert!(verified.from_snapshot());
    assert_eq!(pinned.epoch, 3);
    assert_eq!(pinned.version, 39);

    let err = verifier
        .verify_snapshot(snapshot.clone(), &waypoint)
        .expect_err("waypoint pinned to another epoch");
    assert!(matches!(err, VerificationError::ChainMismatch { epoch: 3, .. }));

    let mut wrong_hash = pinned.clone();
    wrong_hash.segment_hash = HashValue::digest(b"other");
    let err = verifier
        .verify_snapshot(snapshot, &wrong_hash)
        .expect_err("content hash differs");
    assert!(matches!(err, VerificationError::ChainMismatch { .. }));
}
