//! Engine lifecycle end to end: multiple cameras, public/evidence pairing,
//! listings, the decrypt path, and ordered shutdown.

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use sentinel_edge::config::{SentinelConfig, VaultSettings};
use sentinel_edge::detect::{DevicePreference, PeriodicDetector};
use sentinel_edge::{Engine, EngineError, SharedDetector};

fn test_config(root: &std::path::Path) -> SentinelConfig {
    SentinelConfig {
        camera_sources: vec!["0".to_string(), "1".to_string()],
        device: DevicePreference::Cpu,
        confidence_threshold: 0.35,
        iou_threshold: 0.45,
        blur_kernel: 11,
        segment_seconds: 1,
        target_fps: 30,
        resolution: (64, 48),
        evidence_detection_only: true,
        evidence_jpeg_quality: 75,
        pre_roll_size: 5,
        flush_queue_capacity: 10,
        max_storage_gb: 50,
        public_path: root.join("public"),
        evidence_path: root.join("evidence"),
        key_path: root.join("keys/vault.key"),
        vault: VaultSettings::default(),
    }
}

fn wait_for<F: Fn() -> bool>(what: &str, deadline: Duration, predicate: F) {
    let started = Instant::now();
    while !predicate() {
        assert!(
            started.elapsed() < deadline,
            "timed out waiting for {}",
            what
        );
        std::thread::sleep(Duration::from_millis(25));
    }
}

#[test]
fn dual_path_pipeline_produces_paired_artifacts() {
    let root = tempfile::tempdir().unwrap();
    let detector = SharedDetector::new(PeriodicDetector::new(2));
    let engine = Engine::start(test_config(root.path()), detector).unwrap();

    // both cameras report status and previews
    wait_for("both previews", Duration::from_secs(15), || {
        engine.latest_jpeg(0).is_some() && engine.latest_jpeg(1).is_some()
    });
    let status = engine.status();
    assert_eq!(status.len(), 2);
    assert!(engine.latest_jpeg(7).is_none());

    let (jpeg, _) = engine.latest_jpeg(0).unwrap();
    assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);

    // preview sequence numbers advance: newest-wins slot
    let (_, seq_a) = engine.latest_jpeg(0).unwrap();
    wait_for("preview progress", Duration::from_secs(10), || {
        engine.latest_jpeg(0).map(|(_, seq)| seq > seq_a).unwrap_or(false)
    });

    // with a 1-second window and detections every other frame, evidence
    // segments flush while the engine runs
    wait_for("evidence on disk", Duration::from_secs(20), || {
        engine.list_evidence().map(|v| !v.is_empty()).unwrap_or(false)
    });
    wait_for("public segments listed", Duration::from_secs(10), || {
        engine.list_public().map(|v| !v.is_empty()).unwrap_or(false)
    });

    // the decrypt path works against a listed evidence file
    let evidence = engine.list_evidence().unwrap();
    let decrypted = engine.decrypt(&evidence[0].file_name).unwrap();
    assert_eq!(decrypted.fingerprint.len(), 64);
    assert!(decrypted.package.meta.total_detections >= 1);
    assert!(!decrypted.package.records.is_empty());

    engine.stop();

    // pairing invariant: every evidence file has a public segment with the
    // same {camera_tag, timestamp} prefix
    let public_pairs: HashSet<(String, String)> = list_dir(&root.path().join("public"))
        .into_iter()
        .filter(|n| n.starts_with("public_") && !n.ends_with(".json"))
        .map(|n| split_pair(&n))
        .collect();
    let evidence_names = list_dir(&root.path().join("evidence"));
    assert!(!evidence_names.is_empty());
    for name in &evidence_names {
        assert!(
            name.ends_with(".enc"),
            "unexpected file in evidence root: {}",
            name
        );
        let pair = split_pair(name);
        assert!(
            public_pairs.contains(&pair),
            "evidence {} has no public segment pair (have {:?})",
            name,
            public_pairs
        );
    }

    // no temp files survive shutdown
    assert!(!evidence_names.iter().any(|n| n.ends_with(".tmp")));
}

fn list_dir(dir: &PathBuf) -> Vec<String> {
    std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().into_string().unwrap())
        .collect()
}

/// `public_cam0_20250612083015.avi` / `evidence_cam0_20250612083015_0000.enc`
/// -> `("cam0", "20250612083015")`
fn split_pair(name: &str) -> (String, String) {
    let stem = name.split('.').next().unwrap();
    let parts: Vec<&str> = stem.split('_').collect();
    (parts[1].to_string(), parts[2].to_string())
}

#[test]
fn decrypt_rejects_path_traversal() {
    let root = tempfile::tempdir().unwrap();
    let detector = SharedDetector::new(PeriodicDetector::new(1000));
    let engine = Engine::start(test_config(root.path()), detector).unwrap();
    assert!(engine.decrypt("../vault.key").is_err());
    assert!(engine.decrypt("missing.enc").is_err());
    engine.stop();
}

#[test]
fn invalid_config_refuses_to_start() {
    let root = tempfile::tempdir().unwrap();
    let mut cfg = test_config(root.path());
    cfg.blur_kernel = 4;
    let detector = SharedDetector::new(PeriodicDetector::new(10));
    match Engine::start(cfg, detector) {
        Err(EngineError::Config(_)) => {}
        other => panic!("expected Config error, got {:?}", other.map(|_| ()).err()),
    }
}

#[test]
fn key_file_persists_across_engine_restarts() {
    let root = tempfile::tempdir().unwrap();
    let cfg = test_config(root.path());

    let engine = Engine::start(cfg.clone(), SharedDetector::new(PeriodicDetector::new(2))).unwrap();
    wait_for("evidence", Duration::from_secs(20), || {
        engine.list_evidence().map(|v| !v.is_empty()).unwrap_or(false)
    });
    let name = engine.list_evidence().unwrap()[0].file_name.clone();
    engine.stop();

    // a fresh engine with the same key path can decrypt old evidence
    let engine = Engine::start(cfg, SharedDetector::new(PeriodicDetector::new(1000))).unwrap();
    let decrypted = engine.decrypt(&name).unwrap();
    assert_eq!(decrypted.fingerprint.len(), 64);
    engine.stop();
}
