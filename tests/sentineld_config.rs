//! Configuration loading: TOML file plus environment overrides.

use std::io::Write;
use std::sync::Mutex;

use tempfile::NamedTempFile;

use sentinel_edge::config::{SentinelConfig, VaultMode};
use sentinel_edge::detect::DevicePreference;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "SENTINEL_CONFIG",
        "SENTINEL_CAMERA_SOURCES",
        "SENTINEL_DEVICE",
        "SENTINEL_SEGMENT_SECONDS",
        "SENTINEL_MAX_STORAGE_GB",
        "SENTINEL_PUBLIC_PATH",
        "SENTINEL_EVIDENCE_PATH",
        "SENTINEL_KEY_PATH",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let toml = r#"
camera_sources = ["0", "rtsp://10.0.0.5:554/main"]
device = "cpu"
confidence_threshold = 0.5
blur_kernel = 31
segment_seconds = 120
resolution = [640, 360]
evidence_detection_only = false
pre_roll_size = 15
public_path = "out/public"
evidence_path = "out/evidence"
key_path = "out/vault.key"

[vault]
mode = "symmetric"
"#;
    file.write_all(toml.as_bytes()).expect("write config");

    std::env::set_var("SENTINEL_CONFIG", file.path());
    std::env::set_var("SENTINEL_SEGMENT_SECONDS", "45");
    std::env::set_var("SENTINEL_KEY_PATH", "/secure/vault.key");

    let cfg = SentinelConfig::load().expect("load config");
    clear_env();

    assert_eq!(cfg.camera_sources.len(), 2);
    assert_eq!(cfg.device, DevicePreference::Cpu);
    assert_eq!(cfg.confidence_threshold, 0.5);
    assert_eq!(cfg.blur_kernel, 31);
    // env wins over file
    assert_eq!(cfg.segment_seconds, 45);
    assert_eq!(cfg.key_path.to_str().unwrap(), "/secure/vault.key");
    assert_eq!(cfg.resolution, (640, 360));
    assert!(!cfg.evidence_detection_only);
    assert_eq!(cfg.pre_roll_size, 15);
    assert_eq!(cfg.vault.mode, VaultMode::Symmetric);

    let sources = cfg.parsed_sources().unwrap();
    assert_eq!(sources[0].tag(0), "cam0");
    assert_eq!(sources[1].tag(1), "rtsp1");
}

#[test]
fn env_source_list_is_comma_separated() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    file.write_all(
        br#"
public_path = "p"
evidence_path = "e"
key_path = "k"
"#,
    )
    .expect("write config");

    std::env::set_var("SENTINEL_CONFIG", file.path());
    std::env::set_var("SENTINEL_CAMERA_SOURCES", "0, 1, rtsp://cam.local/stream");

    let cfg = SentinelConfig::load().expect("load config");
    clear_env();

    assert_eq!(
        cfg.camera_sources,
        vec!["0", "1", "rtsp://cam.local/stream"]
    );
}

#[test]
fn invalid_file_values_fail_validation() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    file.write_all(
        br#"
blur_kernel = 10
public_path = "p"
evidence_path = "e"
key_path = "k"
"#,
    )
    .expect("write config");

    std::env::set_var("SENTINEL_CONFIG", file.path());
    let result = SentinelConfig::load();
    clear_env();
    assert!(result.is_err());
}

#[test]
fn missing_config_file_is_an_error() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();
    std::env::set_var("SENTINEL_CONFIG", "/nonexistent/sentinel.toml");
    let result = SentinelConfig::load();
    clear_env();
    assert!(result.is_err());
}
