//! Daemon configuration.
//!
//! Configuration comes from an optional TOML file (path via `--config` or
//! the `SENTINEL_CONFIG` environment variable), with `SENTINEL_*`
//! environment overrides applied on top, then validated. Invalid
//! configuration is fatal at startup; the engine refuses to start.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};
use serde::Deserialize;

use crate::detect::DevicePreference;
use crate::ingest::SourceSpec;

const DEFAULT_DEVICE: &str = "cuda";
const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.35;
const DEFAULT_IOU_THRESHOLD: f32 = 0.45;
const DEFAULT_BLUR_KERNEL: usize = 51;
const DEFAULT_SEGMENT_SECONDS: u64 = 300;
const DEFAULT_TARGET_FPS: u32 = 30;
const DEFAULT_RESOLUTION: (u32, u32) = (1280, 720);
const DEFAULT_DETECTION_ONLY: bool = true;
const DEFAULT_EVIDENCE_JPEG_QUALITY: u8 = 75;
const DEFAULT_PRE_ROLL_SIZE: usize = 30;
const DEFAULT_FLUSH_QUEUE_CAPACITY: usize = 10;
const DEFAULT_MAX_STORAGE_GB: u64 = 50;

fn config_value<T>(value: Option<T>, default: T) -> T {
    value.unwrap_or(default)
}

#[derive(Debug, Deserialize, Default)]
struct SentinelConfigFile {
    camera_sources: Option<Vec<String>>,
    device: Option<String>,
    confidence_threshold: Option<f32>,
    iou_threshold: Option<f32>,
    blur_kernel: Option<usize>,
    segment_seconds: Option<u64>,
    target_fps: Option<u32>,
    resolution: Option<[u32; 2]>,
    evidence_detection_only: Option<bool>,
    evidence_jpeg_quality: Option<u8>,
    pre_roll_size: Option<usize>,
    flush_queue_capacity: Option<usize>,
    max_storage_gb: Option<u64>,
    public_path: Option<PathBuf>,
    evidence_path: Option<PathBuf>,
    key_path: Option<PathBuf>,
    vault: Option<VaultConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct VaultConfigFile {
    mode: Option<String>,
    rsa_public_key_path: Option<PathBuf>,
    rsa_private_key_path: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VaultMode {
    Symmetric,
    Hybrid,
}

impl std::str::FromStr for VaultMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "symmetric" => Ok(VaultMode::Symmetric),
            "hybrid" => Ok(VaultMode::Hybrid),
            other => Err(anyhow!("unknown vault mode: {}", other)),
        }
    }
}

#[derive(Clone, Debug)]
pub struct VaultSettings {
    pub mode: VaultMode,
    pub rsa_public_key_path: Option<PathBuf>,
    pub rsa_private_key_path: Option<PathBuf>,
}

impl Default for VaultSettings {
    fn default() -> Self {
        Self {
            mode: VaultMode::Symmetric,
            rsa_public_key_path: None,
            rsa_private_key_path: None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct SentinelConfig {
    pub camera_sources: Vec<String>,
    pub device: DevicePreference,
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
    pub blur_kernel: usize,
    pub segment_seconds: u64,
    pub target_fps: u32,
    pub resolution: (u32, u32),
    pub evidence_detection_only: bool,
    pub evidence_jpeg_quality: u8,
    pub pre_roll_size: usize,
    pub flush_queue_capacity: usize,
    pub max_storage_gb: u64,
    pub public_path: PathBuf,
    pub evidence_path: PathBuf,
    pub key_path: PathBuf,
    pub vault: VaultSettings,
}

impl SentinelConfig {
    /// Load from `SENTINEL_CONFIG` (if set), apply environment overrides,
    /// validate.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("SENTINEL_CONFIG").ok();
        Self::load_from(config_path.as_deref().map(Path::new))
    }

    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => read_config_file(path)?,
            None => SentinelConfigFile::default(),
        };
        let mut cfg = Self::from_file(file_cfg)?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: SentinelConfigFile) -> Result<Self> {
        let device: DevicePreference = file
            .device
            .as_deref()
            .unwrap_or(DEFAULT_DEVICE)
            .parse()?;
        let vault_file = file.vault.unwrap_or_default();
        let vault = VaultSettings {
            mode: vault_file
                .mode
                .as_deref()
                .map(str::parse)
                .transpose()?
                .unwrap_or(VaultMode::Symmetric),
            rsa_public_key_path: vault_file.rsa_public_key_path,
            rsa_private_key_path: vault_file.rsa_private_key_path,
        };
        let resolution = file
            .resolution
            .map(|[w, h]| (w, h))
            .unwrap_or(DEFAULT_RESOLUTION);
        Ok(Self {
            camera_sources: file
                .camera_sources
                .unwrap_or_else(|| vec!["0".to_string()]),
            device,
            confidence_threshold: config_value(
                file.confidence_threshold,
                DEFAULT_CONFIDENCE_THRESHOLD,
            ),
            iou_threshold: config_value(file.iou_threshold, DEFAULT_IOU_THRESHOLD),
            blur_kernel: config_value(file.blur_kernel, DEFAULT_BLUR_KERNEL),
            segment_seconds: config_value(file.segment_seconds, DEFAULT_SEGMENT_SECONDS),
            target_fps: config_value(file.target_fps, DEFAULT_TARGET_FPS),
            resolution,
            evidence_detection_only: config_value(
                file.evidence_detection_only,
                DEFAULT_DETECTION_ONLY,
            ),
            evidence_jpeg_quality: config_value(
                file.evidence_jpeg_quality,
                DEFAULT_EVIDENCE_JPEG_QUALITY,
            ),
            pre_roll_size: config_value(file.pre_roll_size, DEFAULT_PRE_ROLL_SIZE),
            flush_queue_capacity: config_value(
                file.flush_queue_capacity,
                DEFAULT_FLUSH_QUEUE_CAPACITY,
            ),
            max_storage_gb: config_value(file.max_storage_gb, DEFAULT_MAX_STORAGE_GB),
            public_path: file.public_path.unwrap_or_default(),
            evidence_path: file.evidence_path.unwrap_or_default(),
            key_path: file.key_path.unwrap_or_default(),
            vault,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(sources) = std::env::var("SENTINEL_CAMERA_SOURCES") {
            self.camera_sources = sources
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        if let Ok(device) = std::env::var("SENTINEL_DEVICE") {
            self.device = device.parse()?;
        }
        if let Ok(seconds) = std::env::var("SENTINEL_SEGMENT_SECONDS") {
            self.segment_seconds = seconds
                .parse()
                .map_err(|_| anyhow!("SENTINEL_SEGMENT_SECONDS must be an integer"))?;
        }
        if let Ok(gb) = std::env::var("SENTINEL_MAX_STORAGE_GB") {
            self.max_storage_gb = gb
                .parse()
                .map_err(|_| anyhow!("SENTINEL_MAX_STORAGE_GB must be an integer"))?;
        }
        if let Ok(path) = std::env::var("SENTINEL_PUBLIC_PATH") {
            self.public_path = PathBuf::from(path);
        }
        if let Ok(path) = std::env::var("SENTINEL_EVIDENCE_PATH") {
            self.evidence_path = PathBuf::from(path);
        }
        if let Ok(path) = std::env::var("SENTINEL_KEY_PATH") {
            self.key_path = PathBuf::from(path);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.camera_sources.is_empty() {
            return Err(anyhow!("at least one camera source is required"));
        }
        self.parsed_sources()?;
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(anyhow!("confidence_threshold must be in [0, 1]"));
        }
        if !(0.0..=1.0).contains(&self.iou_threshold) {
            return Err(anyhow!("iou_threshold must be in [0, 1]"));
        }
        if self.blur_kernel < 3 || self.blur_kernel % 2 == 0 {
            return Err(anyhow!("blur_kernel must be an odd integer >= 3"));
        }
        if self.segment_seconds == 0 {
            return Err(anyhow!("segment_seconds must be > 0"));
        }
        if self.target_fps == 0 {
            return Err(anyhow!("target_fps must be > 0"));
        }
        if self.resolution.0 == 0 || self.resolution.1 == 0 {
            return Err(anyhow!("resolution must be non-zero"));
        }
        if !(1..=100).contains(&self.evidence_jpeg_quality) {
            return Err(anyhow!("evidence_jpeg_quality must be in 1..=100"));
        }
        if self.flush_queue_capacity == 0 {
            return Err(anyhow!("flush_queue_capacity must be >= 1"));
        }
        if self.max_storage_gb == 0 {
            return Err(anyhow!("max_storage_gb must be > 0"));
        }
        for (name, path) in [
            ("public_path", &self.public_path),
            ("evidence_path", &self.evidence_path),
            ("key_path", &self.key_path),
        ] {
            if path.as_os_str().is_empty() {
                return Err(anyhow!("{} is required", name));
            }
        }
        if self.vault.mode == VaultMode::Hybrid && self.vault.rsa_public_key_path.is_none() {
            return Err(anyhow!("vault.rsa_public_key_path is required in hybrid mode"));
        }
        Ok(())
    }

    pub fn parsed_sources(&self) -> Result<Vec<SourceSpec>> {
        self.camera_sources
            .iter()
            .map(|entry| SourceSpec::parse(entry))
            .collect()
    }
}

fn read_config_file(path: &Path) -> Result<SentinelConfigFile> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("cannot read config file {}: {}", path.display(), e))?;
    toml::from_str(&contents).map_err(|e| anyhow!("invalid config file: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> SentinelConfig {
        SentinelConfig {
            camera_sources: vec!["0".to_string()],
            device: DevicePreference::Cpu,
            confidence_threshold: 0.35,
            iou_threshold: 0.45,
            blur_kernel: 51,
            segment_seconds: 300,
            target_fps: 30,
            resolution: (1280, 720),
            evidence_detection_only: true,
            evidence_jpeg_quality: 75,
            pre_roll_size: 30,
            flush_queue_capacity: 10,
            max_storage_gb: 50,
            public_path: PathBuf::from("public"),
            evidence_path: PathBuf::from("evidence"),
            key_path: PathBuf::from("vault.key"),
            vault: VaultSettings::default(),
        }
    }

    #[test]
    fn valid_config_passes() {
        base_config().validate().unwrap();
    }

    #[test]
    fn even_blur_kernel_is_rejected() {
        let mut cfg = base_config();
        cfg.blur_kernel = 50;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn out_of_range_threshold_is_rejected() {
        let mut cfg = base_config();
        cfg.confidence_threshold = 1.5;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn empty_sources_are_rejected() {
        let mut cfg = base_config();
        cfg.camera_sources.clear();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn unparseable_source_is_rejected() {
        let mut cfg = base_config();
        cfg.camera_sources = vec!["not a camera".to_string()];
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn missing_key_path_is_rejected() {
        let mut cfg = base_config();
        cfg.key_path = PathBuf::new();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn hybrid_mode_requires_public_key() {
        let mut cfg = base_config();
        cfg.vault.mode = VaultMode::Hybrid;
        assert!(cfg.validate().is_err());
        cfg.vault.rsa_public_key_path = Some(PathBuf::from("rsa.pub.pem"));
        cfg.validate().unwrap();
    }

    #[test]
    fn defaults_match_documented_values() {
        let cfg = SentinelConfig::from_file(SentinelConfigFile::default()).unwrap();
        assert_eq!(cfg.camera_sources, vec!["0".to_string()]);
        assert_eq!(cfg.device, DevicePreference::Cuda);
        assert_eq!(cfg.confidence_threshold, 0.35);
        assert_eq!(cfg.iou_threshold, 0.45);
        assert_eq!(cfg.blur_kernel, 51);
        assert_eq!(cfg.segment_seconds, 300);
        assert_eq!(cfg.target_fps, 30);
        assert_eq!(cfg.resolution, (1280, 720));
        assert!(cfg.evidence_detection_only);
        assert_eq!(cfg.evidence_jpeg_quality, 75);
        assert_eq!(cfg.pre_roll_size, 30);
        assert_eq!(cfg.flush_queue_capacity, 10);
        assert_eq!(cfg.max_storage_gb, 50);
    }
}
