//! Engine: lifecycle of the per-camera pipelines plus the snapshot
//! accessors the HTTP surface consumes.
//!
//! The engine owns the shared vault and the shared detector, builds one
//! component set per configured camera source (worker thread, public
//! recorder, evidence manager, status, preview slot), and tears everything
//! down in order on `stop()`: signal, drain workers (which close their
//! recorders and evidence managers), stop the supervisor, drop the vault.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use regex::Regex;
use serde::Serialize;

use crate::camera::{CameraStatus, CameraWorker, LatestFrameSlot, StatusSnapshot, WorkerConfig};
use crate::config::{SentinelConfig, VaultMode};
use crate::detect::SharedDetector;
use crate::evidence::{self, EvidenceConfig, EvidenceManager, EvidencePackage};
use crate::ingest::{FrameSource, SourceSpec, SyntheticSource};
use crate::janitor::StorageJanitor;
use crate::process::{Processor, ProcessorConfig};
use crate::record::{EncoderRegistry, PublicRecorder, RecorderConfig};
use crate::vault::{hybrid, EvidenceSealer, HybridVault, Vault, VaultError};

/// Cadence of the storage janitor on the supervisor thread.
const JANITOR_INTERVAL: Duration = Duration::from_secs(60);

/// Evidence flush-queue drain deadline at shutdown.
const EVIDENCE_CLOSE_DEADLINE: Duration = Duration::from_secs(30);

/// JPEG quality for the built-in MJPEG fallback on the public path.
const PUBLIC_MJPEG_QUALITY: u8 = 80;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("invalid configuration: {0}")]
    Config(anyhow::Error),
    #[error("vault key failure: {0}")]
    Key(#[from] VaultError),
    #[error("no camera sources opened")]
    NoSources,
    #[error(transparent)]
    Runtime(#[from] anyhow::Error),
}

/// Opens a `FrameSource` for one configured camera. Real camera drivers
/// are external; the default factory serves the synthetic source so the
/// pipeline runs end to end without hardware.
pub type SourceFactory =
    Box<dyn Fn(usize, &SourceSpec) -> Result<Box<dyn FrameSource>> + Send + Sync>;

struct CameraHandle {
    status: Arc<CameraStatus>,
    slot: Arc<LatestFrameSlot>,
    worker: Option<JoinHandle<()>>,
}

pub struct Engine {
    public_dir: PathBuf,
    evidence_dir: PathBuf,
    sealer: Arc<dyn EvidenceSealer>,
    hybrid_mode: bool,
    cameras: Vec<CameraHandle>,
    shutdown: Arc<AtomicBool>,
    supervisor: Option<JoinHandle<()>>,
}

impl Engine {
    /// Start with the built-in encoder backends and synthetic sources.
    pub fn start(cfg: SentinelConfig, detector: SharedDetector) -> Result<Self, EngineError> {
        let registry = Arc::new(EncoderRegistry::with_default_backends(PUBLIC_MJPEG_QUALITY));
        let target_fps = cfg.target_fps;
        let resolution = cfg.resolution;
        Self::start_with(
            cfg,
            detector,
            registry,
            Box::new(move |_, spec| {
                log::info!("using synthetic frame source for {}", spec.describe());
                let source: Box<dyn FrameSource> = Box::new(SyntheticSource::new(
                    resolution.0,
                    resolution.1,
                    target_fps,
                ));
                Ok(source)
            }),
        )
    }

    /// Start with explicit encoder registry and source factory. This is the
    /// seam embedding applications (and tests) use to plug in real codec
    /// and camera backends.
    pub fn start_with(
        cfg: SentinelConfig,
        detector: SharedDetector,
        registry: Arc<EncoderRegistry>,
        source_factory: SourceFactory,
    ) -> Result<Self, EngineError> {
        cfg.validate().map_err(EngineError::Config)?;
        let specs = cfg.parsed_sources().map_err(EngineError::Config)?;

        let sealer: Arc<dyn EvidenceSealer> = match cfg.vault.mode {
            VaultMode::Symmetric => Arc::new(Vault::open(&cfg.key_path)?),
            VaultMode::Hybrid => {
                let public = cfg
                    .vault
                    .rsa_public_key_path
                    .as_deref()
                    .ok_or_else(|| EngineError::Config(anyhow!("hybrid vault needs a public key")))?;
                Arc::new(HybridVault::from_pem_files(
                    public,
                    cfg.vault.rsa_private_key_path.as_deref(),
                )?)
            }
        };

        fs::create_dir_all(&cfg.public_path).map_err(|e| EngineError::Runtime(e.into()))?;
        fs::create_dir_all(&cfg.evidence_path).map_err(|e| EngineError::Runtime(e.into()))?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let mut cameras = Vec::with_capacity(specs.len());

        for (index, spec) in specs.iter().enumerate() {
            let tag = spec.tag(index);
            let source = match source_factory(index, spec) {
                Ok(source) => source,
                Err(e) => {
                    log::error!("camera {} ({}): source unavailable: {}", index, tag, e);
                    continue;
                }
            };

            let recorder = PublicRecorder::new(
                RecorderConfig {
                    dir: cfg.public_path.clone(),
                    camera_tag: tag.clone(),
                    segment_seconds: cfg.segment_seconds,
                    target_fps: cfg.target_fps,
                    width: cfg.resolution.0,
                    height: cfg.resolution.1,
                },
                Arc::clone(&registry),
            )?;
            let evidence = EvidenceManager::new(
                EvidenceConfig {
                    dir: cfg.evidence_path.clone(),
                    camera_tag: tag.clone(),
                    detection_only: cfg.evidence_detection_only,
                    pre_roll_size: cfg.pre_roll_size,
                    segment_seconds: cfg.segment_seconds,
                    flush_queue_capacity: cfg.flush_queue_capacity,
                    jpeg_quality: cfg.evidence_jpeg_quality,
                    close_deadline: EVIDENCE_CLOSE_DEADLINE,
                },
                Arc::clone(&sealer),
            )?;
            let processor = Processor::new(
                ProcessorConfig {
                    confidence_threshold: cfg.confidence_threshold,
                    iou_threshold: cfg.iou_threshold,
                    blur_kernel: cfg.blur_kernel,
                },
                detector.clone(),
            )?;

            let status = Arc::new(CameraStatus::new(
                index,
                spec.describe(),
                recorder.write_errors(),
                evidence.stats(),
            ));
            let slot = Arc::new(LatestFrameSlot::new());

            let worker = CameraWorker::spawn(
                WorkerConfig {
                    index,
                    resolution: cfg.resolution,
                    ..WorkerConfig::default()
                },
                source,
                processor,
                recorder,
                evidence,
                Arc::clone(&slot),
                Arc::clone(&status),
                Arc::clone(&shutdown),
            )
            .map_err(|e| EngineError::Runtime(e.into()))?;

            cameras.push(CameraHandle {
                status,
                slot,
                worker: Some(worker),
            });
        }

        if cameras.is_empty() {
            return Err(EngineError::NoSources);
        }

        let janitor = StorageJanitor::new(
            vec![cfg.public_path.clone(), cfg.evidence_path.clone()],
            cfg.max_storage_gb,
        );
        let supervisor_shutdown = Arc::clone(&shutdown);
        let supervisor = thread::Builder::new()
            .name("sentinel-supervisor".to_string())
            .spawn(move || supervise(janitor, supervisor_shutdown))
            .map_err(|e| EngineError::Runtime(e.into()))?;

        log::info!("engine started with {} camera(s)", cameras.len());
        Ok(Self {
            public_dir: cfg.public_path,
            evidence_dir: cfg.evidence_path,
            sealer,
            hybrid_mode: cfg.vault.mode == VaultMode::Hybrid,
            cameras,
            shutdown,
            supervisor: Some(supervisor),
        })
    }

    /// Snapshot of every camera's status. Cheap; atomics plus one short
    /// mutex for the flush-error ring.
    pub fn status(&self) -> Vec<StatusSnapshot> {
        self.cameras.iter().map(|c| c.status.snapshot()).collect()
    }

    /// Most recent preview JPEG and sequence number for one camera.
    /// `None` for an unknown index or before the first frame.
    pub fn latest_jpeg(&self, camera_idx: usize) -> Option<(Arc<Vec<u8>>, u64)> {
        self.cameras.get(camera_idx)?.slot.latest()
    }

    pub fn list_public(&self) -> Result<Vec<RecordingEntry>> {
        list_recordings(&self.public_dir, public_pattern())
    }

    pub fn list_evidence(&self) -> Result<Vec<RecordingEntry>> {
        list_recordings(&self.evidence_dir, evidence_pattern())
    }

    /// Decrypt one evidence container by file name (the authenticated
    /// decryption path behind `POST /decrypt`). The name must be a plain
    /// file name inside the evidence root.
    pub fn decrypt(&self, file_name: &str) -> Result<DecryptedEvidence> {
        let sanitized = sanitize_file_name(file_name)?;
        let path = self.evidence_dir.join(sanitized);
        let container = fs::read(&path)
            .map_err(|e| anyhow!("cannot read evidence file {}: {}", path.display(), e))?;
        if hybrid::is_hybrid(&container) && !self.hybrid_mode {
            return Err(anyhow!(
                "evidence file is a hybrid container; configure the RSA vault to decrypt it"
            ));
        }
        let decrypted = self.sealer.decrypt(&container)?;
        let package = evidence::decode_package(&decrypted.payload)?;
        Ok(DecryptedEvidence {
            package,
            fingerprint: decrypted.fingerprint,
        })
    }

    /// Signal all workers, wait for them to drain, stop the supervisor.
    /// Best-effort: teardown errors are logged, not returned.
    pub fn stop(mut self) {
        log::info!("engine stopping");
        self.shutdown.store(true, Ordering::Release);
        for camera in &mut self.cameras {
            if let Some(worker) = camera.worker.take() {
                if worker.join().is_err() {
                    log::error!("camera worker panicked during shutdown");
                }
            }
        }
        if let Some(supervisor) = self.supervisor.take() {
            if supervisor.join().is_err() {
                log::error!("supervisor panicked during shutdown");
            }
        }
        log::info!("engine stopped");
        // Vault key zeroization happens when the last sealer reference
        // drops with the engine.
    }
}

/// Decoded evidence returned by the decrypt path.
pub struct DecryptedEvidence {
    pub package: EvidencePackage,
    pub fingerprint: String,
}

/// One recording on disk, parsed from the directory listing.
#[derive(Clone, Debug, Serialize)]
pub struct RecordingEntry {
    pub file_name: String,
    pub camera_tag: String,
    /// Normalized compact `YYYYMMDDHHMMSS` stamp.
    pub timestamp: String,
    pub size_bytes: u64,
    /// Flush sequence number; evidence files only.
    pub seq: Option<u32>,
}

fn supervise(janitor: StorageJanitor, shutdown: Arc<AtomicBool>) {
    let mut last_run: Option<Instant> = None;
    while !shutdown.load(Ordering::Acquire) {
        let due = last_run.map(|t| t.elapsed() >= JANITOR_INTERVAL).unwrap_or(true);
        if due {
            match janitor.enforce() {
                Ok(0) => {}
                Ok(n) => log::info!("storage janitor removed {} file(s)", n),
                Err(e) => log::warn!("storage janitor failed: {}", e),
            }
            last_run = Some(Instant::now());
        }
        thread::sleep(Duration::from_millis(200));
    }
}

fn public_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^public_([A-Za-z0-9-]+)_(\d{8}_?\d{6})\.(?:mp4|avi)$").unwrap()
    })
}

fn evidence_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^evidence_([A-Za-z0-9-]+)_(\d{8}_?\d{6})_(\d{4})\.enc$").unwrap()
    })
}

fn list_recordings(dir: &Path, pattern: &Regex) -> Result<Vec<RecordingEntry>> {
    let mut entries = Vec::new();
    let read_dir = match fs::read_dir(dir) {
        Ok(read_dir) => read_dir,
        Err(_) => return Ok(entries), // nothing recorded yet
    };
    for entry in read_dir.flatten() {
        let file_name = entry.file_name().to_string_lossy().into_owned();
        let (camera_tag, timestamp, seq) = {
            let Some(captures) = pattern.captures(&file_name) else {
                continue;
            };
            let raw_ts = &captures[2];
            if crate::parse_segment_timestamp(raw_ts).is_none() {
                continue;
            }
            let timestamp: String = raw_ts.chars().filter(|c| *c != '_').collect();
            let seq = captures.get(3).and_then(|m| m.as_str().parse().ok());
            (captures[1].to_string(), timestamp, seq)
        };
        let size_bytes = entry.metadata().map(|m| m.len()).unwrap_or(0);
        entries.push(RecordingEntry {
            camera_tag,
            timestamp,
            file_name,
            size_bytes,
            seq,
        });
    }
    entries.sort_by(|a, b| {
        (&a.timestamp, &a.file_name).cmp(&(&b.timestamp, &b.file_name))
    });
    Ok(entries)
}

fn sanitize_file_name(name: &str) -> Result<&str> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(anyhow!("evidence file name cannot be empty"));
    }
    if trimmed.contains('/') || trimmed.contains('\\') || trimmed.contains("..") {
        return Err(anyhow!("evidence file name must be a plain file name"));
    }
    Ok(trimmed)
}
