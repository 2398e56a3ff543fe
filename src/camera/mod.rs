//! Per-camera worker loop.
//!
//! Each camera gets a dedicated thread running the state machine:
//!
//! ```text
//! Connecting ──open_ok──► Online
//! Connecting ──open_fail──► Connecting (backoff)
//! Online     ──read_fail_n_in_row──► Offline
//! Online     ──frame_ok──► Online (produce)
//! Offline    ──reopen_timer──► Connecting
//! Any        ──shutdown_signal──► Draining ──► Stopped
//! ```
//!
//! In `Online`, each tick reads one frame, normalizes it to the canonical
//! resolution, runs detection + blur, fans out to the public recorder and
//! the evidence manager, refreshes the preview slot, and updates status.
//! Transient failures never leave the worker; they only move it through the
//! state machine and bump counters.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::evidence::EvidenceManager;
use crate::ingest::{normalize::normalize_frame, FrameSource};
use crate::process::Processor;
use crate::record::PublicRecorder;

pub mod status;

pub use status::{CameraState, CameraStatus, LatestFrameSlot, StatusSnapshot};

/// Smoothing factor for the fps EWMA.
const FPS_ALPHA: f64 = 0.1;

#[derive(Clone, Debug)]
pub struct WorkerConfig {
    pub index: usize,
    pub resolution: (u32, u32),
    pub read_timeout: Duration,
    /// Consecutive read failures before going offline.
    pub max_read_failures: u32,
    pub backoff_initial: Duration,
    pub backoff_cap: Duration,
    pub preview_quality: u8,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            index: 0,
            resolution: (1280, 720),
            read_timeout: Duration::from_secs(2),
            max_read_failures: 5,
            backoff_initial: Duration::from_secs(1),
            backoff_cap: Duration::from_secs(30),
            preview_quality: 80,
        }
    }
}

pub struct CameraWorker;

impl CameraWorker {
    #[allow(clippy::too_many_arguments)]
    pub fn spawn(
        cfg: WorkerConfig,
        source: Box<dyn FrameSource>,
        processor: Processor,
        recorder: PublicRecorder,
        evidence: EvidenceManager,
        slot: Arc<LatestFrameSlot>,
        camera_status: Arc<CameraStatus>,
        shutdown: Arc<AtomicBool>,
    ) -> std::io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name(format!("camera-{}", cfg.index))
            .spawn(move || {
                run(
                    cfg,
                    source,
                    processor,
                    recorder,
                    evidence,
                    slot,
                    camera_status,
                    shutdown,
                )
            })
    }
}

#[allow(clippy::too_many_arguments)]
fn run(
    cfg: WorkerConfig,
    mut source: Box<dyn FrameSource>,
    processor: Processor,
    mut recorder: PublicRecorder,
    mut evidence: EvidenceManager,
    slot: Arc<LatestFrameSlot>,
    camera_status: Arc<CameraStatus>,
    shutdown: Arc<AtomicBool>,
) {
    let mut backoff = cfg.backoff_initial;
    let mut last_frame_at: Option<Instant> = None;
    let mut fps_ewma = 0.0f64;

    'lifecycle: while !shutdown.load(Ordering::Acquire) {
        camera_status.set_state(CameraState::Connecting);
        if let Err(e) = source.open() {
            log::warn!(
                "camera {}: open failed ({}); retrying in {:?}",
                cfg.index,
                e,
                backoff
            );
            sleep_interruptible(backoff, &shutdown);
            backoff = (backoff * 2).min(cfg.backoff_cap);
            continue;
        }
        log::info!("camera {}: online ({})", cfg.index, source.describe());
        camera_status.set_state(CameraState::Online);
        let mut consecutive_failures = 0u32;

        while !shutdown.load(Ordering::Acquire) {
            let frame = match source.read(cfg.read_timeout) {
                Ok(frame) => frame,
                Err(e) => {
                    consecutive_failures += 1;
                    log::debug!(
                        "camera {}: read failed ({}/{}): {}",
                        cfg.index,
                        consecutive_failures,
                        cfg.max_read_failures,
                        e
                    );
                    if consecutive_failures >= cfg.max_read_failures {
                        log::warn!(
                            "camera {}: {} consecutive read failures, going offline",
                            cfg.index,
                            consecutive_failures
                        );
                        camera_status.set_state(CameraState::Offline);
                        source.close();
                        sleep_interruptible(backoff, &shutdown);
                        backoff = (backoff * 2).min(cfg.backoff_cap);
                        continue 'lifecycle;
                    }
                    continue;
                }
            };
            consecutive_failures = 0;
            backoff = cfg.backoff_initial;

            let frame = match normalize_frame(frame, cfg.resolution.0, cfg.resolution.1) {
                Ok(frame) => frame,
                Err(e) => {
                    log::warn!("camera {}: dropped unnormalizable frame: {}", cfg.index, e);
                    continue;
                }
            };

            let processed = match processor.process(&frame) {
                Ok(processed) => processed,
                Err(e) => {
                    log::error!("camera {}: detection failed: {}", cfg.index, e);
                    continue;
                }
            };

            if let Err(e) = recorder.write(&processed.blurred, &processed.detections) {
                // Already counted in write_errors; the recorder reopened.
                log::debug!("camera {}: public write failed: {}", cfg.index, e);
            }
            if let Some(ts) = recorder.segment_timestamp() {
                evidence.set_sync_timestamp(ts);
            }
            if let Err(e) = evidence.add_frame(&frame, &processed.detections) {
                log::error!("camera {}: evidence enqueue failed: {}", cfg.index, e);
            }

            match processed.blurred.to_jpeg(cfg.preview_quality) {
                Ok(jpeg) => {
                    slot.store(jpeg);
                }
                Err(e) => log::warn!("camera {}: preview encode failed: {}", cfg.index, e),
            }

            let now = Instant::now();
            if let Some(prev) = last_frame_at {
                let dt = now.duration_since(prev).as_secs_f64();
                if dt > 0.0 {
                    fps_ewma = FPS_ALPHA * (1.0 / dt) + (1.0 - FPS_ALPHA) * fps_ewma;
                }
            }
            last_frame_at = Some(now);
            camera_status.record_frame(fps_ewma, processed.detections.len(), frame.ts.epoch_s);
        }
    }

    camera_status.set_state(CameraState::Draining);
    source.close();
    if let Err(e) = recorder.close() {
        log::error!("camera {}: recorder close failed: {}", cfg.index, e);
    }
    if let Err(e) = evidence.close() {
        log::error!("camera {}: evidence close failed: {}", cfg.index, e);
    }
    camera_status.set_state(CameraState::Stopped);
    log::info!("camera {}: stopped", cfg.index);
}

/// Sleep in short slices so shutdown stays responsive mid-backoff.
fn sleep_interruptible(total: Duration, shutdown: &AtomicBool) {
    let slice = Duration::from_millis(100);
    let deadline = Instant::now() + total;
    while !shutdown.load(Ordering::Acquire) {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        thread::sleep(slice.min(remaining));
    }
}
