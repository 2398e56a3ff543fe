//! Time-sliced public segment recorder.
//!
//! `write` appends blurred frames to the open segment and rotates when the
//! wall-clock window elapses. Rotation hands the finished encoder to a
//! background finalization worker and opens the next encoder synchronously,
//! so `write` never blocks on container finalization. A sidecar JSON with
//! `{frame_count, detections_per_second}` is written next to each finished
//! segment.

use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use anyhow::{anyhow, Result};
use serde::Serialize;

use crate::frame::{Detection, Frame};

use super::{CodecId, Encoder, EncoderRegistry, CODEC_PREFERENCE};

#[derive(Clone, Debug)]
pub struct RecorderConfig {
    pub dir: PathBuf,
    pub camera_tag: String,
    pub segment_seconds: u64,
    pub target_fps: u32,
    pub width: u32,
    pub height: u32,
}

#[derive(Serialize)]
struct SegmentSidecar {
    frame_count: u64,
    detections_per_second: f64,
}

struct OpenSegment {
    encoder: Box<dyn Encoder>,
    codec: CodecId,
    path: PathBuf,
    /// Compact wall-clock stamp the segment (and its evidence pair) carries.
    timestamp: String,
    opened_at: Instant,
    frame_count: u64,
    detection_total: u64,
}

struct FinalizeJob {
    encoder: Box<dyn Encoder>,
    path: PathBuf,
    frame_count: u64,
    detection_total: u64,
    duration_s: f64,
}

pub struct PublicRecorder {
    cfg: RecorderConfig,
    registry: Arc<EncoderRegistry>,
    segment: Option<OpenSegment>,
    finalize_tx: Option<Sender<FinalizeJob>>,
    finalize_worker: Option<JoinHandle<()>>,
    write_errors: Arc<AtomicU64>,
}

impl PublicRecorder {
    pub fn new(cfg: RecorderConfig, registry: Arc<EncoderRegistry>) -> Result<Self> {
        fs::create_dir_all(&cfg.dir)?;
        let (tx, rx) = mpsc::channel::<FinalizeJob>();
        let worker = thread::Builder::new()
            .name(format!("recorder-{}", cfg.camera_tag))
            .spawn(move || {
                while let Ok(job) = rx.recv() {
                    finalize_segment(job);
                }
            })?;
        Ok(Self {
            cfg,
            registry,
            segment: None,
            finalize_tx: Some(tx),
            finalize_worker: Some(worker),
            write_errors: Arc::new(AtomicU64::new(0)),
        })
    }

    pub fn write_errors(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.write_errors)
    }

    /// Wall-clock stamp of the currently open segment, shared with the
    /// evidence manager for filename pairing. `None` before the first write.
    pub fn segment_timestamp(&self) -> Option<&str> {
        self.segment.as_ref().map(|s| s.timestamp.as_str())
    }

    pub fn write(&mut self, blurred: &Frame, detections: &[Detection]) -> Result<()> {
        if self
            .segment
            .as_ref()
            .is_some_and(|s| s.opened_at.elapsed().as_secs() >= self.cfg.segment_seconds)
        {
            self.rotate();
        }
        if self.segment.is_none() {
            self.segment = Some(self.open_segment()?);
        }

        let segment = self.segment.as_mut().expect("segment opened above");
        match segment.encoder.write_frame(blurred) {
            Ok(()) => {
                segment.frame_count += 1;
                segment.detection_total += detections.len() as u64;
                Ok(())
            }
            Err(e) => {
                // Close the wounded encoder, reopen with a fresh timestamp,
                // and retry this frame once so it is not dropped silently.
                self.write_errors.fetch_add(1, Ordering::Relaxed);
                log::warn!(
                    "encoder write failed on {}: {}; reopening segment",
                    self.cfg.camera_tag,
                    e
                );
                self.rotate();
                let segment = match self.open_segment() {
                    Ok(s) => {
                        self.segment = Some(s);
                        self.segment.as_mut().expect("just set")
                    }
                    Err(open_err) => {
                        self.write_errors.fetch_add(1, Ordering::Relaxed);
                        return Err(open_err);
                    }
                };
                match segment.encoder.write_frame(blurred) {
                    Ok(()) => {
                        segment.frame_count += 1;
                        segment.detection_total += detections.len() as u64;
                        Ok(())
                    }
                    Err(retry_err) => {
                        self.write_errors.fetch_add(1, Ordering::Relaxed);
                        Err(retry_err)
                    }
                }
            }
        }
    }

    /// Hand the open segment to the finalize worker. Never blocks on
    /// container finalization.
    fn rotate(&mut self) {
        let Some(segment) = self.segment.take() else {
            return;
        };
        let duration_s = segment.opened_at.elapsed().as_secs_f64();
        log::debug!(
            "rotating segment {} ({}, {} frames, {:.1}s)",
            segment.path.display(),
            segment.codec,
            segment.frame_count,
            duration_s
        );
        let job = FinalizeJob {
            encoder: segment.encoder,
            path: segment.path,
            frame_count: segment.frame_count,
            detection_total: segment.detection_total,
            duration_s,
        };
        if let Some(tx) = &self.finalize_tx {
            if tx.send(job).is_err() {
                log::error!(
                    "finalize worker gone on {}; segment left unfinalized",
                    self.cfg.camera_tag
                );
            }
        }
    }

    /// Walk the codec preference ladder; the first codec with a registered
    /// factory that opens successfully wins the segment.
    fn open_segment(&self) -> Result<OpenSegment> {
        let mut timestamp = crate::compact_timestamp_now();
        let mut last_err = anyhow!("no encoder factory registered");
        for codec in CODEC_PREFERENCE {
            let Some(factory) = self.registry.factory_for(codec) else {
                continue;
            };
            // A mid-segment reopen within the same wall-clock second would
            // collide with the wounded segment's file.
            let mut path = self.segment_path(&timestamp, factory.container_ext());
            while path.exists() {
                timestamp = bump_timestamp(&timestamp);
                path = self.segment_path(&timestamp, factory.container_ext());
            }
            match factory.open(&path, self.cfg.width, self.cfg.height, self.cfg.target_fps) {
                Ok(encoder) => {
                    log::info!(
                        "opened public segment {} with codec {}",
                        path.display(),
                        codec
                    );
                    return Ok(OpenSegment {
                        encoder,
                        codec,
                        path,
                        timestamp: timestamp.clone(),
                        opened_at: Instant::now(),
                        frame_count: 0,
                        detection_total: 0,
                    });
                }
                Err(e) => {
                    log::debug!("codec {} unavailable for {}: {}", codec, self.cfg.camera_tag, e);
                    last_err = e;
                }
            }
        }
        Err(anyhow!("no codec could open a segment: {}", last_err))
    }

    fn segment_path(&self, timestamp: &str, ext: &str) -> PathBuf {
        self.cfg.dir.join(format!(
            "public_{}_{}.{}",
            self.cfg.camera_tag, timestamp, ext
        ))
    }

    /// Finalize the open segment and stop the background worker. Called
    /// synchronously from engine shutdown. Idempotent.
    pub fn close(&mut self) -> Result<()> {
        self.rotate();
        self.finalize_tx.take();
        if let Some(worker) = self.finalize_worker.take() {
            worker
                .join()
                .map_err(|_| anyhow!("recorder finalize worker panicked"))?;
        }
        Ok(())
    }
}

fn bump_timestamp(timestamp: &str) -> String {
    match crate::parse_segment_timestamp(timestamp) {
        Some(dt) => (dt + chrono::Duration::seconds(1))
            .format("%Y%m%d%H%M%S")
            .to_string(),
        None => timestamp.to_string(),
    }
}

fn finalize_segment(job: FinalizeJob) {
    let path = job.path.clone();
    if let Err(e) = job.encoder.finish() {
        log::error!("segment finalize failed for {}: {}", path.display(), e);
        return;
    }
    let sidecar = SegmentSidecar {
        frame_count: job.frame_count,
        detections_per_second: if job.duration_s > 0.0 {
            job.detection_total as f64 / job.duration_s
        } else {
            0.0
        },
    };
    let sidecar_path = path.with_extension("json");
    match serde_json::to_vec_pretty(&sidecar) {
        Ok(bytes) => {
            if let Err(e) = fs::write(&sidecar_path, bytes) {
                log::warn!("sidecar write failed for {}: {}", sidecar_path.display(), e);
            }
        }
        Err(e) => log::warn!("sidecar encode failed: {}", e),
    }
    log::debug!(
        "public segment finalized: {} ({} frames)",
        path.display(),
        job.frame_count
    );
}
