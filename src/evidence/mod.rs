//! Evidence manager: selective buffering with pre-roll and a bounded
//! background flush worker.
//!
//! Raw (pre-blur) frames are JPEG-encoded into `FrameRecord`s and buffered
//! under selective-recording rules. When a segment window expires the buffer
//! is handed to a bounded single-consumer queue; one worker thread per
//! manager serializes, seals through the vault, and writes the container
//! atomically. When the queue is full the oldest queued job is dropped, not
//! the new one: if disk cannot keep up, the most recent window is the one
//! that still reflects the incident.

use std::collections::VecDeque;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};

use crate::frame::{Detection, Frame, FrameRecord, SegmentMeta};
use crate::vault::EvidenceSealer;

pub mod payload;

pub use payload::{decode as decode_package, encode as encode_package, EvidencePackage};

/// Errors kept in the per-camera ring reachable via status.
const ERROR_RING_CAPACITY: usize = 8;

#[derive(Clone, Debug)]
pub struct EvidenceConfig {
    pub dir: PathBuf,
    pub camera_tag: String,
    pub detection_only: bool,
    pub pre_roll_size: usize,
    pub segment_seconds: u64,
    pub flush_queue_capacity: usize,
    pub jpeg_quality: u8,
    /// Hard deadline for draining queued flush jobs at shutdown.
    pub close_deadline: Duration,
}

/// Counters surfaced through `CameraStatus`.
#[derive(Debug, Default)]
pub struct EvidenceStats {
    pub drops: AtomicU64,
    pub flush_errors: AtomicU64,
    pub flushed_segments: AtomicU64,
    pub recent_errors: Mutex<VecDeque<String>>,
}

impl EvidenceStats {
    fn record_error(&self, description: String) {
        self.flush_errors.fetch_add(1, Ordering::Relaxed);
        let mut ring = self.recent_errors.lock().unwrap_or_else(|e| e.into_inner());
        if ring.len() >= ERROR_RING_CAPACITY {
            ring.pop_front();
        }
        ring.push_back(description);
    }

    pub fn recent_error_snapshot(&self) -> Vec<String> {
        self.recent_errors
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect()
    }
}

struct FlushJob {
    records: Vec<FrameRecord>,
    meta: SegmentMeta,
    /// Compact wall-clock stamp shared with the paired public segment.
    sync_ts: String,
    seq: u32,
}

struct QueueState {
    jobs: VecDeque<FlushJob>,
    closing: bool,
    in_flight: bool,
}

/// Bounded single-consumer queue with drop-oldest overflow.
struct FlushQueue {
    state: Mutex<QueueState>,
    cond: Condvar,
    capacity: usize,
}

impl FlushQueue {
    fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(QueueState {
                jobs: VecDeque::new(),
                closing: false,
                in_flight: false,
            }),
            cond: Condvar::new(),
            capacity,
        }
    }

    /// Returns the dropped job's metadata when the queue was full.
    fn push(&self, job: FlushJob) -> Option<SegmentMeta> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let dropped = if state.jobs.len() >= self.capacity {
            state.jobs.pop_front().map(|j| j.meta)
        } else {
            None
        };
        state.jobs.push_back(job);
        self.cond.notify_all();
        dropped
    }

    fn pop(&self) -> Option<FlushJob> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        loop {
            if let Some(job) = state.jobs.pop_front() {
                state.in_flight = true;
                return Some(job);
            }
            if state.closing {
                return None;
            }
            state = self.cond.wait(state).unwrap_or_else(|e| e.into_inner());
        }
    }

    fn job_done(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.in_flight = false;
        self.cond.notify_all();
    }

    fn queued(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .jobs
            .len()
    }

    /// Mark closing, wait for drain up to the deadline, then evict whatever
    /// is left. Returns metadata of jobs abandoned at the deadline.
    fn close_and_drain(&self, deadline: Duration) -> Vec<SegmentMeta> {
        let started = Instant::now();
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.closing = true;
        self.cond.notify_all();
        while !(state.jobs.is_empty() && !state.in_flight) {
            let elapsed = started.elapsed();
            if elapsed >= deadline {
                break;
            }
            let (next, timeout) = self
                .cond
                .wait_timeout(state, deadline - elapsed)
                .unwrap_or_else(|e| e.into_inner());
            state = next;
            if timeout.timed_out() {
                break;
            }
        }
        state.jobs.drain(..).map(|j| j.meta).collect()
    }
}

pub struct EvidenceManager {
    cfg: EvidenceConfig,
    pre_roll: VecDeque<FrameRecord>,
    buffer: Vec<FrameRecord>,
    queue: Arc<FlushQueue>,
    stats: Arc<EvidenceStats>,
    worker: Option<JoinHandle<()>>,
    sync_ts: String,
    seq: u32,
}

impl EvidenceManager {
    pub fn new(cfg: EvidenceConfig, sealer: Arc<dyn EvidenceSealer>) -> Result<Self> {
        fs::create_dir_all(&cfg.dir)?;
        let queue = Arc::new(FlushQueue::new(cfg.flush_queue_capacity.max(1)));
        let stats = Arc::new(EvidenceStats::default());

        let worker_queue = Arc::clone(&queue);
        let worker_stats = Arc::clone(&stats);
        let dir = cfg.dir.clone();
        let tag = cfg.camera_tag.clone();
        let worker = thread::Builder::new()
            .name(format!("evidence-{}", tag))
            .spawn(move || flush_worker(worker_queue, worker_stats, sealer, dir, tag))?;

        let sync_ts = crate::compact_timestamp_now();
        Ok(Self {
            cfg,
            pre_roll: VecDeque::new(),
            buffer: Vec::new(),
            queue,
            stats,
            worker: Some(worker),
            sync_ts,
            seq: 0,
        })
    }

    pub fn stats(&self) -> Arc<EvidenceStats> {
        Arc::clone(&self.stats)
    }

    /// Number of flush jobs currently queued (bounded by capacity).
    pub fn queued_jobs(&self) -> usize {
        self.queue.queued()
    }

    /// Adopt the wall-clock stamp of the public segment that is currently
    /// open, so the next flush pairs with it by filename.
    pub fn set_sync_timestamp(&mut self, ts: &str) {
        if self.sync_ts != ts {
            self.sync_ts = ts.to_string();
        }
    }

    /// Enqueue one raw frame under the selective-recording rules.
    pub fn add_frame(&mut self, raw: &Frame, detections: &[Detection]) -> Result<()> {
        let record = FrameRecord {
            jpeg: raw.to_jpeg(self.cfg.jpeg_quality)?,
            detections: detections.to_vec(),
            ts: raw.ts.epoch_s,
        };
        self.add_record(record);
        Ok(())
    }

    /// Rule engine on pre-built records. Split out so tests can drive the
    /// state machine with explicit timestamps.
    pub fn add_record(&mut self, record: FrameRecord) {
        if !self.cfg.detection_only {
            self.buffer.push(record);
            self.rotate_if_expired();
            return;
        }

        if self.buffer.is_empty() {
            if record.detections.is_empty() {
                self.pre_roll.push_back(record);
                while self.pre_roll.len() > self.cfg.pre_roll_size {
                    self.pre_roll.pop_front();
                }
                return;
            }
            // First detection: prepend the pre-roll context in FIFO order.
            self.buffer.extend(self.pre_roll.drain(..));
        }
        self.buffer.push(record);
        self.rotate_if_expired();
    }

    fn rotate_if_expired(&mut self) {
        let (Some(first), Some(last)) = (self.buffer.first(), self.buffer.last()) else {
            return;
        };
        if last.ts - first.ts >= self.cfg.segment_seconds as f64 {
            self.flush_segment();
        }
    }

    fn flush_segment(&mut self) {
        if self.buffer.is_empty() {
            return;
        }
        let records = std::mem::take(&mut self.buffer);
        let meta = SegmentMeta {
            frame_count: records.len() as u32,
            start_ts: records.first().map(|r| r.ts).unwrap_or(0.0),
            end_ts: records.last().map(|r| r.ts).unwrap_or(0.0),
            total_detections: records.iter().map(|r| r.detections.len() as u32).sum(),
            camera_id: self.cfg.camera_tag.clone(),
        };
        let job = FlushJob {
            records,
            meta,
            sync_ts: self.sync_ts.clone(),
            seq: self.seq,
        };
        self.seq += 1;
        if let Some(dropped) = self.queue.push(job) {
            self.stats.drops.fetch_add(1, Ordering::Relaxed);
            log::warn!(
                "evidence queue full for {}: dropped oldest segment ({} frames, start_ts {:.3})",
                self.cfg.camera_tag,
                dropped.frame_count,
                dropped.start_ts
            );
        }
    }

    /// Flush the active buffer and drain the queue, bounded by the
    /// configured deadline. Idempotent.
    pub fn close(&mut self) -> Result<()> {
        self.flush_segment();
        let abandoned = self.queue.close_and_drain(self.cfg.close_deadline);
        for meta in &abandoned {
            log::error!(
                "evidence drain deadline exceeded for {}: abandoning segment \
                 (camera {}, {} frames, start_ts {:.3}, end_ts {:.3})",
                self.cfg.camera_tag,
                meta.camera_id,
                meta.frame_count,
                meta.start_ts,
                meta.end_ts
            );
        }
        if let Some(worker) = self.worker.take() {
            worker
                .join()
                .map_err(|_| anyhow!("evidence flush worker panicked"))?;
        }
        Ok(())
    }
}

fn flush_worker(
    queue: Arc<FlushQueue>,
    stats: Arc<EvidenceStats>,
    sealer: Arc<dyn EvidenceSealer>,
    dir: PathBuf,
    tag: String,
) {
    while let Some(job) = queue.pop() {
        if let Err(e) = persist_job(&job, sealer.as_ref(), &dir, &tag) {
            stats.record_error(format!(
                "segment seq {:04} ({} frames, start_ts {:.3}): {}",
                job.seq, job.meta.frame_count, job.meta.start_ts, e
            ));
            log::error!("evidence flush failed for {}: {}", tag, e);
        } else {
            stats.flushed_segments.fetch_add(1, Ordering::Relaxed);
        }
        queue.job_done();
    }
}

fn persist_job(job: &FlushJob, sealer: &dyn EvidenceSealer, dir: &Path, tag: &str) -> Result<()> {
    let payload = payload::encode(&job.records, &job.meta)?;
    let meta_json = serde_json::to_string(&job.meta)?;
    let container = sealer.encrypt(&payload, &meta_json)?;

    let final_name = format!("evidence_{}_{}_{:04}.enc", tag, job.sync_ts, job.seq);
    let final_path = dir.join(&final_name);
    let tmp_path = dir.join(format!("{}.tmp", final_name));
    {
        let mut file = File::create(&tmp_path)?;
        file.write_all(&container)?;
        file.sync_all()?;
    }
    fs::rename(&tmp_path, &final_path)?;
    log::debug!(
        "evidence segment persisted: {} ({} frames)",
        final_name,
        job.meta.frame_count
    );
    Ok(())
}
