//! Per-camera status and the latest-frame preview slot.
//!
//! Counters are atomics so `Engine::status()` snapshots are cheap and never
//! contend with the worker's hot loop. The preview slot is newest-wins: a
//! slow HTTP consumer can never back-pressure the worker.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

use serde::Serialize;

use crate::evidence::EvidenceStats;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraState {
    Connecting,
    Online,
    Offline,
    Draining,
    Stopped,
}

impl CameraState {
    fn as_u8(self) -> u8 {
        match self {
            CameraState::Connecting => 0,
            CameraState::Online => 1,
            CameraState::Offline => 2,
            CameraState::Draining => 3,
            CameraState::Stopped => 4,
        }
    }

    fn from_u8(v: u8) -> Self {
        match v {
            0 => CameraState::Connecting,
            1 => CameraState::Online,
            2 => CameraState::Offline,
            3 => CameraState::Draining,
            _ => CameraState::Stopped,
        }
    }

    /// External surface shows only connecting/online/offline; the teardown
    /// states read as offline.
    fn public(self) -> CameraState {
        match self {
            CameraState::Draining | CameraState::Stopped => CameraState::Offline,
            other => other,
        }
    }
}

pub struct CameraStatus {
    pub index: usize,
    pub source: String,
    state: AtomicU8,
    fps_bits: AtomicU64,
    last_detection_count: AtomicU64,
    last_frame_ts_bits: AtomicU64,
    write_errors: Arc<AtomicU64>,
    evidence: Arc<EvidenceStats>,
}

impl CameraStatus {
    pub fn new(
        index: usize,
        source: String,
        write_errors: Arc<AtomicU64>,
        evidence: Arc<EvidenceStats>,
    ) -> Self {
        Self {
            index,
            source,
            state: AtomicU8::new(CameraState::Connecting.as_u8()),
            fps_bits: AtomicU64::new(0f64.to_bits()),
            last_detection_count: AtomicU64::new(0),
            last_frame_ts_bits: AtomicU64::new(0f64.to_bits()),
            write_errors,
            evidence,
        }
    }

    pub fn set_state(&self, state: CameraState) {
        self.state.store(state.as_u8(), Ordering::Release);
    }

    pub fn state(&self) -> CameraState {
        CameraState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn record_frame(&self, fps_ewma: f64, detection_count: usize, frame_ts: f64) {
        self.fps_bits.store(fps_ewma.to_bits(), Ordering::Relaxed);
        self.last_detection_count
            .store(detection_count as u64, Ordering::Relaxed);
        self.last_frame_ts_bits
            .store(frame_ts.to_bits(), Ordering::Relaxed);
    }

    pub fn fps_ewma(&self) -> f64 {
        f64::from_bits(self.fps_bits.load(Ordering::Relaxed))
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            index: self.index,
            source: self.source.clone(),
            state: self.state().public(),
            fps_ewma: self.fps_ewma(),
            last_detection_count: self.last_detection_count.load(Ordering::Relaxed),
            last_frame_ts: f64::from_bits(self.last_frame_ts_bits.load(Ordering::Relaxed)),
            write_errors: self.write_errors.load(Ordering::Relaxed),
            evidence_drops: self.evidence.drops.load(Ordering::Relaxed),
            evidence_flush_errors: self.evidence.flush_errors.load(Ordering::Relaxed),
            evidence_flushed_segments: self.evidence.flushed_segments.load(Ordering::Relaxed),
            recent_flush_errors: self.evidence.recent_error_snapshot(),
        }
    }
}

/// Point-in-time view served to the HTTP surface.
#[derive(Clone, Debug, Serialize)]
pub struct StatusSnapshot {
    pub index: usize,
    pub source: String,
    pub state: CameraState,
    pub fps_ewma: f64,
    pub last_detection_count: u64,
    pub last_frame_ts: f64,
    pub write_errors: u64,
    pub evidence_drops: u64,
    pub evidence_flush_errors: u64,
    pub evidence_flushed_segments: u64,
    pub recent_flush_errors: Vec<String>,
}

struct Preview {
    jpeg: Arc<Vec<u8>>,
    seq: u64,
}

/// Single-slot newest-wins preview buffer. The worker overwrites under a
/// short mutex and bumps the sequence number; readers clone the `Arc` and
/// release. Readers always observe a whole frame, never a torn one.
#[derive(Default)]
pub struct LatestFrameSlot {
    inner: Mutex<Option<Preview>>,
}

impl LatestFrameSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(&self, jpeg: Vec<u8>) -> u64 {
        let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let seq = guard.as_ref().map(|p| p.seq + 1).unwrap_or(1);
        *guard = Some(Preview {
            jpeg: Arc::new(jpeg),
            seq,
        });
        seq
    }

    /// Most recent preview and its sequence number; `None` until the worker
    /// produces its first frame.
    pub fn latest(&self) -> Option<(Arc<Vec<u8>>, u64)> {
        let guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        guard.as_ref().map(|p| (Arc::clone(&p.jpeg), p.seq))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status() -> CameraStatus {
        CameraStatus::new(
            0,
            "device:0".to_string(),
            Arc::new(AtomicU64::new(0)),
            Arc::new(EvidenceStats::default()),
        )
    }

    #[test]
    fn teardown_states_read_as_offline() {
        let s = status();
        s.set_state(CameraState::Draining);
        assert_eq!(s.snapshot().state, CameraState::Offline);
        s.set_state(CameraState::Online);
        assert_eq!(s.snapshot().state, CameraState::Online);
    }

    #[test]
    fn slot_is_newest_wins_with_monotonic_seq() {
        let slot = LatestFrameSlot::new();
        assert!(slot.latest().is_none());
        assert_eq!(slot.store(vec![1]), 1);
        assert_eq!(slot.store(vec![2]), 2);
        let (jpeg, seq) = slot.latest().unwrap();
        assert_eq!(*jpeg, vec![2]);
        assert_eq!(seq, 2);
    }

    #[test]
    fn snapshot_carries_frame_stats() {
        let s = status();
        s.record_frame(29.5, 3, 1234.5);
        let snap = s.snapshot();
        assert!((snap.fps_ewma - 29.5).abs() < 1e-9);
        assert_eq!(snap.last_detection_count, 3);
        assert!((snap.last_frame_ts - 1234.5).abs() < 1e-9);
    }
}
