//! Face detector capability.
//!
//! The detector model itself is an external collaborator; this module owns
//! the narrow trait the pipeline consumes, the shared wrapper that lets N
//! camera workers use one detector instance, and the confidence/NMS
//! post-filtering applied to raw model output.

use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};

use crate::frame::{Detection, Frame};

pub mod stub;

pub use stub::{PeriodicDetector, ScriptedDetector};

/// Detector backend trait.
///
/// `detect` takes `&mut self` so implementations may keep model state
/// between frames. Implementations must treat the frame as read-only and
/// must not retain pixel data beyond the call.
pub trait Detector: Send {
    fn name(&self) -> &'static str;

    /// Raw detections for one frame, before confidence filtering and NMS.
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>>;
}

/// One detector instance shared by every camera worker.
///
/// Wrapped in a `Mutex` because `Detector::detect` takes `&mut self`;
/// workers treat detection as a short critical section.
#[derive(Clone)]
pub struct SharedDetector {
    inner: Arc<Mutex<dyn Detector>>,
}

impl SharedDetector {
    pub fn new<D: Detector + 'static>(detector: D) -> Self {
        Self {
            inner: Arc::new(Mutex::new(detector)),
        }
    }

    pub fn detect(&self, frame: &Frame) -> Result<Vec<Detection>> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|_| anyhow!("detector lock poisoned"))?;
        guard.detect(frame)
    }

    pub fn name(&self) -> Result<&'static str> {
        let guard = self
            .inner
            .lock()
            .map_err(|_| anyhow!("detector lock poisoned"))?;
        Ok(guard.name())
    }
}

/// Execution target for the detector model.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DevicePreference {
    Cpu,
    Cuda,
}

impl std::str::FromStr for DevicePreference {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cpu" => Ok(DevicePreference::Cpu),
            "cuda" => Ok(DevicePreference::Cuda),
            other => Err(anyhow!("unknown detector device: {}", other)),
        }
    }
}

impl std::fmt::Display for DevicePreference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DevicePreference::Cpu => write!(f, "cpu"),
            DevicePreference::Cuda => write!(f, "cuda"),
        }
    }
}

/// Resolve the requested device against what is actually available.
/// Detector backends report CUDA availability; the in-tree backends are
/// CPU-only, so a CUDA request falls back with a warning.
pub fn select_device(requested: DevicePreference, cuda_available: bool) -> DevicePreference {
    match requested {
        DevicePreference::Cuda if !cuda_available => {
            log::warn!("cuda requested but unavailable, falling back to cpu");
            DevicePreference::Cpu
        }
        other => other,
    }
}

/// Confidence filter followed by greedy non-maximum suppression.
pub fn filter_detections(
    mut detections: Vec<Detection>,
    confidence_threshold: f32,
    iou_threshold: f32,
) -> Vec<Detection> {
    detections.retain(|d| d.confidence >= confidence_threshold);
    detections.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut kept: Vec<Detection> = Vec::with_capacity(detections.len());
    for det in detections {
        if kept.iter().all(|k| k.iou(&det) < iou_threshold) {
            kept.push(det);
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_drops_below_threshold() {
        let dets = vec![
            Detection::face(0, 0, 10, 10, 0.2, 0.0),
            Detection::face(50, 50, 60, 60, 0.8, 0.0),
        ];
        let kept = filter_detections(dets, 0.35, 0.45);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].x1, 50);
    }

    #[test]
    fn nms_suppresses_overlapping_lower_confidence_box() {
        let dets = vec![
            Detection::face(0, 0, 100, 100, 0.7, 0.0),
            Detection::face(5, 5, 105, 105, 0.9, 0.0),
            Detection::face(300, 300, 340, 340, 0.6, 0.0),
        ];
        let kept = filter_detections(dets, 0.35, 0.45);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].confidence, 0.9);
        assert_eq!(kept[1].x1, 300);
    }

    #[test]
    fn cuda_falls_back_to_cpu_when_unavailable() {
        assert_eq!(
            select_device(DevicePreference::Cuda, false),
            DevicePreference::Cpu
        );
        assert_eq!(
            select_device(DevicePreference::Cuda, true),
            DevicePreference::Cuda
        );
        assert_eq!(
            select_device(DevicePreference::Cpu, true),
            DevicePreference::Cpu
        );
    }

    #[test]
    fn shared_detector_serializes_access() {
        let shared = SharedDetector::new(ScriptedDetector::new(vec![vec![
            Detection::face(1, 1, 5, 5, 0.9, 0.0),
        ]]));
        let frame = Frame::new(
            vec![0u8; 4 * 4 * 3],
            4,
            4,
            crate::frame::CaptureTs::now(),
        )
        .unwrap();
        assert_eq!(shared.detect(&frame).unwrap().len(), 1);
        assert_eq!(shared.detect(&frame).unwrap().len(), 0);
    }
}
