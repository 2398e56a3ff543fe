//! Frame and detection types shared across the pipeline.
//!
//! A `Frame` is a fixed-resolution RGB24 raster owned by exactly one camera
//! worker. Frames carry a paired wall-clock/monotonic capture timestamp: the
//! wall clock is what ends up in filenames and evidence payloads, the
//! monotonic instant drives segment rotation and fps estimation.

use std::time::{Instant, SystemTime, UNIX_EPOCH};

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

/// Class id for face detections in the evidence wire format.
pub const CLASS_FACE: u8 = 0;

/// Paired capture timestamp: wall clock for durable artifacts, monotonic
/// instant for elapsed-time decisions.
#[derive(Clone, Copy, Debug)]
pub struct CaptureTs {
    pub epoch_s: f64,
    pub instant: Instant,
}

impl CaptureTs {
    pub fn now() -> Self {
        let epoch_s = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);
        Self {
            epoch_s,
            instant: Instant::now(),
        }
    }

    /// Test constructor with an explicit wall-clock value.
    pub fn at_epoch(epoch_s: f64) -> Self {
        Self {
            epoch_s,
            instant: Instant::now(),
        }
    }
}

/// Decoded RGB24 frame.
pub struct Frame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub ts: CaptureTs,
}

impl Frame {
    pub fn new(data: Vec<u8>, width: u32, height: u32, ts: CaptureTs) -> Result<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(3))
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
        if data.len() != expected {
            return Err(anyhow!(
                "frame length mismatch: expected {}, got {}",
                expected,
                data.len()
            ));
        }
        Ok(Self {
            data,
            width,
            height,
            ts,
        })
    }

    /// Independent pixel copy sharing the capture timestamp.
    pub fn duplicate(&self) -> Self {
        Self {
            data: self.data.clone(),
            width: self.width,
            height: self.height,
            ts: self.ts,
        }
    }

    /// Encode this frame as JPEG at the given quality (1..=100).
    pub fn to_jpeg(&self, quality: u8) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        let mut encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut out, quality);
        encoder.encode(
            &self.data,
            self.width,
            self.height,
            image::ExtendedColorType::Rgb8,
        )?;
        Ok(out)
    }
}

/// A face bounding box in frame pixel space.
///
/// Invariant: `0 <= x1 < x2 <= width` and `0 <= y1 < y2 <= height` of the
/// frame it was produced from; `confidence` is at least the configured
/// threshold once the detection leaves the processor.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
    pub confidence: f32,
    pub class_id: u8,
    pub ts: f64,
}

impl Detection {
    pub fn face(x1: i32, y1: i32, x2: i32, y2: i32, confidence: f32, ts: f64) -> Self {
        Self {
            x1,
            y1,
            x2,
            y2,
            confidence,
            class_id: CLASS_FACE,
            ts,
        }
    }

    pub fn width(&self) -> i32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> i32 {
        self.y2 - self.y1
    }

    pub fn area(&self) -> f32 {
        (self.width().max(0) as f32) * (self.height().max(0) as f32)
    }

    /// Intersection-over-union with another box.
    pub fn iou(&self, other: &Detection) -> f32 {
        let ix1 = self.x1.max(other.x1);
        let iy1 = self.y1.max(other.y1);
        let ix2 = self.x2.min(other.x2);
        let iy2 = self.y2.min(other.y2);
        let iw = (ix2 - ix1).max(0) as f32;
        let ih = (iy2 - iy1).max(0) as f32;
        let inter = iw * ih;
        let union = self.area() + other.area() - inter;
        if union <= 0.0 {
            0.0
        } else {
            inter / union
        }
    }

    /// Check the pixel-space invariant against frame bounds.
    pub fn in_bounds(&self, width: u32, height: u32) -> bool {
        self.x1 >= 0
            && self.y1 >= 0
            && self.x1 < self.x2
            && self.y1 < self.y2
            && self.x2 <= width as i32
            && self.y2 <= height as i32
    }
}

/// One evidence record: the pre-blur frame encoded as JPEG plus the
/// detections that frame produced.
#[derive(Clone, Debug)]
pub struct FrameRecord {
    pub jpeg: Vec<u8>,
    pub detections: Vec<Detection>,
    pub ts: f64,
}

/// Segment metadata carried inside the evidence payload.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SegmentMeta {
    pub frame_count: u32,
    pub start_ts: f64,
    pub end_ts: f64,
    pub total_detections: u32,
    pub camera_id: String,
}
