//! Built-in detector backends for demos and tests.

use std::collections::VecDeque;

use anyhow::Result;

use crate::frame::{Detection, Frame};

use super::Detector;

/// Emits one centered face box every `period` frames.
///
/// Used by the daemon when no real model is wired in, so the full
/// dual-path pipeline (blur, evidence, pairing) can be exercised end to end
/// without camera hardware or a model file.
pub struct PeriodicDetector {
    period: u64,
    frame_count: u64,
    confidence: f32,
}

impl PeriodicDetector {
    pub fn new(period: u64) -> Self {
        Self {
            period: period.max(1),
            frame_count: 0,
            confidence: 0.9,
        }
    }
}

impl Detector for PeriodicDetector {
    fn name(&self) -> &'static str {
        "periodic"
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        self.frame_count += 1;
        if !self.frame_count.is_multiple_of(self.period) {
            return Ok(vec![]);
        }
        let w = frame.width as i32;
        let h = frame.height as i32;
        Ok(vec![Detection::face(
            w / 3,
            h / 3,
            2 * w / 3,
            2 * h / 3,
            self.confidence,
            frame.ts.epoch_s,
        )])
    }
}

/// Replays a fixed per-frame detection script, then returns nothing.
pub struct ScriptedDetector {
    script: VecDeque<Vec<Detection>>,
}

impl ScriptedDetector {
    pub fn new(script: Vec<Vec<Detection>>) -> Self {
        Self {
            script: script.into(),
        }
    }
}

impl Detector for ScriptedDetector {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        let mut detections = self.script.pop_front().unwrap_or_default();
        for det in &mut detections {
            det.ts = frame.ts.epoch_s;
        }
        Ok(detections)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::CaptureTs;

    fn frame() -> Frame {
        Frame::new(vec![0u8; 12 * 12 * 3], 12, 12, CaptureTs::now()).unwrap()
    }

    #[test]
    fn periodic_detector_fires_on_period() {
        let mut det = PeriodicDetector::new(3);
        let f = frame();
        assert!(det.detect(&f).unwrap().is_empty());
        assert!(det.detect(&f).unwrap().is_empty());
        assert_eq!(det.detect(&f).unwrap().len(), 1);
        assert!(det.detect(&f).unwrap().is_empty());
    }

    #[test]
    fn periodic_box_stays_in_bounds() {
        let mut det = PeriodicDetector::new(1);
        let f = frame();
        let dets = det.detect(&f).unwrap();
        assert!(dets[0].in_bounds(f.width, f.height));
    }

    #[test]
    fn scripted_detector_replays_then_goes_quiet() {
        let mut det = ScriptedDetector::new(vec![
            vec![],
            vec![Detection::face(0, 0, 4, 4, 0.9, 0.0)],
        ]);
        let f = frame();
        assert!(det.detect(&f).unwrap().is_empty());
        assert_eq!(det.detect(&f).unwrap().len(), 1);
        assert!(det.detect(&f).unwrap().is_empty());
    }
}
