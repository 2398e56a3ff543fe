//! Detection + anonymization stage.
//!
//! `Processor::process` runs the shared detector on a frame, filters the
//! raw output (confidence threshold, NMS), and produces an independent
//! blurred copy for the public path. The blur is a separable Gaussian
//! applied in place over each detection rectangle expanded by 15% per side
//! and clipped to frame bounds; no original pixels survive inside the
//! blurred region, and overlapping rectangles are harmless (blur of blur is
//! still blurred). The raw frame is returned to the caller untouched.

use anyhow::{anyhow, Result};

use crate::detect::{filter_detections, SharedDetector};
use crate::frame::{Detection, Frame};

/// Expansion applied to each detection rectangle before blurring.
const PAD_RATIO: f32 = 0.15;

#[derive(Clone, Copy, Debug)]
pub struct ProcessorConfig {
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
    pub blur_kernel: usize,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.35,
            iou_threshold: 0.45,
            blur_kernel: 51,
        }
    }
}

pub struct Processed {
    pub blurred: Frame,
    pub detections: Vec<Detection>,
}

pub struct Processor {
    cfg: ProcessorConfig,
    kernel: Vec<f32>,
    detector: SharedDetector,
}

impl Processor {
    pub fn new(cfg: ProcessorConfig, detector: SharedDetector) -> Result<Self> {
        if cfg.blur_kernel < 3 || cfg.blur_kernel % 2 == 0 {
            return Err(anyhow!(
                "blur kernel must be an odd integer >= 3, got {}",
                cfg.blur_kernel
            ));
        }
        Ok(Self {
            kernel: gaussian_kernel(cfg.blur_kernel),
            cfg,
            detector,
        })
    }

    pub fn process(&self, frame: &Frame) -> Result<Processed> {
        let raw = self.detector.detect(frame)?;
        let mut detections = filter_detections(
            raw,
            self.cfg.confidence_threshold,
            self.cfg.iou_threshold,
        );
        detections.retain(|d| d.in_bounds(frame.width, frame.height));

        let mut blurred = frame.duplicate();
        for det in &detections {
            let (x1, y1, x2, y2) = pad_and_clip(det, frame.width, frame.height);
            blur_region(
                &mut blurred.data,
                frame.width as usize,
                &self.kernel,
                x1,
                y1,
                x2,
                y2,
            );
        }
        Ok(Processed {
            blurred,
            detections,
        })
    }
}

fn pad_and_clip(det: &Detection, width: u32, height: u32) -> (usize, usize, usize, usize) {
    let pad_x = (det.width() as f32 * PAD_RATIO).round() as i32;
    let pad_y = (det.height() as f32 * PAD_RATIO).round() as i32;
    let x1 = (det.x1 - pad_x).max(0) as usize;
    let y1 = (det.y1 - pad_y).max(0) as usize;
    let x2 = (det.x2 + pad_x).min(width as i32) as usize;
    let y2 = (det.y2 + pad_y).min(height as i32) as usize;
    (x1, y1, x2, y2)
}

/// Normalized 1-D Gaussian weights for a given odd kernel size.
fn gaussian_kernel(size: usize) -> Vec<f32> {
    let sigma = 0.3 * ((size - 1) as f32 * 0.5 - 1.0) + 0.8;
    let center = (size / 2) as f32;
    let mut weights: Vec<f32> = (0..size)
        .map(|i| {
            let d = i as f32 - center;
            (-d * d / (2.0 * sigma * sigma)).exp()
        })
        .collect();
    let sum: f32 = weights.iter().sum();
    for w in &mut weights {
        *w /= sum;
    }
    weights
}

/// Separable Gaussian over `[x1, x2) x [y1, y2)` of an RGB24 raster.
/// The horizontal pass samples the untouched image (clamped to frame
/// columns); the vertical pass samples the intermediate, clamped to the
/// rectangle's rows.
fn blur_region(
    data: &mut [u8],
    width: usize,
    kernel: &[f32],
    x1: usize,
    y1: usize,
    x2: usize,
    y2: usize,
) {
    if x2 <= x1 || y2 <= y1 {
        return;
    }
    let rw = x2 - x1;
    let rh = y2 - y1;
    let radius = kernel.len() / 2;
    let mut temp = vec![0f32; rw * rh * 3];

    for ry in 0..rh {
        let row = (y1 + ry) * width;
        for rx in 0..rw {
            let mut acc = [0f32; 3];
            for (k, w) in kernel.iter().enumerate() {
                let sx = (x1 + rx + k)
                    .saturating_sub(radius)
                    .min(width - 1);
                let src = (row + sx) * 3;
                acc[0] += w * data[src] as f32;
                acc[1] += w * data[src + 1] as f32;
                acc[2] += w * data[src + 2] as f32;
            }
            let dst = (ry * rw + rx) * 3;
            temp[dst] = acc[0];
            temp[dst + 1] = acc[1];
            temp[dst + 2] = acc[2];
        }
    }

    for ry in 0..rh {
        for rx in 0..rw {
            let mut acc = [0f32; 3];
            for (k, w) in kernel.iter().enumerate() {
                let sy = (ry + k).saturating_sub(radius).min(rh - 1);
                let src = (sy * rw + rx) * 3;
                acc[0] += w * temp[src];
                acc[1] += w * temp[src + 1];
                acc[2] += w * temp[src + 2];
            }
            let dst = ((y1 + ry) * width + x1 + rx) * 3;
            data[dst] = acc[0].round().clamp(0.0, 255.0) as u8;
            data[dst + 1] = acc[1].round().clamp(0.0, 255.0) as u8;
            data[dst + 2] = acc[2].round().clamp(0.0, 255.0) as u8;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::ScriptedDetector;
    use crate::frame::CaptureTs;

    fn gradient_frame(width: u32, height: u32) -> Frame {
        let mut data = Vec::with_capacity((width * height * 3) as usize);
        for y in 0..height {
            for x in 0..width {
                data.push(((x * 7 + y * 13) % 256) as u8);
                data.push(((x * 3 + y * 5) % 256) as u8);
                data.push(((x + y) % 256) as u8);
            }
        }
        Frame::new(data, width, height, CaptureTs::now()).unwrap()
    }

    fn processor(script: Vec<Vec<Detection>>, kernel: usize) -> Processor {
        Processor::new(
            ProcessorConfig {
                confidence_threshold: 0.35,
                iou_threshold: 0.45,
                blur_kernel: kernel,
            },
            SharedDetector::new(ScriptedDetector::new(script)),
        )
        .unwrap()
    }

    #[test]
    fn even_kernel_is_rejected() {
        let detector = SharedDetector::new(ScriptedDetector::new(vec![]));
        assert!(Processor::new(
            ProcessorConfig {
                blur_kernel: 50,
                ..Default::default()
            },
            detector,
        )
        .is_err());
    }

    #[test]
    fn no_detections_means_identical_pixels() {
        let p = processor(vec![vec![]], 5);
        let frame = gradient_frame(32, 32);
        let out = p.process(&frame).unwrap();
        assert!(out.detections.is_empty());
        assert_eq!(out.blurred.data, frame.data);
    }

    #[test]
    fn detection_region_is_altered_and_outside_untouched() {
        let det = Detection::face(10, 10, 20, 20, 0.9, 0.0);
        let p = processor(vec![vec![det]], 5);
        let frame = gradient_frame(48, 48);
        let out = p.process(&frame).unwrap();
        assert_eq!(out.detections.len(), 1);

        // inside the box: changed
        let center = ((15 * 48) + 15) * 3;
        assert_ne!(
            &out.blurred.data[center..center + 3],
            &frame.data[center..center + 3]
        );
        // well outside the padded box: untouched
        let corner = ((40 * 48) + 40) * 3;
        assert_eq!(
            &out.blurred.data[corner..corner + 3],
            &frame.data[corner..corner + 3]
        );
    }

    #[test]
    fn low_confidence_detection_is_not_blurred() {
        let det = Detection::face(10, 10, 20, 20, 0.1, 0.0);
        let p = processor(vec![vec![det]], 5);
        let frame = gradient_frame(32, 32);
        let out = p.process(&frame).unwrap();
        assert!(out.detections.is_empty());
        assert_eq!(out.blurred.data, frame.data);
    }

    #[test]
    fn overlapping_boxes_blur_without_panic() {
        let dets = vec![
            Detection::face(0, 0, 30, 30, 0.9, 0.0),
            Detection::face(0, 0, 31, 31, 0.8, 0.0),
            Detection::face(28, 28, 32, 32, 0.85, 0.0),
        ];
        let p = processor(vec![dets], 7);
        let frame = gradient_frame(32, 32);
        p.process(&frame).unwrap();
    }

    #[test]
    fn box_at_frame_edge_is_clipped() {
        let det = Detection::face(0, 0, 8, 8, 0.9, 0.0);
        let p = processor(vec![vec![det]], 5);
        let frame = gradient_frame(16, 16);
        let out = p.process(&frame).unwrap();
        assert_eq!(out.detections.len(), 1);
    }

    #[test]
    fn kernel_weights_are_normalized() {
        let k = gaussian_kernel(51);
        let sum: f32 = k.iter().sum();
        assert!((sum - 1.0).abs() < 1e-4);
        assert_eq!(k.len(), 51);
        // symmetric, peaked at center
        assert!(k[25] > k[0]);
        assert!((k[0] - k[50]).abs() < 1e-6);
    }
}
