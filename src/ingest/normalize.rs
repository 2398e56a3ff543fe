//! Canonical-resolution normalization.
//!
//! Downstream components assume a fixed resolution for the lifetime of a
//! worker, so every captured frame is brought to the canonical target by
//! center-cropping the longer axis to the target aspect ratio and then
//! bilinearly resampling.

use anyhow::{anyhow, Result};

use crate::frame::Frame;

/// Center-crop to the target aspect then resample to exactly
/// `target_w x target_h`. Frames already at the target pass through.
pub fn normalize_frame(frame: Frame, target_w: u32, target_h: u32) -> Result<Frame> {
    if target_w == 0 || target_h == 0 {
        return Err(anyhow!("target resolution must be non-zero"));
    }
    if frame.width == target_w && frame.height == target_h {
        return Ok(frame);
    }

    let (crop_x, crop_y, crop_w, crop_h) =
        center_crop(frame.width, frame.height, target_w, target_h);
    let data = resample_bilinear(
        &frame.data,
        frame.width as usize,
        crop_x,
        crop_y,
        crop_w,
        crop_h,
        target_w as usize,
        target_h as usize,
    );
    Frame::new(data, target_w, target_h, frame.ts)
}

/// Largest centered region of the source with the target aspect ratio.
fn center_crop(src_w: u32, src_h: u32, target_w: u32, target_h: u32) -> (usize, usize, usize, usize) {
    // Compare aspect ratios without floats: src_w/src_h vs target_w/target_h.
    let lhs = src_w as u64 * target_h as u64;
    let rhs = target_w as u64 * src_h as u64;
    if lhs > rhs {
        // source wider than target: crop width
        let crop_w = ((rhs / target_h as u64) as u32).max(1);
        let crop_x = (src_w - crop_w) / 2;
        (crop_x as usize, 0, crop_w as usize, src_h as usize)
    } else if lhs < rhs {
        // source taller than target: crop height
        let crop_h = ((lhs / target_w as u64) as u32).max(1);
        let crop_y = (src_h - crop_h) / 2;
        (0, crop_y as usize, src_w as usize, crop_h as usize)
    } else {
        (0, 0, src_w as usize, src_h as usize)
    }
}

#[allow(clippy::too_many_arguments)]
fn resample_bilinear(
    src: &[u8],
    src_stride: usize,
    crop_x: usize,
    crop_y: usize,
    crop_w: usize,
    crop_h: usize,
    dst_w: usize,
    dst_h: usize,
) -> Vec<u8> {
    let mut dst = vec![0u8; dst_w * dst_h * 3];
    let scale_x = crop_w as f32 / dst_w as f32;
    let scale_y = crop_h as f32 / dst_h as f32;

    for dy in 0..dst_h {
        let sy = ((dy as f32 + 0.5) * scale_y - 0.5).max(0.0);
        let y0 = (sy as usize).min(crop_h - 1);
        let y1 = (y0 + 1).min(crop_h - 1);
        let fy = sy - y0 as f32;
        for dx in 0..dst_w {
            let sx = ((dx as f32 + 0.5) * scale_x - 0.5).max(0.0);
            let x0 = (sx as usize).min(crop_w - 1);
            let x1 = (x0 + 1).min(crop_w - 1);
            let fx = sx - x0 as f32;

            let base00 = ((crop_y + y0) * src_stride + crop_x + x0) * 3;
            let base01 = ((crop_y + y0) * src_stride + crop_x + x1) * 3;
            let base10 = ((crop_y + y1) * src_stride + crop_x + x0) * 3;
            let base11 = ((crop_y + y1) * src_stride + crop_x + x1) * 3;
            let out = (dy * dst_w + dx) * 3;
            for c in 0..3 {
                let top = src[base00 + c] as f32 * (1.0 - fx) + src[base01 + c] as f32 * fx;
                let bottom = src[base10 + c] as f32 * (1.0 - fx) + src[base11 + c] as f32 * fx;
                dst[out + c] = (top * (1.0 - fy) + bottom * fy).round().clamp(0.0, 255.0) as u8;
            }
        }
    }
    dst
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::CaptureTs;

    fn solid_frame(w: u32, h: u32, value: u8) -> Frame {
        Frame::new(vec![value; (w * h * 3) as usize], w, h, CaptureTs::now()).unwrap()
    }

    #[test]
    fn matching_resolution_passes_through() {
        let frame = solid_frame(1280, 720, 42);
        let out = normalize_frame(frame, 1280, 720).unwrap();
        assert_eq!(out.width, 1280);
        assert_eq!(out.height, 720);
        assert!(out.data.iter().all(|&p| p == 42));
    }

    #[test]
    fn wider_source_is_cropped_then_scaled() {
        // 4:3 source to a 16:9 target crops height
        let frame = solid_frame(640, 480, 7);
        let out = normalize_frame(frame, 1280, 720).unwrap();
        assert_eq!(out.width, 1280);
        assert_eq!(out.height, 720);
        assert!(out.data.iter().all(|&p| p == 7));
    }

    #[test]
    fn crop_geometry_is_centered() {
        // 1000x500 to 100x100 target: crop width to 500, centered at 250
        let (x, y, w, h) = center_crop(1000, 500, 100, 100);
        assert_eq!((x, y, w, h), (250, 0, 500, 500));

        // 500x1000 to 100x100: crop height
        let (x, y, w, h) = center_crop(500, 1000, 100, 100);
        assert_eq!((x, y, w, h), (0, 250, 500, 500));
    }

    #[test]
    fn upscale_preserves_solid_color() {
        let frame = solid_frame(64, 36, 199);
        let out = normalize_frame(frame, 1280, 720).unwrap();
        assert!(out.data.iter().all(|&p| p == 199));
    }
}
