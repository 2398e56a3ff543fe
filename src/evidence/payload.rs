//! Deterministic evidence payload wire format.
//!
//! The payload sealed by the vault is a self-delimiting, length-prefixed
//! encoding of the segment's frame records followed by the segment metadata
//! as JSON. All multi-byte integers are little-endian; all strings UTF-8.
//! This is the exact byte string the vault fingerprints with SHA-256.

use anyhow::{anyhow, Result};

use crate::frame::{Detection, FrameRecord, SegmentMeta};

/// Decoded evidence package: the frame records plus segment metadata.
#[derive(Clone, Debug)]
pub struct EvidencePackage {
    pub records: Vec<FrameRecord>,
    pub meta: SegmentMeta,
}

pub fn encode(records: &[FrameRecord], meta: &SegmentMeta) -> Result<Vec<u8>> {
    let meta_json = serde_json::to_vec(meta)?;
    let mut out = Vec::new();
    out.extend_from_slice(&(records.len() as u32).to_le_bytes());
    for record in records {
        out.extend_from_slice(&record.ts.to_le_bytes());
        out.extend_from_slice(&(record.jpeg.len() as u32).to_le_bytes());
        out.extend_from_slice(&record.jpeg);
        out.extend_from_slice(&(record.detections.len() as u16).to_le_bytes());
        for det in &record.detections {
            out.extend_from_slice(&det.x1.to_le_bytes());
            out.extend_from_slice(&det.y1.to_le_bytes());
            out.extend_from_slice(&det.x2.to_le_bytes());
            out.extend_from_slice(&det.y2.to_le_bytes());
            out.extend_from_slice(&det.confidence.to_le_bytes());
            out.push(det.class_id);
        }
    }
    out.extend_from_slice(&(meta_json.len() as u32).to_le_bytes());
    out.extend_from_slice(&meta_json);
    Ok(out)
}

pub fn decode(bytes: &[u8]) -> Result<EvidencePackage> {
    let mut cursor = 0usize;
    let frame_count = read_u32(bytes, &mut cursor)? as usize;
    let mut records = Vec::with_capacity(frame_count.min(4096));
    for _ in 0..frame_count {
        let ts = read_f64(bytes, &mut cursor)?;
        let jpeg_len = read_u32(bytes, &mut cursor)? as usize;
        let jpeg = read_slice(bytes, &mut cursor, jpeg_len)?.to_vec();
        let det_count = read_u16(bytes, &mut cursor)? as usize;
        let mut detections = Vec::with_capacity(det_count);
        for _ in 0..det_count {
            let x1 = read_i32(bytes, &mut cursor)?;
            let y1 = read_i32(bytes, &mut cursor)?;
            let x2 = read_i32(bytes, &mut cursor)?;
            let y2 = read_i32(bytes, &mut cursor)?;
            let confidence = read_f32(bytes, &mut cursor)?;
            let class_id = read_u8(bytes, &mut cursor)?;
            detections.push(Detection {
                x1,
                y1,
                x2,
                y2,
                confidence,
                class_id,
                ts,
            });
        }
        records.push(FrameRecord {
            jpeg,
            detections,
            ts,
        });
    }
    let meta_len = read_u32(bytes, &mut cursor)? as usize;
    let meta_bytes = read_slice(bytes, &mut cursor, meta_len)?;
    let meta: SegmentMeta = serde_json::from_slice(meta_bytes)?;
    if cursor != bytes.len() {
        return Err(anyhow!(
            "trailing bytes after evidence payload: {}",
            bytes.len() - cursor
        ));
    }
    Ok(EvidencePackage { records, meta })
}

fn read_u8(bytes: &[u8], cursor: &mut usize) -> Result<u8> {
    let slice = read_slice(bytes, cursor, 1)?;
    Ok(slice[0])
}

fn read_u16(bytes: &[u8], cursor: &mut usize) -> Result<u16> {
    let slice = read_slice(bytes, cursor, 2)?;
    Ok(u16::from_le_bytes([slice[0], slice[1]]))
}

fn read_u32(bytes: &[u8], cursor: &mut usize) -> Result<u32> {
    let slice = read_slice(bytes, cursor, 4)?;
    Ok(u32::from_le_bytes([slice[0], slice[1], slice[2], slice[3]]))
}

fn read_i32(bytes: &[u8], cursor: &mut usize) -> Result<i32> {
    let slice = read_slice(bytes, cursor, 4)?;
    Ok(i32::from_le_bytes([slice[0], slice[1], slice[2], slice[3]]))
}

fn read_f32(bytes: &[u8], cursor: &mut usize) -> Result<f32> {
    let slice = read_slice(bytes, cursor, 4)?;
    Ok(f32::from_le_bytes([slice[0], slice[1], slice[2], slice[3]]))
}

fn read_f64(bytes: &[u8], cursor: &mut usize) -> Result<f64> {
    let slice = read_slice(bytes, cursor, 8)?;
    let mut buf = [0u8; 8];
    buf.copy_from_slice(slice);
    Ok(f64::from_le_bytes(buf))
}

fn read_slice<'a>(bytes: &'a [u8], cursor: &mut usize, len: usize) -> Result<&'a [u8]> {
    let end = cursor
        .checked_add(len)
        .ok_or_else(|| anyhow!("invalid evidence payload encoding"))?;
    if end > bytes.len() {
        return Err(anyhow!("invalid evidence payload encoding"));
    }
    let out = &bytes[*cursor..end];
    *cursor = end;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Detection;

    fn sample_meta() -> SegmentMeta {
        SegmentMeta {
            frame_count: 2,
            start_ts: 100.0,
            end_ts: 101.0,
            total_detections: 1,
            camera_id: "cam0".to_string(),
        }
    }

    #[test]
    fn encode_decode_round_trip() {
        let records = vec![
            FrameRecord {
                jpeg: vec![0xFF, 0xD8, 0xFF, 0xD9],
                detections: vec![Detection::face(10, 20, 30, 40, 0.9, 100.0)],
                ts: 100.0,
            },
            FrameRecord {
                jpeg: vec![1, 2, 3],
                detections: vec![],
                ts: 101.0,
            },
        ];
        let meta = sample_meta();
        let bytes = encode(&records, &meta).unwrap();
        let package = decode(&bytes).unwrap();
        assert_eq!(package.records.len(), 2);
        assert_eq!(package.records[0].jpeg, records[0].jpeg);
        assert_eq!(package.records[0].detections, records[0].detections);
        assert_eq!(package.records[1].detections.len(), 0);
        assert_eq!(package.meta, meta);
    }

    #[test]
    fn layout_is_little_endian_length_prefixed() {
        let records = vec![FrameRecord {
            jpeg: vec![0xAB; 5],
            detections: vec![],
            ts: 2.0,
        }];
        let bytes = encode(&records, &sample_meta()).unwrap();
        assert_eq!(&bytes[..4], &1u32.to_le_bytes());
        assert_eq!(&bytes[4..12], &2f64.to_le_bytes());
        assert_eq!(&bytes[12..16], &5u32.to_le_bytes());
        assert_eq!(&bytes[16..21], &[0xAB; 5]);
        assert_eq!(&bytes[21..23], &0u16.to_le_bytes());
    }

    #[test]
    fn truncated_input_is_rejected() {
        let records = vec![FrameRecord {
            jpeg: vec![9; 16],
            detections: vec![],
            ts: 1.0,
        }];
        let bytes = encode(&records, &sample_meta()).unwrap();
        assert!(decode(&bytes[..bytes.len() - 3]).is_err());
    }

    #[test]
    fn trailing_garbage_is_rejected() {
        let bytes = encode(&[], &sample_meta()).unwrap();
        let mut padded = bytes.clone();
        padded.push(0);
        assert!(decode(&bytes).is_ok());
        assert!(decode(&padded).is_err());
    }
}
