//! MJPEG-in-AVI fallback encoder.
//!
//! Motion-JPEG needs no inter-frame state, which is what makes it a safe
//! last rung on the codec ladder: every platform that can produce a JPEG
//! can produce a playable segment. Frames are JPEG-compressed and muxed
//! into a RIFF/AVI container with a standard `idx1` index. Chunk sizes in
//! the headers are patched in `finish`.

use std::fs::File;
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::Path;

use anyhow::{anyhow, Result};

use crate::frame::Frame;

use super::{CodecId, Encoder, EncoderFactory};

const AVIF_HASINDEX: u32 = 0x0000_0010;
const AVIIF_KEYFRAME: u32 = 0x0000_0010;

pub struct MjpegAviFactory {
    jpeg_quality: u8,
}

impl MjpegAviFactory {
    pub fn new(jpeg_quality: u8) -> Self {
        Self {
            jpeg_quality: jpeg_quality.clamp(1, 100),
        }
    }
}

impl EncoderFactory for MjpegAviFactory {
    fn codec(&self) -> CodecId {
        CodecId::Mjpg
    }

    fn container_ext(&self) -> &'static str {
        "avi"
    }

    fn open(&self, path: &Path, width: u32, height: u32, fps: u32) -> Result<Box<dyn Encoder>> {
        if width == 0 || height == 0 || fps == 0 {
            return Err(anyhow!("invalid encoder geometry {}x{}@{}", width, height, fps));
        }
        Ok(Box::new(MjpegAviEncoder::create(
            path,
            width,
            height,
            fps,
            self.jpeg_quality,
        )?))
    }
}

struct IndexEntry {
    offset: u32,
    size: u32,
}

pub struct MjpegAviEncoder {
    writer: BufWriter<File>,
    width: u32,
    height: u32,
    jpeg_quality: u8,
    frame_count: u32,
    /// Byte offsets patched at finish.
    riff_size_pos: u64,
    total_frames_pos: u64,
    stream_length_pos: u64,
    movi_size_pos: u64,
    movi_start: u64,
    index: Vec<IndexEntry>,
}

impl MjpegAviEncoder {
    fn create(path: &Path, width: u32, height: u32, fps: u32, jpeg_quality: u8) -> Result<Self> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);

        // RIFF header; size patched at finish
        writer.write_all(b"RIFF")?;
        let riff_size_pos = stream_pos(&mut writer)?;
        writer.write_all(&0u32.to_le_bytes())?;
        writer.write_all(b"AVI ")?;

        // LIST hdrl
        let hdrl_body = 4 + (8 + 56) + (8 + 4 + (8 + 56) + (8 + 40));
        writer.write_all(b"LIST")?;
        writer.write_all(&(hdrl_body as u32).to_le_bytes())?;
        writer.write_all(b"hdrl")?;

        // avih
        writer.write_all(b"avih")?;
        writer.write_all(&56u32.to_le_bytes())?;
        let us_per_frame = 1_000_000u32 / fps;
        writer.write_all(&us_per_frame.to_le_bytes())?;
        writer.write_all(&0u32.to_le_bytes())?; // max bytes/sec
        writer.write_all(&0u32.to_le_bytes())?; // padding granularity
        writer.write_all(&AVIF_HASINDEX.to_le_bytes())?;
        let total_frames_pos = stream_pos(&mut writer)?;
        writer.write_all(&0u32.to_le_bytes())?; // total frames, patched
        writer.write_all(&0u32.to_le_bytes())?; // initial frames
        writer.write_all(&1u32.to_le_bytes())?; // streams
        writer.write_all(&0u32.to_le_bytes())?; // suggested buffer size
        writer.write_all(&width.to_le_bytes())?;
        writer.write_all(&height.to_le_bytes())?;
        writer.write_all(&[0u8; 16])?; // reserved

        // LIST strl
        let strl_body = 4 + (8 + 56) + (8 + 40);
        writer.write_all(b"LIST")?;
        writer.write_all(&(strl_body as u32).to_le_bytes())?;
        writer.write_all(b"strl")?;

        // strh
        writer.write_all(b"strh")?;
        writer.write_all(&56u32.to_le_bytes())?;
        writer.write_all(b"vids")?;
        writer.write_all(&CodecId::Mjpg.fourcc())?;
        writer.write_all(&0u32.to_le_bytes())?; // flags
        writer.write_all(&0u16.to_le_bytes())?; // priority
        writer.write_all(&0u16.to_le_bytes())?; // language
        writer.write_all(&0u32.to_le_bytes())?; // initial frames
        writer.write_all(&1u32.to_le_bytes())?; // scale
        writer.write_all(&fps.to_le_bytes())?; // rate
        writer.write_all(&0u32.to_le_bytes())?; // start
        let stream_length_pos = stream_pos(&mut writer)?;
        writer.write_all(&0u32.to_le_bytes())?; // length, patched
        writer.write_all(&0u32.to_le_bytes())?; // suggested buffer size
        writer.write_all(&u32::MAX.to_le_bytes())?; // quality (default)
        writer.write_all(&0u32.to_le_bytes())?; // sample size
        writer.write_all(&[0u8; 8])?; // rcFrame

        // strf: BITMAPINFOHEADER
        writer.write_all(b"strf")?;
        writer.write_all(&40u32.to_le_bytes())?;
        writer.write_all(&40u32.to_le_bytes())?; // biSize
        writer.write_all(&(width as i32).to_le_bytes())?;
        writer.write_all(&(height as i32).to_le_bytes())?;
        writer.write_all(&1u16.to_le_bytes())?; // planes
        writer.write_all(&24u16.to_le_bytes())?; // bit count
        writer.write_all(&CodecId::Mjpg.fourcc())?; // compression
        writer.write_all(&(width * height * 3).to_le_bytes())?; // size image
        writer.write_all(&[0u8; 16])?; // ppm + palette fields

        // LIST movi; size patched at finish
        writer.write_all(b"LIST")?;
        let movi_size_pos = stream_pos(&mut writer)?;
        writer.write_all(&0u32.to_le_bytes())?;
        let movi_start = stream_pos(&mut writer)?;
        writer.write_all(b"movi")?;

        Ok(Self {
            writer,
            width,
            height,
            jpeg_quality,
            frame_count: 0,
            riff_size_pos,
            total_frames_pos,
            stream_length_pos,
            movi_size_pos,
            movi_start,
            index: Vec::new(),
        })
    }
}

impl Encoder for MjpegAviEncoder {
    fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        if frame.width != self.width || frame.height != self.height {
            return Err(anyhow!(
                "frame geometry {}x{} does not match encoder {}x{}",
                frame.width,
                frame.height,
                self.width,
                self.height
            ));
        }
        let jpeg = frame.to_jpeg(self.jpeg_quality)?;

        let chunk_offset = stream_pos(&mut self.writer)? - self.movi_start;
        self.writer.write_all(b"00dc")?;
        self.writer.write_all(&(jpeg.len() as u32).to_le_bytes())?;
        self.writer.write_all(&jpeg)?;
        if jpeg.len() % 2 == 1 {
            self.writer.write_all(&[0u8])?;
        }

        self.index.push(IndexEntry {
            offset: chunk_offset as u32,
            size: jpeg.len() as u32,
        });
        self.frame_count += 1;
        Ok(())
    }

    fn finish(mut self: Box<Self>) -> Result<()> {
        let movi_end = stream_pos(&mut self.writer)?;
        let movi_size = (movi_end - self.movi_start) as u32;

        // idx1
        self.writer.write_all(b"idx1")?;
        self.writer
            .write_all(&((self.index.len() * 16) as u32).to_le_bytes())?;
        for entry in &self.index {
            self.writer.write_all(b"00dc")?;
            self.writer.write_all(&AVIIF_KEYFRAME.to_le_bytes())?;
            self.writer.write_all(&entry.offset.to_le_bytes())?;
            self.writer.write_all(&entry.size.to_le_bytes())?;
        }

        let file_end = stream_pos(&mut self.writer)?;
        let riff_size = (file_end - self.riff_size_pos - 4) as u32;

        patch_u32(&mut self.writer, self.riff_size_pos, riff_size)?;
        patch_u32(&mut self.writer, self.total_frames_pos, self.frame_count)?;
        patch_u32(&mut self.writer, self.stream_length_pos, self.frame_count)?;
        patch_u32(&mut self.writer, self.movi_size_pos, movi_size)?;

        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        Ok(())
    }
}

fn stream_pos<W: Seek>(writer: &mut W) -> Result<u64> {
    Ok(writer.seek(SeekFrom::Current(0))?)
}

fn patch_u32(writer: &mut BufWriter<File>, pos: u64, value: u32) -> Result<()> {
    writer.seek(SeekFrom::Start(pos))?;
    writer.write_all(&value.to_le_bytes())?;
    writer.seek(SeekFrom::End(0))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::CaptureTs;
    use std::fs;

    fn frame(value: u8) -> Frame {
        Frame::new(vec![value; 32 * 24 * 3], 32, 24, CaptureTs::now()).unwrap()
    }

    #[test]
    fn produces_a_well_formed_avi() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.avi");
        let factory = MjpegAviFactory::new(80);
        let mut encoder = factory.open(&path, 32, 24, 30).unwrap();
        for i in 0..3 {
            encoder.write_frame(&frame(i * 40)).unwrap();
        }
        encoder.finish().unwrap();

        let bytes = fs::read(&path).unwrap();
        assert_eq!(&bytes[..4], b"RIFF");
        assert_eq!(&bytes[8..12], b"AVI ");
        let riff_size = u32::from_le_bytes(bytes[4..8].try_into().unwrap()) as usize;
        assert_eq!(riff_size + 8, bytes.len());
        // frame counts patched into avih and strh
        let total_frames = u32::from_le_bytes(bytes[48..52].try_into().unwrap());
        assert_eq!(total_frames, 3);
        // index present
        assert!(bytes.windows(4).any(|w| w == b"idx1"));
    }

    #[test]
    fn rejects_geometry_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.avi");
        let factory = MjpegAviFactory::new(80);
        let mut encoder = factory.open(&path, 64, 48, 30).unwrap();
        assert!(encoder.write_frame(&frame(0)).is_err());
    }

    #[test]
    fn factory_rejects_zero_geometry() {
        let dir = tempfile::tempdir().unwrap();
        let factory = MjpegAviFactory::new(80);
        assert!(factory.open(&dir.path().join("x.avi"), 0, 10, 30).is_err());
        assert!(factory.open(&dir.path().join("x.avi"), 10, 10, 0).is_err());
    }
}
