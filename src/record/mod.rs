//! Public-stream encoding.
//!
//! The video codec library is an external collaborator consumed through the
//! `Encoder`/`EncoderFactory` capabilities. On segment open the recorder
//! walks the codec preference ladder (`avc1`, `X264`, `mp4v`, `MJPG`) and
//! uses the first codec with a registered factory that opens successfully.
//! MJPEG is incompatible with the MP4 container in the code paths assumed
//! here, so an MJPG segment switches the container extension to `.avi`.

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;

use crate::frame::Frame;

pub mod mjpeg;
pub mod recorder;

pub use mjpeg::MjpegAviFactory;
pub use recorder::{PublicRecorder, RecorderConfig};

/// Codec preference order tried on every segment open.
pub const CODEC_PREFERENCE: [CodecId; 4] =
    [CodecId::Avc1, CodecId::X264, CodecId::Mp4v, CodecId::Mjpg];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CodecId {
    Avc1,
    X264,
    Mp4v,
    Mjpg,
}

impl CodecId {
    pub fn fourcc(&self) -> [u8; 4] {
        match self {
            CodecId::Avc1 => *b"avc1",
            CodecId::X264 => *b"X264",
            CodecId::Mp4v => *b"mp4v",
            CodecId::Mjpg => *b"MJPG",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CodecId::Avc1 => "avc1",
            CodecId::X264 => "X264",
            CodecId::Mp4v => "mp4v",
            CodecId::Mjpg => "MJPG",
        }
    }
}

impl std::fmt::Display for CodecId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An open container sink for one segment. The codec choice is fixed for
/// the encoder's lifetime.
pub trait Encoder: Send {
    fn write_frame(&mut self, frame: &Frame) -> Result<()>;

    /// Finalize the container. Consumes the encoder; called on the
    /// recorder's background finalization task.
    fn finish(self: Box<Self>) -> Result<()>;
}

/// Opens encoders for one codec at a fixed resolution and frame rate.
pub trait EncoderFactory: Send + Sync {
    fn codec(&self) -> CodecId;

    /// Container extension for segments produced by this factory.
    fn container_ext(&self) -> &'static str;

    fn open(&self, path: &Path, width: u32, height: u32, fps: u32) -> Result<Box<dyn Encoder>>;
}

/// Registered encoder factories, looked up by codec on segment open.
/// A codec with no registered factory is simply unavailable and the
/// preference ladder moves on.
#[derive(Default)]
pub struct EncoderRegistry {
    factories: Vec<Arc<dyn EncoderFactory>>,
}

impl EncoderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in backends: the MJPEG/AVI fallback.
    /// Hardware or libavcodec-backed factories for the MP4 codecs are
    /// registered by the embedding application when available.
    pub fn with_default_backends(jpeg_quality: u8) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(MjpegAviFactory::new(jpeg_quality)));
        registry
    }

    pub fn register(&mut self, factory: Arc<dyn EncoderFactory>) {
        self.factories.push(factory);
    }

    pub fn factory_for(&self, codec: CodecId) -> Option<Arc<dyn EncoderFactory>> {
        self.factories
            .iter()
            .find(|f| f.codec() == codec)
            .cloned()
    }
}
