//! Frame sources.
//!
//! Camera drivers are external collaborators consumed through the narrow
//! `FrameSource` capability. This module owns the trait, the parsing of
//! configured source strings (decimal device index vs URL), and the stable
//! per-worker camera tag the engine injects into filenames.

use std::time::Duration;

use anyhow::{anyhow, Result};
use url::Url;

use crate::frame::Frame;

pub mod normalize;
pub mod synthetic;

pub use synthetic::{ScriptedSource, ScriptedStep, SyntheticSource};

/// A decoded-frame producer for one camera.
///
/// `read` blocks at most `timeout`; the bounded timeout is what keeps
/// shutdown latency bounded. After a failed `read` the caller decides when
/// to `close` and re-`open` (reconnect policy lives in the camera worker,
/// not the source).
pub trait FrameSource: Send {
    fn describe(&self) -> String;

    fn open(&mut self) -> Result<()>;

    fn read(&mut self, timeout: Duration) -> Result<Frame>;

    fn close(&mut self);
}

/// Parsed camera source configuration entry.
#[derive(Clone, Debug, PartialEq)]
pub enum SourceSpec {
    /// Local capture device index (entry was a decimal integer).
    Device(u32),
    /// Network stream.
    Url(Url),
}

impl SourceSpec {
    pub fn parse(entry: &str) -> Result<Self> {
        let trimmed = entry.trim();
        if trimmed.is_empty() {
            return Err(anyhow!("camera source entry is empty"));
        }
        if let Ok(index) = trimmed.parse::<u32>() {
            return Ok(SourceSpec::Device(index));
        }
        let url = Url::parse(trimmed)
            .map_err(|e| anyhow!("camera source {:?} is neither a device index nor a URL: {}", trimmed, e))?;
        Ok(SourceSpec::Url(url))
    }

    /// Stable per-worker tag used in segment filenames: `cam{n}` for device
    /// indices, `{scheme}{worker_index}` for URLs so multiple streams of
    /// the same scheme stay distinct.
    pub fn tag(&self, worker_index: usize) -> String {
        match self {
            SourceSpec::Device(n) => format!("cam{}", n),
            SourceSpec::Url(url) => format!("{}{}", url.scheme(), worker_index),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            SourceSpec::Device(n) => format!("device:{}", n),
            SourceSpec::Url(url) => url.to_string(),
        }
    }
}
