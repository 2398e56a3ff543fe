//! Sentinel Edge
//!
//! An edge surveillance pipeline that ingests live video from multiple
//! cameras, detects faces, and produces two durable artifacts per camera:
//!
//! 1. A publicly viewable segment stream with faces irreversibly blurred.
//! 2. A tamper-evident encrypted archive of the original frames for
//!    forensic use, sealed through the [`vault`].
//!
//! # Architecture
//!
//! Per camera: `FrameSource -> Processor -> (blurred -> PublicRecorder)`
//! in parallel with `(raw + detections -> EvidenceManager -> Vault -> disk)`.
//! The [`engine::Engine`] owns one shared detector and one vault, plus a
//! per-camera set of worker thread, recorder, evidence manager, status, and
//! preview slot. The HTTP surface is an external collaborator that talks to
//! the engine through snapshot accessors only.
//!
//! # Module structure
//!
//! - `frame`: frame/detection/record types
//! - `ingest`: `FrameSource` capability, source parsing, normalization
//! - `detect`: `Detector` capability, shared wrapper, NMS
//! - `process`: detection + Gaussian anonymization stage
//! - `record`: `Encoder` capability, codec ladder, public recorder
//! - `evidence`: selective buffering, pre-roll, bounded background flush
//! - `vault`: authenticated encryption and the container format
//! - `camera`: per-camera worker state machine and status
//! - `engine`: lifecycle and the accessors the HTTP surface consumes

use std::time::{SystemTime, UNIX_EPOCH};

use chrono::NaiveDateTime;

pub mod camera;
pub mod config;
pub mod detect;
pub mod engine;
pub mod evidence;
pub mod frame;
pub mod ingest;
pub mod janitor;
pub mod process;
pub mod record;
pub mod vault;

pub use camera::{CameraState, CameraStatus, LatestFrameSlot, StatusSnapshot};
pub use config::{SentinelConfig, VaultMode};
pub use detect::{Detector, SharedDetector};
pub use engine::{Engine, EngineError, RecordingEntry};
pub use evidence::{EvidenceConfig, EvidenceManager};
pub use frame::{CaptureTs, Detection, Frame, FrameRecord, SegmentMeta};
pub use ingest::{FrameSource, SourceSpec};
pub use process::{Processor, ProcessorConfig};
pub use record::{EncoderRegistry, PublicRecorder, RecorderConfig};
pub use vault::{EvidenceSealer, HybridVault, Vault, VaultError};

/// Wall-clock seconds since the Unix epoch.
pub fn now_epoch_s() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

const COMPACT_TS_FORMAT: &str = "%Y%m%d%H%M%S";

/// Compact `YYYYMMDDHHMMSS` stamp used in segment filenames.
pub fn compact_timestamp_now() -> String {
    chrono::Utc::now().format(COMPACT_TS_FORMAT).to_string()
}

/// Parse a segment timestamp. Writes always use the compact form, but
/// pre-existing recordings may carry `YYYYMMDD_HHMMSS`, so both are
/// accepted on read.
pub fn parse_segment_timestamp(s: &str) -> Option<NaiveDateTime> {
    let compact: String = if s.len() == 15 && s.as_bytes().get(8) == Some(&b'_') {
        s.chars().filter(|c| *c != '_').collect()
    } else {
        s.to_string()
    };
    NaiveDateTime::parse_from_str(&compact, COMPACT_TS_FORMAT).ok()
}
