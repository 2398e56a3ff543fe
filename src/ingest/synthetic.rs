//! Synthetic frame sources.
//!
//! `SyntheticSource` generates deterministic frames so the daemon runs end
//! to end without camera hardware. `ScriptedSource` replays a scripted
//! sequence of open/read outcomes for worker state-machine tests.

use std::collections::VecDeque;
use std::time::Duration;

use anyhow::{anyhow, Result};

use crate::frame::{CaptureTs, Frame};

use super::FrameSource;

/// Deterministic synthetic camera.
///
/// Produces a slowly mutating gradient scene; every `scene_shift_period`
/// frames the scene state advances, which is enough to exercise the
/// detection and encoding paths.
pub struct SyntheticSource {
    width: u32,
    height: u32,
    target_fps: u32,
    frame_count: u64,
    scene_state: u8,
    opened: bool,
}

impl SyntheticSource {
    pub fn new(width: u32, height: u32, target_fps: u32) -> Self {
        Self {
            width,
            height,
            target_fps: target_fps.max(1),
            frame_count: 0,
            scene_state: 0,
            opened: false,
        }
    }

    fn generate_pixels(&mut self) -> Vec<u8> {
        if self.frame_count.is_multiple_of(50) {
            self.scene_state = self.scene_state.wrapping_add(1);
        }
        let pixel_count = (self.width * self.height * 3) as usize;
        let mut pixels = vec![0u8; pixel_count];
        for (i, pixel) in pixels.iter_mut().enumerate() {
            *pixel = ((i as u64 + self.frame_count + self.scene_state as u64) % 256) as u8;
        }
        pixels
    }
}

impl FrameSource for SyntheticSource {
    fn describe(&self) -> String {
        format!("synthetic:{}x{}", self.width, self.height)
    }

    fn open(&mut self) -> Result<()> {
        self.opened = true;
        log::info!("synthetic source opened ({}x{})", self.width, self.height);
        Ok(())
    }

    fn read(&mut self, timeout: Duration) -> Result<Frame> {
        if !self.opened {
            return Err(anyhow!("synthetic source not opened"));
        }
        // Pace to the target frame rate, never past the read timeout.
        let interval = Duration::from_secs(1) / self.target_fps;
        std::thread::sleep(interval.min(timeout));
        self.frame_count += 1;
        let pixels = self.generate_pixels();
        Frame::new(pixels, self.width, self.height, CaptureTs::now())
    }

    fn close(&mut self) {
        self.opened = false;
    }
}

/// One scripted read outcome.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScriptedStep {
    Frame,
    ReadError,
}

/// Replays scripted open failures and read outcomes, then keeps producing
/// `exhausted` forever.
pub struct ScriptedSource {
    width: u32,
    height: u32,
    open_failures_remaining: u32,
    open_attempts: u32,
    steps: VecDeque<ScriptedStep>,
    exhausted: ScriptedStep,
    frame_count: u64,
    opened: bool,
}

impl ScriptedSource {
    pub fn new(width: u32, height: u32, open_failures: u32, steps: Vec<ScriptedStep>) -> Self {
        Self {
            width,
            height,
            open_failures_remaining: open_failures,
            open_attempts: 0,
            steps: steps.into(),
            exhausted: ScriptedStep::Frame,
            frame_count: 0,
            opened: false,
        }
    }

    /// Behavior once the script is exhausted (default: frames forever).
    pub fn with_exhausted(mut self, step: ScriptedStep) -> Self {
        self.exhausted = step;
        self
    }

    pub fn open_attempts(&self) -> u32 {
        self.open_attempts
    }
}

impl FrameSource for ScriptedSource {
    fn describe(&self) -> String {
        "scripted".to_string()
    }

    fn open(&mut self) -> Result<()> {
        self.open_attempts += 1;
        if self.open_failures_remaining > 0 {
            self.open_failures_remaining -= 1;
            return Err(anyhow!("scripted open failure"));
        }
        self.opened = true;
        Ok(())
    }

    fn read(&mut self, _timeout: Duration) -> Result<Frame> {
        if !self.opened {
            return Err(anyhow!("scripted source not opened"));
        }
        let step = self.steps.pop_front().unwrap_or(self.exhausted);
        match step {
            ScriptedStep::Frame => {
                self.frame_count += 1;
                let pixels = vec![(self.frame_count % 256) as u8; (self.width * self.height * 3) as usize];
                Frame::new(pixels, self.width, self.height, CaptureTs::now())
            }
            ScriptedStep::ReadError => Err(anyhow!("scripted read failure")),
        }
    }

    fn close(&mut self) {
        self.opened = false;
    }
}
