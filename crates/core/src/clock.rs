//! Wall-clock frame timing.

use std::time::{Duration, Instant};

/// Largest time step handed to a frame, in seconds.
pub const MAX_FRAME_STEP: f32 = 0.1;

/// Measures the time between frames.
///
/// Steps are clamped to a maximum, so a stall (window drag, debugger
/// break, slow first frame) never turns into one huge simulation step.
#[derive(Debug)]
pub struct FrameClock {
    start: Instant,
    last_tick: Instant,
    max_step: f32,
}

impl FrameClock {
    /// Create a new clock, starting from now.
    pub fn new() -> Self {
        Self::with_max_step(MAX_FRAME_STEP)
    }

    pub fn with_max_step(max_step: f32) -> Self {
        let now = Instant::now();
        Self {
            start: now,
            last_tick: now,
            max_step,
        }
    }

    /// Total time since the clock was created or reset.
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Seconds since the previous tick, clamped to the maximum step.
    pub fn tick(&mut self) -> f32 {
        let now = Instant::now();
        let raw = (now - self.last_tick).as_secs_f32();
        self.last_tick = now;
        clamp_step(raw, self.max_step)
    }

    /// Reset the clock to the current time.
    pub fn reset(&mut self) {
        let now = Instant::now();
        self.start = now;
        self.last_tick = now;
    }
}

impl Default for FrameClock {
    fn default() -> Self {
        Self::new()
    }
}

fn clamp_step(raw: f32, max_step: f32) -> f32 {
    raw.clamp(0.0, max_step)
}
