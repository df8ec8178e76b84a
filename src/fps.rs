//! Rolling throughput estimate for logging and the preview overlay.

use std::time::Instant;

/// Number of cycles per measurement window.
pub const FPS_WINDOW_FRAMES: u64 = 10;

/// Frame-rate tracker that recomputes once per window instead of per frame.
///
/// Between recomputations it reports the last computed rate; before the first
/// window closes the rate is 0.
#[derive(Debug)]
pub struct FrameRateTracker {
    window: u64,
    counter: u64,
    window_start: Instant,
    fps: f64,
}

impl FrameRateTracker {
    pub fn new() -> Self {
        Self::starting_at(Instant::now(), FPS_WINDOW_FRAMES)
    }

    /// Tracker whose first window opens at `start`.
    pub fn starting_at(start: Instant, window: u64) -> Self {
        Self {
            window: window.max(1),
            counter: 0,
            window_start: start,
            fps: 0.0,
        }
    }

    /// Record one completed cycle now.
    pub fn tick(&mut self) -> f64 {
        self.tick_at(Instant::now())
    }

    /// Record one completed cycle at `now`.
    pub fn tick_at(&mut self, now: Instant) -> f64 {
        self.counter += 1;
        if self.counter % self.window == 0 {
            let elapsed = now.saturating_duration_since(self.window_start).as_secs_f64();
            if elapsed > 0.0 {
                self.fps = self.window as f64 / elapsed;
            }
            self.window_start = now;
        }
        self.fps
    }

    pub fn fps(&self) -> f64 {
        self.fps
    }

    /// Total cycles recorded.
    pub fn cycles(&self) -> u64 {
        self.counter
    }
}

impl Default for FrameRateTracker {
    fn default() -> Self {
        Self::new()
    }
}
