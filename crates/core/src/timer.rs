//! Monotonic timing for frame deltas and throughput reporting.

use std::time::{Duration, Instant};

/// High-resolution timer for measuring elapsed time.
#[derive(Debug)]
pub struct Timer {
    start: Instant,
    last_tick: Instant,
}

impl Timer {
    /// Create a new timer, starting from now.
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            start: now,
            last_tick: now,
        }
    }

    /// Get the total elapsed time since the timer was created.
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Get the elapsed time in seconds since the timer was created.
    pub fn elapsed_secs(&self) -> f64 {
        self.elapsed().as_secs_f64()
    }

    /// Get the time elapsed since the last call to `tick()`.
    pub fn tick(&mut self) -> Duration {
        let now = Instant::now();
        let delta = now - self.last_tick;
        self.last_tick = now;
        delta
    }

    /// Get the delta time in seconds since the last tick.
    pub fn delta_secs(&mut self) -> f32 {
        self.tick().as_secs_f32()
    }

    /// Reset the timer to the current time.
    pub fn reset(&mut self) {
        let now = Instant::now();
        self.start = now;
        self.last_tick = now;
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

/// Counts frames against a wall clock to report an average frame rate.
#[derive(Debug, Default)]
pub struct FrameRateCounter {
    timer: Timer,
    frames: u64,
}

impl FrameRateCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one rendered frame.
    pub fn frame(&mut self) {
        self.frames += 1;
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Average frames per second since construction, or 0 if no time has passed.
    pub fn average_fps(&self) -> f64 {
        Self::fps(self.frames, self.timer.elapsed())
    }

    fn fps(frames: u64, elapsed: Duration) -> f64 {
        let secs = elapsed.as_secs_f64();
        if secs > 0.0 { frames as f64 / secs } else { 0.0 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_is_monotonic() {
        let mut timer = Timer::new();
        std::thread::sleep(Duration::from_millis(2));
        let delta = timer.tick();
        assert!(delta >= Duration::from_millis(2));
        assert!(timer.elapsed() >= delta);
    }

    #[test]
    fn fps_handles_zero_elapsed() {
        assert_eq!(FrameRateCounter::fps(10, Duration::ZERO), 0.0);
        assert_eq!(FrameRateCounter::fps(120, Duration::from_secs(2)), 60.0);
    }

    #[test]
    fn counter_counts_frames() {
        let mut counter = FrameRateCounter::new();
        counter.frame();
        counter.frame();
        assert_eq!(counter.frames(), 2);
    }
}
