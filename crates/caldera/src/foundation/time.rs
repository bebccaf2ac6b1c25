//! Frame timing

use std::time::{Duration, Instant};

/// Frame timer tracking the last delta and a per-second frame rate
///
/// `fps` is the number of frames completed during the last full
/// wall-clock second, not an instantaneous estimate.
#[derive(Debug, Clone)]
pub struct FrameTimer {
    last_frame: Instant,
    window_start: Instant,
    frames_in_window: u32,
    fps: u32,
    delta_time: f32,
    total_time: f32,
    frame_count: u64,
}

impl Default for FrameTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameTimer {
    /// Create a new timer starting now
    pub fn new() -> Self {
        Self::starting_at(Instant::now())
    }

    /// Create a timer with an explicit start instant
    pub fn starting_at(now: Instant) -> Self {
        Self {
            last_frame: now,
            window_start: now,
            frames_in_window: 0,
            fps: 0,
            delta_time: 0.0,
            total_time: 0.0,
            frame_count: 0,
        }
    }

    /// Record a completed frame
    pub fn tick(&mut self) {
        self.tick_at(Instant::now());
    }

    /// Record a completed frame at an explicit instant
    pub fn tick_at(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_frame);
        self.delta_time = elapsed.as_secs_f32();
        self.total_time += self.delta_time;
        self.last_frame = now;
        self.frame_count += 1;

        self.frames_in_window += 1;
        if now.saturating_duration_since(self.window_start) >= Duration::from_secs(1) {
            self.fps = self.frames_in_window;
            self.frames_in_window = 0;
            self.window_start = now;
        }
    }

    /// Seconds between the last two ticks
    pub fn delta_time(&self) -> f32 {
        self.delta_time
    }

    /// Seconds accumulated over all ticks
    pub fn total_time(&self) -> f32 {
        self.total_time
    }

    /// Number of ticks so far
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Frames completed during the last full second
    pub fn fps(&self) -> u32 {
        self.fps
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_fps_counts_frames_per_second() {
        let start = Instant::now();
        let mut timer = FrameTimer::starting_at(start);

        for i in 1..=10 {
            timer.tick_at(start + Duration::from_millis(100 * i));
        }

        assert_eq!(timer.fps(), 10);
        assert_eq!(timer.frame_count(), 10);
        assert_relative_eq!(timer.delta_time(), 0.1, epsilon = 1e-4);
    }

    #[test]
    fn test_fps_zero_before_first_second() {
        let start = Instant::now();
        let mut timer = FrameTimer::starting_at(start);
        timer.tick_at(start + Duration::from_millis(16));
        assert_eq!(timer.fps(), 0);
    }
}
