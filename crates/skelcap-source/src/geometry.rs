use serde::{Deserialize, Serialize};

/// Device timestamps are expressed in hundred-nanosecond ticks.
pub type Timestamp = i64;

pub const TICKS_PER_SECOND: i64 = 10_000_000;

/// YUY2 packs two pixels into four bytes.
pub const COLOR_BYTES_PER_PIXEL: usize = 2;

/// Width × height of one sensor plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FrameSize {
    pub width: u32,
    pub height: u32,
}

impl FrameSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn pixels(&self) -> usize {
        self.width as usize * self.height as usize
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Integer division of both sides, used for the half-resolution color stream.
    pub fn scaled_down(&self, factor: u32) -> Self {
        Self::new(self.width / factor, self.height / factor)
    }
}

/// Full-HD YUY2 color camera.
pub const COLOR_FRAME: FrameSize = FrameSize::new(1920, 1080);

/// Time-of-flight depth camera; the body-index mask shares this resolution.
pub const DEPTH_FRAME: FrameSize = FrameSize::new(512, 424);

/// Minimum spacing between accepted frames for a target rate, truncated to whole ticks.
pub fn frame_interval_ticks(fps: f64) -> Timestamp {
    (1.0e7 / fps) as Timestamp
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interval_for_common_rates() {
        assert_eq!(frame_interval_ticks(5.0), 2_000_000);
        assert_eq!(frame_interval_ticks(30.0), 333_333);
    }

    #[test]
    fn half_resolution_color() {
        assert_eq!(COLOR_FRAME.scaled_down(2), FrameSize::new(960, 540));
        assert_eq!(DEPTH_FRAME.pixels(), 512 * 424);
    }
}
