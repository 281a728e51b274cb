//! Output side of the engine: the driver seam and frame pacing.

use rgb::RGB8;
use serde::Serialize;

use crate::error::PacerError;

/// Something that can show lane frames, e.g. WS2812 strips.
pub trait RenderDriver {
    /// Show one frame per lane. Called at most once per tick, with every
    /// lane's buffer, including blanked ones.
    fn present(&mut self, frames: &[Vec<RGB8>]) -> Result<(), PacerError>;

    /// Global brightness (0-255) to apply on output.
    fn set_brightness(&mut self, _brightness: u8) {}
}

/// Time to shift one WS2812 pixel out (24 bits at 800kHz).
const LINK_US_PER_LED: u64 = 30;

/// Reset/latch gap after each strip.
const LINK_LATCH_US: u64 = 300;

/// Time the LED link needs to transmit `total_pixels` spread over `lanes`
/// strips, rounded up to whole milliseconds.
#[must_use]
pub fn link_time_ms(total_pixels: usize, lanes: usize) -> u64 {
    let us = total_pixels as u64 * LINK_US_PER_LED + lanes as u64 * LINK_LATCH_US;
    us.div_ceil(1000)
}

/// Spaces presentations so neither the configured frame rate nor the LED
/// link is exceeded.
#[derive(Debug, Clone)]
pub struct FrameThrottle {
    min_interval_ms: u64,
    last_present_ms: Option<u64>,
}

impl FrameThrottle {
    #[must_use]
    pub fn new(min_interval_ms: u32) -> Self {
        Self {
            min_interval_ms: u64::from(min_interval_ms),
            last_present_ms: None,
        }
    }

    /// Shortest gap between presentations for this much output.
    #[must_use]
    pub fn interval_ms(&self, total_pixels: usize, lanes: usize) -> u64 {
        self.min_interval_ms.max(link_time_ms(total_pixels, lanes))
    }

    /// Whether a frame may be presented at `now_ms`.
    #[must_use]
    pub fn ready(&self, now_ms: u64, total_pixels: usize, lanes: usize) -> bool {
        match self.last_present_ms {
            None => true,
            Some(last) => now_ms.saturating_sub(last) >= self.interval_ms(total_pixels, lanes),
        }
    }

    /// Record an attempt to present, successful or not.
    pub fn mark(&mut self, now_ms: u64) {
        self.last_present_ms = Some(now_ms);
    }

    /// Milliseconds until the next frame may be presented.
    #[must_use]
    pub fn wait_ms(&self, now_ms: u64, total_pixels: usize, lanes: usize) -> u64 {
        match self.last_present_ms {
            None => 0,
            Some(last) => {
                (last + self.interval_ms(total_pixels, lanes)).saturating_sub(now_ms)
            }
        }
    }
}

/// Presentation counters, reported through the status API.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RenderStats {
    pub presented: u64,
    /// Frames the driver failed to show
    pub skipped: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_time() {
        // 750 LEDs on one strip: 22.5ms + latch
        assert_eq!(link_time_ms(750, 1), 23);
        assert_eq!(link_time_ms(0, 0), 0);
        assert_eq!(link_time_ms(100, 4), 5); // 3ms + 1.2ms
    }

    #[test]
    fn test_configured_interval_wins_for_short_strips() {
        let throttle = FrameThrottle::new(20);
        assert_eq!(throttle.interval_ms(100, 1), 20);
        // Four long strips are link bound
        assert_eq!(throttle.interval_ms(3000, 4), 92);
    }

    #[test]
    fn test_throttle_spacing() {
        let mut throttle = FrameThrottle::new(20);
        assert!(throttle.ready(0, 100, 1));
        throttle.mark(0);

        assert!(!throttle.ready(5, 100, 1));
        assert_eq!(throttle.wait_ms(5, 100, 1), 15);
        assert!(!throttle.ready(19, 100, 1));
        assert!(throttle.ready(20, 100, 1));
        assert_eq!(throttle.wait_ms(25, 100, 1), 0);
    }
}
