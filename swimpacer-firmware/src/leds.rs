//! WS2812 output for the lane strips
//!
//! One RMT channel per lane. Brightness and gamma are applied here so the
//! engine can work in plain color space.

use std::thread::sleep;
use std::time::{Duration, Instant};

use anyhow::Result;
use esp_idf_hal::gpio::OutputPin;
use esp_idf_hal::peripheral::Peripheral;
use esp_idf_hal::rmt::config::TransmitConfig;
use esp_idf_hal::rmt::{RmtChannel, TxRmtDriver};
use log::{debug, warn};
use smart_leds::{brightness, gamma, SmartLedsWrite, RGB8};
use swimpacer_engine::render::link_time_ms;
use swimpacer_engine::{PacerError, RenderDriver};
use ws2812_esp32_rmt_driver::Ws2812Esp32Rmt;

/// Slack on top of the link time before a frame counts as timed out
const RENDER_SLACK_MS: u64 = 20;

/// Create the WS2812 driver for one lane.
pub fn lane_driver<C: RmtChannel, P: OutputPin>(
    pin: impl Peripheral<P = P> + 'static,
    channel: impl Peripheral<P = C> + 'static,
) -> Result<Ws2812Esp32Rmt<'static>> {
    // Use multiple memory blocks to prevent flicker when WiFi is active.
    // The RMT peripheral can be interrupted by WiFi, causing timing issues.
    // With more memory blocks, the RMT has more buffer to handle interrupts.
    // See: https://github.com/cat-in-136/ws2812-esp32-rmt-driver#the-led-is-sp32-flickers-sp32--sp32-s3--sp32-c6--sp32-h2
    let config = TransmitConfig::new().clock_divider(1).mem_block_num(4);
    let tx_driver = TxRmtDriver::new(channel, pin, &config)?;
    Ok(Ws2812Esp32Rmt::new_with_rmt_driver(tx_driver)?)
}

pub struct StripDriver {
    lanes: Vec<Ws2812Esp32Rmt<'static>>,
    /// LEDs written on each lane by the last frame
    written: Vec<usize>,
    brightness: u8,
}

impl StripDriver {
    pub fn new(lanes: Vec<Ws2812Esp32Rmt<'static>>, initial_brightness: u8) -> Self {
        debug!(
            "Creating strip driver for {} lanes with brightness {initial_brightness}",
            lanes.len()
        );
        Self {
            written: vec![0; lanes.len()],
            lanes,
            brightness: initial_brightness,
        }
    }

    /// Write `leds` to `lane`, followed by black up to the length of the
    /// previous write so LEDs past a shrunk or released buffer go dark.
    fn write_lane(&mut self, lane: usize, leds: &[RGB8]) -> Result<(), PacerError> {
        let level = self.brightness;
        let (Some(driver), Some(written)) = (self.lanes.get_mut(lane), self.written.get_mut(lane))
        else {
            return Ok(());
        };
        let tail = written.saturating_sub(leds.len());
        let pixels = leds
            .iter()
            .copied()
            .chain(std::iter::repeat(RGB8::default()).take(tail));
        // Apply gamma correction first, then brightness reduction
        // as recommended by smart-leds docs
        driver
            .write(brightness(gamma(pixels), level))
            .map_err(|e| PacerError::Render {
                reason: format!("lane {lane}: {e:?}"),
            })?;
        *written = leds.len();
        Ok(())
    }

    /// Blink every lane 3 times (250ms each) in `color` as a boot indicator
    pub fn boot_animation(&mut self, total_leds: usize, color: RGB8) -> Result<(), PacerError> {
        let on = vec![color; total_leds];
        let off = vec![RGB8::default(); total_leds];
        let blink_duration = Duration::from_millis(250);

        for _ in 0..3 {
            for lane in 0..self.lanes.len() {
                self.write_lane(lane, &on)?;
            }
            sleep(blink_duration);

            for lane in 0..self.lanes.len() {
                self.write_lane(lane, &off)?;
            }
            sleep(blink_duration);
        }

        Ok(())
    }
}

impl RenderDriver for StripDriver {
    fn present(&mut self, frames: &[Vec<RGB8>]) -> Result<(), PacerError> {
        let started = Instant::now();
        for (lane, frame) in frames.iter().enumerate() {
            // Nothing to send for a lane that is empty now and was dark before
            if frame.is_empty() && self.written.get(lane).map_or(true, |&n| n == 0) {
                continue;
            }
            self.write_lane(lane, frame)?;
        }

        let pixels = frames.iter().map(Vec::len).sum();
        let budget_ms = link_time_ms(pixels, frames.len()) + RENDER_SLACK_MS;
        let elapsed = started.elapsed();
        if elapsed > Duration::from_millis(budget_ms) {
            warn!("LED output took {}ms", elapsed.as_millis());
            return Err(PacerError::RenderTimeout {
                budget_ms: u32::try_from(budget_ms).unwrap_or(u32::MAX),
            });
        }
        Ok(())
    }

    fn set_brightness(&mut self, brightness: u8) {
        debug!("LED brightness: {brightness}");
        self.brightness = brightness;
    }
}
