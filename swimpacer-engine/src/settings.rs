//! Pacer configuration: the single parameter set every other module reads.
//!
//! Distances are in meters and times in seconds, matching what the web UI
//! edits. Every field has a serde default so settings saved by an older
//! firmware still load.

use rgb::RGB8;
use serde::{Deserialize, Serialize};

use crate::error::PacerError;

/// Number of LED strips (lanes) the hardware can drive.
pub const MAX_LANES: usize = 4;

/// Number of swimmer slots per lane.
pub const MAX_SWIMMERS: usize = 6;

/// Upper bound on any pool or strip length.
pub const MAX_LENGTH_M: f32 = 100.0;

/// Densest strip we know how to drive.
pub const MAX_LEDS_PER_METER: f32 = 144.0;

/// Fastest pace accepted, well above any human swimmer.
pub const MAX_SPEED_MPS: f32 = 5.0;

/// How overlapping swimmer pulses are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlendMode {
    /// The lower slot index owns a contested pixel.
    #[default]
    Clip,
    /// Overlapping pulses add per channel, saturating at full intensity.
    Additive,
}

/// Underwater zone overlay shown after a push-off.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UnderwaterSettings {
    pub enabled: bool,
    pub color: RGB8,
    /// Zone brightness (0-255), applied on top of the global brightness
    pub brightness: u8,
    /// Zone length off the start (first length)
    pub first_distance_m: f32,
    /// Zone length off every turn after the first length
    pub subsequent_distance_m: f32,
}

impl Default for UnderwaterSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            color: RGB8::new(0, 128, 255),
            brightness: 96,
            first_distance_m: 15.0,
            subsequent_distance_m: 5.0,
        }
    }
}

/// Complete pacer configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PacerSettings {
    // Physical layout
    pub pool_length_m: f32,
    pub strip_length_m: f32,
    pub leds_per_meter: f32,
    pub lane_count: u8,

    // Animation
    /// Visual length of one swimmer's light
    pub pulse_width_m: f32,
    pub speed_mps: f32,
    /// Rest between repeats, used for the send-off summary
    pub rest_s: f32,
    /// Distance of one repeat
    pub pace_distance_m: f32,
    /// Delay before the first swimmer starts
    pub initial_delay_s: f32,
    /// Gap between consecutive swimmers in a lane
    pub swimmer_interval_s: f32,
    pub swimmer_count: u8,
    pub round_count: u16,

    // Visual
    pub color: RGB8,
    /// Global LED brightness (0-255)
    pub brightness: u8,
    /// Per-slot color overrides; `None` uses `color`
    pub swimmer_colors: [Option<RGB8>; MAX_SWIMMERS],
    pub delay_indicators: bool,
    pub underwater: UnderwaterSettings,
    pub blend: BlendMode,

    // Run state
    pub running: [bool; MAX_LANES],
}

impl Default for PacerSettings {
    fn default() -> Self {
        Self {
            pool_length_m: 25.0,
            strip_length_m: 25.0,
            leds_per_meter: 30.0,
            lane_count: 1,
            pulse_width_m: 1.0,
            speed_mps: 1.0,
            rest_s: 5.0,
            pace_distance_m: 50.0,
            initial_delay_s: 10.0,
            swimmer_interval_s: 4.0,
            swimmer_count: 3,
            round_count: 10,
            color: RGB8::new(0, 0, 255),
            brightness: 196,
            swimmer_colors: [None; MAX_SWIMMERS],
            delay_indicators: true,
            underwater: UnderwaterSettings::default(),
            blend: BlendMode::default(),
            running: [false; MAX_LANES],
        }
    }
}

/// Pace derived from speed, distance, rest and round count.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PaceSummary {
    /// Time to swim one repeat
    pub pace_s: f32,
    /// Pace plus rest: how often a swimmer leaves the wall
    pub send_off_s: f32,
    /// Whole set
    pub set_s: f32,
}

fn require_positive(name: &str, value: f32, max: f32) -> Result<(), PacerError> {
    if !value.is_finite() || value <= 0.0 || value > max {
        return Err(PacerError::invalid(format!(
            "{name} must be in (0, {max}], got {value}"
        )));
    }
    Ok(())
}

fn require_non_negative(name: &str, value: f32) -> Result<(), PacerError> {
    if !value.is_finite() || value < 0.0 {
        return Err(PacerError::invalid(format!(
            "{name} must be a non-negative number, got {value}"
        )));
    }
    Ok(())
}

impl PacerSettings {
    /// Check every invariant, reporting the first violation.
    pub fn validate(&self) -> Result<(), PacerError> {
        require_positive("pool_length_m", self.pool_length_m, MAX_LENGTH_M)?;
        require_positive("strip_length_m", self.strip_length_m, MAX_LENGTH_M)?;
        require_positive("leds_per_meter", self.leds_per_meter, MAX_LEDS_PER_METER)?;
        require_positive("speed_mps", self.speed_mps, MAX_SPEED_MPS)?;

        if !(1..=MAX_LANES).contains(&usize::from(self.lane_count)) {
            return Err(PacerError::invalid(format!(
                "lane_count must be 1-{MAX_LANES}, got {}",
                self.lane_count
            )));
        }
        if !(1..=MAX_SWIMMERS).contains(&usize::from(self.swimmer_count)) {
            return Err(PacerError::invalid(format!(
                "swimmer_count must be 1-{MAX_SWIMMERS}, got {}",
                self.swimmer_count
            )));
        }
        if self.round_count == 0 {
            return Err(PacerError::invalid("round_count must be at least 1"));
        }

        require_non_negative("pulse_width_m", self.pulse_width_m)?;
        if self.pulse_width_m > self.strip_length_m {
            return Err(PacerError::invalid(format!(
                "pulse_width_m ({}) is longer than the strip ({})",
                self.pulse_width_m, self.strip_length_m
            )));
        }
        require_non_negative("rest_s", self.rest_s)?;
        require_non_negative("pace_distance_m", self.pace_distance_m)?;
        require_non_negative("initial_delay_s", self.initial_delay_s)?;
        require_non_negative("swimmer_interval_s", self.swimmer_interval_s)?;
        require_non_negative("underwater.first_distance_m", self.underwater.first_distance_m)?;
        require_non_negative(
            "underwater.subsequent_distance_m",
            self.underwater.subsequent_distance_m,
        )?;

        // A strip too short to hold a single LED would leave nothing to draw
        if self.strip_length_m * self.leds_per_meter < 1.0 {
            return Err(PacerError::invalid(format!(
                "strip of {}m at {} LEDs/m holds no LEDs",
                self.strip_length_m, self.leds_per_meter
            )));
        }

        Ok(())
    }

    /// Check that `lane` addresses a physically present lane.
    pub fn check_lane(lane: usize) -> Result<(), PacerError> {
        if lane >= MAX_LANES {
            return Err(PacerError::invalid(format!(
                "lane {lane} out of range (0-{})",
                MAX_LANES - 1
            )));
        }
        Ok(())
    }

    /// Whether `lane` is configured and switched on.
    #[must_use]
    pub fn lane_running(&self, lane: usize) -> bool {
        lane < usize::from(self.lane_count) && self.running.get(lane).copied().unwrap_or(false)
    }

    /// Color for swimmer `slot`: its override, or the primary color.
    #[must_use]
    pub fn swimmer_color(&self, slot: usize) -> RGB8 {
        self.swimmer_colors
            .get(slot)
            .copied()
            .flatten()
            .unwrap_or(self.color)
    }

    /// Delay between the lane starting and `slot` leaving the wall, in ms.
    #[must_use]
    pub fn start_offset_ms(&self, slot: usize) -> u64 {
        // Slot count is tiny, so the f32 conversion is exact
        #[allow(clippy::cast_precision_loss)]
        let slot = slot as f32;
        seconds_to_ms(self.initial_delay_s + slot * self.swimmer_interval_s)
    }

    #[must_use]
    pub fn pace_summary(&self) -> PaceSummary {
        let pace_s = self.pace_distance_m / self.speed_mps;
        let send_off_s = pace_s + self.rest_s;
        PaceSummary {
            pace_s,
            send_off_s,
            set_s: send_off_s * f32::from(self.round_count),
        }
    }
}

/// Convert a validated, non-negative duration in seconds to milliseconds.
#[must_use]
pub fn seconds_to_ms(seconds: f32) -> u64 {
    // Validated durations are finite and non-negative; `as` saturates anyway
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let ms = (seconds * 1000.0).round() as u64;
    ms
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert_eq!(PacerSettings::default().validate(), Ok(()));
    }

    #[test]
    fn test_rejects_zero_density() {
        let settings = PacerSettings {
            leds_per_meter: 0.0,
            ..PacerSettings::default()
        };
        assert!(matches!(
            settings.validate(),
            Err(PacerError::InvalidConfiguration { .. })
        ));
    }

    #[test]
    fn test_rejects_nan_and_negative_lengths() {
        let nan = PacerSettings {
            pool_length_m: f32::NAN,
            ..PacerSettings::default()
        };
        assert!(nan.validate().is_err());

        let negative = PacerSettings {
            initial_delay_s: -1.0,
            ..PacerSettings::default()
        };
        assert!(negative.validate().is_err());
    }

    #[test]
    fn test_lane_and_swimmer_count_bounds() {
        for lane_count in [0, 5] {
            let settings = PacerSettings {
                lane_count,
                ..PacerSettings::default()
            };
            assert!(settings.validate().is_err(), "lane_count {lane_count}");
        }
        for swimmer_count in [0, 7] {
            let settings = PacerSettings {
                swimmer_count,
                ..PacerSettings::default()
            };
            assert!(settings.validate().is_err(), "swimmer_count {swimmer_count}");
        }
        let settings = PacerSettings {
            lane_count: 4,
            swimmer_count: 6,
            ..PacerSettings::default()
        };
        assert_eq!(settings.validate(), Ok(()));
    }

    #[test]
    fn test_lane_running_respects_lane_count() {
        let settings = PacerSettings {
            lane_count: 2,
            running: [true, true, true, false],
            ..PacerSettings::default()
        };
        assert!(settings.lane_running(0));
        assert!(settings.lane_running(1));
        // Switched on but beyond the configured lane count
        assert!(!settings.lane_running(2));
        assert!(!settings.lane_running(3));
        assert!(!settings.lane_running(9));
    }

    #[test]
    fn test_swimmer_color_override() {
        let mut settings = PacerSettings::default();
        settings.swimmer_colors[1] = Some(RGB8::new(255, 0, 0));
        assert_eq!(settings.swimmer_color(0), settings.color);
        assert_eq!(settings.swimmer_color(1), RGB8::new(255, 0, 0));
        assert_eq!(settings.swimmer_color(MAX_SWIMMERS), settings.color);
    }

    #[test]
    fn test_start_offsets_stagger_from_initial_delay() {
        let settings = PacerSettings {
            initial_delay_s: 10.0,
            swimmer_interval_s: 4.0,
            ..PacerSettings::default()
        };
        assert_eq!(settings.start_offset_ms(0), 10_000);
        assert_eq!(settings.start_offset_ms(1), 14_000);
        assert_eq!(settings.start_offset_ms(2), 18_000);
    }

    #[test]
    fn test_pace_summary() {
        let settings = PacerSettings {
            pace_distance_m: 100.0,
            speed_mps: 1.25,
            rest_s: 10.0,
            round_count: 4,
            ..PacerSettings::default()
        };
        let summary = settings.pace_summary();
        assert!((summary.pace_s - 80.0).abs() < f32::EPSILON);
        assert!((summary.send_off_s - 90.0).abs() < f32::EPSILON);
        assert!((summary.set_s - 360.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let settings: PacerSettings =
            serde_json::from_str(r#"{"lane_count":2,"blend":"additive"}"#).unwrap();
        assert_eq!(settings.lane_count, 2);
        assert_eq!(settings.blend, BlendMode::Additive);
        assert_eq!(settings.swimmer_count, PacerSettings::default().swimmer_count);
    }
}
