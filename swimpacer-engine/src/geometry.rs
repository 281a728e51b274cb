//! Derived strip geometry.
//!
//! Everything the stepper and compositor need that depends only on the
//! physical and animation settings. Recomputed whenever those change; the
//! previous geometry stays in use if the new settings are rejected.

use serde::Serialize;

use crate::error::PacerError;
use crate::settings::PacerSettings;

/// Fastest step cadence, bounded by what the LED link can refresh.
pub const MIN_STEP_INTERVAL_MS: u32 = 10;

/// Slowest step cadence, so a pulse never appears frozen.
pub const MAX_STEP_INTERVAL_MS: u32 = 2000;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Geometry {
    /// LEDs on each strip
    pub total_leds: usize,
    /// Distance between neighboring LEDs
    pub spacing_m: f32,
    /// Pulse width in LEDs, never less than one
    pub pulse_width_leds: usize,
    /// Time a swimmer takes to move one LED
    pub step_interval_ms: u32,
}

impl Geometry {
    /// Derive geometry from `settings`.
    ///
    /// The pulse covers the pool length there and back at `speed_mps`, but
    /// only animates over the part of the pool the strip actually reaches.
    pub fn recompute(settings: &PacerSettings) -> Result<Self, PacerError> {
        let density = settings.leds_per_meter;
        if !density.is_finite() || density <= 0.0 {
            return Err(PacerError::invalid(format!(
                "leds_per_meter must be positive, got {density}"
            )));
        }
        if !settings.speed_mps.is_finite() || settings.speed_mps <= 0.0 {
            return Err(PacerError::invalid(format!(
                "speed_mps must be positive, got {}",
                settings.speed_mps
            )));
        }
        if !settings.strip_length_m.is_finite() || settings.strip_length_m <= 0.0 {
            return Err(PacerError::invalid(format!(
                "strip_length_m must be positive, got {}",
                settings.strip_length_m
            )));
        }

        // All inputs are validated finite and positive, so the float->int
        // casts below only ever floor
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let total_leds = (settings.strip_length_m * density).floor() as usize;
        if total_leds == 0 {
            return Err(PacerError::invalid(format!(
                "strip of {}m at {density} LEDs/m holds no LEDs",
                settings.strip_length_m
            )));
        }

        let spacing_m = 1.0 / density;

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let pulse_width_leds =
            ((settings.pulse_width_m.max(0.0) * density + 1e-4).floor() as usize).max(1);

        let swim_time_s = settings.pool_length_m * 2.0 / settings.speed_mps;
        let effective_length_m = settings.strip_length_m.min(settings.pool_length_m);
        let animation_steps = effective_length_m * 2.0 * density;
        let raw_interval_ms = swim_time_s * 1000.0 / animation_steps;

        #[allow(
            clippy::cast_possible_truncation,
            clippy::cast_sign_loss,
            clippy::cast_precision_loss
        )]
        let step_interval_ms = if raw_interval_ms.is_finite() {
            raw_interval_ms
                .clamp(MIN_STEP_INTERVAL_MS as f32, MAX_STEP_INTERVAL_MS as f32)
                .round() as u32
        } else {
            MAX_STEP_INTERVAL_MS
        };

        Ok(Self {
            total_leds,
            spacing_m,
            pulse_width_leds,
            step_interval_ms,
        })
    }

    /// Number of whole LEDs covering `distance_m`.
    #[must_use]
    pub fn leds_for(&self, distance_m: f32) -> usize {
        if !distance_m.is_finite() || distance_m <= 0.0 {
            return 0;
        }
        // Small epsilon so 0.3m at 10/m is 3 LEDs, not 2.9999
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let leds = (distance_m / self.spacing_m + 1e-4).floor() as usize;
        leds
    }

    /// Index of the far wall.
    #[must_use]
    pub fn last_index(&self) -> usize {
        self.total_leds - 1
    }

    /// Steps in one full round trip along the strip.
    #[must_use]
    pub fn round_trip_steps(&self) -> u64 {
        (self.total_leds as u64).saturating_sub(1).max(1) * 2
    }
}
