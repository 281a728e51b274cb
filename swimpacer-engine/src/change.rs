//! Typed configuration change requests.
//!
//! The web UI sends one field at a time, e.g.
//! `{"field": "speed_mps", "value": 1.2}`. Each change reports which derived
//! state it makes stale so the tick loop only rebuilds what it must.

use enumset::{EnumSet, EnumSetType};
use rgb::RGB8;
use serde::{Deserialize, Serialize};

use crate::error::PacerError;
use crate::settings::{BlendMode, PacerSettings, MAX_LANES, MAX_SWIMMERS};

/// Derived state a change can make stale.
#[derive(EnumSetType, Debug)]
pub enum Invalidation {
    /// Strip geometry, and with it frame buffers and swimmer positions
    Geometry,
    /// Swimmer start times and colors
    Swimmers,
    /// A lane was started or stopped
    RunState,
    /// Only how frames are drawn (blend, overlays, brightness)
    Visual,
}

pub type Invalidations = EnumSet<Invalidation>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "field", content = "value", rename_all = "snake_case")]
pub enum ConfigChange {
    PoolLengthM(f32),
    StripLengthM(f32),
    LedsPerMeter(f32),
    LaneCount(u8),
    PulseWidthM(f32),
    SpeedMps(f32),
    RestS(f32),
    PaceDistanceM(f32),
    InitialDelayS(f32),
    SwimmerIntervalS(f32),
    SwimmerCount(u8),
    RoundCount(u16),
    Color(RGB8),
    Brightness(u8),
    /// Override one slot's color; `None` falls back to the primary color
    SwimmerColor {
        slot: usize,
        color: Option<RGB8>,
    },
    DelayIndicators(bool),
    UnderwaterEnabled(bool),
    UnderwaterColor(RGB8),
    UnderwaterBrightness(u8),
    UnderwaterFirstDistanceM(f32),
    UnderwaterSubsequentDistanceM(f32),
    Blend(BlendMode),
    ToggleLane(usize),
    SetLaneRunning {
        lane: usize,
        running: bool,
    },
    StopAll,
}

impl ConfigChange {
    /// Apply to `settings` without validating the result.
    ///
    /// Only index bounds are checked here; callers validate the whole
    /// settings afterwards and discard the copy if that fails.
    pub fn apply(&self, settings: &mut PacerSettings) -> Result<Invalidations, PacerError> {
        use Invalidation::{Geometry, RunState, Swimmers, Visual};

        let invalidations = match *self {
            Self::PoolLengthM(v) => {
                settings.pool_length_m = v;
                Geometry.into()
            }
            Self::StripLengthM(v) => {
                settings.strip_length_m = v;
                Geometry.into()
            }
            Self::LedsPerMeter(v) => {
                settings.leds_per_meter = v;
                Geometry.into()
            }
            Self::LaneCount(v) => {
                settings.lane_count = v;
                RunState.into()
            }
            Self::PulseWidthM(v) => {
                settings.pulse_width_m = v;
                Geometry.into()
            }
            Self::SpeedMps(v) => {
                settings.speed_mps = v;
                Geometry.into()
            }
            // Only feed the pace summary
            Self::RestS(v) => {
                settings.rest_s = v;
                EnumSet::empty()
            }
            Self::PaceDistanceM(v) => {
                settings.pace_distance_m = v;
                EnumSet::empty()
            }
            Self::RoundCount(v) => {
                settings.round_count = v;
                EnumSet::empty()
            }
            Self::InitialDelayS(v) => {
                settings.initial_delay_s = v;
                Swimmers.into()
            }
            Self::SwimmerIntervalS(v) => {
                settings.swimmer_interval_s = v;
                Swimmers.into()
            }
            Self::SwimmerCount(v) => {
                settings.swimmer_count = v;
                Swimmers.into()
            }
            Self::Color(v) => {
                settings.color = v;
                Swimmers.into()
            }
            Self::SwimmerColor { slot, color } => {
                if slot >= MAX_SWIMMERS {
                    return Err(PacerError::invalid(format!(
                        "swimmer slot {slot} out of range (0-{})",
                        MAX_SWIMMERS - 1
                    )));
                }
                settings.swimmer_colors[slot] = color;
                Swimmers.into()
            }
            Self::Brightness(v) => {
                settings.brightness = v;
                Visual.into()
            }
            Self::DelayIndicators(v) => {
                settings.delay_indicators = v;
                Visual.into()
            }
            Self::UnderwaterEnabled(v) => {
                settings.underwater.enabled = v;
                Visual.into()
            }
            Self::UnderwaterColor(v) => {
                settings.underwater.color = v;
                Visual.into()
            }
            Self::UnderwaterBrightness(v) => {
                settings.underwater.brightness = v;
                Visual.into()
            }
            Self::UnderwaterFirstDistanceM(v) => {
                settings.underwater.first_distance_m = v;
                Visual.into()
            }
            Self::UnderwaterSubsequentDistanceM(v) => {
                settings.underwater.subsequent_distance_m = v;
                Visual.into()
            }
            Self::Blend(v) => {
                settings.blend = v;
                Visual.into()
            }
            Self::ToggleLane(lane) => {
                PacerSettings::check_lane(lane)?;
                settings.running[lane] = !settings.running[lane];
                RunState.into()
            }
            Self::SetLaneRunning { lane, running } => {
                PacerSettings::check_lane(lane)?;
                settings.running[lane] = running;
                RunState.into()
            }
            Self::StopAll => {
                settings.running = [false; MAX_LANES];
                RunState.into()
            }
        };
        Ok(invalidations)
    }
}

/// Everything that differs between two settings, for whole-document
/// replacement.
#[must_use]
pub fn invalidations_between(old: &PacerSettings, new: &PacerSettings) -> Invalidations {
    use Invalidation::{Geometry, RunState, Swimmers, Visual};

    let mut invalidations = EnumSet::empty();
    if old.pool_length_m != new.pool_length_m
        || old.strip_length_m != new.strip_length_m
        || old.leds_per_meter != new.leds_per_meter
        || old.pulse_width_m != new.pulse_width_m
        || old.speed_mps != new.speed_mps
    {
        invalidations |= Geometry;
    }
    if old.initial_delay_s != new.initial_delay_s
        || old.swimmer_interval_s != new.swimmer_interval_s
        || old.swimmer_count != new.swimmer_count
        || old.color != new.color
        || old.swimmer_colors != new.swimmer_colors
    {
        invalidations |= Swimmers;
    }
    if old.running != new.running || old.lane_count != new.lane_count {
        invalidations |= RunState;
    }
    if old.brightness != new.brightness
        || old.delay_indicators != new.delay_indicators
        || old.underwater != new.underwater
        || old.blend != new.blend
    {
        invalidations |= Visual;
    }
    invalidations
}
