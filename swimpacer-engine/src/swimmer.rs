//! Fixed arena of swimmer actors, indexed by lane and slot.

use rgb::RGB8;
use serde::Serialize;

use crate::error::PacerError;
use crate::settings::{PacerSettings, MAX_LANES, MAX_SWIMMERS};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Away from LED 0
    #[default]
    Forward,
    /// Back toward LED 0
    Reverse,
}

impl Direction {
    #[must_use]
    pub fn reversed(self) -> Self {
        match self {
            Self::Forward => Self::Reverse,
            Self::Reverse => Self::Forward,
        }
    }
}

/// One moving pulse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Swimmer {
    /// LED index, always within the strip
    pub position: usize,
    pub direction: Direction,
    /// When this swimmer leaves the wall
    pub start_ms: u64,
    /// Time credited to the last step, advanced in whole intervals
    pub last_step_ms: u64,
    /// Set once, on the first tick at or after `start_ms`
    pub started: bool,
    pub color: RGB8,
    /// Wall turns since the start
    pub lengths: u32,
}

impl Swimmer {
    /// A swimmer resting at LED 0, due to leave at `start_ms`.
    #[must_use]
    pub fn waiting(start_ms: u64, color: RGB8) -> Self {
        Self {
            position: 0,
            direction: Direction::Forward,
            start_ms,
            last_step_ms: start_ms,
            started: false,
            color,
            lengths: 0,
        }
    }

    /// Milliseconds until this swimmer starts, zero once due.
    #[must_use]
    pub fn remaining_ms(&self, now_ms: u64) -> u64 {
        self.start_ms.saturating_sub(now_ms)
    }
}

/// All swimmers for all lanes. Slots beyond the active count are kept but
/// never stepped or drawn.
#[derive(Debug, Clone, Default)]
pub struct SwimmerTable {
    lanes: [[Swimmer; MAX_SWIMMERS]; MAX_LANES],
}

impl SwimmerTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset every slot of `lane` to the wall, with start times staggered
    /// from `now_ms`.
    pub fn reinitialize(
        &mut self,
        lane: usize,
        settings: &PacerSettings,
        now_ms: u64,
    ) -> Result<(), PacerError> {
        let swimmers = self.lane_mut(lane)?;
        for (slot, swimmer) in swimmers.iter_mut().enumerate() {
            *swimmer = Swimmer::waiting(
                now_ms.saturating_add(settings.start_offset_ms(slot)),
                settings.swimmer_color(slot),
            );
        }
        Ok(())
    }

    /// Number of slots that take part in `lane`.
    #[must_use]
    pub fn active_slots(lane: usize, settings: &PacerSettings) -> usize {
        if lane >= usize::from(settings.lane_count).min(MAX_LANES) {
            return 0;
        }
        usize::from(settings.swimmer_count).min(MAX_SWIMMERS)
    }

    /// Every slot of `lane`, active or not.
    pub fn lane(&self, lane: usize) -> Result<&[Swimmer; MAX_SWIMMERS], PacerError> {
        PacerSettings::check_lane(lane)?;
        Ok(&self.lanes[lane])
    }

    pub fn lane_mut(&mut self, lane: usize) -> Result<&mut [Swimmer; MAX_SWIMMERS], PacerError> {
        PacerSettings::check_lane(lane)?;
        Ok(&mut self.lanes[lane])
    }

    /// Only the active slots of `lane`.
    pub fn active(&self, lane: usize, settings: &PacerSettings) -> Result<&[Swimmer], PacerError> {
        let count = Self::active_slots(lane, settings);
        Ok(&self.lane(lane)?[..count])
    }

    pub fn active_mut(
        &mut self,
        lane: usize,
        settings: &PacerSettings,
    ) -> Result<&mut [Swimmer], PacerError> {
        let count = Self::active_slots(lane, settings);
        Ok(&mut self.lane_mut(lane)?[..count])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_times_are_staggered() {
        let settings = PacerSettings {
            swimmer_count: 3,
            initial_delay_s: 10.0,
            swimmer_interval_s: 4.0,
            ..PacerSettings::default()
        };
        let mut table = SwimmerTable::new();
        table.reinitialize(0, &settings, 1_000).unwrap();

        let starts: Vec<u64> = table
            .active(0, &settings)
            .unwrap()
            .iter()
            .map(|s| s.start_ms)
            .collect();
        assert_eq!(starts, vec![11_000, 15_000, 19_000]);
    }

    #[test]
    fn test_reinitialize_resets_every_slot() {
        let settings = PacerSettings::default();
        let mut table = SwimmerTable::new();
        {
            let lane = table.lane_mut(1).unwrap();
            lane[0].position = 40;
            lane[0].direction = Direction::Reverse;
            lane[0].started = true;
            lane[0].lengths = 3;
            // Inactive slot gets reset too
            lane[5].position = 12;
        }
        table.reinitialize(1, &settings, 0).unwrap();

        for swimmer in table.lane(1).unwrap() {
            assert_eq!(swimmer.position, 0);
            assert_eq!(swimmer.direction, Direction::Forward);
            assert!(!swimmer.started);
            assert_eq!(swimmer.lengths, 0);
        }
    }

    #[test]
    fn test_slot_colors() {
        let mut settings = PacerSettings::default();
        settings.swimmer_colors[2] = Some(RGB8::new(0, 255, 0));
        let mut table = SwimmerTable::new();
        table.reinitialize(0, &settings, 0).unwrap();

        let lane = table.lane(0).unwrap();
        assert_eq!(lane[0].color, settings.color);
        assert_eq!(lane[2].color, RGB8::new(0, 255, 0));
    }

    #[test]
    fn test_active_slots() {
        let settings = PacerSettings {
            lane_count: 2,
            swimmer_count: 4,
            ..PacerSettings::default()
        };
        assert_eq!(SwimmerTable::active_slots(0, &settings), 4);
        assert_eq!(SwimmerTable::active_slots(1, &settings), 4);
        assert_eq!(SwimmerTable::active_slots(2, &settings), 0);
        assert_eq!(SwimmerTable::active_slots(17, &settings), 0);
    }

    #[test]
    fn test_lane_out_of_range() {
        let mut table = SwimmerTable::new();
        let settings = PacerSettings::default();
        assert!(matches!(
            table.reinitialize(MAX_LANES, &settings, 0),
            Err(PacerError::InvalidConfiguration { .. })
        ));
        assert!(table.lane(MAX_LANES).is_err());
    }

    #[test]
    fn test_remaining_ms() {
        let swimmer = Swimmer::waiting(5_000, RGB8::default());
        assert_eq!(swimmer.remaining_ms(1_500), 3_500);
        assert_eq!(swimmer.remaining_ms(5_000), 0);
        assert_eq!(swimmer.remaining_ms(9_000), 0);
    }
}
