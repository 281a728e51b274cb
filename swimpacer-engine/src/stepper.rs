//! Time-driven swimmer movement.
//!
//! A swimmer moves one LED per `step_interval_ms`. Ticks rarely land exactly
//! on an interval boundary, so `last_step_ms` is advanced by whole intervals
//! rather than set to `now`; that keeps the average speed exact even when the
//! tick loop jitters.

use crate::geometry::Geometry;
use crate::swimmer::{Direction, Swimmer};

/// Step `swimmer` up to `now_ms`, returning the number of LEDs it moved.
pub fn step(swimmer: &mut Swimmer, now_ms: u64, geometry: &Geometry) -> u32 {
    if now_ms < swimmer.start_ms {
        return 0;
    }

    if !swimmer.started {
        swimmer.started = true;
        swimmer.last_step_ms = now_ms;
        advance(swimmer, geometry.total_leds);
        return 1;
    }

    let interval = u64::from(geometry.step_interval_ms.max(1));
    let elapsed = now_ms.saturating_sub(swimmer.last_step_ms);
    let mut due = elapsed / interval;
    if due == 0 {
        return 0;
    }

    // A stalled loop would otherwise replay many laps in one frame
    let max_backlog = geometry.round_trip_steps() * 2;
    if due > max_backlog {
        log::debug!("Dropping {due} step backlog");
        swimmer.last_step_ms = now_ms;
        due = 1;
    } else {
        swimmer.last_step_ms += due * interval;
    }

    for _ in 0..due {
        advance(swimmer, geometry.total_leds);
    }
    u32::try_from(due).unwrap_or(u32::MAX)
}

/// Move one LED in the current direction, turning at either wall.
pub fn advance(swimmer: &mut Swimmer, total_leds: usize) {
    let last = total_leds.saturating_sub(1);
    match swimmer.direction {
        Direction::Forward => {
            if swimmer.position + 1 >= last {
                swimmer.position = last;
                swimmer.direction = Direction::Reverse;
                swimmer.lengths = swimmer.lengths.saturating_add(1);
            } else {
                swimmer.position += 1;
            }
        }
        Direction::Reverse => {
            if swimmer.position <= 1 {
                swimmer.position = 0;
                swimmer.direction = Direction::Forward;
                swimmer.lengths = swimmer.lengths.saturating_add(1);
            } else {
                swimmer.position -= 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rgb::RGB8;

    fn geometry(total_leds: usize, step_interval_ms: u32) -> Geometry {
        Geometry {
            total_leds,
            spacing_m: 1.0 / 30.0,
            pulse_width_leds: 1,
            step_interval_ms,
        }
    }

    #[test]
    fn test_pending_swimmer_does_not_move() {
        let geometry = geometry(100, 20);
        let mut swimmer = Swimmer::waiting(1_000, RGB8::default());
        assert_eq!(step(&mut swimmer, 0, &geometry), 0);
        assert_eq!(step(&mut swimmer, 999, &geometry), 0);
        assert!(!swimmer.started);
        assert_eq!(swimmer.position, 0);
    }

    #[test]
    fn test_starts_exactly_once() {
        let geometry = geometry(100, 20);
        let mut swimmer = Swimmer::waiting(1_000, RGB8::default());

        assert_eq!(step(&mut swimmer, 1_005, &geometry), 1);
        assert!(swimmer.started);
        assert_eq!(swimmer.position, 1);
        assert_eq!(swimmer.last_step_ms, 1_005);

        // Within the interval: nothing, and `started` stays set
        assert_eq!(step(&mut swimmer, 1_010, &geometry), 0);
        assert!(swimmer.started);
        assert_eq!(swimmer.position, 1);
    }

    #[test]
    fn test_catch_up_keeps_cadence() {
        let geometry = geometry(100, 20);
        let mut swimmer = Swimmer::waiting(0, RGB8::default());
        step(&mut swimmer, 0, &geometry);

        // 55ms later: two whole intervals due, 15ms carried over
        assert_eq!(step(&mut swimmer, 55, &geometry), 2);
        assert_eq!(swimmer.position, 3);
        assert_eq!(swimmer.last_step_ms, 40);

        // The carried 15ms counts toward the next step
        assert_eq!(step(&mut swimmer, 60, &geometry), 1);
        assert_eq!(swimmer.position, 4);
    }

    #[test]
    fn test_large_backlog_is_dropped() {
        let geometry = geometry(10, 20);
        let mut swimmer = Swimmer::waiting(0, RGB8::default());
        step(&mut swimmer, 0, &geometry);

        let position = swimmer.position;
        assert_eq!(step(&mut swimmer, 1_000_000, &geometry), 1);
        assert_eq!(swimmer.last_step_ms, 1_000_000);
        assert_eq!(swimmer.position, position + 1);
    }

    #[test]
    fn test_turns_at_far_wall() {
        let mut swimmer = Swimmer {
            position: 9,
            direction: Direction::Forward,
            ..Swimmer::default()
        };
        advance(&mut swimmer, 10);
        assert_eq!(swimmer.position, 9);
        assert_eq!(swimmer.direction, Direction::Reverse);
        assert_eq!(swimmer.lengths, 1);

        advance(&mut swimmer, 10);
        assert_eq!(swimmer.position, 8);
    }

    #[test]
    fn test_turns_on_reaching_either_wall() {
        let mut swimmer = Swimmer {
            position: 8,
            direction: Direction::Forward,
            ..Swimmer::default()
        };
        advance(&mut swimmer, 10);
        assert_eq!(swimmer.position, 9);
        assert_eq!(swimmer.direction, Direction::Reverse);

        let mut swimmer = Swimmer {
            position: 1,
            direction: Direction::Reverse,
            ..Swimmer::default()
        };
        advance(&mut swimmer, 10);
        assert_eq!(swimmer.position, 0);
        assert_eq!(swimmer.direction, Direction::Forward);
        assert_eq!(swimmer.lengths, 1);
    }

    #[test]
    fn test_position_stays_in_range() {
        for total_leds in [1, 2, 3, 17, 300] {
            let geometry = geometry(total_leds, 10);
            let mut swimmer = Swimmer::waiting(0, RGB8::default());
            let mut now = 0;
            for tick in 0..5_000u64 {
                // Irregular tick spacing
                now += 3 + tick % 29;
                step(&mut swimmer, now, &geometry);
                assert!(swimmer.position < total_leds, "{total_leds} LEDs, tick {tick}");
            }
        }
    }

    #[test]
    fn test_single_led_strip() {
        let mut swimmer = Swimmer::default();
        advance(&mut swimmer, 1);
        assert_eq!(swimmer.position, 0);
        advance(&mut swimmer, 1);
        assert_eq!(swimmer.position, 0);
    }

    #[test]
    fn test_length_count_saturates() {
        // Every step on a single LED is a turn
        let mut swimmer = Swimmer {
            lengths: u32::MAX - 1,
            ..Swimmer::default()
        };
        advance(&mut swimmer, 1);
        advance(&mut swimmer, 1);
        advance(&mut swimmer, 1);
        assert_eq!(swimmer.lengths, u32::MAX);
        assert_eq!(swimmer.position, 0);
    }
}
