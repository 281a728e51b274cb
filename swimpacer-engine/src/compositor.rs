//! Per-lane frame compositing.
//!
//! Layers are drawn top first and lower layers only fill pixels that are
//! still black, so a pulse always looks the same no matter which indicators
//! or zones sit underneath it:
//!
//! 1. swimmer pulses
//! 2. delay indicators (countdown before a swimmer leaves)
//! 3. underwater zones (off the wall a swimmer just pushed from)

use rgb::RGB8;

use crate::geometry::Geometry;
use crate::settings::{BlendMode, PacerSettings};
use crate::swimmer::{Direction, Swimmer};

/// Countdown starts this long before a swimmer leaves.
pub const DELAY_INDICATOR_WINDOW_MS: u64 = 5_000;

/// Each remaining second of countdown lights one foot of strip.
const INDICATOR_UNIT_M: f32 = 0.3048;

const BLACK: RGB8 = RGB8::new(0, 0, 0);

/// Scale each channel of `color` by `num / den`.
fn scale(color: RGB8, num: usize, den: usize) -> RGB8 {
    let channel = |c: u8| -> u8 {
        // num <= den, so the result always fits
        u8::try_from(usize::from(c) * num / den.max(1)).unwrap_or(u8::MAX)
    };
    RGB8::new(channel(color.r), channel(color.g), channel(color.b))
}

fn saturating_add(a: RGB8, b: RGB8) -> RGB8 {
    RGB8::new(
        a.r.saturating_add(b.r),
        a.g.saturating_add(b.g),
        a.b.saturating_add(b.b),
    )
}

/// Write `color` only where nothing has been drawn yet.
fn fill_black(pixel: &mut RGB8, color: RGB8) {
    if *pixel == BLACK {
        *pixel = color;
    }
}

/// Redraw one lane from scratch.
///
/// `swimmers` are the lane's active slots, in slot order.
pub fn composite_lane(
    frame: &mut [RGB8],
    swimmers: &[Swimmer],
    settings: &PacerSettings,
    geometry: &Geometry,
    now_ms: u64,
) {
    frame.fill(BLACK);

    for swimmer in swimmers {
        if swimmer.started || !settings.delay_indicators {
            draw_pulse(frame, swimmer, geometry.pulse_width_leds, settings.blend);
        }
    }

    if settings.delay_indicators {
        for swimmer in swimmers.iter().filter(|s| !s.started) {
            draw_delay_indicator(frame, swimmer, geometry, now_ms);
        }
    }

    if settings.underwater.enabled {
        for swimmer in swimmers.iter().filter(|s| s.started) {
            draw_underwater_zone(frame, swimmer, settings, geometry);
        }
    }
}

/// Draw a pulse centered on the swimmer with a linear falloff.
///
/// An even width cannot be centered, so the extra LED goes ahead of the
/// swimmer in its direction of travel.
pub fn draw_pulse(frame: &mut [RGB8], swimmer: &Swimmer, width: usize, blend: BlendMode) {
    let width = width.max(1);
    let reach = width / 2;
    let leading = width / 2;
    let trailing = (width - 1) / 2;

    // Offsets run from behind the swimmer to in front of it
    let leading = isize::try_from(leading).unwrap_or(isize::MAX);
    let trailing = isize::try_from(trailing).unwrap_or(isize::MAX);
    let Ok(position) = isize::try_from(swimmer.position) else {
        return;
    };

    for offset in -trailing..=leading {
        let index = match swimmer.direction {
            Direction::Forward => position + offset,
            Direction::Reverse => position - offset,
        };
        let Some(pixel) = usize::try_from(index).ok().and_then(|i| frame.get_mut(i)) else {
            continue;
        };

        let distance = offset.unsigned_abs();
        let color = scale(swimmer.color, reach + 1 - distance.min(reach), reach + 1);
        match blend {
            BlendMode::Clip => fill_black(pixel, color),
            BlendMode::Additive => *pixel = saturating_add(*pixel, color),
        }
    }
}

/// Countdown bar from LED 0: one unit per remaining second, at half the
/// swimmer's color.
pub fn draw_delay_indicator(frame: &mut [RGB8], swimmer: &Swimmer, geometry: &Geometry, now_ms: u64) {
    let remaining_ms = swimmer.remaining_ms(now_ms);
    if remaining_ms == 0 || remaining_ms > DELAY_INDICATOR_WINDOW_MS {
        return;
    }
    // At most 5 units, so the cast is lossless
    #[allow(clippy::cast_possible_truncation)]
    let units = remaining_ms.div_ceil(1000) as usize;
    let unit_leds = geometry.leds_for(INDICATOR_UNIT_M).max(1);
    let length = units * unit_leds;

    let color = scale(swimmer.color, 1, 2);
    for pixel in frame.iter_mut().take(length) {
        fill_black(pixel, color);
    }
}

/// Highlight the underwater zone at whichever wall the swimmer is near.
///
/// The zone reaches the first-length distance until the swimmer has turned
/// once, the subsequent distance after that.
pub fn draw_underwater_zone(
    frame: &mut [RGB8],
    swimmer: &Swimmer,
    settings: &PacerSettings,
    geometry: &Geometry,
) {
    let underwater = &settings.underwater;
    let distance_m = if swimmer.lengths == 0 {
        underwater.first_distance_m
    } else {
        underwater.subsequent_distance_m
    };
    let zone_leds = geometry.leds_for(distance_m).min(frame.len());
    if zone_leds == 0 {
        return;
    }

    let len = frame.len();
    let color = scale(underwater.color, usize::from(underwater.brightness), 255);
    for zone in [0..zone_leds, len - zone_leds..len] {
        if !zone.contains(&swimmer.position) {
            continue;
        }
        for pixel in &mut frame[zone] {
            fill_black(pixel, color);
        }
    }
}
