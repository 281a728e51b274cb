//! One synchronous tick of the pacer.
//!
//! Each tick runs four phases in order:
//!
//! 1. pick up pending settings: recompute geometry, resize lane buffers,
//!    reinitialize swimmers
//! 2. step every active swimmer
//! 3. composite running lanes and blank the rest
//! 4. present through the [`RenderDriver`]
//!
//! Buffers are only resized in phase 1, after the previous presentation has
//! returned, so a transfer never sees a buffer change underneath it.

use log::{debug, info, warn};
use rgb::RGB8;
use serde::Serialize;

use crate::change::Invalidation;
use crate::compositor::composite_lane;
use crate::error::PacerError;
use crate::geometry::Geometry;
use crate::render::{FrameThrottle, RenderDriver, RenderStats};
use crate::settings::{PacerSettings, MAX_LANES};
use crate::stepper::step;
use crate::store::{PendingChange, SharedSettings};
use crate::swimmer::{Swimmer, SwimmerTable};

/// Engine tuning that is not part of the user-facing settings.
#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    /// Shortest time between two presented frames
    pub frame_interval_ms: u32,
    /// Total LEDs the lane buffers may hold together
    pub led_budget: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            frame_interval_ms: 20,
            led_budget: usize::MAX,
        }
    }
}

/// What happened during one tick.
#[derive(Debug, Default, PartialEq)]
pub struct TickReport {
    /// Generation of settings applied this tick, if any
    pub applied: Option<u64>,
    /// LEDs moved, summed over all swimmers
    pub steps: u32,
    pub presented: bool,
    pub errors: Vec<PacerError>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LaneStatus {
    pub running: bool,
    pub swimmers: Vec<Swimmer>,
}

/// Snapshot of the engine for the status API.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub generation: u64,
    pub geometry: Geometry,
    pub stats: RenderStats,
    pub lanes: Vec<LaneStatus>,
}

fn resize_frame(
    frame: &mut Vec<RGB8>,
    lane: usize,
    len: usize,
    available: usize,
) -> Result<(), PacerError> {
    let failure = || PacerError::AllocationFailure {
        lane,
        requested: len,
    };
    if len > available {
        return Err(failure());
    }
    if len > frame.len() {
        frame
            .try_reserve_exact(len - frame.len())
            .map_err(|_| failure())?;
    }
    frame.resize(len, RGB8::default());
    frame.shrink_to_fit();
    Ok(())
}

pub struct PacerEngine {
    config: EngineConfig,
    settings: PacerSettings,
    geometry: Geometry,
    swimmers: SwimmerTable,
    frames: Vec<Vec<RGB8>>,
    /// Lanes currently animating, as last applied
    running: [bool; MAX_LANES],
    throttle: FrameThrottle,
    stats: RenderStats,
    generation: u64,
}

impl PacerEngine {
    /// Build the engine and allocate a buffer for every configured lane.
    ///
    /// Fails if the settings are invalid or any buffer cannot be allocated.
    pub fn new(settings: &PacerSettings, config: EngineConfig) -> Result<Self, PacerError> {
        settings.validate()?;
        let geometry = Geometry::recompute(settings)?;

        let mut engine = Self {
            config,
            settings: settings.clone(),
            geometry,
            swimmers: SwimmerTable::new(),
            frames: vec![Vec::new(); MAX_LANES],
            running: [false; MAX_LANES],
            throttle: FrameThrottle::new(config.frame_interval_ms),
            stats: RenderStats::default(),
            generation: 0,
        };
        for lane in 0..usize::from(settings.lane_count) {
            engine.size_lane(lane)?;
        }
        info!(
            "Pacer engine ready: {} LEDs per lane, {}ms per step",
            geometry.total_leds, geometry.step_interval_ms
        );
        Ok(engine)
    }

    /// Bring `lane`'s buffer to the current strip length, within the budget
    /// left over by every other lane's buffer.
    fn size_lane(&mut self, lane: usize) -> Result<(), PacerError> {
        let used: usize = (0..MAX_LANES)
            .filter(|&other| other != lane)
            .map(|other| self.frames[other].len())
            .sum();
        let available = self.config.led_budget.saturating_sub(used);
        resize_frame(
            &mut self.frames[lane],
            lane,
            self.geometry.total_leds,
            available,
        )
    }

    /// Run one tick at `now_ms`.
    pub fn tick(
        &mut self,
        shared: &SharedSettings,
        driver: &mut dyn RenderDriver,
        now_ms: u64,
    ) -> TickReport {
        let mut report = TickReport::default();

        if let Some(pending) = shared.take_pending() {
            report.applied = Some(pending.generation);
            self.apply_pending(pending, shared, driver, now_ms, &mut report);
        }

        for lane in 0..MAX_LANES {
            if !self.running[lane] {
                continue;
            }
            if let Ok(swimmers) = self.swimmers.active_mut(lane, &self.settings) {
                for swimmer in swimmers {
                    report.steps += step(swimmer, now_ms, &self.geometry);
                }
            }
        }

        let pixels: usize = self.frames.iter().map(Vec::len).sum();
        let lanes = self.frames.iter().filter(|f| !f.is_empty()).count();
        if !self.throttle.ready(now_ms, pixels, lanes) {
            return report;
        }

        for lane in 0..MAX_LANES {
            let frame = &mut self.frames[lane];
            if self.running[lane] && frame.len() == self.geometry.total_leds {
                if let Ok(swimmers) = self.swimmers.active(lane, &self.settings) {
                    composite_lane(frame, swimmers, &self.settings, &self.geometry, now_ms);
                }
            } else {
                frame.fill(RGB8::default());
            }
        }

        self.throttle.mark(now_ms);
        match driver.present(&self.frames) {
            Ok(()) => {
                self.stats.presented += 1;
                report.presented = true;
            }
            Err(e) => {
                self.stats.skipped += 1;
                warn!("Frame skipped: {e}");
                report.errors.push(e);
            }
        }
        report
    }

    fn apply_pending(
        &mut self,
        pending: PendingChange,
        shared: &SharedSettings,
        driver: &mut dyn RenderDriver,
        now_ms: u64,
        report: &mut TickReport,
    ) {
        let PendingChange {
            settings,
            invalidations,
            generation,
        } = pending;
        debug!("Applying settings generation {generation}: {invalidations:?}");

        let mut geometry_changed = false;
        if invalidations.contains(Invalidation::Geometry) {
            match Geometry::recompute(&settings) {
                Ok(geometry) => {
                    geometry_changed = geometry != self.geometry;
                    if geometry_changed {
                        debug!("Geometry now {geometry:?}");
                    }
                    self.geometry = geometry;
                }
                // Settings were validated on commit, so this only guards
                // against a store handing us something odd
                Err(e) => {
                    warn!("Keeping previous geometry: {e}");
                    report.errors.push(e);
                }
            }
        }
        if invalidations.contains(Invalidation::Visual) {
            driver.set_brightness(settings.brightness);
        }

        let reinit_all = geometry_changed || invalidations.contains(Invalidation::Swimmers);
        self.settings = settings;

        // Lanes past the lane count give their memory back before anything grows
        let configured = usize::from(self.settings.lane_count).min(MAX_LANES);
        for frame in &mut self.frames[configured..] {
            if !frame.is_empty() {
                *frame = Vec::new();
            }
        }

        for lane in 0..MAX_LANES {
            let mut wanted = self.settings.lane_running(lane);

            if lane < configured && self.frames[lane].len() != self.geometry.total_leds
            {
                if let Err(e) = self.size_lane(lane) {
                    warn!("Lane {lane}: {e}");
                    if wanted {
                        shared.force_stop(lane);
                        self.settings.running[lane] = false;
                        wanted = false;
                    }
                    report.errors.push(e);
                }
            }

            if wanted && (reinit_all || !self.running[lane]) {
                if let Err(e) = self.swimmers.reinitialize(lane, &self.settings, now_ms) {
                    report.errors.push(e);
                    wanted = false;
                }
            }
            if self.running[lane] != wanted {
                info!("Lane {lane} {}", if wanted { "started" } else { "stopped" });
            }
            self.running[lane] = wanted;
        }
        self.generation = generation;
    }

    #[must_use]
    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    #[must_use]
    pub fn settings(&self) -> &PacerSettings {
        &self.settings
    }

    #[must_use]
    pub fn frames(&self) -> &[Vec<RGB8>] {
        &self.frames
    }

    #[must_use]
    pub fn stats(&self) -> RenderStats {
        self.stats
    }

    #[must_use]
    pub fn lane_running(&self, lane: usize) -> bool {
        self.running.get(lane).copied().unwrap_or(false)
    }

    /// Milliseconds until the next frame may be presented.
    #[must_use]
    pub fn wait_ms(&self, now_ms: u64) -> u64 {
        let pixels: usize = self.frames.iter().map(Vec::len).sum();
        let lanes = self.frames.iter().filter(|f| !f.is_empty()).count();
        self.throttle.wait_ms(now_ms, pixels, lanes)
    }

    #[must_use]
    pub fn status(&self) -> EngineStatus {
        let lanes = (0..MAX_LANES)
            .map(|lane| LaneStatus {
                running: self.running[lane],
                swimmers: self
                    .swimmers
                    .active(lane, &self.settings)
                    .map(<[Swimmer]>::to_vec)
                    .unwrap_or_default(),
            })
            .collect();
        EngineStatus {
            generation: self.generation,
            geometry: self.geometry,
            stats: self.stats,
            lanes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::change::ConfigChange;
    use crate::store::MemoryStore;

    #[derive(Default)]
    struct RecordingDriver {
        frames: Vec<Vec<Vec<RGB8>>>,
        brightness: Option<u8>,
        fail: bool,
    }

    impl RenderDriver for RecordingDriver {
        fn present(&mut self, frames: &[Vec<RGB8>]) -> Result<(), PacerError> {
            if self.fail {
                return Err(PacerError::RenderTimeout { budget_ms: 50 });
            }
            self.frames.push(frames.to_vec());
            Ok(())
        }

        fn set_brightness(&mut self, brightness: u8) {
            self.brightness = Some(brightness);
        }
    }

    fn small_settings() -> PacerSettings {
        PacerSettings {
            pool_length_m: 10.0,
            strip_length_m: 10.0,
            leds_per_meter: 10.0,
            pulse_width_m: 0.3,
            lane_count: 2,
            swimmer_count: 2,
            initial_delay_s: 1.0,
            swimmer_interval_s: 1.0,
            ..PacerSettings::default()
        }
    }

    fn setup(settings: PacerSettings) -> (PacerEngine, SharedSettings, RecordingDriver) {
        let engine = PacerEngine::new(&settings, EngineConfig::default()).unwrap();
        let shared = SharedSettings::new(settings, Box::new(MemoryStore::new()));
        (engine, shared, RecordingDriver::default())
    }

    fn lit(frame: &[RGB8]) -> usize {
        frame.iter().filter(|p| **p != RGB8::default()).count()
    }

    #[test]
    fn test_stopped_lanes_are_blank() {
        let (mut engine, shared, mut driver) = setup(small_settings());
        let report = engine.tick(&shared, &mut driver, 0);
        assert!(report.presented);
        assert_eq!(report.applied, Some(0));
        let frames = driver.frames.last().unwrap();
        assert_eq!(frames.len(), MAX_LANES);
        assert_eq!(frames[0].len(), 100);
        assert!(frames.iter().all(|f| lit(f) == 0));
    }

    #[test]
    fn test_lane_start_reinitializes_from_now() {
        let (mut engine, shared, mut driver) = setup(small_settings());
        engine.tick(&shared, &mut driver, 0);

        shared
            .apply_change(ConfigChange::ToggleLane(0))
            .unwrap();
        engine.tick(&shared, &mut driver, 5_000);
        let lane = engine.status().lanes.swap_remove(0);
        assert!(lane.running);
        assert_eq!(lane.swimmers[0].start_ms, 6_000);
        assert_eq!(lane.swimmers[1].start_ms, 7_000);
        // Countdown is showing, nobody swims yet
        assert!(!lane.swimmers[0].started);
        assert!(lit(&driver.frames.last().unwrap()[0]) > 0);

        let report = engine.tick(&shared, &mut driver, 6_000);
        assert_eq!(report.steps, 1);
        assert!(engine.status().lanes[0].swimmers[0].started);
        assert!(!engine.lane_running(1));
    }

    #[test]
    fn test_swimmers_keep_moving_between_changes() {
        let (mut engine, shared, mut driver) = setup(small_settings());
        shared
            .apply_change(ConfigChange::SetLaneRunning {
                lane: 0,
                running: true,
            })
            .unwrap();
        engine.tick(&shared, &mut driver, 0);
        for now in (1_000..10_000).step_by(20) {
            engine.tick(&shared, &mut driver, now);
        }
        let position = engine.status().lanes[0].swimmers[0].position;
        assert!(position > 0);

        // Changing only the blend mode must not send swimmers back to the wall
        shared
            .apply_change(ConfigChange::Blend(crate::settings::BlendMode::Additive))
            .unwrap();
        engine.tick(&shared, &mut driver, 10_000);
        assert!(engine.status().lanes[0].swimmers[0].position > 0);
    }

    #[test]
    fn test_geometry_change_resizes_and_restarts() {
        let (mut engine, shared, mut driver) = setup(small_settings());
        shared
            .apply_change(ConfigChange::ToggleLane(0))
            .unwrap();
        engine.tick(&shared, &mut driver, 0);
        engine.tick(&shared, &mut driver, 3_000);

        shared
            .apply_change(ConfigChange::LedsPerMeter(20.0))
            .unwrap();
        engine.tick(&shared, &mut driver, 4_000);
        assert_eq!(engine.geometry().total_leds, 200);
        assert_eq!(engine.frames()[0].len(), 200);
        assert_eq!(engine.frames()[1].len(), 200);
        let swimmer = engine.status().lanes[0].swimmers[0];
        assert_eq!(swimmer.start_ms, 5_000);
        assert_eq!(swimmer.position, 0);
    }

    #[test]
    fn test_allocation_failure_stops_lane() {
        let settings = PacerSettings {
            running: [true, true, false, false],
            ..small_settings()
        };
        let config = EngineConfig {
            led_budget: 300,
            ..EngineConfig::default()
        };
        let mut engine = PacerEngine::new(&settings, config).unwrap();
        let shared = SharedSettings::new(settings, Box::new(MemoryStore::new()));
        let mut driver = RecordingDriver::default();
        engine.tick(&shared, &mut driver, 0);
        assert!(engine.lane_running(0));
        assert!(engine.lane_running(1));

        // 2 x 200 LEDs no longer fits
        shared
            .apply_change(ConfigChange::LedsPerMeter(20.0))
            .unwrap();
        let report = engine.tick(&shared, &mut driver, 100);

        assert_eq!(
            report.errors,
            vec![PacerError::AllocationFailure {
                lane: 1,
                requested: 200
            }]
        );
        assert!(engine.lane_running(0));
        assert!(!engine.lane_running(1));
        assert!(!shared.snapshot().running[1]);
        // Previous buffer kept, and blanked
        assert_eq!(engine.frames()[1].len(), 100);
        assert!(report.presented);
        assert_eq!(lit(&driver.frames.last().unwrap()[1]), 0);
    }

    #[test]
    fn test_removed_lanes_release_their_budget() {
        let config = EngineConfig {
            led_budget: 250,
            ..EngineConfig::default()
        };
        let mut engine = PacerEngine::new(&small_settings(), config).unwrap();
        let shared = SharedSettings::new(small_settings(), Box::new(MemoryStore::new()));
        let mut driver = RecordingDriver::default();
        engine.tick(&shared, &mut driver, 0);
        assert_eq!(engine.frames()[1].len(), 100);

        shared.apply_change(ConfigChange::LaneCount(1)).unwrap();
        engine.tick(&shared, &mut driver, 100);
        assert!(engine.frames()[1].is_empty());

        shared
            .apply_change(ConfigChange::LedsPerMeter(20.0))
            .unwrap();
        let report = engine.tick(&shared, &mut driver, 200);
        assert_eq!(report.errors, vec![]);
        assert_eq!(engine.frames()[0].len(), 200);
        let held: usize = engine.frames().iter().map(Vec::len).sum();
        assert!(held <= 250);

        // Growing the lane count again must fit the same budget
        shared.apply_change(ConfigChange::LaneCount(2)).unwrap();
        let report = engine.tick(&shared, &mut driver, 300);
        assert_eq!(
            report.errors,
            vec![PacerError::AllocationFailure {
                lane: 1,
                requested: 200
            }]
        );
        let held: usize = engine.frames().iter().map(Vec::len).sum();
        assert!(held <= 250);
    }

    #[test]
    fn test_lane_count_and_strip_change_together() {
        let config = EngineConfig {
            led_budget: 250,
            ..EngineConfig::default()
        };
        let mut engine = PacerEngine::new(&small_settings(), config).unwrap();
        let shared = SharedSettings::new(small_settings(), Box::new(MemoryStore::new()));
        let mut driver = RecordingDriver::default();
        engine.tick(&shared, &mut driver, 0);

        // Both land in the same tick
        shared.apply_change(ConfigChange::LaneCount(1)).unwrap();
        shared
            .apply_change(ConfigChange::LedsPerMeter(20.0))
            .unwrap();
        let report = engine.tick(&shared, &mut driver, 100);
        assert_eq!(report.errors, vec![]);
        assert_eq!(engine.frames()[0].len(), 200);
        assert!(engine.frames()[1].is_empty());
    }

    #[test]
    fn test_startup_allocation_failure() {
        let config = EngineConfig {
            led_budget: 150,
            ..EngineConfig::default()
        };
        assert!(matches!(
            PacerEngine::new(&small_settings(), config),
            Err(PacerError::AllocationFailure { lane: 1, .. })
        ));
    }

    #[test]
    fn test_render_failure_is_counted_and_retried() {
        let (mut engine, shared, mut driver) = setup(small_settings());
        driver.fail = true;
        let report = engine.tick(&shared, &mut driver, 0);
        assert!(!report.presented);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(engine.stats().skipped, 1);

        driver.fail = false;
        let report = engine.tick(&shared, &mut driver, 100);
        assert!(report.presented);
        assert_eq!(
            engine.stats(),
            RenderStats {
                presented: 1,
                skipped: 1
            }
        );
    }

    #[test]
    fn test_presentations_are_throttled() {
        let (mut engine, shared, mut driver) = setup(small_settings());
        assert!(engine.tick(&shared, &mut driver, 0).presented);
        assert!(!engine.tick(&shared, &mut driver, 5).presented);
        assert_eq!(engine.wait_ms(5), 15);
        assert!(engine.tick(&shared, &mut driver, 20).presented);
        assert_eq!(driver.frames.len(), 2);
    }

    #[test]
    fn test_brightness_reaches_driver() {
        let (mut engine, shared, mut driver) = setup(small_settings());
        engine.tick(&shared, &mut driver, 0);
        assert_eq!(driver.brightness, Some(196));

        shared.apply_change(ConfigChange::Brightness(40)).unwrap();
        engine.tick(&shared, &mut driver, 100);
        assert_eq!(driver.brightness, Some(40));
    }

    #[test]
    fn test_rejected_change_keeps_animation() {
        let (mut engine, shared, mut driver) = setup(small_settings());
        engine.tick(&shared, &mut driver, 0);
        let geometry = *engine.geometry();

        assert!(shared.apply_change(ConfigChange::LedsPerMeter(0.0)).is_err());
        let report = engine.tick(&shared, &mut driver, 100);
        assert_eq!(report.applied, None);
        assert_eq!(*engine.geometry(), geometry);
    }
}
