//! The pacer task: owns the engine and the strips and runs the tick loop.

use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use swimpacer_engine::PacerEngine;

use crate::leds::StripDriver;
use crate::watchdog::WatchdogHandle;
use crate::State;

/// Longest sleep between ticks, so swimmers never fall far behind
const MAX_IDLE_MS: u64 = 10;

/// How often the status snapshot for the web UI is refreshed
const STATUS_INTERVAL_MS: u64 = 250;

/// Messages sent to the pacer task
#[derive(Debug, Clone)]
pub enum PacerTaskMessage {
    /// Settings changed, apply them without waiting for the next tick
    SettingsChanged,
}

/// Channel sender for messages to the pacer task
pub type PacerTaskSender = Sender<PacerTaskMessage>;

/// Run the pacer tick loop until the channel closes.
// Receiver is intentionally moved into this task for exclusive ownership
#[allow(clippy::needless_pass_by_value)]
pub fn pacer_task(
    state: &Arc<State>,
    mut engine: PacerEngine,
    mut driver: StripDriver,
    rx: Receiver<PacerTaskMessage>,
) {
    // Boot animation in the lane color
    {
        let settings = engine.settings();
        if let Err(e) = driver.boot_animation(engine.geometry().total_leds, settings.color) {
            warn!("Boot animation failed: {e}");
        }
    }

    let watchdog = match WatchdogHandle::register(c"pacer_task") {
        Ok(watchdog) => Some(watchdog),
        Err(e) => {
            warn!("Running pacer task without watchdog: {e}");
            None
        }
    };
    info!("Pacer task started");

    let boot = Instant::now();
    let mut last_status_ms: Option<u64> = None;

    loop {
        if let Some(watchdog) = &watchdog {
            watchdog.feed();
        }

        // u64::MAX milliseconds = 584 million years, safe to truncate
        #[allow(clippy::cast_possible_truncation)]
        let now_ms = boot.elapsed().as_millis() as u64;

        let report = engine.tick(&state.settings, &mut driver, now_ms);
        if let Some(generation) = report.applied {
            debug!("Applied settings generation {generation}");
        }
        for e in &report.errors {
            debug!("Tick error: {e}");
        }

        if report.applied.is_some()
            || last_status_ms.map_or(true, |last| now_ms.saturating_sub(last) >= STATUS_INTERVAL_MS)
        {
            *state.status.lock().unwrap() = Some(engine.status());
            last_status_ms = Some(now_ms);
        }

        let timeout = Duration::from_millis(engine.wait_ms(now_ms).clamp(1, MAX_IDLE_MS));
        match rx.recv_timeout(timeout) {
            Ok(PacerTaskMessage::SettingsChanged) => {
                debug!("Settings changed, ticking early");
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                warn!("Pacer channel disconnected, exiting task");
                break;
            }
        }
    }
}
