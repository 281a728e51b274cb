//! Named FreeRTOS threads
//!
//! ESP-IDF creates the FreeRTOS task when the pthread is created, so
//! `std::thread::Builder::name()` comes too late to name it. The name (and
//! core affinity) has to go through `ThreadSpawnConfiguration` beforehand.

use anyhow::Result;
use esp_idf_hal::cpu::Core;
use esp_idf_hal::task::thread::ThreadSpawnConfiguration;
use std::ffi::CStr;
use std::thread::JoinHandle;

/// Spawn `f` as a FreeRTOS task called `name` (at most 15 characters),
/// optionally pinned to `core`.
pub fn spawn<F, T>(name: &'static CStr, core: Option<Core>, f: F) -> Result<JoinHandle<T>>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let previous = ThreadSpawnConfiguration::get();

    ThreadSpawnConfiguration {
        name: Some(name.to_bytes_with_nul()),
        pin_to_core: core,
        ..Default::default()
    }
    .set()?;

    let handle = std::thread::spawn(f);

    // Later spawns must not inherit our name or pinning
    previous.unwrap_or_default().set()?;

    Ok(handle)
}

/// Restart the chip after `delay`, from a separate task so the current HTTP
/// response can still go out.
pub fn restart_after(delay: std::time::Duration) -> Result<()> {
    spawn(c"restart", None, move || {
        std::thread::sleep(delay);
        log::info!("Restarting now");
        // SAFETY: esp_restart never returns; nothing is left half-written
        unsafe { esp_idf_svc::sys::esp_restart() };
    })?;
    Ok(())
}
