//! Task Watchdog Timer (TWDT) users.
//!
//! The pacer task registers itself so a wedged tick loop (e.g. an RMT
//! transfer that never completes) resets the board instead of leaving the
//! strips frozen mid-set.

use anyhow::{bail, Result};
use esp_idf_svc::sys::{
    esp_task_wdt_add_user, esp_task_wdt_delete_user, esp_task_wdt_reset_user,
    esp_task_wdt_user_handle_t, ESP_OK,
};
use log::{debug, error};
use std::ffi::CStr;

/// A registered TWDT user, removed again on drop.
pub struct WatchdogHandle {
    handle: esp_task_wdt_user_handle_t,
    name: &'static CStr,
}

impl WatchdogHandle {
    pub fn register(name: &'static CStr) -> Result<Self> {
        let mut handle: esp_task_wdt_user_handle_t = std::ptr::null_mut();
        // SAFETY: `name` is a static C string and `handle` outlives the call
        let result = unsafe { esp_task_wdt_add_user(name.as_ptr(), &mut handle) };
        if result != ESP_OK {
            bail!("failed to register watchdog user {name:?}: error {result}");
        }
        debug!("Watchdog: registered {name:?}");
        Ok(Self { handle, name })
    }

    /// Must be called more often than the TWDT timeout.
    pub fn feed(&self) {
        // SAFETY: `handle` came from a successful `esp_task_wdt_add_user`
        let result = unsafe { esp_task_wdt_reset_user(self.handle) };
        if result != ESP_OK {
            error!("Watchdog: failed to feed {:?}", self.name);
        }
    }
}

impl Drop for WatchdogHandle {
    fn drop(&mut self) {
        // SAFETY: deleting the user we registered; the handle is not used afterwards
        let result = unsafe { esp_task_wdt_delete_user(self.handle) };
        if result != ESP_OK {
            error!("Watchdog: failed to unregister {:?}: error {result}", self.name);
        }
    }
}
