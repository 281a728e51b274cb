use anyhow::{anyhow, Result};
use esp_idf_svc::nvs::{EspNvs, EspNvsPartition, NvsDefault};
use esp_idf_svc::sys::{esp_mac_type_t_ESP_MAC_WIFI_SOFTAP, esp_read_mac};
use log::{debug, info, warn, LevelFilter};
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::sync::Mutex;
use swimpacer_engine::{PacerSettings, SettingsStore, StoreError, MAX_LANES};

const AP_SSID_PREFIX: &str = "SwimPacer-";

/// Read the soft-AP MAC address from eFuse (available before WiFi driver init)
fn get_wifi_ap_mac() -> [u8; 6] {
    let mut mac = [0u8; 6];
    // SAFETY: esp_read_mac just reads from eFuse, no driver needed
    unsafe {
        esp_read_mac(mac.as_mut_ptr(), esp_mac_type_t_ESP_MAC_WIFI_SOFTAP);
    }
    mac
}

/// Generate default AP SSID from the MAC address, so neighboring pools differ
fn default_ap_ssid() -> String {
    let mac = get_wifi_ap_mac();
    format!("{AP_SSID_PREFIX}{:02X}{:02X}", mac[4], mac[5])
}

/// Configurable log level
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    #[default]
    Info,
    Debug,
}

impl LogLevel {
    #[must_use]
    pub const fn as_level_filter(self) -> LevelFilter {
        match self {
            Self::Off => LevelFilter::Off,
            Self::Error => LevelFilter::Error,
            Self::Warn => LevelFilter::Warn,
            Self::Info => LevelFilter::Info,
            Self::Debug => LevelFilter::Debug,
        }
    }
}

const NVS_NAMESPACE: &str = "swimpacer";
const NVS_DEVICE_KEY: &str = "device";
const NVS_PACER_KEY: &str = "pacer";

// Global NVS handle - initialized once in main
static NVS: Mutex<Option<EspNvs<NvsDefault>>> = Mutex::new(None);

pub fn init_nvs(nvs_partition: EspNvsPartition<NvsDefault>) -> Result<()> {
    debug!("Initializing NVS namespace: {NVS_NAMESPACE}");
    let nvs = EspNvs::new(nvs_partition, NVS_NAMESPACE, true)?;
    *NVS.lock().unwrap() = Some(nvs);
    info!("NVS initialized");
    Ok(())
}

/// Read a whole blob, `None` if the key was never written
fn read_blob(key: &str) -> Result<Option<Vec<u8>>> {
    let nvs_guard = NVS.lock().unwrap();
    let nvs = nvs_guard.as_ref().ok_or_else(|| anyhow!("NVS not initialized"))?;

    // Get the blob length first
    let Some(len) = nvs.blob_len(key)? else {
        return Ok(None);
    };
    debug!("NVS blob '{key}' size: {len} bytes");
    let mut buf = vec![0u8; len];
    nvs.get_blob(key, &mut buf)?;
    Ok(Some(buf))
}

fn write_blob(key: &str, data: &[u8]) -> Result<()> {
    let mut nvs_guard = NVS.lock().unwrap();
    let nvs = nvs_guard.as_mut().ok_or_else(|| anyhow!("NVS not initialized"))?;
    nvs.set_blob(key, data)?;
    debug!("NVS blob '{key}' written ({} bytes)", data.len());
    Ok(())
}

/// Hardware and network settings; changing these requires a restart.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// AP SSID (defaults to "SwimPacer-XXXX" where XXXX is derived from MAC)
    #[serde(default = "default_ap_ssid")]
    pub ap_ssid: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ap_password: Option<String>,
    /// IP address of the access point interface
    #[serde(default = "default_ap_ip")]
    pub ap_ip: Ipv4Addr,
    #[serde(default)]
    pub log_level: LogLevel,
    /// Data GPIO per lane strip
    #[serde(default = "default_lane_gpios")]
    pub lane_gpios: [u8; MAX_LANES],
    /// Shortest time between LED frames
    #[serde(default = "default_frame_interval_ms")]
    pub frame_interval_ms: u32,
}

fn default_ap_ip() -> Ipv4Addr {
    Ipv4Addr::new(192, 168, 71, 1)
}

const fn default_lane_gpios() -> [u8; MAX_LANES] {
    [4, 5, 6, 7]
}

const fn default_frame_interval_ms() -> u32 {
    20
}

pub const MIN_FRAME_INTERVAL_MS: u32 = 10;
pub const MAX_FRAME_INTERVAL_MS: u32 = 100;

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            ap_ssid: default_ap_ssid(),
            ap_password: None,
            ap_ip: default_ap_ip(),
            log_level: LogLevel::default(),
            lane_gpios: default_lane_gpios(),
            frame_interval_ms: default_frame_interval_ms(),
        }
    }
}

impl DeviceConfig {
    /// Clamp values to valid ranges and fix invalid values
    pub fn validate(&mut self) {
        let clamped = self
            .frame_interval_ms
            .clamp(MIN_FRAME_INTERVAL_MS, MAX_FRAME_INTERVAL_MS);
        if clamped != self.frame_interval_ms {
            warn!(
                "Clamping frame_interval_ms from {} to {clamped}",
                self.frame_interval_ms
            );
            self.frame_interval_ms = clamped;
        }
        if self.ap_ssid.is_empty() {
            warn!("AP SSID is empty, resetting to default");
            self.ap_ssid = default_ap_ssid();
        }
        // WPA2 needs at least 8 characters; anything shorter would stop the AP starting
        if self.ap_password.as_ref().is_some_and(|pw| pw.len() < 8) {
            warn!("AP password shorter than 8 characters, running an open AP");
            self.ap_password = None;
        }
    }

    pub fn load_or_default() -> Self {
        match Self::load() {
            Ok(mut config) => {
                info!("Loaded device config from NVS");
                config.validate();
                config
            }
            Err(e) => {
                warn!("Failed to load device config from NVS: {e}, using defaults");
                Self::default()
            }
        }
    }

    pub fn load() -> Result<Self> {
        debug!("Loading device config from NVS");
        let buf = read_blob(NVS_DEVICE_KEY)?.ok_or_else(|| anyhow!("No device config found in NVS"))?;
        let config: Self = serde_json::from_slice(&buf)?;
        debug!(
            "Device config parsed: ap_ssid={:?}, log_level={:?}, lane_gpios={:?}",
            config.ap_ssid, config.log_level, config.lane_gpios
        );
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        debug!("Saving device config to NVS");
        let json = serde_json::to_vec(self)?;
        write_blob(NVS_DEVICE_KEY, &json)?;
        info!("Device config saved to NVS");
        Ok(())
    }
}

/// Pacer settings persisted as a JSON blob next to the device config.
pub struct NvsSettingsStore;

impl SettingsStore for NvsSettingsStore {
    fn load(&self) -> Result<PacerSettings, StoreError> {
        let buf = read_blob(NVS_PACER_KEY)
            .map_err(|e| StoreError::Backend {
                reason: e.to_string(),
            })?
            .ok_or(StoreError::NotFound)?;
        serde_json::from_slice(&buf).map_err(|e| StoreError::Corrupt {
            reason: e.to_string(),
        })
    }

    fn save(&self, settings: &PacerSettings) -> Result<(), StoreError> {
        let json = serde_json::to_vec(settings).map_err(|e| StoreError::Corrupt {
            reason: e.to_string(),
        })?;
        write_blob(NVS_PACER_KEY, &json).map_err(|e| StoreError::Backend {
            reason: e.to_string(),
        })
    }
}
