use anyhow::Result;
use esp_idf_hal::cpu::Core;
use esp_idf_hal::delay::FreeRtos;
use esp_idf_hal::gpio::AnyIOPin;
use esp_idf_hal::prelude::*;
use esp_idf_svc::eventloop::EspSystemEventLoop;
use esp_idf_svc::ipv4::{self, Ipv4Addr};
use esp_idf_svc::mdns::EspMdns;
use esp_idf_svc::netif::{EspNetif, NetifConfiguration, NetifStack};
use esp_idf_svc::nvs::EspDefaultNvsPartition;
use esp_idf_svc::sys::esp_get_free_heap_size;
use esp_idf_svc::wifi::{AccessPointConfiguration, AuthMethod, BlockingWifi, Configuration, EspWifi, WifiDriver};
use log::{error, info, warn};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use swimpacer_engine::{EngineConfig, EngineStatus, PacerEngine, SharedSettings};

mod config;
mod leds;
mod pacer_task;
mod thread_util;
mod watchdog;
mod web_server;

use config::{DeviceConfig, NvsSettingsStore};
use leds::{lane_driver, StripDriver};
use pacer_task::PacerTaskSender;

/// State shared between the web server and the pacer task
pub struct State {
    pub settings: SharedSettings,
    pub device: Mutex<DeviceConfig>,
    /// Latest engine snapshot, published by the pacer task
    pub status: Mutex<Option<EngineStatus>>,
    pub pacer_tx: PacerTaskSender,
}

/// Create the AP network interface on the configured address
fn create_ap_netif(ap_ip: Ipv4Addr) -> Result<EspNetif> {
    let ap_router_config = ipv4::RouterConfiguration {
        subnet: ipv4::Subnet {
            gateway: ap_ip,
            mask: ipv4::Mask(24),
        },
        dhcp_enabled: true,
        dns: None,
        secondary_dns: None,
    };

    let mut ap_netif_config = NetifConfiguration::wifi_default_router();
    ap_netif_config.ip_configuration = Some(ipv4::Configuration::Router(ap_router_config));
    Ok(EspNetif::new_with_conf(&ap_netif_config)?)
}

/// Initialize mDNS for local discovery (swimpacer.local)
fn setup_mdns() -> Option<EspMdns> {
    match EspMdns::take() {
        Ok(mut m) => {
            let _ = m.set_hostname("swimpacer");
            let _ = m.set_instance_name("Swim Pacer");
            let _ = m.add_service(None, "_http", "_tcp", 80, &[]);
            info!("mDNS started: swimpacer.local");
            Some(m)
        }
        Err(e) => {
            warn!("Failed to start mDNS: {e:?}");
            None
        }
    }
}

/// Start WiFi as an access point only; the pool deck has no network to join
fn start_wifi(device: &DeviceConfig, wifi: &mut BlockingWifi<EspWifi<'static>>) -> Result<()> {
    let password = device.ap_password.as_deref().unwrap_or("");
    let auth_method = if password.is_empty() {
        AuthMethod::None
    } else {
        AuthMethod::WPA2Personal
    };

    info!("Starting WiFi AP '{}'", device.ap_ssid);
    wifi.set_configuration(&Configuration::AccessPoint(AccessPointConfiguration {
        ssid: device
            .ap_ssid
            .as_str()
            .try_into()
            .map_err(|()| anyhow::anyhow!("AP SSID too long: {}", device.ap_ssid))?,
        password: password.try_into().unwrap_or_default(),
        auth_method,
        channel: 1,
        ..Default::default()
    }))?;
    wifi.start()?;
    wifi.wait_netif_up()?;
    Ok(())
}

fn main() -> Result<()> {
    // It is necessary to call this function once. Otherwise some patches to the runtime
    // implemented by esp-idf-sys might not link properly. See https://github.com/esp-rs/esp-idf-template/issues/71
    esp_idf_svc::sys::link_patches();

    // Bind the log crate to the ESP Logging facilities
    esp_idf_svc::log::EspLogger::initialize_default();

    info!("Starting swimpacer firmware {}...", env!("GIT_VERSION"));

    let peripherals = Peripherals::take()?;
    let sys_loop = EspSystemEventLoop::take()?;
    let nvs = EspDefaultNvsPartition::take()?;

    // Initialize NVS for config storage
    config::init_nvs(nvs.clone())?;

    let device = DeviceConfig::load_or_default();

    // Apply configured log level
    let level = device.log_level.as_level_filter();
    // Set for all targets (use "*" for global)
    if let Err(e) = esp_idf_svc::log::set_target_level("*", level) {
        warn!("Failed to set log level: {e}");
    } else {
        info!("Log level set to {:?}", device.log_level);
    }

    let settings = SharedSettings::load(Box::new(NvsSettingsStore));
    let initial = settings.snapshot();

    // Leave half the heap for WiFi and the HTTP server
    // SAFETY: simple C function returning a u32
    let free_heap = unsafe { esp_get_free_heap_size() } as usize;
    let engine_config = EngineConfig {
        frame_interval_ms: device.frame_interval_ms,
        led_budget: free_heap / 2 / std::mem::size_of::<swimpacer_engine::RGB8>(),
    };
    // Without a buffer for every configured lane there is nothing sensible to run
    let engine = PacerEngine::new(&initial, engine_config)?;

    // Initialize one WS2812 driver per lane with GPIOs from config
    let gpios = device.lane_gpios;
    info!("Initializing LED strips on GPIOs {gpios:?}...");
    // SAFETY: We trust the user-configured GPIO pin numbers are valid for this board
    let pins = gpios.map(|gpio| unsafe { AnyIOPin::new(i32::from(gpio)) });
    let [pin0, pin1, pin2, pin3] = pins;
    let rmt = peripherals.rmt;
    let lanes = vec![
        lane_driver(pin0, rmt.channel0)?,
        lane_driver(pin1, rmt.channel1)?,
        lane_driver(pin2, rmt.channel2)?,
        lane_driver(pin3, rmt.channel3)?,
    ];
    let driver = StripDriver::new(lanes, initial.brightness);

    info!("Initializing WiFi...");
    let wifi_driver = WifiDriver::new(peripherals.modem, sys_loop.clone(), Some(nvs))?;
    let sta_netif = EspNetif::new(NetifStack::Sta)?;
    let ap_netif = create_ap_netif(device.ap_ip)?;
    let wifi = EspWifi::wrap_all(wifi_driver, sta_netif, ap_netif)?;
    let mut wifi = BlockingWifi::wrap(wifi, sys_loop)?;
    start_wifi(&device, &mut wifi)?;

    let ap_ip_info = wifi.wifi().ap_netif().get_ip_info()?;
    info!(
        "AP started - connect to '{}' and navigate to http://{}",
        device.ap_ssid, ap_ip_info.ip
    );

    let (pacer_tx, pacer_rx) = mpsc::channel();
    let state = Arc::new(State {
        settings,
        device: Mutex::new(device),
        status: Mutex::new(None),
        pacer_tx,
    });

    // Start web server
    {
        let state = state.clone();
        thread_util::spawn(c"web_server", None, move || {
            if let Err(e) = web_server::start_server(&state) {
                error!("Web server error: {e:?}");
            }
        })?;
    }

    // Start mDNS for local discovery (swimpacer.local)
    let _mdns = setup_mdns();

    // The pacer task owns the engine and the strips; keep it off the WiFi core
    {
        let state = state.clone();
        thread_util::spawn(c"pacer_task", Some(Core::Core1), move || {
            pacer_task::pacer_task(&state, engine, driver, pacer_rx);
        })?;
    }

    info!("All systems running!");

    // Main loop - keep WiFi alive and save lane stops made by the pacer task
    let _wifi = wifi;
    loop {
        FreeRtos::delay_ms(1000);
        state.settings.flush();
    }
}
