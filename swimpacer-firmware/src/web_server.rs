use anyhow::Result;
use embedded_svc::http::server::Request;
use embedded_svc::http::Method;
use embedded_svc::io::{Read, Write};
use esp_idf_svc::http::server::{Configuration, EspHttpConnection, EspHttpServer};
use esp_idf_svc::io::EspIOError;
use esp_idf_svc::sys::{esp_get_free_heap_size, esp_get_minimum_free_heap_size};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use swimpacer_engine::{ConfigChange, EngineStatus, PaceSummary, PacerError, PacerSettings, MAX_LANES};

use crate::config::DeviceConfig;
use crate::pacer_task::PacerTaskMessage;
use crate::State;

/// Largest request body accepted; a full settings document is well under this
const MAX_BODY_LEN: usize = 4096;

const HTML_INDEX: &str = include_str!(concat!(env!("OUT_DIR"), "/index.html"));

type HttpRequest<'a, 'b> = Request<&'a mut EspHttpConnection<'b>>;

/// Lane toggle request from web UI
#[derive(Deserialize)]
struct LaneRequest {
    lane: usize,
}

#[derive(Serialize)]
struct ErrorResponse<'a> {
    error: &'a str,
}

/// Status response: what the engine is doing right now
#[derive(Serialize)]
struct StatusResponse {
    version: &'static str,
    pace: PaceSummary,
    running: [bool; MAX_LANES],
    /// `None` until the pacer task has run its first tick
    engine: Option<EngineStatus>,
    free_heap: u32,
    min_free_heap: u32,
}

fn send_json<T: Serialize>(req: HttpRequest<'_, '_>, status: u16, body: &T) -> Result<(), EspIOError> {
    let json = serde_json::to_string(body).unwrap_or_else(|_| r#"{"error":"serialization failed"}"#.to_string());
    let mut response = req.into_response(status, None, &[("Content-Type", "application/json")])?;
    response.write_all(json.as_bytes())?;
    Ok(())
}

fn send_error(req: HttpRequest<'_, '_>, message: &str) -> Result<(), EspIOError> {
    send_json(req, 400, &ErrorResponse { error: message })
}

/// Read the whole request body, up to `MAX_BODY_LEN`
fn read_body(req: &mut HttpRequest<'_, '_>) -> Result<Vec<u8>, EspIOError> {
    let mut buf = vec![0u8; MAX_BODY_LEN];
    let mut len = 0;
    while len < buf.len() {
        let n = req.read(&mut buf[len..])?;
        if n == 0 {
            break;
        }
        len += n;
    }
    buf.truncate(len);
    Ok(buf)
}

/// Reply to a settings mutation and wake the pacer task if it was accepted
fn finish_change(
    state: &State,
    req: HttpRequest<'_, '_>,
    result: Result<swimpacer_engine::Invalidations, PacerError>,
) -> Result<(), EspIOError> {
    match result {
        Ok(invalidations) => {
            debug!("Invalidated: {invalidations:?}");
            let _ = state.pacer_tx.send(PacerTaskMessage::SettingsChanged);
            send_json(req, 200, &state.settings.snapshot())
        }
        Err(e) => send_error(req, &e.to_string()),
    }
}

#[allow(clippy::too_many_lines)] // Route registration function - length is proportional to endpoints
pub fn start_server(state: &Arc<State>) -> Result<()> {
    info!("Web server starting...");

    let server_config = Configuration {
        max_open_sockets: 6,
        session_timeout: Duration::from_secs(2),
        lru_purge_enable: true,
        ..Default::default()
    };
    let mut server = EspHttpServer::new(&server_config)?;

    // Serve the UI page
    server.fn_handler("/", Method::Get, |req| -> Result<(), EspIOError> {
        let mut response = req.into_ok_response()?;
        response.write_all(HTML_INDEX.as_bytes())?;
        Ok(())
    })?;

    // GET pacer settings
    let state_clone = state.clone();
    server.fn_handler("/api/config", Method::Get, move |req| -> Result<(), EspIOError> {
        debug!("HTTP: GET /api/config");
        send_json(req, 200, &state_clone.settings.snapshot())
    })?;

    // POST pacer settings - replace everything, all or nothing
    let state_clone = state.clone();
    server.fn_handler("/api/config", Method::Post, move |mut req| -> Result<(), EspIOError> {
        info!("HTTP: POST /api/config");
        let body = read_body(&mut req)?;
        match serde_json::from_slice::<PacerSettings>(&body) {
            Ok(settings) => {
                let result = state_clone.settings.replace(settings);
                finish_change(&state_clone, req, result)
            }
            Err(e) => {
                warn!("Invalid settings JSON received: {e}");
                send_error(req, &format!("invalid settings: {e}"))
            }
        }
    })?;

    // POST a single field change
    let state_clone = state.clone();
    server.fn_handler("/api/change", Method::Post, move |mut req| -> Result<(), EspIOError> {
        debug!("HTTP: POST /api/change");
        let body = read_body(&mut req)?;
        match serde_json::from_slice::<ConfigChange>(&body) {
            Ok(change) => {
                let result = state_clone.settings.apply_change(change);
                finish_change(&state_clone, req, result)
            }
            Err(e) => {
                warn!("Invalid change JSON received: {e}");
                send_error(req, &format!("invalid change: {e}"))
            }
        }
    })?;

    // POST lane start/stop toggle
    let state_clone = state.clone();
    server.fn_handler("/api/lanes/toggle", Method::Post, move |mut req| -> Result<(), EspIOError> {
        info!("HTTP: POST /api/lanes/toggle");
        let body = read_body(&mut req)?;
        match serde_json::from_slice::<LaneRequest>(&body) {
            Ok(LaneRequest { lane }) => {
                let result = state_clone.settings.apply_change(ConfigChange::ToggleLane(lane));
                finish_change(&state_clone, req, result)
            }
            Err(e) => send_error(req, &format!("invalid lane request: {e}")),
        }
    })?;

    // POST stop every lane
    let state_clone = state.clone();
    server.fn_handler("/api/stop", Method::Post, move |req| -> Result<(), EspIOError> {
        info!("HTTP: POST /api/stop");
        let result = state_clone.settings.apply_change(ConfigChange::StopAll);
        finish_change(&state_clone, req, result)
    })?;

    // GET engine status
    let state_clone = state.clone();
    server.fn_handler("/api/status", Method::Get, move |req| -> Result<(), EspIOError> {
        debug!("HTTP: GET /api/status");
        let settings = state_clone.settings.snapshot();
        let running = std::array::from_fn(|lane| settings.lane_running(lane));

        // SAFETY: These are simple C functions that return u32 values
        let free_heap = unsafe { esp_get_free_heap_size() };
        let min_free_heap = unsafe { esp_get_minimum_free_heap_size() };

        let status = StatusResponse {
            version: env!("GIT_VERSION"),
            pace: settings.pace_summary(),
            running,
            engine: state_clone.status.lock().unwrap().clone(),
            free_heap,
            min_free_heap,
        };
        send_json(req, 200, &status)
    })?;

    // GET device config
    let state_clone = state.clone();
    server.fn_handler("/api/device", Method::Get, move |req| -> Result<(), EspIOError> {
        debug!("HTTP: GET /api/device");
        let device = state_clone.device.lock().unwrap().clone();
        send_json(req, 200, &device)
    })?;

    // POST device config - save and restart
    let state_clone = state.clone();
    server.fn_handler("/api/device", Method::Post, move |mut req| -> Result<(), EspIOError> {
        info!("HTTP: POST /api/device");
        let body = read_body(&mut req)?;
        let mut device = match serde_json::from_slice::<DeviceConfig>(&body) {
            Ok(device) => device,
            Err(e) => {
                warn!("Invalid device JSON received: {e}");
                return send_error(req, &format!("invalid device config: {e}"));
            }
        };
        // Validate/clamp values to safe ranges
        device.validate();

        if let Err(e) = device.save() {
            warn!("Failed to save device config: {e}");
            return send_json(req, 500, &ErrorResponse { error: &e.to_string() });
        }
        *state_clone.device.lock().unwrap() = device;

        send_json(req, 200, &serde_json::json!({ "restart": true }))?;
        info!("Device config changed, restarting in 2 seconds...");
        if let Err(e) = crate::thread_util::restart_after(Duration::from_secs(2)) {
            warn!("Failed to schedule restart: {e}");
        }
        Ok(())
    })?;

    // POST reboot
    server.fn_handler("/api/reboot", Method::Post, move |req| -> Result<(), EspIOError> {
        info!("HTTP: POST /api/reboot - Device reboot requested");
        req.into_ok_response()?;
        if let Err(e) = crate::thread_util::restart_after(Duration::from_secs(1)) {
            warn!("Failed to schedule restart: {e}");
        }
        Ok(())
    })?;

    info!("Web server started on http://0.0.0.0:80");

    // Keep server alive
    std::mem::forget(server);

    Ok(())
}
