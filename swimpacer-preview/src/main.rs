use clap::Parser;
use std::fmt::Write;
use std::fs;
use std::path::PathBuf;
use swimpacer_engine::{
    ConfigChange, EngineConfig, MemoryStore, PacerEngine, PacerError, PacerSettings, RenderDriver,
    SharedSettings, RGB8,
};

/// Run the swim pacer engine on the host and draw lane frames in the terminal.
#[derive(Parser)]
#[command(version, about)]
struct Args {
    /// Settings JSON as served by `/api/config` (defaults when omitted).
    settings: Option<PathBuf>,

    /// Simulated run time in seconds.
    #[arg(short, long, default_value_t = 30.0)]
    duration: f32,

    /// Simulated time between ticks in milliseconds.
    #[arg(short, long, default_value_t = 20)]
    tick_ms: u32,

    /// Print every Nth presented frame.
    #[arg(short, long, default_value_t = 25)]
    every: u64,

    /// Terminal columns per lane; the strip is squeezed to fit.
    #[arg(short, long, default_value_t = 100)]
    width: usize,

    /// Use the lanes' running flags from the settings instead of starting every lane.
    #[arg(long)]
    keep_running: bool,

    /// Print characters instead of ANSI colors.
    #[arg(long)]
    plain: bool,
}

/// Render driver that keeps the last frame for printing.
struct TerminalDriver {
    brightness: u8,
    frames: Vec<Vec<RGB8>>,
    presented: u64,
}

impl RenderDriver for TerminalDriver {
    fn present(&mut self, frames: &[Vec<RGB8>]) -> Result<(), PacerError> {
        self.frames.clear();
        self.frames.extend(frames.iter().cloned());
        self.presented += 1;
        Ok(())
    }

    fn set_brightness(&mut self, brightness: u8) {
        self.brightness = brightness;
    }
}

/// Squeeze `frame` into `width` cells, keeping the brightest LED of each cell.
fn downsample(frame: &[RGB8], width: usize) -> Vec<RGB8> {
    if frame.len() <= width || width == 0 {
        return frame.to_vec();
    }
    (0..width)
        .map(|cell| {
            let start = cell * frame.len() / width;
            let end = ((cell + 1) * frame.len() / width).max(start + 1);
            frame[start..end]
                .iter()
                .copied()
                .max_by_key(|c| u16::from(c.r) + u16::from(c.g) + u16::from(c.b))
                .unwrap_or_default()
        })
        .collect()
}

fn scale(c: RGB8, brightness: u8) -> RGB8 {
    let channel = |v: u8| u8::try_from(u16::from(v) * u16::from(brightness) / 255).unwrap_or(u8::MAX);
    RGB8::new(channel(c.r), channel(c.g), channel(c.b))
}

fn format_lane(frame: &[RGB8], width: usize, brightness: u8, plain: bool) -> String {
    let mut line = String::new();
    for c in downsample(frame, width) {
        if plain {
            line.push(if c == RGB8::default() { '.' } else { '#' });
        } else {
            let c = scale(c, brightness);
            let _ = write!(line, "\x1b[48;2;{};{};{}m ", c.r, c.g, c.b);
        }
    }
    if !plain {
        line.push_str("\x1b[0m");
    }
    line
}

fn load_settings(path: Option<&PathBuf>) -> PacerSettings {
    let Some(path) = path else {
        return PacerSettings::default();
    };
    let text = match fs::read_to_string(path) {
        Ok(t) => t,
        Err(e) => {
            eprintln!("Error opening {}: {e}", path.display());
            std::process::exit(1);
        }
    };
    match serde_json::from_str(&text) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Invalid settings file: {e}");
            std::process::exit(1);
        }
    }
}

fn main() {
    let args = Args::parse();
    let settings = load_settings(args.settings.as_ref());
    if let Err(e) = settings.validate() {
        eprintln!("{e}");
        std::process::exit(1);
    }

    let config = EngineConfig {
        frame_interval_ms: args.tick_ms,
        ..EngineConfig::default()
    };
    let mut engine = match PacerEngine::new(&settings, config) {
        Ok(engine) => engine,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    };

    let lane_count = usize::from(settings.lane_count);
    let shared = SharedSettings::new(settings, Box::new(MemoryStore::new()));
    if !args.keep_running {
        for lane in 0..lane_count {
            if let Err(e) = shared.apply_change(ConfigChange::SetLaneRunning { lane, running: true }) {
                eprintln!("{e}");
                std::process::exit(1);
            }
        }
    }

    let snapshot = shared.snapshot();
    let pace = snapshot.pace_summary();
    let mut driver = TerminalDriver {
        brightness: snapshot.brightness,
        frames: Vec::new(),
        presented: 0,
    };

    // Saturating cast: a negative or NaN duration just runs no ticks
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let duration_ms = (args.duration * 1000.0) as u64;
    let tick_ms = u64::from(args.tick_ms.max(1));
    let every = args.every.max(1);

    let mut now_ms = 0;
    let mut printed = 0u64;
    while now_ms <= duration_ms {
        let report = engine.tick(&shared, &mut driver, now_ms);
        for e in &report.errors {
            eprintln!("{now_ms:>8} ms  {e}");
        }
        if report.presented && (driver.presented - 1) % every == 0 {
            println!("t = {:.2} s", now_ms as f64 / 1000.0);
            for (lane, frame) in driver.frames.iter().enumerate().take(lane_count) {
                println!(
                    "  {}  {}",
                    lane + 1,
                    format_lane(frame, args.width, driver.brightness, args.plain)
                );
            }
            printed += 1;
        }
        now_ms += tick_ms;
    }

    let geometry = engine.geometry();
    let stats = engine.stats();
    println!("{}", "-".repeat(72));
    println!("LEDs per lane:    {}", geometry.total_leds);
    println!("Pulse width:      {} LEDs", geometry.pulse_width_leds);
    println!("Step interval:    {} ms", geometry.step_interval_ms);
    println!("Repeat pace:      {:.1} s", pace.pace_s);
    println!("Send-off:         {:.1} s", pace.send_off_s);
    println!("Set time:         {:.0} s", pace.set_s);
    println!("Frames presented: {} ({printed} printed, {} skipped)", stats.presented, stats.skipped);
}
