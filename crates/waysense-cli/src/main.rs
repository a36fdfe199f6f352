//! `waysense-cli` – command line front end for the guidance core.
//!
//! ```text
//! waysense [--config FILE] [--gps DEVICE] [--route FILE] [--simulate] [LAT LON]
//! ```
//!
//! 1. Loads `~/.waysense/config.toml` (written with defaults on first run).
//! 2. Opens the positioning source: the configured serial device or replay
//!    log, or a simulated walk with `--simulate`.
//! 3. Starts guidance toward `LAT LON`, the `--route` file or the configured
//!    route, whichever comes first.
//! 4. Prints every spoken instruction and drops the user into a REPL.
//! 5. Intercepts **Ctrl-C** and shuts the session down cleanly.

mod config;
mod console;
mod repl;
mod route;

use colored::Colorize;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{error, warn};

use waysense_hal::{DepthCamera, LineSentenceSource, SentenceSource, SimDepthCamera, SimGps};
use waysense_middleware::{EventBus, Topic};
use waysense_perception::geodesic;
use waysense_runtime::{GuidanceParts, spawn_guidance};
use waysense_types::{Coordinate, EventPayload, Waypoint};

use crate::console::{ConsolePlanner, ConsoleSpeech};

const BUS_CAPACITY: usize = 256;
const SIM_ORIGIN: Coordinate = Coordinate::new(47.376_9, 8.541_7);
const SIM_WALKING_SPEED_MPS: f64 = 1.4;
const SIM_FIX_INTERVAL_MS: u64 = 1_000;
const USAGE: &str = "usage: waysense [--config FILE] [--gps DEVICE] [--route FILE] [--simulate] [LAT LON]";

// ─────────────────────────────────────────────────────────────────────────────
// Arguments
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Default, PartialEq)]
struct Args {
    config: Option<PathBuf>,
    gps: Option<String>,
    route: Option<PathBuf>,
    simulate: bool,
    target: Option<Waypoint>,
    help: bool,
}

fn parse_args(args: impl IntoIterator<Item = String>) -> Result<Args, String> {
    let mut parsed = Args::default();
    let mut positional = Vec::new();
    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => parsed.config = Some(PathBuf::from(value_for(&mut args, "--config")?)),
            "--gps" => parsed.gps = Some(value_for(&mut args, "--gps")?),
            "--route" => parsed.route = Some(PathBuf::from(value_for(&mut args, "--route")?)),
            "--simulate" => parsed.simulate = true,
            "-h" | "--help" => parsed.help = true,
            flag if flag.starts_with("--") => return Err(format!("unknown option '{flag}'")),
            _ => positional.push(arg),
        }
    }
    match positional.as_slice() {
        [] => {}
        [lat, lon] => parsed.target = Some(route::parse_target(lat, lon)?),
        _ => return Err("expected a target as two numbers: LAT LON".to_string()),
    }
    Ok(parsed)
}

fn value_for(args: &mut impl Iterator<Item = String>, flag: &str) -> Result<String, String> {
    args.next().ok_or_else(|| format!("{flag} needs a value"))
}

// ─────────────────────────────────────────────────────────────────────────────
// Entry point
// ─────────────────────────────────────────────────────────────────────────────

fn main() -> ExitCode {
    // ── Structured logging ────────────────────────────────────────────────
    // RUST_LOG filters (default "info"), WAYSENSE_LOG_FORMAT=json switches to
    // newline-delimited JSON.  User-facing output still goes through println!.
    let _telemetry = waysense_runtime::init_tracing("waysense");

    let args = match parse_args(std::env::args().skip(1)) {
        Ok(args) => args,
        Err(e) => {
            eprintln!("{}: {}\n{}", "Argument error".red(), e, USAGE);
            return ExitCode::from(2);
        }
    };
    if args.help {
        println!("{USAGE}");
        return ExitCode::SUCCESS;
    }

    print_banner();

    // ── Configuration ─────────────────────────────────────────────────────
    let config_path = args.config.clone().unwrap_or_else(config::config_path);
    let mut cfg = match config::load_from(&config_path) {
        Ok(Some(cfg)) => {
            println!("  Config loaded from {}", config_path.display().to_string().bold());
            cfg
        }
        Ok(None) => write_default_config(&config_path),
        Err(e) => {
            eprintln!("{}: {}", "Config error".red(), e);
            return ExitCode::FAILURE;
        }
    };
    if let Some(gps) = &args.gps {
        cfg.gps_device = gps.clone();
    }

    // ── Route ─────────────────────────────────────────────────────────────
    let initial_route = match initial_route(&args, &cfg) {
        Ok(route) => route,
        Err(e) => {
            eprintln!("{}: {}", "Route error".red(), e);
            return ExitCode::FAILURE;
        }
    };

    // ── Sensors ───────────────────────────────────────────────────────────
    let (gps, depth, initial_route) = if args.simulate {
        let route = initial_route.unwrap_or_else(demo_route);
        let (gps, depth) = simulated_sensors(&route);
        println!("  Positioning: {}", "simulated walk".yellow());
        (gps, Some(depth), Some(route))
    } else {
        let mut source = match LineSentenceSource::open(&cfg.gps_device) {
            Ok(source) => source,
            Err(e) => {
                eprintln!("{}: {}", "Positioning source unavailable".red(), e);
                return ExitCode::FAILURE;
            }
        };
        if cfg.replay_pacing_ms > 0 {
            source = source.with_pacing(Duration::from_millis(cfg.replay_pacing_ms));
        }
        println!("  Positioning: {}", cfg.gps_device.bold());
        (Box::new(source) as Box<dyn SentenceSource>, None, initial_route)
    };
    if depth.is_none() {
        println!("  Obstacles  : {}", "no depth camera attached".dimmed());
    }

    // ── Shared shutdown flag ──────────────────────────────────────────────
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = shutdown.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – stopping guidance …".yellow().bold());
        shutdown_clone.store(true, Ordering::SeqCst);
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; graceful shutdown on Ctrl-C will not be available");
    }

    // ── Guidance session ──────────────────────────────────────────────────
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "failed to start the async runtime");
            return ExitCode::FAILURE;
        }
    };

    let speech = Arc::new(ConsoleSpeech::new(
        cfg.guidance.speech_words_per_minute,
        cfg.guidance.speech_lead_in_ms,
    ));
    let parts = GuidanceParts {
        gps,
        depth,
        speech,
        planner: Arc::new(ConsolePlanner),
        bus: EventBus::new(BUS_CAPACITY),
        initial_route,
    };
    let handle = match runtime.block_on(async {
        let handle = spawn_guidance(cfg.guidance.clone(), parts)?;
        print_phase_changes(handle.bus());
        Ok::<_, waysense_types::WayError>(handle)
    }) {
        Ok(handle) => handle,
        Err(e) => {
            eprintln!("{}: {}", "Guidance failed to start".red(), e);
            return ExitCode::FAILURE;
        }
    };

    println!();
    println!("  Type {} for a list of commands.\n", "/help".bold().cyan());

    // ── Interactive REPL ──────────────────────────────────────────────────
    repl::run(&runtime, &handle, shutdown);

    runtime.block_on(handle.shutdown());
    println!("{}", "  ✓ Guidance stopped.".green());
    ExitCode::SUCCESS
}

// ─────────────────────────────────────────────────────────────────────────────
// Setup helpers
// ─────────────────────────────────────────────────────────────────────────────

fn write_default_config(path: &std::path::Path) -> config::Config {
    let mut cfg = config::Config::default();
    match config::save_to(&cfg, path) {
        Ok(()) => println!(
            "  {} Default config written to {}",
            "✓".green().bold(),
            path.display().to_string().bold()
        ),
        Err(e) => println!("{}: {}", "Error saving config".red(), e),
    }
    config::apply_env_overrides(&mut cfg);
    cfg
}

/// Command-line target, then `--route`, then the configured route file.
fn initial_route(args: &Args, cfg: &config::Config) -> Result<Option<Vec<Waypoint>>, String> {
    if let Some(target) = &args.target {
        return Ok(Some(vec![target.clone()]));
    }
    match args.route.as_ref().or(cfg.route_file.as_ref()) {
        Some(path) => route::load_route(path).map(Some),
        None => Ok(None),
    }
}

/// Two legs around the simulation origin: north, then east.
fn demo_route() -> Vec<Waypoint> {
    let corner = geodesic::destination(SIM_ORIGIN, 0.0, 80.0);
    let end = geodesic::destination(corner, 90.0, 60.0);
    vec![
        Waypoint::new(corner.latitude, corner.longitude).with_label("the corner"),
        Waypoint::new(end.latitude, end.longitude).with_label("the entrance"),
    ]
}

/// A walk that starts 60 m south of the first waypoint and follows the
/// route, plus a depth camera that now and then sees something ahead.
fn simulated_sensors(route: &[Waypoint]) -> (Box<dyn SentenceSource>, Box<dyn DepthCamera>) {
    let first = route.first().map(Waypoint::coordinate).unwrap_or(SIM_ORIGIN);
    let mut path = vec![geodesic::destination(first, 180.0, 60.0)];
    path.extend(route.iter().map(Waypoint::coordinate));
    let gps = SimGps::walk(path, SIM_WALKING_SPEED_MPS, SIM_FIX_INTERVAL_MS).realtime();

    let clear = [f32::INFINITY; 3];
    let mut script = vec![clear; 150];
    script.extend(std::iter::repeat_n([f32::INFINITY, 1.2, f32::INFINITY], 20));
    script.extend(std::iter::repeat_n([f32::INFINITY, 0.4, 2.0], 10));
    let depth = SimDepthCamera::new(64, 48).with_script(script);

    (Box::new(gps), Box::new(depth))
}

/// Echo phase transitions and system alerts under the spoken output.
fn print_phase_changes(bus: &EventBus) {
    let mut navigation = bus.subscribe_to(Topic::Navigation);
    tokio::spawn(async move {
        while let Some(event) = navigation.next().await {
            if let EventPayload::PhaseChanged(t) = event.payload {
                println!("  {}", format!("[{} → {}]", t.from, t.to).dimmed());
            }
        }
    });
    let mut system = bus.subscribe_to(Topic::SystemAlerts);
    tokio::spawn(async move {
        while let Some(event) = system.next().await {
            if let EventPayload::Degraded { component, message } = event.payload {
                println!("  {}", format!("[{component}: {message}]").red());
            }
        }
    });
}

// ─────────────────────────────────────────────────────────────────────────────
// Banner
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("{}", r#" _      __                              "#.bold().cyan());
    println!("{}", r#"| | /| / /__ ___ _____ ___ ___  ___ ___ "#.bold().cyan());
    println!("{}", r#"| |/ |/ / _ `/ // (_-</ -_) _ \(_-</ -_)"#.bold().cyan());
    println!("{}", r#"|__/|__/\_,_/\_, /___/\__/_//_/___/\__/ "#.bold().cyan());
    println!("{}", r#"            /___/                         "#.bold().cyan());
    println!();
    println!("  {} {}",
        "Waysense".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Spoken walking guidance with obstacle alerts");
    println!();
}
