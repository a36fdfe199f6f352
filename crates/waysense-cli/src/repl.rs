//! REPL – interactive control of a running guidance session.
//!
//! Supported slash-commands:
//!   /route <file>           – load a route file
//!   /goto <lat> <lon> [name] – guide to a single point
//!   /cancel                 – abandon the active route
//!   /status                 – show phase, fix and distance to target
//!   /help                   – show this list
//!   /quit | /exit           – stop guidance and exit

use colored::Colorize;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use tokio::runtime::Runtime;
use waysense_runtime::{GuidanceHandle, GuidanceStatus};
use waysense_types::{NavPhase, Waypoint};

use crate::route;

const POLL: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Route(PathBuf),
    Goto(Waypoint),
    Cancel,
    Status,
    Help,
    Quit,
}

/// Parse one input line.  `Ok(None)` for a blank line.
pub fn parse_command(line: &str) -> Result<Option<Command>, String> {
    let mut words = line.split_whitespace();
    let Some(head) = words.next() else {
        return Ok(None);
    };
    let rest: Vec<&str> = words.collect();
    let command = match head {
        "/route" => match rest.as_slice() {
            [] => return Err("usage: /route <file>".to_string()),
            parts => Command::Route(PathBuf::from(parts.join(" "))),
        },
        "/goto" => match rest.as_slice() {
            [lat, lon, name @ ..] => {
                let target = route::parse_target(lat, lon)?;
                if name.is_empty() {
                    Command::Goto(target)
                } else {
                    Command::Goto(target.with_label(name.join(" ")))
                }
            }
            _ => return Err("usage: /goto <lat> <lon> [name]".to_string()),
        },
        "/cancel" => Command::Cancel,
        "/status" => Command::Status,
        "/help" => Command::Help,
        "/quit" | "/exit" => Command::Quit,
        other => return Err(format!("Unknown command: '{other}'")),
    };
    Ok(Some(command))
}

/// Entry point for the interactive REPL.
///
/// `shutdown` is polled between lines; when set the REPL exits cleanly.
pub fn run(runtime: &Runtime, handle: &GuidanceHandle, shutdown: Arc<AtomicBool>) {
    let lines = spawn_stdin_reader();
    let mut stdout = io::stdout();

    'session: loop {
        print!("{} ", "waysense>".bold().cyan());
        stdout.flush().ok();

        let line = loop {
            if shutdown.load(Ordering::SeqCst) {
                break 'session;
            }
            match lines.recv_timeout(POLL) {
                Ok(line) => break line,
                Err(mpsc::RecvTimeoutError::Timeout) => continue,
                Err(mpsc::RecvTimeoutError::Disconnected) => break 'session,
            }
        };

        let command = match parse_command(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(e) => {
                println!("{} Type {} for available commands.", e.red(), "/help".bold());
                continue;
            }
        };

        match command {
            Command::Route(path) => cmd_route(runtime, handle, &path),
            Command::Goto(target) => cmd_goto(runtime, handle, target),
            Command::Cancel => cmd_cancel(runtime, handle),
            Command::Status => cmd_status(runtime, handle),
            Command::Help => cmd_help(),
            Command::Quit => {
                println!("{}", "Goodbye.".green());
                shutdown.store(true, Ordering::SeqCst);
                break;
            }
        }
    }
}

/// Read stdin on its own thread so Ctrl-C is noticed while waiting for input.
fn spawn_stdin_reader() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let stdin = io::stdin();
        loop {
            let mut line = String::new();
            match stdin.lock().read_line(&mut line) {
                Ok(0) => break, // EOF
                Ok(_) => {
                    if tx.send(line).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    eprintln!("{}: {}", "Read error".red(), e);
                    break;
                }
            }
        }
    });
    rx
}

// ─────────────────────────────────────────────────────────────────────────────
// Command handlers
// ─────────────────────────────────────────────────────────────────────────────

fn cmd_help() {
    println!();
    println!("{}", "Waysense Commands".bold().underline());
    println!("  {}            – load a route file", "/route <file>".bold().cyan());
    println!("  {} – guide to a single point", "/goto <lat> <lon> [name]".bold().cyan());
    println!("  {}                  – abandon the active route", "/cancel".bold().cyan());
    println!("  {}                  – phase, fix and distance to target", "/status".bold().cyan());
    println!("  {}            – stop guidance and exit", "/quit  /exit".bold().cyan());
    println!();
}

fn cmd_route(runtime: &Runtime, handle: &GuidanceHandle, path: &std::path::Path) {
    let waypoints = match route::load_route(path) {
        Ok(w) => w,
        Err(e) => {
            println!("{}: {}", "Route error".red(), e);
            return;
        }
    };
    let count = waypoints.len();
    match runtime.block_on(handle.load_route(waypoints)) {
        Ok(()) => println!("  {} {} waypoint(s) loaded", "✓".green().bold(), count),
        Err(e) => println!("{}: {}", "Could not start route".red(), e),
    }
}

fn cmd_goto(runtime: &Runtime, handle: &GuidanceHandle, target: Waypoint) {
    let shown = format!("{:.5}, {:.5}", target.latitude, target.longitude);
    match runtime.block_on(handle.load_route(vec![target])) {
        Ok(()) => println!("  {} guiding to {}", "✓".green().bold(), shown.bold()),
        Err(e) => println!("{}: {}", "Could not start route".red(), e),
    }
}

fn cmd_cancel(runtime: &Runtime, handle: &GuidanceHandle) {
    match runtime.block_on(handle.cancel()) {
        Ok(()) => println!("  {} route cancelled", "✓".green().bold()),
        Err(e) => println!("{}: {}", "Cancel failed".red(), e),
    }
}

fn cmd_status(runtime: &Runtime, handle: &GuidanceHandle) {
    match runtime.block_on(handle.status()) {
        Ok(status) => print_status(&status),
        Err(e) => println!("{}: {}", "Status unavailable".red(), e),
    }
}

fn print_status(status: &GuidanceStatus) {
    let state = &status.state;
    println!();
    println!("{}", "Guidance Status".bold().underline());

    let phase = state.phase.to_string();
    let phase = match state.phase {
        NavPhase::Idle => phase.dimmed(),
        NavPhase::OffRoute | NavPhase::Rerouting => phase.yellow().bold(),
        _ => phase.green().bold(),
    };
    println!("  Phase      : {}", phase);
    if state.degraded {
        println!("  Positioning: {}", "degraded, guidance paused".red().bold());
    }

    match &status.fix {
        Some(fix) => println!(
            "  Fix        : {:.6}, {:.6}  {:?}  {} sats  {:.1} m/s  heading {:.0}°",
            fix.latitude, fix.longitude, fix.quality, fix.satellites, fix.speed_mps, fix.heading_deg
        ),
        None => println!("  Fix        : {}", "none".dimmed()),
    }

    if let Some(target) = &status.target {
        println!(
            "  Target     : {} ({:.5}, {:.5}), {} waypoint(s) left",
            target.spoken_name().bold(),
            target.latitude,
            target.longitude,
            status.waypoints_left
        );
    }
    if let Some(d) = state.distance_to_target_m {
        println!("  Distance   : {:.0} m", d);
    }
    if let Some(xt) = state.cross_track_m {
        println!("  Off track  : {:.1} m", xt.abs());
    }
    println!("  Route epoch: {}", status.epoch);
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_line_is_ignored() {
        assert_eq!(parse_command("   \n").unwrap(), None);
    }

    #[test]
    fn goto_with_and_without_a_name() {
        let cmd = parse_command("/goto 47.37 8.54").unwrap().unwrap();
        assert_eq!(cmd, Command::Goto(Waypoint::new(47.37, 8.54)));

        let cmd = parse_command("/goto -33.85 151.21 the opera house\n").unwrap().unwrap();
        assert_eq!(
            cmd,
            Command::Goto(Waypoint::new(-33.85, 151.21).with_label("the opera house"))
        );
    }

    #[test]
    fn goto_rejects_bad_coordinates() {
        assert!(parse_command("/goto 47.37").is_err());
        assert!(parse_command("/goto 95 8").is_err());
    }

    #[test]
    fn route_keeps_spaces_in_the_path() {
        let cmd = parse_command("/route my routes/bakery.toml").unwrap().unwrap();
        assert_eq!(cmd, Command::Route(PathBuf::from("my routes/bakery.toml")));
        assert!(parse_command("/route").is_err());
    }

    #[test]
    fn simple_commands() {
        assert_eq!(parse_command("/cancel").unwrap(), Some(Command::Cancel));
        assert_eq!(parse_command("/status").unwrap(), Some(Command::Status));
        assert_eq!(parse_command("/help").unwrap(), Some(Command::Help));
        assert_eq!(parse_command("/exit").unwrap(), Some(Command::Quit));
        assert!(parse_command("/settings").unwrap_err().contains("Unknown command"));
    }
}
