//! Route files and coordinate arguments.
//!
//! A route file lists waypoints in walking order:
//!
//! ```toml
//! [[waypoint]]
//! lat = 47.3769
//! lon = 8.5417
//! label = "the station exit"
//!
//! [[waypoint]]
//! lat = 47.3781
//! lon = 8.5402
//! ```

use serde::Deserialize;
use std::fs;
use std::path::Path;
use waysense_types::Waypoint;

#[derive(Debug, Deserialize)]
struct RouteFile {
    #[serde(rename = "waypoint", default)]
    waypoints: Vec<Entry>,
}

#[derive(Debug, Deserialize)]
struct Entry {
    lat: f64,
    lon: f64,
    #[serde(default)]
    label: Option<String>,
}

pub fn load_route(path: &Path) -> Result<Vec<Waypoint>, String> {
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read route {}: {}", path.display(), e))?;
    parse_route(&raw).map_err(|e| format!("{}: {}", path.display(), e))
}

pub fn parse_route(raw: &str) -> Result<Vec<Waypoint>, String> {
    let file: RouteFile = toml::from_str(raw).map_err(|e| format!("Failed to parse route: {e}"))?;
    if file.waypoints.is_empty() {
        return Err("route has no [[waypoint]] entries".to_string());
    }
    file.waypoints
        .into_iter()
        .enumerate()
        .map(|(i, entry)| {
            let wp = waypoint(entry.lat, entry.lon).map_err(|e| format!("waypoint {}: {e}", i + 1))?;
            Ok(match entry.label {
                Some(label) if !label.trim().is_empty() => wp.with_label(label.trim()),
                _ => wp,
            })
        })
        .collect()
}

/// Parse a `<lat> <lon>` pair from the command line or the REPL.
pub fn parse_target(lat: &str, lon: &str) -> Result<Waypoint, String> {
    let lat: f64 = lat.trim().parse().map_err(|_| format!("'{lat}' is not a latitude"))?;
    let lon: f64 = lon.trim().parse().map_err(|_| format!("'{lon}' is not a longitude"))?;
    waypoint(lat, lon)
}

fn waypoint(lat: f64, lon: f64) -> Result<Waypoint, String> {
    if !(-90.0..=90.0).contains(&lat) {
        return Err(format!("latitude {lat} out of range"));
    }
    if !(-180.0..=180.0).contains(&lon) {
        return Err(format!("longitude {lon} out of range"));
    }
    Ok(Waypoint::new(lat, lon))
}
