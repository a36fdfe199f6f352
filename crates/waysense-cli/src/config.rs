//! Device configuration – reads/writes `~/.waysense/config.toml`.
//!
//! ```toml
//! gps_device = "/dev/ttyAMA0"
//! route_file = "/home/pi/routes/bakery.toml"
//!
//! [guidance]
//! arrival_radius_m = 4.0
//! distance_bands_m = [100, 50, 20]
//! ```
//!
//! Every key is optional; the `[guidance]` table maps onto
//! [`GuidanceConfig`].

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use waysense_runtime::GuidanceConfig;

/// Persisted device configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Serial device node or recorded NMEA log.
    #[serde(default = "default_gps_device")]
    pub gps_device: String,

    /// Delay between lines when replaying a recorded log (0 = as fast as
    /// the device delivers them).
    #[serde(default)]
    pub replay_pacing_ms: u64,

    /// Route loaded at startup when no target is given on the command line.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route_file: Option<PathBuf>,

    #[serde(default)]
    pub guidance: GuidanceConfig,
}

fn default_gps_device() -> String {
    "/dev/ttyAMA0".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            gps_device: default_gps_device(),
            replay_pacing_ms: 0,
            route_file: None,
            guidance: GuidanceConfig::default(),
        }
    }
}

/// Return the path to `~/.waysense/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

/// Build the config path relative to the given home directory.
pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".waysense").join("config.toml")
}

/// Load and validate the config at `path`, applying environment overrides.
/// Returns `None` if the file does not exist.
pub fn load_from(path: &Path) -> Result<Option<Config>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    let mut cfg = parse(&raw)?;
    apply_env_overrides(&mut cfg);
    Ok(Some(cfg))
}

/// Parse and validate a config document.
pub fn parse(raw: &str) -> Result<Config, String> {
    let cfg: Config = toml::from_str(raw).map_err(|e| format!("Failed to parse config: {e}"))?;
    cfg.guidance
        .validate()
        .map_err(|e| format!("Invalid [guidance] settings: {e}"))?;
    Ok(cfg)
}

/// Apply `WAYSENSE_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `WAYSENSE_GPS_DEVICE` | `gps_device` |
/// | `WAYSENSE_ROUTE` | `route_file` |
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("WAYSENSE_GPS_DEVICE")
        && !v.trim().is_empty()
    {
        cfg.gps_device = v;
    }
    if let Ok(v) = std::env::var("WAYSENSE_ROUTE")
        && !v.trim().is_empty()
    {
        cfg.route_file = Some(PathBuf::from(v));
    }
}

/// Save the config to `path`, creating the parent directory if necessary.
pub fn save_to(cfg: &Config, path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory: {}", e))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700))
                .map_err(|e| format!("Failed to set config directory permissions: {}", e))?;
        }
    }
    let raw = toml::to_string_pretty(cfg).map_err(|e| format!("Failed to serialize config: {}", e))?;
    // Owner-only read/write (rw-------) on Unix.
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| {
                use std::io::Write;
                f.write_all(raw.as_bytes())
            })
            .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw).map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    Ok(())
}
