//! [`GuidanceConfig`] – every tunable of the guidance core.
//!
//! All fields carry serde defaults, so an empty `[guidance]` table (or no
//! table at all) yields a working configuration.  Distances are metres,
//! durations milliseconds, angles degrees.

use serde::{Deserialize, Serialize};
use waysense_kernel::SchedulerConfig;
use waysense_perception::ObstacleThresholds;
use waysense_types::{Millis, WayError};

/// Tunables shared by the navigator, the obstacle processor and the arbiter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuidanceConfig {
    // ── Navigation ──
    /// Within this distance of the target the waypoint counts as reached.
    pub arrival_radius_m: f64,
    /// Within this distance the navigator announces the approach.
    pub approach_radius_m: f64,
    /// Cross-track deviation beyond which the user is off route.
    pub off_route_tolerance_m: f64,
    /// How long the user may stay off route before a re-route is requested.
    pub off_route_grace_ms: Millis,
    /// Remaining distances announced once each, e.g. `[50, 20]`.
    pub distance_bands_m: Vec<f64>,
    /// Relative bearing beyond which "continue straight" becomes a turn.
    pub turn_band_deg: f64,
    /// Relative bearing beyond which a turn becomes "turn around".
    pub turn_around_deg: f64,
    /// Margin a bearing must cross a band boundary by to change the turn.
    pub turn_hysteresis_deg: f64,
    /// Below this speed the course over ground is not trusted as heading.
    pub min_heading_speed_mps: f64,
    /// A fix older than this suspends instructions (degraded mode).
    pub fix_stale_ms: Millis,
    /// Navigation supervision tick.
    pub tick_interval_ms: Millis,

    // ── Obstacles ──
    pub obstacle_caution_m: f32,
    pub obstacle_danger_m: f32,
    pub obstacle_cooldown_ms: Millis,
    pub depth_max_range_m: f32,
    pub depth_min_confidence: u8,
    /// Silence on the depth feed beyond this raises a degraded alert.
    pub depth_timeout_ms: Millis,
    /// Pause between depth captures.
    pub depth_frame_interval_ms: Millis,

    // ── Speech ──
    pub voice_queue_capacity: usize,
    pub speech_words_per_minute: u32,
    pub speech_lead_in_ms: Millis,
    /// Capacity of the producer → arbiter inbox.
    pub inbox_capacity: usize,
}

impl Default for GuidanceConfig {
    fn default() -> Self {
        Self {
            arrival_radius_m: 5.0,
            approach_radius_m: 15.0,
            off_route_tolerance_m: 20.0,
            off_route_grace_ms: 8_000,
            distance_bands_m: vec![50.0, 20.0],
            turn_band_deg: 30.0,
            turn_around_deg: 150.0,
            turn_hysteresis_deg: 5.0,
            min_heading_speed_mps: 0.5,
            fix_stale_ms: 5_000,
            tick_interval_ms: 250,
            obstacle_caution_m: 1.5,
            obstacle_danger_m: 0.45,
            obstacle_cooldown_ms: 3_000,
            depth_max_range_m: 4.0,
            depth_min_confidence: 30,
            depth_timeout_ms: 2_000,
            depth_frame_interval_ms: 100,
            voice_queue_capacity: 16,
            speech_words_per_minute: 200,
            speech_lead_in_ms: 300,
            inbox_capacity: 64,
        }
    }
}

impl GuidanceConfig {
    /// Reject values the guidance core cannot work with.
    ///
    /// # Errors
    ///
    /// [`WayError::Config`] naming the first offending field.
    pub fn validate(&self) -> Result<(), WayError> {
        let fail = |msg: &str| Err(WayError::Config(msg.to_string()));

        if !(self.arrival_radius_m > 0.0) {
            return fail("arrival_radius_m must be positive");
        }
        if self.arrival_radius_m >= self.approach_radius_m {
            return fail("arrival_radius_m must be smaller than approach_radius_m");
        }
        if !(self.off_route_tolerance_m > 0.0) {
            return fail("off_route_tolerance_m must be positive");
        }
        if self.distance_bands_m.iter().any(|b| !(*b > 0.0)) {
            return fail("distance_bands_m entries must be positive");
        }
        if !(self.turn_band_deg > 0.0 && self.turn_band_deg < self.turn_around_deg)
            || self.turn_around_deg > 180.0
        {
            return fail("turn bands must satisfy 0 < turn_band_deg < turn_around_deg <= 180");
        }
        if self.turn_hysteresis_deg < 0.0
            || self.turn_hysteresis_deg * 2.0 >= self.turn_around_deg - self.turn_band_deg
        {
            return fail("turn_hysteresis_deg must be smaller than half the turn band width");
        }
        if !(self.obstacle_danger_m > 0.0 && self.obstacle_danger_m < self.obstacle_caution_m) {
            return fail("obstacle_danger_m must be positive and below obstacle_caution_m");
        }
        if self.obstacle_caution_m > self.depth_max_range_m {
            return fail("obstacle_caution_m must not exceed depth_max_range_m");
        }
        if self.voice_queue_capacity == 0 {
            return fail("voice_queue_capacity must be at least 1");
        }
        if self.inbox_capacity == 0 {
            return fail("inbox_capacity must be at least 1");
        }
        if self.speech_words_per_minute == 0 {
            return fail("speech_words_per_minute must be at least 1");
        }
        if self.fix_stale_ms == 0 || self.tick_interval_ms == 0 || self.depth_timeout_ms == 0 {
            return fail("fix_stale_ms, tick_interval_ms and depth_timeout_ms must be non-zero");
        }
        Ok(())
    }

    /// Announcement bands sorted from farthest to nearest, duplicates removed.
    pub fn sorted_bands(&self) -> Vec<f64> {
        let mut bands = self.distance_bands_m.clone();
        bands.sort_by(|a, b| b.total_cmp(a));
        bands.dedup();
        bands
    }

    pub fn obstacle_thresholds(&self) -> ObstacleThresholds {
        ObstacleThresholds {
            caution_m: self.obstacle_caution_m,
            danger_m: self.obstacle_danger_m,
            cooldown_ms: self.obstacle_cooldown_ms,
            max_range_m: self.depth_max_range_m,
            min_confidence: self.depth_min_confidence,
        }
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            capacity: self.voice_queue_capacity,
            words_per_minute: self.speech_words_per_minute,
            lead_in_ms: self.speech_lead_in_ms,
        }
    }
}
