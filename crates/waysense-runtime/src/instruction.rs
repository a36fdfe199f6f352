//! Instruction policy: when to speak, and what to say.
//!
//! Two trackers decide *when*:
//!
//! - [`TurnClassifier`] buckets the relative bearing into a
//!   [`TurnDirection`] and reports only changes.  A hysteresis margin keeps a
//!   bearing hovering on a band edge from flapping between two instructions.
//! - [`BandTracker`] reports each configured distance band once per target,
//!   the first time the remaining distance falls inside it.
//!
//! The `*_phrase` functions decide *what*.

use std::fmt;

use waysense_perception::geodesic::cardinal_direction;

/// Coarse direction of the target relative to the walking direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnDirection {
    Straight,
    Left,
    Right,
    Around,
}

impl fmt::Display for TurnDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(turn_phrase(*self))
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Turn classification
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct TurnClassifier {
    band_deg: f64,
    around_deg: f64,
    hysteresis_deg: f64,
    current: Option<TurnDirection>,
}

impl TurnClassifier {
    pub fn new(band_deg: f64, around_deg: f64, hysteresis_deg: f64) -> Self {
        Self {
            band_deg,
            around_deg,
            hysteresis_deg,
            current: None,
        }
    }

    pub fn current(&self) -> Option<TurnDirection> {
        self.current
    }

    /// Forget the last direction, e.g. when the target changes.
    pub fn reset(&mut self) {
        self.current = None;
    }

    /// Classify `relative_deg` (negative = left) and return the new direction
    /// if it differs from the previous one.
    pub fn update(&mut self, relative_deg: f64) -> Option<TurnDirection> {
        let next = self.classify(relative_deg);
        if self.current == Some(next) {
            return None;
        }
        self.current = Some(next);
        Some(next)
    }

    fn classify(&self, relative_deg: f64) -> TurnDirection {
        let h = self.hysteresis_deg;
        // Boundaries move away from the current bucket so leaving it takes
        // an extra `h` degrees.
        let (band, around) = match self.current {
            None => (self.band_deg, self.around_deg),
            Some(TurnDirection::Straight) => (self.band_deg + h, self.around_deg),
            Some(TurnDirection::Left | TurnDirection::Right) => {
                (self.band_deg - h, self.around_deg + h)
            }
            Some(TurnDirection::Around) => (self.band_deg, self.around_deg - h),
        };
        let magnitude = relative_deg.abs();
        if magnitude < band {
            TurnDirection::Straight
        } else if magnitude >= around {
            TurnDirection::Around
        } else if relative_deg < 0.0 {
            TurnDirection::Left
        } else {
            TurnDirection::Right
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Distance bands
// ────────────────────────────────────────────────────────────────────────────

/// Announces each distance band once per target.
#[derive(Debug, Clone)]
pub struct BandTracker {
    /// Farthest first.
    bands: Vec<f64>,
    /// Number of bands already entered (announced or skipped).
    entered: usize,
}

impl BandTracker {
    pub fn new(bands_descending: Vec<f64>) -> Self {
        Self {
            bands: bands_descending,
            entered: 0,
        }
    }

    /// Start over for a new target `distance_m` away.  Bands the user is
    /// already inside are marked entered without being announced.
    pub fn reset(&mut self, distance_m: Option<f64>) {
        self.entered = distance_m.map_or(0, |d| self.depth(d));
    }

    /// The band just entered, if `distance_m` moved into a nearer band than
    /// any seen before.  Skipping several bands at once announces only the
    /// nearest.
    pub fn update(&mut self, distance_m: f64) -> Option<f64> {
        let depth = self.depth(distance_m);
        if depth <= self.entered {
            return None;
        }
        self.entered = depth;
        Some(self.bands[depth - 1])
    }

    fn depth(&self, distance_m: f64) -> usize {
        self.bands.iter().take_while(|b| distance_m <= **b).count()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Phrasing
// ────────────────────────────────────────────────────────────────────────────

pub fn turn_phrase(direction: TurnDirection) -> &'static str {
    match direction {
        TurnDirection::Straight => "Continue straight",
        TurnDirection::Left => "Turn left",
        TurnDirection::Right => "Turn right",
        TurnDirection::Around => "Turn around",
    }
}

/// Distances are spoken in whole metres.
pub fn spoken_meters(distance_m: f64) -> String {
    let m = distance_m.max(0.0).round() as u64;
    if m == 1 {
        "1 meter".to_string()
    } else {
        format!("{m} meters")
    }
}

pub fn start_phrase(name: &str, distance_m: Option<f64>, bearing_deg: Option<f64>) -> String {
    match (distance_m, bearing_deg) {
        (Some(d), Some(b)) => format!(
            "Starting navigation to {name}, {} to the {}",
            spoken_meters(d),
            cardinal_direction(b)
        ),
        _ => format!("Starting navigation to {name}. Waiting for GPS signal"),
    }
}

pub fn band_phrase(name: &str, band_m: f64) -> String {
    format!("{} to {name}", spoken_meters(band_m))
}

pub fn approaching_phrase(name: &str, distance_m: f64) -> String {
    format!("Approaching {name}, {}", spoken_meters(distance_m))
}

pub fn waypoint_reached_phrase(reached: &str, next: &str, distance_m: f64, bearing_deg: f64) -> String {
    format!(
        "Reached {reached}. Next, {next}, {} to the {}",
        spoken_meters(distance_m),
        cardinal_direction(bearing_deg)
    )
}

pub const DESTINATION_REACHED: &str = "You have arrived at your destination";
pub const NAVIGATION_CANCELLED: &str = "Navigation cancelled";
pub const REROUTING: &str = "Recalculating route";
pub const BACK_ON_ROUTE: &str = "Back on route";
pub const GPS_LOST: &str = "GPS signal lost, guidance paused";
pub const GPS_RESTORED: &str = "GPS signal restored";
pub const DEPTH_LOST: &str = "Obstacle sensor not responding";
pub const DEPTH_RESTORED: &str = "Obstacle sensor restored";

/// Off-route warning naming the side the route lies on.
///
/// `cross_track_m` is positive when the user is right of the route, so the
/// route is then to the left.
pub fn off_route_phrase(cross_track_m: f64) -> String {
    let side = if cross_track_m > 0.0 { "left" } else { "right" };
    format!("You are off route. The route is to your {side}")
}

pub fn leaving_approach_phrase(name: &str) -> String {
    format!("Moving away from {name}")
}
