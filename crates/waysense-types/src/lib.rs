//! `waysense-types` – shared vocabulary of the guidance stack.
//!
//! Every crate in the workspace speaks in these types: positioning fixes,
//! routes, navigation phases, obstacle readings, alerts, and the voice
//! requests that leave the device.  The error taxonomy lives here too so that
//! producers can convert failures without depending on each other.

use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Monotonic milliseconds since process start.
///
/// All internal scheduling (staleness, grace periods, cooldowns, speech
/// occupancy) is expressed in this unit so that components can be driven by
/// a simulated clock in tests.
pub type Millis = u64;

// ────────────────────────────────────────────────────────────────────────────
// Positioning
// ────────────────────────────────────────────────────────────────────────────

/// Fix-quality tier reported by the receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum FixQuality {
    NoFix,
    Fix2D,
    Fix3D,
}

/// A WGS84 point in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinate {
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }
}

/// A single validated positioning reading.
///
/// Fixes are immutable snapshots: a newer fix supersedes an older one, it
/// never mutates it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GpsFix {
    /// Latitude in decimal degrees (-90 to +90).
    pub latitude: f64,
    /// Longitude in decimal degrees (-180 to +180).
    pub longitude: f64,
    /// Heading over ground, degrees true in `[0, 360)`.
    pub heading_deg: f64,
    /// Speed over ground in m/s.
    pub speed_mps: f64,
    /// Satellites used in the solution.
    pub satellites: u8,
    pub quality: FixQuality,
    /// Horizontal dilution of precision, when reported.
    pub hdop: Option<f32>,
    /// Altitude above mean sea level in metres, when reported.
    pub altitude_m: Option<f64>,
    /// UTC time-of-day carried by the sentence.
    pub utc_time: Option<NaiveTime>,
    /// Local monotonic capture time.
    pub captured_at: Millis,
}

impl GpsFix {
    pub fn coordinate(&self) -> Coordinate {
        Coordinate::new(self.latitude, self.longitude)
    }
}

/// XOR checksum over the body of an NMEA sentence (the characters between
/// `$` and `*`).
pub fn nmea_checksum(body: &str) -> u8 {
    body.bytes().fold(0u8, |acc, b| acc ^ b)
}

// ────────────────────────────────────────────────────────────────────────────
// Routes
// ────────────────────────────────────────────────────────────────────────────

/// A point on the route, optionally named for announcements.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Waypoint {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl Waypoint {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            label: None,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn coordinate(&self) -> Coordinate {
        Coordinate::new(self.latitude, self.longitude)
    }

    /// Name used in spoken instructions.
    pub fn spoken_name(&self) -> &str {
        self.label.as_deref().unwrap_or("the next waypoint")
    }
}

/// Ordered, non-empty list of waypoints plus the index of the current target.
///
/// The index only ever moves forward.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutePlan {
    waypoints: Vec<Waypoint>,
    current: usize,
}

impl RoutePlan {
    /// Build a plan targeting the first waypoint.
    ///
    /// # Errors
    ///
    /// Returns [`NavError::EmptyRoute`] when `waypoints` is empty.
    pub fn new(waypoints: Vec<Waypoint>) -> Result<Self, NavError> {
        if waypoints.is_empty() {
            return Err(NavError::EmptyRoute);
        }
        Ok(Self {
            waypoints,
            current: 0,
        })
    }

    pub fn waypoints(&self) -> &[Waypoint] {
        &self.waypoints
    }

    pub fn current_index(&self) -> usize {
        self.current
    }

    pub fn current_target(&self) -> &Waypoint {
        &self.waypoints[self.current]
    }

    /// The waypoint reached before the current target, if any.
    pub fn previous_waypoint(&self) -> Option<&Waypoint> {
        self.current
            .checked_sub(1)
            .and_then(|i| self.waypoints.get(i))
    }

    pub fn is_last(&self) -> bool {
        self.current + 1 == self.waypoints.len()
    }

    pub fn len(&self) -> usize {
        self.waypoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waypoints.is_empty()
    }

    /// Move the target to the next waypoint.
    ///
    /// # Errors
    ///
    /// Returns [`NavError::RouteExhausted`] when the current target is the
    /// last waypoint; the index is left unchanged.
    pub fn advance(&mut self) -> Result<&Waypoint, NavError> {
        if self.is_last() {
            return Err(NavError::RouteExhausted);
        }
        self.current += 1;
        Ok(&self.waypoints[self.current])
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Navigation state
// ────────────────────────────────────────────────────────────────────────────

/// Phase of the navigation state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NavPhase {
    Idle,
    Navigating,
    Approaching,
    OffRoute,
    Rerouting,
    Arrived,
}

impl NavPhase {
    /// Exhaustive edge table of the state machine.
    ///
    /// `Navigating` is reachable from every phase because loading a route
    /// always restarts guidance; `Idle` is reachable from every phase because
    /// a route can be cancelled at any time.
    pub fn can_transition_to(self, next: NavPhase) -> bool {
        use NavPhase::*;
        match (self, next) {
            (_, Navigating) | (_, Idle) => self != next || self == Navigating,
            (Navigating, Approaching) | (Navigating, OffRoute) => true,
            (Approaching, Arrived) => true,
            (OffRoute, Rerouting) => true,
            (Idle, _)
            | (Navigating, _)
            | (Approaching, _)
            | (OffRoute, _)
            | (Rerouting, _)
            | (Arrived, _) => false,
        }
    }
}

impl std::fmt::Display for NavPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            NavPhase::Idle => "idle",
            NavPhase::Navigating => "navigating",
            NavPhase::Approaching => "approaching",
            NavPhase::OffRoute => "off-route",
            NavPhase::Rerouting => "rerouting",
            NavPhase::Arrived => "arrived",
        };
        f.write_str(name)
    }
}

/// Snapshot of the live navigation state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NavigationState {
    pub phase: NavPhase,
    /// Great-circle distance to the current target (m).
    pub distance_to_target_m: Option<f64>,
    /// Target bearing relative to heading; negative is left, positive right.
    pub relative_bearing_deg: Option<f64>,
    /// Signed cross-track deviation from the active segment (m).
    pub cross_track_m: Option<f64>,
    /// Index of the current target in the route.
    pub target_index: Option<usize>,
    pub last_instruction_at: Option<Millis>,
    /// `true` while instruction generation is suspended for lack of a fix.
    pub degraded: bool,
}

impl NavigationState {
    pub fn idle() -> Self {
        Self {
            phase: NavPhase::Idle,
            distance_to_target_m: None,
            relative_bearing_deg: None,
            cross_track_m: None,
            target_index: None,
            last_instruction_at: None,
            degraded: false,
        }
    }
}

impl Default for NavigationState {
    fn default() -> Self {
        Self::idle()
    }
}

/// A single edge taken by the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseTransition {
    pub from: NavPhase,
    pub to: NavPhase,
    pub at: Millis,
}

// ────────────────────────────────────────────────────────────────────────────
// Obstacles
// ────────────────────────────────────────────────────────────────────────────

/// Sentinel stored in a depth cell when the sensor has no valid return.
pub const INVALID_DEPTH: f32 = 0.0;

/// Horizontal zone of the depth frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Sector {
    Left,
    Center,
    Right,
}

impl Sector {
    pub const ALL: [Sector; 3] = [Sector::Left, Sector::Center, Sector::Right];

    pub fn index(self) -> usize {
        match self {
            Sector::Left => 0,
            Sector::Center => 1,
            Sector::Right => 2,
        }
    }

    /// Phrase used in spoken alerts.
    pub fn spoken(self) -> &'static str {
        match self {
            Sector::Left => "on your left",
            Sector::Center => "ahead",
            Sector::Right => "on your right",
        }
    }
}

/// Proximity tier of a sector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Urgency {
    Clear,
    Caution,
    Danger,
}

/// Classification of one sector for one frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ObstacleReading {
    pub sector: Sector,
    /// Nearest valid distance in the sector (m); `None` when no cell was valid.
    pub nearest_m: Option<f32>,
    pub urgency: Urgency,
    pub frame_at: Millis,
}

/// A depth image in row-major order.
///
/// Cells hold distances in metres; [`INVALID_DEPTH`] marks a missing
/// return.  The optional confidence buffer has one entry per cell.
#[derive(Debug, Clone, PartialEq)]
pub struct DepthFrame {
    pub width: usize,
    pub height: usize,
    pub depth_m: Vec<f32>,
    pub confidence: Option<Vec<u8>>,
    pub captured_at: Millis,
}

impl DepthFrame {
    pub fn new(width: usize, height: usize, depth_m: Vec<f32>, captured_at: Millis) -> Self {
        Self {
            width,
            height,
            depth_m,
            confidence: None,
            captured_at,
        }
    }

    pub fn with_confidence(mut self, confidence: Vec<u8>) -> Self {
        self.confidence = Some(confidence);
        self
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Alerts and voice output
// ────────────────────────────────────────────────────────────────────────────

/// Producer of an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AlertOrigin {
    Navigation,
    Obstacle,
}

/// Class of an alert; determines its priority tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AlertKind {
    ObstacleDanger,
    /// Loss of positioning or of the depth feed.
    Degraded,
    /// Off-route and rerouting announcements.
    OffRoute,
    ObstacleCaution,
    /// Route start, approaching, arrived, back on route.
    Progress,
    Turn,
    DistanceBand,
}

impl AlertKind {
    /// Priority tier; higher preempts lower.
    pub fn priority(self) -> u8 {
        match self {
            AlertKind::ObstacleDanger => 70,
            AlertKind::Degraded => 60,
            AlertKind::OffRoute => 50,
            AlertKind::ObstacleCaution => 40,
            AlertKind::Progress => 30,
            AlertKind::Turn => 20,
            AlertKind::DistanceBand => 10,
        }
    }
}

/// Key under which a newer pending alert replaces an older one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SupersedeKey {
    Sector(Sector),
    Kind(AlertOrigin, AlertKind),
}

/// A candidate announcement awaiting arbitration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub priority: u8,
    pub kind: AlertKind,
    pub message: String,
    pub origin: AlertOrigin,
    /// Sector for obstacle alerts.
    pub sector: Option<Sector>,
    /// Route generation a navigation alert belongs to.
    pub route_epoch: Option<u32>,
    pub created_at: Millis,
    /// The producer will not re-fire this alert class before this instant.
    pub suppress_until: Millis,
}

impl Alert {
    /// Build a navigation-origin alert for route generation `epoch`.
    pub fn navigation(kind: AlertKind, message: impl Into<String>, epoch: u32, now: Millis) -> Self {
        Self {
            priority: kind.priority(),
            kind,
            message: message.into(),
            origin: AlertOrigin::Navigation,
            sector: None,
            route_epoch: Some(epoch),
            created_at: now,
            suppress_until: now,
        }
    }

    /// Build an obstacle-origin alert that suppresses repeats for `cooldown_ms`.
    pub fn obstacle(
        kind: AlertKind,
        sector: Option<Sector>,
        message: impl Into<String>,
        now: Millis,
        cooldown_ms: Millis,
    ) -> Self {
        Self {
            priority: kind.priority(),
            kind,
            message: message.into(),
            origin: AlertOrigin::Obstacle,
            sector,
            route_epoch: None,
            created_at: now,
            suppress_until: now.saturating_add(cooldown_ms),
        }
    }

    /// Pending alerts sharing this key are stale once this alert is queued.
    ///
    /// Progress and off-route announcements carry no key: every phase change
    /// must be heard.
    pub fn supersede_key(&self) -> Option<SupersedeKey> {
        match (self.origin, self.sector, self.kind) {
            (AlertOrigin::Obstacle, Some(sector), _) => Some(SupersedeKey::Sector(sector)),
            (origin, _, kind @ (AlertKind::Turn | AlertKind::DistanceBand | AlertKind::Degraded)) => {
                Some(SupersedeKey::Kind(origin, kind))
            }
            _ => None,
        }
    }
}

/// The single arbitrated unit handed to the speech collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceRequest {
    /// Identifier echoed back in completion reports.
    pub id: u64,
    pub text: String,
    pub priority: u8,
    /// When `true` the collaborator truncates any utterance in progress.
    pub interrupt: bool,
    pub origin: AlertOrigin,
}

/// Everything the arbitration consumer accepts from producers.
#[derive(Debug, Clone, PartialEq)]
pub enum SchedulerInput {
    Alert(Alert),
    /// A sector returned to Clear; pending alerts for it are outdated.
    RetractSector(Sector),
    /// A new route generation started; drop navigation alerts of older ones.
    FlushNavigation { epoch: u32 },
    /// The speech collaborator finished (or truncated) a request.
    SpeechFinished { request_id: u64, interrupted: bool },
}

impl SchedulerInput {
    /// Rank used for backpressure eviction; control messages outrank alerts.
    pub fn rank(&self) -> u8 {
        match self {
            SchedulerInput::Alert(alert) => alert.priority,
            _ => u8::MAX,
        }
    }

    /// Inputs that must survive any backpressure: control messages and
    /// danger alerts.
    pub fn is_pinned(&self) -> bool {
        match self {
            SchedulerInput::Alert(alert) => alert.kind == AlertKind::ObstacleDanger,
            _ => true,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Telemetry bus envelope
// ────────────────────────────────────────────────────────────────────────────

/// Unified event wrapper for the telemetry bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// e.g., "waysense-runtime::navigation"
    pub source: String,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(source: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source: source.into(),
            payload,
        }
    }
}

/// Variants of data routed over the telemetry bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventPayload {
    Fix(GpsFix),
    Navigation(NavigationState),
    PhaseChanged(PhaseTransition),
    ObstacleScan(Vec<ObstacleReading>),
    Spoken(VoiceRequest),
    RerouteRequested { from: Coordinate, target: Waypoint },
    Degraded { component: String, message: String },
}

// ────────────────────────────────────────────────────────────────────────────
// Errors
// ────────────────────────────────────────────────────────────────────────────

/// A positioning sentence that could not be used.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("checksum mismatch: {0}")]
    Checksum(String),

    #[error("malformed sentence: {0}")]
    Malformed(String),
}

/// Navigation-side failures.  None of these is fatal to the device.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NavError {
    #[error("no valid fix for {waited_ms} ms")]
    NoFix { waited_ms: Millis },

    #[error("route exhausted: no remaining waypoints")]
    RouteExhausted,

    #[error("route must contain at least one waypoint")]
    EmptyRoute,

    #[error("illegal phase transition {from} -> {to}")]
    IllegalTransition { from: NavPhase, to: NavPhase },
}

/// A depth frame that cannot be classified.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("invalid depth frame: {0}")]
    InvalidFrame(String),
}

/// Umbrella error spanning parsing, navigation, sensing, devices and wiring.
#[derive(Error, Debug)]
pub enum WayError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Navigation(#[from] NavError),

    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error("Device fault on {device}: {details}")]
    Device { device: String, details: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Channel error: {0}")]
    Channel(String),
}
