//! Position Tracker.
//!
//! Turns raw NMEA 0183 sentences into validated [`GpsFix`] snapshots.
//! Framing, checksum and field decoding are done by [`nmea0183::Parser`];
//! the tracker merges the decoded sentences:
//!
//! | Sentence | Contribution |
//! |---|---|
//! | `GGA` | position, satellites, HDOP, altitude, UTC time; **produces a fix** |
//! | `RMC` | validity flag, speed over ground, course over ground |
//! | `VTG` | course and speed backup |
//!
//! Talker prefixes (`GP`, `GN`, ...) do not matter.  A GGA with an
//! altitude is reported as a 3D fix, without one as 2D.  Sentences the
//! parser decodes but the tracker has no use for yield `Ok(None)`.
//!
//! The tracker owns a single "latest fix" slot plus the fix before it.  The
//! slot is versioned: [`PositionTracker::version`] increments on every
//! accepted fix, and readers only ever receive copies.
//!
//! # Example
//!
//! ```rust
//! use waysense_perception::position::PositionTracker;
//!
//! let mut tracker = PositionTracker::new(0.5);
//! let fix = tracker
//!     .ingest("$GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*47", 1_000)
//!     .unwrap()
//!     .unwrap();
//! assert!((fix.latitude - 48.1173).abs() < 1e-4);
//! assert_eq!(tracker.version(), 1);
//! assert!(!tracker.is_stale(5_000, 2_000));
//! ```

use chrono::NaiveTime;
use nmea0183::{GGA, ParseResult, Parser, RMC, VTG};
use tracing::debug;
use waysense_types::{FixQuality, GpsFix, Millis, ParseError};

use crate::geodesic;

/// 1 knot in m/s.
const KNOTS_TO_MPS: f64 = 0.514_444;

/// Minimum displacement between the two fixes of the window before a heading
/// is derived from them (m).
const MIN_HEADING_BASELINE_M: f64 = 2.0;

/// RMC/VTG motion data older than this is not merged into a new fix.
const MOTION_MAX_AGE_MS: Millis = 2_000;

/// Motion data carried by RMC and VTG, merged into the next GGA fix.
#[derive(Debug, Clone, Copy, Default)]
struct Motion {
    speed_mps: Option<f64>,
    course_deg: Option<f64>,
    updated_at: Millis,
}

/// Stateful NMEA ingestion with a versioned latest-fix slot.
#[derive(Debug)]
pub struct PositionTracker {
    min_heading_speed_mps: f64,
    latest: Option<GpsFix>,
    previous: Option<GpsFix>,
    version: u64,
    motion: Option<Motion>,
}

impl PositionTracker {
    /// Create a tracker.  Course over ground reported below
    /// `min_heading_speed_mps` is considered noise and the heading is derived
    /// from the fix window instead.
    pub fn new(min_heading_speed_mps: f64) -> Self {
        Self {
            min_heading_speed_mps,
            latest: None,
            previous: None,
            version: 0,
            motion: None,
        }
    }

    /// Feed one raw sentence captured at `now`.
    ///
    /// Returns `Ok(Some(fix))` when the sentence produced a new fix,
    /// `Ok(None)` when it was valid but produced none (supporting sentence,
    /// a sentence type the tracker ignores, or a GGA reporting no fix).
    ///
    /// # Errors
    ///
    /// [`ParseError::Checksum`] or [`ParseError::Malformed`]; the latest fix
    /// is left untouched in both cases.
    pub fn ingest(&mut self, raw: &str, now: Millis) -> Result<Option<GpsFix>, ParseError> {
        match decode(raw)? {
            ParseResult::GGA(Some(gga)) => self.ingest_gga(&gga, now).map(Some),
            ParseResult::GGA(None) => {
                debug!("GGA reports no fix");
                Ok(None)
            }
            ParseResult::RMC(Some(rmc)) => {
                self.ingest_rmc(&rmc, now);
                Ok(None)
            }
            ParseResult::RMC(None) => {
                debug!("RMC flagged void");
                self.motion = None;
                Ok(None)
            }
            ParseResult::VTG(Some(vtg)) => {
                self.ingest_vtg(&vtg, now);
                Ok(None)
            }
            _ => {
                debug!("ignoring sentence without position data");
                Ok(None)
            }
        }
    }

    /// Copy of the latest accepted fix.
    pub fn current_fix(&self) -> Option<GpsFix> {
        self.latest
    }

    /// Copy of the fix accepted before the latest one.
    pub fn previous_fix(&self) -> Option<GpsFix> {
        self.previous
    }

    /// Number of fixes accepted so far.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Age of the latest fix at `now`, `None` if there is none.
    pub fn fix_age(&self, now: Millis) -> Option<Millis> {
        self.latest.map(|f| now.saturating_sub(f.captured_at))
    }

    /// `true` when there is no fix or the latest one is older than
    /// `max_age_ms`.
    pub fn is_stale(&self, max_age_ms: Millis, now: Millis) -> bool {
        self.fix_age(now).is_none_or(|age| age > max_age_ms)
    }

    // -------------------------------------------------------------------------
    // Sentence handlers
    // -------------------------------------------------------------------------

    fn ingest_gga(&mut self, gga: &GGA, now: Millis) -> Result<GpsFix, ParseError> {
        let latitude = gga.latitude.as_f64();
        let longitude = gga.longitude.as_f64();
        if !(-90.0..=90.0).contains(&latitude) || !(-180.0..=180.0).contains(&longitude) {
            return Err(ParseError::Malformed(format!(
                "position {latitude}, {longitude} out of range"
            )));
        }
        if latitude == 0.0 && longitude == 0.0 {
            return Err(ParseError::Malformed("zero latitude and longitude".into()));
        }

        let altitude_m = Some(f64::from(gga.altitude.meters));
        let quality = if altitude_m.is_some_and(|m| m.abs() > 0.01) {
            FixQuality::Fix3D
        } else {
            FixQuality::Fix2D
        };

        let mut fix = GpsFix {
            latitude,
            longitude,
            heading_deg: 0.0,
            speed_mps: 0.0,
            satellites: gga.sat_in_use,
            quality,
            hdop: Some(gga.hdop).filter(|h| h.is_finite() && *h > 0.0),
            altitude_m,
            utc_time: utc_time(gga),
            captured_at: now,
        };
        self.fill_motion(&mut fix, now);

        self.previous = self.latest.replace(fix);
        self.version += 1;
        Ok(fix)
    }

    fn ingest_rmc(&mut self, rmc: &RMC, now: Millis) {
        self.motion = Some(Motion {
            speed_mps: Some(f64::from(rmc.speed.as_knots()) * KNOTS_TO_MPS),
            course_deg: rmc
                .course
                .as_ref()
                .map(|c| geodesic::wrap_360(f64::from(c.degrees))),
            updated_at: now,
        });
    }

    fn ingest_vtg(&mut self, vtg: &VTG, now: Millis) {
        // VTG only backs up RMC: keep a fresh RMC course where VTG has none.
        let base = self
            .motion
            .filter(|m| now.saturating_sub(m.updated_at) <= MOTION_MAX_AGE_MS);
        self.motion = Some(Motion {
            speed_mps: Some(f64::from(vtg.speed.as_knots()) * KNOTS_TO_MPS),
            course_deg: vtg
                .course
                .as_ref()
                .map(|c| geodesic::wrap_360(f64::from(c.degrees)))
                .or(base.and_then(|m| m.course_deg)),
            updated_at: now,
        });
    }

    /// Merge speed and heading into a freshly parsed fix.
    fn fill_motion(&self, fix: &mut GpsFix, now: Millis) {
        let motion = self
            .motion
            .filter(|m| now.saturating_sub(m.updated_at) <= MOTION_MAX_AGE_MS);

        let window_speed = self.latest.and_then(|prev| {
            let dt_s = now.checked_sub(prev.captured_at).filter(|dt| *dt > 0)? as f64 / 1000.0;
            Some(geodesic::distance(prev.coordinate(), fix.coordinate()) / dt_s)
        });
        fix.speed_mps = motion
            .and_then(|m| m.speed_mps)
            .or(window_speed)
            .unwrap_or(0.0);

        let reported_course = motion
            .and_then(|m| m.course_deg)
            .filter(|_| fix.speed_mps >= self.min_heading_speed_mps);

        fix.heading_deg = match (reported_course, self.latest) {
            (Some(course), _) => course,
            (None, Some(prev)) => {
                if geodesic::distance(prev.coordinate(), fix.coordinate()) >= MIN_HEADING_BASELINE_M {
                    geodesic::initial_bearing(prev.coordinate(), fix.coordinate())
                } else {
                    prev.heading_deg
                }
            }
            (None, None) => 0.0,
        };
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Decoding
// ────────────────────────────────────────────────────────────────────────────

/// Run one line through a fresh parser.  The line is re-terminated with
/// CR LF, so callers may pass it trimmed or not.
fn decode(raw: &str) -> Result<ParseResult, ParseError> {
    let line = raw.trim();
    if !line.starts_with('$') {
        return Err(ParseError::Malformed("missing '$' prefix".into()));
    }
    let mut parser = Parser::new();
    line.bytes()
        .chain(*b"\r\n")
        .find_map(|byte| parser.parse_from_byte(byte))
        .ok_or_else(|| ParseError::Malformed("incomplete sentence".into()))?
        .map_err(parse_error)
}

fn parse_error(reason: &'static str) -> ParseError {
    if reason.to_ascii_lowercase().contains("checksum") {
        ParseError::Checksum(reason.to_string())
    } else {
        ParseError::Malformed(reason.to_string())
    }
}

fn utc_time(gga: &GGA) -> Option<NaiveTime> {
    let whole = gga.time.seconds.trunc();
    let nanos = ((gga.time.seconds - whole) * 1e9) as u32;
    NaiveTime::from_hms_nano_opt(
        u32::from(gga.time.hours),
        u32::from(gga.time.minutes),
        whole as u32,
        nanos,
    )
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
