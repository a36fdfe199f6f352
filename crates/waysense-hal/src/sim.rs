//! In-process simulated sensors for running the full stack without hardware.
//!
//! - [`SimGps`] walks a scripted path at constant speed and emits
//!   checksummed `RMC` + `GGA` pairs, one pair per step.
//! - [`SimDepthCamera`] replays per-sector distances as synthetic frames.
//!
//! # Example
//!
//! ```rust
//! use waysense_hal::gps::SentenceSource;
//! use waysense_hal::sim::SimGps;
//! use waysense_types::Coordinate;
//!
//! let mut gps = SimGps::walk(
//!     vec![Coordinate::new(47.0, 8.0), Coordinate::new(47.001, 8.0)],
//!     1.4,
//!     1_000,
//! );
//! let rmc = gps.next_sentence().unwrap().unwrap();
//! assert!(rmc.starts_with("$GPRMC"));
//! let gga = gps.next_sentence().unwrap().unwrap();
//! assert!(gga.starts_with("$GPGGA"));
//! ```

use std::collections::VecDeque;
use std::thread;
use std::time::Duration;

use waysense_perception::geodesic;
use waysense_types::{Coordinate, DepthFrame, Millis, WayError, nmea_checksum};

use crate::depth::DepthCamera;
use crate::gps::SentenceSource;

const MPS_TO_KNOTS: f64 = 1.0 / 0.514_444;

// ────────────────────────────────────────────────────────────────────────────
// Simulated GPS
// ────────────────────────────────────────────────────────────────────────────

/// A receiver walking along a polyline.
///
/// After the last vertex the receiver stands still and keeps reporting the
/// final position.
pub struct SimGps {
    id: String,
    path: Vec<Coordinate>,
    leg: usize,
    position: Coordinate,
    speed_mps: f64,
    interval_ms: Millis,
    elapsed_ms: Millis,
    realtime: bool,
    pending: VecDeque<String>,
    emitted_first: bool,
    max_steps: Option<u64>,
    steps: u64,
}

impl SimGps {
    /// Walk `path` at `speed_mps`, one fix every `interval_ms`.
    pub fn walk(path: Vec<Coordinate>, speed_mps: f64, interval_ms: Millis) -> Self {
        let position = path.first().copied().unwrap_or(Coordinate::new(0.0, 0.0));
        Self {
            id: "sim_gps".to_string(),
            path,
            leg: 0,
            position,
            speed_mps,
            interval_ms: interval_ms.max(1),
            elapsed_ms: 0,
            realtime: false,
            pending: VecDeque::new(),
            emitted_first: false,
            max_steps: None,
            steps: 0,
        }
    }

    /// Sleep one interval per step so the stream runs at wall-clock rate.
    pub fn realtime(mut self) -> Self {
        self.realtime = true;
        self
    }

    /// End the stream after `steps` fixes.
    pub fn with_max_steps(mut self, steps: u64) -> Self {
        self.max_steps = Some(steps);
        self
    }

    pub fn position(&self) -> Coordinate {
        self.position
    }

    /// Advance one interval along the path; returns the course walked.
    fn step(&mut self) -> f64 {
        let mut budget = self.speed_mps * self.interval_ms as f64 / 1000.0;
        let mut course = 0.0;
        while budget > 0.0 {
            let Some(next) = self.path.get(self.leg + 1).copied() else {
                break;
            };
            let remaining = geodesic::distance(self.position, next);
            course = geodesic::initial_bearing(self.position, next);
            if remaining <= budget {
                self.position = next;
                self.leg += 1;
                budget -= remaining;
            } else {
                self.position = geodesic::destination(self.position, course, budget);
                budget = 0.0;
            }
        }
        course
    }

    fn emit_pair(&mut self, course: f64, speed_mps: f64) {
        let time = utc_field(self.elapsed_ms);
        let (lat, ns) = nmea_degrees(self.position.latitude, 2, 'N', 'S');
        let (lon, ew) = nmea_degrees(self.position.longitude, 3, 'E', 'W');
        let knots = speed_mps * MPS_TO_KNOTS;
        self.pending.push_back(frame(&format!(
            "GPRMC,{time},A,{lat},{ns},{lon},{ew},{knots:05.1},{course:05.1},010125,,"
        )));
        self.pending.push_back(frame(&format!(
            "GPGGA,{time},{lat},{ns},{lon},{ew},1,09,0.9,12.0,M,47.0,M,,"
        )));
    }
}

impl SentenceSource for SimGps {
    fn id(&self) -> &str {
        &self.id
    }

    fn next_sentence(&mut self) -> Result<Option<String>, WayError> {
        if let Some(line) = self.pending.pop_front() {
            return Ok(Some(line));
        }
        if self.max_steps.is_some_and(|max| self.steps >= max) {
            return Ok(None);
        }
        if self.emitted_first {
            if self.realtime {
                thread::sleep(Duration::from_millis(self.interval_ms));
            }
            self.elapsed_ms += self.interval_ms;
            let moving = self.leg + 1 < self.path.len();
            let course = self.step();
            self.emit_pair(course, if moving { self.speed_mps } else { 0.0 });
        } else {
            self.emitted_first = true;
            let course = self
                .path
                .get(1)
                .map_or(0.0, |next| geodesic::initial_bearing(self.position, *next));
            self.emit_pair(course, 0.0);
        }
        self.steps += 1;
        Ok(self.pending.pop_front())
    }
}

/// Wrap a sentence body with `$` and its checksum.
fn frame(body: &str) -> String {
    format!("${body}*{:02X}", nmea_checksum(body))
}

/// `hhmmss.ss` for a clock starting at 12:00:00 UTC.
fn utc_field(elapsed_ms: Millis) -> String {
    let total_cs = elapsed_ms / 10 + 12 * 3600 * 100;
    let cs = total_cs % 100;
    let secs = (total_cs / 100) % 86_400;
    format!("{:02}{:02}{:02}.{cs:02}", secs / 3600, (secs / 60) % 60, secs % 60)
}

/// Encode signed decimal degrees as `(d)ddmm.mmmm` plus hemisphere.
fn nmea_degrees(value: f64, deg_width: usize, positive: char, negative: char) -> (String, char) {
    let hemi = if value < 0.0 { negative } else { positive };
    let abs = value.abs();
    let mut degrees = abs.trunc() as u32;
    let mut minutes = ((abs - abs.trunc()) * 60.0 * 10_000.0).round() / 10_000.0;
    if minutes >= 60.0 {
        degrees += 1;
        minutes = 0.0;
    }
    (format!("{degrees:0deg_width$}{minutes:07.4}"), hemi)
}

// ────────────────────────────────────────────────────────────────────────────
// Simulated depth camera
// ────────────────────────────────────────────────────────────────────────────

/// Replays a script of `[left, center, right]` nearest distances (m).
///
/// Each call to [`capture`](DepthCamera::capture) yields the next scripted
/// frame; once exhausted the script repeats from the start.  An empty script
/// produces an all-clear view.
pub struct SimDepthCamera {
    id: String,
    width: usize,
    height: usize,
    script: Vec<[f32; 3]>,
    cursor: usize,
}

impl SimDepthCamera {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            id: "sim_depth".to_string(),
            width: width.max(3),
            height: height.max(1),
            script: Vec::new(),
            cursor: 0,
        }
    }

    pub fn with_script(mut self, script: Vec<[f32; 3]>) -> Self {
        self.script = script;
        self
    }

    fn render(&self, sectors: [f32; 3], now: Millis) -> DepthFrame {
        let mut depth = Vec::with_capacity(self.width * self.height);
        for _ in 0..self.height {
            for col in 0..self.width {
                let sector = (col * 3 / self.width).min(2);
                depth.push(sectors[sector]);
            }
        }
        DepthFrame::new(self.width, self.height, depth, now)
    }
}

impl DepthCamera for SimDepthCamera {
    fn id(&self) -> &str {
        &self.id
    }

    fn capture(&mut self, now: Millis) -> Result<Option<DepthFrame>, WayError> {
        let sectors = if self.script.is_empty() {
            [f32::INFINITY; 3]
        } else {
            let s = self.script[self.cursor % self.script.len()];
            self.cursor += 1;
            s
        };
        Ok(Some(self.render(sectors, now)))
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use waysense_perception::position::PositionTracker;

    #[test]
    fn sim_gps_sentences_parse_and_advance() {
        let start = Coordinate::new(47.0, 8.0);
        let end = geodesic::destination(start, 90.0, 20.0);
        let mut gps = SimGps::walk(vec![start, end], 2.0, 1_000).with_max_steps(4);
        let mut tracker = PositionTracker::new(0.5);

        let mut fixes = Vec::new();
        let mut now = 0;
        while let Some(line) = gps.next_sentence().unwrap() {
            now += 500;
            if let Some(fix) = tracker.ingest(&line, now).unwrap() {
                fixes.push(fix);
            }
        }
        assert_eq!(fixes.len(), 4);
        let walked = geodesic::distance(fixes[0].coordinate(), fixes[3].coordinate());
        assert!((walked - 6.0).abs() < 0.5, "walked {walked}");
        assert!((fixes[3].heading_deg - 90.0).abs() < 1.0);
        assert!((fixes[3].speed_mps - 2.0).abs() < 0.1);
    }

    #[test]
    fn sim_gps_stands_still_at_the_end() {
        let start = Coordinate::new(-33.0, 151.0);
        let end = geodesic::destination(start, 0.0, 1.0);
        let mut gps = SimGps::walk(vec![start, end], 5.0, 1_000).with_max_steps(3);
        while gps.next_sentence().unwrap().is_some() {}
        assert!(geodesic::distance(gps.position(), end) < 1e-6);
    }

    #[test]
    fn coordinate_encoding() {
        assert_eq!(nmea_degrees(48.1173, 2, 'N', 'S'), ("4807.0380".to_string(), 'N'));
        assert_eq!(nmea_degrees(-11.5, 3, 'E', 'W'), ("01130.0000".to_string(), 'W'));
        assert_eq!(utc_field(61_250), "120101.25");
    }

    #[test]
    fn sim_depth_camera_replays_script() {
        let mut cam = SimDepthCamera::new(6, 2).with_script(vec![[0.3, 2.0, 1.0], [3.0, 3.0, 3.0]]);
        let f1 = cam.capture(0).unwrap().unwrap();
        assert_eq!(f1.depth_m[0], 0.3);
        assert_eq!(f1.depth_m[2], 2.0);
        assert_eq!(f1.depth_m[5], 1.0);
        let f2 = cam.capture(100).unwrap().unwrap();
        assert!(f2.depth_m.iter().all(|&d| d == 3.0));
        let f3 = cam.capture(200).unwrap().unwrap();
        assert_eq!(f3.depth_m[0], 0.3, "script repeats");
    }

    #[test]
    fn empty_script_is_all_clear() {
        let mut cam = SimDepthCamera::new(3, 1);
        let f = cam.capture(0).unwrap().unwrap();
        assert!(f.depth_m.iter().all(|d| d.is_infinite()));
    }
}
