//! Geodesic Engine.
//!
//! Pure, stateless great-circle math over a spherical earth of fixed mean
//! radius ([`EARTH_MEAN_RADIUS_M`]).  Every function accepts
//! [`Coordinate`]s in decimal degrees and returns metres or degrees.
//!
//! | Function | Result |
//! |---|---|
//! | [`distance`] | haversine distance, metres |
//! | [`initial_bearing`] | forward azimuth, `[0, 360)` |
//! | [`cross_track_distance`] | signed offset from a segment's great circle, metres (right of travel is positive) |
//! | [`destination`] | point at a given bearing and distance |
//!
//! Identical points yield a distance of `0.0` and a bearing of `0.0`.
//!
//! # Example
//!
//! ```rust
//! use waysense_perception::geodesic::{distance, initial_bearing};
//! use waysense_types::Coordinate;
//!
//! let a = Coordinate::new(0.0, 0.0);
//! let b = Coordinate::new(1.0, 0.0);
//! assert!((distance(a, b) - 111_195.0).abs() < 100.0);
//! assert_eq!(initial_bearing(a, b), 0.0);
//! ```

use waysense_types::Coordinate;

/// Mean earth radius (IUGG), metres.
pub const EARTH_MEAN_RADIUS_M: f64 = 6_371_000.0;

/// Separation below which two points are treated as identical (m).
const COINCIDENT_M: f64 = 1e-6;

/// Great-circle distance between `a` and `b` in metres.
pub fn distance(a: Coordinate, b: Coordinate) -> f64 {
    EARTH_MEAN_RADIUS_M * angular_distance(a, b)
}

/// Initial bearing from `a` towards `b`, degrees true in `[0, 360)`.
///
/// Returns `0.0` for coincident points.
pub fn initial_bearing(a: Coordinate, b: Coordinate) -> f64 {
    if distance(a, b) < COINCIDENT_M {
        return 0.0;
    }
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let dlon = (b.longitude - a.longitude).to_radians();

    let y = dlon.sin() * lat2.cos();
    let x = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * dlon.cos();
    wrap_360(y.atan2(x).to_degrees())
}

/// Signed distance of `point` from the great circle through `start` and
/// `end`.  Positive means the point lies to the right of the direction of
/// travel, negative to the left.
///
/// A degenerate segment (`start == end`) has no direction; the result is
/// `0.0` when the point coincides with it and otherwise the plain distance
/// to `start`, positive.
pub fn cross_track_distance(point: Coordinate, start: Coordinate, end: Coordinate) -> f64 {
    let d13 = angular_distance(start, point);
    if distance(start, end) < COINCIDENT_M {
        return EARTH_MEAN_RADIUS_M * d13;
    }
    let theta13 = initial_bearing(start, point).to_radians();
    let theta12 = initial_bearing(start, end).to_radians();
    let xt = (d13.sin() * (theta13 - theta12).sin()).clamp(-1.0, 1.0).asin();
    EARTH_MEAN_RADIUS_M * xt
}

/// Point reached by travelling `distance_m` from `start` on initial bearing
/// `bearing_deg`.
pub fn destination(start: Coordinate, bearing_deg: f64, distance_m: f64) -> Coordinate {
    let delta = distance_m / EARTH_MEAN_RADIUS_M;
    let theta = bearing_deg.to_radians();
    let lat1 = start.latitude.to_radians();
    let lon1 = start.longitude.to_radians();

    let lat2 = (lat1.sin() * delta.cos() + lat1.cos() * delta.sin() * theta.cos()).asin();
    let lon2 = lon1
        + (theta.sin() * delta.sin() * lat1.cos()).atan2(delta.cos() - lat1.sin() * lat2.sin());
    Coordinate::new(lat2.to_degrees(), wrap_180(lon2.to_degrees()))
}

/// Normalise an angle to `(-180, 180]`.
pub fn wrap_180(deg: f64) -> f64 {
    let a = deg.rem_euclid(360.0);
    if a > 180.0 { a - 360.0 } else { a }
}

/// Normalise an angle to `[0, 360)`.
pub fn wrap_360(deg: f64) -> f64 {
    let a = deg.rem_euclid(360.0);
    // rem_euclid can round up to exactly 360.0 for tiny negative inputs.
    if a >= 360.0 { 0.0 } else { a }
}

/// Signed relative bearing of `target_bearing` as seen from `heading`:
/// negative is to the left, positive to the right.
pub fn relative_bearing(heading: f64, target_bearing: f64) -> f64 {
    wrap_180(target_bearing - heading)
}

const CARDINALS: [&str; 16] = [
    "north",
    "north-northeast",
    "northeast",
    "east-northeast",
    "east",
    "east-southeast",
    "southeast",
    "south-southeast",
    "south",
    "south-southwest",
    "southwest",
    "west-southwest",
    "west",
    "west-northwest",
    "northwest",
    "north-northwest",
];

/// Spoken 16-point compass direction for a bearing.
pub fn cardinal_direction(bearing_deg: f64) -> &'static str {
    let idx = (wrap_360(bearing_deg) / 22.5).round() as usize % CARDINALS.len();
    CARDINALS[idx]
}

fn angular_distance(a: Coordinate, b: Coordinate) -> f64 {
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let dlat = lat2 - lat1;
    let dlon = (b.longitude - a.longitude).to_radians();

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * h.sqrt().min(1.0).asin()
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
