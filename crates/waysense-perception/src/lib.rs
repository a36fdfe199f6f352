//! `waysense-perception` – turning raw sensor input into facts.
//!
//! Everything here is synchronous and owns its own state; the runtime
//! drives these types from producer tasks.
//!
//! # Modules
//!
//! - [`geodesic`] – great-circle distance, bearing and cross-track math on a
//!   spherical earth, plus angle wrapping and compass naming.
//! - [`position`] – [`PositionTracker`][position::PositionTracker]: validates
//!   NMEA sentences and maintains the versioned latest-fix slot.
//! - [`obstacle`] – [`ObstacleProcessor`][obstacle::ObstacleProcessor]:
//!   classifies depth frames into Left/Center/Right proximity tiers with
//!   per-sector debouncing.

pub mod geodesic;
pub mod obstacle;
pub mod position;

pub use obstacle::{ObstacleProcessor, ObstacleThresholds, SectorScan};
pub use position::PositionTracker;
