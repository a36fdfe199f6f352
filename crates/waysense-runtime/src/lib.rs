//! `waysense-runtime` – the guidance core.
//!
//! Turns positioning sentences and depth frames into arbitrated spoken
//! guidance.
//!
//! # Modules
//!
//! - [`config`] – [`GuidanceConfig`][config::GuidanceConfig]: every tunable
//!   (radii, bands, obstacle thresholds, speech rate, capacities) with serde
//!   defaults and validation.
//! - [`instruction`] – turn and distance-band trackers that decide *when* to
//!   speak, and the phrasing of every navigation message.
//! - [`navigator`] – [`Navigator`][navigator::Navigator]: the navigation state
//!   machine.  Owns the route and the latest fix, advances the phase on every
//!   fix and issues at most one re-route request per off-route episode.
//! - [`guidance_loop`] – [`spawn_guidance`][guidance_loop::spawn_guidance]:
//!   producer threads, the navigation task and the scheduler task wired
//!   through the priority inbox, plus the depth-feed supervisor.
//! - [`clock`] – [`MonotonicClock`][clock::MonotonicClock]: the shared
//!   millisecond time base.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: initialises
//!   the global `tracing` subscriber with an optional OTLP span exporter.
//!   Set `OTEL_EXPORTER_OTLP_ENDPOINT` to enable live trace export.

pub mod clock;
pub mod config;
pub mod guidance_loop;
pub mod instruction;
pub mod navigator;
pub mod telemetry;

pub use clock::MonotonicClock;
pub use config::GuidanceConfig;
pub use guidance_loop::{GuidanceHandle, GuidanceParts, GuidanceStatus, spawn_guidance};
pub use navigator::{Navigator, NavigatorOutput, RerouteRequest};
pub use telemetry::{TracerProviderGuard, init_tracing};
