//! `waysense-kernel` – arbitration and supervision.
//!
//! The kernel does not sense or navigate; it decides what the user hears and
//! notices when a sensor goes quiet.
//!
//! # Modules
//!
//! - [`alert_queue`] – [`AlertQueue`][alert_queue::AlertQueue]: bounded
//!   priority queue with supersession of outdated alerts and lowest-first
//!   eviction on overflow.
//! - [`arbiter`] – [`AlertScheduler`][arbiter::AlertScheduler]: the sole
//!   writer of the voice channel.  Keeps one request in flight, preempts it
//!   for higher-priority alerts, and estimates speech occupancy.
//! - [`watchdog`] – [`Watchdog`][watchdog::Watchdog]: tracks heartbeats from
//!   sensor feeds and reports each outage once.

pub mod alert_queue;
pub mod arbiter;
pub mod watchdog;

pub use alert_queue::{AlertQueue, PushOutcome};
pub use arbiter::{AlertScheduler, InFlight, SchedulerConfig};
pub use watchdog::{FeedTransition, Watchdog};
