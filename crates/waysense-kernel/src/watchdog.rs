//! [`Watchdog`] – sensor-feed liveness monitor.
//!
//! Every producer (the positioning reader, the depth camera) reports a
//! heartbeat whenever it delivers data.  The watchdog remembers the time of
//! each heartbeat and considers a feed *silent* once its timeout has passed.
//!
//! Time is passed in explicitly as [`Millis`] so supervisors can be driven by
//! a simulated clock.  [`Watchdog::poll`] reports only *edges* (a feed going
//! silent, a feed coming back) so that each outage is announced once.

use std::collections::HashMap;

use waysense_types::Millis;

// ────────────────────────────────────────────────────────────────────────────
// Public types
// ────────────────────────────────────────────────────────────────────────────

/// A change in a feed's health observed by [`Watchdog::poll`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedTransition {
    Lost(String),
    Restored(String),
}

// ────────────────────────────────────────────────────────────────────────────
// Internal entry
// ────────────────────────────────────────────────────────────────────────────

struct FeedEntry {
    last_heartbeat: Millis,
    timeout: Millis,
    reported_lost: bool,
}

impl FeedEntry {
    fn silent_at(&self, now: Millis) -> bool {
        now.saturating_sub(self.last_heartbeat) > self.timeout
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Watchdog
// ────────────────────────────────────────────────────────────────────────────

/// Tracks heartbeats from registered feeds and detects silent ones.
///
/// # Example
///
/// ```
/// use waysense_kernel::watchdog::{Watchdog, FeedTransition};
///
/// let mut wd = Watchdog::new();
/// wd.register("depth", 2_000, 0);
/// wd.heartbeat("depth", 1_000);
/// assert!(wd.poll(2_500).is_empty());
///
/// assert_eq!(wd.poll(3_500), vec![FeedTransition::Lost("depth".into())]);
/// assert!(wd.poll(4_000).is_empty());
/// ```
#[derive(Default)]
pub struct Watchdog {
    feeds: HashMap<String, FeedEntry>,
}

impl Watchdog {
    /// Create an empty watchdog with no registered feeds.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `feed_id` with a maximum silence of `timeout_ms`, counting
    /// from `now`.  Re-registering resets the deadline.
    pub fn register(&mut self, feed_id: &str, timeout_ms: Millis, now: Millis) {
        self.feeds.insert(
            feed_id.to_string(),
            FeedEntry {
                last_heartbeat: now,
                timeout: timeout_ms,
                reported_lost: false,
            },
        );
    }

    /// Record data from `feed_id` at `now`.  No-op for unknown feeds.
    pub fn heartbeat(&mut self, feed_id: &str, now: Millis) {
        if let Some(entry) = self.feeds.get_mut(feed_id) {
            entry.last_heartbeat = entry.last_heartbeat.max(now);
        }
    }

    /// Report feeds that went silent or came back since the previous poll.
    pub fn poll(&mut self, now: Millis) -> Vec<FeedTransition> {
        let mut transitions = Vec::new();
        for (id, entry) in &mut self.feeds {
            let silent = entry.silent_at(now);
            if silent && !entry.reported_lost {
                entry.reported_lost = true;
                transitions.push(FeedTransition::Lost(id.clone()));
            } else if !silent && entry.reported_lost {
                entry.reported_lost = false;
                transitions.push(FeedTransition::Restored(id.clone()));
            }
        }
        transitions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heartbeat_resets_deadline() {
        let mut wd = Watchdog::new();
        wd.register("depth", 20, 0);
        wd.heartbeat("depth", 10);
        assert!(wd.poll(25).is_empty());
        assert_eq!(wd.poll(31), vec![FeedTransition::Lost("depth".into())]);
    }

    #[test]
    fn only_silent_feeds_are_reported() {
        let mut wd = Watchdog::new();
        wd.register("fast", 20, 0);
        wd.register("slow", 60_000, 0);
        assert!(wd.poll(10).is_empty());
        assert_eq!(wd.poll(30), vec![FeedTransition::Lost("fast".into())]);
    }

    #[test]
    fn heartbeat_for_unknown_feed_is_noop() {
        let mut wd = Watchdog::new();
        wd.heartbeat("ghost", 0);
        assert!(wd.poll(1_000_000).is_empty());
    }

    #[test]
    fn poll_reports_each_outage_once() {
        let mut wd = Watchdog::new();
        wd.register("depth", 100, 0);
        assert!(wd.poll(50).is_empty());
        assert_eq!(wd.poll(200), vec![FeedTransition::Lost("depth".into())]);
        assert!(wd.poll(300).is_empty());
        wd.heartbeat("depth", 350);
        assert_eq!(wd.poll(360), vec![FeedTransition::Restored("depth".into())]);
        assert!(wd.poll(400).is_empty());
    }

    #[test]
    fn reregister_resets_timer_and_outage() {
        let mut wd = Watchdog::new();
        wd.register("depth", 20, 0);
        assert_eq!(wd.poll(30), vec![FeedTransition::Lost("depth".into())]);
        wd.register("depth", 60_000, 30);
        assert!(wd.poll(31).is_empty());
    }
}
