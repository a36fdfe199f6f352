//! Typed, topic-based telemetry bus.
//!
//! Uses [`tokio::sync::broadcast`] channels so every observer receives every
//! message and no slow observer can stall the guidance pipeline.  The bus is
//! strictly an observation surface: nothing on it feeds back into
//! arbitration.
//!
//! # Topics
//!
//! | Topic | Typical traffic |
//! |---|---|
//! | [`Topic::Positioning`] | accepted fixes |
//! | [`Topic::Navigation`] | navigation state snapshots, phase transitions, re-route requests |
//! | [`Topic::Obstacles`] | per-frame sector readings |
//! | [`Topic::Speech`] | voice requests handed to the speech collaborator |
//! | [`Topic::SystemAlerts`] | degraded-mode events (stale fix, silent depth feed) |

use tokio::sync::broadcast;
use tracing::{trace, warn};
use waysense_types::{Event, WayError};

/// Default channel capacity (number of buffered events before old ones are
/// dropped for slow subscribers).
const DEFAULT_CAPACITY: usize = 256;

/// Routing lanes of the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    Positioning,
    Navigation,
    Obstacles,
    Speech,
    SystemAlerts,
}

/// Shared event bus.  Clone it cheaply – all clones share the same
/// underlying broadcast channels.
#[derive(Clone, Debug)]
pub struct EventBus {
    positioning: broadcast::Sender<Event>,
    navigation: broadcast::Sender<Event>,
    obstacles: broadcast::Sender<Event>,
    speech: broadcast::Sender<Event>,
    system_alerts: broadcast::Sender<Event>,
}

impl EventBus {
    /// Create a new bus; `capacity` applies to every topic independently.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            positioning: broadcast::channel(capacity).0,
            navigation: broadcast::channel(capacity).0,
            obstacles: broadcast::channel(capacity).0,
            speech: broadcast::channel(capacity).0,
            system_alerts: broadcast::channel(capacity).0,
        }
    }

    /// Publish `event` to `topic`.
    ///
    /// Returns the number of receivers handed the event, or
    /// [`WayError::Channel`] when nobody is subscribed to the topic.
    pub fn publish_to(&self, topic: Topic, event: Event) -> Result<usize, WayError> {
        self.topic_sender(topic)
            .send(event)
            .map_err(|_| WayError::Channel(format!("No subscribers for topic {topic:?}")))
    }

    /// Publish without caring whether anyone listens.
    ///
    /// Producers use this so an absent observer never becomes an error path.
    pub fn emit(&self, topic: Topic, event: Event) {
        if self.publish_to(topic, event).is_err() {
            trace!(?topic, "no telemetry observers");
        }
    }

    /// Subscribe to a single topic.
    pub fn subscribe_to(&self, topic: Topic) -> TopicReceiver {
        TopicReceiver {
            topic,
            receiver: self.topic_sender(topic).subscribe(),
        }
    }

    /// Number of live subscribers on `topic`.
    pub fn subscriber_count(&self, topic: Topic) -> usize {
        self.topic_sender(topic).receiver_count()
    }

    fn topic_sender(&self, topic: Topic) -> &broadcast::Sender<Event> {
        match topic {
            Topic::Positioning => &self.positioning,
            Topic::Navigation => &self.navigation,
            Topic::Obstacles => &self.obstacles,
            Topic::Speech => &self.speech,
            Topic::SystemAlerts => &self.system_alerts,
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Topic-based receiver
// ---------------------------------------------------------------------------

/// An async receiver bound to a single [`Topic`] channel.
///
/// Obtained via [`EventBus::subscribe_to`].
pub struct TopicReceiver {
    topic: Topic,
    receiver: broadcast::Receiver<Event>,
}

impl TopicReceiver {
    /// Wait for the next event on this topic.
    ///
    /// * `Err(RecvError::Lagged(n))` – the subscriber fell behind and `n`
    ///   messages were dropped.
    /// * `Err(RecvError::Closed)` – every sender is gone.
    pub async fn recv(&mut self) -> Result<Event, broadcast::error::RecvError> {
        self.receiver.recv().await
    }

    /// Wait for the next event, skipping over lag.  `None` once the bus is
    /// closed.
    pub async fn next(&mut self) -> Option<Event> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(topic = ?self.topic, lagged_by = n, "telemetry observer lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Take the next buffered event without waiting.
    pub fn try_recv(&mut self) -> Result<Event, broadcast::error::TryRecvError> {
        self.receiver.try_recv()
    }

    /// The [`Topic`] this receiver is bound to.
    pub fn topic(&self) -> Topic {
        self.topic
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use waysense_types::{EventPayload, NavPhase, PhaseTransition};

    fn make_event(source: &str) -> Event {
        Event::new(
            source,
            EventPayload::PhaseChanged(PhaseTransition {
                from: NavPhase::Idle,
                to: NavPhase::Navigating,
                at: 0,
            }),
        )
    }

    #[test]
    fn publish_without_subscribers_is_an_error() {
        let bus = EventBus::default();
        let result = bus.publish_to(Topic::Navigation, make_event("test"));
        assert!(matches!(result, Err(WayError::Channel(_))));
        // The lossy path never fails.
        bus.emit(Topic::Navigation, make_event("test"));
    }

    #[tokio::test]
    async fn topic_multiple_subscribers_receive_same_event() -> Result<(), Box<dyn std::error::Error>> {
        let bus = EventBus::default();
        let mut a = bus.subscribe_to(Topic::Navigation);
        let mut b = bus.subscribe_to(Topic::Navigation);
        assert_eq!(bus.subscriber_count(Topic::Navigation), 2);

        let event = make_event("waysense-runtime::navigation");
        assert_eq!(bus.publish_to(Topic::Navigation, event.clone())?, 2);

        assert_eq!(a.recv().await?.id, event.id);
        assert_eq!(b.recv().await?.id, event.id);
        Ok(())
    }

    #[tokio::test]
    async fn topics_are_isolated() -> Result<(), Box<dyn std::error::Error>> {
        let bus = EventBus::default();
        let mut alerts = bus.subscribe_to(Topic::SystemAlerts);
        let _positioning = bus.subscribe_to(Topic::Positioning);

        bus.publish_to(Topic::Positioning, make_event("gps"))?;

        let result =
            tokio::time::timeout(std::time::Duration::from_millis(50), alerts.recv()).await;
        assert!(result.is_err(), "SystemAlerts must not see Positioning traffic");
        assert_eq!(alerts.topic(), Topic::SystemAlerts);
        Ok(())
    }

    #[tokio::test]
    async fn slow_subscriber_lags_instead_of_blocking() {
        let bus = EventBus::new(16);
        let mut slow = bus.subscribe_to(Topic::Obstacles);
        for _ in 0..1_000 {
            bus.emit(Topic::Obstacles, make_event("depth"));
        }
        let result = slow.recv().await;
        assert!(matches!(result, Err(broadcast::error::RecvError::Lagged(_))));
        // `next` skips the gap and keeps delivering.
        assert!(slow.next().await.is_some());
    }
}
