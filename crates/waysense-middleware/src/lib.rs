//! `waysense-middleware` – plumbing between producers, the arbiter and the
//! outside world.
//!
//! # Modules
//!
//! - [`bus`] – typed, topic-based telemetry bus built on Tokio broadcast
//!   channels.  Observers only; nothing on the bus drives guidance.
//! - [`inbox`] – bounded, non-blocking producer → single-consumer queue that
//!   feeds the alert arbiter.
//! - [`adapter`] – [`SpeechOutput`][adapter::SpeechOutput] and
//!   [`RoutePlanner`][adapter::RoutePlanner] collaborator traits.

pub mod adapter;
pub mod bus;
pub mod inbox;

pub use adapter::{RoutePlanner, SpeechOutcome, SpeechOutput};
pub use bus::{EventBus, Topic, TopicReceiver};
pub use inbox::{Admission, InboxReceiver, InboxSender, Ranked, inbox};
