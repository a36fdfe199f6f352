//! Collaborator seams.
//!
//! The guidance core never synthesizes speech or plans routes itself.  It
//! talks to the outside world through two traits:
//!
//! - [`SpeechOutput`] – receives every arbitrated [`VoiceRequest`] and
//!   resolves when the utterance finished or was cut short.
//! - [`RoutePlanner`] – receives the single re-route request issued per
//!   off-route episode and may answer with a replacement route.

use async_trait::async_trait;
use waysense_types::{Coordinate, VoiceRequest, WayError, Waypoint};

/// How an utterance ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeechOutcome {
    Completed,
    /// A later request with `interrupt = true` truncated this one.
    Interrupted,
}

/// Speech-synthesis boundary.
///
/// # Contract
///
/// * `speak` is called once per request, in emission order.
/// * A request with `interrupt = true` must cut any utterance in progress;
///   the future of the cut request then resolves to
///   [`SpeechOutcome::Interrupted`].
#[async_trait]
pub trait SpeechOutput: Send + Sync {
    async fn speak(&self, request: VoiceRequest) -> Result<SpeechOutcome, WayError>;
}

/// External route planner.
#[async_trait]
pub trait RoutePlanner: Send + Sync {
    /// Ask for a new way from `from` to `target`.  `Ok(Some(route))`
    /// replaces the active route; `Ok(None)` means the user is expected to
    /// correct course on their own.
    async fn request_reroute(
        &self,
        from: Coordinate,
        target: &Waypoint,
    ) -> Result<Option<Vec<Waypoint>>, WayError>;
}
