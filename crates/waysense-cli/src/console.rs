//! Terminal stand-ins for the speech engine and the route planner.
//!
//! [`ConsoleSpeech`] prints every voice request and holds it for the time a
//! synthesizer would need to say it, so arbitration behaves the same way it
//! does on the device.  [`ConsolePlanner`] has no map data and leaves
//! course correction to the user.

use async_trait::async_trait;
use colored::Colorize;
use std::time::Duration;
use tokio::sync::watch;
use waysense_middleware::{RoutePlanner, SpeechOutcome, SpeechOutput};
use waysense_types::{AlertKind, Coordinate, VoiceRequest, WayError, Waypoint};

// ────────────────────────────────────────────────────────────────────────────
// Speech
// ────────────────────────────────────────────────────────────────────────────

pub struct ConsoleSpeech {
    words_per_minute: u32,
    lead_in: Duration,
    /// Id of the utterance currently "playing".
    current: watch::Sender<u64>,
}

impl ConsoleSpeech {
    pub fn new(words_per_minute: u32, lead_in_ms: u64) -> Self {
        let (current, _) = watch::channel(0);
        Self {
            words_per_minute: words_per_minute.max(1),
            lead_in: Duration::from_millis(lead_in_ms),
            current,
        }
    }

    fn hold_for(&self, text: &str) -> Duration {
        let words = text.split_whitespace().count().max(1) as u64;
        self.lead_in + Duration::from_millis(words * 60_000 / u64::from(self.words_per_minute))
    }
}

fn render(request: &VoiceRequest) -> String {
    let text = if request.priority >= AlertKind::ObstacleDanger.priority() {
        request.text.red().bold()
    } else if request.priority >= AlertKind::ObstacleCaution.priority() {
        request.text.yellow()
    } else {
        request.text.normal()
    };
    let cut = if request.interrupt { " (interrupts)".dimmed().to_string() } else { String::new() };
    format!("  {} {}{}", "🔊".bold(), text, cut)
}

#[async_trait]
impl SpeechOutput for ConsoleSpeech {
    async fn speak(&self, request: VoiceRequest) -> Result<SpeechOutcome, WayError> {
        let mut playing = self.current.subscribe();
        self.current.send_replace(request.id);
        let _ = playing.borrow_and_update();
        println!("{}", render(&request));

        let cut = async {
            while playing.changed().await.is_ok() {
                if *playing.borrow_and_update() != request.id {
                    return;
                }
            }
            std::future::pending::<()>().await
        };

        tokio::select! {
            _ = tokio::time::sleep(self.hold_for(&request.text)) => Ok(SpeechOutcome::Completed),
            _ = cut => Ok(SpeechOutcome::Interrupted),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Planner
// ────────────────────────────────────────────────────────────────────────────

pub struct ConsolePlanner;

#[async_trait]
impl RoutePlanner for ConsolePlanner {
    async fn request_reroute(
        &self,
        from: Coordinate,
        target: &Waypoint,
    ) -> Result<Option<Vec<Waypoint>>, WayError> {
        println!(
            "  {} from {:.5}, {:.5} to {} (no planner attached, keep heading for the target)",
            "↻ re-route requested".yellow(),
            from.latitude,
            from.longitude,
            target.spoken_name().bold()
        );
        Ok(None)
    }
}
