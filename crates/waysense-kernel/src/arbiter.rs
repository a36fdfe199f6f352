//! [`AlertScheduler`] – arbitration of the single voice channel.
//!
//! The scheduler is the only component that creates [`VoiceRequest`]s.  It
//! keeps at most one request *in flight* and holds everything else in an
//! [`AlertQueue`].
//!
//! | Situation | Action |
//! |---|---|
//! | idle | dequeue the highest alert, emit it, open an occupancy window |
//! | in flight, new alert ranks higher | emit the new alert at once with `interrupt = true`; the cut request is dropped |
//! | in flight, new alert ranks equal or lower | queue it |
//! | occupancy window elapsed or completion reported | dispatch the next alert |
//!
//! The occupancy window is an estimate of how long the utterance takes to
//! speak: a fixed lead-in plus one word's worth of time per word at the
//! configured speech rate.  A completion report from the speech collaborator
//! ends the window early.
//!
//! Navigation alerts are tagged with a route generation ("epoch").  After
//! [`AlertScheduler::flush_navigation`] only alerts of the newest generation
//! are accepted.

use tracing::{debug, info};
use waysense_types::{Alert, AlertOrigin, Millis, SchedulerInput, Sector, VoiceRequest};

use crate::alert_queue::AlertQueue;

/// Tuning for [`AlertScheduler`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SchedulerConfig {
    /// Maximum pending alerts.
    pub capacity: usize,
    /// Speech rate used for the occupancy estimate.
    pub words_per_minute: u32,
    /// Fixed start-up latency added to every utterance (ms).
    pub lead_in_ms: Millis,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            capacity: 16,
            words_per_minute: 200,
            lead_in_ms: 300,
        }
    }
}

/// The request currently occupying the voice channel.
#[derive(Debug, Clone, PartialEq)]
pub struct InFlight {
    pub request: VoiceRequest,
    pub started_at: Millis,
    pub busy_until: Millis,
}

/// Single-consumer priority arbiter for spoken output.
pub struct AlertScheduler {
    config: SchedulerConfig,
    queue: AlertQueue,
    in_flight: Option<InFlight>,
    next_id: u64,
    navigation_epoch: u32,
}

impl AlertScheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            queue: AlertQueue::new(config.capacity),
            config,
            in_flight: None,
            next_id: 1,
            navigation_epoch: 0,
        }
    }

    pub fn in_flight(&self) -> Option<&InFlight> {
        self.in_flight.as_ref()
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Pending alerts in dequeue order.
    pub fn pending_alerts(&self) -> Vec<Alert> {
        self.queue.snapshot()
    }

    /// When the current occupancy window ends, if anything is in flight.
    pub fn next_deadline(&self) -> Option<Millis> {
        self.in_flight.as_ref().map(|f| f.busy_until)
    }

    /// Estimated speaking time of `text` in ms.
    pub fn estimate_duration_ms(&self, text: &str) -> Millis {
        let words = text.split_whitespace().count().max(1) as u64;
        let wpm = u64::from(self.config.words_per_minute.max(1));
        self.config.lead_in_ms + words * 60_000 / wpm
    }

    /// Route every [`SchedulerInput`] variant to its handler.
    pub fn handle(&mut self, input: SchedulerInput, now: Millis) -> Vec<VoiceRequest> {
        match input {
            SchedulerInput::Alert(alert) => self.submit(alert, now),
            SchedulerInput::RetractSector(sector) => {
                self.retract_sector(sector);
                self.poll(now)
            }
            SchedulerInput::FlushNavigation { epoch } => {
                self.flush_navigation(epoch);
                self.poll(now)
            }
            SchedulerInput::SpeechFinished {
                request_id,
                interrupted,
            } => self.speech_finished(request_id, interrupted, now),
        }
    }

    /// Offer a new alert.  Returns the requests to hand to the speech
    /// collaborator, in order.
    pub fn submit(&mut self, alert: Alert, now: Millis) -> Vec<VoiceRequest> {
        if alert.origin == AlertOrigin::Navigation
            && let Some(epoch) = alert.route_epoch
        {
            if epoch < self.navigation_epoch {
                debug!(message = %alert.message, "dropping alert from a replaced route");
                return self.poll(now);
            }
            // A newer generation implies its flush, even if that never arrived.
            if epoch > self.navigation_epoch {
                self.flush_navigation(epoch);
            }
        }

        self.expire(now);

        // The new request carries `interrupt`; the cut one is not resumed.
        if let Some(current) = &self.in_flight
            && alert.priority > current.request.priority
        {
            info!(
                preempted = current.request.id,
                priority = alert.priority,
                "preempting utterance in flight"
            );
            self.queue.supersede(&alert);
            let request = self.start(alert, true, now);
            return vec![request];
        }

        let outcome = self.queue.push(alert);
        if !outcome.superseded.is_empty() {
            debug!(count = outcome.superseded.len(), "superseded pending alerts");
        }
        self.poll(now)
    }

    /// Close an elapsed occupancy window and dispatch the next alert.
    pub fn poll(&mut self, now: Millis) -> Vec<VoiceRequest> {
        self.expire(now);
        if self.in_flight.is_some() {
            return Vec::new();
        }
        match self.queue.pop() {
            Some(alert) => vec![self.start(alert, false, now)],
            None => Vec::new(),
        }
    }

    /// Completion report from the speech collaborator.  Reports for requests
    /// other than the one in flight are stale and ignored.
    pub fn speech_finished(
        &mut self,
        request_id: u64,
        interrupted: bool,
        now: Millis,
    ) -> Vec<VoiceRequest> {
        match &self.in_flight {
            Some(current) if current.request.id == request_id => {
                debug!(request_id, interrupted, "speech finished");
                self.in_flight = None;
            }
            _ => debug!(request_id, "ignoring stale completion report"),
        }
        self.poll(now)
    }

    /// Start route generation `epoch`: pending navigation alerts of older
    /// generations are dropped, obstacle alerts are kept.
    pub fn flush_navigation(&mut self, epoch: u32) -> usize {
        self.navigation_epoch = self.navigation_epoch.max(epoch);
        let flushed = self.queue.flush_navigation_before(self.navigation_epoch);
        if flushed > 0 {
            info!(flushed, epoch, "flushed navigation alerts for new route");
        }
        flushed
    }

    /// Drop pending obstacle alerts for a sector that has cleared.
    pub fn retract_sector(&mut self, sector: Sector) -> usize {
        let retracted = self.queue.retract_sector(sector);
        if retracted > 0 {
            debug!(?sector, retracted, "retracted obstacle alerts");
        }
        retracted
    }

    fn expire(&mut self, now: Millis) {
        if self.in_flight.as_ref().is_some_and(|f| now >= f.busy_until) {
            self.in_flight = None;
        }
    }

    fn start(&mut self, alert: Alert, interrupt: bool, now: Millis) -> VoiceRequest {
        let request = VoiceRequest {
            id: self.next_id,
            text: alert.message,
            priority: alert.priority,
            interrupt,
            origin: alert.origin,
        };
        self.next_id += 1;
        let busy_until = now + self.estimate_duration_ms(&request.text);
        info!(
            id = request.id,
            priority = request.priority,
            interrupt,
            text = %request.text,
            "voice request"
        );
        self.in_flight = Some(InFlight {
            request: request.clone(),
            started_at: now,
            busy_until,
        });
        request
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use waysense_types::AlertKind;

    fn scheduler() -> AlertScheduler {
        AlertScheduler::new(SchedulerConfig::default())
    }

    fn nav(kind: AlertKind, msg: &str, epoch: u32) -> Alert {
        Alert::navigation(kind, msg, epoch, 0)
    }

    fn danger(sector: Sector) -> Alert {
        Alert::obstacle(AlertKind::ObstacleDanger, Some(sector), "Stop, obstacle very close ahead", 0, 3_000)
    }

    #[test]
    fn idle_scheduler_emits_immediately() {
        let mut s = scheduler();
        let out = s.submit(nav(AlertKind::Turn, "Turn left", 0), 0);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].text, "Turn left");
        assert!(!out[0].interrupt);
        assert_eq!(s.in_flight().map(|f| f.request.id), Some(out[0].id));
    }

    #[test]
    fn duration_estimate_uses_speech_rate() {
        let s = scheduler();
        // 4 words at 200 wpm = 1 200 ms, plus lead-in.
        assert_eq!(s.estimate_duration_ms("Turn left in fifty"), 300 + 1_200);
        assert_eq!(s.estimate_duration_ms(""), 300 + 300);
    }

    #[test]
    fn equal_priority_waits_for_window() {
        let mut s = scheduler();
        let first = s.submit(nav(AlertKind::Progress, "Approaching the gate", 0), 0);
        let busy_until = s.next_deadline().unwrap();
        assert!(s.submit(nav(AlertKind::Progress, "Arrived at the gate", 0), 10).is_empty());
        assert!(s.poll(busy_until - 1).is_empty());

        let next = s.poll(busy_until);
        assert_eq!(next.len(), 1);
        assert_eq!(next[0].text, "Arrived at the gate");
        assert!(next[0].id > first[0].id);
    }

    #[test]
    fn danger_preempts_lower_priority_in_flight() {
        let mut s = scheduler();
        let low = s.submit(nav(AlertKind::DistanceBand, "Fifty meters to the gate", 0), 0);
        assert!(!low[0].interrupt);

        let high = s.submit(danger(Sector::Center), 100);
        assert_eq!(high.len(), 1);
        assert!(high[0].interrupt);
        assert_eq!(high[0].priority, AlertKind::ObstacleDanger.priority());

        // Exactly one request in flight, and it is the danger alert.
        assert_eq!(s.in_flight().map(|f| f.request.id), Some(high[0].id));
        // The cut utterance is not replayed.
        assert_eq!(s.pending(), 0);
        let emitted: Vec<u64> = low.iter().chain(high.iter()).map(|r| r.id).collect();
        assert!(emitted[0] < emitted[1]);
    }

    #[test]
    fn stale_completion_of_preempted_request_is_ignored() {
        let mut s = scheduler();
        let low = s.submit(nav(AlertKind::Turn, "Turn right", 0), 0);
        let high = s.submit(danger(Sector::Left), 10);
        s.submit(nav(AlertKind::Turn, "Turn left", 0), 20);

        // The preempted request reports truncation; danger keeps the channel.
        assert!(s.speech_finished(low[0].id, true, 30).is_empty());
        assert_eq!(s.in_flight().map(|f| f.request.id), Some(high[0].id));

        let next = s.speech_finished(high[0].id, false, 40);
        assert_eq!(next.len(), 1);
        assert_eq!(next[0].text, "Turn left");
    }

    #[test]
    fn queued_alerts_dispatch_by_priority() {
        let mut s = scheduler();
        let first = s.submit(danger(Sector::Center), 0);
        s.submit(nav(AlertKind::DistanceBand, "Twenty meters", 0), 1);
        s.submit(nav(AlertKind::OffRoute, "You are off route", 0), 2);
        s.submit(Alert::obstacle(AlertKind::ObstacleCaution, Some(Sector::Right), "Obstacle on your right at 120 centimeters", 3, 3_000), 3);

        let mut spoken = Vec::new();
        let mut id = first[0].id;
        for t in 10..14 {
            let out = s.speech_finished(id, false, t);
            if let Some(r) = out.first() {
                id = r.id;
                spoken.push(r.text.clone());
            }
        }
        assert_eq!(
            spoken,
            vec![
                "You are off route",
                "Obstacle on your right at 120 centimeters",
                "Twenty meters",
            ]
        );
    }

    #[test]
    fn new_route_flushes_navigation_but_not_obstacles() {
        let mut s = scheduler();
        s.submit(danger(Sector::Center), 0);
        s.submit(nav(AlertKind::Turn, "Turn left", 1), 1);
        s.submit(nav(AlertKind::Progress, "Approaching", 1), 2);
        s.submit(Alert::obstacle(AlertKind::ObstacleCaution, Some(Sector::Left), "Obstacle on your left at 90 centimeters", 3, 3_000), 3);

        assert_eq!(s.flush_navigation(2), 2);
        let pending = s.pending_alerts();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].origin, AlertOrigin::Obstacle);

        // Late alerts from the old route are dropped on arrival.
        s.submit(nav(AlertKind::Turn, "Turn right", 1), 4);
        assert_eq!(s.pending(), 1);
        s.submit(nav(AlertKind::Progress, "Heading north", 2), 5);
        assert_eq!(s.pending(), 2);
    }

    #[test]
    fn newer_route_alert_flushes_without_explicit_flush() {
        let mut s = scheduler();
        s.submit(danger(Sector::Center), 0);
        s.submit(nav(AlertKind::Turn, "Turn left", 1), 1);
        s.submit(nav(AlertKind::DistanceBand, "Fifty meters", 1), 2);
        assert_eq!(s.pending(), 2);

        // The flush for route 2 was lost; its first alert still retires route 1.
        s.submit(nav(AlertKind::Progress, "Heading north", 2), 3);
        let pending = s.pending_alerts();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].route_epoch, Some(2));

        // Route 1 stays retired.
        s.submit(nav(AlertKind::Turn, "Turn right", 1), 4);
        assert_eq!(s.pending(), 1);
    }

    #[test]
    fn retracted_sector_is_not_spoken() {
        let mut s = scheduler();
        s.submit(nav(AlertKind::OffRoute, "You are off route", 0), 0);
        s.submit(Alert::obstacle(AlertKind::ObstacleCaution, Some(Sector::Left), "Obstacle on your left at 90 centimeters", 1, 3_000), 1);
        let out = s.handle(SchedulerInput::RetractSector(Sector::Left), 2);
        assert!(out.is_empty());
        assert_eq!(s.pending(), 0);
    }

    #[test]
    fn handle_routes_completion() {
        let mut s = scheduler();
        let first = s.submit(nav(AlertKind::Progress, "Approaching the gate", 0), 0);
        s.submit(nav(AlertKind::Turn, "Turn left", 0), 1);
        let out = s.handle(
            SchedulerInput::SpeechFinished {
                request_id: first[0].id,
                interrupted: false,
            },
            2,
        );
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].text, "Turn left");
        assert!(!out[0].interrupt);
    }
}
