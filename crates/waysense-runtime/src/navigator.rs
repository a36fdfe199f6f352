//! Navigation State Machine.
//!
//! [`Navigator`] owns the active [`RoutePlan`] and the latest [`GpsFix`],
//! advances the [`NavPhase`] on every accepted fix and turns what changed
//! into navigation-origin [`Alert`]s.
//!
//! ```text
//! Idle ──load──▶ Navigating ──≤ approach──▶ Approaching ──≤ arrival──▶ Arrived
//!                  │    ▲                                                │
//!     |xt| > tol   │    │ corrected            next waypoint ◀───────────┤
//!                  ▼    │                                                ▼
//!               OffRoute ──grace elapsed──▶ Rerouting            last: Idle
//! ```
//!
//! Every load (including a re-route) bumps the route *epoch*; alerts carry
//! it so the arbiter can drop announcements for a route that no longer
//! exists.  Without a fresh fix for `fix_stale_ms` the navigator raises one
//! degraded-mode alert and stays quiet until positioning returns.

use tracing::{debug, info, warn};
use waysense_perception::geodesic;
use waysense_types::{
    Alert, AlertKind, Coordinate, GpsFix, Millis, NavError, NavPhase, NavigationState,
    PhaseTransition, RoutePlan, Waypoint,
};

use crate::config::GuidanceConfig;
use crate::instruction::{self, BandTracker, TurnClassifier, TurnDirection};

/// Margin beyond the approach radius before an approach is abandoned (m).
const APPROACH_EXIT_MARGIN_M: f64 = 5.0;

/// Ask the external planner for a new route from `from` to `target`.
#[derive(Debug, Clone, PartialEq)]
pub struct RerouteRequest {
    pub from: Coordinate,
    pub target: Waypoint,
}

/// Everything one navigator step produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NavigatorOutput {
    /// Set when a new route generation began; older navigation alerts are void.
    pub flush_epoch: Option<u32>,
    pub transitions: Vec<PhaseTransition>,
    pub alerts: Vec<Alert>,
    pub reroute: Option<RerouteRequest>,
}

impl NavigatorOutput {
    pub fn is_empty(&self) -> bool {
        self.flush_epoch.is_none()
            && self.transitions.is_empty()
            && self.alerts.is_empty()
            && self.reroute.is_none()
    }
}

pub struct Navigator {
    config: GuidanceConfig,
    route: Option<RoutePlan>,
    epoch: u32,
    state: NavigationState,
    last_fix: Option<GpsFix>,
    segment_start: Option<Coordinate>,
    turns: TurnClassifier,
    bands: BandTracker,
    /// Bands are armed on the first fix after a target change.
    bands_pending: bool,
    off_route_since: Option<Millis>,
    route_started_at: Millis,
}

impl Navigator {
    pub fn new(config: GuidanceConfig) -> Self {
        Self {
            turns: TurnClassifier::new(
                config.turn_band_deg,
                config.turn_around_deg,
                config.turn_hysteresis_deg,
            ),
            bands: BandTracker::new(config.sorted_bands()),
            config,
            route: None,
            epoch: 0,
            state: NavigationState::idle(),
            last_fix: None,
            segment_start: None,
            bands_pending: true,
            off_route_since: None,
            route_started_at: 0,
        }
    }

    pub fn state(&self) -> &NavigationState {
        &self.state
    }

    pub fn route(&self) -> Option<&RoutePlan> {
        self.route.as_ref()
    }

    pub fn epoch(&self) -> u32 {
        self.epoch
    }

    pub fn last_fix(&self) -> Option<&GpsFix> {
        self.last_fix.as_ref()
    }

    // ── Commands ──

    /// Replace the active route with `plan` and start guiding to its first
    /// waypoint.
    ///
    /// # Errors
    ///
    /// [`NavError::IllegalTransition`] if the phase table forbids entering
    /// `Navigating` (it never does).
    pub fn load_route(&mut self, plan: RoutePlan, now: Millis) -> Result<NavigatorOutput, NavError> {
        self.epoch += 1;
        let mut out = NavigatorOutput {
            flush_epoch: Some(self.epoch),
            ..NavigatorOutput::default()
        };

        let target = plan.current_target().clone();
        info!(
            epoch = self.epoch,
            waypoints = plan.len(),
            target = target.spoken_name(),
            "route loaded"
        );
        self.route_started_at = now;
        self.off_route_since = None;
        self.state.degraded = false;
        self.state.target_index = Some(plan.current_index());
        self.route = Some(plan);

        let fresh_fix = self
            .last_fix
            .as_ref()
            .filter(|f| now.saturating_sub(f.captured_at) <= self.config.fix_stale_ms)
            .map(GpsFix::coordinate);
        self.segment_start = fresh_fix;

        self.transition(NavPhase::Navigating, now, &mut out)?;

        let (distance, bearing) = match fresh_fix {
            Some(pos) => (
                Some(geodesic::distance(pos, target.coordinate())),
                Some(geodesic::initial_bearing(pos, target.coordinate())),
            ),
            None => (None, None),
        };
        self.begin_target(distance);
        self.say(
            AlertKind::Progress,
            instruction::start_phrase(target.spoken_name(), distance, bearing),
            now,
            &mut out,
        );
        Ok(out)
    }

    /// Abandon the active route.  A no-op when already idle.
    ///
    /// # Errors
    ///
    /// [`NavError::IllegalTransition`] if the phase table forbids entering
    /// `Idle` from the current phase.
    pub fn cancel(&mut self, now: Millis) -> Result<NavigatorOutput, NavError> {
        let mut out = NavigatorOutput::default();
        if self.state.phase == NavPhase::Idle {
            return Ok(out);
        }
        self.epoch += 1;
        out.flush_epoch = Some(self.epoch);
        self.transition(NavPhase::Idle, now, &mut out)?;
        self.clear_route();
        self.say(AlertKind::Progress, instruction::NAVIGATION_CANCELLED, now, &mut out);
        info!(epoch = self.epoch, "navigation cancelled");
        Ok(out)
    }

    // ── Inputs ──

    /// Advance the state machine with an accepted fix.
    ///
    /// # Errors
    ///
    /// [`NavError::IllegalTransition`] if an edge outside the phase table
    /// would be taken.
    pub fn on_fix(&mut self, fix: GpsFix, now: Millis) -> Result<NavigatorOutput, NavError> {
        let mut out = NavigatorOutput::default();
        let pos = fix.coordinate();
        let heading = fix.heading_deg;
        let speed = fix.speed_mps;
        self.last_fix = Some(fix);

        let Some(target) = self.route.as_ref().map(|r| r.current_target().clone()) else {
            return Ok(out);
        };

        if self.state.degraded {
            self.state.degraded = false;
            info!("positioning restored");
            self.say(AlertKind::Progress, instruction::GPS_RESTORED, now, &mut out);
        }

        let start = *self.segment_start.get_or_insert(pos);
        let distance = geodesic::distance(pos, target.coordinate());
        let bearing = geodesic::initial_bearing(pos, target.coordinate());
        let relative = geodesic::relative_bearing(heading, bearing);
        let cross_track = geodesic::cross_track_distance(pos, start, target.coordinate());
        self.state.distance_to_target_m = Some(distance);
        self.state.relative_bearing_deg = Some(relative);
        self.state.cross_track_m = Some(cross_track);

        if self.bands_pending {
            self.bands.reset(Some(distance));
            self.bands_pending = false;
        }

        let on_route = cross_track.abs() <= self.config.off_route_tolerance_m;
        let name = target.spoken_name();

        match self.state.phase {
            NavPhase::Navigating => {
                if distance <= self.config.approach_radius_m {
                    self.transition(NavPhase::Approaching, now, &mut out)?;
                    if distance <= self.config.arrival_radius_m {
                        self.arrive(pos, now, &mut out)?;
                    } else {
                        self.say(
                            AlertKind::Progress,
                            instruction::approaching_phrase(name, distance),
                            now,
                            &mut out,
                        );
                    }
                } else if !on_route {
                    self.transition(NavPhase::OffRoute, now, &mut out)?;
                    self.off_route_since = Some(now);
                    warn!(cross_track_m = cross_track, "user is off route");
                    self.say(
                        AlertKind::OffRoute,
                        instruction::off_route_phrase(cross_track),
                        now,
                        &mut out,
                    );
                } else {
                    self.guide(name, distance, relative, speed, now, &mut out);
                }
            }
            NavPhase::Approaching => {
                if distance <= self.config.arrival_radius_m {
                    self.arrive(pos, now, &mut out)?;
                } else if distance > self.config.approach_radius_m + APPROACH_EXIT_MARGIN_M {
                    self.transition(NavPhase::Navigating, now, &mut out)?;
                    self.say(
                        AlertKind::Progress,
                        instruction::leaving_approach_phrase(name),
                        now,
                        &mut out,
                    );
                } else {
                    self.guide(name, distance, relative, speed, now, &mut out);
                }
            }
            NavPhase::OffRoute | NavPhase::Rerouting
                if on_route || distance <= self.config.approach_radius_m =>
            {
                self.transition(NavPhase::Navigating, now, &mut out)?;
                self.off_route_since = None;
                self.turns.reset();
                self.say(AlertKind::Progress, instruction::BACK_ON_ROUTE, now, &mut out);
            }
            NavPhase::OffRoute => {
                let since = *self.off_route_since.get_or_insert(now);
                if now.saturating_sub(since) > self.config.off_route_grace_ms {
                    self.transition(NavPhase::Rerouting, now, &mut out)?;
                    info!(target = name, "requesting re-route");
                    out.reroute = Some(RerouteRequest {
                        from: pos,
                        target: target.clone(),
                    });
                    self.say(AlertKind::OffRoute, instruction::REROUTING, now, &mut out);
                }
            }
            // Waiting for the planner or for the user to return.
            NavPhase::Rerouting => {}
            NavPhase::Idle | NavPhase::Arrived => {}
        }

        Ok(out)
    }

    /// Periodic supervision: detect a silent positioning feed.
    pub fn on_tick(&mut self, now: Millis) -> NavigatorOutput {
        let mut out = NavigatorOutput::default();
        if self.state.phase == NavPhase::Idle || self.state.degraded {
            return out;
        }
        let reference = self
            .last_fix
            .as_ref()
            .map_or(self.route_started_at, |f| f.captured_at.max(self.route_started_at));
        let waited_ms = now.saturating_sub(reference);
        if waited_ms > self.config.fix_stale_ms {
            self.state.degraded = true;
            warn!(error = %NavError::NoFix { waited_ms }, "entering degraded mode");
            self.say(AlertKind::Degraded, instruction::GPS_LOST, now, &mut out);
        }
        out
    }

    // ── Internals ──

    fn transition(
        &mut self,
        to: NavPhase,
        now: Millis,
        out: &mut NavigatorOutput,
    ) -> Result<(), NavError> {
        let from = self.state.phase;
        if !from.can_transition_to(to) {
            return Err(NavError::IllegalTransition { from, to });
        }
        self.state.phase = to;
        info!(%from, %to, "phase transition");
        out.transitions.push(PhaseTransition { from, to, at: now });
        Ok(())
    }

    /// The current waypoint was reached at `pos`: move to the next one or
    /// finish the route.
    fn arrive(&mut self, pos: Coordinate, now: Millis, out: &mut NavigatorOutput) -> Result<(), NavError> {
        self.transition(NavPhase::Arrived, now, out)?;
        let Some(route) = self.route.as_mut() else {
            return Ok(());
        };
        let reached = route.current_target().clone();
        match route.advance() {
            Ok(next) => {
                let next = next.clone();
                let index = route.current_index();
                self.transition(NavPhase::Navigating, now, out)?;
                self.state.target_index = Some(index);
                self.segment_start = Some(reached.coordinate());
                let distance = geodesic::distance(pos, next.coordinate());
                let bearing = geodesic::initial_bearing(pos, next.coordinate());
                self.begin_target(Some(distance));
                self.state.distance_to_target_m = Some(distance);
                info!(index, next = next.spoken_name(), "waypoint reached");
                self.say(
                    AlertKind::Progress,
                    instruction::waypoint_reached_phrase(
                        reached.spoken_name(),
                        next.spoken_name(),
                        distance,
                        bearing,
                    ),
                    now,
                    out,
                );
                Ok(())
            }
            Err(NavError::RouteExhausted) => {
                self.transition(NavPhase::Idle, now, out)?;
                self.clear_route();
                info!("destination reached");
                self.say(AlertKind::Progress, instruction::DESTINATION_REACHED, now, out);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Turn and distance-band instructions for a fix on route.
    fn guide(
        &mut self,
        name: &str,
        distance: f64,
        relative: f64,
        speed: f64,
        now: Millis,
        out: &mut NavigatorOutput,
    ) {
        if speed >= self.config.min_heading_speed_mps {
            let first = self.turns.current().is_none();
            match self.turns.update(relative) {
                Some(TurnDirection::Straight) if first => {}
                Some(direction) => {
                    self.say(AlertKind::Turn, instruction::turn_phrase(direction), now, out);
                }
                None => {}
            }
        } else {
            debug!(speed_mps = speed, "heading unreliable, turn guidance held");
        }
        if let Some(band) = self.bands.update(distance) {
            self.say(AlertKind::DistanceBand, instruction::band_phrase(name, band), now, out);
        }
    }

    fn begin_target(&mut self, distance: Option<f64>) {
        self.turns.reset();
        self.bands.reset(distance);
        self.bands_pending = distance.is_none();
        self.off_route_since = None;
    }

    fn clear_route(&mut self) {
        self.route = None;
        self.segment_start = None;
        self.off_route_since = None;
        self.state.distance_to_target_m = None;
        self.state.relative_bearing_deg = None;
        self.state.cross_track_m = None;
        self.state.target_index = None;
        self.state.degraded = false;
    }

    fn say(&mut self, kind: AlertKind, message: impl Into<String>, now: Millis, out: &mut NavigatorOutput) {
        self.state.last_instruction_at = Some(now);
        out.alerts.push(Alert::navigation(kind, message, self.epoch, now));
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use waysense_types::FixQuality;

    fn fix(pos: Coordinate, heading: f64, speed: f64, at: Millis) -> GpsFix {
        GpsFix {
            latitude: pos.latitude,
            longitude: pos.longitude,
            heading_deg: heading,
            speed_mps: speed,
            satellites: 8,
            quality: FixQuality::Fix3D,
            hdop: Some(0.9),
            altitude_m: None,
            utc_time: None,
            captured_at: at,
        }
    }

    fn origin() -> Coordinate {
        Coordinate::new(47.3769, 8.5417)
    }

    fn north(m: f64) -> Coordinate {
        geodesic::destination(origin(), 0.0, m)
    }

    fn messages(out: &NavigatorOutput) -> Vec<String> {
        out.alerts.iter().map(|a| a.message.clone()).collect()
    }

    #[test]
    fn walking_to_the_first_of_two_waypoints() {
        let wp1 = Waypoint::new(north(100.0).latitude, north(100.0).longitude).with_label("the gate");
        let wp2_pos = geodesic::destination(wp1.coordinate(), 90.0, 100.0);
        let wp2 = Waypoint::new(wp2_pos.latitude, wp2_pos.longitude).with_label("the door");
        let mut nav = Navigator::new(GuidanceConfig::default());

        let mut phases = Vec::new();
        let mut spoken = Vec::new();
        let out = nav.load_route(RoutePlan::new(vec![wp1, wp2]).unwrap(), 0).unwrap();
        phases.extend(out.transitions.iter().map(|t| (t.from, t.to)));

        // 99, 89, ... 9 metres out, then on the waypoint.
        let walk = (0..10u64).map(|i| north(10.0 * i as f64 + 1.0)).chain([north(100.0)]);
        for (i, pos) in walk.enumerate() {
            let t = i as u64 * 1_000;
            let out = nav.on_fix(fix(pos, 0.0, 1.4, t), t).unwrap();
            phases.extend(out.transitions.iter().map(|t| (t.from, t.to)));
            spoken.extend(messages(&out));
        }

        assert_eq!(
            phases,
            vec![
                (NavPhase::Idle, NavPhase::Navigating),
                (NavPhase::Navigating, NavPhase::Approaching),
                (NavPhase::Approaching, NavPhase::Arrived),
                (NavPhase::Arrived, NavPhase::Navigating),
            ]
        );
        assert_eq!(nav.route().unwrap().current_index(), 1);
        assert_eq!(nav.state().target_index, Some(1));
        assert!(spoken.contains(&"50 meters to the gate".to_string()));
        assert!(spoken.contains(&"20 meters to the gate".to_string()));
        assert!(spoken.contains(&"Approaching the gate, 9 meters".to_string()));
        assert!(spoken.contains(&"Reached the gate. Next, the door, 100 meters to the east".to_string()));
        assert!(
            !spoken.iter().any(|m| m.starts_with("Continue straight")),
            "walking straight at the target needs no turn instruction"
        );
    }

    #[test]
    fn last_waypoint_returns_to_idle() {
        let target = north(30.0);
        let mut nav = Navigator::new(GuidanceConfig::default());
        nav.load_route(RoutePlan::new(vec![Waypoint::new(target.latitude, target.longitude)]).unwrap(), 0)
            .unwrap();
        let out = nav.on_fix(fix(north(27.0), 0.0, 1.0, 500), 500).unwrap();
        let to: Vec<_> = out.transitions.iter().map(|t| t.to).collect();
        assert_eq!(to, vec![NavPhase::Approaching, NavPhase::Arrived, NavPhase::Idle]);
        assert_eq!(messages(&out), vec![instruction::DESTINATION_REACHED.to_string()]);
        assert!(nav.route().is_none());
        assert_eq!(nav.state().phase, NavPhase::Idle);
    }

    #[test]
    fn sustained_deviation_requests_exactly_one_reroute() {
        let target = north(300.0);
        let mut nav = Navigator::new(GuidanceConfig::default());
        nav.load_route(RoutePlan::new(vec![Waypoint::new(target.latitude, target.longitude)]).unwrap(), 0)
            .unwrap();
        nav.on_fix(fix(origin(), 0.0, 1.4, 0), 0).unwrap();

        let mut reroutes = 0;
        let mut rerouting_entries = 0;
        let mut off_route_entries = 0;
        for i in 1..=20u64 {
            let pos = geodesic::destination(north(10.0 * i as f64), 90.0, 40.0);
            let out = nav.on_fix(fix(pos, 0.0, 1.4, i * 1_000), i * 1_000).unwrap();
            reroutes += usize::from(out.reroute.is_some());
            rerouting_entries += out.transitions.iter().filter(|t| t.to == NavPhase::Rerouting).count();
            off_route_entries += out.transitions.iter().filter(|t| t.to == NavPhase::OffRoute).count();
        }
        assert_eq!(off_route_entries, 1);
        assert_eq!(rerouting_entries, 1);
        assert_eq!(reroutes, 1);
        assert_eq!(nav.state().phase, NavPhase::Rerouting);
    }

    #[test]
    fn deviation_corrected_within_grace_resumes_navigation() {
        let target = north(300.0);
        let mut nav = Navigator::new(GuidanceConfig::default());
        nav.load_route(RoutePlan::new(vec![Waypoint::new(target.latitude, target.longitude)]).unwrap(), 0)
            .unwrap();
        nav.on_fix(fix(origin(), 0.0, 1.4, 0), 0).unwrap();

        let off = geodesic::destination(north(20.0), 270.0, 30.0);
        let out = nav.on_fix(fix(off, 0.0, 1.4, 1_000), 1_000).unwrap();
        assert_eq!(out.transitions[0].to, NavPhase::OffRoute);
        assert_eq!(out.alerts[0].kind, AlertKind::OffRoute);
        assert!(out.alerts[0].message.ends_with("to your right"));

        let out = nav.on_fix(fix(north(30.0), 0.0, 1.4, 4_000), 4_000).unwrap();
        assert_eq!(out.transitions[0].to, NavPhase::Navigating);
        assert_eq!(messages(&out), vec![instruction::BACK_ON_ROUTE.to_string()]);
        assert!(out.reroute.is_none());
    }

    #[test]
    fn stale_fix_raises_one_degraded_alert_until_restored() {
        let target = north(300.0);
        let mut nav = Navigator::new(GuidanceConfig::default());
        nav.on_fix(fix(origin(), 0.0, 0.0, 0), 0).unwrap();
        nav.load_route(RoutePlan::new(vec![Waypoint::new(target.latitude, target.longitude)]).unwrap(), 0)
            .unwrap();

        assert!(nav.on_tick(3_000).is_empty());
        let out = nav.on_tick(6_000);
        assert_eq!(out.alerts.len(), 1);
        assert_eq!(out.alerts[0].kind, AlertKind::Degraded);
        assert_eq!(out.alerts[0].message, instruction::GPS_LOST);
        assert!(out.transitions.is_empty(), "phase is unchanged");
        assert!(nav.state().degraded);
        assert!(nav.on_tick(9_000).is_empty());

        let out = nav.on_fix(fix(north(1.0), 0.0, 0.0, 10_000), 10_000).unwrap();
        assert_eq!(messages(&out), vec![instruction::GPS_RESTORED.to_string()]);
        assert!(!nav.state().degraded);
    }

    #[test]
    fn loading_a_route_starts_a_new_epoch() {
        let target = north(100.0);
        let wp = Waypoint::new(target.latitude, target.longitude).with_label("the bakery");
        let mut nav = Navigator::new(GuidanceConfig::default());
        nav.on_fix(fix(origin(), 0.0, 0.0, 0), 0).unwrap();

        let out = nav.load_route(RoutePlan::new(vec![wp.clone()]).unwrap(), 100).unwrap();
        assert_eq!(out.flush_epoch, Some(1));
        assert_eq!(
            messages(&out),
            vec!["Starting navigation to the bakery, 100 meters to the north".to_string()]
        );
        assert_eq!(out.alerts[0].route_epoch, Some(1));

        let out = nav.load_route(RoutePlan::new(vec![wp]).unwrap(), 200).unwrap();
        assert_eq!(out.flush_epoch, Some(2));
        assert_eq!(out.transitions[0].from, NavPhase::Navigating);
        assert_eq!(out.transitions[0].to, NavPhase::Navigating);
    }

    #[test]
    fn cancel_returns_to_idle_once() {
        let target = north(100.0);
        let mut nav = Navigator::new(GuidanceConfig::default());
        nav.load_route(RoutePlan::new(vec![Waypoint::new(target.latitude, target.longitude)]).unwrap(), 0)
            .unwrap();
        let out = nav.cancel(10).unwrap();
        assert_eq!(out.flush_epoch, Some(2));
        assert_eq!(out.transitions[0].to, NavPhase::Idle);
        assert_eq!(messages(&out), vec![instruction::NAVIGATION_CANCELLED.to_string()]);
        assert!(nav.cancel(20).unwrap().is_empty());
    }

    #[test]
    fn turn_instructions_only_on_change() {
        let target = north(200.0);
        let mut nav = Navigator::new(GuidanceConfig::default());
        nav.load_route(RoutePlan::new(vec![Waypoint::new(target.latitude, target.longitude)]).unwrap(), 0)
            .unwrap();

        let out = nav.on_fix(fix(origin(), 90.0, 1.4, 0), 0).unwrap();
        assert_eq!(messages(&out), vec!["Turn left".to_string()]);
        assert_eq!(out.alerts[0].kind, AlertKind::Turn);

        let out = nav.on_fix(fix(north(1.0), 85.0, 1.4, 1_000), 1_000).unwrap();
        assert!(out.alerts.is_empty());

        let out = nav.on_fix(fix(north(2.0), 2.0, 1.4, 2_000), 2_000).unwrap();
        assert_eq!(messages(&out), vec!["Continue straight".to_string()]);
    }

    #[test]
    fn standing_still_holds_turn_guidance() {
        let target = north(200.0);
        let mut nav = Navigator::new(GuidanceConfig::default());
        nav.load_route(RoutePlan::new(vec![Waypoint::new(target.latitude, target.longitude)]).unwrap(), 0)
            .unwrap();
        let out = nav.on_fix(fix(origin(), 180.0, 0.1, 0), 0).unwrap();
        assert!(out.alerts.is_empty());
    }

    #[test]
    fn fixes_without_a_route_only_update_the_slot() {
        let mut nav = Navigator::new(GuidanceConfig::default());
        let out = nav.on_fix(fix(origin(), 0.0, 1.0, 0), 0).unwrap();
        assert!(out.is_empty());
        assert!(nav.last_fix().is_some());
        assert!(nav.on_tick(60_000).is_empty());
    }
}
