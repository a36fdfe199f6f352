//! Obstacle Processor.
//!
//! Splits each [`DepthFrame`] into three vertical column bands (left, centre,
//! right), finds the nearest valid return in each, and classifies it:
//!
//! | Nearest distance `d` | Urgency |
//! |---|---|
//! | no valid cell, or `d > caution_m` | `Clear` |
//! | `danger_m < d <= caution_m` | `Caution` |
//! | `d <= danger_m` | `Danger` |
//!
//! A cell is valid when it is finite, not [`INVALID_DEPTH`], within the
//! sensor's maximum range, and (if the frame carries a confidence buffer)
//! at or above the minimum confidence.
//!
//! Alerts are debounced per `(sector, urgency)`: the same tier for the same
//! sector is not re-announced within the cooldown.  An escalation into
//! `Danger` always fires.  A sector falling back to `Clear` is reported in
//! [`SectorScan::cleared`] so that pending alerts for it can be retracted.
//!
//! An invalid frame is skipped.  The previous classifications are held for
//! that one cycle; a second consecutive invalid frame resets every sector to
//! `Clear`.

use tracing::{debug, warn};
use waysense_types::{
    Alert, AlertKind, DepthFrame, FrameError, INVALID_DEPTH, Millis, ObstacleReading, Sector,
    Urgency,
};

/// Distance thresholds and filtering parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ObstacleThresholds {
    /// At or below this distance a sector is `Caution` (m).
    pub caution_m: f32,
    /// At or below this distance a sector is `Danger` (m).
    pub danger_m: f32,
    /// Repeat-suppression window per sector and tier (ms).
    pub cooldown_ms: Millis,
    /// Returns beyond this range are ignored (m).
    pub max_range_m: f32,
    /// Cells with lower confidence are ignored.
    pub min_confidence: u8,
}

impl Default for ObstacleThresholds {
    fn default() -> Self {
        Self {
            caution_m: 1.5,
            danger_m: 0.45,
            cooldown_ms: 3_000,
            max_range_m: 4.0,
            min_confidence: 30,
        }
    }
}

/// Result of processing one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct SectorScan {
    /// One reading per sector, in [`Sector::ALL`] order.
    pub readings: [ObstacleReading; 3],
    /// Alerts that survived debouncing.
    pub alerts: Vec<Alert>,
    /// Sectors that returned to `Clear` since the previous frame.
    pub cleared: Vec<Sector>,
}

/// Per-frame sector classifier with debouncing.
#[derive(Debug)]
pub struct ObstacleProcessor {
    thresholds: ObstacleThresholds,
    /// Urgency of each sector after the last valid frame.
    state: [Urgency; 3],
    /// Last emission time per sector for `[Caution, Danger]`.
    last_emitted: [[Option<Millis>; 2]; 3],
    consecutive_invalid: u32,
    pending_cleared: Vec<Sector>,
}

impl ObstacleProcessor {
    pub fn new(thresholds: ObstacleThresholds) -> Self {
        Self {
            thresholds,
            state: [Urgency::Clear; 3],
            last_emitted: [[None; 2]; 3],
            consecutive_invalid: 0,
            pending_cleared: Vec::new(),
        }
    }

    pub fn thresholds(&self) -> &ObstacleThresholds {
        &self.thresholds
    }

    /// Current urgency of `sector`.
    pub fn urgency(&self, sector: Sector) -> Urgency {
        self.state[sector.index()]
    }

    /// Classify `frame` at `now`.
    ///
    /// # Errors
    ///
    /// [`FrameError::InvalidFrame`] when the frame's dimensions and buffers
    /// disagree.  Sectors reset by the second consecutive invalid frame are
    /// queued for [`take_cleared`](Self::take_cleared).
    pub fn process(&mut self, frame: &DepthFrame, now: Millis) -> Result<SectorScan, FrameError> {
        if let Err(e) = validate(frame) {
            self.on_invalid_frame();
            return Err(e);
        }
        self.consecutive_invalid = 0;

        let mut cleared = std::mem::take(&mut self.pending_cleared);
        let mut alerts = Vec::new();
        let readings = Sector::ALL.map(|sector| {
            let nearest_m = self.nearest_in_sector(frame, sector);
            ObstacleReading {
                sector,
                nearest_m,
                urgency: self.classify(nearest_m),
                frame_at: frame.captured_at,
            }
        });

        for reading in &readings {
            let i = reading.sector.index();
            let previous = self.state[i];
            self.state[i] = reading.urgency;

            match reading.urgency {
                Urgency::Clear => {
                    if previous != Urgency::Clear && !cleared.contains(&reading.sector) {
                        cleared.push(reading.sector);
                    }
                }
                Urgency::Caution | Urgency::Danger => {
                    let escalation = reading.urgency == Urgency::Danger && previous < Urgency::Danger;
                    if escalation || !self.in_cooldown(reading.sector, reading.urgency, now) {
                        self.mark_emitted(reading.sector, reading.urgency, now);
                        alerts.push(self.build_alert(reading, now));
                    } else {
                        debug!(
                            sector = ?reading.sector,
                            urgency = ?reading.urgency,
                            "obstacle alert suppressed by cooldown"
                        );
                    }
                }
            }
        }

        Ok(SectorScan {
            readings,
            alerts,
            cleared,
        })
    }

    /// Drain sectors reset to `Clear` while frames were invalid.
    pub fn take_cleared(&mut self) -> Vec<Sector> {
        std::mem::take(&mut self.pending_cleared)
    }

    /// Reset every sector to `Clear`, e.g. after the depth feed stalls.
    /// Returns the sectors that were not already clear.
    pub fn reset(&mut self) -> Vec<Sector> {
        let mut cleared = Vec::new();
        for sector in Sector::ALL {
            if self.state[sector.index()] != Urgency::Clear {
                self.state[sector.index()] = Urgency::Clear;
                cleared.push(sector);
            }
        }
        cleared
    }

    fn on_invalid_frame(&mut self) {
        self.consecutive_invalid += 1;
        if self.consecutive_invalid == 2 {
            warn!("second consecutive invalid depth frame, releasing held classifications");
            for sector in self.reset() {
                if !self.pending_cleared.contains(&sector) {
                    self.pending_cleared.push(sector);
                }
            }
        }
    }

    fn nearest_in_sector(&self, frame: &DepthFrame, sector: Sector) -> Option<f32> {
        let i = sector.index();
        let cols = (i * frame.width / 3)..((i + 1) * frame.width / 3);
        let mut nearest: Option<f32> = None;
        for row in 0..frame.height {
            for col in cols.clone() {
                let idx = row * frame.width + col;
                let d = frame.depth_m[idx];
                if !self.is_valid(frame, idx, d) {
                    continue;
                }
                nearest = Some(nearest.map_or(d, |n| n.min(d)));
            }
        }
        nearest
    }

    fn is_valid(&self, frame: &DepthFrame, idx: usize, d: f32) -> bool {
        if !d.is_finite() || d <= INVALID_DEPTH || d > self.thresholds.max_range_m {
            return false;
        }
        match &frame.confidence {
            Some(conf) => conf[idx] >= self.thresholds.min_confidence,
            None => true,
        }
    }

    fn classify(&self, nearest_m: Option<f32>) -> Urgency {
        match nearest_m {
            Some(d) if d <= self.thresholds.danger_m => Urgency::Danger,
            Some(d) if d <= self.thresholds.caution_m => Urgency::Caution,
            _ => Urgency::Clear,
        }
    }

    fn in_cooldown(&self, sector: Sector, urgency: Urgency, now: Millis) -> bool {
        tier_slot(urgency)
            .and_then(|t| self.last_emitted[sector.index()][t])
            .is_some_and(|at| now.saturating_sub(at) < self.thresholds.cooldown_ms)
    }

    fn mark_emitted(&mut self, sector: Sector, urgency: Urgency, now: Millis) {
        if let Some(t) = tier_slot(urgency) {
            self.last_emitted[sector.index()][t] = Some(now);
        }
    }

    fn build_alert(&self, reading: &ObstacleReading, now: Millis) -> Alert {
        let (kind, message) = match reading.urgency {
            Urgency::Danger => (
                AlertKind::ObstacleDanger,
                format!("Stop, obstacle very close {}", reading.sector.spoken()),
            ),
            _ => {
                let cm = reading.nearest_m.map_or(0, |d| (d * 100.0).round() as u32);
                (
                    AlertKind::ObstacleCaution,
                    format!("Obstacle {} at {cm} centimeters", reading.sector.spoken()),
                )
            }
        };
        Alert::obstacle(kind, Some(reading.sector), message, now, self.thresholds.cooldown_ms)
    }
}

fn tier_slot(urgency: Urgency) -> Option<usize> {
    match urgency {
        Urgency::Clear => None,
        Urgency::Caution => Some(0),
        Urgency::Danger => Some(1),
    }
}

fn validate(frame: &DepthFrame) -> Result<(), FrameError> {
    if frame.width < 3 || frame.height == 0 {
        return Err(FrameError::InvalidFrame(format!(
            "{}x{} is too small to split into sectors",
            frame.width, frame.height
        )));
    }
    let cells = frame.width.checked_mul(frame.height).ok_or_else(|| {
        FrameError::InvalidFrame(format!("{}x{} overflows", frame.width, frame.height))
    })?;
    if frame.depth_m.len() != cells {
        return Err(FrameError::InvalidFrame(format!(
            "expected {cells} depth cells, got {}",
            frame.depth_m.len()
        )));
    }
    if let Some(conf) = &frame.confidence
        && conf.len() != cells
    {
        return Err(FrameError::InvalidFrame(format!(
            "expected {cells} confidence cells, got {}",
            conf.len()
        )));
    }
    Ok(())
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    /// 6x2 frame with per-sector distances (two columns per sector).
    fn frame(left: f32, center: f32, right: f32, at: Millis) -> DepthFrame {
        let row = [left, left, center, center, right, right];
        let depth = row.iter().chain(row.iter()).copied().collect();
        DepthFrame::new(6, 2, depth, at)
    }

    fn processor() -> ObstacleProcessor {
        ObstacleProcessor::new(ObstacleThresholds::default())
    }

    #[test]
    fn classifies_each_sector() {
        let mut p = processor();
        let scan = p.process(&frame(0.3, 1.0, 3.0, 0), 0).unwrap();
        let urgencies: Vec<_> = scan.readings.iter().map(|r| r.urgency).collect();
        assert_eq!(urgencies, vec![Urgency::Danger, Urgency::Caution, Urgency::Clear]);
        assert_eq!(scan.readings[0].nearest_m, Some(0.3));
        assert_eq!(scan.alerts.len(), 2);
        assert_eq!(scan.alerts[0].kind, AlertKind::ObstacleDanger);
        assert_eq!(scan.alerts[0].message, "Stop, obstacle very close on your left");
        assert_eq!(scan.alerts[1].message, "Obstacle ahead at 100 centimeters");
    }

    #[test]
    fn boundaries_are_inclusive() {
        let mut p = processor();
        let scan = p.process(&frame(0.45, 1.5, 1.51, 0), 0).unwrap();
        assert_eq!(scan.readings[0].urgency, Urgency::Danger);
        assert_eq!(scan.readings[1].urgency, Urgency::Caution);
        assert_eq!(scan.readings[2].urgency, Urgency::Clear);
    }

    #[test]
    fn invalid_cells_are_ignored() {
        let mut p = processor();
        let mut f = frame(INVALID_DEPTH, f32::NAN, 9.0, 0);
        f.depth_m[2] = 1.0;
        let scan = p.process(&f, 0).unwrap();
        assert_eq!(scan.readings[0].nearest_m, None);
        assert_eq!(scan.readings[0].urgency, Urgency::Clear);
        assert_eq!(scan.readings[1].nearest_m, Some(1.0));
        // Beyond max range counts as no return.
        assert_eq!(scan.readings[2].nearest_m, None);
    }

    #[test]
    fn low_confidence_cells_are_ignored() {
        let mut p = processor();
        let f = frame(0.3, 0.3, 0.3, 0).with_confidence(vec![10; 12]);
        let scan = p.process(&f, 0).unwrap();
        assert!(scan.readings.iter().all(|r| r.urgency == Urgency::Clear));
        assert!(scan.alerts.is_empty());
    }

    #[test]
    fn repeated_danger_within_cooldown_is_suppressed() {
        let mut p = processor();
        let first = p.process(&frame(3.0, 0.3, 3.0, 0), 0).unwrap();
        assert_eq!(first.alerts.len(), 1);
        let second = p.process(&frame(3.0, 0.3, 3.0, 100), 1_000).unwrap();
        assert!(second.alerts.is_empty());
        let third = p.process(&frame(3.0, 0.3, 3.0, 200), 3_000).unwrap();
        assert_eq!(third.alerts.len(), 1, "cooldown elapsed");
    }

    #[test]
    fn escalation_to_danger_bypasses_cooldown() {
        let mut p = processor();
        let a = p.process(&frame(3.0, 0.3, 3.0, 0), 0).unwrap();
        assert_eq!(a.alerts.len(), 1);
        // First Caution for this sector, so it is not debounced.
        let b = p.process(&frame(3.0, 1.0, 3.0, 0), 500).unwrap();
        assert_eq!(b.alerts.len(), 1);
        assert_eq!(b.alerts[0].kind, AlertKind::ObstacleCaution);
        // Danger was spoken 1 s ago, but this is a fresh escalation.
        let c = p.process(&frame(3.0, 0.3, 3.0, 0), 1_000).unwrap();
        assert_eq!(c.alerts.len(), 1);
        assert_eq!(c.alerts[0].kind, AlertKind::ObstacleDanger);
        // Falling back to Caution within its own cooldown stays quiet.
        let d = p.process(&frame(3.0, 1.0, 3.0, 0), 1_500).unwrap();
        assert!(d.alerts.is_empty());
    }

    #[test]
    fn caution_to_danger_always_fires() {
        let mut p = processor();
        let a = p.process(&frame(1.0, 3.0, 3.0, 0), 0).unwrap();
        assert_eq!(a.alerts[0].kind, AlertKind::ObstacleCaution);
        let b = p.process(&frame(0.2, 3.0, 3.0, 0), 10).unwrap();
        assert_eq!(b.alerts.len(), 1);
        assert_eq!(b.alerts[0].kind, AlertKind::ObstacleDanger);
        assert_eq!(b.alerts[0].sector, Some(Sector::Left));
        assert_eq!(b.alerts[0].suppress_until, 10 + 3_000);
    }

    #[test]
    fn return_to_clear_is_reported() {
        let mut p = processor();
        p.process(&frame(3.0, 3.0, 1.0, 0), 0).unwrap();
        let scan = p.process(&frame(3.0, 3.0, 3.0, 0), 100).unwrap();
        assert_eq!(scan.cleared, vec![Sector::Right]);
        assert!(scan.alerts.is_empty());
        assert_eq!(p.urgency(Sector::Right), Urgency::Clear);
    }

    #[test]
    fn invalid_frame_holds_then_releases() {
        let mut p = processor();
        p.process(&frame(3.0, 0.3, 3.0, 0), 0).unwrap();
        let broken = DepthFrame::new(6, 2, vec![1.0; 5], 100);

        assert!(p.process(&broken, 100).is_err());
        assert_eq!(p.urgency(Sector::Center), Urgency::Danger, "held for one cycle");
        assert!(p.take_cleared().is_empty());

        assert!(p.process(&broken, 200).is_err());
        assert_eq!(p.urgency(Sector::Center), Urgency::Clear);
        assert_eq!(p.take_cleared(), vec![Sector::Center]);
    }

    #[test]
    fn rejects_mismatched_confidence_and_tiny_frames() {
        let mut p = processor();
        let bad_conf = frame(1.0, 1.0, 1.0, 0).with_confidence(vec![100; 3]);
        assert!(matches!(p.process(&bad_conf, 0), Err(FrameError::InvalidFrame(_))));
        let tiny = DepthFrame::new(2, 1, vec![1.0, 1.0], 0);
        assert!(p.process(&tiny, 0).is_err());
    }

    #[test]
    fn absurd_dimensions_are_invalid_not_a_panic() {
        let mut p = processor();
        let huge = DepthFrame::new(usize::MAX, 2, vec![1.0; 6], 0);
        assert!(matches!(p.process(&huge, 0), Err(FrameError::InvalidFrame(_))));
    }
}
