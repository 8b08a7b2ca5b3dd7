use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum TrackingMode {
    /// One kill per large visual change in the region.
    #[default]
    SingleTarget,
    /// Kills inferred from ground-truth deltas only.
    Area,
}

impl TrackingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackingMode::SingleTarget => "SINGLE",
            TrackingMode::Area => "AREA",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum StopReason {
    Paused,
    #[serde(rename_all = "camelCase")]
    IdleTimeout { idle_secs: u64 },
    Reset,
    Calibrated,
}

impl StopReason {
    pub fn describe(&self) -> String {
        match self {
            StopReason::Paused => "paused".to_string(),
            StopReason::IdleTimeout { idle_secs } => {
                format!("idle timeout (no kills for {idle_secs}s)")
            }
            StopReason::Reset => "reset".to_string(),
            StopReason::Calibrated => "calibration complete".to_string(),
        }
    }
}

/// Active-duration accounting across start/pause windows.
#[derive(Debug, Clone, Default)]
pub struct ActiveClock {
    /// Time accumulated from earlier running windows; combines with
    /// `running_anchor` to give the true active duration.
    active_ms_baseline: u64,
    running_anchor: Option<Instant>,
    first_started: Option<Instant>,
}

impl ActiveClock {
    pub fn start(&mut self, now: Instant) {
        if self.running_anchor.is_none() {
            self.running_anchor = Some(now);
        }
        if self.first_started.is_none() {
            self.first_started = Some(now);
        }
    }

    pub fn stop(&mut self, now: Instant) {
        if let Some(anchor) = self.running_anchor.take() {
            self.active_ms_baseline = self
                .active_ms_baseline
                .saturating_add(now.saturating_duration_since(anchor).as_millis() as u64);
        }
    }

    pub fn active_ms(&self, now: Instant) -> u64 {
        match self.running_anchor {
            Some(anchor) => self
                .active_ms_baseline
                .saturating_add(now.saturating_duration_since(anchor).as_millis() as u64),
            None => self.active_ms_baseline,
        }
    }

    pub fn first_started(&self) -> Option<Instant> {
        self.first_started
    }
}

#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub mode: TrackingMode,
    pub started_at: Option<DateTime<Utc>>,
    pub clock: ActiveClock,
    pub kills: u64,
    pub xp_sum: f64,
    pub level_ups: u32,
    pub corrections: u32,
    pub diff_kills: u64,
    pub start_xp: Option<f64>,
    pub notes: String,
}

impl Session {
    pub fn new(mode: TrackingMode) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            mode,
            started_at: None,
            clock: ActiveClock::default(),
            kills: 0,
            xp_sum: 0.0,
            level_ups: 0,
            corrections: 0,
            diff_kills: 0,
            start_xp: None,
            notes: String::new(),
        }
    }

    pub fn begin(&mut self, wall: DateTime<Utc>, now: Instant) {
        if self.started_at.is_none() {
            self.started_at = Some(wall);
        }
        self.clock.start(now);
    }

    pub fn register_kill(&mut self, xp: f64) {
        self.kills = self.kills.saturating_add(1);
        self.xp_sum += xp.max(0.0);
    }

    /// Move the kill count to `new_kills`, adjusting the XP sum by the
    /// difference at `rate`. Returns the signed kill delta.
    pub fn apply_correction(&mut self, new_kills: u64, rate: f64) -> i64 {
        let delta = new_kills as i64 - self.kills as i64;
        self.kills = new_kills;
        self.xp_sum = (self.xp_sum + delta as f64 * rate).max(0.0);
        self.corrections = self.corrections.saturating_add(1);
        delta
    }

    pub fn is_empty(&self) -> bool {
        self.kills == 0 && self.xp_sum <= 0.0
    }

    pub fn xp_per_hour(&self, now: Instant) -> f64 {
        let hours = self.clock.active_ms(now) as f64 / 3_600_000.0;
        if hours > 0.0 {
            self.xp_sum / hours
        } else {
            0.0
        }
    }

    fn summary_notes(&self, end_xp: Option<f64>) -> String {
        let mut notes = format!("Mode: {}", self.mode.as_str());
        if let (Some(start), Some(end)) = (self.start_xp, end_xp) {
            notes.push_str(&format!(" | Start: {start:.2}% -> End: {end:.2}%"));
            if self.level_ups > 0 {
                notes.push_str(&format!(" (+{} lvl)", self.level_ups));
            }
        }
        if self.corrections > 0 {
            notes.push_str(&format!(" | corrections: {}", self.corrections));
        }
        if !self.notes.trim().is_empty() {
            notes.push_str(" | ");
            notes.push_str(self.notes.trim());
        }
        notes
    }

    pub fn finalize(
        &self,
        ended_at: DateTime<Utc>,
        now: Instant,
        end_xp: Option<f64>,
        rate: f64,
        reason: StopReason,
    ) -> SessionRecord {
        SessionRecord {
            id: self.id.clone(),
            mode: self.mode,
            started_at: self.started_at.unwrap_or(ended_at),
            ended_at,
            duration_ms: self.clock.active_ms(now),
            kills: self.kills,
            xp_sum: self.xp_sum,
            xp_per_hour: self.xp_per_hour(now),
            xp_per_kill: rate,
            level_ups: self.level_ups,
            diff_kills: self.diff_kills,
            corrections: self.corrections,
            notes: self.summary_notes(end_xp),
            stop_reason: reason,
        }
    }
}

/// Finalized session handed to the archival sink.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub id: String,
    pub mode: TrackingMode,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub kills: u64,
    pub xp_sum: f64,
    pub xp_per_hour: f64,
    pub xp_per_kill: f64,
    pub level_ups: u32,
    pub diff_kills: u64,
    pub corrections: u32,
    pub notes: String,
    pub stop_reason: StopReason,
}

impl SessionRecord {
    pub fn date(&self) -> NaiveDate {
        self.started_at.date_naive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn clock_accumulates_across_windows() {
        let t0 = Instant::now();
        let mut clock = ActiveClock::default();
        clock.start(t0);
        clock.stop(t0 + Duration::from_secs(10));
        assert_eq!(clock.active_ms(t0 + Duration::from_secs(60)), 10_000);

        clock.start(t0 + Duration::from_secs(60));
        assert_eq!(clock.active_ms(t0 + Duration::from_secs(65)), 15_000);
        assert_eq!(clock.first_started(), Some(t0));
    }

    #[test]
    fn correction_adjusts_xp_by_rate() {
        let mut session = Session::new(TrackingMode::SingleTarget);
        for _ in 0..15 {
            session.register_kill(0.05);
        }
        let delta = session.apply_correction(22, 0.05);
        assert_eq!(delta, 7);
        assert_eq!(session.kills, 22);
        assert!((session.xp_sum - 22.0 * 0.05).abs() < 1e-9);
        assert_eq!(session.corrections, 1);
    }

    #[test]
    fn downward_correction_never_goes_negative() {
        let mut session = Session::new(TrackingMode::SingleTarget);
        session.register_kill(0.01);
        session.apply_correction(0, 5.0);
        assert_eq!(session.kills, 0);
        assert_eq!(session.xp_sum, 0.0);
    }

    #[test]
    fn finalize_builds_notes() {
        let t0 = Instant::now();
        let mut session = Session::new(TrackingMode::Area);
        session.begin(Utc::now(), t0);
        session.start_xp = Some(40.0);
        session.level_ups = 1;
        session.corrections = 2;
        session.notes = "north camp".into();
        session.register_kill(0.5);

        let record = session.finalize(
            Utc::now(),
            t0 + Duration::from_secs(1800),
            Some(12.5),
            0.5,
            StopReason::IdleTimeout { idle_secs: 61 },
        );

        assert_eq!(record.duration_ms, 1_800_000);
        assert!((record.xp_per_hour - 1.0).abs() < 1e-9);
        assert_eq!(
            record.notes,
            "Mode: AREA | Start: 40.00% -> End: 12.50% (+1 lvl) | corrections: 2 | north camp"
        );
        assert_eq!(
            record.stop_reason.describe(),
            "idle timeout (no kills for 61s)"
        );
    }
}
