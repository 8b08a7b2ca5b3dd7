//! Everything one tracked target owns, mutated only under the controller's
//! lock. Nothing in here awaits.

use chrono::Utc;
use serde::Serialize;
use tokio::time::Instant;

use super::area::{self, AreaStep};
use super::calibration::{CalibrationKind, CalibrationPhase, CalibrationRun};
use super::idle;
use super::level_up::{
    self, LevelProjection, LEVEL_CHECK_LOW_WATERMARK, LEVEL_CHECK_SPACING, RECONCILE_LOW_WATERMARK,
};
use super::reconcile;
use super::tempo::{KillLog, TempoStats};
use crate::config::TrackerConfig;
use crate::error::TelemetryError;
use crate::models::{
    Anchor, GroundTruthSample, KillEvent, KillSource, ReconcileVerdict, ReconciliationRecord,
    Session, SessionRecord, StopReason, TrackingMode,
};
use crate::sensing::{ChangeDetector, DetectorVerdict, LumaFrame};

#[derive(Debug, Clone, PartialEq)]
pub struct CandidateOutcome {
    pub kill: KillEvent,
    pub kills: u64,
    /// Id of the calibration run whose target this kill reached.
    pub calibration_due: Option<u64>,
    pub level_check_due: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SampleOutcome {
    /// First read with nothing to compare against; the anchor is seeded.
    Seeded,
    Reconciled(ReconciliationRecord),
    LevelUp {
        record: Option<ReconciliationRecord>,
        recalibration: Option<CalibrationRun>,
    },
    Reanchored,
    Area {
        step: AreaStep,
        kills: u64,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum CalibrationCompletion {
    /// The run was replaced or cleared while its read was outstanding.
    Stale,
    Aborted(TelemetryError),
    Calibrated {
        kind: CalibrationKind,
        rate: f64,
        bracket_kills: u64,
        bracket_xp: f64,
    },
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackerSnapshot {
    pub session_id: String,
    pub mode: TrackingMode,
    pub tracking: bool,
    pub kills: u64,
    pub xp_sum: f64,
    pub level_ups: u32,
    pub corrections: u32,
    pub diff_kills: u64,
    pub active_ms: u64,
    pub xp_per_hour: f64,
    pub rate: f64,
    pub anchor: Option<Anchor>,
    pub last_reading: Option<GroundTruthSample>,
    pub calibration: Option<CalibrationRun>,
    pub tempo: Option<TempoStats>,
    pub projection: Option<LevelProjection>,
}

#[derive(Debug)]
pub struct EngineState {
    pub config: TrackerConfig,
    pub session: Session,
    pub tracking: bool,
    /// Bumped on every start and stop. A read issued under an older epoch
    /// is discarded when it returns.
    pub epoch: u64,
    pub anchor: Option<Anchor>,
    pub last_reading: Option<GroundTruthSample>,
    pub calibration: Option<CalibrationRun>,
    pub kill_log: KillLog,
    pub detector: ChangeDetector,
    pub last_activity: Option<Instant>,
    area_previous: Option<(f64, Instant)>,
    last_level_check: Option<Instant>,
    next_run_id: u64,
}

impl EngineState {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            session: Session::new(TrackingMode::default()),
            tracking: false,
            epoch: 0,
            anchor: None,
            last_reading: None,
            calibration: None,
            kill_log: KillLog::new(config.tempo_window),
            detector: ChangeDetector::new(config.diff_trigger, config.diff_cooldown()),
            last_activity: None,
            area_previous: None,
            last_level_check: None,
            next_run_id: 1,
            config,
        }
    }

    /// Current XP per kill, or per mob in area mode.
    pub fn rate(&self) -> f64 {
        match self.session.mode {
            TrackingMode::SingleTarget => self.config.xp_per_kill,
            TrackingMode::Area => self.config.xp_per_mob,
        }
    }

    pub fn mode(&self) -> TrackingMode {
        self.session.mode
    }

    pub fn set_config(&mut self, config: TrackerConfig) {
        self.detector
            .set_params(config.diff_trigger, config.diff_cooldown());
        self.kill_log.set_capacity(config.tempo_window);
        self.config = config;
    }

    pub fn set_mode(&mut self, mode: TrackingMode) -> Result<(), TelemetryError> {
        if self.tracking {
            return Err(TelemetryError::ModeLocked);
        }
        if self.calibration.is_some() {
            return Err(TelemetryError::CalibrationInProgress);
        }
        if self.session.mode != mode {
            self.session.mode = mode;
            self.detector.reset();
            self.area_previous = None;
            self.anchor = None;
        }
        Ok(())
    }

    pub fn begin_tracking(&mut self, now: Instant) -> u64 {
        self.tracking = true;
        self.epoch += 1;
        self.session.begin(Utc::now(), now);
        self.last_activity = Some(now);
        self.detector.reset();
        // XP gained while paused is not attributable to tracked mobs.
        if self.calibration.is_none() {
            self.area_previous = None;
        }
        self.epoch
    }

    pub fn end_tracking(&mut self, now: Instant) {
        if self.tracking {
            self.tracking = false;
            self.epoch += 1;
            self.session.clock.stop(now);
        }
    }

    pub fn is_current(&self, epoch: u64) -> bool {
        self.tracking && self.epoch == epoch
    }

    /// Fresh session with the same mode; the rate is configuration and
    /// survives.
    fn restart_session(&mut self, now: Instant) {
        self.session = Session::new(self.session.mode);
        self.kill_log.clear();
        self.detector.reset();
        if self.tracking {
            self.session.begin(Utc::now(), now);
            self.last_activity = Some(now);
        }
    }

    /// Drop session-scoped state entirely.
    pub fn reset(&mut self, now: Instant) {
        self.end_tracking(now);
        self.restart_session(now);
        self.anchor = None;
        self.last_reading = None;
        self.calibration = None;
        self.area_previous = None;
        self.last_activity = None;
        self.last_level_check = None;
    }

    /// First read of a new session: records the starting XP and seeds the
    /// anchor if there is none. Returns false when the session already had
    /// a starting value.
    pub fn seed_session_start(&mut self, sample: GroundTruthSample) -> bool {
        if self.session.start_xp.is_some() {
            return false;
        }
        self.session.start_xp = Some(sample.percent);
        if self.anchor.is_none() {
            self.anchor = Some(Anchor::new(self.capture_kills(&sample), sample.percent));
        }
        self.last_reading = Some(sample);
        true
    }

    fn register(&mut self, at: Instant, xp: f64, source: KillSource) -> KillEvent {
        let event = KillEvent::new(at, xp, source);
        self.session.register_kill(event.xp);
        if source == KillSource::DiffDetected {
            self.session.diff_kills = self.session.diff_kills.saturating_add(1);
        }
        self.kill_log.push(event);
        self.last_activity = Some(at);
        event
    }

    /// Feed one reduced frame. Kills are only counted while tracking in
    /// single-target mode.
    pub fn observe_frame(
        &mut self,
        frame: LumaFrame,
        now: Instant,
    ) -> (DetectorVerdict, Option<CandidateOutcome>) {
        let verdict = self.detector.observe(frame, now);
        if !verdict.is_candidate()
            || !self.tracking
            || self.session.mode != TrackingMode::SingleTarget
        {
            return (verdict, None);
        }

        let kill = self.register(now, self.config.xp_per_kill, KillSource::DiffDetected);
        let kills = self.session.kills;

        let calibration_due = match self.calibration.as_mut() {
            Some(run) if run.is_collecting() && run.target_reached(kills) => {
                run.phase = CalibrationPhase::AwaitingReadout;
                Some(run.id)
            }
            _ => None,
        };

        let level_check_due = self.calibration.is_none()
            && self
                .last_level_check
                .map(|at| now.saturating_duration_since(at) >= LEVEL_CHECK_SPACING)
                .unwrap_or(true)
            && self
                .projection(now)
                .map(|projection| projection.level_due())
                .unwrap_or(false);
        if level_check_due {
            self.last_level_check = Some(now);
        }

        (
            verdict,
            Some(CandidateOutcome {
                kill,
                kills,
                calibration_due,
                level_check_due,
            }),
        )
    }

    fn next_run_id(&mut self) -> u64 {
        let id = self.next_run_id;
        self.next_run_id += 1;
        id
    }

    fn capture_kills(&self, sample: &GroundTruthSample) -> u64 {
        sample.kills_at_capture.min(self.session.kills)
    }

    /// Count the level, re-anchor at the observation, and in single-target
    /// mode open an in-place recalibration. A run already in progress spans
    /// the reset and cannot produce a valid rate, so it is replaced.
    fn absorb_level_up(&mut self, observed: f64, kills: u64) -> Option<CalibrationRun> {
        self.session.level_ups = self.session.level_ups.saturating_add(1);
        self.anchor = Some(Anchor::new(kills, observed));

        if self.session.mode != TrackingMode::SingleTarget {
            return None;
        }
        let id = self.next_run_id();
        let run = CalibrationRun::bracket(
            id,
            CalibrationKind::InPlace,
            kills,
            observed,
            self.config.calibration_kills,
        );
        self.calibration = Some(run.clone());
        Some(run)
    }

    /// Periodic reconciliation against a fresh read.
    pub fn apply_reconciliation(&mut self, sample: GroundTruthSample) -> SampleOutcome {
        let rate = self.rate();
        let kills_before = self.session.kills;
        let capture_kills = self.capture_kills(&sample);
        let observed = sample.percent;
        self.last_reading = Some(sample);

        let Some(anchor) = self.anchor else {
            self.anchor = Some(Anchor::new(capture_kills, observed));
            return SampleOutcome::Seeded;
        };

        let expected_xp = anchor.predicted_xp(capture_kills, rate);
        let session_id = self.session.id.clone();
        let record = |verdict, kills_after| ReconciliationRecord {
            session_id: session_id.clone(),
            at: sample.at,
            observed_xp: observed,
            expected_xp,
            kills_before,
            kills_after,
            verdict,
        };

        if level_up::is_level_up(expected_xp, observed, RECONCILE_LOW_WATERMARK) {
            let record = record(ReconcileVerdict::LevelUp, kills_before);
            let recalibration = self.absorb_level_up(observed, capture_kills);
            return SampleOutcome::LevelUp {
                record: Some(record),
                recalibration,
            };
        }

        let assessment = reconcile::assess(anchor, capture_kills, observed, rate);
        match (assessment.corrected_kills, assessment.kill_delta(capture_kills)) {
            (Some(corrected), Some(delta)) => {
                let new_kills = (kills_before as i64 + delta).max(0) as u64;
                let applied = self.session.apply_correction(new_kills, rate);
                self.anchor = Some(Anchor::new(corrected, observed));
                SampleOutcome::Reconciled(record(
                    ReconcileVerdict::Corrected {
                        kill_delta: applied,
                        xp_adjustment: applied as f64 * rate,
                    },
                    self.session.kills,
                ))
            }
            _ => {
                self.anchor = Some(Anchor::new(capture_kills, observed));
                SampleOutcome::Reconciled(record(ReconcileVerdict::WithinTolerance, kills_before))
            }
        }
    }

    /// Read issued because the projection says the level should be done.
    pub fn apply_level_check(&mut self, sample: GroundTruthSample) -> SampleOutcome {
        let capture_kills = self.capture_kills(&sample);
        let observed = sample.percent;
        self.last_reading = Some(sample);

        let Some(anchor) = self.anchor else {
            self.anchor = Some(Anchor::new(capture_kills, observed));
            return SampleOutcome::Seeded;
        };

        let predicted = anchor.predicted_xp(capture_kills, self.rate());
        if level_up::is_level_up(predicted, observed, LEVEL_CHECK_LOW_WATERMARK) {
            let recalibration = self.absorb_level_up(observed, capture_kills);
            return SampleOutcome::LevelUp {
                record: None,
                recalibration,
            };
        }

        self.anchor = Some(Anchor::new(capture_kills, observed));
        SampleOutcome::Reanchored
    }

    /// One area-mode poll.
    pub fn apply_area_poll(&mut self, sample: GroundTruthSample, now: Instant) -> SampleOutcome {
        let observed = sample.percent;
        let previous = self.area_previous.map(|(value, _)| value);
        let since = self
            .area_previous
            .map(|(_, at)| at)
            .or(self.last_activity)
            .unwrap_or(now);
        self.last_reading = Some(sample);

        let step = area::step(previous, observed, self.config.xp_per_mob);
        let mut registered = 0;
        match step {
            AreaStep::LevelUp => {
                self.absorb_level_up(observed, self.session.kills);
            }
            AreaStep::Kills {
                mobs, xp_per_mob, ..
            } => {
                self.register_bulk(mobs, xp_per_mob, since, now);
                registered = mobs;
            }
            AreaStep::Baseline | AreaStep::Idle { .. } => {}
        }

        self.area_previous = Some((observed, now));
        self.anchor = Some(Anchor::new(self.session.kills, observed));
        SampleOutcome::Area {
            step,
            kills: registered,
        }
    }

    /// Counters take all `mobs`; the tempo log only ever needs its capacity.
    fn register_bulk(&mut self, mobs: u64, xp_per_mob: f64, since: Instant, now: Instant) {
        let logged = (self.kill_log.capacity() as u64).min(mobs);
        let unlogged = mobs - logged;
        for _ in 0..unlogged {
            self.session.register_kill(xp_per_mob);
        }
        for at in area::spread_timestamps(since, now, mobs, logged) {
            self.register(at, xp_per_mob, KillSource::AreaInferred);
        }
    }

    pub fn begin_calibration(
        &mut self,
        kind: CalibrationKind,
        start: GroundTruthSample,
        now: Instant,
    ) -> Result<CalibrationRun, TelemetryError> {
        if self.calibration.is_some() {
            return Err(TelemetryError::CalibrationInProgress);
        }
        match (kind, self.session.mode) {
            (CalibrationKind::Area, TrackingMode::SingleTarget) => {
                return Err(TelemetryError::WrongMode(TrackingMode::SingleTarget.as_str()))
            }
            (CalibrationKind::Fresh | CalibrationKind::InPlace, TrackingMode::Area) => {
                return Err(TelemetryError::WrongMode(TrackingMode::Area.as_str()))
            }
            _ => {}
        }

        let xp = start.percent;
        let id = self.next_run_id();
        self.last_reading = Some(start);

        let run = match kind {
            CalibrationKind::Fresh => {
                self.restart_session(now);
                self.session.start_xp = Some(xp);
                self.anchor = Some(Anchor::new(0, xp));
                CalibrationRun::bracket(id, kind, 0, xp, self.config.calibration_kills)
            }
            CalibrationKind::InPlace => {
                let kills = self.capture_kills(&start);
                self.anchor = Some(Anchor::new(kills, xp));
                CalibrationRun::bracket(id, kind, kills, xp, self.config.calibration_kills)
            }
            CalibrationKind::Area => {
                self.restart_session(now);
                self.area_previous = Some((xp, now));
                self.anchor = Some(Anchor::new(0, xp));
                CalibrationRun::area(id, xp)
            }
        };

        self.calibration = Some(run.clone());
        Ok(run)
    }

    /// Mark the active run as awaiting its closing read. Returns its id.
    pub fn claim_calibration_readout(&mut self) -> Option<u64> {
        let run = self.calibration.as_mut()?;
        run.phase = CalibrationPhase::AwaitingReadout;
        Some(run.id)
    }

    pub fn abort_calibration(&mut self, run_id: u64) -> bool {
        if self.calibration.as_ref().map(|run| run.id) == Some(run_id) {
            self.calibration = None;
            true
        } else {
            false
        }
    }

    /// Close run `run_id` with `end`. `mobs` is required for area runs.
    pub fn complete_calibration(
        &mut self,
        run_id: u64,
        end: GroundTruthSample,
        mobs: Option<u64>,
        now: Instant,
    ) -> CalibrationCompletion {
        let run = match self.calibration.take() {
            Some(run) if run.id == run_id => run,
            other => {
                self.calibration = other;
                return CalibrationCompletion::Stale;
            }
        };

        let end_kills = self.capture_kills(&end);
        let xp = end.percent;
        self.last_reading = Some(end);

        let (result, bracket_kills) = match run.kind {
            CalibrationKind::Area => {
                let mobs = mobs.unwrap_or(0);
                (run.finish_with_mobs(mobs, xp), mobs)
            }
            _ => (
                run.finish(end_kills, xp),
                end_kills.saturating_sub(run.start_kills),
            ),
        };
        let rate = match result {
            Ok(rate) => rate,
            Err(err) => return CalibrationCompletion::Aborted(err),
        };

        match run.kind {
            CalibrationKind::Fresh => {
                self.config.xp_per_kill = rate;
                self.end_tracking(now);
                self.restart_session(now);
                self.session.start_xp = Some(xp);
                self.anchor = Some(Anchor::new(0, xp));
            }
            CalibrationKind::InPlace => {
                self.config.xp_per_kill = rate;
                self.anchor = Some(Anchor::new(end_kills, xp));
            }
            CalibrationKind::Area => {
                self.config.xp_per_mob = rate;
                self.restart_session(now);
                self.area_previous = Some((xp, now));
                self.anchor = Some(Anchor::new(0, xp));
            }
        }

        CalibrationCompletion::Calibrated {
            kind: run.kind,
            rate,
            bracket_kills,
            bracket_xp: xp - run.start_xp,
        }
    }

    pub fn idle_exceeded(&self, now: Instant) -> Option<std::time::Duration> {
        if !self.tracking || !self.config.idle_auto_stop {
            return None;
        }
        idle::idle_for(self.last_activity?, now, self.config.idle_timeout())
    }

    pub fn projection(&self, now: Instant) -> Option<LevelProjection> {
        let anchor = self.anchor?;
        level_up::project(
            anchor,
            self.session.kills,
            self.rate(),
            self.session.xp_per_hour(now),
        )
    }

    pub fn tempo(&self) -> Option<TempoStats> {
        self.kill_log.tempo(self.session.clock.first_started())
    }

    /// Finalized record, or `None` when there is nothing worth archiving.
    pub fn finalize(&self, now: Instant, reason: StopReason) -> Option<SessionRecord> {
        if self.session.is_empty() {
            return None;
        }
        Some(self.session.finalize(
            Utc::now(),
            now,
            self.last_reading.map(|sample| sample.percent),
            self.rate(),
            reason,
        ))
    }

    pub fn snapshot(&self, now: Instant) -> TrackerSnapshot {
        TrackerSnapshot {
            session_id: self.session.id.clone(),
            mode: self.session.mode,
            tracking: self.tracking,
            kills: self.session.kills,
            xp_sum: self.session.xp_sum,
            level_ups: self.session.level_ups,
            corrections: self.session.corrections,
            diff_kills: self.session.diff_kills,
            active_ms: self.session.clock.active_ms(now),
            xp_per_hour: self.session.xp_per_hour(now),
            rate: self.rate(),
            anchor: self.anchor,
            last_reading: self.last_reading,
            calibration: self.calibration.clone(),
            tempo: self.tempo(),
            projection: self.projection(now),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ReadMethod;
    use std::time::Duration;

    fn sample(percent: f64, kills: u64) -> GroundTruthSample {
        GroundTruthSample::new(Utc::now(), percent, ReadMethod::Scripted, kills).unwrap()
    }

    fn flat(value: u8) -> LumaFrame {
        LumaFrame {
            width: 96,
            height: 22,
            pixels: vec![value; 96 * 22],
        }
    }

    fn tracking_state() -> (EngineState, Instant) {
        let t0 = Instant::now();
        let mut state = EngineState::new(TrackerConfig::default());
        state.begin_tracking(t0);
        (state, t0)
    }

    /// Alternate black and white frames one second apart so every frame
    /// after the first is a candidate.
    fn kill_n(state: &mut EngineState, t0: Instant, from_sec: u64, n: u64) -> Vec<CandidateOutcome> {
        let mut outcomes = Vec::new();
        for i in 0..=n {
            let sec = from_sec + i;
            let value = if sec % 2 == 0 { 0 } else { 255 };
            let (_, outcome) = state.observe_frame(flat(value), t0 + Duration::from_secs(sec));
            outcomes.extend(outcome);
        }
        outcomes
    }

    #[test]
    fn candidates_only_count_while_tracking() {
        let t0 = Instant::now();
        let mut state = EngineState::new(TrackerConfig::default());
        state.observe_frame(flat(0), t0);
        let (verdict, outcome) = state.observe_frame(flat(255), t0 + Duration::from_secs(1));
        assert!(verdict.is_candidate());
        assert!(outcome.is_none());
        assert_eq!(state.session.kills, 0);
    }

    #[test]
    fn reconciliation_corrects_missed_kills() {
        let (mut state, t0) = tracking_state();
        state.anchor = Some(Anchor::new(0, 20.0));
        kill_n(&mut state, t0, 0, 15);
        assert_eq!(state.session.kills, 15);
        assert_eq!(state.session.diff_kills, 15);
        state.anchor = Some(Anchor::new(10, 20.0));

        let outcome = state.apply_reconciliation(sample(20.60, 15));

        let SampleOutcome::Reconciled(record) = outcome else {
            panic!("unexpected {outcome:?}");
        };
        assert_eq!(record.correction(), Some(7));
        assert_eq!(state.session.kills, 22);
        assert!((state.session.xp_sum - 22.0 * 0.05).abs() < 1e-9);
        assert_eq!(state.anchor, Some(Anchor::new(22, 20.60)));
        assert_eq!(state.session.corrections, 1);
    }

    #[test]
    fn kills_during_the_read_are_kept() {
        let (mut state, t0) = tracking_state();
        kill_n(&mut state, t0, 0, 17);
        state.anchor = Some(Anchor::new(10, 20.0));

        // captured at 15 kills, two more landed before the reply
        state.apply_reconciliation(sample(20.60, 15));

        assert_eq!(state.session.kills, 24);
        assert_eq!(state.anchor, Some(Anchor::new(22, 20.60)));
    }

    #[test]
    fn within_tolerance_still_advances_anchor() {
        let (mut state, t0) = tracking_state();
        kill_n(&mut state, t0, 0, 15);
        state.anchor = Some(Anchor::new(10, 20.0));

        let outcome = state.apply_reconciliation(sample(20.30, 15));

        assert!(matches!(
            outcome,
            SampleOutcome::Reconciled(ReconciliationRecord {
                verdict: ReconcileVerdict::WithinTolerance,
                ..
            })
        ));
        assert_eq!(state.session.kills, 15);
        assert_eq!(state.anchor, Some(Anchor::new(15, 20.30)));
    }

    #[test]
    fn level_up_reanchors_and_recalibrates() {
        let (mut state, t0) = tracking_state();
        kill_n(&mut state, t0, 0, 20);
        // predicted 94 + 20 * 0.05 = 95
        state.anchor = Some(Anchor::new(0, 94.0));

        let outcome = state.apply_reconciliation(sample(12.0, 20));

        let SampleOutcome::LevelUp {
            recalibration: Some(run),
            ..
        } = outcome
        else {
            panic!("unexpected {outcome:?}");
        };
        assert_eq!(run.kind, CalibrationKind::InPlace);
        assert_eq!(run.target_kills, Some(23));
        assert_eq!(state.session.level_ups, 1);
        assert_eq!(state.anchor, Some(Anchor::new(20, 12.0)));
        assert_eq!(state.session.kills, 20);
    }

    #[test]
    fn fresh_calibration_resets_counters_but_not_after_failure() {
        let (mut state, t0) = tracking_state();
        state.config.calibration_kills = 5;
        kill_n(&mut state, t0, 0, 4);
        let run = state
            .begin_calibration(CalibrationKind::Fresh, sample(10.0, 4), t0)
            .unwrap();
        assert_eq!(state.session.kills, 0);
        assert!(matches!(
            state.begin_calibration(CalibrationKind::InPlace, sample(10.0, 0), t0),
            Err(TelemetryError::CalibrationInProgress)
        ));

        let outcomes = kill_n(&mut state, t0, 10, 5);
        assert_eq!(outcomes.last().unwrap().calibration_due, Some(run.id));
        assert!(outcomes[..4].iter().all(|o| o.calibration_due.is_none()));

        let completion =
            state.complete_calibration(run.id, sample(10.35, 5), None, t0 + Duration::from_secs(16));
        let CalibrationCompletion::Calibrated { rate, .. } = completion else {
            panic!("unexpected {completion:?}");
        };
        assert!((rate - 0.07).abs() < 1e-9);
        assert!((state.config.xp_per_kill - 0.07).abs() < 1e-9);
        assert_eq!(state.session.kills, 0);
        assert!(!state.tracking);
        assert!(state.calibration.is_none());
        assert_eq!(state.anchor, Some(Anchor::new(0, 10.35)));
    }

    #[test]
    fn aborted_calibration_keeps_rate() {
        let (mut state, t0) = tracking_state();
        let run = state
            .begin_calibration(CalibrationKind::InPlace, sample(50.0, 0), t0)
            .unwrap();
        let completion = state.complete_calibration(run.id, sample(50.0, 0), None, t0);
        assert!(matches!(
            completion,
            CalibrationCompletion::Aborted(TelemetryError::CalibrationAborted(_))
        ));
        assert_eq!(state.config.xp_per_kill, 0.05);
        assert!(state.calibration.is_none());

        assert_eq!(
            state.complete_calibration(run.id, sample(51.0, 0), None, t0),
            CalibrationCompletion::Stale
        );
    }

    #[test]
    fn area_poll_registers_spread_kills() {
        let t0 = Instant::now();
        let mut state = EngineState::new(TrackerConfig::default());
        state.set_mode(TrackingMode::Area).unwrap();
        state.begin_tracking(t0);

        assert!(matches!(
            state.apply_area_poll(sample(90.0, 0), t0),
            SampleOutcome::Area {
                step: AreaStep::Baseline,
                ..
            }
        ));
        let later = t0 + Duration::from_secs(25);
        state.apply_area_poll(sample(5.0, 0), later);

        assert_eq!(state.session.kills, 300);
        assert!((state.session.xp_sum - 15.0).abs() < 1e-6);
        assert_eq!(state.kill_log.len(), 50);
        assert_eq!(state.kill_log.last().unwrap().at, later);
        assert_eq!(state.session.diff_kills, 0);
        assert_eq!(state.last_activity, Some(later));
    }

    #[test]
    fn area_level_up_registers_nothing() {
        let t0 = Instant::now();
        let mut state = EngineState::new(TrackerConfig::default());
        state.set_mode(TrackingMode::Area).unwrap();
        state.begin_tracking(t0);
        state.apply_area_poll(sample(95.0, 0), t0);
        state.apply_area_poll(sample(2.0, 0), t0 + Duration::from_secs(25));

        assert_eq!(state.session.kills, 0);
        assert_eq!(state.session.level_ups, 1);
        assert!(state.calibration.is_none());
    }

    #[test]
    fn session_start_is_seeded_once() {
        let (mut state, _) = tracking_state();
        assert!(state.seed_session_start(sample(42.0, 0)));
        assert!(!state.seed_session_start(sample(43.0, 0)));
        assert_eq!(state.session.start_xp, Some(42.0));
        assert_eq!(state.anchor, Some(Anchor::new(0, 42.0)));
    }

    #[test]
    fn level_checks_are_spaced_out() {
        let (mut state, t0) = tracking_state();
        state.anchor = Some(Anchor::new(0, 99.95));

        let first = kill_n(&mut state, t0, 0, 3);
        assert!(first[0].level_check_due);
        assert!(first[1..].iter().all(|o| !o.level_check_due));

        let later = kill_n(&mut state, t0, 20, 1);
        assert!(later[0].level_check_due);
    }

    #[test]
    fn mode_switch_is_locked_while_tracking() {
        let (mut state, _) = tracking_state();
        assert_eq!(
            state.set_mode(TrackingMode::Area),
            Err(TelemetryError::ModeLocked)
        );
    }

    #[test]
    fn reset_keeps_rate() {
        let (mut state, t0) = tracking_state();
        state.config.xp_per_kill = 0.0731;
        kill_n(&mut state, t0, 0, 3);
        state.reset(t0 + Duration::from_secs(5));

        assert_eq!(state.session.kills, 0);
        assert_eq!(state.session.xp_sum, 0.0);
        assert!(!state.tracking);
        assert_eq!(state.rate(), 0.0731);
        assert!(state.tempo().is_none());
    }

    #[test]
    fn idle_requires_auto_stop() {
        let (mut state, t0) = tracking_state();
        let later = t0 + Duration::from_secs(61);
        assert_eq!(state.idle_exceeded(later), Some(Duration::from_secs(61)));
        state.config.idle_auto_stop = false;
        assert_eq!(state.idle_exceeded(later), None);
    }
}
