//! Bracketed rate calibration.
//!
//! A run is opened with one ground-truth read and closed with another. The
//! rate is the XP gained between them divided by the kills (or, in area
//! mode, the operator-supplied mob count) that happened in between.

use serde::Serialize;

use crate::error::TelemetryError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum CalibrationKind {
    /// Session counters are zeroed before and after; bracket kills do not
    /// count toward the live session.
    Fresh,
    /// Session totals are kept. Used after a level-up or when the operator
    /// switches to a different target mid-session.
    InPlace,
    /// Area mode: the bracket is closed by the operator with a mob count.
    Area,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum CalibrationPhase {
    Collecting,
    /// The closing read has been issued and not yet answered.
    AwaitingReadout,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CalibrationRun {
    pub id: u64,
    pub kind: CalibrationKind,
    pub phase: CalibrationPhase,
    pub start_kills: u64,
    pub start_xp: f64,
    /// Kill count at which the closing read is issued. `None` in area mode.
    pub target_kills: Option<u64>,
}

impl CalibrationRun {
    pub fn bracket(id: u64, kind: CalibrationKind, start_kills: u64, start_xp: f64, n: u32) -> Self {
        Self {
            id,
            kind,
            phase: CalibrationPhase::Collecting,
            start_kills,
            start_xp,
            target_kills: Some(start_kills.saturating_add(n as u64)),
        }
    }

    pub fn area(id: u64, start_xp: f64) -> Self {
        Self {
            id,
            kind: CalibrationKind::Area,
            phase: CalibrationPhase::Collecting,
            start_kills: 0,
            start_xp,
            target_kills: None,
        }
    }

    pub fn is_collecting(&self) -> bool {
        self.phase == CalibrationPhase::Collecting
    }

    pub fn target_reached(&self, kills: u64) -> bool {
        self.target_kills.map(|target| kills >= target).unwrap_or(false)
    }

    pub fn kills_remaining(&self, kills: u64) -> Option<u64> {
        self.target_kills.map(|target| target.saturating_sub(kills))
    }

    /// Close a kill-bracketed run.
    pub fn finish(&self, end_kills: u64, end_xp: f64) -> Result<f64, TelemetryError> {
        let d_kills = end_kills as i64 - self.start_kills as i64;
        derive_rate(end_xp - self.start_xp, d_kills as f64)
    }

    /// Close an area run with the operator's mob count.
    pub fn finish_with_mobs(&self, mobs: u64, end_xp: f64) -> Result<f64, TelemetryError> {
        derive_rate(end_xp - self.start_xp, mobs as f64)
    }
}

pub fn derive_rate(d_xp: f64, d_kills: f64) -> Result<f64, TelemetryError> {
    if !(d_kills > 0.0) {
        return Err(TelemetryError::CalibrationAborted(format!(
            "no kills inside the bracket ({d_kills})"
        )));
    }
    if !(d_xp > 0.0) || !d_xp.is_finite() {
        return Err(TelemetryError::CalibrationAborted(format!(
            "no XP progress detected ({d_xp:+.5}%)"
        )));
    }
    Ok(d_xp / d_kills)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn five_kill_bracket_recovers_rate() {
        let rate = 0.0731;
        let run = CalibrationRun::bracket(1, CalibrationKind::Fresh, 0, 10.0, 5);
        assert_eq!(run.target_kills, Some(5));
        assert!(!run.target_reached(4));
        assert!(run.target_reached(5));

        let derived = run.finish(5, 10.0 + 5.0 * rate).unwrap();
        assert!((derived - rate).abs() < 1e-12);
    }

    #[test]
    fn in_place_bracket_starts_at_current_kills() {
        let run = CalibrationRun::bracket(2, CalibrationKind::InPlace, 140, 12.0, 3);
        assert_eq!(run.kills_remaining(141), Some(2));
        assert!((run.finish(143, 12.3).unwrap() - 0.1).abs() < 1e-12);
    }

    #[test]
    fn no_progress_aborts() {
        let run = CalibrationRun::bracket(3, CalibrationKind::Fresh, 0, 40.0, 3);
        assert!(matches!(
            run.finish(3, 40.0),
            Err(TelemetryError::CalibrationAborted(_))
        ));
        assert!(matches!(
            run.finish(0, 41.0),
            Err(TelemetryError::CalibrationAborted(_))
        ));
        // a level-up inside the bracket shows up as negative progress
        assert!(run.finish(3, 2.0).is_err());
    }

    #[test]
    fn area_rate_uses_supplied_mob_count() {
        let run = CalibrationRun::area(4, 20.0);
        assert!(!run.target_reached(1_000));
        assert!((run.finish_with_mobs(12, 21.2).unwrap() - 0.1).abs() < 1e-12);
        assert!(run.finish_with_mobs(0, 21.2).is_err());
    }
}
