//! Level reset classification and level projection.

use std::time::Duration;

use serde::Serialize;

use crate::models::Anchor;

pub const HIGH_WATERMARK: f64 = 90.0;
/// Low watermark used by the reconciliation tick and the area poller.
pub const RECONCILE_LOW_WATERMARK: f64 = 30.0;
/// Low watermark used by the check issued when the projection says the
/// level should already be done.
pub const LEVEL_CHECK_LOW_WATERMARK: f64 = 50.0;
/// Minimum time between two projection-triggered level checks.
pub const LEVEL_CHECK_SPACING: Duration = Duration::from_secs(15);

const OUTSIDE_MIN_PREVIOUS_END: f64 = 50.0;
const OUTSIDE_MIN_DROP: f64 = 30.0;

/// A predicted value above the high watermark followed by an observation
/// below `low_watermark` is treated as a level reset.
pub fn is_level_up(predicted: f64, observed: f64, low_watermark: f64) -> bool {
    predicted > HIGH_WATERMARK && observed < low_watermark
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LevelProjection {
    pub predicted_xp: f64,
    pub mobs_to_level: i64,
    pub time_to_level: Option<Duration>,
}

impl LevelProjection {
    /// The projection says the level is done; a ground-truth check is due.
    pub fn level_due(&self) -> bool {
        self.mobs_to_level <= 0
    }
}

/// Project from `anchor` at `rate`. `xp_per_hour` is the lifetime session
/// pace; no time estimate is given without one.
pub fn project(anchor: Anchor, kills: u64, rate: f64, xp_per_hour: f64) -> Option<LevelProjection> {
    if !(rate > 0.0) {
        return None;
    }
    let predicted_xp = anchor.predicted_xp(kills, rate);
    let remaining = (100.0 - predicted_xp).max(0.0);
    let mobs = remaining / rate;
    if !mobs.is_finite() {
        return None;
    }

    let time_to_level = (xp_per_hour > 0.0)
        .then(|| Duration::from_secs_f64(remaining / xp_per_hour * 3600.0));

    Some(LevelProjection {
        predicted_xp,
        mobs_to_level: mobs.round() as i64,
        time_to_level,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutsideProgress {
    pub level_ups: u32,
    pub xp_gained: f64,
}

/// Level-ups that happened while nothing was tracking, judged from the
/// reading stored at the end of the previous session.
pub fn outside_progress(previous_end: f64, current: f64) -> Option<OutsideProgress> {
    if previous_end > OUTSIDE_MIN_PREVIOUS_END && current < previous_end - OUTSIDE_MIN_DROP {
        Some(OutsideProgress {
            level_ups: 1,
            xp_gained: (100.0 - previous_end) + current,
        })
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sharp_drop_from_high_prediction_is_a_level_up() {
        assert!(is_level_up(95.0, 12.0, RECONCILE_LOW_WATERMARK));
        assert!(!is_level_up(89.0, 12.0, RECONCILE_LOW_WATERMARK));
        assert!(!is_level_up(95.0, 40.0, RECONCILE_LOW_WATERMARK));
        assert!(is_level_up(95.0, 40.0, LEVEL_CHECK_LOW_WATERMARK));
    }

    #[test]
    fn projection_counts_remaining_mobs() {
        let anchor = Anchor::new(100, 98.0);
        let projection = project(anchor, 110, 0.1, 2.0).unwrap();
        assert!((projection.predicted_xp - 99.0).abs() < 1e-9);
        assert_eq!(projection.mobs_to_level, 10);
        assert_eq!(projection.time_to_level, Some(Duration::from_secs(1800)));
        assert!(!projection.level_due());

        let done = project(anchor, 130, 0.1, 0.0).unwrap();
        assert!(done.level_due());
        assert_eq!(done.time_to_level, None);
    }

    #[test]
    fn outside_progress_needs_a_large_drop() {
        let progress = outside_progress(96.0, 20.0).unwrap();
        assert_eq!(progress.level_ups, 1);
        assert!((progress.xp_gained - 24.0).abs() < 1e-9);

        assert!(outside_progress(40.0, 1.0).is_none());
        assert!(outside_progress(80.0, 60.0).is_none());
    }
}
