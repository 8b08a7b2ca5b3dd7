//! Drift detection between the cheap kill count and a ground-truth read.

use serde::Serialize;

use crate::models::Anchor;

/// Drift above this many percentage points is assumed to be something other
/// than miscounted kills.
pub const MAX_CORRECTABLE_XP_DIFF: f64 = 50.0;
pub const MIN_KILL_DIFF: f64 = 2.0;
pub const TOLERANCE_RATE_MULTIPLE: f64 = 3.0;
/// Largest kill adjustment applied in a single step.
pub const MAX_KILL_CORRECTION: i64 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Assessment {
    pub kills_since_anchor: u64,
    pub expected_xp: f64,
    pub total_gain: f64,
    pub expected_kills_from_xp: f64,
    pub xp_diff: f64,
    pub kill_diff: f64,
    /// Kill count to move to, when a correction is warranted and sane.
    pub corrected_kills: Option<u64>,
}

impl Assessment {
    pub fn kill_delta(&self, current_kills: u64) -> Option<i64> {
        self.corrected_kills
            .map(|corrected| corrected as i64 - current_kills as i64)
    }
}

pub fn assess(anchor: Anchor, current_kills: u64, observed_xp: f64, rate: f64) -> Assessment {
    let kills_since_anchor = anchor.kills_since(current_kills);
    let expected_xp = anchor.predicted_xp(current_kills, rate);
    let total_gain = observed_xp - anchor.xp;
    let expected_kills_from_xp = total_gain / rate;
    let xp_diff = (observed_xp - expected_xp).abs();
    let kill_diff = (kills_since_anchor as f64 - expected_kills_from_xp).abs();

    let drifted = xp_diff > TOLERANCE_RATE_MULTIPLE * rate
        && xp_diff < MAX_CORRECTABLE_XP_DIFF
        && kill_diff >= MIN_KILL_DIFF;

    let corrected_kills = if drifted {
        let corrected = anchor.kills as i64 + expected_kills_from_xp.round() as i64;
        let delta = corrected - current_kills as i64;
        (corrected >= 0 && delta.abs() < MAX_KILL_CORRECTION).then_some(corrected as u64)
    } else {
        None
    };

    Assessment {
        kills_since_anchor,
        expected_xp,
        total_gain,
        expected_kills_from_xp,
        xp_diff,
        kill_diff,
        corrected_kills,
    }
}
