use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", tag = "verdict")]
pub enum ReconcileVerdict {
    Corrected { kill_delta: i64, xp_adjustment: f64 },
    WithinTolerance,
    LevelUp,
}

/// Diagnostic entry for one reconciliation tick. Not authoritative state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReconciliationRecord {
    pub session_id: String,
    pub at: DateTime<Utc>,
    pub observed_xp: f64,
    pub expected_xp: f64,
    pub kills_before: u64,
    pub kills_after: u64,
    pub verdict: ReconcileVerdict,
}

impl ReconciliationRecord {
    pub fn correction(&self) -> Option<i64> {
        match self.verdict {
            ReconcileVerdict::Corrected { kill_delta, .. } => Some(kill_delta),
            _ => None,
        }
    }
}
