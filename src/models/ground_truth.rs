use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TelemetryError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ReadMethod {
    Vision,
    Ocr,
    OcrSegmented,
    Scripted,
}

/// Why a ground-truth read was issued. At most one read per purpose may be
/// outstanding at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ReadPurpose {
    Calibration,
    Reconciliation,
    AreaPoll,
    LevelCheck,
    Final,
}

impl ReadPurpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReadPurpose::Calibration => "calibration",
            ReadPurpose::Reconciliation => "reconciliation",
            ReadPurpose::AreaPoll => "area poll",
            ReadPurpose::LevelCheck => "level check",
            ReadPurpose::Final => "final read",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GroundTruthSample {
    pub at: DateTime<Utc>,
    pub percent: f64,
    pub method: ReadMethod,
    pub kills_at_capture: u64,
}

impl GroundTruthSample {
    /// Values outside [0, 100] are failed reads, never samples.
    pub fn new(
        at: DateTime<Utc>,
        percent: f64,
        method: ReadMethod,
        kills_at_capture: u64,
    ) -> Result<Self, TelemetryError> {
        if !percent.is_finite() || !(0.0..=100.0).contains(&percent) {
            return Err(TelemetryError::GroundTruthReadFailure(format!(
                "{percent} is outside 0-100"
            )));
        }
        Ok(Self {
            at,
            percent,
            method,
            kills_at_capture,
        })
    }
}

/// Last point where the cheap estimate and ground truth agreed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Anchor {
    pub kills: u64,
    pub xp: f64,
}

impl Anchor {
    pub fn new(kills: u64, xp: f64) -> Self {
        Self { kills, xp }
    }

    pub fn kills_since(&self, current_kills: u64) -> u64 {
        current_kills.saturating_sub(self.kills)
    }

    /// XP percentage projected from this anchor at `rate` per kill.
    pub fn predicted_xp(&self, current_kills: u64, rate: f64) -> f64 {
        self.xp + self.kills_since(current_kills) as f64 * rate
    }
}
