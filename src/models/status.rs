use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ErrorCategory, TelemetryError};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", tag = "type", content = "category")]
pub enum StatusKind {
    Info,
    Kill,
    Correction,
    WithinTolerance,
    LevelUp,
    Calibration,
    Stopped,
    Failure(ErrorCategory),
}

/// One entry on the operator-facing status channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StatusEvent {
    pub at: DateTime<Utc>,
    pub kind: StatusKind,
    pub message: String,
}

impl StatusEvent {
    pub fn new(kind: StatusKind, message: impl Into<String>) -> Self {
        Self {
            at: Utc::now(),
            kind,
            message: message.into(),
        }
    }

    pub fn failure(err: &TelemetryError) -> Self {
        Self::new(StatusKind::Failure(err.category()), err.to_string())
    }
}
