use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure category surfaced on the status channel.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum ErrorCategory {
    FrameUnavailable,
    GroundTruthReadFailure,
    CalibrationAborted,
    ReconciliationSkipped,
    InvalidConfiguration,
    Rejected,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::FrameUnavailable => "FrameUnavailable",
            ErrorCategory::GroundTruthReadFailure => "GroundTruthReadFailure",
            ErrorCategory::CalibrationAborted => "CalibrationAborted",
            ErrorCategory::ReconciliationSkipped => "ReconciliationSkipped",
            ErrorCategory::InvalidConfiguration => "InvalidConfiguration",
            ErrorCategory::Rejected => "Rejected",
        }
    }
}

/// Every failure the telemetry core can produce. All of them are local: the
/// caller logs, publishes, and carries on with the next cycle.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TelemetryError {
    #[error("frame unavailable: {0}")]
    FrameUnavailable(String),

    #[error("ground-truth read failed: {0}")]
    GroundTruthReadFailure(String),

    #[error("calibration aborted: {0}")]
    CalibrationAborted(String),

    #[error("reconciliation skipped: {0}")]
    ReconciliationSkipped(String),

    #[error("invalid configuration for {field}: {reason}")]
    InvalidConfiguration { field: &'static str, reason: String },

    #[error("a calibration run is already active")]
    CalibrationInProgress,

    #[error("cannot switch tracking mode while tracking is active")]
    ModeLocked,

    #[error("tracking is not active")]
    NotTracking,

    #[error("tracking is already active")]
    AlreadyTracking,

    #[error("operation not available in {0} mode")]
    WrongMode(&'static str),
}

impl TelemetryError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            TelemetryError::FrameUnavailable(_) => ErrorCategory::FrameUnavailable,
            TelemetryError::GroundTruthReadFailure(_) => ErrorCategory::GroundTruthReadFailure,
            TelemetryError::CalibrationAborted(_) => ErrorCategory::CalibrationAborted,
            TelemetryError::ReconciliationSkipped(_) => ErrorCategory::ReconciliationSkipped,
            TelemetryError::InvalidConfiguration { .. } => ErrorCategory::InvalidConfiguration,
            TelemetryError::CalibrationInProgress
            | TelemetryError::ModeLocked
            | TelemetryError::NotTracking
            | TelemetryError::AlreadyTracking
            | TelemetryError::WrongMode(_) => ErrorCategory::Rejected,
        }
    }

    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        TelemetryError::InvalidConfiguration {
            field,
            reason: reason.into(),
        }
    }
}

pub type TelemetryResult<T> = Result<T, TelemetryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_rejections_share_a_category() {
        assert_eq!(
            TelemetryError::CalibrationInProgress.category(),
            ErrorCategory::Rejected
        );
        assert_eq!(TelemetryError::ModeLocked.category(), ErrorCategory::Rejected);
        assert_eq!(
            TelemetryError::GroundTruthReadFailure("empty reply".into()).category(),
            ErrorCategory::GroundTruthReadFailure
        );
    }

    #[test]
    fn invalid_configuration_names_the_field() {
        let err = TelemetryError::invalid("diffTrigger", "must be in (0, 1)");
        assert_eq!(
            err.to_string(),
            "invalid configuration for diffTrigger: must be in (0, 1)"
        );
    }
}
