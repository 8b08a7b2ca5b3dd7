use std::convert::TryFrom;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};

use crate::models::{ReconcileVerdict, StopReason, TrackingMode};

pub fn to_i64(value: u64) -> Result<i64> {
    i64::try_from(value).map_err(|_| anyhow!("value {value} exceeds SQLite INTEGER range"))
}

pub fn to_u64(value: i64, field: &str) -> Result<u64> {
    u64::try_from(value).map_err(|_| anyhow!("{field} contains negative value {value}"))
}

pub fn to_u32(value: i64, field: &str) -> Result<u32> {
    u32::try_from(value).map_err(|_| anyhow!("{field} contains out-of-range value {value}"))
}

pub fn parse_datetime(value: &str, field: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("failed to parse {field}"))
}

pub fn parse_mode(value: &str) -> Result<TrackingMode> {
    match value {
        "SINGLE" => Ok(TrackingMode::SingleTarget),
        "AREA" => Ok(TrackingMode::Area),
        other => Err(anyhow!("unknown tracking mode {other}")),
    }
}

pub fn encode_stop_reason(reason: &StopReason) -> Result<String> {
    serde_json::to_string(reason).context("failed to encode stop reason")
}

pub fn parse_stop_reason(value: &str) -> Result<StopReason> {
    serde_json::from_str(value).with_context(|| format!("failed to parse stop reason {value}"))
}

/// Column triple `(verdict, kill_delta, xp_adjustment)` for a verdict.
pub fn split_verdict(verdict: &ReconcileVerdict) -> (&'static str, Option<i64>, Option<f64>) {
    match *verdict {
        ReconcileVerdict::Corrected {
            kill_delta,
            xp_adjustment,
        } => ("corrected", Some(kill_delta), Some(xp_adjustment)),
        ReconcileVerdict::WithinTolerance => ("within_tolerance", None, None),
        ReconcileVerdict::LevelUp => ("level_up", None, None),
    }
}

pub fn join_verdict(
    verdict: &str,
    kill_delta: Option<i64>,
    xp_adjustment: Option<f64>,
) -> Result<ReconcileVerdict> {
    match verdict {
        "corrected" => Ok(ReconcileVerdict::Corrected {
            kill_delta: kill_delta.ok_or_else(|| anyhow!("corrected row without kill_delta"))?,
            xp_adjustment: xp_adjustment.unwrap_or(0.0),
        }),
        "within_tolerance" => Ok(ReconcileVerdict::WithinTolerance),
        "level_up" => Ok(ReconcileVerdict::LevelUp),
        other => Err(anyhow!("unknown reconciliation verdict {other}")),
    }
}
