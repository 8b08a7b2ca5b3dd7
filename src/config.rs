//! Bounded tracker configuration.
//!
//! Values arrive from the settings collaborator or from the operator as a
//! [`ConfigPatch`]. Every field is checked here regardless of where it came
//! from; a rejected field keeps its previous value and the rest of the patch
//! still applies.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::TelemetryError;

pub const MIN_TEMPO_WINDOW: usize = 5;
pub const MAX_TEMPO_WINDOW: usize = 200;
pub const DEFAULT_TEMPO_WINDOW: usize = 50;
pub const MIN_CALIBRATION_KILLS: u32 = 1;
pub const MAX_CALIBRATION_KILLS: u32 = 20;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct TrackerConfig {
    /// XP percentage attributed to one single-target kill.
    pub xp_per_kill: f64,
    pub diff_trigger: f64,
    pub diff_cooldown_ms: u64,
    pub sample_interval_ms: u64,
    pub reconcile_interval_secs: u64,
    pub idle_timeout_secs: u64,
    pub idle_auto_stop: bool,
    pub tempo_window: usize,
    pub area_poll_interval_secs: u64,
    /// XP percentage attributed to one mob in area mode.
    pub xp_per_mob: f64,
    pub calibration_kills: u32,
    pub auto_start_after_calibration: bool,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            xp_per_kill: 0.05,
            diff_trigger: 0.065,
            diff_cooldown_ms: 800,
            sample_interval_ms: 180,
            reconcile_interval_secs: 300,
            idle_timeout_secs: 60,
            idle_auto_stop: true,
            tempo_window: DEFAULT_TEMPO_WINDOW,
            area_poll_interval_secs: 25,
            xp_per_mob: 0.05,
            calibration_kills: 3,
            auto_start_after_calibration: true,
        }
    }
}

/// Partial update. `None` leaves the field untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ConfigPatch {
    pub xp_per_kill: Option<f64>,
    pub diff_trigger: Option<f64>,
    pub diff_cooldown_ms: Option<i64>,
    pub sample_interval_ms: Option<u64>,
    pub reconcile_interval_secs: Option<u64>,
    pub idle_timeout_secs: Option<u64>,
    pub idle_auto_stop: Option<bool>,
    pub tempo_window: Option<usize>,
    pub area_poll_interval_secs: Option<u64>,
    pub xp_per_mob: Option<f64>,
    pub calibration_kills: Option<i64>,
    pub auto_start_after_calibration: Option<bool>,
}

fn check_rate(field: &'static str, value: f64) -> Result<f64, TelemetryError> {
    if value.is_finite() && value > 0.0 && value <= 100.0 {
        Ok(value)
    } else {
        Err(TelemetryError::invalid(field, format!("{value} is not in (0, 100]")))
    }
}

fn check_range<T>(field: &'static str, value: T, min: T, max: T) -> Result<T, TelemetryError>
where
    T: PartialOrd + Copy + std::fmt::Display,
{
    if value >= min && value <= max {
        Ok(value)
    } else {
        Err(TelemetryError::invalid(
            field,
            format!("{value} is outside {min}..={max}"),
        ))
    }
}

fn check_diff_trigger(value: f64) -> Result<f64, TelemetryError> {
    if value.is_finite() && value > 0.0 && value < 1.0 {
        Ok(value)
    } else {
        Err(TelemetryError::invalid(
            "diffTrigger",
            format!("{value} is not in (0, 1)"),
        ))
    }
}

fn check_cooldown(value: i64) -> Result<u64, TelemetryError> {
    u64::try_from(value)
        .map_err(|_| TelemetryError::invalid("diffCooldownMs", format!("{value} is negative")))
}

/// Operator input for the bracket size is clamped, never rejected.
pub fn clamp_calibration_kills(value: i64) -> u32 {
    value.clamp(MIN_CALIBRATION_KILLS as i64, MAX_CALIBRATION_KILLS as i64) as u32
}

impl TrackerConfig {
    /// Merge `patch` into `self`. Returns one error per rejected field.
    pub fn apply(&mut self, patch: &ConfigPatch) -> Vec<TelemetryError> {
        let mut rejected = Vec::new();

        macro_rules! merge {
            ($field:ident, $check:expr) => {
                if let Some(raw) = patch.$field {
                    match $check(raw) {
                        Ok(value) => self.$field = value,
                        Err(err) => rejected.push(err),
                    }
                }
            };
        }

        merge!(xp_per_kill, |v| check_rate("xpPerKill", v));
        merge!(diff_trigger, check_diff_trigger);
        merge!(diff_cooldown_ms, check_cooldown);
        merge!(sample_interval_ms, |v| check_range("sampleIntervalMs", v, 50, 2_000));
        merge!(reconcile_interval_secs, |v| check_range(
            "reconcileIntervalSecs",
            v,
            30,
            3_600
        ));
        merge!(idle_timeout_secs, |v| check_range("idleTimeoutSecs", v, 10, 600));
        merge!(tempo_window, |v| check_range(
            "tempoWindow",
            v,
            MIN_TEMPO_WINDOW,
            MAX_TEMPO_WINDOW
        ));
        merge!(area_poll_interval_secs, |v| check_range(
            "areaPollIntervalSecs",
            v,
            10,
            60
        ));
        merge!(xp_per_mob, |v| check_rate("xpPerMob", v));

        if let Some(v) = patch.idle_auto_stop {
            self.idle_auto_stop = v;
        }
        if let Some(v) = patch.auto_start_after_calibration {
            self.auto_start_after_calibration = v;
        }
        if let Some(v) = patch.calibration_kills {
            self.calibration_kills = clamp_calibration_kills(v);
        }

        rejected
    }

    /// Re-check a configuration that was deserialized from storage. Fields out
    /// of domain fall back to their defaults.
    pub fn validated(self) -> (Self, Vec<TelemetryError>) {
        let mut config = Self::default();
        let patch = ConfigPatch {
            xp_per_kill: Some(self.xp_per_kill),
            diff_trigger: Some(self.diff_trigger),
            diff_cooldown_ms: i64::try_from(self.diff_cooldown_ms).ok(),
            sample_interval_ms: Some(self.sample_interval_ms),
            reconcile_interval_secs: Some(self.reconcile_interval_secs),
            idle_timeout_secs: Some(self.idle_timeout_secs),
            idle_auto_stop: Some(self.idle_auto_stop),
            tempo_window: Some(self.tempo_window),
            area_poll_interval_secs: Some(self.area_poll_interval_secs),
            xp_per_mob: Some(self.xp_per_mob),
            calibration_kills: Some(self.calibration_kills as i64),
            auto_start_after_calibration: Some(self.auto_start_after_calibration),
        };
        let rejected = config.apply(&patch);
        (config, rejected)
    }

    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms)
    }

    pub fn diff_cooldown(&self) -> Duration {
        Duration::from_millis(self.diff_cooldown_ms)
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_secs)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn area_poll_interval(&self) -> Duration {
        Duration::from_secs(self.area_poll_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejected_fields_keep_previous_value() {
        let mut config = TrackerConfig::default();
        let patch = ConfigPatch {
            diff_trigger: Some(1.5),
            diff_cooldown_ms: Some(-10),
            idle_timeout_secs: Some(120),
            ..Default::default()
        };

        let rejected = config.apply(&patch);

        assert_eq!(rejected.len(), 2);
        assert_eq!(config.diff_trigger, 0.065);
        assert_eq!(config.diff_cooldown_ms, 800);
        assert_eq!(config.idle_timeout_secs, 120);
    }

    #[test]
    fn rate_must_stay_positive() {
        let mut config = TrackerConfig::default();
        let rejected = config.apply(&ConfigPatch {
            xp_per_kill: Some(0.0),
            xp_per_mob: Some(f64::NAN),
            ..Default::default()
        });
        assert_eq!(rejected.len(), 2);
        assert!(config.xp_per_kill > 0.0);
        assert!(config.xp_per_mob > 0.0);
    }

    #[test]
    fn calibration_kills_are_clamped() {
        let mut config = TrackerConfig::default();
        assert!(config
            .apply(&ConfigPatch {
                calibration_kills: Some(99),
                ..Default::default()
            })
            .is_empty());
        assert_eq!(config.calibration_kills, 20);

        config.apply(&ConfigPatch {
            calibration_kills: Some(0),
            ..Default::default()
        });
        assert_eq!(config.calibration_kills, 1);
    }

    #[test]
    fn stored_values_out_of_domain_fall_back_to_defaults() {
        let stored: TrackerConfig = serde_json::from_str(
            r#"{"tempoWindow": 1000, "areaPollIntervalSecs": 30, "diffTrigger": 0}"#,
        )
        .unwrap();

        let (config, rejected) = stored.validated();

        assert_eq!(rejected.len(), 2);
        assert_eq!(config.tempo_window, DEFAULT_TEMPO_WINDOW);
        assert_eq!(config.diff_trigger, 0.065);
        assert_eq!(config.area_poll_interval_secs, 30);
    }
}
