//! Poll-only kill inference for multi-target play.

use std::time::Duration;

use tokio::time::Instant;

use super::level_up::{is_level_up, RECONCILE_LOW_WATERMARK};

/// Deltas at or below this are read noise.
pub const NOISE_FLOOR: f64 = 0.001;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AreaStep {
    /// No previous value to compare against.
    Baseline,
    LevelUp,
    Idle { delta: f64 },
    Kills { mobs: u64, delta: f64, xp_per_mob: f64 },
}

/// Compare two consecutive polls. A negative delta is taken as exactly one
/// wraparound.
pub fn step(previous: Option<f64>, current: f64, rate_per_mob: f64) -> AreaStep {
    let Some(previous) = previous else {
        return AreaStep::Baseline;
    };

    if is_level_up(previous, current, RECONCILE_LOW_WATERMARK) {
        return AreaStep::LevelUp;
    }

    let mut delta = current - previous;
    if delta < 0.0 {
        delta += 100.0;
    }

    if delta <= NOISE_FLOOR || !(rate_per_mob > 0.0) {
        return AreaStep::Idle { delta };
    }

    let mobs = (delta / rate_per_mob).round();
    if mobs < 1.0 || !mobs.is_finite() {
        return AreaStep::Idle { delta };
    }
    let mobs = mobs as u64;

    AreaStep::Kills {
        mobs,
        delta,
        xp_per_mob: delta / mobs as f64,
    }
}

/// The last `keep` of `count` timestamps spread evenly inside
/// `(since, now]`. The final one lands on `now`.
pub fn spread_timestamps(since: Instant, now: Instant, count: u64, keep: u64) -> Vec<Instant> {
    if count == 0 {
        return Vec::new();
    }
    let span = now.saturating_duration_since(since);
    let step = span.as_nanos() / count as u128;
    let first = count - keep.min(count) + 1;
    (first..=count)
        .map(|i| {
            let offset = step * (count - i) as u128;
            now - Duration::from_nanos(offset.min(u64::MAX as u128) as u64)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_poll_is_a_baseline() {
        assert_eq!(step(None, 40.0, 0.05), AreaStep::Baseline);
    }

    #[test]
    fn gain_becomes_mob_count() {
        match step(Some(20.0), 21.0, 0.05) {
            AreaStep::Kills {
                mobs,
                delta,
                xp_per_mob,
            } => {
                assert_eq!(mobs, 20);
                assert!((delta - 1.0).abs() < 1e-9);
                assert!((xp_per_mob - 0.05).abs() < 1e-9);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn negative_delta_assumes_one_wrap() {
        // 90 -> 5 is not classified as a level-up (5 < 30 but 90 is not > 90)
        match step(Some(90.0), 5.0, 0.05) {
            AreaStep::Kills { mobs, delta, .. } => {
                assert!((delta - 15.0).abs() < 1e-9);
                assert_eq!(mobs, 300);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn high_to_low_is_a_level_up() {
        assert_eq!(step(Some(95.0), 3.0, 0.05), AreaStep::LevelUp);
    }

    #[test]
    fn noise_registers_nothing() {
        assert!(matches!(step(Some(20.0), 20.0005, 0.05), AreaStep::Idle { .. }));
        // under half a mob rounds to zero
        assert!(matches!(step(Some(20.0), 20.02, 0.05), AreaStep::Idle { .. }));
    }

    #[test]
    fn timestamps_spread_across_interval() {
        let t0 = Instant::now();
        let now = t0 + Duration::from_secs(25);
        let stamps = spread_timestamps(t0, now, 5, 5);
        assert_eq!(stamps.len(), 5);
        assert_eq!(stamps[0], t0 + Duration::from_secs(5));
        assert_eq!(stamps[4], now);
        assert!(stamps.windows(2).all(|w| w[0] < w[1]));

        let tail = spread_timestamps(t0, now, 300, 2);
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[1], now);
        assert!(tail[0] < now);
    }
}
