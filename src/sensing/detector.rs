//! Cheap kill-candidate signal from consecutive region reductions.
//!
//! The detector knows nothing about what changed. Any large enough change,
//! outside the cooldown window, is a candidate; later stages decide whether
//! the count it produces can be trusted.

use std::time::Duration;

use tokio::time::Instant;

use super::frame::LumaFrame;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DetectorVerdict {
    /// First frame, or the reduction changed shape. Nothing to compare against.
    Primed,
    Quiet { diff: f64 },
    /// Above trigger but inside the cooldown window.
    Cooling { diff: f64 },
    Candidate { diff: f64 },
}

impl DetectorVerdict {
    pub fn is_candidate(&self) -> bool {
        matches!(self, DetectorVerdict::Candidate { .. })
    }
}

#[derive(Debug, Clone)]
pub struct ChangeDetector {
    trigger: f64,
    cooldown: Duration,
    previous: Option<LumaFrame>,
    last_accepted: Option<Instant>,
}

impl ChangeDetector {
    pub fn new(trigger: f64, cooldown: Duration) -> Self {
        Self {
            trigger,
            cooldown,
            previous: None,
            last_accepted: None,
        }
    }

    pub fn set_params(&mut self, trigger: f64, cooldown: Duration) {
        self.trigger = trigger;
        self.cooldown = cooldown;
    }

    pub fn reset(&mut self) {
        self.previous = None;
        self.last_accepted = None;
    }

    pub fn observe(&mut self, frame: LumaFrame, now: Instant) -> DetectorVerdict {
        let verdict = match &self.previous {
            Some(prev) if prev.same_shape(&frame) => {
                let diff = prev.normalized_diff(&frame);
                if diff <= self.trigger {
                    DetectorVerdict::Quiet { diff }
                } else if self.cooldown_elapsed(now) {
                    self.last_accepted = Some(now);
                    DetectorVerdict::Candidate { diff }
                } else {
                    DetectorVerdict::Cooling { diff }
                }
            }
            _ => DetectorVerdict::Primed,
        };

        self.previous = Some(frame);
        verdict
    }

    fn cooldown_elapsed(&self, now: Instant) -> bool {
        self.last_accepted
            .map(|at| now.saturating_duration_since(at) > self.cooldown)
            .unwrap_or(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat(value: u8) -> LumaFrame {
        LumaFrame {
            width: 96,
            height: 22,
            pixels: vec![value; 96 * 22],
        }
    }

    fn detector() -> ChangeDetector {
        ChangeDetector::new(0.065, Duration::from_millis(800))
    }

    #[test]
    fn first_frame_never_signals() {
        let mut det = detector();
        assert_eq!(det.observe(flat(255), Instant::now()), DetectorVerdict::Primed);
    }

    #[test]
    fn small_changes_never_signal() {
        let mut det = detector();
        let t0 = Instant::now();
        det.observe(flat(100), t0);
        // 16/255 ~ 0.063, just under trigger
        for step in 1..50u64 {
            let value = if step % 2 == 0 { 100 } else { 116 };
            let verdict = det.observe(flat(value), t0 + Duration::from_secs(step));
            assert!(!verdict.is_candidate(), "step {step}: {verdict:?}");
        }
    }

    #[test]
    fn cooldown_merges_close_changes() {
        let mut det = detector();
        let t0 = Instant::now();
        det.observe(flat(0), t0);

        assert!(det
            .observe(flat(255), t0 + Duration::from_millis(100))
            .is_candidate());
        assert!(matches!(
            det.observe(flat(0), t0 + Duration::from_millis(600)),
            DetectorVerdict::Cooling { .. }
        ));
    }

    #[test]
    fn changes_past_cooldown_both_signal() {
        let mut det = detector();
        let t0 = Instant::now();
        det.observe(flat(0), t0);

        assert!(det
            .observe(flat(255), t0 + Duration::from_millis(100))
            .is_candidate());
        assert!(det
            .observe(flat(0), t0 + Duration::from_millis(1000))
            .is_candidate());
    }

    #[test]
    fn shape_change_reprimes() {
        let mut det = detector();
        let t0 = Instant::now();
        det.observe(flat(0), t0);
        let odd = LumaFrame {
            width: 10,
            height: 2,
            pixels: vec![255; 20],
        };
        assert_eq!(
            det.observe(odd, t0 + Duration::from_secs(2)),
            DetectorVerdict::Primed
        );
    }
}
