//! Rolling "tempo": short-horizon pace over the most recent kills, as
//! opposed to the lifetime session average.

use std::collections::VecDeque;

use serde::Serialize;
use tokio::time::Instant;

use crate::config::{MAX_TEMPO_WINDOW, MIN_TEMPO_WINDOW};
use crate::models::KillEvent;

const MS_PER_HOUR: f64 = 3_600_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TempoStats {
    pub xp_per_hour: Option<f64>,
    pub kills_per_hour: Option<f64>,
    pub xp_per_kill: f64,
    pub avg_secs_per_kill: Option<f64>,
    pub window_len: usize,
}

/// Bounded log of the latest kill records.
#[derive(Debug, Clone)]
pub struct KillLog {
    records: VecDeque<KillEvent>,
    capacity: usize,
}

impl KillLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.clamp(MIN_TEMPO_WINDOW, MAX_TEMPO_WINDOW);
        Self {
            records: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, event: KillEvent) {
        while self.records.len() >= self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(event);
    }

    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity.clamp(MIN_TEMPO_WINDOW, MAX_TEMPO_WINDOW);
        while self.records.len() > self.capacity {
            self.records.pop_front();
        }
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn last(&self) -> Option<&KillEvent> {
        self.records.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &KillEvent> {
        self.records.iter()
    }

    /// `None` with no records. `session_start` anchors the single-record case
    /// and the degenerate case where every record shares one timestamp.
    pub fn tempo(&self, session_start: Option<Instant>) -> Option<TempoStats> {
        let first = self.records.front()?;
        let last = self.records.back()?;
        let count = self.records.len();

        if count == 1 {
            let elapsed_ms = session_start
                .map(|start| first.at.saturating_duration_since(start).as_millis() as f64)
                .unwrap_or(0.0);
            if elapsed_ms <= 0.0 {
                return Some(TempoStats {
                    xp_per_hour: None,
                    kills_per_hour: None,
                    xp_per_kill: first.xp,
                    avg_secs_per_kill: None,
                    window_len: 1,
                });
            }
            let hours = elapsed_ms / MS_PER_HOUR;
            return Some(TempoStats {
                xp_per_hour: Some(first.xp / hours),
                kills_per_hour: Some(1.0 / hours),
                xp_per_kill: first.xp,
                avg_secs_per_kill: Some(elapsed_ms / 1000.0),
                window_len: 1,
            });
        }

        let span_ms = last.at.saturating_duration_since(first.at).as_millis() as f64;
        let intervals = (count - 1) as f64;

        if span_ms <= 0.0 {
            let from_start_ms = session_start
                .map(|start| first.at.saturating_duration_since(start).as_millis() as f64)
                .unwrap_or(1000.0);
            let xp_total: f64 = self.records.iter().map(|k| k.xp).sum();
            let xp_per_kill = xp_total / count as f64;
            let per_kill_ms = from_start_ms / count as f64;
            if per_kill_ms <= 0.0 {
                return Some(TempoStats {
                    xp_per_hour: None,
                    kills_per_hour: None,
                    xp_per_kill,
                    avg_secs_per_kill: Some(0.0),
                    window_len: count,
                });
            }
            let hours = per_kill_ms / MS_PER_HOUR;
            return Some(TempoStats {
                xp_per_hour: Some(xp_per_kill / hours),
                kills_per_hour: Some(1.0 / hours),
                xp_per_kill,
                avg_secs_per_kill: Some(per_kill_ms / 1000.0),
                window_len: count,
            });
        }

        // The oldest record only marks where the window starts.
        let xp_gained: f64 = self.records.iter().skip(1).map(|k| k.xp).sum();
        let hours = span_ms / MS_PER_HOUR;

        Some(TempoStats {
            xp_per_hour: Some(xp_gained / hours),
            kills_per_hour: Some(intervals / hours),
            xp_per_kill: xp_gained / intervals,
            avg_secs_per_kill: Some(span_ms / intervals / 1000.0),
            window_len: count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::KillSource;
    use std::time::Duration;

    fn kill(start: Instant, secs: u64, xp: f64) -> KillEvent {
        KillEvent::new(start + Duration::from_secs(secs), xp, KillSource::DiffDetected)
    }

    #[test]
    fn empty_log_has_no_tempo() {
        assert!(KillLog::new(50).tempo(Some(Instant::now())).is_none());
    }

    #[test]
    fn single_kill_measures_from_session_start() {
        let t0 = Instant::now();
        let mut log = KillLog::new(50);
        log.push(kill(t0, 36, 0.1));

        let stats = log.tempo(Some(t0)).unwrap();
        assert!((stats.xp_per_hour.unwrap() - 10.0).abs() < 1e-9);
        assert!((stats.kills_per_hour.unwrap() - 100.0).abs() < 1e-9);
        assert_eq!(stats.avg_secs_per_kill, Some(36.0));
    }

    #[test]
    fn window_excludes_oldest_xp() {
        let t0 = Instant::now();
        let mut log = KillLog::new(50);
        log.push(kill(t0, 0, 5.0));
        log.push(kill(t0, 30, 0.1));
        log.push(kill(t0, 60, 0.1));

        let stats = log.tempo(Some(t0)).unwrap();
        // 0.2 XP over one minute
        assert!((stats.xp_per_hour.unwrap() - 12.0).abs() < 1e-9);
        assert!((stats.kills_per_hour.unwrap() - 120.0).abs() < 1e-9);
        assert!((stats.xp_per_kill - 0.1).abs() < 1e-12);
        assert_eq!(stats.avg_secs_per_kill, Some(30.0));
    }

    #[test]
    fn fifty_first_kill_evicts_oldest() {
        let t0 = Instant::now();
        let mut log = KillLog::new(50);
        log.push(kill(t0, 0, 99.0));
        for i in 1..=50 {
            log.push(kill(t0, i * 10, 0.05));
        }

        assert_eq!(log.len(), 50);
        assert!(log.iter().all(|k| k.xp == 0.05));
        let stats = log.tempo(Some(t0)).unwrap();
        assert_eq!(stats.window_len, 50);
        assert_eq!(stats.avg_secs_per_kill, Some(10.0));
    }

    #[test]
    fn shrinking_capacity_trims_front() {
        let t0 = Instant::now();
        let mut log = KillLog::new(50);
        for i in 0..20 {
            log.push(kill(t0, i, 0.05));
        }
        log.set_capacity(5);
        assert_eq!(log.len(), 5);
        assert_eq!(log.iter().next().unwrap().at, t0 + Duration::from_secs(15));

        log.set_capacity(1_000);
        assert_eq!(log.capacity(), 200);
    }

    #[test]
    fn simultaneous_records_fall_back_to_session_start() {
        let t0 = Instant::now();
        let mut log = KillLog::new(50);
        for _ in 0..4 {
            log.push(kill(t0, 40, 0.25));
        }
        let stats = log.tempo(Some(t0)).unwrap();
        assert_eq!(stats.avg_secs_per_kill, Some(10.0));
        assert!((stats.xp_per_kill - 0.25).abs() < 1e-12);
        assert!((stats.kills_per_hour.unwrap() - 360.0).abs() < 1e-9);
    }
}
