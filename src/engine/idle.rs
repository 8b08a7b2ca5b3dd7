use std::time::Duration;

use tokio::time::Instant;

pub const IDLE_CHECK_INTERVAL: Duration = Duration::from_secs(5);

/// How long tracking has gone without a kill, if that exceeds `timeout`.
/// `last_activity` is the latest kill, or the moment tracking started.
pub fn idle_for(last_activity: Instant, now: Instant, timeout: Duration) -> Option<Duration> {
    let idle = now.saturating_duration_since(last_activity);
    (idle > timeout).then_some(idle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exceeds_only_past_timeout() {
        let t0 = Instant::now();
        let timeout = Duration::from_secs(60);
        assert_eq!(idle_for(t0, t0 + Duration::from_secs(60), timeout), None);
        assert_eq!(
            idle_for(t0, t0 + Duration::from_secs(61), timeout),
            Some(Duration::from_secs(61))
        );
    }
}
