//! Periodic loops owned by one tracking window.
//!
//! Every loop selects on the window's cancellation token and re-checks its
//! epoch under the state lock, so a loop that outlives its window stops on
//! its own.

use tokio::time::{self, Duration, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::controller::{TrackerController, CAPTURE_TIMEOUT};
use super::idle::IDLE_CHECK_INTERVAL;
use crate::error::TelemetryError;

// The sampler runs every ~180ms; flip this off when it gets noisy.
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info, log_warn};

/// Frame capture and change detection. Never awaits a ground-truth read;
/// reads triggered here are spawned.
pub(super) async fn sampler_loop(
    controller: TrackerController,
    epoch: u64,
    period: Duration,
    cancel_token: CancellationToken,
) {
    let mut ticker = time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut capture_failing = false;

    log_info!("sampler started at {}ms", period.as_millis());
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let captured = match time::timeout(CAPTURE_TIMEOUT, controller.frames().capture()).await {
                    Ok(result) => result,
                    Err(_) => Err(TelemetryError::FrameUnavailable(format!(
                        "capture exceeded {}ms",
                        CAPTURE_TIMEOUT.as_millis()
                    ))),
                };
                // A failed capture is not a frame: the detector keeps its
                // previous one.
                let image = match captured {
                    Ok(image) => image,
                    Err(err) => {
                        if !capture_failing {
                            log_warn!("{err}");
                            controller.report_capture_failure(&err);
                            capture_failing = true;
                        }
                        continue;
                    }
                };
                if capture_failing {
                    log_info!("frame capture recovered");
                    capture_failing = false;
                }

                let frame = image.reduce();
                let outcome = {
                    let mut state = controller.state().lock().await;
                    if !state.is_current(epoch) {
                        break;
                    }
                    let (verdict, outcome) = state.observe_frame(frame, Instant::now());
                    if !verdict.is_candidate() {
                        log_debug!("sampler: {verdict:?}");
                    }
                    outcome
                };
                if let Some(outcome) = outcome {
                    controller.on_candidate(epoch, outcome);
                }
            }
            _ = cancel_token.cancelled() => {
                log_info!("sampler shutting down");
                break;
            }
        }
    }
}

/// First tick one full period after start.
pub(super) async fn reconciliation_loop(
    controller: TrackerController,
    epoch: u64,
    period: Duration,
    cancel_token: CancellationToken,
) {
    let mut ticker = time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if !controller.is_current(epoch).await {
                    break;
                }
                controller.reconcile_tick(epoch).await;
            }
            _ = cancel_token.cancelled() => {
                log_info!("reconciliation loop shutting down");
                break;
            }
        }
    }
}

/// First poll immediately; it establishes the baseline.
pub(super) async fn area_poll_loop(
    controller: TrackerController,
    epoch: u64,
    period: Duration,
    cancel_token: CancellationToken,
) {
    let mut ticker = time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if !controller.is_current(epoch).await {
                    break;
                }
                controller.area_poll_tick(epoch).await;
            }
            _ = cancel_token.cancelled() => {
                log_info!("area poller shutting down");
                break;
            }
        }
    }
}

pub(super) async fn idle_watchdog(
    controller: TrackerController,
    epoch: u64,
    cancel_token: CancellationToken,
) {
    let mut ticker = time::interval_at(Instant::now() + IDLE_CHECK_INTERVAL, IDLE_CHECK_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if controller.idle_check(epoch).await {
                    break;
                }
            }
            _ = cancel_token.cancelled() => {
                break;
            }
        }
    }
}
