use std::sync::Arc;

use chrono::Utc;
use tokio::{
    sync::{broadcast, Mutex},
    task::JoinHandle,
    time::{self, Duration, Instant},
};
use tokio_util::sync::CancellationToken;

use crate::{
    config::{ConfigPatch, TrackerConfig},
    db::SessionArchive,
    error::{TelemetryError, TelemetryResult},
    ground_truth::{GroundTruthReader, InFlight, InFlightTicket},
    models::{
        GroundTruthSample, ReadPurpose, ReconcileVerdict, ReconciliationRecord, SessionRecord,
        StatusEvent, StatusKind, StopReason, TrackingMode,
    },
    sensing::FrameSource,
    settings::SettingsStore,
};

use super::{
    area::AreaStep,
    calibration::{CalibrationKind, CalibrationRun},
    level_up,
    state::{CalibrationCompletion, CandidateOutcome, EngineState, SampleOutcome, TrackerSnapshot},
    tasks,
};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info, log_warn};

pub(super) const CAPTURE_TIMEOUT: Duration = Duration::from_secs(2);
const READ_TIMEOUT: Duration = Duration::from_secs(30);
const STATUS_CAPACITY: usize = 256;

/// Periodic tasks owned by one tracking window.
struct TaskSet {
    token: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl TaskSet {
    fn cancel(self) {
        self.token.cancel();
        for handle in self.handles {
            handle.abort();
        }
    }
}

/// Drives one tracked target. Cheap to clone; every clone shares the same
/// engine state, tasks and status channel.
#[derive(Clone)]
pub struct TrackerController {
    state: Arc<Mutex<EngineState>>,
    frames: Arc<dyn FrameSource>,
    reader: Arc<dyn GroundTruthReader>,
    archive: Arc<dyn SessionArchive>,
    settings: Option<Arc<SettingsStore>>,
    status: broadcast::Sender<StatusEvent>,
    in_flight: Arc<InFlight>,
    // Lock order: `tasks` before `state`.
    tasks: Arc<Mutex<Option<TaskSet>>>,
}

impl TrackerController {
    pub fn new(
        config: TrackerConfig,
        frames: Arc<dyn FrameSource>,
        reader: Arc<dyn GroundTruthReader>,
        archive: Arc<dyn SessionArchive>,
    ) -> Self {
        let (config, rejected) = config.validated();
        for err in &rejected {
            log_warn!("configuration value replaced with default: {err}");
        }
        let (status, _) = broadcast::channel(STATUS_CAPACITY);

        Self {
            state: Arc::new(Mutex::new(EngineState::new(config))),
            frames,
            reader,
            archive,
            settings: None,
            status,
            in_flight: InFlight::new(),
            tasks: Arc::new(Mutex::new(None)),
        }
    }

    /// Configuration comes from, and calibrated rates go back to, `settings`.
    pub fn with_settings(
        settings: Arc<SettingsStore>,
        frames: Arc<dyn FrameSource>,
        reader: Arc<dyn GroundTruthReader>,
        archive: Arc<dyn SessionArchive>,
    ) -> Self {
        let mut controller = Self::new(settings.tracker(), frames, reader, archive);
        controller.settings = Some(settings);
        controller
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.status.subscribe()
    }

    pub async fn snapshot(&self) -> TrackerSnapshot {
        self.state.lock().await.snapshot(Instant::now())
    }

    pub async fn config(&self) -> TrackerConfig {
        self.state.lock().await.config.clone()
    }

    pub async fn start(&self) -> TelemetryResult<()> {
        let mut slot = self.tasks.lock().await;

        let (epoch, mode, needs_seed, config) = {
            let mut state = self.state.lock().await;
            if state.tracking {
                return Err(TelemetryError::AlreadyTracking);
            }
            let epoch = state.begin_tracking(Instant::now());
            let mode = state.mode();
            let needs_seed =
                mode == TrackingMode::SingleTarget && state.session.start_xp.is_none();
            (epoch, mode, needs_seed, state.config.clone())
        };

        if let Some(stale) = slot.take() {
            stale.cancel();
        }

        let token = CancellationToken::new();
        let mut handles = Vec::with_capacity(3);
        match mode {
            TrackingMode::SingleTarget => {
                handles.push(tokio::spawn(tasks::sampler_loop(
                    self.clone(),
                    epoch,
                    config.sample_interval(),
                    token.clone(),
                )));
                handles.push(tokio::spawn(tasks::reconciliation_loop(
                    self.clone(),
                    epoch,
                    config.reconcile_interval(),
                    token.clone(),
                )));
            }
            TrackingMode::Area => {
                handles.push(tokio::spawn(tasks::area_poll_loop(
                    self.clone(),
                    epoch,
                    config.area_poll_interval(),
                    token.clone(),
                )));
            }
        }
        handles.push(tokio::spawn(tasks::idle_watchdog(
            self.clone(),
            epoch,
            token.clone(),
        )));
        *slot = Some(TaskSet { token, handles });
        drop(slot);

        if needs_seed {
            let controller = self.clone();
            tokio::spawn(async move { controller.seed_session(epoch).await });
        }

        self.publish(StatusEvent::new(
            StatusKind::Info,
            format!("tracking started ({})", mode.as_str()),
        ));
        Ok(())
    }

    pub async fn pause(&self) -> TelemetryResult<Option<SessionRecord>> {
        self.stop(StopReason::Paused).await
    }

    /// Cancel every periodic task, attempt one final read, then finalize and
    /// archive the session.
    pub async fn stop(&self, reason: StopReason) -> TelemetryResult<Option<SessionRecord>> {
        let mut tasks = self.tasks.lock().await;
        {
            let mut state = self.state.lock().await;
            if !state.tracking {
                return Err(TelemetryError::NotTracking);
            }
            state.end_tracking(Instant::now());
            self.abandon_bracket(&mut state, "tracking stopped");
        }
        if let Some(running) = tasks.take() {
            running.cancel();
        }

        let record = self.wind_down(reason, true).await;
        Ok(record)
    }

    /// Archive whatever the session holds and zero it. The calibrated rate
    /// is configuration and survives.
    pub async fn reset(&self) -> TelemetryResult<Option<SessionRecord>> {
        let mut tasks = self.tasks.lock().await;
        let was_tracking = {
            let mut state = self.state.lock().await;
            let was_tracking = state.tracking;
            state.end_tracking(Instant::now());
            was_tracking
        };
        if let Some(running) = tasks.take() {
            running.cancel();
        }

        let record = self.wind_down(StopReason::Reset, was_tracking).await;
        self.state.lock().await.reset(Instant::now());
        Ok(record)
    }

    pub async fn set_mode(&self, mode: TrackingMode) -> TelemetryResult<()> {
        self.state.lock().await.set_mode(mode)?;
        self.publish(StatusEvent::new(
            StatusKind::Info,
            format!("mode set to {}", mode.as_str()),
        ));
        Ok(())
    }

    pub async fn set_notes(&self, notes: impl Into<String>) {
        self.state.lock().await.session.notes = notes.into();
    }

    /// Merge `patch` into the live configuration and the settings store.
    /// Rejected fields are returned and published; interval changes apply
    /// from the next start.
    pub async fn update_config(&self, patch: &ConfigPatch) -> Vec<TelemetryError> {
        let rejected = {
            let mut state = self.state.lock().await;
            let mut config = state.config.clone();
            let rejected = config.apply(patch);
            state.set_config(config);
            rejected
        };

        if let Some(settings) = &self.settings {
            if let Err(err) = settings.update_tracker(patch) {
                log_error!("failed to persist configuration: {err:?}");
            }
        }

        for err in &rejected {
            self.publish_failure(err);
        }
        rejected
    }

    /// Open a bracketed single-target run. Tracking starts if it is not
    /// already running.
    pub async fn start_calibration(&self, kind: CalibrationKind) -> TelemetryResult<CalibrationRun> {
        if kind == CalibrationKind::Area {
            return self.start_area_calibration().await;
        }
        self.precheck_calibration().await?;

        let ticket = self
            .in_flight
            .try_begin(ReadPurpose::Calibration)
            .ok_or(TelemetryError::CalibrationInProgress)?;
        let sample = self
            .read_ground_truth(&ticket)
            .await
            .map_err(|err| self.calibration_aborted("opening read failed", err))?;
        drop(ticket);

        let (run, displaced, tracking) = {
            let mut state = self.state.lock().await;
            let now = Instant::now();
            let displaced = match kind {
                CalibrationKind::Fresh => state.finalize(now, StopReason::Calibrated),
                _ => None,
            };
            let run = state.begin_calibration(kind, sample, now)?;
            (run, displaced, state.tracking)
        };

        if let Some(record) = displaced {
            self.archive_record(&record).await;
        }

        self.publish(StatusEvent::new(
            StatusKind::Calibration,
            format!(
                "calibration started at {:.4}%, kill {} more",
                run.start_xp,
                run.kills_remaining(run.start_kills).unwrap_or(0)
            ),
        ));

        if !tracking {
            match self.start().await {
                Ok(()) | Err(TelemetryError::AlreadyTracking) => {}
                Err(err) => return Err(err),
            }
        }
        Ok(run)
    }

    /// Open an area run. The operator closes it with the number of mobs
    /// killed in between.
    pub async fn start_area_calibration(&self) -> TelemetryResult<CalibrationRun> {
        {
            let state = self.state.lock().await;
            if state.calibration.is_some() {
                return Err(TelemetryError::CalibrationInProgress);
            }
            if state.mode() != TrackingMode::Area {
                return Err(TelemetryError::WrongMode(state.mode().as_str()));
            }
        }

        let ticket = self
            .in_flight
            .try_begin(ReadPurpose::Calibration)
            .ok_or(TelemetryError::CalibrationInProgress)?;
        let sample = self
            .read_ground_truth(&ticket)
            .await
            .map_err(|err| self.calibration_aborted("opening read failed", err))?;
        drop(ticket);

        let (run, displaced) = {
            let mut state = self.state.lock().await;
            let now = Instant::now();
            let displaced = state.finalize(now, StopReason::Calibrated);
            let run = state.begin_calibration(CalibrationKind::Area, sample, now)?;
            (run, displaced)
        };
        if let Some(record) = displaced {
            self.archive_record(&record).await;
        }

        self.publish(StatusEvent::new(
            StatusKind::Calibration,
            format!("area calibration started at {:.4}%", run.start_xp),
        ));
        Ok(run)
    }

    pub async fn finish_area_calibration(&self, mobs: u64) -> TelemetryResult<f64> {
        let run_id = {
            let mut state = self.state.lock().await;
            match &state.calibration {
                Some(run) if run.kind == CalibrationKind::Area && run.is_collecting() => {}
                Some(_) => return Err(TelemetryError::CalibrationInProgress),
                None => {
                    return Err(TelemetryError::CalibrationAborted(
                        "no area calibration is active".into(),
                    ))
                }
            }
            state
                .claim_calibration_readout()
                .ok_or_else(|| TelemetryError::CalibrationAborted("run vanished".into()))?
        };

        match self.close_calibration(run_id, Some(mobs)).await? {
            CalibrationCompletion::Calibrated { rate, .. } => Ok(rate),
            CalibrationCompletion::Aborted(err) => Err(err),
            CalibrationCompletion::Stale => Err(TelemetryError::CalibrationAborted(
                "run was replaced before it closed".into(),
            )),
        }
    }

    /// Drop the active run without touching the rate.
    pub async fn cancel_calibration(&self) -> bool {
        let cancelled = {
            let mut state = self.state.lock().await;
            match state.calibration.as_ref().map(|run| run.id) {
                Some(id) => state.abort_calibration(id),
                None => false,
            }
        };
        if cancelled {
            self.publish(StatusEvent::new(
                StatusKind::Calibration,
                "calibration cancelled",
            ));
        }
        cancelled
    }

    async fn precheck_calibration(&self) -> TelemetryResult<()> {
        let state = self.state.lock().await;
        if state.calibration.is_some() {
            return Err(TelemetryError::CalibrationInProgress);
        }
        if state.mode() != TrackingMode::SingleTarget {
            return Err(TelemetryError::WrongMode(state.mode().as_str()));
        }
        Ok(())
    }

    fn abandon_bracket(&self, state: &mut EngineState, why: &str) {
        let Some(run) = state.calibration.as_ref() else {
            return;
        };
        if run.kind == CalibrationKind::Area {
            return;
        }
        let id = run.id;
        if state.abort_calibration(id) {
            self.publish_failure(&TelemetryError::CalibrationAborted(why.to_string()));
        }
    }

    fn calibration_aborted(&self, step: &str, err: TelemetryError) -> TelemetryError {
        self.publish_failure(&err);
        let aborted = TelemetryError::CalibrationAborted(format!("{step}: {err}"));
        self.publish_failure(&aborted);
        aborted
    }

    // ---- reads -----------------------------------------------------------

    /// Capture the region and ask the oracle. The ticket proves the caller
    /// holds the in-flight slot for its purpose.
    async fn read_ground_truth(&self, ticket: &InFlightTicket) -> TelemetryResult<GroundTruthSample> {
        let image = match time::timeout(CAPTURE_TIMEOUT, self.frames.capture()).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(TelemetryError::FrameUnavailable(format!(
                    "capture exceeded {}ms",
                    CAPTURE_TIMEOUT.as_millis()
                )))
            }
        };
        let kills_at_capture = self.state.lock().await.session.kills;

        let started = Instant::now();
        let reading = match time::timeout(READ_TIMEOUT, self.reader.read(&image)).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(TelemetryError::GroundTruthReadFailure(format!(
                    "no answer within {}s",
                    READ_TIMEOUT.as_secs()
                )))
            }
        };
        log_debug!(
            "{} read {:.4}% via {:?} in {}ms",
            ticket.purpose().as_str(),
            reading.percent,
            reading.method,
            started.elapsed().as_millis()
        );

        GroundTruthSample::new(Utc::now(), reading.percent, reading.method, kills_at_capture)
    }

    /// Acquire the slot for `purpose` and read. `None` when another read for
    /// the same purpose is still outstanding. Failures are logged and
    /// published before they are returned.
    async fn guarded_read(&self, purpose: ReadPurpose) -> Option<TelemetryResult<GroundTruthSample>> {
        let Some(ticket) = self.in_flight.try_begin(purpose) else {
            log_debug!("{} read already in flight, skipping", purpose.as_str());
            return None;
        };
        let result = self.read_ground_truth(&ticket).await;
        if let Err(err) = &result {
            log_warn!("{} read failed: {err}", purpose.as_str());
            self.publish_failure(err);
        }
        Some(result)
    }

    async fn seed_session(&self, epoch: u64) {
        let Some(Ok(sample)) = self.guarded_read(ReadPurpose::Reconciliation).await else {
            return;
        };

        let fresh = {
            let mut state = self.state.lock().await;
            if !state.is_current(epoch) {
                return;
            }
            state.seed_session_start(sample)
        };
        if fresh {
            self.publish(StatusEvent::new(
                StatusKind::Info,
                format!("session starts at {:.4}%", sample.percent),
            ));
            self.report_outside_progress(sample.percent);
        }
    }

    fn report_outside_progress(&self, current: f64) {
        let Some(previous_end) = self.settings.as_ref().and_then(|s| s.last_session_end_xp())
        else {
            return;
        };
        if let Some(progress) = level_up::outside_progress(previous_end, current) {
            self.publish(StatusEvent::new(
                StatusKind::LevelUp,
                format!(
                    "{} level(s) gained outside tracking (+{:.2}%)",
                    progress.level_ups, progress.xp_gained
                ),
            ));
        }
    }

    // ---- task callbacks --------------------------------------------------

    pub(super) fn frames(&self) -> &Arc<dyn FrameSource> {
        &self.frames
    }

    pub(super) fn state(&self) -> &Arc<Mutex<EngineState>> {
        &self.state
    }

    pub(super) async fn is_current(&self, epoch: u64) -> bool {
        self.state.lock().await.is_current(epoch)
    }

    /// First failure of a streak; the sampler stays quiet until capture
    /// recovers.
    pub(super) fn report_capture_failure(&self, err: &TelemetryError) {
        self.publish_failure(err);
    }

    pub(super) fn on_candidate(&self, epoch: u64, outcome: CandidateOutcome) {
        self.publish(StatusEvent::new(
            StatusKind::Kill,
            format!("kill {} (+{:.4}%)", outcome.kills, outcome.kill.xp),
        ));

        if let Some(run_id) = outcome.calibration_due {
            let controller = self.clone();
            tokio::spawn(async move {
                if let Err(err) = controller.close_calibration(run_id, None).await {
                    log_debug!("calibration run {run_id} not closed: {err}");
                }
            });
        }
        if outcome.level_check_due {
            let controller = self.clone();
            tokio::spawn(async move { controller.level_check(epoch).await });
        }
    }

    pub(super) async fn reconcile_tick(&self, epoch: u64) {
        if self.state.lock().await.calibration.is_some() {
            log_debug!("reconciliation deferred while calibrating");
            return;
        }
        let sample = match self.guarded_read(ReadPurpose::Reconciliation).await {
            Some(Ok(sample)) => sample,
            Some(Err(err)) => {
                self.publish_failure(&TelemetryError::ReconciliationSkipped(err.to_string()));
                return;
            }
            None => return,
        };

        let outcome = {
            let mut state = self.state.lock().await;
            if !state.is_current(epoch) || state.calibration.is_some() {
                return;
            }
            state.apply_reconciliation(sample)
        };

        match outcome {
            SampleOutcome::Seeded => {
                log_info!("reconciliation anchor seeded at {:.4}%", sample.percent);
            }
            SampleOutcome::Reconciled(record) => {
                self.publish_reconciliation(&record);
                self.log_reconciliation(&record).await;
            }
            SampleOutcome::LevelUp {
                record,
                recalibration,
            } => {
                self.publish_level_up(sample.percent, recalibration.as_ref());
                if let Some(record) = record {
                    self.log_reconciliation(&record).await;
                }
            }
            SampleOutcome::Reanchored | SampleOutcome::Area { .. } => {}
        }
    }

    async fn level_check(&self, epoch: u64) {
        let Some(Ok(sample)) = self.guarded_read(ReadPurpose::LevelCheck).await else {
            return;
        };

        let outcome = {
            let mut state = self.state.lock().await;
            if !state.is_current(epoch) || state.calibration.is_some() {
                return;
            }
            state.apply_level_check(sample)
        };

        if let SampleOutcome::LevelUp { recalibration, .. } = outcome {
            self.publish_level_up(sample.percent, recalibration.as_ref());
        } else {
            log_debug!("level check re-anchored at {:.4}%", sample.percent);
        }
    }

    pub(super) async fn area_poll_tick(&self, epoch: u64) {
        if self.state.lock().await.calibration.is_some() {
            log_debug!("area poll deferred while calibrating");
            return;
        }
        let Some(Ok(sample)) = self.guarded_read(ReadPurpose::AreaPoll).await else {
            return;
        };

        let (outcome, fresh) = {
            let mut state = self.state.lock().await;
            if !state.is_current(epoch) || state.calibration.is_some() {
                return;
            }
            let outcome = state.apply_area_poll(sample, Instant::now());
            let fresh = state.seed_session_start(sample);
            (outcome, fresh)
        };
        if fresh {
            self.report_outside_progress(sample.percent);
        }

        if let SampleOutcome::Area { step, kills } = outcome {
            match step {
                AreaStep::Kills { delta, .. } => {
                    self.publish(StatusEvent::new(
                        StatusKind::Kill,
                        format!("{kills} mobs inferred from +{delta:.4}%"),
                    ));
                }
                AreaStep::LevelUp => self.publish_level_up(sample.percent, None),
                AreaStep::Idle { delta } => {
                    log_debug!("area poll: no progress (+{delta:.4}%)");
                }
                AreaStep::Baseline => {
                    log_info!("area baseline {:.4}%", sample.percent);
                }
            }
        }
    }

    /// Close bracket `run_id` with a fresh read. A closing read that is
    /// already outstanding refuses the call and leaves the run alone; a read
    /// that fails abandons the run.
    async fn close_calibration(
        &self,
        run_id: u64,
        mobs: Option<u64>,
    ) -> TelemetryResult<CalibrationCompletion> {
        let Some(ticket) = self.in_flight.try_begin(ReadPurpose::Calibration) else {
            log_debug!("calibration run {run_id} already has a closing read in flight");
            return Err(TelemetryError::CalibrationInProgress);
        };
        let sample = match self.read_ground_truth(&ticket).await {
            Ok(sample) => sample,
            Err(err) => {
                let aborted = self.state.lock().await.abort_calibration(run_id);
                let err = if aborted {
                    self.calibration_aborted("closing read failed", err)
                } else {
                    TelemetryError::CalibrationAborted(format!("closing read failed: {err}"))
                };
                return Err(err);
            }
        };
        drop(ticket);

        let mut tasks = self.tasks.lock().await;
        let (completion, config) = {
            let mut state = self.state.lock().await;
            let completion = state.complete_calibration(run_id, sample, mobs, Instant::now());
            (completion, state.config.clone())
        };

        match &completion {
            CalibrationCompletion::Stale => {
                log_debug!("calibration run {run_id} closed after it was replaced");
            }
            CalibrationCompletion::Aborted(err) => self.publish_failure(err),
            CalibrationCompletion::Calibrated {
                kind,
                rate,
                bracket_kills,
                bracket_xp,
            } => {
                log_info!(
                    "calibrated {kind:?}: {bracket_xp:.4}% over {bracket_kills} -> {rate:.6} per kill"
                );
                self.publish(StatusEvent::new(
                    StatusKind::Calibration,
                    format!("calibrated at {rate:.4}% per kill ({bracket_kills} in bracket)"),
                ));
                self.persist_rate(*kind, *rate);

                if *kind == CalibrationKind::Fresh {
                    if let Some(running) = tasks.take() {
                        running.cancel();
                    }
                    drop(tasks);
                    if config.auto_start_after_calibration {
                        if let Err(err) = self.start().await {
                            log_warn!("auto-start after calibration refused: {err}");
                        }
                    } else {
                        self.publish(StatusEvent::new(
                            StatusKind::Stopped,
                            StopReason::Calibrated.describe(),
                        ));
                    }
                }
            }
        }
        Ok(completion)
    }

    fn persist_rate(&self, kind: CalibrationKind, rate: f64) {
        let Some(settings) = &self.settings else {
            return;
        };
        let patch = match kind {
            CalibrationKind::Area => ConfigPatch {
                xp_per_mob: Some(rate),
                ..Default::default()
            },
            _ => ConfigPatch {
                xp_per_kill: Some(rate),
                ..Default::default()
            },
        };
        match settings.update_tracker(&patch) {
            Ok(rejected) => {
                for err in rejected {
                    log_warn!("calibrated rate not persisted: {err}");
                }
            }
            Err(err) => log_error!("failed to persist calibrated rate: {err:?}"),
        }
    }

    pub(super) async fn idle_check(&self, epoch: u64) -> bool {
        let idle = {
            let state = self.state.lock().await;
            if !state.is_current(epoch) {
                return true;
            }
            state.idle_exceeded(Instant::now())
        };
        let Some(idle) = idle else {
            return false;
        };

        log_info!("no kills for {}s, stopping", idle.as_secs());
        // Stopping cancels the watchdog itself, so it runs detached.
        let controller = self.clone();
        tokio::spawn(async move {
            let reason = StopReason::IdleTimeout {
                idle_secs: idle.as_secs(),
            };
            if let Err(err) = controller.stop(reason).await {
                log_debug!("idle stop raced another stop: {err}");
            }
        });
        true
    }

    // ---- finalization ----------------------------------------------------

    async fn wind_down(&self, reason: StopReason, final_read: bool) -> Option<SessionRecord> {
        if final_read {
            if let Some(Ok(sample)) = self.guarded_read(ReadPurpose::Final).await {
                self.state.lock().await.last_reading = Some(sample);
            }
        }

        let (record, end_xp) = {
            let state = self.state.lock().await;
            (
                state.finalize(Instant::now(), reason.clone()),
                state.last_reading.map(|sample| sample.percent),
            )
        };

        if let Some(record) = &record {
            self.archive_record(record).await;
        }
        if let (Some(settings), Some(end_xp)) = (&self.settings, end_xp) {
            if let Err(err) = settings.set_last_session_end_xp(end_xp) {
                log_error!("failed to persist session end XP: {err:?}");
            }
        }

        self.publish(StatusEvent::new(StatusKind::Stopped, reason.describe()));
        record
    }

    async fn archive_record(&self, record: &SessionRecord) {
        match self.archive.archive_session(record).await {
            Ok(()) => log_info!(
                "archived session {} ({} kills, {:.4}%)",
                record.id,
                record.kills,
                record.xp_sum
            ),
            Err(err) => log_error!("failed to archive session {}: {err:?}", record.id),
        }
    }

    async fn log_reconciliation(&self, record: &ReconciliationRecord) {
        if let Err(err) = self.archive.record_reconciliation(record).await {
            log_warn!("failed to store reconciliation record: {err:?}");
        }
    }

    // ---- status ----------------------------------------------------------

    fn publish(&self, event: StatusEvent) {
        log_debug!("status {:?}: {}", event.kind, event.message);
        // No subscribers is fine.
        let _ = self.status.send(event);
    }

    fn publish_failure(&self, err: &TelemetryError) {
        self.publish(StatusEvent::failure(err));
    }

    fn publish_reconciliation(&self, record: &ReconciliationRecord) {
        let event = match record.verdict {
            ReconcileVerdict::Corrected { kill_delta, .. } => StatusEvent::new(
                StatusKind::Correction,
                format!(
                    "corrected {} -> {} kills ({kill_delta:+}), observed {:.4}% vs expected {:.4}%",
                    record.kills_before, record.kills_after, record.observed_xp, record.expected_xp
                ),
            ),
            ReconcileVerdict::WithinTolerance => StatusEvent::new(
                StatusKind::WithinTolerance,
                format!(
                    "within tolerance: observed {:.4}% vs expected {:.4}%",
                    record.observed_xp, record.expected_xp
                ),
            ),
            ReconcileVerdict::LevelUp => return,
        };
        self.publish(event);
    }

    fn publish_level_up(&self, observed: f64, recalibration: Option<&CalibrationRun>) {
        self.publish(StatusEvent::new(
            StatusKind::LevelUp,
            format!("level up, re-anchored at {observed:.4}%"),
        ));
        if let Some(run) = recalibration {
            self.publish(StatusEvent::new(
                StatusKind::Calibration,
                format!(
                    "recalibrating over the next {} kills",
                    run.kills_remaining(run.start_kills).unwrap_or(0)
                ),
            ));
        }
    }
}
