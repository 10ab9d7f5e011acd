//! Per-frame monitor loop.
//!
//! The monitor owns a landmark source, a classifier and a *local* session
//! aggregator, and runs on its own thread at the source frame rate:
//!
//! 1. read the canonical session's `(is_tracking, epoch)`; restart or stop
//!    the local aggregate when they changed
//! 2. pull one frame, classify it, fold the verdict into the local aggregate
//! 3. every `sync_interval`, push the local aggregate into the shared session
//!
//! The shared session is only touched for short in-memory calls. The loop
//! never blocks on network I/O.

use anyhow::{anyhow, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::classify::{AttentionClassifier, Verdict};
use crate::geometry::DEFAULT_ERROR_MARGIN;
use crate::session::SessionAggregator;
use crate::source::{frame_interval, LandmarkSource};
use crate::sync::{SharedSession, StatsPatch, SyncError};

#[derive(Clone, Debug)]
pub struct MonitorConfig {
    pub error_margin: f32,
    pub target_fps: u32,
    /// How often the local aggregate is pushed to the shared session.
    pub sync_interval: Duration,
    /// Sleep between retries after a failed frame read.
    pub retry_backoff: Duration,
    /// Consecutive read failures before the monitor gives up.
    pub max_read_failures: u32,
    /// Sleep to hold `target_fps`. Off for recorded sources replayed in tests.
    pub pace: bool,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            error_margin: DEFAULT_ERROR_MARGIN,
            target_fps: 30,
            sync_interval: Duration::from_secs(5),
            retry_backoff: Duration::from_millis(500),
            max_read_failures: 20,
            pace: true,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MonitorStats {
    pub frames_read: u64,
    pub frames_classified: u64,
    pub pushes: u64,
    pub read_failures: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Step {
    /// A frame was read. Carries the verdict when a session is tracking.
    Processed(Option<Verdict>),
    /// The source has no more frames.
    Exhausted,
}

pub struct FrameMonitor {
    cfg: MonitorConfig,
    classifier: AttentionClassifier,
    source: Box<dyn LandmarkSource>,
    session: SharedSession,
    local: SessionAggregator,
    epoch: Option<u64>,
    /// Local start of the current epoch.
    joined_at: Option<Instant>,
    /// Source time that maps onto `joined_at`.
    anchor: Option<Instant>,
    last_push: Option<Instant>,
    stats: MonitorStats,
}

impl FrameMonitor {
    pub fn new(cfg: MonitorConfig, source: Box<dyn LandmarkSource>, session: SharedSession) -> Self {
        Self {
            classifier: AttentionClassifier::with_margin(cfg.error_margin),
            cfg,
            source,
            session,
            local: SessionAggregator::new(),
            epoch: None,
            joined_at: None,
            anchor: None,
            last_push: None,
            stats: MonitorStats::default(),
        }
    }

    pub fn stats(&self) -> &MonitorStats {
        &self.stats
    }

    pub fn local(&self) -> &SessionAggregator {
        &self.local
    }

    /// Follow start/stop/reset on the shared session.
    fn sync_control(&mut self) {
        let (tracking, epoch) = self.session.control();
        if tracking && self.epoch != Some(epoch) {
            let now = Instant::now();
            self.local.start(now);
            self.epoch = Some(epoch);
            self.joined_at = Some(now);
            self.anchor = None;
            self.last_push = Some(now);
            log::debug!("monitor joined session epoch {}", epoch);
        } else if !tracking && self.local.is_tracking() {
            self.local.stop();
            log::debug!("monitor local aggregate frozen");
        }
    }

    /// Maps a source timestamp onto the local session clock.
    ///
    /// Recorded sources stamp frames relative to when they were opened, which
    /// can be long before the session started. The first frame of an epoch is
    /// placed one frame interval after the local start; later frames keep
    /// their spacing on the source clock.
    fn session_time(&mut self, source_time: Instant) -> Instant {
        let interval = frame_interval(self.cfg.target_fps);
        let joined_at = *self.joined_at.get_or_insert(source_time);
        let anchor = *self
            .anchor
            .get_or_insert_with(|| source_time.checked_sub(interval).unwrap_or(source_time));
        joined_at + source_time.saturating_duration_since(anchor)
    }

    /// Process one frame.
    pub fn step(&mut self) -> Result<Step> {
        self.sync_control();

        let Some(frame) = self.source.next_frame()? else {
            return Ok(Step::Exhausted);
        };
        self.stats.frames_read += 1;
        if !self.local.is_tracking() {
            return Ok(Step::Processed(None));
        }

        let timestamp = self.session_time(frame.timestamp);
        let verdict = self.classifier.classify(frame.landmarks.as_ref(), timestamp);
        self.local.record(&verdict);
        self.stats.frames_classified += 1;

        let due = self
            .last_push
            .map_or(true, |at| timestamp.saturating_duration_since(at) >= self.cfg.sync_interval);
        if due {
            self.flush();
            self.last_push = Some(timestamp);
        }
        Ok(Step::Processed(Some(verdict)))
    }

    /// Push the local aggregate to the shared session now.
    pub fn flush(&mut self) {
        if !self.local.is_tracking() {
            return;
        }
        match self.session.push(StatsPatch::from_state(self.local.state())) {
            Ok(_) => self.stats.pushes += 1,
            Err(SyncError::NotTracking) => {
                log::debug!("session stopped before push; dropping local stats");
            }
            Err(err) => log::warn!("stats push rejected: {}", err),
        }
    }

    pub fn spawn(self) -> Result<MonitorHandle> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let reset = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let reset_thread = reset.clone();
        let join = std::thread::Builder::new()
            .name("frame-monitor".to_string())
            .spawn(move || self.run(shutdown_thread, reset_thread))?;
        Ok(MonitorHandle {
            shutdown,
            reset,
            join: Some(join),
        })
    }

    /// Runs until shutdown, source exhaustion, or too many read failures.
    pub fn run(mut self, shutdown: Arc<AtomicBool>, reset: Arc<AtomicBool>) -> Result<MonitorStats> {
        let interval = frame_interval(self.cfg.target_fps);
        let mut failures = 0u32;
        log::info!(
            "frame monitor reading {} at {} fps (margin {:.2})",
            self.source.name(),
            self.cfg.target_fps,
            self.cfg.error_margin
        );

        while !shutdown.load(Ordering::SeqCst) {
            if reset.swap(false, Ordering::SeqCst) && !self.session.reset() {
                log::info!("reset requested while not tracking; ignored");
            }

            let started = Instant::now();
            match self.step() {
                Ok(Step::Exhausted) => {
                    log::info!("landmark source {} exhausted", self.source.name());
                    break;
                }
                Ok(Step::Processed(_)) => failures = 0,
                Err(err) => {
                    failures += 1;
                    self.stats.read_failures += 1;
                    if failures >= self.cfg.max_read_failures {
                        self.flush();
                        return Err(anyhow!(
                            "landmark source {} failed {} times in a row: {}",
                            self.source.name(),
                            failures,
                            err
                        ));
                    }
                    log::warn!("failed to read frame, retrying: {}", err);
                    std::thread::sleep(self.cfg.retry_backoff);
                    continue;
                }
            }

            if self.cfg.pace {
                std::thread::sleep(interval.saturating_sub(started.elapsed()));
            }
        }

        self.flush();
        log::info!(
            "frame monitor stopped: frames={} classified={} pushes={}",
            self.stats.frames_read,
            self.stats.frames_classified,
            self.stats.pushes
        );
        Ok(self.stats)
    }
}

#[derive(Debug)]
pub struct MonitorHandle {
    shutdown: Arc<AtomicBool>,
    reset: Arc<AtomicBool>,
    join: Option<JoinHandle<Result<MonitorStats>>>,
}

impl MonitorHandle {
    /// Ask the loop to reset the running session's statistics.
    pub fn request_reset(&self) {
        self.reset.store(true, Ordering::SeqCst);
    }

    pub fn is_finished(&self) -> bool {
        self.join.as_ref().map_or(true, |join| join.is_finished())
    }

    pub fn stop(mut self) -> Result<MonitorStats> {
        self.shutdown.store(true, Ordering::SeqCst);
        match self.join.take() {
            Some(join) => join
                .join()
                .map_err(|_| anyhow!("frame monitor thread panicked"))?,
            None => Ok(MonitorStats::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionStatus;
    use crate::source::{synthetic_face, JsonlSource, LandmarkFrame, SyntheticSource};
    use std::io::Cursor;

    fn monitor(spec: &str, session: &SharedSession) -> FrameMonitor {
        let cfg = MonitorConfig {
            pace: false,
            sync_interval: Duration::from_secs(3600),
            ..MonitorConfig::default()
        };
        let source = SyntheticSource::from_spec(spec).expect("synthetic source");
        FrameMonitor::new(cfg, Box::new(source), session.clone())
    }

    #[test]
    fn idle_until_session_starts() -> Result<()> {
        let session = SharedSession::new();
        let mut monitor = monitor("attentive", &session);
        assert_eq!(monitor.step()?, Step::Processed(None));
        assert_eq!(monitor.stats().frames_classified, 0);
        assert_eq!(session.snapshot().total_frames, 0);
        Ok(())
    }

    #[test]
    fn pushes_local_aggregate() -> Result<()> {
        let session = SharedSession::new();
        session.start();
        let mut monitor = monitor("pattern/AAD", &session);
        for _ in 0..6 {
            monitor.step()?;
        }
        monitor.flush();
        let state = session.snapshot();
        assert_eq!(state.total_frames, 6);
        assert_eq!(state.attentive_frames, 4);
        assert_eq!(state.focus_cycles, 1);
        assert_eq!(state.current_status, SessionStatus::NotAttentive);
        Ok(())
    }

    #[test]
    fn restart_resets_local_aggregate() -> Result<()> {
        let session = SharedSession::new();
        session.start();
        let mut monitor = monitor("attentive", &session);
        for _ in 0..4 {
            monitor.step()?;
        }
        session.start();
        monitor.step()?;
        assert_eq!(monitor.local().state().total_frames, 1);
        Ok(())
    }

    #[test]
    fn stop_freezes_local_aggregate() -> Result<()> {
        let session = SharedSession::new();
        session.start();
        let mut monitor = monitor("attentive", &session);
        monitor.step()?;
        monitor.flush();
        session.stop();
        let frozen = session.snapshot();
        monitor.step()?;
        monitor.flush();
        assert!(!monitor.local().is_tracking());
        assert_eq!(session.snapshot(), frozen);
        Ok(())
    }

    #[test]
    fn thread_runs_until_source_exhausted() -> Result<()> {
        let session = SharedSession::new();
        session.start();
        let source = SyntheticSource::from_spec("pattern/AD")?.with_limit(10);
        let cfg = MonitorConfig {
            pace: false,
            ..MonitorConfig::default()
        };
        let handle = FrameMonitor::new(cfg, Box::new(source), session.clone()).spawn()?;
        while !handle.is_finished() {
            std::thread::sleep(Duration::from_millis(5));
        }
        let stats = handle.stop()?;
        assert_eq!(stats.frames_read, 10);
        assert_eq!(session.snapshot().total_frames, 10);
        assert_eq!(session.snapshot().attentive_frames, 5);
        Ok(())
    }

    /// Yields `healthy` attentive frames, then fails on every read.
    struct FailingSource {
        healthy: u32,
    }

    impl LandmarkSource for FailingSource {
        fn name(&self) -> &str {
            "failing"
        }

        fn next_frame(&mut self) -> Result<Option<LandmarkFrame>> {
            if self.healthy == 0 {
                return Err(anyhow!("camera unplugged"));
            }
            self.healthy -= 1;
            Ok(Some(LandmarkFrame {
                landmarks: Some(synthetic_face(0.5, 0.0)),
                timestamp: Instant::now(),
            }))
        }
    }

    fn failing_config() -> MonitorConfig {
        MonitorConfig {
            pace: false,
            retry_backoff: Duration::from_millis(1),
            max_read_failures: 3,
            ..MonitorConfig::default()
        }
    }

    #[test]
    fn gives_up_after_repeated_read_failures() {
        let monitor = FrameMonitor::new(
            failing_config(),
            Box::new(FailingSource { healthy: 0 }),
            SharedSession::new(),
        );
        let err = monitor
            .run(Arc::new(AtomicBool::new(false)), Arc::new(AtomicBool::new(false)))
            .unwrap_err();
        assert!(err.to_string().contains("3 times"), "{err}");
    }

    #[test]
    fn pushes_pending_frames_before_giving_up() {
        let session = SharedSession::new();
        session.start();
        let monitor = FrameMonitor::new(
            failing_config(),
            Box::new(FailingSource { healthy: 4 }),
            session.clone(),
        );
        assert!(monitor
            .run(Arc::new(AtomicBool::new(false)), Arc::new(AtomicBool::new(false)))
            .is_err());
        let state = session.snapshot();
        assert_eq!(state.total_frames, 4);
        assert_eq!(state.attentive_frames, 4);
    }

    #[test]
    fn recorded_frames_follow_a_late_session_start() -> Result<()> {
        let face = serde_json::to_string(&synthetic_face(0.5, 0.0))?;
        let recording: String = (1..=10)
            .map(|i| format!("{{\"t_ms\": {}, \"landmarks\": {}}}\n", i * 100, face))
            .collect();
        let source = JsonlSource::new("recording", Cursor::new(recording));

        // The session starts well after the recording was opened.
        std::thread::sleep(Duration::from_millis(150));
        let session = SharedSession::new();
        session.start();

        let cfg = MonitorConfig {
            pace: false,
            target_fps: 10,
            sync_interval: Duration::from_secs(3600),
            ..MonitorConfig::default()
        };
        let mut monitor = FrameMonitor::new(cfg, Box::new(source), session.clone());
        while monitor.step()? != Step::Exhausted {}
        monitor.flush();

        let state = session.snapshot();
        assert_eq!(state.total_frames, 10);
        assert_eq!(state.elapsed_time, Duration::from_secs(1));
        assert_eq!(state.attentive_time, Duration::from_secs(1));
        assert_eq!(state.distracted_time, Duration::ZERO);
        Ok(())
    }

    #[test]
    fn restart_re_anchors_recorded_clock() -> Result<()> {
        let recording: String = (1..=20)
            .map(|i| format!("{{\"t_ms\": {}}}\n", i * 100))
            .collect();
        let session = SharedSession::new();
        session.start();
        let cfg = MonitorConfig {
            pace: false,
            target_fps: 10,
            sync_interval: Duration::from_secs(3600),
            ..MonitorConfig::default()
        };
        let source = JsonlSource::new("recording", Cursor::new(recording));
        let mut monitor = FrameMonitor::new(cfg, Box::new(source), session.clone());
        for _ in 0..10 {
            monitor.step()?;
        }

        session.start();
        for _ in 0..5 {
            monitor.step()?;
        }
        monitor.flush();

        let state = session.snapshot();
        assert_eq!(state.total_frames, 5);
        assert_eq!(state.elapsed_time, Duration::from_millis(500));
        assert_eq!(state.distracted_time, Duration::from_millis(500));
        Ok(())
    }
}
