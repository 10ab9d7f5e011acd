//! Synchronization surface.
//!
//! `SharedSession` owns the canonical `SessionState` behind a single mutex.
//! Both the frame monitor and the API server hold clones of the handle; the
//! state itself is never reachable without going through the guard:
//!
//! ```compile_fail
//! use attention_tracker::SharedSession;
//!
//! let session = SharedSession::new();
//! let _ = session.inner;
//! ```
//!
//! `push` accepts a `StatsPatch`, a schema-validated subset of the wire
//! fields. Patches are fully parsed before the lock is taken, so a rejected
//! update leaves the canonical state untouched and an accepted one is applied
//! in one critical section.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::classify::Verdict;
use crate::session::{SessionAggregator, SessionState, SessionStatus};

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
    #[error("invalid field `{field}`: {reason}")]
    InvalidField { field: String, reason: String },
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
    #[error("session is not tracking")]
    NotTracking,
}

impl SyncError {
    fn invalid(field: &str, reason: &str) -> Self {
        SyncError::InvalidField {
            field: field.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Stable machine-readable kind for the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            SyncError::InvalidField { .. } => "invalid_field",
            SyncError::InvalidPayload(_) => "invalid_payload",
            SyncError::NotTracking => "not_tracking",
        }
    }
}

// ----------------------------------------------------------------------------
// Presentation form
// ----------------------------------------------------------------------------

/// Formats a duration as `HH:MM:SS`, truncating sub-second precision.
/// Hours keep growing past 99 rather than wrapping.
pub fn format_hms(duration: Duration) -> String {
    let secs = duration.as_secs();
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}

/// Parses `HH:MM:SS` (hours may have more than two digits).
pub fn parse_hms(value: &str) -> Option<Duration> {
    let mut parts = value.split(':');
    let (h, m, s) = (parts.next()?, parts.next()?, parts.next()?);
    if parts.next().is_some() {
        return None;
    }
    let digits = |p: &str| !p.is_empty() && p.bytes().all(|b| b.is_ascii_digit());
    if !digits(h) || m.len() != 2 || s.len() != 2 || !digits(m) || !digits(s) {
        return None;
    }
    let (h, m, s): (u64, u64, u64) = (h.parse().ok()?, m.parse().ok()?, s.parse().ok()?);
    if m >= 60 || s >= 60 {
        return None;
    }
    Some(Duration::from_secs(h.checked_mul(3600)?.checked_add(m * 60 + s)?))
}

/// Wire view of `SessionState`, returned by `get_stats`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StatsView {
    pub is_tracking: bool,
    pub elapsed_time: String,
    pub attentive_time: String,
    pub distracted_time: String,
    pub attentiveness: f64,
    pub attentive_frames: u64,
    pub total_frames: u64,
    pub focus_cycles: u64,
    pub current_status: SessionStatus,
}

impl From<&SessionState> for StatsView {
    fn from(state: &SessionState) -> Self {
        Self {
            is_tracking: state.is_tracking,
            elapsed_time: format_hms(state.elapsed_time),
            attentive_time: format_hms(state.attentive_time),
            distracted_time: format_hms(state.distracted_time),
            attentiveness: state.attentiveness,
            attentive_frames: state.attentive_frames,
            total_frames: state.total_frames,
            focus_cycles: state.focus_cycles,
            current_status: state.current_status,
        }
    }
}

// ----------------------------------------------------------------------------
// StatsPatch: validated partial update
// ----------------------------------------------------------------------------

/// Fields a pusher may overwrite. `None` leaves the canonical value as is.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StatsPatch {
    pub elapsed_time: Option<Duration>,
    pub attentive_time: Option<Duration>,
    pub distracted_time: Option<Duration>,
    pub attentiveness: Option<f64>,
    pub attentive_frames: Option<u64>,
    pub total_frames: Option<u64>,
    pub focus_cycles: Option<u64>,
    pub current_status: Option<SessionStatus>,
}

impl StatsPatch {
    /// Full patch carrying every counter of a locally aggregated session.
    pub fn from_state(state: &SessionState) -> Self {
        Self {
            elapsed_time: Some(state.elapsed_time),
            attentive_time: Some(state.attentive_time),
            distracted_time: Some(state.distracted_time),
            attentiveness: Some(state.attentiveness),
            attentive_frames: Some(state.attentive_frames),
            total_frames: Some(state.total_frames),
            focus_cycles: Some(state.focus_cycles),
            current_status: match state.current_status {
                SessionStatus::Attentive | SessionStatus::NotAttentive => {
                    Some(state.current_status)
                }
                _ => None,
            },
        }
    }

    /// Validates a JSON object field by field. Unknown fields are rejected.
    pub fn from_json(value: &Value) -> Result<Self, SyncError> {
        let object = value
            .as_object()
            .ok_or_else(|| SyncError::InvalidPayload("expected a JSON object".to_string()))?;
        Self::from_map(object)
    }

    fn from_map(object: &Map<String, Value>) -> Result<Self, SyncError> {
        let mut patch = StatsPatch::default();
        for (key, value) in object {
            match key.as_str() {
                // Echoed by clients; tracking is only toggled by start/stop.
                "is_tracking" => match value.as_bool() {
                    Some(true) => {}
                    Some(false) => {
                        return Err(SyncError::invalid(key, "use stop_tracking to stop a session"))
                    }
                    None => return Err(SyncError::invalid(key, "expected a boolean")),
                },
                "elapsed_time" => patch.elapsed_time = Some(duration_field(key, value)?),
                "attentive_time" => patch.attentive_time = Some(duration_field(key, value)?),
                "distracted_time" => patch.distracted_time = Some(duration_field(key, value)?),
                "attentiveness" => {
                    let pct = value
                        .as_f64()
                        .ok_or_else(|| SyncError::invalid(key, "expected a number"))?;
                    if !(0.0..=100.0).contains(&pct) {
                        return Err(SyncError::invalid(key, "must be within 0..=100"));
                    }
                    patch.attentiveness = Some(pct);
                }
                "attentive_frames" => patch.attentive_frames = Some(count_field(key, value)?),
                "total_frames" => patch.total_frames = Some(count_field(key, value)?),
                "focus_cycles" => patch.focus_cycles = Some(count_field(key, value)?),
                "current_status" => {
                    let status = match value.as_str() {
                        Some("Attentive") => SessionStatus::Attentive,
                        Some("Not Attentive") => SessionStatus::NotAttentive,
                        Some(_) => {
                            return Err(SyncError::invalid(
                                key,
                                "expected \"Attentive\" or \"Not Attentive\"",
                            ))
                        }
                        None => return Err(SyncError::invalid(key, "expected a string")),
                    };
                    patch.current_status = Some(status);
                }
                _ => return Err(SyncError::invalid(key, "unknown field")),
            }
        }
        Ok(patch)
    }

    pub fn is_empty(&self) -> bool {
        *self == StatsPatch::default()
    }

    /// Field-wise overwrite. No recomputation: the pusher already aggregated.
    pub fn apply_to(&self, state: &mut SessionState) {
        if let Some(v) = self.elapsed_time {
            state.elapsed_time = v;
        }
        if let Some(v) = self.attentive_time {
            state.attentive_time = v;
        }
        if let Some(v) = self.distracted_time {
            state.distracted_time = v;
        }
        if let Some(v) = self.attentiveness {
            state.attentiveness = v.clamp(0.0, 100.0);
        }
        if let Some(v) = self.attentive_frames {
            state.attentive_frames = v;
        }
        if let Some(v) = self.total_frames {
            state.total_frames = v;
        }
        if let Some(v) = self.focus_cycles {
            state.focus_cycles = v;
        }
        if let Some(v) = self.current_status {
            state.current_status = v;
        }
    }
}

fn duration_field(key: &str, value: &Value) -> Result<Duration, SyncError> {
    value
        .as_str()
        .and_then(parse_hms)
        .ok_or_else(|| SyncError::invalid(key, "expected an HH:MM:SS string"))
}

fn count_field(key: &str, value: &Value) -> Result<u64, SyncError> {
    value
        .as_u64()
        .ok_or_else(|| SyncError::invalid(key, "expected a non-negative integer"))
}

// ----------------------------------------------------------------------------
// SharedSession
// ----------------------------------------------------------------------------

#[derive(Debug, Default)]
struct Inner {
    aggregator: SessionAggregator,
    /// Bumped on every start/reset.
    epoch: u64,
}

/// Cloneable handle to the canonical session state.
#[derive(Clone, Debug, Default)]
pub struct SharedSession {
    inner: Arc<Mutex<Inner>>,
}

impl SharedSession {
    pub fn new() -> Self {
        Self::default()
    }

    // Writes never leave partial state behind, so a poisoned guard is still consistent.
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Resets and begins a session. Returns the fresh zeroed state.
    pub fn start(&self) -> SessionState {
        self.start_at(Instant::now())
    }

    pub fn start_at(&self, now: Instant) -> SessionState {
        let state = {
            let mut inner = self.lock();
            inner.aggregator.start(now);
            inner.epoch += 1;
            inner.aggregator.snapshot()
        };
        log::info!("tracking session started");
        state
    }

    /// Freezes the session. Safe to call when already stopped.
    pub fn stop(&self) {
        let was_tracking = {
            let mut inner = self.lock();
            let was_tracking = inner.aggregator.is_tracking();
            inner.aggregator.stop();
            was_tracking
        };
        if was_tracking {
            log::info!("tracking session stopped");
        }
    }

    /// Restarts the running session in place. Returns false while stopped.
    pub fn reset(&self) -> bool {
        let reset = {
            let mut inner = self.lock();
            let reset = inner.aggregator.reset(Instant::now());
            if reset {
                inner.epoch += 1;
            }
            reset
        };
        if reset {
            log::info!("tracking session statistics reset");
        }
        reset
    }

    /// Merges a pre-validated patch. Rejected while the session is stopped.
    pub fn push(&self, patch: StatsPatch) -> Result<SessionState, SyncError> {
        let mut inner = self.lock();
        if !inner.aggregator.is_tracking() {
            return Err(SyncError::NotTracking);
        }
        patch.apply_to(inner.aggregator.state_mut());
        Ok(inner.aggregator.snapshot())
    }

    /// Validates a raw JSON payload and merges it. All-or-nothing.
    pub fn push_json(&self, payload: &Value) -> Result<SessionState, SyncError> {
        let patch = StatsPatch::from_json(payload)?;
        self.push(patch)
    }

    /// Folds one verdict into the canonical state.
    pub fn record(&self, verdict: &Verdict) {
        self.lock().aggregator.record(verdict);
    }

    pub fn snapshot(&self) -> SessionState {
        self.lock().aggregator.snapshot()
    }

    pub fn view(&self) -> StatsView {
        StatsView::from(&self.snapshot())
    }

    pub fn epoch(&self) -> u64 {
        self.lock().epoch
    }

    /// `(is_tracking, epoch)` read under one guard.
    pub fn control(&self) -> (bool, u64) {
        let inner = self.lock();
        (inner.aggregator.is_tracking(), inner.epoch)
    }
}
