//! Session statistics aggregator.
//!
//! `SessionAggregator` is a small state machine:
//!
//! ```text
//!   NotTracking --start--> Tracking --verdict--> Attentive <--> NotAttentive
//!        ^                                            |              |
//!        +-------------------- stop ------------------+--------------+
//! ```
//!
//! Counters only move while tracking. Time is accumulated from the monotonic
//! timestamps carried by each `Verdict`, so `attentive_time + distracted_time`
//! always equals `elapsed_time` exactly.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};

use crate::classify::{AttentionStatus, Verdict};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionStatus {
    #[default]
    #[serde(rename = "Not Tracking")]
    NotTracking,
    /// Tracking, but no frame classified yet.
    #[serde(rename = "Tracking")]
    Tracking,
    #[serde(rename = "Attentive")]
    Attentive,
    #[serde(rename = "Not Attentive")]
    NotAttentive,
}

impl SessionStatus {
    pub fn label(&self) -> &'static str {
        match self {
            SessionStatus::NotTracking => "Not Tracking",
            SessionStatus::Tracking => "Tracking",
            SessionStatus::Attentive => "Attentive",
            SessionStatus::NotAttentive => "Not Attentive",
        }
    }
}

impl From<AttentionStatus> for SessionStatus {
    fn from(status: AttentionStatus) -> Self {
        match status {
            AttentionStatus::Attentive => SessionStatus::Attentive,
            AttentionStatus::NotAttentive => SessionStatus::NotAttentive,
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Session-lifetime counters. A plain value: snapshots are clones.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SessionState {
    pub is_tracking: bool,
    pub session_start: Option<Instant>,
    pub elapsed_time: Duration,
    pub attentive_time: Duration,
    pub distracted_time: Duration,
    pub attentive_frames: u64,
    pub total_frames: u64,
    /// Percentage of attentive frames, `0..=100`.
    pub attentiveness: f64,
    /// Number of `NotAttentive -> Attentive` transitions.
    pub focus_cycles: u64,
    pub current_status: SessionStatus,
}

/// `100 * attentive / total`, clamped to `0..=100`; 0 for an empty session.
pub fn attentiveness_pct(attentive_frames: u64, total_frames: u64) -> f64 {
    if total_frames == 0 {
        return 0.0;
    }
    (100.0 * attentive_frames as f64 / total_frames as f64).clamp(0.0, 100.0)
}

#[derive(Clone, Debug, Default)]
pub struct SessionAggregator {
    state: SessionState,
    last_update: Option<Instant>,
}

impl SessionAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn snapshot(&self) -> SessionState {
        self.state.clone()
    }

    pub fn is_tracking(&self) -> bool {
        self.state.is_tracking
    }

    pub(crate) fn state_mut(&mut self) -> &mut SessionState {
        &mut self.state
    }

    /// Replace all counters with a fresh session starting at `now`.
    pub fn start(&mut self, now: Instant) {
        self.state = SessionState {
            is_tracking: true,
            session_start: Some(now),
            current_status: SessionStatus::Tracking,
            ..SessionState::default()
        };
        self.last_update = Some(now);
    }

    /// Freeze the counters. No-op when already stopped.
    pub fn stop(&mut self) {
        if !self.state.is_tracking {
            return;
        }
        self.state.is_tracking = false;
        self.state.current_status = SessionStatus::NotTracking;
    }

    /// Restart the running session in place. Ignored while stopped.
    pub fn reset(&mut self, now: Instant) -> bool {
        if !self.state.is_tracking {
            return false;
        }
        self.start(now);
        true
    }

    /// Fold one verdict into the counters. Ignored while stopped.
    pub fn record(&mut self, verdict: &Verdict) {
        if !self.state.is_tracking {
            return;
        }
        let start = self.state.session_start.unwrap_or(verdict.timestamp);
        let last = self.last_update.unwrap_or(start);
        let delta = verdict.timestamp.saturating_duration_since(last);
        let now = last.max(verdict.timestamp);
        self.last_update = Some(now);

        let state = &mut self.state;
        state.total_frames += 1;
        match verdict.status {
            AttentionStatus::Attentive => {
                state.attentive_frames += 1;
                state.attentive_time += delta;
                if state.current_status == SessionStatus::NotAttentive {
                    state.focus_cycles += 1;
                }
            }
            AttentionStatus::NotAttentive => {
                state.distracted_time += delta;
            }
        }
        state.current_status = verdict.status.into();
        state.elapsed_time = now.saturating_duration_since(start);
        state.attentiveness = attentiveness_pct(state.attentive_frames, state.total_frames);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::AttentionStatus::{Attentive as A, NotAttentive as N};

    const FRAME: Duration = Duration::from_millis(33);

    fn run(statuses: &[AttentionStatus]) -> SessionAggregator {
        let base = Instant::now();
        let mut agg = SessionAggregator::new();
        agg.start(base);
        for (i, status) in statuses.iter().enumerate() {
            let at = base + FRAME * (i as u32 + 1);
            agg.record(&Verdict::new(*status, at));
        }
        agg
    }

    #[test]
    fn initial_state_is_zeroed() {
        let agg = SessionAggregator::new();
        let state = agg.state();
        assert!(!state.is_tracking);
        assert_eq!(state.current_status, SessionStatus::NotTracking);
        assert_eq!(state.total_frames, 0);
        assert_eq!(state.attentiveness, 0.0);
        assert!(state.session_start.is_none());
    }

    #[test]
    fn start_shows_placeholder_status() {
        let mut agg = SessionAggregator::new();
        agg.start(Instant::now());
        assert!(agg.is_tracking());
        assert_eq!(agg.state().current_status, SessionStatus::Tracking);
    }

    #[test]
    fn counts_focus_cycles_on_regained_attention() {
        let agg = run(&[A, A, N, N, A, N, A]);
        assert_eq!(agg.state().focus_cycles, 2);
    }

    #[test]
    fn first_attentive_frame_is_not_a_cycle() {
        assert_eq!(run(&[A]).state().focus_cycles, 0);
        assert_eq!(run(&[N, A]).state().focus_cycles, 1);
        assert_eq!(run(&[A, N, N, N]).state().focus_cycles, 0);
    }

    #[test]
    fn end_to_end_scripted_session() {
        let agg = run(&[A, A, N, A, A, N, A, A, A, N]);
        let state = agg.state();
        assert_eq!(state.total_frames, 10);
        assert_eq!(state.attentive_frames, 7);
        assert!((state.attentiveness - 70.0).abs() < 1e-9);
        assert_eq!(state.focus_cycles, 2);
        assert_eq!(state.current_status, SessionStatus::NotAttentive);
    }

    #[test]
    fn time_split_sums_to_elapsed() {
        let agg = run(&[A, N, N, A, A, N, A, N, A, A, A]);
        let state = agg.state();
        assert_eq!(state.attentive_time + state.distracted_time, state.elapsed_time);
        assert_eq!(state.elapsed_time, FRAME * 11);
        assert_eq!(state.attentive_time, FRAME * 7);
    }

    #[test]
    fn out_of_order_timestamps_do_not_rewind() {
        let base = Instant::now();
        let mut agg = SessionAggregator::new();
        agg.start(base);
        agg.record(&Verdict::new(A, base + Duration::from_secs(2)));
        agg.record(&Verdict::new(N, base + Duration::from_secs(1)));
        let state = agg.state();
        assert_eq!(state.elapsed_time, Duration::from_secs(2));
        assert_eq!(state.distracted_time, Duration::ZERO);
        assert_eq!(state.attentive_time + state.distracted_time, state.elapsed_time);
    }

    #[test]
    fn stop_freezes_counters() {
        let mut agg = run(&[A, N, A]);
        agg.stop();
        let frozen = agg.snapshot();
        assert!(!frozen.is_tracking);
        assert_eq!(frozen.current_status, SessionStatus::NotTracking);
        assert_eq!(frozen.total_frames, 3);

        agg.record(&Verdict::new(A, Instant::now() + Duration::from_secs(5)));
        agg.stop();
        assert!(!agg.reset(Instant::now()));
        assert_eq!(agg.snapshot(), frozen);
    }

    #[test]
    fn reset_restarts_running_session() {
        let mut agg = run(&[A, N, A]);
        let now = Instant::now() + Duration::from_secs(1);
        assert!(agg.reset(now));
        let state = agg.state();
        assert!(state.is_tracking);
        assert_eq!(state.total_frames, 0);
        assert_eq!(state.focus_cycles, 0);
        assert_eq!(state.session_start, Some(now));
    }

    #[test]
    fn restart_replaces_state_wholesale() {
        let mut agg = run(&[N, A, N, A]);
        agg.stop();
        agg.start(Instant::now());
        assert_eq!(agg.state().focus_cycles, 0);
        assert_eq!(agg.state().elapsed_time, Duration::ZERO);
    }

    #[test]
    fn percentage_is_clamped() {
        assert_eq!(attentiveness_pct(0, 0), 0.0);
        assert_eq!(attentiveness_pct(5, 5), 100.0);
        assert_eq!(attentiveness_pct(9, 3), 100.0);
        assert_eq!(attentiveness_pct(1, 4), 25.0);
    }
}
