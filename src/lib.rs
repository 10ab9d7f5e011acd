//! Attention Tracker
//!
//! Classifies, frame by frame, whether a person in front of the camera is
//! attentive, using facial-landmark geometry, and aggregates the verdicts into
//! session statistics that a client reads and updates over a small HTTP API.
//!
//! # Pipeline
//!
//! ```text
//! LandmarkSource -> GeometryEvaluator -> AttentionClassifier -> SessionAggregator
//!                                                                      |
//!                                         SharedSession <---- periodic push
//!                                               ^
//!                                            HTTP API
//! ```
//!
//! Camera capture and the face-mesh estimator are external. They feed this
//! crate through `LandmarkSource`.
//!
//! # Module Structure
//!
//! - `landmarks`: landmark points, sets and named face-mesh indices
//! - `geometry`: centered / forward-facing / eyes-open checks
//! - `classify`: per-frame verdicts
//! - `session`: session statistics state machine
//! - `sync`: the shared session handle and its wire format
//! - `source`: landmark sources (synthetic, JSON lines)
//! - `monitor`: the per-frame loop thread
//! - `api`: HTTP routes over the shared session
//! - `config`: file + env configuration

pub mod api;
pub mod classify;
pub mod config;
pub mod geometry;
pub mod landmarks;
pub mod monitor;
pub mod session;
pub mod source;
pub mod sync;

pub use classify::{AttentionClassifier, AttentionStatus, Verdict};
pub use geometry::{GeometryEvaluator, GeometryFacts, DEFAULT_ERROR_MARGIN};
pub use landmarks::{Landmark, LandmarkSet};
pub use monitor::{FrameMonitor, MonitorConfig, MonitorHandle, MonitorStats};
pub use session::{SessionAggregator, SessionState, SessionStatus};
pub use source::{open_source, LandmarkFrame, LandmarkSource};
pub use sync::{SharedSession, StatsPatch, StatsView, SyncError};
