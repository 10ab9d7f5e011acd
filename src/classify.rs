//! Per-frame attention verdicts.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Instant;

use crate::geometry::{GeometryEvaluator, GeometryFacts};
use crate::landmarks::LandmarkSet;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AttentionStatus {
    #[serde(rename = "Attentive")]
    Attentive,
    #[serde(rename = "Not Attentive")]
    NotAttentive,
}

impl AttentionStatus {
    pub fn label(&self) -> &'static str {
        match self {
            AttentionStatus::Attentive => "Attentive",
            AttentionStatus::NotAttentive => "Not Attentive",
        }
    }

    pub fn from_facts(facts: &GeometryFacts) -> Self {
        if facts.all() {
            AttentionStatus::Attentive
        } else {
            AttentionStatus::NotAttentive
        }
    }

    pub fn is_attentive(&self) -> bool {
        matches!(self, AttentionStatus::Attentive)
    }
}

impl fmt::Display for AttentionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One classified frame. The only signal the session aggregator consumes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Verdict {
    pub status: AttentionStatus,
    /// Monotonic capture time of the frame.
    pub timestamp: Instant,
}

impl Verdict {
    pub fn new(status: AttentionStatus, timestamp: Instant) -> Self {
        Self { status, timestamp }
    }
}

/// Runs the geometry checks and folds them into a verdict.
#[derive(Clone, Copy, Debug, Default)]
pub struct AttentionClassifier {
    geometry: GeometryEvaluator,
}

impl AttentionClassifier {
    pub fn new(geometry: GeometryEvaluator) -> Self {
        Self { geometry }
    }

    pub fn with_margin(error_margin: f32) -> Self {
        Self::new(GeometryEvaluator::new(error_margin))
    }

    pub fn geometry(&self) -> &GeometryEvaluator {
        &self.geometry
    }

    /// Facts for a frame. `None` means the estimator found no face.
    pub fn facts(&self, landmarks: Option<&LandmarkSet>) -> GeometryFacts {
        match landmarks {
            Some(set) => self.geometry.evaluate(set),
            None => GeometryFacts::NO_FACE,
        }
    }

    pub fn classify(&self, landmarks: Option<&LandmarkSet>, timestamp: Instant) -> Verdict {
        let facts = self.facts(landmarks);
        let status = AttentionStatus::from_facts(&facts);
        log::trace!(
            "frame facts centered={} forward={} eyes_open={} -> {}",
            facts.centered,
            facts.forward,
            facts.eyes_open,
            status
        );
        Verdict::new(status, timestamp)
    }
}
