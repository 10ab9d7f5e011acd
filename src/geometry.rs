//! Landmark geometry checks.
//!
//! Three independent, stateless facts are derived from one `LandmarkSet`:
//!
//! - `centered`: the nose tip sits in the horizontal middle band of the frame
//! - `forward`: the chin→forehead vector is close to vertical and depth-neutral
//! - `eyes_open`: the mean eye aspect ratio is above the open-eye threshold
//!
//! Every threshold is widened by `error_margin` to absorb landmark jitter.
//! A missing landmark never raises: the affected fact is simply `false`.

use crate::landmarks::{Landmark, LandmarkSet, CHIN, FOREHEAD, LEFT_EYE, NOSE_TIP, RIGHT_EYE};

pub const DEFAULT_ERROR_MARGIN: f32 = 0.05;

const CENTER_MIN_X: f32 = 0.35;
const CENTER_MAX_X: f32 = 0.65;
const MAX_TILT_X: f32 = 0.15;
const MAX_TILT_Z: f32 = 0.05;
const MIN_EYE_RATIO: f32 = 0.20;

/// Boolean facts for a single frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GeometryFacts {
    pub centered: bool,
    pub forward: bool,
    pub eyes_open: bool,
}

impl GeometryFacts {
    /// Facts for a frame without a detected face.
    pub const NO_FACE: GeometryFacts = GeometryFacts {
        centered: false,
        forward: false,
        eyes_open: false,
    };

    pub fn all(&self) -> bool {
        self.centered && self.forward && self.eyes_open
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GeometryEvaluator {
    error_margin: f32,
}

impl Default for GeometryEvaluator {
    fn default() -> Self {
        Self::new(DEFAULT_ERROR_MARGIN)
    }
}

impl GeometryEvaluator {
    pub fn new(error_margin: f32) -> Self {
        Self { error_margin }
    }

    pub fn error_margin(&self) -> f32 {
        self.error_margin
    }

    pub fn evaluate(&self, landmarks: &LandmarkSet) -> GeometryFacts {
        GeometryFacts {
            centered: self.is_centered(landmarks),
            forward: self.is_forward(landmarks),
            eyes_open: self.eyes_open(landmarks),
        }
    }

    pub fn is_centered(&self, landmarks: &LandmarkSet) -> bool {
        let Some(nose) = landmarks.get(NOSE_TIP) else {
            return false;
        };
        CENTER_MIN_X - self.error_margin < nose.x && nose.x < CENTER_MAX_X + self.error_margin
    }

    pub fn is_forward(&self, landmarks: &LandmarkSet) -> bool {
        let (Some(chin), Some(forehead)) = (landmarks.get(CHIN), landmarks.get(FOREHEAD)) else {
            return false;
        };
        let face = forehead.sub(chin);
        face.x.abs() < MAX_TILT_X + self.error_margin
            && face.z.abs() < MAX_TILT_Z + self.error_margin
    }

    pub fn eyes_open(&self, landmarks: &LandmarkSet) -> bool {
        let left = eye_aspect_ratio(landmarks, &LEFT_EYE);
        let right = eye_aspect_ratio(landmarks, &RIGHT_EYE);
        (left + right) / 2.0 > MIN_EYE_RATIO - self.error_margin
    }
}

/// Eye aspect ratio for six eye landmarks `p0..p5`:
/// `(|p1 - p4| + |p2 - p3|) / (2 * |p0 - p5|)`.
///
/// Returns 0 when any point is missing or the horizontal span is zero.
pub fn eye_aspect_ratio(landmarks: &LandmarkSet, eye: &[usize; 6]) -> f32 {
    let mut p = [Landmark::default(); 6];
    for (slot, &index) in p.iter_mut().zip(eye.iter()) {
        match landmarks.get(index) {
            Some(point) => *slot = *point,
            None => return 0.0,
        }
    }
    let vertical = p[1].planar_distance(&p[4]) + p[2].planar_distance(&p[3]);
    let horizontal = 2.0 * p[0].planar_distance(&p[5]);
    if horizontal > 0.0 {
        vertical / horizontal
    } else {
        0.0
    }
}
