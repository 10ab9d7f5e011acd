//! Face landmark model.
//!
//! A `LandmarkSet` is what the external face-mesh estimator yields for one
//! frame: indexed points in normalized image coordinates. Indices follow the
//! MediaPipe face mesh topology (468 points, 478 with iris refinement).
//!
//! Access is always fallible. A partial detection simply has fewer points, and
//! the geometry layer maps a missing point to a `false` fact.

use serde::{Deserialize, Serialize};

/// Nose tip. Reference point for horizontal centering.
pub const NOSE_TIP: usize = 1;
/// Forehead (top of the face oval).
pub const FOREHEAD: usize = 10;
/// Chin (bottom of the face oval).
pub const CHIN: usize = 199;

/// Left eye points ordered `[corner, top, top, corner, bottom, bottom]`.
pub const LEFT_EYE: [usize; 6] = [33, 159, 158, 133, 153, 144];
/// Right eye points ordered `[corner, top, top, corner, bottom, bottom]`.
pub const RIGHT_EYE: [usize; 6] = [362, 386, 385, 263, 373, 380];

/// Number of points in a full (unrefined) face mesh.
pub const FACE_MESH_POINTS: usize = 468;

/// A single normalized landmark. `x`/`y` are in `[0,1]` image-relative
/// units, `z` is depth relative to the face center.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Landmark {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Landmark {
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    /// Euclidean distance in the image plane (x, y only).
    pub fn planar_distance(&self, other: &Landmark) -> f32 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }

    /// Component-wise `self - other`.
    pub fn sub(&self, other: &Landmark) -> Landmark {
        Landmark {
            x: self.x - other.x,
            y: self.y - other.y,
            z: self.z - other.z,
        }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

impl From<[f32; 3]> for Landmark {
    fn from(p: [f32; 3]) -> Self {
        Self::new(p[0], p[1], p[2])
    }
}

/// Landmarks for one detected face in one frame.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LandmarkSet {
    points: Vec<Landmark>,
}

impl LandmarkSet {
    pub fn new(points: Vec<Landmark>) -> Self {
        Self { points }
    }

    /// Returns the landmark at `index`, or `None` when the index is out of
    /// range or the point carries non-finite coordinates.
    pub fn get(&self, index: usize) -> Option<&Landmark> {
        self.points.get(index).filter(|p| p.is_finite())
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Overwrite a single point, growing the set with default points if
    /// needed. Used by synthetic sources and tests to sculpt a face.
    pub fn set(&mut self, index: usize, landmark: Landmark) {
        if index >= self.points.len() {
            self.points.resize(index + 1, Landmark::default());
        }
        self.points[index] = landmark;
    }

    /// Return a copy with every coordinate multiplied by `factor`.
    pub fn scaled(&self, factor: f32) -> Self {
        Self {
            points: self
                .points
                .iter()
                .map(|p| Landmark::new(p.x * factor, p.y * factor, p.z * factor))
                .collect(),
        }
    }
}

impl From<Vec<[f32; 3]>> for LandmarkSet {
    fn from(points: Vec<[f32; 3]>) -> Self {
        Self::new(points.into_iter().map(Landmark::from).collect())
    }
}
