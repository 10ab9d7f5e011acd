//! Landmark sources.
//!
//! Camera capture and the face-mesh model live outside this crate. A
//! `LandmarkSource` is the seam: each call yields the landmarks the external
//! estimator produced for one frame, or no face at all.
//!
//! Sources:
//! - `stub://...` synthetic faces (testing, demos)
//! - a local JSON-lines file, or `-` for stdin, fed by an external estimator
//!
//! Sources MUST NOT retain landmark sets after handing them out.

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::time::{Duration, Instant};

use crate::landmarks::{Landmark, LandmarkSet, CHIN, FOREHEAD, LEFT_EYE, NOSE_TIP, RIGHT_EYE};

/// One processed frame.
#[derive(Clone, Debug)]
pub struct LandmarkFrame {
    /// `None` when the estimator found no face.
    pub landmarks: Option<LandmarkSet>,
    pub timestamp: Instant,
}

pub trait LandmarkSource: Send {
    /// Source identifier for logs.
    fn name(&self) -> &str;

    /// Next frame. `Ok(None)` means the source is exhausted.
    fn next_frame(&mut self) -> Result<Option<LandmarkFrame>>;
}

/// Opens a source by locator: `stub://<pattern>`, `-` for stdin, or a local path.
pub fn open_source(locator: &str, target_fps: u32) -> Result<Box<dyn LandmarkSource>> {
    if let Some(spec) = locator.strip_prefix("stub://") {
        return Ok(Box::new(SyntheticSource::from_spec(spec)?));
    }
    if locator.trim().is_empty() {
        return Err(anyhow!("landmark source must not be empty"));
    }
    if locator.contains("://") {
        return Err(anyhow!(
            "landmark source '{}' is not supported (use stub://, '-' or a local file)",
            locator
        ));
    }
    let interval = frame_interval(target_fps);
    if locator == "-" {
        let reader = BufReader::new(std::io::stdin());
        return Ok(Box::new(JsonlSource::new("stdin", reader)));
    }
    let file = File::open(locator)
        .with_context(|| format!("failed to open landmark recording {}", locator))?;
    Ok(Box::new(
        JsonlSource::new(locator, BufReader::new(file)).with_frame_interval(interval),
    ))
}

pub fn frame_interval(target_fps: u32) -> Duration {
    Duration::from_secs(1) / target_fps.max(1)
}

/// `base + interval * frame`, or `None` when the clock would overflow.
pub fn nominal_timestamp(base: Instant, interval: Duration, frame: u64) -> Option<Instant> {
    let frame = u32::try_from(frame).ok()?;
    base.checked_add(interval.checked_mul(frame)?)
}

// ----------------------------------------------------------------------------
// Synthetic source (stub://) for tests
// ----------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyntheticFrame {
    Attentive,
    Distracted,
    NoFace,
}

/// Cycles through a fixed pattern of synthetic faces.
///
/// Patterns: `attentive`, `distracted`, `no-face`, or `pattern/<codes>` where
/// `A` = attentive face, `D` = face turned away, `-` = no face.
pub struct SyntheticSource {
    name: String,
    pattern: Vec<SyntheticFrame>,
    frame_count: u64,
    limit: Option<u64>,
    clock: Option<(Instant, Duration)>,
}

impl SyntheticSource {
    pub fn new(pattern: Vec<SyntheticFrame>) -> Result<Self> {
        if pattern.is_empty() {
            return Err(anyhow!("synthetic pattern must not be empty"));
        }
        Ok(Self {
            name: "stub://pattern".to_string(),
            pattern,
            frame_count: 0,
            limit: None,
            clock: None,
        })
    }

    pub fn from_spec(spec: &str) -> Result<Self> {
        let pattern = match spec {
            "attentive" => vec![SyntheticFrame::Attentive],
            "distracted" => vec![SyntheticFrame::Distracted],
            "no-face" => vec![SyntheticFrame::NoFace],
            other => {
                let codes = other.strip_prefix("pattern/").ok_or_else(|| {
                    anyhow!("unknown synthetic source 'stub://{}'", other)
                })?;
                codes
                    .chars()
                    .map(|c| match c {
                        'A' => Ok(SyntheticFrame::Attentive),
                        'D' => Ok(SyntheticFrame::Distracted),
                        '-' => Ok(SyntheticFrame::NoFace),
                        _ => Err(anyhow!("invalid synthetic frame code '{}'", c)),
                    })
                    .collect::<Result<Vec<_>>>()?
            }
        };
        let mut source = Self::new(pattern)?;
        source.name = format!("stub://{}", spec);
        Ok(source)
    }

    /// Stop after `frames` frames instead of cycling forever.
    pub fn with_limit(mut self, frames: u64) -> Self {
        self.limit = Some(frames);
        self
    }

    /// Stamp frame `n` (1-based) at `base + interval * n` instead of wall time.
    pub fn with_frame_clock(mut self, base: Instant, interval: Duration) -> Self {
        self.clock = Some((base, interval));
        self
    }

    pub fn frames_emitted(&self) -> u64 {
        self.frame_count
    }
}

impl LandmarkSource for SyntheticSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn next_frame(&mut self) -> Result<Option<LandmarkFrame>> {
        if self.limit.is_some_and(|limit| self.frame_count >= limit) {
            return Ok(None);
        }
        let slot = (self.frame_count % self.pattern.len() as u64) as usize;
        let timestamp = match self.clock {
            Some((base, interval)) => nominal_timestamp(base, interval, self.frame_count + 1)
                .ok_or_else(|| anyhow!("{}: frame clock overflowed", self.name))?,
            None => Instant::now(),
        };
        self.frame_count += 1;
        let landmarks = match self.pattern[slot] {
            SyntheticFrame::Attentive => Some(synthetic_face(0.5, 0.0)),
            SyntheticFrame::Distracted => Some(synthetic_face(0.85, 0.3)),
            SyntheticFrame::NoFace => None,
        };
        Ok(Some(LandmarkFrame {
            landmarks,
            timestamp,
        }))
    }
}

/// Builds an upright face with open eyes, nose at `nose_x`, forehead shifted
/// sideways by `tilt_x`.
pub fn synthetic_face(nose_x: f32, tilt_x: f32) -> LandmarkSet {
    let mut set = LandmarkSet::default();
    set.set(NOSE_TIP, Landmark::new(nose_x, 0.5, -0.05));
    set.set(FOREHEAD, Landmark::new(nose_x + tilt_x, 0.25, 0.0));
    set.set(CHIN, Landmark::new(nose_x, 0.75, 0.0));
    for (eye, cx) in [(&LEFT_EYE, nose_x - 0.06), (&RIGHT_EYE, nose_x + 0.06)] {
        let (w, h, y) = (0.05, 0.03, 0.4);
        set.set(eye[0], Landmark::new(cx - w / 2.0, y, 0.0));
        set.set(eye[5], Landmark::new(cx + w / 2.0, y, 0.0));
        set.set(eye[1], Landmark::new(cx - w / 4.0, y - h / 2.0, 0.0));
        set.set(eye[4], Landmark::new(cx - w / 4.0, y + h / 2.0, 0.0));
        set.set(eye[2], Landmark::new(cx + w / 4.0, y - h / 2.0, 0.0));
        set.set(eye[3], Landmark::new(cx + w / 4.0, y + h / 2.0, 0.0));
    }
    set
}

// ----------------------------------------------------------------------------
// JSON-lines source
// ----------------------------------------------------------------------------

/// One line of a landmark recording:
/// `{"t_ms": 33, "landmarks": [{"x":..,"y":..,"z":..}, ...]}`.
/// `landmarks` null or absent means no face; `t_ms` is optional.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RecordedFrame {
    t_ms: Option<u64>,
    landmarks: Option<LandmarkSet>,
}

pub struct JsonlSource<R> {
    name: String,
    reader: R,
    base: Instant,
    frame_interval: Option<Duration>,
    line_no: u64,
    frames: u64,
}

impl<R: BufRead + Send> JsonlSource<R> {
    pub fn new(name: &str, reader: R) -> Self {
        Self {
            name: name.to_string(),
            reader,
            base: Instant::now(),
            frame_interval: None,
            line_no: 0,
            frames: 0,
        }
    }

    /// Timestamp frames without `t_ms` at a fixed rate instead of wall time.
    pub fn with_frame_interval(mut self, interval: Duration) -> Self {
        self.frame_interval = Some(interval);
        self
    }

    pub fn base(&self) -> Instant {
        self.base
    }
}

impl<R: BufRead + Send> LandmarkSource for JsonlSource<R> {
    fn name(&self) -> &str {
        &self.name
    }

    fn next_frame(&mut self) -> Result<Option<LandmarkFrame>> {
        let mut line = String::new();
        loop {
            line.clear();
            if self.reader.read_line(&mut line)? == 0 {
                return Ok(None);
            }
            self.line_no += 1;
            if !line.trim().is_empty() {
                break;
            }
        }
        let record: RecordedFrame = serde_json::from_str(line.trim())
            .with_context(|| format!("{}: invalid landmark record on line {}", self.name, self.line_no))?;
        let timestamp = match (record.t_ms, self.frame_interval) {
            (Some(ms), _) => self
                .base
                .checked_add(Duration::from_millis(ms))
                .ok_or_else(|| anyhow!("{}: t_ms out of range on line {}", self.name, self.line_no))?,
            (None, Some(interval)) => nominal_timestamp(self.base, interval, self.frames + 1)
                .ok_or_else(|| anyhow!("{}: frame clock overflowed", self.name))?,
            (None, None) => Instant::now(),
        };
        self.frames += 1;
        Ok(Some(LandmarkFrame {
            landmarks: record.landmarks,
            timestamp,
        }))
    }
}
