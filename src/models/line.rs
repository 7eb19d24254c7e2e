use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Minimum number of vertices a detection polygon must carry.
pub const MIN_POLYGON_POINTS: usize = 4;

/// A point in render (pixel) space, top-left origin.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

impl From<[f64; 2]> for Point {
    fn from([x, y]: [f64; 2]) -> Self {
        Self { x, y }
    }
}

/// Axis-aligned rectangle. In pixel space `(x, y)` is the top-left corner; in
/// document space it is the bottom-left corner.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    /// Bounding rectangle of a set of points. Returns `None` for an empty slice.
    pub fn bounding(points: &[Point]) -> Option<Self> {
        let first = points.first()?;
        let (mut min_x, mut min_y, mut max_x, mut max_y) = (first.x, first.y, first.x, first.y);

        for p in &points[1..] {
            min_x = min_x.min(p.x);
            min_y = min_y.min(p.y);
            max_x = max_x.max(p.x);
            max_y = max_y.max(p.y);
        }

        Some(Self {
            x: min_x,
            y: min_y,
            width: max_x - min_x,
            height: max_y - min_y,
        })
    }
}

/// Why a recognizer line was rejected.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum InvalidLine {
    #[error("polygon has {0} points, at least {MIN_POLYGON_POINTS} required")]
    TooFewPoints(usize),

    #[error("polygon contains a non-finite coordinate")]
    NonFiniteCoordinate,

    #[error("confidence {0} is not a number")]
    InvalidConfidence(f32),
}

/// A recognized text line in render space, as produced by the recognition engine.
#[derive(Debug, Clone, PartialEq)]
pub struct Line {
    text: String,
    confidence: f32,
    polygon: Vec<Point>,
}

impl Line {
    /// Build a line, validating the polygon and confidence.
    ///
    /// Confidence values slightly outside `[0, 1]` (engine rounding) are clamped;
    /// NaN is rejected.
    pub fn new(
        text: impl Into<String>,
        confidence: f32,
        polygon: Vec<Point>,
    ) -> Result<Self, InvalidLine> {
        if polygon.len() < MIN_POLYGON_POINTS {
            return Err(InvalidLine::TooFewPoints(polygon.len()));
        }
        if polygon.iter().any(|p| !p.x.is_finite() || !p.y.is_finite()) {
            return Err(InvalidLine::NonFiniteCoordinate);
        }
        if confidence.is_nan() {
            return Err(InvalidLine::InvalidConfidence(confidence));
        }

        Ok(Self {
            text: text.into(),
            confidence: confidence.clamp(0.0, 1.0),
            polygon,
        })
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn confidence(&self) -> f32 {
        self.confidence
    }

    pub fn polygon(&self) -> &[Point] {
        &self.polygon
    }

    /// Pixel-space axis-aligned bounding rectangle of the polygon.
    pub fn pixel_bounds(&self) -> Rect {
        // new() guarantees a non-empty polygon
        Rect::bounding(&self.polygon).unwrap_or(Rect {
            x: 0.0,
            y: 0.0,
            width: 0.0,
            height: 0.0,
        })
    }
}

/// A recognized line expressed in document points, bottom-left origin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedLine {
    pub text: String,
    pub confidence: f32,
    pub rect: Rect,
}

/// All normalized lines of one page, in recognizer order.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PageResult {
    pub page: u32,
    pub lines: Vec<NormalizedLine>,
}

impl PageResult {
    pub fn new(page: u32, lines: Vec<NormalizedLine>) -> Self {
        Self { page, lines }
    }

    pub fn line_count(&self) -> usize {
        self.lines.len()
    }
}
