//! Typed OCR results.
//!
//! An engine returns one [`ResultSet`] per input image. We only ever pass one
//! image, but we keep the outer list so that the shape matches what engines
//! naturally produce.

use crate::prelude::*;

/// A point in source-image pixel coordinates.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// One located and recognized text region.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Detection {
    /// Bounding polygon, clockwise from the top-left corner.
    pub polygon: Vec<Point>,

    /// The recognized text.
    pub text: String,

    /// Recognition confidence, between 0.0 and 1.0.
    pub confidence: f32,
}

/// All detections for one image, in the order the engine reported them.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ResultSet {
    pub detections: Vec<Detection>,
}

impl ResultSet {
    pub fn new(detections: Vec<Detection>) -> Self {
        Self { detections }
    }

    pub fn is_empty(&self) -> bool {
        self.detections.is_empty()
    }
}

/// Walk every detection of every result set, preserving engine order.
pub fn flatten(results: &[ResultSet]) -> impl Iterator<Item = &Detection> {
    results.iter().flat_map(|set| set.detections.iter())
}

/// Build an axis-aligned four-point polygon.
pub fn rect_polygon(left: f32, top: f32, right: f32, bottom: f32) -> Vec<Point> {
    vec![
        Point::new(left, top),
        Point::new(right, top),
        Point::new(right, bottom),
        Point::new(left, bottom),
    ]
}

#[cfg(test)]
pub(crate) fn detection(text: &str, confidence: f32) -> Detection {
    Detection {
        polygon: rect_polygon(0.0, 0.0, 10.0, 10.0),
        text: text.to_owned(),
        confidence,
    }
}
