//! Text-line angle classification.
//!
//! The classifier tells "upright" from "upside down" for each cropped line.
//! Upside-down lines are rotated before recognition.

use image::RgbImage;

use super::{
    preprocess::{self, SYMMETRIC},
    session::OnnxModel,
};
use crate::{errors::OcrError, prelude::*};

const CLS_HEIGHT: u32 = 48;
const CLS_WIDTH: u32 = 192;

/// Minimum "180 degrees" probability before we rotate a line.
const CLS_THRESH: f32 = 0.9;

/// The angle classification model.
#[derive(Debug)]
pub struct AngleClassifier {
    model: OnnxModel,
}

impl AngleClassifier {
    pub fn new(model: OnnxModel) -> Self {
        Self { model }
    }

    /// Return the crop, rotated 180 degrees if the model is confident it is
    /// upside down.
    pub fn correct(&self, crop: RgbImage) -> Result<RgbImage> {
        let (w, h) = crop.dimensions();
        let resized_w = preprocess::line_width_for_height(w, h, CLS_HEIGHT, CLS_WIDTH);
        let resized = preprocess::resize(&crop, resized_w, CLS_HEIGHT);
        let input = preprocess::to_tensor(&resized, CLS_WIDTH, SYMMETRIC);

        let output = self.model.run(&input)?;
        let probs = output.iter().copied().collect::<Vec<_>>();
        if probs.len() != 2 {
            return Err(OcrError::EngineRuntime(format!(
                "expected 2 angle classes, got output shape {:?}",
                output.shape()
            ))
            .into());
        }

        if is_upside_down(&probs, CLS_THRESH) {
            trace!(score = probs[1], "Rotating upside-down text line");
            Ok(image::imageops::rotate180(&crop))
        } else {
            Ok(crop)
        }
    }
}

/// Class 0 is "0 degrees" and class 1 is "180 degrees".
fn is_upside_down(probs: &[f32], thresh: f32) -> bool {
    matches!(probs, [upright, flipped] if flipped > upright && *flipped > thresh)
}
