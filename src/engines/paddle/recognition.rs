//! CRNN text recognition with greedy CTC decoding.

use image::RgbImage;
use ndarray::{Array2, ArrayView2, Axis};

use super::{
    preprocess::{self, SYMMETRIC},
    session::OnnxModel,
};
use crate::{errors::OcrError, prelude::*};

const REC_HEIGHT: u32 = 48;

/// Lines narrower than this are padded out to it.
const REC_MIN_WIDTH: u32 = 320;

/// Very long lines are squeezed to this width rather than fed in whole.
const REC_MAX_WIDTH: u32 = 3200;

/// The recognition model and its character set.
#[derive(Debug)]
pub struct TextRecognizer {
    model: OnnxModel,
    /// Index 0 is the CTC blank. The last entry is a space.
    characters: Vec<String>,
}

impl TextRecognizer {
    pub fn new(model: OnnxModel, dictionary: &str) -> Self {
        let characters = load_dictionary(dictionary);
        debug!(classes = characters.len(), "Loaded recognition dictionary");
        Self { model, characters }
    }

    /// Recognize a single cropped text line. Returns the text and its
    /// confidence.
    pub fn recognize(&self, crop: &RgbImage) -> Result<(String, f32)> {
        let (w, h) = crop.dimensions();
        let resized_w = preprocess::line_width_for_height(w, h, REC_HEIGHT, REC_MAX_WIDTH);
        let resized = preprocess::resize(crop, resized_w, REC_HEIGHT);
        let input = preprocess::to_tensor(&resized, REC_MIN_WIDTH, SYMMETRIC);

        let output = self.model.run(&input)?;
        let shape = output.shape().to_vec();
        let (steps, classes) = match shape.as_slice() {
            [1, steps, classes] => (*steps, *classes),
            _ => {
                return Err(OcrError::EngineRuntime(format!(
                    "unexpected recognition output shape {shape:?}"
                ))
                .into());
            }
        };
        if classes != self.characters.len() {
            warn!(
                model_classes = classes,
                dictionary_classes = self.characters.len(),
                "Recognition dictionary does not match model"
            );
        }
        let probs: Array2<f32> = output
            .into_shape_with_order((steps, classes))
            .map_err(|e| OcrError::EngineRuntime(e.to_string()))?;
        Ok(ctc_decode(probs.view(), &self.characters))
    }
}

/// Build the class list from a PaddleOCR dictionary file.
///
/// One character per line, with the CTC blank prepended and a space
/// appended.
pub fn load_dictionary(contents: &str) -> Vec<String> {
    std::iter::once("blank".to_owned())
        .chain(contents.lines().map(str::to_owned))
        .chain(std::iter::once(" ".to_owned()))
        .collect()
}

/// Greedy CTC decoding.
///
/// Takes the most likely class at each step, collapses repeats, and drops
/// blanks. Confidence is the mean probability of the kept steps.
pub fn ctc_decode(probs: ArrayView2<'_, f32>, characters: &[String]) -> (String, f32) {
    let mut text = String::new();
    let mut kept = Vec::new();
    let mut prev = None;

    for row in probs.axis_iter(Axis(0)) {
        let Some((index, &prob)) = row
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| a.total_cmp(b))
        else {
            continue;
        };
        if index != 0 && prev != Some(index) {
            if let Some(ch) = characters.get(index) {
                text.push_str(ch);
                kept.push(prob);
            }
        }
        prev = Some(index);
    }

    let confidence = if kept.is_empty() {
        0.0
    } else {
        kept.iter().sum::<f32>() / kept.len() as f32
    };
    (text, confidence)
}
