//! Image-to-tensor conversion shared by the PaddleOCR models.
//!
//! PaddleOCR was trained on images decoded by OpenCV, so every model expects
//! its channels in BGR order.

use image::{RgbImage, imageops::FilterType};
use ndarray::Array4;

/// Per-channel normalization, in BGR order.
#[derive(Clone, Copy, Debug)]
pub struct Normalization {
    pub mean: [f32; 3],
    pub std: [f32; 3],
}

/// ImageNet statistics, used by the detector.
pub const IMAGENET: Normalization = Normalization {
    mean: [0.485, 0.456, 0.406],
    std: [0.229, 0.224, 0.225],
};

/// Maps `[0, 255]` to `[-1, 1]`, used by the classifier and recognizer.
pub const SYMMETRIC: Normalization = Normalization {
    mean: [0.5, 0.5, 0.5],
    std: [0.5, 0.5, 0.5],
};

/// Resize an image with the filter PaddleOCR's bilinear resize most closely
/// matches.
pub fn resize(image: &RgbImage, width: u32, height: u32) -> RgbImage {
    image::imageops::resize(image, width.max(1), height.max(1), FilterType::Triangle)
}

/// Convert an image to a `[1, 3, H, W]` tensor.
///
/// The tensor is `padded_width` wide. Columns past the image's width stay
/// zero, which is what PaddleOCR pads with after normalizing.
pub fn to_tensor(image: &RgbImage, padded_width: u32, norm: Normalization) -> Array4<f32> {
    let (width, height) = image.dimensions();
    let padded_width = padded_width.max(width);
    let mut tensor = Array4::<f32>::zeros((1, 3, height as usize, padded_width as usize));
    for (x, y, pixel) in image.enumerate_pixels() {
        let bgr = [pixel[2], pixel[1], pixel[0]];
        for (c, value) in bgr.into_iter().enumerate() {
            tensor[[0, c, y as usize, x as usize]] =
                (f32::from(value) / 255.0 - norm.mean[c]) / norm.std[c];
        }
    }
    tensor
}

/// Height-48 resize used by the classifier and recognizer.
///
/// Returns the resized width, which keeps the crop's aspect ratio but never
/// exceeds `max_width`.
pub fn line_width_for_height(width: u32, height: u32, target_height: u32, max_width: u32) -> u32 {
    let ratio = width as f32 / height.max(1) as f32;
    let resized = (target_height as f32 * ratio).ceil() as u32;
    resized.clamp(1, max_width)
}
