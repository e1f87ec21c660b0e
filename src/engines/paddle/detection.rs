//! DB (Differentiable Binarization) text detection.
//!
//! The detector outputs a per-pixel text probability map. We binarize it,
//! trace the outer contour of each text region, fit a minimum-area rotated
//! rectangle to it, score and grow that rectangle, and map its corners back
//! onto the source image.

use image::{GrayImage, Luma, Rgb, RgbImage};
use imageproc::{
    contours::{BorderType, find_contours},
    drawing::draw_polygon_mut,
    geometric_transformations::{Interpolation, Projection, warp_into},
    geometry::convex_hull,
    point::Point as PixelPoint,
};
use ndarray::{Array2, ArrayView2};

use super::{
    preprocess::{self, IMAGENET},
    session::OnnxModel,
};
use crate::{errors::OcrError, prelude::*, results::Point};

/// Post-processing knobs. The defaults are PaddleOCR's.
#[derive(Clone, Copy, Debug)]
pub struct DetectionParams {
    /// The longest image side is scaled down to this before detection.
    pub limit_side_len: u32,
    /// Pixels above this probability count as text.
    pub thresh: f32,
    /// Boxes whose mean probability is below this are dropped.
    pub box_thresh: f32,
    /// How far to grow each box, relative to `area / perimeter`.
    pub unclip_ratio: f32,
    /// Upper bound on contours examined.
    pub max_candidates: usize,
    /// Boxes with a shorter side than this (in map pixels) are dropped.
    pub min_size: f32,
}

impl Default for DetectionParams {
    fn default() -> Self {
        Self {
            limit_side_len: 960,
            thresh: 0.3,
            box_thresh: 0.6,
            unclip_ratio: 1.5,
            max_candidates: 1000,
            min_size: 3.0,
        }
    }
}

/// A detected text box in source-image coordinates.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TextBox {
    /// Top-left, top-right, bottom-right, bottom-left.
    pub corners: [Point; 4],
    /// Mean text probability inside the box.
    pub score: f32,
}

impl TextBox {
    pub fn polygon(&self) -> Vec<Point> {
        self.corners.to_vec()
    }
}

/// The text detection model.
#[derive(Debug)]
pub struct TextDetector {
    model: OnnxModel,
    params: DetectionParams,
}

impl TextDetector {
    pub fn new(model: OnnxModel) -> Self {
        Self {
            model,
            params: DetectionParams::default(),
        }
    }

    /// Find text boxes, in reading order.
    #[instrument(level = "debug", skip_all)]
    pub fn detect(&self, image: &RgbImage) -> Result<Vec<TextBox>> {
        let (src_w, src_h) = image.dimensions();
        let (w, h) = resize_dims(src_w, src_h, self.params.limit_side_len);
        let resized = preprocess::resize(image, w, h);
        let input = preprocess::to_tensor(&resized, w, IMAGENET);

        let output = self.model.run(&input)?;
        let shape = output.shape().to_vec();
        let (map_h, map_w) = match shape.as_slice() {
            [1, 1, map_h, map_w] => (*map_h, *map_w),
            _ => {
                return Err(OcrError::EngineRuntime(format!(
                    "unexpected detection output shape {shape:?}"
                ))
                .into());
            }
        };
        let prob_map: Array2<f32> = output
            .into_shape_with_order((map_h, map_w))
            .map_err(|e| OcrError::EngineRuntime(e.to_string()))?;

        let boxes = extract_boxes(prob_map.view(), &self.params, src_w, src_h);
        debug!(count = boxes.len(), "Detected text boxes");
        Ok(sort_boxes(boxes))
    }
}

/// Pick detector input dimensions: longest side at most `limit`, both sides
/// rounded to a multiple of 32.
pub fn resize_dims(width: u32, height: u32, limit: u32) -> (u32, u32) {
    let longest = width.max(height);
    let ratio = if longest > limit {
        limit as f32 / longest as f32
    } else {
        1.0
    };
    let round32 = |side: u32| {
        let scaled = side as f32 * ratio;
        ((scaled / 32.0).round() as u32 * 32).max(32)
    };
    (round32(width), round32(height))
}

/// A rotated rectangle in map coordinates.
#[derive(Clone, Copy, Debug)]
struct RotatedRect {
    center: (f32, f32),
    /// Unit vector along the `width` side.
    axis: (f32, f32),
    width: f32,
    height: f32,
}

impl RotatedRect {
    fn min_side(&self) -> f32 {
        self.width.min(self.height)
    }

    /// Grow every side outwards by `distance`.
    fn grow(&self, distance: f32) -> Self {
        Self {
            width: self.width + 2.0 * distance,
            height: self.height + 2.0 * distance,
            ..*self
        }
    }

    fn corners(&self) -> [(f32, f32); 4] {
        let (ux, uy) = self.axis;
        let (vx, vy) = (-uy, ux);
        let (hw, hh) = (self.width / 2.0, self.height / 2.0);
        [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)].map(|(su, sv)| {
            (
                self.center.0 + su * hw * ux + sv * hh * vx,
                self.center.1 + su * hw * uy + sv * hh * vy,
            )
        })
    }
}

/// Turn a probability map into scored, grown boxes in source coordinates.
pub fn extract_boxes(
    prob_map: ArrayView2<'_, f32>,
    params: &DetectionParams,
    src_w: u32,
    src_h: u32,
) -> Vec<TextBox> {
    let (map_h, map_w) = prob_map.dim();
    let scale_x = src_w as f32 / map_w as f32;
    let scale_y = src_h as f32 / map_h as f32;

    let bitmap = GrayImage::from_fn(map_w as u32, map_h as u32, |x, y| {
        if prob_map[[y as usize, x as usize]] > params.thresh {
            Luma([255])
        } else {
            Luma([0])
        }
    });

    let mut boxes = Vec::new();
    let outer_contours = find_contours::<i32>(&bitmap)
        .into_iter()
        .filter(|contour| contour.border_type == BorderType::Outer)
        .take(params.max_candidates);
    for contour in outer_contours {
        let Some(rect) = min_area_rect(&convex_hull(&*contour.points)) else {
            continue;
        };
        if rect.min_side() < params.min_size {
            continue;
        }

        let score = box_score(prob_map, &rect.corners());
        if score < params.box_thresh {
            continue;
        }

        let distance =
            rect.width * rect.height * params.unclip_ratio / (2.0 * (rect.width + rect.height));
        let grown = rect.grow(distance);
        if grown.min_side() < params.min_size + 2.0 {
            continue;
        }

        let corners = order_corners(grown.corners()).map(|(x, y)| {
            Point::new(
                (x * scale_x).round().clamp(0.0, src_w as f32),
                (y * scale_y).round().clamp(0.0, src_h as f32),
            )
        });
        boxes.push(TextBox { corners, score });
    }
    boxes
}

/// Smallest-area enclosing rectangle of a convex hull, by rotating calipers.
///
/// Returns `None` for hulls with no area.
fn min_area_rect(hull: &[PixelPoint<i32>]) -> Option<RotatedRect> {
    if hull.len() < 3 {
        return None;
    }
    let points = hull
        .iter()
        .map(|p| (p.x as f32, p.y as f32))
        .collect::<Vec<_>>();

    let mut best: Option<(f32, RotatedRect)> = None;
    for (i, &(ax, ay)) in points.iter().enumerate() {
        let (bx, by) = points[(i + 1) % points.len()];
        let length = (bx - ax).hypot(by - ay);
        if length < f32::EPSILON {
            continue;
        }
        let (ux, uy) = ((bx - ax) / length, (by - ay) / length);
        let (vx, vy) = (-uy, ux);

        let (mut min_u, mut max_u) = (f32::MAX, f32::MIN);
        let (mut min_v, mut max_v) = (f32::MAX, f32::MIN);
        for &(px, py) in &points {
            let (dx, dy) = (px - ax, py - ay);
            let along = dx * ux + dy * uy;
            let across = dx * vx + dy * vy;
            min_u = min_u.min(along);
            max_u = max_u.max(along);
            min_v = min_v.min(across);
            max_v = max_v.max(across);
        }

        let (width, height) = (max_u - min_u, max_v - min_v);
        let area = width * height;
        if best.as_ref().is_some_and(|(best_area, _)| *best_area <= area) {
            continue;
        }
        let (mid_u, mid_v) = ((min_u + max_u) / 2.0, (min_v + max_v) / 2.0);
        let center = (ax + mid_u * ux + mid_v * vx, ay + mid_u * uy + mid_v * vy);
        best = Some((
            area,
            RotatedRect {
                center,
                axis: (ux, uy),
                width,
                height,
            },
        ));
    }
    best.map(|(_, rect)| rect).filter(|rect| rect.min_side() > 0.0)
}

/// Mean probability of the map pixels covered by a quadrilateral.
fn box_score(prob_map: ArrayView2<'_, f32>, corners: &[(f32, f32); 4]) -> f32 {
    let (map_h, map_w) = prob_map.dim();
    let clamp_x = |v: f32| (v.max(0.0) as usize).min(map_w - 1);
    let clamp_y = |v: f32| (v.max(0.0) as usize).min(map_h - 1);
    let min_x = clamp_x(corners.iter().map(|c| c.0).fold(f32::MAX, f32::min).floor());
    let max_x = clamp_x(corners.iter().map(|c| c.0).fold(f32::MIN, f32::max).ceil());
    let min_y = clamp_y(corners.iter().map(|c| c.1).fold(f32::MAX, f32::min).floor());
    let max_y = clamp_y(corners.iter().map(|c| c.1).fold(f32::MIN, f32::max).ceil());

    let mut polygon = corners
        .iter()
        .map(|&(x, y)| {
            PixelPoint::new(
                (x - min_x as f32).round() as i32,
                (y - min_y as f32).round() as i32,
            )
        })
        .collect::<Vec<_>>();
    polygon.dedup();
    while polygon.len() > 1 && polygon.first() == polygon.last() {
        polygon.pop();
    }
    if polygon.len() < 3 {
        return 0.0;
    }

    let mut mask = GrayImage::new((max_x - min_x + 1) as u32, (max_y - min_y + 1) as u32);
    draw_polygon_mut(&mut mask, &polygon, Luma([255]));

    let (mut total, mut count) = (0.0, 0usize);
    for (x, y, pixel) in mask.enumerate_pixels() {
        if pixel[0] > 0 {
            total += prob_map[[min_y + y as usize, min_x + x as usize]];
            count += 1;
        }
    }
    if count == 0 { 0.0 } else { total / count as f32 }
}

/// Put corners in top-left, top-right, bottom-right, bottom-left order.
///
/// The two leftmost corners become the left edge, and within each edge the
/// upper corner comes first.
fn order_corners(mut corners: [(f32, f32); 4]) -> [(f32, f32); 4] {
    corners.sort_by(|a, b| a.0.total_cmp(&b.0));
    let (top_left, bottom_left) = if corners[1].1 > corners[0].1 {
        (corners[0], corners[1])
    } else {
        (corners[1], corners[0])
    };
    let (top_right, bottom_right) = if corners[3].1 > corners[2].1 {
        (corners[2], corners[3])
    } else {
        (corners[3], corners[2])
    };
    [top_left, top_right, bottom_right, bottom_left]
}

/// Order boxes top-to-bottom, then left-to-right, by their top-left corner.
///
/// Boxes whose top-left corners are within 10 pixels vertically count as one
/// row, so slightly skewed lines still read left-to-right.
pub fn sort_boxes(mut boxes: Vec<TextBox>) -> Vec<TextBox> {
    let origin = |b: &TextBox| b.corners[0];
    boxes.sort_by(|a, b| {
        let (a, b) = (origin(a), origin(b));
        a.y.total_cmp(&b.y).then(a.x.total_cmp(&b.x))
    });
    for i in 0..boxes.len().saturating_sub(1) {
        for j in (0..=i).rev() {
            let (upper, lower) = (origin(&boxes[j]), origin(&boxes[j + 1]));
            if (lower.y - upper.y).abs() < 10.0 && lower.x < upper.x {
                boxes.swap(j, j + 1);
            } else {
                break;
            }
        }
    }
    boxes
}

/// Cut a box out of the source image and straighten it.
///
/// The box is warped onto an upright rectangle as long as its longer top or
/// bottom edge and as tall as its longer side edge. Crops that are much
/// taller than they are wide are then rotated a quarter turn
/// counter-clockwise, so vertical text reaches the recognizer as a line.
pub fn crop_text_region(image: &RgbImage, text_box: &TextBox) -> RgbImage {
    let [tl, tr, br, bl] = text_box.corners;
    let distance = |a: Point, b: Point| (a.x - b.x).hypot(a.y - b.y);
    let w = distance(tl, tr).max(distance(bl, br)).round().max(1.0) as u32;
    let h = distance(tl, bl).max(distance(tr, br)).round().max(1.0) as u32;

    let from = text_box.corners.map(|p| (p.x, p.y));
    let to = [
        (0.0, 0.0),
        (w as f32, 0.0),
        (w as f32, h as f32),
        (0.0, h as f32),
    ];
    let crop = match Projection::from_control_points(from, to) {
        Some(projection) => {
            let mut out = RgbImage::new(w, h);
            warp_into(
                image,
                &projection,
                Interpolation::Bilinear,
                Rgb([0, 0, 0]),
                &mut out,
            );
            out
        }
        None => {
            trace!(?text_box, "Degenerate text box; cropping its bounds");
            crop_bounds(image, text_box)
        }
    };

    let (w, h) = crop.dimensions();
    if h as f32 / w as f32 >= 1.5 {
        image::imageops::rotate270(&crop)
    } else {
        crop
    }
}

/// Axis-aligned crop of a box's bounding rectangle, clamped to the image.
fn crop_bounds(image: &RgbImage, text_box: &TextBox) -> RgbImage {
    let (img_w, img_h) = image.dimensions();
    let xs = text_box.corners.map(|p| p.x);
    let ys = text_box.corners.map(|p| p.y);
    let left = xs.iter().copied().fold(f32::MAX, f32::min).max(0.0) as u32;
    let top = ys.iter().copied().fold(f32::MAX, f32::min).max(0.0) as u32;
    let right = xs.iter().copied().fold(f32::MIN, f32::max).ceil() as u32;
    let bottom = ys.iter().copied().fold(f32::MIN, f32::max).ceil() as u32;
    let x = left.min(img_w.saturating_sub(1));
    let y = top.min(img_h.saturating_sub(1));
    let w = right.saturating_sub(x).clamp(1, img_w - x);
    let h = bottom.saturating_sub(y).clamp(1, img_h - y);
    image::imageops::crop_imm(image, x, y, w, h).to_image()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::results::rect_polygon;

    fn map_with_block(
        size: usize,
        rows: std::ops::Range<usize>,
        cols: std::ops::Range<usize>,
        value: f32,
    ) -> Array2<f32> {
        let mut map = Array2::<f32>::zeros((size, size));
        for y in rows {
            for x in cols.clone() {
                map[[y, x]] = value;
            }
        }
        map
    }

    /// A 360x10 band centered at (200, 60), tilted `degrees` clockwise.
    fn map_with_tilted_band(degrees: f32) -> Array2<f32> {
        let (ux, uy) = (degrees.to_radians().cos(), degrees.to_radians().sin());
        Array2::from_shape_fn((120, 400), |(y, x)| {
            let (dx, dy) = (x as f32 - 200.0, y as f32 - 60.0);
            let along = dx * ux + dy * uy;
            let across = -dx * uy + dy * ux;
            if along.abs() <= 180.0 && across.abs() <= 5.0 {
                0.9
            } else {
                0.0
            }
        })
    }

    fn rect_box(left: f32, top: f32, right: f32, bottom: f32) -> TextBox {
        let polygon = rect_polygon(left, top, right, bottom);
        TextBox {
            corners: [polygon[0], polygon[1], polygon[2], polygon[3]],
            score: 0.9,
        }
    }

    fn text_box(left: f32, top: f32) -> TextBox {
        rect_box(left, top, left + 50.0, top + 20.0)
    }

    #[test]
    fn resize_dims_rounds_to_multiples_of_32() {
        assert_eq!(resize_dims(100, 50, 960), (96, 64));
        assert_eq!(resize_dims(1920, 1080, 960), (960, 544));
        assert_eq!(resize_dims(10, 10, 960), (32, 32));
    }

    #[test]
    fn one_block_becomes_one_grown_box() {
        let map = map_with_block(64, 10..20, 5..45, 0.9);
        let boxes = extract_boxes(map.view(), &DetectionParams::default(), 128, 128);
        assert_eq!(boxes.len(), 1);
        // Pixel centers span 39x9 map pixels. Grown by 39*9*1.5/96 on each
        // side, then doubled into source coordinates.
        assert_eq!(boxes[0].polygon(), rect_polygon(0.0, 9.0, 99.0, 49.0));
        assert!((boxes[0].score - 0.9).abs() < 1e-5);
    }

    #[test]
    fn tilted_lines_are_kept_with_rotated_corners() {
        let map = map_with_tilted_band(5.0);
        let boxes = extract_boxes(map.view(), &DetectionParams::default(), 400, 120);
        assert_eq!(boxes.len(), 1);

        let [tl, tr, br, bl] = boxes[0].corners;
        assert!(boxes[0].score > 0.8);
        let slope = (tr.y - tl.y).atan2(tr.x - tl.x).to_degrees();
        assert!((4.0..6.0).contains(&slope), "slope was {slope}");
        assert!((tl.x - 15.0).abs() <= 2.0 && (tl.y - 31.0).abs() <= 2.0);
        assert!((br.x - 385.0).abs() <= 2.0 && (br.y - 89.0).abs() <= 2.0);
        assert!(bl.y > tl.y && br.y > tr.y);
    }

    #[test]
    fn steeper_lines_are_kept_too() {
        let map = map_with_tilted_band(-12.0);
        let boxes = extract_boxes(map.view(), &DetectionParams::default(), 400, 120);
        assert_eq!(boxes.len(), 1);
        let [tl, tr, _, _] = boxes[0].corners;
        assert!(tr.y < tl.y);
    }

    #[test]
    fn faint_regions_are_dropped() {
        let map = map_with_block(64, 10..20, 5..45, 0.4);
        let boxes = extract_boxes(map.view(), &DetectionParams::default(), 64, 64);
        assert!(boxes.is_empty());
    }

    #[test]
    fn specks_are_dropped() {
        let map = map_with_block(64, 10..12, 5..7, 0.9);
        let boxes = extract_boxes(map.view(), &DetectionParams::default(), 64, 64);
        assert!(boxes.is_empty());
    }

    #[test]
    fn blank_map_has_no_boxes() {
        let map = Array2::<f32>::zeros((32, 32));
        assert!(extract_boxes(map.view(), &DetectionParams::default(), 32, 32).is_empty());
    }

    #[test]
    fn corners_are_ordered_clockwise_from_top_left() {
        let ordered = order_corners([(20.0, 20.0), (10.0, 10.0), (20.0, 10.0), (10.0, 20.0)]);
        assert_eq!(
            ordered,
            [(10.0, 10.0), (20.0, 10.0), (20.0, 20.0), (10.0, 20.0)]
        );
    }

    #[test]
    fn min_area_rect_follows_the_hull() {
        // A diamond: its tightest rectangle is rotated 45 degrees.
        let hull = [
            PixelPoint::new(10, 0),
            PixelPoint::new(20, 10),
            PixelPoint::new(10, 20),
            PixelPoint::new(0, 10),
        ];
        let rect = min_area_rect(&hull).unwrap();
        let side = 200.0_f32.sqrt();
        assert!((rect.width - side).abs() < 1e-3);
        assert!((rect.height - side).abs() < 1e-3);
        assert!(min_area_rect(&hull[..2]).is_none());
    }

    #[test]
    fn sort_reads_rows_left_to_right() {
        let sorted = sort_boxes(vec![
            text_box(300.0, 100.0),
            text_box(10.0, 200.0),
            text_box(20.0, 104.0),
        ]);
        let order = sorted
            .iter()
            .map(|b| (b.corners[0].x, b.corners[0].y))
            .collect::<Vec<_>>();
        assert_eq!(order, vec![(20.0, 104.0), (300.0, 100.0), (10.0, 200.0)]);
    }

    #[test]
    fn tall_crops_are_rotated() {
        let image = RgbImage::new(100, 100);
        let tall = rect_box(10.0, 10.0, 20.0, 60.0);
        assert_eq!(crop_text_region(&image, &tall).dimensions(), (50, 10));

        let wide = text_box(0.0, 0.0);
        assert_eq!(crop_text_region(&image, &wide).dimensions(), (50, 20));
    }

    #[test]
    fn tilted_crops_are_straightened() {
        let image = RgbImage::from_pixel(120, 60, Rgb([200, 0, 0]));
        let tilted = TextBox {
            corners: [
                Point::new(10.0, 10.0),
                Point::new(110.0, 30.0),
                Point::new(106.0, 50.0),
                Point::new(6.0, 30.0),
            ],
            score: 0.9,
        };
        let crop = crop_text_region(&image, &tilted);
        assert_eq!(crop.dimensions(), (102, 20));
        assert_eq!(*crop.get_pixel(51, 10), Rgb([200, 0, 0]));
    }

    #[test]
    fn degenerate_boxes_fall_back_to_their_bounds() {
        let image = RgbImage::new(40, 40);
        let flat = rect_box(30.0, 35.0, 30.0, 35.0);
        assert_eq!(crop_text_region(&image, &flat).dimensions(), (1, 1));
    }
}
