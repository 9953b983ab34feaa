use image::{DynamicImage, GrayImage};
use imageproc::contours::find_contours;
use imageproc::contrast::{otsu_level, threshold as apply_threshold, ThresholdType};
use imageproc::filter::separable_filter_equal;
use imageproc::point::Point;
use log::debug;

use crate::geometry::{polygon_area, simplify_contour};

/// 5-tap Gaussian `[1, 4, 6, 4, 1] / 16`, applied along both axes for the
/// 5x5 smoothing done before binarization
pub const BLUR_KERNEL: [f32; 5] = [0.0625, 0.25, 0.375, 0.25, 0.0625];

/// Smooth with the 5x5 Gaussian [`BLUR_KERNEL`]
pub fn blur(gray: &GrayImage) -> GrayImage {
    separable_filter_equal(gray, &BLUR_KERNEL)
}

/// Blur and binarize an answer-sheet image.
///
/// The cut level is picked by Otsu's method on the blurred image. Output is
/// inverted: pixels darker than or equal to the level (pencil marks, printed
/// boxes) become 255, brighter paper becomes 0.
pub fn threshold(img: &DynamicImage) -> GrayImage {
    let gray = img.to_luma8();
    let blurred = blur(&gray);
    let level = otsu_level(&blurred);

    debug!(
        "Threshold: {}x{}, otsu level {}",
        gray.width(),
        gray.height(),
        level
    );

    apply_threshold(&blurred, level, ThresholdType::BinaryInverted)
}

/// Pick the contour most likely to outline the answer sheet: the largest
/// one whose simplified polygon is a quadrilateral.
///
/// This is the pre-filter callers run before
/// [`crate::transform::perspective_crop`], which requires a contour that
/// simplifies to exactly four vertices.
pub fn find_sheet_contour(binary: &GrayImage) -> Option<Vec<Point<i32>>> {
    let contours = find_contours::<i32>(binary);
    debug!("Found {} contours", contours.len());

    contours
        .into_iter()
        .filter_map(|contour| {
            let polygon = simplify_contour(&contour.points);
            if polygon.len() != 4 {
                return None;
            }
            let area = polygon_area(&polygon);
            (area > 0.0).then_some((area, contour.points))
        })
        .max_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(area, points)| {
            debug!("Sheet contour: {} points, area {:.1}", points.len(), area);
            points
        })
}
