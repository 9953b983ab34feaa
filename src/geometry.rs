use anyhow::{bail, Result};
use imageproc::geometry::{approximate_polygon_dp, arc_length};
use imageproc::point::Point;
use nalgebra::{Matrix3, Vector2};

/// Fraction of the contour perimeter used as the Douglas-Peucker tolerance
pub const APPROX_EPSILON_FRACTION: f64 = 0.02;

/// Size of the smallest axis-aligned canvas that holds a `width`x`height`
/// rectangle rotated by `angle_degrees`, before rounding.
pub fn rotation_canvas(width: u32, height: u32, angle_degrees: f64) -> (f64, f64) {
    let rads = angle_degrees.to_radians();
    let (w, h) = (width as f64, height as f64);

    let new_width = (rads.sin() * h).abs() + (rads.cos() * w).abs();
    let new_height = (rads.cos() * h).abs() + (rads.sin() * w).abs();

    (new_width, new_height)
}

/// Canvas dimensions in whole pixels. Always rounded up so no edge is clipped.
pub fn rotation_canvas_pixels(width: u32, height: u32, angle_degrees: f64) -> (u32, u32) {
    let (nw, nh) = rotation_canvas(width, height, angle_degrees);
    (nw.ceil() as u32, nh.ceil() as u32)
}

/// Rotation about `center` by `angle_degrees` with unit scale.
///
/// Positive angles turn the content counter-clockwise on screen (y pointing
/// down). The matrix maps source coordinates to destination coordinates.
pub fn rotation_about(center: (f64, f64), angle_degrees: f64) -> Matrix3<f64> {
    let rads = angle_degrees.to_radians();
    let (alpha, beta) = (rads.cos(), rads.sin());
    let (cx, cy) = center;

    Matrix3::new(
        alpha, beta, (1.0 - alpha) * cx - beta * cy,
        -beta, alpha, beta * cx + (1.0 - alpha) * cy,
        0.0, 0.0, 1.0,
    )
}

/// Build the forward matrix used by [`crate::transform::rotate_image`].
///
/// Two steps:
/// 1. rotate about the center of the enlarged canvas `(nw/2, nh/2)`;
/// 2. add the canvas growth `((nw-w)/2, (nh-h)/2)`, passed through the same
///    rotation, to the translation column.
///
/// Step 1 alone is referenced to the new center, so the original content
/// would sit off-center by the rotated growth; step 2 moves the source center
/// exactly onto the canvas center.
pub fn rotation_matrix(width: u32, height: u32, angle_degrees: f64) -> Matrix3<f64> {
    let (nw, nh) = rotation_canvas(width, height, angle_degrees);
    let mut matrix = rotation_about((nw * 0.5, nh * 0.5), angle_degrees);

    let linear = matrix.fixed_view::<2, 2>(0, 0).into_owned();
    let growth = Vector2::new((nw - width as f64) * 0.5, (nh - height as f64) * 0.5);
    let shift = linear * growth;

    matrix[(0, 2)] += shift.x;
    matrix[(1, 2)] += shift.y;

    matrix
}

/// Transform a point using the affine matrix
pub fn transform_point(matrix: &Matrix3<f64>, x: f64, y: f64) -> (f64, f64) {
    let p = nalgebra::Vector3::new(x, y, 1.0);
    let result = matrix * p;
    (result.x / result.z, result.y / result.z)
}

fn farthest_from(contour: &[Point<i32>], from: Point<i32>) -> usize {
    let squared = |p: &Point<i32>| {
        let dx = (p.x - from.x) as i64;
        let dy = (p.y - from.y) as i64;
        dx * dx + dy * dy
    };

    contour
        .iter()
        .enumerate()
        .max_by_key(|(_, p)| squared(p))
        .map(|(i, _)| i)
        .unwrap_or(0)
}

/// Simplify a closed contour to a polygon with a tolerance of 2% of its
/// perimeter.
///
/// The loop is cut at two mutually distant vertices and each half is
/// simplified as an open curve, so the split points are always kept and the
/// result carries no closing duplicate.
pub fn simplify_contour(contour: &[Point<i32>]) -> Vec<Point<i32>> {
    if contour.len() < 3 {
        return contour.to_vec();
    }

    let perimeter = arc_length(contour, true);
    if perimeter <= 0.0 {
        return vec![contour[0]];
    }
    let epsilon = APPROX_EPSILON_FRACTION * perimeter;

    let start = farthest_from(contour, contour[0]);
    let end = farthest_from(contour, contour[start]);
    let (a, b) = (start.min(end), start.max(end));

    let first_half = &contour[a..=b];
    let second_half: Vec<Point<i32>> = contour[b..]
        .iter()
        .chain(contour[..=a].iter())
        .copied()
        .collect();

    let mut polygon = approximate_polygon_dp(first_half, epsilon, false);
    polygon.pop();
    let mut rest = approximate_polygon_dp(&second_half, epsilon, false);
    rest.pop();
    polygon.append(&mut rest);

    polygon.dedup();
    if polygon.len() > 1 && polygon.first() == polygon.last() {
        polygon.pop();
    }

    polygon
}

/// Corners of a quadrilateral in top-left, top-right, bottom-right,
/// bottom-left order.
///
/// The two left-most vertices give top-left and bottom-left by y. Of the two
/// right-most, the one farther from top-left is bottom-right. Quads turned by
/// 45° order the same way as upright ones.
pub fn order_corners(points: &[Point<i32>]) -> Result<[(f32, f32); 4]> {
    if points.len() != 4 {
        bail!(
            "Expected a quadrilateral, contour simplified to {} vertices",
            points.len()
        );
    }

    let mut by_x = points.to_vec();
    by_x.sort_by_key(|p| p.x);

    let mut left = [by_x[0], by_x[1]];
    left.sort_by_key(|p| p.y);
    let [top_left, bottom_left] = left;

    let squared = |p: &Point<i32>| {
        let dx = (p.x - top_left.x) as i64;
        let dy = (p.y - top_left.y) as i64;
        dx * dx + dy * dy
    };
    let (top_right, bottom_right) = if squared(&by_x[2]) > squared(&by_x[3]) {
        (by_x[3], by_x[2])
    } else {
        (by_x[2], by_x[3])
    };

    let as_f32 = |p: Point<i32>| (p.x as f32, p.y as f32);
    Ok([
        as_f32(top_left),
        as_f32(top_right),
        as_f32(bottom_right),
        as_f32(bottom_left),
    ])
}

fn distance(a: (f32, f32), b: (f32, f32)) -> f64 {
    let dx = (a.0 - b.0) as f64;
    let dy = (a.1 - b.1) as f64;
    (dx * dx + dy * dy).sqrt()
}

/// Size of the upright rectangle a set of ordered corners is flattened into:
/// the longer of each pair of opposite edges, truncated to whole pixels.
pub fn flattened_size(corners: &[(f32, f32); 4]) -> (u32, u32) {
    let [tl, tr, br, bl] = *corners;

    let width = (distance(br, bl) as u32).max(distance(tr, tl) as u32);
    let height = (distance(tr, br) as u32).max(distance(tl, bl) as u32);

    (width, height)
}

/// Destination corners for a `width`x`height` flattened view, in the same
/// order as [`order_corners`].
pub fn flattened_corners(width: u32, height: u32) -> [(f32, f32); 4] {
    let right = width.saturating_sub(1) as f32;
    let bottom = height.saturating_sub(1) as f32;
    [(0.0, 0.0), (right, 0.0), (right, bottom), (0.0, bottom)]
}

/// Area enclosed by a polygon (shoelace formula)
pub fn polygon_area(points: &[Point<i32>]) -> f64 {
    let n = points.len();
    let mut area = 0.0;
    for i in 0..n {
        let j = (i + 1) % n;
        area += points[i].x as f64 * points[j].y as f64;
        area -= points[j].x as f64 * points[i].y as f64;
    }
    area.abs() / 2.0
}

/// Inverse of an affine matrix, `None` when singular
pub fn invert(matrix: &Matrix3<f64>) -> Option<Matrix3<f64>> {
    matrix.try_inverse()
}
