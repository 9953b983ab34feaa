use anyhow::{bail, Context, Result};
use image::{DynamicImage, ImageBuffer, Luma, Pixel, Rgba, RgbaImage};
use imageproc::definitions::Clamp;
use imageproc::geometric_transformations::{warp_into, Interpolation, Projection};
use imageproc::point::Point;
use log::debug;

use crate::geometry::{
    flattened_corners, flattened_size, invert, order_corners, rotation_canvas_pixels,
    rotation_matrix, simplify_contour, transform_point,
};

/// Lanczos window half-width; the kernel spans `2 * LANCZOS_A` taps per axis
const LANCZOS_A: i32 = 4;

/// Distance from an integer below which a sample position is treated as exact
const SNAP_EPSILON: f64 = 1e-9;

/// Premultiply alpha: RGB values are multiplied by alpha
fn premultiply_alpha(img: &RgbaImage) -> Vec<[f64; 4]> {
    img.pixels()
        .map(|pixel| {
            let alpha = pixel[3] as f64 / 255.0;
            [
                pixel[0] as f64 * alpha,
                pixel[1] as f64 * alpha,
                pixel[2] as f64 * alpha,
                pixel[3] as f64,
            ]
        })
        .collect()
}

/// Unpremultiply alpha: divide RGB by alpha
fn unpremultiply_alpha(premultiplied: [f64; 4]) -> Rgba<u8> {
    let alpha = premultiplied[3].clamp(0.0, 255.0);
    if alpha < 0.5 {
        return Rgba([0, 0, 0, 0]);
    }

    let alpha_norm = alpha / 255.0;
    let channel = |v: f64| (v / alpha_norm).round().clamp(0.0, 255.0) as u8;

    Rgba([
        channel(premultiplied[0]),
        channel(premultiplied[1]),
        channel(premultiplied[2]),
        alpha.round() as u8,
    ])
}

fn sinc(x: f64) -> f64 {
    if x == 0.0 {
        1.0
    } else {
        let px = std::f64::consts::PI * x;
        px.sin() / px
    }
}

/// Lanczos-4 weights for the eight taps at offsets `-3..=4` around the
/// integer part of a sample position with fractional part `t`.
fn lanczos_weights(t: f64) -> [f64; 8] {
    let mut weights = [0.0; 8];
    if t == 0.0 {
        weights[(LANCZOS_A - 1) as usize] = 1.0;
        return weights;
    }

    let a = LANCZOS_A as f64;
    for (i, weight) in weights.iter_mut().enumerate() {
        let d = t - (i as f64 - (a - 1.0));
        *weight = sinc(d) * sinc(d / a);
    }

    let sum: f64 = weights.iter().sum();
    for weight in weights.iter_mut() {
        *weight /= sum;
    }

    weights
}

/// Split a coordinate into integer and fractional parts, snapping values
/// within [`SNAP_EPSILON`] of an integer.
fn split_coordinate(v: f64) -> (i32, f64) {
    let nearest = v.round();
    if (v - nearest).abs() < SNAP_EPSILON {
        return (nearest as i32, 0.0);
    }
    let floor = v.floor();
    (floor as i32, v - floor)
}

/// Lanczos interpolation at a given position. Taps outside the source
/// read as transparent black.
fn lanczos_interpolate(
    premultiplied: &[[f64; 4]],
    width: u32,
    height: u32,
    x: f64,
    y: f64,
) -> [f64; 4] {
    let (x_int, x_frac) = split_coordinate(x);
    let (y_int, y_frac) = split_coordinate(y);

    let wx = lanczos_weights(x_frac);
    let wy = lanczos_weights(y_frac);

    let mut result = [0.0; 4];

    for (j, weight_y) in wy.iter().enumerate() {
        if *weight_y == 0.0 {
            continue;
        }
        let py = y_int + j as i32 - (LANCZOS_A - 1);
        if py < 0 || py >= height as i32 {
            continue;
        }

        for (i, weight_x) in wx.iter().enumerate() {
            if *weight_x == 0.0 {
                continue;
            }
            let px = x_int + i as i32 - (LANCZOS_A - 1);
            if px < 0 || px >= width as i32 {
                continue;
            }

            let idx = (py as u32 * width + px as u32) as usize;
            let weight = weight_x * weight_y;
            for c in 0..4 {
                result[c] += premultiplied[idx][c] * weight;
            }
        }
    }

    result
}

/// Rotate an image by `angle_degrees` onto a canvas large enough to hold all
/// of it.
///
/// Positive angles turn the content counter-clockwise. The canvas is
/// `ceil(|sin θ|·h + |cos θ|·w)` by `ceil(|cos θ|·h + |sin θ|·w)` and the
/// source center lands on the canvas center; uncovered canvas pixels are
/// transparent black.
pub fn rotate_image(img: &RgbaImage, angle_degrees: f64) -> RgbaImage {
    let (src_width, src_height) = img.dimensions();
    let (new_width, new_height) = rotation_canvas_pixels(src_width, src_height, angle_degrees);
    let forward_matrix = rotation_matrix(src_width, src_height, angle_degrees);

    debug!(
        "Rotate {:.3}°: {}x{} -> {}x{}",
        angle_degrees, src_width, src_height, new_width, new_height
    );

    // A rotation with unit scale always has an inverse.
    let inverse_matrix = match invert(&forward_matrix) {
        Some(inv) => inv,
        None => return img.clone(),
    };

    let premultiplied = premultiply_alpha(img);
    let mut output = RgbaImage::new(new_width, new_height);

    for (out_x, out_y, pixel) in output.enumerate_pixels_mut() {
        let (src_x, src_y) = transform_point(&inverse_matrix, out_x as f64, out_y as f64);
        let interpolated =
            lanczos_interpolate(&premultiplied, src_width, src_height, src_x, src_y);
        *pixel = unpremultiply_alpha(interpolated);
    }

    output
}

fn warp_quad<P>(
    img: &ImageBuffer<P, Vec<P::Subpixel>>,
    projection: &Projection,
    size: (u32, u32),
    fill: P,
) -> ImageBuffer<P, Vec<P::Subpixel>>
where
    P: Pixel + Send + Sync,
    P::Subpixel: Into<f32> + Clamp<f32> + Send + Sync,
{
    let mut output = ImageBuffer::new(size.0, size.1);
    warp_into(img, projection, Interpolation::Bilinear, fill, &mut output);
    output
}

/// Flatten the quadrilateral outlined by `contour` into an upright
/// rectangle.
///
/// The contour must simplify to exactly four vertices (see
/// [`crate::detection::find_sheet_contour`]). The output size depends only on
/// the quadrilateral's edge lengths. Grayscale images stay grayscale; any
/// other format is warped as RGBA.
pub fn perspective_crop(contour: &[Point<i32>], img: &DynamicImage) -> Result<DynamicImage> {
    let polygon = simplify_contour(contour);
    let corners = order_corners(&polygon).context("Contour is not a quadrilateral")?;
    let (width, height) = flattened_size(&corners);

    if width == 0 || height == 0 {
        bail!("Quadrilateral {:?} is degenerate", corners);
    }

    let projection = Projection::from_control_points(corners, flattened_corners(width, height))
        .with_context(|| format!("No perspective transform for corners {:?}", corners))?;

    debug!("Perspective crop: corners {:?} -> {}x{}", corners, width, height);

    let warped = match img {
        DynamicImage::ImageLuma8(gray) => DynamicImage::ImageLuma8(warp_quad(
            gray,
            &projection,
            (width, height),
            Luma([0]),
        )),
        other => DynamicImage::ImageRgba8(warp_quad(
            &other.to_rgba8(),
            &projection,
            (width, height),
            Rgba([0, 0, 0, 255]),
        )),
    };

    Ok(warped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::rotation_canvas;
    use image::GrayImage;

    fn checkerboard(width: u32, height: u32) -> RgbaImage {
        RgbaImage::from_fn(width, height, |x, y| {
            let v = ((x * 37 + y * 91) % 256) as u8;
            Rgba([v, 255 - v, (x * 7 % 256) as u8, 255])
        })
    }

    #[test]
    fn test_premultiply_unpremultiply() {
        let pixel = Rgba([200, 100, 50, 128]);
        let img = RgbaImage::from_pixel(1, 1, pixel);
        let premul = premultiply_alpha(&img);

        let unpremul = unpremultiply_alpha(premul[0]);
        assert!((unpremul[0] as i32 - pixel[0] as i32).abs() <= 1);
        assert!((unpremul[1] as i32 - pixel[1] as i32).abs() <= 1);
        assert!((unpremul[2] as i32 - pixel[2] as i32).abs() <= 1);
        assert_eq!(unpremul[3], pixel[3]);
    }

    #[test]
    fn test_lanczos_weights_normalised() {
        for t in [0.0, 0.1, 0.25, 0.5, 0.75, 0.99] {
            let sum: f64 = lanczos_weights(t).iter().sum();
            assert!((sum - 1.0).abs() < 1e-12, "t={} sum={}", t, sum);
        }
    }

    #[test]
    fn test_lanczos_weights_symmetric_at_half() {
        let w = lanczos_weights(0.5);
        for i in 0..4 {
            assert!((w[i] - w[7 - i]).abs() < 1e-12);
        }
    }

    #[test]
    fn test_split_coordinate_snaps() {
        assert_eq!(split_coordinate(3.0 - 1e-12), (3, 0.0));
        assert_eq!(split_coordinate(-2.0 + 1e-12), (-2, 0.0));
        let (i, f) = split_coordinate(4.25);
        assert_eq!(i, 4);
        assert!((f - 0.25).abs() < 1e-12);
    }

    #[test]
    fn test_rotate_zero_is_identity() {
        let img = checkerboard(17, 11);
        let rotated = rotate_image(&img, 0.0);
        assert_eq!(rotated.dimensions(), (17, 11));
        assert_eq!(rotated, img);
    }

    #[test]
    fn test_rotate_canvas_dimensions() {
        let img = checkerboard(40, 20);
        for angle in [-120.0, -33.0, 10.0, 45.0, 75.0] {
            let rotated = rotate_image(&img, angle);
            let (nw, nh) = rotation_canvas(40, 20, angle);
            assert_eq!(
                rotated.dimensions(),
                (nw.ceil() as u32, nh.ceil() as u32),
                "angle {}",
                angle
            );
        }
    }

    #[test]
    fn test_rotate_keeps_content_centered() {
        // Opaque white block on an opaque black page
        let img = RgbaImage::from_fn(41, 41, |x, y| {
            if (14..27).contains(&x) && (14..27).contains(&y) {
                Rgba([255, 255, 255, 255])
            } else {
                Rgba([0, 0, 0, 255])
            }
        });

        let rotated = rotate_image(&img, 30.0);
        let (w, h) = rotated.dimensions();
        let center = rotated.get_pixel(w / 2, h / 2);
        assert!(center[0] > 200, "center {:?}", center);
        assert_eq!(center[3], 255);

        // Canvas corners are not covered by the rotated page.
        assert_eq!(*rotated.get_pixel(0, 0), Rgba([0, 0, 0, 0]));
        assert_eq!(*rotated.get_pixel(w - 1, h - 1), Rgba([0, 0, 0, 0]));
    }

    #[test]
    fn test_rotate_preserves_opaque_mass() {
        let img = RgbaImage::from_pixel(30, 20, Rgba([255, 255, 255, 255]));
        let rotated = rotate_image(&img, 20.0);

        let coverage: f64 = rotated.pixels().map(|p| p[3] as f64 / 255.0).sum();
        let expected = 30.0 * 20.0;
        assert!(
            (coverage - expected).abs() / expected < 0.1,
            "coverage {} vs {}",
            coverage,
            expected
        );
    }

    fn bright_bounds(img: &RgbaImage) -> Option<(u32, u32, u32, u32)> {
        let mut bounds: Option<(u32, u32, u32, u32)> = None;
        for (x, y, p) in img.enumerate_pixels() {
            if p[0] > 127 && p[3] > 127 {
                let b = bounds.get_or_insert((x, y, x, y));
                b.0 = b.0.min(x);
                b.1 = b.1.min(y);
                b.2 = b.2.max(x);
                b.3 = b.3.max(y);
            }
        }
        bounds
    }

    #[test]
    fn test_rotate_forward_and_back() {
        let img = RgbaImage::from_fn(31, 31, |x, y| {
            if (10..21).contains(&x) && (10..21).contains(&y) {
                Rgba([255, 255, 255, 255])
            } else {
                Rgba([0, 0, 0, 255])
            }
        });

        let there = rotate_image(&img, 25.0);
        let back = rotate_image(&there, -25.0);
        let (w, h) = back.dimensions();
        assert!(w >= 31 && h >= 31);

        // Each rotation puts its source center on its canvas center, so the
        // round trip shifts the original by a constant offset.
        let (mid_there, _) = rotation_canvas(31, 31, 25.0);
        let (there_w, there_h) = there.dimensions();
        let (mid_back, _) = rotation_canvas(there_w, there_h, -25.0);
        let shift = mid_back / 2.0 - there_w as f64 / 2.0 + mid_there / 2.0 - 15.5;
        let to_back = |v: u32| (v as f64 + shift).round() as u32;

        // White block stays white, the black page around it stays black.
        for y in 12..19 {
            for x in 12..19 {
                let p = back.get_pixel(to_back(x), to_back(y));
                assert!(p[0] > 200 && p[3] > 200, "({}, {}) -> {:?}", x, y, p);
            }
        }
        for (x, y) in [(4, 4), (26, 4), (4, 26), (26, 26), (15, 4), (4, 15)] {
            let p = back.get_pixel(to_back(x), to_back(y));
            assert!(p[0] < 40 && p[3] > 200, "({}, {}) -> {:?}", x, y, p);
        }

        let (x0, y0, x1, y1) = bright_bounds(&back).expect("white block survives");
        let expected_min = 10.0 + shift;
        let expected_max = 20.0 + shift;
        for (actual, expected) in [
            (x0, expected_min),
            (y0, expected_min),
            (x1, expected_max),
            (y1, expected_max),
        ] {
            assert!(
                (actual as f64 - expected).abs() <= 1.5,
                "bounds {:?}, expected {:.1}..{:.1}",
                (x0, y0, x1, y1),
                expected_min,
                expected_max
            );
        }
    }

    fn square_contour(x0: i32, y0: i32, x1: i32, y1: i32) -> Vec<Point<i32>> {
        let mut points = Vec::new();
        for x in x0..x1 {
            points.push(Point::new(x, y0));
        }
        for y in y0..y1 {
            points.push(Point::new(x1, y));
        }
        for x in (x0 + 1..=x1).rev() {
            points.push(Point::new(x, y1));
        }
        for y in (y0 + 1..=y1).rev() {
            points.push(Point::new(x0, y));
        }
        points
    }

    #[test]
    fn test_perspective_crop_axis_aligned() {
        let gray = GrayImage::from_fn(80, 60, |x, _| Luma([(x * 3) as u8]));
        let contour = square_contour(10, 5, 50, 35);

        let cropped = perspective_crop(&contour, &DynamicImage::ImageLuma8(gray)).unwrap();
        assert_eq!((cropped.width(), cropped.height()), (40, 30));

        let out = cropped.as_luma8().expect("grayscale stays grayscale");
        // Source column x has intensity 3x; output spans 40 columns over 39 steps.
        let near = |actual: u8, expected: i32| (actual as i32 - expected).abs() <= 2;
        assert!(near(out.get_pixel(0, 0)[0], 30), "{:?}", out.get_pixel(0, 0));
        assert!(near(out.get_pixel(20, 15)[0], 92), "{:?}", out.get_pixel(20, 15));
    }

    #[test]
    fn test_perspective_crop_size_ignores_surroundings() {
        let contour = square_contour(4, 4, 28, 20);
        let small = DynamicImage::ImageRgb8(image::RgbImage::new(40, 30));
        let large = DynamicImage::ImageRgb8(image::RgbImage::new(300, 200));

        let a = perspective_crop(&contour, &small).unwrap();
        let b = perspective_crop(&contour, &large).unwrap();
        assert_eq!((a.width(), a.height()), (24, 16));
        assert_eq!((a.width(), a.height()), (b.width(), b.height()));
        assert!(a.as_rgba8().is_some());
    }

    /// Closed contour walking the straight or 45° edges between `corners`
    fn polyline_contour(corners: &[(i32, i32)]) -> Vec<Point<i32>> {
        let mut points = Vec::new();
        for (i, &(x0, y0)) in corners.iter().enumerate() {
            let (x1, y1) = corners[(i + 1) % corners.len()];
            let (mut x, mut y) = (x0, y0);
            while (x, y) != (x1, y1) {
                points.push(Point::new(x, y));
                x += (x1 - x).signum();
                y += (y1 - y).signum();
            }
        }
        points
    }

    #[test]
    fn test_perspective_crop_diamond() {
        let contour = polyline_contour(&[(50, 0), (100, 50), (50, 100), (0, 50)]);
        let img = DynamicImage::ImageLuma8(GrayImage::from_pixel(120, 120, Luma([200])));

        let cropped = perspective_crop(&contour, &img).unwrap();
        assert_eq!((cropped.width(), cropped.height()), (70, 70));

        let out = cropped.as_luma8().expect("grayscale stays grayscale");
        let center = out.get_pixel(35, 35)[0];
        assert!((198..=200).contains(&center), "center {}", center);
    }

    #[test]
    fn test_perspective_crop_tilted_rectangle() {
        let contour = polyline_contour(&[(20, 0), (60, 40), (50, 50), (10, 10)]);
        let img = DynamicImage::ImageRgb8(image::RgbImage::new(80, 80));

        let cropped = perspective_crop(&contour, &img).unwrap();
        assert_eq!((cropped.width(), cropped.height()), (56, 14));
    }

    #[test]
    fn test_perspective_crop_rejects_triangle() {
        let contour = vec![
            Point::new(0, 0),
            Point::new(10, 0),
            Point::new(20, 0),
            Point::new(10, 10),
        ];
        let img = DynamicImage::ImageLuma8(GrayImage::new(30, 30));
        assert!(perspective_crop(&contour, &img).is_err());
    }
}
