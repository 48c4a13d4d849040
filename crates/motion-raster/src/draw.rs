// Drawing primitives: polygon fill for raster channels, trajectory overlays
//
// Pixel (x, y) covers the unit square centred on integer coordinates, the
// same convention the raster transforms use: a point mapped to (3.0, 7.0)
// lands in column 3, row 7.

use image::{Rgb, RgbImage};
use ndarray::ArrayViewMut2;

/// Colour of ground-truth future positions.
pub const TARGET_POINTS_COLOR: [u8; 3] = [255, 0, 255];
/// Colour of model predictions.
pub const PREDICTED_POINTS_COLOR: [u8; 3] = [0, 255, 255];

/// Set every pixel whose centre lies inside the convex polygon `corners`
/// (pixel coordinates, either winding) to `value`.
///
/// Returns the number of pixels written.
pub fn fill_convex_polygon(
    mut canvas: ArrayViewMut2<'_, f32>,
    corners: &[[f64; 2]],
    value: f32,
) -> usize {
    if corners.len() < 3 {
        return 0;
    }
    let (h, w) = canvas.dim();
    if h == 0 || w == 0 {
        return 0;
    }

    let (mut min_x, mut min_y) = (f64::INFINITY, f64::INFINITY);
    let (mut max_x, mut max_y) = (f64::NEG_INFINITY, f64::NEG_INFINITY);
    for &[x, y] in corners {
        if !x.is_finite() || !y.is_finite() {
            return 0;
        }
        min_x = min_x.min(x);
        min_y = min_y.min(y);
        max_x = max_x.max(x);
        max_y = max_y.max(y);
    }
    if max_x < 0.0 || max_y < 0.0 || min_x > (w - 1) as f64 || min_y > (h - 1) as f64 {
        return 0;
    }
    let x0 = min_x.ceil().max(0.0) as usize;
    let y0 = min_y.ceil().max(0.0) as usize;
    let x1 = (max_x.floor() as usize).min(w - 1);
    let y1 = (max_y.floor() as usize).min(h - 1);

    let mut written = 0;
    for row in y0..=y1 {
        for col in x0..=x1 {
            if inside_convex(corners, [col as f64, row as f64]) {
                canvas[[row, col]] = value;
                written += 1;
            }
        }
    }
    written
}

fn inside_convex(corners: &[[f64; 2]], p: [f64; 2]) -> bool {
    const EPS: f64 = 1e-9;
    let mut pos = false;
    let mut neg = false;
    for (i, a) in corners.iter().enumerate() {
        let b = corners[(i + 1) % corners.len()];
        let cross = (b[0] - a[0]) * (p[1] - a[1]) - (b[1] - a[1]) * (p[0] - a[0]);
        if cross > EPS {
            pos = true;
        } else if cross < -EPS {
            neg = true;
        }
        if pos && neg {
            return false;
        }
    }
    true
}

/// Draw a trajectory onto `image`: a filled disc of `radius` pixels per
/// point, plus a short heading tick when `yaws` are given.
///
/// Points outside the image are clipped, not rejected.
pub fn draw_trajectory(
    image: &mut RgbImage,
    points: &[[f64; 2]],
    color: [u8; 3],
    radius: i32,
    yaws: Option<&[f64]>,
) {
    let radius = radius.max(0);
    for (i, &[x, y]) in points.iter().enumerate() {
        if !x.is_finite() || !y.is_finite() {
            continue;
        }
        let cx = x.round() as i64;
        let cy = y.round() as i64;
        fill_disc(image, cx, cy, radius as i64, color);

        if let Some(yaw) = yaws.and_then(|ys| ys.get(i)) {
            let len = (2 * radius + 2) as f64;
            let tip = [x + yaw.cos() * len, y + yaw.sin() * len];
            draw_line(image, [x, y], tip, color);
        }
    }
}

fn put(image: &mut RgbImage, x: i64, y: i64, color: [u8; 3]) {
    if x >= 0 && y >= 0 && (x as u32) < image.width() && (y as u32) < image.height() {
        image.put_pixel(x as u32, y as u32, Rgb(color));
    }
}

fn fill_disc(image: &mut RgbImage, cx: i64, cy: i64, r: i64, color: [u8; 3]) {
    for dy in -r..=r {
        for dx in -r..=r {
            if dx * dx + dy * dy <= r * r {
                put(image, cx + dx, cy + dy, color);
            }
        }
    }
}

fn draw_line(image: &mut RgbImage, from: [f64; 2], to: [f64; 2], color: [u8; 3]) {
    let steps = (to[0] - from[0]).abs().max((to[1] - from[1]).abs()).ceil() as i64;
    if steps == 0 {
        put(image, from[0].round() as i64, from[1].round() as i64, color);
        return;
    }
    for s in 0..=steps {
        let t = s as f64 / steps as f64;
        let x = from[0] + (to[0] - from[0]) * t;
        let y = from[1] + (to[1] - from[1]) * t;
        put(image, x.round() as i64, y.round() as i64, color);
    }
}
