// Rendering a sample for inspection

use std::path::Path;

use image::{imageops, ImageFormat, RgbImage};

use motion_core::{transform_points, Error, Result};
use motion_raster::{draw_trajectory, Rasterizer, TARGET_POINTS_COLOR};

use crate::sample::AgentSample;

/// Draw `sample`'s raster with its future trajectory on top.
///
/// Only available target steps are drawn. The result is flipped vertically
/// when the raster origin is at the top, so +y points up on screen.
pub fn render_agent_map(sample: &AgentSample, rasterizer: &dyn Rasterizer) -> Result<RgbImage> {
    let hwc = sample.image.view().permuted_axes([1, 2, 0]);
    let mut im = rasterizer.to_rgb(hwc)?;

    let (targets, yaws): (Vec<[f64; 2]>, Vec<f64>) = sample
        .target_positions
        .outer_iter()
        .zip(sample.target_yaws.outer_iter())
        .zip(sample.target_availabilities.iter())
        .filter(|(_, avail)| **avail > 0.0)
        .map(|((p, y), _)| ([p[0] as f64, p[1] as f64], y[0] as f64))
        .unzip();
    let pixels = transform_points(&targets, &sample.raster_from_agent);
    draw_trajectory(&mut im, &pixels, TARGET_POINTS_COLOR, 1, Some(&yaws));

    if rasterizer.render_context().set_origin_to_bottom() {
        Ok(im)
    } else {
        Ok(imageops::flip_vertical(&im))
    }
}

/// Write `image` as a PNG.
pub fn save_png(image: &RgbImage, path: &Path) -> Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)?;
    }
    image
        .save_with_format(path, ImageFormat::Png)
        .map_err(|e| Error::Image(format!("{}: {e}", path.display())))
}
