// RenderContext: raster geometry shared by every rasterizer
//
// A raster is `raster_size = [W, H]` pixels, each `pixel_size` metres wide.
// The agent being rendered sits at `center_in_raster_ratio * raster_size`,
// facing +x. Without `set_origin_to_bottom` row 0 is the top of the array and
// +y in the agent frame points down the rows, so viewers flip the image
// before display.

use motion_core::{Affine2, Error, RasterParams, Result};

#[derive(Debug, Clone, PartialEq)]
pub struct RenderContext {
    raster_size: [u32; 2],
    pixel_size: [f64; 2],
    center_in_raster_ratio: [f64; 2],
    set_origin_to_bottom: bool,
}

impl RenderContext {
    pub fn new(
        raster_size: [u32; 2],
        pixel_size: [f64; 2],
        center_in_raster_ratio: [f64; 2],
        set_origin_to_bottom: bool,
    ) -> Result<Self> {
        if raster_size.contains(&0) {
            return Err(Error::Config(format!(
                "raster_size must be positive, got {raster_size:?}"
            )));
        }
        if pixel_size.iter().any(|&p| p <= 0.0 || !p.is_finite()) {
            return Err(Error::Config(format!(
                "pixel_size must be positive, got {pixel_size:?}"
            )));
        }
        Ok(Self {
            raster_size,
            pixel_size,
            center_in_raster_ratio,
            set_origin_to_bottom,
        })
    }

    pub fn from_params(params: &RasterParams) -> Result<Self> {
        Self::new(
            params.raster_size,
            params.pixel_size,
            params.ego_center,
            params.set_origin_to_bottom,
        )
    }

    /// `[W, H]` in pixels.
    pub fn raster_size(&self) -> [u32; 2] {
        self.raster_size
    }

    pub fn width(&self) -> usize {
        self.raster_size[0] as usize
    }

    pub fn height(&self) -> usize {
        self.raster_size[1] as usize
    }

    pub fn pixel_size(&self) -> [f64; 2] {
        self.pixel_size
    }

    pub fn center_in_raster_ratio(&self) -> [f64; 2] {
        self.center_in_raster_ratio
    }

    pub fn set_origin_to_bottom(&self) -> bool {
        self.set_origin_to_bottom
    }

    /// Pixel position of the rendered agent.
    pub fn center_in_raster_px(&self) -> [f64; 2] {
        let [cx, cy] = [
            self.center_in_raster_ratio[0] * self.raster_size[0] as f64,
            self.center_in_raster_ratio[1] * self.raster_size[1] as f64,
        ];
        if self.set_origin_to_bottom {
            [cx, self.raster_size[1] as f64 - cy]
        } else {
            [cx, cy]
        }
    }

    /// Metres in the agent frame to pixels.
    pub fn raster_from_local(&self) -> Affine2 {
        let scale = [1.0 / self.pixel_size[0], 1.0 / self.pixel_size[1]];
        let center = [
            self.center_in_raster_ratio[0] * self.raster_size[0] as f64,
            self.center_in_raster_ratio[1] * self.raster_size[1] as f64,
        ];
        let m = Affine2::scale_translate(scale, center);
        if self.set_origin_to_bottom {
            flip_y(self.raster_size[1] as f64) * m
        } else {
            m
        }
    }

    /// World metres to pixels, for a raster centred on a body at
    /// `translation` with heading `yaw`.
    pub fn raster_from_world(&self, translation: [f64; 2], yaw: f64) -> Affine2 {
        self.raster_from_local() * Affine2::from_pose(translation, yaw).inverse()
    }
}

fn flip_y(height: f64) -> Affine2 {
    Affine2([[1.0, 0.0, 0.0], [0.0, -1.0, height], [0.0, 0.0, 1.0]])
}
