// StubRasterizer: blank rasters with the box layout's channel count

use image::RgbImage;
use ndarray::{Array3, ArrayView3};

use motion_core::Result;
use motion_zarr::{Agent, Frame};

use crate::rasterizer::{check_history, check_shape, Rasterizer};
use crate::render_context::RenderContext;

/// Produces all-zero rasters; useful when only trajectories matter.
#[derive(Debug, Clone)]
pub struct StubRasterizer {
    ctx: RenderContext,
    num_channels: usize,
}

impl StubRasterizer {
    pub fn new(ctx: RenderContext, history_num_frames: usize) -> Self {
        Self {
            ctx,
            num_channels: 2 * (history_num_frames + 1),
        }
    }
}

impl Rasterizer for StubRasterizer {
    fn rasterize(
        &self,
        history_frames: &[Frame],
        history_agents: &[Vec<Agent>],
        _agent: Option<&Agent>,
    ) -> Result<Array3<f32>> {
        check_history(history_frames, history_agents)?;
        Ok(Array3::zeros((
            self.ctx.height(),
            self.ctx.width(),
            self.num_channels,
        )))
    }

    fn to_rgb(&self, image: ArrayView3<'_, f32>) -> Result<RgbImage> {
        check_shape(&image, &self.ctx, self.num_channels)?;
        Ok(RgbImage::new(self.ctx.width() as u32, self.ctx.height() as u32))
    }

    fn num_channels(&self) -> usize {
        self.num_channels
    }

    fn render_context(&self) -> &RenderContext {
        &self.ctx
    }

    fn name(&self) -> &str {
        "stub_debug"
    }
}
