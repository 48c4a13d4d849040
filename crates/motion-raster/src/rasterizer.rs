// Rasterizer: the interface every birds-eye-view renderer implements

use image::RgbImage;
use ndarray::{Array3, ArrayView3};

use motion_core::{Error, Result};
use motion_zarr::{Agent, Frame};

use crate::render_context::RenderContext;

/// Renders a history of frames into a multi-channel raster.
///
/// Implementations are shared across loader workers, so they must be
/// `Send + Sync` and must not mutate state while rendering.
pub trait Rasterizer: Send + Sync {
    /// Render `history_frames` (current frame first, then older ones) with
    /// their agents into an `[H, W, C]` array.
    ///
    /// With `agent = None` the raster is centred on the ego vehicle of the
    /// current frame; otherwise on `agent`. Fewer frames than the configured
    /// history leave the missing channels zero.
    fn rasterize(
        &self,
        history_frames: &[Frame],
        history_agents: &[Vec<Agent>],
        agent: Option<&Agent>,
    ) -> Result<Array3<f32>>;

    /// Turn an `[H, W, C]` raster produced by [`Rasterizer::rasterize`] into
    /// a displayable RGB image.
    fn to_rgb(&self, image: ArrayView3<'_, f32>) -> Result<RgbImage>;

    /// Channels in every raster this rasterizer produces.
    fn num_channels(&self) -> usize;

    fn render_context(&self) -> &RenderContext;

    /// The `map_type` this rasterizer was built for.
    fn name(&self) -> &str;
}

/// Check that `image` is `[H, W, C]` for `ctx` and `channels`.
pub(crate) fn check_shape(
    image: &ArrayView3<'_, f32>,
    ctx: &RenderContext,
    channels: usize,
) -> Result<()> {
    let expected = [ctx.height(), ctx.width(), channels];
    if image.shape() != expected {
        return Err(Error::ShapeMismatch {
            expected: expected.to_vec(),
            got: image.shape().to_vec(),
        });
    }
    Ok(())
}

/// Check the parallel history slices passed to `rasterize`.
pub(crate) fn check_history(history_frames: &[Frame], history_agents: &[Vec<Agent>]) -> Result<()> {
    if history_frames.is_empty() {
        return Err(Error::msg("rasterize needs at least the current frame"));
    }
    if history_frames.len() != history_agents.len() {
        return Err(Error::ShapeMismatch {
            expected: vec![history_frames.len()],
            got: vec![history_agents.len()],
        });
    }
    Ok(())
}
