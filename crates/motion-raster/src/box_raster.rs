// BoxRasterizer: agents as filled oriented boxes, no map
//
// Channel layout for `n = history_num_frames + 1` frames:
//
//   [0, n)    other agents, channel i = i frames back
//   [n, 2n)   the centred agent (or ego), same frame order
//
// When rendering around a selected agent the ego vehicle is drawn among the
// other agents, and the selected agent moves to the second block. Pixels are
// 0.0 or 1.0.

use image::{Rgb, RgbImage};
use ndarray::{s, Array3, ArrayView3};

use motion_core::{Affine2, Result};
use motion_zarr::{Agent, Frame};

use crate::draw::fill_convex_polygon;
use crate::rasterizer::{check_history, check_shape, Rasterizer};
use crate::render_context::RenderContext;

/// Per-frame fade applied to older history in [`BoxRasterizer::to_rgb`].
const HISTORY_FADE: f32 = 0.85;
const AGENT_RGB: [f32; 3] = [0.0, 0.0, 1.0];
const EGO_RGB: [f32; 3] = [0.0, 1.0, 0.0];

#[derive(Debug, Clone)]
pub struct BoxRasterizer {
    ctx: RenderContext,
    filter_agents_threshold: f64,
    history_num_frames: usize,
}

impl BoxRasterizer {
    pub fn new(ctx: RenderContext, filter_agents_threshold: f64, history_num_frames: usize) -> Self {
        Self {
            ctx,
            filter_agents_threshold,
            history_num_frames,
        }
    }

    /// Frames per channel block.
    pub fn frames_per_block(&self) -> usize {
        self.history_num_frames + 1
    }

    fn draw_boxes<'a>(
        &self,
        image: &mut Array3<f32>,
        channel: usize,
        raster_from_world: &Affine2,
        agents: impl IntoIterator<Item = &'a Agent>,
    ) {
        for agent in agents {
            let corners = box_corners(agent).map(|p| raster_from_world.transform_point(p));
            fill_convex_polygon(image.slice_mut(s![.., .., channel]), &corners, 1.0);
        }
    }
}

/// World-frame corners of an agent's footprint.
fn box_corners(agent: &Agent) -> [[f64; 2]; 4] {
    let world_from_agent = Affine2::from_pose(agent.centroid, agent.yaw as f64);
    let hl = agent.extent[0] as f64 / 2.0;
    let hw = agent.extent[1] as f64 / 2.0;
    [[-hl, -hw], [-hl, hw], [hl, hw], [hl, -hw]].map(|p| world_from_agent.transform_point(p))
}

impl Rasterizer for BoxRasterizer {
    fn rasterize(
        &self,
        history_frames: &[Frame],
        history_agents: &[Vec<Agent>],
        agent: Option<&Agent>,
    ) -> Result<Array3<f32>> {
        check_history(history_frames, history_agents)?;
        let n = self.frames_per_block();
        let (center, yaw) = match agent {
            Some(a) => (a.centroid, a.yaw as f64),
            None => (history_frames[0].ego_position(), history_frames[0].ego_yaw()),
        };
        let raster_from_world = self.ctx.raster_from_world(center, yaw);
        let mut image = Array3::<f32>::zeros((self.ctx.height(), self.ctx.width(), 2 * n));

        for (i, (frame, agents)) in history_frames
            .iter()
            .zip(history_agents)
            .take(n)
            .enumerate()
        {
            let visible = agents
                .iter()
                .filter(|a| a.passes_threshold(self.filter_agents_threshold));
            let ego = Agent::ego(frame);

            match agent {
                None => {
                    self.draw_boxes(&mut image, i, &raster_from_world, visible);
                    self.draw_boxes(&mut image, n + i, &raster_from_world, [&ego]);
                }
                Some(selected) => {
                    let (own, others): (Vec<&Agent>, Vec<&Agent>) =
                        visible.partition(|a| a.track_id == selected.track_id);
                    self.draw_boxes(
                        &mut image,
                        i,
                        &raster_from_world,
                        others.into_iter().chain([&ego]),
                    );
                    self.draw_boxes(&mut image, n + i, &raster_from_world, own);
                }
            }
        }
        Ok(image)
    }

    fn to_rgb(&self, image: ArrayView3<'_, f32>) -> Result<RgbImage> {
        check_shape(&image, &self.ctx, self.num_channels())?;
        let n = self.frames_per_block();
        let (h, w) = (self.ctx.height(), self.ctx.width());
        let mut out = vec![[0.0f32; 3]; h * w];

        // oldest first so the current frame ends on top
        for i in (0..n).rev() {
            let fade = HISTORY_FADE.powi(i as i32);
            for (block, rgb) in [(i, AGENT_RGB), (n + i, EGO_RGB)] {
                let channel = image.slice(s![.., .., block]);
                for ((row, col), &v) in channel.indexed_iter() {
                    if v > 0.0 {
                        out[row * w + col] = rgb.map(|c| c * fade);
                    }
                }
            }
        }

        Ok(RgbImage::from_fn(w as u32, h as u32, |x, y| {
            let px = out[y as usize * w + x as usize];
            Rgb(px.map(|c| (c.clamp(0.0, 1.0) * 255.0).round() as u8))
        }))
    }

    fn num_channels(&self) -> usize {
        2 * self.frames_per_block()
    }

    fn render_context(&self) -> &RenderContext {
        &self.ctx
    }

    fn name(&self) -> &str {
        "box_debug"
    }
}
