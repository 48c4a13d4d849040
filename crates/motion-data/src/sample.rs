// Samples and batches: what agent datasets yield and loaders collate
//
// Shapes, with C raster channels, H x W pixels, P = history_num_frames + 1
// history steps (current first) and F = future_num_frames:
//
//   image                    [C, H, W]     f32, channel first
//   target_positions         [F, 2]        agent frame, metres
//   target_yaws              [F, 1]        relative to the agent's yaw
//   target_availabilities    [F]           1.0 where the step exists
//   history_positions        [P, 2]
//   history_yaws             [P, 1]
//   history_availabilities   [P]
//
// A batch stacks every field along a new leading axis of length B.

use ndarray::{
    stack, Array, Array1, Array2, Array3, Array4, ArrayView, Axis, Dimension, RemoveAxis,
};

use motion_core::{Affine2, Error, Result};

/// One agent at one timestep, with its raster and trajectories.
#[derive(Debug, Clone)]
pub struct AgentSample {
    pub image: Array3<f32>,
    pub target_positions: Array2<f32>,
    pub target_yaws: Array2<f32>,
    pub target_availabilities: Array1<f32>,
    pub history_positions: Array2<f32>,
    pub history_yaws: Array2<f32>,
    pub history_availabilities: Array1<f32>,
    pub raster_from_world: Affine2,
    pub raster_from_agent: Affine2,
    pub agent_from_world: Affine2,
    pub world_from_agent: Affine2,
    /// World position of the agent.
    pub centroid: [f64; 2],
    /// World heading of the agent.
    pub yaw: f64,
    pub extent: [f32; 3],
    /// 0 for the ego vehicle.
    pub track_id: u64,
    pub timestamp: i64,
    pub scene_index: usize,
}

impl AgentSample {
    /// Alias of `raster_from_world`.
    pub fn world_to_image(&self) -> Affine2 {
        self.raster_from_world
    }

    /// Available future positions as points, in the agent frame.
    pub fn available_targets(&self) -> Vec<[f64; 2]> {
        self.target_positions
            .outer_iter()
            .zip(self.target_availabilities.iter())
            .filter(|(_, a)| **a > 0.0)
            .map(|(p, _)| [p[0] as f64, p[1] as f64])
            .collect()
    }
}

/// A batch of [`AgentSample`]s, each field stacked along axis 0.
#[derive(Debug, Clone)]
pub struct AgentBatch {
    pub image: Array4<f32>,
    pub target_positions: Array3<f32>,
    pub target_yaws: Array3<f32>,
    pub target_availabilities: Array2<f32>,
    pub history_positions: Array3<f32>,
    pub history_yaws: Array3<f32>,
    pub history_availabilities: Array2<f32>,
    /// `[B, 3, 3]`
    pub raster_from_world: Array3<f64>,
    pub raster_from_agent: Array3<f64>,
    pub agent_from_world: Array3<f64>,
    pub world_from_agent: Array3<f64>,
    /// `[B, 2]`
    pub centroid: Array2<f64>,
    pub yaw: Array1<f64>,
    /// `[B, 3]`
    pub extent: Array2<f32>,
    pub track_id: Vec<u64>,
    pub timestamp: Vec<i64>,
    pub scene_index: Vec<usize>,
}

impl AgentBatch {
    pub fn len(&self) -> usize {
        self.track_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.track_id.is_empty()
    }
}

/// Merge a list of samples into one batch value.
pub trait Collate: Sized {
    type Batch: Send + 'static;

    /// `samples` is never empty when called by the loader.
    fn collate(samples: Vec<Self>) -> Result<Self::Batch>;
}

fn stack_field<A, D>(views: &[ArrayView<'_, A, D>]) -> Result<Array<A, D::Larger>>
where
    A: Clone,
    D: Dimension,
    D::Larger: RemoveAxis,
{
    stack(Axis(0), views).map_err(|_| {
        let expected = views.first().map(|v| v.shape().to_vec()).unwrap_or_default();
        let got = views
            .iter()
            .map(|v| v.shape().to_vec())
            .find(|s| *s != expected)
            .unwrap_or_default();
        Error::ShapeMismatch { expected, got }
    })
}

fn stack_affine(
    samples: &[AgentSample],
    f: impl Fn(&AgentSample) -> Affine2,
) -> Result<Array3<f64>> {
    let flat: Vec<f64> = samples.iter().flat_map(|s| f(s).to_flat()).collect();
    Array3::from_shape_vec((samples.len(), 3, 3), flat).map_err(|e| Error::msg(e.to_string()))
}

impl Collate for AgentSample {
    type Batch = AgentBatch;

    fn collate(samples: Vec<Self>) -> Result<AgentBatch> {
        if samples.is_empty() {
            return Err(Error::msg("cannot collate an empty batch"));
        }
        macro_rules! stacked {
            ($field:ident) => {
                stack_field(&samples.iter().map(|s| s.$field.view()).collect::<Vec<_>>())?
            };
        }

        let b = samples.len();
        let centroid: Vec<f64> = samples.iter().flat_map(|s| s.centroid).collect();
        let extent: Vec<f32> = samples.iter().flat_map(|s| s.extent).collect();

        Ok(AgentBatch {
            image: stacked!(image),
            target_positions: stacked!(target_positions),
            target_yaws: stacked!(target_yaws),
            target_availabilities: stacked!(target_availabilities),
            history_positions: stacked!(history_positions),
            history_yaws: stacked!(history_yaws),
            history_availabilities: stacked!(history_availabilities),
            raster_from_world: stack_affine(&samples, |s| s.raster_from_world)?,
            raster_from_agent: stack_affine(&samples, |s| s.raster_from_agent)?,
            agent_from_world: stack_affine(&samples, |s| s.agent_from_world)?,
            world_from_agent: stack_affine(&samples, |s| s.world_from_agent)?,
            centroid: Array2::from_shape_vec((b, 2), centroid)
                .map_err(|e| Error::msg(e.to_string()))?,
            yaw: samples.iter().map(|s| s.yaw).collect(),
            extent: Array2::from_shape_vec((b, 3), extent)
                .map_err(|e| Error::msg(e.to_string()))?,
            track_id: samples.iter().map(|s| s.track_id).collect(),
            timestamp: samples.iter().map(|s| s.timestamp).collect(),
            scene_index: samples.iter().map(|s| s.scene_index).collect(),
        })
    }
}
