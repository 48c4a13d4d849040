// AgentDataset / EgoDataset: rasterized samples from a chunked archive
//
// A sample is centred on one agent (or the ego vehicle) at one frame, the
// "state". Its history and future are read from the same scene:
//
//   history:  state, state - s_h, state - 2 s_h, ... state - H s_h
//   future:   state + s_f, state + 2 s_f, ...        state + F s_f
//
// Steps that fall outside the scene, or frames where the track is missing,
// are zero with availability 0.

use std::sync::Arc;

use ndarray::{Array1, Array2};

use motion_core::geometry::angle_between;
use motion_core::{Affine2, Config, Error, Result};
use motion_raster::Rasterizer;
use motion_zarr::{Agent, ChunkedDataset, Frame};

use crate::dataset::Dataset;
use crate::mask::select_agents;
use crate::sample::AgentSample;

/// Builds samples for any (scene, state, track) of an archive.
struct SampleGenerator {
    dataset: Arc<ChunkedDataset>,
    rasterizer: Arc<dyn Rasterizer>,
    history_num_frames: usize,
    history_step_size: usize,
    future_num_frames: usize,
    future_step_size: usize,
    scene_frame_ends: Vec<i64>,
}

/// Where a track is at one frame.
struct Pose {
    position: [f64; 2],
    yaw: f64,
}

fn pose_of(frame: &Frame, agents: &[Agent], track_id: Option<u64>) -> Option<Pose> {
    match track_id {
        None => Some(Pose {
            position: frame.ego_position(),
            yaw: frame.ego_yaw(),
        }),
        Some(id) => agents.iter().find(|a| a.track_id == id).map(|a| Pose {
            position: a.centroid,
            yaw: a.yaw as f64,
        }),
    }
}

impl SampleGenerator {
    fn new(
        cfg: &Config,
        dataset: Arc<ChunkedDataset>,
        rasterizer: Arc<dyn Rasterizer>,
    ) -> Result<Self> {
        let m = &cfg.model_params;
        if m.history_step_size == 0 || m.future_step_size == 0 {
            return Err(Error::Config("step sizes must be positive".into()));
        }
        let scene_frame_ends = dataset.scene_frame_ends()?;
        Ok(Self {
            dataset,
            rasterizer,
            history_num_frames: m.history_num_frames,
            history_step_size: m.history_step_size,
            future_num_frames: m.future_num_frames,
            future_step_size: m.future_step_size,
            scene_frame_ends,
        })
    }

    /// Scene containing global frame `frame_index`, and the frame's index
    /// within that scene.
    fn locate_frame(&self, frame_index: usize) -> (usize, usize) {
        let scene = self
            .scene_frame_ends
            .partition_point(|&end| end <= frame_index as i64);
        let start = match scene {
            0 => 0,
            s => self.scene_frame_ends[s - 1] as usize,
        };
        (scene, frame_index - start)
    }

    fn generate(
        &self,
        scene_index: usize,
        state_index: usize,
        track_id: Option<u64>,
    ) -> Result<AgentSample> {
        let scene = self.dataset.scene(scene_index)?;
        let num_frames = scene.num_frames();
        if state_index >= num_frames {
            return Err(Error::IndexOutOfRange {
                index: state_index,
                len: num_frames,
            });
        }

        let history_steps = (state_index / self.history_step_size).min(self.history_num_frames);
        let future_steps = ((num_frames - 1 - state_index) / self.future_step_size)
            .min(self.future_num_frames);
        let lo = state_index - history_steps * self.history_step_size;
        let hi = state_index + future_steps * self.future_step_size;
        let base = scene.frame_range().start;
        let window = self.dataset.frames_in(base + lo..base + hi + 1)?;
        let frame_at = |state: usize| &window[state - lo];

        let history_frames: Vec<Frame> = (0..=history_steps)
            .map(|k| frame_at(state_index - k * self.history_step_size).clone())
            .collect();
        let history_agents = history_frames
            .iter()
            .map(|f| self.dataset.agents_of(f))
            .collect::<Result<Vec<_>>>()?;

        let current = &history_frames[0];
        let selected: Option<Agent> = match track_id {
            None => None,
            Some(id) => Some(
                history_agents[0]
                    .iter()
                    .find(|a| a.track_id == id)
                    .cloned()
                    .ok_or_else(|| {
                        Error::msg(format!(
                            "track {id} is not in frame {state_index} of scene {scene_index}"
                        ))
                    })?,
            ),
        };
        let (centroid, yaw, extent) = match &selected {
            Some(a) => (a.centroid, a.yaw as f64, a.extent),
            None => {
                let ego = Agent::ego(current);
                (ego.centroid, current.ego_yaw(), ego.extent)
            }
        };

        let image = self
            .rasterizer
            .rasterize(&history_frames, &history_agents, selected.as_ref())?;
        let image = image.permuted_axes([2, 0, 1]).as_standard_layout().into_owned();

        let world_from_agent = Affine2::from_pose(centroid, yaw);
        let agent_from_world = world_from_agent.inverse();
        let ctx = self.rasterizer.render_context();
        let raster_from_agent = ctx.raster_from_local();
        let raster_from_world = raster_from_agent * agent_from_world;

        // history: frames already loaded
        let (history_positions, history_yaws, history_availabilities) = self.trajectory(
            self.history_num_frames + 1,
            history_frames.iter().zip(&history_agents).map(|(f, a)| pose_of(f, a, track_id)),
            &agent_from_world,
            yaw,
        );

        let future_frames: Vec<&Frame> = (1..=future_steps)
            .map(|k| frame_at(state_index + k * self.future_step_size))
            .collect();
        let future_agents = future_frames
            .iter()
            .map(|f| match track_id {
                Some(_) => self.dataset.agents_of(f),
                None => Ok(Vec::new()),
            })
            .collect::<Result<Vec<_>>>()?;
        let (target_positions, target_yaws, target_availabilities) = self.trajectory(
            self.future_num_frames,
            future_frames.iter().zip(&future_agents).map(|(f, a)| pose_of(f, a, track_id)),
            &agent_from_world,
            yaw,
        );

        Ok(AgentSample {
            image,
            target_positions,
            target_yaws,
            target_availabilities,
            history_positions,
            history_yaws,
            history_availabilities,
            raster_from_world,
            raster_from_agent,
            agent_from_world,
            world_from_agent,
            centroid,
            yaw,
            extent,
            track_id: track_id.unwrap_or(0),
            timestamp: current.timestamp,
            scene_index,
        })
    }

    /// Relative positions, yaws and availabilities for up to `len` steps.
    fn trajectory(
        &self,
        len: usize,
        poses: impl Iterator<Item = Option<Pose>>,
        agent_from_world: &Affine2,
        yaw: f64,
    ) -> (Array2<f32>, Array2<f32>, Array1<f32>) {
        let mut positions = Array2::<f32>::zeros((len, 2));
        let mut yaws = Array2::<f32>::zeros((len, 1));
        let mut avail = Array1::<f32>::zeros(len);
        for (i, pose) in poses.take(len).enumerate() {
            if let Some(p) = pose {
                let [x, y] = agent_from_world.transform_point(p.position);
                positions[[i, 0]] = x as f32;
                positions[[i, 1]] = y as f32;
                yaws[[i, 0]] = angle_between(yaw, p.yaw) as f32;
                avail[i] = 1.0;
            }
        }
        (positions, yaws, avail)
    }
}

/// One sample per eligible agent row of an archive.
pub struct AgentDataset {
    name: String,
    generator: SampleGenerator,
    agent_indices: Vec<usize>,
    frame_agent_ends: Vec<i64>,
}

impl AgentDataset {
    /// Build the dataset over `dataset`.
    ///
    /// With `agents_mask`, exactly the agent rows marked `true` are samples
    /// and the mask length must equal the archive's agent count. Without it,
    /// eligibility is computed by [`select_agents`].
    pub fn new(
        cfg: &Config,
        dataset: Arc<ChunkedDataset>,
        rasterizer: Arc<dyn Rasterizer>,
        agents_mask: Option<Vec<bool>>,
    ) -> Result<Self> {
        let mask = match agents_mask {
            Some(mask) => {
                if mask.len() != dataset.num_agents() {
                    return Err(Error::Mask(format!(
                        "mask has {} entries but {} holds {} agents",
                        mask.len(),
                        dataset.path().display(),
                        dataset.num_agents()
                    )));
                }
                mask
            }
            None => select_agents(
                &dataset,
                cfg.raster_params.filter_agents_threshold,
                &cfg.agent_selection,
            )?,
        };
        let agent_indices: Vec<usize> = mask
            .iter()
            .enumerate()
            .filter_map(|(i, &m)| m.then_some(i))
            .collect();
        if agent_indices.is_empty() {
            tracing::warn!(
                path = %dataset.path().display(),
                "no eligible agents; the dataset is empty"
            );
        }

        let frame_agent_ends = dataset.frame_agent_ends()?;
        let name = dataset
            .path()
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "agents".to_string());
        Ok(Self {
            name,
            generator: SampleGenerator::new(cfg, dataset, rasterizer)?,
            agent_indices,
            frame_agent_ends,
        })
    }

    /// The archive samples are read from.
    pub fn chunked_dataset(&self) -> &ChunkedDataset {
        &self.generator.dataset
    }

    pub fn rasterizer(&self) -> &Arc<dyn Rasterizer> {
        &self.generator.rasterizer
    }

    /// Agent rows backing each sample, in sample order.
    pub fn agent_indices(&self) -> &[usize] {
        &self.agent_indices
    }

    /// Global frame index of agent row `agent_index`.
    pub fn frame_of_agent(&self, agent_index: usize) -> usize {
        self.frame_agent_ends
            .partition_point(|&end| end <= agent_index as i64)
    }

    /// Sample for track `track_id` (or the ego vehicle with `None`) at frame
    /// `state_index` of scene `scene_index`, regardless of eligibility.
    pub fn get_frame(
        &self,
        scene_index: usize,
        state_index: usize,
        track_id: Option<u64>,
    ) -> Result<AgentSample> {
        self.generator.generate(scene_index, state_index, track_id)
    }
}

impl Dataset for AgentDataset {
    type Item = AgentSample;

    fn len(&self) -> usize {
        self.agent_indices.len()
    }

    fn get(&self, index: usize) -> Result<AgentSample> {
        let row = *self
            .agent_indices
            .get(index)
            .ok_or(Error::IndexOutOfRange {
                index,
                len: self.agent_indices.len(),
            })?;
        let agent = self.generator.dataset.agents.get(row)?;
        let (scene_index, state_index) = self.generator.locate_frame(self.frame_of_agent(row));
        self.generator
            .generate(scene_index, state_index, Some(agent.track_id))
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// One sample per frame, centred on the ego vehicle.
pub struct EgoDataset {
    generator: SampleGenerator,
}

impl EgoDataset {
    pub fn new(
        cfg: &Config,
        dataset: Arc<ChunkedDataset>,
        rasterizer: Arc<dyn Rasterizer>,
    ) -> Result<Self> {
        Ok(Self {
            generator: SampleGenerator::new(cfg, dataset, rasterizer)?,
        })
    }

    pub fn get_frame(&self, scene_index: usize, state_index: usize) -> Result<AgentSample> {
        self.generator.generate(scene_index, state_index, None)
    }
}

impl Dataset for EgoDataset {
    type Item = AgentSample;

    fn len(&self) -> usize {
        self.generator.dataset.num_frames()
    }

    fn get(&self, index: usize) -> Result<AgentSample> {
        if index >= self.len() {
            return Err(Error::IndexOutOfRange {
                index,
                len: self.len(),
            });
        }
        let (scene_index, state_index) = self.generator.locate_frame(index);
        self.generator.generate(scene_index, state_index, None)
    }

    fn name(&self) -> &str {
        "ego"
    }
}
