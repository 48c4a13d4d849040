// Synthetic scene archives
//
// Deterministic scenes for tests and demos: an ego vehicle drives straight
// along a per-scene heading, and `agents_per_frame` cars drive parallel to it
// in neighbouring lanes at slightly different speeds. Every agent is present
// in every frame of its scene, so track lengths equal the scene length.

use std::path::Path;

use motion_core::geometry::rotation_from_yaw;
use motion_core::Result;

use crate::array::Compressor;
use crate::dataset::ChunkedDataset;
use crate::schema::{Agent, Frame, Scene, TrafficLightFace, CAR_LABEL};
use crate::writer::{ArchiveRecords, ChunkedDatasetWriter};

/// Parameters of a generated archive.
#[derive(Debug, Clone)]
pub struct SyntheticArchive {
    pub num_scenes: usize,
    pub frames_per_scene: usize,
    pub agents_per_frame: usize,
    /// Nanoseconds between frames.
    pub frame_step_ns: i64,
    /// Ego speed in metres per second.
    pub ego_speed: f64,
}

impl Default for SyntheticArchive {
    fn default() -> Self {
        Self {
            num_scenes: 2,
            frames_per_scene: 20,
            agents_per_frame: 3,
            frame_step_ns: 100_000_000,
            ego_speed: 10.0,
        }
    }
}

impl SyntheticArchive {
    pub fn new(num_scenes: usize, frames_per_scene: usize, agents_per_frame: usize) -> Self {
        Self {
            num_scenes,
            frames_per_scene,
            agents_per_frame,
            ..Default::default()
        }
    }

    /// Total number of agent rows the archive will hold.
    pub fn num_agents(&self) -> usize {
        self.num_scenes * self.frames_per_scene * self.agents_per_frame
    }

    /// Generate all records.
    pub fn records(&self) -> ArchiveRecords {
        let mut rec = ArchiveRecords::default();
        let dt = self.frame_step_ns as f64 / 1e9;

        for s in 0..self.num_scenes {
            let heading = 0.1 * s as f64;
            let (sin, cos) = heading.sin_cos();
            let origin = [100.0 * s as f64, -50.0 * s as f64];
            let start_time = s as i64 * 1_000_000_000_000;
            let first_frame = rec.frames.len() as i64;

            for i in 0..self.frames_per_scene {
                let t = i as f64 * dt;
                let along = self.ego_speed * t;
                let ego = [origin[0] + along * cos, origin[1] + along * sin];

                let agent_start = rec.agents.len() as i64;
                for k in 1..=self.agents_per_frame {
                    let lateral = 4.0 * k as f64;
                    let speed = self.ego_speed + k as f64;
                    let along = speed * t;
                    let mut label_probabilities = [0.0; 17];
                    label_probabilities[CAR_LABEL] = 1.0;
                    rec.agents.push(Agent {
                        centroid: [
                            origin[0] + along * cos - lateral * sin,
                            origin[1] + along * sin + lateral * cos,
                        ],
                        extent: [4.0, 1.8, 1.5],
                        yaw: heading as f32,
                        velocity: [(speed * cos) as f32, (speed * sin) as f32],
                        track_id: k as u64,
                        label_probabilities,
                    });
                }

                let tl_start = rec.tl_faces.len() as i64;
                let green = (i / 10) % 2 == 0;
                rec.tl_faces.push(TrafficLightFace {
                    face_id: format!("face{s}"),
                    traffic_light_id: format!("light{s}"),
                    traffic_light_face_status: if green {
                        [1.0, 0.0, 0.0]
                    } else {
                        [0.0, 1.0, 0.0]
                    },
                });

                rec.frames.push(Frame {
                    timestamp: start_time + i as i64 * self.frame_step_ns,
                    agent_index_interval: [agent_start, rec.agents.len() as i64],
                    traffic_light_faces_index_interval: [tl_start, rec.tl_faces.len() as i64],
                    ego_translation: [ego[0], ego[1], 0.0],
                    ego_rotation: rotation_from_yaw(heading),
                });
            }

            let end_time = start_time
                + self.frames_per_scene.saturating_sub(1) as i64 * self.frame_step_ns;
            rec.scenes.push(Scene {
                frame_index_interval: [first_frame, rec.frames.len() as i64],
                host: format!("host-{}", s % 2),
                start_time,
                end_time,
            });
        }
        rec
    }

    /// Generate and write to `path`, uncompressed.
    pub fn write(&self, path: impl AsRef<Path>, chunk_len: usize) -> Result<ChunkedDataset> {
        self.write_with(path, chunk_len, Compressor::None)
    }

    /// Generate and write to `path` with the given compressor.
    pub fn write_with(
        &self,
        path: impl AsRef<Path>,
        chunk_len: usize,
        compressor: Compressor,
    ) -> Result<ChunkedDataset> {
        ChunkedDatasetWriter::new(path)
            .chunk_len(chunk_len)
            .compressor(compressor)
            .write(&self.records())
    }
}
