// ChunkedDatasetWriter: build a scene archive from in-memory records

use std::fs;
use std::path::{Path, PathBuf};

use motion_core::{bail, Result};

use crate::array::{Compressor, ZarrArray};
use crate::dataset::ChunkedDataset;
use crate::schema::{Agent, Frame, Record, Scene, TrafficLightFace};

/// Records of a whole archive, linked by index intervals.
#[derive(Debug, Clone, Default)]
pub struct ArchiveRecords {
    pub scenes: Vec<Scene>,
    pub frames: Vec<Frame>,
    pub agents: Vec<Agent>,
    pub tl_faces: Vec<TrafficLightFace>,
}

impl ArchiveRecords {
    /// Check that every interval is in bounds and that intervals tile their
    /// target array in order.
    pub fn validate(&self) -> Result<()> {
        check_tiling(
            "scenes.frame_index_interval",
            self.scenes.iter().map(|s| s.frame_index_interval),
            self.frames.len(),
        )?;
        check_tiling(
            "frames.agent_index_interval",
            self.frames.iter().map(|f| f.agent_index_interval),
            self.agents.len(),
        )?;
        check_tiling(
            "frames.traffic_light_faces_index_interval",
            self.frames
                .iter()
                .map(|f| f.traffic_light_faces_index_interval),
            self.tl_faces.len(),
        )
    }
}

fn check_tiling(
    what: &str,
    intervals: impl Iterator<Item = [i64; 2]>,
    target_len: usize,
) -> Result<()> {
    let mut expected_start = 0i64;
    for (i, [a, b]) in intervals.enumerate() {
        if a != expected_start || b < a {
            bail!("{what}[{i}] = [{a}, {b}) does not continue from {expected_start}");
        }
        expected_start = b;
    }
    if expected_start as usize != target_len {
        bail!("{what} covers {expected_start} rows but the array has {target_len}");
    }
    Ok(())
}

/// Writes archives in the canonical record layout.
#[derive(Debug, Clone)]
pub struct ChunkedDatasetWriter {
    path: PathBuf,
    chunk_len: usize,
    compressor: Compressor,
}

impl ChunkedDatasetWriter {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            chunk_len: 1000,
            compressor: Compressor::None,
        }
    }

    /// Rows per chunk, shared by all arrays.
    pub fn chunk_len(mut self, n: usize) -> Self {
        self.chunk_len = n.max(1);
        self
    }

    pub fn compressor(mut self, c: Compressor) -> Self {
        self.compressor = c;
        self
    }

    /// Validate `records`, write them, and reopen the result.
    pub fn write(&self, records: &ArchiveRecords) -> Result<ChunkedDataset> {
        records.validate()?;
        fs::create_dir_all(&self.path)?;
        fs::write(self.path.join(".zgroup"), "{\n    \"zarr_format\": 2\n}")?;

        self.write_array(&records.scenes)?;
        self.write_array(&records.frames)?;
        self.write_array(&records.agents)?;
        self.write_array(&records.tl_faces)?;

        tracing::info!(
            path = %self.path.display(),
            scenes = records.scenes.len(),
            frames = records.frames.len(),
            agents = records.agents.len(),
            "wrote chunked dataset"
        );
        ChunkedDataset::open(&self.path)
    }

    fn write_array<R: Record>(&self, rows: &[R]) -> Result<()> {
        let dtype = R::dtype();
        let mut data = Vec::with_capacity(rows.len() * dtype.itemsize());
        for r in rows {
            r.encode(&mut data);
        }
        ZarrArray::create(
            self.path.join(R::ARRAY),
            &dtype,
            &[],
            &data,
            self.chunk_len,
            self.compressor,
        )?;
        Ok(())
    }
}
