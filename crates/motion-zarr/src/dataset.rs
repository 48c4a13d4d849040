// ChunkedDataset: a scene archive opened for reading
//
// Layout of an archive directory:
//
//   train.zarr/
//     .zgroup                 {"zarr_format": 2}
//     scenes/                 Scene records
//     frames/                 Frame records
//     agents/                 Agent records
//     traffic_light_faces/    TrafficLightFace records (optional)
//
// Opening only reads metadata; records are decoded on demand, chunk by chunk.

use std::fmt;
use std::ops::Range;
use std::path::{Path, PathBuf};

use motion_core::{Error, Result};

use crate::array::ZarrArray;
use crate::dtype::RecordView;
use crate::schema::{Agent, Frame, Record, Scene, TrafficLightFace};

/// A typed view over one archive array.
#[derive(Debug)]
pub struct RecordArray<R: Record> {
    array: ZarrArray,
    _marker: std::marker::PhantomData<R>,
}

impl<R: Record> RecordArray<R> {
    fn open(root: &Path) -> Result<Self> {
        let dir = root.join(R::ARRAY);
        if !dir.is_dir() {
            return Err(Error::malformed(
                root,
                format!("missing array {:?}", R::ARRAY),
            ));
        }
        let array = ZarrArray::open(&dir)?;
        if array.metadata().shape.len() != 1 {
            return Err(Error::malformed(
                &dir,
                format!("expected a 1-d record array, got shape {:?}", array.metadata().shape),
            ));
        }
        Ok(Self {
            array,
            _marker: std::marker::PhantomData,
        })
    }

    pub fn len(&self) -> usize {
        self.array.len()
    }

    pub fn is_empty(&self) -> bool {
        self.array.is_empty()
    }

    /// The underlying untyped array.
    pub fn raw(&self) -> &ZarrArray {
        &self.array
    }

    /// Decode record `index`.
    pub fn get(&self, index: usize) -> Result<R> {
        let bytes = self.array.read_row(index)?;
        R::decode(RecordView::new(self.array.dtype(), &bytes))
    }

    /// Decode all records in `range`.
    pub fn range(&self, range: Range<usize>) -> Result<Vec<R>> {
        let bytes = self.array.read_rows(range)?;
        let item = self.array.dtype().itemsize();
        bytes
            .chunks_exact(item)
            .map(|b| R::decode(RecordView::new(self.array.dtype(), b)))
            .collect()
    }

    /// Visit every record, one decoded chunk at a time.
    pub fn for_each_chunk<F>(&self, mut f: F) -> Result<()>
    where
        F: FnMut(usize, Vec<R>) -> Result<()>,
    {
        for idx in 0..self.array.num_chunks() {
            let rows = self.array.chunk_rows(idx);
            let start = rows.start;
            f(start, self.range(rows)?)?;
        }
        Ok(())
    }
}

/// A scene archive opened for reading.
#[derive(Debug)]
pub struct ChunkedDataset {
    path: PathBuf,
    pub scenes: RecordArray<Scene>,
    pub frames: RecordArray<Frame>,
    pub agents: RecordArray<Agent>,
    pub tl_faces: Option<RecordArray<TrafficLightFace>>,
}

impl ChunkedDataset {
    /// Open the archive at `path`.
    ///
    /// Fails with [`Error::PathNotFound`] when nothing exists at `path` and
    /// with [`Error::ArchiveMalformed`] when the group or an array is missing
    /// or unreadable.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(Error::PathNotFound {
                key: path.display().to_string(),
                root: path.parent().map(Path::to_path_buf).unwrap_or_default(),
            });
        }
        if !path.join(".zgroup").is_file() {
            return Err(Error::malformed(path, "not a zarr group (no .zgroup)"));
        }

        let scenes = RecordArray::open(path)?;
        let frames = RecordArray::open(path)?;
        let agents = RecordArray::open(path)?;
        let tl_faces = if path.join(TrafficLightFace::ARRAY).is_dir() {
            Some(RecordArray::open(path)?)
        } else {
            None
        };

        let ds = Self {
            path: path.to_path_buf(),
            scenes,
            frames,
            agents,
            tl_faces,
        };
        tracing::info!(
            path = %ds.path.display(),
            scenes = ds.num_scenes(),
            frames = ds.num_frames(),
            agents = ds.num_agents(),
            "opened chunked dataset"
        );
        Ok(ds)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn num_scenes(&self) -> usize {
        self.scenes.len()
    }

    pub fn num_frames(&self) -> usize {
        self.frames.len()
    }

    pub fn num_agents(&self) -> usize {
        self.agents.len()
    }

    pub fn num_tl_faces(&self) -> usize {
        self.tl_faces.as_ref().map_or(0, |t| t.len())
    }

    pub fn scene(&self, index: usize) -> Result<Scene> {
        self.scenes.get(index)
    }

    /// Frames `range` (global frame indices).
    pub fn frames_in(&self, range: Range<usize>) -> Result<Vec<Frame>> {
        self.frames.range(range)
    }

    /// Agents seen in `frame`.
    pub fn agents_of(&self, frame: &Frame) -> Result<Vec<Agent>> {
        self.agents.range(frame.agent_range())
    }

    /// Traffic light faces seen in `frame`; empty when the archive has none.
    pub fn tl_faces_of(&self, frame: &Frame) -> Result<Vec<TrafficLightFace>> {
        match &self.tl_faces {
            Some(t) if !frame.tl_face_range().is_empty() => t.range(frame.tl_face_range()),
            _ => Ok(Vec::new()),
        }
    }

    /// End of every frame's agent interval, in frame order.
    ///
    /// This is the cumulative agent count used to map an agent row back to
    /// its frame; it is streamed chunk by chunk.
    pub fn frame_agent_ends(&self) -> Result<Vec<i64>> {
        let mut ends = Vec::with_capacity(self.num_frames());
        self.frames.for_each_chunk(|_, frames| {
            ends.extend(frames.iter().map(|f| f.agent_index_interval[1]));
            Ok(())
        })?;
        Ok(ends)
    }

    /// End of every scene's frame interval, in scene order.
    pub fn scene_frame_ends(&self) -> Result<Vec<i64>> {
        let mut ends = Vec::with_capacity(self.num_scenes());
        self.scenes.for_each_chunk(|_, scenes| {
            ends.extend(scenes.iter().map(|s| s.frame_index_interval[1]));
            Ok(())
        })?;
        Ok(ends)
    }

    /// Aggregate statistics over the whole archive.
    pub fn summary(&self) -> Result<DatasetSummary> {
        let mut total_ns: i64 = 0;
        self.scenes.for_each_chunk(|_, scenes| {
            total_ns += scenes.iter().map(|s| s.end_time - s.start_time).sum::<i64>();
            Ok(())
        })?;
        let per = |n: usize, d: usize| if d == 0 { 0.0 } else { n as f64 / d as f64 };
        Ok(DatasetSummary {
            num_scenes: self.num_scenes(),
            num_frames: self.num_frames(),
            num_agents: self.num_agents(),
            num_tl_faces: self.num_tl_faces(),
            total_hours: total_ns as f64 / 1e9 / 3600.0,
            avg_frames_per_scene: per(self.num_frames(), self.num_scenes()),
            avg_agents_per_frame: per(self.num_agents(), self.num_frames()),
            avg_scene_seconds: if self.num_scenes() == 0 {
                0.0
            } else {
                total_ns as f64 / 1e9 / self.num_scenes() as f64
            },
        })
    }
}

/// Counts and averages over an archive, printable as a table.
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetSummary {
    pub num_scenes: usize,
    pub num_frames: usize,
    pub num_agents: usize,
    pub num_tl_faces: usize,
    pub total_hours: f64,
    pub avg_frames_per_scene: f64,
    pub avg_agents_per_frame: f64,
    pub avg_scene_seconds: f64,
}

impl fmt::Display for DatasetSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let header = [
            "Num Scenes",
            "Num Frames",
            "Num Agents",
            "Num TR lights",
            "Total Time (hr)",
            "Avg Frames per Scene",
            "Avg Agents per Frame",
            "Avg Scene Time (sec)",
        ];
        let values = [
            self.num_scenes.to_string(),
            self.num_frames.to_string(),
            self.num_agents.to_string(),
            self.num_tl_faces.to_string(),
            format!("{:.2}", self.total_hours),
            format!("{:.2}", self.avg_frames_per_scene),
            format!("{:.2}", self.avg_agents_per_frame),
            format!("{:.2}", self.avg_scene_seconds),
        ];
        let widths: Vec<usize> = header
            .iter()
            .zip(&values)
            .map(|(h, v)| h.len().max(v.len()))
            .collect();
        let rule: String = widths
            .iter()
            .map(|w| format!("+{}", "-".repeat(w + 2)))
            .collect::<String>()
            + "+";
        writeln!(f, "{rule}")?;
        for row in [header.map(String::from), values] {
            for (cell, w) in row.iter().zip(widths.iter().copied()) {
                write!(f, "| {cell:>w$} ")?;
            }
            writeln!(f, "|")?;
            writeln!(f, "{rule}")?;
        }
        Ok(())
    }
}
