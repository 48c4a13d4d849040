// Agent eligibility masks
//
// A mask holds one bool per agent row of an archive. It either comes from a
// companion numpy file (the official evaluation subset) or is computed from
// track continuity:
//
//   frame      0   1   2   3   4   5
//   track 7    x   x   x   x   .   x
//   past       0   1   2   3   -   0
//   future     3   2   1   0   -   0
//
// `past` counts the consecutive frames the track was seen in just before the
// current one, `future` those just after; both stop at scene boundaries.

use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::ops::Range;
use std::path::Path;

use motion_core::{AgentSelection, Error, Result};
use motion_zarr::ChunkedDataset;

/// Name of the array inside an `.npz` mask archive.
pub const MASK_ARRAY: &str = "arr_0";

/// Compute the eligibility mask of `dataset`.
///
/// An agent row is eligible when its best known-label probability is above
/// `threshold` and its track is continuous for at least
/// `selection.min_frame_history` frames before and
/// `selection.min_frame_future` frames after it within the scene.
pub fn select_agents(
    dataset: &ChunkedDataset,
    threshold: f64,
    selection: &AgentSelection,
) -> Result<Vec<bool>> {
    let mut mask = vec![false; dataset.num_agents()];

    for scene_index in 0..dataset.num_scenes() {
        let scene = dataset.scene(scene_index)?;
        let frames = dataset.frames_in(scene.frame_range())?;
        let (Some(first), Some(last)) = (frames.first(), frames.last()) else {
            continue;
        };
        let offset = first.agent_index_interval[0] as usize;
        let agents = dataset
            .agents
            .range(offset..last.agent_index_interval[1] as usize)?;
        // rows of frame `f` relative to `offset`; intervals that leave the
        // scene's agent rows mean the archive is inconsistent
        let rows_of = |f: usize| -> Result<Range<usize>> {
            let r = frames[f].agent_range();
            match (r.start.checked_sub(offset), r.end.checked_sub(offset)) {
                (Some(start), Some(end)) if start <= end && end <= agents.len() => {
                    Ok(start..end)
                }
                _ => Err(Error::malformed(
                    dataset.path(),
                    format!(
                        "frame {} agent interval [{}, {}) is outside scene {scene_index} rows [{offset}, {})",
                        scene.frame_range().start + f,
                        r.start,
                        r.end,
                        offset + agents.len()
                    ),
                )),
            }
        };

        let mut past = vec![0usize; agents.len()];
        let mut seen: HashMap<u64, (usize, usize)> = HashMap::new();
        for f in 0..frames.len() {
            for row in rows_of(f)? {
                let id = agents[row].track_id;
                past[row] = match seen.get(&id) {
                    Some(&(last_frame, run)) if last_frame + 1 == f => run + 1,
                    _ => 0,
                };
                seen.insert(id, (f, past[row]));
            }
        }

        let mut future = vec![0usize; agents.len()];
        seen.clear();
        for f in (0..frames.len()).rev() {
            for row in rows_of(f)? {
                let id = agents[row].track_id;
                future[row] = match seen.get(&id) {
                    Some(&(next_frame, run)) if next_frame == f + 1 => run + 1,
                    _ => 0,
                };
                seen.insert(id, (f, future[row]));
            }
        }

        for (row, agent) in agents.iter().enumerate() {
            mask[offset + row] = agent.passes_threshold(threshold)
                && past[row] >= selection.min_frame_history
                && future[row] >= selection.min_frame_future;
        }
    }

    let eligible = mask.iter().filter(|&&m| m).count();
    tracing::debug!(
        agents = mask.len(),
        eligible,
        threshold,
        min_frame_history = selection.min_frame_history,
        min_frame_future = selection.min_frame_future,
        "selected agents"
    );
    Ok(mask)
}

/// Read a boolean mask from a `.npy` file or from entry `arr_0` of an
/// `.npz` archive.
pub fn load_mask(path: impl AsRef<Path>) -> Result<Vec<bool>> {
    let path = path.as_ref();
    let bad = |e: std::io::Error| Error::Mask(format!("{}: {e}", path.display()));

    let mask = match path.extension().and_then(|e| e.to_str()) {
        Some("npz") => {
            let mut archive = npyz::npz::NpzArchive::open(path).map_err(bad)?;
            let npy = archive.by_name(MASK_ARRAY).map_err(bad)?.ok_or_else(|| {
                Error::Mask(format!("{}: no array named {MASK_ARRAY}", path.display()))
            })?;
            check_1d(path, npy.shape())?;
            npy.into_vec::<bool>().map_err(bad)?
        }
        Some("npy") => {
            let file = File::open(path).map_err(bad)?;
            let npy = npyz::NpyFile::new(BufReader::new(file)).map_err(bad)?;
            check_1d(path, npy.shape())?;
            npy.into_vec::<bool>().map_err(bad)?
        }
        _ => {
            return Err(Error::Mask(format!(
                "{}: expected a .npz or .npy file",
                path.display()
            )))
        }
    };

    tracing::debug!(
        path = %path.display(),
        len = mask.len(),
        selected = mask.iter().filter(|&&m| m).count(),
        "loaded agent mask"
    );
    Ok(mask)
}

fn check_1d(path: &Path, shape: &[u64]) -> Result<()> {
    if shape.len() != 1 {
        return Err(Error::Mask(format!(
            "{}: expected a 1-d mask, got shape {shape:?}",
            path.display()
        )));
    }
    Ok(())
}
