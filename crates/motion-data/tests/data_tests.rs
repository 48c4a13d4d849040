// Tests for motion-data: Dataset, DataLoader, AgentDataset, masks, MotionDataModule

use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use motion_core::{Config, Error, RunArgs, RunMode};
use motion_data::{
    load_mask, select_agents, AgentDataset, Collate, DataLoader, DataLoaderConfig, DataModule,
    Dataset, EgoDataset, MotionDataModule, VISUALIZATION_FILE,
};
use motion_raster::{build_rasterizer, Rasterizer};
use motion_zarr::schema::{Record, CAR_LABEL};
use motion_zarr::{
    Agent, ArchiveRecords, ChunkedDataset, ChunkedDatasetWriter, Compressor, Frame, Scene,
    SyntheticArchive, ZarrArray,
};

// Simple in-memory dataset for testing

#[derive(Debug, Clone, PartialEq)]
struct ToySample(usize);

impl Collate for ToySample {
    type Batch = Vec<usize>;

    fn collate(samples: Vec<Self>) -> motion_core::Result<Vec<usize>> {
        Ok(samples.into_iter().map(|s| s.0).collect())
    }
}

struct ToyDataset {
    n: usize,
    fail_at: Option<usize>,
}

impl ToyDataset {
    fn new(n: usize) -> Self {
        Self { n, fail_at: None }
    }

    fn failing_at(n: usize, index: usize) -> Self {
        Self {
            n,
            fail_at: Some(index),
        }
    }
}

impl Dataset for ToyDataset {
    type Item = ToySample;

    fn len(&self) -> usize {
        self.n
    }

    fn get(&self, index: usize) -> motion_core::Result<ToySample> {
        if index >= self.n {
            return Err(Error::IndexOutOfRange { index, len: self.n });
        }
        if self.fail_at == Some(index) {
            return Err(Error::msg(format!("sample {index} is corrupt")));
        }
        Ok(ToySample(index))
    }

    fn name(&self) -> &str {
        "toy"
    }
}

fn toy_loader(n: usize, config: DataLoaderConfig) -> DataLoader<ToyDataset> {
    DataLoader::new(Arc::new(ToyDataset::new(n)), config)
}

fn collect_epoch(loader: &mut DataLoader<ToyDataset>) -> Vec<Vec<usize>> {
    loader.iter_epoch().map(|b| b.unwrap()).collect()
}

// DataLoader tests

#[test]
fn test_dataloader_num_batches() {
    let loader = toy_loader(10, DataLoaderConfig::default().batch_size(3));
    // 10 / 3 = 3 full + 1 partial = 4
    assert_eq!(loader.num_batches(), 4);
    assert_eq!(loader.len(), 10);
}

#[test]
fn test_dataloader_num_batches_drop_last() {
    let mut loader = toy_loader(10, DataLoaderConfig::default().batch_size(3).drop_last(true));
    assert_eq!(loader.num_batches(), 3);
    let batches = collect_epoch(&mut loader);
    assert_eq!(batches, vec![vec![0, 1, 2], vec![3, 4, 5], vec![6, 7, 8]]);
}

#[test]
fn test_dataloader_sequential_order() {
    let mut loader = toy_loader(7, DataLoaderConfig::default().batch_size(3));
    let it = loader.iter_epoch();
    assert_eq!(it.len(), 3);
    let batches: Vec<Vec<usize>> = it.map(|b| b.unwrap()).collect();
    assert_eq!(batches, vec![vec![0, 1, 2], vec![3, 4, 5], vec![6]]);
}

#[test]
fn test_dataloader_workers_keep_batch_order() {
    let config = DataLoaderConfig::default().batch_size(4);
    let expected = collect_epoch(&mut toy_loader(50, config.clone()));

    for workers in [1, 3, 8] {
        let mut loader = toy_loader(50, config.clone().num_workers(workers).prefetch_factor(1));
        assert_eq!(collect_epoch(&mut loader), expected);
        // and again for a second epoch
        assert_eq!(collect_epoch(&mut loader), expected);
    }
}

#[test]
fn test_dataloader_seeded_shuffle_is_reproducible() {
    let config = DataLoaderConfig::default()
        .batch_size(8)
        .shuffle(true)
        .seed(42);
    let mut a = toy_loader(64, config.clone());
    let mut b = toy_loader(64, config.clone().num_workers(3));

    let epoch_a = collect_epoch(&mut a);
    let epoch_b = collect_epoch(&mut b);
    assert_eq!(epoch_a, epoch_b);

    let mut flat: Vec<usize> = epoch_a.concat();
    assert_ne!(flat, (0..64).collect::<Vec<_>>());
    flat.sort_unstable();
    assert_eq!(flat, (0..64).collect::<Vec<_>>());
}

#[test]
fn test_dataloader_shuffle_changes_order() {
    let mut loader = toy_loader(100, DataLoaderConfig::default().batch_size(100).shuffle(true));
    let first = collect_epoch(&mut loader).concat();
    let second = collect_epoch(&mut loader).concat();
    // With 100 samples, the probability of two shuffles being identical is negligible
    assert_ne!(first, second);
}

#[test]
fn test_dataloader_no_shuffle_is_stable() {
    let mut loader = toy_loader(20, DataLoaderConfig::default().batch_size(6).seed(1));
    assert_eq!(collect_epoch(&mut loader), collect_epoch(&mut loader));
    assert_eq!(loader.indices(), (0..20).collect::<Vec<_>>().as_slice());
}

#[test]
fn test_dataloader_propagates_sample_errors() {
    for workers in [0, 2] {
        let mut loader = DataLoader::new(
            Arc::new(ToyDataset::failing_at(12, 5)),
            DataLoaderConfig::default().batch_size(4).num_workers(workers),
        );
        let results: Vec<_> = loader.iter_epoch().collect();
        assert_eq!(results.len(), 3);
        assert!(results[0].is_ok());
        assert!(matches!(&results[1], Err(Error::Msg(m)) if m.contains("sample 5")));
        assert_eq!(results[2].as_ref().unwrap(), &vec![8, 9, 10, 11]);
    }
}

#[test]
fn test_dataloader_early_drop_stops_workers() {
    let mut loader = toy_loader(
        1000,
        DataLoaderConfig::default()
            .batch_size(2)
            .num_workers(4)
            .prefetch_factor(1),
    );
    {
        let mut it = loader.iter_epoch();
        assert_eq!(it.next().unwrap().unwrap(), vec![0, 1]);
        // dropped here with most batches still queued
    }
    assert_eq!(collect_epoch(&mut loader).len(), 500);
}

#[test]
fn test_dataloader_random_access_batch() {
    let loader = toy_loader(10, DataLoaderConfig::default().batch_size(4).num_workers(2));
    assert_eq!(loader.batch(1).unwrap(), vec![4, 5, 6, 7]);
    assert_eq!(loader.batch(2).unwrap(), vec![8, 9]);
    assert!(matches!(
        loader.batch(3),
        Err(Error::IndexOutOfRange { index: 3, len: 3 })
    ));
}

#[test]
fn test_dataloader_empty_dataset() {
    let mut loader = toy_loader(0, DataLoaderConfig::default().num_workers(2));
    assert!(loader.is_empty());
    assert_eq!(loader.num_batches(), 0);
    assert_eq!(loader.iter_epoch().count(), 0);
}

// Archive fixtures

/// 32x32 rasters at 1 m/px, 2 history frames, 4 future frames.
fn small_config() -> Config {
    let mut cfg = Config::default();
    cfg.model_params.history_num_frames = 2;
    cfg.model_params.future_num_frames = 4;
    cfg.raster_params.raster_size = [32, 32];
    cfg.raster_params.pixel_size = [1.0, 1.0];
    cfg.agent_selection.min_frame_history = 2;
    cfg.agent_selection.min_frame_future = 1;
    for loader in [
        &mut cfg.train_data_loader,
        &mut cfg.val_data_loader,
        &mut cfg.test_data_loader,
    ] {
        loader.batch_size = 4;
        loader.num_workers = 0;
    }
    cfg
}

/// 2 scenes x 10 frames x 3 cars. With `small_config`, each track is
/// eligible at frames 2..=8, so 2 * 3 * 7 = 42 samples.
fn synthetic() -> SyntheticArchive {
    SyntheticArchive::new(2, 10, 3)
}

fn open_synthetic(dir: &Path) -> Arc<ChunkedDataset> {
    Arc::new(synthetic().write(dir.join("train.zarr"), 16).unwrap())
}

fn rasterizer(cfg: &Config, root: &Path) -> Arc<dyn Rasterizer> {
    build_rasterizer(cfg, &motion_core::LocalDataManager::new(root)).unwrap()
}

/// A 1-d boolean array in `.npy` format.
fn npy_bool_bytes(values: &[bool]) -> Vec<u8> {
    let mut header = format!(
        "{{'descr': '|b1', 'fortran_order': False, 'shape': ({},), }}",
        values.len()
    );
    // magic + version + header length, then the header padded to 64 bytes
    let unpadded = 10 + header.len() + 1;
    header.push_str(&" ".repeat((64 - unpadded % 64) % 64));
    header.push('\n');
    let mut bytes = b"\x93NUMPY\x01\x00".to_vec();
    bytes.extend_from_slice(&(header.len() as u16).to_le_bytes());
    bytes.extend_from_slice(header.as_bytes());
    bytes.extend(values.iter().map(|&b| b as u8));
    bytes
}

fn write_npy_bool(path: &Path, values: &[bool]) {
    std::fs::write(path, npy_bool_bytes(values)).unwrap();
}

/// Write an `.npz` archive holding one boolean array per `(name, values)`.
fn write_npz_bool(path: &Path, arrays: &[(&str, &[bool])]) {
    let mut zip = zip::ZipWriter::new(std::fs::File::create(path).unwrap());
    let options =
        zip::write::FileOptions::default().compression_method(zip::CompressionMethod::Stored);
    for (name, values) in arrays {
        zip.start_file(format!("{name}.npy"), options).unwrap();
        zip.write_all(&npy_bool_bytes(values)).unwrap();
    }
    zip.finish().unwrap();
}

fn car(track_id: u64, x: f64) -> Agent {
    let mut label_probabilities = [0.0; 17];
    label_probabilities[CAR_LABEL] = 1.0;
    Agent {
        centroid: [x, 0.0],
        extent: [4.0, 1.8, 1.5],
        yaw: 0.0,
        velocity: [0.0, 0.0],
        track_id,
        label_probabilities,
    }
}

// Agent selection tests

#[test]
fn test_select_agents_counts() {
    let dir = tempfile::tempdir().unwrap();
    let ds = open_synthetic(dir.path());
    let cfg = small_config();

    let mask = select_agents(&ds, 0.5, &cfg.agent_selection).unwrap();
    assert_eq!(mask.len(), 60);
    assert_eq!(mask.iter().filter(|&&m| m).count(), 42);

    let mut loose = cfg.agent_selection.clone();
    loose.min_frame_history = 0;
    loose.min_frame_future = 0;
    assert!(select_agents(&ds, 0.5, &loose).unwrap().iter().all(|&m| m));

    // no label probability is above 1.0
    assert!(select_agents(&ds, 1.0, &loose).unwrap().iter().all(|&m| !m));
}

#[test]
fn test_select_agents_breaks_on_gaps() {
    // track 7 is seen in frames 0, 1 and 3 of a single scene
    let mut rec = ArchiveRecords::default();
    for (f, present) in [true, true, false, true].into_iter().enumerate() {
        let start = rec.agents.len() as i64;
        if present {
            rec.agents.push(car(7, f as f64));
        }
        rec.frames.push(Frame {
            timestamp: f as i64 * 100_000_000,
            agent_index_interval: [start, rec.agents.len() as i64],
            traffic_light_faces_index_interval: [0, 0],
            ego_translation: [0.0, 0.0, 0.0],
            ego_rotation: motion_core::geometry::rotation_from_yaw(0.0),
        });
    }
    rec.scenes.push(Scene {
        frame_index_interval: [0, 4],
        host: "host-0".to_string(),
        start_time: 0,
        end_time: 300_000_000,
    });

    let dir = tempfile::tempdir().unwrap();
    let ds = ChunkedDatasetWriter::new(dir.path().join("gap.zarr"))
        .write(&rec)
        .unwrap();
    let mut sel = small_config().agent_selection;
    sel.min_frame_history = 1;
    sel.min_frame_future = 0;
    // rows: frame 0 (no past), frame 1 (one frame of past), frame 3 (gap before)
    assert_eq!(
        select_agents(&ds, 0.5, &sel).unwrap(),
        vec![false, true, false]
    );

    sel.min_frame_history = 0;
    sel.min_frame_future = 1;
    assert_eq!(
        select_agents(&ds, 0.5, &sel).unwrap(),
        vec![true, false, false]
    );
}

#[test]
fn test_select_agents_rejects_out_of_order_frames() {
    // 1 scene x 3 frames x 2 agents, then frames 0 and 1 swap agent rows so
    // frame 1 starts before the scene's first row
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("swapped.zarr");
    let mut rec = SyntheticArchive::new(1, 3, 2).records();
    ChunkedDatasetWriter::new(&path).write(&rec).unwrap();

    rec.frames[0].agent_index_interval = [2, 4];
    rec.frames[1].agent_index_interval = [0, 2];
    let mut data = Vec::new();
    for frame in &rec.frames {
        frame.encode(&mut data);
    }
    ZarrArray::create(
        path.join(Frame::ARRAY),
        &Frame::dtype(),
        &[],
        &data,
        1000,
        Compressor::None,
    )
    .unwrap();

    let ds = ChunkedDataset::open(&path).unwrap();
    let err = select_agents(&ds, 0.5, &small_config().agent_selection).unwrap_err();
    match err {
        Error::ArchiveMalformed { reason, .. } => {
            assert!(reason.contains("frame 1 agent interval [0, 2)"), "{reason}");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_load_mask_npy() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("mask.npy");
    let values = [true, false, false, true, true];
    write_npy_bool(&path, &values);
    assert_eq!(load_mask(&path).unwrap(), values.to_vec());
}

#[test]
fn test_load_mask_npz() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("mask.npz");
    let values = [false, true, true, false];
    write_npz_bool(&path, &[("extra", &[true]), ("arr_0", &values)]);
    assert_eq!(load_mask(&path).unwrap(), values.to_vec());

    let unnamed = dir.path().join("unnamed.npz");
    write_npz_bool(&unnamed, &[("mask", &values)]);
    assert!(matches!(
        load_mask(&unnamed),
        Err(Error::Mask(m)) if m.contains("no array named arr_0")
    ));
}

#[test]
fn test_load_mask_rejects_other_files() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("mask.txt");
    std::fs::write(&path, "1 0 1").unwrap();
    assert!(matches!(load_mask(&path), Err(Error::Mask(_))));
    assert!(matches!(
        load_mask(dir.path().join("missing.npy")),
        Err(Error::Mask(_))
    ));
}

// AgentDataset tests

#[test]
fn test_agent_dataset_samples() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = small_config();
    let ds = AgentDataset::new(
        &cfg,
        open_synthetic(dir.path()),
        rasterizer(&cfg, dir.path()),
        None,
    )
    .unwrap();
    assert_eq!(ds.len(), 42);
    assert_eq!(ds.name(), "train.zarr");

    // first sample: track 1 at frame 2 of scene 0, driving along +x at 11 m/s
    let s = ds.get(0).unwrap();
    assert_eq!(s.track_id, 1);
    assert_eq!(s.scene_index, 0);
    assert_eq!(s.timestamp, 200_000_000);
    assert_eq!(s.image.shape(), &[6, 32, 32]);
    assert_eq!(s.target_positions.shape(), &[4, 2]);
    assert_eq!(s.history_positions.shape(), &[3, 2]);
    assert!((s.target_positions[[0, 0]] - 1.1).abs() < 1e-4);
    assert!((s.target_positions[[3, 0]] - 4.4).abs() < 1e-4);
    assert!(s.target_positions[[3, 1]].abs() < 1e-4);
    assert!((s.history_positions[[1, 0]] + 1.1).abs() < 1e-4);
    assert!(s.target_yaws.iter().all(|y| y.abs() < 1e-6));
    assert_eq!(s.target_availabilities.to_vec(), vec![1.0; 4]);
    assert_eq!(s.history_availabilities.to_vec(), vec![1.0; 3]);

    // the agent sits at the raster centre
    let p = s.raster_from_agent.transform_point([0.0, 0.0]);
    assert_eq!(p, [8.0, 16.0]);
    let q = s.world_to_image().transform_point(s.centroid);
    assert!((q[0] - 8.0).abs() < 1e-9 && (q[1] - 16.0).abs() < 1e-9);
    // its own box is in the second channel block
    assert_eq!(s.image[[3, 16, 8]], 1.0);
}

#[test]
fn test_agent_dataset_clips_future_at_scene_end() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = small_config();
    let ds = AgentDataset::new(
        &cfg,
        open_synthetic(dir.path()),
        rasterizer(&cfg, dir.path()),
        None,
    )
    .unwrap();
    // samples are ordered by agent row: (state - 2) * 3 + (track - 1)
    let s = ds.get(18).unwrap();
    assert_eq!(s.track_id, 1);
    assert_eq!(s.timestamp, 800_000_000);
    assert_eq!(s.target_availabilities.to_vec(), vec![1.0, 0.0, 0.0, 0.0]);
    assert_eq!(s.target_positions[[1, 0]], 0.0);

    // second scene
    let s = ds.get(21).unwrap();
    assert_eq!(s.scene_index, 1);
    assert_eq!(s.track_id, 1);

    assert!(matches!(
        ds.get(42),
        Err(Error::IndexOutOfRange { index: 42, len: 42 })
    ));
}

#[test]
fn test_agent_dataset_get_frame() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = small_config();
    let ds = AgentDataset::new(
        &cfg,
        open_synthetic(dir.path()),
        rasterizer(&cfg, dir.path()),
        None,
    )
    .unwrap();

    // ego at the first frame: no history behind it
    let ego = ds.get_frame(0, 0, None).unwrap();
    assert_eq!(ego.track_id, 0);
    assert_eq!(ego.history_availabilities.to_vec(), vec![1.0, 0.0, 0.0]);
    assert!((ego.target_positions[[0, 0]] - 1.0).abs() < 1e-4);

    let agent = ds.get_frame(1, 5, Some(2)).unwrap();
    assert_eq!(agent.scene_index, 1);
    assert_eq!(agent.track_id, 2);

    assert!(ds.get_frame(0, 3, Some(99)).is_err());
    assert!(matches!(
        ds.get_frame(0, 10, None),
        Err(Error::IndexOutOfRange { .. })
    ));
}

#[test]
fn test_agent_dataset_with_mask() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = small_config();
    let zarr = open_synthetic(dir.path());
    let rast = rasterizer(&cfg, dir.path());

    let mask: Vec<bool> = (0..60).map(|i| i % 7 == 0).collect();
    let ds = AgentDataset::new(&cfg, zarr.clone(), rast.clone(), Some(mask)).unwrap();
    assert_eq!(ds.len(), 9);
    assert_eq!(ds.agent_indices()[1], 7);
    // row 7 is the second car of frame 2
    let s = ds.get(1).unwrap();
    assert_eq!(s.track_id, 2);
    assert_eq!(s.timestamp, 200_000_000);

    assert!(matches!(
        AgentDataset::new(&cfg, zarr, rast, Some(vec![true; 59])),
        Err(Error::Mask(_))
    ));
}

#[test]
fn test_ego_dataset() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = small_config();
    let ds = EgoDataset::new(&cfg, open_synthetic(dir.path()), rasterizer(&cfg, dir.path()))
        .unwrap();
    assert_eq!(ds.len(), 20);
    let s = ds.get(12).unwrap();
    assert_eq!(s.scene_index, 1);
    assert_eq!(s.track_id, 0);
    assert_eq!(s.history_availabilities.to_vec(), vec![1.0, 1.0, 1.0]);
    // ego box in the first channel of the second block
    assert_eq!(s.image[[3, 16, 8]], 1.0);
    assert!(ds.get(20).is_err());
}

#[test]
fn test_agent_samples_collate() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = small_config();
    let ds = Arc::new(
        AgentDataset::new(
            &cfg,
            open_synthetic(dir.path()),
            rasterizer(&cfg, dir.path()),
            None,
        )
        .unwrap(),
    );
    let mut loader = DataLoader::new(ds, DataLoaderConfig::default().batch_size(4));
    let batch = loader.iter_epoch().next().unwrap().unwrap();
    assert_eq!(batch.len(), 4);
    assert_eq!(batch.image.shape(), &[4, 6, 32, 32]);
    assert_eq!(batch.target_positions.shape(), &[4, 4, 2]);
    assert_eq!(batch.target_availabilities.shape(), &[4, 4]);
    assert_eq!(batch.raster_from_world.shape(), &[4, 3, 3]);
    assert_eq!(batch.centroid.shape(), &[4, 2]);
    assert_eq!(batch.track_id, vec![1, 2, 3, 1]);
}

// MotionDataModule tests

/// Data root laid out like a real one: Blosc-compressed train/validate/test
/// archives and `scenes/mask.npz` selecting every fifth agent row (12 of 60).
/// `scenes/mask.npy` selects every sixth (10 of 60).
fn data_root(dir: &Path) -> Config {
    let scenes = dir.join("scenes");
    for name in ["train.zarr", "validate.zarr", "test.zarr"] {
        synthetic()
            .write_with(scenes.join(name), 16, Compressor::blosc_lz4())
            .unwrap();
    }
    let every_fifth: Vec<bool> = (0..60).map(|i| i % 5 == 0).collect();
    write_npz_bool(&scenes.join("mask.npz"), &[("arr_0", &every_fifth)]);
    let every_sixth: Vec<bool> = (0..60).map(|i| i % 6 == 0).collect();
    write_npy_bool(&scenes.join("mask.npy"), &every_sixth);

    small_config()
}

fn train_module(dir: &Path, cfg: Config) -> MotionDataModule {
    MotionDataModule::with_config(RunArgs::new(RunMode::Train), cfg, dir).unwrap()
}

#[test]
fn test_train_loader_batches() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = data_root(dir.path());
    let mut module = train_module(dir.path(), cfg);

    let mut loader = module.train_dataloader().unwrap();
    assert_eq!(loader.len(), 42);
    assert_eq!(loader.num_batches(), 11);
    let sizes: Vec<usize> = loader.iter_epoch().map(|b| b.unwrap().len()).collect();
    assert_eq!(sizes.len(), 11);
    assert!(sizes[..10].iter().all(|&s| s == 4));
    assert_eq!(sizes[10], 2);
}

#[test]
fn test_test_loader_uses_mask() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = data_root(dir.path());
    assert_eq!(cfg.test_data_loader.mask_key.as_deref(), Some("scenes/mask.npz"));
    let mask = load_mask(dir.path().join("scenes/mask.npz")).unwrap();
    let mut module = train_module(dir.path(), cfg);

    let loader = module.test_dataloader().unwrap();
    assert_eq!(loader.len(), mask.iter().filter(|&&m| m).count());
    assert_eq!(loader.len(), 12);
    assert!(!loader.config().shuffle);
    assert_eq!(loader.dataset().agent_indices()[1], 5);
}

#[test]
fn test_test_loader_accepts_npy_mask() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = data_root(dir.path());
    cfg.test_data_loader.mask_key = Some("scenes/mask.npy".to_string());
    let mut module = train_module(dir.path(), cfg);
    assert_eq!(module.test_dataloader().unwrap().len(), 10);
}

#[test]
fn test_test_loader_rejects_short_mask() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = data_root(dir.path());
    write_npz_bool(&dir.path().join("scenes/mask.npz"), &[("arr_0", &[true; 59])]);
    let mut module = train_module(dir.path(), cfg);
    assert!(matches!(module.test_dataloader(), Err(Error::Mask(_))));
}

#[test]
fn test_val_loader_never_shuffles() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = data_root(dir.path());
    cfg.val_data_loader.shuffle = true;
    let mut module = train_module(dir.path(), cfg);

    let mut loader = module.val_dataloader().unwrap();
    assert!(!loader.config().shuffle);
    let order = |loader: &mut DataLoader<AgentDataset>| -> Vec<(u64, i64)> {
        loader
            .iter_epoch()
            .flat_map(|b| {
                let b = b.unwrap();
                b.track_id.into_iter().zip(b.timestamp).collect::<Vec<_>>()
            })
            .collect()
    };
    let first = order(&mut loader);
    let second = order(&mut loader);
    assert_eq!(first.len(), 42);
    assert_eq!(first, second);
}

#[test]
fn test_workers_match_sequential_loading() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = data_root(dir.path());
    cfg.train_data_loader.shuffle = false;
    let mut sequential = train_module(dir.path(), cfg.clone());
    cfg.train_data_loader.num_workers = 3;
    let mut parallel = train_module(dir.path(), cfg);

    let a: Vec<_> = sequential
        .train_dataloader()
        .unwrap()
        .iter_epoch()
        .map(|b| b.unwrap())
        .collect();
    let b: Vec<_> = parallel
        .train_dataloader()
        .unwrap()
        .iter_epoch()
        .map(|b| b.unwrap())
        .collect();
    assert_eq!(a.len(), b.len());
    for (x, y) in a.iter().zip(&b) {
        assert_eq!(x.track_id, y.track_id);
        assert_eq!(x.timestamp, y.timestamp);
        assert_eq!(x.image, y.image);
        assert_eq!(x.target_positions, y.target_positions);
    }
}

#[test]
fn test_visualize_writes_png() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = data_root(dir.path());
    let out = dir.path().join("out").join(VISUALIZATION_FILE);
    let mut module = train_module(dir.path(), cfg).visualization_path(&out);

    module.train_dataloader().unwrap();
    let written = module.visualize_agent_map(3).unwrap();
    assert_eq!(written, out);
    assert!(std::fs::metadata(&out).unwrap().len() > 0);

    let img = image::open(&out).unwrap().to_rgb8();
    assert_eq!(img.dimensions(), (32, 32));
    // the target trajectory is drawn in magenta somewhere
    assert!(img.pixels().any(|p| p.0 == [255, 0, 255]));
}

#[test]
fn test_visualize_default_path_and_missing_dataset() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = data_root(dir.path());
    let module = train_module(dir.path(), cfg);
    assert_eq!(module.output_path(), Path::new("filename.png"));
    assert!(matches!(
        module.visualize_agent_map(0),
        Err(Error::NoActiveDataset)
    ));
}

#[test]
fn test_val_loader_keeps_visualized_dataset() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = data_root(dir.path());
    let mut module =
        train_module(dir.path(), cfg).visualization_path(dir.path().join("v.png"));

    module.val_dataloader().unwrap();
    assert!(module.agent_dataset().is_none());
    assert!(matches!(
        module.visualize_agent_map(0),
        Err(Error::NoActiveDataset)
    ));

    module.test_dataloader().unwrap();
    module.val_dataloader().unwrap();
    let active = module.agent_dataset().unwrap();
    assert!(active.name().contains("test.zarr"));
    assert_eq!(active.len(), 12);

    module.train_dataloader().unwrap();
    module.val_dataloader().unwrap();
    assert!(module.agent_dataset().unwrap().name().contains("train.zarr"));
    module.visualize_agent_map(0).unwrap();
}

#[test]
fn test_visualize_index_out_of_range() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = data_root(dir.path());
    let mut module =
        train_module(dir.path(), cfg).visualization_path(dir.path().join("v.png"));
    module.test_dataloader().unwrap();
    assert!(matches!(
        module.visualize_agent_map(12),
        Err(Error::IndexOutOfRange { .. })
    ));
    assert!(!dir.path().join("v.png").exists());
}

#[test]
fn test_missing_archive_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = data_root(dir.path());
    cfg.train_data_loader.key = "scenes/does_not_exist.zarr".to_string();
    let mut module = train_module(dir.path(), cfg);

    assert!(matches!(
        module.chunked_dataset("scenes/nope.zarr"),
        Err(Error::PathNotFound { .. })
    ));
    assert!(matches!(
        module.train_dataloader(),
        Err(Error::PathNotFound { .. })
    ));
    assert!(module.agent_dataset().is_none());
}

#[test]
fn test_missing_mask_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = data_root(dir.path());
    cfg.test_data_loader.mask_key = Some("scenes/missing.npz".to_string());
    let mut module = train_module(dir.path(), cfg);
    assert!(matches!(
        module.test_dataloader(),
        Err(Error::PathNotFound { .. })
    ));
}

#[test]
fn test_module_from_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = data_root(dir.path());
    let cfg_path = dir.path().join("config.yaml");
    std::fs::write(&cfg_path, cfg.to_yaml_string().unwrap()).unwrap();

    let args = RunArgs::new(RunMode::Test)
        .config_path(&cfg_path)
        .batch_size(5)
        .shuffle(true);
    let mut module = MotionDataModule::new(args, dir.path()).unwrap();
    assert_eq!(module.config().test_data_loader.batch_size, 5);

    let loader = module.test_dataloader().unwrap();
    assert_eq!(loader.config().batch_size, 5);
    assert!(!loader.config().shuffle);
    assert_eq!(loader.num_batches(), 3);
}

#[test]
fn test_data_module_trait() {
    fn count_samples<M: DataModule<Loader = DataLoader<AgentDataset>>>(m: &mut M) -> usize {
        m.train_dataloader().unwrap().len() + m.val_dataloader().unwrap().len()
    }
    let dir = tempfile::tempdir().unwrap();
    let cfg = data_root(dir.path());
    let mut module = train_module(dir.path(), cfg);
    assert_eq!(count_samples(&mut module), 84);
}

#[test]
fn test_unsupported_rasterizer_fails_construction() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = data_root(dir.path());
    cfg.raster_params.map_type = "py_satellite".to_string();
    assert!(matches!(
        MotionDataModule::with_config(RunArgs::new(RunMode::Train), cfg, dir.path()),
        Err(Error::UnsupportedRasterizer { .. })
    ));
}
