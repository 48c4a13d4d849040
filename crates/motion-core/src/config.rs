// Config: run configuration for motion datasets
//
// The YAML layout follows the agent-motion configs used with the Lyft Level 5
// prediction data:
//
//   format_version: 4
//   model_params:      { history_num_frames, future_num_frames, ... }
//   raster_params:     { raster_size, pixel_size, ego_center, map_type, ... }
//   agent_selection:   { min_frame_history, min_frame_future }
//   train_data_loader: { key, batch_size, shuffle, num_workers }
//   val_data_loader:   { ... }
//   test_data_loader:  { ..., mask_key }
//
// Every field has a default so partial files are accepted. Run arguments
// (batch size, workers, shuffle) override the loader sections for the
// current mode.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Which lifecycle the data module is prepared for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    #[default]
    Train,
    Test,
}

impl FromStr for RunMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "train" => Ok(RunMode::Train),
            "test" => Ok(RunMode::Test),
            other => Err(Error::Config(format!(
                "unknown run mode {other:?}, expected \"train\" or \"test\""
            ))),
        }
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunMode::Train => write!(f, "train"),
            RunMode::Test => write!(f, "test"),
        }
    }
}

/// Arguments of a single run. `None` fields keep the config file's value.
#[derive(Debug, Clone, Default)]
pub struct RunArgs {
    pub mode: RunMode,
    pub config_path: Option<PathBuf>,
    pub batch_size: Option<usize>,
    pub num_workers: Option<usize>,
    pub shuffle: Option<bool>,
    pub seed: Option<u64>,
}

impl RunArgs {
    pub fn new(mode: RunMode) -> Self {
        Self {
            mode,
            ..Default::default()
        }
    }

    pub fn config_path(mut self, p: impl Into<PathBuf>) -> Self {
        self.config_path = Some(p.into());
        self
    }

    pub fn batch_size(mut self, bs: usize) -> Self {
        self.batch_size = Some(bs);
        self
    }

    pub fn num_workers(mut self, n: usize) -> Self {
        self.num_workers = Some(n);
        self
    }

    pub fn shuffle(mut self, s: bool) -> Self {
        self.shuffle = Some(s);
        self
    }

    pub fn seed(mut self, s: u64) -> Self {
        self.seed = Some(s);
        self
    }
}

/// Temporal extent of a sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelParams {
    pub history_num_frames: usize,
    pub history_step_size: usize,
    pub future_num_frames: usize,
    pub future_step_size: usize,
    /// Seconds between consecutive frames.
    pub step_time: f64,
}

impl Default for ModelParams {
    fn default() -> Self {
        Self {
            history_num_frames: 10,
            history_step_size: 1,
            future_num_frames: 50,
            future_step_size: 1,
            step_time: 0.1,
        }
    }
}

/// Raster geometry and rasterizer selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RasterParams {
    /// Raster width and height in pixels.
    pub raster_size: [u32; 2],
    /// Metres per pixel along x and y.
    pub pixel_size: [f64; 2],
    /// Position of the centred agent as a fraction of the raster size.
    pub ego_center: [f64; 2],
    pub map_type: String,
    pub satellite_map_key: Option<String>,
    pub semantic_map_key: Option<String>,
    pub dataset_meta_key: Option<String>,
    /// Agents whose best non-"unknown" label probability is not above this
    /// value are ignored.
    pub filter_agents_threshold: f64,
    /// Put the raster origin at the bottom-left (y grows upwards).
    pub set_origin_to_bottom: bool,
}

impl Default for RasterParams {
    fn default() -> Self {
        Self {
            raster_size: [224, 224],
            pixel_size: [0.5, 0.5],
            ego_center: [0.25, 0.5],
            map_type: "box_debug".to_string(),
            satellite_map_key: None,
            semantic_map_key: None,
            dataset_meta_key: None,
            filter_agents_threshold: 0.5,
            set_origin_to_bottom: false,
        }
    }
}

/// Which agents are eligible samples when no explicit mask is given.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentSelection {
    pub min_frame_history: usize,
    pub min_frame_future: usize,
}

impl Default for AgentSelection {
    fn default() -> Self {
        Self {
            min_frame_history: 10,
            min_frame_future: 1,
        }
    }
}

/// One loader section (`train_data_loader`, `val_data_loader`, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataLoaderParams {
    /// Archive key relative to the data root.
    pub key: String,
    pub batch_size: usize,
    pub shuffle: bool,
    pub num_workers: usize,
    /// Companion eligibility mask, only read for the test split.
    pub mask_key: Option<String>,
}

impl Default for DataLoaderParams {
    fn default() -> Self {
        Self {
            key: String::new(),
            batch_size: 12,
            shuffle: false,
            num_workers: 4,
            mask_key: None,
        }
    }
}

impl DataLoaderParams {
    fn with_key(key: &str) -> Self {
        Self {
            key: key.to_string(),
            ..Default::default()
        }
    }
}

fn default_train_loader() -> DataLoaderParams {
    DataLoaderParams {
        shuffle: true,
        ..DataLoaderParams::with_key("scenes/train.zarr")
    }
}

fn default_val_loader() -> DataLoaderParams {
    DataLoaderParams::with_key("scenes/validate.zarr")
}

fn default_test_loader() -> DataLoaderParams {
    DataLoaderParams {
        mask_key: Some("scenes/mask.npz".to_string()),
        ..DataLoaderParams::with_key("scenes/test.zarr")
    }
}

/// Full run configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub format_version: u32,
    pub model_params: ModelParams,
    pub raster_params: RasterParams,
    pub agent_selection: AgentSelection,
    #[serde(default = "default_train_loader")]
    pub train_data_loader: DataLoaderParams,
    #[serde(default = "default_val_loader")]
    pub val_data_loader: DataLoaderParams,
    #[serde(default = "default_test_loader")]
    pub test_data_loader: DataLoaderParams,
    /// Seed for shuffling; `None` draws from the thread RNG.
    pub seed: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            format_version: 4,
            model_params: ModelParams::default(),
            raster_params: RasterParams::default(),
            agent_selection: AgentSelection::default(),
            train_data_loader: default_train_loader(),
            val_data_loader: default_val_loader(),
            test_data_loader: default_test_loader(),
            seed: None,
        }
    }
}

impl Config {
    /// Parse a YAML document. Missing sections take their defaults.
    pub fn from_yaml_str(s: &str) -> Result<Self> {
        let mut cfg: Config = serde_yaml::from_str(s)?;
        cfg.fill_loader_keys();
        cfg.validate()?;
        Ok(cfg)
    }

    /// Read and parse a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read config {}: {e}", path.display()))
        })?;
        let cfg = Self::from_yaml_str(&text)?;
        tracing::debug!(path = %path.display(), "loaded config");
        Ok(cfg)
    }

    /// Serialize back to YAML.
    pub fn to_yaml_string(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    fn base(args: &RunArgs) -> Result<Self> {
        let mut cfg = match &args.config_path {
            Some(p) => Self::load(p)?,
            None => Self::default(),
        };
        if args.seed.is_some() {
            cfg.seed = args.seed;
        }
        Ok(cfg)
    }

    /// Configuration for training runs: overrides apply to the train and
    /// validation loaders. Validation never shuffles.
    pub fn for_train(args: &RunArgs) -> Result<Self> {
        let mut cfg = Self::base(args)?;
        apply_overrides(&mut cfg.train_data_loader, args, args.shuffle);
        apply_overrides(&mut cfg.val_data_loader, args, None);
        cfg.val_data_loader.shuffle = false;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Configuration for test runs: overrides apply to the test loader,
    /// which never shuffles.
    pub fn for_test(args: &RunArgs) -> Result<Self> {
        let mut cfg = Self::base(args)?;
        apply_overrides(&mut cfg.test_data_loader, args, None);
        cfg.test_data_loader.shuffle = false;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Pick [`Config::for_train`] or [`Config::for_test`] from `args.mode`.
    pub fn for_run(args: &RunArgs) -> Result<Self> {
        match args.mode {
            RunMode::Train => Self::for_train(args),
            RunMode::Test => Self::for_test(args),
        }
    }

    /// Partially written loader sections keep their split's archive keys.
    fn fill_loader_keys(&mut self) {
        for (loader, default) in [
            (&mut self.train_data_loader, default_train_loader()),
            (&mut self.val_data_loader, default_val_loader()),
            (&mut self.test_data_loader, default_test_loader()),
        ] {
            if loader.key.is_empty() {
                loader.key = default.key;
            }
            if loader.mask_key.is_none() {
                loader.mask_key = default.mask_key;
            }
        }
    }

    /// Reject values that would make rasterization or batching meaningless.
    pub fn validate(&self) -> Result<()> {
        let r = &self.raster_params;
        if r.raster_size[0] == 0 || r.raster_size[1] == 0 {
            return Err(Error::Config(format!(
                "raster_size must be positive, got {:?}",
                r.raster_size
            )));
        }
        if !(r.pixel_size[0] > 0.0 && r.pixel_size[1] > 0.0) {
            return Err(Error::Config(format!(
                "pixel_size must be positive, got {:?}",
                r.pixel_size
            )));
        }
        if r.ego_center.iter().any(|c| !(0.0..=1.0).contains(c)) {
            return Err(Error::Config(format!(
                "ego_center must lie in [0, 1], got {:?}",
                r.ego_center
            )));
        }
        if !(0.0..=1.0).contains(&r.filter_agents_threshold) {
            return Err(Error::Config(format!(
                "filter_agents_threshold must lie in [0, 1], got {}",
                r.filter_agents_threshold
            )));
        }
        let m = &self.model_params;
        if m.future_num_frames == 0 {
            return Err(Error::Config("future_num_frames must be positive".into()));
        }
        if m.history_step_size == 0 || m.future_step_size == 0 {
            return Err(Error::Config("step sizes must be positive".into()));
        }
        for (name, loader) in [
            ("train_data_loader", &self.train_data_loader),
            ("val_data_loader", &self.val_data_loader),
            ("test_data_loader", &self.test_data_loader),
        ] {
            if loader.batch_size == 0 {
                return Err(Error::Config(format!("{name}.batch_size must be positive")));
            }
        }
        Ok(())
    }
}

fn apply_overrides(loader: &mut DataLoaderParams, args: &RunArgs, shuffle: Option<bool>) {
    if let Some(bs) = args.batch_size {
        loader.batch_size = bs;
    }
    if let Some(n) = args.num_workers {
        loader.num_workers = n;
    }
    if let Some(s) = shuffle {
        loader.shuffle = s;
    }
}
