// MotionDataModule: loaders for the train / validation / test lifecycle
//
// Turns run arguments and a data root into ready-to-iterate loaders:
//
//   train_dataloader()  train_data_loader.key  shuffle per config
//   val_dataloader()    val_data_loader.key    never shuffled
//   test_dataloader()   test_data_loader.key   never shuffled, agents
//                                              restricted by mask_key
//
// The agent dataset behind the last train or test loader built is kept
// for `visualize_agent_map`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use motion_core::{
    Config, DataLoaderParams, DataManager, Error, LocalDataManager, Result, RunArgs,
};
use motion_raster::{build_rasterizer, Rasterizer};
use motion_zarr::ChunkedDataset;

use crate::agent::AgentDataset;
use crate::dataset::Dataset;
use crate::loader::{DataLoader, DataLoaderConfig};
use crate::mask::load_mask;
use crate::visualize::{render_agent_map, save_png};

/// Default output of [`MotionDataModule::visualize_agent_map`].
pub const VISUALIZATION_FILE: &str = "filename.png";

/// The lifecycle surface a training framework calls.
pub trait DataModule {
    type Loader;

    fn train_dataloader(&mut self) -> Result<Self::Loader>;
    fn val_dataloader(&mut self) -> Result<Self::Loader>;
    fn test_dataloader(&mut self) -> Result<Self::Loader>;
}

/// Data module over a local dataset folder.
pub struct MotionDataModule {
    args: RunArgs,
    config: Config,
    dm: LocalDataManager,
    rasterizer: Arc<dyn Rasterizer>,
    agent_dataset: Option<Arc<AgentDataset>>,
    visualization_path: PathBuf,
}

impl MotionDataModule {
    /// Resolve the configuration for `args.mode` and build the rasterizer.
    pub fn new(args: RunArgs, data_root: impl Into<PathBuf>) -> Result<Self> {
        let config = Config::for_run(&args)?;
        Self::with_config(args, config, data_root)
    }

    /// Use an already resolved configuration.
    pub fn with_config(
        args: RunArgs,
        config: Config,
        data_root: impl Into<PathBuf>,
    ) -> Result<Self> {
        config.validate()?;
        let dm = LocalDataManager::new(data_root);
        let rasterizer = build_rasterizer(&config, &dm)?;
        tracing::info!(
            mode = %args.mode,
            data_root = %dm.root().display(),
            rasterizer = rasterizer.name(),
            "data module ready"
        );
        Ok(Self {
            args,
            config,
            dm,
            rasterizer,
            agent_dataset: None,
            visualization_path: PathBuf::from(VISUALIZATION_FILE),
        })
    }

    /// Write visualizations to `path` instead of [`VISUALIZATION_FILE`].
    pub fn visualization_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.visualization_path = path.into();
        self
    }

    pub fn args(&self) -> &RunArgs {
        &self.args
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn data_manager(&self) -> &LocalDataManager {
        &self.dm
    }

    pub fn rasterizer(&self) -> &Arc<dyn Rasterizer> {
        &self.rasterizer
    }

    /// Dataset behind the most recently built train or test loader.
    pub fn agent_dataset(&self) -> Option<&Arc<AgentDataset>> {
        self.agent_dataset.as_ref()
    }

    /// Resolve `relative_path` under the data root and open the archive.
    pub fn chunked_dataset(&self, relative_path: &str) -> Result<ChunkedDataset> {
        let path = self.dm.require(relative_path)?;
        ChunkedDataset::open(path)
    }

    fn build_loader(
        &mut self,
        params: &DataLoaderParams,
        shuffle: bool,
        use_mask: bool,
        activate: bool,
    ) -> Result<DataLoader<AgentDataset>> {
        let zarr = Arc::new(self.chunked_dataset(&params.key)?);
        let mask = match (&params.mask_key, use_mask) {
            (Some(key), true) => Some(load_mask(self.dm.require(key)?)?),
            (None, true) => {
                return Err(Error::Mask(format!(
                    "no mask_key configured for {}",
                    params.key
                )))
            }
            (_, false) => None,
        };

        let dataset = Arc::new(AgentDataset::new(
            &self.config,
            zarr,
            self.rasterizer.clone(),
            mask,
        )?);
        if activate {
            self.agent_dataset = Some(dataset.clone());
        }

        let config = DataLoaderConfig::from_params(params)
            .shuffle(shuffle)
            .maybe_seed(self.config.seed);
        tracing::info!(
            key = %params.key,
            samples = dataset.len(),
            batch_size = config.batch_size,
            shuffle,
            num_workers = config.num_workers,
            masked = use_mask,
            "built data loader"
        );
        Ok(DataLoader::new(dataset, config))
    }

    /// Loader over the validation archive; never shuffled. Leaves the
    /// dataset used by `visualize_agent_map` unchanged.
    pub fn val_dataloader(&mut self) -> Result<DataLoader<AgentDataset>> {
        let params = self.config.val_data_loader.clone();
        self.build_loader(&params, false, false, false)
    }

    /// Loader over the training archive; shuffled per configuration.
    pub fn train_dataloader(&mut self) -> Result<DataLoader<AgentDataset>> {
        let params = self.config.train_data_loader.clone();
        let shuffle = params.shuffle;
        self.build_loader(&params, shuffle, false, true)
    }

    /// Loader over the test archive, restricted to the agents selected by
    /// the companion mask; never shuffled.
    pub fn test_dataloader(&mut self) -> Result<DataLoader<AgentDataset>> {
        let params = self.config.test_data_loader.clone();
        self.build_loader(&params, false, true, true)
    }

    /// Render sample `index` of the most recent train or test dataset with its
    /// target trajectory and write it as a PNG. Returns the written path.
    pub fn visualize_agent_map(&self, index: usize) -> Result<PathBuf> {
        let dataset = self.agent_dataset.as_ref().ok_or(Error::NoActiveDataset)?;
        let sample = dataset.get(index)?;
        let image = render_agent_map(&sample, self.rasterizer.as_ref())?;
        save_png(&image, &self.visualization_path)?;
        tracing::info!(
            index,
            track_id = sample.track_id,
            path = %self.visualization_path.display(),
            "saved agent map"
        );
        Ok(self.visualization_path.clone())
    }

    /// Where [`MotionDataModule::visualize_agent_map`] writes.
    pub fn output_path(&self) -> &Path {
        &self.visualization_path
    }
}

impl DataModule for MotionDataModule {
    type Loader = DataLoader<AgentDataset>;

    fn train_dataloader(&mut self) -> Result<Self::Loader> {
        MotionDataModule::train_dataloader(self)
    }

    fn val_dataloader(&mut self) -> Result<Self::Loader> {
        MotionDataModule::val_dataloader(self)
    }

    fn test_dataloader(&mut self) -> Result<Self::Loader> {
        MotionDataModule::test_dataloader(self)
    }
}
