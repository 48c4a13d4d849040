//! # motion-data
//!
//! Agent datasets, batching and the data module for motion prediction.
//!
//! This crate provides:
//! - [`Dataset`] trait: indexable, fallible sample sources
//! - [`AgentDataset`] / [`EgoDataset`]: rasterized samples from a chunked archive
//! - [`DataLoader`]: batching, shuffling, background prefetching
//! - [`MotionDataModule`]: train/validation/test loaders from a run configuration
//! - [`mask`]: agent eligibility masks (computed or loaded from numpy files)
//! - [`render_agent_map`]: a sample's raster with its trajectory drawn on top

pub mod agent;
pub mod dataset;
pub mod loader;
pub mod mask;
pub mod module;
pub mod prefetch;
pub mod sample;
pub mod visualize;

pub use agent::{AgentDataset, EgoDataset};
pub use dataset::Dataset;
pub use loader::{BatchOf, DataLoader, DataLoaderConfig, EpochIter};
pub use mask::{load_mask, select_agents};
pub use module::{DataModule, MotionDataModule, VISUALIZATION_FILE};
pub use prefetch::PrefetchIterator;
pub use sample::{AgentBatch, AgentSample, Collate};
pub use visualize::render_agent_map;
