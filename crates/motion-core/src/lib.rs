//! # motion-core
//!
//! Shared foundations for the motion dataset crates.
//!
//! This crate provides:
//! - [`Error`] / [`Result`]: the single error type used across the workspace
//! - [`Config`]: YAML run configuration with per-mode overrides
//! - [`DataManager`] / [`LocalDataManager`]: dataset key resolution
//! - [`Affine2`]: 2-D homogeneous transforms between world, agent and raster frames

pub mod config;
pub mod error;
pub mod geometry;
pub mod manager;

pub use config::{
    AgentSelection, Config, DataLoaderParams, ModelParams, RasterParams, RunArgs, RunMode,
};
pub use error::{Error, Result};
pub use geometry::{transform_points, Affine2};
pub use manager::{DataManager, LocalDataManager};
