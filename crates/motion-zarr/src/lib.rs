//! # motion-zarr
//!
//! Reader and writer for chunked scene archives (zarr v2 directory stores).
//!
//! This crate provides:
//! - [`ChunkedDataset`]: an opened archive with typed, chunk-cached access
//! - [`Scene`], [`Frame`], [`Agent`], [`TrafficLightFace`]: record types
//! - [`ZarrArray`] / [`RecordDtype`]: the untyped array and numpy dtype layer
//! - [`blosc`]: the Blosc chunk codec zarr stores use by default
//! - [`ChunkedDatasetWriter`]: write archives in the canonical layout
//! - [`SyntheticArchive`]: deterministic synthetic scenes

pub mod array;
pub mod blosc;
pub mod dataset;
pub mod dtype;
pub mod schema;
pub mod synthetic;
pub mod writer;

pub use array::{ArrayMetadata, Compressor, ZarrArray};
pub use blosc::{BloscCodec, BloscOptions, Shuffle};
pub use dataset::{ChunkedDataset, DatasetSummary, RecordArray};
pub use dtype::{RecordDtype, RecordView, ScalarType};
pub use schema::{
    Agent, Frame, Record, Scene, TrafficLightFace, EGO_EXTENT, PERCEPTION_LABELS, TL_FACE_LABELS,
};
pub use synthetic::SyntheticArchive;
pub use writer::{ArchiveRecords, ChunkedDatasetWriter};
