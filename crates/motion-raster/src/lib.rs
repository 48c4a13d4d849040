//! # motion-raster
//!
//! Birds-eye-view rasterization of scene histories.
//!
//! This crate provides:
//! - [`Rasterizer`]: the trait every renderer implements
//! - [`BoxRasterizer`]: agents and ego as filled boxes (`box_debug`)
//! - [`StubRasterizer`]: blank rasters (`stub_debug`)
//! - [`RenderContext`]: raster size, resolution and centring
//! - [`build_rasterizer`]: construct a rasterizer from a [`motion_core::Config`]
//! - [`draw`]: polygon fill and trajectory overlays

pub mod box_raster;
pub mod builder;
pub mod draw;
pub mod rasterizer;
pub mod render_context;
pub mod stub;

pub use box_raster::BoxRasterizer;
pub use builder::{build_rasterizer, SUPPORTED_MAP_TYPES};
pub use draw::{draw_trajectory, PREDICTED_POINTS_COLOR, TARGET_POINTS_COLOR};
pub use rasterizer::Rasterizer;
pub use render_context::RenderContext;
pub use stub::StubRasterizer;
