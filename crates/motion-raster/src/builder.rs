// build_rasterizer: pick a rasterizer from the configuration's map_type

use std::sync::Arc;

use motion_core::{Config, DataManager, Error, Result};

use crate::box_raster::BoxRasterizer;
use crate::rasterizer::Rasterizer;
use crate::render_context::RenderContext;
use crate::stub::StubRasterizer;

/// Map types this build can render.
pub const SUPPORTED_MAP_TYPES: [&str; 2] = ["box_debug", "stub_debug"];

/// Map types that need map assets (aerial imagery or a semantic map).
const MAP_BASED_TYPES: [&str; 6] = [
    "py_satellite",
    "satellite_debug",
    "py_semantic",
    "semantic_debug",
    "box_semantic",
    "satellite_semantic",
];

/// Build the rasterizer described by `cfg.raster_params`.
///
/// Map-based types resolve their map keys through `dm` first, so a missing
/// asset reports [`Error::PathNotFound`]; rendering them is not supported
/// and ends in [`Error::UnsupportedRasterizer`].
pub fn build_rasterizer(cfg: &Config, dm: &dyn DataManager) -> Result<Arc<dyn Rasterizer>> {
    let params = &cfg.raster_params;
    let ctx = RenderContext::from_params(params)?;
    let history = cfg.model_params.history_num_frames;
    let map_type = params.map_type.as_str();

    let rasterizer: Arc<dyn Rasterizer> = match map_type {
        "box_debug" => Arc::new(BoxRasterizer::new(
            ctx,
            params.filter_agents_threshold,
            history,
        )),
        "stub_debug" => Arc::new(StubRasterizer::new(ctx, history)),
        other => {
            if MAP_BASED_TYPES.contains(&other) {
                let keys = [
                    &params.satellite_map_key,
                    &params.semantic_map_key,
                    &params.dataset_meta_key,
                ];
                for key in keys.into_iter().flatten() {
                    dm.require(key)?;
                }
            }
            return Err(Error::UnsupportedRasterizer {
                map_type: other.to_string(),
                supported: SUPPORTED_MAP_TYPES.join(", "),
            });
        }
    };

    tracing::debug!(
        map_type,
        channels = rasterizer.num_channels(),
        raster_size = ?params.raster_size,
        "built rasterizer"
    );
    Ok(rasterizer)
}
