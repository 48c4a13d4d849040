// Tests for motion-raster: BoxRasterizer, StubRasterizer, build_rasterizer

use motion_core::geometry::rotation_from_yaw;
use motion_core::{Config, Error, LocalDataManager};
use motion_raster::{build_rasterizer, BoxRasterizer, Rasterizer, RenderContext, StubRasterizer};
use motion_zarr::schema::CAR_LABEL;
use motion_zarr::{Agent, Frame};

fn frame_at(x: f64, y: f64) -> Frame {
    Frame {
        timestamp: 0,
        agent_index_interval: [0, 0],
        traffic_light_faces_index_interval: [0, 0],
        ego_translation: [x, y, 0.0],
        ego_rotation: rotation_from_yaw(0.0),
    }
}

fn car(track_id: u64, x: f64, y: f64, prob: f32) -> Agent {
    let mut label_probabilities = [0.0; 17];
    label_probabilities[CAR_LABEL] = prob;
    Agent {
        centroid: [x, y],
        extent: [4.0, 1.8, 1.5],
        yaw: 0.0,
        velocity: [0.0, 0.0],
        track_id,
        label_probabilities,
    }
}

/// Default geometry: 224x224, 0.5 m/px, agent at pixel (56, 112).
fn default_box(history: usize) -> BoxRasterizer {
    let ctx = RenderContext::from_params(&Config::default().raster_params).unwrap();
    BoxRasterizer::new(ctx, 0.5, history)
}

// BoxRasterizer tests

#[test]
fn test_box_channel_layout() {
    let rast = default_box(10);
    assert_eq!(rast.num_channels(), 22);
    let img = rast
        .rasterize(&[frame_at(0.0, 0.0)], &[vec![]], None)
        .unwrap();
    assert_eq!(img.shape(), &[224, 224, 22]);
    assert!(img.iter().all(|&v| v == 0.0 || v == 1.0));
}

#[test]
fn test_ego_centred_raster() {
    let rast = default_box(2);
    let n = 3;
    let img = rast
        .rasterize(
            &[frame_at(0.0, 0.0)],
            &[vec![car(1, 10.0, 0.0, 1.0)]],
            None,
        )
        .unwrap();

    // ego in the first channel of the second block, at the raster centre
    assert_eq!(img[[112, 56, n]], 1.0);
    assert_eq!(img[[112, 56, 0]], 0.0);
    // the car is 10 m ahead = 20 px to the right
    assert_eq!(img[[112, 76, 0]], 1.0);
    assert_eq!(img[[112, 76, n]], 0.0);
    // missing history stays blank
    for ch in [1, 2, n + 1, n + 2] {
        assert_eq!(img.slice(ndarray::s![.., .., ch]).sum(), 0.0);
    }
}

#[test]
fn test_agent_centred_raster() {
    let rast = default_box(0);
    let selected = car(7, 10.0, 0.0, 1.0);
    let img = rast
        .rasterize(
            &[frame_at(0.0, 0.0)],
            &[vec![selected.clone(), car(8, 20.0, 0.0, 1.0)]],
            Some(&selected),
        )
        .unwrap();

    // selected agent sits at the centre of its own block
    assert_eq!(img[[112, 56, 1]], 1.0);
    assert_eq!(img[[112, 56, 0]], 0.0);
    // ego (10 m behind) and the other car (10 m ahead) are in the agent block
    assert_eq!(img[[112, 36, 0]], 1.0);
    assert_eq!(img[[112, 76, 0]], 1.0);
}

#[test]
fn test_low_confidence_agents_are_skipped() {
    let rast = default_box(0);
    let img = rast
        .rasterize(
            &[frame_at(0.0, 0.0)],
            &[vec![car(1, 10.0, 0.0, 0.4), car(2, -10.0, 0.0, 0.5)]],
            None,
        )
        .unwrap();
    // 0.4 and exactly 0.5 both fail a strict 0.5 threshold
    assert_eq!(img.slice(ndarray::s![.., .., 0]).sum(), 0.0);
}

#[test]
fn test_to_rgb_colours_and_fade() {
    let rast = default_box(1);
    let img = rast
        .rasterize(
            &[frame_at(0.0, 0.0), frame_at(0.0, 0.0)],
            &[vec![car(1, 10.0, 0.0, 1.0)], vec![car(1, 20.0, 0.0, 1.0)]],
            None,
        )
        .unwrap();
    let rgb = rast.to_rgb(img.view()).unwrap();
    assert_eq!(rgb.dimensions(), (224, 224));
    assert_eq!(rgb.get_pixel(56, 112).0, [0, 255, 0]);
    assert_eq!(rgb.get_pixel(76, 112).0, [0, 0, 255]);
    // one frame older: 0.85 * 255
    assert_eq!(rgb.get_pixel(96, 112).0, [0, 0, 217]);
    assert_eq!(rgb.get_pixel(200, 20).0, [0, 0, 0]);
}

#[test]
fn test_to_rgb_rejects_wrong_shape() {
    let rast = default_box(1);
    let wrong = ndarray::Array3::<f32>::zeros((224, 224, 3));
    assert!(matches!(
        rast.to_rgb(wrong.view()),
        Err(Error::ShapeMismatch { .. })
    ));
}

#[test]
fn test_mismatched_history_lengths() {
    let rast = default_box(1);
    let err = rast
        .rasterize(&[frame_at(0.0, 0.0), frame_at(1.0, 0.0)], &[vec![]], None)
        .unwrap_err();
    assert!(matches!(err, Error::ShapeMismatch { .. }));
    assert!(rast.rasterize(&[], &[], None).is_err());
}

#[test]
fn test_non_square_raster() {
    let ctx = RenderContext::new([64, 32], [1.0, 1.0], [0.5, 0.5], false).unwrap();
    let rast = BoxRasterizer::new(ctx, 0.5, 0);
    let img = rast.rasterize(&[frame_at(5.0, 5.0)], &[vec![]], None).unwrap();
    assert_eq!(img.shape(), &[32, 64, 2]);
    assert_eq!(img[[16, 32, 1]], 1.0);
    let rgb = rast.to_rgb(img.view()).unwrap();
    assert_eq!(rgb.dimensions(), (64, 32));
}

// StubRasterizer tests

#[test]
fn test_stub_is_blank() {
    let ctx = RenderContext::new([32, 32], [0.5, 0.5], [0.25, 0.5], false).unwrap();
    let rast = StubRasterizer::new(ctx, 4);
    let img = rast
        .rasterize(&[frame_at(0.0, 0.0)], &[vec![car(1, 1.0, 0.0, 1.0)]], None)
        .unwrap();
    assert_eq!(img.shape(), &[32, 32, 10]);
    assert_eq!(img.sum(), 0.0);
    let rgb = rast.to_rgb(img.view()).unwrap();
    assert!(rgb.pixels().all(|p| p.0 == [0, 0, 0]));
}

// build_rasterizer tests

#[test]
fn test_build_from_config() {
    let dir = tempfile::tempdir().unwrap();
    let dm = LocalDataManager::new(dir.path());

    let mut cfg = Config::default();
    cfg.model_params.history_num_frames = 3;
    let rast = build_rasterizer(&cfg, &dm).unwrap();
    assert_eq!(rast.name(), "box_debug");
    assert_eq!(rast.num_channels(), 8);
    assert_eq!(rast.render_context().raster_size(), [224, 224]);

    cfg.raster_params.map_type = "stub_debug".to_string();
    let rast = build_rasterizer(&cfg, &dm).unwrap();
    assert_eq!(rast.name(), "stub_debug");
    assert_eq!(rast.num_channels(), 8);
}

#[test]
fn test_build_unsupported() {
    let dir = tempfile::tempdir().unwrap();
    let dm = LocalDataManager::new(dir.path());
    let mut cfg = Config::default();

    cfg.raster_params.map_type = "nonsense".to_string();
    assert!(matches!(
        build_rasterizer(&cfg, &dm),
        Err(Error::UnsupportedRasterizer { map_type, .. }) if map_type == "nonsense"
    ));

    // map assets are resolved before the type is refused
    cfg.raster_params.map_type = "py_semantic".to_string();
    cfg.raster_params.semantic_map_key = Some("semantic_map/semantic_map.pb".to_string());
    assert!(matches!(
        build_rasterizer(&cfg, &dm),
        Err(Error::PathNotFound { .. })
    ));

    std::fs::create_dir_all(dir.path().join("semantic_map")).unwrap();
    std::fs::write(dir.path().join("semantic_map/semantic_map.pb"), b"").unwrap();
    assert!(matches!(
        build_rasterizer(&cfg, &dm),
        Err(Error::UnsupportedRasterizer { .. })
    ));
}
