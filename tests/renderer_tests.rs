//! End-to-end renderer tests on the headless backend.
//!
//! The headless backend validates every WGSL shader with naga and records all
//! commands, so these tests cover setup, the IBL precompute schedule, the
//! per-frame pass sequence and teardown without a GPU.

mod common;

use rstest::rstest;

use common::{config, renderer, surface, TestAssets, MODEL_FACES, SKYBOX_FACES};
use pbr_ibl::backend::{AddressMode, DepthLoadOp, LoadOp, StoreOp, TextureFormat, TextureKind};
use pbr_ibl::{
    CameraSettings, CommandRecorder, RecordedCommand, RendererError, RendererInterface,
    RendererState, SceneSettings,
};

fn is_dispatch(command: &RecordedCommand) -> bool {
    matches!(command, RecordedCommand::Dispatch { .. })
}

#[rstest]
#[case::msaa(&[1, 2, 4, 8], 8)]
#[case::no_msaa(&[1], 0)]
fn test_sample_count_negotiation(#[case] supported: &[u32], #[case] expected: u32) {
    let assets = TestAssets::new();
    let recorder = CommandRecorder::new();
    let mut renderer = renderer(config(&assets));
    renderer
        .initialize(surface(supported, &recorder), 64, 64, 16)
        .unwrap();

    assert_eq!(renderer.samples(), expected);
    let primary = renderer.framebuffer().clone();
    let resolve = renderer.resolve_framebuffer().clone();
    if expected == 0 {
        // Without multisampling the resolve target is the primary itself
        assert_eq!(primary.id, resolve.id);
        assert!(primary.color_sampler.is_some());
    } else {
        assert_ne!(primary.id, resolve.id);
        assert!(primary.color_sampler.is_none());
        assert!(resolve.color_sampler.is_some());
        assert!(resolve.depth_stencil_target.is_none());
    }
    renderer.shutdown();
    assert_eq!(recorder.live_resources(), 0);
}

#[test]
fn test_setup_runs_ibl_stages_in_order() {
    let assets = TestAssets::new();
    let recorder = CommandRecorder::new();
    let mut renderer = renderer(config(&assets));
    renderer
        .initialize(surface(&[1, 4], &recorder), 128, 128, 16)
        .unwrap();
    renderer.setup().unwrap();
    assert_eq!(renderer.state(), RendererState::Ready);

    let commands = recorder.commands();
    let stages: Vec<String> = commands
        .iter()
        .filter_map(|c| match c {
            RecordedCommand::BeginCommands(label) => Some(label.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(stages, ["equirect2cube", "spmap", "irmap", "spbrdf"]);

    let dispatches: Vec<(u32, u32, u32)> = commands
        .iter()
        .filter_map(|c| match c {
            RecordedCommand::Dispatch { x, y, z } => Some((*x, *y, *z)),
            _ => None,
        })
        .collect();
    // 1 projection, 10 prefiltered levels, irradiance, BRDF
    assert_eq!(dispatches.len(), 13);
    assert_eq!(dispatches[0], (64, 64, 6));
    assert_eq!(dispatches[1], (32, 32, 6));
    assert_eq!(dispatches[10], (1, 1, 6));
    assert_eq!(dispatches[11], (2, 2, 6));
    assert_eq!(dispatches[12], (16, 16, 1));

    // Setup must not return before the GPU has drained
    assert_eq!(commands.last(), Some(&RecordedCommand::WaitIdle));

    let maps = renderer.ibl_maps();
    assert_eq!((maps.specular.width, maps.specular.levels), (1024, 11));
    assert_eq!((maps.irradiance.width, maps.irradiance.levels), (32, 1));
    assert_eq!((maps.brdf_lut.width, maps.brdf_lut.levels), (256, 1));
    assert_eq!(maps.brdf_lut.format, Some(TextureFormat::Rgba16Float));
}

#[test]
fn test_specular_mip_zero_is_copied_and_unfiltered_cube_is_mipmapped() {
    let assets = TestAssets::new();
    let recorder = CommandRecorder::new();
    let mut renderer = renderer(config(&assets));
    renderer
        .initialize(surface(&[1], &recorder), 64, 64, 1)
        .unwrap();
    renderer.setup().unwrap();

    let commands = recorder.commands();
    assert!(commands.contains(&RecordedCommand::CopyTexture {
        src: Some("Environment Unfiltered".into()),
        dst: Some("Environment".into()),
        mip_level: 0,
    }));
    assert!(commands.contains(&RecordedCommand::GenerateMipmaps(Some(
        "Environment Unfiltered".into()
    ))));
    assert!(commands.contains(&RecordedCommand::CreateTexture {
        label: Some("Environment Unfiltered".into()),
        kind: TextureKind::Cube,
        width: 1024,
        height: 1024,
        mip_levels: 11,
        sample_count: 1,
        format: TextureFormat::Rgba16Float,
    }));
}

#[test]
fn test_brdf_lut_clamps_to_edge() {
    let assets = TestAssets::new();
    let recorder = CommandRecorder::new();
    let mut renderer = renderer(config(&assets));
    renderer
        .initialize(surface(&[1], &recorder), 64, 64, 1)
        .unwrap();
    renderer.setup().unwrap();

    // Texture samplers are unlabelled; the only clamped one belongs to the LUT
    let clamped = recorder.count(|c| {
        matches!(
            c,
            RecordedCommand::CreateSampler {
                label: None,
                address_mode: AddressMode::ClampToEdge,
                ..
            }
        )
    });
    assert_eq!(clamped, 1);
}

#[rstest]
#[case::msaa(&[1, 4], true)]
#[case::no_msaa(&[1], false)]
fn test_frame_pass_sequence(#[case] supported: &[u32], #[case] resolves: bool) {
    let assets = TestAssets::new();
    let recorder = CommandRecorder::new();
    let mut renderer = renderer(config(&assets));
    renderer
        .initialize(surface(supported, &recorder), 64, 64, 16)
        .unwrap();
    renderer.setup().unwrap();
    recorder.clear();

    renderer
        .render(&CameraSettings::default(), &SceneSettings::default())
        .unwrap();

    let commands = recorder.commands();
    assert_eq!(commands.first(), Some(&RecordedCommand::WriteBuffer {
        label: Some(std::any::type_name::<pbr_ibl::renderer::uniforms::TransformUniform>().into()),
        bytes: 192,
    }));
    assert_eq!(commands.last(), Some(&RecordedCommand::EndFrame));
    assert_eq!(recorder.count(is_dispatch), 0);

    let passes: Vec<&RecordedCommand> = commands
        .iter()
        .filter(|c| matches!(c, RecordedCommand::BeginRenderPass { .. }))
        .collect();
    let expected_passes = if resolves { 3 } else { 2 };
    assert_eq!(passes.len(), expected_passes);

    // Depth is cleared, color is left for the skybox to overwrite
    assert_eq!(
        passes[0],
        &RecordedCommand::BeginRenderPass {
            label: Some("Scene".into()),
            color_load: Some(LoadOp::Load),
            color_store: Some(StoreOp::Store),
            resolves: false,
            depth_load: Some(DepthLoadOp::Clear(1.0)),
        }
    );
    if resolves {
        // The multisampled source is not needed once resolved
        assert!(matches!(
            passes[1],
            RecordedCommand::BeginRenderPass {
                resolves: true,
                color_store: Some(StoreOp::Discard),
                ..
            }
        ));
    }
    assert!(matches!(
        passes[expected_passes - 1],
        RecordedCommand::BeginRenderPass { label: Some(label), depth_load: None, .. } if label == "Tonemap"
    ));

    let draws: Vec<&RecordedCommand> = commands
        .iter()
        .filter(|c| {
            matches!(
                c,
                RecordedCommand::SetRenderPipeline(_)
                    | RecordedCommand::Draw { .. }
                    | RecordedCommand::DrawIndexed { .. }
            )
        })
        .collect();
    assert_eq!(
        draws,
        [
            &RecordedCommand::SetRenderPipeline(Some("skybox".into())),
            &RecordedCommand::DrawIndexed {
                index_count: SKYBOX_FACES * 3
            },
            &RecordedCommand::SetRenderPipeline(Some("pbr".into())),
            &RecordedCommand::DrawIndexed {
                index_count: MODEL_FACES * 3
            },
            &RecordedCommand::SetRenderPipeline(Some("tonemap".into())),
            &RecordedCommand::Draw { vertex_count: 3 },
        ]
    );
}

fn bind_groups(commands: &[RecordedCommand]) -> Vec<Vec<(u32, Option<String>)>> {
    commands
        .iter()
        .filter_map(|c| match c {
            RecordedCommand::CreateBindGroup { entries } => Some(entries.clone()),
            _ => None,
        })
        .collect()
}

fn label(text: &str) -> Option<String> {
    Some(text.to_string())
}

#[test]
fn test_irradiance_reads_the_prefiltered_environment() {
    let assets = TestAssets::new();
    let recorder = CommandRecorder::new();
    let mut renderer = renderer(config(&assets));
    renderer
        .initialize(surface(&[1], &recorder), 64, 64, 1)
        .unwrap();
    renderer.setup().unwrap();

    let groups = bind_groups(&recorder.commands());
    let irradiance: Vec<_> = groups
        .iter()
        .filter(|entries| entries.contains(&(2, label("Irradiance"))))
        .collect();
    assert_eq!(irradiance.len(), 1);
    assert_eq!(
        irradiance[0],
        &vec![
            (0, label("Environment")),
            (1, None),
            (2, label("Irradiance")),
        ]
    );
}

#[test]
fn test_model_binds_texture_units_in_order() {
    let assets = TestAssets::new();
    let recorder = CommandRecorder::new();
    let mut renderer = renderer(config(&assets));
    renderer
        .initialize(surface(&[1, 4], &recorder), 64, 64, 16)
        .unwrap();
    renderer.setup().unwrap();

    let paths = assets.paths();
    let units = [
        paths.albedo.display().to_string(),
        paths.normal.display().to_string(),
        paths.metalness.display().to_string(),
        paths.roughness.display().to_string(),
        "Environment".to_string(),
        "Irradiance".to_string(),
        "BRDF LUT".to_string(),
    ];
    let expected: Vec<(u32, Option<String>)> = units
        .iter()
        .enumerate()
        .flat_map(|(unit, name)| {
            let unit = unit as u32;
            [(2 * unit, Some(name.clone())), (2 * unit + 1, None)]
        })
        .collect();

    let groups = bind_groups(&recorder.commands());
    assert!(groups.contains(&expected), "no bind group with {expected:?}");
}

#[test]
fn test_render_before_setup_is_rejected() {
    let assets = TestAssets::new();
    let recorder = CommandRecorder::new();
    let mut renderer = renderer(config(&assets));
    renderer
        .initialize(surface(&[1], &recorder), 64, 64, 1)
        .unwrap();

    let err = renderer
        .render(&CameraSettings::default(), &SceneSettings::default())
        .unwrap_err();
    assert!(matches!(err, RendererError::InvalidState(_)));
}

#[test]
fn test_shutdown_releases_everything_and_is_idempotent() {
    let assets = TestAssets::new();
    let recorder = CommandRecorder::new();
    let mut renderer = renderer(config(&assets));
    renderer
        .initialize(surface(&[1, 4], &recorder), 64, 64, 16)
        .unwrap();
    renderer.setup().unwrap();
    renderer
        .render(&CameraSettings::default(), &SceneSettings::default())
        .unwrap();
    assert!(recorder.live_resources() > 0);

    renderer.shutdown();
    assert_eq!(recorder.live_resources(), 0);
    assert_eq!(renderer.state(), RendererState::ShutDown);
    assert!(renderer.framebuffer().id.is_none());
    assert!(renderer.resolve_framebuffer().id.is_none());
    assert!(!renderer.ibl_maps().specular.is_valid());

    renderer.shutdown();
    assert_eq!(renderer.state(), RendererState::ShutDown);
}

#[test]
fn test_missing_asset_fails_setup_and_leaks_nothing() {
    let assets = TestAssets::new();
    std::fs::remove_file(assets.paths().roughness).unwrap();

    let recorder = CommandRecorder::new();
    let mut renderer = renderer(config(&assets));
    renderer
        .initialize(surface(&[1], &recorder), 64, 64, 1)
        .unwrap();

    match renderer.setup() {
        Err(RendererError::ImageLoad { path, .. }) => {
            assert!(path.ends_with("flaski_roughness.png"));
        }
        other => panic!("unexpected setup result: {other:?}"),
    }
    renderer.shutdown();
    assert_eq!(recorder.live_resources(), 0);
}

#[test]
fn test_setup_can_be_retried_after_failure() {
    let assets = TestAssets::new();
    std::fs::remove_file(assets.paths().environment).unwrap();

    let recorder = CommandRecorder::new();
    let mut renderer = renderer(config(&assets));
    renderer
        .initialize(surface(&[1, 4], &recorder), 64, 64, 16)
        .unwrap();
    let framebuffers_only = recorder.live_resources();

    assert!(matches!(
        renderer.setup(),
        Err(RendererError::ImageLoad { .. })
    ));
    assert_eq!(renderer.state(), RendererState::Initialized);
    assert_eq!(recorder.live_resources(), framebuffers_only);

    assets.write_environment();
    renderer.setup().unwrap();
    assert_eq!(renderer.state(), RendererState::Ready);

    renderer.shutdown();
    assert_eq!(recorder.live_resources(), 0);
}

#[test]
fn test_shader_error_names_the_failing_shader() {
    let assets = TestAssets::new();
    let shader_dir = assets.shader_dir_with("irmap", "@compute @workgroup_size(16, 16, 1)\nfn cs_main( {");

    let recorder = CommandRecorder::new();
    let mut renderer = renderer(pbr_ibl::RendererConfig {
        shader_dir,
        ..config(&assets)
    });
    renderer
        .initialize(surface(&[1], &recorder), 64, 64, 1)
        .unwrap();

    match renderer.setup() {
        Err(RendererError::ShaderCompilation { name, diagnostic }) => {
            assert_eq!(name, "irmap");
            assert!(!diagnostic.is_empty());
        }
        other => panic!("unexpected setup result: {other:?}"),
    }
    renderer.shutdown();
    assert_eq!(recorder.live_resources(), 0);
}

#[test]
fn test_zero_sized_surface_fails_initialization() {
    let assets = TestAssets::new();
    let recorder = CommandRecorder::new();
    let mut renderer = renderer(config(&assets));

    let err = renderer
        .initialize(surface(&[1], &recorder), 0, 64, 1)
        .unwrap_err();
    assert!(matches!(err, RendererError::Initialization(_)));
    assert_eq!(renderer.state(), RendererState::Uninitialized);
}
