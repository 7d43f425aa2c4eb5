//! Shared fixtures for the renderer integration tests.
//!
//! Every test gets its own directory of tiny assets so the whole setup path
//! (decoding, upload, IBL precompute) runs against the headless backend.

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use image::{GrayImage, Luma, Rgb, RgbImage};
use pbr_ibl::{
    AssetPaths, CommandRecorder, HeadlessBackend, HeadlessConfig, Renderer, RendererConfig,
};

static NEXT_DIR: AtomicUsize = AtomicUsize::new(0);

pub const SKYBOX_OBJ: &str = "\
v -1 -1 -1
v 1 -1 -1
v 1 1 -1
v -1 1 -1
v -1 -1 1
v 1 -1 1
v 1 1 1
v -1 1 1
f 1 2 3
f 1 3 4
f 5 7 6
f 5 8 7
f 1 5 6
f 1 6 2
f 4 3 7
f 4 7 8
f 1 4 8
f 1 8 5
f 2 6 7
f 2 7 3
";

pub const MODEL_OBJ: &str = "\
v 0 0 0
v 1 0 0
v 1 1 0
v 0 1 0
vt 0 0
vt 1 0
vt 1 1
vt 0 1
vn 0 0 1
f 1/1/1 2/2/1 3/3/1
f 1/1/1 3/3/1 4/4/1
";

/// Triangles in [`MODEL_OBJ`] and [`SKYBOX_OBJ`]
pub const MODEL_FACES: u32 = 2;
pub const SKYBOX_FACES: u32 = 12;

/// A scratch directory holding a complete asset set
pub struct TestAssets {
    pub root: PathBuf,
}

impl TestAssets {
    pub fn new() -> Self {
        let root = std::env::temp_dir().join(format!(
            "pbr-ibl-test-{}-{}",
            std::process::id(),
            NEXT_DIR.fetch_add(1, Ordering::Relaxed)
        ));
        std::fs::create_dir_all(root.join("meshes")).unwrap();
        std::fs::create_dir_all(root.join("textures")).unwrap();

        let assets = Self { root };
        let paths = assets.paths();
        std::fs::write(&paths.skybox_mesh, SKYBOX_OBJ).unwrap();
        std::fs::write(&paths.model_mesh, MODEL_OBJ).unwrap();

        RgbImage::from_pixel(8, 8, Rgb([200, 120, 40])).save(&paths.albedo).unwrap();
        RgbImage::from_pixel(8, 8, Rgb([128, 128, 255])).save(&paths.normal).unwrap();
        GrayImage::from_pixel(8, 4, Luma([255])).save(&paths.metalness).unwrap();
        GrayImage::from_pixel(8, 4, Luma([64])).save(&paths.roughness).unwrap();
        assets.write_environment();
        assets
    }

    pub fn paths(&self) -> AssetPaths {
        AssetPaths::under(&self.root)
    }

    /// Write the equirectangular environment, replacing any existing one
    pub fn write_environment(&self) {
        write_hdr(&self.paths().environment, 16, 8);
    }

    /// Copy of the bundled shaders with `name` replaced by `source`
    pub fn shader_dir_with(&self, name: &str, source: &str) -> PathBuf {
        let dir = self.root.join("shaders");
        std::fs::create_dir_all(&dir).unwrap();
        for entry in std::fs::read_dir(bundled_shaders()).unwrap() {
            let entry = entry.unwrap();
            std::fs::copy(entry.path(), dir.join(entry.file_name())).unwrap();
        }
        std::fs::write(dir.join(format!("{name}.wgsl")), source).unwrap();
        dir
    }
}

impl Drop for TestAssets {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.root);
    }
}

fn write_hdr(path: &Path, width: usize, height: usize) {
    let pixels: Vec<Rgb<f32>> = (0..width * height)
        .map(|i| Rgb([1.0 + i as f32 * 0.25, 0.5, 0.25]))
        .collect();
    let file = BufWriter::new(File::create(path).unwrap());
    image::codecs::hdr::HdrEncoder::new(file)
        .encode(&pixels, width, height)
        .unwrap();
}

pub fn bundled_shaders() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("shaders")
}

pub fn config(assets: &TestAssets) -> RendererConfig {
    RendererConfig {
        shader_dir: bundled_shaders(),
        assets: assets.paths(),
        ..Default::default()
    }
}

/// Headless surface advertising `sample_counts` and sharing `recorder`
pub fn surface(sample_counts: &[u32], recorder: &CommandRecorder) -> HeadlessConfig {
    HeadlessConfig {
        supported_sample_counts: sample_counts.to_vec(),
        recorder: recorder.clone(),
        ..Default::default()
    }
}

pub fn renderer(config: RendererConfig) -> Renderer<HeadlessBackend> {
    Renderer::new(config)
}
