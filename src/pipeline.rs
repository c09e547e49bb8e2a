//! Pipeline driver
//!
//! Sequentially invokes the four external capabilities and persists their
//! outputs: text → `input.png` → scene codes → `output.obj` → `render.png`.
//! Control flows strictly forward; any stage failure propagates and aborts
//! the run with no cleanup of partially-written outputs.

use anyhow::{Context, Result};
use candle_core::Device;
use std::path::PathBuf;
use tracing::info;

use crate::download::ModelDownloader;
use crate::generate::ImageGenerator;
use crate::reconstruct::Reconstructor;
use crate::render::{OffscreenRenderer, Scene};

/// Fixed prompt for the demo run.
pub const PROMPT: &str = "a futuristic flying motorcycle";
/// Generated image, consumed by the reconstructor.
pub const INPUT_IMAGE_FILE: &str = "input.png";
/// Exported mesh.
pub const MESH_FILE: &str = "output.obj";
/// Rendered preview.
pub const RENDER_FILE: &str = "render.png";

/// Density grid resolution for mesh extraction.
pub const MESH_RESOLUTION: usize = 128;
/// Rendered frame size.
pub const RENDER_WIDTH: u32 = 512;
pub const RENDER_HEIGHT: u32 = 512;

/// Generated image size.
const IMAGE_WIDTH: usize = 512;
const IMAGE_HEIGHT: usize = 512;
/// Classifier-free guidance scale for Stable Diffusion v1.5.
const GUIDANCE_SCALE: f64 = 7.5;

pub const DEFAULT_STEPS: usize = 30;
pub const DEFAULT_SEED: u64 = 42;

/// Run parameters. Defaults reproduce the fixed demo constants, so a
/// bare invocation behaves as a run-to-completion script.
pub struct RunOptions {
    pub prompt: String,
    pub steps: usize,
    pub seed: u64,
    pub output_dir: PathBuf,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            prompt: PROMPT.to_string(),
            steps: DEFAULT_STEPS,
            seed: DEFAULT_SEED,
            output_dir: PathBuf::from("."),
        }
    }
}

/// Runs the full text → image → mesh → render pipeline once.
pub async fn run(opts: RunOptions) -> Result<()> {
    let device = Device::cuda_if_available(0)?;
    info!(device = ?device, "Using device");

    std::fs::create_dir_all(&opts.output_dir)
        .with_context(|| format!("Failed to create {}", opts.output_dir.display()))?;

    let downloader = ModelDownloader::new()?;
    let paths = downloader.download_all().await?;

    // Stage 1: text-to-image. The generator is dropped right after to
    // free device memory before the reconstructor loads.
    info!("Generating input image from text prompt");
    let png = {
        let generator = ImageGenerator::load(
            &paths.tokenizer,
            &paths.clip,
            &paths.unet,
            &paths.vae,
            IMAGE_WIDTH,
            IMAGE_HEIGHT,
            device.clone(),
        )?;
        generator.generate(&opts.prompt, opts.steps, GUIDANCE_SCALE, opts.seed)?
    };
    let input_path = opts.output_dir.join(INPUT_IMAGE_FILE);
    std::fs::write(&input_path, &png)
        .with_context(|| format!("Failed to write {}", input_path.display()))?;
    info!("Saved {}", input_path.display());

    // Stage 2: image-to-3D
    let reconstructor = Reconstructor::load(
        &paths.reconstructor_config,
        &paths.reconstructor_weights,
        device.clone(),
    )?;
    let scene_codes = reconstructor.forward(&input_path)?;

    // Stage 3: mesh extraction and export
    let mut meshes = reconstructor.extract_mesh(&scene_codes, MESH_RESOLUTION)?;
    drop(reconstructor);
    if meshes.is_empty() {
        anyhow::bail!("Reconstruction produced no mesh");
    }
    let mesh = meshes.swap_remove(0);
    let mesh_path = opts.output_dir.join(MESH_FILE);
    mesh.export_obj(&mesh_path)?;
    info!(
        vertices = mesh.vertex_count(),
        faces = mesh.face_count(),
        "Saved {}",
        mesh_path.display()
    );

    // Stage 4: offscreen render
    info!("Rendering mesh to PNG");
    let mut scene = Scene::new();
    scene.add_mesh(mesh);
    let renderer = OffscreenRenderer::new(RENDER_WIDTH, RENDER_HEIGHT);
    let frame = renderer.render(&scene)?;
    let render_path = opts.output_dir.join(RENDER_FILE);
    frame.save(&render_path)?;
    renderer.release();
    info!("Saved {}", render_path.display());

    info!("✓ Finished successfully");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_options_match_demo_constants() {
        let opts = RunOptions::default();
        assert_eq!(opts.prompt, PROMPT);
        assert_eq!(opts.steps, DEFAULT_STEPS);
        assert_eq!(opts.seed, DEFAULT_SEED);
        assert_eq!(opts.output_dir, PathBuf::from("."));
    }

    #[test]
    fn output_files_are_relative() {
        for file in [INPUT_IMAGE_FILE, MESH_FILE, RENDER_FILE] {
            assert!(PathBuf::from(file).is_relative());
        }
    }
}
