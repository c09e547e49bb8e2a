//! CLI entry point for the text → image → mesh → render demo

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use text_to_mesh_demo::download::ModelDownloader;
use text_to_mesh_demo::pipeline::{self, RunOptions};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "text-to-mesh-demo")]
#[command(version = "0.1.0")]
#[command(about = "Text prompt → image → 3D mesh → offscreen render", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download required models (~6.5GB)
    ///
    /// Fetched from HuggingFace Hub and cached:
    /// - Stable Diffusion v1.5 (CLIP + UNet + VAE, ~5GB)
    /// - CLIP tokenizer (~2MB)
    /// - TripoSR reconstructor config + checkpoint (~1.5GB)
    ///
    /// `run` downloads on demand too; this subcommand just warms the cache.
    Download,

    /// Run the full pipeline once
    ///
    /// Writes input.png, output.obj and render.png into the output
    /// directory, overwriting previous runs. All flags have fixed demo
    /// defaults; a bare `run` needs no arguments.
    Run {
        /// Text prompt
        #[arg(short, long, default_value = pipeline::PROMPT)]
        prompt: String,

        /// Number of denoising steps
        #[arg(long, default_value_t = pipeline::DEFAULT_STEPS)]
        steps: usize,

        /// Random seed for image generation
        #[arg(long, default_value_t = pipeline::DEFAULT_SEED)]
        seed: u64,

        /// Output directory
        #[arg(short, long, default_value = ".")]
        output_dir: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Download => {
            let downloader = ModelDownloader::new()?;
            let paths = downloader.download_all().await?;

            println!();
            println!("Model locations:");
            println!("  Tokenizer:     {}", paths.tokenizer.display());
            println!("  CLIP:          {}", paths.clip.display());
            println!("  UNet:          {}", paths.unet.display());
            println!("  VAE:           {}", paths.vae.display());
            println!("  Reconstructor: {}", paths.reconstructor_weights.display());
            println!();
            println!("Next step: text-to-mesh-demo run");
        }

        Commands::Run {
            prompt,
            steps,
            seed,
            output_dir,
        } => {
            pipeline::run(RunOptions {
                prompt,
                steps,
                seed,
                output_dir,
            })
            .await?;
        }
    }

    Ok(())
}
