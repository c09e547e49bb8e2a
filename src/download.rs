//! Model downloader for HuggingFace Hub
//!
//! Fetches everything the pipeline needs, cached by hf-hub:
//! - Stable Diffusion v1.5 (CLIP text encoder, UNet, VAE, ~5GB)
//! - CLIP tokenizer (~2MB)
//! - TripoSR reconstructor config + checkpoint (~1.5GB)

use anyhow::{Context, Result};
use hf_hub::api::tokio::Api;
use std::path::PathBuf;
use tracing::info;

// The original runwayml repo was delisted; this is the maintained mirror.
const SD_REPO: &str = "stable-diffusion-v1-5/stable-diffusion-v1-5";
const TOKENIZER_REPO: &str = "openai/clip-vit-base-patch32";
const RECONSTRUCTOR_REPO: &str = "stabilityai/TripoSR";

/// Downloads and caches pipeline models from HuggingFace Hub.
///
/// Uses the `HF_TOKEN` environment variable if set.
pub struct ModelDownloader {
    api: Api,
}

impl ModelDownloader {
    pub fn new() -> Result<Self> {
        let api = Api::new().context("Failed to create HuggingFace API client")?;
        Ok(Self { api })
    }

    /// Downloads all required models and returns their local paths.
    pub async fn download_all(&self) -> Result<ModelPaths> {
        info!("Downloading pipeline models (~6.5GB on first run)");

        let (tokenizer, clip, unet, vae, reconstructor_config, reconstructor_weights) = tokio::try_join!(
            self.download_tokenizer(),
            self.download_clip(),
            self.download_unet(),
            self.download_vae(),
            self.download_reconstructor_config(),
            self.download_reconstructor_weights()
        )?;

        info!("✓ All models downloaded");

        Ok(ModelPaths {
            tokenizer,
            clip,
            unet,
            vae,
            reconstructor_config,
            reconstructor_weights,
        })
    }

    /// Download the CLIP tokenizer (~2MB).
    async fn download_tokenizer(&self) -> Result<PathBuf> {
        let repo = self.api.repo(hf_hub::Repo::model(TOKENIZER_REPO.to_string()));
        let path = repo
            .get("tokenizer.json")
            .await
            .context("Failed to download CLIP tokenizer")?;
        info!("  ✓ Tokenizer: {}", path.display());
        Ok(path)
    }

    /// Download the CLIP text encoder (~500MB).
    async fn download_clip(&self) -> Result<PathBuf> {
        let repo = self.api.repo(hf_hub::Repo::model(SD_REPO.to_string()));
        let path = repo
            .get("text_encoder/model.safetensors")
            .await
            .context("Failed to download CLIP text encoder")?;
        info!("  ✓ CLIP text encoder: {}", path.display());
        Ok(path)
    }

    /// Download the UNet (~3.5GB).
    async fn download_unet(&self) -> Result<PathBuf> {
        let repo = self.api.repo(hf_hub::Repo::model(SD_REPO.to_string()));
        let path = repo
            .get("unet/diffusion_pytorch_model.safetensors")
            .await
            .context("Failed to download UNet")?;
        info!("  ✓ UNet: {}", path.display());
        Ok(path)
    }

    /// Download the VAE (~350MB).
    async fn download_vae(&self) -> Result<PathBuf> {
        let repo = self.api.repo(hf_hub::Repo::model(SD_REPO.to_string()));
        let path = repo
            .get("vae/diffusion_pytorch_model.safetensors")
            .await
            .context("Failed to download VAE")?;
        info!("  ✓ VAE: {}", path.display());
        Ok(path)
    }

    /// Download the reconstructor config (~1KB).
    async fn download_reconstructor_config(&self) -> Result<PathBuf> {
        let repo = self
            .api
            .repo(hf_hub::Repo::model(RECONSTRUCTOR_REPO.to_string()));
        let path = repo
            .get("config.yaml")
            .await
            .context("Failed to download reconstructor config")?;
        info!("  ✓ Reconstructor config: {}", path.display());
        Ok(path)
    }

    /// Download the reconstructor checkpoint (~1.5GB).
    async fn download_reconstructor_weights(&self) -> Result<PathBuf> {
        let repo = self
            .api
            .repo(hf_hub::Repo::model(RECONSTRUCTOR_REPO.to_string()));
        let path = repo
            .get("model.ckpt")
            .await
            .context("Failed to download reconstructor checkpoint")?;
        info!("  ✓ Reconstructor checkpoint: {}", path.display());
        Ok(path)
    }
}

/// Local paths of all downloaded models.
pub struct ModelPaths {
    pub tokenizer: PathBuf,
    pub clip: PathBuf,
    pub unet: PathBuf,
    pub vae: PathBuf,
    pub reconstructor_config: PathBuf,
    pub reconstructor_weights: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repos_point_at_live_hubs() {
        // runwayml/stable-diffusion-v1-5 was delisted and now 401s;
        // only the mirror org serves the v1.5 weights.
        assert_eq!(SD_REPO, "stable-diffusion-v1-5/stable-diffusion-v1-5");
        assert_eq!(RECONSTRUCTOR_REPO, "stabilityai/TripoSR");
    }
}
