//! Text-to-image generation with Stable Diffusion v1.5
//!
//! Wraps the candle Stable Diffusion components into a single generator:
//! 1. Tokenize and CLIP-encode the prompt (plus an empty negative prompt
//!    for classifier-free guidance)
//! 2. Denoise latents with the UNet under the config's scheduler
//! 3. VAE-decode latents to RGB
//! 4. Encode as PNG

use anyhow::{Context, Result};
use candle_core::{DType, Device, IndexOp, Module, Tensor};
use candle_transformers::models::stable_diffusion::{self, StableDiffusionConfig};
use std::path::Path;
use tokenizers::Tokenizer;
use tracing::{debug, info};

/// VAE latent scaling factor for Stable Diffusion v1.x.
const LATENT_SCALE: f64 = 0.18215;

/// Stable Diffusion v1.5 generation pipeline.
pub struct ImageGenerator {
    tokenizer: Tokenizer,
    clip: stable_diffusion::clip::ClipTextTransformer,
    unet: stable_diffusion::unet_2d::UNet2DConditionModel,
    vae: stable_diffusion::vae::AutoEncoderKL,
    config: StableDiffusionConfig,
    device: Device,
    dtype: DType,
    width: usize,
    height: usize,
}

impl ImageGenerator {
    /// Loads all Stable Diffusion components from local weight files.
    pub fn load<P: AsRef<Path>>(
        tokenizer_path: P,
        clip_weights: P,
        unet_weights: P,
        vae_weights: P,
        width: usize,
        height: usize,
        device: Device,
    ) -> Result<Self> {
        info!("Initializing Stable Diffusion v1.5 pipeline");

        // F16 on accelerators, F32 on CPU
        let dtype = if device.is_cuda() { DType::F16 } else { DType::F32 };

        let config = StableDiffusionConfig::v1_5(None, Some(height), Some(width));

        let tokenizer = Tokenizer::from_file(tokenizer_path.as_ref()).map_err(|e| {
            anyhow::anyhow!(
                "Failed to load CLIP tokenizer from {:?}: {}",
                tokenizer_path.as_ref(),
                e
            )
        })?;

        info!(path = %clip_weights.as_ref().display(), "Loading CLIP text encoder");
        let clip = stable_diffusion::build_clip_transformer(
            &config.clip,
            clip_weights.as_ref(),
            &device,
            dtype,
        )
        .context("Failed to build CLIP text encoder")?;

        info!(path = %unet_weights.as_ref().display(), "Loading UNet");
        let unet = config
            .build_unet(unet_weights.as_ref(), &device, 4, false, dtype)
            .context("Failed to build UNet")?;

        info!(path = %vae_weights.as_ref().display(), "Loading VAE");
        let vae = config
            .build_vae(vae_weights.as_ref(), &device, dtype)
            .context("Failed to build VAE")?;

        info!("✓ Stable Diffusion pipeline initialized");

        Ok(Self {
            tokenizer,
            clip,
            unet,
            vae,
            config,
            device,
            dtype,
            width,
            height,
        })
    }

    /// Generates one image from the prompt.
    ///
    /// Returns PNG-encoded bytes. The seed makes sampling repeatable on a
    /// given device but results are not bit-stable across backends.
    pub fn generate(
        &self,
        prompt: &str,
        steps: usize,
        guidance_scale: f64,
        seed: u64,
    ) -> Result<Vec<u8>> {
        info!(
            prompt_preview = %truncate_chars(prompt, 50),
            steps,
            size = format!("{}x{}", self.width, self.height),
            seed,
            "Starting generation"
        );

        let text_embeddings = self.encode_prompt(prompt)?;
        debug!(shape = ?text_embeddings.dims(), "Text embeddings");

        let mut scheduler = self.config.build_scheduler(steps)?;
        if let Err(e) = self.device.set_seed(seed) {
            debug!(error = %e, "Could not set device seed (CPU backend)");
        }

        let latents = Tensor::randn(
            0f32,
            1f32,
            (1, 4, self.height / 8, self.width / 8),
            &self.device,
        )?;
        let mut latents = (latents * scheduler.init_noise_sigma())?.to_dtype(self.dtype)?;

        let timesteps = scheduler.timesteps().to_vec();
        let total_steps = timesteps.len();
        for (i, &timestep) in timesteps.iter().enumerate() {
            let latent_model_input = Tensor::cat(&[&latents, &latents], 0)?;
            let latent_model_input =
                scheduler.scale_model_input(latent_model_input, timestep)?;

            let noise_pred =
                self.unet
                    .forward(&latent_model_input, timestep as f64, &text_embeddings)?;

            // Classifier-free guidance
            let noise_pred = noise_pred.chunk(2, 0)?;
            let (noise_pred_uncond, noise_pred_text) = (&noise_pred[0], &noise_pred[1]);
            let noise_pred = (noise_pred_uncond
                + ((noise_pred_text - noise_pred_uncond)? * guidance_scale)?)?;

            latents = scheduler.step(&noise_pred, timestep, &latents)?;

            if (i + 1) % 5 == 0 || i + 1 == total_steps {
                debug!(step = i + 1, total = total_steps, "Denoising progress");
            }
        }

        info!("Decoding latents to RGB");
        let image = self.vae.decode(&(latents / LATENT_SCALE)?)?;
        let rgb = tensor_to_rgb(&image)?;
        let png = encode_png(&rgb, self.width as u32, self.height as u32)?;

        info!(size_kb = png.len() / 1024, "✓ Generation complete");
        Ok(png)
    }

    /// Encodes the prompt and an empty negative prompt, concatenated on
    /// the batch axis for classifier-free guidance.
    fn encode_prompt(&self, prompt: &str) -> Result<Tensor> {
        let cond = self.clip.forward(&self.tokenize(prompt)?)?;
        let uncond = self.clip.forward(&self.tokenize("")?)?;
        Ok(Tensor::cat(&[uncond, cond], 0)?.to_dtype(self.dtype)?)
    }

    /// Tokenizes text, padded to the CLIP context length.
    fn tokenize(&self, text: &str) -> Result<Tensor> {
        let pad_token = self
            .config
            .clip
            .pad_with
            .clone()
            .unwrap_or_else(|| "<|endoftext|>".to_string());
        let pad_id = self
            .tokenizer
            .token_to_id(&pad_token)
            .ok_or_else(|| anyhow::anyhow!("Tokenizer has no pad token {pad_token:?}"))?;

        let mut tokens = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| anyhow::anyhow!("Tokenization failed: {}", e))?
            .get_ids()
            .to_vec();

        let max_len = self.config.clip.max_position_embeddings;
        if tokens.len() > max_len {
            anyhow::bail!(
                "Prompt is too long: {} tokens, CLIP accepts at most {}",
                tokens.len(),
                max_len
            );
        }
        tokens.resize(max_len, pad_id);

        Ok(Tensor::new(tokens.as_slice(), &self.device)?.unsqueeze(0)?)
    }

    pub fn device(&self) -> &Device {
        &self.device
    }
}

/// Truncates to at most `max_chars` characters, staying on char
/// boundaries for multibyte text.
fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &text[..byte_idx],
        None => text,
    }
}

/// Converts a decoded `[1, 3, H, W]` tensor in `[-1, 1]` to RGB8 bytes.
pub fn tensor_to_rgb(image: &Tensor) -> Result<Vec<u8>> {
    let image = image.to_dtype(DType::F32)?.i(0)?;
    let image = ((image.clamp(-1f32, 1f32)? + 1.0)? * 127.5)?;
    let image = image.to_dtype(DType::U8)?.permute((1, 2, 0))?;
    Ok(image.flatten_all()?.to_vec1()?)
}

/// Encodes RGB8 bytes as PNG.
pub fn encode_png(rgb: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
    use image::{ImageBuffer, RgbImage};
    use std::io::Cursor;

    let img: RgbImage = ImageBuffer::from_raw(width, height, rgb.to_vec())
        .ok_or_else(|| anyhow::anyhow!("RGB buffer does not match {}x{}", width, height))?;

    let mut png = Cursor::new(Vec::new());
    img.write_to(&mut png, image::ImageFormat::Png)?;
    Ok(png.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_chars_handles_multibyte_prompts() {
        // 60 two-byte chars: byte 50 falls mid-character
        let prompt = "é".repeat(60);
        let preview = truncate_chars(&prompt, 50);
        assert_eq!(preview.chars().count(), 50);
        assert_eq!(preview, "é".repeat(50));

        assert_eq!(truncate_chars("кошка в скафандре", 50), "кошка в скафандре");
        assert_eq!(truncate_chars("short", 50), "short");
        assert_eq!(truncate_chars("", 50), "");
    }

    #[test]
    fn tensor_to_rgb_maps_range() {
        let device = Device::Cpu;
        // 2x2 image, all channels at -1 then all at +1
        let lo = Tensor::full(-1f32, (1, 3, 2, 2), &device).unwrap();
        let hi = Tensor::full(1f32, (1, 3, 2, 2), &device).unwrap();

        let lo_rgb = tensor_to_rgb(&lo).unwrap();
        let hi_rgb = tensor_to_rgb(&hi).unwrap();
        assert_eq!(lo_rgb.len(), 2 * 2 * 3);
        assert!(lo_rgb.iter().all(|&b| b == 0));
        assert!(hi_rgb.iter().all(|&b| b == 255));
    }

    #[test]
    fn tensor_to_rgb_clamps_out_of_range() {
        let device = Device::Cpu;
        let wild = Tensor::full(7f32, (1, 3, 1, 1), &device).unwrap();
        let rgb = tensor_to_rgb(&wild).unwrap();
        assert_eq!(rgb, vec![255, 255, 255]);
    }

    #[test]
    fn encode_png_roundtrip_dimensions() {
        let rgb = vec![128u8; 4 * 4 * 3];
        let png = encode_png(&rgb, 4, 4).unwrap();
        let decoded = image::load_from_memory(&png).unwrap();
        assert_eq!(decoded.width(), 4);
        assert_eq!(decoded.height(), 4);
    }

    #[test]
    fn encode_png_rejects_bad_buffer() {
        let rgb = vec![0u8; 5];
        assert!(encode_png(&rgb, 4, 4).is_err());
    }
}
