//! Image-to-3D reconstruction (TripoSR triplane model)
//!
//! Loads the pretrained TripoSR reconstructor from its published
//! artifacts — the OmegaConf-style `config.yaml` and the `model.ckpt`
//! checkpoint — and runs it in three steps:
//! 1. Patch-embed the input image and run the image tokenizer's
//!    transformer encoder
//! 2. Cross-attend learned triplane embeddings against the image
//!    features in the backbone to produce a scene code `[3, C, P, P]`
//! 3. Query density on a regular grid via bilinear triplane sampling and
//!    the NeRF decoder MLP, then extract the isosurface
//!
//! The scene code is opaque to the rest of the pipeline; only
//! `extract_mesh` knows how to decode it.

use anyhow::{Context, Result};
use candle_core::{D, DType, Device, IndexOp, Module, Tensor};
use candle_nn::{
    conv2d, layer_norm, linear, Conv2d, Conv2dConfig, LayerNorm, Linear, VarBuilder,
};
use serde::Deserialize;
use std::path::Path;
use tracing::{debug, info};

use crate::mesh::Mesh;
use crate::surface::{self, ScalarField};

/// Iso level for mesh extraction, applied to the activated density
/// field. Matches the TSR default extraction threshold.
const DENSITY_THRESHOLD: f32 = 25.0;

/// Points per decoder batch while querying the density grid.
const QUERY_CHUNK: usize = 16384;

/// Top-level model config, mirroring the `config.yaml` shipped with the
/// TripoSR checkpoint: per-component `*_cls` names plus one options
/// block per component. Every field is defaulted, so sparse or
/// abbreviated configs still load; no compatibility validation happens
/// beyond candle's own weight-shape lookups.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReconstructorConfig {
    pub model_cls: String,
    pub cond_image_size: usize,
    pub image_tokenizer_cls: String,
    pub image_tokenizer: ImageTokenizerConfig,
    pub tokenizer_cls: String,
    pub tokenizer: TriplaneTokenizerConfig,
    pub backbone_cls: String,
    pub backbone: BackboneConfig,
    pub post_processor_cls: String,
    pub post_processor: PostProcessorConfig,
    pub decoder_cls: String,
    pub decoder: DecoderConfig,
    pub renderer_cls: String,
    pub renderer: RendererConfig,
}

impl Default for ReconstructorConfig {
    fn default() -> Self {
        Self {
            model_cls: "tsr.system.TSR".to_string(),
            cond_image_size: 512,
            image_tokenizer_cls: "tsr.models.tokenizers.image.DINOSingleImageTokenizer"
                .to_string(),
            image_tokenizer: ImageTokenizerConfig::default(),
            tokenizer_cls: "tsr.models.tokenizers.triplane.Triplane1DTokenizer".to_string(),
            tokenizer: TriplaneTokenizerConfig::default(),
            backbone_cls: "tsr.models.transformer.transformer_1d.Transformer1D".to_string(),
            backbone: BackboneConfig::default(),
            post_processor_cls: "tsr.models.network_utils.TriplaneUpsampleNetwork".to_string(),
            post_processor: PostProcessorConfig::default(),
            decoder_cls: "tsr.models.network_utils.NeRFMLP".to_string(),
            decoder: DecoderConfig::default(),
            renderer_cls: "tsr.models.nerf_renderer.TriplaneNeRFRenderer".to_string(),
            renderer: RendererConfig::default(),
        }
    }
}

/// Image tokenizer (DINO ViT-B/16) options.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ImageTokenizerConfig {
    pub pretrained_model_name_or_path: String,
    pub patch_size: usize,
    pub num_layers: usize,
    pub num_heads: usize,
}

impl Default for ImageTokenizerConfig {
    fn default() -> Self {
        Self {
            pretrained_model_name_or_path: "facebook/dino-vitb16".to_string(),
            patch_size: 16,
            num_layers: 12,
            num_heads: 12,
        }
    }
}

/// Learned triplane token bank options.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TriplaneTokenizerConfig {
    pub plane_size: usize,
    pub num_channels: usize,
}

impl Default for TriplaneTokenizerConfig {
    fn default() -> Self {
        Self {
            plane_size: 32,
            num_channels: 1024,
        }
    }
}

/// Transformer backbone options.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BackboneConfig {
    pub in_channels: usize,
    pub num_attention_heads: usize,
    pub attention_head_dim: usize,
    pub num_layers: usize,
    pub cross_attention_dim: usize,
}

impl Default for BackboneConfig {
    fn default() -> Self {
        Self {
            in_channels: 1024,
            num_attention_heads: 16,
            attention_head_dim: 64,
            num_layers: 16,
            cross_attention_dim: 768,
        }
    }
}

/// Triplane projection options.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PostProcessorConfig {
    pub in_channels: usize,
    pub out_channels: usize,
}

impl Default for PostProcessorConfig {
    fn default() -> Self {
        Self {
            in_channels: 1024,
            out_channels: 40,
        }
    }
}

/// NeRF decoder MLP options.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DecoderConfig {
    pub in_channels: usize,
    pub n_neurons: usize,
    pub n_hidden_layers: usize,
    pub activation: String,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            in_channels: 120,
            n_neurons: 64,
            n_hidden_layers: 9,
            activation: "silu".to_string(),
        }
    }
}

/// Renderer options; `radius` bounds the reconstruction volume and
/// `density_bias` shifts the field before the trunc-exp activation.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    pub radius: f32,
    pub feature_reduction: String,
    pub density_activation: String,
    pub density_bias: f32,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            radius: 0.87,
            feature_reduction: "concat".to_string(),
            density_activation: "trunc_exp".to_string(),
            density_bias: -1.0,
        }
    }
}

struct SelfAttention {
    qkv: Linear,
    proj: Linear,
    num_heads: usize,
    scale: f64,
}

impl SelfAttention {
    fn new(dim: usize, num_heads: usize, vb: VarBuilder) -> Result<Self> {
        let head_dim = dim / num_heads;
        Ok(Self {
            qkv: linear(dim, dim * 3, vb.pp("qkv"))?,
            proj: linear(dim, dim, vb.pp("proj"))?,
            num_heads,
            scale: (head_dim as f64).powf(-0.5),
        })
    }

    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let (b, n, c) = x.dims3()?;
        let h = self.num_heads;
        let d = c / h;

        let qkv = self
            .qkv
            .forward(x)?
            .reshape((b, n, 3, h, d))?
            .permute((2, 0, 3, 1, 4))?;
        let q = qkv.i(0)?.contiguous()?;
        let k = qkv.i(1)?.contiguous()?;
        let v = qkv.i(2)?.contiguous()?;

        let attn = (q.matmul(&k.transpose(D::Minus2, D::Minus1)?.contiguous()?)? * self.scale)?;
        let attn = candle_nn::ops::softmax_last_dim(&attn)?;
        let out = attn.matmul(&v)?.transpose(1, 2)?.contiguous()?.reshape((b, n, c))?;
        Ok(self.proj.forward(&out)?)
    }
}

struct CrossAttention {
    q: Linear,
    kv: Linear,
    proj: Linear,
    num_heads: usize,
    scale: f64,
}

impl CrossAttention {
    fn new(dim: usize, context_dim: usize, num_heads: usize, vb: VarBuilder) -> Result<Self> {
        let head_dim = dim / num_heads;
        Ok(Self {
            q: linear(dim, dim, vb.pp("q"))?,
            kv: linear(context_dim, dim * 2, vb.pp("kv"))?,
            proj: linear(dim, dim, vb.pp("proj"))?,
            num_heads,
            scale: (head_dim as f64).powf(-0.5),
        })
    }

    fn forward(&self, x: &Tensor, context: &Tensor) -> Result<Tensor> {
        let (b, n, c) = x.dims3()?;
        let (_, m, _) = context.dims3()?;
        let h = self.num_heads;
        let d = c / h;

        let q = self
            .q
            .forward(x)?
            .reshape((b, n, h, d))?
            .transpose(1, 2)?
            .contiguous()?;
        let kv = self
            .kv
            .forward(context)?
            .reshape((b, m, 2, h, d))?
            .permute((2, 0, 3, 1, 4))?;
        let k = kv.i(0)?.contiguous()?;
        let v = kv.i(1)?.contiguous()?;

        let attn = (q.matmul(&k.transpose(D::Minus2, D::Minus1)?.contiguous()?)? * self.scale)?;
        let attn = candle_nn::ops::softmax_last_dim(&attn)?;
        let out = attn.matmul(&v)?.transpose(1, 2)?.contiguous()?.reshape((b, n, c))?;
        Ok(self.proj.forward(&out)?)
    }
}

struct Mlp {
    fc1: Linear,
    fc2: Linear,
}

impl Mlp {
    fn new(dim: usize, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            fc1: linear(dim, dim * 4, vb.pp("fc1"))?,
            fc2: linear(dim * 4, dim, vb.pp("fc2"))?,
        })
    }

    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        Ok(self.fc2.forward(&self.fc1.forward(x)?.gelu()?)?)
    }
}

struct EncoderBlock {
    norm1: LayerNorm,
    attn: SelfAttention,
    norm2: LayerNorm,
    mlp: Mlp,
}

impl EncoderBlock {
    fn new(dim: usize, num_heads: usize, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            norm1: layer_norm(dim, 1e-5, vb.pp("norm1"))?,
            attn: SelfAttention::new(dim, num_heads, vb.pp("attn"))?,
            norm2: layer_norm(dim, 1e-5, vb.pp("norm2"))?,
            mlp: Mlp::new(dim, vb.pp("mlp"))?,
        })
    }

    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let x = (x + self.attn.forward(&self.norm1.forward(x)?)?)?;
        let x = (&x + self.mlp.forward(&self.norm2.forward(&x)?)?)?;
        Ok(x)
    }
}

struct BackboneBlock {
    norm1: LayerNorm,
    cross: CrossAttention,
    norm2: LayerNorm,
    attn: SelfAttention,
    norm3: LayerNorm,
    mlp: Mlp,
}

impl BackboneBlock {
    fn new(dim: usize, context_dim: usize, num_heads: usize, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            norm1: layer_norm(dim, 1e-5, vb.pp("norm1"))?,
            cross: CrossAttention::new(dim, context_dim, num_heads, vb.pp("cross"))?,
            norm2: layer_norm(dim, 1e-5, vb.pp("norm2"))?,
            attn: SelfAttention::new(dim, num_heads, vb.pp("attn"))?,
            norm3: layer_norm(dim, 1e-5, vb.pp("norm3"))?,
            mlp: Mlp::new(dim, vb.pp("mlp"))?,
        })
    }

    fn forward(&self, x: &Tensor, context: &Tensor) -> Result<Tensor> {
        let x = (x + self.cross.forward(&self.norm1.forward(x)?, context)?)?;
        let x = (&x + self.attn.forward(&self.norm2.forward(&x)?)?)?;
        let x = (&x + self.mlp.forward(&self.norm3.forward(&x)?)?)?;
        Ok(x)
    }
}

/// NeRF decoder MLP: triplane features in, density (+ color, unused by
/// this pipeline) out.
struct NerfDecoder {
    layers: Vec<Linear>,
}

impl NerfDecoder {
    fn new(cfg: &DecoderConfig, vb: VarBuilder) -> Result<Self> {
        let vb = vb.pp("layers");
        let mut layers = Vec::with_capacity(cfg.n_hidden_layers + 1);
        layers.push(linear(cfg.in_channels, cfg.n_neurons, vb.pp("0"))?);
        for i in 1..cfg.n_hidden_layers {
            layers.push(linear(cfg.n_neurons, cfg.n_neurons, vb.pp(i.to_string()))?);
        }
        layers.push(linear(
            cfg.n_neurons,
            4,
            vb.pp(cfg.n_hidden_layers.to_string()),
        )?);
        Ok(Self { layers })
    }

    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let mut x = x.clone();
        let last = self.layers.len() - 1;
        for (i, layer) in self.layers.iter().enumerate() {
            x = layer.forward(&x)?;
            if i < last {
                x = x.silu()?;
            }
        }
        Ok(x)
    }
}

/// Pretrained image-to-3D reconstructor.
pub struct Reconstructor {
    cfg: ReconstructorConfig,
    patch_embed: Conv2d,
    pos_embed: Tensor,
    image_blocks: Vec<EncoderBlock>,
    image_norm: LayerNorm,
    triplane_embeddings: Tensor,
    backbone: Vec<BackboneBlock>,
    backbone_norm: LayerNorm,
    post_processor: Linear,
    decoder: NerfDecoder,
    device: Device,
}

impl Reconstructor {
    /// Loads the reconstructor from a YAML config and a pth checkpoint.
    pub fn load<P: AsRef<Path>>(config_path: P, weights_path: P, device: Device) -> Result<Self> {
        let config_path = config_path.as_ref();
        let weights_path = weights_path.as_ref();

        info!(
            config = %config_path.display(),
            weights = %weights_path.display(),
            "Loading reconstruction model"
        );

        let config_text = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read {}", config_path.display()))?;
        let cfg: ReconstructorConfig = serde_yaml::from_str(&config_text)
            .with_context(|| format!("Malformed config {}", config_path.display()))?;

        let vb = VarBuilder::from_pth(weights_path, DType::F32, &device)
            .with_context(|| format!("Failed to load checkpoint {}", weights_path.display()))?;

        let model = Self::new(cfg, vb, device)?;
        info!("✓ Reconstruction model loaded");
        Ok(model)
    }

    fn new(cfg: ReconstructorConfig, vb: VarBuilder, device: Device) -> Result<Self> {
        // Image features come out of the tokenizer at the backbone's
        // cross-attention width.
        let width = cfg.backbone.cross_attention_dim;
        let dim = cfg.backbone.in_channels;
        let n_patches = (cfg.cond_image_size / cfg.image_tokenizer.patch_size).pow(2);
        let n_tokens = 3 * cfg.tokenizer.plane_size * cfg.tokenizer.plane_size;

        let vb_image = vb.pp("image_tokenizer");
        let patch_embed = conv2d(
            3,
            width,
            cfg.image_tokenizer.patch_size,
            Conv2dConfig {
                stride: cfg.image_tokenizer.patch_size,
                ..Default::default()
            },
            vb_image.pp("patch_embed"),
        )?;
        let pos_embed = vb_image.get((1, n_patches, width), "pos_embed")?;
        let mut image_blocks = Vec::with_capacity(cfg.image_tokenizer.num_layers);
        for i in 0..cfg.image_tokenizer.num_layers {
            image_blocks.push(EncoderBlock::new(
                width,
                cfg.image_tokenizer.num_heads,
                vb_image.pp(format!("blocks.{i}")),
            )?);
        }
        let image_norm = layer_norm(width, 1e-5, vb_image.pp("norm"))?;

        let triplane_embeddings =
            vb.pp("tokenizer")
                .get((1, n_tokens, cfg.tokenizer.num_channels), "embeddings")?;

        let vb_backbone = vb.pp("backbone");
        let mut backbone = Vec::with_capacity(cfg.backbone.num_layers);
        for i in 0..cfg.backbone.num_layers {
            backbone.push(BackboneBlock::new(
                dim,
                width,
                cfg.backbone.num_attention_heads,
                vb_backbone.pp(format!("transformer_blocks.{i}")),
            )?);
        }
        let backbone_norm = layer_norm(dim, 1e-5, vb_backbone.pp("norm_out"))?;

        let post_processor = linear(
            cfg.post_processor.in_channels,
            cfg.post_processor.out_channels,
            vb.pp("post_processor").pp("proj"),
        )?;

        let decoder = NerfDecoder::new(&cfg.decoder, vb.pp("decoder"))?;

        Ok(Self {
            cfg,
            patch_embed,
            pos_embed,
            image_blocks,
            image_norm,
            triplane_embeddings,
            backbone,
            backbone_norm,
            post_processor,
            decoder,
            device,
        })
    }

    pub fn config(&self) -> &ReconstructorConfig {
        &self.cfg
    }

    /// Encodes an image file into scene codes, one per input image.
    pub fn forward<P: AsRef<Path>>(&self, image_path: P) -> Result<Vec<Tensor>> {
        let image_path = image_path.as_ref();
        info!(path = %image_path.display(), "Encoding image into scene codes");

        let image = load_image(image_path, self.cfg.cond_image_size, &self.device)?;
        let code = self.forward_tensor(&image)?;
        Ok(vec![code])
    }

    /// Runs the network on a preprocessed `[1, 3, S, S]` image tensor.
    pub fn forward_tensor(&self, image: &Tensor) -> Result<Tensor> {
        // Patch embedding: [1, 3, S, S] -> [1, N, width]
        let mut x = self
            .patch_embed
            .forward(image)?
            .flatten_from(2)?
            .transpose(1, 2)?
            .contiguous()?;
        x = x.broadcast_add(&self.pos_embed)?;

        for block in &self.image_blocks {
            x = block.forward(&x)?;
        }
        let context = self.image_norm.forward(&x)?;

        let mut tokens = self.triplane_embeddings.clone();
        for block in &self.backbone {
            tokens = block.forward(&tokens, &context)?;
        }
        let tokens = self.backbone_norm.forward(&tokens)?;

        // [1, 3*P*P, C] -> [3, C, P, P]
        let p = self.cfg.tokenizer.plane_size;
        let c = self.cfg.post_processor.out_channels;
        let code = self
            .post_processor
            .forward(&tokens)?
            .reshape((3, p, p, c))?
            .permute((0, 3, 1, 2))?
            .contiguous()?;

        debug!(shape = ?code.dims(), "Scene code");
        Ok(code)
    }

    /// Extracts one mesh per scene code at the given grid resolution.
    ///
    /// Vertices are scaled to the renderer's bounding radius.
    pub fn extract_mesh(&self, scene_codes: &[Tensor], resolution: usize) -> Result<Vec<Mesh>> {
        info!(
            count = scene_codes.len(),
            resolution, "Extracting meshes from scene codes"
        );

        let mut meshes = Vec::with_capacity(scene_codes.len());
        for code in scene_codes {
            let (_, c, p, _) = code.dims4()?;
            let planes = code
                .to_dtype(DType::F32)?
                .to_device(&Device::Cpu)?
                .flatten_all()?
                .to_vec1::<f32>()?;

            let field = self.query_density_grid(&planes, c, p, resolution)?;
            let mut mesh = surface::extract(
                &ScalarField::new(field, resolution),
                DENSITY_THRESHOLD,
            );
            mesh.scale(self.cfg.renderer.radius);
            mesh.compute_normals();

            debug!(
                vertices = mesh.vertex_count(),
                faces = mesh.face_count(),
                "Extracted mesh"
            );
            meshes.push(mesh);
        }
        Ok(meshes)
    }

    /// Evaluates density on a `resolution³` grid over the bounded volume.
    fn query_density_grid(
        &self,
        planes: &[f32],
        channels: usize,
        plane_res: usize,
        resolution: usize,
    ) -> Result<Vec<f32>> {
        let feat_dim = 3 * channels;
        let total = resolution * resolution * resolution;
        let step = 2.0 / (resolution as f32 - 1.0);

        let mut densities = Vec::with_capacity(total);
        let mut features: Vec<f32> = Vec::with_capacity(QUERY_CHUNK * feat_dim);
        let mut pending = 0usize;

        for iz in 0..resolution {
            let z = iz as f32 * step - 1.0;
            for iy in 0..resolution {
                let y = iy as f32 * step - 1.0;
                for ix in 0..resolution {
                    let x = ix as f32 * step - 1.0;

                    sample_plane(planes, 0, channels, plane_res, x, y, &mut features);
                    sample_plane(planes, 1, channels, plane_res, x, z, &mut features);
                    sample_plane(planes, 2, channels, plane_res, y, z, &mut features);
                    pending += 1;

                    if pending == QUERY_CHUNK {
                        self.flush_density(&mut features, pending, feat_dim, &mut densities)?;
                        pending = 0;
                    }
                }
            }
        }
        if pending > 0 {
            self.flush_density(&mut features, pending, feat_dim, &mut densities)?;
        }

        Ok(densities)
    }

    /// Runs the NeRF decoder on a batch of triplane features, keeping
    /// the density channel.
    fn flush_density(
        &self,
        features: &mut Vec<f32>,
        count: usize,
        feat_dim: usize,
        out: &mut Vec<f32>,
    ) -> Result<()> {
        let batch = Tensor::from_vec(std::mem::take(features), (count, feat_dim), &self.device)?;
        let raw = self.decoder.forward(&batch)?.narrow(1, 0, 1)?.squeeze(1)?;
        // Truncated-exp activation: bias, clamp, exponentiate
        let sigma = ((raw + self.cfg.renderer.density_bias as f64)?
            .clamp(-15f32, 15f32)?)
        .exp()?;
        out.extend(sigma.to_vec1::<f32>()?);
        features.reserve(QUERY_CHUNK * feat_dim);
        Ok(())
    }
}

/// Loads an image, resizes to `size`x`size`, normalizes to `[-1, 1]`,
/// and lays it out as `[1, 3, size, size]`.
fn load_image<P: AsRef<Path>>(path: P, size: usize, device: &Device) -> Result<Tensor> {
    let path = path.as_ref();
    let image = image::open(path)
        .with_context(|| format!("Failed to open {}", path.display()))?
        .to_rgb8();
    let image = image::imageops::resize(
        &image,
        size as u32,
        size as u32,
        image::imageops::FilterType::CatmullRom,
    );

    let data: Vec<f32> = image
        .into_raw()
        .into_iter()
        .map(|b| b as f32 / 127.5 - 1.0)
        .collect();

    let tensor = Tensor::from_vec(data, (size, size, 3), device)?
        .permute((2, 0, 1))?
        .unsqueeze(0)?
        .contiguous()?;
    Ok(tensor)
}

/// Bilinearly samples all channels of one triplane at `(u, v) ∈ [-1, 1]²`,
/// appending `channels` values to `out`.
fn sample_plane(
    planes: &[f32],
    plane: usize,
    channels: usize,
    plane_res: usize,
    u: f32,
    v: f32,
    out: &mut Vec<f32>,
) {
    let last = (plane_res - 1) as f32;
    let gx = ((u + 1.0) * 0.5 * last).clamp(0.0, last);
    let gy = ((v + 1.0) * 0.5 * last).clamp(0.0, last);

    let x0 = gx.floor() as usize;
    let y0 = gy.floor() as usize;
    let x1 = (x0 + 1).min(plane_res - 1);
    let y1 = (y0 + 1).min(plane_res - 1);
    let fx = gx - x0 as f32;
    let fy = gy - y0 as f32;

    let idx = |ch: usize, row: usize, col: usize| -> usize {
        ((plane * channels + ch) * plane_res + row) * plane_res + col
    };

    for ch in 0..channels {
        let v00 = planes[idx(ch, y0, x0)];
        let v10 = planes[idx(ch, y0, x1)];
        let v01 = planes[idx(ch, y1, x0)];
        let v11 = planes[idx(ch, y1, x1)];
        let top = v00 + (v10 - v00) * fx;
        let bottom = v01 + (v11 - v01) * fx;
        out.push(top + (bottom - top) * fy);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny_config() -> ReconstructorConfig {
        let mut cfg = ReconstructorConfig::default();
        cfg.cond_image_size = 16;
        cfg.image_tokenizer.patch_size = 8;
        cfg.image_tokenizer.num_layers = 1;
        cfg.image_tokenizer.num_heads = 2;
        cfg.tokenizer.plane_size = 4;
        cfg.tokenizer.num_channels = 32;
        cfg.backbone.in_channels = 32;
        cfg.backbone.num_attention_heads = 2;
        cfg.backbone.attention_head_dim = 16;
        cfg.backbone.num_layers = 1;
        cfg.backbone.cross_attention_dim = 16;
        cfg.post_processor.in_channels = 32;
        cfg.post_processor.out_channels = 4;
        cfg.decoder.in_channels = 12;
        cfg.decoder.n_neurons = 8;
        cfg.decoder.n_hidden_layers = 2;
        cfg
    }

    #[test]
    fn config_parses_pretrained_yaml() {
        // Shape of the config.yaml published with the TripoSR checkpoint
        let yaml = r#"
model_cls: tsr.system.TSR
cond_image_size: 512
image_tokenizer_cls: tsr.models.tokenizers.image.DINOSingleImageTokenizer
image_tokenizer:
  pretrained_model_name_or_path: "facebook/dino-vitb16"
tokenizer_cls: tsr.models.tokenizers.triplane.Triplane1DTokenizer
tokenizer:
  plane_size: 32
  num_channels: 1024
backbone_cls: tsr.models.transformer.transformer_1d.Transformer1D
backbone:
  in_channels: 1024
  num_attention_heads: 16
  attention_head_dim: 64
  num_layers: 16
  cross_attention_dim: 768
post_processor_cls: tsr.models.network_utils.TriplaneUpsampleNetwork
post_processor:
  in_channels: 1024
  out_channels: 40
decoder_cls: tsr.models.network_utils.NeRFMLP
decoder:
  in_channels: 120
  n_neurons: 64
  n_hidden_layers: 9
  activation: silu
renderer_cls: tsr.models.nerf_renderer.TriplaneNeRFRenderer
renderer:
  radius: 0.87
  feature_reduction: concat
  density_activation: trunc_exp
  density_bias: -1.0
"#;
        let cfg: ReconstructorConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.cond_image_size, 512);
        assert_eq!(cfg.tokenizer.plane_size, 32);
        assert_eq!(cfg.tokenizer.num_channels, 1024);
        assert_eq!(cfg.backbone.num_layers, 16);
        assert_eq!(cfg.backbone.cross_attention_dim, 768);
        assert_eq!(cfg.post_processor.out_channels, 40);
        assert_eq!(cfg.decoder.n_hidden_layers, 9);
        assert_eq!(cfg.renderer.radius, 0.87);
        assert_eq!(cfg.renderer.density_bias, -1.0);
    }

    #[test]
    fn config_defaults_fill_sparse_yaml() {
        // Component blocks and unknown keys are optional; missing fields
        // fall back to the published checkpoint's values.
        let yaml = "cond_image_size: 256\nextra_key: ignored\n";
        let cfg: ReconstructorConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.cond_image_size, 256);
        assert_eq!(cfg.tokenizer.plane_size, 32);
        assert_eq!(cfg.backbone.num_layers, 16);
        assert_eq!(cfg.renderer.density_activation, "trunc_exp");
    }

    #[test]
    fn sample_plane_interpolates_corners() {
        // Single-channel 2x2 plane: rows are v, columns are u
        let planes = vec![0.0, 1.0, 2.0, 3.0];
        let mut out = Vec::new();

        sample_plane(&planes, 0, 1, 2, -1.0, -1.0, &mut out);
        sample_plane(&planes, 0, 1, 2, 1.0, -1.0, &mut out);
        sample_plane(&planes, 0, 1, 2, -1.0, 1.0, &mut out);
        sample_plane(&planes, 0, 1, 2, 1.0, 1.0, &mut out);
        sample_plane(&planes, 0, 1, 2, 0.0, 0.0, &mut out);

        assert_eq!(&out[..4], &[0.0, 1.0, 2.0, 3.0]);
        assert!((out[4] - 1.5).abs() < 1e-6);
    }

    #[test]
    fn forward_produces_triplane_scene_code() {
        let device = Device::Cpu;
        let cfg = tiny_config();
        let vb = VarBuilder::zeros(DType::F32, &device);
        let model = Reconstructor::new(cfg.clone(), vb, device.clone()).unwrap();

        let image = Tensor::zeros((1, 3, cfg.cond_image_size, cfg.cond_image_size), DType::F32, &device)
            .unwrap();
        let code = model.forward_tensor(&image).unwrap();
        assert_eq!(
            code.dims(),
            &[
                3,
                cfg.post_processor.out_channels,
                cfg.tokenizer.plane_size,
                cfg.tokenizer.plane_size
            ]
        );
    }

    #[test]
    fn zero_weights_yield_empty_mesh() {
        // With all-zero weights the activated density is exp(bias)
        // everywhere, far below the extraction threshold, so no surface
        // crosses the iso level.
        let device = Device::Cpu;
        let cfg = tiny_config();
        let vb = VarBuilder::zeros(DType::F32, &device);
        let model = Reconstructor::new(cfg.clone(), vb, device.clone()).unwrap();

        let image =
            Tensor::zeros((1, 3, cfg.cond_image_size, cfg.cond_image_size), DType::F32, &device)
                .unwrap();
        let codes = vec![model.forward_tensor(&image).unwrap()];
        let meshes = model.extract_mesh(&codes, 8).unwrap();
        assert_eq!(meshes.len(), 1);
        assert!(meshes[0].is_empty());
    }
}
