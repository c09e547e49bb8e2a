//! Text → image → 3D mesh → render demo
//!
//! Standalone demo chaining three pretrained-model stages on the Candle
//! ML framework:
//!
//! 1. **Text-to-image**: Stable Diffusion v1.5 turns a prompt into a PNG
//! 2. **Image-to-3D**: a TripoSR-style triplane reconstructor encodes the
//!    image into scene codes and extracts a triangle mesh
//! 3. **Offscreen render**: a CPU rasterizer turns the mesh into a preview PNG
//!
//! Everything runs once, top to bottom, writing `input.png`, `output.obj`
//! and `render.png` into the output directory.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use text_to_mesh_demo::pipeline::{self, RunOptions};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     pipeline::run(RunOptions::default()).await
//! }
//! ```

pub mod download;
pub mod generate;
pub mod mesh;
pub mod pipeline;
pub mod reconstruct;
pub mod render;
pub mod surface;
