//! Offscreen CPU rasterizer
//!
//! Minimal headless renderer for the final preview stage: one scene, one
//! directional light, a perspective camera auto-framed on the scene
//! bounds, z-buffered triangle fill on a fixed-size RGB framebuffer.
//!
//! Shading is selected through the `TEXT_TO_MESH_SHADING` environment
//! variable (`lambert`, the default, or `flat`).

use crate::mesh::Mesh;
use anyhow::{Context, Result};
use glam::{Mat4, Vec3, Vec4};
use std::path::Path;
use tracing::{debug, info};

/// Environment variable selecting the shading backend.
pub const SHADING_ENV: &str = "TEXT_TO_MESH_SHADING";

const BACKGROUND: [u8; 3] = [24, 24, 28];
const BASE_COLOR: Vec3 = Vec3::new(0.72, 0.72, 0.78);
const AMBIENT: f32 = 0.18;

/// Shading model applied by the rasterizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shading {
    /// Per-pixel Lambert term from interpolated vertex normals.
    Lambert,
    /// One Lambert term per face.
    Flat,
}

impl Shading {
    /// Reads the shading selector from the environment, defaulting to
    /// Lambert for unset or unrecognized values.
    pub fn from_env() -> Self {
        match std::env::var(SHADING_ENV).as_deref() {
            Ok("flat") | Ok("FLAT") => Shading::Flat,
            _ => Shading::Lambert,
        }
    }
}

/// Minimal scene graph: meshes, one directional light, a background.
pub struct Scene {
    meshes: Vec<Mesh>,
    pub light_dir: Vec3,
    pub background: [u8; 3],
}

impl Default for Scene {
    fn default() -> Self {
        Self::new()
    }
}

impl Scene {
    pub fn new() -> Self {
        Self {
            meshes: Vec::new(),
            light_dir: Vec3::new(0.4, 1.0, 0.6).normalize(),
            background: BACKGROUND,
        }
    }

    pub fn add_mesh(&mut self, mesh: Mesh) {
        self.meshes.push(mesh);
    }

    pub fn meshes(&self) -> &[Mesh] {
        &self.meshes
    }

    /// Bounding box over all meshes, `None` when the scene has no geometry.
    fn bounding_box(&self) -> Option<(Vec3, Vec3)> {
        let mut bbox: Option<(Vec3, Vec3)> = None;
        for mesh in &self.meshes {
            if mesh.vertex_count() == 0 {
                continue;
            }
            let (min, max) = mesh.bounding_box();
            bbox = Some(match bbox {
                Some((bmin, bmax)) => (bmin.min(min), bmax.max(max)),
                None => (min, max),
            });
        }
        bbox
    }
}

/// A rendered RGB frame.
pub struct RenderedFrame {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl RenderedFrame {
    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Raw RGB8 pixel data, row-major, `width * height * 3` bytes.
    #[inline]
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Writes the frame as PNG, overwriting any existing file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        image::save_buffer(
            path,
            &self.pixels,
            self.width,
            self.height,
            image::ExtendedColorType::Rgb8,
        )
        .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }
}

/// Headless rasterizer with a fixed-size framebuffer.
pub struct OffscreenRenderer {
    width: u32,
    height: u32,
    shading: Shading,
}

impl OffscreenRenderer {
    pub fn new(width: u32, height: u32) -> Self {
        let shading = Shading::from_env();
        debug!(width, height, ?shading, "Offscreen renderer created");
        Self {
            width,
            height,
            shading,
        }
    }

    /// Rasterizes the scene into a new frame.
    ///
    /// An empty scene produces a frame filled with the background color.
    pub fn render(&self, scene: &Scene) -> Result<RenderedFrame> {
        let (w, h) = (self.width as usize, self.height as usize);
        let mut pixels = Vec::with_capacity(w * h * 3);
        for _ in 0..w * h {
            pixels.extend_from_slice(&scene.background);
        }
        let mut zbuffer = vec![f32::INFINITY; w * h];

        let Some((bmin, bmax)) = scene.bounding_box() else {
            debug!("Scene has no geometry, returning background frame");
            return Ok(RenderedFrame {
                width: self.width,
                height: self.height,
                pixels,
            });
        };

        let center = (bmin + bmax) * 0.5;
        let radius = ((bmax - bmin).length() * 0.5).max(1e-3);
        let eye = center + Vec3::new(1.0, 0.8, 1.6).normalize() * radius * 2.6;

        let view = Mat4::look_at_rh(eye, center, Vec3::Y);
        let proj = Mat4::perspective_rh(
            45f32.to_radians(),
            self.width as f32 / self.height as f32,
            radius * 0.05,
            radius * 20.0,
        );
        let view_proj = proj * view;

        for mesh in scene.meshes() {
            self.rasterize_mesh(mesh, &view_proj, scene.light_dir, &mut pixels, &mut zbuffer);
        }

        Ok(RenderedFrame {
            width: self.width,
            height: self.height,
            pixels,
        })
    }

    /// Releases the rasterizer. Called unconditionally at the end of the
    /// pipeline's happy path; an early failure skips it, matching the
    /// process-exit teardown model.
    pub fn release(self) {
        info!("Offscreen renderer released");
    }

    fn rasterize_mesh(
        &self,
        mesh: &Mesh,
        view_proj: &Mat4,
        light_dir: Vec3,
        pixels: &mut [u8],
        zbuffer: &mut [f32],
    ) {
        // Fall back to freshly computed normals when the mesh carries none.
        let computed;
        let normals: &[Vec3] = match mesh.normals() {
            Some(n) => n,
            None => {
                let mut m = mesh.clone();
                m.compute_normals();
                computed = m.normals().map(<[Vec3]>::to_vec).unwrap_or_default();
                &computed
            }
        };

        let (w, h) = (self.width as f32, self.height as f32);

        for face in mesh.faces() {
            let idx = [face[0] as usize, face[1] as usize, face[2] as usize];
            let world = [
                mesh.vertices()[idx[0]],
                mesh.vertices()[idx[1]],
                mesh.vertices()[idx[2]],
            ];

            // Project to screen space; skip triangles behind the camera.
            let mut screen = [Vec3::ZERO; 3];
            let mut clipped = false;
            for i in 0..3 {
                let clip: Vec4 = *view_proj * world[i].extend(1.0);
                if clip.w <= 1e-6 {
                    clipped = true;
                    break;
                }
                let ndc = clip.truncate() / clip.w;
                screen[i] = Vec3::new(
                    (ndc.x + 1.0) * 0.5 * w,
                    (1.0 - ndc.y) * 0.5 * h,
                    ndc.z,
                );
            }
            if clipped {
                continue;
            }

            let face_normal = (world[1] - world[0]).cross(world[2] - world[0]).normalize_or_zero();
            let flat_intensity = shade(face_normal, light_dir);

            let min_x = screen.iter().map(|p| p.x).fold(f32::INFINITY, f32::min).floor().max(0.0) as usize;
            let max_x = (screen.iter().map(|p| p.x).fold(f32::NEG_INFINITY, f32::max).ceil() as usize)
                .min(self.width as usize - 1);
            let min_y = screen.iter().map(|p| p.y).fold(f32::INFINITY, f32::min).floor().max(0.0) as usize;
            let max_y = (screen.iter().map(|p| p.y).fold(f32::NEG_INFINITY, f32::max).ceil() as usize)
                .min(self.height as usize - 1);
            if min_x > max_x || min_y > max_y {
                continue;
            }

            let area = edge(screen[0], screen[1], screen[2]);
            if area.abs() < 1e-9 {
                continue;
            }

            for py in min_y..=max_y {
                for px in min_x..=max_x {
                    let p = Vec3::new(px as f32 + 0.5, py as f32 + 0.5, 0.0);
                    let w0 = edge(screen[1], screen[2], p) / area;
                    let w1 = edge(screen[2], screen[0], p) / area;
                    let w2 = edge(screen[0], screen[1], p) / area;
                    if w0 < 0.0 || w1 < 0.0 || w2 < 0.0 {
                        continue;
                    }

                    let depth = w0 * screen[0].z + w1 * screen[1].z + w2 * screen[2].z;
                    let offset = py * self.width as usize + px;
                    if depth >= zbuffer[offset] {
                        continue;
                    }
                    zbuffer[offset] = depth;

                    let intensity = match self.shading {
                        Shading::Flat => flat_intensity,
                        Shading::Lambert => {
                            let n = (normals[idx[0]] * w0
                                + normals[idx[1]] * w1
                                + normals[idx[2]] * w2)
                                .normalize_or_zero();
                            shade(n, light_dir)
                        }
                    };

                    let color = BASE_COLOR * intensity;
                    pixels[offset * 3] = (color.x * 255.0) as u8;
                    pixels[offset * 3 + 1] = (color.y * 255.0) as u8;
                    pixels[offset * 3 + 2] = (color.z * 255.0) as u8;
                }
            }
        }
    }
}

/// Lambert term with an ambient floor, clamped to `[0, 1]`.
#[inline]
fn shade(normal: Vec3, light_dir: Vec3) -> f32 {
    // Light the surface from both sides; extracted meshes are thin and
    // winding near the silhouette is not reliable.
    (AMBIENT + normal.dot(light_dir).abs() * (1.0 - AMBIENT)).clamp(0.0, 1.0)
}

/// Signed double area of the screen-space triangle (a, b, p).
#[inline]
fn edge(a: Vec3, b: Vec3, p: Vec3) -> f32 {
    (b.x - a.x) * (p.y - a.y) - (b.y - a.y) * (p.x - a.x)
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    fn cube_mesh() -> Mesh {
        let mut mesh = Mesh::new();
        let corners = [
            Vec3::new(-0.5, -0.5, -0.5),
            Vec3::new(0.5, -0.5, -0.5),
            Vec3::new(0.5, 0.5, -0.5),
            Vec3::new(-0.5, 0.5, -0.5),
            Vec3::new(-0.5, -0.5, 0.5),
            Vec3::new(0.5, -0.5, 0.5),
            Vec3::new(0.5, 0.5, 0.5),
            Vec3::new(-0.5, 0.5, 0.5),
        ];
        for c in corners {
            mesh.add_vertex(c);
        }
        let quads = [
            [0u32, 1, 2, 3],
            [5, 4, 7, 6],
            [4, 0, 3, 7],
            [1, 5, 6, 2],
            [3, 2, 6, 7],
            [4, 5, 1, 0],
        ];
        for q in quads {
            mesh.add_face(q[0], q[1], q[2]);
            mesh.add_face(q[0], q[2], q[3]);
        }
        mesh.compute_normals();
        mesh
    }

    #[test]
    fn empty_scene_renders_background() {
        let renderer = OffscreenRenderer::new(64, 48);
        let frame = renderer.render(&Scene::new()).unwrap();
        assert_eq!(frame.width(), 64);
        assert_eq!(frame.height(), 48);
        assert_eq!(frame.pixels().len(), 64 * 48 * 3);
        assert_eq!(&frame.pixels()[..3], &BACKGROUND);
    }

    #[test]
    fn cube_covers_pixels() {
        let renderer = OffscreenRenderer::new(128, 128);
        let mut scene = Scene::new();
        scene.add_mesh(cube_mesh());
        let frame = renderer.render(&scene).unwrap();

        let lit = frame
            .pixels()
            .chunks_exact(3)
            .filter(|px| *px != &BACKGROUND[..])
            .count();
        // The auto-framed cube should cover a meaningful share of the frame
        assert!(lit > 128 * 128 / 20, "only {lit} non-background pixels");
    }

    #[test]
    fn frame_has_fixed_dimensions() {
        let renderer = OffscreenRenderer::new(512, 512);
        let mut scene = Scene::new();
        scene.add_mesh(cube_mesh());
        let frame = renderer.render(&scene).unwrap();
        assert_eq!(frame.pixels().len(), 512 * 512 * 3);
        renderer.release();
    }

    #[test]
    fn saved_frame_is_decodable_png() {
        let renderer = OffscreenRenderer::new(32, 32);
        let mut scene = Scene::new();
        scene.add_mesh(cube_mesh());
        let frame = renderer.render(&scene).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frame.png");
        frame.save(&path).unwrap();

        let decoded = image::open(&path).unwrap();
        assert_eq!(decoded.width(), 32);
        assert_eq!(decoded.height(), 32);
    }
}
