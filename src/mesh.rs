//! Triangle mesh representation and OBJ export
//!
//! The reconstructor produces one `Mesh` per scene code; the pipeline
//! exports the first one as ASCII OBJ and hands it to the renderer.

use anyhow::{Context, Result};
use glam::Vec3;
use std::io::Write;
use std::path::Path;

/// A triangle mesh with optional per-vertex normals.
#[derive(Debug, Clone, Default)]
pub struct Mesh {
    vertices: Vec<Vec3>,
    faces: Vec<[u32; 3]>,
    normals: Option<Vec<Vec3>>,
}

impl Mesh {
    /// Creates an empty mesh.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a mesh with pre-allocated capacity.
    pub fn with_capacity(vertex_count: usize, face_count: usize) -> Self {
        Self {
            vertices: Vec::with_capacity(vertex_count),
            faces: Vec::with_capacity(face_count),
            normals: None,
        }
    }

    /// Adds a vertex and returns its index.
    pub fn add_vertex(&mut self, position: Vec3) -> u32 {
        let index = self.vertices.len() as u32;
        self.vertices.push(position);
        index
    }

    /// Adds a triangle by vertex indices.
    pub fn add_face(&mut self, v0: u32, v1: u32, v2: u32) {
        self.faces.push([v0, v1, v2]);
    }

    #[inline]
    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    #[inline]
    pub fn face_count(&self) -> usize {
        self.faces.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty() || self.faces.is_empty()
    }

    #[inline]
    pub fn vertices(&self) -> &[Vec3] {
        &self.vertices
    }

    #[inline]
    pub fn faces(&self) -> &[[u32; 3]] {
        &self.faces
    }

    pub fn normals(&self) -> Option<&[Vec3]> {
        self.normals.as_deref()
    }

    /// Computes area-weighted per-vertex normals from face geometry.
    pub fn compute_normals(&mut self) {
        let mut normals = vec![Vec3::ZERO; self.vertices.len()];

        for face in &self.faces {
            let v0 = self.vertices[face[0] as usize];
            let v1 = self.vertices[face[1] as usize];
            let v2 = self.vertices[face[2] as usize];
            // Cross product length is proportional to face area, so
            // accumulating unnormalized normals area-weights the result.
            let n = (v1 - v0).cross(v2 - v0);

            normals[face[0] as usize] += n;
            normals[face[1] as usize] += n;
            normals[face[2] as usize] += n;
        }

        for n in &mut normals {
            let len = n.length();
            if len > 0.0 {
                *n /= len;
            }
        }

        self.normals = Some(normals);
    }

    /// Uniformly scales all vertices about the origin. Normals are
    /// unaffected.
    pub fn scale(&mut self, factor: f32) {
        for v in &mut self.vertices {
            *v *= factor;
        }
    }

    /// Returns the (min, max) corners of the axis-aligned bounding box.
    pub fn bounding_box(&self) -> (Vec3, Vec3) {
        if self.vertices.is_empty() {
            return (Vec3::ZERO, Vec3::ZERO);
        }

        let mut min = self.vertices[0];
        let mut max = self.vertices[0];
        for v in &self.vertices[1..] {
            min = min.min(*v);
            max = max.max(*v);
        }
        (min, max)
    }

    /// Checks that all face indices reference existing, distinct vertices.
    pub fn validate(&self) -> bool {
        let n = self.vertices.len() as u32;
        self.faces.iter().all(|f| {
            f[0] < n && f[1] < n && f[2] < n && f[0] != f[1] && f[1] != f[2] && f[0] != f[2]
        })
    }

    /// Writes the mesh as ASCII OBJ (`v`/`vn`/`f` records, 1-based indices).
    pub fn write_obj<W: Write>(&self, mut w: W) -> Result<()> {
        writeln!(w, "# text-to-mesh-demo export")?;
        writeln!(w, "# {} vertices, {} faces", self.vertex_count(), self.face_count())?;

        for v in &self.vertices {
            writeln!(w, "v {} {} {}", v.x, v.y, v.z)?;
        }

        if let Some(normals) = &self.normals {
            for n in normals {
                writeln!(w, "vn {} {} {}", n.x, n.y, n.z)?;
            }
            for f in &self.faces {
                writeln!(
                    w,
                    "f {}//{} {}//{} {}//{}",
                    f[0] + 1,
                    f[0] + 1,
                    f[1] + 1,
                    f[1] + 1,
                    f[2] + 1,
                    f[2] + 1
                )?;
            }
        } else {
            for f in &self.faces {
                writeln!(w, "f {} {} {}", f[0] + 1, f[1] + 1, f[2] + 1)?;
            }
        }

        Ok(())
    }

    /// Exports the mesh to an OBJ file, overwriting any existing file.
    pub fn export_obj<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let file = std::fs::File::create(path)
            .with_context(|| format!("Failed to create {}", path.display()))?;
        let mut writer = std::io::BufWriter::new(file);
        self.write_obj(&mut writer)?;
        writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tetrahedron() -> Mesh {
        let mut mesh = Mesh::new();
        mesh.add_vertex(Vec3::new(0.0, 0.0, 0.0));
        mesh.add_vertex(Vec3::new(1.0, 0.0, 0.0));
        mesh.add_vertex(Vec3::new(0.5, 1.0, 0.0));
        mesh.add_vertex(Vec3::new(0.5, 0.5, 1.0));
        mesh.add_face(0, 2, 1);
        mesh.add_face(0, 1, 3);
        mesh.add_face(1, 2, 3);
        mesh.add_face(2, 0, 3);
        mesh
    }

    #[test]
    fn empty_mesh() {
        let mesh = Mesh::new();
        assert!(mesh.is_empty());
        assert_eq!(mesh.vertex_count(), 0);
        assert_eq!(mesh.face_count(), 0);
    }

    #[test]
    fn add_vertex_returns_index() {
        let mut mesh = Mesh::new();
        assert_eq!(mesh.add_vertex(Vec3::X), 0);
        assert_eq!(mesh.add_vertex(Vec3::Y), 1);
    }

    #[test]
    fn bounding_box_spans_vertices() {
        let mut mesh = Mesh::new();
        mesh.add_vertex(Vec3::new(-1.0, -2.0, -3.0));
        mesh.add_vertex(Vec3::new(4.0, 5.0, 6.0));
        let (min, max) = mesh.bounding_box();
        assert_eq!(min, Vec3::new(-1.0, -2.0, -3.0));
        assert_eq!(max, Vec3::new(4.0, 5.0, 6.0));
    }

    #[test]
    fn validate_rejects_out_of_range_index() {
        let mut mesh = Mesh::new();
        mesh.add_vertex(Vec3::ZERO);
        mesh.add_face(0, 1, 2);
        assert!(!mesh.validate());
    }

    #[test]
    fn validate_rejects_degenerate_face() {
        let mut mesh = Mesh::new();
        mesh.add_vertex(Vec3::ZERO);
        mesh.add_vertex(Vec3::X);
        mesh.add_face(0, 0, 1);
        assert!(!mesh.validate());
    }

    #[test]
    fn scale_multiplies_vertices() {
        let mut mesh = tetrahedron();
        mesh.scale(0.5);
        assert_eq!(mesh.vertices()[1], Vec3::new(0.5, 0.0, 0.0));
        assert_eq!(mesh.vertices()[3], Vec3::new(0.25, 0.25, 0.5));
        assert_eq!(mesh.face_count(), 4);
    }

    #[test]
    fn compute_normals_unit_length() {
        let mut mesh = tetrahedron();
        mesh.compute_normals();
        let normals = mesh.normals().unwrap();
        assert_eq!(normals.len(), mesh.vertex_count());
        for n in normals {
            assert!((n.length() - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn obj_export_reparses_nonempty() {
        let mut mesh = tetrahedron();
        mesh.compute_normals();

        let mut buf = Vec::new();
        mesh.write_obj(&mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();

        let v_count = text.lines().filter(|l| l.starts_with("v ")).count();
        let vn_count = text.lines().filter(|l| l.starts_with("vn ")).count();
        let f_count = text.lines().filter(|l| l.starts_with("f ")).count();
        assert_eq!(v_count, 4);
        assert_eq!(vn_count, 4);
        assert_eq!(f_count, 4);

        // Face indices must be 1-based and in range
        for line in text.lines().filter(|l| l.starts_with("f ")) {
            for field in line.split_whitespace().skip(1) {
                let idx: usize = field.split('/').next().unwrap().parse().unwrap();
                assert!(idx >= 1 && idx <= 4);
            }
        }
    }

    #[test]
    fn obj_export_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.obj");
        tetrahedron().export_obj(&path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("v 0 0 0"));
        assert!(text.contains("f 1 3 2"));
    }
}
