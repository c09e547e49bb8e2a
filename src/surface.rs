//! Isosurface extraction over a sampled density grid
//!
//! The reconstructor queries density on a regular `n³` grid spanning
//! `[-1, 1]³`; this module turns that scalar field into a triangle mesh
//! with marching tetrahedra. Each grid cell is split into six tetrahedra
//! around the 0-6 diagonal; every tetrahedron crossing the iso level
//! contributes one or two triangles with linearly interpolated edge
//! vertices. Vertices on shared grid edges are deduplicated so the
//! output is index-connected rather than triangle soup.

use crate::mesh::Mesh;
use glam::Vec3;
use std::collections::HashMap;

/// Cube corner offsets, matching the bit order used by `cell_corner`.
const CORNERS: [[u32; 3]; 8] = [
    [0, 0, 0],
    [1, 0, 0],
    [1, 1, 0],
    [0, 1, 0],
    [0, 0, 1],
    [1, 0, 1],
    [1, 1, 1],
    [0, 1, 1],
];

/// Six-tetrahedra decomposition of a cube around the 0-6 diagonal.
const TETRAHEDRA: [[usize; 4]; 6] = [
    [0, 5, 1, 6],
    [0, 1, 2, 6],
    [0, 2, 3, 6],
    [0, 3, 7, 6],
    [0, 7, 4, 6],
    [0, 4, 5, 6],
];

/// A scalar field sampled on a regular grid over `[-1, 1]³`.
pub struct ScalarField {
    values: Vec<f32>,
    resolution: usize,
}

impl ScalarField {
    /// Wraps `resolution³` samples laid out as `x + y*n + z*n²`.
    pub fn new(values: Vec<f32>, resolution: usize) -> Self {
        assert_eq!(values.len(), resolution * resolution * resolution);
        Self { values, resolution }
    }

    #[inline]
    pub fn resolution(&self) -> usize {
        self.resolution
    }

    #[inline]
    fn value(&self, x: u32, y: u32, z: u32) -> f32 {
        let n = self.resolution;
        self.values[x as usize + y as usize * n + z as usize * n * n]
    }

    #[inline]
    fn point_index(&self, x: u32, y: u32, z: u32) -> u32 {
        let n = self.resolution as u32;
        x + y * n + z * n * n
    }

    /// Maps a grid coordinate into `[-1, 1]`.
    #[inline]
    fn position(&self, x: u32, y: u32, z: u32) -> Vec3 {
        let scale = 2.0 / (self.resolution as f32 - 1.0);
        Vec3::new(
            x as f32 * scale - 1.0,
            y as f32 * scale - 1.0,
            z as f32 * scale - 1.0,
        )
    }
}

/// Extracts the `iso` level set of the field as a triangle mesh.
///
/// Returns an empty mesh when the field never crosses the level.
pub fn extract(field: &ScalarField, iso: f32) -> Mesh {
    let n = field.resolution as u32;
    let mut mesh = Mesh::new();
    if n < 2 {
        return mesh;
    }

    // Interpolated vertices keyed by the (sorted) grid edge they sit on.
    let mut edge_vertices: HashMap<(u32, u32), u32> = HashMap::new();

    for z in 0..n - 1 {
        for y in 0..n - 1 {
            for x in 0..n - 1 {
                // Gather cube corners once per cell
                let mut corner_pos = [Vec3::ZERO; 8];
                let mut corner_val = [0f32; 8];
                let mut corner_idx = [0u32; 8];
                for (i, off) in CORNERS.iter().enumerate() {
                    let (cx, cy, cz) = (x + off[0], y + off[1], z + off[2]);
                    corner_pos[i] = field.position(cx, cy, cz);
                    corner_val[i] = field.value(cx, cy, cz);
                    corner_idx[i] = field.point_index(cx, cy, cz);
                }

                for tet in &TETRAHEDRA {
                    march_tetrahedron(
                        &mut mesh,
                        &mut edge_vertices,
                        tet,
                        &corner_pos,
                        &corner_val,
                        &corner_idx,
                        iso,
                    );
                }
            }
        }
    }

    mesh
}

fn march_tetrahedron(
    mesh: &mut Mesh,
    edge_vertices: &mut HashMap<(u32, u32), u32>,
    tet: &[usize; 4],
    corner_pos: &[Vec3; 8],
    corner_val: &[f32; 8],
    corner_idx: &[u32; 8],
    iso: f32,
) {
    let mut inside = [false; 4];
    let mut inside_count = 0;
    for (i, &c) in tet.iter().enumerate() {
        inside[i] = corner_val[c] > iso;
        if inside[i] {
            inside_count += 1;
        }
    }
    if inside_count == 0 || inside_count == 4 {
        return;
    }

    let mut ins: Vec<usize> = Vec::with_capacity(3);
    let mut outs: Vec<usize> = Vec::with_capacity(3);
    for i in 0..4 {
        if inside[i] {
            ins.push(tet[i]);
        } else {
            outs.push(tet[i]);
        }
    }

    // Reference direction from the inside region toward the outside,
    // used to orient every emitted triangle consistently.
    let centroid = |cs: &[usize]| -> Vec3 {
        cs.iter().map(|&c| corner_pos[c]).sum::<Vec3>() / cs.len() as f32
    };
    let outward = centroid(&outs) - centroid(&ins);

    let mut cut = |a: usize, b: usize| -> u32 {
        let key = if corner_idx[a] < corner_idx[b] {
            (corner_idx[a], corner_idx[b])
        } else {
            (corner_idx[b], corner_idx[a])
        };
        *edge_vertices.entry(key).or_insert_with(|| {
            let (va, vb) = (corner_val[a], corner_val[b]);
            let t = if (vb - va).abs() < 1e-12 {
                0.5
            } else {
                ((iso - va) / (vb - va)).clamp(0.0, 1.0)
            };
            mesh.add_vertex(corner_pos[a].lerp(corner_pos[b], t))
        })
    };

    match inside_count {
        1 => {
            let a = ins[0];
            let v0 = cut(a, outs[0]);
            let v1 = cut(a, outs[1]);
            let v2 = cut(a, outs[2]);
            emit_oriented(mesh, v0, v1, v2, outward);
        }
        3 => {
            let a = outs[0];
            let v0 = cut(a, ins[0]);
            let v1 = cut(a, ins[1]);
            let v2 = cut(a, ins[2]);
            emit_oriented(mesh, v0, v1, v2, outward);
        }
        2 => {
            // Quad between the two inside and two outside vertices,
            // split into two triangles along one diagonal.
            let q0 = cut(ins[0], outs[0]);
            let q1 = cut(ins[0], outs[1]);
            let q2 = cut(ins[1], outs[1]);
            let q3 = cut(ins[1], outs[0]);
            emit_oriented(mesh, q0, q1, q2, outward);
            emit_oriented(mesh, q0, q2, q3, outward);
        }
        _ => unreachable!(),
    }
}

/// Adds the triangle with winding such that its normal faces `outward`.
fn emit_oriented(mesh: &mut Mesh, v0: u32, v1: u32, v2: u32, outward: Vec3) {
    if v0 == v1 || v1 == v2 || v0 == v2 {
        return;
    }
    let p0 = mesh.vertices()[v0 as usize];
    let p1 = mesh.vertices()[v1 as usize];
    let p2 = mesh.vertices()[v2 as usize];
    let normal = (p1 - p0).cross(p2 - p0);
    if normal.dot(outward) >= 0.0 {
        mesh.add_face(v0, v1, v2);
    } else {
        mesh.add_face(v0, v2, v1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Field whose iso level 0 is a sphere of the given radius.
    fn sphere_field(resolution: usize, radius: f32) -> ScalarField {
        let mut values = Vec::with_capacity(resolution * resolution * resolution);
        let scale = 2.0 / (resolution as f32 - 1.0);
        for z in 0..resolution {
            for y in 0..resolution {
                for x in 0..resolution {
                    let p = Vec3::new(
                        x as f32 * scale - 1.0,
                        y as f32 * scale - 1.0,
                        z as f32 * scale - 1.0,
                    );
                    values.push(radius - p.length());
                }
            }
        }
        ScalarField::new(values, resolution)
    }

    #[test]
    fn constant_field_yields_empty_mesh() {
        let n = 8;
        let field = ScalarField::new(vec![1.0; n * n * n], n);
        let mesh = extract(&field, 0.0);
        assert!(mesh.is_empty());
    }

    #[test]
    fn sphere_surface_is_nonempty_and_valid() {
        let field = sphere_field(24, 0.6);
        let mesh = extract(&field, 0.0);
        assert!(!mesh.is_empty());
        assert!(mesh.validate());
    }

    #[test]
    fn sphere_vertices_near_radius() {
        let radius = 0.6;
        let field = sphere_field(32, radius);
        let mesh = extract(&field, 0.0);
        // One cell is ~0.065 wide at this resolution; interpolated
        // vertices of a linear-in-radius field land close to the sphere.
        for v in mesh.vertices() {
            assert!((v.length() - radius).abs() < 0.05, "vertex off sphere: {v:?}");
        }
    }

    #[test]
    fn vertices_stay_in_grid_bounds() {
        let field = sphere_field(16, 0.9);
        let mesh = extract(&field, 0.0);
        for v in mesh.vertices() {
            assert!(v.abs().max_element() <= 1.0 + 1e-6);
        }
    }

    #[test]
    fn shared_edge_vertices_are_deduplicated() {
        let field = sphere_field(16, 0.6);
        let mesh = extract(&field, 0.0);
        // Closed surface from marching tetrahedra: every vertex is shared
        // by several faces, so there are far fewer vertices than face
        // corners.
        assert!(mesh.vertex_count() < mesh.face_count() * 3 / 2);
    }

    #[test]
    fn degenerate_resolution_is_empty() {
        let field = ScalarField::new(vec![1.0], 1);
        assert!(extract(&field, 0.0).is_empty());
    }
}
