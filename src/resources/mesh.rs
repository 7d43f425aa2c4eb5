//! Mesh geometry and OBJ decoding

use std::path::Path;

use bytemuck::{Pod, Zeroable};
use glam::{Vec2, Vec3};

use crate::backend::types::{VertexAttribute, VertexBufferLayout, VertexFormat, VertexStepMode};
use crate::error::{RendererError, RendererResult};

/// Mesh vertex with a full tangent frame
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: Vec3,
    pub normal: Vec3,
    pub tangent: Vec3,
    pub bitangent: Vec3,
    pub texcoord: Vec2,
}

impl Vertex {
    /// Five tightly packed attributes at locations 0..=4, only the texcoord is two-component
    pub fn layout() -> VertexBufferLayout {
        let formats = [
            VertexFormat::Float32x3,
            VertexFormat::Float32x3,
            VertexFormat::Float32x3,
            VertexFormat::Float32x3,
            VertexFormat::Float32x2,
        ];
        let mut offset = 0;
        let attributes = formats
            .iter()
            .enumerate()
            .map(|(location, &format)| {
                let attribute = VertexAttribute {
                    location: location as u32,
                    format,
                    offset,
                };
                offset += format.size();
                attribute
            })
            .collect();

        VertexBufferLayout {
            array_stride: std::mem::size_of::<Self>() as u64,
            step_mode: VertexStepMode::Vertex,
            attributes,
        }
    }
}

/// Triangle as three vertex indices
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct Face {
    pub v1: u32,
    pub v2: u32,
    pub v3: u32,
}

/// Decoded triangle mesh
#[derive(Debug, Clone, Default)]
pub struct MeshData {
    pub vertices: Vec<Vertex>,
    pub faces: Vec<Face>,
}

impl MeshData {
    /// Load every object of an OBJ file into one mesh
    pub fn from_file<P: AsRef<Path>>(path: P) -> RendererResult<Self> {
        let path = path.as_ref();
        let (models, _materials) = tobj::load_obj(
            path,
            &tobj::LoadOptions {
                single_index: true,
                triangulate: true,
                ..Default::default()
            },
        )
        .map_err(|source| RendererError::MeshLoad {
            path: path.to_path_buf(),
            source,
        })?;

        let mut data = MeshData::default();
        for model in &models {
            data.append(&model.mesh);
        }
        if data.faces.is_empty() {
            return Err(RendererError::EmptyMesh(path.to_path_buf()));
        }

        log::debug!(
            "Loaded mesh {} ({} vertices, {} faces)",
            path.display(),
            data.vertices.len(),
            data.faces.len()
        );
        Ok(data)
    }

    fn append(&mut self, mesh: &tobj::Mesh) {
        let base = self.vertices.len();
        let vertex_count = mesh.positions.len() / 3;
        let has_normals = mesh.normals.len() == mesh.positions.len();
        let has_texcoords = mesh.texcoords.len() / 2 == vertex_count;

        for i in 0..vertex_count {
            let position = Vec3::from_slice(&mesh.positions[3 * i..3 * i + 3]);
            let normal = if has_normals {
                Vec3::from_slice(&mesh.normals[3 * i..3 * i + 3])
            } else {
                Vec3::ZERO
            };
            let texcoord = if has_texcoords {
                Vec2::from_slice(&mesh.texcoords[2 * i..2 * i + 2])
            } else {
                Vec2::ZERO
            };
            self.vertices.push(Vertex {
                position,
                normal,
                tangent: Vec3::ZERO,
                bitangent: Vec3::ZERO,
                texcoord,
            });
        }

        let base_index = base as u32;
        let faces: Vec<Face> = mesh
            .indices
            .chunks_exact(3)
            .map(|tri| Face {
                v1: base_index + tri[0],
                v2: base_index + tri[1],
                v3: base_index + tri[2],
            })
            .collect();

        if !has_normals {
            accumulate_normals(&mut self.vertices[base..], &faces, base_index);
        }
        compute_tangent_space(&mut self.vertices[base..], &faces, base_index);
        self.faces.extend(faces);
    }

    /// Number of indices an indexed draw consumes
    pub fn element_count(&self) -> u32 {
        self.faces.len() as u32 * 3
    }
}

fn accumulate_normals(vertices: &mut [Vertex], faces: &[Face], base: u32) {
    for face in faces {
        let [a, b, c] = [face.v1 - base, face.v2 - base, face.v3 - base].map(|i| i as usize);
        let n = (vertices[b].position - vertices[a].position)
            .cross(vertices[c].position - vertices[a].position);
        for i in [a, b, c] {
            vertices[i].normal += n;
        }
    }
    for v in vertices.iter_mut() {
        v.normal = v.normal.normalize_or_zero();
    }
}

/// Per-vertex tangent and bitangent from texture coordinate derivatives,
/// orthogonalized against the normal
fn compute_tangent_space(vertices: &mut [Vertex], faces: &[Face], base: u32) {
    for face in faces {
        let [a, b, c] = [face.v1 - base, face.v2 - base, face.v3 - base].map(|i| i as usize);
        let e1 = vertices[b].position - vertices[a].position;
        let e2 = vertices[c].position - vertices[a].position;
        let d1 = vertices[b].texcoord - vertices[a].texcoord;
        let d2 = vertices[c].texcoord - vertices[a].texcoord;

        let det = d1.x * d2.y - d2.x * d1.y;
        if det.abs() <= f32::EPSILON {
            continue;
        }
        let r = 1.0 / det;
        let tangent = (e1 * d2.y - e2 * d1.y) * r;
        let bitangent = (e2 * d1.x - e1 * d2.x) * r;
        for i in [a, b, c] {
            vertices[i].tangent += tangent;
            vertices[i].bitangent += bitangent;
        }
    }

    for v in vertices.iter_mut() {
        let n = v.normal;
        let t = v.tangent - n * n.dot(v.tangent);
        if t.length_squared() > f32::EPSILON {
            v.tangent = t.normalize();
            let b = n.cross(v.tangent);
            // Keep the handedness of the UV mapping
            v.bitangent = if b.dot(v.bitangent) < 0.0 { -b } else { b };
        } else {
            // No usable UVs: any frame around the normal
            let reference = if n.x.abs() < 0.9 { Vec3::X } else { Vec3::Y };
            v.tangent = reference.cross(n).normalize_or_zero();
            v.bitangent = n.cross(v.tangent);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vertex_layout_is_tightly_packed() {
        let layout = Vertex::layout();
        assert_eq!(layout.array_stride, 56);
        assert_eq!(layout.attributes.len(), 5);
        for (i, attr) in layout.attributes.iter().enumerate() {
            assert_eq!(attr.location, i as u32);
            assert_eq!(attr.offset, 12 * i as u64);
        }
        assert_eq!(layout.attributes[4].format, VertexFormat::Float32x2);
        assert!(layout.attributes[..4]
            .iter()
            .all(|a| a.format == VertexFormat::Float32x3));
    }

    #[test]
    fn test_face_is_three_indices() {
        assert_eq!(std::mem::size_of::<Face>(), 12);
        let faces = [Face { v1: 0, v2: 1, v3: 2 }];
        let indices: &[u32] = bytemuck::cast_slice(&faces);
        assert_eq!(indices, &[0, 1, 2]);
    }

    #[test]
    fn test_tangent_frame_follows_uvs() {
        let mut vertices = vec![
            Vertex {
                position: Vec3::ZERO,
                normal: Vec3::Z,
                tangent: Vec3::ZERO,
                bitangent: Vec3::ZERO,
                texcoord: Vec2::new(0.0, 0.0),
            };
            3
        ];
        vertices[1].position = Vec3::X;
        vertices[1].texcoord = Vec2::new(1.0, 0.0);
        vertices[2].position = Vec3::Y;
        vertices[2].texcoord = Vec2::new(0.0, 1.0);

        compute_tangent_space(&mut vertices, &[Face { v1: 0, v2: 1, v3: 2 }], 0);
        for v in &vertices {
            assert!((v.tangent - Vec3::X).length() < 1e-5);
            assert!((v.bitangent - Vec3::Y).length() < 1e-5);
        }
    }

    #[test]
    fn test_missing_mesh_file_names_path() {
        let err = MeshData::from_file("missing/model.obj").unwrap_err();
        assert!(matches!(err, RendererError::MeshLoad { .. }));
        assert!(err.to_string().contains("missing/model.obj"));
    }
}
