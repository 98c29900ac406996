//! Mesh Resource Manager.
//!
//! The static mesh is supplied as a vertex list plus a `u32` index list. Before
//! upload the vertices are deduplicated by exact value and the indices remapped,
//! then both lists are copied into device-local buffers. Replacing the mesh
//! rebuilds both buffers together; they are never partially updated.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytemuck::{Pod, Zeroable};
use field_rhi::buffer::{BufferUsage, StagedBuffer};
use field_rhi::gpu::{Gpu, MeshDraw, QueueRole};
use field_rhi::vertex::{VertexInput, vec3_attribute};
use field_rhi::vk;
use glam::Vec3;
use tracing::debug;

use crate::error::{EngineError, EngineResult};

/// Mesh vertex with a position and a colour.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: Vec3,
    pub color: Vec3,
}

impl Vertex {
    pub const fn new(position: Vec3, color: Vec3) -> Self {
        Self { position, color }
    }

    /// Bit pattern of all six components with `-0.0` folded into `0.0`, so
    /// vertices that compare equal share a key.
    fn key(&self) -> [u32; 6] {
        let components: [f32; 6] = bytemuck::cast(*self);
        components.map(|c| if c == 0.0 { 0 } else { c.to_bits() })
    }
}

impl VertexInput for Vertex {
    fn attribute_descriptions() -> Vec<vk::VertexInputAttributeDescription> {
        vec![
            vec3_attribute(0, std::mem::offset_of!(Vertex, position) as u32),
            vec3_attribute(1, std::mem::offset_of!(Vertex, color) as u32),
        ]
    }
}

/// Deduplicated mesh contents, ready for upload.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MeshData {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
}

impl MeshData {
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

/// Collapses equal vertices and rewrites `indices` to point into the result.
///
/// Vertices are visited in index order, so the output lists first occurrences
/// in the order they are referenced and drops vertices no index uses.
///
/// # Errors
///
/// Returns [`EngineError::InvalidMesh`] if an index is out of range.
pub fn deduplicate(vertices: &[Vertex], indices: &[u32]) -> EngineResult<MeshData> {
    let mut unique: HashMap<[u32; 6], u32> = HashMap::with_capacity(vertices.len());
    let mut mesh = MeshData {
        vertices: Vec::with_capacity(vertices.len()),
        indices: Vec::with_capacity(indices.len()),
    };

    for &index in indices {
        let vertex = vertices
            .get(index as usize)
            .ok_or(EngineError::InvalidMesh {
                index,
                vertex_count: vertices.len(),
            })?;

        let remapped = *unique.entry(vertex.key()).or_insert_with(|| {
            mesh.vertices.push(*vertex);
            (mesh.vertices.len() - 1) as u32
        });
        mesh.indices.push(remapped);
    }

    debug!(
        "Deduplicated mesh: {} -> {} vertices, {} indices",
        vertices.len(),
        mesh.vertices.len(),
        mesh.indices.len()
    );
    Ok(mesh)
}

/// Device-local vertex and index buffers for one mesh.
pub struct MeshBuffers<G: Gpu> {
    vertex_buffer: StagedBuffer<G>,
    index_buffer: StagedBuffer<G>,
    index_count: u32,
}

impl<G: Gpu> MeshBuffers<G> {
    /// Uploads `mesh` through staging buffers on the graphics queue, waiting
    /// up to `timeout` for each copy.
    ///
    /// Returns `None` for an empty mesh; there is nothing to draw.
    pub fn upload(
        gpu: &Arc<G>,
        mesh: &MeshData,
        timeout: Duration,
    ) -> EngineResult<Option<Self>> {
        if mesh.is_empty() {
            return Ok(None);
        }

        let vertex_buffer = StagedBuffer::device_resident(
            gpu.clone(),
            bytemuck::cast_slice(&mesh.vertices),
            BufferUsage::Vertex,
            QueueRole::Graphics,
            timeout,
        )
        .map_err(|e| EngineError::creation("mesh vertex buffer", e))?;

        let index_buffer = StagedBuffer::device_resident(
            gpu.clone(),
            bytemuck::cast_slice(&mesh.indices),
            BufferUsage::Index,
            QueueRole::Graphics,
            timeout,
        )
        .map_err(|e| EngineError::creation("mesh index buffer", e))?;

        debug!(
            "Uploaded mesh: {} vertices, {} indices",
            mesh.vertices.len(),
            mesh.indices.len()
        );

        Ok(Some(Self {
            vertex_buffer,
            index_buffer,
            index_count: mesh.indices.len() as u32,
        }))
    }

    /// Draw parameters for the graphics pass.
    pub fn draw(&self) -> MeshDraw {
        MeshDraw {
            vertex_buffer: self.vertex_buffer.handle(),
            index_buffer: self.index_buffer.handle(),
            index_count: self.index_count,
        }
    }

    #[inline]
    pub fn index_count(&self) -> u32 {
        self.index_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: Vertex = Vertex::new(Vec3::new(0.0, 0.0, 0.0), Vec3::new(1.0, 0.0, 0.0));
    const B: Vertex = Vertex::new(Vec3::new(1.0, 0.0, 0.0), Vec3::new(0.0, 1.0, 0.0));
    const C: Vertex = Vertex::new(Vec3::new(0.0, 1.0, 0.0), Vec3::new(0.0, 0.0, 1.0));

    #[test]
    fn test_duplicate_vertices_collapse() {
        let mesh = deduplicate(&[A, A, B], &[0, 1, 2]).unwrap();
        assert_eq!(mesh.vertices, vec![A, B]);
        assert_eq!(mesh.indices, vec![0, 0, 1]);
    }

    #[test]
    fn test_shared_corners_of_a_quad() {
        // Two triangles listed with their corners repeated.
        let vertices = [A, B, C, C, B, A];
        let mesh = deduplicate(&vertices, &[0, 1, 2, 3, 4, 5]).unwrap();
        assert_eq!(mesh.vertices, vec![A, B, C]);
        assert_eq!(mesh.indices, vec![0, 1, 2, 2, 1, 0]);
    }

    #[test]
    fn test_unreferenced_vertices_are_dropped() {
        let mesh = deduplicate(&[A, B, C], &[2, 2]).unwrap();
        assert_eq!(mesh.vertices, vec![C]);
        assert_eq!(mesh.indices, vec![0, 0]);
    }

    #[test]
    fn test_signed_zeros_collapse() {
        let negative = Vertex::new(Vec3::new(-0.0, 0.0, -0.0), A.color);
        assert_eq!(negative, A);

        let mesh = deduplicate(&[A, negative], &[0, 1]).unwrap();
        assert_eq!(mesh.vertices.len(), 1);
        assert_eq!(mesh.indices, vec![0, 0]);
    }

    #[test]
    fn test_colour_distinguishes_vertices() {
        let tinted = Vertex::new(A.position, Vec3::ONE);
        let mesh = deduplicate(&[A, tinted], &[0, 1]).unwrap();
        assert_eq!(mesh.vertices.len(), 2);
    }

    #[test]
    fn test_out_of_range_index_is_rejected() {
        let err = deduplicate(&[A], &[0, 1, 2]).unwrap_err();
        assert!(matches!(
            err,
            EngineError::InvalidMesh {
                index: 1,
                vertex_count: 1
            }
        ));
    }

    #[test]
    fn test_vertex_layout() {
        assert_eq!(std::mem::size_of::<Vertex>(), 24);
        let attributes = Vertex::attribute_descriptions();
        assert_eq!(attributes[1].offset, 12);
    }

    #[test]
    fn test_upload_creates_device_buffers() {
        use field_rhi::mock::MockGpu;

        let gpu = Arc::new(MockGpu::new());
        let mesh = deduplicate(&[A, B, C], &[0, 1, 2]).unwrap();
        let buffers = MeshBuffers::upload(&gpu, &mesh, Duration::MAX).unwrap().unwrap();

        let draw = buffers.draw();
        assert_eq!(draw.index_count, 3);
        let indices = gpu.memory_contents(draw.index_buffer).unwrap();
        assert_eq!(indices, bytemuck::cast_slice::<u32, u8>(&[0, 1, 2]));
        assert_eq!(gpu.stats().copies, 2);

        assert!(MeshBuffers::upload(&gpu, &MeshData::default(), Duration::MAX)
            .unwrap()
            .is_none());
    }
}
