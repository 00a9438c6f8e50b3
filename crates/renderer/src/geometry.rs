//! Drawable geometry.
//!
//! A [`Mesh`] owns one host-visible vertex buffer. A [`Model`] is an
//! ordered list of meshes, handed to command recording as a flat list of
//! [`Drawable`]s.

use std::sync::Arc;

use glam::{Vec2, Vec3};
use tracing::debug;

use vkframe_rhi::RhiResult;
use vkframe_rhi::buffer::Buffer;
use vkframe_rhi::command::CommandBuffer;
use vkframe_rhi::device::Device;
use vkframe_rhi::vertex::Vertex;

/// Something that can bind its vertex data and be drawn with one
/// non-indexed draw call.
pub trait Drawable {
    /// Binds this object's vertex data into `cmd`.
    fn bind(&self, cmd: &CommandBuffer);

    fn vertex_count(&self) -> u32;
}

/// A single vertex buffer.
pub struct Mesh {
    /// `None` for a mesh without vertices; zero-sized buffers are invalid.
    vertex_buffer: Option<Buffer>,
    vertex_count: u32,
}

impl Mesh {
    pub fn new(device: Arc<Device>, vertices: &[Vertex]) -> RhiResult<Self> {
        let vertex_buffer = if vertices.is_empty() {
            None
        } else {
            Some(Buffer::new_with_data(
                device,
                bytemuck::cast_slice(vertices),
            )?)
        };

        debug!("Mesh created with {} vertices", vertices.len());

        Ok(Self {
            vertex_buffer,
            vertex_count: vertices.len() as u32,
        })
    }
}

impl Drawable for Mesh {
    fn bind(&self, cmd: &CommandBuffer) {
        if let Some(buffer) = &self.vertex_buffer {
            cmd.bind_vertex_buffers(0, &[buffer.handle()], &[0]);
        }
    }

    fn vertex_count(&self) -> u32 {
        self.vertex_count
    }
}

/// Ordered collection of meshes.
#[derive(Default)]
pub struct Model {
    meshes: Vec<Mesh>,
}

impl Model {
    pub fn new() -> Self {
        Self::default()
    }

    /// Uploads `vertices` as a new mesh appended to the model.
    pub fn add_mesh(&mut self, device: Arc<Device>, vertices: &[Vertex]) -> RhiResult<()> {
        self.meshes.push(Mesh::new(device, vertices)?);
        Ok(())
    }

    /// Meshes as drawables, in insertion order.
    pub fn drawables(&self) -> Vec<&dyn Drawable> {
        self.meshes.iter().map(|mesh| mesh as &dyn Drawable).collect()
    }

    pub fn len(&self) -> usize {
        self.meshes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.meshes.is_empty()
    }
}

/// Red, green and blue corners of the demo triangle.
pub fn triangle_vertices() -> [Vertex; 3] {
    [
        Vertex::new(Vec2::new(0.0, -0.5), Vec3::new(1.0, 0.0, 0.0)),
        Vertex::new(Vec2::new(0.5, 0.5), Vec3::new(0.0, 1.0, 0.0)),
        Vertex::new(Vec2::new(-0.5, -0.5), Vec3::new(0.0, 0.0, 1.0)),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_triangle_vertices() {
        let vertices = triangle_vertices();

        assert_eq!(vertices[0].position, Vec2::new(0.0, -0.5));
        assert_eq!(vertices[0].color, Vec3::X);
        assert_eq!(vertices[1].position, Vec2::new(0.5, 0.5));
        assert_eq!(vertices[1].color, Vec3::Y);
        assert_eq!(vertices[2].position, Vec2::new(-0.5, -0.5));
        assert_eq!(vertices[2].color, Vec3::Z);
    }

    #[test]
    fn test_empty_model() {
        let model = Model::new();
        assert!(model.is_empty());
        assert!(model.drawables().is_empty());
    }
}
