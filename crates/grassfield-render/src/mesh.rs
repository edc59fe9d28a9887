//! Instance mesh supplied to the indirect draw.

use glam::Vec3;

/// Source of the single mesh drawn once per visible instance.
///
/// The static fields of the indirect draw arguments come from submesh 0:
/// its index count, first index and base vertex.
pub trait MeshProvider {
    /// Object-space vertex positions.
    fn vertices(&self) -> &[Vec3];

    /// Index buffer. Submesh 0 starts at [`MeshProvider::index_start`].
    fn indices(&self) -> &[u32];

    /// Number of indices drawn per instance.
    fn index_count(&self) -> u32 {
        (self.indices().len() as u32).saturating_sub(self.index_start())
    }

    /// First index of submesh 0.
    fn index_start(&self) -> u32 {
        0
    }

    /// Value added to every index of submesh 0.
    fn base_vertex(&self) -> i32 {
        0
    }
}

/// A single-triangle grass blade, half a unit wide and one unit tall.
#[derive(Debug, Clone)]
pub struct BladeMesh {
    vertices: [Vec3; 3],
    indices: [u32; 3],
}

impl BladeMesh {
    /// Creates the default blade.
    #[must_use]
    pub fn new() -> Self {
        Self {
            vertices: [
                Vec3::new(-0.25, 0.0, 0.0),
                Vec3::new(0.25, 0.0, 0.0),
                Vec3::new(0.0, 1.0, 0.0),
            ],
            // Wound so the blade faces the default camera.
            indices: [2, 1, 0],
        }
    }
}

impl Default for BladeMesh {
    fn default() -> Self {
        Self::new()
    }
}

impl MeshProvider for BladeMesh {
    fn vertices(&self) -> &[Vec3] {
        &self.vertices
    }

    fn indices(&self) -> &[u32] {
        &self.indices
    }
}

/// An arbitrary indexed mesh whose drawn range may start inside shared
/// index and vertex buffers.
#[derive(Debug, Clone, Default)]
pub struct IndexedMesh {
    pub vertices: Vec<Vec3>,
    pub indices: Vec<u32>,
    pub index_start: u32,
    pub base_vertex: i32,
}

impl MeshProvider for IndexedMesh {
    fn vertices(&self) -> &[Vec3] {
        &self.vertices
    }

    fn indices(&self) -> &[u32] {
        &self.indices
    }

    fn index_start(&self) -> u32 {
        self.index_start
    }

    fn base_vertex(&self) -> i32 {
        self.base_vertex
    }
}
