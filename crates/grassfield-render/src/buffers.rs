//! Ownership and lifecycle of the four buffers behind the indirect draw.

use grassfield_core::InstancePositions;

use crate::backend::{BufferKind, DrawBindings, FineCullBindings, GpuBackend};
use crate::error::RenderResult;
use crate::mesh::MeshProvider;
use crate::uniforms::{DrawIndexedArgs, GpuPosition, APPEND_COUNTER_SIZE};

/// Buffers sized from the instance count.
pub struct InstanceBuffers<T> {
    pub positions: T,
    pub visible_instances: T,
    pub draw_args: T,
    instance_count: u32,
}

impl<T> InstanceBuffers<T> {
    /// Instance count the buffers were sized for.
    #[must_use]
    pub fn instance_count(&self) -> u32 {
        self.instance_count
    }
}

/// Inputs the instance buffers were last built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct AppliedKey {
    version: u64,
    instance_count: u32,
}

/// Owns the GPU buffers and reallocates them only when their inputs change.
///
/// The instance buffers are keyed on the position store's version and
/// instance count. The visible-cell buffer is rebuilt on every frame that
/// has at least one visible cell.
pub struct GpuBufferManager<B: GpuBackend> {
    instance: Option<InstanceBuffers<B::Buffer>>,
    visible_cells: Option<B::Buffer>,
    visible_cell_count: u32,
    applied: Option<AppliedKey>,
    allocation_count: u64,
    visible_cell_allocations: u64,
}

impl<B: GpuBackend> Default for GpuBufferManager<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: GpuBackend> GpuBufferManager<B> {
    /// Creates a manager that owns no buffers.
    #[must_use]
    pub fn new() -> Self {
        Self {
            instance: None,
            visible_cells: None,
            visible_cell_count: 0,
            applied: None,
            allocation_count: 0,
            visible_cell_allocations: 0,
        }
    }

    /// Makes sure the instance buffers match `positions` at `version`.
    ///
    /// Returns `true` when buffers were (re)allocated. Reallocation uploads
    /// every position and fills the static draw arguments from `mesh`.
    pub fn ensure_buffers_for(
        &mut self,
        backend: &mut B,
        version: u64,
        positions: &InstancePositions,
        mesh: &dyn MeshProvider,
    ) -> RenderResult<bool> {
        let key = AppliedKey {
            version,
            instance_count: positions.len() as u32,
        };
        if self.applied == Some(key) && self.instance.is_some() {
            return Ok(false);
        }

        self.release_instance_buffers(backend);
        backend.upload_mesh(mesh)?;

        let buffers = Self::create_instance_buffers(backend, key.instance_count)?;

        let gpu_positions: Vec<GpuPosition> = positions
            .positions()
            .iter()
            .copied()
            .map(GpuPosition::from)
            .collect();
        backend.write_buffer(&buffers.positions, 0, bytemuck::cast_slice(&gpu_positions));

        let args = DrawIndexedArgs {
            index_count: mesh.index_count(),
            instance_count: key.instance_count,
            first_index: mesh.index_start(),
            base_vertex: mesh.base_vertex(),
            first_instance: 0,
        };
        backend.write_buffer(&buffers.draw_args, 0, bytemuck::bytes_of(&args));

        self.instance = Some(buffers);
        self.applied = Some(key);
        self.allocation_count += 1;

        log::debug!(
            "allocated instance buffers for {} instances (allocation #{})",
            key.instance_count,
            self.allocation_count
        );
        Ok(true)
    }

    /// Replaces the visible-cell buffer with `cells`.
    ///
    /// An empty list leaves the previous buffer in place; it is not read
    /// because the fine cull is skipped.
    pub fn upload_visible_cells(&mut self, backend: &mut B, cells: &[u32]) -> RenderResult<()> {
        self.visible_cell_count = cells.len() as u32;
        if cells.is_empty() {
            return Ok(());
        }

        if let Some(old) = self.visible_cells.take() {
            backend.release_buffer(old);
        }
        let buffer = backend.create_buffer(
            BufferKind::VisibleCells,
            std::mem::size_of_val(cells) as u64,
        )?;
        backend.write_buffer(&buffer, 0, bytemuck::cast_slice(cells));
        self.visible_cells = Some(buffer);
        self.visible_cell_allocations += 1;
        Ok(())
    }

    /// Forces the next [`GpuBufferManager::ensure_buffers_for`] to reallocate.
    pub fn invalidate(&mut self) {
        self.applied = None;
    }

    /// Releases every buffer.
    pub fn release_all(&mut self, backend: &mut B) {
        self.release_instance_buffers(backend);
        if let Some(cells) = self.visible_cells.take() {
            backend.release_buffer(cells);
        }
        self.visible_cell_count = 0;
        self.applied = None;
    }

    /// Creates the three instance-sized buffers, releasing any already
    /// created if a later one fails.
    fn create_instance_buffers(
        backend: &mut B,
        instance_count: u32,
    ) -> RenderResult<InstanceBuffers<B::Buffer>> {
        let count = u64::from(instance_count);
        let positions = backend.create_buffer(
            BufferKind::Positions,
            count * std::mem::size_of::<GpuPosition>() as u64,
        )?;

        let visible_instances = match backend.create_buffer(
            BufferKind::VisibleInstances,
            APPEND_COUNTER_SIZE + count * std::mem::size_of::<u32>() as u64,
        ) {
            Ok(buffer) => buffer,
            Err(e) => {
                backend.release_buffer(positions);
                return Err(e);
            }
        };

        let draw_args = match backend.create_buffer(
            BufferKind::DrawArgs,
            std::mem::size_of::<DrawIndexedArgs>() as u64,
        ) {
            Ok(buffer) => buffer,
            Err(e) => {
                backend.release_buffer(positions);
                backend.release_buffer(visible_instances);
                return Err(e);
            }
        };

        Ok(InstanceBuffers {
            positions,
            visible_instances,
            draw_args,
            instance_count,
        })
    }

    fn release_instance_buffers(&mut self, backend: &mut B) {
        if let Some(buffers) = self.instance.take() {
            backend.release_buffer(buffers.positions);
            backend.release_buffer(buffers.visible_instances);
            backend.release_buffer(buffers.draw_args);
        }
    }

    /// The instance buffers, if allocated.
    #[must_use]
    pub fn instance_buffers(&self) -> Option<&InstanceBuffers<B::Buffer>> {
        self.instance.as_ref()
    }

    /// Whether the instance buffers exist.
    #[must_use]
    pub fn is_allocated(&self) -> bool {
        self.instance.is_some()
    }

    /// Number of cells uploaded for the current frame.
    #[must_use]
    pub fn visible_cell_count(&self) -> u32 {
        self.visible_cell_count
    }

    /// How many times the instance buffers have been allocated.
    #[must_use]
    pub fn allocation_count(&self) -> u64 {
        self.allocation_count
    }

    /// How many times the visible-cell buffer has been allocated.
    #[must_use]
    pub fn visible_cell_allocations(&self) -> u64 {
        self.visible_cell_allocations
    }

    /// Bindings for the fine cull, when this frame has visible cells.
    #[must_use]
    pub fn fine_cull_bindings(&self) -> Option<FineCullBindings<'_, B::Buffer>> {
        if self.visible_cell_count == 0 {
            return None;
        }
        let instance = self.instance.as_ref()?;
        Some(FineCullBindings {
            positions: &instance.positions,
            visible_cells: self.visible_cells.as_ref()?,
            visible_instances: &instance.visible_instances,
        })
    }

    /// Bindings for the indirect draw.
    #[must_use]
    pub fn draw_bindings(&self) -> Option<DrawBindings<'_, B::Buffer>> {
        let instance = self.instance.as_ref()?;
        Some(DrawBindings {
            positions: &instance.positions,
            visible_instances: &instance.visible_instances,
            draw_args: &instance.draw_args,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RenderError;
    use crate::mesh::{BladeMesh, IndexedMesh};
    use crate::software::SoftwareBackend;
    use grassfield_core::{Options, Vec3};

    fn small_positions(instance_count: u32) -> InstancePositions {
        let options = Options {
            instance_count,
            cell_size: 2.0,
            ..Options::default()
        };
        InstancePositions::from_options(&options).unwrap().1
    }

    #[test]
    fn test_ensure_is_idempotent() {
        let mut backend = SoftwareBackend::new();
        let mut manager = GpuBufferManager::new();
        let positions = small_positions(1600);
        let mesh = BladeMesh::new();

        assert!(manager.ensure_buffers_for(&mut backend, 1, &positions, &mesh).unwrap());
        for _ in 0..5 {
            assert!(!manager.ensure_buffers_for(&mut backend, 1, &positions, &mesh).unwrap());
        }
        assert_eq!(manager.allocation_count(), 1);
        assert_eq!(backend.allocations(), 3);
    }

    #[test]
    fn test_reallocates_on_new_version() {
        let mut backend = SoftwareBackend::new();
        let mut manager = GpuBufferManager::new();
        let mesh = BladeMesh::new();

        manager
            .ensure_buffers_for(&mut backend, 1, &small_positions(1600), &mesh)
            .unwrap();
        assert!(manager
            .ensure_buffers_for(&mut backend, 2, &small_positions(6400), &mesh)
            .unwrap());
        assert_eq!(manager.allocation_count(), 2);
        assert_eq!(backend.releases(), 3);
        assert_eq!(backend.live_buffers(), 3);
    }

    #[test]
    fn test_static_draw_args() {
        let mut backend = SoftwareBackend::new();
        let mut manager = GpuBufferManager::new();
        let positions = small_positions(1600);
        manager
            .ensure_buffers_for(&mut backend, 1, &positions, &BladeMesh::new())
            .unwrap();

        let buffers = manager.instance_buffers().unwrap();
        let args = backend.read_draw_args(&buffers.draw_args).unwrap();
        assert_eq!(args.index_count, 3);
        assert_eq!(args.instance_count, positions.len() as u32);
        assert_eq!(args.first_index, 0);
        assert_eq!(args.base_vertex, 0);
        assert_eq!(args.first_instance, 0);
    }

    #[test]
    fn test_draw_args_sourced_from_mesh() {
        let mut backend = SoftwareBackend::new();
        let mut manager = GpuBufferManager::new();
        let positions = small_positions(1600);
        let mesh = IndexedMesh {
            vertices: vec![Vec3::ZERO; 8],
            indices: vec![0, 1, 2, 2, 1, 3, 0, 1, 2, 0, 2, 3],
            index_start: 6,
            base_vertex: 4,
        };
        manager
            .ensure_buffers_for(&mut backend, 1, &positions, &mesh)
            .unwrap();

        let buffers = manager.instance_buffers().unwrap();
        let args = backend.read_draw_args(&buffers.draw_args).unwrap();
        assert_eq!(args.index_count, 6);
        assert_eq!(args.first_index, 6);
        assert_eq!(args.base_vertex, 4);
        assert_eq!(args.first_instance, 0);
    }

    #[test]
    fn test_failed_allocation_releases_partial_buffers() {
        let positions = small_positions(1600);
        let mesh = BladeMesh::new();

        for kind in [
            BufferKind::Positions,
            BufferKind::VisibleInstances,
            BufferKind::DrawArgs,
        ] {
            let mut backend = SoftwareBackend::new();
            let mut manager = GpuBufferManager::new();
            backend.refuse_allocations_of(Some(kind));

            let result = manager.ensure_buffers_for(&mut backend, 1, &positions, &mesh);
            assert!(matches!(result, Err(RenderError::BufferCreationFailed(_))), "{kind:?}");
            assert_eq!(backend.live_buffers(), 0, "{kind:?}");
            assert!(!manager.is_allocated());
            assert_eq!(manager.allocation_count(), 0);

            backend.refuse_allocations_of(None);
            assert!(manager.ensure_buffers_for(&mut backend, 1, &positions, &mesh).unwrap());
            assert_eq!(backend.live_buffers(), 3);
        }
    }

    #[test]
    fn test_empty_mesh_allocates_nothing() {
        let mut backend = SoftwareBackend::new();
        let mut manager = GpuBufferManager::new();
        let result =
            manager.ensure_buffers_for(&mut backend, 1, &small_positions(1600), &IndexedMesh::default());
        assert!(result.is_err());
        assert_eq!(backend.allocations(), 0);
    }

    #[test]
    fn test_visible_cells_reallocated_per_frame() {
        let mut backend = SoftwareBackend::new();
        let mut manager: GpuBufferManager<SoftwareBackend> = GpuBufferManager::new();

        manager.upload_visible_cells(&mut backend, &[1, 2, 3]).unwrap();
        manager.upload_visible_cells(&mut backend, &[4, 5]).unwrap();
        assert_eq!(manager.visible_cell_allocations(), 2);
        assert_eq!(manager.visible_cell_count(), 2);

        manager.upload_visible_cells(&mut backend, &[]).unwrap();
        assert_eq!(manager.visible_cell_allocations(), 2);
        assert_eq!(manager.visible_cell_count(), 0);
        assert!(manager.fine_cull_bindings().is_none());
    }

    #[test]
    fn test_invalidate_and_release() {
        let mut backend = SoftwareBackend::new();
        let mut manager = GpuBufferManager::new();
        let positions = small_positions(1600);
        let mesh = BladeMesh::new();

        manager.ensure_buffers_for(&mut backend, 1, &positions, &mesh).unwrap();
        manager.invalidate();
        assert!(manager.ensure_buffers_for(&mut backend, 1, &positions, &mesh).unwrap());

        manager.upload_visible_cells(&mut backend, &[0]).unwrap();
        manager.release_all(&mut backend);
        assert!(!manager.is_allocated());
        assert_eq!(backend.live_buffers(), 0);
    }
}
