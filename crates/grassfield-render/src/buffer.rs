//! wgpu buffer helpers.

use wgpu::util::DeviceExt;

use crate::backend::BufferKind;
use crate::error::{RenderError, RenderResult};

/// Usage flags for each buffer role.
#[must_use]
pub fn usage_for(kind: BufferKind) -> wgpu::BufferUsages {
    match kind {
        BufferKind::Positions | BufferKind::VisibleCells => {
            wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST
        }
        BufferKind::VisibleInstances => {
            wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::COPY_SRC
        }
        BufferKind::DrawArgs => {
            wgpu::BufferUsages::INDIRECT | wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::COPY_SRC
        }
    }
}

/// Whether `kind` is bound whole as a storage buffer by the fine cull or the draw.
#[must_use]
pub fn is_storage(kind: BufferKind) -> bool {
    matches!(
        kind,
        BufferKind::Positions | BufferKind::VisibleInstances | BufferKind::VisibleCells
    )
}

/// Size actually allocated for a request of `size` bytes: a non-zero
/// multiple of four, so the buffer can be copied and bound.
#[must_use]
pub fn allocation_size(size: u64) -> u64 {
    size.max(4).next_multiple_of(4)
}

/// Checks that a `kind` buffer of `size` bytes fits the device limits.
///
/// Storage buffers must also fit a single binding, since the fine cull and
/// the draw bind them whole.
pub fn check_buffer_size(kind: BufferKind, size: u64, limits: &wgpu::Limits) -> RenderResult<()> {
    let size = allocation_size(size);
    if size > limits.max_buffer_size {
        return Err(RenderError::BufferCreationFailed(format!(
            "{} needs {size} bytes, device buffer limit is {}",
            kind.label(),
            limits.max_buffer_size
        )));
    }
    let max_binding = u64::from(limits.max_storage_buffer_binding_size);
    if is_storage(kind) && size > max_binding {
        return Err(RenderError::BufferCreationFailed(format!(
            "{} needs {size} bytes, device storage binding limit is {max_binding}",
            kind.label()
        )));
    }
    Ok(())
}

/// Creates a zeroed buffer for `kind`, sized by [`allocation_size`].
pub fn create_sized_buffer(device: &wgpu::Device, kind: BufferKind, size: u64) -> wgpu::Buffer {
    device.create_buffer(&wgpu::BufferDescriptor {
        label: Some(kind.label()),
        size: allocation_size(size),
        usage: usage_for(kind),
        mapped_at_creation: false,
    })
}

/// Creates a vertex buffer from data.
pub fn create_vertex_buffer<T: bytemuck::Pod>(
    device: &wgpu::Device,
    data: &[T],
    label: Option<&str>,
) -> wgpu::Buffer {
    device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label,
        contents: bytemuck::cast_slice(data),
        usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
    })
}

/// Creates an index buffer from data.
pub fn create_index_buffer(
    device: &wgpu::Device,
    data: &[u32],
    label: Option<&str>,
) -> wgpu::Buffer {
    device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label,
        contents: bytemuck::cast_slice(data),
        usage: wgpu::BufferUsages::INDEX | wgpu::BufferUsages::COPY_DST,
    })
}

/// Creates a uniform buffer from data.
pub fn create_uniform_buffer<T: bytemuck::Pod>(
    device: &wgpu::Device,
    data: &T,
    label: Option<&str>,
) -> wgpu::Buffer {
    device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label,
        contents: bytemuck::bytes_of(data),
        usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
    })
}

/// Creates a mappable buffer for reading back `size` bytes.
pub fn create_readback_buffer(device: &wgpu::Device, size: u64, label: Option<&str>) -> wgpu::Buffer {
    device.create_buffer(&wgpu::BufferDescriptor {
        label,
        size,
        usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    })
}
