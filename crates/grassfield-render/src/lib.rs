//! GPU side of grassfield.
//!
//! This crate provides:
//! - [`GpuBufferManager`], which owns the position, append, visible-cell and
//!   draw-argument buffers and reallocates them only when their inputs change
//! - the [`GpuBackend`] command interface, with a wgpu implementation
//!   ([`WgpuBackend`]) and a host-memory reference ([`SoftwareBackend`])
//! - the fine-cull and grass WGSL programs and their uniform layouts
//! - camera, instance mesh and screenshot helpers

// Documentation lints - internal functions don't need exhaustive panic/error docs
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
// Buffer sizes and counts move between u32, u64 and usize
#![allow(clippy::cast_possible_truncation)]

pub mod backend;
pub mod buffer;
pub mod buffers;
pub mod camera;
pub mod error;
pub mod mesh;
pub mod screenshot;
pub mod shader;
pub mod software;
pub mod uniforms;
pub mod wgpu_backend;

pub use backend::{BufferKind, DrawBindings, FineCullBindings, GpuBackend};
pub use buffers::{GpuBufferManager, InstanceBuffers};
pub use camera::Camera;
pub use error::{RenderError, RenderResult};
pub use mesh::{BladeMesh, IndexedMesh, MeshProvider};
pub use screenshot::{encode_png, save_image, ScreenshotError};
pub use shader::ShaderBuilder;
pub use software::{DrawRecord, SoftwareBackend, SoftwareBuffer};
pub use uniforms::{
    DrawIndexedArgs, FineCullUniforms, GpuPosition, GrassGlobals, APPEND_COUNTER_SIZE,
    FINE_CULL_WORKGROUP_SIZE, INSTANCE_COUNT_OFFSET,
};
pub use wgpu_backend::WgpuBackend;
