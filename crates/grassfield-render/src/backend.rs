//! Command-submission interface between the frame orchestration and a GPU.
//!
//! A backend records commands between [`GpuBackend::begin_frame`] and
//! [`GpuBackend::end_frame`] and must execute them in recording order.
//! Buffer writes issued during a frame are ordered before every command
//! recorded in that frame.

use crate::error::RenderResult;
use crate::mesh::MeshProvider;
use crate::uniforms::{DrawIndexedArgs, FineCullUniforms, GrassGlobals};

/// Role of a GPU buffer, which decides its usage flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferKind {
    /// All instance positions, read by the fine cull and the draw.
    Positions,
    /// Append buffer: a `u32` counter followed by surviving instance ids.
    VisibleInstances,
    /// Visible cell ids for the current frame.
    VisibleCells,
    /// Five-field indexed indirect draw arguments.
    DrawArgs,
}

impl BufferKind {
    /// Debug label.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            BufferKind::Positions => "grass positions",
            BufferKind::VisibleInstances => "grass visible instances",
            BufferKind::VisibleCells => "grass visible cells",
            BufferKind::DrawArgs => "grass draw args",
        }
    }
}

/// Buffers read and written by the fine-cull program.
pub struct FineCullBindings<'a, B> {
    pub positions: &'a B,
    pub visible_cells: &'a B,
    pub visible_instances: &'a B,
}

/// Buffers consumed by the indirect draw.
pub struct DrawBindings<'a, B> {
    pub positions: &'a B,
    pub visible_instances: &'a B,
    pub draw_args: &'a B,
}

/// A device that can run the fine cull and the indirect draw.
pub trait GpuBackend {
    /// Handle to a device buffer.
    type Buffer;

    /// Allocates a zero-initialized buffer of `size` bytes.
    fn create_buffer(&mut self, kind: BufferKind, size: u64) -> RenderResult<Self::Buffer>;

    /// Writes `data` into `buffer` at `offset` bytes.
    fn write_buffer(&mut self, buffer: &Self::Buffer, offset: u64, data: &[u8]);

    /// Releases a buffer. The handle is consumed.
    fn release_buffer(&mut self, buffer: Self::Buffer);

    /// Uploads the mesh drawn once per instance.
    fn upload_mesh(&mut self, mesh: &dyn MeshProvider) -> RenderResult<()>;

    /// Sets the global shader parameters.
    fn set_globals(&mut self, globals: &GrassGlobals);

    /// Starts recording a frame.
    fn begin_frame(&mut self);

    /// Records a reset of the append counter to zero.
    fn reset_counter(&mut self, visible_instances: &Self::Buffer);

    /// Sets the fine-cull parameters used by the next dispatch.
    fn set_fine_cull_params(&mut self, uniforms: &FineCullUniforms);

    /// Records a fine-cull dispatch of `workgroups` work groups.
    fn dispatch_fine_cull(&mut self, bindings: &FineCullBindings<'_, Self::Buffer>, workgroups: u32);

    /// Records a copy of the append counter into `dst` at `dst_offset` bytes.
    fn copy_counter(&mut self, src: &Self::Buffer, dst: &Self::Buffer, dst_offset: u64);

    /// Records one indexed indirect draw.
    fn draw_indexed_indirect(&mut self, bindings: &DrawBindings<'_, Self::Buffer>);

    /// Submits the recorded frame.
    fn end_frame(&mut self) -> RenderResult<()>;

    /// Reads back draw arguments, waiting for submitted work to finish.
    fn read_draw_args(&mut self, draw_args: &Self::Buffer) -> RenderResult<DrawIndexedArgs>;
}
