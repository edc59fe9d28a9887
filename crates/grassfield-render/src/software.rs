//! CPU reference backend.
//!
//! Buffers live in host memory. Commands recorded during a frame are queued
//! and executed in order by [`GpuBackend::end_frame`], and the fine cull runs
//! the same test as `fine_cull.wgsl`.

use std::collections::HashMap;

use crate::backend::{BufferKind, DrawBindings, FineCullBindings, GpuBackend};
use crate::error::{RenderError, RenderResult};
use crate::mesh::MeshProvider;
use crate::uniforms::{
    DrawIndexedArgs, FineCullUniforms, GpuPosition, GrassGlobals, FINE_CULL_WORKGROUP_SIZE,
};

/// Handle to a host-memory buffer.
#[derive(Debug, PartialEq, Eq)]
pub struct SoftwareBuffer {
    id: u64,
}

impl SoftwareBuffer {
    /// Identifier of the allocation.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }
}

struct Allocation {
    kind: BufferKind,
    words: Vec<u32>,
}

enum Command {
    ResetCounter {
        buffer: u64,
    },
    FineCull {
        positions: u64,
        visible_cells: u64,
        visible_instances: u64,
        uniforms: FineCullUniforms,
        workgroups: u32,
    },
    CopyCounter {
        src: u64,
        dst: u64,
        dst_offset: u64,
    },
    Draw {
        draw_args: u64,
    },
}

/// One executed indirect draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrawRecord {
    pub args: DrawIndexedArgs,
    pub frame: u64,
}

/// Host-memory implementation of [`GpuBackend`].
#[derive(Default)]
pub struct SoftwareBackend {
    buffers: HashMap<u64, Allocation>,
    next_id: u64,
    allocations: u64,
    releases: u64,
    pending: Vec<Command>,
    recording: bool,
    frames: u64,
    dispatches: u64,
    globals: GrassGlobals,
    uniforms: Option<FineCullUniforms>,
    mesh_index_count: u32,
    mesh_uploads: u64,
    draws: Vec<DrawRecord>,
    refused: Option<BufferKind>,
}

impl SoftwareBackend {
    /// Creates an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every allocation of `kind` fail, as a device out of memory
    /// would. `None` lifts the restriction.
    pub fn refuse_allocations_of(&mut self, kind: Option<BufferKind>) {
        self.refused = kind;
    }

    /// Total buffers created.
    #[must_use]
    pub fn allocations(&self) -> u64 {
        self.allocations
    }

    /// Total buffers released.
    #[must_use]
    pub fn releases(&self) -> u64 {
        self.releases
    }

    /// Buffers currently alive.
    #[must_use]
    pub fn live_buffers(&self) -> usize {
        self.buffers.len()
    }

    /// Live buffers of one kind.
    #[must_use]
    pub fn live_buffers_of(&self, kind: BufferKind) -> usize {
        self.buffers.values().filter(|a| a.kind == kind).count()
    }

    /// Fine-cull dispatches executed.
    #[must_use]
    pub fn dispatches(&self) -> u64 {
        self.dispatches
    }

    /// Frames submitted.
    #[must_use]
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Every executed draw.
    #[must_use]
    pub fn draws(&self) -> &[DrawRecord] {
        &self.draws
    }

    /// The most recent draw.
    #[must_use]
    pub fn last_draw(&self) -> Option<&DrawRecord> {
        self.draws.last()
    }

    /// Last global parameters written.
    #[must_use]
    pub fn globals(&self) -> &GrassGlobals {
        &self.globals
    }

    /// Index count of the uploaded mesh.
    #[must_use]
    pub fn mesh_index_count(&self) -> u32 {
        self.mesh_index_count
    }

    /// Number of mesh uploads.
    #[must_use]
    pub fn mesh_uploads(&self) -> u64 {
        self.mesh_uploads
    }

    /// Surviving instance ids held in an append buffer, in append order.
    #[must_use]
    pub fn visible_instance_ids(&self, buffer: &SoftwareBuffer) -> Vec<u32> {
        self.buffers
            .get(&buffer.id)
            .map(|a| {
                let count = a.words.first().copied().unwrap_or(0) as usize;
                a.words.iter().skip(1).take(count).copied().collect()
            })
            .unwrap_or_default()
    }

    fn words(&self, id: u64) -> &[u32] {
        self.buffers
            .get(&id)
            .map(|a| a.words.as_slice())
            .unwrap_or(&[])
    }

    fn words_mut(&mut self, id: u64) -> Option<&mut Vec<u32>> {
        self.buffers.get_mut(&id).map(|a| &mut a.words)
    }

    fn record(&mut self, command: Command) {
        if !self.recording {
            log::warn!("command recorded outside a frame; it will run on the next submit");
        }
        self.pending.push(command);
    }

    fn execute(&mut self, command: Command) {
        match command {
            Command::ResetCounter { buffer } => {
                if let Some(first) = self.words_mut(buffer).and_then(|w| w.first_mut()) {
                    *first = 0;
                }
            }
            Command::FineCull {
                positions,
                visible_cells,
                visible_instances,
                uniforms,
                workgroups,
            } => {
                self.dispatches += 1;
                let survivors = {
                    let positions: &[GpuPosition] =
                        bytemuck::try_cast_slice(self.words(positions)).unwrap_or(&[]);
                    let cells = self.words(visible_cells);
                    (0..workgroups * FINE_CULL_WORKGROUP_SIZE)
                        .filter_map(|candidate| uniforms.instance_for_candidate(candidate, cells))
                        .filter(|&instance| {
                            positions
                                .get(instance as usize)
                                .is_some_and(|p| uniforms.keeps(glam::Vec3::from(p.position)))
                        })
                        .collect::<Vec<u32>>()
                };
                if let Some(words) = self.words_mut(visible_instances) {
                    for instance in survivors {
                        let Some(&count) = words.first() else { break };
                        let count = count as usize;
                        if count + 1 >= words.len() {
                            break;
                        }
                        words[count + 1] = instance;
                        words[0] += 1;
                    }
                }
            }
            Command::CopyCounter {
                src,
                dst,
                dst_offset,
            } => {
                let value = self.words(src).first().copied().unwrap_or(0);
                let index = (dst_offset / 4) as usize;
                if let Some(slot) = self.words_mut(dst).and_then(|w| w.get_mut(index)) {
                    *slot = value;
                }
            }
            Command::Draw { draw_args } => {
                if let Some(args) = read_args(self.words(draw_args)) {
                    self.draws.push(DrawRecord {
                        args,
                        frame: self.frames,
                    });
                }
            }
        }
    }
}

fn read_args(words: &[u32]) -> Option<DrawIndexedArgs> {
    let words = words.get(..5)?;
    Some(bytemuck::cast_slice::<u32, DrawIndexedArgs>(words)[0])
}

impl GpuBackend for SoftwareBackend {
    type Buffer = SoftwareBuffer;

    fn create_buffer(&mut self, kind: BufferKind, size: u64) -> RenderResult<SoftwareBuffer> {
        if self.refused == Some(kind) {
            return Err(RenderError::BufferCreationFailed(format!(
                "{} refused ({size} bytes)",
                kind.label()
            )));
        }
        let len = usize::try_from(size.div_ceil(4))
            .map_err(|_| RenderError::BufferCreationFailed(format!("{size} bytes")))?;
        let id = self.next_id;
        self.next_id += 1;
        self.buffers.insert(
            id,
            Allocation {
                kind,
                words: vec![0; len],
            },
        );
        self.allocations += 1;
        Ok(SoftwareBuffer { id })
    }

    fn write_buffer(&mut self, buffer: &SoftwareBuffer, offset: u64, data: &[u8]) {
        let Some(words) = self.words_mut(buffer.id) else {
            log::warn!("write to released buffer {}", buffer.id);
            return;
        };
        let bytes: &mut [u8] = bytemuck::cast_slice_mut(words.as_mut_slice());
        let start = offset as usize;
        match bytes.get_mut(start..start + data.len()) {
            Some(dst) => dst.copy_from_slice(data),
            None => log::warn!(
                "write of {} bytes at {offset} overruns buffer {}",
                data.len(),
                buffer.id
            ),
        }
    }

    fn release_buffer(&mut self, buffer: SoftwareBuffer) {
        if self.buffers.remove(&buffer.id).is_some() {
            self.releases += 1;
        }
    }

    fn upload_mesh(&mut self, mesh: &dyn MeshProvider) -> RenderResult<()> {
        if mesh.vertices().is_empty() || mesh.index_count() == 0 {
            return Err(RenderError::BufferCreationFailed("mesh has no triangles".into()));
        }
        self.mesh_index_count = mesh.index_count();
        self.mesh_uploads += 1;
        Ok(())
    }

    fn set_globals(&mut self, globals: &GrassGlobals) {
        self.globals = *globals;
    }

    fn begin_frame(&mut self) {
        self.recording = true;
    }

    fn reset_counter(&mut self, visible_instances: &SoftwareBuffer) {
        self.record(Command::ResetCounter {
            buffer: visible_instances.id,
        });
    }

    fn set_fine_cull_params(&mut self, uniforms: &FineCullUniforms) {
        self.uniforms = Some(*uniforms);
    }

    fn dispatch_fine_cull(&mut self, bindings: &FineCullBindings<'_, SoftwareBuffer>, workgroups: u32) {
        let Some(uniforms) = self.uniforms else {
            log::warn!("fine cull dispatched without parameters; skipped");
            return;
        };
        self.record(Command::FineCull {
            positions: bindings.positions.id,
            visible_cells: bindings.visible_cells.id,
            visible_instances: bindings.visible_instances.id,
            uniforms,
            workgroups,
        });
    }

    fn copy_counter(&mut self, src: &SoftwareBuffer, dst: &SoftwareBuffer, dst_offset: u64) {
        self.record(Command::CopyCounter {
            src: src.id,
            dst: dst.id,
            dst_offset,
        });
    }

    fn draw_indexed_indirect(&mut self, bindings: &DrawBindings<'_, SoftwareBuffer>) {
        self.record(Command::Draw {
            draw_args: bindings.draw_args.id,
        });
    }

    fn end_frame(&mut self) -> RenderResult<()> {
        for command in std::mem::take(&mut self.pending) {
            self.execute(command);
        }
        self.recording = false;
        self.frames += 1;
        Ok(())
    }

    fn read_draw_args(&mut self, draw_args: &SoftwareBuffer) -> RenderResult<DrawIndexedArgs> {
        read_args(self.words(draw_args.id)).ok_or(RenderError::BufferMapFailed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::uniforms::{APPEND_COUNTER_SIZE, INSTANCE_COUNT_OFFSET};
    use glam::{Mat4, Vec3};

    fn view_proj() -> Mat4 {
        let view = Mat4::look_at_rh(Vec3::new(0.0, 1.0, 0.0), Vec3::new(0.0, 1.0, -1.0), Vec3::Y);
        let proj = Mat4::perspective_rh(std::f32::consts::FRAC_PI_2, 1.0, 0.1, 1000.0);
        proj * view
    }

    fn setup(backend: &mut SoftwareBackend, positions: &[Vec3]) -> [SoftwareBuffer; 3] {
        let gpu: Vec<GpuPosition> = positions.iter().copied().map(GpuPosition::from).collect();
        let pos = backend
            .create_buffer(BufferKind::Positions, (gpu.len() * 16) as u64)
            .unwrap();
        backend.write_buffer(&pos, 0, bytemuck::cast_slice(&gpu));
        let visible = backend
            .create_buffer(
                BufferKind::VisibleInstances,
                APPEND_COUNTER_SIZE + 4 * positions.len() as u64,
            )
            .unwrap();
        let args = backend.create_buffer(BufferKind::DrawArgs, 20).unwrap();
        backend.write_buffer(
            &args,
            0,
            bytemuck::bytes_of(&DrawIndexedArgs {
                index_count: 3,
                instance_count: positions.len() as u32,
                ..Default::default()
            }),
        );
        [pos, visible, args]
    }

    #[test]
    fn test_fine_cull_and_counter_copy() {
        let mut backend = SoftwareBackend::new();
        // Cell 0 holds two instances, cell 1 holds two more.
        let positions = [
            Vec3::new(0.0, 0.0, -5.0),
            Vec3::new(0.0, 0.0, 5.0), // behind the camera
            Vec3::new(0.5, 0.0, -20.0),
            Vec3::new(0.0, 0.0, -500.0), // past the draw distance
        ];
        let [pos, visible, args] = setup(&mut backend, &positions);
        let cells = backend.create_buffer(BufferKind::VisibleCells, 8).unwrap();
        backend.write_buffer(&cells, 0, bytemuck::cast_slice(&[0u32, 1]));

        backend.begin_frame();
        backend.reset_counter(&visible);
        backend.set_fine_cull_params(&FineCullUniforms::new(view_proj(), 100.0, 2, 4));
        backend.dispatch_fine_cull(
            &FineCullBindings {
                positions: &pos,
                visible_cells: &cells,
                visible_instances: &visible,
            },
            1,
        );
        backend.copy_counter(&visible, &args, INSTANCE_COUNT_OFFSET);
        backend.draw_indexed_indirect(&DrawBindings {
            positions: &pos,
            visible_instances: &visible,
            draw_args: &args,
        });
        backend.end_frame().unwrap();

        assert_eq!(backend.visible_instance_ids(&visible), vec![0, 2]);
        let draw = backend.last_draw().unwrap();
        assert_eq!(draw.args.instance_count, 2);
        assert_eq!(draw.args.index_count, 3);
        assert_eq!(backend.dispatches(), 1);
    }

    #[test]
    fn test_commands_run_on_submit() {
        let mut backend = SoftwareBackend::new();
        let [_pos, visible, args] = setup(&mut backend, &[Vec3::ZERO; 4]);

        backend.begin_frame();
        backend.reset_counter(&visible);
        backend.copy_counter(&visible, &args, INSTANCE_COUNT_OFFSET);
        assert_eq!(backend.read_draw_args(&args).unwrap().instance_count, 4);

        backend.end_frame().unwrap();
        assert_eq!(backend.read_draw_args(&args).unwrap().instance_count, 0);
        assert_eq!(backend.frames(), 1);
    }

    #[test]
    fn test_release_counts() {
        let mut backend = SoftwareBackend::new();
        let a = backend.create_buffer(BufferKind::VisibleCells, 16).unwrap();
        let b = backend.create_buffer(BufferKind::VisibleCells, 16).unwrap();
        assert_eq!(backend.live_buffers_of(BufferKind::VisibleCells), 2);
        backend.release_buffer(a);
        backend.release_buffer(b);
        assert_eq!(backend.allocations(), 2);
        assert_eq!(backend.releases(), 2);
        assert_eq!(backend.live_buffers(), 0);
    }

    #[test]
    fn test_read_released_buffer_fails() {
        let mut backend = SoftwareBackend::new();
        let args = backend.create_buffer(BufferKind::DrawArgs, 20).unwrap();
        let stale = SoftwareBuffer { id: args.id() };
        backend.release_buffer(args);
        assert!(matches!(
            backend.read_draw_args(&stale),
            Err(RenderError::BufferMapFailed)
        ));
    }
}
