//! Plain-old-data layouts shared with the GPU programs.

use glam::{Mat4, Vec2, Vec3};

/// Work-group size of the fine-cull program.
pub const FINE_CULL_WORKGROUP_SIZE: u32 = 64;

/// Byte offset of [`DrawIndexedArgs::instance_count`] inside the
/// draw-argument buffer.
pub const INSTANCE_COUNT_OFFSET: u64 = 4;

/// Size of the append counter at the head of the visible-instance buffer.
pub const APPEND_COUNTER_SIZE: u64 = 4;

/// Arguments of one indexed indirect draw, in the layout the GPU reads.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct DrawIndexedArgs {
    /// Indices per instance.
    pub index_count: u32,
    /// Instances to draw; overwritten each frame from the append counter.
    pub instance_count: u32,
    /// First index in the index buffer.
    pub first_index: u32,
    /// Value added to each index before fetching a vertex.
    pub base_vertex: i32,
    /// First instance.
    pub first_instance: u32,
}

/// Instance position padded to 16 bytes for storage-buffer alignment.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
#[allow(clippy::pub_underscore_fields)]
pub struct GpuPosition {
    pub position: [f32; 3],
    pub _padding: f32,
}

impl From<Vec3> for GpuPosition {
    fn from(p: Vec3) -> Self {
        Self {
            position: p.to_array(),
            _padding: 0.0,
        }
    }
}

/// Parameters of the fine-cull program, set once per frame.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
#[allow(clippy::pub_underscore_fields)]
pub struct FineCullUniforms {
    pub view_proj: [[f32; 4]; 4],
    pub max_draw_distance: f32,
    /// Instances per cell (the stride between cells in the position buffer).
    pub cell_instance_count: u32,
    /// Number of candidates, `cell_instance_count * visible_cell_count`.
    pub candidate_count: u32,
    pub _padding: u32,
}

impl FineCullUniforms {
    /// Builds the uniforms for one frame.
    #[must_use]
    pub fn new(
        view_proj: Mat4,
        max_draw_distance: f32,
        cell_instance_count: u32,
        candidate_count: u32,
    ) -> Self {
        Self {
            view_proj: view_proj.to_cols_array_2d(),
            max_draw_distance,
            cell_instance_count,
            candidate_count,
            _padding: 0,
        }
    }

    /// Whether an instance at `position` survives the fine cull.
    ///
    /// Mirrors the test in `fine_cull.wgsl`: the clip-space position must lie
    /// within the depth range, within a widened screen rectangle, and within
    /// the draw distance.
    #[must_use]
    pub fn keeps(&self, position: Vec3) -> bool {
        let clip = (Mat4::from_cols_array_2d(&self.view_proj) * position.extend(1.0)).abs();
        clip.z <= clip.w
            && clip.y <= clip.w * 1.5
            && clip.x <= clip.w * 1.1
            && clip.w <= self.max_draw_distance
    }

    /// Maps a candidate index to an instance index through the visible cell
    /// list, or `None` when the candidate is past the end.
    #[must_use]
    pub fn instance_for_candidate(&self, candidate: u32, visible_cells: &[u32]) -> Option<u32> {
        if candidate >= self.candidate_count || self.cell_instance_count == 0 {
            return None;
        }
        let cell = visible_cells.get((candidate / self.cell_instance_count) as usize)?;
        Some(cell * self.cell_instance_count + candidate % self.cell_instance_count)
    }
}

/// Shader-visible parameters describing the field's placement, plus the
/// camera used by the draw.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
#[allow(clippy::pub_underscore_fields)]
pub struct GrassGlobals {
    pub view_proj: [[f32; 4]; 4],
    pub pivot_position: [f32; 4],
    pub bound_size: [f32; 2],
    pub _padding: [f32; 2],
}

impl Default for GrassGlobals {
    fn default() -> Self {
        Self {
            view_proj: Mat4::IDENTITY.to_cols_array_2d(),
            pivot_position: [0.0; 4],
            bound_size: [0.0; 2],
            _padding: [0.0; 2],
        }
    }
}

impl GrassGlobals {
    /// Sets the pivot and bound size, keeping the camera.
    pub fn set_placement(&mut self, pivot: Vec3, bound_size: Vec2) {
        self.pivot_position = pivot.extend(1.0).to_array();
        self.bound_size = bound_size.to_array();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_layout_sizes() {
        assert_eq!(std::mem::size_of::<DrawIndexedArgs>(), 20);
        assert_eq!(std::mem::size_of::<GpuPosition>(), 16);
        assert_eq!(std::mem::size_of::<FineCullUniforms>(), 80);
        assert_eq!(std::mem::size_of::<GrassGlobals>(), 96);
    }

    #[test]
    fn test_instance_count_offset() {
        let args = DrawIndexedArgs {
            index_count: 3,
            instance_count: 42,
            ..Default::default()
        };
        let bytes = bytemuck::bytes_of(&args);
        let offset = INSTANCE_COUNT_OFFSET as usize;
        assert_eq!(u32::from_le_bytes(bytes[offset..offset + 4].try_into().unwrap()), 42);
    }

    #[test]
    fn test_candidate_mapping() {
        let uniforms = FineCullUniforms::new(Mat4::IDENTITY, 100.0, 10, 30);
        let cells = [4, 9, 2];
        assert_eq!(uniforms.instance_for_candidate(0, &cells), Some(40));
        assert_eq!(uniforms.instance_for_candidate(13, &cells), Some(93));
        assert_eq!(uniforms.instance_for_candidate(29, &cells), Some(29));
        assert_eq!(uniforms.instance_for_candidate(30, &cells), None);
    }

    proptest! {
        #[test]
        fn prop_candidates_stay_inside_their_cell(
            per_cell in 1u32..200,
            cells in prop::collection::vec(0u32..10_000, 1..40),
        ) {
            let candidates = per_cell * cells.len() as u32;
            let uniforms = FineCullUniforms::new(Mat4::IDENTITY, 1.0, per_cell, candidates);
            for candidate in 0..candidates {
                let instance = uniforms.instance_for_candidate(candidate, &cells).unwrap();
                let cell = cells[(candidate / per_cell) as usize];
                prop_assert!(instance >= cell * per_cell);
                prop_assert!(instance < (cell + 1) * per_cell);
            }
            prop_assert!(uniforms.instance_for_candidate(candidates, &cells).is_none());
        }
    }

    #[test]
    fn test_keeps_respects_draw_distance() {
        let view = Mat4::look_at_rh(Vec3::ZERO, Vec3::NEG_Z, Vec3::Y);
        let proj = Mat4::perspective_rh(std::f32::consts::FRAC_PI_2, 1.0, 0.1, 1000.0);
        let uniforms = FineCullUniforms::new(proj * view, 50.0, 1, 1);
        assert!(uniforms.keeps(Vec3::new(0.0, 0.0, -10.0)));
        assert!(!uniforms.keeps(Vec3::new(0.0, 0.0, -80.0)));
        assert!(!uniforms.keeps(Vec3::new(0.0, 0.0, 10.0)));
        assert!(!uniforms.keeps(Vec3::new(30.0, 0.0, -10.0)));
    }
}
