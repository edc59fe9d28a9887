//! Per-frame statistics.

use std::fmt;
use std::time::Duration;

/// What one call to [`crate::GrassField::render_frame`] did.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FrameReport {
    /// Zero-based index of the frame.
    pub frame_index: u64,
    /// Cells that survived the coarse cull.
    pub visible_cells: u32,
    /// Cells in the grid.
    pub total_cells: u32,
    /// Instances handed to the fine cull.
    pub candidate_instances: u32,
    /// Work groups dispatched; zero when the fine cull was skipped.
    pub workgroups: u32,
    /// Whether the instance buffers were reallocated this frame.
    pub buffers_reallocated: bool,
    /// Wall time spent in the coarse cull.
    pub coarse_cull_time: Duration,
}

impl FrameReport {
    /// Whether the fine cull ran.
    #[must_use]
    pub fn dispatched(&self) -> bool {
        self.workgroups > 0
    }

    /// Visible share of the grid in `[0, 1]`.
    #[must_use]
    pub fn visible_fraction(&self) -> f32 {
        if self.total_cells == 0 {
            0.0
        } else {
            self.visible_cells as f32 / self.total_cells as f32
        }
    }
}

impl fmt::Display for FrameReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Visible cells: {} / {}",
            self.visible_cells, self.total_cells
        )
    }
}
