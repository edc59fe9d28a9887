//! Configuration options for a grass field.

use std::path::Path;

use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::error::{GrassError, Result};

/// Which coarse-cull implementation runs each frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum CullMode {
    /// Single-threaded scan over every cell.
    Sequential,
    /// Cells partitioned across a fixed worker pool.
    #[default]
    Parallel,
}

/// Options controlling placement, culling and drawing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Options {
    /// Requested number of instances. The placed count may be lower
    /// because each cell holds `instance_count / cell_count` instances.
    pub instance_count: u32,

    /// Maximum distance at which instances are drawn.
    pub draw_distance: f32,

    /// Edge length of a square cell in world units.
    pub cell_size: f32,

    /// Coarse-cull implementation.
    pub cull_mode: CullMode,

    /// Worker threads for parallel culling (0 = one per available core).
    pub worker_threads: usize,

    /// Minimum number of cells a worker takes at once.
    pub cull_batch_size: usize,

    /// Seed for the placement jitter.
    pub seed: u64,

    /// World-space pivot of the field (center of the bounding transform).
    pub pivot: Vec3,

    /// Vertical scale of the bounding transform.
    pub height_scale: f32,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            instance_count: 1_000_000,
            draw_distance: 125.0,
            cell_size: 5.0,
            cull_mode: CullMode::Parallel,
            worker_threads: 0,
            cull_batch_size: 64,
            seed: 123,
            pivot: Vec3::ZERO,
            height_scale: 1.0,
        }
    }
}

impl Options {
    /// Checks every value that must hold before grid generation or any
    /// buffer allocation.
    pub fn validate(&self) -> Result<()> {
        if self.instance_count == 0 {
            return Err(GrassError::InvalidInstanceCount);
        }
        if !(self.cell_size.is_finite() && self.cell_size > 0.0) {
            return Err(GrassError::InvalidCellSize(self.cell_size));
        }
        if !(self.draw_distance.is_finite() && self.draw_distance > 0.0) {
            return Err(GrassError::InvalidDrawDistance(self.draw_distance));
        }
        if self.cull_batch_size == 0 {
            return Err(GrassError::InvalidBatchSize);
        }
        if !self.pivot.is_finite() {
            return Err(GrassError::InvalidPivot(self.pivot));
        }
        if !self.height_scale.is_finite() {
            return Err(GrassError::InvalidHeightScale(self.height_scale));
        }
        Ok(())
    }

    /// Parses options from JSON. Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let options: Self = serde_json::from_str(json)?;
        options.validate()?;
        Ok(options)
    }

    /// Loads options from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Serializes the options to pretty-printed JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
