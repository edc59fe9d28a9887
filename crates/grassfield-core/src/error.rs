//! Error types for grassfield.

use glam::Vec3;
use thiserror::Error;

/// The main error type for grassfield operations.
#[derive(Error, Debug)]
pub enum GrassError {
    /// The requested instance count is zero.
    #[error("instance count must be at least 1")]
    InvalidInstanceCount,

    /// The cell size is zero, negative, or not finite.
    #[error("cell size must be a positive finite number, got {0}")]
    InvalidCellSize(f32),

    /// The draw distance is zero, negative, or not finite.
    #[error("draw distance must be a positive finite number, got {0}")]
    InvalidDrawDistance(f32),

    /// The field pivot has a NaN or infinite component.
    #[error("pivot must be finite, got {0}")]
    InvalidPivot(Vec3),

    /// The height scale is NaN or infinite.
    #[error("height scale must be finite, got {0}")]
    InvalidHeightScale(f32),

    /// The cull batch size is zero.
    #[error("cull batch size must be at least 1")]
    InvalidBatchSize,

    /// The bounding transform is too small to hold a single cell.
    #[error("grid has no cells ({cell_count_x} x {cell_count_z}); bounding scale is smaller than one cell")]
    EmptyGrid {
        cell_count_x: u32,
        cell_count_z: u32,
    },

    /// There are more cells than instances, so every cell would be empty.
    #[error("{instance_count} instances cannot fill {cell_count} cells")]
    EmptyCells { instance_count: u32, cell_count: u32 },

    /// A frame was requested without a camera.
    #[error("no camera available for this frame")]
    CameraUnavailable,

    /// The context was used after `shutdown`.
    #[error("grass field has been shut down")]
    ShutDown,

    /// The coarse-cull worker pool could not be created.
    #[error("failed to build cull worker pool: {0}")]
    WorkerPool(String),

    /// Rendering error.
    #[error("render error: {0}")]
    RenderError(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

/// A specialized Result type for grassfield operations.
pub type Result<T> = std::result::Result<T, GrassError>;
