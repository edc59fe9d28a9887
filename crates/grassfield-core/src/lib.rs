//! Core data and algorithms for grassfield.
//!
//! This crate holds everything that runs on the CPU:
//! - [`CellGrid`] and [`InstancePositions`], the cell-partitioned instance store
//! - [`Frustum`] and the [`FrustumSource`] camera interface
//! - [`CoarseCuller`], the per-frame cell cull (sequential or parallel)
//! - [`Options`] and the error types

// Documentation lints - internal functions don't need exhaustive panic/error docs
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
// Grid math converts freely between counts and world units
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]

pub mod culling;
pub mod error;
pub mod frustum;
pub mod grid;
pub mod options;

pub use culling::{cell_visible, cull_parallel, cull_sequential, AppendSlots, CoarseCuller};
pub use error::{GrassError, Result};
pub use frustum::{Frustum, FrustumSource, Plane};
pub use grid::{BoundingTransform, CellGrid, InstancePositions};
pub use options::{CullMode, Options};

// Re-export glam types for convenience
pub use glam::{Mat4, Vec2, Vec3, Vec4};
