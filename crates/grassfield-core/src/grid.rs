//! Cell grid index and instance placement.
//!
//! The field is a 2D grid of square cells laid over the XZ footprint of a
//! bounding transform. Every cell owns a contiguous, equally sized slice of
//! the instance position store, so a visible cell ID is enough to locate all
//! of its instances on the GPU.

use std::ops::Range;

use glam::{Vec2, Vec3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::{GrassError, Result};
use crate::options::Options;

/// World placement of the field: a pivot and a per-axis scale.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingTransform {
    /// Pivot (center) of the field.
    pub position: Vec3,
    /// Extent of the field along each axis.
    pub scale: Vec3,
}

impl BoundingTransform {
    /// Creates a transform whose horizontal scale keeps the density at
    /// roughly four instances per square unit.
    ///
    /// The count is divided by four with integer division before the
    /// square root is taken.
    #[must_use]
    pub fn for_instance_count(position: Vec3, instance_count: u32, height_scale: f32) -> Self {
        let horizontal = ((instance_count / 4) as f32).sqrt();
        Self {
            position,
            scale: Vec3::new(horizontal, height_scale, horizontal),
        }
    }

    /// Horizontal extent, as written to the shader-visible bound size.
    #[must_use]
    pub fn bound_size(&self) -> Vec2 {
        Vec2::new(self.scale.x, self.scale.z)
    }
}

/// Fixed geometry of the cell grid.
///
/// Cell `(i, j)` has the flattened ID `i * cell_count_z + j`, its center at
/// `origin + (i * cell_size, 0, j * cell_size)` and a footprint extending
/// half a cell in X and Z around that center.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CellGrid {
    cell_count_x: u32,
    cell_count_z: u32,
    cell_size: f32,
    origin: Vec3,
    cell_instance_count: u32,
}

impl CellGrid {
    /// Derives the grid for `instance_count` instances spread over
    /// `transform`.
    ///
    /// Instances that do not divide evenly among the cells are dropped.
    pub fn new(transform: &BoundingTransform, cell_size: f32, instance_count: u32) -> Result<Self> {
        if !(cell_size.is_finite() && cell_size > 0.0) {
            return Err(GrassError::InvalidCellSize(cell_size));
        }
        if instance_count == 0 {
            return Err(GrassError::InvalidInstanceCount);
        }

        let cell_count_x = (transform.scale.x / cell_size) as u32;
        let cell_count_z = (transform.scale.z / cell_size) as u32;
        let cell_count = cell_count_x.checked_mul(cell_count_z).unwrap_or(0);
        if cell_count == 0 {
            return Err(GrassError::EmptyGrid {
                cell_count_x,
                cell_count_z,
            });
        }

        let cell_instance_count = instance_count / cell_count;
        if cell_instance_count == 0 {
            return Err(GrassError::EmptyCells {
                instance_count,
                cell_count,
            });
        }

        let center_offset = Vec3::new(
            cell_count_x as f32 * cell_size * 0.5,
            0.0,
            cell_count_z as f32 * cell_size * 0.5,
        );

        Ok(Self {
            cell_count_x,
            cell_count_z,
            cell_size,
            origin: transform.position - center_offset,
            cell_instance_count,
        })
    }

    /// Number of cells along X.
    #[must_use]
    pub fn cell_count_x(&self) -> u32 {
        self.cell_count_x
    }

    /// Number of cells along Z.
    #[must_use]
    pub fn cell_count_z(&self) -> u32 {
        self.cell_count_z
    }

    /// Total number of cells.
    #[must_use]
    pub fn cell_count(&self) -> u32 {
        self.cell_count_x * self.cell_count_z
    }

    /// Edge length of a cell.
    #[must_use]
    pub fn cell_size(&self) -> f32 {
        self.cell_size
    }

    /// Center of cell `(0, 0)`.
    #[must_use]
    pub fn origin(&self) -> Vec3 {
        self.origin
    }

    /// Instances owned by each cell.
    #[must_use]
    pub fn cell_instance_count(&self) -> u32 {
        self.cell_instance_count
    }

    /// Instances owned by the whole grid.
    #[must_use]
    pub fn instance_count(&self) -> u32 {
        self.cell_count() * self.cell_instance_count
    }

    /// Flattened ID of cell `(i, j)`.
    #[must_use]
    pub fn cell_id(&self, i: u32, j: u32) -> u32 {
        i * self.cell_count_z + j
    }

    /// Grid coordinates of a flattened cell ID.
    #[must_use]
    pub fn cell_coords(&self, cell_id: u32) -> (u32, u32) {
        (cell_id / self.cell_count_z, cell_id % self.cell_count_z)
    }

    /// World-space center of a cell.
    #[must_use]
    pub fn cell_center(&self, cell_id: u32) -> Vec3 {
        let (i, j) = self.cell_coords(cell_id);
        self.origin + Vec3::new(i as f32 * self.cell_size, 0.0, j as f32 * self.cell_size)
    }

    /// Flat (zero-height) bounds of a cell as `(min, max)`.
    #[must_use]
    pub fn cell_bounds(&self, cell_id: u32) -> (Vec3, Vec3) {
        let center = self.cell_center(cell_id);
        let half = Vec3::new(self.cell_size * 0.5, 0.0, self.cell_size * 0.5);
        (center - half, center + half)
    }

    /// Index range of a cell's instances in the position store.
    #[must_use]
    pub fn instance_range(&self, cell_id: u32) -> Range<usize> {
        let start = cell_id as usize * self.cell_instance_count as usize;
        start..start + self.cell_instance_count as usize
    }
}

/// Flat array of instance positions, partitioned by cell.
#[derive(Debug, Clone)]
pub struct InstancePositions {
    grid: CellGrid,
    positions: Vec<Vec3>,
}

impl InstancePositions {
    /// Places `grid.cell_instance_count()` instances in every cell, in
    /// row-major order (X outer, Z inner), jittered uniformly within half a
    /// cell of the cell center. The same seed always yields the same layout.
    #[must_use]
    pub fn generate(grid: CellGrid, seed: u64) -> Self {
        log::debug!(
            "generating {} instance positions over {}x{} cells",
            grid.instance_count(),
            grid.cell_count_x(),
            grid.cell_count_z()
        );

        let mut rng = StdRng::seed_from_u64(seed);
        let half = grid.cell_size() * 0.5;
        let mut positions = Vec::with_capacity(grid.instance_count() as usize);

        for i in 0..grid.cell_count_x() {
            for j in 0..grid.cell_count_z() {
                let center = grid.cell_center(grid.cell_id(i, j));
                for _ in 0..grid.cell_instance_count() {
                    let mut pos = center;
                    pos.x += rng.gen_range(-1.0f32..1.0) * half;
                    pos.z += rng.gen_range(-1.0f32..1.0) * half;
                    positions.push(pos);
                }
            }
        }

        Self { grid, positions }
    }

    /// Builds the transform and grid from options, then places instances.
    pub fn from_options(options: &Options) -> Result<(BoundingTransform, Self)> {
        options.validate()?;
        let transform = BoundingTransform::for_instance_count(
            options.pivot,
            options.instance_count,
            options.height_scale,
        );
        let grid = CellGrid::new(&transform, options.cell_size, options.instance_count)?;
        Ok((transform, Self::generate(grid, options.seed)))
    }

    /// The grid these positions are partitioned by.
    #[must_use]
    pub fn grid(&self) -> &CellGrid {
        &self.grid
    }

    /// All positions.
    #[must_use]
    pub fn positions(&self) -> &[Vec3] {
        &self.positions
    }

    /// Positions owned by one cell.
    #[must_use]
    pub fn cell(&self, cell_id: u32) -> &[Vec3] {
        &self.positions[self.grid.instance_range(cell_id)]
    }

    /// Number of stored positions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}
