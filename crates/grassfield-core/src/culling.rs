//! CPU coarse culling of grid cells against the view frustum.
//!
//! Both implementations test the flat bounds of every cell against all six
//! planes and return the IDs of the cells no plane rejects. The sequential
//! scan returns IDs in ascending order; the parallel scan returns the same
//! set in whatever order workers finish.

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use glam::Vec3;
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};

use crate::error::{GrassError, Result};
use crate::frustum::Frustum;
use crate::grid::CellGrid;
use crate::options::{CullMode, Options};

/// Whether a single cell survives the frustum.
#[must_use]
pub fn cell_visible(grid: &CellGrid, frustum: &Frustum, cell_id: u32) -> bool {
    let half = Vec3::new(grid.cell_size() * 0.5, 0.0, grid.cell_size() * 0.5);
    frustum.intersects_box(grid.cell_center(cell_id), half)
}

/// Tests every cell in order, appending survivors to `visible`.
pub fn cull_sequential(grid: &CellGrid, frustum: &Frustum, visible: &mut Vec<u32>) {
    visible.clear();
    visible.extend((0..grid.cell_count()).filter(|&id| cell_visible(grid, frustum, id)));
}

/// Fixed-capacity, append-only collection shared by cull workers.
///
/// Each append claims a slot with a single atomic increment of the cursor
/// and then writes only that slot, so no slot is ever written twice.
pub struct AppendSlots {
    slots: Vec<AtomicU32>,
    cursor: AtomicUsize,
}

impl AppendSlots {
    /// Creates a collection able to hold `capacity` values.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: (0..capacity).map(|_| AtomicU32::new(0)).collect(),
            cursor: AtomicUsize::new(0),
        }
    }

    /// Appends a value. Never reallocates.
    ///
    /// # Panics
    ///
    /// Panics if more values are appended than the capacity allows.
    pub fn push(&self, value: u32) {
        let slot = self.cursor.fetch_add(1, Ordering::Relaxed);
        self.slots[slot].store(value, Ordering::Relaxed);
    }

    /// Number of values appended so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.cursor.load(Ordering::Acquire).min(self.slots.len())
    }

    /// Whether nothing has been appended.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copies the appended values into `out`, replacing its contents.
    pub fn drain_into(self, out: &mut Vec<u32>) {
        let len = self.len();
        out.clear();
        out.extend(
            self.slots
                .into_iter()
                .take(len)
                .map(AtomicU32::into_inner),
        );
    }
}

/// Partitions the cells across `pool` in batches of at least `batch_size`
/// and collects survivors into `visible`.
///
/// Blocks until every batch has been evaluated.
pub fn cull_parallel(
    pool: &ThreadPool,
    batch_size: usize,
    grid: &CellGrid,
    frustum: &Frustum,
    visible: &mut Vec<u32>,
) {
    let slots = AppendSlots::with_capacity(grid.cell_count() as usize);
    pool.install(|| {
        (0..grid.cell_count())
            .into_par_iter()
            .with_min_len(batch_size.max(1))
            .for_each(|id| {
                if cell_visible(grid, frustum, id) {
                    slots.push(id);
                }
            });
    });
    slots.drain_into(visible);
}

/// Coarse culler owning the worker pool and the reusable output list.
pub struct CoarseCuller {
    mode: CullMode,
    batch_size: usize,
    pool: Option<ThreadPool>,
    worker_threads: usize,
    visible: Vec<u32>,
}

impl CoarseCuller {
    /// Creates a culler. The worker pool is built lazily the first time the
    /// parallel mode runs.
    #[must_use]
    pub fn new(mode: CullMode, worker_threads: usize, batch_size: usize) -> Self {
        Self {
            mode,
            batch_size: batch_size.max(1),
            pool: None,
            worker_threads,
            visible: Vec::new(),
        }
    }

    /// Creates a culler from options.
    #[must_use]
    pub fn from_options(options: &Options) -> Self {
        Self::new(
            options.cull_mode,
            options.worker_threads,
            options.cull_batch_size,
        )
    }

    /// Current mode.
    #[must_use]
    pub fn mode(&self) -> CullMode {
        self.mode
    }

    /// Switches mode; takes effect on the next call to [`CoarseCuller::cull`].
    pub fn set_mode(&mut self, mode: CullMode) {
        self.mode = mode;
    }

    fn pool(&mut self) -> Result<&ThreadPool> {
        let pool = match self.pool.take() {
            Some(pool) => pool,
            None => {
                let pool = ThreadPoolBuilder::new()
                    .num_threads(self.worker_threads)
                    .thread_name(|i| format!("grassfield-cull-{i}"))
                    .build()
                    .map_err(|e| GrassError::WorkerPool(e.to_string()))?;
                log::debug!("cull worker pool started with {} threads", pool.current_num_threads());
                pool
            }
        };
        Ok(&*self.pool.insert(pool))
    }

    /// Whether the worker pool has been built.
    #[must_use]
    pub fn has_worker_pool(&self) -> bool {
        self.pool.is_some()
    }

    /// Runs the coarse cull for this frame and returns the visible cell IDs.
    ///
    /// The returned slice is valid until the next call.
    pub fn cull(&mut self, grid: &CellGrid, frustum: &Frustum) -> Result<&[u32]> {
        match self.mode {
            CullMode::Sequential => cull_sequential(grid, frustum, &mut self.visible),
            CullMode::Parallel => {
                let batch_size = self.batch_size;
                let mut visible = std::mem::take(&mut self.visible);
                cull_parallel(self.pool()?, batch_size, grid, frustum, &mut visible);
                self.visible = visible;
            }
        }
        log::trace!(
            "coarse cull: {}/{} cells visible",
            self.visible.len(),
            grid.cell_count()
        );
        Ok(&self.visible)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use glam::Mat4;
    use proptest::prelude::*;

    use super::*;
    use crate::frustum::{Plane, FAR};
    use crate::grid::BoundingTransform;

    fn grid(instance_count: u32, cell_size: f32) -> CellGrid {
        let transform = BoundingTransform::for_instance_count(Vec3::ZERO, instance_count, 1.0);
        CellGrid::new(&transform, cell_size, instance_count).unwrap()
    }

    fn open_frustum() -> Frustum {
        Frustum::from_planes([
            Plane::new(Vec3::X, 1e9),
            Plane::new(Vec3::NEG_X, 1e9),
            Plane::new(Vec3::Y, 1e9),
            Plane::new(Vec3::NEG_Y, 1e9),
            Plane::new(Vec3::Z, 1e9),
            Plane::new(Vec3::NEG_Z, 1e9),
        ])
    }

    fn test_pool() -> ThreadPool {
        ThreadPoolBuilder::new().num_threads(4).build().unwrap()
    }

    #[test]
    fn test_open_frustum_keeps_every_cell() {
        let grid = grid(1_000_000, 5.0);
        let frustum = open_frustum();

        let mut sequential = Vec::new();
        cull_sequential(&grid, &frustum, &mut sequential);
        assert_eq!(sequential.len(), 10_000);
        assert_eq!(sequential, (0..10_000).collect::<Vec<_>>());

        let mut parallel = Vec::new();
        cull_parallel(&test_pool(), 64, &grid, &frustum, &mut parallel);
        assert_eq!(parallel.len(), 10_000);
    }

    #[test]
    fn test_far_plane_behind_everything_rejects_all() {
        let grid = grid(40_000, 5.0);
        let mut frustum = open_frustum();
        // Only points with x <= -1000 are in front of this plane.
        frustum.set_plane(FAR, Plane::from_point_normal(Vec3::new(-1000.0, 0.0, 0.0), Vec3::NEG_X));

        let mut sequential = vec![1, 2, 3];
        cull_sequential(&grid, &frustum, &mut sequential);
        assert!(sequential.is_empty());

        let mut parallel = vec![7];
        cull_parallel(&test_pool(), 16, &grid, &frustum, &mut parallel);
        assert!(parallel.is_empty());
    }

    #[test]
    fn test_half_space_splits_grid() {
        let grid = grid(40_000, 5.0);
        let mut frustum = open_frustum();
        frustum.set_plane(0, Plane::from_point_normal(Vec3::ZERO, Vec3::X));

        let mut visible = Vec::new();
        cull_sequential(&grid, &frustum, &mut visible);
        assert!(!visible.is_empty() && visible.len() < grid.cell_count() as usize);

        for id in 0..grid.cell_count() {
            let (min, max) = grid.cell_bounds(id);
            if min.x >= 0.0 {
                assert!(visible.contains(&id), "cell {id} fully inside must be visible");
            }
            if max.x < 0.0 {
                assert!(!visible.contains(&id), "cell {id} fully outside must be culled");
            }
        }
    }

    #[test]
    fn test_append_slots_collects_from_many_threads() {
        let slots = AppendSlots::with_capacity(1000);
        std::thread::scope(|s| {
            for t in 0..4u32 {
                let slots = &slots;
                s.spawn(move || {
                    for i in 0..250 {
                        slots.push(t * 250 + i);
                    }
                });
            }
        });
        assert_eq!(slots.len(), 1000);
        let mut out = Vec::new();
        slots.drain_into(&mut out);
        out.sort_unstable();
        assert_eq!(out, (0..1000).collect::<Vec<_>>());
    }

    #[test]
    fn test_culler_switches_modes() {
        let grid = grid(40_000, 5.0);
        let view = Mat4::look_at_rh(Vec3::new(0.0, 5.0, 0.0), Vec3::new(10.0, 0.0, 10.0), Vec3::Y);
        let proj = Mat4::perspective_rh(1.0, 1.5, 0.1, 40.0);
        let frustum = Frustum::from_view_projection(proj * view);

        let mut culler = CoarseCuller::new(CullMode::Sequential, 2, 8);
        let sequential: BTreeSet<u32> = culler.cull(&grid, &frustum).unwrap().iter().copied().collect();
        culler.set_mode(CullMode::Parallel);
        let parallel: BTreeSet<u32> = culler.cull(&grid, &frustum).unwrap().iter().copied().collect();

        assert!(!sequential.is_empty());
        assert!(sequential.len() < grid.cell_count() as usize);
        assert_eq!(sequential, parallel);
    }

    #[test]
    fn test_worker_pool_is_built_once_and_only_for_parallel() {
        let grid = grid(40_000, 5.0);
        let frustum = open_frustum();

        let mut culler = CoarseCuller::new(CullMode::Sequential, 2, 8);
        culler.cull(&grid, &frustum).unwrap();
        assert!(!culler.has_worker_pool());

        culler.set_mode(CullMode::Parallel);
        for _ in 0..3 {
            assert_eq!(culler.cull(&grid, &frustum).unwrap().len(), 400);
            assert!(culler.has_worker_pool());
        }
    }

    fn arb_frustum() -> impl Strategy<Value = Mat4> {
        (
            -60.0f32..60.0,
            1.0f32..40.0,
            -60.0f32..60.0,
            0.0f32..std::f32::consts::TAU,
            -1.2f32..0.2,
            0.3f32..2.0,
            0.5f32..2.5,
            5.0f32..200.0,
        )
            .prop_map(|(x, y, z, yaw, pitch, fov, aspect, far)| {
                let eye = Vec3::new(x, y, z);
                let dir = Vec3::new(
                    yaw.cos() * pitch.cos(),
                    pitch.sin(),
                    yaw.sin() * pitch.cos(),
                );
                let view = Mat4::look_at_rh(eye, eye + dir, Vec3::Y);
                Mat4::perspective_rh(fov, aspect, 0.1, far) * view
            })
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_sequential_and_parallel_agree(
            instance_count in 2_000u32..200_000,
            cell_size in 1.0f32..10.0,
            batch_size in 1usize..128,
            view_proj in arb_frustum(),
        ) {
            let transform = BoundingTransform::for_instance_count(Vec3::ZERO, instance_count, 1.0);
            let Ok(grid) = CellGrid::new(&transform, cell_size, instance_count) else {
                return Ok(());
            };
            let frustum = Frustum::from_view_projection(view_proj);

            let mut sequential = Vec::new();
            cull_sequential(&grid, &frustum, &mut sequential);
            let mut parallel = Vec::new();
            cull_parallel(&test_pool(), batch_size, &grid, &frustum, &mut parallel);

            prop_assert_eq!(parallel.len(), sequential.len());
            let a: BTreeSet<u32> = sequential.into_iter().collect();
            let b: BTreeSet<u32> = parallel.into_iter().collect();
            prop_assert_eq!(a, b);
        }
    }
}
