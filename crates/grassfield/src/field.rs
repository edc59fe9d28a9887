//! The grass field context: owns placement, culling and GPU state.

use std::time::Instant;

use grassfield_core::{
    BoundingTransform, CellGrid, CoarseCuller, CullMode, FrustumSource, GrassError,
    InstancePositions, Options, Result,
};
use grassfield_render::{
    BladeMesh, DrawIndexedArgs, FineCullUniforms, GpuBackend, GpuBufferManager, GrassGlobals,
    MeshProvider, RenderError, FINE_CULL_WORKGROUP_SIZE, INSTANCE_COUNT_OFFSET,
};

use crate::frame::FrameReport;

pub(crate) fn render_error(e: RenderError) -> GrassError {
    GrassError::RenderError(e.to_string())
}

/// A generated position store and the inputs it was built from.
struct PositionStore {
    transform: BoundingTransform,
    positions: InstancePositions,
    version: u64,
}

/// One instanced grass field bound to a GPU backend.
///
/// Created by [`GrassField::init`] and torn down by [`GrassField::shutdown`].
/// The embedding application calls [`GrassField::render_frame`] once per
/// frame, after scene geometry and before post-processing.
///
/// # Example
/// ```no_run
/// use grassfield::*;
///
/// let mut field = GrassField::init(Options::default(), SoftwareBackend::new()).unwrap();
/// let mut camera = Camera::looking_at(Vec3::new(0.0, 2.0, 0.0), Vec3::new(0.0, 1.0, -10.0), 1.5);
/// let report = field.render_frame(Some(&mut camera)).unwrap();
/// println!("{report}");
/// field.shutdown();
/// ```
pub struct GrassField<B: GpuBackend> {
    options: Options,
    backend: B,
    mesh: Box<dyn MeshProvider>,
    culler: CoarseCuller,
    store: Option<PositionStore>,
    next_version: u64,
    buffers: GpuBufferManager<B>,
    globals: GrassGlobals,
    frame_index: u64,
    live: bool,
}

impl<B: GpuBackend> GrassField<B> {
    /// Validates `options` and binds a new field to `backend`.
    ///
    /// Configuration errors are reported here, before anything is generated
    /// or allocated. Positions are generated on the first frame.
    pub fn init(options: Options, backend: B) -> Result<Self> {
        options.validate()?;
        let transform = BoundingTransform::for_instance_count(
            options.pivot,
            options.instance_count,
            options.height_scale,
        );
        let grid = CellGrid::new(&transform, options.cell_size, options.instance_count)?;

        log::info!(
            "grass field initialized: {} x {} cells of {} instances ({} placed of {} requested)",
            grid.cell_count_x(),
            grid.cell_count_z(),
            grid.cell_instance_count(),
            grid.instance_count(),
            options.instance_count
        );

        Ok(Self {
            culler: CoarseCuller::from_options(&options),
            options,
            backend,
            mesh: Box::new(BladeMesh::new()),
            store: None,
            next_version: 0,
            buffers: GpuBufferManager::new(),
            globals: GrassGlobals::default(),
            frame_index: 0,
            live: true,
        })
    }

    /// Replaces the instance mesh. Buffers are rebuilt on the next frame.
    #[must_use]
    pub fn with_mesh(mut self, mesh: impl MeshProvider + 'static) -> Self {
        self.mesh = Box::new(mesh);
        self.buffers.invalidate();
        self
    }

    /// Releases every GPU buffer and the position store.
    ///
    /// Further frames fail with [`GrassError::ShutDown`].
    pub fn shutdown(&mut self) {
        if !self.live {
            return;
        }
        self.buffers.release_all(&mut self.backend);
        self.store = None;
        self.live = false;
        log::info!("grass field shut down after {} frames", self.frame_index);
    }

    /// Whether [`GrassField::shutdown`] has not been called.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.live
    }

    fn check_live(&self) -> Result<()> {
        if self.live {
            Ok(())
        } else {
            Err(GrassError::ShutDown)
        }
    }

    /// Generates the position store if none exists and returns it.
    ///
    /// An existing store is kept even when the instance count has changed;
    /// call [`GrassField::invalidate_positions`] first to regenerate.
    pub fn ensure_positions(&mut self) -> Result<&InstancePositions> {
        self.check_live()?;
        if self.store.is_none() {
            let started = Instant::now();
            let (transform, positions) = InstancePositions::from_options(&self.options)?;
            self.next_version += 1;
            log::debug!(
                "generated {} positions in {:?} (store version {})",
                positions.len(),
                started.elapsed(),
                self.next_version
            );
            self.store = Some(PositionStore {
                transform,
                positions,
                version: self.next_version,
            });
        }
        self.store
            .as_ref()
            .map(|s| &s.positions)
            .ok_or(GrassError::ShutDown)
    }

    /// Drops the position store. The next frame regenerates it from the
    /// current options and reallocates the instance buffers.
    pub fn invalidate_positions(&mut self) {
        if self.store.take().is_some() {
            log::debug!("position store invalidated");
        }
        self.buffers.invalidate();
    }

    /// The current position store, if generated.
    #[must_use]
    pub fn positions(&self) -> Option<&InstancePositions> {
        self.store.as_ref().map(|s| &s.positions)
    }

    /// The bounding transform of the current position store.
    #[must_use]
    pub fn bounding_transform(&self) -> Option<&BoundingTransform> {
        self.store.as_ref().map(|s| &s.transform)
    }

    /// Current options.
    #[must_use]
    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Sets the draw distance used from the next frame.
    pub fn set_draw_distance(&mut self, draw_distance: f32) -> Result<()> {
        if !(draw_distance.is_finite() && draw_distance > 0.0) {
            return Err(GrassError::InvalidDrawDistance(draw_distance));
        }
        self.options.draw_distance = draw_distance;
        Ok(())
    }

    /// Selects the coarse-cull implementation used from the next frame.
    pub fn set_cull_mode(&mut self, mode: CullMode) {
        self.options.cull_mode = mode;
        self.culler.set_mode(mode);
    }

    /// Records a new instance count.
    ///
    /// It applies only once the position store is regenerated.
    pub fn set_instance_count(&mut self, instance_count: u32) -> Result<()> {
        if instance_count == 0 {
            return Err(GrassError::InvalidInstanceCount);
        }
        if self.store.is_some() && instance_count != self.options.instance_count {
            log::warn!(
                "instance count set to {instance_count} while a position store exists; \
                 it takes effect after invalidate_positions()"
            );
        }
        self.options.instance_count = instance_count;
        Ok(())
    }

    /// The backend.
    #[must_use]
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// The backend, mutably.
    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// The buffer manager.
    #[must_use]
    pub fn buffers(&self) -> &GpuBufferManager<B> {
        &self.buffers
    }

    /// Frames rendered so far.
    #[must_use]
    pub fn frame_count(&self) -> u64 {
        self.frame_index
    }

    /// Reads back the draw arguments of the last submitted frame.
    pub fn read_draw_args(&mut self) -> Result<DrawIndexedArgs> {
        self.check_live()?;
        let buffers = self
            .buffers
            .instance_buffers()
            .ok_or_else(|| render_error(RenderError::BuffersNotAllocated))?;
        self.backend
            .read_draw_args(&buffers.draw_args)
            .map_err(render_error)
    }

    /// Culls and draws one frame.
    ///
    /// Without a camera nothing is recorded and
    /// [`GrassError::CameraUnavailable`] is returned. A frame with no
    /// visible cells skips the fine cull but still issues the draw, which
    /// then renders zero instances.
    pub fn render_frame<C>(&mut self, camera: Option<&mut C>) -> Result<FrameReport>
    where
        C: FrustumSource + ?Sized,
    {
        self.check_live()?;
        let camera = camera.ok_or(GrassError::CameraUnavailable)?;
        self.ensure_positions()?;
        let store = self.store.as_ref().ok_or(GrassError::ShutDown)?;

        let buffers_reallocated = self
            .buffers
            .ensure_buffers_for(
                &mut self.backend,
                store.version,
                &store.positions,
                &*self.mesh,
            )
            .map_err(render_error)?;

        let view_proj = camera.view_projection();
        self.globals.view_proj = view_proj.to_cols_array_2d();
        self.globals
            .set_placement(store.transform.position, store.transform.bound_size());
        self.backend.set_globals(&self.globals);

        let grid = store.positions.grid();
        let cull_started = Instant::now();
        let frustum = camera.frustum_with_far(self.options.draw_distance);
        let visible = self.culler.cull(grid, &frustum)?;
        let coarse_cull_time = cull_started.elapsed();
        let visible_cells = visible.len() as u32;

        self.buffers
            .upload_visible_cells(&mut self.backend, visible)
            .map_err(render_error)?;

        let instance = self
            .buffers
            .instance_buffers()
            .ok_or_else(|| render_error(RenderError::BuffersNotAllocated))?;

        self.backend.begin_frame();
        self.backend.reset_counter(&instance.visible_instances);

        let candidates = grid.cell_instance_count() * visible_cells;
        self.backend.set_fine_cull_params(&FineCullUniforms::new(
            view_proj,
            self.options.draw_distance,
            grid.cell_instance_count(),
            candidates,
        ));

        let mut workgroups = candidates.div_ceil(FINE_CULL_WORKGROUP_SIZE);
        match self.buffers.fine_cull_bindings() {
            Some(bindings) if workgroups > 0 => {
                self.backend.dispatch_fine_cull(&bindings, workgroups);
            }
            _ => workgroups = 0,
        }

        self.backend.copy_counter(
            &instance.visible_instances,
            &instance.draw_args,
            INSTANCE_COUNT_OFFSET,
        );
        if let Some(bindings) = self.buffers.draw_bindings() {
            self.backend.draw_indexed_indirect(&bindings);
        }
        self.backend.end_frame().map_err(render_error)?;

        let report = FrameReport {
            frame_index: self.frame_index,
            visible_cells,
            total_cells: grid.cell_count(),
            candidate_instances: candidates,
            workgroups,
            buffers_reallocated,
            coarse_cull_time,
        };
        self.frame_index += 1;
        log::trace!("frame {}: {report}, {workgroups} work groups", report.frame_index);
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use grassfield_core::Vec3;
    use grassfield_render::{Camera, SoftwareBackend};

    fn small_options() -> Options {
        Options {
            instance_count: 40_000,
            cell_size: 5.0,
            draw_distance: 60.0,
            ..Options::default()
        }
    }

    fn ground_camera() -> Camera {
        Camera::looking_at(Vec3::new(0.0, 2.0, 20.0), Vec3::new(0.0, 0.0, 0.0), 1.5)
    }

    #[test]
    fn test_init_rejects_bad_config() {
        let options = Options {
            cell_size: 0.0,
            ..Options::default()
        };
        assert!(matches!(
            GrassField::init(options, SoftwareBackend::new()),
            Err(GrassError::InvalidCellSize(_))
        ));

        let options = Options {
            pivot: Vec3::splat(f32::NAN),
            ..Options::default()
        };
        assert!(matches!(
            GrassField::init(options, SoftwareBackend::new()),
            Err(GrassError::InvalidPivot(_))
        ));

        // 4 instances give a 1 x 1 unit field, smaller than one cell.
        let options = Options {
            instance_count: 4,
            ..Options::default()
        };
        assert!(matches!(
            GrassField::init(options, SoftwareBackend::new()),
            Err(GrassError::EmptyGrid { .. })
        ));
    }

    #[test]
    fn test_positions_are_lazy() {
        let mut field = GrassField::init(small_options(), SoftwareBackend::new()).unwrap();
        assert!(field.positions().is_none());
        let count = field.ensure_positions().unwrap().len();
        assert_eq!(count, 40_000);
        assert_eq!(field.backend().allocations(), 0);
    }

    #[test]
    fn test_frame_draws_visible_instances() {
        let mut field = GrassField::init(small_options(), SoftwareBackend::new()).unwrap();
        let mut camera = ground_camera();
        let report = field.render_frame(Some(&mut camera)).unwrap();

        assert!(report.visible_cells > 0);
        assert!(report.visible_cells < report.total_cells);
        assert!(report.dispatched());
        assert!(report.buffers_reallocated);

        let args = field.read_draw_args().unwrap();
        assert!(args.instance_count > 0);
        assert!(args.instance_count <= report.candidate_instances);
        assert_eq!(field.backend().draws().len(), 1);
    }

    #[test]
    fn test_globals_written_every_frame() {
        let options = Options {
            pivot: Vec3::new(10.0, 0.0, -4.0),
            ..small_options()
        };
        let mut field = GrassField::init(options, SoftwareBackend::new()).unwrap();
        let mut camera = ground_camera();
        field.render_frame(Some(&mut camera)).unwrap();
        let globals = *field.backend().globals();
        assert_eq!(globals.pivot_position, [10.0, 0.0, -4.0, 1.0]);
        assert_eq!(globals.bound_size, [100.0, 100.0]);

        camera.position.x += 3.0;
        field.render_frame(Some(&mut camera)).unwrap();
        assert_ne!(field.backend().globals().view_proj, globals.view_proj);
    }

    #[test]
    fn test_instance_count_change_waits_for_invalidate() {
        let mut field = GrassField::init(small_options(), SoftwareBackend::new()).unwrap();
        let mut camera = ground_camera();
        field.render_frame(Some(&mut camera)).unwrap();

        field.set_instance_count(160_000).unwrap();
        let report = field.render_frame(Some(&mut camera)).unwrap();
        assert!(!report.buffers_reallocated);
        assert_eq!(field.positions().unwrap().len(), 40_000);

        field.invalidate_positions();
        let report = field.render_frame(Some(&mut camera)).unwrap();
        assert!(report.buffers_reallocated);
        assert_eq!(field.positions().unwrap().len(), 160_000);
        assert_eq!(field.buffers().allocation_count(), 2);
    }

    #[test]
    fn test_shutdown_releases_everything() {
        let mut field = GrassField::init(small_options(), SoftwareBackend::new()).unwrap();
        let mut camera = ground_camera();
        field.render_frame(Some(&mut camera)).unwrap();
        field.shutdown();

        assert!(!field.is_live());
        assert_eq!(field.backend().live_buffers(), 0);
        assert!(matches!(
            field.render_frame(Some(&mut camera)),
            Err(GrassError::ShutDown)
        ));
    }

    #[test]
    fn test_set_draw_distance_validates() {
        let mut field = GrassField::init(small_options(), SoftwareBackend::new()).unwrap();
        assert!(field.set_draw_distance(-1.0).is_err());
        field.set_draw_distance(30.0).unwrap();
        assert_eq!(field.options().draw_distance, 30.0);
    }
}
