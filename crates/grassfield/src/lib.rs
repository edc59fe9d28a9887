//! grassfield: very large instanced grass fields drawn with one indirect call.
//!
//! Culling runs in two stages. A coarse pass on the CPU tests square cells
//! of a grid against the camera frustum. A fine pass on the GPU tests every
//! instance of the surviving cells and appends the survivors to a buffer
//! whose counter becomes the instance count of a single indirect draw.
//!
//! # Quick Start
//!
//! ```no_run
//! use grassfield::*;
//!
//! fn main() -> Result<()> {
//!     let options = Options {
//!         instance_count: 1_000_000,
//!         draw_distance: 125.0,
//!         ..Options::default()
//!     };
//!     let mut field = GrassField::init_headless(options, 1280, 720)?;
//!     let mut camera = Camera::looking_at(Vec3::new(0.0, 4.0, 60.0), Vec3::ZERO, 1280.0 / 720.0);
//!
//!     for _ in 0..3 {
//!         let report = field.render_frame(Some(&mut camera))?;
//!         println!("{report}");
//!         camera.orbit(0.05, 0.0);
//!     }
//!     field.save_frame("grass.png")?;
//!     field.shutdown();
//!     Ok(())
//! }
//! ```
//!
//! # Frame order
//!
//! [`GrassField::render_frame`] ensures the instance buffers, runs the coarse
//! cull with the far plane clamped to the draw distance, uploads the visible
//! cells, resets the append counter, sets the fine-cull parameters, dispatches
//! the fine cull, copies the counter into the draw arguments and issues the
//! draw.

// Documentation lints - internal functions don't need exhaustive panic/error docs
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]

mod field;
mod frame;
mod headless;

pub use field::GrassField;
pub use frame::FrameReport;
pub use headless::{render_to_file, render_to_image};

// Re-export core types
pub use grassfield_core::{
    cell_visible, cull_parallel, cull_sequential, BoundingTransform, CellGrid, CoarseCuller,
    CullMode, Frustum, FrustumSource, GrassError, InstancePositions, Options, Plane, Result, Mat4,
    Vec2, Vec3, Vec4,
};

// Re-export render types
pub use grassfield_render::{
    BladeMesh, BufferKind, Camera, DrawIndexedArgs, DrawRecord, FineCullUniforms, GpuBackend,
    GpuBufferManager, IndexedMesh, MeshProvider, RenderError, SoftwareBackend, WgpuBackend,
};
