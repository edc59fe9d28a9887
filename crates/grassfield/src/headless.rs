//! Headless rendering of a grass field.
//!
//! Renders frames into an offscreen target without opening a window.
//! Useful for integration tests, batch processing, and screenshots.

use std::path::Path;

use grassfield_core::{FrustumSource, Options, Result};
use grassfield_render::{save_image, WgpuBackend};
use pollster::FutureExt;

use crate::field::{render_error, GrassField};
use crate::frame::FrameReport;

impl GrassField<WgpuBackend> {
    /// Creates a field drawing into a `width` x `height` offscreen target.
    pub fn init_headless(options: Options, width: u32, height: u32) -> Result<Self> {
        let backend = WgpuBackend::new_headless(width, height)
            .block_on()
            .map_err(render_error)?;
        Self::init(options, backend)
    }

    /// Reads the last rendered frame as RGBA8 pixels, row by row from the top.
    pub fn capture_pixels(&mut self) -> Result<Vec<u8>> {
        self.backend_mut().read_pixels().map_err(render_error)
    }

    /// Saves the last rendered frame as PNG or JPEG, chosen by extension.
    pub fn save_frame(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let pixels = self.capture_pixels()?;
        let (width, height) = (self.backend().width(), self.backend().height());
        save_image(path, &pixels, width, height).map_err(|e| {
            grassfield_core::GrassError::RenderError(format!("failed to save image: {e}"))
        })
    }
}

/// Renders one frame of a new field to a raw RGBA pixel buffer.
///
/// The returned buffer is `width * height * 4` bytes.
///
/// # Example
/// ```no_run
/// use grassfield::*;
///
/// let mut camera = Camera::looking_at(Vec3::new(0.0, 3.0, 40.0), Vec3::ZERO, 800.0 / 600.0);
/// let (pixels, report) = render_to_image(Options::default(), &mut camera, 800, 600).unwrap();
/// assert_eq!(pixels.len(), 800 * 600 * 4);
/// println!("{report}");
/// ```
pub fn render_to_image<C>(
    options: Options,
    camera: &mut C,
    width: u32,
    height: u32,
) -> Result<(Vec<u8>, FrameReport)>
where
    C: FrustumSource + ?Sized,
{
    let mut field = GrassField::init_headless(options, width, height)?;
    let report = field.render_frame(Some(camera))?;
    let pixels = field.capture_pixels()?;
    field.shutdown();
    Ok((pixels, report))
}

/// Renders one frame of a new field and saves it to `path`.
pub fn render_to_file<C>(
    options: Options,
    camera: &mut C,
    path: impl AsRef<Path>,
    width: u32,
    height: u32,
) -> Result<FrameReport>
where
    C: FrustumSource + ?Sized,
{
    let mut field = GrassField::init_headless(options, width, height)?;
    let report = field.render_frame(Some(camera))?;
    field.save_frame(path)?;
    field.shutdown();
    Ok(report)
}
