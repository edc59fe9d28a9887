//! Demo: orbits a camera inward over a million-blade field and saves the last frame.
//!
//! Usage: `cargo run --example demo -- [options.json] [output.png]`
//!
//! Without a GPU adapter the frames run on the software backend and only
//! the statistics are printed.

use grassfield::*;

const FRAMES: u32 = 24;
const WIDTH: u32 = 1280;
const HEIGHT: u32 = 720;

fn orbit_frames<B: GpuBackend>(field: &mut GrassField<B>, camera: &mut Camera) -> Result<()> {
    for _ in 0..FRAMES {
        let report = field.render_frame(Some(&mut *camera))?;
        println!(
            "frame {:>2}: {report} ({:.1}%), {} candidates, coarse cull {:?}",
            report.frame_index,
            report.visible_fraction() * 100.0,
            report.candidate_instances,
            report.coarse_cull_time
        );
        camera.orbit(std::f32::consts::TAU / FRAMES as f32, 0.0);
        camera.zoom(1.0);
    }
    let args = field.read_draw_args()?;
    println!("last frame drew {} instances", args.instance_count);
    Ok(())
}

fn main() -> Result<()> {
    env_logger::init();

    let mut args = std::env::args().skip(1);
    let options = match args.next() {
        Some(path) => Options::load(path)?,
        None => Options::default(),
    };
    let output = args.next().unwrap_or_else(|| "grass.png".to_string());

    println!("options: {}", options.to_json()?);

    let mut camera = Camera::looking_at(
        Vec3::new(0.0, 6.0, 60.0),
        Vec3::ZERO,
        WIDTH as f32 / HEIGHT as f32,
    );

    match GrassField::init_headless(options.clone(), WIDTH, HEIGHT) {
        Ok(mut field) => {
            orbit_frames(&mut field, &mut camera)?;
            field.save_frame(&output)?;
            println!("saved {output}");
            field.shutdown();
        }
        Err(e) => {
            println!("no GPU available ({e}); using the software backend");
            let mut field = GrassField::init(options, SoftwareBackend::new())?;
            orbit_frames(&mut field, &mut camera)?;
            field.shutdown();
        }
    }

    Ok(())
}
