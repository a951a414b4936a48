//! Rivulet - headless Position Based Fluids demo
//!
//! Fills a cylindrical tank standing on a floor with a block of fluid, runs a
//! fixed number of frames and logs simulation statistics.

use std::f32::consts::FRAC_PI_2;

use bevy::log::{info, LogPlugin};
use bevy::prelude::*;
use bevy::transform::TransformPlugin;
use clap::Parser;
use rivulet::prelude::*;

#[derive(Parser, Debug, Resource, Clone)]
#[command(name = "rivulet", about = "Headless Position Based Fluids demo")]
struct Args {
    /// Frames to simulate
    #[arg(short, long, default_value_t = 240)]
    frames: u32,

    /// Particle radius in meters
    #[arg(short, long, default_value_t = 0.01)]
    radius: f32,

    /// Half extent of the emitted block in meters
    #[arg(long, default_value_t = 0.06)]
    block: f32,

    /// Derive the substep count from the fastest particle
    #[arg(long)]
    adaptive: bool,

    /// Upper bound on adaptive substeps
    #[arg(long)]
    max_substeps: Option<u32>,

    /// Log statistics every N frames
    #[arg(long, default_value_t = 30)]
    report_every: u32,
}

/// Local +Z of planes and cylinders rotated onto world +Y.
fn z_up() -> Quat {
    Quat::from_rotation_x(-FRAC_PI_2)
}

fn main() {
    let args = Args::parse();

    let mut params = FluidParams::water()
        .with_particle_radius(args.radius)
        .with_max_particles(50_000)
        .with_fixed_timestep(1.0 / 60.0);
    if args.adaptive {
        params = params.with_adaptive_substeps(args.max_substeps);
    }

    let mut app = App::new();
    app.add_plugins((
        MinimalPlugins,
        LogPlugin::default(),
        TransformPlugin,
        FluidPlugin::with_params(params),
    ))
    .insert_resource(args.clone())
    .add_systems(Startup, setup_scene)
    .add_systems(Update, report.after(FluidSystems::Publish));

    app.finish();
    app.cleanup();
    for _ in 0..args.frames {
        app.update();
    }

    let simulation = app.world().resource::<FluidSimulation>();
    let totals = simulation.overflow_totals();
    info!(
        "done: {} frames, {:.2} s simulated, {} particles, overflows: {} dropped, {} bucket, {} neighbor",
        simulation.frame(),
        simulation.simulation_time(),
        simulation.particle_count(),
        totals.dropped_particles,
        totals.bucket_overflows,
        totals.neighbor_overflows,
    );
}

/// Set up the tank, the floor and the initial block of fluid.
fn setup_scene(mut commands: Commands, mut queue: ResMut<EmissionQueue>, args: Res<Args>) {
    let floor = Transform::from_rotation(z_up());
    commands.spawn((
        FluidCollider::plane(PlaneShape::infinite()),
        floor,
        GlobalTransform::from(floor),
    ));

    let tank = Transform::from_rotation(z_up());
    commands.spawn((
        FluidCollider::cylinder(args.block * 2.5, args.block * 6.0),
        tank,
        GlobalTransform::from(tank),
    ));

    let spacing = args.radius * 2.0;
    let block = block_lattice(
        args.block,
        spacing,
        Vec3::new(0.0, args.block + spacing * 2.0, 0.0),
    );
    info!("emitting {} particles", block.len());
    queue.emit(FluidProperties::default(), block, Vec3::ZERO);
}

/// Cube of lattice points `spacing` apart, `half_extent` around `center`.
fn block_lattice(half_extent: f32, spacing: f32, center: Vec3) -> Vec<Vec3> {
    if !(spacing > 0.0) {
        return Vec::new();
    }
    let steps = (half_extent * 2.0 / spacing).floor() as u32 + 1;
    let corner = center - Vec3::splat(half_extent);
    let mut positions = Vec::with_capacity((steps * steps * steps) as usize);
    for x in 0..steps {
        for y in 0..steps {
            for z in 0..steps {
                positions.push(corner + UVec3::new(x, y, z).as_vec3() * spacing);
            }
        }
    }
    positions
}

fn report(simulation: Res<FluidSimulation>, snapshot: Res<ParticleSnapshot>, args: Res<Args>) {
    let frame = simulation.frame();
    if frame == 0 || frame % args.report_every.max(1) as u64 != 0 {
        return;
    }
    let step = simulation.last_report();
    let lowest = snapshot
        .positions
        .iter()
        .map(|p| p.y)
        .fold(f32::INFINITY, f32::min);
    info!(
        "frame {}: {} particles, {} substeps, peak velocity {:.3} m/s, lowest particle {:.4} m",
        frame, step.particle_count, step.substeps, step.peak_velocity, lowest
    );
}
