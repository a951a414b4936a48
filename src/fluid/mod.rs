//! Position Based Fluids (PBF) simulation module for Bevy.
//!
//! The simulation runs on the CPU with data-parallel stages and is driven
//! either directly through [`FluidSimulation`](simulation::FluidSimulation)
//! or by [`FluidPlugin`](plugin::FluidPlugin) inside a Bevy app.
//!
//! # Architecture
//!
//! - [`params`]: Simulation parameters and their validation
//! - [`spatial`]: Voxel quantization and bucket hashing
//! - [`neighbors`]: Bucket table and per-particle neighbor lists
//! - [`particle`]: Fixed-capacity particle pool
//! - [`kernels`]: SPH smoothing kernels
//! - [`solver`]: The per-substep solver stages
//! - [`boundary`]: Plane and cylinder colliders
//! - [`simulation`]: The frame pipeline tying everything together
//! - [`snapshot`]: Read-only particle views for rendering and debugging
//! - [`plugin`]: Bevy plugin for easy integration
//!
//! # Example
//!
//! ```rust,no_run
//! use bevy::prelude::*;
//! use rivulet::fluid::prelude::*;
//!
//! let mut simulation = FluidSimulation::new(FluidParams::water().with_max_particles(1_000))?;
//! let block: Vec<Vec3> = (0..125)
//!     .map(|i| Vec3::new((i % 5) as f32, (i / 5 % 5) as f32, (i / 25) as f32) * 0.02)
//!     .collect();
//! simulation.emit_particles(FluidProperties::default(), &block, Vec3::ZERO);
//! simulation.step(1.0 / 60.0);
//! # Ok::<(), rivulet::FluidError>(())
//! ```

pub mod boundary;
pub mod kernels;
pub mod neighbors;
pub mod params;
pub mod particle;
pub mod plugin;
pub mod simulation;
pub mod snapshot;
pub mod solver;
pub mod spatial;

/// Prelude for convenient imports.
pub mod prelude {
    pub use super::boundary::*;
    pub use super::kernels::*;
    pub use super::neighbors::*;
    pub use super::params::*;
    pub use super::particle::*;
    pub use super::plugin::*;
    pub use super::simulation::*;
    pub use super::snapshot::*;
    pub use super::solver::*;
    pub use super::spatial::*;
}
