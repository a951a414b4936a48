//! Rivulet - Position Based Fluids for Bevy
//!
//! A CPU particle fluid core: spatial hashing, neighbor search, a PBF density
//! solver and primitive colliders, with a Bevy plugin on top.
//!
//! # Features
//!
//! - **PBF Simulation**: Density constraints solved per substep with poly6 and spiky kernels
//! - **Adaptive Substepping**: Substep count follows the fastest particle
//! - **Spatial Hashing**: Fixed-size bucket table, 27-voxel neighbor search
//! - **Colliders**: Finite and infinite planes, capped cylinder containers
//! - **Data Parallel**: Every stage runs across particles with rayon
//! - **Easy Integration**: Simple Bevy plugin interface
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use bevy::prelude::*;
//! use rivulet::prelude::*;
//!
//! fn main() {
//!     App::new()
//!         .add_plugins(MinimalPlugins)
//!         .add_plugins(FluidPlugin::with_params(FluidParams::water()))
//!         .add_systems(Startup, setup)
//!         .run();
//! }
//!
//! fn setup(mut commands: Commands, mut queue: ResMut<EmissionQueue>) {
//!     // Floor: the plane's local +Z normal rotated to world +Y.
//!     commands.spawn((
//!         FluidCollider::plane(PlaneShape::infinite()),
//!         Transform::from_rotation(Quat::from_rotation_x(-std::f32::consts::FRAC_PI_2)),
//!     ));
//!
//!     let block: Vec<Vec3> = (0..1000)
//!         .map(|i| Vec3::new((i % 10) as f32, (i / 10 % 10 + 10) as f32, (i / 100) as f32) * 0.02)
//!         .collect();
//!     queue.emit(FluidProperties::default(), block, Vec3::ZERO);
//! }
//! ```

pub mod error;
pub mod fluid;

pub use error::{FluidError, FluidResult};

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::error::{FluidError, FluidResult};
    pub use crate::fluid::prelude::*;
}
