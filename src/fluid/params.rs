//! Fluid simulation parameters.
//!
//! Everything the solver reads is derived from a single [`FluidParams`] value.
//! Derived lengths (voxel size, smoothing radius) are computed from the particle
//! radius so changing the radius rescales the whole neighbourhood consistently.
//! Parameters can be modified at runtime through the Bevy resource system; the
//! capacity and hash table layout are fixed once a simulation exists.

use bevy::log::warn;
use bevy::prelude::*;

use crate::error::{FluidError, FluidResult};

/// Smallest particle radius the solver accepts (meters). Smaller values are clamped.
pub const MIN_PARTICLE_RADIUS: f32 = 0.004;

/// Largest hash table whose bucket ids survive a round trip through `f32`.
pub const MAX_TABLE_SIZE: u32 = 1 << 24;

/// Layout of the spatial hash table and neighbour lists.
#[derive(Clone, Debug, PartialEq, Reflect)]
pub struct HashParams {
    /// Number of buckets. Valid bucket ids are `1..table_size`.
    pub table_size: u32,

    /// Particle slots per bucket. Extra particles in a bucket are dropped for the substep.
    pub hash_bin_size: u32,

    /// Maximum neighbours stored per particle.
    /// Anything below `27 * hash_bin_size` can truncate neighbour lists in dense regions.
    pub neighbor_bin_size: u32,

    /// Per-axis multipliers mixed into the bucket id.
    pub primes: IVec3,

    /// Added to positions before voxelization to keep voxel coordinates positive.
    pub world_offset: Vec3,
}

impl Default for HashParams {
    fn default() -> Self {
        Self {
            table_size: 999_991,
            hash_bin_size: 12,
            neighbor_bin_size: 27 * 12,
            primes: IVec3::new(73_856_093, 19_349_663, 83_492_791),
            world_offset: Vec3::new(23_869.0, 34_471.0, 71_807.0),
        }
    }
}

impl HashParams {
    /// Compact table for small scenes and tests.
    pub fn compact(table_size: u32) -> Self {
        Self {
            table_size,
            ..Self::default()
        }
    }

    pub fn with_bins(mut self, hash_bin_size: u32, neighbor_bin_size: u32) -> Self {
        self.hash_bin_size = hash_bin_size;
        self.neighbor_bin_size = neighbor_bin_size;
        self
    }

    /// Neighbour capacity that can never truncate a list built from 27 full buckets.
    pub fn lossless_neighbor_bin_size(&self) -> u32 {
        27 * self.hash_bin_size
    }

    fn validate(&self) -> FluidResult<()> {
        if self.table_size < 2 || self.table_size > MAX_TABLE_SIZE {
            return Err(FluidError::InvalidConfig(format!(
                "hash table size must be in 2..={MAX_TABLE_SIZE}, got {}",
                self.table_size
            )));
        }
        if self.hash_bin_size == 0 {
            return Err(FluidError::InvalidConfig(
                "hash bin size must be at least 1".into(),
            ));
        }
        if self.neighbor_bin_size == 0 {
            return Err(FluidError::InvalidConfig(
                "neighbour bin size must be at least 1".into(),
            ));
        }
        if !self.world_offset.is_finite() {
            return Err(FluidError::InvalidConfig(
                "hash world offset must be finite".into(),
            ));
        }
        if self.neighbor_bin_size < self.lossless_neighbor_bin_size() {
            warn!(
                "neighbour bin size {} is below 27 x hash bin size ({}); dense regions may lose neighbours",
                self.neighbor_bin_size,
                self.lossless_neighbor_bin_size()
            );
        }
        Ok(())
    }
}

/// Parameters controlling the fluid simulation behavior.
///
/// The defaults describe a centimetre-scale water-like fluid. The
/// [`rest_density`](Self::rest_density) and
/// [`constraint_epsilon`](Self::constraint_epsilon) pair is empirical and should
/// be tuned per scene rather than read as physical constants.
#[derive(Resource, Clone, Debug, PartialEq, Reflect)]
#[reflect(Resource)]
pub struct FluidParams {
    /// Target density. The density constraint is `density / rest_density - 1 = 0`.
    pub rest_density: f32,

    /// Relaxation added to the lambda denominator.
    /// Larger values make the fluid softer and the solver more stable.
    pub constraint_epsilon: f32,

    /// Constraint iterations per substep.
    pub solver_iterations: u32,

    /// Gravity acceleration vector.
    pub gravity: Vec3,

    /// Fraction of velocity removed every substep, in `[0, 1)`.
    pub drag: f32,

    /// Particle radius in meters. Clamped to [`MIN_PARTICLE_RADIUS`].
    pub particle_radius: f32,

    /// Voxel size as a multiple of the particle radius.
    pub voxel_scale: f32,

    /// Smoothing radius `H` as a multiple of the particle radius.
    pub smoothing_scale: f32,

    /// Derive the substep count from the fastest particle instead of using `fixed_substeps`.
    pub adaptive_substepping: bool,

    /// Substeps per frame when adaptive substepping is off.
    pub fixed_substeps: u32,

    /// Upper bound on substeps per frame. `None` leaves the adaptive count unbounded.
    pub max_substeps: Option<u32>,

    /// Substep counts above this are logged as a warning.
    pub substep_warning_threshold: u32,

    /// Rebuild the spatial hash every substep. When off, particles have no neighbours.
    pub hashing_enabled: bool,

    /// Particle capacity. Storage is allocated once at this size.
    pub max_particles: u32,

    /// Timestep used by the plugin. Use None to use frame delta time.
    pub fixed_timestep: Option<f32>,

    /// Spatial hash layout.
    pub hash: HashParams,
}

impl Default for FluidParams {
    fn default() -> Self {
        Self {
            rest_density: 3.0,
            constraint_epsilon: 600.0,
            solver_iterations: 4,
            gravity: Vec3::new(0.0, -9.8, 0.0),
            drag: 0.01,
            particle_radius: 0.01,
            voxel_scale: 2.65,
            smoothing_scale: 1.2,
            adaptive_substepping: false,
            fixed_substeps: 4,
            max_substeps: None,
            substep_warning_threshold: 64,
            hashing_enabled: true,
            max_particles: 100_000,
            fixed_timestep: None,
            hash: HashParams::default(),
        }
    }
}

impl FluidParams {
    /// Creates parameters for a water-like fluid.
    pub fn water() -> Self {
        Self::default()
    }

    /// Creates parameters for a slow, heavily damped fluid.
    pub fn viscous() -> Self {
        Self {
            drag: 0.08,
            constraint_epsilon: 1200.0,
            solver_iterations: 6,
            ..Self::default()
        }
    }

    pub fn with_particle_radius(mut self, radius: f32) -> Self {
        self.particle_radius = radius;
        self
    }

    pub fn with_max_particles(mut self, max_particles: u32) -> Self {
        self.max_particles = max_particles;
        self
    }

    pub fn with_gravity(mut self, gravity: Vec3) -> Self {
        self.gravity = gravity;
        self
    }

    pub fn with_drag(mut self, drag: f32) -> Self {
        self.drag = drag;
        self
    }

    pub fn with_rest_density(mut self, rest_density: f32) -> Self {
        self.rest_density = rest_density;
        self
    }

    pub fn with_solver_iterations(mut self, iterations: u32) -> Self {
        self.solver_iterations = iterations;
        self
    }

    pub fn with_fixed_substeps(mut self, substeps: u32) -> Self {
        self.adaptive_substepping = false;
        self.fixed_substeps = substeps;
        self
    }

    /// Enables adaptive substepping, optionally bounded by `max_substeps`.
    pub fn with_adaptive_substeps(mut self, max_substeps: Option<u32>) -> Self {
        self.adaptive_substepping = true;
        self.max_substeps = max_substeps;
        self
    }

    pub fn with_hashing(mut self, enabled: bool) -> Self {
        self.hashing_enabled = enabled;
        self
    }

    pub fn with_hash(mut self, hash: HashParams) -> Self {
        self.hash = hash;
        self
    }

    pub fn with_fixed_timestep(mut self, timestep: f32) -> Self {
        self.fixed_timestep = Some(timestep);
        self
    }

    /// Smoothing radius `H`, the support of every kernel.
    pub fn smoothing_radius(&self) -> f32 {
        self.particle_radius * self.smoothing_scale
    }

    /// Edge length of a spatial hash voxel.
    pub fn voxel_size(&self) -> f32 {
        self.particle_radius * self.voxel_scale
    }

    /// Checks every field and returns a normalized copy.
    ///
    /// The particle radius is raised to [`MIN_PARTICLE_RADIUS`] with a warning.
    /// Everything else out of range is rejected.
    pub fn validate(&self) -> FluidResult<FluidParams> {
        let mut params = self.clone();

        if !(params.particle_radius.is_finite() && params.particle_radius > 0.0) {
            return Err(FluidError::InvalidConfig(format!(
                "particle radius must be positive, got {}",
                params.particle_radius
            )));
        }
        if params.particle_radius < MIN_PARTICLE_RADIUS {
            warn!(
                "particle radius {} is below the minimum; clamping to {}",
                params.particle_radius, MIN_PARTICLE_RADIUS
            );
            params.particle_radius = MIN_PARTICLE_RADIUS;
        }
        if !(params.rest_density.is_finite() && params.rest_density > 0.0) {
            return Err(FluidError::InvalidConfig(format!(
                "rest density must be positive, got {}",
                params.rest_density
            )));
        }
        if !(params.constraint_epsilon.is_finite() && params.constraint_epsilon >= 0.0) {
            return Err(FluidError::InvalidConfig(format!(
                "constraint epsilon must be non-negative, got {}",
                params.constraint_epsilon
            )));
        }
        if params.constraint_epsilon == 0.0 {
            warn!("constraint epsilon is zero; isolated particles will produce infinite lambdas");
        }
        if !(0.0..1.0).contains(&params.drag) {
            return Err(FluidError::InvalidConfig(format!(
                "drag must be in [0, 1), got {}",
                params.drag
            )));
        }
        if !params.gravity.is_finite() {
            return Err(FluidError::InvalidConfig("gravity must be finite".into()));
        }
        if params.solver_iterations == 0 {
            return Err(FluidError::InvalidConfig(
                "solver iterations must be at least 1".into(),
            ));
        }
        if params.fixed_substeps == 0 {
            return Err(FluidError::InvalidConfig(
                "fixed substeps must be at least 1".into(),
            ));
        }
        if params.max_substeps == Some(0) {
            return Err(FluidError::InvalidConfig(
                "max substeps must be at least 1 when set".into(),
            ));
        }
        if params.max_particles == 0 {
            return Err(FluidError::InvalidConfig(
                "max particles must be at least 1".into(),
            ));
        }
        if !(params.smoothing_scale.is_finite() && params.smoothing_scale > 0.0) {
            return Err(FluidError::InvalidConfig(format!(
                "smoothing scale must be positive, got {}",
                params.smoothing_scale
            )));
        }
        // The 27-voxel search only finds every particle within H when voxels are at least H wide.
        if !(params.voxel_scale.is_finite() && params.voxel_scale >= params.smoothing_scale) {
            return Err(FluidError::InvalidConfig(format!(
                "voxel scale {} must be at least the smoothing scale {}",
                params.voxel_scale, params.smoothing_scale
            )));
        }
        if let Some(timestep) = params.fixed_timestep {
            if !(timestep.is_finite() && timestep > 0.0) {
                return Err(FluidError::InvalidConfig(format!(
                    "fixed timestep must be positive, got {timestep}"
                )));
            }
        }
        params.hash.validate()?;

        Ok(params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_params_are_valid() {
        let params = FluidParams::default();
        let validated = params.validate().unwrap();
        assert_eq!(validated, params);
        assert!((params.smoothing_radius() - 0.012).abs() < 1e-6);
        assert!((params.voxel_size() - 0.0265).abs() < 1e-6);
        assert_eq!(params.hash.neighbor_bin_size, 324);
    }

    #[test]
    fn test_radius_below_minimum_is_clamped() {
        let params = FluidParams::default().with_particle_radius(0.001);
        let validated = params.validate().unwrap();
        assert_eq!(validated.particle_radius, MIN_PARTICLE_RADIUS);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let cases = [
            FluidParams::default().with_rest_density(0.0),
            FluidParams::default().with_drag(1.0),
            FluidParams::default().with_solver_iterations(0),
            FluidParams::default().with_max_particles(0),
            FluidParams::default().with_particle_radius(f32::NAN),
            FluidParams::default().with_adaptive_substeps(Some(0)),
            FluidParams::default().with_hash(HashParams::compact(1)),
            FluidParams::default().with_hash(HashParams::default().with_bins(0, 10)),
            FluidParams {
                voxel_scale: 1.0,
                ..FluidParams::default()
            },
        ];
        for params in cases {
            assert!(
                matches!(params.validate(), Err(FluidError::InvalidConfig(_))),
                "{params:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_presets_differ() {
        let water = FluidParams::water();
        let viscous = FluidParams::viscous();
        assert!(viscous.drag > water.drag);
        assert!(viscous.validate().is_ok());
    }
}
