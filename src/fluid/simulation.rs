//! Fluid simulation core logic.
//!
//! [`FluidSimulation`] owns the particle pool, the neighbor grid and the
//! colliders, and advances them one frame at a time. A frame is split into
//! substeps; each substep runs the stages in [`solver`](super::solver) in a
//! fixed order. Stages run to completion before the next one starts.

use bevy::log::{debug, info, warn};
use bevy::prelude::*;

use super::boundary::{ColliderHandle, ColliderSet, ColliderShape};
use super::neighbors::NeighborGrid;
use super::params::FluidParams;
use super::particle::{EmitReport, FluidProperties, ParticleStore};
use super::snapshot::{ParticleProbe, ParticleSnapshot};
use super::solver::{self, CollisionStage, CorrectionStage, SubstepPlan, SubstepStages};
use crate::error::{FluidError, FluidResult};

/// Capacity overflows. Each one truncated some data without failing the step.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Reflect)]
pub struct OverflowCounters {
    /// Emitted particles discarded because the pool was full.
    pub dropped_particles: usize,
    /// Particles left out of a full hash bucket, summed over substeps.
    pub bucket_overflows: usize,
    /// Neighbors left out of a full neighbor list, summed over substeps.
    pub neighbor_overflows: usize,
}

impl OverflowCounters {
    pub fn any(&self) -> bool {
        self.dropped_particles > 0 || self.bucket_overflows > 0 || self.neighbor_overflows > 0
    }

    fn accumulate(&mut self, other: &OverflowCounters) {
        self.dropped_particles += other.dropped_particles;
        self.bucket_overflows += other.bucket_overflows;
        self.neighbor_overflows += other.neighbor_overflows;
    }
}

/// Summary of one [`FluidSimulation::step`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Reflect)]
pub struct StepReport {
    pub frame_delta: f32,
    /// Substeps run. Zero when the step was skipped.
    pub substeps: u32,
    pub sub_delta: f32,
    /// Fastest particle at the start of the frame.
    pub peak_velocity: f32,
    /// The adaptive substep count hit `max_substeps`.
    pub substeps_clamped: bool,
    pub particle_count: usize,
    /// Overflows during this step only.
    pub overflow: OverflowCounters,
}

/// Particles waiting to be added to the simulation.
///
/// Lets systems request emission without borrowing the simulation; the plugin
/// drains it once per frame before stepping.
#[derive(Resource, Default, Debug)]
pub struct EmissionQueue {
    batches: Vec<EmissionBatch>,
}

#[derive(Clone, Debug)]
struct EmissionBatch {
    properties: FluidProperties,
    positions: Vec<Vec3>,
    velocities: EmissionVelocity,
}

#[derive(Clone, Debug)]
enum EmissionVelocity {
    Uniform(Vec3),
    PerParticle(Vec<Vec3>),
}

impl EmissionQueue {
    /// Queues particles sharing one initial velocity.
    pub fn emit(&mut self, properties: FluidProperties, positions: Vec<Vec3>, velocity: Vec3) {
        self.batches.push(EmissionBatch {
            properties,
            positions,
            velocities: EmissionVelocity::Uniform(velocity),
        });
    }

    /// Queues particles with individual velocities.
    pub fn emit_with_velocities(
        &mut self,
        properties: FluidProperties,
        positions: Vec<Vec3>,
        velocities: Vec<Vec3>,
    ) {
        self.batches.push(EmissionBatch {
            properties,
            positions,
            velocities: EmissionVelocity::PerParticle(velocities),
        });
    }

    /// Number of queued particles.
    pub fn len(&self) -> usize {
        self.batches.iter().map(|batch| batch.positions.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    /// Moves every queued batch into `simulation`, oldest first.
    pub fn drain_into(&mut self, simulation: &mut FluidSimulation) -> FluidResult<EmitReport> {
        let mut total = EmitReport::default();
        let mut first_error = None;
        for batch in self.batches.drain(..) {
            let report = match batch.velocities {
                EmissionVelocity::Uniform(velocity) => {
                    Ok(simulation.emit_particles(batch.properties, &batch.positions, velocity))
                }
                EmissionVelocity::PerParticle(velocities) => simulation
                    .emit_particles_with_velocities(batch.properties, &batch.positions, &velocities),
            };
            match report {
                Ok(report) => {
                    total.accepted += report.accepted;
                    total.dropped += report.dropped;
                }
                Err(err) => {
                    first_error.get_or_insert(err);
                }
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(total),
        }
    }
}

/// Main fluid simulation resource.
#[derive(Resource)]
pub struct FluidSimulation {
    params: FluidParams,
    particles: ParticleStore,
    grid: NeighborGrid,
    colliders: ColliderSet,
    overflow: OverflowCounters,
    pending_drops: usize,
    last_report: StepReport,
    simulation_time: f64,
    frame: u64,
}

impl Default for FluidSimulation {
    fn default() -> Self {
        Self::from_validated(FluidParams::default())
    }
}

impl FluidSimulation {
    /// Validates `params` and allocates all storage at full capacity.
    pub fn new(params: FluidParams) -> FluidResult<Self> {
        Ok(Self::from_validated(params.validate()?))
    }

    fn from_validated(params: FluidParams) -> Self {
        info!(
            "fluid simulation: {} particles max, radius {} m, smoothing radius {} m, voxel {} m, hash table {} x {}",
            params.max_particles,
            params.particle_radius,
            params.smoothing_radius(),
            params.voxel_size(),
            params.hash.table_size,
            params.hash.hash_bin_size,
        );
        Self {
            particles: ParticleStore::with_capacity(params.max_particles as usize),
            grid: NeighborGrid::new(&params),
            colliders: ColliderSet::default(),
            overflow: OverflowCounters::default(),
            pending_drops: 0,
            last_report: StepReport::default(),
            simulation_time: 0.0,
            frame: 0,
            params,
        }
    }

    pub fn params(&self) -> &FluidParams {
        &self.params
    }

    /// Replaces the tunable parameters.
    ///
    /// Capacity, particle radius, voxel and smoothing scales and hash layout
    /// shape the allocated buffers and the neighbor search, so they cannot
    /// change on a live simulation.
    pub fn set_params(&mut self, params: FluidParams) -> FluidResult<()> {
        let params = params.validate()?;
        if params.max_particles != self.params.max_particles
            || params.hash != self.params.hash
            || params.particle_radius != self.params.particle_radius
            || params.voxel_scale != self.params.voxel_scale
            || params.smoothing_scale != self.params.smoothing_scale
        {
            return Err(FluidError::InvalidConfig(
                "capacity, particle radius, voxel and smoothing scales and hash layout are fixed after creation"
                    .into(),
            ));
        }
        self.params = params;
        Ok(())
    }

    pub fn particle_count(&self) -> usize {
        self.particles.len()
    }

    pub fn capacity(&self) -> usize {
        self.particles.capacity()
    }

    /// Read-only access to every particle attribute.
    pub fn particles(&self) -> &ParticleStore {
        &self.particles
    }

    pub fn neighbor_grid(&self) -> &NeighborGrid {
        &self.grid
    }

    pub fn colliders(&self) -> &ColliderSet {
        &self.colliders
    }

    /// Seconds simulated so far.
    pub fn simulation_time(&self) -> f64 {
        self.simulation_time
    }

    /// Steps that ran at least one substep.
    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub fn last_report(&self) -> &StepReport {
        &self.last_report
    }

    /// Overflows since creation.
    pub fn overflow_totals(&self) -> &OverflowCounters {
        &self.overflow
    }

    /// Adds particles sharing one velocity. Particles past capacity are dropped and counted.
    pub fn emit_particles(
        &mut self,
        properties: FluidProperties,
        positions: &[Vec3],
        velocity: Vec3,
    ) -> EmitReport {
        let report = self.particles.emit(properties, positions, velocity);
        self.record_drops(report.dropped);
        report
    }

    pub fn emit_particles_with_velocities(
        &mut self,
        properties: FluidProperties,
        positions: &[Vec3],
        velocities: &[Vec3],
    ) -> FluidResult<EmitReport> {
        let report = self
            .particles
            .emit_with_velocities(properties, positions, velocities)?;
        self.record_drops(report.dropped);
        Ok(report)
    }

    fn record_drops(&mut self, dropped: usize) {
        self.pending_drops += dropped;
        self.overflow.dropped_particles += dropped;
    }

    /// Removes a particle. The last particle takes over its index.
    pub fn delete_particle(&mut self, index: usize) -> FluidResult<()> {
        self.particles.swap_remove(index)
    }

    /// Removes every particle.
    pub fn clear_particles(&mut self) {
        self.particles.clear();
    }

    pub fn register_collider(
        &mut self,
        shape: impl Into<ColliderShape>,
        local_to_world: Mat4,
    ) -> FluidResult<ColliderHandle> {
        let handle = self.colliders.register(shape, local_to_world)?;
        debug!("registered collider {:?}", handle);
        Ok(handle)
    }

    pub fn set_collider_transform(
        &mut self,
        handle: ColliderHandle,
        local_to_world: Mat4,
    ) -> FluidResult<()> {
        self.colliders.set_transform(handle, local_to_world)
    }

    pub fn set_collider_active(&mut self, handle: ColliderHandle, active: bool) -> FluidResult<()> {
        self.colliders.set_active(handle, active)
    }

    pub fn remove_collider(&mut self, handle: ColliderHandle) -> FluidResult<()> {
        self.colliders.remove(handle).map(|_| ())
    }

    /// Advances the simulation by `frame_delta` seconds.
    ///
    /// Does nothing when there are no particles or `frame_delta` is not positive.
    pub fn step(&mut self, frame_delta: f32) -> StepReport {
        let count = self.particles.len();
        let mut overflow = OverflowCounters {
            dropped_particles: std::mem::take(&mut self.pending_drops),
            ..default()
        };

        if count == 0 || !(frame_delta > 0.0) {
            self.last_report = StepReport {
                frame_delta,
                particle_count: count,
                overflow,
                ..default()
            };
            return self.last_report;
        }

        let peak_velocity = solver::peak_velocity(self.particles.velocities());
        let plan = SubstepPlan::new(&self.params, peak_velocity, frame_delta);
        if plan.clamped {
            warn!(
                "peak velocity {:.3} m/s needs {} substeps; clamped to {}",
                peak_velocity, plan.requested, plan.substeps
            );
        } else if plan.substeps > self.params.substep_warning_threshold {
            warn!(
                "peak velocity {:.3} m/s needs {} substeps this frame",
                peak_velocity, plan.substeps
            );
        }

        for _ in 0..plan.substeps {
            self.substep(plan.sub_delta, &mut overflow);
        }

        if overflow.bucket_overflows > 0 || overflow.neighbor_overflows > 0 {
            warn!(
                "neighbor search truncated: {} bucket overflows, {} neighbor overflows",
                overflow.bucket_overflows, overflow.neighbor_overflows
            );
        }
        // Drops were already folded into the totals when they were emitted.
        self.overflow.accumulate(&OverflowCounters {
            dropped_particles: 0,
            ..overflow
        });

        self.simulation_time += frame_delta as f64;
        self.frame += 1;
        self.last_report = StepReport {
            frame_delta,
            substeps: plan.substeps,
            sub_delta: plan.sub_delta,
            peak_velocity,
            substeps_clamped: plan.clamped,
            particle_count: count,
            overflow,
        };

        debug!(
            "frame {}: {} particles, {} substeps of {:.5} s, peak velocity {:.3} m/s",
            self.frame, count, plan.substeps, plan.sub_delta, peak_velocity
        );

        self.last_report
    }

    fn substep(&mut self, delta: f32, overflow: &mut OverflowCounters) {
        let n = self.particles.len();
        let stages = SubstepStages::new(&self.params, delta);
        let collision = CollisionStage {
            colliders: &self.colliders,
            particle_radius: self.params.particle_radius,
        };
        let particles = &mut self.particles;

        stages.project.run(
            &particles.positions[..n],
            &mut particles.velocities[..n],
            &mut particles.projected[..n],
        );

        if self.params.hashing_enabled {
            let pass = self.grid.rehash(&mut particles.projected[..n]);
            overflow.bucket_overflows += pass.bucket_overflows();
            overflow.neighbor_overflows += self
                .grid
                .collect_neighbors(&pass, &particles.projected[..n]);
        } else {
            self.grid.clear_neighbors(n);
        }

        for _ in 0..self.params.solver_iterations {
            stages.density.run(
                &particles.projected[..n],
                &self.grid,
                &mut particles.densities[..n],
                &mut particles.density_errors[..n],
                &mut particles.within_h[..n],
            );
            stages.lambda.run(
                &particles.projected[..n],
                &self.grid,
                &particles.density_errors[..n],
                &mut particles.lambdas[..n],
                &mut particles.gradients[..n],
            );
            stages.correction.compute(
                &particles.projected[..n],
                &self.grid,
                &particles.lambdas[..n],
                &mut particles.corrections[..n],
            );
            CorrectionStage::apply(
                &particles.corrections[..n],
                &mut particles.projected[..n],
            );
            collision.run(
                &mut particles.projected[..n],
                &mut particles.collisions[..n],
            );
        }

        stages.commit.run(
            &particles.projected[..n],
            &mut particles.positions[..n],
            &mut particles.velocities[..n],
        );
    }

    /// Copies the active positions into a new snapshot.
    pub fn snapshot(&self) -> ParticleSnapshot {
        let mut snapshot = ParticleSnapshot::default();
        self.write_snapshot(&mut snapshot);
        snapshot
    }

    /// Copies the active positions into `snapshot`, reusing its buffer.
    pub fn write_snapshot(&self, snapshot: &mut ParticleSnapshot) {
        snapshot.positions.clear();
        snapshot
            .positions
            .extend_from_slice(self.particles.positions());
        snapshot.particle_radius = self.params.particle_radius;
        snapshot.frame = self.frame;
    }

    /// Every attribute of particle `index`, or `None` past the active range.
    pub fn probe(&self, index: usize) -> Option<ParticleProbe> {
        if index >= self.particles.len() {
            return None;
        }
        let p = &self.particles;
        let projected = p.projected[index];
        let collision = p.collisions[index];
        Some(ParticleProbe {
            index,
            position: p.positions[index],
            projected_position: projected.truncate(),
            velocity: p.velocities[index],
            mass: p.properties[index].mass,
            viscosity: p.properties[index].viscosity,
            density: p.densities[index],
            density_error: p.density_errors[index],
            within_h: p.within_h[index],
            gradient: p.gradients[index],
            lambda: p.lambdas[index],
            correction: p.corrections[index],
            hash_bucket: projected.w as u32,
            collision_point: collision.truncate(),
            collision_distance: collision.w,
            neighbors: self.grid.neighbors_of(index).to_vec(),
        })
    }
}
