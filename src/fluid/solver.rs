//! PBF (Position Based Fluids) constraint solver stages.
//!
//! One substep runs:
//!
//! 1. [`ProjectStage`]: drag, gravity and position prediction
//! 2. spatial hash rebuild and neighbor collection ([`NeighborGrid`])
//! 3. `solver_iterations` times:
//!    [`DensityStage`], [`LambdaStage`], [`CorrectionStage`], [`CollisionStage`]
//! 4. [`CommitStage`]: velocity from displacement, positions committed
//!
//! Each stage is a small value built fresh for the substep from the current
//! parameters. Stages borrow exactly the attribute slices they read and write,
//! and every stage is a data-parallel loop over particles. Writes go to the
//! particle's own slot only, so stages never race.

use bevy::prelude::*;
use rayon::prelude::*;

use super::boundary::ColliderSet;
use super::kernels::SphKernels;
use super::neighbors::NeighborGrid;
use super::params::FluidParams;

/// Speed at which gravity stops accelerating a particle.
pub const TERMINAL_VELOCITY: f32 = 9.0;

/// Multiplier applied to the accumulated position correction.
pub const CORRECTION_SCALE: f32 = 2.0;

/// Safety factor on the adaptive substep estimate.
pub const SUBSTEP_SAFETY: f32 = 1.3;

/// Substep count and length chosen for one frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SubstepPlan {
    /// Substeps before clamping to `max_substeps`.
    pub requested: u32,
    pub substeps: u32,
    pub sub_delta: f32,
    pub clamped: bool,
}

impl SubstepPlan {
    pub fn new(params: &FluidParams, peak_velocity: f32, frame_delta: f32) -> Self {
        let requested = if params.adaptive_substepping {
            adaptive_substeps(peak_velocity, frame_delta, params.particle_radius)
        } else {
            params.fixed_substeps
        };
        let (substeps, clamped) = match params.max_substeps {
            Some(max) if requested > max => (max, true),
            _ => (requested, false),
        };
        Self {
            requested,
            substeps,
            sub_delta: frame_delta / substeps as f32,
            clamped,
        }
    }
}

/// Substeps needed so the fastest particle moves less than about one radius per substep.
pub fn adaptive_substeps(peak_velocity: f32, frame_delta: f32, particle_radius: f32) -> u32 {
    let estimate = (peak_velocity * frame_delta / particle_radius * SUBSTEP_SAFETY).ceil();
    // NaN casts to 0 and infinities saturate.
    (estimate as u32).max(1)
}

/// Largest velocity magnitude among `velocities`.
pub fn peak_velocity(velocities: &[Vec3]) -> f32 {
    velocities
        .par_iter()
        .map(|velocity| velocity.length())
        .reduce(|| 0.0, f32::max)
}

/// Applies drag and gravity, then predicts positions.
#[derive(Clone, Copy, Debug)]
pub struct ProjectStage {
    pub delta: f32,
    pub gravity: Vec3,
    pub drag: f32,
}

impl ProjectStage {
    /// Gravity is scaled by `(1 - |v| / TERMINAL_VELOCITY)^2`.
    pub fn run(&self, positions: &[Vec3], velocities: &mut [Vec3], projected: &mut [Vec4]) {
        let damping = 1.0 - self.drag;
        projected
            .par_iter_mut()
            .zip(velocities.par_iter_mut())
            .zip(positions.par_iter())
            .for_each(|((projected, velocity), &position)| {
                let mut v = *velocity * damping;
                let falloff = 1.0 - v.length() / TERMINAL_VELOCITY;
                v += self.gravity * falloff * falloff * self.delta;
                *velocity = v;
                *projected = (position + v * self.delta).extend(0.0);
            });
    }
}

/// Poly6 density and density constraint error.
#[derive(Clone, Copy, Debug)]
pub struct DensityStage {
    pub smoothing_radius: f32,
    pub rest_density: f32,
}

impl DensityStage {
    pub fn run(
        &self,
        projected: &[Vec4],
        grid: &NeighborGrid,
        densities: &mut [f32],
        errors: &mut [f32],
        within_h: &mut [u32],
    ) {
        let h = self.smoothing_radius;
        densities
            .par_iter_mut()
            .zip(errors.par_iter_mut())
            .zip(within_h.par_iter_mut())
            .enumerate()
            .for_each(|(i, ((density, error), within))| {
                let pi = projected[i].truncate();
                let mut sum = 0.0;
                let mut close = 0;
                for &j in grid.neighbors_of(i) {
                    let j = j as usize;
                    if j == i {
                        continue;
                    }
                    let distance = pi.distance(projected[j].truncate());
                    if distance < h {
                        close += 1;
                    }
                    sum += SphKernels::density(distance / h);
                }
                *density = sum;
                *error = sum / self.rest_density - 1.0;
                *within = close;
            });
    }
}

/// Lagrange multipliers of the density constraints.
#[derive(Clone, Copy, Debug)]
pub struct LambdaStage {
    pub smoothing_radius: f32,
    pub rest_density: f32,
    pub epsilon: f32,
}

impl LambdaStage {
    /// Also stores the normalized summed gradient per particle as a diagnostic.
    pub fn run(
        &self,
        projected: &[Vec4],
        grid: &NeighborGrid,
        errors: &[f32],
        lambdas: &mut [f32],
        gradients: &mut [Vec3],
    ) {
        let h = self.smoothing_radius;
        let coefficient = SphKernels::spiky_gradient_coefficient(h);
        let inv_rest_sq = 1.0 / (self.rest_density * self.rest_density);

        lambdas
            .par_iter_mut()
            .zip(gradients.par_iter_mut())
            .enumerate()
            .for_each(|(i, (lambda, gradient))| {
                let pi = projected[i].truncate();
                let mut gradient_sum = Vec3::ZERO;
                let mut squared_sum = 0.0;
                for &j in grid.neighbors_of(i) {
                    let j = j as usize;
                    let g = SphKernels::gradient_with_coefficient(
                        pi,
                        projected[j].truncate(),
                        h,
                        coefficient,
                    );
                    gradient_sum += g;
                    if j != i {
                        squared_sum += g.length_squared();
                    }
                }
                squared_sum += gradient_sum.length_squared();

                *lambda = -errors[i] / (squared_sum * inv_rest_sq + self.epsilon);
                *gradient = gradient_sum.normalize_or_zero();
            });
    }
}

/// Position corrections from the multipliers.
///
/// Corrections are computed for every particle before any is applied, so every
/// particle reads the same projected positions within an iteration.
#[derive(Clone, Copy, Debug)]
pub struct CorrectionStage {
    pub smoothing_radius: f32,
    pub rest_density: f32,
}

impl CorrectionStage {
    pub fn compute(
        &self,
        projected: &[Vec4],
        grid: &NeighborGrid,
        lambdas: &[f32],
        corrections: &mut [Vec3],
    ) {
        let h = self.smoothing_radius;
        let coefficient = SphKernels::spiky_gradient_coefficient(h);
        let inv_rest = 1.0 / self.rest_density;

        corrections
            .par_iter_mut()
            .enumerate()
            .for_each(|(i, correction)| {
                let pi = projected[i].truncate();
                let lambda_i = lambdas[i];
                let mut sum = Vec3::ZERO;
                for &j in grid.neighbors_of(i) {
                    let j = j as usize;
                    if j == i {
                        continue;
                    }
                    let g = SphKernels::gradient_with_coefficient(
                        pi,
                        projected[j].truncate(),
                        h,
                        coefficient,
                    );
                    sum += (lambda_i + lambdas[j]) * g;
                }
                *correction = sum * inv_rest;
            });
    }

    /// Subtracts the scaled corrections. The `w` lane is left alone.
    pub fn apply(corrections: &[Vec3], projected: &mut [Vec4]) {
        projected
            .par_iter_mut()
            .zip(corrections.par_iter())
            .for_each(|(projected, correction)| {
                let position = projected.truncate() - *correction * CORRECTION_SCALE;
                *projected = position.extend(projected.w);
            });
    }
}

/// Resolves projected positions against every active collider, in registration order.
#[derive(Clone, Copy)]
pub struct CollisionStage<'a> {
    pub colliders: &'a ColliderSet,
    pub particle_radius: f32,
}

impl CollisionStage<'_> {
    /// Records the last contact for every particle; moves only particles
    /// closer to the surface than one particle radius.
    pub fn run(&self, projected: &mut [Vec4], collisions: &mut [Vec4]) {
        let radius = self.particle_radius;
        for collider in self.colliders.active() {
            projected
                .par_iter_mut()
                .zip(collisions.par_iter_mut())
                .for_each(|(projected, collision)| {
                    let contact = collider.resolve(projected.truncate(), radius);
                    *collision = contact.boundary_point.extend(contact.signed_distance);
                    if contact.is_contact(radius) {
                        *projected = contact.corrected_position.extend(projected.w);
                    }
                });
        }
    }
}

/// Derives velocities from the substep displacement and commits positions.
#[derive(Clone, Copy, Debug)]
pub struct CommitStage {
    pub delta: f32,
}

impl CommitStage {
    pub fn run(&self, projected: &[Vec4], positions: &mut [Vec3], velocities: &mut [Vec3]) {
        let inv_delta = 1.0 / self.delta;
        positions
            .par_iter_mut()
            .zip(velocities.par_iter_mut())
            .zip(projected.par_iter())
            .for_each(|((position, velocity), projected)| {
                let target = projected.truncate();
                *velocity = (target - *position) * inv_delta;
                *position = target;
            });
    }
}

/// All stages of one substep.
#[derive(Clone, Copy, Debug)]
pub struct SubstepStages {
    pub project: ProjectStage,
    pub density: DensityStage,
    pub lambda: LambdaStage,
    pub correction: CorrectionStage,
    pub commit: CommitStage,
}

impl SubstepStages {
    pub fn new(params: &FluidParams, delta: f32) -> Self {
        let smoothing_radius = params.smoothing_radius();
        Self {
            project: ProjectStage {
                delta,
                gravity: params.gravity,
                drag: params.drag,
            },
            density: DensityStage {
                smoothing_radius,
                rest_density: params.rest_density,
            },
            lambda: LambdaStage {
                smoothing_radius,
                rest_density: params.rest_density,
                epsilon: params.constraint_epsilon,
            },
            correction: CorrectionStage {
                smoothing_radius,
                rest_density: params.rest_density,
            },
            commit: CommitStage { delta },
        }
    }
}
