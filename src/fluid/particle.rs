//! Particle storage.
//!
//! Particles live in a fixed-capacity struct-of-arrays pool. Slots `0..len`
//! are active; every attribute array is allocated to full capacity up front
//! and never reallocates. Deleting a particle moves the last active particle
//! into the freed slot, so indices are not stable across deletions.

use bevy::log::warn;
use bevy::prelude::*;

use crate::error::{FluidError, FluidResult};

/// Per-particle material properties.
///
/// Carried through emission and deletion; the density solver treats every
/// particle as unit mass.
#[derive(Clone, Copy, Debug, PartialEq, Reflect)]
pub struct FluidProperties {
    pub mass: f32,
    pub viscosity: f32,
}

impl Default for FluidProperties {
    fn default() -> Self {
        Self {
            mass: 1.0,
            viscosity: 0.01,
        }
    }
}

/// Outcome of an emission request.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EmitReport {
    /// Particles added to the pool.
    pub accepted: usize,
    /// Particles discarded because the pool was full.
    pub dropped: usize,
}

/// Fixed-capacity struct-of-arrays particle pool.
///
/// Attribute arrays are `pub(crate)` so solver stages can borrow disjoint
/// fields mutably at the same time.
#[derive(Clone, Debug)]
pub struct ParticleStore {
    count: usize,
    pub(crate) positions: Vec<Vec3>,
    /// Projected position in `xyz`; the spatial hash keeps the bucket id in `w`.
    pub(crate) projected: Vec<Vec4>,
    pub(crate) velocities: Vec<Vec3>,
    pub(crate) properties: Vec<FluidProperties>,
    pub(crate) densities: Vec<f32>,
    pub(crate) density_errors: Vec<f32>,
    pub(crate) within_h: Vec<u32>,
    pub(crate) gradients: Vec<Vec3>,
    pub(crate) lambdas: Vec<f32>,
    pub(crate) corrections: Vec<Vec3>,
    /// Boundary point in `xyz` and signed distance in `w` from the last collider resolved.
    pub(crate) collisions: Vec<Vec4>,
}

impl ParticleStore {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            count: 0,
            positions: vec![Vec3::ZERO; capacity],
            projected: vec![Vec4::ZERO; capacity],
            velocities: vec![Vec3::ZERO; capacity],
            properties: vec![FluidProperties::default(); capacity],
            densities: vec![0.0; capacity],
            density_errors: vec![0.0; capacity],
            within_h: vec![0; capacity],
            gradients: vec![Vec3::ZERO; capacity],
            lambdas: vec![0.0; capacity],
            corrections: vec![Vec3::ZERO; capacity],
            collisions: vec![Vec4::ZERO; capacity],
        }
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn capacity(&self) -> usize {
        self.positions.len()
    }

    pub fn remaining(&self) -> usize {
        self.capacity() - self.count
    }

    pub fn is_full(&self) -> bool {
        self.count == self.capacity()
    }

    /// Appends one particle. Returns `false` if the pool is full.
    pub fn push(&mut self, properties: FluidProperties, position: Vec3, velocity: Vec3) -> bool {
        if self.is_full() {
            return false;
        }
        let slot = self.count;
        self.positions[slot] = position;
        self.projected[slot] = position.extend(0.0);
        self.velocities[slot] = velocity;
        self.properties[slot] = properties;
        self.densities[slot] = 0.0;
        self.density_errors[slot] = 0.0;
        self.within_h[slot] = 0;
        self.gradients[slot] = Vec3::ZERO;
        self.lambdas[slot] = 0.0;
        self.corrections[slot] = Vec3::ZERO;
        self.collisions[slot] = Vec4::ZERO;
        self.count += 1;
        true
    }

    /// Appends particles sharing one velocity, dropping whatever does not fit.
    pub fn emit(
        &mut self,
        properties: FluidProperties,
        positions: &[Vec3],
        velocity: Vec3,
    ) -> EmitReport {
        let accepted = positions.len().min(self.remaining());
        for &position in &positions[..accepted] {
            self.push(properties, position, velocity);
        }
        let report = EmitReport {
            accepted,
            dropped: positions.len() - accepted,
        };
        if report.dropped > 0 {
            warn!(
                "particle pool full ({} slots); dropped {} of {} emitted particles",
                self.capacity(),
                report.dropped,
                positions.len()
            );
        }
        report
    }

    /// Appends particles with individual velocities.
    pub fn emit_with_velocities(
        &mut self,
        properties: FluidProperties,
        positions: &[Vec3],
        velocities: &[Vec3],
    ) -> FluidResult<EmitReport> {
        if positions.len() != velocities.len() {
            return Err(FluidError::MismatchedLengths {
                what: "velocity",
                expected: positions.len(),
                actual: velocities.len(),
            });
        }
        let accepted = positions.len().min(self.remaining());
        for (&position, &velocity) in positions.iter().zip(velocities).take(accepted) {
            self.push(properties, position, velocity);
        }
        let report = EmitReport {
            accepted,
            dropped: positions.len() - accepted,
        };
        if report.dropped > 0 {
            warn!(
                "particle pool full ({} slots); dropped {} of {} emitted particles",
                self.capacity(),
                report.dropped,
                positions.len()
            );
        }
        Ok(report)
    }

    /// Removes the particle at `index` by moving the last active particle into its slot.
    pub fn swap_remove(&mut self, index: usize) -> FluidResult<()> {
        if index >= self.count {
            return Err(FluidError::ParticleOutOfRange {
                index,
                count: self.count,
            });
        }
        let last = self.count - 1;
        if index != last {
            self.positions[index] = self.positions[last];
            self.projected[index] = self.projected[last];
            self.velocities[index] = self.velocities[last];
            self.properties[index] = self.properties[last];
            self.densities[index] = self.densities[last];
            self.density_errors[index] = self.density_errors[last];
            self.within_h[index] = self.within_h[last];
            self.gradients[index] = self.gradients[last];
            self.lambdas[index] = self.lambdas[last];
            self.corrections[index] = self.corrections[last];
            self.collisions[index] = self.collisions[last];
        }
        self.count = last;
        Ok(())
    }

    /// Deactivates every particle without touching the storage.
    pub fn clear(&mut self) {
        self.count = 0;
    }

    pub fn positions(&self) -> &[Vec3] {
        &self.positions[..self.count]
    }

    pub fn projected(&self) -> &[Vec4] {
        &self.projected[..self.count]
    }

    pub fn velocities(&self) -> &[Vec3] {
        &self.velocities[..self.count]
    }

    pub fn properties(&self) -> &[FluidProperties] {
        &self.properties[..self.count]
    }

    pub fn densities(&self) -> &[f32] {
        &self.densities[..self.count]
    }

    pub fn density_errors(&self) -> &[f32] {
        &self.density_errors[..self.count]
    }

    pub fn within_h(&self) -> &[u32] {
        &self.within_h[..self.count]
    }

    pub fn gradients(&self) -> &[Vec3] {
        &self.gradients[..self.count]
    }

    pub fn lambdas(&self) -> &[f32] {
        &self.lambdas[..self.count]
    }

    pub fn corrections(&self) -> &[Vec3] {
        &self.corrections[..self.count]
    }

    pub fn collisions(&self) -> &[Vec4] {
        &self.collisions[..self.count]
    }
}
