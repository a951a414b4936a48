//! Spatial hashing for neighbor search.
//!
//! Positions are quantized into voxels and voxels are folded into a fixed-size
//! bucket table with a prime-multiplier XOR hash. Unrelated voxels may share a
//! bucket; callers filter by distance afterwards, so collisions only cost time.
//! Bucket `0` is never produced and stays free as a sentinel.

use bevy::math::DVec3;
use bevy::prelude::*;

use super::params::{FluidParams, HashParams};

/// Pure voxel and bucket mapping. Cheap to copy into parallel closures.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SpatialHash {
    voxel_size: f32,
    voxel_inverse: f64,
    world_offset: DVec3,
    primes: IVec3,
    table_size: u32,
}

impl SpatialHash {
    pub fn new(voxel_size: f32, hash: &HashParams) -> Self {
        Self {
            voxel_size,
            voxel_inverse: 1.0 / voxel_size as f64,
            world_offset: hash.world_offset.as_dvec3(),
            primes: hash.primes,
            table_size: hash.table_size,
        }
    }

    /// Builds the hash for validated parameters.
    pub fn from_params(params: &FluidParams) -> Self {
        Self::new(params.voxel_size(), &params.hash)
    }

    pub fn voxel_size(&self) -> f32 {
        self.voxel_size
    }

    pub fn table_size(&self) -> u32 {
        self.table_size
    }

    /// Integer voxel containing `position`.
    ///
    /// The offset is applied in double precision; at the default offsets `f32`
    /// would quantize positions to several millimetres.
    pub fn voxel(&self, position: Vec3) -> IVec3 {
        ((position.as_dvec3() + self.world_offset) * self.voxel_inverse)
            .floor()
            .as_ivec3()
    }

    /// Folds a voxel into a bucket in `1..table_size`.
    pub fn voxel_to_bucket(&self, voxel: IVec3) -> u32 {
        let mixed = voxel.x.wrapping_mul(self.primes.x)
            ^ voxel.y.wrapping_mul(self.primes.y)
            ^ voxel.z.wrapping_mul(self.primes.z);
        let modulus = self.table_size as i32 - 1;
        (mixed % modulus).unsigned_abs() + 1
    }

    /// Bucket of the voxel containing `position`.
    pub fn bucket(&self, position: Vec3) -> u32 {
        self.voxel_to_bucket(self.voxel(position))
    }

    /// Offsets of the 26 voxels surrounding a voxel, centre excluded.
    pub fn neighbor_offsets() -> &'static [IVec3; 26] {
        static OFFSETS: [IVec3; 26] = [
            IVec3::new(-1, 0, 0),
            IVec3::new(0, -1, 0),
            IVec3::new(0, 0, -1),
            IVec3::new(1, 0, 0),
            IVec3::new(0, 1, 0),
            IVec3::new(0, 0, 1),
            IVec3::new(-1, -1, 0),
            IVec3::new(-1, 1, 0),
            IVec3::new(1, -1, 0),
            IVec3::new(1, 1, 0),
            IVec3::new(0, -1, -1),
            IVec3::new(0, -1, 1),
            IVec3::new(0, 1, -1),
            IVec3::new(0, 1, 1),
            IVec3::new(-1, 0, -1),
            IVec3::new(-1, 0, 1),
            IVec3::new(1, 0, -1),
            IVec3::new(1, 0, 1),
            IVec3::new(-1, -1, -1),
            IVec3::new(-1, -1, 1),
            IVec3::new(-1, 1, -1),
            IVec3::new(-1, 1, 1),
            IVec3::new(1, -1, -1),
            IVec3::new(1, -1, 1),
            IVec3::new(1, 1, -1),
            IVec3::new(1, 1, 1),
        ];
        &OFFSETS
    }

    /// Buckets of the 26 voxels around `position`.
    pub fn neighbor_buckets(&self, position: Vec3) -> [u32; 26] {
        let voxel = self.voxel(position);
        let offsets = Self::neighbor_offsets();
        std::array::from_fn(|i| self.voxel_to_bucket(voxel + offsets[i]))
    }

    /// The particle's own bucket followed by its 26 surrounding buckets.
    pub fn search_buckets(&self, position: Vec3) -> [u32; 27] {
        let voxel = self.voxel(position);
        let offsets = Self::neighbor_offsets();
        std::array::from_fn(|i| match i {
            0 => self.voxel_to_bucket(voxel),
            _ => self.voxel_to_bucket(voxel + offsets[i - 1]),
        })
    }
}
