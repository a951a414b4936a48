//! Per-substep neighbor lists built on top of [`SpatialHash`].
//!
//! The grid owns two flat arrays:
//!
//! - a bucket table of `table_size * hash_bin_size` particle slots
//! - a neighbor arena of `capacity` rows, each `neighbor_bin_size + 1` wide,
//!   whose first entry is the number of valid neighbors in the row
//!
//! Bucket occupancy lives in [`HashPass`], which is created by
//! [`NeighborGrid::rehash`] and dropped at the end of the substep. Slots past
//! the occupancy count may hold stale indices from earlier substeps and are
//! never read.

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use bevy::prelude::*;
use rayon::prelude::*;

use super::params::FluidParams;
use super::spatial::SpatialHash;

/// Bucket occupancy for one substep.
///
/// Counters are claimed with `fetch_add`, so a bucket's count can exceed
/// the bin size; readers clamp it.
pub struct HashPass {
    counts: Vec<AtomicU32>,
    hash_bin_size: u32,
    bucket_overflows: usize,
}

impl HashPass {
    fn new(table_size: u32, hash_bin_size: u32) -> Self {
        let counts = (0..table_size)
            .into_par_iter()
            .map(|_| AtomicU32::new(0))
            .collect();
        Self {
            counts,
            hash_bin_size,
            bucket_overflows: 0,
        }
    }

    fn claim(&self, bucket: u32) -> u32 {
        self.counts[bucket as usize].fetch_add(1, Ordering::Relaxed)
    }

    /// Particles that hashed into `bucket`, including ones that did not fit.
    pub fn requested(&self, bucket: u32) -> u32 {
        self.counts
            .get(bucket as usize)
            .map_or(0, |count| count.load(Ordering::Relaxed))
    }

    /// Particles actually stored in `bucket`.
    pub fn occupancy(&self, bucket: u32) -> u32 {
        self.requested(bucket).min(self.hash_bin_size)
    }

    /// Particles dropped because their bucket was full.
    pub fn bucket_overflows(&self) -> usize {
        self.bucket_overflows
    }
}

/// Bucket table plus per-particle neighbor lists.
pub struct NeighborGrid {
    hash: SpatialHash,
    hash_bin_size: usize,
    neighbor_bin_size: usize,
    capacity: usize,
    table: Vec<AtomicU32>,
    neighbors: Vec<u32>,
}

impl NeighborGrid {
    /// Allocates the table and arena for validated parameters.
    pub fn new(params: &FluidParams) -> Self {
        let hash = SpatialHash::from_params(params);
        let hash_bin_size = params.hash.hash_bin_size as usize;
        let neighbor_bin_size = params.hash.neighbor_bin_size as usize;
        let capacity = params.max_particles as usize;

        let table = (0..params.hash.table_size as usize * hash_bin_size)
            .into_par_iter()
            .map(|_| AtomicU32::new(0))
            .collect();

        Self {
            hash,
            hash_bin_size,
            neighbor_bin_size,
            capacity,
            table,
            neighbors: vec![0; capacity * (neighbor_bin_size + 1)],
        }
    }

    pub fn hash(&self) -> &SpatialHash {
        &self.hash
    }

    pub fn hash_bin_size(&self) -> usize {
        self.hash_bin_size
    }

    pub fn neighbor_bin_size(&self) -> usize {
        self.neighbor_bin_size
    }

    fn row_len(&self) -> usize {
        self.neighbor_bin_size + 1
    }

    /// Hashes every projected position and fills the bucket table.
    ///
    /// Writes each particle's bucket id into the `w` lane of its projected
    /// position. Particles landing in a full bucket are left out of the table
    /// for this substep and counted in [`HashPass::bucket_overflows`].
    pub fn rehash(&self, projected: &mut [Vec4]) -> HashPass {
        debug_assert!(projected.len() <= self.capacity);

        let mut pass = HashPass::new(self.hash.table_size(), self.hash_bin_size as u32);
        let overflows = AtomicUsize::new(0);

        let hash = self.hash;
        let table = &self.table;
        let bin = self.hash_bin_size;
        let pass_ref = &pass;

        projected
            .par_iter_mut()
            .enumerate()
            .for_each(|(index, position)| {
                let bucket = hash.bucket(position.truncate());
                position.w = bucket as f32;

                let slot = pass_ref.claim(bucket) as usize;
                if slot < bin {
                    table[bucket as usize * bin + slot].store(index as u32, Ordering::Relaxed);
                } else {
                    overflows.fetch_add(1, Ordering::Relaxed);
                }
            });

        pass.bucket_overflows = overflows.into_inner();
        pass
    }

    /// Stored particle indices of one bucket for this substep.
    pub fn bucket_members<'a>(
        &'a self,
        pass: &'a HashPass,
        bucket: u32,
    ) -> impl Iterator<Item = u32> + 'a {
        let base = bucket as usize * self.hash_bin_size;
        (0..pass.occupancy(bucket) as usize)
            .map(move |slot| self.table[base + slot].load(Ordering::Relaxed))
    }

    /// Builds each particle's neighbor list from its own and surrounding buckets.
    ///
    /// Expects `projected` to carry bucket ids from [`rehash`](Self::rehash) in
    /// `w`. The list contains the particle itself and every other particle in
    /// the 27 voxels, unfiltered by distance. A bucket shared by several of the
    /// 27 voxels is visited once. Returns how many neighbors were dropped
    /// because a list was full.
    pub fn collect_neighbors(&mut self, pass: &HashPass, projected: &[Vec4]) -> usize {
        let row_len = self.row_len();
        let hash = self.hash;
        let bin = self.hash_bin_size;
        let table = &self.table;
        let overflows = AtomicUsize::new(0);

        self.neighbors[..projected.len() * row_len]
            .par_chunks_mut(row_len)
            .zip(projected.par_iter())
            .for_each(|(row, position)| {
                let mut buckets = hash.search_buckets(position.truncate());
                buckets[0] = position.w as u32;

                let (count, entries) = row.split_at_mut(1);
                let mut stored = 0;
                let mut dropped = 0;

                for (k, &bucket) in buckets.iter().enumerate() {
                    if buckets[..k].contains(&bucket) {
                        continue;
                    }
                    let base = bucket as usize * bin;
                    for slot in 0..pass.occupancy(bucket) as usize {
                        if stored < entries.len() {
                            entries[stored] = table[base + slot].load(Ordering::Relaxed);
                            stored += 1;
                        } else {
                            dropped += 1;
                        }
                    }
                }

                count[0] = stored as u32;
                if dropped > 0 {
                    overflows.fetch_add(dropped, Ordering::Relaxed);
                }
            });

        overflows.into_inner()
    }

    /// Empties the first `count` neighbor lists.
    pub fn clear_neighbors(&mut self, count: usize) {
        let row_len = self.row_len();
        self.neighbors[..count * row_len]
            .par_chunks_mut(row_len)
            .for_each(|row| row[0] = 0);
    }

    /// Neighbor list of `particle` from the most recent substep.
    pub fn neighbors_of(&self, particle: usize) -> &[u32] {
        let row_len = self.row_len();
        let row = &self.neighbors[particle * row_len..(particle + 1) * row_len];
        let count = (row[0] as usize).min(self.neighbor_bin_size);
        &row[1..1 + count]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fluid::params::HashParams;

    fn small_params() -> FluidParams {
        FluidParams::default()
            .with_max_particles(64)
            .with_hash(HashParams::compact(1_009))
    }

    #[test]
    fn test_rehash_writes_bucket_into_w() {
        let params = small_params();
        let grid = NeighborGrid::new(&params);
        let mut projected = vec![Vec4::new(0.0, 0.0, 0.0, 0.0), Vec4::new(1.0, 1.0, 1.0, 0.0)];
        let pass = grid.rehash(&mut projected);

        for p in &projected {
            let bucket = grid.hash().bucket(p.truncate());
            assert_eq!(p.w as u32, bucket);
            assert!(grid.bucket_members(&pass, bucket).count() >= 1);
        }
        assert_eq!(pass.bucket_overflows(), 0);
    }

    #[test]
    fn test_full_bucket_counts_overflow() {
        let params = small_params().with_hash(HashParams::compact(1_009).with_bins(2, 54));
        let grid = NeighborGrid::new(&params);
        let mut projected = vec![Vec4::new(0.001, 0.001, 0.001, 0.0); 5];
        let pass = grid.rehash(&mut projected);

        let bucket = projected[0].w as u32;
        assert_eq!(pass.requested(bucket), 5);
        assert_eq!(pass.occupancy(bucket), 2);
        assert_eq!(pass.bucket_overflows(), 3);
    }

    #[test]
    fn test_neighbors_include_self_and_close_particles() {
        let params = small_params();
        let mut grid = NeighborGrid::new(&params);
        let h = params.smoothing_radius();
        let mut projected = vec![
            Vec4::new(0.0, 0.0, 0.0, 0.0),
            Vec4::new(h * 0.5, 0.0, 0.0, 0.0),
            Vec4::new(10.0, 10.0, 10.0, 0.0),
        ];
        let pass = grid.rehash(&mut projected);
        let dropped = grid.collect_neighbors(&pass, &projected);

        assert_eq!(dropped, 0);
        let first = grid.neighbors_of(0);
        assert!(first.contains(&0));
        assert!(first.contains(&1));
        assert!(grid.neighbors_of(1).contains(&0));
        assert!(grid.neighbors_of(2).contains(&2));
    }

    #[test]
    fn test_full_neighbor_list_counts_overflow() {
        let params = small_params().with_hash(HashParams::compact(1_009).with_bins(12, 3));
        let mut grid = NeighborGrid::new(&params);
        let mut projected = vec![Vec4::new(0.001, 0.001, 0.001, 0.0); 5];
        let pass = grid.rehash(&mut projected);
        let dropped = grid.collect_neighbors(&pass, &projected);

        assert_eq!(dropped, 5 * 2);
        assert_eq!(grid.neighbors_of(0).len(), 3);
    }

    #[test]
    fn test_clear_neighbors_empties_lists() {
        let params = small_params();
        let mut grid = NeighborGrid::new(&params);
        let mut projected = vec![Vec4::ZERO; 3];
        let pass = grid.rehash(&mut projected);
        grid.collect_neighbors(&pass, &projected);
        assert_eq!(grid.neighbors_of(1).len(), 3);

        grid.clear_neighbors(3);
        assert!(grid.neighbors_of(1).is_empty());
    }
}
