//! Read-only views of the particle state for renderers and debugging tools.

use bevy::prelude::*;

/// Positions of all active particles after the last step.
///
/// Published as a resource by the plugin once per frame. The buffers are
/// reused between frames.
#[derive(Resource, Clone, Debug, Default, PartialEq)]
pub struct ParticleSnapshot {
    pub positions: Vec<Vec3>,
    pub particle_radius: f32,
    /// Frame counter of the simulation when the snapshot was taken.
    pub frame: u64,
}

impl ParticleSnapshot {
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// One render instance per particle.
    pub fn instances(&self) -> Vec<ParticleInstance> {
        self.positions
            .iter()
            .map(|position| ParticleInstance::new(*position, self.particle_radius))
            .collect()
    }
}

/// Per-particle instance data, laid out for direct upload to an instance buffer.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct ParticleInstance {
    pub position: [f32; 3],
    pub radius: f32,
}

impl ParticleInstance {
    pub fn new(position: Vec3, radius: f32) -> Self {
        Self {
            position: position.to_array(),
            radius,
        }
    }

    pub fn position(&self) -> Vec3 {
        Vec3::from_array(self.position)
    }
}

/// Raw bytes of an instance slice.
pub fn instance_bytes(instances: &[ParticleInstance]) -> &[u8] {
    bytemuck::cast_slice(instances)
}

/// Every attribute of one particle, for inspection.
#[derive(Clone, Debug, PartialEq)]
pub struct ParticleProbe {
    pub index: usize,
    pub position: Vec3,
    pub projected_position: Vec3,
    pub velocity: Vec3,
    pub mass: f32,
    pub viscosity: f32,
    pub density: f32,
    pub density_error: f32,
    /// Neighbors closer than the smoothing radius in the last density pass.
    pub within_h: u32,
    /// Normalized summed constraint gradient.
    pub gradient: Vec3,
    pub lambda: f32,
    pub correction: Vec3,
    pub hash_bucket: u32,
    /// Boundary point of the last collider resolved.
    pub collision_point: Vec3,
    pub collision_distance: f32,
    /// Neighbor list from the last substep.
    pub neighbors: Vec<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instance_layout() {
        assert_eq!(std::mem::size_of::<ParticleInstance>(), 16);
        let instances = [
            ParticleInstance::new(Vec3::new(1.0, 2.0, 3.0), 0.5),
            ParticleInstance::new(Vec3::ZERO, 0.5),
        ];
        let bytes = instance_bytes(&instances);
        assert_eq!(bytes.len(), 32);
        let floats: &[f32] = bytemuck::cast_slice(bytes);
        assert_eq!(&floats[..4], &[1.0, 2.0, 3.0, 0.5]);
    }

    #[test]
    fn test_snapshot_instances_share_radius() {
        let snapshot = ParticleSnapshot {
            positions: vec![Vec3::X, Vec3::Y],
            particle_radius: 0.01,
            frame: 3,
        };
        let instances = snapshot.instances();
        assert_eq!(instances.len(), 2);
        assert!(instances.iter().all(|instance| instance.radius == 0.01));
        assert_eq!(instances[1].position(), Vec3::Y);
    }
}
