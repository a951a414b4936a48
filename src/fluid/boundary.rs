//! Collider primitives and collider management.
//!
//! Shapes are defined in their own local frame:
//!
//! - [`PlaneShape`]: the local XY plane, outside is `+Z`, optionally bounded
//!   to a `size.x` by `size.y` rectangle centred on the origin
//! - [`CylinderShape`]: a capped container around the local Z axis from
//!   `z = 0` to `z = height`, inside is negative
//!
//! A [`Collider`] places a shape in the world through a local-to-world matrix.
//! Closest-point queries transform the particle into the local frame, resolve
//! there and transform the result back.

use bevy::prelude::*;

use crate::error::{FluidError, FluidResult};

/// Result of a closest-point query.
#[derive(Clone, Copy, Debug, PartialEq, Reflect)]
pub struct ClosestPoint {
    /// Nearest point on the collider surface.
    pub boundary_point: Vec3,
    /// Distance to `boundary_point`, negative on the inside of the collider.
    pub signed_distance: f32,
    /// Where the particle should be placed. Equal to the query point when not in contact.
    pub corrected_position: Vec3,
}

impl ClosestPoint {
    /// A particle is in contact when it is closer to the surface than its radius.
    #[inline]
    pub fn is_contact(&self, particle_radius: f32) -> bool {
        self.signed_distance.abs() < particle_radius
    }

    fn settle(mut self, point: Vec3, particle_radius: f32) -> Self {
        if !self.is_contact(particle_radius) {
            self.corrected_position = point;
        }
        self
    }
}

/// Finite or infinite plane through the local origin with normal `+Z`.
#[derive(Clone, Copy, Debug, PartialEq, Reflect)]
pub struct PlaneShape {
    /// Extent along local X and Y. Ignored when `infinite` is set.
    pub size: Vec2,
    pub infinite: bool,
}

impl Default for PlaneShape {
    fn default() -> Self {
        Self::infinite()
    }
}

impl PlaneShape {
    /// Rectangle of `size` centred on the origin.
    pub fn new(size: Vec2) -> Self {
        Self {
            size,
            infinite: false,
        }
    }

    pub fn infinite() -> Self {
        Self {
            size: Vec2::ZERO,
            infinite: true,
        }
    }

    /// Closest point of a local-frame `point`.
    ///
    /// Contacts always resolve to the `+Z` side: a particle that sank just
    /// below the plane is lifted to one radius above it.
    pub fn closest_point(&self, point: Vec3, particle_radius: f32) -> ClosestPoint {
        let boundary_point = if self.infinite {
            Vec3::new(point.x, point.y, 0.0)
        } else {
            let half = self.size * 0.5;
            Vec3::new(
                point.x.clamp(-half.x, half.x),
                point.y.clamp(-half.y, half.y),
                0.0,
            )
        };

        let distance = point.distance(boundary_point);
        let signed_distance = if point.z > 0.0 { distance } else { -distance };

        let offset = point - boundary_point;
        let outward = Vec3::new(offset.x, offset.y, offset.z.abs())
            .try_normalize()
            .unwrap_or(Vec3::Z);

        ClosestPoint {
            boundary_point,
            signed_distance,
            corrected_position: boundary_point + outward * particle_radius,
        }
        .settle(point, particle_radius)
    }

    fn validate(&self) -> FluidResult<()> {
        if !self.infinite && !(self.size.is_finite() && self.size.cmpge(Vec2::ZERO).all()) {
            return Err(FluidError::InvalidColliderShape(format!(
                "plane size must be finite and non-negative, got {}",
                self.size
            )));
        }
        Ok(())
    }
}

/// Capped cylinder container around local Z, spanning `0..=height`.
#[derive(Clone, Copy, Debug, PartialEq, Reflect)]
pub struct CylinderShape {
    pub radius: f32,
    pub height: f32,
}

impl CylinderShape {
    pub fn new(radius: f32, height: f32) -> Self {
        Self { radius, height }
    }

    /// Closest point of a local-frame `point`.
    ///
    /// Below the base or above the cap only that disk is considered. In the
    /// middle band only the round wall is. Near either end the nearer of the
    /// wall and that end wins, and interior contacts are pulled in from the
    /// rim so a particle stays one radius clear of both surfaces.
    pub fn closest_point(&self, point: Vec3, particle_radius: f32) -> ClosestPoint {
        let (radius, height) = (self.radius, self.height);

        let contact = if point.z < 0.0 {
            self.closest_on_base(point, particle_radius)
        } else if point.z > height {
            self.closest_on_cap(point, particle_radius)
        } else if point.z > radius && point.z < height - radius {
            self.closest_on_round(point, particle_radius)
        } else {
            let round = self.closest_on_round(point, particle_radius);
            let mut end = if point.z < height * 0.5 {
                self.closest_on_base(point, particle_radius)
            } else {
                self.closest_on_cap(point, particle_radius)
            };
            // Between the end disks the particle is inside.
            end.signed_distance = -end.signed_distance;

            if end.signed_distance.abs() < round.signed_distance.abs() {
                if end.signed_distance < 0.0 {
                    self.keep_clear_of_round(&mut end, particle_radius);
                }
                end
            } else {
                let mut round = round;
                if round.signed_distance < 0.0 {
                    self.keep_clear_of_ends(&mut round, particle_radius);
                }
                round
            }
        };

        contact.settle(point, particle_radius)
    }

    /// Closest point on the base disk. The distance is unsigned.
    pub fn closest_on_base(&self, point: Vec3, particle_radius: f32) -> ClosestPoint {
        self.closest_on_disk(point, 0.0, particle_radius)
    }

    /// Closest point on the cap disk. The distance is unsigned.
    pub fn closest_on_cap(&self, point: Vec3, particle_radius: f32) -> ClosestPoint {
        self.closest_on_disk(point, self.height, particle_radius)
    }

    fn closest_on_disk(&self, point: Vec3, z: f32, particle_radius: f32) -> ClosestPoint {
        let planar = point.truncate();
        let rim = if planar.length() < self.radius {
            planar
        } else {
            planar.normalize_or_zero() * self.radius
        };
        let boundary_point = rim.extend(z);

        ClosestPoint {
            boundary_point,
            signed_distance: point.distance(boundary_point),
            corrected_position: boundary_point
                + (point - boundary_point).normalize_or_zero() * particle_radius,
        }
    }

    /// Closest point on the round wall at the particle's height.
    pub fn closest_on_round(&self, point: Vec3, particle_radius: f32) -> ClosestPoint {
        let planar = point.truncate();
        // On the axis every wall point is equally close; pick +X.
        let direction = planar.try_normalize().unwrap_or(Vec2::X).extend(0.0);
        let boundary_point = Vec3::new(
            direction.x * self.radius,
            direction.y * self.radius,
            point.z,
        );
        let distance = point.distance(boundary_point);

        if planar.length() < self.radius {
            ClosestPoint {
                boundary_point,
                signed_distance: -distance,
                corrected_position: boundary_point - direction * particle_radius,
            }
        } else {
            ClosestPoint {
                boundary_point,
                signed_distance: distance,
                corrected_position: boundary_point + direction * particle_radius,
            }
        }
    }

    fn keep_clear_of_round(&self, contact: &mut ClosestPoint, particle_radius: f32) {
        let limit = self.radius - particle_radius;
        if contact.boundary_point.truncate().length() > limit {
            let planar = contact.corrected_position.truncate().normalize_or_zero() * limit;
            contact.corrected_position.x = planar.x;
            contact.corrected_position.y = planar.y;
        }
    }

    fn keep_clear_of_ends(&self, contact: &mut ClosestPoint, particle_radius: f32) {
        if contact.boundary_point.z > self.height - particle_radius {
            contact.corrected_position.z = self.height - particle_radius;
        } else if contact.boundary_point.z < particle_radius {
            contact.corrected_position.z = particle_radius;
        }
    }

    fn validate(&self) -> FluidResult<()> {
        if !(self.radius.is_finite() && self.radius > 0.0) {
            return Err(FluidError::InvalidColliderShape(format!(
                "cylinder radius must be positive, got {}",
                self.radius
            )));
        }
        if !(self.height.is_finite() && self.height > 0.0) {
            return Err(FluidError::InvalidColliderShape(format!(
                "cylinder height must be positive, got {}",
                self.height
            )));
        }
        Ok(())
    }
}

/// Shape of a collider.
#[derive(Clone, Copy, Debug, PartialEq, Reflect)]
pub enum ColliderShape {
    Plane(PlaneShape),
    Cylinder(CylinderShape),
}

impl ColliderShape {
    pub fn validate(&self) -> FluidResult<()> {
        match self {
            ColliderShape::Plane(plane) => plane.validate(),
            ColliderShape::Cylinder(cylinder) => cylinder.validate(),
        }
    }

    /// Closest point of a local-frame `point`.
    pub fn closest_point(&self, point: Vec3, particle_radius: f32) -> ClosestPoint {
        match self {
            ColliderShape::Plane(plane) => plane.closest_point(point, particle_radius),
            ColliderShape::Cylinder(cylinder) => cylinder.closest_point(point, particle_radius),
        }
    }
}

impl From<PlaneShape> for ColliderShape {
    fn from(plane: PlaneShape) -> Self {
        ColliderShape::Plane(plane)
    }
}

impl From<CylinderShape> for ColliderShape {
    fn from(cylinder: CylinderShape) -> Self {
        ColliderShape::Cylinder(cylinder)
    }
}

/// Stable identifier of a registered collider.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Reflect)]
pub struct ColliderHandle(u32);

impl ColliderHandle {
    pub fn index(&self) -> u32 {
        self.0
    }
}

/// A shape placed in the world.
#[derive(Clone, Debug, PartialEq)]
pub struct Collider {
    shape: ColliderShape,
    local_to_world: Mat4,
    world_to_local: Mat4,
    active: bool,
}

impl Collider {
    pub fn new(shape: ColliderShape, local_to_world: Mat4) -> FluidResult<Self> {
        shape.validate()?;
        Ok(Self {
            shape,
            local_to_world,
            world_to_local: invert_transform(local_to_world)?,
            active: true,
        })
    }

    pub fn shape(&self) -> &ColliderShape {
        &self.shape
    }

    pub fn local_to_world(&self) -> Mat4 {
        self.local_to_world
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn set_transform(&mut self, local_to_world: Mat4) -> FluidResult<()> {
        self.world_to_local = invert_transform(local_to_world)?;
        self.local_to_world = local_to_world;
        Ok(())
    }

    /// Closest point of a world-space `point`, reported in world space.
    ///
    /// The signed distance is measured in the local frame, so scaled
    /// transforms scale it as well.
    pub fn resolve(&self, point: Vec3, particle_radius: f32) -> ClosestPoint {
        let local = self.world_to_local.transform_point3(point);
        let contact = self.shape.closest_point(local, particle_radius);
        ClosestPoint {
            boundary_point: self.local_to_world.transform_point3(contact.boundary_point),
            signed_distance: contact.signed_distance,
            corrected_position: if contact.is_contact(particle_radius) {
                self.local_to_world
                    .transform_point3(contact.corrected_position)
            } else {
                point
            },
        }
    }
}

fn invert_transform(local_to_world: Mat4) -> FluidResult<Mat4> {
    let determinant = local_to_world.determinant();
    if !local_to_world.is_finite() || !determinant.is_finite() || determinant.abs() < 1e-12 {
        return Err(FluidError::InvalidColliderShape(
            "collider transform must be finite and invertible".into(),
        ));
    }
    Ok(local_to_world.inverse())
}

/// Registered colliders in registration order.
#[derive(Clone, Debug, Default)]
pub struct ColliderSet {
    colliders: Vec<(ColliderHandle, Collider)>,
    next_handle: u32,
}

impl ColliderSet {
    pub fn register(
        &mut self,
        shape: impl Into<ColliderShape>,
        local_to_world: Mat4,
    ) -> FluidResult<ColliderHandle> {
        let collider = Collider::new(shape.into(), local_to_world)?;
        let handle = ColliderHandle(self.next_handle);
        self.next_handle += 1;
        self.colliders.push((handle, collider));
        Ok(handle)
    }

    pub fn get(&self, handle: ColliderHandle) -> Option<&Collider> {
        self.colliders
            .iter()
            .find(|(h, _)| *h == handle)
            .map(|(_, collider)| collider)
    }

    fn get_mut(&mut self, handle: ColliderHandle) -> FluidResult<&mut Collider> {
        self.colliders
            .iter_mut()
            .find(|(h, _)| *h == handle)
            .map(|(_, collider)| collider)
            .ok_or(FluidError::UnknownCollider(handle))
    }

    pub fn set_transform(&mut self, handle: ColliderHandle, local_to_world: Mat4) -> FluidResult<()> {
        self.get_mut(handle)?.set_transform(local_to_world)
    }

    pub fn set_active(&mut self, handle: ColliderHandle, active: bool) -> FluidResult<()> {
        self.get_mut(handle)?.active = active;
        Ok(())
    }

    pub fn remove(&mut self, handle: ColliderHandle) -> FluidResult<Collider> {
        let index = self
            .colliders
            .iter()
            .position(|(h, _)| *h == handle)
            .ok_or(FluidError::UnknownCollider(handle))?;
        Ok(self.colliders.remove(index).1)
    }

    /// Active colliders in registration order.
    pub fn active(&self) -> impl Iterator<Item = &Collider> {
        self.colliders
            .iter()
            .map(|(_, collider)| collider)
            .filter(|collider| collider.active)
    }

    pub fn len(&self) -> usize {
        self.colliders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.colliders.is_empty()
    }
}

/// Collider component. The entity's `GlobalTransform` places it in the world.
#[derive(Component, Clone, Copy, Debug, Reflect)]
#[reflect(Component)]
#[require(Transform)]
pub struct FluidCollider {
    pub shape: ColliderShape,
    pub active: bool,
}

impl FluidCollider {
    pub fn new(shape: impl Into<ColliderShape>) -> Self {
        Self {
            shape: shape.into(),
            active: true,
        }
    }

    /// The entity's rotation decides where the local `+Z` normal points.
    pub fn plane(plane: PlaneShape) -> Self {
        Self::new(plane)
    }

    pub fn cylinder(radius: f32, height: f32) -> Self {
        Self::new(CylinderShape::new(radius, height))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::FRAC_PI_2;

    #[test]
    fn test_plane_lifts_particle_below_surface() {
        let plane = PlaneShape::new(Vec2::splat(2.0));
        let contact = plane.closest_point(Vec3::new(0.0, 0.0, -0.01), 0.05);
        assert!(contact.signed_distance < 0.0);
        assert!((contact.corrected_position.z - 0.05).abs() < 1e-6);
        assert_eq!(contact.boundary_point, Vec3::ZERO);
    }

    #[test]
    fn test_plane_ignores_distant_particle() {
        let plane = PlaneShape::new(Vec2::splat(2.0));
        let point = Vec3::new(0.1, 0.2, 0.2);
        let contact = plane.closest_point(point, 0.05);
        assert!((contact.signed_distance - 0.2).abs() < 1e-6);
        assert!(!contact.is_contact(0.05));
        assert_eq!(contact.corrected_position, point);
    }

    #[test]
    fn test_finite_plane_clamps_to_rectangle() {
        let plane = PlaneShape::new(Vec2::new(2.0, 4.0));
        let contact = plane.closest_point(Vec3::new(3.0, -5.0, 0.5), 0.05);
        assert_eq!(contact.boundary_point, Vec3::new(1.0, -2.0, 0.0));

        let infinite = PlaneShape::infinite();
        let contact = infinite.closest_point(Vec3::new(3.0, -5.0, 0.5), 0.05);
        assert_eq!(contact.boundary_point, Vec3::new(3.0, -5.0, 0.0));
        assert!((contact.signed_distance - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_particle_on_plane_moves_along_normal() {
        let contact = PlaneShape::infinite().closest_point(Vec3::new(0.3, 0.3, 0.0), 0.1);
        assert!((contact.corrected_position - Vec3::new(0.3, 0.3, 0.1)).length() < 1e-6);
    }

    #[test]
    fn test_cylinder_corner_stays_clear_of_both_walls() {
        let cylinder = CylinderShape::new(1.0, 2.0);
        let contact = cylinder.closest_point(Vec3::new(0.95, 0.0, 0.05), 0.1);
        let corrected = contact.corrected_position;
        assert!(contact.signed_distance < 0.0);
        assert!(corrected.truncate().length() <= 0.9 + 1e-5);
        assert!(corrected.z >= 0.1 - 1e-5 && corrected.z <= 1.9 + 1e-5);
    }

    #[test]
    fn test_cylinder_round_wall_inside() {
        let cylinder = CylinderShape::new(1.0, 2.0);
        let contact = cylinder.closest_point(Vec3::new(0.95, 0.0, 1.0), 0.1);
        assert!((contact.signed_distance + 0.05).abs() < 1e-5);
        assert!((contact.boundary_point - Vec3::new(1.0, 0.0, 1.0)).length() < 1e-6);
        assert!((contact.corrected_position - Vec3::new(0.9, 0.0, 1.0)).length() < 1e-6);
    }

    #[test]
    fn test_cylinder_axis_is_not_a_contact() {
        let cylinder = CylinderShape::new(1.0, 2.0);
        let round = cylinder.closest_on_round(Vec3::new(0.0, 0.0, 1.0), 0.1);
        assert!((round.signed_distance + 1.0).abs() < 1e-6);
        assert!((round.boundary_point - Vec3::new(1.0, 0.0, 1.0)).length() < 1e-6);

        let contact = cylinder.closest_point(Vec3::new(0.0, 0.0, 1.0), 0.1);
        assert!(!contact.is_contact(0.1));
        assert!((contact.signed_distance.abs() - 1.0).abs() < 1e-5);
        assert_eq!(contact.corrected_position, Vec3::new(0.0, 0.0, 1.0));
    }

    #[test]
    fn test_cylinder_outside_round_wall_is_positive() {
        let contact = CylinderShape::new(1.0, 2.0).closest_on_round(Vec3::new(1.5, 0.0, 1.0), 0.1);
        assert!((contact.signed_distance - 0.5).abs() < 1e-6);
        assert!((contact.corrected_position - Vec3::new(1.1, 0.0, 1.0)).length() < 1e-6);
    }

    #[test]
    fn test_cylinder_below_base_and_above_cap() {
        let cylinder = CylinderShape::new(1.0, 2.0);

        let below = cylinder.closest_point(Vec3::new(0.2, 0.0, -0.05), 0.1);
        assert_eq!(below.boundary_point, Vec3::new(0.2, 0.0, 0.0));
        assert!((below.signed_distance - 0.05).abs() < 1e-6);

        let above = cylinder.closest_point(Vec3::new(2.0, 0.0, 3.0), 0.1);
        assert!((above.boundary_point - Vec3::new(1.0, 0.0, 2.0)).length() < 1e-6);
        assert!(!above.is_contact(0.1));
        assert_eq!(above.corrected_position, Vec3::new(2.0, 0.0, 3.0));
    }

    #[test]
    fn test_collider_resolves_in_world_space() {
        // Local +Z maps to world +Y, so this is a floor at y = 1.
        let transform = Mat4::from_rotation_translation(
            Quat::from_rotation_x(-FRAC_PI_2),
            Vec3::new(0.0, 1.0, 0.0),
        );
        let collider = Collider::new(PlaneShape::infinite().into(), transform).unwrap();
        let contact = collider.resolve(Vec3::new(0.5, 0.99, -0.25), 0.05);

        assert!(contact.signed_distance < 0.0);
        assert!((contact.boundary_point - Vec3::new(0.5, 1.0, -0.25)).length() < 1e-5);
        assert!((contact.corrected_position - Vec3::new(0.5, 1.05, -0.25)).length() < 1e-5);
    }

    #[test]
    fn test_invalid_colliders_are_rejected() {
        let mut set = ColliderSet::default();
        assert!(set
            .register(CylinderShape::new(-1.0, 2.0), Mat4::IDENTITY)
            .is_err());
        assert!(set
            .register(PlaneShape::new(Vec2::new(f32::NAN, 1.0)), Mat4::IDENTITY)
            .is_err());
        assert!(set
            .register(PlaneShape::infinite(), Mat4::from_scale(Vec3::ZERO))
            .is_err());
        assert!(set.is_empty());
    }

    #[test]
    fn test_collider_set_lifecycle() {
        let mut set = ColliderSet::default();
        let floor = set.register(PlaneShape::infinite(), Mat4::IDENTITY).unwrap();
        let tank = set
            .register(CylinderShape::new(1.0, 1.0), Mat4::IDENTITY)
            .unwrap();
        assert_ne!(floor, tank);
        assert_eq!(set.active().count(), 2);

        set.set_active(floor, false).unwrap();
        assert_eq!(set.active().count(), 1);

        set.set_transform(tank, Mat4::from_translation(Vec3::X)).unwrap();
        assert_eq!(
            set.get(tank).unwrap().local_to_world(),
            Mat4::from_translation(Vec3::X)
        );

        set.remove(floor).unwrap();
        assert_eq!(set.remove(floor), Err(FluidError::UnknownCollider(floor)));
        assert_eq!(
            set.set_active(floor, true),
            Err(FluidError::UnknownCollider(floor))
        );
        assert_eq!(set.len(), 1);
    }
}
