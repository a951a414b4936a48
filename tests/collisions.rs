use std::f32::consts::FRAC_PI_2;

use bevy::prelude::*;
use rivulet::prelude::*;

const PARTICLE_RADIUS: f32 = 0.05;

#[test]
fn test_plane_pushes_penetrating_particle_out() {
    let shape = ColliderShape::Plane(PlaneShape::new(Vec2::splat(2.0)));

    let inside = shape.closest_point(Vec3::new(0.0, 0.0, -0.01), PARTICLE_RADIUS);
    assert!((inside.signed_distance + 0.01).abs() < 1e-6);
    assert!((inside.corrected_position - Vec3::new(0.0, 0.0, 0.05)).length() < 1e-6);

    let clear = shape.closest_point(Vec3::new(0.0, 0.0, 0.2), PARTICLE_RADIUS);
    assert!(!clear.is_contact(PARTICLE_RADIUS));
    assert_eq!(clear.corrected_position, Vec3::new(0.0, 0.0, 0.2));
}

#[test]
fn test_finite_plane_edge_pushes_outward() {
    let shape = PlaneShape::new(Vec2::splat(2.0));
    let contact = shape.closest_point(Vec3::new(1.02, 0.0, 0.0), PARTICLE_RADIUS);

    assert_eq!(contact.boundary_point, Vec3::new(1.0, 0.0, 0.0));
    assert!((contact.corrected_position - Vec3::new(1.05, 0.0, 0.0)).length() < 1e-5);
}

#[test]
fn test_cylinder_corner_contact() {
    let shape = ColliderShape::Cylinder(CylinderShape::new(1.0, 2.0));
    let contact = shape.closest_point(Vec3::new(0.95, 0.0, 0.05), 0.1);
    let p = contact.corrected_position;

    assert!(Vec2::new(p.x, p.y).length() <= 0.9 + 1e-5);
    assert!(p.z >= 0.1 - 1e-5 && p.z <= 1.9 + 1e-5);
}

#[test]
fn test_cylinder_top_corner_contact() {
    let cylinder = CylinderShape::new(1.0, 2.0);
    let contact = cylinder.closest_point(Vec3::new(0.0, -0.97, 1.96), 0.1);
    let p = contact.corrected_position;

    assert!(contact.signed_distance < 0.0);
    assert!(Vec2::new(p.x, p.y).length() <= 0.9 + 1e-5);
    assert!(p.z <= 1.9 + 1e-5);
}

#[test]
fn test_cylinder_interior_far_from_walls_is_untouched() {
    let cylinder = CylinderShape::new(1.0, 2.0);
    let point = Vec3::new(0.2, 0.1, 1.0);
    let contact = cylinder.closest_point(point, 0.1);
    assert!(contact.signed_distance < -0.1);
    assert_eq!(contact.corrected_position, point);
}

#[test]
fn test_moved_collider_follows_transform() {
    let params = FluidParams::default()
        .with_max_particles(8)
        .with_gravity(Vec3::ZERO)
        .with_fixed_substeps(1)
        .with_hash(HashParams::compact(1_009));
    let mut sim = FluidSimulation::new(params).unwrap();
    let radius = sim.params().particle_radius;

    let floor = sim
        .register_collider(PlaneShape::infinite(), Mat4::from_rotation_x(-FRAC_PI_2))
        .unwrap();
    sim.emit_particles(
        FluidProperties::default(),
        &[Vec3::new(0.0, 0.5 + radius * 0.5, 0.0)],
        Vec3::ZERO,
    );

    // Raise the floor to y = 0.5; the particle is now in contact and lifted.
    sim.set_collider_transform(
        floor,
        Mat4::from_rotation_translation(Quat::from_rotation_x(-FRAC_PI_2), Vec3::Y * 0.5),
    )
    .unwrap();
    sim.step(1.0 / 60.0);

    let probe = sim.probe(0).unwrap();
    assert!((probe.position.y - (0.5 + radius)).abs() < 1e-4);
    assert!((probe.collision_point.y - 0.5).abs() < 1e-4);
    assert!(probe.collision_distance > 0.0);
}

#[test]
fn test_inactive_collider_is_skipped() {
    let params = FluidParams::default()
        .with_max_particles(8)
        .with_hash(HashParams::compact(1_009));
    let mut sim = FluidSimulation::new(params).unwrap();
    let floor = sim
        .register_collider(PlaneShape::infinite(), Mat4::from_rotation_x(-FRAC_PI_2))
        .unwrap();
    sim.set_collider_active(floor, false).unwrap();
    sim.emit_particles(FluidProperties::default(), &[Vec3::new(0.0, 0.005, 0.0)], Vec3::ZERO);

    sim.step(1.0 / 60.0);

    assert!(sim.particles().positions()[0].y < 0.005);
    assert_eq!(sim.particles().collisions()[0], Vec4::ZERO);
}

#[test]
fn test_unknown_collider_handle() {
    let params = FluidParams::default()
        .with_max_particles(8)
        .with_hash(HashParams::compact(1_009));
    let mut sim = FluidSimulation::new(params).unwrap();
    let handle = sim
        .register_collider(CylinderShape::new(1.0, 1.0), Mat4::IDENTITY)
        .unwrap();
    sim.remove_collider(handle).unwrap();

    assert_eq!(
        sim.set_collider_transform(handle, Mat4::IDENTITY),
        Err(FluidError::UnknownCollider(handle))
    );
    assert!(sim.colliders().is_empty());
}
