use std::f32::consts::FRAC_PI_2;

use bevy::prelude::*;
use rivulet::prelude::*;

fn test_app() -> App {
    let params = FluidParams::default()
        .with_max_particles(64)
        .with_hash(HashParams::compact(1_009))
        .with_fixed_timestep(1.0 / 60.0);

    let mut app = App::new();
    app.init_resource::<Time>()
        .add_plugins(FluidPlugin::with_params(params));
    app
}

fn floor_transform() -> GlobalTransform {
    GlobalTransform::from(Transform::from_rotation(Quat::from_rotation_x(-FRAC_PI_2)))
}

#[test]
fn test_queued_particles_are_simulated_and_published() {
    let mut app = test_app();
    app.world_mut().resource_mut::<EmissionQueue>().emit(
        FluidProperties::default(),
        vec![Vec3::new(0.0, 1.0, 0.0), Vec3::new(0.5, 1.0, 0.0)],
        Vec3::ZERO,
    );

    app.update();

    let simulation = app.world().resource::<FluidSimulation>();
    assert_eq!(simulation.particle_count(), 2);
    assert_eq!(simulation.frame(), 1);
    assert!(app.world().resource::<EmissionQueue>().is_empty());

    let snapshot = app.world().resource::<ParticleSnapshot>();
    assert_eq!(snapshot.len(), 2);
    assert_eq!(snapshot.frame, 1);
    assert!(snapshot.positions[0].y < 1.0);
}

#[test]
fn test_collider_entities_are_registered_and_removed() {
    let mut app = test_app();
    let floor = app
        .world_mut()
        .spawn((
            FluidCollider::plane(PlaneShape::infinite()),
            floor_transform(),
        ))
        .id();

    app.update();

    assert_eq!(app.world().resource::<FluidSimulation>().colliders().len(), 1);
    assert!(app.world().get::<RegisteredCollider>(floor).is_some());

    app.world_mut().entity_mut(floor).despawn();
    app.update();

    assert!(app.world().resource::<FluidSimulation>().colliders().is_empty());
}

#[test]
fn test_floor_entity_supports_particles() {
    let mut app = test_app();
    app.world_mut().spawn((
        FluidCollider::plane(PlaneShape::infinite()),
        floor_transform(),
    ));
    app.world_mut().resource_mut::<EmissionQueue>().emit(
        FluidProperties::default(),
        vec![Vec3::new(0.0, 0.02, 0.0)],
        Vec3::ZERO,
    );

    for _ in 0..60 {
        app.update();
    }

    let snapshot = app.world().resource::<ParticleSnapshot>();
    let radius = snapshot.particle_radius;
    assert!(snapshot.positions[0].y >= radius * 0.99);
}

#[test]
fn test_invalid_collider_is_rejected() {
    let mut app = test_app();
    let entity = app
        .world_mut()
        .spawn((
            FluidCollider::cylinder(-1.0, 1.0),
            GlobalTransform::IDENTITY,
        ))
        .id();

    app.update();

    assert!(app.world().get::<RejectedCollider>(entity).is_some());
    assert!(app.world().resource::<FluidSimulation>().colliders().is_empty());
}

#[test]
fn test_pause_and_single_step() {
    let mut app = test_app();
    app.world_mut().resource_mut::<EmissionQueue>().emit(
        FluidProperties::default(),
        vec![Vec3::ZERO],
        Vec3::ZERO,
    );
    app.world_mut().resource_mut::<SimulationControl>().paused = true;

    app.update();
    assert_eq!(app.world().resource::<FluidSimulation>().frame(), 0);
    assert_eq!(app.world().resource::<FluidSimulation>().particle_count(), 1);

    app.world_mut().resource_mut::<SimulationControl>().request_step();
    app.update();
    app.update();
    assert_eq!(app.world().resource::<FluidSimulation>().frame(), 1);
}

#[test]
fn test_param_edits_reach_the_simulation() {
    let mut app = test_app();
    app.update();

    app.world_mut().resource_mut::<FluidParams>().drag = 0.25;
    app.update();
    assert_eq!(app.world().resource::<FluidSimulation>().params().drag, 0.25);

    // Capacity cannot change on a live simulation.
    app.world_mut().resource_mut::<FluidParams>().max_particles = 8;
    app.update();
    assert_eq!(app.world().resource::<FluidSimulation>().capacity(), 64);
}
