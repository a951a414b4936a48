//! Bevy plugin for fluid simulation.

use std::collections::HashMap;

use bevy::log::{error, warn};
use bevy::prelude::*;

use super::boundary::{ColliderHandle, FluidCollider};
use super::params::FluidParams;
use super::simulation::{EmissionQueue, FluidSimulation};
use super::snapshot::ParticleSnapshot;

/// Plugin that adds Position Based Fluids simulation to a Bevy app.
///
/// # Example
///
/// ```rust,ignore
/// use bevy::prelude::*;
/// use rivulet::prelude::*;
///
/// fn main() {
///     App::new()
///         .add_plugins(MinimalPlugins)
///         .add_plugins(FluidPlugin::with_params(FluidParams::water()))
///         .run();
/// }
/// ```
#[derive(Default)]
pub struct FluidPlugin {
    params: FluidParams,
}

impl FluidPlugin {
    pub fn with_params(params: FluidParams) -> Self {
        Self { params }
    }
}

/// Ordering of the plugin's systems inside `Update`.
#[derive(SystemSet, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FluidSystems {
    /// Parameters, colliders and queued emission flow into the simulation.
    Sync,
    /// The simulation steps.
    Step,
    /// The particle snapshot is refreshed.
    Publish,
}

/// Pause and single-step control.
#[derive(Resource, Clone, Debug, Default, Reflect)]
#[reflect(Resource)]
pub struct SimulationControl {
    pub paused: bool,
    step_requested: bool,
}

impl SimulationControl {
    pub fn toggle_pause(&mut self) {
        self.paused = !self.paused;
    }

    /// Runs exactly one step on the next update while paused.
    pub fn request_step(&mut self) {
        self.step_requested = true;
    }

    fn should_step(&mut self) -> bool {
        if !self.paused {
            return true;
        }
        std::mem::take(&mut self.step_requested)
    }
}

/// Marks a collider entity that the simulation knows about.
#[derive(Component, Clone, Copy, Debug, PartialEq, Eq)]
pub struct RegisteredCollider(pub ColliderHandle);

/// Marks a collider entity whose shape or transform was rejected.
#[derive(Component, Clone, Copy, Debug, Default)]
pub struct RejectedCollider;

#[derive(Resource, Default, Debug)]
struct ColliderRegistry {
    handles: HashMap<Entity, ColliderHandle>,
}

impl Plugin for FluidPlugin {
    fn build(&self, app: &mut App) {
        app.register_type::<FluidParams>()
            .register_type::<FluidCollider>()
            .register_type::<SimulationControl>();

        let simulation = match FluidSimulation::new(self.params.clone()) {
            Ok(simulation) => simulation,
            Err(err) => {
                error!("{err}; falling back to default fluid parameters");
                FluidSimulation::default()
            }
        };

        app.insert_resource(simulation.params().clone())
            .insert_resource(simulation)
            .init_resource::<EmissionQueue>()
            .init_resource::<ParticleSnapshot>()
            .init_resource::<SimulationControl>()
            .init_resource::<ColliderRegistry>();

        app.configure_sets(
            Update,
            (FluidSystems::Sync, FluidSystems::Step, FluidSystems::Publish).chain(),
        );

        app.add_systems(
            Update,
            (
                (
                    sync_params,
                    register_colliders,
                    update_colliders,
                    remove_colliders,
                    drain_emission_queue,
                )
                    .chain()
                    .in_set(FluidSystems::Sync),
                run_simulation.in_set(FluidSystems::Step),
                publish_snapshot.in_set(FluidSystems::Publish),
            ),
        );
    }
}

/// Pushes runtime edits of the [`FluidParams`] resource into the simulation.
fn sync_params(params: Res<FluidParams>, mut simulation: ResMut<FluidSimulation>) {
    if !params.is_changed() || params.is_added() || *params == *simulation.params() {
        return;
    }
    if let Err(err) = simulation.set_params(params.clone()) {
        warn!("ignoring fluid parameter change: {err}");
    }
}

fn register_colliders(
    mut commands: Commands,
    mut simulation: ResMut<FluidSimulation>,
    mut registry: ResMut<ColliderRegistry>,
    colliders: Query<
        (Entity, &FluidCollider, &GlobalTransform),
        (Without<RegisteredCollider>, Without<RejectedCollider>),
    >,
) {
    for (entity, collider, transform) in &colliders {
        let registered = simulation
            .register_collider(collider.shape, transform.compute_matrix())
            .and_then(|handle| {
                simulation.set_collider_active(handle, collider.active)?;
                Ok(handle)
            });
        match registered {
            Ok(handle) => {
                registry.handles.insert(entity, handle);
                commands.entity(entity).insert(RegisteredCollider(handle));
            }
            Err(err) => {
                warn!("collider on {:?} rejected: {}", entity, err);
                commands.entity(entity).insert(RejectedCollider);
            }
        }
    }
}

fn update_colliders(
    mut simulation: ResMut<FluidSimulation>,
    mut registry: ResMut<ColliderRegistry>,
    mut colliders: Query<
        (Entity, &FluidCollider, &GlobalTransform, &mut RegisteredCollider),
        Or<(Changed<FluidCollider>, Changed<GlobalTransform>)>,
    >,
) {
    for (entity, collider, transform, mut registered) in &mut colliders {
        let matrix = transform.compute_matrix();
        let shape_changed = simulation
            .colliders()
            .get(registered.0)
            .is_none_or(|existing| *existing.shape() != collider.shape);

        let result = if shape_changed {
            // Shapes are fixed once registered; replace the collider instead.
            if simulation.colliders().get(registered.0).is_some() {
                if let Err(err) = simulation.remove_collider(registered.0) {
                    warn!("failed to replace collider on {:?}: {}", entity, err);
                }
            }
            match simulation.register_collider(collider.shape, matrix) {
                Ok(handle) => {
                    registered.0 = handle;
                    registry.handles.insert(entity, handle);
                    Ok(())
                }
                Err(err) => Err(err),
            }
        } else {
            simulation.set_collider_transform(registered.0, matrix)
        };
        let result =
            result.and_then(|()| simulation.set_collider_active(registered.0, collider.active));

        if let Err(err) = result {
            warn!("failed to update collider on {:?}: {}", entity, err);
        }
    }
}

fn remove_colliders(
    mut commands: Commands,
    mut simulation: ResMut<FluidSimulation>,
    mut registry: ResMut<ColliderRegistry>,
    mut removed: RemovedComponents<FluidCollider>,
    stale: Query<Entity, (With<RegisteredCollider>, Without<FluidCollider>)>,
) {
    for entity in removed.read() {
        if let Some(handle) = registry.handles.remove(&entity) {
            if let Err(err) = simulation.remove_collider(handle) {
                warn!("failed to remove collider of {:?}: {}", entity, err);
            }
        }
    }
    for entity in &stale {
        commands.entity(entity).remove::<RegisteredCollider>();
    }
}

fn drain_emission_queue(
    mut queue: ResMut<EmissionQueue>,
    mut simulation: ResMut<FluidSimulation>,
) {
    if queue.is_empty() {
        return;
    }
    if let Err(err) = queue.drain_into(&mut simulation) {
        warn!("emission batch rejected: {err}");
    }
}

/// System to run the fluid simulation.
fn run_simulation(
    time: Res<Time>,
    mut control: ResMut<SimulationControl>,
    mut simulation: ResMut<FluidSimulation>,
) {
    if !control.should_step() {
        return;
    }
    let dt = simulation
        .params()
        .fixed_timestep
        .unwrap_or(time.delta_secs());

    if dt > 0.0 {
        simulation.step(dt);
    }
}

fn publish_snapshot(simulation: Res<FluidSimulation>, mut snapshot: ResMut<ParticleSnapshot>) {
    if simulation.is_changed() || snapshot.frame != simulation.frame() {
        simulation.write_snapshot(&mut snapshot);
    }
}
