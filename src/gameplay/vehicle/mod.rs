use crate::config::{GameConfig, VehicleConfig};
use crate::gameplay::race::RaceStep;
use crate::gameplay::wheel::{self, Wheel};
use crate::states::GameState;
use crate::track::{TrackLayout, GROUP_PICKUP, GROUP_PROJECTILE, GROUP_RACER, GROUP_TRACK, GROUP_WHEEL};
use bevy::prelude::*;
use bevy_rapier2d::prelude::*;
use std::collections::HashMap;

/// Grid size used to de-duplicate turbo-tile triggers.
const TURBO_CELL_SIZE_M: f32 = 2.0;
/// How long a visited turbo cell stays armed against re-triggering.
const TURBO_CELL_MEMORY_S: f32 = 3.0;
const WHEEL_Z: f32 = 9.8;
const CHASSIS_Z: f32 = 10.0;

pub struct VehicleGameplayPlugin;

impl Plugin for VehicleGameplayPlugin {
    fn build(&self, app: &mut App) {
        app.add_message::<LeftRoadEvent>()
            .add_message::<TurboTriggeredEvent>()
            .add_systems(
                FixedUpdate,
                (
                    sync_flying_collision_groups,
                    vehicle_act,
                    wheel::apply_wheel_steering,
                    wheel::advance_wheels,
                )
                    .chain()
                    .in_set(RaceStep::Vehicle)
                    .run_if(in_state(GameState::InRace))
                    .run_if(resource_exists::<GameConfig>)
                    .run_if(resource_exists::<TrackLayout>),
            );
    }
}

/// Fired once per transition from road onto a non-road surface.
#[derive(Message, Debug, Clone, Copy)]
pub struct LeftRoadEvent {
    pub racer: Entity,
}

#[derive(Message, Debug, Clone, Copy)]
pub struct TurboTriggeredEvent {
    pub racer: Entity,
}

#[derive(Component, Debug)]
pub struct Vehicle {
    pub config_id: String,
    pub wheels: [Entity; 4],
    pub steer_direction: f32,
    pub accelerating: bool,
    pub braking: bool,
    /// -1 = inactive, otherwise seconds elapsed since the trigger frame.
    pub turbo_elapsed_s: f32,
    turbo_impulse_pending: bool,
    /// Vertical offset: negative while falling/submerged, positive airborne.
    pub z: f32,
    pub stopped: bool,
    pub flying: bool,
    flying_groups_applied: bool,
    pub speed_limit_factor: f32,
    pub surface_id: String,
    pub on_road: bool,
    pub ice_drifting: bool,
    turbo_cells: HashMap<(i32, i32), f32>,
}

impl Vehicle {
    pub fn new(config_id: String, wheels: [Entity; 4]) -> Self {
        Self {
            config_id,
            wheels,
            steer_direction: 0.0,
            accelerating: false,
            braking: false,
            turbo_elapsed_s: -1.0,
            turbo_impulse_pending: false,
            z: 0.0,
            stopped: false,
            flying: false,
            flying_groups_applied: false,
            speed_limit_factor: 1.0,
            surface_id: "road".to_string(),
            on_road: true,
            ice_drifting: false,
            turbo_cells: HashMap::new(),
        }
    }

    pub fn turbo_active(&self) -> bool {
        self.turbo_elapsed_s >= 0.0
    }

    /// Starts a turbo unless the vehicle is held stopped.
    pub fn trigger_turbo(&mut self) -> bool {
        if self.stopped {
            return false;
        }
        self.turbo_elapsed_s = 0.0;
        self.turbo_impulse_pending = true;
        true
    }

    /// Stopped and turbo are mutually exclusive: stopping cancels the boost.
    pub fn set_stopped(&mut self, stopped: bool) {
        self.stopped = stopped;
        if stopped {
            self.turbo_elapsed_s = -1.0;
            self.turbo_impulse_pending = false;
        }
    }

    pub fn set_flying(&mut self, flying: bool) {
        self.flying = flying;
    }
}

/// Speed-dependent steering lock: full lock near standstill, linear
/// interpolation between the low-speed and max-speed thresholds, then a small
/// fixed lock above max speed.
pub fn steer_angle_for_speed(direction: f32, speed: f32, cfg: &VehicleConfig) -> f32 {
    let speed = speed.abs();
    let lock_deg = if speed <= cfg.low_speed_threshold_mps {
        cfg.full_lock_deg
    } else if speed < cfg.max_forward_speed {
        let t = (speed - cfg.low_speed_threshold_mps)
            / (cfg.max_forward_speed - cfg.low_speed_threshold_mps);
        cfg.full_lock_deg + (cfg.high_speed_lock_deg - cfg.full_lock_deg) * t
    } else {
        cfg.over_max_lock_deg
    };
    direction.clamp(-1.0, 1.0) * lock_deg.to_radians()
}

fn racer_collision_groups() -> CollisionGroups {
    CollisionGroups::new(GROUP_RACER, GROUP_TRACK | GROUP_PROJECTILE | GROUP_PICKUP)
}

fn wheel_collision_groups() -> CollisionGroups {
    CollisionGroups::new(GROUP_WHEEL, GROUP_TRACK)
}

fn pass_through_groups() -> CollisionGroups {
    CollisionGroups::new(Group::NONE, Group::NONE)
}

/// Builds the chassis body on `racer_entity` and spawns the four wheel bodies
/// joined to it. Returns the wheel entities, front pair first.
pub fn spawn_vehicle(
    commands: &mut Commands,
    racer_entity: Entity,
    cfg: &VehicleConfig,
    position: Vec2,
    heading_rad: f32,
    body_color: Color,
) -> [Entity; 4] {
    let half_base = cfg.wheel_base_m * 0.5;
    let half_track = cfg.wheel_track_m * 0.5;
    let hardpoints = [
        Vec2::new(half_base, half_track),
        Vec2::new(half_base, -half_track),
        Vec2::new(-half_base, half_track),
        Vec2::new(-half_base, -half_track),
    ];

    let rotation = Mat2::from_angle(heading_rad);
    let wheel_size = Vec2::new(
        cfg.wheel_half_extents[0] * 2.0,
        cfg.wheel_half_extents[1] * 2.0,
    );

    let mut wheels = [Entity::PLACEHOLDER; 4];
    for (index, hardpoint) in hardpoints.iter().enumerate() {
        let steerable = index < 2;
        let world = position + rotation * *hardpoint;
        wheels[index] = commands
            .spawn((
                Name::new(format!("Wheel/{index}")),
                Wheel::new(racer_entity, index, steerable, *hardpoint),
                RigidBody::Dynamic,
                Collider::cuboid(cfg.wheel_half_extents[0], cfg.wheel_half_extents[1]),
                ColliderMassProperties::Density(cfg.wheel_density),
                wheel_collision_groups(),
                Velocity::default(),
                ExternalForce::default(),
                ExternalImpulse::default(),
                ReadMassProperties::default(),
                ImpulseJoint::new(racer_entity, wheel::joint_for_wheel(*hardpoint)),
                Sprite::from_color(Color::srgb(0.12, 0.12, 0.14), wheel_size),
                Transform::from_xyz(world.x, world.y, WHEEL_Z)
                    .with_rotation(Quat::from_rotation_z(heading_rad)),
            ))
            .id();
    }

    commands.entity(racer_entity).insert((
        Vehicle::new(cfg.id.clone(), wheels),
        RigidBody::Dynamic,
        Collider::cuboid(cfg.chassis_half_extents[0], cfg.chassis_half_extents[1]),
        ColliderMassProperties::Density(cfg.chassis_density),
        racer_collision_groups(),
        ActiveEvents::COLLISION_EVENTS,
        Velocity::default(),
        ExternalForce::default(),
        ExternalImpulse::default(),
        Damping {
            linear_damping: 0.08,
            angular_damping: 1.6,
        },
        ReadMassProperties::default(),
        Sprite::from_color(
            body_color,
            Vec2::new(
                cfg.chassis_half_extents[0] * 2.0,
                cfg.chassis_half_extents[1] * 2.0,
            ),
        ),
        Transform::from_xyz(position.x, position.y, CHASSIS_Z)
            .with_rotation(Quat::from_rotation_z(heading_rad)),
    ));

    wheels
}

/// Strips collision categories while flying so the body passes through
/// everything, and restores them on landing.
fn sync_flying_collision_groups(
    mut racer_query: Query<(&mut Vehicle, &mut CollisionGroups), Without<Wheel>>,
    mut wheel_groups_query: Query<&mut CollisionGroups, (With<Wheel>, Without<Vehicle>)>,
) {
    for (mut vehicle, mut groups) in &mut racer_query {
        if vehicle.flying == vehicle.flying_groups_applied {
            continue;
        }

        let wheels = vehicle.wheels;
        if vehicle.flying {
            *groups = pass_through_groups();
            for wheel_entity in wheels {
                if let Ok(mut wheel_groups) = wheel_groups_query.get_mut(wheel_entity) {
                    *wheel_groups = pass_through_groups();
                }
            }
        } else {
            *groups = racer_collision_groups();
            for wheel_entity in wheels {
                if let Ok(mut wheel_groups) = wheel_groups_query.get_mut(wheel_entity) {
                    *wheel_groups = wheel_collision_groups();
                }
            }
        }
        vehicle.flying_groups_applied = vehicle.flying;
    }
}

#[allow(clippy::type_complexity)]
fn vehicle_act(
    time: Res<Time>,
    config: Res<GameConfig>,
    layout: Res<TrackLayout>,
    mut racer_query: Query<
        (
            Entity,
            &mut Vehicle,
            &Transform,
            &mut Velocity,
            &mut ExternalForce,
            &mut ExternalImpulse,
            Option<&ReadMassProperties>,
        ),
        Without<Wheel>,
    >,
    mut wheel_query: Query<(&mut Wheel, &Transform), Without<Vehicle>>,
    mut left_road_events: MessageWriter<LeftRoadEvent>,
    mut turbo_events: MessageWriter<TurboTriggeredEvent>,
) {
    let dt = time.delta_secs().max(0.000_1);

    for (entity, mut vehicle, transform, mut velocity, mut force, mut impulse, mass_properties) in
        &mut racer_query
    {
        *force = ExternalForce::default();
        *impulse = ExternalImpulse::default();

        let Some(cfg) = config.vehicles_by_id.get(&vehicle.config_id) else {
            continue;
        };
        let mass = mass_properties
            .map(|properties| properties.mass)
            .unwrap_or(1.0)
            .max(0.1);
        let heading = transform.rotation.to_euler(EulerRot::XYZ).2;
        let rotation = Mat2::from_angle(heading);
        let forward = rotation * Vec2::X;
        let position = transform.translation.truncate();
        let forward_speed = velocity.linvel.dot(forward);

        for wheel_entity in vehicle.wheels {
            if let Ok((mut wheel, _)) = wheel_query.get_mut(wheel_entity) {
                wheel.drive_delta = 0.0;
            }
        }

        if vehicle.flying {
            // Airborne: no ground effects, no pilot authority over the wheels.
            continue;
        }

        if vehicle.stopped {
            // Recovery hold: bleed all motion off, skip pilot/turbo/ground logic.
            force.force += -velocity.linvel * (cfg.stop_damping * mass);
            velocity.angvel *= f32::exp(-cfg.stop_damping * dt);
            continue;
        }

        // Turbo: one impulse on the trigger frame, then a continuous push.
        if vehicle.turbo_active() {
            if vehicle.turbo_impulse_pending {
                vehicle.turbo_impulse_pending = false;
                impulse.impulse += forward * (cfg.turbo_impulse * mass);
            }
            force.force += forward * cfg.turbo_force;
            vehicle.turbo_elapsed_s += dt;
            if vehicle.turbo_elapsed_s > cfg.turbo_duration_s {
                vehicle.turbo_elapsed_s = -1.0;
            }
        }

        // Pilot commands: throttle delta per wheel plus the steering curve.
        let limiter = vehicle.speed_limit_factor.clamp(0.0, 1.0);
        let mut throttle_delta = 0.0;
        if vehicle.accelerating {
            throttle_delta += cfg.acceleration * limiter;
        }
        if vehicle.braking {
            throttle_delta -= cfg.brake_strength;
        }
        let steer_angle = steer_angle_for_speed(vehicle.steer_direction, forward_speed, cfg);
        let effective_max = cfg.max_forward_speed * limiter.max(0.05);

        let mut ground_speed_sum = 0.0;
        let mut covered_cells: Vec<(i32, i32)> = Vec::new();
        let mut turbo_hit = false;
        for wheel_entity in vehicle.wheels {
            let Ok((mut wheel, wheel_transform)) = wheel_query.get_mut(wheel_entity) else {
                continue;
            };
            wheel.drive_delta = throttle_delta;
            wheel.effective_max_speed = effective_max;
            if wheel.steerable {
                wheel.steer_angle_rad = steer_angle;
            }
            ground_speed_sum += wheel.ground_speed_factor;

            let wheel_position = wheel_transform.translation.truncate();
            if layout.material_at(wheel_position).is_turbo {
                let cell = turbo_cell_id(wheel_position);
                covered_cells.push(cell);
                if !vehicle.turbo_cells.contains_key(&cell) {
                    vehicle.turbo_cells.insert(cell, TURBO_CELL_MEMORY_S);
                    turbo_hit = true;
                }
            }
        }
        if turbo_hit && vehicle.trigger_turbo() {
            turbo_events.write(TurboTriggeredEvent { racer: entity });
        }

        // Expire turbo cells once their timer runs out and no wheel covers them.
        vehicle.turbo_cells.retain(|cell, remaining| {
            *remaining -= dt;
            *remaining > 0.0 || covered_cells.contains(cell)
        });

        let average_ground_speed = ground_speed_sum / vehicle.wheels.len() as f32;
        if average_ground_speed < 1.0 && !vehicle.turbo_active() {
            let deficit = 1.0 - average_ground_speed;
            force.force += -velocity.linvel * (cfg.offroad_drag * deficit * mass);
        }

        // Ground material under the chassis, with a single off-road edge event.
        let surface = layout.material_at(position);
        let was_on_road = vehicle.on_road;
        vehicle.surface_id = surface.id.clone();
        vehicle.on_road = surface.is_road;
        if was_on_road && !surface.is_road {
            left_road_events.write(LeftRoadEvent { racer: entity });
        }

        // Ice drifting is a side-channel signal, separate from wheel drift.
        if !surface.allows_drift && surface.is_road {
            let lateral_speed = velocity.linvel.dot(rotation * Vec2::Y).abs();
            vehicle.ice_drifting = lateral_speed > cfg.ice_drift_slip_mps;
        } else {
            vehicle.ice_drifting = false;
        }
    }
}

fn turbo_cell_id(position: Vec2) -> (i32, i32) {
    (
        (position.x / TURBO_CELL_SIZE_M).floor() as i32,
        (position.y / TURBO_CELL_SIZE_M).floor() as i32,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::minimal_config;

    fn test_vehicle_config() -> VehicleConfig {
        minimal_config().vehicles.vehicles[0].clone()
    }

    #[test]
    fn steering_gives_full_lock_near_standstill() {
        let cfg = test_vehicle_config();
        let angle = steer_angle_for_speed(1.0, 0.0, &cfg);
        assert!((angle - cfg.full_lock_deg.to_radians()).abs() < 1e-6);
    }

    #[test]
    fn steering_interpolates_between_thresholds() {
        let cfg = test_vehicle_config();
        let mid_speed = (cfg.low_speed_threshold_mps + cfg.max_forward_speed) * 0.5;
        let angle = steer_angle_for_speed(1.0, mid_speed, &cfg).to_degrees();
        let expected = (cfg.full_lock_deg + cfg.high_speed_lock_deg) * 0.5;
        assert!((angle - expected).abs() < 1e-3);
    }

    #[test]
    fn steering_uses_small_fixed_lock_above_max_speed() {
        let cfg = test_vehicle_config();
        let angle = steer_angle_for_speed(1.0, cfg.max_forward_speed + 10.0, &cfg);
        assert!((angle - cfg.over_max_lock_deg.to_radians()).abs() < 1e-6);
    }

    #[test]
    fn steering_clamps_direction_and_mirrors_sign() {
        let cfg = test_vehicle_config();
        let left = steer_angle_for_speed(-3.0, 0.0, &cfg);
        let right = steer_angle_for_speed(3.0, 0.0, &cfg);
        assert!((left + right).abs() < 1e-6);
        assert!((left + cfg.full_lock_deg.to_radians()).abs() < 1e-6);
    }

    #[test]
    fn stopping_cancels_an_active_turbo() {
        let mut vehicle = Vehicle::new("kart".to_string(), [Entity::PLACEHOLDER; 4]);
        assert!(vehicle.trigger_turbo());
        assert!(vehicle.turbo_active());

        vehicle.set_stopped(true);
        assert!(!vehicle.turbo_active());
        // And a stopped vehicle refuses a new turbo outright.
        assert!(!vehicle.trigger_turbo());
    }

    #[test]
    fn turbo_cells_quantize_world_positions() {
        assert_eq!(turbo_cell_id(Vec2::new(0.1, 0.1)), (0, 0));
        assert_eq!(turbo_cell_id(Vec2::new(1.9, 0.1)), (0, 0));
        assert_eq!(turbo_cell_id(Vec2::new(2.1, -0.1)), (1, -1));
    }
}
