use crate::config::{GameConfig, HazardConfig};
use crate::gameplay::bonus::ReleaseHeldBonusEvent;
use crate::gameplay::race::RaceStep;
use crate::gameplay::racer::{LapTracking, Racer};
use crate::gameplay::sfx::{SfxCue, SfxCueEvent};
use crate::gameplay::vehicle::Vehicle;
use crate::states::GameState;
use crate::track::TrackLayout;
use bevy::prelude::*;
use bevy_rapier2d::prelude::Velocity;
use std::f32::consts::PI;

const DRONE_SPEED_MPS: f32 = 22.0;
const DRONE_ARRIVE_TOLERANCE_M: f32 = 0.8;
const DRONE_SPAWN_OFFSET: Vec2 = Vec2::new(42.0, 26.0);
const DRONE_LEAVE_DISTANCE_M: f32 = 70.0;
const DRONE_Z: f32 = 14.0;
const SUBMERGE_LIMIT: f32 = -1.6;
const CARRY_HEIGHT: f32 = 0.9;
const DROP_START_HEIGHT: f32 = 0.9;

pub struct HazardGameplayPlugin;

impl Plugin for HazardGameplayPlugin {
    fn build(&self, app: &mut App) {
        app.add_message::<HazardSplashEvent>()
            .add_systems(
                FixedUpdate,
                (update_hazard_states, update_rescue_drones, apply_height_visuals)
                    .chain()
                    .in_set(RaceStep::Hazard)
                    .run_if(in_state(GameState::InRace))
                    .run_if(resource_exists::<GameConfig>)
                    .run_if(resource_exists::<TrackLayout>),
            )
            .add_systems(OnEnter(GameState::Results), cleanup_rescue_drones);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HazardPhase {
    #[default]
    Normal,
    Falling,
    Climbing,
    Lifting,
    Recovering,
    Dropping,
}

#[derive(Message, Debug, Clone, Copy)]
pub struct HazardSplashEvent {
    pub racer: Entity,
    pub into_water: bool,
}

/// Per-racer hazard recovery machine. The rescue drone entity exists exactly
/// while the machine is in Falling/Lifting/Recovering (plus the drone's own
/// leaving tail).
#[derive(Component, Debug, Clone, Copy, Default)]
pub struct HazardState {
    pub phase: HazardPhase,
    pub timer_s: f32,
    pub fall_depth_s: f32,
    pub drone: Option<Entity>,
    pub drop_point: Vec2,
    pub drop_heading_rad: f32,
}

impl HazardState {
    pub fn is_normal(&self) -> bool {
        self.phase == HazardPhase::Normal
    }
}

/// Side-effects requested by a state transition; the caller owns the ECS work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HazardEffect {
    SpawnDrone,
    Splash,
    StopVehicle,
    StripBonus,
    ComputeDropPoint,
    ReleaseVehicle,
    DroneLeaves,
}

/// Pure transition step of the hazard machine.
fn advance_hazard(
    state: &mut HazardState,
    over_hole: bool,
    drone_in_position: bool,
    at_drop_point: bool,
    cfg: &HazardConfig,
    dt: f32,
) -> Vec<HazardEffect> {
    let mut effects = Vec::new();
    match state.phase {
        HazardPhase::Normal => {
            if over_hole {
                state.phase = HazardPhase::Falling;
                state.fall_depth_s = 0.0;
                effects.push(HazardEffect::SpawnDrone);
                effects.push(HazardEffect::Splash);
            }
        }
        HazardPhase::Falling => {
            state.fall_depth_s += dt;
            if drone_in_position {
                state.phase = HazardPhase::Lifting;
                state.timer_s = cfg.lift_duration_s;
                effects.push(HazardEffect::StopVehicle);
                effects.push(HazardEffect::StripBonus);
            } else if !over_hole {
                // Self-recovery before the drone got there.
                state.phase = HazardPhase::Climbing;
                effects.push(HazardEffect::DroneLeaves);
            }
        }
        HazardPhase::Climbing => {
            if over_hole {
                state.phase = HazardPhase::Falling;
            } else {
                state.fall_depth_s -= dt;
                if state.fall_depth_s <= 0.0 {
                    state.fall_depth_s = 0.0;
                    state.phase = HazardPhase::Normal;
                }
            }
        }
        HazardPhase::Lifting => {
            state.timer_s -= dt;
            if state.timer_s <= 0.0 {
                state.phase = HazardPhase::Recovering;
                effects.push(HazardEffect::ComputeDropPoint);
            }
        }
        HazardPhase::Recovering => {
            if at_drop_point {
                state.phase = HazardPhase::Dropping;
                state.timer_s = cfg.drop_duration_s;
            }
        }
        HazardPhase::Dropping => {
            state.timer_s -= dt;
            if state.timer_s <= 0.0 {
                state.phase = HazardPhase::Normal;
                state.fall_depth_s = 0.0;
                effects.push(HazardEffect::ReleaseVehicle);
                effects.push(HazardEffect::DroneLeaves);
            }
        }
    }
    effects
}

/// Bounce-out height curve for the drop phase: starts at the carry height,
/// touches down with a damped rebound, ends on the ground.
fn drop_height(elapsed_s: f32, duration_s: f32) -> f32 {
    let t = (elapsed_s / duration_s.max(f32::EPSILON)).clamp(0.0, 1.0);
    DROP_START_HEIGHT * (1.0 - t) * (PI * 1.5 * t).cos().abs()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DronePhase {
    Arriving,
    Recovering,
    Leaving,
}

#[derive(Component, Debug)]
pub struct RescueDrone {
    pub racer: Entity,
    pub phase: DronePhase,
    leave_traveled_m: f32,
}

#[allow(clippy::type_complexity)]
fn update_hazard_states(
    time: Res<Time>,
    mut commands: Commands,
    config: Res<GameConfig>,
    layout: Res<TrackLayout>,
    mut racer_query: Query<
        (
            Entity,
            &mut HazardState,
            &mut Vehicle,
            &mut Transform,
            &mut Velocity,
            &LapTracking,
        ),
        With<Racer>,
    >,
    mut drone_query: Query<&mut RescueDrone>,
    mut splash_events: MessageWriter<HazardSplashEvent>,
    mut release_events: MessageWriter<ReleaseHeldBonusEvent>,
    mut cue_events: MessageWriter<SfxCueEvent>,
) {
    let dt = time.delta_secs();
    let cfg = &config.game.hazard;

    for (entity, mut hazard, mut vehicle, mut transform, mut velocity, lap) in &mut racer_query {
        let position = transform.translation.truncate();
        let surface = layout.material_at(position);
        let over_hole = surface.is_hole;

        let drone_in_position = hazard
            .drone
            .and_then(|drone| drone_query.get(drone).ok())
            .map(|drone| drone.phase == DronePhase::Recovering)
            .unwrap_or(false);

        let at_drop_point = if hazard.phase == HazardPhase::Recovering {
            let distance = position.distance(hazard.drop_point);
            let heading = transform.rotation.to_euler(EulerRot::XYZ).2;
            let angle_error = shortest_angle_delta_rad(hazard.drop_heading_rad, heading).abs();
            distance <= cfg.drop_tolerance_m && angle_error <= cfg.drop_tolerance_rad
        } else {
            false
        };

        let phase_before = hazard.phase;
        let effects = advance_hazard(
            &mut hazard,
            over_hole,
            drone_in_position,
            at_drop_point,
            cfg,
            dt,
        );

        for effect in effects {
            match effect {
                HazardEffect::SpawnDrone => {
                    let spawn_at = position + DRONE_SPAWN_OFFSET;
                    let drone = commands
                        .spawn((
                            Name::new("RescueDrone"),
                            RescueDrone {
                                racer: entity,
                                phase: DronePhase::Arriving,
                                leave_traveled_m: 0.0,
                            },
                            Sprite::from_color(
                                Color::srgb(0.95, 0.85, 0.25),
                                Vec2::new(2.4, 1.4),
                            ),
                            Transform::from_xyz(spawn_at.x, spawn_at.y, DRONE_Z),
                        ))
                        .id();
                    hazard.drone = Some(drone);
                    cue_events.write(SfxCueEvent::new(SfxCue::RescueDrone));
                }
                HazardEffect::Splash => {
                    splash_events.write(HazardSplashEvent {
                        racer: entity,
                        into_water: surface.is_water,
                    });
                }
                HazardEffect::StopVehicle => {
                    vehicle.set_stopped(true);
                    vehicle.set_flying(true);
                }
                HazardEffect::StripBonus => {
                    release_events.write(ReleaseHeldBonusEvent { racer: entity });
                }
                HazardEffect::ComputeDropPoint => {
                    let (drop_point, drop_heading) =
                        layout.nearest_valid_position(position, lap.lap_distance_m);
                    hazard.drop_point = drop_point;
                    hazard.drop_heading_rad = drop_heading;
                }
                HazardEffect::ReleaseVehicle => {
                    vehicle.set_stopped(false);
                    vehicle.set_flying(false);
                    vehicle.z = 0.0;
                }
                HazardEffect::DroneLeaves => {
                    if let Some(drone) = hazard.drone.take() {
                        if let Ok(mut drone) = drone_query.get_mut(drone) {
                            drone.phase = DronePhase::Leaving;
                        }
                    }
                }
            }
        }

        if phase_before != hazard.phase {
            debug!(
                "Racer {entity:?} hazard {:?} -> {:?}.",
                phase_before, hazard.phase
            );
        }

        // Continuous per-phase motion after the transition step.
        match hazard.phase {
            HazardPhase::Falling => {
                vehicle.z = (vehicle.z - cfg.sink_rate_mps * dt).max(SUBMERGE_LIMIT);
            }
            HazardPhase::Climbing => {
                vehicle.z = (vehicle.z + cfg.sink_rate_mps * dt).min(0.0);
            }
            HazardPhase::Lifting => {
                let lift_rate =
                    (CARRY_HEIGHT - SUBMERGE_LIMIT) / cfg.lift_duration_s.max(f32::EPSILON);
                vehicle.z = move_towards(vehicle.z, CARRY_HEIGHT, lift_rate * dt);
            }
            HazardPhase::Recovering => {
                vehicle.z = CARRY_HEIGHT;
                let current = transform.translation.truncate();
                let to_target = hazard.drop_point - current;
                let distance = to_target.length();
                if distance > f32::EPSILON {
                    let step = (cfg.recover_speed_mps * dt).min(distance);
                    let next = current + to_target / distance * step;
                    transform.translation.x = next.x;
                    transform.translation.y = next.y;
                }
                let heading = transform.rotation.to_euler(EulerRot::XYZ).2;
                let angle_error = shortest_angle_delta_rad(hazard.drop_heading_rad, heading);
                let turn = angle_error.clamp(
                    -cfg.recover_turn_rate_rad_s * dt,
                    cfg.recover_turn_rate_rad_s * dt,
                );
                transform.rotation = Quat::from_rotation_z(heading + turn);
                velocity.linvel = Vec2::ZERO;
                velocity.angvel = 0.0;
            }
            HazardPhase::Dropping => {
                let elapsed = cfg.drop_duration_s - hazard.timer_s;
                vehicle.z = drop_height(elapsed, cfg.drop_duration_s);
            }
            HazardPhase::Normal => {
                // The drone reference only lives through the rescue phases.
                debug_assert!(hazard.drone.is_none());
            }
        }
    }
}

/// The rescue drone's own {Arriving, Recovering, Leaving} sequence. It
/// self-terminates once fully off the play area.
#[allow(clippy::type_complexity)]
fn update_rescue_drones(
    time: Res<Time>,
    mut commands: Commands,
    racer_query: Query<&Transform, (With<Racer>, Without<RescueDrone>)>,
    mut drone_query: Query<(Entity, &mut RescueDrone, &mut Transform), Without<Racer>>,
) {
    let dt = time.delta_secs();

    for (entity, mut drone, mut transform) in &mut drone_query {
        let racer_position = racer_query
            .get(drone.racer)
            .map(|racer_transform| racer_transform.translation.truncate())
            .ok();

        match drone.phase {
            DronePhase::Arriving => {
                let Some(target) = racer_position else {
                    drone.phase = DronePhase::Leaving;
                    continue;
                };
                let current = transform.translation.truncate();
                let to_target = target - current;
                let distance = to_target.length();
                if distance <= DRONE_ARRIVE_TOLERANCE_M {
                    drone.phase = DronePhase::Recovering;
                } else {
                    let step = (DRONE_SPEED_MPS * dt).min(distance);
                    let next = current + to_target / distance * step;
                    transform.translation.x = next.x;
                    transform.translation.y = next.y;
                }
            }
            DronePhase::Recovering => {
                if let Some(target) = racer_position {
                    transform.translation.x = target.x;
                    transform.translation.y = target.y;
                } else {
                    drone.phase = DronePhase::Leaving;
                }
            }
            DronePhase::Leaving => {
                let step = DRONE_SPEED_MPS * dt;
                transform.translation.x += step;
                transform.translation.y += step * 0.4;
                drone.leave_traveled_m += step;
                if drone.leave_traveled_m >= DRONE_LEAVE_DISTANCE_M {
                    commands.entity(entity).despawn();
                }
            }
        }
    }
}

/// Fades the chassis sprite with the vertical offset so sinking and being
/// carried read on screen without touching the physics transform.
fn apply_height_visuals(mut racer_query: Query<(&Vehicle, &mut Sprite), With<Racer>>) {
    for (vehicle, mut sprite) in &mut racer_query {
        let alpha = if vehicle.z < 0.0 {
            (1.0 + vehicle.z * 0.45).clamp(0.25, 1.0)
        } else {
            1.0
        };
        sprite.color = sprite.color.with_alpha(alpha);
    }
}

fn move_towards(current: f32, target: f32, max_delta: f32) -> f32 {
    if (target - current).abs() <= max_delta {
        target
    } else {
        current + (target - current).signum() * max_delta
    }
}

fn cleanup_rescue_drones(mut commands: Commands, drone_query: Query<Entity, With<RescueDrone>>) {
    for entity in &drone_query {
        commands.entity(entity).despawn();
    }
}

fn shortest_angle_delta_rad(target: f32, current: f32) -> f32 {
    (target - current + PI).rem_euclid(std::f32::consts::TAU) - PI
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::minimal_config;

    fn hazard_config() -> HazardConfig {
        minimal_config().game.hazard
    }

    #[test]
    fn entering_hole_material_starts_falling_and_summons_the_drone() {
        let cfg = hazard_config();
        let mut state = HazardState::default();

        let effects = advance_hazard(&mut state, true, false, false, &cfg, 0.1);

        assert_eq!(state.phase, HazardPhase::Falling);
        assert!(effects.contains(&HazardEffect::SpawnDrone));
        assert!(effects.contains(&HazardEffect::Splash));
    }

    #[test]
    fn leaving_the_hole_before_the_drone_arrives_climbs_back_out() {
        let cfg = hazard_config();
        let mut state = HazardState::default();

        advance_hazard(&mut state, true, false, false, &cfg, 0.4);
        assert_eq!(state.phase, HazardPhase::Falling);

        let effects = advance_hazard(&mut state, false, false, false, &cfg, 0.1);
        assert_eq!(state.phase, HazardPhase::Climbing);
        assert!(effects.contains(&HazardEffect::DroneLeaves));

        // The climb timer decays back to Normal.
        let mut guard = 0;
        while state.phase == HazardPhase::Climbing {
            advance_hazard(&mut state, false, false, false, &cfg, 0.1);
            guard += 1;
            assert!(guard < 100, "climbing must terminate");
        }
        assert_eq!(state.phase, HazardPhase::Normal);
    }

    #[test]
    fn re_entering_the_hole_while_climbing_falls_again() {
        let cfg = hazard_config();
        let mut state = HazardState::default();

        advance_hazard(&mut state, true, false, false, &cfg, 0.2);
        advance_hazard(&mut state, false, false, false, &cfg, 0.05);
        assert_eq!(state.phase, HazardPhase::Climbing);

        advance_hazard(&mut state, true, false, false, &cfg, 0.05);
        assert_eq!(state.phase, HazardPhase::Falling);
    }

    #[test]
    fn drone_arrival_forces_the_full_recovery_chain() {
        let cfg = hazard_config();
        let mut state = HazardState::default();

        advance_hazard(&mut state, true, false, false, &cfg, 0.1);
        let effects = advance_hazard(&mut state, true, true, false, &cfg, 0.1);
        assert_eq!(state.phase, HazardPhase::Lifting);
        assert!(effects.contains(&HazardEffect::StopVehicle));
        assert!(effects.contains(&HazardEffect::StripBonus));

        // Lift timer elapses into Recovering, which computes the drop point.
        let mut drop_computed = false;
        let mut guard = 0;
        while state.phase == HazardPhase::Lifting {
            let effects = advance_hazard(&mut state, true, true, false, &cfg, 0.1);
            drop_computed |= effects.contains(&HazardEffect::ComputeDropPoint);
            guard += 1;
            assert!(guard < 100, "lifting must terminate");
        }
        assert_eq!(state.phase, HazardPhase::Recovering);
        assert!(drop_computed);

        // Holds position until the drop point is reached.
        advance_hazard(&mut state, false, true, false, &cfg, 0.1);
        assert_eq!(state.phase, HazardPhase::Recovering);

        advance_hazard(&mut state, false, true, true, &cfg, 0.1);
        assert_eq!(state.phase, HazardPhase::Dropping);

        let mut released = false;
        let mut guard = 0;
        while state.phase == HazardPhase::Dropping {
            let effects = advance_hazard(&mut state, false, true, false, &cfg, 0.1);
            released |= effects.contains(&HazardEffect::ReleaseVehicle);
            guard += 1;
            assert!(guard < 100, "dropping must terminate");
        }
        assert_eq!(state.phase, HazardPhase::Normal);
        assert!(released);
    }

    #[test]
    fn falling_never_sticks_unless_still_over_the_hole() {
        let cfg = hazard_config();
        let mut state = HazardState::default();
        advance_hazard(&mut state, true, false, false, &cfg, 0.1);

        // With the drone ready the machine always leaves Falling.
        advance_hazard(&mut state, true, true, false, &cfg, 0.1);
        assert_ne!(state.phase, HazardPhase::Falling);
    }

    #[test]
    fn drop_height_starts_high_and_lands_at_zero() {
        assert!(drop_height(0.0, 0.8) > 0.0);
        assert!(drop_height(0.8, 0.8).abs() < 1e-4);
        // Monotone-ish envelope: late in the drop the height is low.
        assert!(drop_height(0.75, 0.8) < drop_height(0.05, 0.8));
    }
}
