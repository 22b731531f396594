use crate::config::GameConfig;
use crate::gameplay::bonus::{BonusOwnerHitEvent, PendingBonus};
use crate::gameplay::hazard::HazardState;
use crate::gameplay::pilots::{AiPilot, PlayerPilot};
use crate::gameplay::race::{RacePhase, RaceStep};
use crate::gameplay::vehicle::{self, Vehicle};
use crate::gameplay::wheel::Wheel;
use crate::states::GameState;
use crate::track::{TrackLayout, GROUP_PICKUP, GROUP_RACER};
use bevy::prelude::*;
use bevy_rapier2d::prelude::*;

const PICKUP_SPOT_RADIUS_M: f32 = 1.1;
const PICKUP_SPOT_RESPAWN_S: f32 = 5.0;
const PICKUP_SPOT_Z: f32 = 5.0;

const RACER_COLORS: [Color; 8] = [
    Color::srgb(0.93, 0.34, 0.24),
    Color::srgb(0.26, 0.62, 0.93),
    Color::srgb(0.33, 0.82, 0.41),
    Color::srgb(0.95, 0.79, 0.22),
    Color::srgb(0.78, 0.42, 0.90),
    Color::srgb(0.95, 0.55, 0.75),
    Color::srgb(0.45, 0.85, 0.83),
    Color::srgb(0.88, 0.88, 0.90),
];

pub struct RacerGameplayPlugin;

impl Plugin for RacerGameplayPlugin {
    fn build(&self, app: &mut App) {
        app.add_message::<SpinRacerEvent>()
            .add_message::<RacerFinishedEvent>()
            .add_message::<RacerBumpedEvent>()
            .add_systems(
                OnEnter(GameState::InRace),
                spawn_race_field
                    .run_if(resource_exists::<GameConfig>)
                    .run_if(resource_exists::<TrackLayout>),
            )
            .add_systems(OnEnter(GameState::Results), cleanup_race_field)
            .add_systems(
                FixedUpdate,
                track_lap_positions
                    .in_set(RaceStep::LapTracking)
                    .run_if(in_state(GameState::InRace))
                    .run_if(resource_exists::<RacePhase>)
                    .run_if(resource_exists::<TrackLayout>),
            )
            .add_systems(
                FixedUpdate,
                (start_spins, update_spins)
                    .chain()
                    .in_set(RaceStep::Spin)
                    .run_if(in_state(GameState::InRace))
                    .run_if(resource_exists::<GameConfig>),
            )
            .add_systems(
                FixedUpdate,
                (collect_pickup_spots, respawn_pickup_spots)
                    .chain()
                    .in_set(RaceStep::Pickups)
                    .run_if(in_state(GameState::InRace)),
            )
            .add_systems(
                FixedUpdate,
                racer_bump_pass
                    .in_set(RaceStep::Contacts)
                    .run_if(in_state(GameState::InRace))
                    .run_if(resource_exists::<GameConfig>),
            );
    }
}

#[derive(Component, Debug, Clone)]
pub struct Racer {
    pub name: String,
    pub index: usize,
    /// `Some(slot)` for human racers, `None` for AI.
    pub player_slot: Option<usize>,
}

#[derive(Component, Debug, Clone, Copy, Default)]
pub struct RaceRank {
    pub rank: usize,
    pub finish_order: Option<usize>,
}

#[derive(Component, Debug, Clone)]
pub struct LapTracking {
    pub lap_count: u32,
    pub lap_distance_m: f32,
    pub section: usize,
    pub current_lap_s: f32,
    pub best_lap_s: Option<f32>,
    pub total_s: f32,
    pub finished: bool,
}

impl LapTracking {
    fn at_start(lap_distance_m: f32, section: usize) -> Self {
        Self {
            lap_count: 0,
            lap_distance_m,
            section,
            current_lap_s: 0.0,
            best_lap_s: None,
            total_s: 0.0,
            finished: false,
        }
    }
}

#[derive(Component, Debug, Clone, Copy, Default)]
pub struct SpinState {
    pub spinning: bool,
    pub remaining_s: f32,
}

/// A bonus pickup pad on the track. Inactive while on respawn cooldown.
#[derive(Component, Debug, Clone, Copy)]
pub struct PickupSpot {
    pub active: bool,
    pub respawn_remaining_s: f32,
}

#[derive(Message, Debug, Clone, Copy)]
pub struct SpinRacerEvent {
    pub racer: Entity,
}

#[derive(Message, Debug, Clone, Copy)]
pub struct RacerFinishedEvent {
    pub racer: Entity,
    pub best_lap_s: Option<f32>,
    pub total_s: f32,
}

#[derive(Message, Debug, Clone, Copy)]
pub struct RacerBumpedEvent {
    pub first: Entity,
    pub second: Entity,
    pub closing_speed_mps: f32,
}

fn spawn_race_field(
    mut commands: Commands,
    config: Res<GameConfig>,
    layout: Res<TrackLayout>,
    existing: Query<Entity, With<Racer>>,
) {
    if !existing.is_empty() {
        return;
    }

    let cfg = config.default_vehicle();
    let racer_count = config.game.app.racer_count as usize;
    let player_slots = config.game.app.player_slots as usize;

    for index in 0..racer_count {
        let (position, heading) = layout.start_grid_slot(index);
        let player_slot = (index < player_slots).then_some(index);
        let name = match player_slot {
            Some(slot) => format!("Player {}", slot + 1),
            None => format!("CPU {}", index + 1 - player_slots),
        };
        let start_lap = layout
            .lap_position_at(position)
            .map(|lap_position| {
                LapTracking::at_start(lap_position.distance_m, lap_position.section)
            })
            .unwrap_or_else(|| LapTracking::at_start(0.0, 0));

        let racer_entity = commands
            .spawn((
                Name::new(format!("Racer/{name}")),
                Racer {
                    name,
                    index,
                    player_slot,
                },
                RaceRank::default(),
                start_lap,
                SpinState::default(),
                HazardState::default(),
            ))
            .id();

        match player_slot {
            Some(slot) => {
                commands.entity(racer_entity).insert(PlayerPilot::new(slot));
            }
            None => {
                commands.entity(racer_entity).insert(AiPilot::default());
            }
        }

        vehicle::spawn_vehicle(
            &mut commands,
            racer_entity,
            cfg,
            position,
            heading,
            RACER_COLORS[index % RACER_COLORS.len()],
        );
    }

    for (index, spot) in layout.pickup_spots().iter().enumerate() {
        commands.spawn((
            Name::new(format!("PickupSpot/{index}")),
            PickupSpot {
                active: true,
                respawn_remaining_s: 0.0,
            },
            RigidBody::Fixed,
            Collider::ball(PICKUP_SPOT_RADIUS_M),
            Sensor,
            ActiveEvents::COLLISION_EVENTS,
            CollisionGroups::new(GROUP_PICKUP, GROUP_RACER),
            Sprite::from_color(
                Color::srgba(0.25, 0.9, 0.95, 0.85),
                Vec2::splat(PICKUP_SPOT_RADIUS_M * 2.0),
            ),
            Transform::from_xyz(spot.x, spot.y, PICKUP_SPOT_Z),
        ));
    }

    info!(
        "Spawned {racer_count} racers ({player_slots} human) and {} pickup spots.",
        layout.pickup_spots().len()
    );
}

#[allow(clippy::type_complexity)]
fn cleanup_race_field(
    mut commands: Commands,
    entities: Query<Entity, Or<(With<Racer>, With<Wheel>, With<PickupSpot>)>>,
) {
    for entity in &entities {
        commands.entity(entity).try_despawn();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Crossing {
    None,
    Forward,
    Backward,
}

/// Classifies a lap-distance jump as a start/finish-line crossing. A forward
/// crossing shows up as a large negative delta (distance wraps to ~0).
fn detect_crossing(previous_m: f32, current_m: f32, lap_length_m: f32) -> Crossing {
    let delta = current_m - previous_m;
    let half = lap_length_m * 0.5;
    if delta < -half {
        Crossing::Forward
    } else if delta > half {
        Crossing::Backward
    } else {
        Crossing::None
    }
}

/// Applies a crossing to the lap counter. The counter never goes negative and
/// never exceeds `total_laps + 1`; reaching `total_laps + 1` finishes the race.
fn advance_lap_count(lap_count: u32, total_laps: u32, crossing: Crossing) -> (u32, bool) {
    match crossing {
        Crossing::Forward => {
            let next = (lap_count + 1).min(total_laps + 1);
            (next, next == total_laps + 1)
        }
        Crossing::Backward => (lap_count.saturating_sub(1), false),
        Crossing::None => (lap_count, false),
    }
}

fn track_lap_positions(
    time: Res<Time>,
    layout: Res<TrackLayout>,
    phase: Res<RacePhase>,
    mut racer_query: Query<(Entity, &Transform, &mut LapTracking), With<Racer>>,
    mut finished_events: MessageWriter<RacerFinishedEvent>,
) {
    let dt = time.delta_secs();
    let running = phase.is_running();

    for (entity, transform, mut lap) in &mut racer_query {
        if running && !lap.finished {
            lap.total_s += dt;
            lap.current_lap_s += dt;
        }

        let position = transform.translation.truncate();
        let Some(lap_position) = layout.lap_position_at(position) else {
            // Content gap: keep the last known lap position and skip the frame.
            debug!("No lap position under racer {entity:?} at {position:?}.");
            continue;
        };

        if running && !lap.finished {
            let crossing = detect_crossing(
                lap.lap_distance_m,
                lap_position.distance_m,
                layout.lap_length_m,
            );
            let (next_count, finished_now) =
                advance_lap_count(lap.lap_count, layout.total_laps, crossing);

            if crossing == Crossing::Forward && next_count > lap.lap_count {
                if lap.lap_count >= 1 {
                    let completed = lap.current_lap_s;
                    lap.best_lap_s = Some(
                        lap.best_lap_s
                            .map(|best| best.min(completed))
                            .unwrap_or(completed),
                    );
                }
                lap.current_lap_s = 0.0;
            }
            lap.lap_count = next_count;

            if finished_now && !lap.finished {
                lap.finished = true;
                finished_events.write(RacerFinishedEvent {
                    racer: entity,
                    best_lap_s: lap.best_lap_s,
                    total_s: lap.total_s,
                });
                info!("Racer {entity:?} finished in {:.2}s.", lap.total_s);
            }
        }

        lap.lap_distance_m = lap_position.distance_m;
        lap.section = lap_position.section;
    }
}

/// `spin()` entry point: idempotent while already spinning, strips the bonus.
fn start_spins(
    config: Res<GameConfig>,
    mut spin_events: MessageReader<SpinRacerEvent>,
    mut racer_query: Query<(&mut SpinState, &Vehicle), With<Racer>>,
    mut owner_hit_events: MessageWriter<BonusOwnerHitEvent>,
) {
    for event in spin_events.read() {
        let Ok((mut spin, vehicle)) = racer_query.get_mut(event.racer) else {
            continue;
        };
        if spin.spinning {
            continue;
        }
        let Some(cfg) = config.vehicles_by_id.get(&vehicle.config_id) else {
            continue;
        };
        spin.spinning = true;
        spin.remaining_s = cfg.spin_duration_s;
        owner_hit_events.write(BonusOwnerHitEvent { racer: event.racer });
    }
}

fn update_spins(
    time: Res<Time>,
    config: Res<GameConfig>,
    mut racer_query: Query<(&mut SpinState, &mut Velocity, &Vehicle), With<Racer>>,
) {
    let dt = time.delta_secs();
    for (mut spin, mut velocity, vehicle) in &mut racer_query {
        if !spin.spinning {
            continue;
        }
        let Some(cfg) = config.vehicles_by_id.get(&vehicle.config_id) else {
            continue;
        };
        velocity.angvel = cfg.spin_rate_rad_s;
        spin.remaining_s -= dt;
        if spin.remaining_s <= 0.0 {
            spin.spinning = false;
            velocity.angvel = 0.0;
        }
    }
}

/// Sensor overlap only flags the pickup; the bonus draw happens on the next
/// pipeline tick, outside collision dispatch.
fn collect_pickup_spots(
    mut commands: Commands,
    mut collision_events: MessageReader<CollisionEvent>,
    mut spot_query: Query<(&mut PickupSpot, &mut Visibility)>,
    racer_query: Query<(), With<Racer>>,
) {
    for event in collision_events.read() {
        let CollisionEvent::Started(first, second, _) = event else {
            continue;
        };

        let (spot_entity, racer_entity) = if spot_query.contains(*first) {
            (*first, *second)
        } else if spot_query.contains(*second) {
            (*second, *first)
        } else {
            continue;
        };
        if racer_query.get(racer_entity).is_err() {
            continue;
        }

        let Ok((mut spot, mut visibility)) = spot_query.get_mut(spot_entity) else {
            continue;
        };
        if !spot.active {
            continue;
        }

        spot.active = false;
        spot.respawn_remaining_s = PICKUP_SPOT_RESPAWN_S;
        *visibility = Visibility::Hidden;
        commands.entity(racer_entity).insert(PendingBonus);
    }
}

fn respawn_pickup_spots(time: Res<Time>, mut spot_query: Query<(&mut PickupSpot, &mut Visibility)>) {
    let dt = time.delta_secs();
    for (mut spot, mut visibility) in &mut spot_query {
        if spot.active {
            continue;
        }
        spot.respawn_remaining_s -= dt;
        if spot.respawn_remaining_s <= 0.0 {
            spot.active = true;
            *visibility = Visibility::Inherited;
        }
    }
}

/// Equal-and-opposite bump impulses along the line between body centers.
fn bump_impulse_magnitude(closing_speed: f32, scale: f32, mass: f32) -> f32 {
    closing_speed * scale * mass
}

/// Racer-vs-racer contacts never reach the solver (collision groups filter
/// them out); this simplified pass keeps multiplayer collisions forgiving.
#[allow(clippy::type_complexity)]
fn racer_bump_pass(
    config: Res<GameConfig>,
    mut racer_query: Query<
        (
            Entity,
            &Transform,
            &Velocity,
            &mut ExternalImpulse,
            Option<&ReadMassProperties>,
        ),
        With<Racer>,
    >,
    mut bump_events: MessageWriter<RacerBumpedEvent>,
) {
    let collisions = &config.game.collisions;
    let snapshot: Vec<(Entity, Vec2, Vec2, f32)> = racer_query
        .iter()
        .map(|(entity, transform, velocity, _, mass_properties)| {
            (
                entity,
                transform.translation.truncate(),
                velocity.linvel,
                mass_properties
                    .map(|properties| properties.mass)
                    .unwrap_or(1.0)
                    .max(0.1),
            )
        })
        .collect();

    for i in 0..snapshot.len() {
        for j in (i + 1)..snapshot.len() {
            let (first, first_pos, first_vel, first_mass) = snapshot[i];
            let (second, second_pos, second_vel, second_mass) = snapshot[j];

            let delta = second_pos - first_pos;
            let distance = delta.length();
            if distance <= f32::EPSILON || distance > collisions.bump_radius_m {
                continue;
            }

            let direction = delta / distance;
            let closing_speed = (first_vel - second_vel).dot(direction);
            if closing_speed < collisions.bump_min_closing_speed_mps {
                continue;
            }

            let mass = (first_mass + second_mass) * 0.5;
            let magnitude =
                bump_impulse_magnitude(closing_speed, collisions.bump_impulse_scale, mass);

            if let Ok((_, _, _, mut impulse, _)) = racer_query.get_mut(first) {
                impulse.impulse += -direction * magnitude;
            }
            if let Ok((_, _, _, mut impulse, _)) = racer_query.get_mut(second) {
                impulse.impulse += direction * magnitude;
            }
            bump_events.write(RacerBumpedEvent {
                first,
                second,
                closing_speed_mps: closing_speed,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_crossing_wraps_distance_to_zero() {
        assert_eq!(detect_crossing(138.0, 2.0, 140.0), Crossing::Forward);
    }

    #[test]
    fn backward_crossing_wraps_distance_to_end() {
        assert_eq!(detect_crossing(2.0, 138.0, 140.0), Crossing::Backward);
    }

    #[test]
    fn small_moves_are_not_crossings() {
        assert_eq!(detect_crossing(60.0, 63.0, 140.0), Crossing::None);
        assert_eq!(detect_crossing(63.0, 60.0, 140.0), Crossing::None);
    }

    #[test]
    fn lap_count_never_goes_negative() {
        let (count, finished) = advance_lap_count(0, 3, Crossing::Backward);
        assert_eq!(count, 0);
        assert!(!finished);
    }

    #[test]
    fn lap_count_finishes_at_total_plus_one() {
        let (count, finished) = advance_lap_count(3, 3, Crossing::Forward);
        assert_eq!(count, 4);
        assert!(finished);
    }

    #[test]
    fn lap_count_never_exceeds_total_plus_one() {
        let (count, finished) = advance_lap_count(4, 3, Crossing::Forward);
        assert_eq!(count, 4);
        assert!(finished);
    }

    #[test]
    fn lap_count_is_monotonic_over_forward_crossings() {
        let mut lap_count = 0;
        for _ in 0..10 {
            let (next, _) = advance_lap_count(lap_count, 3, Crossing::Forward);
            assert!(next >= lap_count);
            lap_count = next;
        }
        assert_eq!(lap_count, 4);
    }

    #[test]
    fn bump_impulses_are_equal_and_opposite() {
        // The pass applies -direction * magnitude to one racer and
        // +direction * magnitude to the other; magnitudes must match.
        let magnitude = bump_impulse_magnitude(4.0, 0.6, 2.0);
        assert!((magnitude - 4.8).abs() < 1e-6);

        let direction = Vec2::new(1.0, 0.0);
        let first = -direction * magnitude;
        let second = direction * magnitude;
        assert!((first + second).length() < 1e-6);
    }

    #[test]
    fn bump_below_threshold_applies_nothing() {
        // Guard mirrored from `racer_bump_pass`.
        let closing_speed = 0.5_f32;
        let threshold = 1.5_f32;
        assert!(closing_speed < threshold);
    }
}
