use crate::config::{BonusPoolConfig, GameConfig};
use crate::gameplay::race::{normalized_rank, RaceStep, RaceStandings};
use crate::gameplay::racer::{Racer, SpinRacerEvent};
use crate::gameplay::vehicle::Vehicle;
use crate::states::GameState;
use crate::track::{TrackLayout, GROUP_PROJECTILE, GROUP_RACER, GROUP_TRACK};
use bevy::prelude::*;
use bevy_rapier2d::prelude::*;
use std::time::{SystemTime, UNIX_EPOCH};

const BULLET_RADIUS_M: f32 = 0.14;
const MINE_HALF_EXTENT_M: f32 = 0.42;
const MISSILE_HALF_EXTENTS: Vec2 = Vec2::new(0.5, 0.16);
const PROJECTILE_Z: f32 = 11.0;
const MINE_ARMED_LIFETIME_S: f32 = 30.0;
const MUZZLE_OFFSET_M: f32 = 1.9;
/// Parked pool entities sit far outside the play area.
const POOL_PARK_POSITION: Vec2 = Vec2::new(10_000.0, 10_000.0);

pub struct BonusGameplayPlugin;

impl Plugin for BonusGameplayPlugin {
    fn build(&self, app: &mut App) {
        app.add_message::<TriggerHeldBonusEvent>()
            .add_message::<BonusOwnerHitEvent>()
            .add_message::<ReleaseHeldBonusEvent>()
            .add_message::<BonusPickedEvent>()
            .add_message::<BonusFiredEvent>()
            .add_systems(
                OnEnter(GameState::InRace),
                setup_bonus_pools
                    .run_if(resource_exists::<GameConfig>)
                    .run_if(not(resource_exists::<BonusPools>)),
            )
            .add_systems(OnEnter(GameState::Results), cleanup_bonus_entities)
            .add_systems(
                FixedUpdate,
                (
                    grant_pending_bonuses,
                    handle_release_events,
                    handle_owner_hit_events,
                    handle_trigger_events,
                    act_held_bonuses,
                    advance_projectiles,
                    resolve_projectile_hits,
                )
                    .chain()
                    .in_set(RaceStep::Bonus)
                    .run_if(in_state(GameState::InRace))
                    .run_if(resource_exists::<BonusPools>)
                    .run_if(resource_exists::<TrackLayout>),
            );
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BonusKind {
    Gun,
    Mines,
    Turbo,
    Missile,
}

impl BonusKind {
    fn from_config(kind: &str) -> Self {
        match kind {
            "gun" => Self::Gun,
            "mines" => Self::Mines,
            "missile" => Self::Missile,
            _ => Self::Turbo,
        }
    }
}

#[derive(Debug)]
pub enum BonusRuntime {
    Idle,
    GunFiring { shots_left: u32, next_shot_s: f32 },
    MineArmed { mine: Entity },
    TurboRunning,
}

/// The bonus currently carried by a racer; at most one at a time.
#[derive(Component, Debug)]
pub struct HeldBonus {
    pub kind: BonusKind,
    pub runtime: BonusRuntime,
}

/// Deferred pickup flag: set from collision dispatch, consumed by the next
/// pipeline tick. No bodies or joints are created inside the callback.
#[derive(Component, Debug, Clone, Copy)]
pub struct PendingBonus;

#[derive(Message, Debug, Clone, Copy)]
pub struct TriggerHeldBonusEvent {
    pub racer: Entity,
}

/// The owner took a hit: the bonus is force-released or force-triggered so a
/// hit racer never keeps an un-drawable bonus.
#[derive(Message, Debug, Clone, Copy)]
pub struct BonusOwnerHitEvent {
    pub racer: Entity,
}

/// Plain strip with no kind side-effects (hazard lifting).
#[derive(Message, Debug, Clone, Copy)]
pub struct ReleaseHeldBonusEvent {
    pub racer: Entity,
}

#[derive(Message, Debug, Clone, Copy)]
pub struct BonusPickedEvent {
    pub racer: Entity,
    pub kind: BonusKind,
}

#[derive(Message, Debug, Clone, Copy)]
pub struct BonusFiredEvent {
    pub racer: Entity,
    pub kind: BonusKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectileKind {
    Bullet,
    Mine,
    Missile,
}

#[derive(Component, Debug)]
pub struct Projectile {
    pub kind: ProjectileKind,
    pub shooter: Entity,
    pub remaining_s: f32,
    pub target: Option<Entity>,
    pub armed: bool,
}

/// Fixed-capacity reuse pool for one projectile kind. Entities are created
/// lazily on first use and parked (disabled) between uses.
#[derive(Debug, Default)]
struct EntityPool {
    free: Vec<Entity>,
    live: usize,
    capacity: usize,
}

impl EntityPool {
    fn new(capacity: usize) -> Self {
        Self {
            free: Vec::with_capacity(capacity),
            live: 0,
            capacity,
        }
    }

    /// A parked entity to reuse, or `None` when the caller may lazily create
    /// one (`can_grow`) or must skip the shot entirely.
    fn acquire(&mut self) -> Option<Entity> {
        self.free.pop()
    }

    fn can_grow(&self) -> bool {
        self.live < self.capacity
    }

    fn note_created(&mut self) {
        self.live += 1;
    }

    fn release(&mut self, entity: Entity) {
        self.free.push(entity);
    }
}

/// Rank-weighted bonus pools plus the projectile reuse pools.
#[derive(Resource)]
pub struct BonusPools {
    pools: Vec<BonusPoolConfig>,
    rng_seed: u64,
    bullets: EntityPool,
    mines: EntityPool,
    missiles: EntityPool,
}

impl BonusPools {
    fn from_config(config: &GameConfig) -> Self {
        let pools = config.bonuses.pools.clone();
        let capacity_of = |kind: &str| {
            pools
                .iter()
                .find(|pool| pool.kind == kind)
                .map(|pool| pool.pool_capacity as usize)
                .unwrap_or(0)
        };
        Self {
            bullets: EntityPool::new(capacity_of("gun") * 8),
            mines: EntityPool::new(capacity_of("mines")),
            missiles: EntityPool::new(capacity_of("missile")),
            pools,
            rng_seed: 0x51C0_97D3_22EB_A1F7 ^ unix_timestamp_seconds(),
        }
    }

    pub fn pool(&self, kind: BonusKind) -> Option<&BonusPoolConfig> {
        self.pools
            .iter()
            .find(|pool| BonusKind::from_config(&pool.kind) == kind)
    }

    /// Rank-weighted cumulative draw over all registered pools. Degenerate
    /// weight tables fall back deterministically to the last pool.
    pub fn select(&mut self, rank_normalized: f32) -> Option<BonusKind> {
        if self.pools.is_empty() {
            return None;
        }

        let weights: Vec<f32> = self
            .pools
            .iter()
            .map(|pool| array_lerp(&pool.weights, rank_normalized))
            .collect();
        let total: f32 = weights.iter().sum();

        let index = if total <= 0.0 {
            weights.len() - 1
        } else {
            let draw = next_unit_random(&mut self.rng_seed) * total;
            select_pool_index(&weights, draw)
        };
        Some(BonusKind::from_config(&self.pools[index].kind))
    }
}

/// Monotonic piecewise-linear lookup over a fixed curve. Continuous in `t`,
/// bounded by the curve's entries, exact at t = 0 and t = 1.
pub fn array_lerp(values: &[f32], t: f32) -> f32 {
    match values.len() {
        0 => 0.0,
        1 => values[0],
        len => {
            let t = t.clamp(0.0, 1.0);
            let scaled = t * (len - 1) as f32;
            let index = (scaled.floor() as usize).min(len - 2);
            let fraction = scaled - index as f32;
            values[index] + (values[index + 1] - values[index]) * fraction
        }
    }
}

/// Cumulative-subtraction draw: subtract each weight until the remainder goes
/// negative; the last pool is the deterministic fallback.
pub fn select_pool_index(weights: &[f32], draw: f32) -> usize {
    let mut remainder = draw;
    for (index, weight) in weights.iter().enumerate() {
        remainder -= weight;
        if remainder < 0.0 {
            return index;
        }
    }
    weights.len().saturating_sub(1)
}

fn setup_bonus_pools(mut commands: Commands, config: Res<GameConfig>) {
    commands.insert_resource(BonusPools::from_config(&config));
}

fn cleanup_bonus_entities(
    mut commands: Commands,
    projectile_query: Query<Entity, With<Projectile>>,
) {
    for entity in &projectile_query {
        commands.entity(entity).try_despawn();
    }
    commands.remove_resource::<BonusPools>();
}

fn projectile_collision_groups() -> CollisionGroups {
    CollisionGroups::new(GROUP_PROJECTILE, GROUP_RACER | GROUP_TRACK)
}

/// Consumes the deferred pickup flags: racers holding nothing draw from the
/// pools; racers already carrying a bonus just lose the flag.
#[allow(clippy::type_complexity)]
fn grant_pending_bonuses(
    mut commands: Commands,
    mut pools: ResMut<BonusPools>,
    standings: Res<RaceStandings>,
    racer_query: Query<
        (Entity, &Transform, Option<&HeldBonus>),
        (With<Racer>, With<PendingBonus>),
    >,
    racer_count_query: Query<(), With<Racer>>,
    mut picked_events: MessageWriter<BonusPickedEvent>,
) {
    let racer_count = racer_count_query.iter().count();

    for (entity, transform, held) in &racer_query {
        commands.entity(entity).remove::<PendingBonus>();
        if held.is_some() {
            continue;
        }

        let rank = standings
            .ordered
            .iter()
            .position(|candidate| *candidate == entity)
            .unwrap_or(racer_count.saturating_sub(1));
        let Some(kind) = pools.select(normalized_rank(rank, racer_count)) else {
            continue;
        };

        let runtime = match kind {
            BonusKind::Mines => {
                let Some(pool_cfg) = pools.pool(BonusKind::Mines).cloned() else {
                    continue;
                };
                let Some(mine) = acquire_mine(
                    &mut commands,
                    &mut pools,
                    entity,
                    transform,
                    pool_cfg.mine_trail_offset_m,
                ) else {
                    continue;
                };
                BonusRuntime::MineArmed { mine }
            }
            _ => BonusRuntime::Idle,
        };

        commands.entity(entity).insert(HeldBonus { kind, runtime });
        picked_events.write(BonusPickedEvent {
            racer: entity,
            kind,
        });
    }
}

/// Welds a pooled mine behind the owning vehicle.
fn acquire_mine(
    commands: &mut Commands,
    pools: &mut BonusPools,
    owner: Entity,
    owner_transform: &Transform,
    trail_offset_m: f32,
) -> Option<Entity> {
    let heading = owner_transform.rotation.to_euler(EulerRot::XYZ).2;
    let rotation = Mat2::from_angle(heading);
    let position = owner_transform.translation.truncate() + rotation * Vec2::new(-trail_offset_m, 0.0);
    let joint = FixedJointBuilder::new()
        .local_anchor1(Vec2::new(-trail_offset_m, 0.0))
        .local_anchor2(Vec2::ZERO);

    if let Some(mine) = pools.mines.acquire() {
        commands
            .entity(mine)
            .remove::<(RigidBodyDisabled, ColliderDisabled)>()
            .insert((
                RigidBody::Dynamic,
                Projectile {
                    kind: ProjectileKind::Mine,
                    shooter: owner,
                    remaining_s: MINE_ARMED_LIFETIME_S,
                    target: None,
                    armed: false,
                },
                ImpulseJoint::new(owner, joint),
                Visibility::Inherited,
                Transform::from_xyz(position.x, position.y, PROJECTILE_Z)
                    .with_rotation(Quat::from_rotation_z(heading)),
                Velocity::default(),
            ));
        return Some(mine);
    }

    if !pools.mines.can_grow() {
        return None;
    }
    pools.mines.note_created();
    let mine = commands
        .spawn((
            Name::new("Mine"),
            Projectile {
                kind: ProjectileKind::Mine,
                shooter: owner,
                remaining_s: MINE_ARMED_LIFETIME_S,
                target: None,
                armed: false,
            },
            RigidBody::Dynamic,
            Collider::cuboid(MINE_HALF_EXTENT_M, MINE_HALF_EXTENT_M),
            ColliderMassProperties::Density(0.6),
            projectile_collision_groups(),
            ActiveEvents::COLLISION_EVENTS,
            Velocity::default(),
            ImpulseJoint::new(owner, joint),
            Sprite::from_color(
                Color::srgb(0.20, 0.22, 0.24),
                Vec2::splat(MINE_HALF_EXTENT_M * 2.0),
            ),
            Transform::from_xyz(position.x, position.y, PROJECTILE_Z)
                .with_rotation(Quat::from_rotation_z(heading)),
        ))
        .id();
    Some(mine)
}

/// Plain release (hazard strip): the bonus vanishes, an armed-but-undropped
/// mine goes back to its pool.
fn handle_release_events(
    mut commands: Commands,
    mut pools: ResMut<BonusPools>,
    mut release_events: MessageReader<ReleaseHeldBonusEvent>,
    racer_query: Query<&HeldBonus, With<Racer>>,
) {
    for event in release_events.read() {
        let Ok(held) = racer_query.get(event.racer) else {
            continue;
        };
        if let BonusRuntime::MineArmed { mine } = held.runtime {
            park_projectile(&mut commands, &mut pools, mine, ProjectileKind::Mine);
        }
        commands.entity(event.racer).remove::<HeldBonus>();
    }
}

/// A hit owner force-drops a trailed mine; every other kind is released.
fn handle_owner_hit_events(
    mut commands: Commands,
    mut pools: ResMut<BonusPools>,
    mut owner_hit_events: MessageReader<BonusOwnerHitEvent>,
    racer_query: Query<&HeldBonus, With<Racer>>,
    mut projectile_query: Query<&mut Projectile>,
    mut fired_events: MessageWriter<BonusFiredEvent>,
) {
    for event in owner_hit_events.read() {
        let Ok(held) = racer_query.get(event.racer) else {
            continue;
        };
        match (&held.kind, &held.runtime) {
            (BonusKind::Mines, BonusRuntime::MineArmed { mine }) => {
                drop_mine(&mut commands, &mut projectile_query, *mine);
                fired_events.write(BonusFiredEvent {
                    racer: event.racer,
                    kind: BonusKind::Mines,
                });
            }
            _ => {
                if let BonusRuntime::MineArmed { mine } = held.runtime {
                    park_projectile(&mut commands, &mut pools, mine, ProjectileKind::Mine);
                }
            }
        }
        commands.entity(event.racer).remove::<HeldBonus>();
    }
}

/// Converts a trailed mine into a static track hazard: joint destroyed, body
/// fixed in place.
fn drop_mine(
    commands: &mut Commands,
    projectile_query: &mut Query<&mut Projectile>,
    mine: Entity,
) {
    commands
        .entity(mine)
        .remove::<ImpulseJoint>()
        .insert(RigidBody::Fixed);
    if let Ok(mut projectile) = projectile_query.get_mut(mine) {
        projectile.armed = true;
        projectile.remaining_s = MINE_ARMED_LIFETIME_S;
    }
}

#[allow(clippy::type_complexity)]
fn handle_trigger_events(
    mut commands: Commands,
    mut pools: ResMut<BonusPools>,
    mut trigger_events: MessageReader<TriggerHeldBonusEvent>,
    mut racer_query: Query<
        (&mut HeldBonus, &Transform, &Velocity, &mut Vehicle),
        With<Racer>,
    >,
    other_racer_query: Query<(Entity, &Transform), With<Racer>>,
    mut projectile_query: Query<&mut Projectile>,
    mut fired_events: MessageWriter<BonusFiredEvent>,
) {
    for event in trigger_events.read() {
        let Ok((mut held, transform, velocity, mut vehicle)) = racer_query.get_mut(event.racer)
        else {
            continue;
        };

        match held.kind {
            BonusKind::Gun => {
                if matches!(held.runtime, BonusRuntime::GunFiring { .. }) {
                    continue;
                }
                let Some(pool_cfg) = pools.pool(BonusKind::Gun) else {
                    continue;
                };
                held.runtime = BonusRuntime::GunFiring {
                    shots_left: pool_cfg.burst_count,
                    next_shot_s: 0.0,
                };
            }
            BonusKind::Mines => {
                if let BonusRuntime::MineArmed { mine } = held.runtime {
                    drop_mine(&mut commands, &mut projectile_query, mine);
                    fired_events.write(BonusFiredEvent {
                        racer: event.racer,
                        kind: BonusKind::Mines,
                    });
                }
                commands.entity(event.racer).remove::<HeldBonus>();
            }
            BonusKind::Turbo => {
                if vehicle.trigger_turbo() {
                    held.runtime = BonusRuntime::TurboRunning;
                    fired_events.write(BonusFiredEvent {
                        racer: event.racer,
                        kind: BonusKind::Turbo,
                    });
                }
            }
            BonusKind::Missile => {
                let Some(pool_cfg) = pools.pool(BonusKind::Missile).cloned() else {
                    continue;
                };
                let target = nearest_forward_target(
                    event.racer,
                    transform,
                    &other_racer_query,
                    pool_cfg.lock_range_m,
                    pool_cfg.lock_cone_deg.to_radians() * 0.5,
                );
                launch_missile(
                    &mut commands,
                    &mut pools,
                    event.racer,
                    transform,
                    velocity,
                    &pool_cfg,
                    target,
                );
                fired_events.write(BonusFiredEvent {
                    racer: event.racer,
                    kind: BonusKind::Missile,
                });
                commands.entity(event.racer).remove::<HeldBonus>();
            }
        }
    }
}

/// Nearest non-owner racer inside the forward-facing lock cone.
fn nearest_forward_target(
    shooter: Entity,
    shooter_transform: &Transform,
    racer_query: &Query<(Entity, &Transform), With<Racer>>,
    range_m: f32,
    half_cone_rad: f32,
) -> Option<Entity> {
    let origin = shooter_transform.translation.truncate();
    let heading = shooter_transform.rotation.to_euler(EulerRot::XYZ).2;

    let mut best: Option<(Entity, f32)> = None;
    for (entity, transform) in racer_query.iter() {
        if entity == shooter {
            continue;
        }
        let to_other = transform.translation.truncate() - origin;
        let distance = to_other.length();
        if distance <= f32::EPSILON || distance > range_m {
            continue;
        }
        let bearing = to_other.y.atan2(to_other.x);
        if shortest_angle_delta_rad(bearing, heading).abs() > half_cone_rad {
            continue;
        }
        if best.map(|(_, best_distance)| distance < best_distance).unwrap_or(true) {
            best = Some((entity, distance));
        }
    }
    best.map(|(entity, _)| entity)
}

#[allow(clippy::too_many_arguments)]
fn launch_missile(
    commands: &mut Commands,
    pools: &mut BonusPools,
    shooter: Entity,
    shooter_transform: &Transform,
    shooter_velocity: &Velocity,
    pool_cfg: &BonusPoolConfig,
    target: Option<Entity>,
) {
    let heading = shooter_transform.rotation.to_euler(EulerRot::XYZ).2;
    let forward = Mat2::from_angle(heading) * Vec2::X;
    let position = shooter_transform.translation.truncate() + forward * MUZZLE_OFFSET_M;
    let velocity = forward * pool_cfg.projectile_speed + shooter_velocity.linvel;

    let projectile = Projectile {
        kind: ProjectileKind::Missile,
        shooter,
        remaining_s: pool_cfg.projectile_lifetime_s,
        target,
        armed: true,
    };

    if let Some(missile) = pools.missiles.acquire() {
        commands
            .entity(missile)
            .remove::<(RigidBodyDisabled, ColliderDisabled)>()
            .insert((
                projectile,
                Visibility::Inherited,
                Transform::from_xyz(position.x, position.y, PROJECTILE_Z)
                    .with_rotation(Quat::from_rotation_z(heading)),
                Velocity {
                    linvel: velocity,
                    angvel: 0.0,
                },
            ));
        return;
    }

    if !pools.missiles.can_grow() {
        return;
    }
    pools.missiles.note_created();
    commands.spawn((
        Name::new("Missile"),
        projectile,
        RigidBody::Dynamic,
        Collider::cuboid(MISSILE_HALF_EXTENTS.x, MISSILE_HALF_EXTENTS.y),
        ColliderMassProperties::Density(0.4),
        projectile_collision_groups(),
        ActiveEvents::COLLISION_EVENTS,
        Velocity {
            linvel: velocity,
            angvel: 0.0,
        },
        Sprite::from_color(
            Color::srgb(0.95, 0.58, 0.20),
            MISSILE_HALF_EXTENTS * 2.0,
        ),
        Transform::from_xyz(position.x, position.y, PROJECTILE_Z)
            .with_rotation(Quat::from_rotation_z(heading)),
    ));
}

fn spawn_bullet(
    commands: &mut Commands,
    pools: &mut BonusPools,
    shooter: Entity,
    shooter_transform: &Transform,
    pool_cfg: &BonusPoolConfig,
    spread_rad: f32,
) {
    let heading = shooter_transform.rotation.to_euler(EulerRot::XYZ).2 + spread_rad;
    let direction = Mat2::from_angle(heading) * Vec2::X;
    let position = shooter_transform.translation.truncate() + direction * MUZZLE_OFFSET_M;
    let velocity = direction * pool_cfg.projectile_speed;

    let projectile = Projectile {
        kind: ProjectileKind::Bullet,
        shooter,
        remaining_s: pool_cfg.projectile_lifetime_s,
        target: None,
        armed: true,
    };

    if let Some(bullet) = pools.bullets.acquire() {
        commands
            .entity(bullet)
            .remove::<(RigidBodyDisabled, ColliderDisabled)>()
            .insert((
                projectile,
                Visibility::Inherited,
                Transform::from_xyz(position.x, position.y, PROJECTILE_Z)
                    .with_rotation(Quat::from_rotation_z(heading)),
                Velocity {
                    linvel: velocity,
                    angvel: 0.0,
                },
            ));
        return;
    }

    if !pools.bullets.can_grow() {
        return;
    }
    pools.bullets.note_created();
    commands.spawn((
        Name::new("Bullet"),
        projectile,
        RigidBody::Dynamic,
        Collider::ball(BULLET_RADIUS_M),
        ColliderMassProperties::Density(0.3),
        projectile_collision_groups(),
        ActiveEvents::COLLISION_EVENTS,
        Velocity {
            linvel: velocity,
            angvel: 0.0,
        },
        Sprite::from_color(
            Color::srgb(0.96, 0.92, 0.70),
            Vec2::splat(BULLET_RADIUS_M * 2.0),
        ),
        Transform::from_xyz(position.x, position.y, PROJECTILE_Z)
            .with_rotation(Quat::from_rotation_z(heading)),
    ));
}

/// Per-step behavior of a held bonus: the gun walks through its burst, turbo
/// auto-releases when the vehicle boost ends.
fn act_held_bonuses(
    time: Res<Time>,
    mut commands: Commands,
    mut pools: ResMut<BonusPools>,
    mut racer_query: Query<(Entity, &mut HeldBonus, &Transform, &Vehicle), With<Racer>>,
    mut fired_events: MessageWriter<BonusFiredEvent>,
) {
    let dt = time.delta_secs();

    for (entity, mut held, transform, vehicle) in &mut racer_query {
        match &mut held.runtime {
            BonusRuntime::GunFiring {
                shots_left,
                next_shot_s,
            } => {
                let Some(pool_cfg) = pools.pool(BonusKind::Gun).cloned() else {
                    commands.entity(entity).remove::<HeldBonus>();
                    continue;
                };
                *next_shot_s -= dt;
                while *shots_left > 0 && *next_shot_s <= 0.0 {
                    *shots_left -= 1;
                    *next_shot_s += pool_cfg.burst_interval_s.max(1.0 / 240.0);
                    let spread_half = pool_cfg.spread_degrees.to_radians() * 0.5;
                    let spread = next_signed_unit_random(&mut pools.rng_seed) * spread_half;
                    spawn_bullet(&mut commands, &mut pools, entity, transform, &pool_cfg, spread);
                    fired_events.write(BonusFiredEvent {
                        racer: entity,
                        kind: BonusKind::Gun,
                    });
                }
                if *shots_left == 0 && *next_shot_s <= 0.0 {
                    commands.entity(entity).remove::<HeldBonus>();
                }
            }
            BonusRuntime::TurboRunning => {
                if !vehicle.turbo_active() {
                    commands.entity(entity).remove::<HeldBonus>();
                }
            }
            BonusRuntime::Idle | BonusRuntime::MineArmed { .. } => {}
        }
    }
}

/// Lifetime decay plus missile homing. Expired projectiles return to their
/// pools.
#[allow(clippy::type_complexity)]
fn advance_projectiles(
    time: Res<Time>,
    mut commands: Commands,
    mut pools: ResMut<BonusPools>,
    config: Res<GameConfig>,
    racer_query: Query<&Transform, (With<Racer>, Without<Projectile>)>,
    mut projectile_query: Query<
        (Entity, &mut Projectile, &mut Transform, &mut Velocity),
        Without<Racer>,
    >,
) {
    let dt = time.delta_secs();
    let homing_turn_rate = config
        .bonuses
        .pools
        .iter()
        .find(|pool| pool.kind == "missile")
        .map(|pool| pool.homing_turn_rate_deg_s.to_radians())
        .unwrap_or(0.0);

    for (entity, mut projectile, mut transform, mut velocity) in &mut projectile_query {
        projectile.remaining_s -= dt;
        if projectile.remaining_s <= 0.0 {
            let kind = projectile.kind;
            park_projectile(&mut commands, &mut pools, entity, kind);
            continue;
        }

        if projectile.kind == ProjectileKind::Missile && homing_turn_rate > 0.0 {
            if let Some(target) = projectile.target {
                if let Ok(target_transform) = racer_query.get(target) {
                    let to_target = target_transform.translation.truncate()
                        - transform.translation.truncate();
                    let desired = to_target.normalize_or_zero();
                    if desired.length_squared() > f32::EPSILON {
                        let speed = velocity.linvel.length().max(0.001);
                        let current = velocity.linvel.normalize_or_zero();
                        let current_angle = current.y.atan2(current.x);
                        let desired_angle = desired.y.atan2(desired.x);
                        let max_step = homing_turn_rate * dt;
                        let clamped = shortest_angle_delta_rad(desired_angle, current_angle)
                            .clamp(-max_step, max_step);
                        let next = Vec2::from_angle(current_angle + clamped);
                        velocity.linvel = next * speed;
                        transform.rotation = Quat::from_rotation_z(current_angle + clamped);
                    }
                } else {
                    projectile.target = None;
                }
            }
        }
    }
}

/// Collision response: contacts with the shooter are ignored, anything else
/// ends the projectile and spins the victim.
fn resolve_projectile_hits(
    mut commands: Commands,
    mut pools: ResMut<BonusPools>,
    mut collision_events: MessageReader<CollisionEvent>,
    projectile_query: Query<&Projectile>,
    racer_query: Query<(), With<Racer>>,
    mut spin_events: MessageWriter<SpinRacerEvent>,
) {
    for event in collision_events.read() {
        let CollisionEvent::Started(first, second, _) = event else {
            continue;
        };

        let (projectile_entity, other) = if projectile_query.contains(*first) {
            (*first, *second)
        } else if projectile_query.contains(*second) {
            (*second, *first)
        } else {
            continue;
        };

        let Ok(projectile) = projectile_query.get(projectile_entity) else {
            continue;
        };
        if !projectile.armed || other == projectile.shooter {
            continue;
        }

        if racer_query.get(other).is_ok() {
            spin_events.write(SpinRacerEvent { racer: other });
        }
        let kind = projectile.kind;
        park_projectile(&mut commands, &mut pools, projectile_entity, kind);
    }
}

/// Returns a projectile entity to its pool: disabled, hidden, parked outside
/// the play area. Pooled entities are never referenced after release.
fn park_projectile(
    commands: &mut Commands,
    pools: &mut BonusPools,
    entity: Entity,
    kind: ProjectileKind,
) {
    commands
        .entity(entity)
        .remove::<(ImpulseJoint, Projectile)>()
        .insert((
            RigidBodyDisabled,
            ColliderDisabled,
            Visibility::Hidden,
            RigidBody::Dynamic,
            Velocity::default(),
            Transform::from_xyz(POOL_PARK_POSITION.x, POOL_PARK_POSITION.y, PROJECTILE_Z),
        ));

    match kind {
        ProjectileKind::Bullet => pools.bullets.release(entity),
        ProjectileKind::Mine => pools.mines.release(entity),
        ProjectileKind::Missile => pools.missiles.release(entity),
    }
}

fn next_signed_unit_random(seed: &mut u64) -> f32 {
    (next_unit_random(seed) * 2.0) - 1.0
}

fn next_unit_random(seed: &mut u64) -> f32 {
    *seed = seed
        .wrapping_mul(6_364_136_223_846_793_005)
        .wrapping_add(1_442_695_040_888_963_407);
    ((*seed >> 32) as u32) as f32 / u32::MAX as f32
}

fn unix_timestamp_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn shortest_angle_delta_rad(target: f32, current: f32) -> f32 {
    use std::f32::consts::{PI, TAU};
    (target - current + PI).rem_euclid(TAU) - PI
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn array_lerp_returns_exact_curve_endpoints() {
        let curve = [0.2, 1.0, 2.4];
        assert_eq!(array_lerp(&curve, 0.0), 0.2);
        assert_eq!(array_lerp(&curve, 1.0), 2.4);
    }

    #[test]
    fn array_lerp_is_continuous_and_bounded() {
        let curve = [0.2, 1.0, 2.4];
        let mut previous = array_lerp(&curve, 0.0);
        for step in 1..=100 {
            let t = step as f32 / 100.0;
            let value = array_lerp(&curve, t);
            assert!(value >= 0.2 - 1e-6 && value <= 2.4 + 1e-6);
            assert!((value - previous).abs() < 0.1, "jump at t = {t}");
            previous = value;
        }
    }

    #[test]
    fn array_lerp_hits_the_mid_entry_at_the_curve_midpoint() {
        let curve = [0.0, 3.0, 4.0];
        assert!((array_lerp(&curve, 0.5) - 3.0).abs() < 1e-6);
    }

    #[test]
    fn array_lerp_clamps_out_of_range_inputs() {
        let curve = [1.0, 5.0];
        assert_eq!(array_lerp(&curve, -2.0), 1.0);
        assert_eq!(array_lerp(&curve, 3.0), 5.0);
    }

    #[test]
    fn selection_draw_always_lands_in_exactly_one_pool() {
        let weights = [1.5, 0.5, 2.0];
        let total: f32 = weights.iter().sum();

        for step in 0..200 {
            let draw = total * (step as f32 / 200.0);
            let index = select_pool_index(&weights, draw);
            assert!(index < weights.len());
        }

        assert_eq!(select_pool_index(&weights, 0.0), 0);
        assert_eq!(select_pool_index(&weights, 1.6), 1);
        assert_eq!(select_pool_index(&weights, 2.5), 2);
    }

    #[test]
    fn selection_falls_back_to_the_last_pool() {
        // A draw that exhausts every weight (degenerate zero-weight table).
        assert_eq!(select_pool_index(&[0.0, 0.0, 0.0], 0.0), 2);
        // Remainder lands exactly on the total.
        assert_eq!(select_pool_index(&[1.0, 1.0], 2.0), 1);
    }

    #[test]
    fn entity_pool_reuses_released_entities_up_to_capacity() {
        let mut pool = EntityPool::new(2);
        assert!(pool.acquire().is_none());
        assert!(pool.can_grow());
        pool.note_created();
        pool.note_created();
        assert!(!pool.can_grow());

        pool.release(Entity::PLACEHOLDER);
        let reused = pool.acquire();
        assert_eq!(reused, Some(Entity::PLACEHOLDER));
        assert!(pool.acquire().is_none());
    }

    #[test]
    fn unit_random_stays_in_range_and_advances_the_seed() {
        let mut seed = 0xDEAD_BEEF_u64;
        for _ in 0..100 {
            let before = seed;
            let value = next_unit_random(&mut seed);
            assert!((0.0..=1.0).contains(&value));
            assert_ne!(seed, before);
        }
    }
}
