use crate::config::{AiConfig, GameConfig};
use crate::gameplay::bonus::{BonusKind, HeldBonus, TriggerHeldBonusEvent};
use crate::gameplay::hazard::HazardState;
use crate::gameplay::input::PlayerInputs;
use crate::gameplay::race::{normalized_rank, RacePhase, RaceStep};
use crate::gameplay::racer::{LapTracking, RaceRank, Racer, SpinState};
use crate::gameplay::vehicle::Vehicle;
use crate::states::GameState;
use crate::track::TrackLayout;
use bevy::prelude::*;
use std::f32::consts::{PI, TAU};

pub struct PilotGameplayPlugin;

impl Plugin for PilotGameplayPlugin {
    fn build(&self, app: &mut App) {
        app.add_systems(
            FixedUpdate,
            supervise_pilots
                .in_set(RaceStep::Pilots)
                .run_if(in_state(GameState::InRace))
                .run_if(resource_exists::<GameConfig>)
                .run_if(resource_exists::<TrackLayout>)
                .run_if(resource_exists::<RacePhase>),
        );
    }
}

/// Forwards the logical input snapshot of one player slot to the vehicle.
#[derive(Component, Debug, Clone, Copy)]
pub struct PlayerPilot {
    pub slot: usize,
    previous_trigger: bool,
}

impl PlayerPilot {
    pub fn new(slot: usize) -> Self {
        Self {
            slot,
            previous_trigger: false,
        }
    }

    /// Rising-edge detection: the bonus fires on press, not while held.
    pub fn trigger_edge(&mut self, trigger: bool) -> bool {
        let fired = trigger && !self.previous_trigger;
        self.previous_trigger = trigger;
        fired
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AiPilotState {
    #[default]
    Normal,
    Blocked,
}

#[derive(Component, Debug, Clone, Copy, Default)]
pub struct AiPilot {
    pub state: AiPilotState,
    below_speed_s: f32,
    reverse_remaining_s: f32,
    mine_timer_s: f32,
}

impl AiPilot {
    /// Drives the {Normal, Blocked} machine from the measured speed. Only a
    /// running race can block; the reverse window always runs to completion.
    pub fn advance_state(&mut self, speed_mps: f32, race_running: bool, cfg: &AiConfig, dt: f32) {
        match self.state {
            AiPilotState::Normal => {
                if race_running && speed_mps < cfg.blocked_speed_mps {
                    self.below_speed_s += dt;
                    if self.below_speed_s > cfg.blocked_after_s {
                        self.state = AiPilotState::Blocked;
                        self.reverse_remaining_s = cfg.reverse_duration_s;
                        self.below_speed_s = 0.0;
                    }
                } else {
                    self.below_speed_s = 0.0;
                }
            }
            AiPilotState::Blocked => {
                self.reverse_remaining_s -= dt;
                if self.reverse_remaining_s <= 0.0 {
                    self.state = AiPilotState::Normal;
                    self.below_speed_s = 0.0;
                }
            }
        }
    }

    pub fn is_blocked(&self) -> bool {
        self.state == AiPilotState::Blocked
    }
}

/// Proportional waypoint pursuit: angle error divided by the low-speed max
/// steer constant, clamped to [-1, 1].
pub fn pursuit_direction(
    heading_rad: f32,
    position: Vec2,
    target: Vec2,
    low_speed_steer_rad: f32,
) -> f32 {
    let to_target = target - position;
    if to_target.length_squared() <= f32::EPSILON {
        return 0.0;
    }
    let desired = to_target.y.atan2(to_target.x);
    let error = shortest_angle_delta_rad(desired, heading_rad);
    (error / low_speed_steer_rad.max(f32::EPSILON)).clamp(-1.0, 1.0)
}

/// Rubber-band limiter: applied only while the AI outranks the best player,
/// easing off toward the back of the field.
pub fn rank_speed_limiter(
    ai_rank: usize,
    best_player_rank: Option<usize>,
    racer_count: usize,
    min_factor: f32,
) -> f32 {
    match best_player_rank {
        Some(player_rank) if ai_rank < player_rank => {
            let t = normalized_rank(ai_rank, racer_count);
            min_factor + (1.0 - min_factor) * t
        }
        _ => 1.0,
    }
}

#[allow(clippy::type_complexity)]
fn supervise_pilots(
    time: Res<Time>,
    config: Res<GameConfig>,
    layout: Res<TrackLayout>,
    phase: Res<RacePhase>,
    inputs: Res<PlayerInputs>,
    mut trigger_events: MessageWriter<TriggerHeldBonusEvent>,
    mut racer_query: Query<(
        Entity,
        &Racer,
        &RaceRank,
        &LapTracking,
        &SpinState,
        &HazardState,
        &Transform,
        &bevy_rapier2d::prelude::Velocity,
        &mut Vehicle,
        Option<&mut PlayerPilot>,
        Option<&mut AiPilot>,
        Option<&HeldBonus>,
    )>,
) {
    let dt = time.delta_secs();
    let running = phase.is_running();
    let ai_cfg = &config.ai.ai;

    // Field snapshot for rubber-banding and AI target checks.
    let mut best_player_rank: Option<usize> = None;
    let mut field: Vec<(Entity, Vec2)> = Vec::new();
    for (entity, racer, rank, _, _, _, transform, _, _, _, _, _) in racer_query.iter() {
        field.push((entity, transform.translation.truncate()));
        if racer.player_slot.is_some() {
            best_player_rank = Some(
                best_player_rank
                    .map(|best| best.min(rank.rank))
                    .unwrap_or(rank.rank),
            );
        }
    }
    let racer_count = field.len();

    for (
        entity,
        _racer,
        rank,
        lap,
        spin,
        hazard,
        transform,
        velocity,
        mut vehicle,
        player_pilot,
        ai_pilot,
        held_bonus,
    ) in &mut racer_query
    {
        // The supervisor defers to the pilot only for a racer that is still
        // racing, not spinning, and not mid-hazard.
        let pilot_allowed = !lap.finished && !spin.spinning && hazard.is_normal();
        if !pilot_allowed {
            vehicle.accelerating = false;
            vehicle.braking = false;
            continue;
        }

        let heading = transform.rotation.to_euler(EulerRot::XYZ).2;
        let position = transform.translation.truncate();
        let speed = velocity.linvel.length();

        if let Some(mut pilot) = player_pilot {
            let snapshot = inputs.slot(pilot.slot);
            if running {
                vehicle.steer_direction = snapshot.direction;
                vehicle.accelerating = snapshot.accelerating;
                vehicle.braking = snapshot.braking;
                if pilot.trigger_edge(snapshot.trigger) && held_bonus.is_some() {
                    trigger_events.write(TriggerHeldBonusEvent { racer: entity });
                }
            } else {
                vehicle.accelerating = false;
                vehicle.braking = false;
            }
            continue;
        }

        let Some(mut pilot) = ai_pilot else {
            continue;
        };

        pilot.advance_state(speed, running, ai_cfg, dt);
        match pilot.state {
            AiPilotState::Normal => {
                let target = layout.next_waypoint_after(lap.lap_distance_m, ai_cfg.waypoint_lookahead_m);
                vehicle.steer_direction =
                    pursuit_direction(heading, position, target, ai_cfg.low_speed_steer_rad);
                vehicle.accelerating = running;
                vehicle.braking = false;
                vehicle.speed_limit_factor = rank_speed_limiter(
                    rank.rank,
                    best_player_rank,
                    racer_count,
                    ai_cfg.rank_limiter_min_factor,
                );
            }
            AiPilotState::Blocked => {
                vehicle.steer_direction = 0.0;
                vehicle.accelerating = false;
                vehicle.braking = true;
            }
        }

        // Held-bonus trigger logic runs every frame regardless of state.
        if let Some(held) = held_bonus {
            let fire = match held.kind {
                BonusKind::Gun | BonusKind::Missile => victim_in_forward_cone(
                    entity,
                    position,
                    heading,
                    &field,
                    ai_cfg.trigger_range_m,
                    ai_cfg.trigger_cone_deg.to_radians() * 0.5,
                ),
                BonusKind::Mines => {
                    pilot.mine_timer_s += dt;
                    if pilot.mine_timer_s >= ai_cfg.mine_drop_interval_s {
                        pilot.mine_timer_s = 0.0;
                        true
                    } else {
                        false
                    }
                }
                BonusKind::Turbo => running && vehicle.on_road && !pilot.is_blocked(),
            };
            if fire {
                trigger_events.write(TriggerHeldBonusEvent { racer: entity });
            }
        }
    }
}

fn victim_in_forward_cone(
    shooter: Entity,
    position: Vec2,
    heading_rad: f32,
    field: &[(Entity, Vec2)],
    range_m: f32,
    half_cone_rad: f32,
) -> bool {
    field.iter().any(|(entity, other_position)| {
        if *entity == shooter {
            return false;
        }
        let to_other = *other_position - position;
        let distance = to_other.length();
        if distance <= f32::EPSILON || distance > range_m {
            return false;
        }
        let bearing = to_other.y.atan2(to_other.x);
        shortest_angle_delta_rad(bearing, heading_rad).abs() <= half_cone_rad
    })
}

fn shortest_angle_delta_rad(target: f32, current: f32) -> f32 {
    (target - current + PI).rem_euclid(TAU) - PI
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::minimal_config;

    fn ai_config() -> AiConfig {
        minimal_config().ai.ai
    }

    #[test]
    fn trigger_fires_only_on_the_rising_edge() {
        let mut pilot = PlayerPilot::new(0);
        assert!(pilot.trigger_edge(true));
        assert!(!pilot.trigger_edge(true));
        assert!(!pilot.trigger_edge(false));
        assert!(pilot.trigger_edge(true));
    }

    #[test]
    fn sustained_low_speed_while_running_blocks_the_pilot() {
        let cfg = ai_config();
        let mut pilot = AiPilot::default();

        let step = 0.1;
        let steps = ((cfg.blocked_after_s / step) as usize) + 2;
        for _ in 0..steps {
            pilot.advance_state(cfg.blocked_speed_mps * 0.5, true, &cfg, step);
        }

        assert!(pilot.is_blocked());
    }

    #[test]
    fn low_speed_does_not_block_before_the_race_runs() {
        let cfg = ai_config();
        let mut pilot = AiPilot::default();

        for _ in 0..100 {
            pilot.advance_state(0.0, false, &cfg, 0.1);
        }

        assert!(!pilot.is_blocked());
    }

    #[test]
    fn blocked_state_reverses_for_the_configured_window_then_recovers() {
        let cfg = ai_config();
        let mut pilot = AiPilot::default();

        let step = 0.1;
        let steps = ((cfg.blocked_after_s / step) as usize) + 2;
        for _ in 0..steps {
            pilot.advance_state(0.0, true, &cfg, step);
        }
        assert!(pilot.is_blocked());

        // Still blocked mid-window, even at speed.
        pilot.advance_state(10.0, true, &cfg, cfg.reverse_duration_s * 0.5);
        assert!(pilot.is_blocked());

        pilot.advance_state(10.0, true, &cfg, cfg.reverse_duration_s);
        assert!(!pilot.is_blocked());
    }

    #[test]
    fn pursuit_steers_toward_the_target_and_clamps() {
        // Target directly left of the heading: full positive lock.
        let direction = pursuit_direction(0.0, Vec2::ZERO, Vec2::new(0.0, 10.0), 0.6);
        assert_eq!(direction, 1.0);

        // Target straight ahead: no steering.
        let straight = pursuit_direction(0.0, Vec2::ZERO, Vec2::new(10.0, 0.0), 0.6);
        assert!(straight.abs() < 1e-6);

        // Small error stays proportional.
        let slight = pursuit_direction(0.0, Vec2::ZERO, Vec2::new(10.0, 1.0), 0.6);
        assert!(slight > 0.0 && slight < 0.5);
    }

    #[test]
    fn limiter_applies_only_while_outranking_the_best_player() {
        // AI leads the player: slowed, hardest in first place.
        let leading = rank_speed_limiter(0, Some(3), 6, 0.82);
        assert!((leading - 0.82).abs() < 1e-6);

        let mid = rank_speed_limiter(2, Some(3), 6, 0.82);
        assert!(mid > leading && mid < 1.0);

        // Behind the player: full speed.
        assert_eq!(rank_speed_limiter(4, Some(3), 6, 0.82), 1.0);
        // No players at all: full speed.
        assert_eq!(rank_speed_limiter(0, None, 6, 0.82), 1.0);
    }

    #[test]
    fn forward_cone_check_ignores_the_shooter() {
        let shooter = Entity::PLACEHOLDER;
        let field = vec![(shooter, Vec2::ZERO)];
        assert!(!victim_in_forward_cone(
            shooter,
            Vec2::ZERO,
            0.0,
            &field,
            30.0,
            0.5
        ));
    }
}
