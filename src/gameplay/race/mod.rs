use crate::config::GameConfig;
use crate::gameplay::racer::{LapTracking, RaceRank, Racer, RacerFinishedEvent};
use crate::gameplay::sfx::{SfxCue, SfxCueEvent};
use crate::states::GameState;
use crate::track::TrackLayout;
use bevy::prelude::*;
use bevy_rapier2d::prelude::*;

/// One simulation step, in execution order. Lap tracking runs first so every
/// later stage sees this step's positions; ranking runs last over the fully
/// updated field.
#[derive(SystemSet, Debug, Clone, PartialEq, Eq, Hash)]
pub enum RaceStep {
    Phase,
    LapTracking,
    Vehicle,
    Hazard,
    Spin,
    Pilots,
    Pickups,
    Audio,
    Bonus,
    Contacts,
    Ranking,
}

pub struct RaceLoopPlugin;

impl Plugin for RaceLoopPlugin {
    fn build(&self, app: &mut App) {
        app.add_message::<RaceStartedEvent>()
            .add_message::<RaceFinishedEvent>()
            .configure_sets(
                FixedUpdate,
                (
                    RaceStep::Phase,
                    RaceStep::LapTracking,
                    RaceStep::Vehicle,
                    RaceStep::Hazard,
                    RaceStep::Spin,
                    RaceStep::Pilots,
                    RaceStep::Pickups,
                    RaceStep::Audio,
                    RaceStep::Bonus,
                    RaceStep::Contacts,
                    RaceStep::Ranking,
                )
                    .chain()
                    // The solver finishes writing back before any race logic
                    // reads positions or velocities for this step.
                    .after(PhysicsSet::Writeback),
            )
            .add_systems(
                Update,
                sync_physics_step.run_if(resource_exists::<GameConfig>),
            )
            .add_systems(
                OnEnter(GameState::InRace),
                // A fresh race only; resuming from pause keeps the live phase.
                setup_race_phase.run_if(not(resource_exists::<RacePhase>)),
            )
            .add_systems(OnEnter(GameState::Results), teardown_race_phase)
            .add_systems(
                FixedUpdate,
                update_race_phase
                    .in_set(RaceStep::Phase)
                    .run_if(in_state(GameState::InRace))
                    .run_if(resource_exists::<RacePhase>),
            )
            .add_systems(
                FixedUpdate,
                update_race_standings
                    .in_set(RaceStep::Ranking)
                    .run_if(in_state(GameState::InRace))
                    .run_if(resource_exists::<RacePhase>)
                    .run_if(resource_exists::<TrackLayout>),
            );
    }
}

/// The race-level state machine. Countdown holds every pilot idle, Running is
/// the actual race, Finished freezes the standings.
#[derive(Resource, Debug, Clone, Copy, PartialEq)]
pub enum RacePhase {
    Countdown { remaining_s: f32 },
    Running,
    Finished,
}

impl RacePhase {
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }
}

/// Race order, finished racers frozen at the front in finish order.
#[derive(Resource, Debug, Clone, Default)]
pub struct RaceStandings {
    pub ordered: Vec<Entity>,
    pub finish_count: usize,
}

impl RaceStandings {
    /// Rank of a racer in the current standings. Asking for an entity that is
    /// not racing is a core wiring bug, not recoverable runtime data.
    pub fn rank_of(&self, entity: Entity) -> usize {
        self.ordered
            .iter()
            .position(|candidate| *candidate == entity)
            .unwrap_or_else(|| panic!("entity {entity:?} is not part of the race standings"))
    }
}

#[derive(Message, Debug, Clone, Copy)]
pub struct RaceStartedEvent;

#[derive(Message, Debug, Clone, Copy)]
pub struct RaceFinishedEvent;

/// Rank mapped to [0, 1]: 0 = leading, 1 = last. A single-racer race always
/// normalizes to 0.
pub fn normalized_rank(rank: usize, racer_count: usize) -> f32 {
    if racer_count <= 1 {
        return 0.0;
    }
    (rank as f32 / (racer_count - 1) as f32).clamp(0.0, 1.0)
}

/// Transition out of the countdown. Calling this from any other phase is a
/// core wiring bug.
pub fn start_race(phase: &mut RacePhase) {
    assert!(
        matches!(phase, RacePhase::Countdown { .. }),
        "start_race called while the race phase is {phase:?}"
    );
    *phase = RacePhase::Running;
}

/// Keeps the physics step locked to the configured fixed rate. Runs once after
/// the config loads and again on every hot reload.
fn sync_physics_step(
    config: Res<GameConfig>,
    mut timestep: ResMut<TimestepMode>,
    mut fixed_time: ResMut<Time<Fixed>>,
    mut virtual_time: ResMut<Time<Virtual>>,
    mut rapier_config_query: Query<&mut RapierConfiguration, With<DefaultRapierContext>>,
    mut simulation_query: Query<&mut RapierContextSimulation, With<DefaultRapierContext>>,
) {
    if !config.is_changed() {
        return;
    }

    let hz = config.game.app.fixed_timestep_hz.max(1.0);
    *timestep = TimestepMode::Fixed {
        dt: 1.0 / hz,
        substeps: 1,
    };
    fixed_time.set_timestep_hz(hz as f64);
    // Clamp the accumulated frame time so a transient stall cannot queue an
    // unbounded number of catch-up steps.
    virtual_time.set_max_delta(std::time::Duration::from_millis(250));

    if let Ok(mut rapier_config) = rapier_config_query.single_mut() {
        // Top-down world: gravity acts along -z, outside the solver plane.
        rapier_config.gravity = Vec2::ZERO;
    }

    if let Ok(mut simulation) = simulation_query.single_mut() {
        let parameters = &mut simulation.integration_parameters;
        parameters.num_solver_iterations =
            std::num::NonZeroUsize::new(config.game.app.velocity_iterations as usize)
                .unwrap_or(std::num::NonZeroUsize::MIN)
                .get();
        parameters.num_internal_pgs_iterations = config.game.app.position_iterations as usize;
    }

    info!(
        "Physics step locked to {hz:.0} Hz ({}v/{}p solver iterations).",
        config.game.app.velocity_iterations, config.game.app.position_iterations
    );
}

fn setup_race_phase(mut commands: Commands, config: Res<GameConfig>) {
    commands.insert_resource(RacePhase::Countdown {
        remaining_s: config.game.app.countdown_seconds,
    });
    commands.insert_resource(RaceStandings::default());
    info!(
        "Race countdown started: {:.1}s.",
        config.game.app.countdown_seconds
    );
}

fn teardown_race_phase(mut commands: Commands) {
    commands.remove_resource::<RacePhase>();
    commands.remove_resource::<RaceStandings>();
}

fn update_race_phase(
    time: Res<Time>,
    mut phase: ResMut<RacePhase>,
    racer_query: Query<(&Racer, &LapTracking)>,
    mut started_events: MessageWriter<RaceStartedEvent>,
    mut finished_events: MessageWriter<RaceFinishedEvent>,
    mut cue_events: MessageWriter<SfxCueEvent>,
) {
    match *phase {
        RacePhase::Countdown { remaining_s } => {
            let next_remaining = remaining_s - time.delta_secs();
            if next_remaining <= 0.0 {
                start_race(&mut phase);
                started_events.write(RaceStartedEvent);
                cue_events.write(SfxCueEvent::new(SfxCue::StartHorn));
                info!("Race started.");
            } else {
                if next_remaining.ceil() < remaining_s.ceil() {
                    cue_events.write(SfxCueEvent::new(SfxCue::CountdownBeep));
                }
                *phase = RacePhase::Countdown {
                    remaining_s: next_remaining,
                };
            }
        }
        RacePhase::Running => {
            let mut any_player = false;
            let mut all_players_finished = true;
            for (racer, lap_tracking) in &racer_query {
                if racer.player_slot.is_some() {
                    any_player = true;
                    all_players_finished &= lap_tracking.finished;
                }
            }
            if any_player && all_players_finished {
                *phase = RacePhase::Finished;
                finished_events.write(RaceFinishedEvent);
                cue_events.write(SfxCueEvent::new(SfxCue::FinishJingle));
                info!("Race finished.");
            }
        }
        RacePhase::Finished => {}
    }
}

#[derive(Debug, Clone, Copy)]
struct Standing<T> {
    id: T,
    finished: bool,
    finish_order: Option<usize>,
    progress_m: f32,
}

/// Stable standings order: finished racers at the front in finish order, the
/// unfinished suffix sorted by race progress. Works on a snapshot; membership
/// never changes mid-sort.
fn sorted_standings<T: Copy>(mut entries: Vec<Standing<T>>) -> Vec<Standing<T>> {
    entries.sort_by(|left, right| match (left.finished, right.finished) {
        (true, true) => left
            .finish_order
            .unwrap_or(usize::MAX)
            .cmp(&right.finish_order.unwrap_or(usize::MAX)),
        (true, false) => std::cmp::Ordering::Less,
        (false, true) => std::cmp::Ordering::Greater,
        (false, false) => right
            .progress_m
            .partial_cmp(&left.progress_m)
            .unwrap_or(std::cmp::Ordering::Equal),
    });
    entries
}

fn update_race_standings(
    layout: Res<TrackLayout>,
    mut standings: ResMut<RaceStandings>,
    mut finished_events: MessageReader<RacerFinishedEvent>,
    mut racer_query: Query<(Entity, &LapTracking, &mut RaceRank), With<Racer>>,
) {
    // Finish order is assigned on arrival, before the sort freezes it.
    for event in finished_events.read() {
        if let Ok((_, _, mut rank)) = racer_query.get_mut(event.racer) {
            if rank.finish_order.is_none() {
                rank.finish_order = Some(standings.finish_count);
                standings.finish_count += 1;
            }
        }
    }

    let entries: Vec<Standing<Entity>> = racer_query
        .iter()
        .map(|(entity, lap_tracking, rank)| Standing {
            id: entity,
            finished: lap_tracking.finished,
            finish_order: rank.finish_order,
            progress_m: lap_tracking.lap_count as f32 * layout.lap_length_m
                + lap_tracking.lap_distance_m,
        })
        .collect();

    let sorted = sorted_standings(entries);
    standings.ordered = sorted.iter().map(|entry| entry.id).collect();

    for (position, entry) in sorted.iter().enumerate() {
        if let Ok((_, _, mut rank)) = racer_query.get_mut(entry.id) {
            rank.rank = position;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalized_rank_is_zero_for_a_single_racer() {
        assert_eq!(normalized_rank(0, 1), 0.0);
    }

    #[test]
    fn normalized_rank_spans_zero_to_one() {
        assert_eq!(normalized_rank(0, 5), 0.0);
        assert_eq!(normalized_rank(4, 5), 1.0);
        assert!((normalized_rank(2, 5) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn start_race_leaves_countdown() {
        let mut phase = RacePhase::Countdown { remaining_s: 0.0 };
        start_race(&mut phase);
        assert!(phase.is_running());
    }

    #[test]
    #[should_panic(expected = "start_race called")]
    fn start_race_outside_countdown_is_fatal() {
        let mut phase = RacePhase::Running;
        start_race(&mut phase);
    }

    #[test]
    #[should_panic(expected = "not part of the race standings")]
    fn rank_of_an_unknown_entity_is_fatal() {
        let standings = RaceStandings::default();
        standings.rank_of(Entity::PLACEHOLDER);
    }

    #[test]
    fn standings_sort_finished_racers_to_the_front_in_finish_order() {
        let entries = vec![
            Standing {
                id: 1_u32,
                finished: false,
                finish_order: None,
                progress_m: 900.0,
            },
            Standing {
                id: 2,
                finished: true,
                finish_order: Some(1),
                progress_m: 0.0,
            },
            Standing {
                id: 3,
                finished: true,
                finish_order: Some(0),
                progress_m: 0.0,
            },
            Standing {
                id: 4,
                finished: false,
                finish_order: None,
                progress_m: 1200.0,
            },
        ];

        let order: Vec<u32> = sorted_standings(entries)
            .iter()
            .map(|entry| entry.id)
            .collect();
        assert_eq!(order, vec![3, 2, 4, 1]);
    }

    #[test]
    fn unfinished_suffix_orders_by_progress() {
        let entries = vec![
            Standing {
                id: 1_u32,
                finished: false,
                finish_order: None,
                progress_m: 10.0,
            },
            Standing {
                id: 2,
                finished: false,
                finish_order: None,
                progress_m: 30.0,
            },
            Standing {
                id: 3,
                finished: false,
                finish_order: None,
                progress_m: 20.0,
            },
        ];

        let order: Vec<u32> = sorted_standings(entries)
            .iter()
            .map(|entry| entry.id)
            .collect();
        assert_eq!(order, vec![2, 3, 1]);
    }
}
