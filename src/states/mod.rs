use crate::config::GameConfig;
use crate::gameplay::race::{RacePhase, RaceStandings};
use crate::gameplay::racer::{LapTracking, Racer};
use crate::track::TrackLayout;
use bevy::app::AppExit;
use bevy::prelude::*;
use bevy_rapier2d::prelude::*;

const MIN_LOADING_SCREEN_SECONDS: f64 = 0.75;

#[derive(States, Debug, Clone, Copy, Eq, PartialEq, Hash, Default)]
pub enum GameState {
    #[default]
    Boot,
    Loading,
    InRace,
    Pause,
    Results,
}

pub struct GameStatePlugin;

impl Plugin for GameStatePlugin {
    fn build(&self, app: &mut App) {
        app.init_resource::<RaceSummary>()
            .add_systems(Startup, setup_camera)
            .add_systems(OnEnter(GameState::Boot), enter_boot)
            .add_systems(Update, boot_to_loading.run_if(in_state(GameState::Boot)))
            .add_systems(OnEnter(GameState::Loading), enter_loading)
            .add_systems(OnExit(GameState::Loading), cleanup_loading_screen)
            .add_systems(
                Update,
                loading_to_in_race.run_if(in_state(GameState::Loading)),
            )
            .add_systems(
                OnEnter(GameState::InRace),
                (configure_camera_units, enter_in_race, reset_race_summary),
            )
            .add_systems(
                Update,
                (
                    in_race_controls,
                    race_camera_follow,
                    update_race_summary.run_if(resource_exists::<RaceStandings>),
                )
                    .run_if(in_state(GameState::InRace)),
            )
            .add_systems(OnEnter(GameState::Pause), pause_physics_pipeline)
            .add_systems(OnExit(GameState::Pause), resume_physics_pipeline)
            .add_systems(Update, pause_controls.run_if(in_state(GameState::Pause)))
            .add_systems(OnEnter(GameState::Results), enter_results)
            .add_systems(OnExit(GameState::Results), cleanup_results_screen)
            .add_systems(
                Update,
                results_controls.run_if(in_state(GameState::Results)),
            );
    }
}

#[derive(Component)]
struct LoadingScreenTitle;

#[derive(Component)]
struct ResultsScreenRoot;

#[derive(Resource, Debug, Clone, Copy)]
struct LoadingScreenState {
    entered_at_s: f64,
}

/// Standings snapshot that survives the race teardown, so the results screen
/// has something to show after the racers despawn.
#[derive(Resource, Debug, Clone, Default)]
struct RaceSummary {
    entries: Vec<RaceSummaryEntry>,
}

#[derive(Debug, Clone)]
struct RaceSummaryEntry {
    name: String,
    best_lap_s: Option<f32>,
    total_s: f32,
    finished: bool,
}

const CAMERA_ORTHO_SCALE_METERS: f32 = 0.09;

fn setup_camera(mut commands: Commands) {
    commands.spawn(Camera2d);
}

fn configure_camera_units(mut camera_query: Query<&mut Projection, With<Camera2d>>) {
    let Ok(mut projection) = camera_query.single_mut() else {
        return;
    };

    if let Projection::Orthographic(ortho) = &mut *projection {
        ortho.scale = CAMERA_ORTHO_SCALE_METERS;
    }
}

fn enter_boot() {
    info!("Entered state: Boot");
}

fn boot_to_loading(mut next_state: ResMut<NextState<GameState>>) {
    next_state.set(GameState::Loading);
}

fn enter_loading(mut commands: Commands, time: Res<Time>) {
    info!("Entered state: Loading");
    commands.insert_resource(LoadingScreenState {
        entered_at_s: time.elapsed_secs_f64(),
    });

    commands
        .spawn((
            Name::new("LoadingTitle"),
            LoadingScreenTitle,
            Node {
                width: Val::Percent(100.0),
                height: Val::Percent(100.0),
                justify_content: JustifyContent::Center,
                align_items: AlignItems::Center,
                ..default()
            },
            BackgroundColor(Color::srgba(0.02, 0.03, 0.05, 1.0)),
            ZIndex(200),
        ))
        .with_children(|parent| {
            parent.spawn((
                Text::new("DRIFT CIRCUIT"),
                TextFont {
                    font_size: 64.0,
                    ..default()
                },
                TextColor(Color::srgb(0.95, 0.97, 1.0)),
            ));
        });
}

fn cleanup_loading_screen(
    mut commands: Commands,
    loading_query: Query<Entity, With<LoadingScreenTitle>>,
) {
    for entity in &loading_query {
        commands.entity(entity).try_despawn();
    }
    commands.remove_resource::<LoadingScreenState>();
}

fn loading_to_in_race(
    time: Res<Time>,
    loading_state: Option<Res<LoadingScreenState>>,
    config: Option<Res<GameConfig>>,
    layout: Option<Res<TrackLayout>>,
    mut next_state: ResMut<NextState<GameState>>,
) {
    let Some(loading_state) = loading_state else {
        return;
    };

    let has_min_time =
        time.elapsed_secs_f64() - loading_state.entered_at_s >= MIN_LOADING_SCREEN_SECONDS;
    if !has_min_time || config.is_none() || layout.is_none() {
        return;
    }

    next_state.set(GameState::InRace);
}

fn enter_in_race(layout: Res<TrackLayout>) {
    info!(
        "Entered state: InRace on `{}` ({} laps).",
        layout.name, layout.total_laps
    );
}

fn in_race_controls(
    keyboard: Res<ButtonInput<KeyCode>>,
    phase: Option<Res<RacePhase>>,
    mut next_state: ResMut<NextState<GameState>>,
) {
    if keyboard.just_pressed(KeyCode::Escape) {
        next_state.set(GameState::Pause);
    }

    if phase.map(|phase| matches!(*phase, RacePhase::Finished)) == Some(true)
        && keyboard.just_pressed(KeyCode::Enter)
    {
        next_state.set(GameState::Results);
    }
}

fn race_camera_follow(
    racer_query: Query<&Transform, With<Racer>>,
    standings: Option<Res<RaceStandings>>,
    player_query: Query<(Entity, &Racer)>,
    mut camera_query: Query<&mut Transform, (With<Camera2d>, Without<Racer>)>,
) {
    let Ok(mut camera_transform) = camera_query.single_mut() else {
        return;
    };

    // Follow the first human slot; fall back to the race leader.
    let followed = player_query
        .iter()
        .find(|(_, racer)| racer.player_slot.is_some())
        .map(|(entity, _)| entity)
        .or_else(|| {
            standings
                .as_ref()
                .and_then(|standings| standings.ordered.first().copied())
        });

    let Some(followed) = followed else {
        return;
    };
    let Ok(target) = racer_query.get(followed) else {
        return;
    };

    camera_transform.translation.x = target.translation.x;
    camera_transform.translation.y = target.translation.y;
}

fn pause_physics_pipeline(
    mut rapier_config_query: Query<&mut RapierConfiguration, With<DefaultRapierContext>>,
) {
    info!("Entered state: Pause");
    if let Ok(mut rapier_config) = rapier_config_query.single_mut() {
        rapier_config.physics_pipeline_active = false;
    }
}

fn resume_physics_pipeline(
    mut rapier_config_query: Query<&mut RapierConfiguration, With<DefaultRapierContext>>,
) {
    if let Ok(mut rapier_config) = rapier_config_query.single_mut() {
        rapier_config.physics_pipeline_active = true;
    }
}

fn pause_controls(
    keyboard: Res<ButtonInput<KeyCode>>,
    mut next_state: ResMut<NextState<GameState>>,
) {
    if keyboard.just_pressed(KeyCode::Escape) {
        next_state.set(GameState::InRace);
    }

    if keyboard.just_pressed(KeyCode::Enter) {
        next_state.set(GameState::Results);
    }
}

fn reset_race_summary(mut summary: ResMut<RaceSummary>) {
    summary.entries.clear();
}

fn update_race_summary(
    standings: Res<RaceStandings>,
    racer_query: Query<(&Racer, &LapTracking)>,
    mut summary: ResMut<RaceSummary>,
) {
    summary.entries.clear();
    for entity in &standings.ordered {
        let Ok((racer, lap_tracking)) = racer_query.get(*entity) else {
            continue;
        };
        summary.entries.push(RaceSummaryEntry {
            name: racer.name.clone(),
            best_lap_s: lap_tracking.best_lap_s,
            total_s: lap_tracking.total_s,
            finished: lap_tracking.finished,
        });
    }
}

fn enter_results(mut commands: Commands, summary: Res<RaceSummary>) {
    let mut lines = Vec::new();
    for (position, entry) in summary.entries.iter().enumerate() {
        let best_lap = entry
            .best_lap_s
            .map(|seconds| format!("{seconds:.2}s"))
            .unwrap_or_else(|| "--".to_string());
        let total = if entry.finished {
            format!("{:.2}s", entry.total_s)
        } else {
            "DNF".to_string()
        };
        lines.push(format!(
            "{}. {}  best lap {best_lap}  total {total}",
            position + 1,
            entry.name
        ));
    }
    let summary_text = if lines.is_empty() {
        "No standings recorded.".to_string()
    } else {
        lines.join("\n")
    };

    commands
        .spawn((
            Name::new("ResultsOverlay"),
            ResultsScreenRoot,
            Node {
                width: Val::Percent(100.0),
                height: Val::Percent(100.0),
                justify_content: JustifyContent::Center,
                align_items: AlignItems::Center,
                ..default()
            },
            BackgroundColor(Color::srgba(0.01, 0.02, 0.03, 0.94)),
            ZIndex(300),
        ))
        .with_children(|parent| {
            parent
                .spawn((
                    Node {
                        flex_direction: FlexDirection::Column,
                        row_gap: Val::Px(10.0),
                        padding: UiRect::all(Val::Px(16.0)),
                        border: UiRect::all(Val::Px(1.0)),
                        ..default()
                    },
                    BackgroundColor(Color::srgba(0.08, 0.10, 0.13, 0.96)),
                    BorderColor::all(Color::srgba(0.56, 0.62, 0.68, 0.92)),
                ))
                .with_children(|panel| {
                    panel.spawn((
                        Text::new("RACE RESULTS"),
                        TextFont {
                            font_size: 52.0,
                            ..default()
                        },
                        TextColor(Color::srgb(0.94, 0.97, 1.00)),
                    ));
                    panel.spawn((
                        Text::new(format!("{summary_text}\n\nSpace - New Race\nQ - Quit")),
                        TextFont {
                            font_size: 22.0,
                            ..default()
                        },
                        TextColor(Color::srgb(0.90, 0.94, 0.98)),
                    ));
                });
        });

    info!("Entered state: Results");
}

fn cleanup_results_screen(
    mut commands: Commands,
    results_screen_query: Query<Entity, With<ResultsScreenRoot>>,
) {
    for entity in &results_screen_query {
        commands.entity(entity).try_despawn();
    }
}

fn results_controls(
    keyboard: Res<ButtonInput<KeyCode>>,
    mut next_state: ResMut<NextState<GameState>>,
    mut exit: MessageWriter<AppExit>,
) {
    if keyboard.just_pressed(KeyCode::Space) {
        next_state.set(GameState::Boot);
    }

    if keyboard.just_pressed(KeyCode::KeyQ) {
        exit.write(AppExit::Success);
    }
}
