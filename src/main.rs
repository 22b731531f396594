mod config;
mod debug;
mod gameplay;
mod states;
mod stats;
mod track;

use bevy::prelude::*;
use bevy_egui::EguiPlugin;
use bevy_rapier2d::prelude::*;
use config::ConfigPlugin;
use debug::DebugOverlayPlugin;
use gameplay::GameplayPlugin;
use states::{GameState, GameStatePlugin};
use stats::RaceRecordsPlugin;
use track::TrackPlugin;

fn main() {
    App::new()
        .add_plugins(DefaultPlugins.set(WindowPlugin {
            primary_window: Some(Window {
                title: "Drift Circuit".to_string(),
                resolution: (1280, 720).into(),
                ..default()
            }),
            ..default()
        }))
        .add_plugins(EguiPlugin::default())
        .add_plugins(
            RapierPhysicsPlugin::<NoUserData>::pixels_per_meter(1.0).in_fixed_schedule(),
        )
        .add_plugins(ConfigPlugin)
        .add_plugins(TrackPlugin)
        .add_plugins(DebugOverlayPlugin)
        .add_plugins(GameplayPlugin)
        .add_plugins(RaceRecordsPlugin)
        .init_state::<GameState>()
        .add_plugins(GameStatePlugin)
        .run();
}
