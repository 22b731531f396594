pub mod bonus;
pub mod hazard;
pub mod input;
pub mod pilots;
pub mod race;
pub mod racer;
pub mod sfx;
pub mod vehicle;
pub mod wheel;

use bevy::prelude::*;
use bonus::BonusGameplayPlugin;
use hazard::HazardGameplayPlugin;
use input::RaceInputPlugin;
use pilots::PilotGameplayPlugin;
use race::RaceLoopPlugin;
use racer::RacerGameplayPlugin;
use sfx::GameplaySfxPlugin;
use vehicle::VehicleGameplayPlugin;

pub struct GameplayPlugin;

impl Plugin for GameplayPlugin {
    fn build(&self, app: &mut App) {
        app.add_plugins(RaceInputPlugin)
            .add_plugins(RaceLoopPlugin)
            .add_plugins(VehicleGameplayPlugin)
            .add_plugins(RacerGameplayPlugin)
            .add_plugins(PilotGameplayPlugin)
            .add_plugins(HazardGameplayPlugin)
            .add_plugins(BonusGameplayPlugin)
            .add_plugins(GameplaySfxPlugin);
    }
}
