use crate::config::GameConfig;
use crate::gameplay::bonus::HeldBonus;
use crate::gameplay::hazard::HazardState;
use crate::gameplay::pilots::AiPilot;
use crate::gameplay::race::{RacePhase, RaceStandings};
use crate::gameplay::racer::{LapTracking, RaceRank, Racer, SpinState};
use crate::gameplay::vehicle::Vehicle;
use crate::states::GameState;
use bevy::prelude::*;
use bevy_egui::{egui, EguiContexts, EguiPrimaryContextPass};
use bevy_rapier2d::prelude::Velocity;

pub struct DebugOverlayPlugin;

impl Plugin for DebugOverlayPlugin {
    fn build(&self, app: &mut App) {
        app.init_resource::<DebugOverlayState>()
            .add_systems(Update, (sync_overlay_default, toggle_debug_overlay))
            .add_systems(
                EguiPrimaryContextPass,
                race_debug_panel
                    .run_if(in_state(GameState::InRace))
                    .run_if(resource_exists::<GameConfig>),
            );
    }
}

#[derive(Resource, Debug, Clone, Copy, Default)]
struct DebugOverlayState {
    visible: bool,
    default_applied: bool,
}

fn sync_overlay_default(config: Option<Res<GameConfig>>, mut state: ResMut<DebugOverlayState>) {
    if state.default_applied {
        return;
    }
    if let Some(config) = config {
        state.visible = config.game.app.debug_overlay;
        state.default_applied = true;
    }
}

fn toggle_debug_overlay(
    keyboard: Res<ButtonInput<KeyCode>>,
    mut state: ResMut<DebugOverlayState>,
) {
    if keyboard.just_pressed(KeyCode::F3) {
        state.visible = !state.visible;
    }
}

#[allow(clippy::type_complexity)]
fn race_debug_panel(
    mut contexts: EguiContexts,
    state: Res<DebugOverlayState>,
    phase: Option<Res<RacePhase>>,
    standings: Option<Res<RaceStandings>>,
    racer_query: Query<(
        &Racer,
        &RaceRank,
        &LapTracking,
        &SpinState,
        &HazardState,
        &Vehicle,
        &Velocity,
        Option<&AiPilot>,
        Option<&HeldBonus>,
    )>,
) {
    if !state.visible {
        return;
    }
    let Ok(context) = contexts.ctx_mut() else {
        return;
    };

    egui::Window::new("Race Debug")
        .default_width(520.0)
        .show(context, |ui| {
            if let Some(phase) = phase.as_ref() {
                ui.label(format!("Phase: {:?}", **phase));
            }
            if let Some(standings) = standings.as_ref() {
                ui.label(format!(
                    "Standings: {} racers, {} finished",
                    standings.ordered.len(),
                    standings.finish_count
                ));
            }
            ui.separator();

            let mut rows: Vec<_> = racer_query.iter().collect();
            rows.sort_by_key(|(_, rank, ..)| rank.rank);

            egui::Grid::new("racer_rows").striped(true).show(ui, |ui| {
                ui.label("Racer");
                ui.label("Lap");
                ui.label("Dist");
                ui.label("Speed");
                ui.label("Pilot");
                ui.label("Hazard");
                ui.label("Bonus");
                ui.end_row();

                for (racer, rank, lap, spin, hazard, vehicle, velocity, ai, held) in rows {
                    ui.label(format!("{}. {}", rank.rank + 1, racer.name));
                    ui.label(format!("{}", lap.lap_count));
                    ui.label(format!("{:.0}", lap.lap_distance_m));
                    ui.label(format!("{:.1}", velocity.linvel.length()));
                    let pilot = match ai {
                        Some(ai) if ai.is_blocked() => "AI blocked".to_string(),
                        Some(_) => "AI".to_string(),
                        None => "player".to_string(),
                    };
                    let pilot = if spin.spinning {
                        format!("{pilot} (spin)")
                    } else {
                        pilot
                    };
                    ui.label(pilot);
                    ui.label(format!("{:?}", hazard.phase));
                    let bonus = held
                        .map(|held| format!("{:?}", held.kind))
                        .unwrap_or_else(|| {
                            if vehicle.turbo_active() {
                                "turbo!".to_string()
                            } else {
                                "-".to_string()
                            }
                        });
                    ui.label(bonus);
                    ui.end_row();
                }
            });
        });
}
