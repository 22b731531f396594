use crate::config::GameConfig;
use crate::gameplay::bonus::{BonusFiredEvent, BonusKind, BonusPickedEvent};
use crate::gameplay::hazard::HazardSplashEvent;
use crate::gameplay::race::RaceStep;
use crate::gameplay::racer::{Racer, RacerBumpedEvent, SpinRacerEvent};
use crate::gameplay::vehicle::{LeftRoadEvent, TurboTriggeredEvent, Vehicle};
use crate::gameplay::wheel::Wheel;
use crate::states::GameState;
use bevy::audio::{AudioPlayer, AudioSink, AudioSinkPlayback, AudioSource, PlaybackSettings, Volume};
use bevy::prelude::*;
use std::collections::{HashMap, HashSet};

const ENGINE_PITCH_MIN: f32 = 0.7;
const ENGINE_PITCH_SPAN: f32 = 1.1;

pub struct GameplaySfxPlugin;

impl Plugin for GameplaySfxPlugin {
    fn build(&self, app: &mut App) {
        app.add_message::<SfxCueEvent>()
            .init_resource::<SfxHandleCache>()
            .init_resource::<DriftCueState>()
            .add_systems(OnExit(GameState::InRace), cleanup_sfx_entities)
            .add_systems(
                FixedUpdate,
                emit_gameplay_cues
                    .in_set(RaceStep::Audio)
                    .run_if(in_state(GameState::InRace))
                    .run_if(resource_exists::<GameConfig>),
            )
            .add_systems(
                Update,
                (ensure_engine_loop_audio, update_engine_loop_audio, play_cue_events)
                    .chain()
                    .run_if(in_state(GameState::InRace))
                    .run_if(resource_exists::<GameConfig>),
            );
    }
}

/// One-shot sound cues, keyed symbolically; the audio backend owns the files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SfxCue {
    CountdownBeep,
    StartHorn,
    Drift,
    IceDrift,
    Turbo,
    BonusPickup,
    GunShot,
    MineDrop,
    MissileLaunch,
    Spin,
    Splash,
    Bump,
    OffRoad,
    RescueDrone,
    FinishJingle,
}

impl SfxCue {
    fn asset_path(&self) -> &'static str {
        match self {
            Self::CountdownBeep => "audio/countdown_beep.wav",
            Self::StartHorn => "audio/start_horn.wav",
            Self::Drift => "audio/drift.wav",
            Self::IceDrift => "audio/ice_drift.wav",
            Self::Turbo => "audio/turbo.wav",
            Self::BonusPickup => "audio/bonus_pickup.wav",
            Self::GunShot => "audio/gun_shot.wav",
            Self::MineDrop => "audio/mine_drop.wav",
            Self::MissileLaunch => "audio/missile_launch.wav",
            Self::Spin => "audio/spin.wav",
            Self::Splash => "audio/splash.wav",
            Self::Bump => "audio/bump.wav",
            Self::OffRoad => "audio/offroad.wav",
            Self::RescueDrone => "audio/rescue_drone.wav",
            Self::FinishJingle => "audio/finish.wav",
        }
    }
}

#[derive(Message, Debug, Clone, Copy)]
pub struct SfxCueEvent {
    pub cue: SfxCue,
    pub volume: f32,
}

impl SfxCueEvent {
    pub fn new(cue: SfxCue) -> Self {
        Self { cue, volume: 1.0 }
    }
}

#[derive(Component)]
struct EngineLoopAudio;

#[derive(Resource, Debug, Default)]
struct SfxHandleCache {
    handles_by_path: HashMap<&'static str, Handle<AudioSource>>,
}

/// Remembers which wheels were already drifting so the drift cue fires on the
/// transition, not every step.
#[derive(Resource, Debug, Default)]
struct DriftCueState {
    drifting_wheels: HashSet<Entity>,
    ice_drifting_racers: HashSet<Entity>,
}

/// Translates gameplay messages into sound cues, in pipeline order.
#[allow(clippy::too_many_arguments, clippy::type_complexity)]
fn emit_gameplay_cues(
    mut drift_state: ResMut<DriftCueState>,
    wheel_query: Query<(Entity, &Wheel)>,
    racer_query: Query<(Entity, &Vehicle), With<Racer>>,
    mut picked_events: MessageReader<BonusPickedEvent>,
    mut fired_events: MessageReader<BonusFiredEvent>,
    mut spin_events: MessageReader<SpinRacerEvent>,
    mut bump_events: MessageReader<RacerBumpedEvent>,
    mut splash_events: MessageReader<HazardSplashEvent>,
    mut left_road_events: MessageReader<LeftRoadEvent>,
    mut turbo_events: MessageReader<TurboTriggeredEvent>,
    mut cue_events: MessageWriter<SfxCueEvent>,
) {
    for (entity, wheel) in &wheel_query {
        let was_drifting = drift_state.drifting_wheels.contains(&entity);
        if wheel.is_drifting() && !was_drifting {
            drift_state.drifting_wheels.insert(entity);
            cue_events.write(SfxCueEvent::new(SfxCue::Drift));
        } else if !wheel.is_drifting() && was_drifting {
            drift_state.drifting_wheels.remove(&entity);
        }
    }

    for (entity, vehicle) in &racer_query {
        let was_ice_drifting = drift_state.ice_drifting_racers.contains(&entity);
        if vehicle.ice_drifting && !was_ice_drifting {
            drift_state.ice_drifting_racers.insert(entity);
            cue_events.write(SfxCueEvent::new(SfxCue::IceDrift));
        } else if !vehicle.ice_drifting && was_ice_drifting {
            drift_state.ice_drifting_racers.remove(&entity);
        }
    }

    for _ in picked_events.read() {
        cue_events.write(SfxCueEvent::new(SfxCue::BonusPickup));
    }
    for event in fired_events.read() {
        let cue = match event.kind {
            BonusKind::Gun => SfxCue::GunShot,
            BonusKind::Mines => SfxCue::MineDrop,
            BonusKind::Turbo => SfxCue::Turbo,
            BonusKind::Missile => SfxCue::MissileLaunch,
        };
        cue_events.write(SfxCueEvent::new(cue));
    }
    for _ in spin_events.read() {
        cue_events.write(SfxCueEvent::new(SfxCue::Spin));
    }
    for event in bump_events.read() {
        cue_events.write(SfxCueEvent {
            cue: SfxCue::Bump,
            volume: (event.closing_speed_mps * 0.2).clamp(0.2, 1.0),
        });
    }
    for event in splash_events.read() {
        cue_events.write(SfxCueEvent {
            cue: SfxCue::Splash,
            volume: if event.into_water { 1.0 } else { 0.7 },
        });
    }
    for _ in left_road_events.read() {
        cue_events.write(SfxCueEvent {
            cue: SfxCue::OffRoad,
            volume: 0.6,
        });
    }
    for _ in turbo_events.read() {
        cue_events.write(SfxCueEvent::new(SfxCue::Turbo));
    }
}

fn play_cue_events(
    mut commands: Commands,
    config: Res<GameConfig>,
    asset_server: Res<AssetServer>,
    mut cache: ResMut<SfxHandleCache>,
    mut cue_events: MessageReader<SfxCueEvent>,
) {
    let sfx = &config.game.sfx;
    if !sfx.enabled {
        cue_events.clear();
        return;
    }

    for event in cue_events.read() {
        let path = event.cue.asset_path();
        let handle = cache
            .handles_by_path
            .entry(path)
            .or_insert_with(|| asset_server.load(path))
            .clone();

        commands.spawn((
            Name::new(format!("Sfx/{:?}", event.cue)),
            AudioPlayer::new(handle),
            PlaybackSettings::DESPAWN.with_volume(Volume::Linear(
                (sfx.master_volume * sfx.cue_volume * event.volume).max(0.0),
            )),
        ));
    }
}

fn ensure_engine_loop_audio(
    mut commands: Commands,
    config: Res<GameConfig>,
    asset_server: Res<AssetServer>,
    mut cache: ResMut<SfxHandleCache>,
    existing_query: Query<Entity, With<EngineLoopAudio>>,
) {
    if !config.game.sfx.enabled {
        for entity in &existing_query {
            commands.entity(entity).try_despawn();
        }
        return;
    }

    if !existing_query.is_empty() {
        return;
    }

    let handle = cache
        .handles_by_path
        .entry("audio/engine_loop.wav")
        .or_insert_with(|| asset_server.load("audio/engine_loop.wav"))
        .clone();

    commands.spawn((
        Name::new("SfxEngineLoop"),
        EngineLoopAudio,
        AudioPlayer::new(handle),
        PlaybackSettings::LOOP
            .with_volume(Volume::Linear(0.0))
            .with_speed(ENGINE_PITCH_MIN),
    ));
}

/// Engine loop pitch/volume follow the first human racer's speed.
fn update_engine_loop_audio(
    config: Res<GameConfig>,
    racer_query: Query<(&Racer, &Vehicle, &bevy_rapier2d::prelude::Velocity)>,
    mut engine_query: Query<&mut AudioSink, With<EngineLoopAudio>>,
) {
    let Ok(mut sink) = engine_query.single_mut() else {
        return;
    };

    let mut load = 0.0;
    for (racer, vehicle, velocity) in &racer_query {
        if racer.player_slot == Some(0) {
            let Some(cfg) = config.vehicles_by_id.get(&vehicle.config_id) else {
                continue;
            };
            load = (velocity.linvel.length() / cfg.max_forward_speed.max(0.1)).clamp(0.0, 1.0);
            break;
        }
    }

    let sfx = &config.game.sfx;
    sink.set_speed(ENGINE_PITCH_MIN + ENGINE_PITCH_SPAN * load);
    sink.set_volume(Volume::Linear(
        (sfx.master_volume * sfx.engine_volume * (0.35 + 0.65 * load)).max(0.0),
    ));
}

fn cleanup_sfx_entities(
    mut commands: Commands,
    mut drift_state: ResMut<DriftCueState>,
    engine_query: Query<Entity, With<EngineLoopAudio>>,
) {
    for entity in &engine_query {
        commands.entity(entity).try_despawn();
    }
    drift_state.drifting_wheels.clear();
    drift_state.ice_drifting_racers.clear();
}
