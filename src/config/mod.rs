#![allow(dead_code)]

use bevy::prelude::*;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::HashMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::fs;
use std::path::{Path, PathBuf};

const CONFIG_DIR: &str = "config";

pub struct ConfigPlugin;

impl Plugin for ConfigPlugin {
    fn build(&self, app: &mut App) {
        app.add_systems(Startup, load_game_config)
            .add_systems(Update, reload_game_config_hotkey);
    }
}

fn load_game_config(mut commands: Commands) {
    let config = GameConfig::load_from_dir(Path::new(CONFIG_DIR)).unwrap_or_else(|error| {
        panic!("failed to load configuration from `{CONFIG_DIR}`: {error}");
    });

    log_config_summary("Loaded", &config);
    info!("Press F5 to hot-reload config files from `{CONFIG_DIR}`.");

    commands.insert_resource(config);
}

fn reload_game_config_hotkey(
    keyboard: Res<ButtonInput<KeyCode>>,
    game_config: Option<ResMut<GameConfig>>,
) {
    if !keyboard.just_pressed(KeyCode::F5) {
        return;
    }

    let Some(mut current_config) = game_config else {
        warn!("Config hot-reload requested, but `GameConfig` resource is not initialized yet.");
        return;
    };

    match GameConfig::load_from_dir(Path::new(CONFIG_DIR)) {
        Ok(new_config) => {
            *current_config = new_config;
            log_config_summary("Hot-reloaded", &current_config);
        }
        Err(error) => {
            error!("Config hot-reload failed; keeping previous config: {error}");
        }
    }
}

fn log_config_summary(prefix: &str, config: &GameConfig) {
    info!(
        "{prefix} config: {} vehicles, {} surfaces, {} bonus pools, track `{}` ({} waypoints, {} laps).",
        config.vehicles_by_id.len(),
        config.surfaces_by_id.len(),
        config.bonuses.pools.len(),
        config.track.metadata.id,
        config.track.waypoints.len(),
        config.track.metadata.total_laps
    );
}

#[derive(Resource, Debug, Clone)]
pub struct GameConfig {
    pub game: GameFile,
    pub vehicles: VehiclesFile,
    pub surfaces: SurfacesFile,
    pub bonuses: BonusesFile,
    pub ai: AiFile,
    pub track: TrackFile,
    pub vehicles_by_id: HashMap<String, VehicleConfig>,
    pub surfaces_by_id: HashMap<String, SurfaceConfig>,
}

impl GameConfig {
    pub fn load_from_dir(config_dir: &Path) -> Result<Self, ConfigError> {
        let game: GameFile = read_toml(&config_dir.join("game.toml"))?;
        let vehicles: VehiclesFile = read_toml(&config_dir.join("vehicles.toml"))?;
        let surfaces: SurfacesFile = read_toml(&config_dir.join("surfaces.toml"))?;
        let bonuses: BonusesFile = read_toml(&config_dir.join("bonuses.toml"))?;
        let ai: AiFile = read_toml(&config_dir.join("ai.toml"))?;
        let track: TrackFile = read_toml(
            &config_dir
                .join("tracks")
                .join(format!("{}.toml", game.app.default_track)),
        )?;

        let config = Self {
            vehicles_by_id: to_index("vehicles.toml::vehicles", &vehicles.vehicles)?,
            surfaces_by_id: to_index("surfaces.toml::surfaces", &surfaces.surfaces)?,
            game,
            vehicles,
            surfaces,
            bonuses,
            ai,
            track,
        };

        config.validate_references()?;
        Ok(config)
    }

    pub fn default_vehicle(&self) -> &VehicleConfig {
        self.vehicles_by_id
            .get(&self.game.app.default_vehicle)
            .expect("default vehicle id validated at load time")
    }

    fn validate_references(&self) -> Result<(), ConfigError> {
        let app = &self.game.app;
        if !self.vehicles_by_id.contains_key(&app.default_vehicle) {
            return Err(ConfigError::Validation(format!(
                "game.toml::app.default_vehicle references unknown vehicle id `{}`",
                app.default_vehicle
            )));
        }
        if app.fixed_timestep_hz <= 0.0 {
            return Err(ConfigError::Validation(
                "game.toml::app.fixed_timestep_hz must be > 0".to_string(),
            ));
        }
        if app.velocity_iterations == 0 || app.position_iterations == 0 {
            return Err(ConfigError::Validation(
                "game.toml::app solver iteration counts must be >= 1".to_string(),
            ));
        }
        if app.racer_count == 0 {
            return Err(ConfigError::Validation(
                "game.toml::app.racer_count must be >= 1".to_string(),
            ));
        }
        if app.player_slots == 0 || app.player_slots > app.racer_count {
            return Err(ConfigError::Validation(
                "game.toml::app.player_slots must be in 1..=racer_count".to_string(),
            ));
        }
        if app.countdown_seconds < 0.0 {
            return Err(ConfigError::Validation(
                "game.toml::app.countdown_seconds must be >= 0".to_string(),
            ));
        }

        for required in ["road", "air"] {
            if !self.surfaces_by_id.contains_key(required) {
                return Err(ConfigError::Validation(format!(
                    "surfaces.toml::surfaces must define the builtin surface id `{required}`"
                )));
            }
        }

        for (index, surface) in self.surfaces.surfaces.iter().enumerate() {
            if surface.grip < 0.0 {
                return Err(ConfigError::Validation(format!(
                    "surfaces.toml::surfaces[{index}].grip must be >= 0"
                )));
            }
            if surface.ground_speed_factor < 0.0 {
                return Err(ConfigError::Validation(format!(
                    "surfaces.toml::surfaces[{index}].ground_speed_factor must be >= 0"
                )));
            }
            if surface.is_hole && surface.is_road {
                return Err(ConfigError::Validation(format!(
                    "surfaces.toml::surfaces[{index}] cannot be both hole and road"
                )));
            }
        }

        for (index, vehicle) in self.vehicles.vehicles.iter().enumerate() {
            if vehicle.max_forward_speed <= 0.0 {
                return Err(ConfigError::Validation(format!(
                    "vehicles.toml::vehicles[{index}].max_forward_speed must be > 0"
                )));
            }
            if vehicle.acceleration <= 0.0 {
                return Err(ConfigError::Validation(format!(
                    "vehicles.toml::vehicles[{index}].acceleration must be > 0"
                )));
            }
            if vehicle.brake_strength <= 0.0 {
                return Err(ConfigError::Validation(format!(
                    "vehicles.toml::vehicles[{index}].brake_strength must be > 0"
                )));
            }
            if vehicle.wheel_base_m <= 0.0 || vehicle.wheel_track_m <= 0.0 {
                return Err(ConfigError::Validation(format!(
                    "vehicles.toml::vehicles[{index}] wheel_base_m and wheel_track_m must be > 0"
                )));
            }
            if vehicle.low_speed_threshold_mps <= 0.0
                || vehicle.low_speed_threshold_mps >= vehicle.max_forward_speed
            {
                return Err(ConfigError::Validation(format!(
                    "vehicles.toml::vehicles[{index}].low_speed_threshold_mps must be in (0, max_forward_speed)"
                )));
            }
            if vehicle.full_lock_deg <= 0.0 || vehicle.full_lock_deg > 80.0 {
                return Err(ConfigError::Validation(format!(
                    "vehicles.toml::vehicles[{index}].full_lock_deg must be in (0, 80]"
                )));
            }
            if vehicle.high_speed_lock_deg <= 0.0
                || vehicle.high_speed_lock_deg > vehicle.full_lock_deg
            {
                return Err(ConfigError::Validation(format!(
                    "vehicles.toml::vehicles[{index}].high_speed_lock_deg must be in (0, full_lock_deg]"
                )));
            }
            if vehicle.over_max_lock_deg <= 0.0
                || vehicle.over_max_lock_deg > vehicle.high_speed_lock_deg
            {
                return Err(ConfigError::Validation(format!(
                    "vehicles.toml::vehicles[{index}].over_max_lock_deg must be in (0, high_speed_lock_deg]"
                )));
            }
            if vehicle.max_lateral_impulse <= 0.0 {
                return Err(ConfigError::Validation(format!(
                    "vehicles.toml::vehicles[{index}].max_lateral_impulse must be > 0"
                )));
            }
            if !(0.0..=1.0).contains(&vehicle.braking_lateral_cap_factor) {
                return Err(ConfigError::Validation(format!(
                    "vehicles.toml::vehicles[{index}].braking_lateral_cap_factor must be in [0, 1]"
                )));
            }
            if !(0.0..=1.0).contains(&vehicle.drift_clamp_factor) {
                return Err(ConfigError::Validation(format!(
                    "vehicles.toml::vehicles[{index}].drift_clamp_factor must be in [0, 1]"
                )));
            }
            if vehicle.turbo_duration_s <= 0.0 {
                return Err(ConfigError::Validation(format!(
                    "vehicles.toml::vehicles[{index}].turbo_duration_s must be > 0"
                )));
            }
            if vehicle.skid_interval_s <= 0.0 {
                return Err(ConfigError::Validation(format!(
                    "vehicles.toml::vehicles[{index}].skid_interval_s must be > 0"
                )));
            }
        }

        let mut seen_kinds = Vec::new();
        for (index, pool) in self.bonuses.pools.iter().enumerate() {
            if !matches!(pool.kind.as_str(), "gun" | "mines" | "turbo" | "missile") {
                return Err(ConfigError::Validation(format!(
                    "bonuses.toml::pools[{index}].kind `{}` is unsupported (expected gun/mines/turbo/missile)",
                    pool.kind
                )));
            }
            if seen_kinds.contains(&pool.kind) {
                return Err(ConfigError::Validation(format!(
                    "bonuses.toml::pools contains duplicate kind `{}`",
                    pool.kind
                )));
            }
            seen_kinds.push(pool.kind.clone());
            if pool.weights.iter().any(|weight| *weight < 0.0) {
                return Err(ConfigError::Validation(format!(
                    "bonuses.toml::pools[{index}].weights must all be >= 0"
                )));
            }
            if pool.pool_capacity == 0 {
                return Err(ConfigError::Validation(format!(
                    "bonuses.toml::pools[{index}].pool_capacity must be >= 1"
                )));
            }
            if pool.kind == "gun" && pool.burst_count == 0 {
                return Err(ConfigError::Validation(format!(
                    "bonuses.toml::pools[{index}] gun pools require burst_count >= 1"
                )));
            }
            if pool.projectile_speed < 0.0 || pool.projectile_lifetime_s < 0.0 {
                return Err(ConfigError::Validation(format!(
                    "bonuses.toml::pools[{index}] projectile speed/lifetime must be >= 0"
                )));
            }
        }

        let ai = &self.ai.ai;
        if ai.waypoint_lookahead_m <= 0.0 {
            return Err(ConfigError::Validation(
                "ai.toml::ai.waypoint_lookahead_m must be > 0".to_string(),
            ));
        }
        if ai.blocked_speed_mps <= 0.0 || ai.blocked_after_s <= 0.0 || ai.reverse_duration_s <= 0.0
        {
            return Err(ConfigError::Validation(
                "ai.toml::ai blocked/reverse thresholds must be > 0".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&ai.rank_limiter_min_factor) {
            return Err(ConfigError::Validation(
                "ai.toml::ai.rank_limiter_min_factor must be in [0, 1]".to_string(),
            ));
        }

        let metadata = &self.track.metadata;
        if metadata.id != app.default_track {
            return Err(ConfigError::Validation(format!(
                "tracks/{}.toml::metadata.id `{}` does not match the file name",
                app.default_track, metadata.id
            )));
        }
        if metadata.total_laps == 0 {
            return Err(ConfigError::Validation(
                "track metadata.total_laps must be >= 1".to_string(),
            ));
        }
        if metadata.width_m <= 0.0 {
            return Err(ConfigError::Validation(
                "track metadata.width_m must be > 0".to_string(),
            ));
        }
        if self.track.waypoints.len() < 3 {
            return Err(ConfigError::Validation(
                "track waypoints must contain at least 3 points".to_string(),
            ));
        }
        for (index, zone) in self.track.zones.iter().enumerate() {
            if !self.surfaces_by_id.contains_key(&zone.surface) {
                return Err(ConfigError::Validation(format!(
                    "track zones[{index}].surface references unknown surface id `{}`",
                    zone.surface
                )));
            }
            match zone.shape.as_str() {
                "circle" => {
                    if zone.radius <= 0.0 {
                        return Err(ConfigError::Validation(format!(
                            "track zones[{index}] circle radius must be > 0"
                        )));
                    }
                }
                "rect" => {
                    if zone.width <= 0.0 || zone.height <= 0.0 {
                        return Err(ConfigError::Validation(format!(
                            "track zones[{index}] rect width/height must be > 0"
                        )));
                    }
                }
                other => {
                    return Err(ConfigError::Validation(format!(
                        "track zones[{index}].shape `{other}` is unsupported (expected circle/rect)"
                    )));
                }
            }
        }

        let hazard = &self.game.hazard;
        if hazard.fall_depth_s <= 0.0
            || hazard.lift_duration_s <= 0.0
            || hazard.drop_duration_s <= 0.0
        {
            return Err(ConfigError::Validation(
                "game.toml::hazard durations must be > 0".to_string(),
            ));
        }
        if hazard.recover_speed_mps <= 0.0 {
            return Err(ConfigError::Validation(
                "game.toml::hazard.recover_speed_mps must be > 0".to_string(),
            ));
        }

        let collisions = &self.game.collisions;
        if collisions.bump_min_closing_speed_mps < 0.0 || collisions.bump_impulse_scale < 0.0 {
            return Err(ConfigError::Validation(
                "game.toml::collisions bump tuning must be >= 0".to_string(),
            ));
        }

        Ok(())
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse {
        path: PathBuf,
        source: Box<toml::de::Error>,
    },
    Validation(String),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { path, source } => {
                write!(f, "failed to read `{}`: {source}", path.display())
            }
            Self::Parse { path, source } => {
                write!(f, "failed to parse `{}`: {source}", path.display())
            }
            Self::Validation(message) => write!(f, "{message}"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Parse { source, .. } => Some(source),
            Self::Validation(_) => None,
        }
    }
}

fn read_toml<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&raw).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source: Box::new(source),
    })
}

fn to_index<T>(label: &str, rows: &[T]) -> Result<HashMap<String, T>, ConfigError>
where
    T: HasId + Clone,
{
    let mut map = HashMap::new();

    for row in rows {
        let id = row.id();
        if id.trim().is_empty() {
            return Err(ConfigError::Validation(format!(
                "{label} contains an empty id"
            )));
        }

        if map.insert(id.to_string(), row.clone()).is_some() {
            return Err(ConfigError::Validation(format!(
                "{label} contains duplicate id `{id}`"
            )));
        }
    }

    Ok(map)
}

trait HasId {
    fn id(&self) -> &str;
}

#[derive(Debug, Clone, Deserialize)]
pub struct GameFile {
    pub app: AppConfig,
    pub collisions: CollisionConfig,
    pub hazard: HazardConfig,
    pub sfx: SfxConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub fixed_timestep_hz: f32,
    pub velocity_iterations: u32,
    pub position_iterations: u32,
    pub countdown_seconds: f32,
    pub default_track: String,
    pub default_vehicle: String,
    pub racer_count: u32,
    pub player_slots: u32,
    pub debug_overlay: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CollisionConfig {
    pub bump_min_closing_speed_mps: f32,
    pub bump_impulse_scale: f32,
    pub bump_radius_m: f32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HazardConfig {
    pub fall_depth_s: f32,
    pub lift_duration_s: f32,
    pub drop_duration_s: f32,
    pub recover_speed_mps: f32,
    pub recover_turn_rate_rad_s: f32,
    pub drop_tolerance_m: f32,
    pub drop_tolerance_rad: f32,
    pub sink_rate_mps: f32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SfxConfig {
    pub enabled: bool,
    pub master_volume: f32,
    pub engine_volume: f32,
    pub cue_volume: f32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VehiclesFile {
    pub vehicles: Vec<VehicleConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VehicleConfig {
    pub id: String,
    pub chassis_half_extents: [f32; 2],
    pub chassis_density: f32,
    pub wheel_half_extents: [f32; 2],
    pub wheel_density: f32,
    pub wheel_base_m: f32,
    pub wheel_track_m: f32,
    pub max_forward_speed: f32,
    pub acceleration: f32,
    pub brake_strength: f32,
    pub full_lock_deg: f32,
    pub high_speed_lock_deg: f32,
    pub over_max_lock_deg: f32,
    pub low_speed_threshold_mps: f32,
    pub max_lateral_impulse: f32,
    pub braking_lateral_cap_factor: f32,
    pub drift_clamp_factor: f32,
    #[serde(default = "default_true")]
    pub allow_drift: bool,
    pub skid_interval_s: f32,
    pub skid_life_s: f32,
    pub rolling_drag: f32,
    pub angular_damping_factor: f32,
    pub turbo_force: f32,
    pub turbo_impulse: f32,
    pub turbo_duration_s: f32,
    pub offroad_drag: f32,
    pub stop_damping: f32,
    #[serde(default = "default_ice_drift_slip_mps")]
    pub ice_drift_slip_mps: f32,
    #[serde(default = "default_spin_duration_s")]
    pub spin_duration_s: f32,
    #[serde(default = "default_spin_rate_rad_s")]
    pub spin_rate_rad_s: f32,
}

fn default_true() -> bool {
    true
}

fn default_ice_drift_slip_mps() -> f32 {
    2.4
}

fn default_spin_duration_s() -> f32 {
    1.6
}

fn default_spin_rate_rad_s() -> f32 {
    9.0
}

impl HasId for VehicleConfig {
    fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SurfacesFile {
    pub surfaces: Vec<SurfaceConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SurfaceConfig {
    pub id: String,
    pub grip: f32,
    pub ground_speed_factor: f32,
    #[serde(default)]
    pub is_road: bool,
    #[serde(default)]
    pub is_hole: bool,
    #[serde(default)]
    pub is_water: bool,
    #[serde(default = "default_true")]
    pub allows_drift: bool,
    #[serde(default)]
    pub is_turbo: bool,
}

impl HasId for SurfaceConfig {
    fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BonusesFile {
    pub pools: Vec<BonusPoolConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BonusPoolConfig {
    pub kind: String,
    pub weights: [f32; 3],
    pub pool_capacity: u32,
    #[serde(default = "default_burst_count")]
    pub burst_count: u32,
    #[serde(default = "default_burst_interval_s")]
    pub burst_interval_s: f32,
    #[serde(default)]
    pub spread_degrees: f32,
    #[serde(default)]
    pub projectile_speed: f32,
    #[serde(default = "default_projectile_lifetime_s")]
    pub projectile_lifetime_s: f32,
    #[serde(default = "default_mine_trail_offset_m")]
    pub mine_trail_offset_m: f32,
    #[serde(default)]
    pub homing_turn_rate_deg_s: f32,
    #[serde(default = "default_lock_cone_deg")]
    pub lock_cone_deg: f32,
    #[serde(default = "default_lock_range_m")]
    pub lock_range_m: f32,
}

fn default_burst_count() -> u32 {
    1
}

fn default_burst_interval_s() -> f32 {
    0.08
}

fn default_projectile_lifetime_s() -> f32 {
    2.5
}

fn default_mine_trail_offset_m() -> f32 {
    1.4
}

fn default_lock_cone_deg() -> f32 {
    60.0
}

fn default_lock_range_m() -> f32 {
    30.0
}

impl HasId for BonusPoolConfig {
    fn id(&self) -> &str {
        &self.kind
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AiFile {
    pub ai: AiConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AiConfig {
    pub waypoint_lookahead_m: f32,
    pub low_speed_steer_rad: f32,
    pub blocked_speed_mps: f32,
    pub blocked_after_s: f32,
    pub reverse_duration_s: f32,
    pub rank_limiter_min_factor: f32,
    pub trigger_range_m: f32,
    pub trigger_cone_deg: f32,
    pub mine_drop_interval_s: f32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrackFile {
    pub metadata: TrackMetadata,
    pub waypoints: Vec<[f32; 2]>,
    #[serde(default)]
    pub zones: Vec<SurfaceZoneConfig>,
    #[serde(default)]
    pub pickup_spots: Vec<[f32; 2]>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrackMetadata {
    pub id: String,
    pub name: String,
    pub total_laps: u32,
    pub width_m: f32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SurfaceZoneConfig {
    pub surface: String,
    pub shape: String,
    pub x: f32,
    pub y: f32,
    #[serde(default)]
    pub radius: f32,
    #[serde(default)]
    pub width: f32,
    #[serde(default)]
    pub height: f32,
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn minimal_config() -> GameConfig {
        let game = GameFile {
            app: AppConfig {
                fixed_timestep_hz: 120.0,
                velocity_iterations: 8,
                position_iterations: 3,
                countdown_seconds: 3.0,
                default_track: "figure_eight".to_string(),
                default_vehicle: "kart".to_string(),
                racer_count: 6,
                player_slots: 1,
                debug_overlay: false,
            },
            collisions: CollisionConfig {
                bump_min_closing_speed_mps: 1.5,
                bump_impulse_scale: 0.6,
                bump_radius_m: 2.0,
            },
            hazard: HazardConfig {
                fall_depth_s: 0.9,
                lift_duration_s: 1.2,
                drop_duration_s: 0.8,
                recover_speed_mps: 14.0,
                recover_turn_rate_rad_s: 4.0,
                drop_tolerance_m: 0.3,
                drop_tolerance_rad: 0.12,
                sink_rate_mps: 1.8,
            },
            sfx: SfxConfig {
                enabled: false,
                master_volume: 1.0,
                engine_volume: 0.6,
                cue_volume: 0.8,
            },
        };
        let vehicles = VehiclesFile {
            vehicles: vec![VehicleConfig {
                id: "kart".to_string(),
                chassis_half_extents: [1.1, 0.6],
                chassis_density: 1.0,
                wheel_half_extents: [0.28, 0.14],
                wheel_density: 0.8,
                wheel_base_m: 1.5,
                wheel_track_m: 1.1,
                max_forward_speed: 24.0,
                acceleration: 9.0,
                brake_strength: 14.0,
                full_lock_deg: 35.0,
                high_speed_lock_deg: 12.0,
                over_max_lock_deg: 8.0,
                low_speed_threshold_mps: 6.0,
                max_lateral_impulse: 2.4,
                braking_lateral_cap_factor: 0.65,
                drift_clamp_factor: 0.92,
                allow_drift: true,
                skid_interval_s: 0.05,
                skid_life_s: 3.0,
                rolling_drag: 0.35,
                angular_damping_factor: 0.12,
                turbo_force: 60.0,
                turbo_impulse: 8.0,
                turbo_duration_s: 1.4,
                offroad_drag: 2.2,
                stop_damping: 9.0,
                ice_drift_slip_mps: 2.4,
                spin_duration_s: 1.6,
                spin_rate_rad_s: 9.0,
            }],
        };
        let surfaces = SurfacesFile {
            surfaces: vec![
                SurfaceConfig {
                    id: "road".to_string(),
                    grip: 1.0,
                    ground_speed_factor: 1.0,
                    is_road: true,
                    is_hole: false,
                    is_water: false,
                    allows_drift: true,
                    is_turbo: false,
                },
                SurfaceConfig {
                    id: "air".to_string(),
                    grip: 0.0,
                    ground_speed_factor: 1.0,
                    is_road: false,
                    is_hole: false,
                    is_water: false,
                    allows_drift: false,
                    is_turbo: false,
                },
            ],
        };
        let bonuses = BonusesFile {
            pools: vec![BonusPoolConfig {
                kind: "turbo".to_string(),
                weights: [0.2, 1.0, 2.0],
                pool_capacity: 4,
                burst_count: 1,
                burst_interval_s: 0.08,
                spread_degrees: 0.0,
                projectile_speed: 0.0,
                projectile_lifetime_s: 2.5,
                mine_trail_offset_m: 1.4,
                homing_turn_rate_deg_s: 0.0,
                lock_cone_deg: 60.0,
                lock_range_m: 30.0,
            }],
        };
        let ai = AiFile {
            ai: AiConfig {
                waypoint_lookahead_m: 6.0,
                low_speed_steer_rad: 0.6,
                blocked_speed_mps: 1.2,
                blocked_after_s: 1.5,
                reverse_duration_s: 1.0,
                rank_limiter_min_factor: 0.82,
                trigger_range_m: 24.0,
                trigger_cone_deg: 40.0,
                mine_drop_interval_s: 3.0,
            },
        };
        let track = TrackFile {
            metadata: TrackMetadata {
                id: "figure_eight".to_string(),
                name: "Figure Eight".to_string(),
                total_laps: 3,
                width_m: 8.0,
            },
            waypoints: vec![[0.0, 0.0], [40.0, 0.0], [40.0, 30.0], [0.0, 30.0]],
            zones: Vec::new(),
            pickup_spots: Vec::new(),
        };

        GameConfig {
            vehicles_by_id: to_index("vehicles", &vehicles.vehicles).unwrap(),
            surfaces_by_id: to_index("surfaces", &surfaces.surfaces).unwrap(),
            game,
            vehicles,
            surfaces,
            bonuses,
            ai,
            track,
        }
    }

    #[test]
    fn minimal_config_passes_validation() {
        minimal_config()
            .validate_references()
            .expect("minimal config should validate");
    }

    #[test]
    fn validation_fails_for_unknown_default_vehicle() {
        let mut config = minimal_config();
        config.game.app.default_vehicle = "missing_kart".to_string();

        let error = config
            .validate_references()
            .expect_err("validation should fail");
        let message = error.to_string();

        assert!(message.contains("default_vehicle"));
        assert!(message.contains("missing_kart"));
    }

    #[test]
    fn validation_fails_for_zone_with_unknown_surface() {
        let mut config = minimal_config();
        config.track.zones.push(SurfaceZoneConfig {
            surface: "lava".to_string(),
            shape: "circle".to_string(),
            x: 0.0,
            y: 0.0,
            radius: 3.0,
            width: 0.0,
            height: 0.0,
        });

        let error = config
            .validate_references()
            .expect_err("validation should fail");
        assert!(error.to_string().contains("lava"));
    }

    #[test]
    fn validation_fails_for_duplicate_bonus_kind() {
        let mut config = minimal_config();
        let duplicate = config.bonuses.pools[0].clone();
        config.bonuses.pools.push(duplicate);

        let error = config
            .validate_references()
            .expect_err("validation should fail");
        assert!(error.to_string().contains("duplicate kind"));
    }

    #[test]
    fn to_index_rejects_duplicate_ids() {
        let rows = vec![
            SurfaceConfig {
                id: "road".to_string(),
                grip: 1.0,
                ground_speed_factor: 1.0,
                is_road: true,
                is_hole: false,
                is_water: false,
                allows_drift: true,
                is_turbo: false,
            };
            2
        ];

        let error = to_index("surfaces", &rows).expect_err("duplicate ids should be rejected");
        assert!(error.to_string().contains("duplicate id `road`"));
    }
}
