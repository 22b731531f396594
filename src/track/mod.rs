use crate::config::{GameConfig, SurfaceConfig};
use crate::states::GameState;
use bevy::prelude::*;
use bevy_rapier2d::prelude::*;
use std::collections::HashMap;

pub const GROUP_RACER: Group = Group::GROUP_1;
pub const GROUP_WHEEL: Group = Group::GROUP_2;
pub const GROUP_TRACK: Group = Group::GROUP_3;
pub const GROUP_PROJECTILE: Group = Group::GROUP_4;
pub const GROUP_PICKUP: Group = Group::GROUP_5;

/// Distance (in track widths) beyond which a point no longer maps onto the lap table.
const OFF_TRACK_TOLERANCE_WIDTHS: f32 = 1.75;
const GRID_FIRST_SLOT_BEHIND_M: f32 = 6.0;
const GRID_SLOT_SPACING_M: f32 = 3.2;
const ZONE_Z: f32 = 0.2;
const BORDER_Z: f32 = 0.4;

pub struct TrackPlugin;

impl Plugin for TrackPlugin {
    fn build(&self, app: &mut App) {
        app.add_systems(
            Update,
            rebuild_track_layout.run_if(resource_exists::<GameConfig>),
        )
        .add_systems(
            OnEnter(GameState::InRace),
            spawn_track_scene.run_if(resource_exists::<TrackLayout>),
        )
        // Pause keeps the scene; the race is only torn down for the results
        // screen.
        .add_systems(OnEnter(GameState::Results), cleanup_track_scene);
    }
}

/// Section id plus distance along the lap, as resolved from a world position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LapPosition {
    pub section: usize,
    pub distance_m: f32,
}

#[derive(Debug, Clone)]
struct SurfaceZone {
    surface: String,
    shape: ZoneShape,
}

#[derive(Debug, Clone, Copy)]
enum ZoneShape {
    Circle { center: Vec2, radius: f32 },
    Rect { center: Vec2, half_extents: Vec2 },
}

impl ZoneShape {
    fn contains(&self, point: Vec2) -> bool {
        match self {
            Self::Circle { center, radius } => point.distance_squared(*center) <= radius * radius,
            Self::Rect {
                center,
                half_extents,
            } => {
                let delta = (point - *center).abs();
                delta.x <= half_extents.x && delta.y <= half_extents.y
            }
        }
    }
}

#[derive(Resource, Debug, Clone)]
pub struct TrackLayout {
    pub id: String,
    pub name: String,
    pub total_laps: u32,
    pub width_m: f32,
    pub lap_length_m: f32,
    waypoints: Vec<Vec2>,
    cumulative_m: Vec<f32>,
    zones: Vec<SurfaceZone>,
    surfaces_by_id: HashMap<String, SurfaceConfig>,
    pickup_spots: Vec<Vec2>,
}

impl TrackLayout {
    pub fn from_config(config: &GameConfig) -> Self {
        let waypoints: Vec<Vec2> = config
            .track
            .waypoints
            .iter()
            .map(|point| Vec2::new(point[0], point[1]))
            .collect();

        let mut cumulative_m = Vec::with_capacity(waypoints.len() + 1);
        let mut total = 0.0;
        cumulative_m.push(0.0);
        for index in 0..waypoints.len() {
            let next = waypoints[(index + 1) % waypoints.len()];
            total += waypoints[index].distance(next);
            cumulative_m.push(total);
        }

        let zones = config
            .track
            .zones
            .iter()
            .map(|zone| SurfaceZone {
                surface: zone.surface.clone(),
                shape: match zone.shape.as_str() {
                    "circle" => ZoneShape::Circle {
                        center: Vec2::new(zone.x, zone.y),
                        radius: zone.radius,
                    },
                    _ => ZoneShape::Rect {
                        center: Vec2::new(zone.x, zone.y),
                        half_extents: Vec2::new(zone.width * 0.5, zone.height * 0.5),
                    },
                },
            })
            .collect();

        Self {
            id: config.track.metadata.id.clone(),
            name: config.track.metadata.name.clone(),
            total_laps: config.track.metadata.total_laps,
            width_m: config.track.metadata.width_m,
            lap_length_m: total,
            waypoints,
            cumulative_m,
            zones,
            surfaces_by_id: config.surfaces_by_id.clone(),
            pickup_spots: config
                .track
                .pickup_spots
                .iter()
                .map(|point| Vec2::new(point[0], point[1]))
                .collect(),
        }
    }

    pub fn surface(&self, id: &str) -> &SurfaceConfig {
        self.surfaces_by_id
            .get(id)
            .unwrap_or_else(|| panic!("surface id `{id}` validated at config load"))
    }

    pub fn air_surface(&self) -> &SurfaceConfig {
        self.surface("air")
    }

    /// Surface under a world position; the first matching zone wins, road is the default.
    pub fn material_at(&self, point: Vec2) -> &SurfaceConfig {
        for zone in &self.zones {
            if zone.shape.contains(point) {
                return self.surface(&zone.surface);
            }
        }
        self.surface("road")
    }

    pub fn pickup_spots(&self) -> &[Vec2] {
        &self.pickup_spots
    }

    pub fn waypoints(&self) -> &[Vec2] {
        &self.waypoints
    }

    /// Projects a world position onto the lap polyline. Returns `None` when the
    /// point is too far off the track to resolve a lap position.
    pub fn lap_position_at(&self, point: Vec2) -> Option<LapPosition> {
        let tolerance = self.width_m * OFF_TRACK_TOLERANCE_WIDTHS;
        let mut best: Option<(f32, LapPosition)> = None;

        for section in 0..self.waypoints.len() {
            let start = self.waypoints[section];
            let end = self.waypoints[(section + 1) % self.waypoints.len()];
            let segment = end - start;
            let length_sq = segment.length_squared();
            if length_sq <= f32::EPSILON {
                continue;
            }

            let t = ((point - start).dot(segment) / length_sq).clamp(0.0, 1.0);
            let closest = start + segment * t;
            let distance_to_segment = point.distance(closest);
            if distance_to_segment > tolerance {
                continue;
            }

            let lap_distance = self.cumulative_m[section] + segment.length() * t;
            if best
                .map(|(best_distance, _)| distance_to_segment < best_distance)
                .unwrap_or(true)
            {
                best = Some((
                    distance_to_segment,
                    LapPosition {
                        section,
                        distance_m: lap_distance,
                    },
                ));
            }
        }

        best.map(|(_, lap_position)| lap_position)
    }

    /// Track-center point at a lap distance (wraps around the lap).
    pub fn point_at_distance(&self, distance_m: f32) -> Vec2 {
        let wrapped = distance_m.rem_euclid(self.lap_length_m.max(f32::EPSILON));
        for section in 0..self.waypoints.len() {
            let section_start = self.cumulative_m[section];
            let section_end = self.cumulative_m[section + 1];
            if wrapped <= section_end || section == self.waypoints.len() - 1 {
                let start = self.waypoints[section];
                let end = self.waypoints[(section + 1) % self.waypoints.len()];
                let section_length = (section_end - section_start).max(f32::EPSILON);
                let t = ((wrapped - section_start) / section_length).clamp(0.0, 1.0);
                return start.lerp(end, t);
            }
        }
        self.waypoints[0]
    }

    /// Direction of travel at a lap distance.
    pub fn direction_at_distance(&self, distance_m: f32) -> Vec2 {
        let wrapped = distance_m.rem_euclid(self.lap_length_m.max(f32::EPSILON));
        for section in 0..self.waypoints.len() {
            if wrapped <= self.cumulative_m[section + 1] || section == self.waypoints.len() - 1 {
                let start = self.waypoints[section];
                let end = self.waypoints[(section + 1) % self.waypoints.len()];
                return (end - start).normalize_or_zero();
            }
        }
        Vec2::X
    }

    /// The next waypoint strictly ahead of a lap distance, skipping at least
    /// `lookahead_m` so pursuit never aims at a point under the vehicle.
    pub fn next_waypoint_after(&self, distance_m: f32, lookahead_m: f32) -> Vec2 {
        let target = (distance_m + lookahead_m).rem_euclid(self.lap_length_m.max(f32::EPSILON));
        for section in 0..self.waypoints.len() {
            if self.cumulative_m[section + 1] >= target {
                return self.waypoints[(section + 1) % self.waypoints.len()];
            }
        }
        self.waypoints[0]
    }

    /// Drop point used by hazard recovery: track center at the racer's current
    /// lap distance, plus the heading there.
    pub fn nearest_valid_position(&self, point: Vec2, distance_hint_m: f32) -> (Vec2, f32) {
        let distance = self
            .lap_position_at(point)
            .map(|lap_position| lap_position.distance_m)
            .unwrap_or(distance_hint_m);
        let center = self.point_at_distance(distance);
        let direction = self.direction_at_distance(distance);
        (center, direction.y.atan2(direction.x))
    }

    /// Staggered start-grid slot behind the start line, facing the travel direction.
    pub fn start_grid_slot(&self, index: usize) -> (Vec2, f32) {
        let behind = GRID_FIRST_SLOT_BEHIND_M + index as f32 * GRID_SLOT_SPACING_M;
        let distance = (self.lap_length_m - behind).rem_euclid(self.lap_length_m);
        let center = self.point_at_distance(distance);
        let direction = self.direction_at_distance(distance);
        let side = if index % 2 == 0 { 1.0 } else { -1.0 };
        let lateral = direction.perp() * (side * self.width_m * 0.22);
        (center + lateral, direction.y.atan2(direction.x))
    }

    /// Inner and outer border polylines at half the track width, for static colliders.
    pub fn border_polylines(&self) -> (Vec<Vec2>, Vec<Vec2>) {
        let half_width = self.width_m * 0.5;
        let mut inner = Vec::with_capacity(self.waypoints.len() + 1);
        let mut outer = Vec::with_capacity(self.waypoints.len() + 1);

        for index in 0..self.waypoints.len() {
            let previous = self.waypoints[(index + self.waypoints.len() - 1) % self.waypoints.len()];
            let current = self.waypoints[index];
            let next = self.waypoints[(index + 1) % self.waypoints.len()];
            let normal = ((current - previous).normalize_or_zero()
                + (next - current).normalize_or_zero())
            .normalize_or_zero()
            .perp();
            inner.push(current + normal * half_width);
            outer.push(current - normal * half_width);
        }

        // Close both loops.
        if let Some(first) = inner.first().copied() {
            inner.push(first);
        }
        if let Some(first) = outer.first().copied() {
            outer.push(first);
        }
        (inner, outer)
    }
}

fn rebuild_track_layout(
    mut commands: Commands,
    config: Res<GameConfig>,
    layout: Option<Res<TrackLayout>>,
) {
    if layout.is_some() && !config.is_changed() {
        return;
    }

    let layout = TrackLayout::from_config(&config);
    info!(
        "Track `{}` ready: lap length {:.1} m, {} zones, {} pickup spots.",
        layout.id,
        layout.lap_length_m,
        layout.zones.len(),
        layout.pickup_spots.len()
    );
    commands.insert_resource(layout);
}

#[derive(Component)]
struct TrackScene;

fn spawn_track_scene(
    mut commands: Commands,
    layout: Res<TrackLayout>,
    existing: Query<Entity, With<TrackScene>>,
) {
    if !existing.is_empty() {
        return;
    }

    let root = commands
        .spawn((
            Name::new("TrackScene"),
            TrackScene,
            Transform::default(),
            GlobalTransform::default(),
            Visibility::Inherited,
            InheritedVisibility::VISIBLE,
            ViewVisibility::default(),
        ))
        .id();

    let (inner, outer) = layout.border_polylines();
    commands.entity(root).with_children(|parent| {
        for (label, polyline) in [("TrackBorderInner", inner), ("TrackBorderOuter", outer)] {
            parent.spawn((
                Name::new(label),
                RigidBody::Fixed,
                Collider::polyline(polyline, None),
                CollisionGroups::new(GROUP_TRACK, Group::ALL),
                Friction::coefficient(0.4),
                Restitution::coefficient(0.3),
                Transform::from_xyz(0.0, 0.0, BORDER_Z),
            ));
        }

        for (index, zone) in layout.zones.iter().enumerate() {
            let surface = layout.surface(&zone.surface);
            let color = zone_color(surface);
            match zone.shape {
                ZoneShape::Rect {
                    center,
                    half_extents,
                } => {
                    parent.spawn((
                        Name::new(format!("SurfaceZone/{}/{index}", zone.surface)),
                        Sprite::from_color(color, half_extents * 2.0),
                        Transform::from_xyz(center.x, center.y, ZONE_Z),
                    ));
                }
                ZoneShape::Circle { center, radius } => {
                    parent.spawn((
                        Name::new(format!("SurfaceZone/{}/{index}", zone.surface)),
                        Sprite::from_color(color, Vec2::splat(radius * 2.0)),
                        Transform::from_xyz(center.x, center.y, ZONE_Z),
                    ));
                }
            }
        }
    });
}

fn cleanup_track_scene(mut commands: Commands, scene_query: Query<Entity, With<TrackScene>>) {
    for entity in &scene_query {
        commands.entity(entity).despawn();
    }
}

fn zone_color(surface: &SurfaceConfig) -> Color {
    if surface.is_hole && surface.is_water {
        Color::srgba(0.16, 0.33, 0.62, 0.9)
    } else if surface.is_hole {
        Color::srgba(0.05, 0.05, 0.07, 0.95)
    } else if surface.is_turbo {
        Color::srgba(0.95, 0.62, 0.12, 0.9)
    } else if surface.id == "ice" {
        Color::srgba(0.72, 0.86, 0.95, 0.85)
    } else if !surface.is_road {
        Color::srgba(0.76, 0.66, 0.42, 0.9)
    } else {
        Color::srgba(0.32, 0.32, 0.36, 0.9)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::minimal_config;
    use crate::config::SurfaceZoneConfig;

    fn rectangle_layout() -> TrackLayout {
        // 40 x 30 rectangle: lap length 140, start line at (0, 0) heading +X.
        TrackLayout::from_config(&minimal_config())
    }

    #[test]
    fn lap_length_matches_polyline() {
        let layout = rectangle_layout();
        assert!((layout.lap_length_m - 140.0).abs() < 1e-3);
    }

    #[test]
    fn lap_position_projects_onto_nearest_section() {
        let layout = rectangle_layout();

        let on_first_leg = layout
            .lap_position_at(Vec2::new(10.0, 1.0))
            .expect("point near the first leg resolves");
        assert_eq!(on_first_leg.section, 0);
        assert!((on_first_leg.distance_m - 10.0).abs() < 1e-3);

        let on_second_leg = layout
            .lap_position_at(Vec2::new(41.0, 15.0))
            .expect("point near the second leg resolves");
        assert_eq!(on_second_leg.section, 1);
        assert!((on_second_leg.distance_m - 55.0).abs() < 1e-3);
    }

    #[test]
    fn lap_position_rejects_far_off_track_points() {
        let layout = rectangle_layout();
        assert!(layout.lap_position_at(Vec2::new(500.0, 500.0)).is_none());
    }

    #[test]
    fn point_at_distance_wraps_the_lap() {
        let layout = rectangle_layout();
        let start = layout.point_at_distance(0.0);
        let wrapped = layout.point_at_distance(layout.lap_length_m);
        assert!(start.distance(wrapped) < 1e-3);
    }

    #[test]
    fn material_defaults_to_road_outside_zones() {
        let layout = rectangle_layout();
        assert_eq!(layout.material_at(Vec2::new(10.0, 0.0)).id, "road");
    }

    #[test]
    fn material_resolves_first_matching_zone() {
        let mut config = minimal_config();
        config.surfaces.surfaces.push(SurfaceConfig {
            id: "water_hole".to_string(),
            grip: 0.0,
            ground_speed_factor: 0.0,
            is_road: false,
            is_hole: true,
            is_water: true,
            allows_drift: false,
            is_turbo: false,
        });
        config.surfaces_by_id.insert(
            "water_hole".to_string(),
            config.surfaces.surfaces.last().unwrap().clone(),
        );
        config.track.zones.push(SurfaceZoneConfig {
            surface: "water_hole".to_string(),
            shape: "circle".to_string(),
            x: 20.0,
            y: 0.0,
            radius: 2.0,
            width: 0.0,
            height: 0.0,
        });

        let layout = TrackLayout::from_config(&config);
        assert!(layout.material_at(Vec2::new(20.5, 0.5)).is_hole);
        assert_eq!(layout.material_at(Vec2::new(30.0, 0.0)).id, "road");
    }

    #[test]
    fn nearest_valid_position_returns_track_center() {
        let layout = rectangle_layout();
        let (drop_point, heading) = layout.nearest_valid_position(Vec2::new(10.0, 2.5), 0.0);
        assert!(drop_point.distance(Vec2::new(10.0, 0.0)) < 1e-3);
        assert!(heading.abs() < 1e-3);
    }

    #[test]
    fn start_grid_slots_sit_behind_the_line_and_alternate_sides() {
        let layout = rectangle_layout();
        let (first, _) = layout.start_grid_slot(0);
        let (second, _) = layout.start_grid_slot(1);

        let first_lap = layout.lap_position_at(first).expect("slot 0 on track");
        let second_lap = layout.lap_position_at(second).expect("slot 1 on track");
        assert!(first_lap.distance_m > layout.lap_length_m * 0.5);
        assert!(second_lap.distance_m < first_lap.distance_m);

        // Opposite lateral offsets (the closing leg runs along x = 0).
        assert!(first.x * second.x < 0.0);
    }
}
