use crate::config::GameConfig;
use crate::gameplay::vehicle::Vehicle;
use crate::track::TrackLayout;
use bevy::prelude::*;
use bevy_rapier2d::prelude::*;

/// Skid samples per wheel. The ring is allocated once and never resized;
/// the oldest sample is silently overwritten.
pub const SKID_RING_CAPACITY: usize = 64;

/// One emitted skid-mark sample. `end_marker` terminates a stroke so the
/// renderer does not connect separate drift episodes.
#[derive(Debug, Clone, Copy)]
pub struct SkidSample {
    pub position: Vec2,
    pub heading_rad: f32,
    pub remaining_life_s: f32,
    pub end_marker: bool,
}

#[derive(Debug, Clone)]
pub struct SkidRing {
    samples: Vec<SkidSample>,
    cursor: usize,
}

impl SkidRing {
    pub fn new() -> Self {
        Self {
            samples: Vec::with_capacity(SKID_RING_CAPACITY),
            cursor: 0,
        }
    }

    pub fn push(&mut self, sample: SkidSample) {
        if self.samples.len() < SKID_RING_CAPACITY {
            self.samples.push(sample);
        } else {
            self.samples[self.cursor] = sample;
        }
        self.cursor = (self.cursor + 1) % SKID_RING_CAPACITY;
    }

    pub fn decay(&mut self, dt: f32) {
        for sample in &mut self.samples {
            sample.remaining_life_s = (sample.remaining_life_s - dt).max(0.0);
        }
    }

    pub fn live_count(&self) -> usize {
        self.samples
            .iter()
            .filter(|sample| sample.remaining_life_s > 0.0)
            .count()
    }

    pub fn samples(&self) -> &[SkidSample] {
        &self.samples
    }
}

impl Default for SkidRing {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Component, Debug)]
pub struct Wheel {
    pub vehicle: Entity,
    pub index: usize,
    pub steerable: bool,
    pub hardpoint_local: Vec2,
    pub drifting: bool,
    pub surface_id: String,
    pub grip: f32,
    pub ground_speed_factor: f32,
    /// Written by the vehicle every step, consumed here.
    pub drive_delta: f32,
    pub effective_max_speed: f32,
    pub steer_angle_rad: f32,
    pub skid_ring: SkidRing,
    skid_timer_s: f32,
}

impl Wheel {
    pub fn new(vehicle: Entity, index: usize, steerable: bool, hardpoint_local: Vec2) -> Self {
        Self {
            vehicle,
            index,
            steerable,
            hardpoint_local,
            drifting: false,
            surface_id: "road".to_string(),
            grip: 1.0,
            ground_speed_factor: 1.0,
            drive_delta: 0.0,
            effective_max_speed: 1.0,
            steer_angle_rad: 0.0,
            skid_ring: SkidRing::new(),
            skid_timer_s: 0.0,
        }
    }

    pub fn is_drifting(&self) -> bool {
        self.drifting
    }
}

/// Impulse that would fully cancel the lateral velocity, scaled by grip.
pub fn lateral_cancel_impulse(lateral_velocity: f32, mass: f32, grip: f32) -> f32 {
    -lateral_velocity * mass * grip
}

/// Speed-dependent cap on the lateral friction impulse. Faster wheels hold
/// less lateral grip and braking lowers the cap further.
pub fn max_lateral_impulse(
    base: f32,
    forward_speed: f32,
    max_speed: f32,
    braking: bool,
    braking_cap_factor: f32,
) -> f32 {
    let speed_ratio = (forward_speed.abs() / max_speed.max(f32::EPSILON)).clamp(0.0, 1.0);
    let cap = base * (1.0 - 0.5 * speed_ratio);
    if braking {
        cap * braking_cap_factor
    } else {
        cap
    }
}

/// Converts a throttle/brake delta into a forward force. Acceleration falls
/// off quadratically toward the speed limit; braking is never attenuated.
pub fn drive_force(delta: f32, forward_speed: f32, max_speed: f32) -> f32 {
    if delta <= 0.0 {
        return delta;
    }
    let speed_ratio = (forward_speed / max_speed.max(f32::EPSILON)).clamp(0.0, 1.0);
    delta * (1.0 - speed_ratio * speed_ratio)
}

/// Per-wheel friction/drift/drive pass. Runs after the vehicle-level logic of
/// the same step, for every wheel regardless of vehicle state.
#[allow(clippy::type_complexity)]
pub(crate) fn advance_wheels(
    time: Res<Time>,
    config: Res<GameConfig>,
    layout: Res<TrackLayout>,
    vehicle_query: Query<&Vehicle, Without<Wheel>>,
    mut wheel_query: Query<
        (
            &mut Wheel,
            &Transform,
            &mut Velocity,
            Option<&ReadMassProperties>,
            &mut ExternalForce,
            &mut ExternalImpulse,
        ),
        Without<Vehicle>,
    >,
) {
    let dt = time.delta_secs().max(0.000_1);

    for (mut wheel, transform, mut velocity, mass_properties, mut force, mut impulse) in
        &mut wheel_query
    {
        *force = ExternalForce::default();
        *impulse = ExternalImpulse::default();

        let Ok(vehicle) = vehicle_query.get(wheel.vehicle) else {
            continue;
        };
        let Some(vehicle_cfg) = config.vehicles_by_id.get(&vehicle.config_id) else {
            continue;
        };

        let position = transform.translation.truncate();
        let surface = if vehicle.flying {
            layout.air_surface()
        } else {
            layout.material_at(position)
        };
        wheel.surface_id = surface.id.clone();
        wheel.grip = surface.grip;
        wheel.ground_speed_factor = surface.ground_speed_factor;

        let rotation = Mat2::from_angle(transform.rotation.to_euler(EulerRot::XYZ).2);
        let forward = rotation * Vec2::X;
        let lateral = rotation * Vec2::Y;
        let forward_speed = velocity.linvel.dot(forward);
        let lateral_speed = velocity.linvel.dot(lateral);
        let mass = mass_properties
            .map(|properties| properties.mass)
            .unwrap_or(1.0)
            .max(0.05);

        let grounded = !vehicle.flying && surface.id != "air";
        if grounded && surface.grip > 0.0 {
            let raw = lateral_cancel_impulse(lateral_speed, mass, surface.grip);
            let cap = max_lateral_impulse(
                vehicle_cfg.max_lateral_impulse,
                forward_speed,
                vehicle_cfg.max_forward_speed,
                vehicle.braking,
                vehicle_cfg.braking_lateral_cap_factor,
            );

            let drift_permitted = vehicle_cfg.allow_drift && surface.allows_drift;
            let applied = if raw.abs() > cap && drift_permitted {
                if !wheel.drifting {
                    wheel.drifting = true;
                    wheel.skid_timer_s = 0.0;
                }
                wheel.skid_timer_s -= dt;
                if wheel.skid_timer_s <= 0.0 {
                    wheel.skid_timer_s = vehicle_cfg.skid_interval_s;
                    let heading = forward.y.atan2(forward.x);
                    let life = vehicle_cfg.skid_life_s;
                    wheel.skid_ring.push(SkidSample {
                        position,
                        heading_rad: heading,
                        remaining_life_s: life,
                        end_marker: false,
                    });
                }
                raw * vehicle_cfg.drift_clamp_factor
            } else {
                if wheel.drifting {
                    wheel.drifting = false;
                    let heading = forward.y.atan2(forward.x);
                    wheel.skid_ring.push(SkidSample {
                        position,
                        heading_rad: heading,
                        remaining_life_s: vehicle_cfg.skid_life_s,
                        end_marker: true,
                    });
                }
                raw.clamp(-cap, cap)
            };

            impulse.impulse += lateral * applied;
        } else if wheel.drifting {
            wheel.drifting = false;
        }

        wheel.skid_ring.decay(dt);

        // Spin the wheel body down and roll off a constant drag while grounded.
        velocity.angvel *= f32::exp(-vehicle_cfg.angular_damping_factor * dt);
        if grounded {
            force.force += -velocity.linvel * (vehicle_cfg.rolling_drag * mass);
        }

        if wheel.drive_delta.abs() > f32::EPSILON {
            let strength = drive_force(wheel.drive_delta, forward_speed, wheel.effective_max_speed);
            force.force += forward * (strength * mass);
        }
    }
}

/// Writes each steerable wheel's commanded angle into its revolute joint by
/// pinning the joint limits around the target.
pub(crate) fn apply_wheel_steering(
    mut wheel_query: Query<(&Wheel, &mut ImpulseJoint), Without<Vehicle>>,
) {
    const LIMIT_EPSILON: f32 = 0.002;

    for (wheel, mut joint) in &mut wheel_query {
        if !wheel.steerable {
            continue;
        }
        let angle = wheel.steer_angle_rad;
        joint.data = RevoluteJointBuilder::new()
            .local_anchor1(wheel.hardpoint_local)
            .local_anchor2(Vec2::ZERO)
            .limits([angle - LIMIT_EPSILON, angle + LIMIT_EPSILON])
            .build()
            .into();
    }
}

pub(crate) fn joint_for_wheel(hardpoint_local: Vec2) -> RevoluteJointBuilder {
    RevoluteJointBuilder::new()
        .local_anchor1(hardpoint_local)
        .local_anchor2(Vec2::ZERO)
        .limits([0.0, 0.0])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skid_ring_overwrites_oldest_without_growing() {
        let mut ring = SkidRing::new();
        for index in 0..(SKID_RING_CAPACITY + 10) {
            ring.push(SkidSample {
                position: Vec2::new(index as f32, 0.0),
                heading_rad: 0.0,
                remaining_life_s: 1.0,
                end_marker: false,
            });
        }

        assert_eq!(ring.samples().len(), SKID_RING_CAPACITY);
        // The first ten samples were evicted; position 10 is the oldest left.
        assert!(ring
            .samples()
            .iter()
            .all(|sample| sample.position.x >= 10.0));
    }

    #[test]
    fn skid_samples_decay_to_zero_life() {
        let mut ring = SkidRing::new();
        ring.push(SkidSample {
            position: Vec2::ZERO,
            heading_rad: 0.0,
            remaining_life_s: 0.5,
            end_marker: false,
        });

        ring.decay(0.3);
        assert_eq!(ring.live_count(), 1);
        ring.decay(0.3);
        assert_eq!(ring.live_count(), 0);
        assert_eq!(ring.samples().len(), 1);
    }

    #[test]
    fn lateral_impulse_below_cap_keeps_grip() {
        // Mirrors the drift decision in `advance_wheels`.
        let raw = lateral_cancel_impulse(0.5, 1.0, 1.0);
        let cap = max_lateral_impulse(2.4, 5.0, 24.0, false, 0.65);
        assert!(raw.abs() < cap);
    }

    #[test]
    fn lateral_impulse_above_cap_triggers_drift() {
        let raw = lateral_cancel_impulse(8.0, 1.0, 1.0);
        let cap = max_lateral_impulse(2.4, 20.0, 24.0, false, 0.65);
        assert!(raw.abs() > cap);
    }

    #[test]
    fn braking_lowers_the_lateral_cap() {
        let rolling = max_lateral_impulse(2.4, 10.0, 24.0, false, 0.65);
        let braking = max_lateral_impulse(2.4, 10.0, 24.0, true, 0.65);
        assert!(braking < rolling);
    }

    #[test]
    fn drive_force_fades_toward_max_speed() {
        let at_rest = drive_force(9.0, 0.0, 24.0);
        let mid = drive_force(9.0, 12.0, 24.0);
        let at_max = drive_force(9.0, 24.0, 24.0);

        assert_eq!(at_rest, 9.0);
        assert!(mid < at_rest && mid > 0.0);
        assert!(at_max.abs() < 1e-6);
    }

    #[test]
    fn braking_force_is_not_attenuated() {
        assert_eq!(drive_force(-14.0, 23.0, 24.0), -14.0);
    }
}
