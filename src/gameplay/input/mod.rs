use bevy::prelude::*;

pub struct RaceInputPlugin;

impl Plugin for RaceInputPlugin {
    fn build(&self, app: &mut App) {
        app.init_resource::<PlayerInputBindings>()
            .init_resource::<PlayerInputs>()
            .add_systems(Update, read_player_inputs);
    }
}

/// The logical per-frame input signal for one player slot. The simulation
/// consumes this snapshot and never polls devices itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct InputSnapshot {
    pub direction: f32,
    pub accelerating: bool,
    pub braking: bool,
    pub trigger: bool,
}

#[derive(Resource, Debug, Clone, Default)]
pub struct PlayerInputs {
    slots: Vec<InputSnapshot>,
}

impl PlayerInputs {
    pub fn slot(&self, slot: usize) -> InputSnapshot {
        self.slots.get(slot).copied().unwrap_or_default()
    }
}

#[derive(Debug, Clone)]
struct SlotBindings {
    left: Vec<KeyCode>,
    right: Vec<KeyCode>,
    accelerate: Vec<KeyCode>,
    brake: Vec<KeyCode>,
    trigger: Vec<KeyCode>,
}

#[derive(Resource, Debug, Clone)]
struct PlayerInputBindings {
    slots: Vec<SlotBindings>,
}

impl Default for PlayerInputBindings {
    fn default() -> Self {
        Self {
            slots: vec![
                SlotBindings {
                    left: vec![KeyCode::KeyA, KeyCode::ArrowLeft],
                    right: vec![KeyCode::KeyD, KeyCode::ArrowRight],
                    accelerate: vec![KeyCode::KeyW, KeyCode::ArrowUp],
                    brake: vec![KeyCode::KeyS, KeyCode::ArrowDown],
                    trigger: vec![KeyCode::Space],
                },
                SlotBindings {
                    left: vec![KeyCode::KeyJ],
                    right: vec![KeyCode::KeyL],
                    accelerate: vec![KeyCode::KeyI],
                    brake: vec![KeyCode::KeyK],
                    trigger: vec![KeyCode::KeyH],
                },
            ],
        }
    }
}

fn read_player_inputs(
    keyboard: Res<ButtonInput<KeyCode>>,
    bindings: Res<PlayerInputBindings>,
    mut inputs: ResMut<PlayerInputs>,
) {
    inputs.slots.clear();
    for slot in &bindings.slots {
        let any_pressed = |keys: &[KeyCode]| keys.iter().any(|key| keyboard.pressed(*key));
        let mut direction = 0.0;
        if any_pressed(&slot.left) {
            direction -= 1.0;
        }
        if any_pressed(&slot.right) {
            direction += 1.0;
        }

        inputs.slots.push(InputSnapshot {
            direction,
            accelerating: any_pressed(&slot.accelerate),
            braking: any_pressed(&slot.brake),
            trigger: any_pressed(&slot.trigger),
        });
    }
}
