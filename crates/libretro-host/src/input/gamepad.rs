//! Physical controller polling using gilrs.
//!
//! The first connected gamepad drives port 0. Events are drained on every
//! poll so hot-plugging is noticed between frames.

use gilrs::{Axis, Button, Event, EventType, GamepadId, Gilrs};

use super::{ControllerInput, ControllerSnapshot, ControllerSource};
use crate::error::HostError;

/// Analog triggers reported as axes count as pressed beyond this value.
const TRIGGER_AXIS_THRESHOLD: f32 = 0.3;

const BUTTONS: [(Button, ControllerInput); 16] = [
    (Button::South, ControllerInput::South),
    (Button::East, ControllerInput::East),
    (Button::North, ControllerInput::North),
    (Button::West, ControllerInput::West),
    (Button::LeftTrigger, ControllerInput::LeftShoulder),
    (Button::RightTrigger, ControllerInput::RightShoulder),
    (Button::LeftTrigger2, ControllerInput::LeftTrigger),
    (Button::RightTrigger2, ControllerInput::RightTrigger),
    (Button::Start, ControllerInput::Start),
    (Button::Select, ControllerInput::Select),
    (Button::DPadUp, ControllerInput::DPadUp),
    (Button::DPadDown, ControllerInput::DPadDown),
    (Button::DPadLeft, ControllerInput::DPadLeft),
    (Button::DPadRight, ControllerInput::DPadRight),
    (Button::LeftThumb, ControllerInput::LeftThumb),
    (Button::RightThumb, ControllerInput::RightThumb),
];

/// [`ControllerSource`] backed by the platform gamepad API.
pub struct GamepadSource {
    gilrs: Gilrs,
    active: Option<GamepadId>,
}

impl GamepadSource {
    pub fn new() -> Result<Self, HostError> {
        let gilrs = Gilrs::new().map_err(|e| {
            tracing::error!("Failed to initialize gilrs: {}", e);
            HostError::Gamepad(e.to_string())
        })?;

        let active = gilrs
            .gamepads()
            .find(|(_, gamepad)| gamepad.is_connected())
            .map(|(id, gamepad)| {
                tracing::info!("Gamepad assigned: {} ({:?})", gamepad.name(), id);
                id
            });

        Ok(Self { gilrs, active })
    }

    pub fn is_connected(&self) -> bool {
        self.active.is_some()
    }

    fn drain_events(&mut self) {
        while let Some(Event { id, event, .. }) = self.gilrs.next_event() {
            match event {
                EventType::Connected => {
                    let gp = self.gilrs.gamepad(id);
                    tracing::info!("Gamepad connected: {} ({:?})", gp.name(), id);
                    if self.active.is_none() {
                        self.active = Some(id);
                    }
                }
                EventType::Disconnected => {
                    tracing::info!("Gamepad disconnected: {:?}", id);
                    if self.active == Some(id) {
                        self.active = self
                            .gilrs
                            .gamepads()
                            .find(|(other, gp)| *other != id && gp.is_connected())
                            .map(|(other, _)| other);
                    }
                }
                _ => {}
            }
        }
    }
}

impl ControllerSource for GamepadSource {
    fn poll(&mut self) -> Option<ControllerSnapshot> {
        self.drain_events();

        let gamepad = self.gilrs.connected_gamepad(self.active?)?;
        let mut snapshot = ControllerSnapshot::default();
        for (button, input) in BUTTONS {
            if gamepad.is_pressed(button) {
                snapshot.buttons.insert(input);
            }
        }

        // Some pads only report analog triggers as axes.
        let axis_pressed = |axis| {
            gamepad
                .axis_data(axis)
                .is_some_and(|data| data.value() > TRIGGER_AXIS_THRESHOLD)
        };
        if axis_pressed(Axis::LeftZ) {
            snapshot.buttons.insert(ControllerInput::LeftTrigger);
        }
        if axis_pressed(Axis::RightZ) {
            snapshot.buttons.insert(ControllerInput::RightTrigger);
        }

        snapshot.left_stick = (gamepad.value(Axis::LeftStickX), gamepad.value(Axis::LeftStickY));
        Some(snapshot)
    }
}
