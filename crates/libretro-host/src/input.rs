//! Input multiplexing between touch overlays and physical controllers.
//!
//! The core only ever sees one 16-bit RetroPad mask: the OR of a touch-origin
//! mask (written by the UI at any time) and a physical-origin mask (rebuilt
//! once per tick from a [`ControllerSource`]). Touch-screen cores also read a
//! single pointer.

#[cfg(all(
    feature = "gamepad",
    not(any(target_arch = "wasm32", target_os = "android", target_os = "ios"))
))]
pub mod gamepad;

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicI16, AtomicU16, AtomicU64, Ordering};

use bitflags::bitflags;

use crate::raw;

/// Analog stick deflection beyond which a direction counts as pressed.
pub const STICK_THRESHOLD: f32 = 0.65;

bitflags! {
    /// RetroPad buttons, bit `n` being `RETRO_DEVICE_ID_JOYPAD_*` id `n`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct RetroPad: u16 {
        const B = 1 << 0;
        const Y = 1 << 1;
        const SELECT = 1 << 2;
        const START = 1 << 3;
        const UP = 1 << 4;
        const DOWN = 1 << 5;
        const LEFT = 1 << 6;
        const RIGHT = 1 << 7;
        const A = 1 << 8;
        const X = 1 << 9;
        const L = 1 << 10;
        const R = 1 << 11;
        const L2 = 1 << 12;
        const R2 = 1 << 13;
        const L3 = 1 << 14;
        const R3 = 1 << 15;
    }
}

impl RetroPad {
    /// Single-button flag for a joypad id, `None` for ids outside 0..16.
    pub fn from_id(id: u32) -> Option<Self> {
        if id < 16 {
            Some(Self::from_bits_retain(1 << id))
        } else {
            None
        }
    }
}

/// Physical controls a host controller can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControllerInput {
    South,
    East,
    North,
    West,
    LeftShoulder,
    RightShoulder,
    LeftTrigger,
    RightTrigger,
    Start,
    Select,
    DPadUp,
    DPadDown,
    DPadLeft,
    DPadRight,
    LeftStickUp,
    LeftStickDown,
    LeftStickLeft,
    LeftStickRight,
    LeftThumb,
    RightThumb,
}

/// Point-in-time state of one physical controller.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ControllerSnapshot {
    pub buttons: HashSet<ControllerInput>,
    /// Left stick, both axes in `-1.0..=1.0`, y positive up.
    pub left_stick: (f32, f32),
}

impl ControllerSnapshot {
    pub fn with_button(mut self, input: ControllerInput) -> Self {
        self.buttons.insert(input);
        self
    }

    pub fn with_left_stick(mut self, x: f32, y: f32) -> Self {
        self.left_stick = (x, y);
        self
    }

    pub fn is_pressed(&self, input: ControllerInput) -> bool {
        let (x, y) = self.left_stick;
        match input {
            ControllerInput::LeftStickUp => y > STICK_THRESHOLD,
            ControllerInput::LeftStickDown => y < -STICK_THRESHOLD,
            ControllerInput::LeftStickLeft => x < -STICK_THRESHOLD,
            ControllerInput::LeftStickRight => x > STICK_THRESHOLD,
            other => self.buttons.contains(&other),
        }
    }
}

/// Table translating physical controls into RetroPad bits.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PhysicalMapping {
    bindings: Vec<(ControllerInput, RetroPad)>,
    fast_forward: Option<ControllerInput>,
}

impl PhysicalMapping {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a binding. Several inputs may drive the same button.
    pub fn bind(mut self, input: ControllerInput, button: RetroPad) -> Self {
        self.bindings.push((input, button));
        self
    }

    pub fn with_fast_forward(mut self, input: ControllerInput) -> Self {
        self.fast_forward = Some(input);
        self
    }

    pub fn bindings(&self) -> &[(ControllerInput, RetroPad)] {
        &self.bindings
    }

    /// Standard directional bindings: D-pad plus left stick.
    pub fn with_directions(self) -> Self {
        self.bind(ControllerInput::DPadUp, RetroPad::UP)
            .bind(ControllerInput::DPadDown, RetroPad::DOWN)
            .bind(ControllerInput::DPadLeft, RetroPad::LEFT)
            .bind(ControllerInput::DPadRight, RetroPad::RIGHT)
            .bind(ControllerInput::LeftStickUp, RetroPad::UP)
            .bind(ControllerInput::LeftStickDown, RetroPad::DOWN)
            .bind(ControllerInput::LeftStickLeft, RetroPad::LEFT)
            .bind(ControllerInput::LeftStickRight, RetroPad::RIGHT)
    }

    /// Builds the physical mask and the fast-forward request for one snapshot.
    pub fn apply(&self, snapshot: &ControllerSnapshot) -> (RetroPad, bool) {
        let mask = self
            .bindings
            .iter()
            .filter(|(input, _)| snapshot.is_pressed(*input))
            .fold(RetroPad::empty(), |acc, (_, button)| acc | *button);
        let fast_forward = self
            .fast_forward
            .is_some_and(|input| snapshot.is_pressed(input));
        (mask, fast_forward)
    }
}

/// Anything that can be polled once per tick for controller state.
pub trait ControllerSource {
    /// `None` when no controller is connected.
    fn poll(&mut self) -> Option<ControllerSnapshot>;
}

/// Source used when no physical controller support is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoController;

impl ControllerSource for NoController {
    fn poll(&mut self) -> Option<ControllerSnapshot> {
        None
    }
}

/// Button and pointer state read by the input-state callback.
#[derive(Debug)]
pub struct InputState {
    touch: AtomicU16,
    physical: AtomicU16,
    action_buttons: RetroPad,
    pointer_x: AtomicI16,
    pointer_y: AtomicI16,
    pointer_pressed: AtomicBool,
    polls: AtomicU64,
}

impl InputState {
    /// `action_buttons` is the subset replaced by [`InputState::set_touch_buttons`].
    pub fn new(action_buttons: RetroPad) -> Self {
        Self {
            touch: AtomicU16::new(0),
            physical: AtomicU16::new(0),
            action_buttons,
            pointer_x: AtomicI16::new(0),
            pointer_y: AtomicI16::new(0),
            pointer_pressed: AtomicBool::new(false),
            polls: AtomicU64::new(0),
        }
    }

    /// Sets or clears one touch-origin button. Ids outside 0..16 are ignored.
    pub fn set_button(&self, id: u32, pressed: bool) {
        let Some(bit) = RetroPad::from_id(id) else {
            return;
        };
        if pressed {
            self.touch.fetch_or(bit.bits(), Ordering::AcqRel);
        } else {
            self.touch.fetch_and(!bit.bits(), Ordering::AcqRel);
        }
    }

    /// Replaces the action-button subset of the touch mask with `ids`.
    pub fn set_touch_buttons(&self, ids: impl IntoIterator<Item = u32>) {
        let pressed = ids
            .into_iter()
            .filter_map(RetroPad::from_id)
            .fold(RetroPad::empty(), |acc, b| acc | b);
        let clear = !self.action_buttons.bits();
        let _ = self
            .touch
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                Some((current & clear) | pressed.bits())
            });
    }

    pub fn set_physical(&self, mask: RetroPad) {
        self.physical.store(mask.bits(), Ordering::Release);
    }

    pub fn touch_mask(&self) -> RetroPad {
        RetroPad::from_bits_retain(self.touch.load(Ordering::Acquire))
    }

    pub fn physical_mask(&self) -> RetroPad {
        RetroPad::from_bits_retain(self.physical.load(Ordering::Acquire))
    }

    /// Combined `touch | physical` mask, the only value the core observes.
    pub fn mask(&self) -> RetroPad {
        self.touch_mask() | self.physical_mask()
    }

    pub fn set_pointer(&self, x: i16, y: i16, pressed: bool) {
        self.pointer_x.store(x, Ordering::Release);
        self.pointer_y.store(y, Ordering::Release);
        self.pointer_pressed.store(pressed, Ordering::Release);
    }

    pub fn release_all(&self) {
        self.touch.store(0, Ordering::Release);
        self.physical.store(0, Ordering::Release);
        self.pointer_pressed.store(false, Ordering::Release);
    }

    pub(crate) fn note_poll(&self) {
        self.polls.fetch_add(1, Ordering::Relaxed);
    }

    /// Number of input-poll callbacks received so far.
    pub fn polls(&self) -> u64 {
        self.polls.load(Ordering::Relaxed)
    }

    /// Answers a `retro_input_state_t` query.
    pub fn state(&self, port: u32, device: u32, _index: u32, id: u32) -> i16 {
        if port != 0 {
            return 0;
        }
        match device & raw::RETRO_DEVICE_MASK {
            raw::RETRO_DEVICE_NONE | raw::RETRO_DEVICE_JOYPAD => {
                let mask = self.mask();
                if id == raw::RETRO_DEVICE_ID_JOYPAD_MASK {
                    return mask.bits() as i16;
                }
                match RetroPad::from_id(id) {
                    Some(bit) => i16::from(mask.contains(bit)),
                    None => 0,
                }
            }
            raw::RETRO_DEVICE_POINTER => match id {
                raw::RETRO_DEVICE_ID_POINTER_X => self.pointer_x.load(Ordering::Acquire),
                raw::RETRO_DEVICE_ID_POINTER_Y => self.pointer_y.load(Ordering::Acquire),
                raw::RETRO_DEVICE_ID_POINTER_PRESSED => {
                    i16::from(self.pointer_pressed.load(Ordering::Acquire))
                }
                _ => 0,
            },
            _ => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snes_actions() -> RetroPad {
        RetroPad::A | RetroPad::B | RetroPad::X | RetroPad::Y
    }

    #[test]
    fn touch_and_physical_masks_are_ored() {
        let input = InputState::new(snes_actions());
        input.set_button(raw::RETRO_DEVICE_ID_JOYPAD_START, true);
        input.set_physical(RetroPad::A);

        let start = raw::RETRO_DEVICE_ID_JOYPAD_START;
        let a = raw::RETRO_DEVICE_ID_JOYPAD_A;
        let b = raw::RETRO_DEVICE_ID_JOYPAD_B;
        assert_eq!(input.state(0, raw::RETRO_DEVICE_JOYPAD, 0, start), 1);
        assert_eq!(input.state(0, raw::RETRO_DEVICE_JOYPAD, 0, a), 1);
        assert_eq!(input.state(0, raw::RETRO_DEVICE_JOYPAD, 0, b), 0);

        input.set_button(start, false);
        assert_eq!(input.state(0, raw::RETRO_DEVICE_JOYPAD, 0, start), 0);
        assert_eq!(input.mask(), RetroPad::A);
    }

    #[test]
    fn every_button_id_round_trips_through_the_mask() {
        let input = InputState::new(snes_actions());
        for id in 0..16 {
            input.set_button(id, true);
            for other in 0..16 {
                let expected = i16::from(other == id);
                assert_eq!(input.state(0, raw::RETRO_DEVICE_JOYPAD, 0, other), expected);
            }
            input.set_button(id, false);
        }
        assert_eq!(input.mask(), RetroPad::empty());
    }

    #[test]
    fn joypad_mask_query_returns_all_bits() {
        let input = InputState::new(snes_actions());
        input.set_button(raw::RETRO_DEVICE_ID_JOYPAD_UP, true);
        input.set_physical(RetroPad::R);
        let mask = input.state(0, raw::RETRO_DEVICE_JOYPAD, 0, raw::RETRO_DEVICE_ID_JOYPAD_MASK);
        assert_eq!(mask as u16, (RetroPad::UP | RetroPad::R).bits());
    }

    #[test]
    fn other_ports_and_devices_read_zero() {
        let input = InputState::new(snes_actions());
        input.set_button(raw::RETRO_DEVICE_ID_JOYPAD_B, true);
        assert_eq!(input.state(1, raw::RETRO_DEVICE_JOYPAD, 0, 0), 0);
        assert_eq!(input.state(0, raw::RETRO_DEVICE_JOYPAD, 0, 16), 0);
        assert_eq!(input.state(0, raw::RETRO_DEVICE_ANALOG, 0, 0), 0);
    }

    #[test]
    fn unspecified_device_and_joypad_subclasses_read_buttons() {
        let input = InputState::new(snes_actions());
        let a = raw::RETRO_DEVICE_ID_JOYPAD_A;
        input.set_button(a, true);
        let subclass = (1 << 8) | raw::RETRO_DEVICE_JOYPAD;
        assert_eq!(input.state(0, raw::RETRO_DEVICE_NONE, 0, a), 1);
        assert_eq!(input.state(0, subclass, 0, a), 1);
        assert_eq!(input.state(0, subclass, 0, raw::RETRO_DEVICE_ID_JOYPAD_B), 0);
        let mask = input.state(0, raw::RETRO_DEVICE_NONE, 0, raw::RETRO_DEVICE_ID_JOYPAD_MASK);
        assert_eq!(mask as u16, RetroPad::A.bits());
    }

    #[test]
    fn touch_action_buttons_replace_only_the_action_subset() {
        let input = InputState::new(snes_actions());
        input.set_button(raw::RETRO_DEVICE_ID_JOYPAD_LEFT, true);
        input.set_touch_buttons([raw::RETRO_DEVICE_ID_JOYPAD_A, raw::RETRO_DEVICE_ID_JOYPAD_X]);
        assert_eq!(input.touch_mask(), RetroPad::LEFT | RetroPad::A | RetroPad::X);

        input.set_touch_buttons([raw::RETRO_DEVICE_ID_JOYPAD_B]);
        assert_eq!(input.touch_mask(), RetroPad::LEFT | RetroPad::B);

        input.set_touch_buttons(Vec::<u32>::new());
        assert_eq!(input.touch_mask(), RetroPad::LEFT);
    }

    #[test]
    fn pointer_queries_follow_device_ids() {
        let input = InputState::new(RetroPad::empty());
        input.set_pointer(-1200, 3400, true);
        let dev = raw::RETRO_DEVICE_POINTER;
        assert_eq!(input.state(0, dev, 0, raw::RETRO_DEVICE_ID_POINTER_X), -1200);
        assert_eq!(input.state(0, dev, 0, raw::RETRO_DEVICE_ID_POINTER_Y), 3400);
        assert_eq!(input.state(0, dev, 0, raw::RETRO_DEVICE_ID_POINTER_PRESSED), 1);
        input.release_all();
        assert_eq!(input.state(0, dev, 0, raw::RETRO_DEVICE_ID_POINTER_PRESSED), 0);
    }

    #[test]
    fn stick_counts_only_past_threshold() {
        let mapping = PhysicalMapping::new().with_directions();
        let (mask, _) = mapping.apply(&ControllerSnapshot::default().with_left_stick(0.6, -0.2));
        assert_eq!(mask, RetroPad::empty());

        let (mask, _) = mapping.apply(&ControllerSnapshot::default().with_left_stick(0.7, -0.9));
        assert_eq!(mask, RetroPad::RIGHT | RetroPad::DOWN);
    }

    #[test]
    fn mapping_reports_fast_forward_binding() {
        let mapping = PhysicalMapping::new()
            .bind(ControllerInput::East, RetroPad::A)
            .with_fast_forward(ControllerInput::RightTrigger);
        let snapshot = ControllerSnapshot::default()
            .with_button(ControllerInput::East)
            .with_button(ControllerInput::RightTrigger);
        assert_eq!(mapping.apply(&snapshot), (RetroPad::A, true));
        assert_eq!(mapping.apply(&ControllerSnapshot::default()), (RetroPad::empty(), false));
    }
}
