//! Per-console strategy tables.

use std::fmt;

use crate::input::{ControllerInput, PhysicalMapping, RetroPad};
use crate::raw;
use crate::video::PixelFormat;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConsoleId {
    Nes,
    Snes,
    Genesis,
    Ds,
}

impl fmt::Display for ConsoleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Nes => "NES",
            Self::Snes => "SNES",
            Self::Genesis => "Genesis",
            Self::Ds => "DS",
        };
        f.write_str(name)
    }
}

/// Static data describing how one console family drives its core.
#[derive(Debug, Clone)]
pub struct ConsoleProfile {
    pub id: ConsoleId,
    /// File stem of the flattened library, e.g. `snes9x_libretro_ios`.
    pub library_stem: &'static str,
    /// Bundled framework name, searched as `<name>.framework/<name>`.
    pub framework: &'static str,
    /// Directory under `saves/` holding battery saves and the core's own files.
    pub save_dir_name: &'static str,
    pub default_pixel_format: PixelFormat,
    pub save_ram_id: u32,
    /// Buttons replaced as a group by touch overlays.
    pub action_buttons: RetroPad,
    pub mapping: PhysicalMapping,
    pub core_options: Vec<(String, String)>,
}

impl ConsoleProfile {
    pub fn with_mapping(mut self, mapping: PhysicalMapping) -> Self {
        self.mapping = mapping;
        self
    }

    /// Overrides a core option, replacing any earlier value for `key`.
    pub fn with_core_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let key = key.into();
        let value = value.into();
        match self.core_options.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.core_options.push((key, value)),
        }
        self
    }

    pub fn core_option(&self, key: &str) -> Option<&str> {
        self.core_options
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// A console family with its own callback set and active session slot.
pub trait ConsoleKit: 'static {
    const ID: ConsoleId;

    fn profile() -> ConsoleProfile;
}

fn face_buttons(mapping: PhysicalMapping) -> PhysicalMapping {
    mapping
        .bind(ControllerInput::Start, RetroPad::START)
        .bind(ControllerInput::Select, RetroPad::SELECT)
        .with_directions()
        .with_fast_forward(ControllerInput::LeftTrigger)
}

pub struct Nes;

impl ConsoleKit for Nes {
    const ID: ConsoleId = ConsoleId::Nes;

    fn profile() -> ConsoleProfile {
        let mapping = PhysicalMapping::new()
            .bind(ControllerInput::East, RetroPad::A)
            .bind(ControllerInput::South, RetroPad::B)
            .bind(ControllerInput::North, RetroPad::A)
            .bind(ControllerInput::West, RetroPad::B);
        ConsoleProfile {
            id: Self::ID,
            library_stem: "fceumm_libretro_ios",
            framework: "fceumm",
            save_dir_name: "nes",
            default_pixel_format: PixelFormat::Rgb565,
            save_ram_id: raw::RETRO_MEMORY_SAVE_RAM,
            action_buttons: RetroPad::A | RetroPad::B,
            mapping: face_buttons(mapping),
            core_options: Vec::new(),
        }
    }
}

pub struct Snes;

impl ConsoleKit for Snes {
    const ID: ConsoleId = ConsoleId::Snes;

    fn profile() -> ConsoleProfile {
        let mapping = PhysicalMapping::new()
            .bind(ControllerInput::East, RetroPad::A)
            .bind(ControllerInput::South, RetroPad::B)
            .bind(ControllerInput::North, RetroPad::X)
            .bind(ControllerInput::West, RetroPad::Y)
            .bind(ControllerInput::LeftShoulder, RetroPad::L)
            .bind(ControllerInput::RightShoulder, RetroPad::R);
        ConsoleProfile {
            id: Self::ID,
            library_stem: "snes9x_libretro_ios",
            framework: "Snes9x",
            save_dir_name: "snes",
            default_pixel_format: PixelFormat::Rgb565,
            save_ram_id: raw::RETRO_MEMORY_SAVE_RAM,
            action_buttons: RetroPad::A | RetroPad::B | RetroPad::X | RetroPad::Y,
            mapping: face_buttons(mapping),
            core_options: Vec::new(),
        }
    }
}

/// Sega Genesis / Mega Drive through PicoDrive.
///
/// PicoDrive reads Genesis A from RetroPad B, B from A, C from Y, and the
/// six-button X/Y/Z from L/X/R. Mode is Select.
pub struct Genesis;

impl ConsoleKit for Genesis {
    const ID: ConsoleId = ConsoleId::Genesis;

    fn profile() -> ConsoleProfile {
        let mapping = PhysicalMapping::new()
            .bind(ControllerInput::East, RetroPad::B)
            .bind(ControllerInput::South, RetroPad::A)
            .bind(ControllerInput::West, RetroPad::Y)
            .bind(ControllerInput::LeftShoulder, RetroPad::L)
            .bind(ControllerInput::North, RetroPad::X)
            .bind(ControllerInput::RightShoulder, RetroPad::R);
        ConsoleProfile {
            id: Self::ID,
            library_stem: "picodrive_libretro_ios",
            framework: "PicoDrive",
            save_dir_name: "picodrive",
            default_pixel_format: PixelFormat::Rgb565,
            save_ram_id: raw::RETRO_MEMORY_SAVE_RAM,
            action_buttons: RetroPad::A | RetroPad::B | RetroPad::Y,
            mapping: face_buttons(mapping),
            core_options: Vec::new(),
        }
    }
}

/// Nintendo DS through melonDS. The touch screen is exposed as the pointer device.
pub struct Ds;

impl ConsoleKit for Ds {
    const ID: ConsoleId = ConsoleId::Ds;

    fn profile() -> ConsoleProfile {
        let mapping = PhysicalMapping::new()
            .bind(ControllerInput::East, RetroPad::A)
            .bind(ControllerInput::South, RetroPad::B)
            .bind(ControllerInput::North, RetroPad::X)
            .bind(ControllerInput::West, RetroPad::Y)
            .bind(ControllerInput::LeftShoulder, RetroPad::L)
            .bind(ControllerInput::RightShoulder, RetroPad::R);
        ConsoleProfile {
            id: Self::ID,
            library_stem: "melonds_libretro_ios",
            framework: "melonds",
            save_dir_name: "ds",
            default_pixel_format: PixelFormat::Xrgb8888,
            save_ram_id: raw::RETRO_MEMORY_SAVE_RAM,
            action_buttons: RetroPad::A | RetroPad::B | RetroPad::X | RetroPad::Y,
            mapping: face_buttons(mapping),
            core_options: Vec::new(),
        }
        .with_core_option("melonds_console_mode", "DS")
        .with_core_option("melonds_boot_directly", "enabled")
        .with_core_option("melonds_mic_input", "blow")
        .with_core_option("melonds_jit_enable", "disabled")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::ControllerSnapshot;

    #[test]
    fn core_option_override_replaces_value() {
        let profile = Ds::profile().with_core_option("melonds_jit_enable", "enabled");
        assert_eq!(profile.core_option("melonds_jit_enable"), Some("enabled"));
        assert_eq!(profile.core_option("melonds_console_mode"), Some("DS"));
        assert_eq!(profile.core_option("missing"), None);
        let jit_entries = profile
            .core_options
            .iter()
            .filter(|(k, _)| k == "melonds_jit_enable")
            .count();
        assert_eq!(jit_entries, 1);
    }

    #[test]
    fn genesis_face_buttons_follow_picodrive_layout() {
        let profile = Genesis::profile();
        let pressed = ControllerSnapshot::default()
            .with_button(ControllerInput::East)
            .with_button(ControllerInput::West);
        let (mask, ff) = profile.mapping.apply(&pressed);
        assert_eq!(mask, RetroPad::B | RetroPad::Y);
        assert!(!ff);
    }

    #[test]
    fn console_ids_are_distinct() {
        let ids = [Nes::ID, Snes::ID, Genesis::ID, Ds::ID];
        for (i, a) in ids.iter().enumerate() {
            for b in &ids[i + 1..] {
                assert_ne!(a, b);
            }
        }
        assert_eq!(Snes::profile().framework, "Snes9x");
    }
}
