use std::{path::PathBuf, time::Duration};

pub const DEFAULT_AUDIO_LATENCY: Duration = Duration::from_millis(750);
pub const DEFAULT_DISPLAY_REFRESH_CAP: f64 = 60.0;

const APP_DIR_NAME: &str = "retro-shell";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioMode {
    Auto,
    Disabled,
}

/// Host-wide settings shared by every console kit.
#[derive(Debug, Clone)]
pub struct HostConfig {
    /// Root for `saves/` and `system/`.
    pub data_dir: PathBuf,
    /// Directory holding bundled core frameworks or flattened libraries.
    pub plugins_dir: PathBuf,
    /// Last-resort directory searched for a flattened library.
    pub bundle_root: PathBuf,
    /// Explicit library path, tried before any search location.
    pub core_override: Option<PathBuf>,
    pub audio: AudioMode,
    /// Ring capacity expressed as playback time at the core's sample rate.
    pub audio_latency: Duration,
    /// Highest rate the frame pump ticks at; `None` disables the cap.
    pub display_refresh_cap: Option<f64>,
}

impl Default for HostConfig {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join(APP_DIR_NAME);
        let bundle_root = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from("."));

        Self {
            data_dir,
            plugins_dir: bundle_root.join("PlugIns"),
            bundle_root,
            core_override: None,
            audio: AudioMode::Auto,
            audio_latency: DEFAULT_AUDIO_LATENCY,
            display_refresh_cap: Some(DEFAULT_DISPLAY_REFRESH_CAP),
        }
    }
}

impl HostConfig {
    /// Config rooted at `data_dir` with audio disabled. Used by headless tools and tests.
    pub fn headless(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            audio: AudioMode::Disabled,
            display_refresh_cap: None,
            ..Self::default()
        }
    }

    pub fn saves_dir(&self, core_dir_name: &str) -> PathBuf {
        self.data_dir.join("saves").join(core_dir_name)
    }

    pub fn system_dir(&self) -> PathBuf {
        self.data_dir.join("system")
    }
}
