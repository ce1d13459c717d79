//! Locating, opening and binding a libretro core library.

use std::ffi::{CStr, c_char, c_uint, c_void};
use std::path::{Path, PathBuf};

use libloading::Library;

use crate::config::HostConfig;
use crate::console::ConsoleProfile;
use crate::error::LoadError;
use crate::raw;

/// Entry points bound once at load time.
///
/// The first block is mandatory; a library lacking any of them is rejected.
/// Optional entries degrade a feature when absent.
#[derive(Clone, Copy)]
pub struct FunctionTable {
    pub init: unsafe extern "C" fn(),
    pub deinit: unsafe extern "C" fn(),
    pub set_environment: unsafe extern "C" fn(raw::retro_environment_t),
    pub set_video_refresh: unsafe extern "C" fn(raw::retro_video_refresh_t),
    pub set_audio_sample: unsafe extern "C" fn(raw::retro_audio_sample_t),
    pub set_audio_sample_batch: unsafe extern "C" fn(raw::retro_audio_sample_batch_t),
    pub set_input_poll: unsafe extern "C" fn(raw::retro_input_poll_t),
    pub set_input_state: unsafe extern "C" fn(raw::retro_input_state_t),
    pub load_game: unsafe extern "C" fn(*const raw::retro_game_info) -> bool,
    pub run: unsafe extern "C" fn(),
    pub get_system_av_info: unsafe extern "C" fn(*mut raw::retro_system_av_info),

    pub serialize_size: Option<unsafe extern "C" fn() -> usize>,
    pub serialize: Option<unsafe extern "C" fn(*mut c_void, usize) -> bool>,
    pub unserialize: Option<unsafe extern "C" fn(*const c_void, usize) -> bool>,
    pub get_memory_data: Option<unsafe extern "C" fn(c_uint) -> *mut c_void>,
    pub get_memory_size: Option<unsafe extern "C" fn(c_uint) -> usize>,
    pub get_system_info: Option<unsafe extern "C" fn(*mut raw::retro_system_info)>,
    pub reset: Option<unsafe extern "C" fn()>,
    pub unload_game: Option<unsafe extern "C" fn()>,
    pub set_controller_port_device: Option<unsafe extern "C" fn(c_uint, c_uint)>,
    pub api_version: Option<unsafe extern "C" fn() -> c_uint>,
}

impl FunctionTable {
    /// Names of optional entry points the core does not export.
    pub fn missing_optional(&self) -> Vec<&'static str> {
        let present = [
            ("retro_serialize_size", self.serialize_size.is_some()),
            ("retro_serialize", self.serialize.is_some()),
            ("retro_unserialize", self.unserialize.is_some()),
            ("retro_get_memory_data", self.get_memory_data.is_some()),
            ("retro_get_memory_size", self.get_memory_size.is_some()),
            ("retro_get_system_info", self.get_system_info.is_some()),
            ("retro_reset", self.reset.is_some()),
            ("retro_unload_game", self.unload_game.is_some()),
            (
                "retro_set_controller_port_device",
                self.set_controller_port_device.is_some(),
            ),
            ("retro_api_version", self.api_version.is_some()),
        ];
        present
            .into_iter()
            .filter(|(_, ok)| !ok)
            .map(|(name, _)| name)
            .collect()
    }

    /// Resolves every entry point from an opened library.
    ///
    /// # Safety
    ///
    /// `lib` must be a libretro core: each exported symbol must have the
    /// signature declared in `libretro.h`.
    pub unsafe fn bind(lib: &Library) -> Result<Self, LoadError> {
        macro_rules! required {
            ($name:literal, $ty:ty) => {
                // SAFETY: signature is the libretro one, guaranteed by the caller.
                *unsafe { lib.get::<$ty>(concat!($name, "\0").as_bytes()) }
                    .map_err(|_| LoadError::MissingSymbol { name: $name })?
            };
        }
        macro_rules! optional {
            ($name:literal, $ty:ty) => {
                // SAFETY: as above.
                unsafe { lib.get::<$ty>(concat!($name, "\0").as_bytes()) }
                    .ok()
                    .map(|sym| *sym)
            };
        }

        Ok(Self {
            init: required!("retro_init", unsafe extern "C" fn()),
            deinit: required!("retro_deinit", unsafe extern "C" fn()),
            set_environment: required!(
                "retro_set_environment",
                unsafe extern "C" fn(raw::retro_environment_t)
            ),
            set_video_refresh: required!(
                "retro_set_video_refresh",
                unsafe extern "C" fn(raw::retro_video_refresh_t)
            ),
            set_audio_sample: required!(
                "retro_set_audio_sample",
                unsafe extern "C" fn(raw::retro_audio_sample_t)
            ),
            set_audio_sample_batch: required!(
                "retro_set_audio_sample_batch",
                unsafe extern "C" fn(raw::retro_audio_sample_batch_t)
            ),
            set_input_poll: required!(
                "retro_set_input_poll",
                unsafe extern "C" fn(raw::retro_input_poll_t)
            ),
            set_input_state: required!(
                "retro_set_input_state",
                unsafe extern "C" fn(raw::retro_input_state_t)
            ),
            load_game: required!(
                "retro_load_game",
                unsafe extern "C" fn(*const raw::retro_game_info) -> bool
            ),
            run: required!("retro_run", unsafe extern "C" fn()),
            get_system_av_info: required!(
                "retro_get_system_av_info",
                unsafe extern "C" fn(*mut raw::retro_system_av_info)
            ),
            serialize_size: optional!("retro_serialize_size", unsafe extern "C" fn() -> usize),
            serialize: optional!(
                "retro_serialize",
                unsafe extern "C" fn(*mut c_void, usize) -> bool
            ),
            unserialize: optional!(
                "retro_unserialize",
                unsafe extern "C" fn(*const c_void, usize) -> bool
            ),
            get_memory_data: optional!(
                "retro_get_memory_data",
                unsafe extern "C" fn(c_uint) -> *mut c_void
            ),
            get_memory_size: optional!(
                "retro_get_memory_size",
                unsafe extern "C" fn(c_uint) -> usize
            ),
            get_system_info: optional!(
                "retro_get_system_info",
                unsafe extern "C" fn(*mut raw::retro_system_info)
            ),
            reset: optional!("retro_reset", unsafe extern "C" fn()),
            unload_game: optional!("retro_unload_game", unsafe extern "C" fn()),
            set_controller_port_device: optional!(
                "retro_set_controller_port_device",
                unsafe extern "C" fn(c_uint, c_uint)
            ),
            api_version: optional!("retro_api_version", unsafe extern "C" fn() -> c_uint),
        })
    }
}

/// Identification strings reported by `retro_get_system_info`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CoreInfo {
    pub library_name: String,
    pub library_version: String,
    pub valid_extensions: String,
    pub need_fullpath: bool,
}

/// A bound core. The library, when there is one, is closed on drop.
pub struct LoadedCore {
    table: FunctionTable,
    path: Option<PathBuf>,
    // Dropped last so no function pointer above outlives the mapping.
    _library: Option<Library>,
}

impl LoadedCore {
    /// Opens `path` and binds its entry points.
    pub fn open(path: &Path) -> Result<Self, LoadError> {
        // SAFETY: running a library's initialisers is inherent to loading a core.
        let library = unsafe { Library::new(path) }.map_err(|source| LoadError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        // SAFETY: the library is treated as a libretro core.
        let table = unsafe { FunctionTable::bind(&library) }?;

        let core = Self {
            table,
            path: Some(path.to_path_buf()),
            _library: Some(library),
        };
        let missing = core.table.missing_optional();
        tracing::info!("core loaded from {:?}", path);
        if !missing.is_empty() {
            tracing::warn!("core lacks optional entry points: {}", missing.join(", "));
        }
        core.check_api_version();
        Ok(core)
    }

    /// Tries each candidate location for `profile` and opens the first that exists.
    pub fn locate(profile: &ConsoleProfile, config: &HostConfig) -> Result<Self, LoadError> {
        let searched = library_candidates(profile, config);
        match searched.iter().find(|p| p.is_file()) {
            Some(path) => Self::open(path),
            None => {
                tracing::warn!("no {} core found, searched {:?}", profile.id, searched);
                Err(LoadError::NotFound { searched })
            }
        }
    }

    /// Wraps a core linked into the host binary.
    pub fn from_static(table: FunctionTable) -> Self {
        let core = Self {
            table,
            path: None,
            _library: None,
        };
        core.check_api_version();
        core
    }

    pub fn table(&self) -> &FunctionTable {
        &self.table
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn check_api_version(&self) {
        if let Some(api_version) = self.table.api_version {
            // SAFETY: bound from the core.
            let version = unsafe { api_version() };
            if version != raw::RETRO_API_VERSION {
                tracing::warn!("core reports libretro API version {}", version);
            }
        }
    }

    pub fn system_info(&self) -> Option<CoreInfo> {
        let get_system_info = self.table.get_system_info?;
        let mut info = raw::retro_system_info::default();
        // SAFETY: `info` is a valid out-pointer for the duration of the call.
        unsafe { get_system_info(&mut info) };
        Some(CoreInfo {
            library_name: lossy(info.library_name),
            library_version: lossy(info.library_version),
            valid_extensions: lossy(info.valid_extensions),
            need_fullpath: info.need_fullpath,
        })
    }
}

fn lossy(ptr: *const c_char) -> String {
    if ptr.is_null() {
        return String::new();
    }
    // SAFETY: non-null strings from the core are NUL terminated and static.
    unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned()
}

/// Ordered search locations for a console's core library.
pub fn library_candidates(profile: &ConsoleProfile, config: &HostConfig) -> Vec<PathBuf> {
    let flat = format!("{}.{}", profile.library_stem, std::env::consts::DLL_EXTENSION);
    let framework = format!("{}.framework", profile.framework);

    let mut candidates = Vec::with_capacity(4);
    if let Some(path) = &config.core_override {
        candidates.push(path.clone());
    }
    candidates.push(config.plugins_dir.join(framework).join(profile.framework));
    candidates.push(config.plugins_dir.join(&flat));
    candidates.push(config.bundle_root.join(&flat));
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::console::{ConsoleKit, Snes};

    fn config_in(dir: &Path) -> HostConfig {
        HostConfig {
            plugins_dir: dir.join("PlugIns"),
            bundle_root: dir.to_path_buf(),
            ..HostConfig::headless(dir.join("data"))
        }
    }

    #[test]
    fn candidates_follow_search_order() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut cfg = config_in(dir.path());
        cfg.core_override = Some(PathBuf::from("/opt/cores/custom.so"));
        let ext = std::env::consts::DLL_EXTENSION;

        let candidates = library_candidates(&Snes::profile(), &cfg);
        assert_eq!(
            candidates,
            vec![
                PathBuf::from("/opt/cores/custom.so"),
                dir.path().join("PlugIns/Snes9x.framework/Snes9x"),
                dir.path().join(format!("PlugIns/snes9x_libretro_ios.{ext}")),
                dir.path().join(format!("snes9x_libretro_ios.{ext}")),
            ]
        );
    }

    #[test]
    fn missing_library_reports_every_searched_path() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cfg = config_in(dir.path());
        match LoadedCore::locate(&Snes::profile(), &cfg) {
            Err(LoadError::NotFound { searched }) => assert_eq!(searched.len(), 3),
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("nothing to load"),
        }
    }

    #[test]
    fn garbage_file_fails_to_open() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cfg = config_in(dir.path());
        let ext = std::env::consts::DLL_EXTENSION;
        let bogus = dir.path().join(format!("snes9x_libretro_ios.{ext}"));
        std::fs::write(&bogus, b"not a shared object").expect("write");

        match LoadedCore::locate(&Snes::profile(), &cfg) {
            Err(LoadError::Open { path, .. }) => assert_eq!(path, bogus),
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("garbage must not load"),
        }
    }
}
