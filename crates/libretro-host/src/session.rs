//! One running core per console kit.

use std::ffi::CString;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::audio::{AudioPipeline, RingConsumer, RingStats};
use crate::callbacks;
use crate::config::HostConfig;
use crate::console::{ConsoleKit, ConsoleProfile};
use crate::error::{HostError, LoadError};
use crate::input::{ControllerSource, InputState, NoController, RetroPad};
use crate::loader::{CoreInfo, FunctionTable, LoadedCore};
use crate::persistence;
use crate::pump::{FramePump, PumpControl, PumpTiming, Tick};
use crate::raw;
use crate::registry::{self, SessionShared, SessionToken};
use crate::video::{NullUploader, TextureUploader, VideoSink};

/// Used when a core reports a non-positive sample rate.
const FALLBACK_SAMPLE_RATE: f64 = 48_000.0;

/// Geometry and timing reported by `retro_get_system_av_info`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AvInfo {
    pub base_width: u32,
    pub base_height: u32,
    pub max_width: u32,
    pub max_height: u32,
    pub aspect_ratio: f32,
    pub fps: f64,
    pub sample_rate: f64,
}

impl From<raw::retro_system_av_info> for AvInfo {
    fn from(info: raw::retro_system_av_info) -> Self {
        Self {
            base_width: info.geometry.base_width,
            base_height: info.geometry.base_height,
            max_width: info.geometry.max_width,
            max_height: info.geometry.max_height,
            aspect_ratio: info.geometry.aspect_ratio,
            fps: info.timing.fps,
            sample_rate: info.timing.sample_rate,
        }
    }
}

struct LoadedGame {
    path: PathBuf,
    // Both stay alive for as long as the core may reference them.
    _path_c: CString,
    _rom: Vec<u8>,
    battery_path: Option<PathBuf>,
}

/// A loaded core for console kit `K`, with its pump, audio and persistence.
pub struct CoreSession<K: ConsoleKit> {
    shared: Arc<SessionShared>,
    token: SessionToken,
    config: HostConfig,
    game: Option<LoadedGame>,
    av_info: Option<AvInfo>,
    pump: FramePump,
    audio: AudioPipeline,
    controller: Box<dyn ControllerSource>,
    controller_fast_forward: bool,
    /// Set while the pump is halted by a pause rather than an explicit stop.
    suspended: bool,
    // Declared last: the library closes after everything above is dropped.
    core: LoadedCore,
    _kit: PhantomData<K>,
}

impl<K: ConsoleKit> CoreSession<K> {
    /// Searches for the core library of `profile` and brings it up.
    pub fn open(
        config: HostConfig,
        profile: ConsoleProfile,
        uploader: Box<dyn TextureUploader>,
    ) -> Result<Self, HostError> {
        let core = LoadedCore::locate(&profile, &config)?;
        Ok(Self::with_core(core, config, profile, uploader)?)
    }

    /// Registers callbacks for an already bound core and calls `retro_init`.
    pub fn with_core(
        core: LoadedCore,
        config: HostConfig,
        profile: ConsoleProfile,
        uploader: Box<dyn TextureUploader>,
    ) -> Result<Self, LoadError> {
        let video = VideoSink::new(uploader, profile.default_pixel_format);
        let save_dir = config.saves_dir(profile.save_dir_name);
        let shared = Arc::new(SessionShared::new(
            profile,
            video,
            save_dir,
            config.system_dir(),
        ));
        let token = registry::register(K::ID, shared.clone())?;

        let table = *core.table();
        callbacks::install::<K>(&table);
        // SAFETY: callbacks are installed; init is called once per load.
        unsafe { (table.init)() };
        if let Some(info) = core.system_info() {
            tracing::info!(
                "{} core ready: {} {}",
                K::ID,
                info.library_name,
                info.library_version
            );
        }

        let control = PumpControl::new();
        Ok(Self {
            shared,
            token,
            audio: AudioPipeline::new(config.audio, config.audio_latency),
            config,
            game: None,
            av_info: None,
            pump: FramePump::new(control),
            controller: Box::new(NoController),
            controller_fast_forward: false,
            suspended: false,
            core,
            _kit: PhantomData,
        })
    }

    fn table(&self) -> FunctionTable {
        *self.core.table()
    }

    pub fn set_controller_source(&mut self, source: Box<dyn ControllerSource>) {
        self.controller = source;
    }

    pub fn profile(&self) -> &ConsoleProfile {
        &self.shared.profile
    }

    pub fn core_info(&self) -> Option<CoreInfo> {
        self.core.system_info()
    }

    pub fn missing_optional(&self) -> Vec<&'static str> {
        self.core.table().missing_optional()
    }

    /// Loads `rom` into the core and starts pacing frames.
    ///
    /// A rejected ROM leaves the core loaded and the session reusable.
    pub fn load_game(&mut self, rom: &Path) -> Result<AvInfo, HostError> {
        if self.game.is_some() {
            self.unload_game();
        }

        let bytes = std::fs::read(rom).map_err(|source| HostError::RomRead {
            path: rom.to_path_buf(),
            source,
        })?;
        let path_c = CString::new(rom.to_string_lossy().into_owned()).map_err(|_| {
            HostError::GameLoad {
                path: rom.to_path_buf(),
            }
        })?;
        let info = raw::retro_game_info {
            path: path_c.as_ptr(),
            data: bytes.as_ptr().cast(),
            size: bytes.len(),
            meta: std::ptr::null(),
        };

        let table = self.table();
        // SAFETY: `info` and the buffers it points at outlive the call, and
        // are kept alive afterwards for cores that retain them.
        if !unsafe { (table.load_game)(&info) } {
            tracing::warn!("{} core rejected {:?}", K::ID, rom);
            return Err(HostError::GameLoad {
                path: rom.to_path_buf(),
            });
        }

        let mut raw_av = raw::retro_system_av_info::default();
        // SAFETY: valid out-pointer.
        unsafe { (table.get_system_av_info)(&mut raw_av) };
        let av_info = AvInfo::from(raw_av);
        if let Some(set_port) = table.set_controller_port_device {
            // SAFETY: bound from the core.
            unsafe { set_port(0, raw::RETRO_DEVICE_JOYPAD) };
        }
        tracing::info!(
            "Game loaded: {:?} ({}x{} @ {:.3} fps, {:.0} Hz)",
            rom,
            av_info.base_width,
            av_info.base_height,
            av_info.fps,
            av_info.sample_rate
        );

        let battery_path = persistence::battery_save_path(&self.shared.save_dir, rom);
        self.game = Some(LoadedGame {
            path: rom.to_path_buf(),
            _path_c: path_c,
            _rom: bytes,
            battery_path,
        });
        self.av_info = Some(av_info);
        self.load_battery_save();
        self.start();
        Ok(av_info)
    }

    fn load_battery_save(&self) {
        let Some(path) = self.game.as_ref().and_then(|g| g.battery_path.as_deref()) else {
            return;
        };
        let table = self.table();
        if let Err(e) = persistence::load_battery_save(&table, self.shared.profile.save_ram_id, path) {
            tracing::warn!("failed to load save RAM from {:?}: {}", path, e);
        }
    }

    /// Writes save RAM to disk. Returns bytes written, `None` if the core has none.
    pub fn flush_battery_save(&self) -> Result<Option<usize>, HostError> {
        let Some(path) = self.game.as_ref().and_then(|g| g.battery_path.as_deref()) else {
            return Ok(None);
        };
        let table = self.table();
        Ok(persistence::write_battery_save(
            &table,
            self.shared.profile.save_ram_id,
            path,
        )?)
    }

    fn flush_battery_save_logged(&self) {
        if let Err(e) = self.flush_battery_save() {
            tracing::warn!("failed to write save RAM: {}", e);
        }
    }

    fn start(&mut self) {
        let Some(av) = self.av_info else {
            return;
        };
        let timing = self.pump.start(av.fps, self.config.display_refresh_cap);
        let sample_rate = if av.sample_rate.is_finite() && av.sample_rate > 0.0 {
            av.sample_rate
        } else {
            FALLBACK_SAMPLE_RATE
        };
        let producer = self.audio.start(sample_rate * timing.audio_rate_scale);
        *self.shared.audio.lock() = Some(producer);
        self.pump.control().clear_stop();
        self.pump.control().set_paused(false);
        self.suspended = false;
    }

    fn halt(&mut self) {
        self.flush_battery_save_logged();
        self.pump.stop();
        self.shared.audio.lock().take();
        self.audio.stop();
    }

    /// Flushes save RAM, then stops the pump and the audio output.
    ///
    /// The paced loop does not restart a stopped session; call [`CoreSession::resume`].
    pub fn stop(&mut self) {
        self.halt();
        self.suspended = false;
    }

    /// Stops pacing and audio without unloading anything.
    pub fn pause(&mut self) {
        self.pump.control().set_paused(true);
        if !self.pump.is_running() {
            return;
        }
        self.halt();
        self.suspended = true;
        tracing::debug!("{} session paused", K::ID);
    }

    /// Restarts pacing and audio at the recorded rates.
    pub fn resume(&mut self) {
        self.pump.control().set_paused(false);
        if self.game.is_some() && !self.pump.is_running() {
            self.start();
            tracing::debug!("{} session resumed", K::ID);
        }
    }

    /// Stops the session and unloads the current game, keeping the core.
    pub fn unload_game(&mut self) {
        if self.game.is_none() {
            return;
        }
        self.stop();
        if let Some(unload) = self.table().unload_game {
            // SAFETY: a game is loaded.
            unsafe { unload() };
        }
        self.game = None;
        self.av_info = None;
    }

    pub fn has_game(&self) -> bool {
        self.game.is_some()
    }

    pub fn game_path(&self) -> Option<&Path> {
        self.game.as_ref().map(|g| g.path.as_path())
    }

    pub fn battery_save_path(&self) -> Option<&Path> {
        self.game.as_ref().and_then(|g| g.battery_path.as_deref())
    }

    pub fn av_info(&self) -> Option<AvInfo> {
        self.av_info
    }

    pub fn is_running(&self) -> bool {
        self.pump.is_running()
    }

    pub fn pump_timing(&self) -> Option<PumpTiming> {
        self.pump.timing()
    }

    pub fn control(&self) -> PumpControl {
        self.pump.control().clone()
    }

    pub fn set_fast_forward(&self, enabled: bool) {
        self.pump.control().set_fast_forward(enabled);
    }

    pub fn input(&self) -> &InputState {
        &self.shared.input
    }

    pub fn redraw_flag(&self) -> Arc<AtomicBool> {
        self.shared.video.lock().redraw_flag()
    }

    pub fn frames_uploaded(&self) -> u64 {
        self.shared.video.lock().frames_uploaded()
    }

    /// Stereo frames the core has handed to the audio callbacks.
    pub fn audio_frames_received(&self) -> u64 {
        self.shared.audio_frames.load(Ordering::Relaxed)
    }

    pub fn audio_stats(&self) -> Option<RingStats> {
        self.audio.stats()
    }

    /// `Err(HostError::Audio)` when output was requested but no device opened.
    pub fn audio_status(&self) -> Result<(), HostError> {
        self.audio.device_status()
    }

    pub fn audio_rate(&self) -> f64 {
        self.audio.rate()
    }

    /// The audio ring's consumer when no output device is attached.
    pub fn detached_audio(&mut self) -> Option<&mut RingConsumer> {
        self.audio.detached_consumer()
    }

    pub fn reset(&mut self) -> bool {
        match self.table().reset {
            Some(reset) if self.game.is_some() => {
                // SAFETY: bound from the core; a game is loaded.
                unsafe { reset() };
                true
            }
            _ => false,
        }
    }

    /// Refreshes the physical mask from the controller source.
    fn poll_controller(&mut self) {
        let (mask, fast_forward) = match self.controller.poll() {
            Some(snapshot) => self.shared.profile.mapping.apply(&snapshot),
            None => (RetroPad::empty(), false),
        };
        self.shared.input.set_physical(mask);
        if fast_forward {
            self.controller_fast_forward = true;
            self.set_fast_forward(true);
        } else if self.controller_fast_forward {
            self.controller_fast_forward = false;
            self.set_fast_forward(false);
        }
    }

    /// Steps the core `runs` times after refreshing input.
    fn step(&mut self, runs: u32) {
        self.poll_controller();
        if self.pump.take_fast_forward_release() {
            if let Some(producer) = self.shared.audio.lock().as_ref() {
                producer.request_flush();
            }
        }
        let run = self.table().run;
        for _ in 0..runs {
            // SAFETY: a game is loaded and the library stays mapped while `self` lives.
            unsafe { run() };
        }
    }

    /// Runs one tick immediately, without pacing. Returns the number of `run()` calls.
    pub fn run_frame(&mut self) -> Result<u32, HostError> {
        if self.game.is_none() {
            return Err(HostError::NoGame);
        }
        match self.pump.next_tick() {
            Tick::Run(runs) => {
                self.step(runs);
                Ok(runs)
            }
            Tick::Paused | Tick::Stopped => Ok(0),
        }
    }

    /// Runs `ticks` paced ticks, or until a stop is requested through [`PumpControl`].
    ///
    /// Returns early when the session is paused or stopped. A session paused
    /// through [`PumpControl`] and then unpaused is restarted by the next call.
    /// Returns the number of ticks that ran.
    pub fn run_ticks(&mut self, ticks: u64) -> Result<u64, HostError> {
        self.drive(Some(ticks))
    }

    /// Runs paced ticks until a stop is requested.
    pub fn run_until_stopped(&mut self) -> Result<u64, HostError> {
        self.drive(None)
    }

    fn drive(&mut self, limit: Option<u64>) -> Result<u64, HostError> {
        if self.game.is_none() {
            return Err(HostError::NoGame);
        }
        let control = self.control();
        let mut ran = 0;
        while limit.is_none_or(|limit| ran < limit) {
            if control.stop_requested() {
                break;
            }
            if control.is_paused() {
                if self.pump.is_running() {
                    self.pause();
                }
                break;
            }
            if !self.pump.is_running() {
                if !self.suspended {
                    break;
                }
                self.resume();
            }
            match self.pump.wait_next_tick() {
                Tick::Run(runs) => {
                    self.step(runs);
                    ran += 1;
                }
                Tick::Paused | Tick::Stopped => break,
            }
        }
        control.clear_stop();
        Ok(ran)
    }

    /// Serializes the running game.
    pub fn save_state(&self) -> Result<Vec<u8>, HostError> {
        if self.game.is_none() {
            return Err(HostError::NoGame);
        }
        Ok(persistence::save_state(self.core.table())?)
    }

    /// Restores a blob produced by [`CoreSession::save_state`].
    pub fn load_state(&self, blob: &[u8]) -> Result<(), HostError> {
        if self.game.is_none() {
            return Err(HostError::NoGame);
        }
        Ok(persistence::load_state(self.core.table(), blob)?)
    }
}

impl<K: ConsoleKit> Drop for CoreSession<K> {
    fn drop(&mut self) {
        self.unload_game();
        // SAFETY: pump and audio are stopped; nothing calls into the core after this.
        unsafe { (self.table().deinit)() };
        registry::unregister(K::ID, self.token);
        tracing::info!("{} core unloaded", K::ID);
    }
}

enum CoreSource {
    Locate,
    Static(FunctionTable),
}

/// Owns at most one [`CoreSession`] for kit `K` and handles ROM switching.
pub struct ConsoleHost<K: ConsoleKit> {
    config: HostConfig,
    profile: ConsoleProfile,
    source: CoreSource,
    make_uploader: Box<dyn FnMut() -> Box<dyn TextureUploader>>,
    session: Option<CoreSession<K>>,
}

impl<K: ConsoleKit> ConsoleHost<K> {
    pub fn new(config: HostConfig) -> Self {
        Self {
            config,
            profile: K::profile(),
            source: CoreSource::Locate,
            make_uploader: Box::new(|| Box::new(NullUploader)),
            session: None,
        }
    }

    pub fn with_profile(mut self, profile: ConsoleProfile) -> Self {
        self.profile = profile;
        self
    }

    /// Uses a statically linked core instead of searching for a library.
    pub fn with_static_core(mut self, table: FunctionTable) -> Self {
        self.source = CoreSource::Static(table);
        self
    }

    /// Factory for the uploader given to each new session.
    pub fn with_uploader(
        mut self,
        make_uploader: impl FnMut() -> Box<dyn TextureUploader> + 'static,
    ) -> Self {
        self.make_uploader = Box::new(make_uploader);
        self
    }

    fn open_session(&mut self) -> Result<CoreSession<K>, HostError> {
        let uploader = (self.make_uploader)();
        match &self.source {
            CoreSource::Locate => {
                CoreSession::open(self.config.clone(), self.profile.clone(), uploader)
            }
            CoreSource::Static(table) => Ok(CoreSession::with_core(
                LoadedCore::from_static(*table),
                self.config.clone(),
                self.profile.clone(),
                uploader,
            )?),
        }
    }

    /// Loads `rom`, tearing down a session that already has a game first.
    pub fn load_game(&mut self, rom: &Path) -> Result<&mut CoreSession<K>, HostError> {
        if self.session.as_ref().is_some_and(CoreSession::has_game) {
            tracing::info!("{} switching game, unloading current core", K::ID);
            self.session = None;
        }
        let mut session = match self.session.take() {
            Some(session) => session,
            None => self.open_session()?,
        };
        let result = session.load_game(rom);
        let session = self.session.insert(session);
        result.map(|_| session)
    }

    pub fn session(&self) -> Option<&CoreSession<K>> {
        self.session.as_ref()
    }

    pub fn session_mut(&mut self) -> Option<&mut CoreSession<K>> {
        self.session.as_mut()
    }

    /// Tears down the session and closes the core.
    pub fn unload(&mut self) {
        self.session = None;
    }
}
