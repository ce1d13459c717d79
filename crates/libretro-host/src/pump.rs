//! Frame pacing for `retro_run`.
//!
//! The pump runs cooperatively on the session's thread: it waits for the next
//! deadline with a sleep-then-spin strategy and tells the caller how many
//! times to step the core. [`PumpControl`] lets other threads pause, stop or
//! fast-forward it.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

pub const FALLBACK_FPS: f64 = 60.0;
pub const FAST_FORWARD_MULTIPLIER: u32 = 3;

/// A core this far above the refresh cap is paced at the cap instead.
const REFRESH_CAP_TOLERANCE: f64 = 0.1;

// Hybrid wait tuning:
// - Sleep in small chunks until we're close to the deadline.
// - Spin for the final window for tighter frame pacing.
const MAX_SLEEP_CHUNK: Duration = Duration::from_millis(4);
const SPIN_THRESHOLD: Duration = Duration::from_micros(300);
const SPIN_YIELD_EVERY: u32 = 512;

#[derive(Debug, Default)]
struct PumpFlags {
    paused: AtomicBool,
    fast_forward: AtomicBool,
    stop: AtomicBool,
}

/// Thread-safe handle steering a [`FramePump`].
#[derive(Debug, Clone, Default)]
pub struct PumpControl {
    flags: Arc<PumpFlags>,
}

impl PumpControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_paused(&self, paused: bool) {
        self.flags.paused.store(paused, Ordering::Release);
    }

    pub fn is_paused(&self) -> bool {
        self.flags.paused.load(Ordering::Acquire)
    }

    pub fn set_fast_forward(&self, enabled: bool) {
        self.flags.fast_forward.store(enabled, Ordering::Release);
    }

    pub fn is_fast_forward(&self) -> bool {
        self.flags.fast_forward.load(Ordering::Acquire)
    }

    /// Asks a running loop to return at its next wait.
    pub fn request_stop(&self) {
        self.flags.stop.store(true, Ordering::Release);
    }

    pub fn stop_requested(&self) -> bool {
        self.flags.stop.load(Ordering::Acquire)
    }

    pub(crate) fn clear_stop(&self) {
        self.flags.stop.store(false, Ordering::Release);
    }
}

/// Tick rate and audio correction derived from a core's timing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PumpTiming {
    /// Frames the core claims per second after the fallback is applied.
    pub core_fps: f64,
    /// Rate the pump actually ticks at.
    pub tick_rate: f64,
    /// Factor applied to the core's sample rate for the output stream.
    pub audio_rate_scale: f64,
}

impl PumpTiming {
    pub fn new(fps: f64, refresh_cap: Option<f64>) -> Self {
        let core_fps = if fps.is_finite() && fps > 0.0 {
            fps
        } else {
            FALLBACK_FPS
        };
        match refresh_cap {
            Some(cap) if cap > 0.0 && core_fps > cap + REFRESH_CAP_TOLERANCE => Self {
                core_fps,
                tick_rate: cap,
                audio_rate_scale: cap / core_fps,
            },
            _ => Self {
                core_fps,
                tick_rate: core_fps,
                audio_rate_scale: 1.0,
            },
        }
    }

    pub fn frame_duration(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.tick_rate)
    }
}

/// What the caller should do after [`FramePump::wait_next_tick`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// Step the core this many times.
    Run(u32),
    /// The pump is paused; nothing to run.
    Paused,
    /// A stop was requested or the pump is not running.
    Stopped,
}

pub struct FramePump {
    control: PumpControl,
    timing: Option<PumpTiming>,
    frame_duration: Duration,
    next_deadline: Instant,
    last_fast_forward: bool,
    ticks: u64,
}

impl FramePump {
    pub fn new(control: PumpControl) -> Self {
        Self {
            control,
            timing: None,
            frame_duration: PumpTiming::new(FALLBACK_FPS, None).frame_duration(),
            next_deadline: Instant::now(),
            last_fast_forward: false,
            ticks: 0,
        }
    }

    pub fn control(&self) -> &PumpControl {
        &self.control
    }

    /// Starts ticking at the rate derived from `fps` and `refresh_cap`.
    pub fn start(&mut self, fps: f64, refresh_cap: Option<f64>) -> PumpTiming {
        let timing = PumpTiming::new(fps, refresh_cap);
        if timing.tick_rate != timing.core_fps {
            tracing::info!(
                "core runs at {:.3} fps, pacing at {:.1} Hz (audio x{:.4})",
                timing.core_fps,
                timing.tick_rate,
                timing.audio_rate_scale
            );
        }
        self.frame_duration = timing.frame_duration();
        self.next_deadline = Instant::now();
        self.timing = Some(timing);
        timing
    }

    pub fn stop(&mut self) {
        self.timing = None;
    }

    pub fn is_running(&self) -> bool {
        self.timing.is_some()
    }

    pub fn timing(&self) -> Option<PumpTiming> {
        self.timing
    }

    pub fn frame_duration(&self) -> Duration {
        self.frame_duration
    }

    /// Number of ticks handed out so far.
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// `run()` calls per tick at the current fast-forward setting.
    pub fn runs_per_tick(&self) -> u32 {
        if self.control.is_fast_forward() {
            FAST_FORWARD_MULTIPLIER
        } else {
            1
        }
    }

    /// Returns true once when fast-forward has just been switched off.
    pub fn take_fast_forward_release(&mut self) -> bool {
        let now = self.control.is_fast_forward();
        let released = self.last_fast_forward && !now;
        self.last_fast_forward = now;
        released
    }

    /// Hands out a tick without waiting.
    pub fn next_tick(&mut self) -> Tick {
        if self.control.stop_requested() || !self.is_running() {
            return Tick::Stopped;
        }
        if self.control.is_paused() {
            return Tick::Paused;
        }
        self.ticks += 1;
        Tick::Run(self.runs_per_tick())
    }

    /// Blocks until the next frame deadline, then hands out a tick.
    pub fn wait_next_tick(&mut self) -> Tick {
        if !self.is_running() {
            return Tick::Stopped;
        }
        if !self.wait_until_deadline() {
            return Tick::Stopped;
        }

        self.next_deadline += self.frame_duration;
        let now = Instant::now();
        if now > self.next_deadline
            && now.duration_since(self.next_deadline) > self.frame_duration * 2
        {
            self.next_deadline = now;
        }
        self.next_tick()
    }

    /// Returns false if a stop was requested while waiting.
    fn wait_until_deadline(&self) -> bool {
        let mut spins: u32 = 0;
        loop {
            if self.control.stop_requested() {
                return false;
            }
            let now = Instant::now();
            if now >= self.next_deadline {
                return true;
            }
            let remaining = self.next_deadline - now;

            // Coarse phase: sleep in chunks while still far from the deadline,
            // but always keep a final spin window.
            if remaining > SPIN_THRESHOLD {
                thread::sleep((remaining - SPIN_THRESHOLD).min(MAX_SLEEP_CHUNK));
                continue;
            }

            spins = spins.wrapping_add(1);
            if spins % SPIN_YIELD_EVERY == 0 {
                thread::yield_now();
            } else {
                std::hint::spin_loop();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_fps_falls_back_to_sixty() {
        for fps in [0.0, -5.0, f64::NAN, f64::INFINITY] {
            let timing = PumpTiming::new(fps, None);
            assert_eq!(timing.tick_rate, 60.0);
            assert_eq!(timing.audio_rate_scale, 1.0);
        }
    }

    #[test]
    fn fast_cores_are_capped_and_audio_scaled() {
        let timing = PumpTiming::new(75.0, Some(60.0));
        assert_eq!(timing.tick_rate, 60.0);
        assert!((timing.audio_rate_scale - 0.8).abs() < 1e-12);

        // NTSC 60.0988 is within the tolerance above 60.
        let ntsc = PumpTiming::new(60.0988, Some(60.0));
        assert_eq!(ntsc.tick_rate, 60.0988);
        assert_eq!(ntsc.audio_rate_scale, 1.0);

        let just_over = PumpTiming::new(60.2, Some(60.0));
        assert_eq!(just_over.tick_rate, 60.0);
        assert!(just_over.audio_rate_scale < 1.0);

        let uncapped = PumpTiming::new(75.0, None);
        assert_eq!(uncapped.tick_rate, 75.0);
    }

    #[test]
    fn fast_forward_triples_runs() {
        let control = PumpControl::new();
        let mut pump = FramePump::new(control.clone());
        pump.start(60.0, None);
        assert_eq!(pump.next_tick(), Tick::Run(1));
        control.set_fast_forward(true);
        assert_eq!(pump.next_tick(), Tick::Run(FAST_FORWARD_MULTIPLIER));
    }

    #[test]
    fn fast_forward_release_is_reported_once() {
        let control = PumpControl::new();
        let mut pump = FramePump::new(control.clone());
        control.set_fast_forward(true);
        assert!(!pump.take_fast_forward_release());
        control.set_fast_forward(false);
        assert!(pump.take_fast_forward_release());
        assert!(!pump.take_fast_forward_release());
    }

    #[test]
    fn pause_and_stop_are_observed() {
        let control = PumpControl::new();
        let mut pump = FramePump::new(control.clone());
        assert_eq!(pump.next_tick(), Tick::Stopped);

        pump.start(60.0, None);
        control.set_paused(true);
        assert_eq!(pump.next_tick(), Tick::Paused);
        control.set_paused(false);
        control.request_stop();
        assert_eq!(pump.wait_next_tick(), Tick::Stopped);
    }

    #[test]
    fn waits_pace_ticks_to_frame_rate() {
        let mut pump = FramePump::new(PumpControl::new());
        pump.start(100.0, None);
        let started = Instant::now();
        for _ in 0..4 {
            assert_eq!(pump.wait_next_tick(), Tick::Run(1));
        }
        // First tick fires immediately, the next three are 10 ms apart.
        assert!(started.elapsed() >= Duration::from_millis(29));
        assert_eq!(pump.ticks(), 4);
    }
}
