mod args;

use std::fs::File;
use std::path::Path;

use anyhow::Context;
use clap::Parser;
use libretro_host::{
    AudioMode, ConsoleHost, ConsoleKit, CoreSession, CpuTexture, Ds, Genesis, HostConfig, Nes,
    Snes,
};
use tracing::{info, warn};
use tracing_subscriber::FmtSubscriber;

use crate::args::{Args, ConsoleArg};

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(args.log_level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match args.console {
        ConsoleArg::Nes => run::<Nes>(&args),
        ConsoleArg::Snes => run::<Snes>(&args),
        ConsoleArg::Genesis => run::<Genesis>(&args),
        ConsoleArg::Ds => run::<Ds>(&args),
    }
}

fn host_config(args: &Args) -> HostConfig {
    let mut config = HostConfig::default();
    if let Some(dir) = &args.data_dir {
        config.data_dir = dir.clone();
    }
    if let Some(dir) = &args.bundle_root {
        config.plugins_dir = dir.join("PlugIns");
        config.bundle_root = dir.clone();
    }
    if let Some(dir) = &args.plugins_dir {
        config.plugins_dir = dir.clone();
    }
    config.core_override = args.core.clone();
    if args.no_audio {
        config.audio = AudioMode::Disabled;
    }
    config
}

fn run<K: ConsoleKit>(args: &Args) -> anyhow::Result<()> {
    let mut profile = K::profile();
    for (key, value) in &args.core_options {
        profile = profile.with_core_option(key.as_str(), value.as_str());
    }

    let texture = CpuTexture::new();
    let screen = texture.clone();
    let mut host = ConsoleHost::<K>::new(host_config(args))
        .with_profile(profile)
        .with_uploader(move || Box::new(screen.clone()));

    let session = host
        .load_game(&args.rom)
        .with_context(|| format!("failed to start {}", args.rom.display()))?;
    if let Some(core) = session.core_info() {
        info!("{} {} running {}", core.library_name, core.library_version, args.rom.display());
    }
    if let Err(e) = session.audio_status() {
        warn!("{e}");
    }
    attach_gamepad(session);

    if let Some(path) = &args.load_state {
        let blob = std::fs::read(path)
            .with_context(|| format!("failed to read save state {}", path.display()))?;
        session.load_state(&blob)?;
        info!("Restored save state from {}", path.display());
    }
    session.set_fast_forward(args.fast_forward);

    let ticks = match args.frames {
        Some(frames) => session.run_ticks(frames)?,
        None => {
            let control = session.control();
            std::thread::spawn(move || {
                let mut line = String::new();
                if matches!(std::io::stdin().read_line(&mut line), Ok(n) if n > 0) {
                    control.request_stop();
                }
            });
            info!("Running, press Enter to stop");
            session.run_until_stopped()?
        }
    };
    info!(
        "Ran {} ticks, {} frames presented, {} audio frames",
        ticks,
        session.frames_uploaded(),
        session.audio_frames_received()
    );
    if let Some(stats) = session.audio_stats() {
        info!(
            "Audio ring: {} overruns, {} underruns",
            stats.overruns(),
            stats.underruns()
        );
    }

    if let Some(path) = &args.save_state {
        let blob = session.save_state()?;
        std::fs::write(path, &blob)
            .with_context(|| format!("failed to write save state {}", path.display()))?;
        info!("Saved state to {} ({} bytes)", path.display(), blob.len());
    }
    if let Some(path) = &args.screenshot {
        write_screenshot(&texture, path)?;
    }

    host.unload();
    Ok(())
}

#[cfg(all(
    feature = "gamepad",
    not(any(target_arch = "wasm32", target_os = "android", target_os = "ios"))
))]
fn attach_gamepad<K: ConsoleKit>(session: &mut CoreSession<K>) {
    match libretro_host::input::gamepad::GamepadSource::new() {
        Ok(source) => session.set_controller_source(Box::new(source)),
        Err(e) => warn!("Gamepad input unavailable: {e}"),
    }
}

#[cfg(not(all(
    feature = "gamepad",
    not(any(target_arch = "wasm32", target_os = "android", target_os = "ios"))
)))]
fn attach_gamepad<K: ConsoleKit>(_session: &mut CoreSession<K>) {}

fn write_screenshot(texture: &CpuTexture, path: &Path) -> anyhow::Result<()> {
    let Some(frame) = texture.snapshot() else {
        warn!("No frame was presented, skipping screenshot");
        return Ok(());
    };
    let rgba = frame.to_rgba8();
    let file = File::create(path)
        .with_context(|| format!("failed to create {}", path.display()))?;
    let mut encoder = png::Encoder::new(file, frame.width, frame.height);
    encoder.set_color(png::ColorType::Rgba);
    encoder.set_depth(png::BitDepth::Eight);
    let mut writer = encoder.write_header()?;
    writer.write_image_data(&rgba)?;
    info!("Wrote {}x{} screenshot to {}", frame.width, frame.height, path.display());
    Ok(())
}
