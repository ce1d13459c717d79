use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use tracing::Level;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ConsoleArg {
    Nes,
    Snes,
    Genesis,
    Ds,
}

/// Run a ROM through a libretro core without a window.
#[derive(Parser, Debug)]
#[command(name = "retro-shell")]
#[command(about = "Headless runner for libretro cores", long_about = None)]
pub struct Args {
    /// Console family whose core should run the ROM
    pub console: ConsoleArg,

    /// ROM image to load
    pub rom: PathBuf,

    /// Explicit core library, tried before the bundled search locations
    #[arg(long)]
    pub core: Option<PathBuf>,

    /// Directory holding `<Name>.framework` bundles or flattened core libraries
    #[arg(long)]
    pub plugins_dir: Option<PathBuf>,

    /// Application bundle root; `PlugIns/` under it is searched unless `--plugins-dir` is set
    #[arg(long)]
    pub bundle_root: Option<PathBuf>,

    /// Root for `saves/` and `system/` (defaults to the platform data directory)
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// Number of paced ticks to run. Without it the shell runs until Enter is pressed.
    #[arg(short, long)]
    pub frames: Option<u64>,

    /// Start with fast-forward enabled
    #[arg(long)]
    pub fast_forward: bool,

    /// Do not open an audio output device
    #[arg(long)]
    pub no_audio: bool,

    /// Core option override, repeatable (`key=value`)
    #[arg(short = 'o', long = "option", value_parser = parse_key_val)]
    pub core_options: Vec<(String, String)>,

    /// Restore this save state right after the game loads
    #[arg(long)]
    pub load_state: Option<PathBuf>,

    /// Write the final save state here on exit
    #[arg(long)]
    pub save_state: Option<PathBuf>,

    /// Write the last presented frame as PNG on exit
    #[arg(long)]
    pub screenshot: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    pub log_level: Level,
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got `{s}`"))?;
    if key.is_empty() {
        return Err(format!("empty option name in `{s}`"));
    }
    Ok((key.to_owned(), value.to_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_core_options_and_console() {
        let args = Args::try_parse_from([
            "retro-shell",
            "ds",
            "game.nds",
            "-o",
            "melonds_jit_enable=enabled",
            "--frames",
            "120",
        ])
        .unwrap();
        assert_eq!(args.console, ConsoleArg::Ds);
        assert_eq!(args.frames, Some(120));
        assert_eq!(
            args.core_options,
            vec![("melonds_jit_enable".to_owned(), "enabled".to_owned())]
        );
    }

    #[test]
    fn rejects_malformed_options() {
        assert!(parse_key_val("novalue").is_err());
        assert!(parse_key_val("=x").is_err());
        assert_eq!(
            parse_key_val("a=b=c"),
            Ok(("a".to_owned(), "b=c".to_owned()))
        );
    }
}
