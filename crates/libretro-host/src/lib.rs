#![doc = include_str!("../README.md")]

pub mod audio;
mod callbacks;
pub mod config;
pub mod console;
pub mod error;
pub mod input;
pub mod loader;
pub mod persistence;
pub mod pump;
pub mod raw;
pub mod registry;
pub mod session;
pub mod video;

pub use crate::config::{AudioMode, HostConfig};
pub use crate::console::{ConsoleId, ConsoleKit, ConsoleProfile, Ds, Genesis, Nes, Snes};
pub use crate::error::{HostError, LoadError, SerializeError};
pub use crate::input::{
    ControllerInput, ControllerSnapshot, ControllerSource, InputState, PhysicalMapping, RetroPad,
};
pub use crate::loader::{CoreInfo, FunctionTable, LoadedCore};
pub use crate::pump::{PumpControl, PumpTiming};
pub use crate::session::{AvInfo, ConsoleHost, CoreSession};
pub use crate::video::{CpuFrame, CpuTexture, NullUploader, PixelFormat, TextureUploader};
