use std::path::PathBuf;

use thiserror::Error;

/// Failure to bring a core library into the process.
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("core library not found (searched: {searched:?})")]
    NotFound { searched: Vec<PathBuf> },

    #[error("failed to open core library {path:?}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: libloading::Error,
    },

    #[error("core library is missing mandatory symbol `{name}`")]
    MissingSymbol { name: &'static str },

    #[error("another session is already registered for this console")]
    Registry,
}

/// Failure of a save-state operation.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SerializeError {
    #[error("core does not support save states")]
    Unsupported,

    #[error("core rejected the save state")]
    Rejected,
}

#[derive(Error, Debug)]
pub enum HostError {
    #[error(transparent)]
    Load(#[from] LoadError),

    #[error("core rejected game {path:?}")]
    GameLoad { path: PathBuf },

    #[error("failed to read ROM {path:?}: {source}")]
    RomRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no game is loaded")]
    NoGame,

    #[error("save state: {0}")]
    Serialize(#[from] SerializeError),

    #[error("battery save I/O error: {0}")]
    Battery(#[from] std::io::Error),

    #[error("audio output unavailable: {0}")]
    Audio(String),

    #[error("gamepad backend unavailable: {0}")]
    Gamepad(String),
}
