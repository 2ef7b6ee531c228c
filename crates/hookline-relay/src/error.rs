use std::path::PathBuf;

use crate::engine::EngineError;

/// Error type of this crate.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// No device was given to the relay.
    #[error("No Device assigned")]
    NoDeviceAssigned,

    /// The core payload script doesn't exist.
    #[error("core script not found: {}", .0.display())]
    CoreScriptNotFound(PathBuf),

    /// The attach target is malformed.
    #[error("invalid target: {0:?}")]
    InvalidTarget(String),

    /// The instrumentation engine failed.
    #[error("Frida Error: {0}")]
    Engine(String),

    /// A file couldn't be read or written.
    #[error("{}: {}", .0.display(), .1)]
    Io(PathBuf, #[source] std::io::Error),

    /// No spawned package to restart.
    #[error("nothing to restart (no spawned package)")]
    NothingToRestart,
}

impl From<EngineError> for Error {
    fn from(e: EngineError) -> Self {
        Self::Engine(e.to_string())
    }
}

/// Result type of this crate.
pub type Result<T> = core::result::Result<T, Error>;
