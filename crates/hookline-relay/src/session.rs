use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// State of the current attachment.
///
/// Replaced by a fresh value on every detach and reinitialization.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SessionState {
    /// ID of the target process (`0` when detached).
    pub pid: u32,

    /// Spawned package, if the target was spawned.
    pub package: Option<String>,

    /// Whether the target was spawned (detaching also kills it).
    pub spawned: bool,

    /// Whether the spawned target was resumed.
    pub resumed: bool,

    /// Target architecture.
    pub arch: String,

    /// Target platform.
    pub platform: String,

    /// Target pointer size.
    pub pointer_size: u8,

    /// Whether a java runtime is available within the target.
    pub java_available: bool,
}

/// Process to attach to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Target {
    /// Process ID.
    Pid(u32),

    /// Process name, resolved through the device.
    Name(String),
}

impl FromStr for Target {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();

        if s.is_empty() || s.starts_with('-') {
            return Err(crate::Error::InvalidTarget(s.to_owned()));
        }

        if s.bytes().all(|b| b.is_ascii_digit()) {
            s.parse()
                .map(Self::Pid)
                .map_err(|_| crate::Error::InvalidTarget(s.to_owned()))
        } else {
            Ok(Self::Name(s.to_owned()))
        }
    }
}

impl From<u32> for Target {
    fn from(pid: u32) -> Self {
        Self::Pid(pid)
    }
}

/// User script evaluated right after the payload is loaded.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UserScript {
    /// Path of a script file.
    Path(PathBuf),

    /// Script source.
    Source(String),
}

impl UserScript {
    /// Reads the script source.
    ///
    /// A missing file is not an error: the script is simply skipped.
    pub fn read(&self) -> Option<String> {
        match self {
            Self::Source(source) => Some(source.clone()),
            Self::Path(path) => std::fs::read_to_string(path)
                .inspect_err(|e| {
                    tracing::warn!(path = %path.display(), error = %e, "user script skipped")
                })
                .ok(),
        }
    }
}

/// Transient snapshot of a session, used to restart it in-process.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    /// Kind of session (e.g., `local`, `android`), as labelled by the
    /// front-end.
    pub session_type: String,

    /// Spawned package, if any.
    pub package: Option<String>,

    /// Source of the user script, if any.
    pub user_script: Option<String>,
}
