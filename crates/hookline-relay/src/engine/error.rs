/// Error reported by an instrumentation engine.
///
/// The display strings are the descriptive messages surfaced to the user
/// when an attach/spawn/load operation fails.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// The target process doesn't exist (anymore).
    #[error("Process not found (ProcessNotFoundError)")]
    ProcessNotFound,

    /// The target process doesn't respond.
    #[error("Process not responding (ProcessNotRespondingError)")]
    ProcessNotResponding,

    /// An engine operation timed out.
    #[error("Frida timeout (TimedOutError)")]
    TimedOut,

    /// The engine server isn't running on the device.
    #[error("Frida not running (ServerNotRunningError)")]
    ServerNotRunning,

    /// The transport between the engine and the device failed.
    #[error("Frida timeout was reached (TransportError)")]
    Transport,

    /// The operation is invalid in the current state (e.g., resuming an
    /// already resumed process).
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// The operation isn't supported by this engine.
    #[error("operation not supported: {0}")]
    NotSupported(String),

    /// Any other engine error (e.g., an exception thrown by a payload API).
    #[error("{0}")]
    Other(String),
}

/// Result type of engine operations.
pub type EngineResult<T> = core::result::Result<T, EngineError>;
