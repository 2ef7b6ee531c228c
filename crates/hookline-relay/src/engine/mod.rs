mod error;

use std::future::Future;

use tokio::sync::mpsc;

pub use self::error::{EngineError, EngineResult};

/// Receiving half of the channel between an attached target and the relay.
pub type ChannelReceiver = mpsc::UnboundedReceiver<ChannelEvent>;

/// Sending half of the channel between an attached target and the relay.
pub type ChannelSender = mpsc::UnboundedSender<ChannelEvent>;

/// Trait implementing the process-level primitives of an instrumentation
/// engine (e.g., a local or remote device).
pub trait Device {
    /// Attachment returned by this device.
    type Attachment: Attachment;

    /// Looks up a running process by name.
    fn find_process(&mut self, name: &str) -> impl Future<Output = EngineResult<ProcessInfo>>;

    /// Attaches to the process with the given ID.
    ///
    /// The returned channel carries every asynchronous notification of the
    /// attachment: payload messages, script destruction and process
    /// detachment.
    fn attach(
        &mut self,
        pid: u32,
    ) -> impl Future<Output = EngineResult<(Self::Attachment, ChannelReceiver)>>;

    /// Spawns the given program (or package) in a **suspended** state.
    ///
    /// On success, the process ID is returned.
    fn spawn(&mut self, program: &str) -> impl Future<Output = EngineResult<u32>>;

    /// Resumes a process previously spawned by [spawn](Self::spawn).
    fn resume(&mut self, pid: u32) -> impl Future<Output = EngineResult<()>>;

    /// Kills the process with the given ID.
    fn kill(&mut self, pid: u32) -> impl Future<Output = EngineResult<()>>;
}

/// Trait implementing an attachment to a single process.
pub trait Attachment {
    /// Payload script created within the attached process.
    type Script: Script;

    /// Creates (but doesn't load) a payload script from its source.
    fn create_script(&mut self, source: &str) -> impl Future<Output = EngineResult<Self::Script>>;

    /// Detaches from the process.
    fn detach(&mut self) -> impl Future<Output = EngineResult<()>>;
}

/// Trait implementing the command side of an injected payload.
pub trait Script {
    /// Loads the script into the target.
    fn load(&mut self) -> impl Future<Output = EngineResult<()>>;

    /// Invokes the payload initialization entry point.
    fn init(&mut self, flags: InitFlags) -> impl Future<Output = EngineResult<()>>;

    /// Posts a raw message to the payload.
    ///
    /// The relay uses it for routing notifications (`{"type": "<tid>"}`),
    /// sent right before a call targeting a given thread.
    fn post(&mut self, message: serde_json::Value) -> EngineResult<()>;

    /// Invokes a named API of the payload on the given thread.
    fn call(
        &mut self,
        thread_id: u64,
        api: &str,
        args: Vec<serde_json::Value>,
    ) -> impl Future<Output = EngineResult<ApiValue>>;

    /// Returns the hooks currently installed by the payload, as a JSON object
    /// keyed by hook placement.
    fn hooks(&mut self) -> impl Future<Output = EngineResult<serde_json::Value>>;

    /// Unloads the script from the target.
    fn unload(&mut self) -> impl Future<Output = EngineResult<()>>;
}

/// Flags passed to the payload initialization entry point.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct InitFlags {
    /// Whether the payload breaks on the process entry point.
    pub break_start: bool,

    /// Whether the payload runs in debug mode.
    pub debug: bool,

    /// Whether the target was spawned (rather than attached to).
    pub spawned: bool,
}

/// Process descriptor returned by [Device::find_process].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProcessInfo {
    /// ID of the process.
    pub pid: u32,

    /// Name of the process.
    pub name: String,
}

/// Value returned by a payload API call.
#[derive(Clone, Debug, PartialEq)]
pub enum ApiValue {
    /// JSON-serializable value.
    Json(serde_json::Value),

    /// Raw bytes (e.g., memory contents).
    Bytes(Vec<u8>),
}

impl ApiValue {
    /// Returns the JSON value, if any.
    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Json(value) => Some(value),
            Self::Bytes(_) => None,
        }
    }

    /// Converts this value into bytes.
    ///
    /// JSON arrays of small integers are accepted as well, since some
    /// engines serialize buffers that way.
    pub fn into_bytes(self) -> Option<Vec<u8>> {
        match self {
            Self::Bytes(bytes) => Some(bytes),
            Self::Json(serde_json::Value::Array(items)) => items
                .iter()
                .map(|v| v.as_u64().and_then(|b| u8::try_from(b).ok()))
                .collect(),
            Self::Json(_) => None,
        }
    }
}

impl From<serde_json::Value> for ApiValue {
    fn from(value: serde_json::Value) -> Self {
        Self::Json(value)
    }
}

/// Asynchronous notification delivered by an attachment.
#[derive(Clone, Debug, PartialEq)]
pub enum ChannelEvent {
    /// The payload sent a message.
    Message {
        /// Message envelope (e.g., `{"type": "send", "payload": "..."}`).
        message: serde_json::Value,

        /// Optional out-of-band binary buffer.
        data: Option<Vec<u8>>,
    },

    /// The payload script was destroyed.
    ScriptDestroyed,

    /// The attached process went away.
    Detached {
        /// Detach reason reported by the engine.
        reason: String,

        /// Crash report, when the process crashed.
        crash_log: Option<String>,
    },
}

impl ChannelEvent {
    /// Builds a message event carrying the given payload string.
    pub fn payload(payload: impl Into<String>) -> Self {
        Self::Message {
            message: serde_json::json!({ "type": "send", "payload": payload.into() }),
            data: None,
        }
    }
}
