use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use hookline_relay::engine::{ApiValue, ChannelEvent, ChannelSender, EngineError, InitFlags};
use indexmap::IndexMap;

use crate::recording::Recording;

/// Engine primitive, used to inject failures.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operation {
    /// [Device::find_process](hookline_relay::engine::Device::find_process).
    FindProcess,
    /// [Device::attach](hookline_relay::engine::Device::attach).
    Attach,
    /// [Device::spawn](hookline_relay::engine::Device::spawn).
    Spawn,
    /// [Device::resume](hookline_relay::engine::Device::resume).
    Resume,
    /// [Device::kill](hookline_relay::engine::Device::kill).
    Kill,
    /// [Attachment::create_script](hookline_relay::engine::Attachment::create_script).
    CreateScript,
    /// [Attachment::detach](hookline_relay::engine::Attachment::detach).
    Detach,
    /// [Script::load](hookline_relay::engine::Script::load).
    Load,
    /// [Script::init](hookline_relay::engine::Script::init).
    Init,
    /// [Script::post](hookline_relay::engine::Script::post).
    Post,
    /// [Script::hooks](hookline_relay::engine::Script::hooks).
    Hooks,
}

/// Reply to a payload API call.
#[derive(Clone, Debug, PartialEq)]
pub enum Reply {
    /// The call returns a value.
    Value(ApiValue),

    /// The call fails.
    Error(EngineError),
}

/// Payload API call received by the engine.
#[derive(Clone, Debug, PartialEq)]
pub struct ApiCall {
    /// Thread the call was sent to.
    pub thread_id: u64,

    /// Name of the API.
    pub api: String,

    /// Arguments of the call.
    pub args: Vec<serde_json::Value>,
}

/// Command received by the engine, in reception order.
#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    /// A process was looked up by name.
    FindProcess(String),
    /// A process was attached to.
    Attach(u32),
    /// A program was spawned.
    Spawn(String),
    /// A process was resumed.
    Resume(u32),
    /// A process was killed.
    Kill(u32),
    /// A payload script was created (with its source).
    CreateScript(String),
    /// The attachment was detached.
    Detach(u32),
    /// The payload script was loaded.
    Load,
    /// The payload was initialized.
    Init(InitFlags),
    /// A raw message was posted to the payload.
    Post(serde_json::Value),
    /// A payload API was called.
    Call(ApiCall),
    /// The installed hooks were listed.
    Hooks,
    /// The payload script was unloaded.
    Unload,
}

#[derive(Debug)]
pub(crate) struct State {
    pub(crate) processes: IndexMap<String, u32>,
    pub(crate) replies: HashMap<String, Reply>,
    pub(crate) failures: HashMap<Operation, EngineError>,
    pub(crate) hooks: serde_json::Value,
    pub(crate) recording: Recording,
    pub(crate) commands: Vec<Command>,
    pub(crate) resumed: Vec<u32>,
    pub(crate) channel: Option<ChannelSender>,
    pub(crate) next_pid: u32,
}

impl Default for State {
    fn default() -> Self {
        Self {
            processes: IndexMap::new(),
            replies: HashMap::new(),
            failures: HashMap::new(),
            hooks: serde_json::json!({}),
            recording: Recording::new(),
            commands: Vec::new(),
            resumed: Vec::new(),
            channel: None,
            next_pid: 4242,
        }
    }
}

impl State {
    /// Records a command, failing if a failure was injected for it.
    pub(crate) fn record(
        &mut self,
        op: Option<Operation>,
        command: Command,
    ) -> Result<(), EngineError> {
        tracing::trace!(?command, "engine command");

        self.commands.push(command);

        match op.and_then(|op| self.failures.get(&op)) {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }

    /// Sends a notification to the relay, if attached.
    pub(crate) fn notify(&self, event: ChannelEvent) -> bool {
        self.channel
            .as_ref()
            .is_some_and(|channel| channel.send(event).is_ok())
    }
}

/// State shared by the device and every handle on it.
#[derive(Clone, Debug, Default)]
pub(crate) struct Shared(Arc<Mutex<State>>);

impl Shared {
    pub(crate) fn lock(&self) -> MutexGuard<'_, State> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
