use hookline_relay::engine::{
    ApiValue, ChannelEvent, ChannelReceiver, EngineError, EngineResult, InitFlags, ProcessInfo,
};
use tokio::sync::mpsc;

use crate::recording::Recording;
use crate::script::ReplayAttachment;
use crate::state::{ApiCall, Command, Operation, Reply, Shared};

/// Instrumentation device replaying a recorded payload session.
///
/// No process is ever touched: every command is recorded (see
/// [ReplayHandle]), payload API calls are answered from a reply table, and
/// the recorded notifications are delivered once the payload is loaded.
#[derive(Clone, Debug, Default)]
pub struct ReplayDevice {
    state: Shared,
}

impl ReplayDevice {
    /// Creates a device with no process, reply or recording.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a running process, so that it can be looked up by name.
    pub fn with_process(self, name: impl Into<String>, pid: u32) -> Self {
        self.state.lock().processes.insert(name.into(), pid);
        self
    }

    /// Specifies the value returned by a payload API.
    ///
    /// APIs without a reply return `null`.
    pub fn with_reply(self, api: impl Into<String>, value: impl Into<ApiValue>) -> Self {
        self.handle().set_reply(api, value);
        self
    }

    /// Makes a payload API fail.
    pub fn with_failing_api(self, api: impl Into<String>, error: EngineError) -> Self {
        self.handle().fail_api(api, error);
        self
    }

    /// Makes an engine primitive fail.
    pub fn with_failure(self, op: Operation, error: EngineError) -> Self {
        self.handle().fail(op, error);
        self
    }

    /// Specifies the hooks reported by the payload (`hooks()` export).
    pub fn with_hooks(self, hooks: serde_json::Value) -> Self {
        self.state.lock().hooks = hooks;
        self
    }

    /// Specifies the notifications delivered once the payload is loaded.
    pub fn with_recording(self, recording: Recording) -> Self {
        self.state.lock().recording = recording;
        self
    }

    /// Returns a handle to inspect and drive this device.
    pub fn handle(&self) -> ReplayHandle {
        ReplayHandle {
            state: self.state.clone(),
        }
    }
}

impl hookline_relay::engine::Device for ReplayDevice {
    type Attachment = ReplayAttachment;

    async fn find_process(&mut self, name: &str) -> EngineResult<ProcessInfo> {
        let mut state = self.state.lock();
        state.record(
            Some(Operation::FindProcess),
            Command::FindProcess(name.to_owned()),
        )?;

        state
            .processes
            .get(name)
            .map(|&pid| ProcessInfo {
                pid,
                name: name.to_owned(),
            })
            .ok_or(EngineError::ProcessNotFound)
    }

    async fn attach(&mut self, pid: u32) -> EngineResult<(Self::Attachment, ChannelReceiver)> {
        let mut state = self.state.lock();
        state.record(Some(Operation::Attach), Command::Attach(pid))?;

        let (tx, rx) = mpsc::unbounded_channel();
        state.channel = Some(tx);

        tracing::debug!(pid, "replay attached");

        Ok((ReplayAttachment::new(self.state.clone(), pid), rx))
    }

    async fn spawn(&mut self, program: &str) -> EngineResult<u32> {
        let mut state = self.state.lock();
        state.record(Some(Operation::Spawn), Command::Spawn(program.to_owned()))?;

        let pid = state.next_pid;
        state.next_pid += 1;
        state.processes.insert(program.to_owned(), pid);

        tracing::debug!(pid, program, "replay spawned");

        Ok(pid)
    }

    async fn resume(&mut self, pid: u32) -> EngineResult<()> {
        let mut state = self.state.lock();
        state.record(Some(Operation::Resume), Command::Resume(pid))?;

        if state.resumed.contains(&pid) {
            return Err(EngineError::InvalidOperation(format!(
                "process {pid} already resumed"
            )));
        }

        state.resumed.push(pid);
        Ok(())
    }

    async fn kill(&mut self, pid: u32) -> EngineResult<()> {
        let mut state = self.state.lock();
        state.record(Some(Operation::Kill), Command::Kill(pid))?;

        let before = state.processes.len();
        state.processes.retain(|_, p| *p != pid);

        if before == state.processes.len() {
            Err(EngineError::ProcessNotFound)
        } else {
            Ok(())
        }
    }
}

/// Handle on a [ReplayDevice], kept by the owner of the device once it was
/// given to a relay.
#[derive(Clone, Debug)]
pub struct ReplayHandle {
    state: Shared,
}

impl ReplayHandle {
    /// Delivers a notification to the attached relay.
    ///
    /// Returns `false` if no relay is attached.
    pub fn send(&self, event: ChannelEvent) -> bool {
        self.state.lock().notify(event)
    }

    /// Delivers a payload message to the attached relay.
    pub fn send_payload(&self, payload: impl Into<String>) -> bool {
        self.send(ChannelEvent::payload(payload))
    }

    /// Specifies the value returned by a payload API.
    pub fn set_reply(&self, api: impl Into<String>, value: impl Into<ApiValue>) {
        self.state
            .lock()
            .replies
            .insert(api.into(), Reply::Value(value.into()));
    }

    /// Makes a payload API fail.
    pub fn fail_api(&self, api: impl Into<String>, error: EngineError) {
        self.state
            .lock()
            .replies
            .insert(api.into(), Reply::Error(error));
    }

    /// Makes an engine primitive fail.
    pub fn fail(&self, op: Operation, error: EngineError) {
        self.state.lock().failures.insert(op, error);
    }

    /// Stops making an engine primitive fail.
    pub fn heal(&self, op: Operation) {
        self.state.lock().failures.remove(&op);
    }

    /// Specifies the hooks reported by the payload.
    pub fn set_hooks(&self, hooks: serde_json::Value) {
        self.state.lock().hooks = hooks;
    }

    /// Every command received so far.
    pub fn commands(&self) -> Vec<Command> {
        self.state.lock().commands.clone()
    }

    /// Payload API calls received so far.
    pub fn calls(&self) -> Vec<ApiCall> {
        self.state
            .lock()
            .commands
            .iter()
            .filter_map(|command| match command {
                Command::Call(call) => Some(call.clone()),
                _ => None,
            })
            .collect()
    }

    /// Payload API calls to the given API.
    pub fn calls_to(&self, api: &str) -> Vec<ApiCall> {
        self.calls()
            .into_iter()
            .filter(|call| call.api == api)
            .collect()
    }

    /// Raw messages posted to the payload so far.
    pub fn posts(&self) -> Vec<serde_json::Value> {
        self.state
            .lock()
            .commands
            .iter()
            .filter_map(|command| match command {
                Command::Post(message) => Some(message.clone()),
                _ => None,
            })
            .collect()
    }

    /// Initialization flags received so far.
    pub fn inits(&self) -> Vec<InitFlags> {
        self.state
            .lock()
            .commands
            .iter()
            .filter_map(|command| match command {
                Command::Init(flags) => Some(*flags),
                _ => None,
            })
            .collect()
    }

    /// Processes resumed so far.
    pub fn resumed(&self) -> Vec<u32> {
        self.state.lock().resumed.clone()
    }

    /// Forgets the commands received so far.
    pub fn clear_commands(&self) {
        self.state.lock().commands.clear();
    }
}
