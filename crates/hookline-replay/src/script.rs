use hookline_relay::engine::{ApiValue, ChannelEvent, EngineResult, InitFlags};

use crate::state::{ApiCall, Command, Operation, Reply, Shared};

/// Attachment created by [ReplayDevice](crate::ReplayDevice).
#[derive(Debug)]
pub struct ReplayAttachment {
    state: Shared,
    pid: u32,
}

impl ReplayAttachment {
    pub(crate) const fn new(state: Shared, pid: u32) -> Self {
        Self { state, pid }
    }

    /// ID of the attached process.
    pub const fn pid(&self) -> u32 {
        self.pid
    }
}

impl hookline_relay::engine::Attachment for ReplayAttachment {
    type Script = ReplayScript;

    async fn create_script(&mut self, source: &str) -> EngineResult<Self::Script> {
        self.state.lock().record(
            Some(Operation::CreateScript),
            Command::CreateScript(source.to_owned()),
        )?;

        Ok(ReplayScript {
            state: self.state.clone(),
        })
    }

    async fn detach(&mut self) -> EngineResult<()> {
        let mut state = self.state.lock();
        state.record(Some(Operation::Detach), Command::Detach(self.pid))?;

        state.channel = None;
        Ok(())
    }
}

/// Payload script created by [ReplayAttachment].
#[derive(Debug)]
pub struct ReplayScript {
    state: Shared,
}

impl hookline_relay::engine::Script for ReplayScript {
    async fn load(&mut self) -> EngineResult<()> {
        let mut state = self.state.lock();
        state.record(Some(Operation::Load), Command::Load)?;

        let events: Vec<ChannelEvent> = state.recording.events().to_vec();

        tracing::debug!(count = events.len(), "replaying recording");

        for event in events {
            state.notify(event);
        }

        Ok(())
    }

    async fn init(&mut self, flags: InitFlags) -> EngineResult<()> {
        self.state
            .lock()
            .record(Some(Operation::Init), Command::Init(flags))
    }

    fn post(&mut self, message: serde_json::Value) -> EngineResult<()> {
        self.state
            .lock()
            .record(Some(Operation::Post), Command::Post(message))
    }

    async fn call(
        &mut self,
        thread_id: u64,
        api: &str,
        args: Vec<serde_json::Value>,
    ) -> EngineResult<ApiValue> {
        let mut state = self.state.lock();
        state.record(
            None,
            Command::Call(ApiCall {
                thread_id,
                api: api.to_owned(),
                args,
            }),
        )?;

        match state.replies.get(api) {
            Some(Reply::Value(value)) => Ok(value.clone()),
            Some(Reply::Error(e)) => Err(e.clone()),
            None => Ok(ApiValue::Json(serde_json::Value::Null)),
        }
    }

    async fn hooks(&mut self) -> EngineResult<serde_json::Value> {
        let mut state = self.state.lock();
        state.record(Some(Operation::Hooks), Command::Hooks)?;

        Ok(state.hooks.clone())
    }

    async fn unload(&mut self) -> EngineResult<()> {
        self.state.lock().record(None, Command::Unload)
    }
}
