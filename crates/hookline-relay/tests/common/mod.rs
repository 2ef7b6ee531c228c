use std::io::Write;
use std::sync::{Arc, Mutex};

use hookline_relay::handler::Event;
use hookline_relay::session::Target;
use hookline_relay::ui::UiHooks;
use hookline_relay::{Relay, ScriptStatus};
use hookline_replay::{ReplayDevice, ReplayHandle};
use tempfile::NamedTempFile;
use tokio::sync::mpsc;

pub const PID: u32 = 1234;

pub const INITIAL_CONTEXT: &str = r#"set_context:::{"reason":-1,"tid":1234,"arch":"arm64","platform":"linux","pointerSize":8,"java":true}"#;

/// `set_context` message of a thread blocked on a hook.
pub fn hook_context(tid: u64, ptr: &str) -> String {
    format!(
        r#"set_context:::{{"reason":0,"tid":{tid},"ptr":"{ptr}","context":{{"pc":{{"value":"{ptr}","symbol":{{"moduleName":"libc.so","name":"open"}}}},"x0":"0x10"}}}}"#
    )
}

/// UI calls, in reception order.
#[derive(Clone, Default)]
pub struct RecordedUi(pub Arc<Mutex<Vec<String>>>);

impl RecordedUi {
    pub fn calls(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

impl UiHooks for RecordedUi {
    fn enable_kernel(&mut self) {
        self.0.lock().unwrap().push("enable_kernel".to_owned());
    }

    fn append_ftrace(&mut self, data: &str) {
        self.0.lock().unwrap().push(format!("ftrace {data}"));
    }

    fn java_available(&mut self) {
        self.0.lock().unwrap().push("java_available".to_owned());
    }

    fn show_error(&mut self, message: &str) {
        self.0.lock().unwrap().push(format!("error {message}"));
    }
}

pub struct Harness {
    pub relay: Relay<ReplayDevice>,
    pub device: ReplayHandle,
    pub ui: RecordedUi,
    events: mpsc::UnboundedReceiver<Event>,
    _core: NamedTempFile,
}

pub fn core_script() -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("core script");
    file.write_all(b"rpc.exports = {};").expect("write core script");
    file
}

impl Harness {
    pub fn new(device: ReplayDevice) -> Self {
        let core = core_script();
        let ui = RecordedUi::default();
        let (tx, events) = mpsc::unbounded_channel();

        let handle = device.handle();

        let relay = Relay::builder()
            .with_device(device)
            .with_event_handler(tx)
            .with_ui(ui.clone())
            .core_script(core.path())
            .build();

        Self {
            relay,
            device: handle,
            ui,
            events,
            _core: core,
        }
    }

    /// Attaches to [PID] and completes the initial handshake.
    pub async fn attached(device: ReplayDevice) -> Self {
        let mut harness = Self::new(device);

        let status = harness
            .relay
            .attach(Target::Pid(PID), None)
            .await
            .expect("attach");
        assert_eq!(status, ScriptStatus::Loaded);

        harness.feed(INITIAL_CONTEXT).await;
        harness.device.clear_commands();
        harness.drain();

        harness
    }

    /// Delivers a payload message and dispatches it.
    pub async fn feed(&mut self, payload: &str) {
        assert!(self.device.send_payload(payload), "relay not attached");
        self.relay.pump_pending().await;
    }

    /// Events published since the last drain.
    pub fn drain(&mut self) -> Vec<Event> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }

    /// Event log lines published since the last drain.
    pub fn log_events(&mut self) -> Vec<String> {
        self.drain()
            .into_iter()
            .filter_map(|event| match event {
                Event::LogEvent(line) => Some(line),
                _ => None,
            })
            .collect()
    }
}
