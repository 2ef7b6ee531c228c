mod builder;
mod commands;
mod dispatch;

use std::path::PathBuf;

use serde_json::json;

pub use self::builder::Builder;
pub use self::commands::READ_CHUNK_SIZE;
use crate::context::{Context, ContextStore};
use crate::engine::{ApiValue, Attachment, ChannelReceiver, Device, EngineError, InitFlags};
use crate::engine::{EngineResult, Script};
use crate::handler::{Event, EventBus, EventHandler};
use crate::hook::HookRegistry;
use crate::plugin::{Plugin, PluginRegistrar};
use crate::session::{SessionSnapshot, SessionState, Target, UserScript};
use crate::ui::UiHooks;
use crate::{Error, Result};

/// Default location of the core payload script.
pub const DEFAULT_CORE_SCRIPT: &str = "lib/core.js";

/// Payload script handle of a device.
pub type ScriptOf<D> = <<D as Device>::Attachment as Attachment>::Script;

/// Options of a [Relay].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RelayOptions {
    /// Path of the core payload script.
    pub core_script: PathBuf,

    /// Whether the payload breaks on the process entry point.
    pub break_start: bool,

    /// Whether the payload runs in debug mode.
    pub debug_script: bool,
}

impl Default for RelayOptions {
    fn default() -> Self {
        Self {
            core_script: PathBuf::from(DEFAULT_CORE_SCRIPT),
            break_start: false,
            debug_script: false,
        }
    }
}

/// Outcome of [Relay::load_script].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScriptStatus {
    /// The payload is loaded and initialized.
    Loaded,

    /// The engine failed while loading the payload (the error was shown to
    /// the user and the script torn down).
    Failed,
}

impl ScriptStatus {
    /// Numeric status code (`0` on success, `1` on failure).
    pub const fn code(&self) -> i32 {
        match self {
            Self::Loaded => 0,
            Self::Failed => 1,
        }
    }
}

/// Session and event relay over an instrumented target.
///
/// The relay owns the attachment to a target process, the payload script
/// injected into it, and the local mirrors of the target state (hooks,
/// watchers, thread contexts). Payload messages are decoded and turned into
/// [Events](Event) published to the subscribed [EventHandlers](EventHandler).
///
/// Every operation takes `&mut self`: the relay is driven by a single task,
/// which serializes registry mutation.
pub struct Relay<D: Device> {
    /// Instrumentation device.
    device: Option<D>,

    /// Attachment to the target.
    attachment: Option<D::Attachment>,

    /// Payload script loaded within the target.
    script: Option<ScriptOf<D>>,

    /// Notifications of the attachment.
    channel: Option<ChannelReceiver>,

    /// State of the current attachment.
    session: SessionState,

    /// Hooks and watchers acknowledged by the payload.
    hooks: HookRegistry,

    /// Contexts of the threads blocked in the payload.
    contexts: ContextStore,

    /// Source of the last evaluated user script.
    user_script: Option<String>,

    events: EventBus,
    ui: Box<dyn UiHooks>,
    registrar: Option<Box<dyn PluginRegistrar>>,
    plugins: Vec<Box<dyn Plugin>>,
    options: RelayOptions,
}

impl<D: Device> Relay<D> {
    /// Creates a relay builder.
    pub const fn builder() -> Builder<builder::NeedsDevice<D>> {
        Builder::new()
    }

    /// Attaches to a running process and loads the payload into it.
    ///
    /// Any previous attachment is detached first.
    #[tracing::instrument(name = "Attach", skip(self, script))]
    pub async fn attach(
        &mut self,
        target: Target,
        script: Option<UserScript>,
    ) -> Result<ScriptStatus> {
        if self.device.is_none() {
            return Err(Error::NoDeviceAssigned);
        }

        if self.is_attached() {
            self.detach().await;
        }

        let device = self.device.as_mut().ok_or(Error::NoDeviceAssigned)?;

        let (pid, label) = match target {
            Target::Pid(pid) => (pid, pid.to_string()),
            Target::Name(name) => {
                let process = device.find_process(&name).await?;
                (process.pid, process.name)
            }
        };

        let (attachment, channel) = device.attach(pid).await?;

        tracing::info!(pid, "attached");

        self.attachment = Some(attachment);
        self.channel = Some(channel);
        self.session = SessionState {
            pid,
            ..SessionState::default()
        };

        self.events.publish(Event::ProcessAttached { pid, label });

        self.load_script(script, false).await
    }

    /// Spawns a program (or package), attaches to it and loads the payload
    /// into it.
    ///
    /// The process is resumed once the payload is initialized. It is killed
    /// if it can't be attached to.
    #[tracing::instrument(name = "Spawn", skip(self, script))]
    pub async fn spawn(
        &mut self,
        package: &str,
        script: Option<UserScript>,
    ) -> Result<ScriptStatus> {
        if self.device.is_none() {
            return Err(Error::NoDeviceAssigned);
        }

        if self.is_attached() {
            self.detach().await;
        }

        let device = self.device.as_mut().ok_or(Error::NoDeviceAssigned)?;

        let pid = device.spawn(package).await?;
        let (attachment, channel) = match device.attach(pid).await {
            Ok(attached) => attached,
            Err(e) => {
                match device.kill(pid).await {
                    Ok(()) | Err(EngineError::ProcessNotFound) => (),
                    Err(kill_err) => tracing::warn!(pid, error = %kill_err, "kill spawned process"),
                }
                return Err(e.into());
            }
        };

        tracing::info!(pid, "spawned");

        self.attachment = Some(attachment);
        self.channel = Some(channel);
        self.session = SessionState {
            pid,
            package: Some(package.to_owned()),
            spawned: true,
            ..SessionState::default()
        };

        self.events.publish(Event::ProcessAttached {
            pid,
            label: package.to_owned(),
        });

        self.load_script(script, true).await
    }

    /// Loads the core payload into the attached process, then evaluates
    /// the user script (if any).
    ///
    /// A missing core script is a hard error. Engine errors are shown to the
    /// user and reported as [ScriptStatus::Failed].
    #[tracing::instrument(name = "LoadScript", skip(self, script))]
    pub async fn load_script(
        &mut self,
        script: Option<UserScript>,
        spawned: bool,
    ) -> Result<ScriptStatus> {
        let path = &self.options.core_script;
        if !path.is_file() {
            return Err(Error::CoreScriptNotFound(path.clone()));
        }

        let source = std::fs::read_to_string(path).map_err(|e| Error::Io(path.clone(), e))?;

        if let Err(e) = self.inject(&source, spawned).await {
            tracing::error!(error = %e, "failed to load payload");

            self.ui.show_error(&e.to_string());
            self.script = None;

            return Ok(ScriptStatus::Failed);
        }

        if let Some(source) = script.as_ref().and_then(UserScript::read) {
            self.dwarf_api("evaluateFunction", vec![json!(source)], 0).await;
            self.user_script = Some(source);
        }

        self.resume_proc().await;

        self.events.publish(Event::ScriptLoaded);

        let pid = self.session.pid;
        for plugin in self.plugins.iter_mut() {
            if let Err(e) = plugin.on_target_attached(&self.session, pid) {
                tracing::warn!(plugin = plugin.name(), error = %e, "plugin failed on attach");
            }
        }

        Ok(ScriptStatus::Loaded)
    }

    async fn inject(&mut self, source: &str, spawned: bool) -> EngineResult<()> {
        let attachment = self
            .attachment
            .as_mut()
            .ok_or_else(|| EngineError::InvalidOperation("not attached".to_owned()))?;

        let mut script = attachment.create_script(source).await?;
        script.load().await?;
        script
            .init(InitFlags {
                break_start: self.options.break_start,
                debug: self.options.debug_script,
                spawned,
            })
            .await?;

        tracing::info!("payload loaded");

        self.script = Some(script);

        Ok(())
    }

    /// Resumes the spawned process, once.
    pub async fn resume_proc(&mut self) {
        if !self.session.spawned || self.session.resumed {
            return;
        }

        self.session.resumed = true;

        let Some(device) = self.device.as_mut() else {
            return;
        };

        match device.resume(self.session.pid).await {
            Ok(()) => tracing::info!(pid = self.session.pid, "resumed"),
            // resumed by someone else
            Err(EngineError::InvalidOperation(_)) => (),
            Err(e) => tracing::warn!(error = %e, "failed to resume"),
        }
    }

    /// Detaches from the target, killing it if it was spawned.
    #[tracing::instrument(name = "Detach", skip(self), fields(pid = self.session.pid))]
    pub async fn detach(&mut self) {
        if self.script.is_some() {
            self.dwarf_api("_detach", vec![], 0).await;

            if let Some(mut script) = self.script.take() {
                if let Err(e) = script.unload().await {
                    tracing::warn!(error = %e, "failed to unload payload");
                }
            }
        }

        let Some(mut attachment) = self.attachment.take() else {
            return;
        };

        if let Err(e) = attachment.detach().await {
            tracing::warn!(error = %e, "failed to detach");
        }

        if self.session.spawned {
            if let Some(device) = self.device.as_mut() {
                match device.kill(self.session.pid).await {
                    Ok(()) | Err(EngineError::ProcessNotFound) => (),
                    Err(e) => tracing::warn!(error = %e, "failed to kill"),
                }
            }
        }

        tracing::info!("detached");

        let pid = self.session.pid;
        self.teardown();

        self.events.publish(Event::ProcessDetached {
            pid,
            reason: "application-requested".to_owned(),
            crash_log: None,
        });
    }

    /// Drops the attachment and the session state.
    fn teardown(&mut self) {
        self.script = None;
        self.attachment = None;
        self.channel = None;
        self.session = SessionState::default();
    }

    /// Invokes a payload API.
    ///
    /// This is the single gateway for every command sent to the payload.
    ///
    /// - `tid` `0` targets the active thread, except for `release` which
    ///   then releases **every** thread with a context.
    /// - A targeted call is preceded by a routing notification, so that the
    ///   blocked thread picks it up.
    ///
    /// Errors are published as [Event::LogEvent] and yield `None`, as do
    /// calls without an attached payload.
    #[tracing::instrument(name = "Api", level = "debug", skip(self, args))]
    pub async fn dwarf_api(
        &mut self,
        api: &str,
        args: Vec<serde_json::Value>,
        tid: u64,
    ) -> Option<ApiValue> {
        if self.attachment.is_none() {
            return None;
        }

        let releasing = api == "release";
        let tid = if !releasing && tid == 0 {
            self.contexts.current_tid()
        } else {
            tid
        };

        let thread_ids = if releasing && tid == 0 {
            self.contexts.thread_ids()
        } else {
            vec![]
        };

        let script = self.script.as_mut()?;

        let result = if releasing && tid == 0 {
            release_all(script, &thread_ids).await.map(|()| None)
        } else if tid == 0 {
            script.call(0, api, args).await.map(Some)
        } else {
            routed_call(script, tid, api, args).await.map(Some)
        };

        result.unwrap_or_else(|e| {
            tracing::debug!(error = %e, "api failed");
            self.log_event(e.to_string());
            None
        })
    }

    /// Resets every per-target state, and reloads the plugins.
    ///
    /// The device and the event subscribers are kept.
    pub fn reinitialize(&mut self) {
        tracing::debug!("reinitialize");

        self.teardown();
        self.hooks = HookRegistry::new();
        self.contexts = ContextStore::new();
        self.user_script = None;
        self.plugins = self
            .registrar
            .as_mut()
            .map(|registrar| registrar.load_plugins())
            .unwrap_or_default();
    }

    /// Captures what is needed to restart the current session.
    pub fn dump_session(&self, session_type: impl Into<String>) -> SessionSnapshot {
        SessionSnapshot {
            session_type: session_type.into(),
            package: self.session.package.clone(),
            user_script: self.user_script.clone(),
        }
    }

    /// Spawns the package of a session snapshot again.
    pub async fn restore_session(&mut self, snapshot: &SessionSnapshot) -> Result<ScriptStatus> {
        let package = snapshot.package.as_deref().ok_or(Error::NothingToRestart)?;
        let script = snapshot.user_script.clone().map(UserScript::Source);

        self.spawn(package, script).await
    }

    /// Kills and respawns the current (spawned) target, with the same user
    /// script.
    #[tracing::instrument(name = "Restart", skip(self))]
    pub async fn restart_proc(&mut self) -> Result<ScriptStatus> {
        let snapshot = self.dump_session("");
        if snapshot.package.is_none() {
            return Err(Error::NothingToRestart);
        }

        self.detach().await;
        self.reinitialize();

        self.restore_session(&snapshot).await
    }

    /// Waits for the next attachment notification and dispatches it.
    ///
    /// Returns `false` once there is nothing left to wait for.
    pub async fn pump(&mut self) -> bool {
        let Some(channel) = self.channel.as_mut() else {
            return false;
        };

        let Some(event) = channel.recv().await else {
            self.channel = None;
            return false;
        };

        self.handle_channel_event(event).await;
        true
    }

    /// Dispatches every attachment notification already received.
    ///
    /// Returns the number of dispatched notifications.
    pub async fn pump_pending(&mut self) -> usize {
        let mut count = 0;

        loop {
            let Some(event) = self.channel.as_mut().and_then(|c| c.try_recv().ok()) else {
                break;
            };

            self.handle_channel_event(event).await;
            count += 1;
        }

        count
    }

    /// Publishes a payload console line.
    pub fn log(&mut self, text: impl Into<String>) {
        self.events.publish(Event::Log(text.into()));
    }

    /// Publishes a relay event line.
    pub fn log_event(&mut self, text: impl Into<String>) {
        self.events.publish(Event::LogEvent(text.into()));
    }

    /// Subscribes a consumer to every event.
    pub fn subscribe(&mut self, handler: impl EventHandler + 'static) {
        self.events.subscribe(handler);
    }

    /// Assigns the instrumentation device.
    pub fn set_device(&mut self, device: D) {
        self.device = Some(device);
    }

    /// Instrumentation device.
    pub fn device(&self) -> Option<&D> {
        self.device.as_ref()
    }

    /// Options of the relay.
    pub const fn options(&self) -> &RelayOptions {
        &self.options
    }

    /// State of the current attachment.
    pub const fn session(&self) -> &SessionState {
        &self.session
    }

    /// Hooks and watchers acknowledged by the payload.
    pub const fn hooks(&self) -> &HookRegistry {
        &self.hooks
    }

    /// Contexts of the threads blocked in the payload.
    pub const fn contexts(&self) -> &ContextStore {
        &self.contexts
    }

    /// Context of the active thread.
    pub fn current_context(&self) -> Option<&Context> {
        self.contexts.current()
    }

    /// ID of the active thread (`0` when none).
    pub const fn context_tid(&self) -> u64 {
        self.contexts.current_tid()
    }

    /// Returns whether the relay is attached to a process.
    pub const fn is_attached(&self) -> bool {
        self.attachment.is_some()
    }

    /// Returns whether the payload is loaded.
    pub const fn has_script(&self) -> bool {
        self.script.is_some()
    }

    /// ID of the target process (`0` when detached).
    pub const fn pid(&self) -> u32 {
        self.session.pid
    }

    /// Target architecture.
    pub fn arch(&self) -> &str {
        &self.session.arch
    }

    /// Target platform.
    pub fn platform(&self) -> &str {
        &self.session.platform
    }

    /// Target pointer size.
    pub const fn pointer_size(&self) -> u8 {
        self.session.pointer_size
    }

    /// Whether a java runtime is available within the target.
    pub const fn java_available(&self) -> bool {
        self.session.java_available
    }

    /// Whether the spawned target was resumed.
    pub const fn resumed(&self) -> bool {
        self.session.resumed
    }

    /// Plugins currently loaded.
    pub fn plugins(&self) -> impl Iterator<Item = &str> {
        self.plugins.iter().map(|p| p.name())
    }
}

fn routing(tid: u64) -> serde_json::Value {
    json!({ "type": tid.to_string() })
}

async fn routed_call<S: Script>(
    script: &mut S,
    tid: u64,
    api: &str,
    args: Vec<serde_json::Value>,
) -> EngineResult<ApiValue> {
    script.post(routing(tid))?;
    script.call(tid, api, args).await
}

async fn release_all<S: Script>(script: &mut S, thread_ids: &[u64]) -> EngineResult<()> {
    for &tid in thread_ids {
        tracing::debug!(tid, "release");
        routed_call(script, tid, "release", vec![json!(tid)]).await?;
    }

    Ok(())
}
