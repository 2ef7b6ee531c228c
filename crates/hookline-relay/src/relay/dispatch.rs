use serde_json::json;

use super::Relay;
use crate::context::{Context, ContextData, ContextReason};
use crate::engine::{ChannelEvent, Device, Script};
use crate::handler::{DataPayload, Event};
use crate::hook::{BreakLogic, Hook, HookKind, Watcher, WatcherFlags};
use crate::protocol::{DecodeError, HookAck, PayloadMessage};
use crate::ptr::hex_ptr;

impl<D: Device> Relay<D> {
    /// Dispatches a notification of the attachment.
    pub async fn handle_channel_event(&mut self, event: ChannelEvent) {
        match event {
            ChannelEvent::Message { message, data } => self.handle_message(&message, data).await,
            ChannelEvent::ScriptDestroyed => {
                tracing::info!("payload destroyed");

                self.script = None;
                self.events.publish(Event::ScriptDestroyed);
            }
            ChannelEvent::Detached { reason, crash_log } => {
                let pid = self.session.pid;

                tracing::info!(pid, %reason, "target detached");

                self.teardown();
                self.events.publish(Event::ProcessDetached {
                    pid,
                    reason,
                    crash_log,
                });
            }
        }
    }

    /// Dispatches a message sent by the payload.
    ///
    /// Malformed messages are logged and dropped: they never mutate the
    /// relay state.
    pub async fn handle_message(&mut self, message: &serde_json::Value, data: Option<Vec<u8>>) {
        let Some(payload) = message.get("payload").and_then(serde_json::Value::as_str) else {
            tracing::debug!(%message, "message without payload");
            return;
        };

        match PayloadMessage::decode(payload) {
            Ok(message) => self.dispatch(message, data).await,
            Err(DecodeError::TooFewFields) => tracing::debug!(payload, "untagged message"),
            Err(e) => tracing::warn!(payload, error = %e, "dropped payload message"),
        }
    }

    async fn dispatch(&mut self, message: PayloadMessage, data: Option<Vec<u8>>) {
        match message {
            PayloadMessage::ApiPingTimeout { tid } => {
                if let Some(script) = self.script.as_mut() {
                    if let Err(e) = script.post(json!({ "type": tid })) {
                        tracing::warn!(%tid, error = %e, "failed to ping thread");
                    }
                }
            }
            PayloadMessage::Backtrace(backtrace) => {
                self.events.publish(Event::Backtrace(backtrace));
            }
            PayloadMessage::ClassLoaderLoadingClass { tid, class } => {
                self.log_event(format!("@thread {tid} loading class := {class}"));
            }
            PayloadMessage::EnumerateJavaClassesStart => {
                self.events.publish(Event::EnumerateJavaClassesStart);
            }
            PayloadMessage::EnumerateJavaClassesMatch(class) => {
                self.events.publish(Event::EnumerateJavaClassesMatch(class));
            }
            PayloadMessage::EnumerateJavaClassesComplete => {
                self.events.publish(Event::EnumerateJavaClassesComplete);
            }
            PayloadMessage::EnumerateJavaMethodsComplete { class, methods } => {
                self.events.publish(Event::EnumerateJavaMethodsComplete { class, methods });
            }
            PayloadMessage::Ftrace(trace) => self.ui.append_ftrace(&trace),
            PayloadMessage::EnableKernel => self.ui.enable_kernel(),
            PayloadMessage::HookInstalled(ack) => self.register_hook(ack),
            PayloadMessage::HookDeleted { kind, fields } => {
                let key = fields.get(2).map(String::as_str).unwrap_or_default();

                if self.hooks.remove(kind, key).is_none() {
                    tracing::debug!(kind = kind.label(), key, "deleted hook was not registered");
                }

                self.events.publish(Event::HookDeleted(fields));
            }
            PayloadMessage::JavaOnLoadHit { class, tid } => {
                self.log_event(format!("Hook java onload {class} @thread := {tid}"));
                self.events.publish(Event::JavaOnLoadHit { class });
            }
            PayloadMessage::JavaTrace(fields) => self.events.publish(Event::JavaTrace(fields)),
            PayloadMessage::Log(text) => self.log(text),
            PayloadMessage::NativeOnLoadHit { module, base, tid } => {
                self.log_event(format!("Hook native onload {module} @thread := {tid}"));
                self.events.publish(Event::NativeOnLoadHit { module, base });
            }
            PayloadMessage::NativeModuleLoading { tid, module } => {
                self.log_event(format!("@thread {tid} loading module := {module}"));
            }
            PayloadMessage::NewThread { tid, target } => {
                self.log_event(format!(
                    "@thread {tid} starting new thread with target fn := {target}"
                ));
            }
            PayloadMessage::Release { tid } => {
                self.log_event(format!("releasing := {tid}"));
                self.contexts.remove(&tid);

                match tid.trim().parse() {
                    Ok(tid) => self.events.publish(Event::ThreadResumed(tid)),
                    Err(_) => tracing::warn!(%tid, "released thread ID is not numeric"),
                }
            }
            PayloadMessage::Resume => {
                if !self.session.resumed {
                    self.resume_proc().await;
                }
            }
            PayloadMessage::ReleaseJs { tid } => {
                self.dwarf_api("release", vec![json!(tid)], tid).await;
            }
            PayloadMessage::SetContext(value) => self.set_context(value),
            PayloadMessage::SetContextValue { property, value } => {
                self.events.publish(Event::ContextChanged { property, value });
            }
            PayloadMessage::SetData { key, text } => {
                let payload = match data {
                    Some(data) => DataPayload::Raw { key, data },
                    None => DataPayload::Plain { key, text },
                };

                self.events.publish(Event::SetData(payload));
            }
            PayloadMessage::UnhandledException(exception) => {
                tracing::warn!(%exception, "unhandled exception within target");
            }
            PayloadMessage::UpdateModules(modules) => {
                self.events.publish(Event::ModulesSet(modules));
            }
            PayloadMessage::UpdateRanges(ranges) => self.events.publish(Event::RangesSet(ranges)),
            PayloadMessage::WatcherHit { exception, tid } => {
                let memory = exception.get("memory");
                let field = |name: &str| {
                    memory
                        .and_then(|m| m.get(name))
                        .map(|v| v.as_str().map_or_else(|| v.to_string(), str::to_owned))
                        .unwrap_or_default()
                };

                self.log_event(format!(
                    "watcher hit op {} address {} @thread := {tid}",
                    field("operation"),
                    field("address"),
                ));
            }
            PayloadMessage::WatcherAdded {
                ptr,
                flags,
                debug_symbol,
            } => {
                let key = self.hooks.insert_watcher(Watcher {
                    ptr,
                    flags: WatcherFlags(flags),
                    debug_symbol,
                });

                self.events.publish(Event::WatcherAdded { ptr: key, flags });
            }
            PayloadMessage::WatcherRemoved { ptr } => {
                if self.hooks.remove_watcher(ptr).is_none() {
                    tracing::debug!(ptr, "removed watcher was not registered");
                }

                self.events.publish(Event::WatcherRemoved { ptr: hex_ptr(ptr) });
            }
            PayloadMessage::MemoryScanResult(results) => {
                self.events.publish(Event::MemoryScanResult(results));
            }
        }
    }

    fn register_hook(&mut self, ack: HookAck) {
        let hook = match ack {
            HookAck::Native {
                ptr,
                bytes,
                logic,
                condition,
                internal,
                debug_symbol,
            } => {
                let (input, args) = self
                    .hooks
                    .take_pending_native(ptr)
                    .unwrap_or_else(|| (hex_ptr(ptr), None));
                let args = args.unwrap_or_default();

                Hook {
                    ptr,
                    input,
                    bytes,
                    condition: condition.or(args.condition),
                    logic: match logic {
                        BreakLogic::Always => args.logic,
                        logic => logic,
                    },
                    internal,
                    debug_symbol,
                    ..Hook::new(HookKind::Native)
                }
            }
            HookAck::Java(input) => {
                let args = self.hooks.take_pending_java(&input);

                let mut hook = Hook::with_input(HookKind::Java, input);
                if let Some(args) = args {
                    hook.apply_args(args);
                }
                hook
            }
            HookAck::NativeOnLoad(module) => Hook::with_input(HookKind::NativeOnLoad, module),
            HookAck::JavaOnLoad(class) => Hook::with_input(HookKind::JavaOnLoad, class),
        };

        if !self.hooks.insert(hook.clone()) {
            tracing::debug!(ptr = hook.ptr, "internal hook installed");
            return;
        }

        tracing::debug!(kind = hook.kind.label(), input = %hook.input, "hook installed");

        let event = match hook.kind {
            HookKind::Native => Event::NativeHookAdded(hook),
            HookKind::Java => Event::JavaHookAdded(hook),
            HookKind::NativeOnLoad => Event::NativeOnLoadHookAdded(hook),
            HookKind::JavaOnLoad => Event::JavaOnLoadHookAdded(hook),
        };

        self.events.publish(event);
    }

    fn set_context(&mut self, value: serde_json::Value) {
        if let Some(modules) = value.get("modules") {
            self.events.publish(Event::ModulesSet(modules.clone()));
        }
        if let Some(ranges) = value.get("ranges") {
            self.events.publish(Event::RangesSet(ranges.clone()));
        }
        if let Some(backtrace) = value.get("backtrace") {
            self.events.publish(Event::Backtrace(backtrace.clone()));
        }

        match serde_json::from_value::<ContextData>(value.clone()) {
            Ok(data) => self.apply_context(data),
            Err(e) => tracing::warn!(error = %e, "malformed context"),
        }

        self.events.publish(Event::ContextApplied(value));
    }

    fn apply_context(&mut self, mut data: ContextData) {
        let reason = data.reason();

        if reason == ContextReason::Initial {
            self.session.arch = data.arch.unwrap_or_default();
            self.session.platform = data.platform.unwrap_or_default();
            self.session.pointer_size = data.pointer_size.unwrap_or_default();
            self.session.java_available = data.java.unwrap_or_default();

            tracing::info!(
                arch = %self.session.arch,
                platform = %self.session.platform,
                pointer_size = self.session.pointer_size,
                java = self.session.java_available,
                "payload initialized"
            );

            self.log_event(format!("injected into := {}", self.session.pid));

            if self.session.java_available {
                self.ui.java_available();
            }

            return;
        }

        if let Some(values) = data.context.take() {
            let context = Context::new(data.tid, values);

            if reason == ContextReason::Hook {
                let symbol = context.pc_symbol().unwrap_or_default();
                self.log_event(format!(
                    "hook {} {symbol} @thread := {}",
                    data.ptr_label(),
                    data.tid
                ));
            }

            self.contexts.insert(context);
        }

        if self.contexts.activate_once(data.tid) {
            tracing::debug!(tid = data.tid, "active thread");
        }
    }
}
