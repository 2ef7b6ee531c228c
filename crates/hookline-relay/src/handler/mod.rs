use tokio::sync::mpsc;

use crate::hook::Hook;

/// Event published by the relay to its consumers.
#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    /// The relay attached to a process.
    ProcessAttached {
        /// ID of the process.
        pid: u32,
        /// Process name or spawned package.
        label: String,
    },

    /// The attached process went away.
    ProcessDetached {
        /// ID of the process.
        pid: u32,
        /// Detach reason reported by the engine.
        reason: String,
        /// Crash report, when the process crashed.
        crash_log: Option<String>,
    },

    /// The payload script was loaded and initialized.
    ScriptLoaded,

    /// The payload script was destroyed.
    ScriptDestroyed,

    /// A native hook was installed.
    NativeHookAdded(Hook),

    /// A java hook was installed.
    JavaHookAdded(Hook),

    /// A native on-load hook was installed.
    NativeOnLoadHookAdded(Hook),

    /// A java on-load hook was installed.
    JavaOnLoadHookAdded(Hook),

    /// A hook was deleted (raw message fields: tag, kind, key).
    HookDeleted(Vec<String>),

    /// A native on-load hook was hit.
    NativeOnLoadHit {
        /// Loaded module.
        module: String,
        /// Base address of the module.
        base: String,
    },

    /// A java on-load hook was hit.
    JavaOnLoadHit {
        /// Loaded class.
        class: String,
    },

    /// A watcher was installed.
    WatcherAdded {
        /// Watched address (hex).
        ptr: String,
        /// Access flags.
        flags: u32,
    },

    /// A watcher was removed.
    WatcherRemoved {
        /// Watched address (hex).
        ptr: String,
    },

    /// Memory ranges of the target.
    RangesSet(serde_json::Value),

    /// Modules of the target.
    ModulesSet(serde_json::Value),

    /// Payload console output.
    Log(String),

    /// Relay event log line.
    LogEvent(String),

    /// A thread was resumed.
    ThreadResumed(u64),

    /// A context was applied (raw object of the `set_context` message).
    ContextApplied(serde_json::Value),

    /// Java class enumeration started.
    EnumerateJavaClassesStart,

    /// Java class enumeration found a class.
    EnumerateJavaClassesMatch(String),

    /// Java class enumeration completed.
    EnumerateJavaClassesComplete,

    /// Java method enumeration completed.
    EnumerateJavaMethodsComplete {
        /// Enumerated class.
        class: String,
        /// Methods of the class.
        methods: serde_json::Value,
    },

    /// Java trace event (raw message fields).
    JavaTrace(Vec<String>),

    /// Backtrace of a thread.
    Backtrace(serde_json::Value),

    /// Memory scan results.
    MemoryScanResult(Vec<serde_json::Value>),

    /// Data to display.
    SetData(DataPayload),

    /// A context property changed.
    ContextChanged {
        /// Updated property.
        property: String,
        /// New value.
        value: String,
    },
}

impl Event {
    /// Name of the event, as used by consumers filtering on event kinds.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::ProcessAttached { .. } => "process-attached",
            Self::ProcessDetached { .. } => "process-detached",
            Self::ScriptLoaded => "script-loaded",
            Self::ScriptDestroyed => "script-destroyed",
            Self::NativeHookAdded(_) => "add-native-hook",
            Self::JavaHookAdded(_) => "add-java-hook",
            Self::NativeOnLoadHookAdded(_) => "add-native-on-load-hook",
            Self::JavaOnLoadHookAdded(_) => "add-java-on-load-hook",
            Self::HookDeleted(_) => "delete-hook",
            Self::NativeOnLoadHit { .. } => "hit-native-on-load",
            Self::JavaOnLoadHit { .. } => "hit-java-on-load",
            Self::WatcherAdded { .. } => "watcher-added",
            Self::WatcherRemoved { .. } => "watcher-removed",
            Self::RangesSet(_) => "set-ranges",
            Self::ModulesSet(_) => "set-modules",
            Self::Log(_) => "log",
            Self::LogEvent(_) => "log-event",
            Self::ThreadResumed(_) => "thread-resumed",
            Self::ContextApplied(_) => "apply-context",
            Self::EnumerateJavaClassesStart => "enumerate-java-classes-start",
            Self::EnumerateJavaClassesMatch(_) => "enumerate-java-classes-match",
            Self::EnumerateJavaClassesComplete => "enumerate-java-classes-complete",
            Self::EnumerateJavaMethodsComplete { .. } => "enumerate-java-methods-complete",
            Self::JavaTrace(_) => "java-trace",
            Self::Backtrace(_) => "backtrace",
            Self::MemoryScanResult(_) => "memory-scan-result",
            Self::SetData(_) => "set-data",
            Self::ContextChanged { .. } => "context-changed",
        }
    }
}

/// Payload of a [SetData](Event::SetData) event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DataPayload {
    /// Binary data sent alongside the message.
    Raw {
        /// Data key.
        key: String,
        /// Binary buffer.
        data: Vec<u8>,
    },

    /// Textual data sent within the message.
    Plain {
        /// Data key.
        key: String,
        /// Text.
        text: String,
    },
}

impl DataPayload {
    /// Tag of the payload (`raw` or `plain`).
    pub const fn tag(&self) -> &'static str {
        match self {
            Self::Raw { .. } => "raw",
            Self::Plain { .. } => "plain",
        }
    }
}

/// Trait for implementing a relay event consumer.
pub trait EventHandler {
    /// Function called for every event published by the relay.
    fn handle_event(&mut self, event: &Event);
}

impl EventHandler for mpsc::UnboundedSender<Event> {
    fn handle_event(&mut self, event: &Event) {
        // a closed receiver only means the consumer is gone
        let _ = self.send(event.clone());
    }
}

impl<F: FnMut(&Event)> EventHandler for F {
    fn handle_event(&mut self, event: &Event) {
        self(event)
    }
}

/// Fan-out of relay events to every subscribed consumer.
#[derive(Default)]
pub struct EventBus {
    handlers: Vec<Box<dyn EventHandler>>,
}

impl EventBus {
    /// Creates a bus without subscribers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes a consumer to every event.
    pub fn subscribe(&mut self, handler: impl EventHandler + 'static) {
        self.handlers.push(Box::new(handler));
    }

    /// Number of subscribers.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Returns whether there is no subscriber.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Publishes an event to every subscriber, in subscription order.
    pub fn publish(&mut self, event: Event) {
        tracing::trace!(event = event.name(), "publish");

        for handler in self.handlers.iter_mut() {
            handler.handle_event(&event);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use tokio::sync::mpsc;

    use super::{Event, EventBus};

    #[test]
    fn publish_in_subscription_order() {
        let seen = Rc::new(RefCell::new(Vec::new()));

        let mut bus = EventBus::new();
        for id in 0..2 {
            let seen = seen.clone();
            bus.subscribe(move |event: &Event| seen.borrow_mut().push((id, event.name())));
        }

        bus.publish(Event::ScriptLoaded);

        assert_eq!(
            *seen.borrow(),
            vec![(0, "script-loaded"), (1, "script-loaded")]
        );
    }

    #[test]
    fn channel_subscriber() {
        let (tx, mut rx) = mpsc::unbounded_channel();

        let mut bus = EventBus::new();
        bus.subscribe(tx);
        bus.publish(Event::ThreadResumed(3));

        assert_eq!(rx.try_recv().ok(), Some(Event::ThreadResumed(3)));
    }
}
