use std::collections::HashMap;

use indexmap::IndexMap;

use crate::ptr;

/// Kind of a code hook.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HookKind {
    /// Hook on a native address.
    Native,

    /// Hook on a java class or method.
    Java,

    /// Hook triggered when a native module is loaded.
    NativeOnLoad,

    /// Hook triggered when a java class is loaded.
    JavaOnLoad,
}

impl HookKind {
    /// Parses the kind label used by the `hook_deleted` message.
    ///
    /// Unknown labels are treated as native hooks.
    pub fn from_label(label: &str) -> Self {
        match label {
            "java" => Self::Java,
            "native_on_load" => Self::NativeOnLoad,
            "java_on_load" => Self::JavaOnLoad,
            _ => Self::Native,
        }
    }

    /// Label of the kind, as used by the payload.
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Native => "native",
            Self::Java => "java",
            Self::NativeOnLoad => "native_on_load",
            Self::JavaOnLoad => "java_on_load",
        }
    }
}

/// Break policy of a hook.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum BreakLogic {
    /// The hook always breaks (no custom logic).
    #[default]
    Always,

    /// The payload evaluates the given logic source at each hit.
    Script(String),
}

impl BreakLogic {
    /// Builds the break logic from its wire form (empty means
    /// [Always](Self::Always)).
    pub fn from_source(source: &str) -> Self {
        if source.is_empty() {
            Self::Always
        } else {
            Self::Script(source.to_owned())
        }
    }
}

/// Condition and logic staged with an "add hook" request.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HookArgs {
    /// Predicate source deciding whether the hook breaks.
    pub condition: Option<String>,

    /// Break logic of the hook.
    pub logic: BreakLogic,
}

/// Code hook acknowledged by the payload.
#[derive(Clone, Debug, PartialEq)]
pub struct Hook {
    /// Kind of the hook.
    pub kind: HookKind,

    /// Hooked address (native hooks only, `0` otherwise).
    pub ptr: u64,

    /// Symbolic placement (class, method, module) or the user input that
    /// resolved to `ptr`.
    pub input: String,

    /// Original bytes overwritten by the hook (native hooks only).
    pub bytes: Vec<u8>,

    /// Break condition.
    pub condition: Option<String>,

    /// Break logic.
    pub logic: BreakLogic,

    /// Whether the hook was installed by the payload itself.
    pub internal: bool,

    /// Debug symbol of the hooked address, as reported by the payload.
    pub debug_symbol: Option<serde_json::Value>,
}

impl Hook {
    /// Creates a hook with no placement.
    pub fn new(kind: HookKind) -> Self {
        Self {
            kind,
            ptr: 0,
            input: String::new(),
            bytes: Vec::new(),
            condition: None,
            logic: BreakLogic::Always,
            internal: false,
            debug_symbol: None,
        }
    }

    /// Creates a hook placed on a symbolic name.
    pub fn with_input(kind: HookKind, input: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            ..Self::new(kind)
        }
    }

    /// Applies the condition and logic of a staged request.
    pub fn apply_args(&mut self, args: HookArgs) {
        self.condition = args.condition;
        self.logic = args.logic;
    }
}

/// Memory access flags of a watcher.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WatcherFlags(pub u32);

impl WatcherFlags {
    /// Breaks on read access.
    pub const READ: u32 = 1;
    /// Breaks on write access.
    pub const WRITE: u32 = 1 << 1;
    /// Breaks on execution.
    pub const EXECUTE: u32 = 1 << 2;

    /// Returns whether the given flag is set.
    pub const fn contains(&self, flag: u32) -> bool {
        self.0 & flag != 0
    }
}

/// Memory-access breakpoint acknowledged by the payload.
#[derive(Clone, Debug, PartialEq)]
pub struct Watcher {
    /// Watched address.
    pub ptr: u64,

    /// Access flags.
    pub flags: WatcherFlags,

    /// Debug symbol of the watched address.
    pub debug_symbol: Option<serde_json::Value>,
}

/// Token returned when a hook request is sent to the payload.
///
/// The staged request is consumed when the matching acknowledgement
/// arrives.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PendingHook {
    id: u64,
}

impl PendingHook {
    /// Unique ID of the request within the session.
    pub const fn id(&self) -> u64 {
        self.id
    }
}

#[derive(Debug)]
struct PendingRequest {
    token: PendingHook,
    input: String,
    args: Option<HookArgs>,
}

/// Hook requests waiting for a payload acknowledgement.
#[derive(Debug, Default)]
struct PendingHooks {
    next_id: u64,
    native: HashMap<u64, PendingRequest>,
    java: HashMap<String, PendingRequest>,
}

impl PendingHooks {
    fn next_token(&mut self) -> PendingHook {
        self.next_id += 1;
        PendingHook { id: self.next_id }
    }
}

/// Local mirror of the hooks and watchers installed within the target.
#[derive(Debug, Default)]
pub struct HookRegistry {
    native: IndexMap<u64, Hook>,
    java: IndexMap<String, Hook>,
    native_on_load: IndexMap<String, Hook>,
    java_on_load: IndexMap<String, Hook>,
    watchers: IndexMap<String, Watcher>,
    pending: PendingHooks,
}

impl HookRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Native hooks, keyed by address.
    pub fn native(&self) -> &IndexMap<u64, Hook> {
        &self.native
    }

    /// Java hooks, keyed by class or method.
    pub fn java(&self) -> &IndexMap<String, Hook> {
        &self.java
    }

    /// Native on-load hooks, keyed by module name.
    pub fn native_on_load(&self) -> &IndexMap<String, Hook> {
        &self.native_on_load
    }

    /// Java on-load hooks, keyed by class name.
    pub fn java_on_load(&self) -> &IndexMap<String, Hook> {
        &self.java_on_load
    }

    /// Watchers, keyed by hex address.
    pub fn watchers(&self) -> &IndexMap<String, Watcher> {
        &self.watchers
    }

    /// Registers an acknowledged hook in the map matching its kind.
    ///
    /// Internal hooks are never registered. Returns whether the hook was
    /// registered.
    pub fn insert(&mut self, hook: Hook) -> bool {
        if hook.internal {
            return false;
        }

        match hook.kind {
            HookKind::Native => {
                self.native.insert(hook.ptr, hook);
            }
            HookKind::Java => {
                self.java.insert(hook.input.clone(), hook);
            }
            HookKind::NativeOnLoad => {
                self.native_on_load.insert(hook.input.clone(), hook);
            }
            HookKind::JavaOnLoad => {
                self.java_on_load.insert(hook.input.clone(), hook);
            }
        }

        true
    }

    /// Removes a hook by kind and key (address for native hooks, name
    /// otherwise).
    pub fn remove(&mut self, kind: HookKind, key: &str) -> Option<Hook> {
        match kind {
            HookKind::Native => ptr::parse_ptr(key).and_then(|p| self.native.shift_remove(&p)),
            HookKind::Java => self.java.shift_remove(key),
            HookKind::NativeOnLoad => self.native_on_load.shift_remove(key),
            HookKind::JavaOnLoad => self.java_on_load.shift_remove(key),
        }
    }

    /// Registers an acknowledged watcher, returning its key.
    pub fn insert_watcher(&mut self, watcher: Watcher) -> String {
        let key = ptr::hex_ptr(watcher.ptr);
        self.watchers.insert(key.clone(), watcher);
        key
    }

    /// Removes a watcher by address.
    pub fn remove_watcher(&mut self, ptr: u64) -> Option<Watcher> {
        self.watchers.shift_remove(&ptr::hex_ptr(ptr))
    }

    /// Returns whether the given address is watched.
    pub fn is_watched(&self, ptr: u64) -> bool {
        self.watchers.contains_key(&ptr::hex_ptr(ptr))
    }

    /// Stages a native hook request until its acknowledgement arrives.
    ///
    /// A previous request on the same address is superseded.
    pub fn stage_native(
        &mut self,
        ptr: u64,
        input: impl Into<String>,
        args: Option<HookArgs>,
    ) -> PendingHook {
        let token = self.pending.next_token();
        self.pending.native.insert(
            ptr,
            PendingRequest {
                token,
                input: input.into(),
                args,
            },
        );
        token
    }

    /// Stages a java hook request until its acknowledgement arrives.
    pub fn stage_java(&mut self, input: impl Into<String>, args: Option<HookArgs>) -> PendingHook {
        let token = self.pending.next_token();
        let input = input.into();
        self.pending.java.insert(
            input.clone(),
            PendingRequest { token, input, args },
        );
        token
    }

    /// Consumes the native request staged for the given address.
    ///
    /// Returns the request's user input and arguments.
    pub fn take_pending_native(&mut self, ptr: u64) -> Option<(String, Option<HookArgs>)> {
        self.pending
            .native
            .remove(&ptr)
            .map(|req| (req.input, req.args))
    }

    /// Consumes the java request staged for the given class or method.
    pub fn take_pending_java(&mut self, input: &str) -> Option<HookArgs> {
        self.pending.java.remove(input).and_then(|req| req.args)
    }

    /// Drops a staged request (e.g., when the payload rejected it).
    pub fn cancel_pending(&mut self, token: PendingHook) -> bool {
        let before = self.pending.native.len() + self.pending.java.len();
        self.pending.native.retain(|_, req| req.token != token);
        self.pending.java.retain(|_, req| req.token != token);
        before != self.pending.native.len() + self.pending.java.len()
    }

    /// Returns whether the given request is still waiting.
    pub fn is_pending(&self, token: PendingHook) -> bool {
        self.pending.native.values().any(|req| req.token == token)
            || self.pending.java.values().any(|req| req.token == token)
    }
}
