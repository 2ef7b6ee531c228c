use std::collections::HashMap;

use serde::Deserialize;

use crate::ptr;

/// Reason code of a context reported by the payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContextReason {
    /// One-time handshake sent right after the payload is injected.
    Initial,

    /// A hook was hit.
    Hook,

    /// Any other reason (e.g., watcher or exception), kept opaque.
    Other(i64),
}

impl ContextReason {
    /// Decodes a wire reason code.
    pub const fn from_code(code: i64) -> Self {
        match code {
            -1 => Self::Initial,
            0 => Self::Hook,
            other => Self::Other(other),
        }
    }

    /// Wire code of this reason.
    pub const fn code(&self) -> i64 {
        match self {
            Self::Initial => -1,
            Self::Hook => 0,
            Self::Other(code) => *code,
        }
    }
}

/// Object carried by a `set_context` message.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextData {
    /// Reason code (see [ContextReason]).
    pub reason: i64,

    /// ID of the reporting thread.
    #[serde(default)]
    pub tid: u64,

    /// Address that triggered the context, when any.
    #[serde(default)]
    pub ptr: Option<serde_json::Value>,

    /// Register and variable state.
    #[serde(default)]
    pub context: Option<serde_json::Map<String, serde_json::Value>>,

    /// Target architecture (initial context only).
    #[serde(default)]
    pub arch: Option<String>,

    /// Target platform (initial context only).
    #[serde(default)]
    pub platform: Option<String>,

    /// Target pointer size (initial context only).
    #[serde(default)]
    pub pointer_size: Option<u8>,

    /// Whether a java runtime is available (initial context only).
    #[serde(default)]
    pub java: Option<bool>,

    /// Loaded modules, when the payload attached them.
    #[serde(default)]
    pub modules: Option<serde_json::Value>,

    /// Memory ranges, when the payload attached them.
    #[serde(default)]
    pub ranges: Option<serde_json::Value>,

    /// Backtrace, when the payload attached it.
    #[serde(default)]
    pub backtrace: Option<serde_json::Value>,
}

impl ContextData {
    /// Reason of this context.
    pub const fn reason(&self) -> ContextReason {
        ContextReason::from_code(self.reason)
    }

    /// Address that triggered the context, in its display form.
    pub fn ptr_label(&self) -> String {
        match &self.ptr {
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(value) => ptr::parse_ptr_value(value)
                .map(ptr::hex_ptr)
                .unwrap_or_else(|| value.to_string()),
            None => String::new(),
        }
    }
}

/// Register and variable state of a thread, captured at a hook hit.
#[derive(Clone, Debug, PartialEq)]
pub struct Context {
    tid: u64,
    values: serde_json::Map<String, serde_json::Value>,
}

impl Context {
    /// Creates a context from the state reported by the payload.
    pub const fn new(tid: u64, values: serde_json::Map<String, serde_json::Value>) -> Self {
        Self { tid, values }
    }

    /// ID of the thread.
    pub const fn tid(&self) -> u64 {
        self.tid
    }

    /// Raw value of a register or variable.
    pub fn get(&self, name: &str) -> Option<&serde_json::Value> {
        self.values.get(name)
    }

    /// Names of the captured registers and variables.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    /// Numeric value of a register.
    ///
    /// Registers are either reported as bare pointers or as objects with a
    /// `value` field.
    pub fn register(&self, name: &str) -> Option<u64> {
        let value = self.values.get(name)?;
        value
            .get("value")
            .map_or_else(|| ptr::parse_ptr_value(value), ptr::parse_ptr_value)
    }

    /// Program counter.
    pub fn pc(&self) -> Option<u64> {
        self.register("pc")
    }

    /// `module - symbol` label of the program counter, when resolved.
    pub fn pc_symbol(&self) -> Option<String> {
        let symbol = self.values.get("pc")?.get("symbol")?;
        let name = symbol.get("name")?.as_str()?;
        let module = symbol
            .get("moduleName")
            .and_then(serde_json::Value::as_str)
            .unwrap_or_default();

        Some(format!("{module} - {name}"))
    }
}

/// Contexts of the threads currently blocked in the payload.
#[derive(Debug, Default)]
pub struct ContextStore {
    contexts: HashMap<String, Context>,
    current_tid: u64,
}

impl ContextStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores the context of a thread, replacing any previous one.
    pub fn insert(&mut self, context: Context) {
        self.contexts.insert(context.tid.to_string(), context);
    }

    /// Removes the context of a released thread.
    pub fn remove(&mut self, tid: &str) -> Option<Context> {
        self.contexts.remove(tid)
    }

    /// Context of the given thread.
    pub fn get(&self, tid: u64) -> Option<&Context> {
        self.contexts.get(&tid.to_string())
    }

    /// Returns whether the given thread has a context.
    pub fn contains(&self, tid: u64) -> bool {
        self.contexts.contains_key(&tid.to_string())
    }

    /// IDs of the threads with a context, in ascending order.
    pub fn thread_ids(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self.contexts.values().map(Context::tid).collect();
        ids.sort_unstable();
        ids
    }

    /// Number of stored contexts.
    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    /// Returns whether no context is stored.
    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }

    /// ID of the active thread (`0` when none).
    pub const fn current_tid(&self) -> u64 {
        self.current_tid
    }

    /// Sets the active thread, unless one was already set.
    ///
    /// Returns whether the active thread changed.
    pub fn activate_once(&mut self, tid: u64) -> bool {
        if self.current_tid == 0 {
            self.current_tid = tid;
            true
        } else {
            false
        }
    }

    /// Context of the active thread.
    pub fn current(&self) -> Option<&Context> {
        self.get(self.current_tid)
    }
}
