//! Closed message protocol emitted by the payload.
//!
//! Each message is a single string of `:::`-delimited fields. The first
//! field is the tag, which determines the arity and type of the others.

use crate::hook::{BreakLogic, HookKind};

/// Field delimiter of payload messages.
pub const FIELD_DELIMITER: &str = ":::";

/// Error returned when a payload message can't be decoded.
#[derive(thiserror::Error, Debug)]
pub enum DecodeError {
    /// The message has less than two fields.
    #[error("message has less than two fields")]
    TooFewFields,

    /// The tag isn't part of the protocol.
    #[error("unknown message tag: {0}")]
    UnknownTag(String),

    /// A field required by the tag is missing.
    #[error("{tag}: missing field #{index}")]
    MissingField {
        /// Tag of the message.
        tag: &'static str,
        /// Index of the missing field.
        index: usize,
    },

    /// A field isn't a valid integer.
    #[error("{tag}: invalid integer {value:?}")]
    InvalidInteger {
        /// Tag of the message.
        tag: &'static str,
        /// Offending field.
        value: String,
    },

    /// A field isn't a valid pointer.
    #[error("{tag}: invalid pointer {value:?}")]
    InvalidPointer {
        /// Tag of the message.
        tag: &'static str,
        /// Offending field.
        value: String,
    },

    /// A field isn't valid JSON.
    #[error("{tag}: {source}")]
    Json {
        /// Tag of the message.
        tag: &'static str,
        /// JSON error.
        source: serde_json::Error,
    },

    /// A field isn't a valid hex buffer.
    #[error("{tag}: {source}")]
    Hex {
        /// Tag of the message.
        tag: &'static str,
        /// Hex decoding error.
        source: hex::FromHexError,
    },
}

/// Decoded payload message.
#[derive(Clone, Debug, PartialEq)]
pub enum PayloadMessage {
    /// A thread waiting for an API call timed out and asks to be pinged.
    ApiPingTimeout {
        /// Thread to ping.
        tid: String,
    },

    /// Backtrace of a thread.
    Backtrace(serde_json::Value),

    /// A java class loader is loading a class.
    ClassLoaderLoadingClass {
        /// Loading thread.
        tid: String,
        /// Loaded class.
        class: String,
    },

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

    /// Function trace data.
    Ftrace(String),

    /// The payload detected kernel instrumentation support.
    EnableKernel,

    /// A hook was installed by the payload.
    HookInstalled(HookAck),

    /// A hook was removed by the payload.
    HookDeleted {
        /// Kind of the removed hook.
        kind: HookKind,
        /// Raw message fields (tag included), republished as-is.
        fields: Vec<String>,
    },

    /// A java on-load hook was hit.
    JavaOnLoadHit {
        /// Loaded class.
        class: String,
        /// Loading thread.
        tid: String,
    },

    /// Java trace event (raw fields, tag included).
    JavaTrace(Vec<String>),

    /// Console output of the payload.
    Log(String),

    /// A native on-load hook was hit.
    NativeOnLoadHit {
        /// Loaded module.
        module: String,
        /// Base address of the module.
        base: String,
        /// Loading thread.
        tid: String,
    },

    /// A thread is loading a native module.
    NativeModuleLoading {
        /// Loading thread.
        tid: String,
        /// Loaded module.
        module: String,
    },

    /// A thread is starting a new thread.
    NewThread {
        /// Starting thread.
        tid: String,
        /// Entry point of the new thread.
        target: String,
    },

    /// A thread was released (resumed) by the payload.
    Release {
        /// Released thread.
        tid: String,
    },

    /// The payload asks the (spawned) process to be resumed.
    Resume,

    /// The payload asks the relay to release a thread through the gateway.
    ReleaseJs {
        /// Thread to release.
        tid: u64,
    },

    /// Context of a thread (or the initial handshake).
    SetContext(serde_json::Value),

    /// Single context property update.
    SetContextValue {
        /// Updated property.
        property: String,
        /// New value.
        value: String,
    },

    /// Data view request.
    SetData {
        /// Data key.
        key: String,
        /// Textual payload (ignored when a binary buffer is attached).
        text: String,
    },

    /// Unhandled exception within the target.
    UnhandledException(String),

    /// Loaded modules changed.
    UpdateModules(serde_json::Value),

    /// Memory ranges changed.
    UpdateRanges(serde_json::Value),

    /// A watcher was hit.
    WatcherHit {
        /// Exception details.
        exception: serde_json::Value,
        /// Faulting thread.
        tid: String,
    },

    /// A watcher was installed.
    WatcherAdded {
        /// Watched address.
        ptr: u64,
        /// Access flags.
        flags: u32,
        /// Debug symbol of the address.
        debug_symbol: Option<serde_json::Value>,
    },

    /// A watcher was removed.
    WatcherRemoved {
        /// Watched address.
        ptr: u64,
    },

    /// Memory scan results.
    MemoryScanResult(Vec<serde_json::Value>),
}

/// Hook installation acknowledgement.
#[derive(Clone, Debug, PartialEq)]
pub enum HookAck {
    /// Native hook.
    Native {
        /// Hooked address.
        ptr: u64,
        /// Original bytes.
        bytes: Vec<u8>,
        /// Break logic.
        logic: BreakLogic,
        /// Break condition.
        condition: Option<String>,
        /// Whether the hook is internal to the payload.
        internal: bool,
        /// Debug symbol of the address.
        debug_symbol: Option<serde_json::Value>,
    },

    /// Java hook on a class or method.
    Java(String),

    /// Native on-load hook on a module.
    NativeOnLoad(String),

    /// Java on-load hook on a class.
    JavaOnLoad(String),
}

impl PayloadMessage {
    /// Decodes a payload string.
    pub fn decode(payload: &str) -> Result<Self, DecodeError> {
        let fields = Fields::split(payload)?;

        let message = match fields.tag() {
            "api_ping_timeout" => Self::ApiPingTimeout {
                tid: fields.string("api_ping_timeout", 1)?,
            },
            "backtrace" => Self::Backtrace(fields.json("backtrace", 1)?),
            "class_loader_loading_class" => Self::ClassLoaderLoadingClass {
                tid: fields.string("class_loader_loading_class", 1)?,
                class: fields.string("class_loader_loading_class", 2)?,
            },
            "enumerate_java_classes_start" => Self::EnumerateJavaClassesStart,
            "enumerate_java_classes_match" => {
                Self::EnumerateJavaClassesMatch(fields.string("enumerate_java_classes_match", 1)?)
            }
            "enumerate_java_classes_complete" => Self::EnumerateJavaClassesComplete,
            "enumerate_java_methods_complete" => Self::EnumerateJavaMethodsComplete {
                class: fields.string("enumerate_java_methods_complete", 1)?,
                methods: fields.json("enumerate_java_methods_complete", 2)?,
            },
            "ftrace" => Self::Ftrace(fields.string("ftrace", 1)?),
            "enable_kernel" => Self::EnableKernel,
            "hook_java_callback" => {
                Self::HookInstalled(HookAck::Java(fields.string("hook_java_callback", 1)?))
            }
            "hook_java_on_load_callback" => Self::HookInstalled(HookAck::JavaOnLoad(
                fields.string("hook_java_on_load_callback", 1)?,
            )),
            "hook_native_callback" => {
                const TAG: &str = "hook_native_callback";

                let condition = fields.string(TAG, 4)?;

                Self::HookInstalled(HookAck::Native {
                    ptr: fields.ptr(TAG, 1)?,
                    bytes: hex::decode(fields.str(TAG, 2)?)
                        .map_err(|source| DecodeError::Hex { tag: TAG, source })?,
                    logic: BreakLogic::from_source(fields.str(TAG, 3)?),
                    condition: (!condition.is_empty()).then_some(condition),
                    internal: fields.str(TAG, 5)? == "true",
                    debug_symbol: fields.optional_json(TAG, 6)?,
                })
            }
            "hook_native_on_load_callback" => Self::HookInstalled(HookAck::NativeOnLoad(
                fields.string("hook_native_on_load_callback", 1)?,
            )),
            "hook_deleted" => {
                let kind = HookKind::from_label(fields.str("hook_deleted", 1)?);
                // the key is required, even though the fields are republished as-is
                fields.str("hook_deleted", 2)?;

                Self::HookDeleted {
                    kind,
                    fields: fields.to_vec(),
                }
            }
            "java_on_load_callback" => Self::JavaOnLoadHit {
                class: fields.string("java_on_load_callback", 1)?,
                tid: fields.string("java_on_load_callback", 2)?,
            },
            "java_trace" => Self::JavaTrace(fields.to_vec()),
            "log" => Self::Log(fields.string("log", 1)?),
            "native_on_load_callback" => Self::NativeOnLoadHit {
                module: fields.string("native_on_load_callback", 1)?,
                base: fields.string("native_on_load_callback", 2)?,
                tid: fields.string("native_on_load_callback", 3)?,
            },
            "native_on_load_module_loading" => Self::NativeModuleLoading {
                tid: fields.string("native_on_load_module_loading", 1)?,
                module: fields.string("native_on_load_module_loading", 2)?,
            },
            "new_thread" => Self::NewThread {
                tid: fields.string("new_thread", 1)?,
                target: fields.string("new_thread", 2)?,
            },
            "release" => Self::Release {
                tid: fields.string("release", 1)?,
            },
            "resume" => Self::Resume,
            "release_js" => Self::ReleaseJs {
                tid: fields.int("release_js", 1)?,
            },
            "set_context" => Self::SetContext(fields.json("set_context", 1)?),
            "set_context_value" => Self::SetContextValue {
                property: fields.string("set_context_value", 1)?,
                value: fields.string("set_context_value", 2)?,
            },
            "set_data" => Self::SetData {
                key: fields.string("set_data", 1)?,
                text: fields.get(2).unwrap_or_default().to_owned(),
            },
            "unhandled_exception" => {
                Self::UnhandledException(fields.0[1..].join(FIELD_DELIMITER))
            }
            "update_modules" => Self::UpdateModules(fields.json("update_modules", 2)?),
            "update_ranges" => Self::UpdateRanges(fields.json("update_ranges", 2)?),
            "watcher" => Self::WatcherHit {
                exception: fields.json("watcher", 1)?,
                tid: fields.string("watcher", 2)?,
            },
            "watcher_added" => Self::WatcherAdded {
                ptr: fields.ptr("watcher_added", 1)?,
                flags: fields.int("watcher_added", 2)?,
                debug_symbol: fields.optional_json("watcher_added", 3)?,
            },
            "watcher_removed" => Self::WatcherRemoved {
                ptr: fields.ptr("watcher_removed", 1)?,
            },
            "memoryscan_result" => {
                let results = fields.str("memoryscan_result", 1)?;
                if results.is_empty() {
                    Self::MemoryScanResult(Vec::new())
                } else {
                    Self::MemoryScanResult(
                        serde_json::from_str(results).map_err(|source| DecodeError::Json {
                            tag: "memoryscan_result",
                            source,
                        })?,
                    )
                }
            }
            other => return Err(DecodeError::UnknownTag(other.to_owned())),
        };

        Ok(message)
    }
}

/// Fields of a raw payload message.
struct Fields<'a>(Vec<&'a str>);

impl<'a> Fields<'a> {
    fn split(payload: &'a str) -> Result<Self, DecodeError> {
        let fields: Vec<&str> = payload.split(FIELD_DELIMITER).collect();

        if fields.len() < 2 {
            return Err(DecodeError::TooFewFields);
        }

        Ok(Self(fields))
    }

    fn tag(&self) -> &'a str {
        self.0[0]
    }

    fn get(&self, index: usize) -> Option<&'a str> {
        self.0.get(index).copied()
    }

    fn str(&self, tag: &'static str, index: usize) -> Result<&'a str, DecodeError> {
        self.get(index)
            .ok_or(DecodeError::MissingField { tag, index })
    }

    fn string(&self, tag: &'static str, index: usize) -> Result<String, DecodeError> {
        self.str(tag, index).map(str::to_owned)
    }

    fn int<T: std::str::FromStr>(&self, tag: &'static str, index: usize) -> Result<T, DecodeError> {
        let value = self.str(tag, index)?;
        value.trim().parse().map_err(|_| DecodeError::InvalidInteger {
            tag,
            value: value.to_owned(),
        })
    }

    fn ptr(&self, tag: &'static str, index: usize) -> Result<u64, DecodeError> {
        let value = self.str(tag, index)?;

        // pointers are always sent as hex, with or without prefix
        let digits = value
            .strip_prefix("0x")
            .or_else(|| value.strip_prefix("0X"))
            .unwrap_or(value);

        u64::from_str_radix(digits, 16).map_err(|_| DecodeError::InvalidPointer {
            tag,
            value: value.to_owned(),
        })
    }

    fn json(&self, tag: &'static str, index: usize) -> Result<serde_json::Value, DecodeError> {
        serde_json::from_str(self.str(tag, index)?)
            .map_err(|source| DecodeError::Json { tag, source })
    }

    fn optional_json(
        &self,
        tag: &'static str,
        index: usize,
    ) -> Result<Option<serde_json::Value>, DecodeError> {
        match self.get(index) {
            None | Some("") => Ok(None),
            Some(_) => self.json(tag, index).map(Some),
        }
    }

    fn to_vec(&self) -> Vec<String> {
        self.0.iter().map(|s| (*s).to_owned()).collect()
    }
}
