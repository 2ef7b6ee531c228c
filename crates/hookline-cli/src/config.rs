use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use hookline_relay::RelayOptions;
use hookline_relay::engine::ApiValue;
use kdl::{KdlDocument, KdlEntry, KdlNode};
use miette::IntoDiagnostic;

/// Configuration of a relay session.
#[derive(Debug, PartialEq, knus::Decode)]
pub struct RelayConfig {
    /// Path of the core payload script.
    #[knus(child, default = hookline_relay::DEFAULT_CORE_SCRIPT.to_owned(), unwrap(argument))]
    pub core_script: String,

    /// Whether the payload breaks on the process entry point.
    #[knus(child)]
    pub break_start: bool,

    /// Whether the payload runs in debug mode.
    #[knus(child)]
    pub debug_script: bool,

    /// Pointer size used when rendering addresses.
    #[knus(child, default = 8, unwrap(argument))]
    pub pointer_size: u8,

    /// Replies of the payload APIs, when replaying a session.
    #[knus(children(name = "reply"))]
    pub replies: Vec<ReplyConfig>,
}

/// Reply of a payload API.
#[derive(Debug, PartialEq, knus::Decode)]
pub struct ReplyConfig {
    /// Name of the payload API.
    #[knus(argument)]
    pub api: String,

    /// JSON value returned by the API.
    #[knus(property)]
    pub json: Option<String>,

    /// Raw bytes returned by the API (hex).
    #[knus(property)]
    pub hex: Option<String>,
}

/// Invalid payload API reply.
#[derive(Debug, thiserror::Error)]
pub enum ReplyError {
    /// The reply has neither or both of `json` and `hex`.
    #[error("reply of {0:?} needs exactly one of `json` or `hex`")]
    Ambiguous(String),

    /// The JSON value is malformed.
    #[error("invalid JSON reply of {api:?}")]
    Json {
        /// Name of the payload API.
        api: String,
        /// Parsing error.
        #[source]
        source: serde_json::Error,
    },

    /// The hex bytes are malformed.
    #[error("invalid hex reply of {api:?}")]
    Hex {
        /// Name of the payload API.
        api: String,
        /// Decoding error.
        #[source]
        source: hex::FromHexError,
    },
}

impl RelayConfig {
    /// Parses the configuration given on the command-line.
    ///
    /// If it ends with `.kdl`, it is read from the given path, otherwise it
    /// is parsed as inline KDL content.
    pub fn from_cli_arg(config: &str) -> miette::Result<Self> {
        let path = Path::new(config);

        let config: Self = if let Some((filename, "kdl")) = path
            .file_name()
            .and_then(OsStr::to_str)
            .zip(path.extension().and_then(OsStr::to_str))
        {
            let content = std::fs::read_to_string(path).into_diagnostic()?;
            knus::parse(filename, &content)?
        } else {
            knus::parse("<content>", config)?
        };

        // surface malformed replies before any session starts
        for reply in &config.replies {
            reply.value().into_diagnostic()?;
        }

        Ok(config)
    }

    /// Options of the relay.
    pub fn relay_options(&self) -> RelayOptions {
        RelayOptions {
            core_script: PathBuf::from(&self.core_script),
            break_start: self.break_start,
            debug_script: self.debug_script,
        }
    }

    /// Renders the effective configuration.
    pub fn to_kdl(&self) -> KdlDocument {
        let mut kdl = KdlDocument::new();

        let mut node = KdlNode::new("core-script");
        node.entries_mut()
            .push(KdlEntry::new(self.core_script.as_str()));
        kdl.nodes_mut().push(node);

        if self.break_start {
            kdl.nodes_mut().push(KdlNode::new("break-start"));
        }

        if self.debug_script {
            kdl.nodes_mut().push(KdlNode::new("debug-script"));
        }

        let mut node = KdlNode::new("pointer-size");
        node.entries_mut()
            .push(KdlEntry::new(i128::from(self.pointer_size)));
        kdl.nodes_mut().push(node);

        for reply in &self.replies {
            let mut node = KdlNode::new("reply");
            node.entries_mut().push(KdlEntry::new(reply.api.as_str()));

            if let Some(json) = &reply.json {
                node.entries_mut()
                    .push(KdlEntry::new_prop("json", json.as_str()));
            }

            if let Some(hex) = &reply.hex {
                node.entries_mut()
                    .push(KdlEntry::new_prop("hex", hex.as_str()));
            }

            kdl.nodes_mut().push(node);
        }

        kdl
    }
}

impl ReplyConfig {
    /// Value returned by the payload API.
    pub fn value(&self) -> Result<ApiValue, ReplyError> {
        match (&self.json, &self.hex) {
            (Some(json), None) => serde_json::from_str(json)
                .map(ApiValue::Json)
                .map_err(|source| ReplyError::Json {
                    api: self.api.clone(),
                    source,
                }),
            (None, Some(bytes)) => hex::decode(bytes.trim_start_matches("0x"))
                .map(ApiValue::Bytes)
                .map_err(|source| ReplyError::Hex {
                    api: self.api.clone(),
                    source,
                }),
            _ => Err(ReplyError::Ambiguous(self.api.clone())),
        }
    }
}
