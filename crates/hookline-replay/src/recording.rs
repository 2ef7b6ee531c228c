use std::path::Path;

use hookline_relay::engine::ChannelEvent;

use crate::{Error, Result};

/// Recorded payload session.
///
/// The recorded notifications are delivered, in order, as soon as a
/// payload script is loaded.
///
/// # Format
///
/// One notification per line:
/// - `<tag>:::<fields>`: payload message (e.g., `log:::hello`).
/// - `{"type": "send", "payload": "...", "data": "<hex>"}`: raw message
///   envelope, with an optional binary buffer.
/// - `!data <hex> <tag>:::<fields>`: payload message with a binary buffer.
/// - `!destroyed`: the payload script was destroyed.
/// - `!detached [reason]`: the target went away.
///
/// Empty lines and lines starting with `#` are ignored.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Recording {
    events: Vec<ChannelEvent>,
}

impl Recording {
    /// Creates an empty recording.
    pub const fn new() -> Self {
        Self { events: Vec::new() }
    }

    /// Reads a recording file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        Self::parse(&std::fs::read_to_string(path)?)
    }

    /// Parses the content of a recording.
    pub fn parse(content: &str) -> Result<Self> {
        let mut recording = Self::new();

        for (index, line) in content.lines().enumerate() {
            let line_no = index + 1;
            let line = line.trim_end();

            if line.trim_start().is_empty() || line.starts_with('#') {
                continue;
            }

            let event = if let Some(directive) = line.strip_prefix('!') {
                parse_directive(line_no, directive)?
            } else if line.starts_with('{') {
                parse_envelope(line_no, line)?
            } else {
                ChannelEvent::payload(line)
            };

            recording.push(event);
        }

        Ok(recording)
    }

    /// Appends a notification.
    pub fn push(&mut self, event: ChannelEvent) {
        self.events.push(event);
    }

    /// Appends a payload message.
    pub fn with_payload(mut self, payload: impl Into<String>) -> Self {
        self.push(ChannelEvent::payload(payload));
        self
    }

    /// Recorded notifications.
    pub fn events(&self) -> &[ChannelEvent] {
        &self.events
    }

    /// Number of recorded notifications.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Returns whether nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

fn parse_directive(line: usize, directive: &str) -> Result<ChannelEvent> {
    let (name, rest) = directive
        .split_once(' ')
        .map_or((directive, ""), |(name, rest)| (name, rest.trim_start()));

    match name {
        "destroyed" => Ok(ChannelEvent::ScriptDestroyed),
        "detached" => Ok(ChannelEvent::Detached {
            reason: if rest.is_empty() {
                "process-terminated".to_owned()
            } else {
                rest.to_owned()
            },
            crash_log: None,
        }),
        "data" => {
            let (data, payload) = rest.split_once(' ').unwrap_or((rest, ""));
            let data = hex::decode(data).map_err(|source| Error::Hex { line, source })?;

            Ok(ChannelEvent::Message {
                message: serde_json::json!({ "type": "send", "payload": payload }),
                data: Some(data),
            })
        }
        _ => Err(Error::UnknownDirective {
            line,
            directive: name.to_owned(),
        }),
    }
}

fn parse_envelope(line: usize, content: &str) -> Result<ChannelEvent> {
    let mut message: serde_json::Value =
        serde_json::from_str(content).map_err(|source| Error::Json { line, source })?;

    let data = match message
        .as_object_mut()
        .and_then(|envelope| envelope.remove("data"))
    {
        Some(serde_json::Value::String(data)) => {
            Some(hex::decode(data).map_err(|source| Error::Hex { line, source })?)
        }
        _ => None,
    };

    Ok(ChannelEvent::Message { message, data })
}
